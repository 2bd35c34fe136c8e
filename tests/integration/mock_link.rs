//! Mock transport and test rig shared by the integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use eswcom::adapters::nvs::NvsStorage;
use eswcom::adapters::time::SystemClock;
use eswcom::app::device::Device;
use eswcom::app::events::ComEvent;
use eswcom::app::ports::{EventSink, StorageError, StoragePort};
use eswcom::com::arbiter::TransportArbiter;
use eswcom::com::client::{ClientId, Medium, PeerAddr};
use eswcom::com::codec::{CompoundCodec, FrameDecoder};
use eswcom::com::compound::{Compound, CompoundFrame, CompoundKind, DecodedReply, Service, SwitchState};
use eswcom::com::endpoint::EndpointId;
use eswcom::com::service::ComService;
use eswcom::com::transport::Transport;
use eswcom::config::SystemConfig;
use eswcom::diagnostics::ReportSystem;
use eswcom::error::TransportError;

// ── Mock link ─────────────────────────────────────────────────

/// Both directions of one mock connection, shared with the test.
#[derive(Default)]
pub struct Pipe {
    pub inbound: VecDeque<Vec<u8>>,
    pub outbound: Vec<u8>,
    pub read_error: Option<TransportError>,
    pub stalled: bool,
}

pub struct MockLink(pub Rc<RefCell<Pipe>>);

impl Transport for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut p = self.0.borrow_mut();
        if let Some(e) = p.read_error.take() {
            return Err(e);
        }
        match p.inbound.pop_front() {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut p = self.0.borrow_mut();
        if p.stalled {
            return Ok(0);
        }
        p.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn medium(&self) -> Medium {
        Medium::Serial
    }
}

// ── Recording sink ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ComEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ComEvent) {
        self.events.push(*event);
    }
}

// ── Counting storage ──────────────────────────────────────────

/// Host NVS that counts every write, shared with the test.
pub struct CountingStorage {
    inner: NvsStorage,
    pub writes: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self {
            inner: NvsStorage::new().unwrap(),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StoragePort for CountingStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.inner.read(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.inner.exists(namespace, key)
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// A device with its communication service, fed through mock links.
pub struct Rig<S: EventSink = RecordingSink> {
    pub device: Arc<Device>,
    pub service: ComService<S>,
    pub codec: CompoundCodec,
}

pub struct Client {
    pub id: ClientId,
    pub pipe: Rc<RefCell<Pipe>>,
    decoder: FrameDecoder,
}

pub fn device() -> Arc<Device> {
    device_with_storage(Box::new(NvsStorage::new().unwrap()))
}

/// Device whose diagnostics report persists into `storage`.
pub fn device_with_storage(storage: Box<dyn StoragePort + Send>) -> Arc<Device> {
    let clock = Arc::new(SystemClock::new());
    let report = Arc::new(ReportSystem::new(clock.clone(), Default::default(), storage));
    let device = Device::build(SystemConfig::default(), clock, report).unwrap();
    device.set_switches(SwitchState::Remote);
    Arc::new(device)
}

impl Rig<RecordingSink> {
    pub fn new() -> Self {
        Self::with_sink(|_| RecordingSink::default())
    }

    pub fn events(&self) -> &[ComEvent] {
        &self.service.sink().events
    }
}

impl<S: EventSink> Rig<S> {
    /// Rig whose event sink is built from the device, e.g. to share its
    /// diagnostics report.
    pub fn with_sink(make_sink: impl FnOnce(&Device) -> S) -> Self {
        Self::from_device(device(), make_sink)
    }

    pub fn from_device(device: Arc<Device>, make_sink: impl FnOnce(&Device) -> S) -> Self {
        let sink = make_sink(&device);
        let service = ComService::new(TransportArbiter::new(), device.engine(), sink)
            .with_report(Arc::clone(device.report()))
            .with_clock(Arc::clone(device.clock()));
        Self {
            codec: CompoundCodec::new(device.config().limits),
            device,
            service,
        }
    }

    pub fn connect(&mut self) -> Client {
        let pipe = Rc::new(RefCell::new(Pipe::default()));
        let id = self
            .service
            .attach(Box::new(MockLink(pipe.clone())), PeerAddr::Serial)
            .unwrap();
        Client {
            id,
            pipe,
            decoder: FrameDecoder::new(),
        }
    }

    /// Queue `frame` on `client` and run one service pass.
    pub fn request(&mut self, client: &Client, frame: &CompoundFrame) {
        let payload = self.codec.encode(frame);
        self.send_raw(client, &payload);
    }

    pub fn send_raw(&mut self, client: &Client, payload: &[u8]) {
        client.pipe.borrow_mut().inbound.push_back(framed(payload));
        self.service.service_inbound(8);
    }

    /// Every reply written to `client` since the last call.
    pub fn replies(&self, client: &mut Client) -> Vec<DecodedReply> {
        let wire = std::mem::take(&mut client.pipe.borrow_mut().outbound);
        let mut out = Vec::new();
        let mut rest = wire.as_slice();
        while !rest.is_empty() {
            let (used, frame) = client.decoder.feed(rest);
            if let Some(payload) = frame {
                out.push(self.codec.decode_reply(payload).unwrap());
            }
            rest = &rest[used..];
        }
        out
    }

    /// The single reply to the last request.
    pub fn reply(&self, client: &mut Client) -> DecodedReply {
        let mut replies = self.replies(client);
        assert_eq!(replies.len(), 1, "expected exactly one reply");
        replies.remove(0)
    }
}

pub fn framed(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

pub fn get(endpoint: EndpointId, kind: CompoundKind, index: u8) -> CompoundFrame {
    CompoundFrame::read(endpoint, Service::GetCompound, kind, index)
}

pub fn set(endpoint: EndpointId, index: u8, compound: Compound) -> CompoundFrame {
    CompoundFrame::write(endpoint, Service::SetCompound, index, compound)
}
