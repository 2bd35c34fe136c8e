//! Protocol engine — per-client request/response state machine.
//!
//! **Transport-decoupled**: the engine owns no link. Each call is handed a
//! [`FrameLink`] capability (the arbiter in production, a recorder in
//! tests) and writes every reply through it, so there is exactly one
//! writer per client.
//!
//! ```text
//!            on_connect
//!   (none) ────────────▶ AwaitingFrame ──frame──▶ Decoding
//!                             ▲                     │ ok        │ decode error
//!                             │ still connected     ▼           ▼
//!                           Idle ◀── written ── Responding    Idle (no reply)
//!                                                   ▲
//!                                   Dispatching ────┘
//!                           write failed ──▶ (none), flags forgotten
//! ```
//!
//! Every request that decodes gets exactly one reply: the value, or a NACK
//! carrying a status code and a reason. Frames that fail to decode get
//! nothing.

use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use super::client::{ClientId, MAX_CLIENTS};
use super::codec::CompoundCodec;
use super::compound::{Compound, CompoundFrame, ErrorCode, Reply, ReplyBody, Service};
use super::endpoint::{EndpointHandle, EndpointSelector};
use super::store::{ParamRef, ParameterStore, Stamp};
use crate::app::events::ComEvent;
use crate::app::ports::EventSink;
use crate::error::{DecodeError, StoreError, TransportError};

/// Write capability handed to the engine for one call.
pub trait FrameLink {
    /// Send one compound frame to `client`. The implementation adds any
    /// transport framing and tears the client down on failure.
    fn send(&mut self, client: ClientId, payload: &[u8]) -> Result<(), TransportError>;
}

/// Protocol phase of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    AwaitingFrame,
    Decoding,
    Dispatching,
    Responding,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Malformed; nothing was sent.
    Dropped(DecodeError),
    /// Answered with a value.
    Replied,
    /// Answered with a NACK.
    Nacked(ErrorCode),
    /// The reply could not be written; the client is gone.
    Disconnected(TransportError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames: u32,
    pub replies: u32,
    pub nacks: u32,
    pub dropped: u32,
    pub updates: u32,
    pub disconnects: u32,
}

/// Result of dispatching one decoded request.
struct Dispatch {
    reply: Reply,
    /// Parameter the reply carries, with the stamp its value reflects.
    carries: Option<(ParamRef, Stamp)>,
    written: bool,
}

pub struct ProtocolEngine {
    store: Arc<ParameterStore>,
    codec: CompoundCodec,
    phases: [Option<Phase>; MAX_CLIENTS],
    stats: EngineStats,
}

impl ProtocolEngine {
    pub fn new(store: Arc<ParameterStore>, codec: CompoundCodec) -> Self {
        Self {
            store,
            codec,
            phases: [None; MAX_CLIENTS],
            stats: EngineStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn codec(&self) -> &CompoundCodec {
        &self.codec
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Current phase of a client, `None` if it is not connected.
    pub fn phase(&self, client: ClientId) -> Option<Phase> {
        self.phases.get(client as usize).copied().flatten()
    }

    pub fn on_connect(&mut self, client: ClientId) {
        if let Some(p) = self.phases.get_mut(client as usize) {
            *p = Some(Phase::AwaitingFrame);
        }
    }

    /// Forget a client: its phase, subscriptions and pending updates.
    pub fn on_disconnect(&mut self, client: ClientId) {
        if let Some(p) = self.phases.get_mut(client as usize) {
            *p = None;
        }
        self.store.forget_client(client);
    }

    /// Process one complete inbound frame from `client`.
    pub fn handle_frame(
        &mut self,
        link: &mut impl FrameLink,
        sink: &mut impl EventSink,
        client: ClientId,
        bytes: &[u8],
    ) -> Outcome {
        if client as usize >= MAX_CLIENTS {
            warn!("COM[{}]: frame from invalid client slot", client);
            return Outcome::Disconnected(TransportError::NotConnected);
        }
        self.stats.frames = self.stats.frames.saturating_add(1);
        self.set_phase(client, Phase::Decoding);

        let frame = match self.codec.get_compound(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                warn!("COM[{}]: dropping malformed frame: {}", client, error);
                self.stats.dropped = self.stats.dropped.saturating_add(1);
                sink.emit(&ComEvent::ProtocolError { client, error });
                self.rearm(client);
                return Outcome::Dropped(error);
            }
        };

        self.set_phase(client, Phase::Dispatching);
        let dispatch = self.dispatch(client, &frame);

        self.set_phase(client, Phase::Responding);
        let encoded = self.codec.encode_reply(&dispatch.reply);
        if let Err(error) = link.send(client, &encoded) {
            warn!("COM[{}]: reply write failed: {}", client, error);
            self.stats.disconnects = self.stats.disconnects.saturating_add(1);
            self.on_disconnect(client);
            sink.emit(&ComEvent::ClientDropped { client, error });
            return Outcome::Disconnected(error);
        }

        if let Some((param, seen)) = dispatch.carries {
            self.store.acknowledge(client, param, seen);
            if dispatch.written {
                sink.emit(&ComEvent::ParameterChanged {
                    client,
                    endpoint: param.endpoint,
                    kind: param.kind,
                    index: param.index,
                });
            }
        }
        self.rearm(client);

        match dispatch.reply.body {
            ReplyBody::Value(_) => {
                self.stats.replies = self.stats.replies.saturating_add(1);
                Outcome::Replied
            }
            ReplyBody::Nack { code, .. } => {
                self.stats.nacks = self.stats.nacks.saturating_add(1);
                sink.emit(&ComEvent::RequestRejected {
                    client,
                    endpoint: frame.endpoint,
                    code,
                });
                Outcome::Nacked(code)
            }
        }
    }

    /// Send one unsolicited update (service `GET`, status OK) for every
    /// pending parameter of every flagged client. Returns the number of
    /// updates written.
    pub fn flush_updates(&mut self, link: &mut impl FrameLink, sink: &mut impl EventSink) -> usize {
        let mut sent = 0;
        for client in 0..MAX_CLIENTS as ClientId {
            if self.phase(client).is_none() || !self.store.send_data_flag(client) {
                continue;
            }
            for param in self.store.pending_updates(client) {
                let Some((value, seen)) = self.read_pending(param) else {
                    // Gone from the store; nothing left to deliver.
                    self.store.acknowledge(client, param, Stamp::LATEST);
                    continue;
                };
                let request = CompoundFrame::read(param.endpoint, Service::Get, param.kind, param.index);
                let encoded = self.codec.encode_reply(&Reply::value(&request, value));
                if let Err(error) = link.send(client, &encoded) {
                    warn!("COM[{}]: update write failed: {}", client, error);
                    self.stats.disconnects = self.stats.disconnects.saturating_add(1);
                    self.on_disconnect(client);
                    sink.emit(&ComEvent::ClientDropped { client, error });
                    break;
                }
                self.store.acknowledge(client, param, seen);
                self.stats.updates = self.stats.updates.saturating_add(1);
                sent += 1;
            }
        }
        if sent > 0 {
            debug!("COM: flushed {} parameter updates", sent);
        }
        sent
    }

    // ── Internals ───────────────────────────────────────────

    fn set_phase(&mut self, client: ClientId, phase: Phase) {
        if let Some(p) = self.phases.get_mut(client as usize) {
            *p = Some(phase);
        }
    }

    /// End of one exchange: back through `Idle`, then ready for the next
    /// frame while the arbiter still holds the client.
    fn rearm(&mut self, client: ClientId) {
        self.set_phase(client, Phase::Idle);
        self.set_phase(client, Phase::AwaitingFrame);
    }

    fn read_pending(&self, param: ParamRef) -> Option<(Compound, Stamp)> {
        let handle = self
            .store
            .registry()
            .resolve(EndpointSelector::Specific(param.endpoint))
            .ok()?;
        self.store.get_stamped(&handle, param.kind, param.index).ok()
    }

    fn dispatch(&self, client: ClientId, frame: &CompoundFrame) -> Dispatch {
        let nack = |code: ErrorCode, reason: &'static str| Dispatch {
            reply: Reply::nack(frame, code, reason),
            carries: None,
            written: false,
        };

        let handle = match self.store.registry().resolve(EndpointSelector::Requested(frame)) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("COM[{}]: {}", client, e);
                return nack(ErrorCode::EndpointNotFound, "endpoint not found");
            }
        };
        self.store.subscribe(client, &handle);

        let service = match Service::try_from(frame.service) {
            Ok(service) => service,
            Err(code) => return nack(code, "unknown service"),
        };
        if !service.accepts(frame.kind()) {
            return nack(ErrorCode::WrongService, "service addresses scalar parameters only");
        }

        match self.execute(&handle, service, frame) {
            Ok((value, seen)) => Dispatch {
                reply: Reply::value(frame, value),
                carries: Some((
                    ParamRef {
                        endpoint: handle.id,
                        kind: frame.kind(),
                        index: frame.index,
                    },
                    seen,
                )),
                written: service.is_write(),
            },
            Err(e) => {
                debug!("COM[{}]: {} on {}: {}", client, frame.kind().tag(), handle.id, e);
                nack(e.code(), e.reason())
            }
        }
    }

    fn execute(
        &self,
        handle: &EndpointHandle,
        service: Service,
        frame: &CompoundFrame,
    ) -> Result<(Compound, Stamp), StoreError> {
        match service {
            Service::Get | Service::GetCompound => self.store.get_stamped(handle, frame.kind(), frame.index),
            // Setters may clamp or ignore fields: reply with what was stored.
            Service::Set | Service::SetCompound | Service::SetGet => {
                self.store.set(handle, frame.index, frame.compound)?;
                self.store.get_stamped(handle, frame.kind(), frame.index)
            }
        }
    }
}
