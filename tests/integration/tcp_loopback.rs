//! Ethernet path over loopback sockets: listener, arbiter and the async
//! I/O loop.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eswcom::com::arbiter::TransportArbiter;
use eswcom::com::codec::CompoundCodec;
use eswcom::com::compound::{Compound, CompoundFrame, CompoundKind, DecodedReply, Drive, ErrorCode, Service};
use eswcom::com::endpoint::EndpointId;
use eswcom::com::io_task;
use eswcom::com::service::ComService;
use eswcom::com::transport::EthernetListener;
use eswcom::config::{CompoundLimits, TimingConfig};

use crate::mock_link::{RecordingSink, device, framed};

fn listener() -> EthernetListener {
    EthernetListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap()
}

fn read_reply(stream: &mut TcpStream) -> DecodedReply {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
    stream.read_exact(&mut payload).unwrap();
    CompoundCodec::new(CompoundLimits::default())
        .decode_reply(&payload)
        .unwrap()
}

fn request_bytes(frame: &CompoundFrame) -> Vec<u8> {
    framed(&CompoundCodec::new(CompoundLimits::default()).encode(frame))
}

#[test]
fn polled_service_answers_over_tcp() {
    let device = device();
    let mut service = ComService::new(
        TransportArbiter::with_listener(listener()),
        device.engine(),
        RecordingSink::default(),
    );
    let addr = service.arbiter().local_addr().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let info = loop {
        if let Some(info) = service.poll_accept() {
            break info;
        }
        assert!(Instant::now() < deadline, "connection never accepted");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(service.arbiter().connected(), 1);

    let drive = Drive::from_percent(30.0, 15_000);
    client
        .write_all(&request_bytes(&CompoundFrame::write(
            EndpointId::FLYBACK,
            Service::SetCompound,
            0,
            Compound::Drive(drive),
        )))
        .unwrap();

    while service.service_inbound(4) == 0 {
        assert!(Instant::now() < deadline, "request never arrived");
        std::thread::sleep(Duration::from_millis(5));
    }

    let reply = read_reply(&mut client);
    assert_eq!(reply.status, ErrorCode::NoError as u8);
    assert_eq!(reply.value, Some(Compound::Drive(drive)));
    assert_eq!(device.flyback().drive(), drive);

    // peer close tears the slot down on the next poll
    drop(client);
    while service.arbiter().client(info.id).is_some() {
        assert!(Instant::now() < deadline, "close never noticed");
        service.service_inbound(4);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn io_loop_serves_a_client_until_stopped() {
    let device = device();
    let arbiter = TransportArbiter::with_listener(listener());
    let addr = arbiter.local_addr().unwrap();
    let service = ComService::new(arbiter, device.engine(), RecordingSink::default())
        .with_report(Arc::clone(device.report()));
    let shared = Rc::new(RefCell::new(service));

    let done = Arc::new(AtomicBool::new(false));
    let client_done = Arc::clone(&done);
    let client = std::thread::spawn(move || {
        let result = std::panic::catch_unwind(|| {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream
                .write_all(&request_bytes(&CompoundFrame::read(
                    EndpointId::VACUUM,
                    Service::GetCompound,
                    CompoundKind::Status,
                    0,
                )))
                .unwrap();
            read_reply(&mut stream)
        });
        client_done.store(true, Ordering::Release);
        result
    });

    let timing = TimingConfig {
        accept_interval_ms: 10,
        poll_interval_ms: 1,
        update_interval_ms: 20,
        control_interval_ms: 50,
    };
    let stop_flag = Arc::clone(&done);
    io_task::run_until(Rc::clone(&shared), &timing, async move {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !stop_flag.load(Ordering::Acquire) && Instant::now() < deadline {
            async_io_mini::Timer::after(Duration::from_millis(5)).await;
        }
    });

    let reply = client.join().unwrap().unwrap();
    assert_eq!(reply.status, ErrorCode::NoError as u8);
    assert_eq!(reply.kind, CompoundKind::Status.tag());
    assert!(shared.borrow().engine().stats().replies >= 1);
}
