//! ComService: SendDataFlags, unsolicited updates, client teardown and
//! JSON queries.

use eswcom::adapters::log_sink::LogEventSink;
use eswcom::app::events::ComEvent;
use eswcom::app::ports::Clock;
use eswcom::com::compound::{Compound, CompoundKind, Drive, ErrorCode, Scalar, Service, Status};
use eswcom::com::endpoint::EndpointId;
use eswcom::com::engine::Phase;
use eswcom::control::vacuum::SCALAR_TARGET;
use eswcom::error::{QueryError, RoutingError, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::mock_link::{CountingStorage, Rig, device_with_storage, framed, get, set};

#[test]
fn successful_set_flags_every_subscriber() {
    let mut rig = Rig::new();
    let mut writer = rig.connect();
    let mut watcher = rig.connect();
    let mut other = rig.connect();

    // resolving a request subscribes the client to that endpoint
    rig.request(&watcher, &get(EndpointId::FLYBACK, CompoundKind::Drive, 0));
    rig.request(&other, &get(EndpointId::VACUUM, CompoundKind::Scalar, 0));
    rig.replies(&mut watcher);
    rig.replies(&mut other);
    let store = Arc::clone(rig.device.store());
    assert!(!store.send_data_flag(watcher.id));

    let drive = Drive::from_percent(25.0, 10_000);
    rig.request(&writer, &set(EndpointId::FLYBACK, 0, Compound::Drive(drive)));
    rig.replies(&mut writer);

    assert!(store.send_data_flag(watcher.id));
    assert!(!store.send_data_flag(other.id));
    // the writer's own reply already carried the value
    assert!(!store.send_data_flag(writer.id));

    assert_eq!(rig.service.flush_updates(), 1);
    let update = rig.reply(&mut watcher);
    assert_eq!(update.service, Service::Get as u8);
    assert_eq!(update.status, ErrorCode::NoError as u8);
    assert_eq!(update.value, Some(Compound::Drive(drive)));
    assert!(!store.send_data_flag(watcher.id));
    assert!(rig.replies(&mut other).is_empty());
}

#[test]
fn domain_changes_reach_subscribers() {
    let mut rig = Rig::new();
    let mut c = rig.connect();
    rig.request(&c, &get(EndpointId::VACUUM, CompoundKind::Scalar, 0));
    rig.replies(&mut c);

    let pump_on = Compound::Status(Status {
        output: 1,
        code: 0,
        ..Status::default()
    });
    rig.request(&c, &set(EndpointId::VACUUM, 0, pump_on));
    assert_eq!(rig.reply(&mut c).status, ErrorCode::NoError as u8);

    assert!(rig.device.control_tick() > 0);
    assert!(rig.service.flush_updates() > 0);
    let updates = rig.replies(&mut c);
    assert!(updates.iter().any(|u| u.kind == CompoundKind::Scalar.tag() && u.index == 0));
    assert!(rig.device.vacuum().actual_pressure() < 1013.0);
}

#[test]
fn write_failure_drops_only_that_client() {
    let mut rig = Rig::new();
    let mut stalled = rig.connect();
    let mut watcher = rig.connect();
    let store = Arc::clone(rig.device.store());

    rig.request(&watcher, &get(EndpointId::VACUUM, CompoundKind::Scalar, 0));
    rig.replies(&mut watcher);
    rig.request(
        &watcher,
        &set(EndpointId::VACUUM, SCALAR_TARGET, Compound::Scalar(Scalar::from_value(0.5))),
    );
    rig.replies(&mut watcher);
    rig.request(&stalled, &get(EndpointId::VACUUM, CompoundKind::Scalar, 0));
    rig.replies(&mut stalled);
    // a domain-side change flags both subscribers
    let vacuum = store.registry().resolve_name("vacuum").unwrap();
    rig.device.vacuum().set_target_pressure(0.75).unwrap();
    store.notify_changed(&vacuum, CompoundKind::Scalar, SCALAR_TARGET).unwrap();
    assert!(store.send_data_flag(watcher.id));

    stalled.pipe.borrow_mut().stalled = true;
    rig.request(&stalled, &get(EndpointId::VACUUM, CompoundKind::Scalar, SCALAR_TARGET));

    let mut passes = 0;
    while rig.service.arbiter().client(stalled.id).is_some() {
        passes += 1;
        assert!(passes <= 100, "stalled client never dropped");
        rig.service.service_inbound(8);
    }
    assert!(passes > 1);
    assert_eq!(rig.service.engine().phase(stalled.id), None);
    assert!(!store.send_data_flag(stalled.id));
    assert!(rig.events().contains(&ComEvent::ClientDropped {
        client: stalled.id,
        error: TransportError::WriteStalled,
    }));

    // the other client and the store are untouched
    assert!(store.send_data_flag(watcher.id));
    assert_eq!(rig.device.vacuum().target_pressure(), 0.75);
    assert_eq!(rig.service.engine().phase(watcher.id), Some(Phase::AwaitingFrame));
}

#[test]
fn stalled_client_does_not_hold_up_others() {
    let mut rig = Rig::new();
    let stalled = rig.connect();
    let mut healthy = rig.connect();
    stalled.pipe.borrow_mut().stalled = true;

    let request = framed(&rig.codec.encode(&get(EndpointId::FLYBACK, CompoundKind::Drive, 0)));
    stalled.pipe.borrow_mut().inbound.push_back(request.clone());
    healthy.pipe.borrow_mut().inbound.push_back(request);

    let started = Instant::now();
    assert_eq!(rig.service.service_inbound(8), 2);
    assert!(started.elapsed() < Duration::from_millis(50));

    assert_eq!(rig.reply(&mut healthy).status, ErrorCode::NoError as u8);
    assert!(rig.service.arbiter().client(stalled.id).is_some());
    assert!(rig.service.arbiter().pending_bytes(stalled.id) > 0);

    // the backlog goes out once the peer reads again
    stalled.pipe.borrow_mut().stalled = false;
    rig.service.service_inbound(8);
    assert_eq!(rig.service.arbiter().pending_bytes(stalled.id), 0);
    assert!(!stalled.pipe.borrow().outbound.is_empty());
}

#[test]
fn read_failure_tears_down_the_client() {
    let mut rig = Rig::new();
    let c = rig.connect();
    c.pipe.borrow_mut().read_error = Some(TransportError::Io);

    assert_eq!(rig.service.service_inbound(4), 0);
    assert!(rig.service.arbiter().client(c.id).is_none());
    assert!(rig.events().contains(&ComEvent::ClientDropped {
        client: c.id,
        error: TransportError::Io,
    }));
}

#[test]
fn local_disconnect_forgets_the_client() {
    let mut rig = Rig::new();
    let mut c = rig.connect();
    rig.request(&c, &get(EndpointId::FLYBACK, CompoundKind::Drive, 0));
    rig.replies(&mut c);

    assert!(rig.service.disconnect(c.id));
    assert!(!rig.service.disconnect(c.id));
    let flyback = rig.device.store().registry().resolve_name("flyback").unwrap();
    assert!(!rig.device.store().is_subscribed(c.id, &flyback));
    assert_eq!(rig.service.engine().phase(c.id), None);
}

#[test]
fn decode_errors_become_the_last_error() {
    let mut rig = Rig::with_sink(|device| LogEventSink::with_report(Arc::clone(device.report())));
    let report = Arc::clone(rig.device.report());
    let mut c = rig.connect();

    // Drive header without its payload
    rig.send_raw(&c, &[0x01, 0x29, 0x02, 0x00]);

    assert!(rig.replies(&mut c).is_empty());
    assert_eq!(report.last_error().unwrap().code, ErrorCode::WrongCommandLength as u16);

    report.clear_last_error();
    // an orderly disconnect is not an error
    assert!(rig.service.disconnect(c.id));
    assert!(report.last_error().is_none());
}

#[test]
fn malformed_frame_flood_writes_flash_once() {
    let storage = CountingStorage::new();
    let writes = Arc::clone(&storage.writes);
    let mut rig = Rig::from_device(device_with_storage(Box::new(storage)), |device| {
        LogEventSink::with_report(Arc::clone(device.report()))
    });
    let c = rig.connect();

    for _ in 0..200 {
        rig.send_raw(&c, &[0x01, 0x29, 0x09, 0x00]);
    }

    assert_eq!(rig.service.engine().stats().dropped, 200);
    assert!(rig.service.arbiter().client(c.id).is_some());
    assert_eq!(rig.device.report().last_error().unwrap().code, ErrorCode::WrongParameterId as u16);
    assert_eq!(writes.load(Ordering::SeqCst), 1);
}

#[test]
fn time_query_sets_and_reads_the_wall_clock() {
    let rig = Rig::new();

    let unset: Value = serde_json::from_str(&rig.service.query_json(r#"{"time":true}"#).unwrap()).unwrap();
    assert!(unset["time"].is_null());

    let stamped: Value =
        serde_json::from_str(&rig.service.query_json(r#"{"time":"2024/05/01 12:00:00"}"#).unwrap()).unwrap();
    assert!(stamped["time"].as_str().unwrap().starts_with("2024/05/01 12:00:0"));
    assert!(rig.device.clock().epoch_secs().is_some());

    assert!(matches!(
        rig.service.query_json(r#"{"time":"yesterday"}"#),
        Err(QueryError::Time(_))
    ));
}

#[test]
fn query_renders_endpoints() {
    let rig = Rig::new();

    let one: Value = serde_json::from_str(&rig.service.query_json(r#"{"endpoint":"vacuum"}"#).unwrap()).unwrap();
    assert_eq!(one["name"], "vacuum");
    assert_eq!(one["id"], 2);

    let by_id: Value = serde_json::from_str(&rig.service.query_json(r#"{"endpoint":1}"#).unwrap()).unwrap();
    assert_eq!(by_id["name"], "flyback");

    let all: Value = serde_json::from_str(&rig.service.query_json(r#"{"endpoint":"all"}"#).unwrap()).unwrap();
    let names: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["flyback", "vacuum", "time", "diagnostics"]);
}

#[test]
fn query_renders_report_and_stats() {
    let rig = Rig::new();

    let report: Value = serde_json::from_str(&rig.service.query_json(r#"{"report":true}"#).unwrap()).unwrap();
    assert!(report.get("uptime_secs").is_some());
    assert!(report.get("stack_dump").is_none());

    let with_stack: Value =
        serde_json::from_str(&rig.service.query_json(r#"{"report":true,"stack":true}"#).unwrap()).unwrap();
    assert!(with_stack["stack_dump"].is_string());

    let stats: Value = serde_json::from_str(&rig.service.query_json(r#"{"stats":true}"#).unwrap()).unwrap();
    assert_eq!(stats["frames"], 0);
}

#[test]
fn bad_queries_are_typed_errors() {
    let rig = Rig::new();
    assert_eq!(
        rig.service.query_json("not json"),
        Err(QueryError::Routing(RoutingError::MalformedSelector))
    );
    assert!(matches!(
        rig.service.query_json(r#"{"endpoint":"pump"}"#),
        Err(QueryError::Routing(_))
    ));
}
