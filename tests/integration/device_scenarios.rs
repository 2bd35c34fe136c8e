//! Request/response scenarios against the assembled device.

use eswcom::app::events::ComEvent;
use eswcom::com::compound::{
    Compound, CompoundFrame, CompoundKind, Drive, ErrorCode, Scalar, Service, Status, SwitchState,
};
use eswcom::com::endpoint::EndpointId;
use eswcom::control::vacuum::SCALAR_TARGET;
use eswcom::error::DecodeError;

use crate::mock_link::{Rig, get, set};

const OK: u8 = ErrorCode::NoError as u8;

#[test]
fn drive_setpoint_is_applied() {
    let mut rig = Rig::new();
    let mut c = rig.connect();
    let drive = Drive::from_percent(40.0, 20_000);

    rig.request(&c, &set(EndpointId::FLYBACK, 0, Compound::Drive(drive)));

    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, OK);
    assert_eq!(reply.endpoint, EndpointId::FLYBACK);
    assert_eq!(reply.kind, CompoundKind::Drive.tag());
    assert_eq!(reply.value, Some(Compound::Drive(drive)));
    assert_eq!(rig.device.flyback().drive(), drive);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        ComEvent::ParameterChanged {
            kind: CompoundKind::Drive,
            index: 0,
            ..
        }
    )));
}

#[test]
fn unknown_kind_is_dropped_without_reply() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.send_raw(&c, &[0x01, 0x28, 0x04, 0x00, 1, 2, 3, 4]);

    assert!(rig.replies(&mut c).is_empty());
    assert!(rig.service.arbiter().client(c.id).is_some());
    assert_eq!(rig.device.flyback().drive(), Drive::from_percent(0.0, 1_000));
    assert!(rig.events().contains(&ComEvent::ProtocolError {
        client: c.id,
        error: DecodeError::UnknownCompoundKind(4),
    }));

    // the connection still serves requests
    rig.request(&c, &get(EndpointId::FLYBACK, CompoundKind::Drive, 0));
    assert_eq!(rig.reply(&mut c).status, OK);
}

#[test]
fn unknown_endpoint_is_nacked() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(&c, &get(EndpointId(0x7F), CompoundKind::Scalar, 0));

    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, ErrorCode::EndpointNotFound as u8);
    assert_eq!(reply.endpoint, EndpointId(0x7F));
    assert!(!reply.reason.is_empty());
    assert!(rig.service.arbiter().client(c.id).is_some());
}

#[test]
fn out_of_range_duty_is_rejected_with_reason() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(
        &c,
        &set(EndpointId::FLYBACK, 0, Compound::Drive(Drive::from_percent(100.5, 20_000))),
    );

    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, ErrorCode::ValueTooHigh as u8);
    assert_eq!(reply.reason.as_str(), "duty cycle above limit");
    assert_eq!(rig.device.flyback().drive(), Drive::from_percent(0.0, 1_000));
}

#[test]
fn timer_needs_remote_mode() {
    let mut rig = Rig::new();
    let mut c = rig.connect();
    rig.device.set_switches(SwitchState::Manual);

    let on = Compound::Status(Status {
        output: 1,
        ..Status::default()
    });
    rig.request(&c, &set(EndpointId::FLYBACK, 0, on));
    assert_eq!(rig.reply(&mut c).status, ErrorCode::NotAllowedInThisState as u8);

    rig.device.set_switches(SwitchState::Remote);
    rig.request(&c, &set(EndpointId::FLYBACK, 0, on));
    assert_eq!(rig.reply(&mut c).status, OK);
    assert!(rig.device.flyback().timer_enabled());
}

#[test]
fn set_reply_reports_the_stored_status() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    // only `output` is host-settable; the rest is owned by the module
    let request = Status {
        switch_state: 0,
        output: 1,
        code: 0x1234,
        value_milli: 777,
        timestamp: 99,
    };
    rig.request(&c, &set(EndpointId::FLYBACK, 0, Compound::Status(request)));
    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, OK);
    assert_ne!(reply.value, Some(Compound::Status(request)));

    rig.request(&c, &get(EndpointId::FLYBACK, CompoundKind::Status, 0));
    let stored = rig.reply(&mut c);
    assert_eq!(reply.value, stored.value);
    assert_eq!(reply.value, Some(Compound::Status(rig.device.flyback().status())));
    let Some(Compound::Status(s)) = stored.value else {
        panic!("expected a status value");
    };
    assert_eq!(s.switch_state, SwitchState::Remote as u8);
    assert_eq!(s.output, 1);
}

#[test]
fn single_parameter_services_are_scalar_only() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(
        &c,
        &CompoundFrame::read(EndpointId::FLYBACK, Service::Get, CompoundKind::Drive, 0),
    );
    assert_eq!(rig.reply(&mut c).status, ErrorCode::WrongService as u8);

    rig.request(
        &c,
        &CompoundFrame::write(
            EndpointId::VACUUM,
            Service::Set,
            SCALAR_TARGET,
            Compound::Scalar(Scalar::from_value(0.5)),
        ),
    );
    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, OK);
    assert_eq!(rig.device.vacuum().target_pressure(), 0.5);
}

#[test]
fn unknown_service_is_nacked() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.send_raw(&c, &[0x02, 0x42, 0x01, 0x00, 0, 0, 0, 0]);

    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, ErrorCode::UnknownService as u8);
    assert_eq!(reply.service, 0x42);
}

#[test]
fn read_only_parameters_refuse_writes() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(
        &c,
        &set(EndpointId::VACUUM, 0, Compound::Scalar(Scalar::from_value(10.0))),
    );
    assert_eq!(rig.reply(&mut c).status, ErrorCode::ParameterNotSettable as u8);

    rig.request(
        &c,
        &set(EndpointId::DIAGNOSTICS, 0, Compound::Scalar(Scalar::from_value(1.0))),
    );
    assert_eq!(rig.reply(&mut c).status, ErrorCode::ParameterNotSettable as u8);
}

#[test]
fn unregistered_index_is_nacked() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    // in codec bounds, but the flyback publishes Drive 0 only
    rig.request(&c, &get(EndpointId::FLYBACK, CompoundKind::Drive, 1));
    assert_eq!(rig.reply(&mut c).status, ErrorCode::WrongParameterIndex as u8);
}

#[test]
fn set_get_returns_the_stored_value() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(
        &c,
        &CompoundFrame::write(
            EndpointId::VACUUM,
            Service::SetGet,
            SCALAR_TARGET,
            Compound::Scalar(Scalar::from_value(0.25)),
        ),
    );
    let reply = rig.reply(&mut c);
    assert_eq!(reply.status, OK);
    assert_eq!(reply.value, Some(Compound::Scalar(Scalar { value_milli: 250 })));
}

#[test]
fn wall_clock_is_set_from_the_host() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(&c, &get(EndpointId::TIME, CompoundKind::Status, 0));
    let Some(Compound::Status(before)) = rig.reply(&mut c).value else {
        panic!("expected a status value");
    };
    assert_eq!(before.output, 0);

    let stamp = 1_700_000_000;
    rig.request(
        &c,
        &set(
            EndpointId::TIME,
            0,
            Compound::Status(Status {
                timestamp: stamp,
                ..Status::default()
            }),
        ),
    );
    assert_eq!(rig.reply(&mut c).status, OK);

    rig.request(&c, &get(EndpointId::TIME, CompoundKind::Status, 0));
    let Some(Compound::Status(after)) = rig.reply(&mut c).value else {
        panic!("expected a status value");
    };
    assert_eq!(after.output, 1);
    assert!(after.timestamp >= stamp && after.timestamp < stamp + 5);
}

#[test]
fn diagnostics_publish_health() {
    let mut rig = Rig::new();
    let mut c = rig.connect();

    rig.request(&c, &get(EndpointId::DIAGNOSTICS, CompoundKind::Status, 1));
    let Some(Compound::Status(stack)) = rig.reply(&mut c).value else {
        panic!("expected a status value");
    };
    assert_eq!(stack.code, 0xDEAD);
    assert_eq!(stack.output, 1);

    rig.request(&c, &get(EndpointId::DIAGNOSTICS, CompoundKind::Scalar, 1));
    let Some(Compound::Scalar(heap)) = rig.reply(&mut c).value else {
        panic!("expected a scalar value");
    };
    assert!(heap.value() > 0.0);
}
