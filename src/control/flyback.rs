//! Flyback high-voltage module.
//!
//! The main switch selects the mode:
//!
//! | Switch  | PWM timer                  | Drive setpoint           |
//! |---------|----------------------------|--------------------------|
//! | Off     | forced off                 | kept                     |
//! | Manual  | forced on                  | kept                     |
//! | Remote  | host-controlled (Status 0) | host-controlled (Drive 0)|
//! | Invalid | forced off                 | kept                     |
//!
//! Output voltage, current and power are derived from the divider
//! reading; on host the reading is simulated from the duty cycle.

use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::com::compound::{Compound, CompoundKind, Drive, ErrorCode, Scalar, Status, SwitchState};
use crate::com::endpoint::EndpointId;
use crate::com::store::StoreBuilder;
use crate::config::FlybackConfig;
use crate::error::{RegistrationError, ValidationError};

use super::Changes;

/// High-side divider resistor (ohms).
const R1: f32 = 100_000_000.0;
/// Low-side divider resistor (ohms).
const R2: f32 = 10_000.0;
/// Divider reading at 100% duty (volts).
const FULL_SCALE_V: f32 = 2.5;

pub const SCALAR_VOLTAGE: u8 = 0;
pub const SCALAR_CURRENT: u8 = 1;
pub const SCALAR_POWER: u8 = 2;

/// Output measurement: kV, µA, W.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub voltage_kv: f32,
    pub current_ua: f32,
    pub power_w: f32,
}

impl Measurement {
    fn from_divider(reduced_v: f32) -> Self {
        let current_ua = reduced_v / R2 * 1_000_000.0;
        let voltage = current_ua / 1_000_000.0 * R1;
        Self {
            voltage_kv: voltage / 1000.0,
            current_ua,
            power_w: voltage * current_ua / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FlybackState {
    switch: SwitchState,
    timer_enabled: bool,
    duty_percent: f32,
    frequency_hz: u32,
    measurement: Measurement,
}

pub struct Flyback {
    config: FlybackConfig,
    state: Mutex<FlybackState>,
}

impl Flyback {
    pub fn new(config: FlybackConfig) -> Self {
        let frequency_hz = config.min_frequency_hz;
        Self {
            config,
            state: Mutex::new(FlybackState {
                switch: SwitchState::Off,
                timer_enabled: false,
                duty_percent: 0.0,
                frequency_hz,
                measurement: Measurement::default(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FlybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Main switch position, as read from the front panel.
    pub fn set_switch(&self, switch: SwitchState) {
        let mut s = self.state();
        if s.switch != switch {
            info!("FLYBACK: switch {:?} -> {:?}", s.switch, switch);
            s.switch = switch;
        }
    }

    pub fn switch(&self) -> SwitchState {
        self.state().switch
    }

    pub fn timer_enabled(&self) -> bool {
        self.state().timer_enabled
    }

    pub fn measurement(&self) -> Measurement {
        self.state().measurement
    }

    pub fn drive(&self) -> Drive {
        let s = self.state();
        Drive::from_percent(s.duty_percent, s.frequency_hz)
    }

    /// Apply an extern duty cycle and frequency.
    pub fn set_drive(&self, drive: Drive) -> Result<(), ValidationError> {
        let duty = drive.duty_percent();
        if duty > self.config.max_duty_percent {
            return Err(ValidationError::new(ErrorCode::ValueTooHigh, "duty cycle above limit"));
        }
        if drive.frequency_hz < self.config.min_frequency_hz {
            return Err(ValidationError::new(ErrorCode::ValueTooLow, "frequency below range"));
        }
        if drive.frequency_hz > self.config.max_frequency_hz {
            return Err(ValidationError::new(ErrorCode::ValueTooHigh, "frequency above range"));
        }
        let mut s = self.state();
        s.duty_percent = duty;
        s.frequency_hz = drive.frequency_hz;
        info!("FLYBACK: drive {:.1}% @ {} Hz", duty, drive.frequency_hz);
        Ok(())
    }

    pub fn status(&self) -> Status {
        let s = self.state();
        Status {
            switch_state: s.switch as u8,
            output: u8::from(s.timer_enabled),
            code: 0,
            value_milli: (s.measurement.voltage_kv * 1000.0).round() as i32,
            timestamp: 0,
        }
    }

    /// Enable or disable the PWM timer. Remote mode only.
    pub fn set_timer(&self, enabled: bool) -> Result<(), ValidationError> {
        let mut s = self.state();
        if s.switch != SwitchState::Remote {
            return Err(ValidationError::new(
                ErrorCode::NotAllowedInThisState,
                "timer is host-controlled only in remote mode",
            ));
        }
        s.timer_enabled = enabled;
        info!("FLYBACK: timer {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    /// One control cycle: enforce the switch mode, then measure. Returns
    /// the parameters whose value changed.
    pub fn run(&self) -> Changes {
        let mut changes = Changes::new();
        let mut s = self.state();
        let before = (s.timer_enabled, s.measurement);

        match s.switch {
            SwitchState::Off => s.timer_enabled = false,
            SwitchState::Manual => s.timer_enabled = true,
            SwitchState::Remote => {}
            SwitchState::Invalid => {
                if s.timer_enabled {
                    warn!("FLYBACK: invalid switch position, timer off");
                }
                s.timer_enabled = false;
            }
        }

        let reduced = if s.timer_enabled {
            FULL_SCALE_V * s.duty_percent / 100.0
        } else {
            0.0
        };
        s.measurement = Measurement::from_divider(reduced);

        if before.1 != s.measurement {
            let _ = changes.extend_from_slice(&[
                (CompoundKind::Scalar, SCALAR_VOLTAGE),
                (CompoundKind::Scalar, SCALAR_CURRENT),
                (CompoundKind::Scalar, SCALAR_POWER),
            ]);
        }
        if before != (s.timer_enabled, s.measurement) {
            let _ = changes.push((CompoundKind::Status, 0));
        }
        changes
    }

    /// Publish the flyback endpoint.
    pub fn register(self: &Arc<Self>, builder: &mut StoreBuilder) -> Result<(), RegistrationError> {
        let ep = EndpointId::FLYBACK;

        let (get, set) = (Arc::clone(self), Arc::clone(self));
        builder.register(
            ep,
            CompoundKind::Drive,
            0,
            move || Compound::Drive(get.drive()),
            Some(move |value: Compound| match value {
                Compound::Drive(d) => set.set_drive(d),
                _ => Err(ValidationError::new(ErrorCode::WrongParameterId, "expected drive")),
            }),
        )?;

        let f = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, SCALAR_VOLTAGE, move || {
            Compound::Scalar(Scalar::from_value(f.measurement().voltage_kv))
        })?;
        let f = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, SCALAR_CURRENT, move || {
            Compound::Scalar(Scalar::from_value(f.measurement().current_ua))
        })?;
        let f = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, SCALAR_POWER, move || {
            Compound::Scalar(Scalar::from_value(f.measurement().power_w))
        })?;

        let (get, set) = (Arc::clone(self), Arc::clone(self));
        builder.register(
            ep,
            CompoundKind::Status,
            0,
            move || Compound::Status(get.status()),
            Some(move |value: Compound| match value {
                Compound::Status(s) => set.set_timer(s.output != 0),
                _ => Err(ValidationError::new(ErrorCode::WrongParameterId, "expected status")),
            }),
        )?;
        Ok(())
    }
}
