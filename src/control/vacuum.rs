//! Vacuum control.
//!
//! Holds the chamber pressure, the target pressure, the pump relay and the
//! active scenario. In remote mode the host selects the scenario and the
//! pump; in manual mode the front panel does. Off and invalid switch
//! positions force the pump off.
//!
//! On host the chamber is simulated: with the pump on the pressure decays
//! toward the target, with the pump off it recovers toward atmosphere.

use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::com::compound::{Compound, CompoundKind, ErrorCode, Scalar, Status, SwitchState};
use crate::com::endpoint::EndpointId;
use crate::com::store::StoreBuilder;
use crate::config::VacuumConfig;
use crate::error::{RegistrationError, ValidationError};

use super::Changes;

pub const ATMOSPHERE_MBAR: f32 = 1013.0;

/// Target pressure of each pumping scenario (mbar).
const SCENARIO_TARGETS: [f32; 4] = [0.1, 0.05, 0.03, 0.01];
/// Last scenario: venting, pump off.
pub const SCENARIO_VENT: u8 = SCENARIO_TARGETS.len() as u8;
/// Status code published when no scenario is selected.
pub const SCENARIO_NONE: u16 = 0xFFFF;

const PUMP_DOWN_RATE: f32 = 0.2;
const VENT_RATE: f32 = 0.05;

pub const SCALAR_ACTUAL: u8 = 0;
pub const SCALAR_TARGET: u8 = 1;

#[derive(Debug, Clone, Copy)]
struct VacState {
    switch: SwitchState,
    pump_on: bool,
    scenario: Option<u8>,
    target_mbar: f32,
    actual_mbar: f32,
}

impl VacState {
    fn target_reached(&self) -> bool {
        self.pump_on && self.actual_mbar <= self.target_mbar
    }
}

pub struct VacControl {
    config: VacuumConfig,
    state: Mutex<VacState>,
}

impl VacControl {
    pub fn new(config: VacuumConfig) -> Self {
        let target_mbar = SCENARIO_TARGETS[0].clamp(config.min_target_mbar, config.max_target_mbar);
        Self {
            config,
            state: Mutex::new(VacState {
                switch: SwitchState::Off,
                pump_on: false,
                scenario: None,
                target_mbar,
                actual_mbar: ATMOSPHERE_MBAR,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, VacState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_switch(&self, switch: SwitchState) {
        let mut s = self.state();
        if s.switch != switch {
            info!("VAC: switch {:?} -> {:?}", s.switch, switch);
            s.switch = switch;
        }
    }

    pub fn actual_pressure(&self) -> f32 {
        self.state().actual_mbar
    }

    pub fn target_pressure(&self) -> f32 {
        self.state().target_mbar
    }

    pub fn pump_on(&self) -> bool {
        self.state().pump_on
    }

    pub fn scenario(&self) -> Option<u8> {
        self.state().scenario
    }

    pub fn set_target_pressure(&self, mbar: f32) -> Result<(), ValidationError> {
        if mbar < self.config.min_target_mbar {
            return Err(ValidationError::new(ErrorCode::ValueTooLow, "target pressure below range"));
        }
        if mbar > self.config.max_target_mbar {
            return Err(ValidationError::new(ErrorCode::ValueTooHigh, "target pressure above range"));
        }
        self.state().target_mbar = mbar;
        info!("VAC: target {} mbar", mbar);
        Ok(())
    }

    pub fn status(&self) -> Status {
        let s = self.state();
        Status {
            switch_state: s.switch as u8,
            output: u8::from(s.pump_on),
            code: s.scenario.map_or(SCENARIO_NONE, u16::from),
            value_milli: if s.target_reached() { 1000 } else { 0 },
            timestamp: 0,
        }
    }

    /// Apply a host status write: pump relay and scenario. Remote mode
    /// only. A scenario code of [`SCENARIO_NONE`] keeps the current one.
    pub fn set_remote(&self, pump_on: bool, scenario: u16) -> Result<(), ValidationError> {
        let mut s = self.state();
        if s.switch != SwitchState::Remote {
            return Err(ValidationError::new(
                ErrorCode::NotAllowedInThisState,
                "pump is host-controlled only in remote mode",
            ));
        }
        if scenario != SCENARIO_NONE {
            let scenario = u8::try_from(scenario)
                .ok()
                .filter(|n| *n <= SCENARIO_VENT)
                .ok_or(ValidationError::new(ErrorCode::WrongValueWithinRange, "unknown scenario"))?;
            s.scenario = Some(scenario);
            if let Some(target) = SCENARIO_TARGETS.get(scenario as usize) {
                s.target_mbar = target.clamp(self.config.min_target_mbar, self.config.max_target_mbar);
            }
        }
        s.pump_on = pump_on && s.scenario != Some(SCENARIO_VENT);
        info!("VAC: pump {} scenario {:?}", if s.pump_on { "on" } else { "off" }, s.scenario);
        Ok(())
    }

    /// One control cycle. Returns the parameters whose value changed.
    pub fn run(&self) -> Changes {
        let mut changes = Changes::new();
        let mut s = self.state();
        let before = (s.pump_on, s.target_reached(), s.actual_mbar);

        match s.switch {
            SwitchState::Off => s.pump_on = false,
            SwitchState::Invalid => {
                if s.pump_on {
                    warn!("VAC: invalid switch position, pump off");
                }
                s.pump_on = false;
            }
            SwitchState::Manual | SwitchState::Remote => {}
        }

        let next = if s.pump_on {
            (s.actual_mbar - (s.actual_mbar - s.target_mbar) * PUMP_DOWN_RATE).max(s.target_mbar)
        } else {
            s.actual_mbar + (ATMOSPHERE_MBAR - s.actual_mbar) * VENT_RATE
        };
        // Settle once within 0.1% of the goal.
        let goal = if s.pump_on { s.target_mbar } else { ATMOSPHERE_MBAR };
        s.actual_mbar = if (next - goal).abs() <= goal * 0.001 { goal } else { next };

        if s.actual_mbar != before.2 {
            let _ = changes.push((CompoundKind::Scalar, SCALAR_ACTUAL));
        }
        if (s.pump_on, s.target_reached()) != (before.0, before.1) {
            let _ = changes.push((CompoundKind::Status, 0));
        }
        changes
    }

    /// Publish the vacuum endpoint.
    pub fn register(self: &Arc<Self>, builder: &mut StoreBuilder) -> Result<(), RegistrationError> {
        let ep = EndpointId::VACUUM;

        let v = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, SCALAR_ACTUAL, move || {
            Compound::Scalar(Scalar::from_value(v.actual_pressure()))
        })?;

        let (get, set) = (Arc::clone(self), Arc::clone(self));
        builder.register(
            ep,
            CompoundKind::Scalar,
            SCALAR_TARGET,
            move || Compound::Scalar(Scalar::from_value(get.target_pressure())),
            Some(move |value: Compound| match value {
                Compound::Scalar(s) => set.set_target_pressure(s.value()),
                _ => Err(ValidationError::new(ErrorCode::WrongParameterId, "expected scalar")),
            }),
        )?;

        let (get, set) = (Arc::clone(self), Arc::clone(self));
        builder.register(
            ep,
            CompoundKind::Status,
            0,
            move || Compound::Status(get.status()),
            Some(move |value: Compound| match value {
                Compound::Status(s) => set.set_remote(s.output != 0, s.code),
                _ => Err(ValidationError::new(ErrorCode::WrongParameterId, "expected status")),
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vac() -> VacControl {
        VacControl::new(VacuumConfig::default())
    }

    #[test]
    fn target_range_is_enforced() {
        let v = vac();
        assert_eq!(v.set_target_pressure(0.001).unwrap_err().code, ErrorCode::ValueTooLow);
        assert_eq!(v.set_target_pressure(2000.0).unwrap_err().code, ErrorCode::ValueTooHigh);
        v.set_target_pressure(0.5).unwrap();
        assert_eq!(v.target_pressure(), 0.5);
    }

    #[test]
    fn pump_is_remote_only() {
        let v = vac();
        v.set_switch(SwitchState::Manual);
        assert_eq!(
            v.set_remote(true, 1).unwrap_err().code,
            ErrorCode::NotAllowedInThisState
        );
        v.set_switch(SwitchState::Remote);
        v.set_remote(true, 1).unwrap();
        assert!(v.pump_on());
        assert_eq!(v.scenario(), Some(1));
        assert_eq!(v.target_pressure(), 0.05);
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        let v = vac();
        v.set_switch(SwitchState::Remote);
        assert_eq!(
            v.set_remote(true, 9).unwrap_err().code,
            ErrorCode::WrongValueWithinRange
        );
        assert!(!v.pump_on());
    }

    #[test]
    fn vent_scenario_keeps_pump_off() {
        let v = vac();
        v.set_switch(SwitchState::Remote);
        v.set_remote(true, u16::from(SCENARIO_VENT)).unwrap();
        assert!(!v.pump_on());
    }

    #[test]
    fn pump_down_reaches_target() {
        let v = vac();
        v.set_switch(SwitchState::Remote);
        v.set_remote(true, 0).unwrap();
        let first = v.run();
        assert!(first.contains(&(CompoundKind::Scalar, SCALAR_ACTUAL)));
        for _ in 0..200 {
            v.run();
        }
        assert_eq!(v.actual_pressure(), v.target_pressure());
        assert_eq!(v.status().value_milli, 1000);
        assert!(v.run().is_empty());
    }

    #[test]
    fn switch_off_stops_pump_and_vents() {
        let v = vac();
        v.set_switch(SwitchState::Remote);
        v.set_remote(true, 0).unwrap();
        for _ in 0..10 {
            v.run();
        }
        let low = v.actual_pressure();
        v.set_switch(SwitchState::Off);
        let changes = v.run();
        assert!(!v.pump_on());
        assert!(changes.contains(&(CompoundKind::Status, 0)));
        assert!(v.actual_pressure() > low);
    }
}
