//! Device assembly — the control modules behind the parameter store.
//!
//! [`Device`] owns the domain modules and the store they publish into. It
//! builds the endpoint registry, registers every parameter and runs the
//! control cycle that raises SendDataFlags for domain-side changes.
//!
//! ```text
//!  Flyback ─┐                       ┌─▶ ProtocolEngine (I/O thread)
//!  Vacuum  ─┼─▶ ParameterStore ◀────┤
//!  Clock   ─┤   (Arc, shared)       └─▶ control_tick (control thread)
//!  Report  ─┘
//! ```

use std::sync::Arc;

use log::{debug, info};

use crate::com::codec::CompoundCodec;
use crate::com::compound::SwitchState;
use crate::com::endpoint::{EndpointDescriptor, EndpointHandle, EndpointId, EndpointRegistry, EndpointSelector};
use crate::com::engine::ProtocolEngine;
use crate::com::store::ParameterStore;
use crate::adapters::time::SystemClock;
use crate::config::SystemConfig;
use crate::control::flyback::Flyback;
use crate::control::vacuum::VacControl;
use crate::control::Changes;
use crate::diagnostics::ReportSystem;
use crate::error::{Error, Result};

pub struct Device {
    config: SystemConfig,
    store: Arc<ParameterStore>,
    flyback: Arc<Flyback>,
    vacuum: Arc<VacControl>,
    clock: Arc<SystemClock>,
    report: Arc<ReportSystem>,
    flyback_ep: EndpointHandle,
    vacuum_ep: EndpointHandle,
}

impl Device {
    /// Register the endpoints and every module parameter.
    pub fn build(config: SystemConfig, clock: Arc<SystemClock>, report: Arc<ReportSystem>) -> Result<Self> {
        config.validate()?;

        let mut registry = EndpointRegistry::builder();
        registry
            .register(EndpointDescriptor::new(EndpointId::FLYBACK, "flyback"))?
            .register(EndpointDescriptor::new(EndpointId::VACUUM, "vacuum"))?
            .register(EndpointDescriptor::new(EndpointId::TIME, "time"))?
            .register(EndpointDescriptor::read_only(EndpointId::DIAGNOSTICS, "diagnostics"))?;
        let registry = registry.build();

        let flyback = Arc::new(Flyback::new(config.flyback.clone()));
        let vacuum = Arc::new(VacControl::new(config.vacuum.clone()));

        let mut builder = ParameterStore::builder(registry);
        flyback.register(&mut builder)?;
        vacuum.register(&mut builder)?;
        clock.register(&mut builder)?;
        report.register(&mut builder)?;
        let store = Arc::new(builder.build());

        let lookup = |id| {
            store
                .registry()
                .resolve(EndpointSelector::Specific(id))
                .map_err(|_| Error::Init("endpoint missing after registration"))
        };
        let flyback_ep = lookup(EndpointId::FLYBACK)?;
        let vacuum_ep = lookup(EndpointId::VACUUM)?;

        info!("DEVICE: {} endpoints registered", store.registry().len());
        Ok(Self {
            config,
            store,
            flyback,
            vacuum,
            clock,
            report,
            flyback_ep,
            vacuum_ep,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn flyback(&self) -> &Arc<Flyback> {
        &self.flyback
    }

    pub fn vacuum(&self) -> &Arc<VacControl> {
        &self.vacuum
    }

    pub fn clock(&self) -> &Arc<SystemClock> {
        &self.clock
    }

    pub fn report(&self) -> &Arc<ReportSystem> {
        &self.report
    }

    /// A protocol engine over this device's store.
    pub fn engine(&self) -> ProtocolEngine {
        ProtocolEngine::new(Arc::clone(&self.store), CompoundCodec::new(self.config.limits))
    }

    /// Front-panel switch position for both modules.
    pub fn set_switches(&self, switch: SwitchState) {
        self.flyback.set_switch(switch);
        self.vacuum.set_switch(switch);
    }

    /// One control cycle of every module. Returns the number of
    /// parameters flagged to subscribers.
    pub fn control_tick(&self) -> usize {
        let flagged = self.publish(&self.flyback_ep, self.flyback.run())
            + self.publish(&self.vacuum_ep, self.vacuum.run());
        if flagged > 0 {
            debug!("DEVICE: {} parameter(s) changed", flagged);
        }
        flagged
    }

    fn publish(&self, endpoint: &EndpointHandle, changes: Changes) -> usize {
        changes
            .iter()
            .filter(|(kind, index)| self.store.notify_changed(endpoint, *kind, *index).is_ok())
            .count()
    }
}
