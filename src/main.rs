//! eswcom firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  LogEventSink    NvsStorage        SystemClock    json         │
//! │  (EventSink)     (Config+Storage)  (Clock)        (queries)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌──────────────────────────┐   ┌───────────────────────────┐  │
//! │  │ I/O thread               │   │ Control thread            │  │
//! │  │ ComService: arbiter ·    │◀─▶│ Device: flyback · vacuum  │  │
//! │  │ engine · io_task loops   │   │ control_tick              │  │
//! │  └──────────────────────────┘   └───────────────────────────┘  │
//! │               Arc<ParameterStore> shared by both               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An optional first argument names a JSON config file, which is then
//! persisted to NVS; without it the config comes from NVS, then from
//! defaults.
#![deny(unused_must_use)]

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use eswcom::adapters::log_sink::LogEventSink;
use eswcom::adapters::nvs::NvsStorage;
use eswcom::adapters::time::SystemClock;
use eswcom::app::device::Device;
use eswcom::app::ports::ConfigPort;
use eswcom::com::arbiter::TransportArbiter;
use eswcom::com::compound::SwitchState;
use eswcom::com::io_task;
use eswcom::com::service::ComService;
use eswcom::com::transport::EthernetListener;
use eswcom::config::SystemConfig;
use eswcom::diagnostics::{self, ReportSystem};
use eswcom::error::Error;

fn main() -> Result<()> {
    // ── 1. Bootstrap ──────────────────────────────────────────
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }
    #[cfg(not(target_os = "espidf"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  eswcom v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let nvs = NvsStorage::new().context("NVS init failed")?;
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            let cfg = SystemConfig::from_json(&text).with_context(|| format!("parsing {}", path))?;
            info!("Config loaded from {}", path);
            // Provisioned config survives the next boot without the file.
            if let Err(e) = nvs.save(&cfg) {
                warn!("Config not persisted to NVS: {}", e);
            }
            cfg
        }
        None => nvs.load().unwrap_or_else(|e| {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }),
    };

    // ── 3. Clock + diagnostics ────────────────────────────────
    let clock = Arc::new(SystemClock::new());
    let report = Arc::new(ReportSystem::new(
        clock.clone(),
        config.report.clone(),
        Box::new(nvs),
    ));
    diagnostics::install_panic_handler(Arc::clone(&report));
    if let Some(last) = report.last_error() {
        warn!("Last error before reset: 0x{:02X} {}", last.code, last.message);
    }

    // ── 4. Device: registry, store, modules ───────────────────
    let device = Arc::new(Device::build(config.clone(), clock, Arc::clone(&report))?);
    // No front panel on this build: both modules follow the host.
    device.set_switches(SwitchState::Remote);

    // ── 5. Control thread ─────────────────────────────────────
    let control = Arc::clone(&device);
    let period = Duration::from_millis(u64::from(config.timing.control_interval_ms));
    std::thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            loop {
                control.control_tick();
                std::thread::sleep(period);
            }
        })
        .context("spawning control thread")?;

    // ── 6. Ethernet listener + communication service ──────────
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.network.port));
    let listener = EthernetListener::bind(addr).map_err(Error::from)?;
    info!(
        "Listening on {} (configured address {})",
        addr,
        Ipv4Addr::from(config.network.ip)
    );

    let service = ComService::new(
        TransportArbiter::with_listener(listener),
        device.engine(),
        LogEventSink::with_report(Arc::clone(&report)),
    )
    .with_report(report)
    .with_clock(Arc::clone(device.clock()));

    info!("System ready. Entering I/O loop.");

    // ── 7. I/O loop ───────────────────────────────────────────
    io_task::run(Rc::new(RefCell::new(service)), &config.timing);
    Ok(())
}
