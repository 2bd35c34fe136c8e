//! Runtime diagnostics and error reporting.
//!
//! [`ReportSystem`] tracks:
//!
//! - CPU load from busy/idle accounting marked by the I/O loop;
//! - heap status and the RAM level against the configured thresholds;
//! - the last error, persisted to storage so it survives a reset;
//! - the stack guard (task stack high-water mark on target).
//!
//! Everything is published read-only on the diagnostics endpoint and as a
//! JSON report on request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{Clock, StoragePort};
use crate::com::compound::{Compound, CompoundKind, ErrorCode, Scalar, Status};
use crate::com::endpoint::EndpointId;
use crate::com::store::StoreBuilder;
use crate::config::ReportConfig;
use crate::error::RegistrationError;

const REPORT_NAMESPACE: &str = "report";
const LAST_ERROR_KEY: &str = "last_err";

/// Guard pattern published while the stack guard is intact.
pub const STACK_GUARD: u16 = 0xDEAD;

/// Minimum spacing between last-error writes to flash. Errors in between
/// only update the in-memory record.
const PERSIST_INTERVAL_US: u64 = 60_000_000;

/// Free stack below this trips the stack guard (bytes).
const STACK_MARGIN: u32 = 512;

/// The busy/idle accumulators are halved once they span this long, so the
/// load follows recent activity.
const CPU_WINDOW_US: u64 = 10_000_000;

/// `health` bit: free heap below the critical threshold.
pub const HEALTH_RAM_CRITICAL: u32 = 1 << 0;
/// `health` bit: free heap below the warning threshold.
pub const HEALTH_RAM_WARNING: u32 = 1 << 1;
/// `health` bit: stack guard tripped.
pub const HEALTH_STACK: u32 = 1 << 2;
/// `health` bit: a last-error record is stored.
pub const HEALTH_ERROR_LOGGED: u32 = 1 << 3;

/// Most recent reported error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub code: u16,
    pub message: heapless::String<48>,
    /// Unix seconds if the wall clock was set, else uptime seconds.
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStatus {
    pub heap_free: u32,
    pub heap_min_free: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RamLevel {
    Ok,
    Warning,
    Critical,
}

/// Full diagnostics report, rendered to JSON on request.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSnapshot {
    pub uptime_secs: u64,
    pub cpu_load_percent: f32,
    pub memory: MemoryStatus,
    pub ram_level: RamLevel,
    pub stack_free: Option<u32>,
    pub health: u32,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Default)]
struct CpuUsage {
    busy: bool,
    since_us: u64,
    busy_us: u64,
    idle_us: u64,
}

impl CpuUsage {
    fn close_segment(&mut self, now_us: u64) {
        let elapsed = now_us.saturating_sub(self.since_us);
        if self.busy {
            self.busy_us += elapsed;
        } else {
            self.idle_us += elapsed;
        }
        self.since_us = now_us;
        if self.busy_us + self.idle_us > CPU_WINDOW_US {
            self.busy_us /= 2;
            self.idle_us /= 2;
        }
    }
}

/// Storage plus what was last written to it.
struct Persisted {
    port: Box<dyn StoragePort + Send>,
    written_at_us: Option<u64>,
    written: Option<(u16, heapless::String<48>)>,
}

impl Persisted {
    /// Rate limit and dedupe: identical records are never rewritten and
    /// distinct ones at most once per [`PERSIST_INTERVAL_US`].
    fn due(&self, record: &LastError, now_us: u64) -> bool {
        let same = self
            .written
            .as_ref()
            .is_some_and(|(code, message)| *code == record.code && *message == record.message);
        let spaced = self
            .written_at_us
            .is_none_or(|at| now_us.saturating_sub(at) >= PERSIST_INTERVAL_US);
        !same && spaced
    }
}

pub struct ReportSystem {
    clock: Arc<dyn Clock>,
    config: ReportConfig,
    usage: Mutex<CpuUsage>,
    heap_min: AtomicU32,
    storage: Mutex<Persisted>,
    last_error: Mutex<Option<LastError>>,
}

impl ReportSystem {
    /// Create the report and restore the last error from storage.
    pub fn new(clock: Arc<dyn Clock>, config: ReportConfig, storage: Box<dyn StoragePort + Send>) -> Self {
        let now = clock.uptime_us();
        let last_error = Self::restore_last_error(storage.as_ref());
        let written = last_error.as_ref().map(|e| (e.code, e.message.clone()));
        if let Some(e) = &last_error {
            warn!("REPORT: last error from previous run: 0x{:02X} {}", e.code, e.message);
        }
        Self {
            clock,
            config,
            usage: Mutex::new(CpuUsage {
                since_us: now,
                ..CpuUsage::default()
            }),
            heap_min: AtomicU32::new(u32::MAX),
            storage: Mutex::new(Persisted {
                port: storage,
                written_at_us: None,
                written,
            }),
            last_error: Mutex::new(last_error),
        }
    }

    fn restore_last_error(storage: &dyn StoragePort) -> Option<LastError> {
        let mut buf = [0u8; 96];
        let len = storage.read(REPORT_NAMESPACE, LAST_ERROR_KEY, &mut buf).ok()?;
        match postcard::from_bytes(&buf[..len]) {
            Ok(e) => Some(e),
            Err(_) => {
                warn!("REPORT: stored last error is corrupted, ignoring");
                None
            }
        }
    }

    // ── CPU load ────────────────────────────────────────────

    /// Mark the start of a busy segment (work is being done).
    pub fn start_busy(&self) {
        self.switch_segment(true);
    }

    /// Mark the start of an idle segment (waiting on a timer).
    pub fn start_idle(&self) {
        self.switch_segment(false);
    }

    fn switch_segment(&self, busy: bool) {
        let now = self.clock.uptime_us();
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        if usage.busy != busy {
            usage.close_segment(now);
            usage.busy = busy;
        }
    }

    /// Share of recent time spent busy, in percent.
    pub fn cpu_load(&self) -> f32 {
        let now = self.clock.uptime_us();
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.close_segment(now);
        let total = usage.busy_us + usage.idle_us;
        if total == 0 {
            return 0.0;
        }
        (usage.busy_us as f64 * 100.0 / total as f64) as f32
    }

    pub fn reset_usage(&self) {
        let now = self.clock.uptime_us();
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.busy_us = 0;
        usage.idle_us = 0;
        usage.since_us = now;
    }

    // ── Memory ──────────────────────────────────────────────

    #[cfg(target_os = "espidf")]
    pub fn memory_status(&self) -> MemoryStatus {
        use esp_idf_svc::sys::{esp_get_free_heap_size, esp_get_minimum_free_heap_size};
        let heap_free = unsafe { esp_get_free_heap_size() };
        let heap_min_free = unsafe { esp_get_minimum_free_heap_size() };
        self.heap_min.fetch_min(heap_min_free, Ordering::Relaxed);
        MemoryStatus {
            heap_free,
            heap_min_free,
        }
    }

    /// Synthetic heap model on host: slow decay over uptime.
    #[cfg(not(target_os = "espidf"))]
    pub fn memory_status(&self) -> MemoryStatus {
        let base_free: u32 = 307_200;
        let decay = (self.clock.uptime_secs() / 60) as u32 * 256;
        let heap_free = base_free.saturating_sub(decay).max(96 * 1024);
        let heap_min_free = self
            .heap_min
            .fetch_min(heap_free, Ordering::Relaxed)
            .min(heap_free);
        MemoryStatus {
            heap_free,
            heap_min_free,
        }
    }

    /// Classify free heap against the configured thresholds.
    pub fn ram_level(&self) -> RamLevel {
        let free = self.memory_status().heap_free;
        if free < self.config.ram_critical_bytes {
            RamLevel::Critical
        } else if free < self.config.ram_warning_bytes {
            RamLevel::Warning
        } else {
            RamLevel::Ok
        }
    }

    /// [`ram_level`](Self::ram_level), logging when it is not `Ok`.
    /// Called periodically by the I/O loop.
    pub fn check_ram_level(&self) -> RamLevel {
        let level = self.ram_level();
        match level {
            RamLevel::Critical => error!("REPORT: free heap critical ({} bytes)", self.memory_status().heap_free),
            RamLevel::Warning => warn!("REPORT: free heap low ({} bytes)", self.memory_status().heap_free),
            RamLevel::Ok => {}
        }
        level
    }

    // ── Stack ───────────────────────────────────────────────

    /// Unused stack of the calling task, if the platform reports it.
    #[cfg(target_os = "espidf")]
    pub fn stack_free(&self) -> Option<u32> {
        let words = unsafe { esp_idf_svc::sys::uxTaskGetStackHighWaterMark(core::ptr::null_mut()) };
        Some(words as u32)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn stack_free(&self) -> Option<u32> {
        None
    }

    /// True while the stack guard is intact.
    pub fn stack_guard_intact(&self) -> bool {
        self.stack_free().is_none_or(|free| free >= STACK_MARGIN)
    }

    /// Backtrace of the calling thread as text. JSON report only.
    pub fn stack_dump(&self) -> String {
        std::backtrace::Backtrace::force_capture().to_string()
    }

    // ── Last error ──────────────────────────────────────────

    /// Record an error. Long messages are truncated. The record is
    /// persisted unless it repeats the stored one or the last write was
    /// less than [`PERSIST_INTERVAL_US`] ago.
    pub fn report_error(&self, code: u16, message: &str) {
        let record = self.make_record(code, message);
        warn!("REPORT: error 0x{:02X} {}", code, record.message);
        self.persist(&record);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }

    fn persist(&self, record: &LastError) {
        let now = self.clock.uptime_us();
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        if !storage.due(record, now) {
            debug!("REPORT: last error kept in RAM only");
            return;
        }
        let Ok(bytes) = postcard::to_allocvec(record) else {
            warn!("REPORT: could not encode last error");
            return;
        };
        match storage.port.write(REPORT_NAMESPACE, LAST_ERROR_KEY, &bytes) {
            Ok(()) => {
                storage.written_at_us = Some(now);
                storage.written = Some((record.code, record.message.clone()));
            }
            Err(e) => warn!("REPORT: could not persist last error: {}", e),
        }
    }

    fn make_record(&self, code: u16, message: &str) -> LastError {
        let mut text = heapless::String::new();
        for c in message.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        let timestamp = self
            .clock
            .epoch_secs()
            .unwrap_or_else(|| self.clock.uptime_secs()) as u32;
        LastError {
            code,
            message: text,
            timestamp,
        }
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_last_error(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        storage.written = None;
        if let Err(e) = storage.port.delete(REPORT_NAMESPACE, LAST_ERROR_KEY) {
            warn!("REPORT: could not erase last error: {}", e);
        }
        info!("REPORT: last error cleared");
    }

    // ── Summary ─────────────────────────────────────────────

    /// Health bitmask; zero means healthy.
    pub fn health(&self) -> u32 {
        let mut bits = match self.ram_level() {
            RamLevel::Ok => 0,
            RamLevel::Warning => HEALTH_RAM_WARNING,
            RamLevel::Critical => HEALTH_RAM_CRITICAL | HEALTH_RAM_WARNING,
        };
        if !self.stack_guard_intact() {
            bits |= HEALTH_STACK;
        }
        if self.last_error().is_some() {
            bits |= HEALTH_ERROR_LOGGED;
        }
        bits
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let memory = self.memory_status();
        ReportSnapshot {
            uptime_secs: self.clock.uptime_secs(),
            cpu_load_percent: self.cpu_load(),
            memory,
            ram_level: self.ram_level(),
            stack_free: self.stack_free(),
            health: self.health(),
            last_error: self.last_error(),
        }
    }

    fn health_status(&self) -> Status {
        let health = self.health();
        let last = self.last_error();
        Status {
            switch_state: 0,
            output: u8::from(health == 0),
            code: last.as_ref().map_or(0, |e| e.code),
            value_milli: health as i32,
            timestamp: last.map_or(0, |e| e.timestamp),
        }
    }

    fn stack_status(&self) -> Status {
        let intact = self.stack_guard_intact();
        Status {
            switch_state: 0,
            output: u8::from(intact),
            code: if intact { STACK_GUARD } else { 0 },
            value_milli: self.stack_free().map_or(-1, |b| b as i32),
            timestamp: 0,
        }
    }

    /// Publish the diagnostics endpoint. Every parameter is read-only.
    pub fn register(self: &Arc<Self>, builder: &mut StoreBuilder) -> Result<(), RegistrationError> {
        let ep = EndpointId::DIAGNOSTICS;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, 0, move || {
            Compound::Scalar(Scalar::from_value(r.cpu_load()))
        })?;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, 1, move || {
            Compound::Scalar(Scalar::from_value(r.memory_status().heap_free as f32 / 1024.0))
        })?;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, 2, move || {
            Compound::Scalar(Scalar::from_value(r.memory_status().heap_min_free as f32 / 1024.0))
        })?;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Scalar, 3, move || {
            Compound::Scalar(Scalar::from_value(r.clock.uptime_secs() as f32 / 60.0))
        })?;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Status, 0, move || {
            Compound::Status(r.health_status())
        })?;
        let r = Arc::clone(self);
        builder.register_read_only(ep, CompoundKind::Status, 1, move || {
            Compound::Status(r.stack_status())
        })?;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook: records the panic as the last error before abort
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that stores the panic message as the last error.
///
/// Uses `try_lock` throughout: a panic raised while the report's own locks
/// are held is logged but not persisted.
pub fn install_panic_handler(report: Arc<ReportSystem>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        error!("PANIC: {}", reason);

        let record = report.make_record(ErrorCode::ParameterSystemError as u16, reason);
        if let (Ok(bytes), Ok(mut storage)) = (postcard::to_allocvec(&record), report.storage.try_lock()) {
            let _ = storage.port.write(REPORT_NAMESPACE, LAST_ERROR_KEY, &bytes);
        }
        if let Ok(mut last) = report.last_error.try_lock() {
            *last = Some(record);
        }
        default_hook(info);
    }));
}
