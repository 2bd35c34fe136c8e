//! System clock adapter.
//!
//! Implements [`Clock`] for the eSW firmware.
//!
//! - **`target_os = "espidf"`** — monotonic time from `esp_timer_get_time()`
//!   (microsecond precision).
//! - **`not(target_os = "espidf")`** — `std::time::Instant` for host-side
//!   testing and simulation.
//!
//! The wall clock is unset at boot. The host sets it through the time
//! endpoint; from then on it advances with the monotonic uptime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime};

use crate::app::ports::Clock;
use crate::com::compound::{Compound, CompoundKind, ErrorCode, Scalar, Status};
use crate::com::endpoint::EndpointId;
use crate::com::store::StoreBuilder;
use crate::error::{RegistrationError, ValidationError};

/// Epoch offset sentinel: wall clock never set.
const UNSET: u64 = u64::MAX;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    /// Unix seconds at uptime zero, or [`UNSET`].
    epoch_at_boot: AtomicU64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            epoch_at_boot: AtomicU64::new(UNSET),
        }
    }

    /// Set the wall clock to `epoch_secs` (Unix seconds, UTC).
    pub fn set_epoch(&self, epoch_secs: u64) {
        let boot = epoch_secs.saturating_sub(self.uptime_secs());
        self.epoch_at_boot.store(boot, Ordering::Release);
        log::info!("TIME: wall clock set to {}", format_timestamp(epoch_secs));
    }

    /// Set the wall clock from host text in [`TIMESTAMP_FORMAT`]. Returns
    /// the new Unix time.
    pub fn set_from_text(&self, text: &str) -> Result<u64, ValidationError> {
        let epoch = parse_timestamp(text)
            .ok_or(ValidationError::new(ErrorCode::WrongValueWithinRange, "expected YYYY/MM/DD HH:MM:SS"))?;
        if epoch == 0 {
            return Err(ValidationError::new(ErrorCode::ValueTooLow, "timestamp must be non-zero"));
        }
        self.set_epoch(epoch);
        Ok(epoch)
    }

    /// Current wall clock as text, `None` until it has been set.
    pub fn now_text(&self) -> Option<String> {
        self.epoch_secs().map(format_timestamp)
    }

    /// Time endpoint: Status 0 carries the wall clock (settable), Scalar 0
    /// the uptime in minutes.
    pub fn register(self: &Arc<Self>, builder: &mut StoreBuilder) -> Result<(), RegistrationError> {
        let (get, set) = (Arc::clone(self), Arc::clone(self));
        builder.register(
            EndpointId::TIME,
            CompoundKind::Status,
            0,
            move || {
                let epoch = get.epoch_secs();
                Compound::Status(Status {
                    output: u8::from(epoch.is_some()),
                    timestamp: epoch.unwrap_or(0) as u32,
                    ..Status::default()
                })
            },
            Some(move |value: Compound| match value {
                Compound::Status(s) if s.timestamp == 0 => {
                    Err(ValidationError::new(ErrorCode::ValueTooLow, "timestamp must be non-zero"))
                }
                Compound::Status(s) => {
                    set.set_epoch(u64::from(s.timestamp));
                    Ok(())
                }
                _ => Err(ValidationError::new(ErrorCode::WrongParameterId, "expected status")),
            }),
        )?;
        let clock = Arc::clone(self);
        builder.register_read_only(EndpointId::TIME, CompoundKind::Scalar, 0, move || {
            Compound::Scalar(Scalar::from_value(clock.uptime_secs() as f32 / 60.0))
        })?;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn now_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Clock for SystemClock {
    fn uptime_us(&self) -> u64 {
        self.now_us()
    }

    fn epoch_secs(&self) -> Option<u64> {
        match self.epoch_at_boot.load(Ordering::Acquire) {
            UNSET => None,
            boot => Some(boot + self.uptime_secs()),
        }
    }
}

// ── Calendar formatting ──────────────────────────────────────

/// Wall-clock text format used in logs and by the host.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Render Unix seconds as `YYYY/MM/DD HH:MM:SS` (UTC).
pub fn format_timestamp(epoch_secs: u64) -> String {
    i64::try_from(epoch_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(|| format!("@{}", epoch_secs), |t| t.format(TIMESTAMP_FORMAT).to_string())
}

/// Parse `YYYY/MM/DD HH:MM:SS` (UTC) into Unix seconds. Dates before 1970
/// and out-of-range fields are rejected.
pub fn parse_timestamp(text: &str) -> Option<u64> {
    let t = NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()?;
    u64::try_from(t.and_utc().timestamp()).ok()
}
