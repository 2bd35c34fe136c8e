//! Port traits — the boundary between the communication core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ComService / ReportSystem
//! ```
//!
//! Driven adapters (event sinks, storage, clocks) implement these traits so
//! the protocol core never touches a logger, flash or timer directly.
//!
//! Port errors are small `Copy` enums; adapters log the backend detail
//! and map it onto them.

use crate::config::SystemConfig;

use super::events::ComEvent;

// ── Events (core → log / diagnostics) ────────────────────────

pub trait EventSink {
    fn emit(&mut self, event: &ComEvent);
}

// ── Clock (timer → core) ─────────────────────────────────────

/// Read-only time source, passed explicitly to every component that
/// timestamps something.
pub trait Clock: Send + Sync {
    /// Microseconds since boot (monotonic).
    fn uptime_us(&self) -> u64;

    /// Wall-clock seconds since the Unix epoch, if the time has been set.
    fn epoch_secs(&self) -> Option<u64>;

    fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }

    fn uptime_secs(&self) -> u64 {
        self.uptime_us() / 1_000_000
    }
}

// ── Configuration (ComService settings ↔ flash) ──────────────

/// Where the [`SystemConfig`] lives between boots.
///
/// `save` range-checks with [`SystemConfig::validate`] first and refuses
/// a bad value with [`ConfigError::ValidationFailed`]; nothing is clamped.
pub trait ConfigPort {
    /// Stored config, or the defaults when none was ever saved.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ── Blob storage (diagnostics records ↔ flash) ───────────────

/// Small binary records grouped by namespace ("report", "eswcom", ...).
/// A write either lands whole or not at all.
pub trait StoragePort {
    /// Copy the record into `buf`; returns its length (truncated to
    /// `buf.len()`).
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Erase a record. Erasing a missing record succeeds.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ── Port errors ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The stored blob or JSON document does not decode.
    Corrupted,
    /// A field is out of range; names the field.
    ValidationFailed(&'static str),
    /// The backend could not be read or written.
    IoError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    /// Record larger than the backend accepts.
    TooLarge,
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => f.write_str("stored config does not decode"),
            Self::ValidationFailed(field) => write!(f, "invalid config: {field}"),
            Self::IoError => f.write_str("config backend unavailable"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such record"),
            Self::TooLarge => f.write_str("record too large"),
            Self::IoError => f.write_str("storage backend error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(field) => Self::Config(field),
            ConfigError::Corrupted => Self::Config("stored config does not decode"),
            ConfigError::IoError => Self::Config("config backend unavailable"),
        }
    }
}
