//! System configuration parameters
//!
//! All tunable parameters of the communication firmware and its control
//! modules. Values come from a JSON file on the command line, from the
//! [`ConfigPort`](crate::app::ports::ConfigPort) store, or from the defaults
//! below.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::com::compound::CompoundKind;

/// Core system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub network: NetworkConfig,
    pub limits: CompoundLimits,
    pub timing: TimingConfig,
    pub flyback: FlybackConfig,
    pub vacuum: VacuumConfig,
    pub report: ReportConfig,
}

/// Ethernet interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: [u8; 4],
    pub port: u16,
    pub mac: [u8; 6],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: [192, 168, 1, 3],
            port: 503,
            mac: [0xDE, 0xAD, 0xBE, 0xEF, 0xFE, 0xED],
        }
    }
}

/// Number of addressable instances per compound kind. Decoding rejects any
/// index at or above the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundLimits {
    pub scalar_instances: u8,
    pub drive_instances: u8,
    pub status_instances: u8,
}

impl CompoundLimits {
    pub const fn bound(&self, kind: CompoundKind) -> u8 {
        match kind {
            CompoundKind::Scalar => self.scalar_instances,
            CompoundKind::Drive => self.drive_instances,
            CompoundKind::Status => self.status_instances,
        }
    }
}

impl Default for CompoundLimits {
    fn default() -> Self {
        Self {
            scalar_instances: 8,
            drive_instances: 2,
            status_instances: 4,
        }
    }
}

/// Loop periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Ethernet accept poll interval (milliseconds)
    pub accept_interval_ms: u32,
    /// Inbound frame poll interval (milliseconds)
    pub poll_interval_ms: u32,
    /// Unsolicited update flush interval (milliseconds)
    pub update_interval_ms: u32,
    /// Domain control loop interval (milliseconds)
    pub control_interval_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            accept_interval_ms: 50,
            poll_interval_ms: 1,
            update_interval_ms: 100,
            control_interval_ms: 200,
        }
    }
}

/// Flyback drive limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlybackConfig {
    /// Highest accepted duty cycle (0-100%)
    pub max_duty_percent: f32,
    pub min_frequency_hz: u32,
    pub max_frequency_hz: u32,
}

impl Default for FlybackConfig {
    fn default() -> Self {
        Self {
            max_duty_percent: 100.0,
            min_frequency_hz: 1_000,
            max_frequency_hz: 25_000,
        }
    }
}

/// Vacuum control limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumConfig {
    /// Lowest accepted target pressure (mbar)
    pub min_target_mbar: f32,
    /// Highest accepted target pressure (mbar)
    pub max_target_mbar: f32,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            min_target_mbar: 0.01,
            max_target_mbar: 1013.0,
        }
    }
}

/// Diagnostics thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Free heap below this logs a warning (bytes)
    pub ram_warning_bytes: u32,
    /// Free heap below this marks memory unhealthy (bytes)
    pub ram_critical_bytes: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            ram_warning_bytes: 64 * 1024,
            ram_critical_bytes: 16 * 1024,
        }
    }
}

impl SystemConfig {
    /// Parse a JSON document. Missing sections fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        if l.scalar_instances == 0 || l.drive_instances == 0 || l.status_instances == 0 {
            return Err(ConfigError::ValidationFailed(
                "every compound kind needs at least one instance",
            ));
        }
        if self.network.port == 0 {
            return Err(ConfigError::ValidationFailed("network.port must be non-zero"));
        }
        let t = &self.timing;
        if !(1..=1000).contains(&t.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "timing.poll_interval_ms must be 1–1000",
            ));
        }
        if !(10..=5000).contains(&t.accept_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "timing.accept_interval_ms must be 10–5000",
            ));
        }
        if !(10..=60_000).contains(&t.update_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "timing.update_interval_ms must be 10–60000",
            ));
        }
        if !(10..=60_000).contains(&t.control_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "timing.control_interval_ms must be 10–60000",
            ));
        }
        let f = &self.flyback;
        if !(0.0..=100.0).contains(&f.max_duty_percent) {
            return Err(ConfigError::ValidationFailed(
                "flyback.max_duty_percent must be 0–100",
            ));
        }
        if f.min_frequency_hz == 0 || f.min_frequency_hz >= f.max_frequency_hz {
            return Err(ConfigError::ValidationFailed(
                "flyback frequency range must be non-empty and above 0 Hz",
            ));
        }
        let v = &self.vacuum;
        if !(v.min_target_mbar > 0.0 && v.min_target_mbar < v.max_target_mbar) {
            return Err(ConfigError::ValidationFailed(
                "vacuum target range must be non-empty and above 0 mbar",
            ));
        }
        if self.report.ram_critical_bytes >= self.report.ram_warning_bytes {
            return Err(ConfigError::ValidationFailed(
                "report.ram_critical_bytes must be < ram_warning_bytes",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SystemConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.timing.poll_interval_ms < c.timing.accept_interval_ms);
        assert!(c.flyback.min_frequency_hz < c.flyback.max_frequency_hz);
        assert_eq!(c.limits.bound(CompoundKind::Drive), 2);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2 = SystemConfig::from_json(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let c = SystemConfig::from_json(r#"{"network":{"port":8503}}"#).unwrap();
        assert_eq!(c.network.port, 8503);
        assert_eq!(c.network.ip, [192, 168, 1, 3]);
        assert_eq!(c.limits, CompoundLimits::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut c = SystemConfig::default();
        c.flyback.max_duty_percent = 120.0;
        assert!(matches!(c.validate(), Err(ConfigError::ValidationFailed(_))));

        let mut c = SystemConfig::default();
        c.limits.status_instances = 0;
        assert!(c.validate().is_err());

        let mut c = SystemConfig::default();
        c.report.ram_critical_bytes = c.report.ram_warning_bytes;
        assert!(c.validate().is_err());

        assert!(matches!(
            SystemConfig::from_json("{"),
            Err(ConfigError::Corrupted)
        ));
    }

    #[test]
    fn postcard_roundtrip() {
        let c = SystemConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: SystemConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c, c2);
    }
}
