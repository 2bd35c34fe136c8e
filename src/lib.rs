//! eswcom — endpoint/compound communication library.
//!
//! Exposes the protocol core, the control modules and the adapters for
//! integration testing. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod com;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
