//! Application layer — ports, events and the assembled device.
//!
//! The communication core and the control modules never touch a logger,
//! flash or timer directly. Everything outside flows through the **port
//! traits** in [`ports`]; [`device`] wires the modules into one parameter
//! store.

pub mod device;
pub mod events;
pub mod ports;
