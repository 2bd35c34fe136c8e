//! Compound parameter exchange.
//!
//! ```text
//!   Ethernet / serial / I2C / SPI
//!              │
//!   ┌──────────▼──────────┐    length-prefixed frames
//!   │  TransportArbiter   │◀──────────────────────────┐
//!   └──────────┬──────────┘                           │ FrameLink
//!              │ (client, frame)                      │
//!   ┌──────────▼──────────┐   CompoundCodec   ┌───────┴────────┐
//!   │   ProtocolEngine    │──────────────────▶│ replies/updates│
//!   └──────────┬──────────┘                   └────────────────┘
//!              │ resolve / get / set
//!   ┌──────────▼──────────┐
//!   │ EndpointRegistry +  │  getters/setters  ┌────────────────┐
//!   │  ParameterStore     │◀─────────────────▶│ domain modules │
//!   └─────────────────────┘                   └────────────────┘
//! ```
//!
//! [`service::ComService`] ties the arbiter and engine together;
//! [`io_task`] drives it from a cooperative executor.

pub mod arbiter;
pub mod client;
pub mod codec;
pub mod compound;
pub mod endpoint;
pub mod engine;
pub mod io_task;
pub mod service;
pub mod store;
pub mod transport;
