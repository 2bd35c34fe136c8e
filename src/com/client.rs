//! Client identity shared by the arbiter, the engine and the store.

use core::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// Maximum number of concurrent clients across all media.
pub const MAX_CLIENTS: usize = 8;

/// Client slot index (0..MAX_CLIENTS).
pub type ClientId = u8;

/// Physical medium a client is bound to. Fixed at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Medium {
    Ethernet,
    Serial,
    I2c,
    Spi,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ethernet => "ethernet",
            Self::Serial => "serial",
            Self::I2c => "i2c",
            Self::Spi => "spi",
        })
    }
}

/// Address of the peer behind a client slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    Socket(SocketAddr),
    Serial,
    /// Seven-bit I2C address, or chip-select index for SPI.
    Bus(u8),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{addr}"),
            Self::Serial => f.write_str("serial"),
            Self::Bus(addr) => write!(f, "bus@0x{addr:02X}"),
        }
    }
}

/// Snapshot of a client slot. Holding one keeps nothing alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub medium: Medium,
    pub peer: PeerAddr,
}
