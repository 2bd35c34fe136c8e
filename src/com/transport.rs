//! Transport handles — one byte stream per client, whatever the medium.
//!
//! Concrete implementations:
//! - [`StreamLink`] over a TCP socket (Ethernet) or any `Read + Write`
//!   serial port
//! - [`I2cLink`] over an `embedded-hal` I2C bus (we are the bus master)
//! - [`SpiLink`] over an `embedded-hal` SPI device
//!
//! The arbiter stores every handle as `Box<dyn Transport>`, so adding a
//! medium requires no change to framing or protocol logic.
//!
//! ## Bus mailbox
//!
//! I2C and SPI peers cannot push bytes, so both bus links poll a small
//! mailbox on the peer:
//!
//! ```text
//! PENDING   → 1 byte: number of bytes queued by the peer
//! READ n    → n bytes (n ≤ 32)
//! WRITE ... → up to 32 bytes for the peer
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use embedded_hal::i2c::I2c;
use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, info, warn};

use super::client::Medium;
use crate::error::TransportError;

/// Largest chunk moved in one bus transaction.
pub const MAILBOX_LEN: usize = 32;

const CMD_PENDING: u8 = 0x01;
const CMD_READ: u8 = 0x02;
const CMD_WRITE: u8 = 0x03;

/// Byte-oriented, non-blocking channel to one client.
pub trait Transport {
    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write part of `data`. Returns the number of bytes accepted;
    /// `Ok(0)` means the medium is momentarily full.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    /// Medium this handle is bound to.
    fn medium(&self) -> Medium;
}

// ── Stream link (Ethernet / serial) ──────────────────────────

/// Transport over a byte stream.
///
/// For Ethernet a zero-length read is the peer closing the socket. A serial
/// port has no such notion, so there it only means nothing arrived.
pub struct StreamLink<S> {
    stream: S,
    medium: Medium,
}

impl<S: Read + Write> StreamLink<S> {
    pub fn serial(stream: S) -> Self {
        Self {
            stream,
            medium: Medium::Serial,
        }
    }
}

impl StreamLink<TcpStream> {
    /// Wrap an accepted socket. The socket is switched to non-blocking mode.
    pub fn ethernet(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nonblocking(true).map_err(|_| TransportError::Io)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("ETH: TCP_NODELAY not set: {}", e);
        }
        Ok(Self {
            stream,
            medium: Medium::Ethernet,
        })
    }
}

impl<S: Read + Write> Transport for StreamLink<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(0) if self.medium == Medium::Ethernet && !buf.is_empty() => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(e) if is_disconnect(e.kind()) => Err(TransportError::Disconnected),
            Err(e) => {
                debug!("LINK({}): read error: {}", self.medium, e);
                Err(TransportError::Io)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        match self.stream.write(data) {
            Ok(0) if !data.is_empty() => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(e) if is_disconnect(e.kind()) => Err(TransportError::Disconnected),
            Err(e) => {
                debug!("LINK({}): write error: {}", self.medium, e);
                Err(TransportError::Io)
            }
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(e) if is_transient(e.kind()) => Ok(()),
            Err(_) => Err(TransportError::Io),
        }
    }

    fn medium(&self) -> Medium {
        self.medium
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut)
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
    )
}

// ── Ethernet listener ────────────────────────────────────────

/// Non-blocking TCP listener handing out Ethernet links.
pub struct EthernetListener {
    listener: TcpListener,
}

impl EthernetListener {
    /// Bind `addr`. Pass port 0 to let the OS choose (see
    /// [`local_addr`](Self::local_addr)).
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|_| TransportError::Io)?;
        listener.set_nonblocking(true).map_err(|_| TransportError::Io)?;
        info!("ETH: listening on {}", addr);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(|_| TransportError::Io)
    }

    /// Poll for one pending connection. `Ok(None)` when nobody is waiting.
    pub fn poll(&self) -> Result<Option<(StreamLink<TcpStream>, SocketAddr)>, TransportError> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some((StreamLink::ethernet(stream)?, addr))),
            Err(e) if is_transient(e.kind()) => Ok(None),
            Err(e) => {
                warn!("ETH: accept error: {}", e);
                Err(TransportError::Io)
            }
        }
    }
}

// ── I2C link ─────────────────────────────────────────────────

/// Mailbox transport to one I2C peripheral.
pub struct I2cLink<I> {
    bus: I,
    address: u8,
}

impl<I: I2c> I2cLink<I> {
    pub fn new(bus: I, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn release(self) -> I {
        self.bus
    }
}

impl<I: I2c> Transport for I2cLink<I> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut pending = [0u8; 1];
        self.bus
            .write_read(self.address, &[CMD_PENDING], &mut pending)
            .map_err(|e| bus_error("I2C", &e))?;

        let n = (pending[0] as usize).min(MAILBOX_LEN).min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.bus
            .write_read(self.address, &[CMD_READ, n as u8], &mut buf[..n])
            .map_err(|e| bus_error("I2C", &e))?;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = data.len().min(MAILBOX_LEN);
        let mut out: heapless::Vec<u8, { MAILBOX_LEN + 1 }> = heapless::Vec::new();
        // 1 + n <= MAILBOX_LEN + 1
        let _ = out.push(CMD_WRITE);
        let _ = out.extend_from_slice(&data[..n]);
        self.bus
            .write(self.address, &out)
            .map_err(|e| bus_error("I2C", &e))?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn medium(&self) -> Medium {
        Medium::I2c
    }
}

// ── SPI link ─────────────────────────────────────────────────

/// Mailbox transport to one SPI peripheral. Chip select is owned by the
/// `SpiDevice`.
pub struct SpiLink<S> {
    device: S,
}

impl<S: SpiDevice> SpiLink<S> {
    pub fn new(device: S) -> Self {
        Self { device }
    }

    pub fn release(self) -> S {
        self.device
    }
}

impl<S: SpiDevice> Transport for SpiLink<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut pending = [0u8; 1];
        self.device
            .transaction(&mut [Operation::Write(&[CMD_PENDING]), Operation::Read(&mut pending)])
            .map_err(|e| bus_error("SPI", &e))?;

        let n = (pending[0] as usize).min(MAILBOX_LEN).min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.device
            .transaction(&mut [Operation::Write(&[CMD_READ, n as u8]), Operation::Read(&mut buf[..n])])
            .map_err(|e| bus_error("SPI", &e))?;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = data.len().min(MAILBOX_LEN);
        self.device
            .transaction(&mut [Operation::Write(&[CMD_WRITE]), Operation::Write(&data[..n])])
            .map_err(|e| bus_error("SPI", &e))?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn medium(&self) -> Medium {
        Medium::Spi
    }
}

fn bus_error(bus: &str, e: &impl core::fmt::Debug) -> TransportError {
    debug!("LINK({}): bus error: {:?}", bus, e);
    TransportError::Bus
}
