//! Transport arbiter — owns every client's transport handle.
//!
//! Each client slot binds one [`Transport`] to one medium for its whole
//! life. The arbiter strips and adds the length-prefix framing, so the
//! engine above it only ever sees whole compound frames.
//!
//! ```text
//!   EthernetListener ──accept──┐
//!   serial / I2C / SPI ─attach─┤
//!                              ▼
//!   ┌──────────────────────────────────────────┐
//!   │ slots[0..MAX_CLIENTS]                    │
//!   │   link · FrameDecoder · rx buffer · peer │
//!   └──────────────────────────────────────────┘
//!          receive() ──▶ (client, frame)
//!          send(client, payload) ◀──
//! ```
//!
//! A transport error tears down that slot only; every other client keeps
//! running.

use std::net::SocketAddr;

use log::{debug, info, warn};

use super::client::{ClientId, ClientInfo, MAX_CLIENTS, Medium, PeerAddr};
use super::codec::{FrameDecoder, InboundFrame, LENGTH_PREFIX, MAX_FRAME_SIZE, encode_frame};
use super::engine::FrameLink;
use super::transport::{EthernetListener, Transport};
use crate::error::TransportError;

const RX_BUF_SIZE: usize = 512;

/// Reads attempted per slot in one `receive` pass.
const MAX_READS_PER_PASS: usize = 4;

/// Outbound bytes a slot may hold while its link is not accepting them.
const TX_BUF_SIZE: usize = 4 * (LENGTH_PREFIX + MAX_FRAME_SIZE);

/// Consecutive write attempts without progress tolerated before a client
/// is declared stalled. Attempts happen on `send` and once per
/// [`flush_pending`](TransportArbiter::flush_pending) pass; none of them
/// wait.
const WRITE_STALL_LIMIT: u32 = 64;

/// Why [`TransportArbiter::receive`] produced no frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// No client has a complete frame right now.
    WouldBlock,
    /// A client's transport failed; the slot has been torn down.
    Transport { client: ClientId, error: TransportError },
}

struct ClientSlot {
    link: Box<dyn Transport>,
    medium: Medium,
    peer: PeerAddr,
    decoder: FrameDecoder,
    rx: [u8; RX_BUF_SIZE],
    rx_start: usize,
    rx_end: usize,
    tx: [u8; TX_BUF_SIZE],
    tx_start: usize,
    tx_end: usize,
    stalls: u32,
}

impl ClientSlot {
    fn new(link: Box<dyn Transport>, peer: PeerAddr) -> Self {
        Self {
            medium: link.medium(),
            link,
            peer,
            decoder: FrameDecoder::new(),
            rx: [0; RX_BUF_SIZE],
            rx_start: 0,
            rx_end: 0,
            tx: [0; TX_BUF_SIZE],
            tx_start: 0,
            tx_end: 0,
            stalls: 0,
        }
    }

    /// Next complete frame from buffered bytes, reading the link when the
    /// buffer runs dry. `Ok(None)` when the link has nothing more for now.
    fn next_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        for _ in 0..=MAX_READS_PER_PASS {
            if self.rx_start < self.rx_end {
                let (used, frame) = self.decoder.feed(&self.rx[self.rx_start..self.rx_end]);
                let frame = frame.and_then(|f| InboundFrame::from_slice(f).ok());
                self.rx_start += used;
                if frame.is_some() {
                    return Ok(frame);
                }
            }
            let n = self.link.read(&mut self.rx)?;
            if n == 0 {
                return Ok(None);
            }
            self.rx_start = 0;
            self.rx_end = n;
        }
        Ok(None)
    }

    fn backlog(&self) -> usize {
        self.tx_end - self.tx_start
    }

    /// Append one framed message behind anything still unsent.
    fn enqueue(&mut self, wire: &[u8]) -> Result<(), TransportError> {
        if self.backlog() + wire.len() > TX_BUF_SIZE {
            return Err(TransportError::WriteStalled);
        }
        if self.tx_end + wire.len() > TX_BUF_SIZE {
            self.tx.copy_within(self.tx_start..self.tx_end, 0);
            self.tx_end -= self.tx_start;
            self.tx_start = 0;
        }
        self.tx[self.tx_end..self.tx_end + wire.len()].copy_from_slice(wire);
        self.tx_end += wire.len();
        Ok(())
    }

    /// Write as much of the backlog as the link takes right now.
    fn drain(&mut self) -> Result<(), TransportError> {
        if self.backlog() == 0 {
            return Ok(());
        }
        let before = self.tx_start;
        while self.tx_start < self.tx_end {
            match self.link.write(&self.tx[self.tx_start..self.tx_end])? {
                0 => break,
                n => self.tx_start += n,
            }
        }
        if self.tx_start == before {
            self.stalls += 1;
            if self.stalls > WRITE_STALL_LIMIT {
                return Err(TransportError::WriteStalled);
            }
            return Ok(());
        }
        self.stalls = 0;
        if self.tx_start == self.tx_end {
            self.tx_start = 0;
            self.tx_end = 0;
            self.link.flush()?;
        }
        Ok(())
    }

    fn info(&self, id: ClientId) -> ClientInfo {
        ClientInfo {
            id,
            medium: self.medium,
            peer: self.peer,
        }
    }
}

pub struct TransportArbiter {
    slots: [Option<ClientSlot>; MAX_CLIENTS],
    listener: Option<EthernetListener>,
    cursor: usize,
}

impl Default for TransportArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportArbiter {
    /// Arbiter without an Ethernet listener; clients arrive via
    /// [`attach`](Self::attach) only.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            listener: None,
            cursor: 0,
        }
    }

    pub fn with_listener(listener: EthernetListener) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new()
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Poll the Ethernet listener once. A connection that finds every slot
    /// taken is closed immediately.
    pub fn accept(&mut self) -> Option<ClientInfo> {
        let polled = self.listener.as_ref()?.poll();
        match polled {
            Ok(Some((link, addr))) => match self.attach(Box::new(link), PeerAddr::Socket(addr)) {
                Ok(id) => self.client(id),
                Err(e) => {
                    warn!("ARB: refusing {}: {}", addr, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("ARB: accept failed: {}", e);
                None
            }
        }
    }

    /// Bind a transport handle to the first free slot.
    pub fn attach(&mut self, link: Box<dyn Transport>, peer: PeerAddr) -> Result<ClientId, TransportError> {
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TransportError::NoFreeSlot)?;
        let slot = ClientSlot::new(link, peer);
        info!("ARB[{}]: {} client attached ({})", idx, slot.medium, peer);
        self.slots[idx] = Some(slot);
        Ok(idx as ClientId)
    }

    /// Next complete frame from any client, visiting slots round-robin.
    pub fn receive(&mut self) -> Result<(ClientId, InboundFrame), ReceiveError> {
        for step in 0..MAX_CLIENTS {
            let idx = (self.cursor + step) % MAX_CLIENTS;
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };
            match slot.next_frame() {
                Ok(Some(frame)) => {
                    self.cursor = (idx + 1) % MAX_CLIENTS;
                    return Ok((idx as ClientId, frame));
                }
                Ok(None) => {}
                Err(error) => {
                    let client = idx as ClientId;
                    self.teardown(client, error);
                    self.cursor = (idx + 1) % MAX_CLIENTS;
                    return Err(ReceiveError::Transport { client, error });
                }
            }
        }
        Err(ReceiveError::WouldBlock)
    }

    /// Length-prefix `payload` and queue it for `client`, writing what the
    /// link accepts without waiting. The rest goes out on later
    /// [`flush_pending`](Self::flush_pending) passes, in order. On a
    /// transport failure, backlog overflow or stall the slot is torn down
    /// before the error is returned.
    pub fn send(&mut self, client: ClientId, payload: &[u8]) -> Result<(), TransportError> {
        let slot = self
            .slots
            .get_mut(client as usize)
            .and_then(Option::as_mut)
            .ok_or(TransportError::NotConnected)?;

        let mut wire = [0u8; LENGTH_PREFIX + MAX_FRAME_SIZE];
        let n = encode_frame(payload, &mut wire).ok_or(TransportError::FrameTooLarge)?;

        if let Err(e) = slot.enqueue(&wire[..n]).and_then(|()| slot.drain()) {
            self.teardown(client, e);
            return Err(e);
        }
        debug!("ARB[{}]: queued {} bytes ({} pending)", client, n, slot.backlog());
        Ok(())
    }

    /// Retry every slot's unsent backlog once. Returns the clients torn
    /// down because their link failed or stalled.
    pub fn flush_pending(&mut self) -> heapless::Vec<(ClientId, TransportError), MAX_CLIENTS> {
        let mut dropped = heapless::Vec::new();
        for idx in 0..MAX_CLIENTS {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };
            if let Err(error) = slot.drain() {
                let client = idx as ClientId;
                self.teardown(client, error);
                let _ = dropped.push((client, error));
            }
        }
        dropped
    }

    /// Bytes queued for `client` but not yet accepted by its link.
    pub fn pending_bytes(&self, client: ClientId) -> usize {
        self.slots
            .get(client as usize)
            .and_then(Option::as_ref)
            .map_or(0, ClientSlot::backlog)
    }

    /// Copy of a slot's identity, if it is occupied.
    pub fn client(&self, id: ClientId) -> Option<ClientInfo> {
        self.slots.get(id as usize)?.as_ref().map(|s| s.info(id))
    }

    pub fn clients(&self) -> impl Iterator<Item = ClientInfo> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| s.info(i as ClientId)))
    }

    pub fn connected(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Close a client. Returns false if the slot was already empty.
    pub fn disconnect(&mut self, client: ClientId) -> bool {
        match self.slots.get_mut(client as usize).and_then(Option::take) {
            Some(slot) => {
                info!("ARB[{}]: {} client disconnected", client, slot.medium);
                true
            }
            None => false,
        }
    }

    fn teardown(&mut self, client: ClientId, error: TransportError) {
        if let Some(slot) = self.slots.get_mut(client as usize).and_then(Option::take) {
            warn!("ARB[{}]: {} client dropped: {}", client, slot.medium, error);
        }
    }
}

impl FrameLink for TransportArbiter {
    fn send(&mut self, client: ClientId, payload: &[u8]) -> Result<(), TransportError> {
        TransportArbiter::send(self, client, payload)
    }
}
