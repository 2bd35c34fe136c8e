//! Wire codecs.
//!
//! Two layers:
//!
//! 1. **Transport framing** ([`FrameDecoder`], [`encode_frame`]) — every
//!    message on a byte-stream medium is length-prefixed:
//!
//! ```text
//! ┌────────────┬────────────────────────────┐
//! │ Length (4B)│ Compound frame (N B)       │
//! │ LE u32     │                            │
//! └────────────┴────────────────────────────┘
//! ```
//!
//! 2. **Compound frames** ([`CompoundCodec`]) — the payload of one transport
//!    frame:
//!
//! ```text
//! request: │ endpoint │ service │ kind │ index │ payload (4/6/12 B)           │
//! reply:   │ endpoint │ service │ kind │ index │ status │ payload | len reason │
//! ```
//!
//! The compound codec is pure: no I/O, no state carried between calls.

use super::compound::{
    Compound, CompoundFrame, CompoundKind, DecodedReply, ErrorCode, ParsedFrame, Reply, ReplyBody,
};
use super::endpoint::EndpointId;
use crate::config::CompoundLimits;
use crate::error::DecodeError;

/// Maximum transport frame payload (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 256;

/// Transport frame header size (4-byte little-endian length).
pub const LENGTH_PREFIX: usize = 4;

/// Compound frame header: endpoint, service, kind, index.
pub const HEADER_LEN: usize = 4;

/// Longest reason string carried by a NACK.
pub const MAX_REASON_LEN: usize = 48;

/// Buffer large enough for any encoded request or reply.
pub type FrameBuf = heapless::Vec<u8, 64>;

/// One inbound transport frame, before compound decoding.
pub type InboundFrame = heapless::Vec<u8, MAX_FRAME_SIZE>;

// ── Transport framing ────────────────────────────────────────

enum DecoderState {
    ReadingHeader { collected: usize },
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming length-prefix decoder. One per client slot.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; LENGTH_PREFIX],
    payload_buf: [u8; MAX_FRAME_SIZE],
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; LENGTH_PREFIX],
            payload_buf: [0; MAX_FRAME_SIZE],
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns how many bytes of `data` were consumed and, once a frame is
    /// complete, its payload. Consumption stops right after a completed
    /// frame so that the caller can feed the remainder on the next call;
    /// otherwise all of `data` is consumed.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<&[u8]>) {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let to_copy = (LENGTH_PREFIX - *collected).min(data.len() - offset);
                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == LENGTH_PREFIX {
                        let expected = u32::from_le_bytes(self.header_buf) as usize;
                        self.state = if expected == 0 || expected > MAX_FRAME_SIZE {
                            log::debug!("FRAME: discarding bad length prefix {}", expected);
                            DecoderState::ReadingHeader { collected: 0 }
                        } else {
                            DecoderState::ReadingPayload {
                                expected,
                                collected: 0,
                            }
                        };
                    }
                }

                DecoderState::ReadingPayload { expected, collected } => {
                    let to_copy = (*expected - *collected).min(data.len() - offset);
                    self.payload_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let len = *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        return (offset, Some(&self.payload_buf[..len]));
                    }
                }
            }
        }

        (offset, None)
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }
}

/// Write `[LE-u32 length][payload]` into `out_buf`.
/// Returns the total number of bytes written.
pub fn encode_frame(payload: &[u8], out_buf: &mut [u8]) -> Option<usize> {
    let total = LENGTH_PREFIX + payload.len();
    if payload.is_empty() || total > out_buf.len() || payload.len() > MAX_FRAME_SIZE {
        return None;
    }

    out_buf[..LENGTH_PREFIX].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out_buf[LENGTH_PREFIX..total].copy_from_slice(payload);
    Some(total)
}

// ── Compound codec ───────────────────────────────────────────

/// Decoder/encoder for compound frames. Holds only the per-kind index
/// bounds, so it is freely copyable.
#[derive(Debug, Clone, Copy)]
pub struct CompoundCodec {
    limits: CompoundLimits,
}

impl CompoundCodec {
    pub fn new(limits: CompoundLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &CompoundLimits {
        &self.limits
    }

    /// Raw decode: validate the frame and return the wire representation.
    pub fn get_compound(&self, bytes: &[u8]) -> Result<CompoundFrame, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedCompound {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let kind = CompoundKind::from_tag(bytes[2]).ok_or(DecodeError::UnknownCompoundKind(bytes[2]))?;

        let expected = HEADER_LEN + kind.payload_len();
        if bytes.len() != expected {
            return Err(DecodeError::TruncatedCompound {
                expected,
                actual: bytes.len(),
            });
        }

        let index = bytes[3];
        let bound = self.limits.bound(kind);
        if index >= bound {
            return Err(DecodeError::IndexOutOfRange { kind, index, bound });
        }

        Ok(CompoundFrame {
            endpoint: EndpointId(bytes[0]),
            service: bytes[1],
            index,
            compound: Compound::read_payload(kind, &bytes[HEADER_LEN..]),
        })
    }

    /// Parsed decode: raw decode followed by unit conversion and enum
    /// mapping. Nothing is cached between calls.
    pub fn get_parsed_compound(&self, bytes: &[u8]) -> Result<ParsedFrame, DecodeError> {
        let raw = self.get_compound(bytes)?;
        Ok(ParsedFrame {
            endpoint: raw.endpoint.0,
            service: raw.service,
            index: raw.index,
            compound: raw.compound.parse(),
        })
    }

    /// Encode a request frame. Inverse of [`get_compound`](Self::get_compound).
    pub fn encode(&self, frame: &CompoundFrame) -> FrameBuf {
        let mut out = FrameBuf::new();
        // 4 + 12 bytes at most; always fits.
        let _ = out.extend_from_slice(&[frame.endpoint.0, frame.service, frame.kind().tag(), frame.index]);
        let _ = frame.compound.write_payload(&mut out);
        out
    }

    /// Encode an outbound reply. Over-long NACK reasons are truncated.
    pub fn encode_reply(&self, reply: &Reply) -> FrameBuf {
        let mut out = FrameBuf::new();
        let _ = out.extend_from_slice(&[
            reply.endpoint.0,
            reply.service,
            reply.kind,
            reply.index,
            reply.status() as u8,
        ]);
        match reply.body {
            ReplyBody::Value(value) => {
                let _ = value.write_payload(&mut out);
            }
            ReplyBody::Nack { reason, .. } => {
                let reason = &reason.as_bytes()[..reason.len().min(MAX_REASON_LEN)];
                let _ = out.push(reason.len() as u8);
                let _ = out.extend_from_slice(reason);
            }
        }
        out
    }

    /// Decode a reply, as a client would.
    pub fn decode_reply(&self, bytes: &[u8]) -> Result<DecodedReply, DecodeError> {
        const REPLY_HEADER: usize = HEADER_LEN + 1;
        if bytes.len() < REPLY_HEADER {
            return Err(DecodeError::TruncatedCompound {
                expected: REPLY_HEADER,
                actual: bytes.len(),
            });
        }
        let mut reply = DecodedReply {
            endpoint: EndpointId(bytes[0]),
            service: bytes[1],
            kind: bytes[2],
            index: bytes[3],
            status: bytes[4],
            value: None,
            reason: heapless::String::new(),
        };
        let body = &bytes[REPLY_HEADER..];

        if reply.status == ErrorCode::NoError as u8 {
            let kind = CompoundKind::from_tag(reply.kind).ok_or(DecodeError::UnknownCompoundKind(reply.kind))?;
            if body.len() != kind.payload_len() {
                return Err(DecodeError::TruncatedCompound {
                    expected: REPLY_HEADER + kind.payload_len(),
                    actual: bytes.len(),
                });
            }
            reply.value = Some(Compound::read_payload(kind, body));
        } else {
            let len = body.first().copied().unwrap_or(0) as usize;
            if body.len() != 1 + len || len > MAX_REASON_LEN {
                return Err(DecodeError::TruncatedCompound {
                    expected: REPLY_HEADER + 1 + len,
                    actual: bytes.len(),
                });
            }
            for &b in &body[1..] {
                let _ = reply.reason.push(if b.is_ascii() { b as char } else { '?' });
            }
        }
        Ok(reply)
    }
}
