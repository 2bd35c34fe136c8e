//! Outbound communication events.
//!
//! The [`ComService`](crate::com::service::ComService) and the
//! [`ProtocolEngine`](crate::com::engine::ProtocolEngine) emit these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters decide where
//! they go: the serial log, the diagnostics last-error record, a test
//! recorder.

use crate::com::client::{ClientId, Medium};
use crate::com::compound::{CompoundKind, ErrorCode};
use crate::com::endpoint::EndpointId;
use crate::error::{DecodeError, TransportError};

/// Structured events emitted by the communication core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComEvent {
    /// A client was accepted or attached.
    ClientConnected { client: ClientId, medium: Medium },

    /// A client was torn down after a transport failure or disconnect.
    ClientDropped {
        client: ClientId,
        error: TransportError,
    },

    /// A malformed frame was dropped without a reply.
    ProtocolError { client: ClientId, error: DecodeError },

    /// A request was answered with a NACK.
    RequestRejected {
        client: ClientId,
        endpoint: EndpointId,
        code: ErrorCode,
    },

    /// A parameter was written by a client.
    ParameterChanged {
        client: ClientId,
        endpoint: EndpointId,
        kind: CompoundKind,
        index: u8,
    },
}

impl ComEvent {
    /// Whether this event describes a fault worth recording. An orderly
    /// peer disconnect is not one.
    pub fn is_error(&self) -> bool {
        match self {
            Self::ClientDropped { error, .. } => *error != TransportError::Disconnected,
            Self::ProtocolError { .. } => true,
            _ => false,
        }
    }
}
