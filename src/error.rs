//! Unified error types for the eSW communication firmware.
//!
//! Each subsystem owns a small `Copy` error enum; the top-level [`Error`]
//! wraps all of them so callers outside the protocol core can funnel every
//! failure through one type.
//!
//! The protocol engine maps these onto its reply policy:
//!
//! | Error              | Engine reaction                      |
//! |--------------------|--------------------------------------|
//! | [`DecodeError`]    | drop frame, log, no reply            |
//! | [`RoutingError`]   | NACK with `EndpointNotFound`         |
//! | [`StoreError`]     | NACK with the mapped status code     |
//! | [`TransportError`] | tear down that client only           |

use core::fmt;

use crate::com::compound::{CompoundKind, ErrorCode};
use crate::com::endpoint::EndpointId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An inbound frame could not be decoded into a compound.
    Decode(DecodeError),
    /// A frame addressed an endpoint that is not registered.
    Routing(RoutingError),
    /// A domain module refused a value.
    Validation(ValidationError),
    /// A parameter lookup or write failed.
    Store(StoreError),
    /// Endpoint or parameter registration failed at startup.
    Registration(RegistrationError),
    /// A transport handle failed.
    Transport(TransportError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Startup wiring failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Routing(e) => write!(f, "routing: {e}"),
            Self::Validation(e) => write!(f, "validation: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Registration(e) => write!(f, "registration: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

/// Malformed or out-of-range compound frame. Never answered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The kind tag is not one of the known compound kinds.
    UnknownCompoundKind(u8),
    /// The frame is shorter (or longer) than the fixed layout of its kind.
    TruncatedCompound { expected: usize, actual: usize },
    /// The instance index exceeds the configured bound for its kind.
    IndexOutOfRange {
        kind: CompoundKind,
        index: u8,
        bound: u8,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCompoundKind(tag) => write!(f, "unknown compound kind {tag}"),
            Self::TruncatedCompound { expected, actual } => {
                write!(f, "truncated compound: expected {expected} bytes, got {actual}")
            }
            Self::IndexOutOfRange { kind, index, bound } => {
                write!(f, "{kind:?} index {index} out of range (bound {bound})")
            }
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Routing errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    /// No endpoint is registered under this identifier.
    EndpointNotFound(EndpointId),
    /// A specific-endpoint selector named an endpoint that does not exist.
    UnknownName,
    /// A specific-endpoint JSON body could not be parsed.
    MalformedSelector,
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointNotFound(id) => write!(f, "endpoint {id} not found"),
            Self::UnknownName => write!(f, "unknown endpoint name"),
            Self::MalformedSelector => write!(f, "malformed endpoint selector"),
        }
    }
}

impl From<RoutingError> for Error {
    fn from(e: RoutingError) -> Self {
        Self::Routing(e)
    }
}

// ---------------------------------------------------------------------------
// Validation errors (domain rejections)
// ---------------------------------------------------------------------------

/// A domain module refused a value. The reason is surfaced verbatim in the
/// NACK reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub reason: &'static str,
}

impl ValidationError {
    pub const fn new(code: ErrorCode, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X}): {}", self.code.description(), self.code as u8, self.reason)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Parameter store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The handle does not belong to this store.
    UnknownEndpoint(EndpointId),
    /// No parameter of this kind is registered on the endpoint.
    ParameterNotFound { kind: CompoundKind },
    /// The kind is registered, but not at this index.
    IndexNotFound { kind: CompoundKind, index: u8 },
    /// The parameter has no setter.
    NotSettable,
    /// The domain setter refused the value.
    Rejected(ValidationError),
}

impl StoreError {
    /// Status code carried by the NACK reply for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownEndpoint(_) => ErrorCode::EndpointNotFound,
            Self::ParameterNotFound { .. } => ErrorCode::WrongParameterId,
            Self::IndexNotFound { .. } => ErrorCode::WrongParameterIndex,
            Self::NotSettable => ErrorCode::ParameterNotSettable,
            Self::Rejected(v) => v.code,
        }
    }

    /// Human-readable reason carried by the NACK reply.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownEndpoint(_) => "endpoint not registered",
            Self::ParameterNotFound { .. } => "parameter not registered",
            Self::IndexNotFound { .. } => "index not registered",
            Self::NotSettable => "parameter is read-only",
            Self::Rejected(v) => v.reason,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEndpoint(id) => write!(f, "endpoint {id} not in store"),
            Self::ParameterNotFound { kind } => write!(f, "no {kind:?} parameter"),
            Self::IndexNotFound { kind, index } => write!(f, "no {kind:?} parameter at index {index}"),
            Self::NotSettable => write!(f, "parameter not settable"),
            Self::Rejected(v) => write!(f, "rejected: {v}"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Registration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    /// An endpoint with this identifier already exists.
    DuplicateEndpoint(EndpointId),
    /// The registry has no room for another endpoint.
    RegistryFull,
    /// A parameter was registered for an endpoint the registry doesn't know.
    UnknownEndpoint(EndpointId),
    /// The (endpoint, kind, index) key is already taken.
    DuplicateParameter {
        endpoint: EndpointId,
        kind: CompoundKind,
        index: u8,
    },
    /// A setter was supplied for a read-only endpoint.
    ReadOnlyEndpoint(EndpointId),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateEndpoint(id) => write!(f, "endpoint {id} registered twice"),
            Self::RegistryFull => write!(f, "endpoint registry full"),
            Self::UnknownEndpoint(id) => write!(f, "endpoint {id} not registered"),
            Self::DuplicateParameter { endpoint, kind, index } => {
                write!(f, "parameter {endpoint}/{kind:?}/{index} registered twice")
            }
            Self::ReadOnlyEndpoint(id) => write!(f, "endpoint {id} is read-only"),
        }
    }
}

impl From<RegistrationError> for Error {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the connection.
    Disconnected,
    /// An operating-system I/O error on a socket or serial port.
    Io,
    /// An I2C or SPI bus transaction failed.
    Bus,
    /// The peer stopped draining its receive window.
    WriteStalled,
    /// The payload does not fit in one transport frame.
    FrameTooLarge,
    /// No client occupies this slot.
    NotConnected,
    /// Every client slot is in use.
    NoFreeSlot,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::Io => write!(f, "I/O error"),
            Self::Bus => write!(f, "bus transaction failed"),
            Self::WriteStalled => write!(f, "write stalled"),
            Self::FrameTooLarge => write!(f, "frame too large"),
            Self::NotConnected => write!(f, "client not connected"),
            Self::NoFreeSlot => write!(f, "no free client slot"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// JSON query errors
// ---------------------------------------------------------------------------

/// Failure of an out-of-band JSON query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// The query named no known endpoint, or could not be parsed.
    Routing(RoutingError),
    /// The diagnostics report is not attached to this service.
    NoReport,
    /// No clock is attached to this service.
    NoClock,
    /// The clock refused the supplied time.
    Time(ValidationError),
    /// The result could not be rendered.
    Encode,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing(e) => write!(f, "{e}"),
            Self::NoReport => write!(f, "no diagnostics report attached"),
            Self::NoClock => write!(f, "no clock attached"),
            Self::Time(e) => write!(f, "time rejected: {e}"),
            Self::Encode => write!(f, "JSON encoding failed"),
        }
    }
}

impl From<RoutingError> for QueryError {
    fn from(e: RoutingError) -> Self {
        Self::Routing(e)
    }
}

impl From<ValidationError> for QueryError {
    fn from(e: ValidationError) -> Self {
        Self::Time(e)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(_: serde_json::Error) -> Self {
        Self::Encode
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
