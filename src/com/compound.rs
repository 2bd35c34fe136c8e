//! Compound records — the typed parameter values exchanged on the wire.
//!
//! A compound is one of three fixed-layout records, selected by a kind tag:
//!
//! | Tag | Kind     | Payload | Fields                                          |
//! |-----|----------|---------|-------------------------------------------------|
//! | 1   | `Scalar` | 4 B     | `value_milli: i32`                              |
//! | 2   | `Drive`  | 6 B     | `duty_permille: u16`, `frequency_hz: u32`       |
//! | 3   | `Status` | 12 B    | `switch_state: u8`, `output: u8`, `code: u16`,  |
//! |     |          |         | `value_milli: i32`, `timestamp: u32`            |
//!
//! All multi-byte fields are little-endian. The raw structs mirror the wire
//! representation exactly; [`ParsedCompound`] is the engineering-unit view.

use core::fmt;

use serde::Serialize;

use super::endpoint::EndpointId;

// ── Kind tag ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum CompoundKind {
    Scalar = 1,
    Drive = 2,
    Status = 3,
}

impl CompoundKind {
    pub const ALL: [CompoundKind; 3] = [Self::Scalar, Self::Drive, Self::Status];

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Scalar),
            2 => Some(Self::Drive),
            3 => Some(Self::Status),
            _ => None,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Fixed payload length of this kind in bytes.
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Scalar => 4,
            Self::Drive => 6,
            Self::Status => 12,
        }
    }

    /// Zero-based position, for per-kind lookup tables.
    pub const fn slot(self) -> usize {
        self as usize - 1
    }
}

// ── Service codes ────────────────────────────────────────────

/// Request services. Single-parameter services only address `Scalar`
/// compounds; the compound services address any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Service {
    Set = 0x01,
    Get = 0x0B,
    SetCompound = 0x28,
    GetCompound = 0x29,
    SetGet = 0x30,
}

impl Service {
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Set | Self::SetCompound | Self::SetGet)
    }

    /// Whether the service may address a compound of `kind`.
    pub const fn accepts(self, kind: CompoundKind) -> bool {
        match self {
            Self::Set | Self::Get => matches!(kind, CompoundKind::Scalar),
            Self::SetCompound | Self::GetCompound | Self::SetGet => true,
        }
    }
}

impl TryFrom<u8> for Service {
    type Error = ErrorCode;

    fn try_from(code: u8) -> Result<Self, ErrorCode> {
        match code {
            0x01 => Ok(Self::Set),
            0x0B => Ok(Self::Get),
            0x28 => Ok(Self::SetCompound),
            0x29 => Ok(Self::GetCompound),
            0x30 => Ok(Self::SetGet),
            _ => Err(ErrorCode::UnknownService),
        }
    }
}

// ── Reply status codes ───────────────────────────────────────

/// Status byte of a reply frame. `NoError` marks a value reply; every other
/// code marks a NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    WrongCommandLength = 0x0C,
    ValueTooLow = 0x1C,
    ValueTooHigh = 0x1D,
    ResultingZeroAdjustOffset = 0x20,
    NoSensorEnabled = 0x21,
    WrongAccessMode = 0x50,
    Timeout = 0x51,
    NvMemoryNotReady = 0x6D,
    WrongParameterId = 0x6E,
    ParameterNotSettable = 0x70,
    ParameterNotReadable = 0x71,
    WrongParameterIndex = 0x73,
    WrongValueWithinRange = 0x76,
    NotAllowedInThisState = 0x78,
    SettingLock = 0x79,
    WrongService = 0x7A,
    ParameterNotActive = 0x7B,
    ParameterSystemError = 0x7C,
    CommunicationError = 0x7D,
    UnknownService = 0x7E,
    UnexpectedCharacter = 0x7F,
    NoAccessRights = 0x80,
    NoAdequateHardware = 0x81,
    WrongObjectState = 0x82,
    NoSlaveCommand = 0x84,
    EndpointNotFound = 0x85,
    CommandToMasterOnly = 0x87,
    OnlyGCommandAllowed = 0x88,
    NotSupported = 0x89,
    FunctionDisabled = 0xA0,
    AlreadyDone = 0xA1,
}

impl ErrorCode {
    const TABLE: [ErrorCode; 32] = [
        Self::NoError,
        Self::WrongCommandLength,
        Self::ValueTooLow,
        Self::ValueTooHigh,
        Self::ResultingZeroAdjustOffset,
        Self::NoSensorEnabled,
        Self::WrongAccessMode,
        Self::Timeout,
        Self::NvMemoryNotReady,
        Self::WrongParameterId,
        Self::ParameterNotSettable,
        Self::ParameterNotReadable,
        Self::WrongParameterIndex,
        Self::WrongValueWithinRange,
        Self::NotAllowedInThisState,
        Self::SettingLock,
        Self::WrongService,
        Self::ParameterNotActive,
        Self::ParameterSystemError,
        Self::CommunicationError,
        Self::UnknownService,
        Self::UnexpectedCharacter,
        Self::NoAccessRights,
        Self::NoAdequateHardware,
        Self::WrongObjectState,
        Self::NoSlaveCommand,
        Self::EndpointNotFound,
        Self::CommandToMasterOnly,
        Self::OnlyGCommandAllowed,
        Self::NotSupported,
        Self::FunctionDisabled,
        Self::AlreadyDone,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::TABLE.iter().copied().find(|c| *c as u8 == code)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::WrongCommandLength => "wrong command length",
            Self::ValueTooLow => "value too low",
            Self::ValueTooHigh => "value too high",
            Self::ResultingZeroAdjustOffset => "resulting zero adjust offset",
            Self::NoSensorEnabled => "no sensor enabled",
            Self::WrongAccessMode => "wrong access mode",
            Self::Timeout => "timeout",
            Self::NvMemoryNotReady => "NV memory not ready",
            Self::WrongParameterId => "wrong parameter ID",
            Self::ParameterNotSettable => "parameter not settable",
            Self::ParameterNotReadable => "parameter not readable",
            Self::WrongParameterIndex => "wrong parameter index",
            Self::WrongValueWithinRange => "wrong value within range",
            Self::NotAllowedInThisState => "not allowed in this state",
            Self::SettingLock => "setting lock",
            Self::WrongService => "wrong service",
            Self::ParameterNotActive => "parameter not active",
            Self::ParameterSystemError => "parameter system error",
            Self::CommunicationError => "communication error",
            Self::UnknownService => "unknown service",
            Self::UnexpectedCharacter => "unexpected character",
            Self::NoAccessRights => "no access rights",
            Self::NoAdequateHardware => "no adequate hardware",
            Self::WrongObjectState => "wrong object state",
            Self::NoSlaveCommand => "no slave command",
            Self::EndpointNotFound => "endpoint not found",
            Self::CommandToMasterOnly => "command to master only",
            Self::OnlyGCommandAllowed => "only get command allowed",
            Self::NotSupported => "not supported",
            Self::FunctionDisabled => "function disabled",
            Self::AlreadyDone => "already done",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} {}", *self as u8, self.description())
    }
}

// ── Switch state (enum-mapped field of `Status`) ─────────────

/// Position of a module's main switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SwitchState {
    Off = 0,
    Manual = 1,
    Remote = 2,
    Invalid = 3,
}

impl SwitchState {
    /// Any unknown raw value maps to `Invalid`.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Off,
            1 => Self::Manual,
            2 => Self::Remote,
            _ => Self::Invalid,
        }
    }
}

// ── Raw records ──────────────────────────────────────────────

/// One physical quantity in thousandths of its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scalar {
    pub value_milli: i32,
}

impl Scalar {
    pub fn from_value(value: f32) -> Self {
        Self {
            value_milli: (value * 1000.0).round() as i32,
        }
    }

    pub fn value(self) -> f32 {
        self.value_milli as f32 / 1000.0
    }
}

/// PWM drive setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drive {
    pub duty_permille: u16,
    pub frequency_hz: u32,
}

impl Drive {
    pub fn from_percent(duty_percent: f32, frequency_hz: u32) -> Self {
        Self {
            duty_permille: (duty_percent * 10.0).round().clamp(0.0, f32::from(u16::MAX)) as u16,
            frequency_hz,
        }
    }

    pub fn duty_percent(self) -> f32 {
        f32::from(self.duty_permille) / 10.0
    }
}

/// Module state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub switch_state: u8,
    pub output: u8,
    pub code: u16,
    pub value_milli: i32,
    pub timestamp: u32,
}

/// A compound value in its wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compound {
    Scalar(Scalar),
    Drive(Drive),
    Status(Status),
}

impl Compound {
    pub const fn kind(&self) -> CompoundKind {
        match self {
            Self::Scalar(_) => CompoundKind::Scalar,
            Self::Drive(_) => CompoundKind::Drive,
            Self::Status(_) => CompoundKind::Status,
        }
    }

    /// All-zero value of `kind`; carried by read requests.
    pub const fn zeroed(kind: CompoundKind) -> Self {
        match kind {
            CompoundKind::Scalar => Self::Scalar(Scalar { value_milli: 0 }),
            CompoundKind::Drive => Self::Drive(Drive {
                duty_permille: 0,
                frequency_hz: 0,
            }),
            CompoundKind::Status => Self::Status(Status {
                switch_state: 0,
                output: 0,
                code: 0,
                value_milli: 0,
                timestamp: 0,
            }),
        }
    }

    /// Read the payload of `kind`. `payload` must be exactly
    /// `kind.payload_len()` bytes; the codec checks this first.
    pub(crate) fn read_payload(kind: CompoundKind, payload: &[u8]) -> Self {
        let u16_at = |at: usize| u16::from_le_bytes([payload[at], payload[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };
        match kind {
            CompoundKind::Scalar => Self::Scalar(Scalar {
                value_milli: u32_at(0) as i32,
            }),
            CompoundKind::Drive => Self::Drive(Drive {
                duty_permille: u16_at(0),
                frequency_hz: u32_at(2),
            }),
            CompoundKind::Status => Self::Status(Status {
                switch_state: payload[0],
                output: payload[1],
                code: u16_at(2),
                value_milli: u32_at(4) as i32,
                timestamp: u32_at(8),
            }),
        }
    }

    /// Append the payload bytes to `out`. Returns `None` if `out` is full.
    pub(crate) fn write_payload<const N: usize>(&self, out: &mut heapless::Vec<u8, N>) -> Option<()> {
        match self {
            Self::Scalar(s) => out.extend_from_slice(&s.value_milli.to_le_bytes()).ok(),
            Self::Drive(d) => {
                out.extend_from_slice(&d.duty_permille.to_le_bytes()).ok()?;
                out.extend_from_slice(&d.frequency_hz.to_le_bytes()).ok()
            }
            Self::Status(s) => {
                out.extend_from_slice(&[s.switch_state, s.output]).ok()?;
                out.extend_from_slice(&s.code.to_le_bytes()).ok()?;
                out.extend_from_slice(&s.value_milli.to_le_bytes()).ok()?;
                out.extend_from_slice(&s.timestamp.to_le_bytes()).ok()
            }
        }
    }

    /// Engineering-unit view of this compound. Computed on every call.
    pub fn parse(&self) -> ParsedCompound {
        match *self {
            Self::Scalar(s) => ParsedCompound::Scalar { value: s.value() },
            Self::Drive(d) => ParsedCompound::Drive {
                duty_percent: d.duty_percent(),
                frequency_hz: d.frequency_hz,
            },
            Self::Status(s) => ParsedCompound::Status {
                switch_state: SwitchState::from_raw(s.switch_state),
                output_enabled: s.output != 0,
                code: s.code,
                value: s.value_milli as f32 / 1000.0,
                timestamp: s.timestamp,
            },
        }
    }
}

/// Parsed compound: unit-converted and enum-mapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedCompound {
    Scalar {
        value: f32,
    },
    Drive {
        duty_percent: f32,
        frequency_hz: u32,
    },
    Status {
        switch_state: SwitchState,
        output_enabled: bool,
        code: u16,
        value: f32,
        timestamp: u32,
    },
}

impl ParsedCompound {
    /// Flatten into a list of floats, field order as on the wire.
    pub fn values(&self) -> heapless::Vec<f32, 5> {
        let mut out = heapless::Vec::new();
        // Capacity matches the widest kind, so the pushes cannot fail.
        match *self {
            Self::Scalar { value } => {
                let _ = out.push(value);
            }
            Self::Drive {
                duty_percent,
                frequency_hz,
            } => {
                let _ = out.extend_from_slice(&[duty_percent, frequency_hz as f32]);
            }
            Self::Status {
                switch_state,
                output_enabled,
                code,
                value,
                timestamp,
            } => {
                let _ = out.extend_from_slice(&[
                    f32::from(switch_state as u8),
                    if output_enabled { 1.0 } else { 0.0 },
                    f32::from(code),
                    value,
                    timestamp as f32,
                ]);
            }
        }
        out
    }
}

// ── Frames ───────────────────────────────────────────────────

/// A decoded request: destination, service byte and addressed compound.
///
/// The service byte is kept raw so that unknown services still decode and
/// can be answered with a NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompoundFrame {
    pub endpoint: EndpointId,
    pub service: u8,
    pub index: u8,
    pub compound: Compound,
}

impl CompoundFrame {
    pub fn kind(&self) -> CompoundKind {
        self.compound.kind()
    }

    /// Read request for (`kind`, `index`) on `endpoint`.
    pub fn read(endpoint: EndpointId, service: Service, kind: CompoundKind, index: u8) -> Self {
        Self {
            endpoint,
            service: service as u8,
            index,
            compound: Compound::zeroed(kind),
        }
    }

    /// Write request carrying `compound` at `index` on `endpoint`.
    pub fn write(endpoint: EndpointId, service: Service, index: u8, compound: Compound) -> Self {
        Self {
            endpoint,
            service: service as u8,
            index,
            compound,
        }
    }
}

/// A request decoded through the parsed entry point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParsedFrame {
    pub endpoint: u8,
    pub service: u8,
    pub index: u8,
    pub compound: ParsedCompound,
}

/// Body of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyBody {
    /// Status `NoError` followed by the compound payload.
    Value(Compound),
    /// Error status followed by a length-prefixed ASCII reason.
    Nack { code: ErrorCode, reason: &'static str },
}

/// Outbound frame, mirroring the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub endpoint: EndpointId,
    pub service: u8,
    pub kind: u8,
    pub index: u8,
    pub body: ReplyBody,
}

impl Reply {
    pub fn value(request: &CompoundFrame, value: Compound) -> Self {
        Self {
            endpoint: request.endpoint,
            service: request.service,
            kind: value.kind().tag(),
            index: request.index,
            body: ReplyBody::Value(value),
        }
    }

    pub fn nack(request: &CompoundFrame, code: ErrorCode, reason: &'static str) -> Self {
        Self {
            endpoint: request.endpoint,
            service: request.service,
            kind: request.kind().tag(),
            index: request.index,
            body: ReplyBody::Nack { code, reason },
        }
    }

    pub fn status(&self) -> ErrorCode {
        match self.body {
            ReplyBody::Value(_) => ErrorCode::NoError,
            ReplyBody::Nack { code, .. } => code,
        }
    }
}

/// Reply as seen by a decoding peer; the reason is owned since it comes
/// off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReply {
    pub endpoint: EndpointId,
    pub service: u8,
    pub kind: u8,
    pub index: u8,
    pub status: u8,
    pub value: Option<Compound>,
    pub reason: heapless::String<48>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_and_lengths() {
        assert_eq!(CompoundKind::from_tag(2), Some(CompoundKind::Drive));
        assert_eq!(CompoundKind::from_tag(0), None);
        assert_eq!(CompoundKind::from_tag(4), None);
        assert_eq!(CompoundKind::Status.payload_len(), 12);
        assert_eq!(CompoundKind::Scalar.slot(), 0);
    }

    #[test]
    fn service_scope() {
        assert!(Service::Set.accepts(CompoundKind::Scalar));
        assert!(!Service::Get.accepts(CompoundKind::Drive));
        assert!(Service::SetCompound.accepts(CompoundKind::Drive));
        assert_eq!(Service::try_from(0x42), Err(ErrorCode::UnknownService));
        assert_eq!(Service::try_from(0x30), Ok(Service::SetGet));
    }

    #[test]
    fn error_code_lookup() {
        assert_eq!(ErrorCode::from_u8(0x1D), Some(ErrorCode::ValueTooHigh));
        assert_eq!(ErrorCode::from_u8(0x85), Some(ErrorCode::EndpointNotFound));
        assert_eq!(ErrorCode::from_u8(0x02), None);
        for code in ErrorCode::TABLE {
            assert_eq!(ErrorCode::from_u8(code as u8), Some(code));
        }
    }

    #[test]
    fn parse_converts_units() {
        let drive = Compound::Drive(Drive {
            duty_permille: 455,
            frequency_hz: 12_000,
        });
        let ParsedCompound::Drive {
            duty_percent,
            frequency_hz,
        } = drive.parse()
        else {
            panic!("expected drive");
        };
        assert!((duty_percent - 45.5).abs() < 1e-4);
        assert_eq!(frequency_hz, 12_000);
    }

    #[test]
    fn parse_maps_switch_state() {
        let status = Compound::Status(Status {
            switch_state: 9,
            output: 7,
            code: 3,
            value_milli: -1500,
            timestamp: 42,
        });
        match status.parse() {
            ParsedCompound::Status {
                switch_state,
                output_enabled,
                value,
                ..
            } => {
                assert_eq!(switch_state, SwitchState::Invalid);
                assert!(output_enabled);
                assert!((value + 1.5).abs() < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn values_flatten_in_wire_order() {
        let parsed = Compound::Scalar(Scalar::from_value(0.05)).parse();
        assert_eq!(parsed.values().len(), 1);
        let parsed = Compound::Status(Status {
            switch_state: 2,
            output: 1,
            ..Status::default()
        })
        .parse();
        assert_eq!(parsed.values().as_slice()[..2], [2.0, 1.0]);
    }

    #[test]
    fn drive_percent_conversion_clamps() {
        assert_eq!(Drive::from_percent(-3.0, 0).duty_permille, 0);
        assert_eq!(Drive::from_percent(50.04, 0).duty_permille, 500);
    }
}
