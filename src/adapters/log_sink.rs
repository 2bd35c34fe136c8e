//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing communication events to the logger
//! (UART on target, stderr on host). Fault events are also recorded as the
//! diagnostics last error when a [`ReportSystem`] is attached.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::events::ComEvent;
use crate::app::ports::EventSink;
use crate::com::compound::ErrorCode;
use crate::diagnostics::ReportSystem;
use crate::error::DecodeError;

/// Adapter that logs every [`ComEvent`].
#[derive(Default)]
pub struct LogEventSink {
    report: Option<Arc<ReportSystem>>,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward fault events to `report` as well.
    pub fn with_report(report: Arc<ReportSystem>) -> Self {
        Self {
            report: Some(report),
        }
    }

    fn error_code(event: &ComEvent) -> ErrorCode {
        match event {
            ComEvent::ProtocolError { error, .. } => match error {
                DecodeError::UnknownCompoundKind(_) => ErrorCode::WrongParameterId,
                DecodeError::TruncatedCompound { .. } => ErrorCode::WrongCommandLength,
                DecodeError::IndexOutOfRange { .. } => ErrorCode::WrongParameterIndex,
            },
            ComEvent::RequestRejected { code, .. } => *code,
            _ => ErrorCode::CommunicationError,
        }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ComEvent) {
        match event {
            ComEvent::ClientConnected { client, medium } => {
                info!("COM[{}] | connected via {}", client, medium);
            }
            ComEvent::ClientDropped { client, error } => {
                info!("COM[{}] | dropped: {}", client, error);
            }
            ComEvent::ProtocolError { client, error } => {
                warn!("COM[{}] | frame dropped: {}", client, error);
            }
            ComEvent::RequestRejected {
                client,
                endpoint,
                code,
            } => {
                info!("COM[{}] | NACK {} -> {}", client, endpoint, code);
            }
            ComEvent::ParameterChanged {
                client,
                endpoint,
                kind,
                index,
            } => {
                debug!("COM[{}] | set {}/{:?}/{}", client, endpoint, kind, index);
            }
        }

        if !event.is_error() {
            return;
        }
        if let Some(report) = &self.report {
            let message = match event {
                ComEvent::ClientDropped { client, error } => format!("client {} dropped: {}", client, error),
                ComEvent::ProtocolError { client, error } => format!("client {}: {}", client, error),
                _ => format!("{:?}", event),
            };
            report.report_error(Self::error_code(event) as u16, &message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsStorage;
    use crate::adapters::time::SystemClock;
    use crate::com::client::Medium;
    use crate::com::compound::CompoundKind;
    use crate::com::endpoint::EndpointId;
    use crate::config::ReportConfig;
    use crate::error::TransportError;

    fn sink() -> (LogEventSink, Arc<ReportSystem>) {
        let report = Arc::new(ReportSystem::new(
            Arc::new(SystemClock::new()),
            ReportConfig::default(),
            Box::new(NvsStorage::new().unwrap()),
        ));
        (LogEventSink::with_report(report.clone()), report)
    }

    #[test]
    fn routine_events_leave_no_error() {
        let (mut sink, report) = sink();
        sink.emit(&ComEvent::ClientConnected {
            client: 0,
            medium: Medium::Ethernet,
        });
        sink.emit(&ComEvent::ParameterChanged {
            client: 0,
            endpoint: EndpointId::FLYBACK,
            kind: CompoundKind::Drive,
            index: 0,
        });
        sink.emit(&ComEvent::RequestRejected {
            client: 0,
            endpoint: EndpointId(0x42),
            code: ErrorCode::EndpointNotFound,
        });
        sink.emit(&ComEvent::ClientDropped {
            client: 0,
            error: TransportError::Disconnected,
        });
        assert_eq!(report.last_error(), None);
    }

    #[test]
    fn decode_errors_are_recorded() {
        let (mut sink, report) = sink();
        sink.emit(&ComEvent::ProtocolError {
            client: 3,
            error: DecodeError::TruncatedCompound { expected: 6, actual: 2 },
        });
        let last = report.last_error().unwrap();
        assert_eq!(last.code, ErrorCode::WrongCommandLength as u16);
        assert!(last.message.starts_with("client 3: truncated compound"));
    }

    #[test]
    fn transport_faults_are_recorded() {
        let (mut sink, report) = sink();
        sink.emit(&ComEvent::ClientDropped {
            client: 1,
            error: TransportError::WriteStalled,
        });
        let last = report.last_error().unwrap();
        assert_eq!(last.code, ErrorCode::CommunicationError as u16);
        assert_eq!(last.message.as_str(), "client 1 dropped: write stalled");
    }

    #[test]
    fn sink_without_report_only_logs() {
        let mut sink = LogEventSink::new();
        sink.emit(&ComEvent::ProtocolError {
            client: 0,
            error: DecodeError::UnknownCompoundKind(4),
        });
    }
}
