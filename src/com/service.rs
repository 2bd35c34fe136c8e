//! Communication service — arbiter, engine and event sink behind one
//! facade.
//!
//! The I/O loop drives it in three steps: accept new clients, service
//! inbound frames, flush unsolicited updates. Every client lifecycle
//! change reaches both the arbiter and the engine, so a slot and its
//! protocol state always come and go together.

use std::sync::Arc;

use log::info;
use serde_json::Value;

use super::arbiter::{ReceiveError, TransportArbiter};
use super::client::{ClientId, ClientInfo, PeerAddr};
use super::engine::{Outcome, ProtocolEngine};
use super::transport::Transport;
use crate::adapters::json;
use crate::adapters::time::SystemClock;
use crate::app::events::ComEvent;
use crate::app::ports::EventSink;
use crate::diagnostics::ReportSystem;
use crate::error::{QueryError, RoutingError, TransportError};

pub struct ComService<S: EventSink> {
    arbiter: TransportArbiter,
    engine: ProtocolEngine,
    sink: S,
    report: Option<Arc<ReportSystem>>,
    clock: Option<Arc<SystemClock>>,
}

impl<S: EventSink> ComService<S> {
    pub fn new(arbiter: TransportArbiter, engine: ProtocolEngine, sink: S) -> Self {
        Self {
            arbiter,
            engine,
            sink,
            report: None,
            clock: None,
        }
    }

    /// Attach the diagnostics report: enables report queries and CPU
    /// accounting in the I/O loop.
    pub fn with_report(mut self, report: Arc<ReportSystem>) -> Self {
        self.report = Some(report);
        self
    }

    /// Attach the wall clock: enables time queries.
    pub fn with_clock(mut self, clock: Arc<SystemClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn arbiter(&self) -> &TransportArbiter {
        &self.arbiter
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn report(&self) -> Option<&Arc<ReportSystem>> {
        self.report.as_ref()
    }

    /// Accept at most one pending Ethernet connection.
    pub fn poll_accept(&mut self) -> Option<ClientInfo> {
        let info = self.arbiter.accept()?;
        self.connected(info);
        Some(info)
    }

    /// Bind a serial, I2C or SPI handle to a free client slot.
    pub fn attach(&mut self, link: Box<dyn Transport>, peer: PeerAddr) -> Result<ClientId, TransportError> {
        let id = self.arbiter.attach(link, peer)?;
        if let Some(info) = self.arbiter.client(id) {
            self.connected(info);
        }
        Ok(id)
    }

    fn connected(&mut self, info: ClientInfo) {
        self.engine.on_connect(info.id);
        self.sink.emit(&ComEvent::ClientConnected {
            client: info.id,
            medium: info.medium,
        });
    }

    /// Retry unsent output once, then handle up to `budget` inbound
    /// frames. Returns the number of frames handled.
    pub fn service_inbound(&mut self, budget: usize) -> usize {
        self.retry_backlog();
        let mut handled = 0;
        while handled < budget {
            match self.arbiter.receive() {
                Ok((client, frame)) => {
                    let outcome = self
                        .engine
                        .handle_frame(&mut self.arbiter, &mut self.sink, client, &frame);
                    if let Outcome::Disconnected(error) = outcome {
                        info!("COM[{}]: gone after reply failure ({})", client, error);
                    }
                    handled += 1;
                }
                Err(ReceiveError::WouldBlock) => break,
                Err(ReceiveError::Transport { client, error }) => {
                    self.engine.on_disconnect(client);
                    self.sink.emit(&ComEvent::ClientDropped { client, error });
                }
            }
        }
        handled
    }

    /// Push pending parameter updates to flagged clients.
    pub fn flush_updates(&mut self) -> usize {
        self.retry_backlog();
        self.engine.flush_updates(&mut self.arbiter, &mut self.sink)
    }

    fn retry_backlog(&mut self) {
        for (client, error) in self.arbiter.flush_pending() {
            self.engine.on_disconnect(client);
            self.sink.emit(&ComEvent::ClientDropped { client, error });
        }
    }

    /// Close a client from this side.
    pub fn disconnect(&mut self, client: ClientId) -> bool {
        if !self.arbiter.disconnect(client) {
            return false;
        }
        self.engine.on_disconnect(client);
        self.sink.emit(&ComEvent::ClientDropped {
            client,
            error: TransportError::Disconnected,
        });
        true
    }

    /// Answer an out-of-band JSON query.
    ///
    /// | Body                                  | Result                        |
    /// |---------------------------------------|-------------------------------|
    /// | `{"endpoint": "vacuum"}` / `{"endpoint": 2}` | that endpoint's parameters |
    /// | `{"endpoint": "all"}`                 | every endpoint                |
    /// | `{"report": true, "stack": bool}`     | diagnostics report            |
    /// | `{"stats": true}`                     | engine counters               |
    /// | `{"time": "2024/05/01 12:00:00"}`     | sets the wall clock           |
    /// | `{"time": true}`                      | current wall clock            |
    pub fn query_json(&self, body: &str) -> Result<String, QueryError> {
        let parsed: Value = serde_json::from_str(body)
            .map_err(|_| QueryError::Routing(RoutingError::MalformedSelector))?;
        let store = self.engine.store();

        if parsed.get("report").is_some() {
            let report = self.report.as_ref().ok_or(QueryError::NoReport)?;
            let with_stack = parsed.get("stack").and_then(Value::as_bool).unwrap_or(false);
            return Ok(json::render_report(report, with_stack)?);
        }
        if let Some(time) = parsed.get("time") {
            let clock = self.clock.as_ref().ok_or(QueryError::NoClock)?;
            if let Some(text) = time.as_str() {
                clock.set_from_text(text)?;
            }
            return Ok(serde_json::to_string(&serde_json::json!({ "time": clock.now_text() }))?);
        }
        if parsed.get("stats").is_some() {
            return Ok(serde_json::to_string(&self.engine.stats())?);
        }
        if parsed.get("endpoint").and_then(Value::as_str) == Some("all") {
            return Ok(json::render_all(store)?);
        }
        let endpoint = store.registry().specific_from_json(body)?;
        Ok(json::render_endpoint(store, &endpoint)?)
    }
}
