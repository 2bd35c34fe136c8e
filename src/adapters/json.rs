//! JSON rendering of parameters and diagnostics.
//!
//! Used by out-of-band queries only; the request/response path never
//! touches JSON.

use serde::Serialize;

use crate::com::compound::ParsedCompound;
use crate::com::endpoint::EndpointHandle;
use crate::com::store::ParameterStore;
use crate::diagnostics::{ReportSnapshot, ReportSystem};

#[derive(Debug, Serialize)]
pub struct ParameterView {
    pub index: u8,
    pub value: ParsedCompound,
}

/// One endpoint with every registered parameter, parsed.
#[derive(Debug, Serialize)]
pub struct EndpointView {
    pub id: u8,
    pub name: &'static str,
    pub read_only: bool,
    pub parameters: Vec<ParameterView>,
}

#[derive(Debug, Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub snapshot: ReportSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_dump: Option<String>,
}

/// Read every parameter of `endpoint` and collect the parsed values. Keys
/// whose getter fails are skipped.
pub fn endpoint_view(store: &ParameterStore, endpoint: &EndpointHandle) -> EndpointView {
    let parameters = store
        .keys(endpoint)
        .into_iter()
        .filter_map(|(kind, index)| {
            store.get(endpoint, kind, index).ok().map(|value| ParameterView {
                index,
                value: value.parse(),
            })
        })
        .collect();
    EndpointView {
        id: endpoint.id.0,
        name: endpoint.name,
        read_only: endpoint.read_only,
        parameters,
    }
}

pub fn render_endpoint(store: &ParameterStore, endpoint: &EndpointHandle) -> serde_json::Result<String> {
    serde_json::to_string(&endpoint_view(store, endpoint))
}

/// All endpoints, in registration order.
pub fn render_all(store: &ParameterStore) -> serde_json::Result<String> {
    let views: Vec<EndpointView> = store
        .registry()
        .iter()
        .map(|h| endpoint_view(store, &h))
        .collect();
    serde_json::to_string(&views)
}

pub fn render_report(report: &ReportSystem, with_stack: bool) -> serde_json::Result<String> {
    serde_json::to_string(&ReportView {
        snapshot: report.snapshot(),
        stack_dump: with_stack.then(|| report.stack_dump()),
    })
}
