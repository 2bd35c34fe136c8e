//! Endpoint registry — maps endpoint identifiers to internal handles.
//!
//! Two resolution modes share one table:
//!
//! - **requested** — the destination byte carried by an inbound frame;
//! - **specific** — an identifier supplied explicitly by a caller (for
//!   example a JSON query naming an endpoint).
//!
//! Endpoints are registered once at startup through [`RegistryBuilder`];
//! the built [`EndpointRegistry`] has no mutation API.

use core::fmt;

use serde_json::Value;

use super::compound::CompoundFrame;
use crate::error::{RegistrationError, RoutingError};

/// Maximum number of endpoints one registry can hold.
pub const MAX_ENDPOINTS: usize = 16;

/// Wire identifier of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u8);

impl EndpointId {
    pub const FLYBACK: Self = Self(0x01);
    pub const VACUUM: Self = Self(0x02);
    pub const TIME: Self = Self(0x03);
    /// Reserved, read-only diagnostic endpoint.
    pub const DIAGNOSTICS: Self = Self(0x0D);
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Static description of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub id: EndpointId,
    pub name: &'static str,
    pub read_only: bool,
}

impl EndpointDescriptor {
    pub const fn new(id: EndpointId, name: &'static str) -> Self {
        Self {
            id,
            name,
            read_only: false,
        }
    }

    pub const fn read_only(id: EndpointId, name: &'static str) -> Self {
        Self {
            id,
            name,
            read_only: true,
        }
    }
}

/// Resolved endpoint. `slot` indexes the per-endpoint tables of the
/// parameter store built from the same registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointHandle {
    pub id: EndpointId,
    pub name: &'static str,
    pub read_only: bool,
    pub(crate) slot: usize,
}

/// How an endpoint is being selected.
#[derive(Debug, Clone, Copy)]
pub enum EndpointSelector<'a> {
    /// Destination carried by an inbound frame.
    Requested(&'a CompoundFrame),
    /// Identifier supplied by the caller.
    Specific(EndpointId),
}

// ── Builder ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: heapless::Vec<EndpointDescriptor, MAX_ENDPOINTS>,
}

impl RegistryBuilder {
    pub fn register(&mut self, descriptor: EndpointDescriptor) -> Result<&mut Self, RegistrationError> {
        if self.entries.iter().any(|e| e.id == descriptor.id) {
            return Err(RegistrationError::DuplicateEndpoint(descriptor.id));
        }
        self.entries
            .push(descriptor)
            .map_err(|_| RegistrationError::RegistryFull)?;
        Ok(self)
    }

    pub fn build(self) -> EndpointRegistry {
        EndpointRegistry {
            entries: self.entries,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct EndpointRegistry {
    entries: heapless::Vec<EndpointDescriptor, MAX_ENDPOINTS>,
}

impl EndpointRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolve a selector. Both modes go through the same lookup.
    pub fn resolve(&self, selector: EndpointSelector<'_>) -> Result<EndpointHandle, RoutingError> {
        let id = match selector {
            EndpointSelector::Requested(frame) => frame.endpoint,
            EndpointSelector::Specific(id) => id,
        };
        self.lookup(id)
    }

    pub fn resolve_name(&self, name: &str) -> Result<EndpointHandle, RoutingError> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
            .ok_or(RoutingError::UnknownName)?;
        Ok(self.handle_at(slot))
    }

    /// Extract a specific endpoint from a JSON body such as
    /// `{"endpoint": "vacuum"}` or `{"endpoint": 2}`.
    pub fn specific_from_json(&self, body: &str) -> Result<EndpointHandle, RoutingError> {
        let body: Value = serde_json::from_str(body).map_err(|_| RoutingError::MalformedSelector)?;
        match body.get("endpoint") {
            Some(Value::Number(n)) => {
                let id = n
                    .as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(RoutingError::MalformedSelector)?;
                self.resolve(EndpointSelector::Specific(EndpointId(id)))
            }
            Some(Value::String(name)) => self.resolve_name(name),
            _ => Err(RoutingError::MalformedSelector),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EndpointHandle> + '_ {
        (0..self.entries.len()).map(|slot| self.handle_at(slot))
    }

    fn lookup(&self, id: EndpointId) -> Result<EndpointHandle, RoutingError> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(RoutingError::EndpointNotFound(id))?;
        Ok(self.handle_at(slot))
    }

    fn handle_at(&self, slot: usize) -> EndpointHandle {
        let d = self.entries[slot];
        EndpointHandle {
            id: d.id,
            name: d.name,
            read_only: d.read_only,
            slot,
        }
    }
}
