//! Parameter store — the get/set surface over domain-owned parameters.
//!
//! The store never holds parameter values. Each (endpoint, kind, index) key
//! maps to a getter and an optional setter supplied by the owning domain
//! module at startup; range checks live in those setters.
//!
//! Locking: one `RwLock` per endpoint (concurrent gets, exclusive sets) and
//! one mutex over the client flag table. A set raises the SendDataFlag of
//! every subscribed client while it still holds the endpoint's write lock,
//! so no reader can observe the new value without the flag being raised.
//! Locks are always taken in the order endpoint → flags.
//!
//! Every raise is stamped from one change counter. Reads return the stamp
//! current at read time, and an acknowledgement only clears a pending
//! update raised at or before the stamp it carries, so a change that lands
//! between a read and its acknowledgement stays pending.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use log::{debug, warn};

use super::client::{ClientId, MAX_CLIENTS};
use super::compound::{Compound, CompoundKind};
use super::endpoint::{EndpointHandle, EndpointId, EndpointRegistry};
use crate::error::{RegistrationError, StoreError, ValidationError};

/// Pending-update capacity per client.
pub const MAX_PENDING: usize = 32;

pub type Getter = Box<dyn Fn() -> Compound + Send + Sync>;
pub type Setter = Box<dyn Fn(Compound) -> Result<(), ValidationError> + Send + Sync>;

/// Fully qualified parameter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub endpoint: EndpointId,
    pub kind: CompoundKind,
    pub index: u8,
}

/// Position in the store's change sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Stamp(u64);

impl Stamp {
    /// Acknowledges any raise, however recent.
    pub const LATEST: Self = Self(u64::MAX);
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    param: ParamRef,
    raised: Stamp,
}

struct Accessor {
    getter: Getter,
    setter: Option<Setter>,
}

struct EndpointSlot {
    lock: RwLock<()>,
    params: BTreeMap<(CompoundKind, u8), Accessor>,
}

#[derive(Default)]
struct ClientFlags {
    /// Bit `n` set = subscribed to the endpoint in registry slot `n`.
    subscriptions: u32,
    pending: heapless::Vec<Pending, MAX_PENDING>,
}

// ── Builder ──────────────────────────────────────────────────

/// Collects parameter registrations. Consumed by [`build`](Self::build);
/// the resulting store has no registration API.
pub struct StoreBuilder {
    registry: EndpointRegistry,
    slots: Vec<BTreeMap<(CompoundKind, u8), Accessor>>,
}

impl StoreBuilder {
    /// Register a parameter with a getter and optional setter.
    pub fn register<G, S>(
        &mut self,
        endpoint: EndpointId,
        kind: CompoundKind,
        index: u8,
        getter: G,
        setter: Option<S>,
    ) -> Result<&mut Self, RegistrationError>
    where
        G: Fn() -> Compound + Send + Sync + 'static,
        S: Fn(Compound) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        let setter = setter.map(|s| Box::new(s) as Setter);
        self.insert(endpoint, kind, index, Box::new(getter), setter)
    }

    /// Register a parameter without a setter.
    pub fn register_read_only<G>(
        &mut self,
        endpoint: EndpointId,
        kind: CompoundKind,
        index: u8,
        getter: G,
    ) -> Result<&mut Self, RegistrationError>
    where
        G: Fn() -> Compound + Send + Sync + 'static,
    {
        self.insert(endpoint, kind, index, Box::new(getter), None)
    }

    fn insert(
        &mut self,
        endpoint: EndpointId,
        kind: CompoundKind,
        index: u8,
        getter: Getter,
        setter: Option<Setter>,
    ) -> Result<&mut Self, RegistrationError> {
        let handle = self
            .registry
            .iter()
            .find(|h| h.id == endpoint)
            .ok_or(RegistrationError::UnknownEndpoint(endpoint))?;
        if handle.read_only && setter.is_some() {
            return Err(RegistrationError::ReadOnlyEndpoint(endpoint));
        }
        let params = &mut self.slots[handle.slot];
        if params.contains_key(&(kind, index)) {
            return Err(RegistrationError::DuplicateParameter { endpoint, kind, index });
        }
        params.insert((kind, index), Accessor { getter, setter });
        debug!("STORE: registered {}/{:?}/{}", endpoint, kind, index);
        Ok(self)
    }

    pub fn build(self) -> ParameterStore {
        ParameterStore {
            registry: self.registry,
            slots: self
                .slots
                .into_iter()
                .map(|params| EndpointSlot {
                    lock: RwLock::new(()),
                    params,
                })
                .collect(),
            flags: Mutex::new(core::array::from_fn(|_| ClientFlags::default())),
            changes: AtomicU64::new(0),
        }
    }
}

// ── Store ────────────────────────────────────────────────────

pub struct ParameterStore {
    registry: EndpointRegistry,
    slots: Vec<EndpointSlot>,
    flags: Mutex<[ClientFlags; MAX_CLIENTS]>,
    changes: AtomicU64,
}

impl ParameterStore {
    pub fn builder(registry: EndpointRegistry) -> StoreBuilder {
        let slots = (0..registry.len()).map(|_| BTreeMap::new()).collect();
        StoreBuilder { registry, slots }
    }

    /// The registry this store was built from; resolve endpoints here.
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Read the current value of a parameter.
    pub fn get(&self, endpoint: &EndpointHandle, kind: CompoundKind, index: u8) -> Result<Compound, StoreError> {
        self.get_stamped(endpoint, kind, index).map(|(value, _)| value)
    }

    /// Read a parameter together with the change stamp it reflects. Pass
    /// the stamp to [`acknowledge`](Self::acknowledge) once the value has
    /// reached the client.
    pub fn get_stamped(
        &self,
        endpoint: &EndpointHandle,
        kind: CompoundKind,
        index: u8,
    ) -> Result<(Compound, Stamp), StoreError> {
        let slot = self.slot(endpoint)?;
        let _guard = slot.lock.read().unwrap_or_else(PoisonError::into_inner);
        let accessor = Self::accessor(slot, kind, index)?;
        let value = (accessor.getter)();
        debug_assert_eq!(value.kind(), kind, "getter returned the wrong compound kind");
        Ok((value, Stamp(self.changes.load(Ordering::Acquire))))
    }

    /// Write a parameter through its domain setter. The key's kind is the
    /// kind of `value`.
    ///
    /// On success, every client subscribed to `endpoint` has its
    /// SendDataFlag raised before the endpoint lock is released. The
    /// returned stamp is the one the raise was recorded under.
    pub fn set(&self, endpoint: &EndpointHandle, index: u8, value: Compound) -> Result<Stamp, StoreError> {
        let kind = value.kind();
        let slot = self.slot(endpoint)?;
        let _guard = slot.lock.write().unwrap_or_else(PoisonError::into_inner);
        let accessor = Self::accessor(slot, kind, index)?;
        let setter = accessor.setter.as_ref().ok_or(StoreError::NotSettable)?;
        setter(value).map_err(StoreError::Rejected)?;
        Ok(self.raise_flags(endpoint, ParamRef {
            endpoint: endpoint.id,
            kind,
            index,
        }))
    }

    /// Raise flags for a change that originated inside a domain module.
    pub fn notify_changed(&self, endpoint: &EndpointHandle, kind: CompoundKind, index: u8) -> Result<(), StoreError> {
        let slot = self.slot(endpoint)?;
        let _guard = slot.lock.write().unwrap_or_else(PoisonError::into_inner);
        Self::accessor(slot, kind, index)?;
        self.raise_flags(endpoint, ParamRef {
            endpoint: endpoint.id,
            kind,
            index,
        });
        Ok(())
    }

    /// Registered (kind, index) keys of an endpoint, in order.
    pub fn keys(&self, endpoint: &EndpointHandle) -> Vec<(CompoundKind, u8)> {
        self.slot(endpoint)
            .map(|s| s.params.keys().copied().collect())
            .unwrap_or_default()
    }

    // ── Subscriptions and SendDataFlags ─────────────────────

    pub fn subscribe(&self, client: ClientId, endpoint: &EndpointHandle) {
        if let Some(flags) = self.flags().get_mut(client as usize) {
            flags.subscriptions |= 1 << endpoint.slot;
        }
    }

    pub fn is_subscribed(&self, client: ClientId, endpoint: &EndpointHandle) -> bool {
        self.flags()
            .get(client as usize)
            .is_some_and(|f| f.subscriptions & (1 << endpoint.slot) != 0)
    }

    /// Drop every subscription and pending update of a departed client.
    pub fn forget_client(&self, client: ClientId) {
        if let Some(flags) = self.flags().get_mut(client as usize) {
            *flags = ClientFlags::default();
        }
    }

    /// True while the client is owed at least one parameter update.
    pub fn send_data_flag(&self, client: ClientId) -> bool {
        self.flags()
            .get(client as usize)
            .is_some_and(|f| !f.pending.is_empty())
    }

    /// Snapshot of the client's pending updates. Nothing is cleared.
    pub fn pending_updates(&self, client: ClientId) -> heapless::Vec<ParamRef, MAX_PENDING> {
        self.flags()
            .get(client as usize)
            .map(|f| f.pending.iter().map(|p| p.param).collect())
            .unwrap_or_default()
    }

    /// Clear a pending update after a frame carrying the value read at
    /// `seen` was written. A raise newer than `seen` stays pending.
    pub fn acknowledge(&self, client: ClientId, param: ParamRef, seen: Stamp) {
        if let Some(flags) = self.flags().get_mut(client as usize) {
            flags.pending.retain(|p| p.param != param || p.raised > seen);
        }
    }

    // ── Internals ───────────────────────────────────────────

    fn slot(&self, endpoint: &EndpointHandle) -> Result<&EndpointSlot, StoreError> {
        self.slots
            .get(endpoint.slot)
            .filter(|_| self.registry.iter().nth(endpoint.slot).is_some_and(|h| h.id == endpoint.id))
            .ok_or(StoreError::UnknownEndpoint(endpoint.id))
    }

    fn accessor(slot: &EndpointSlot, kind: CompoundKind, index: u8) -> Result<&Accessor, StoreError> {
        slot.params.get(&(kind, index)).ok_or_else(|| {
            if slot.params.keys().any(|(k, _)| *k == kind) {
                StoreError::IndexNotFound { kind, index }
            } else {
                StoreError::ParameterNotFound { kind }
            }
        })
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, [ClientFlags; MAX_CLIENTS]> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the endpoint's write lock.
    fn raise_flags(&self, endpoint: &EndpointHandle, param: ParamRef) -> Stamp {
        let raised = Stamp(self.changes.fetch_add(1, Ordering::AcqRel) + 1);
        let mask = 1u32 << endpoint.slot;
        let mut table = self.flags();
        for (client, flags) in table.iter_mut().enumerate() {
            if flags.subscriptions & mask == 0 {
                continue;
            }
            if let Some(p) = flags.pending.iter_mut().find(|p| p.param == param) {
                p.raised = raised;
            } else if flags.pending.push(Pending { param, raised }).is_err() {
                warn!("STORE[{}]: pending update queue full, dropping {:?}", client, param);
            }
        }
        raised
    }
}
