//! The live feature-handle table and caller observer registry.
//!
//! The table is read from arbitrary caller threads while the orchestrator
//! loop writes it, so it lives behind its own concurrent map — a lock
//! distinct from the event queue. A connection callback publishing a new
//! handle never contends with the loop, and a reader never blocks either.

use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::trace;

use switchboard_core::{FeatureKind, FeaturePair, ProviderId, SlotId};
use switchboard_provider::{FeatureObserver, FeatureRef, FeatureState, ProviderSession};

/// A live capability handle for one (slot, feature) pair.
///
/// Handles are snapshots: they stay valid as references to the session that
/// produced them even after the pair is reassigned, but the table stops
/// returning them once the pair's owner changes. Rebinds mint new instances.
#[derive(Clone)]
pub struct FeatureHandle {
    provider: ProviderId,
    reference: FeatureRef,
    state: FeatureState,
    session: Arc<dyn ProviderSession>,
}

impl FeatureHandle {
    pub(crate) fn new(
        provider: ProviderId,
        reference: FeatureRef,
        session: Arc<dyn ProviderSession>,
    ) -> Self {
        Self {
            provider,
            reference,
            state: FeatureState::Initializing,
            session,
        }
    }

    /// The provider serving this feature.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// The (slot, feature) pair.
    #[must_use]
    pub fn pair(&self) -> FeaturePair {
        self.reference.pair()
    }

    /// The remote feature reference backing this handle.
    #[must_use]
    pub fn reference(&self) -> &FeatureRef {
        &self.reference
    }

    /// Last status reported by the provider.
    #[must_use]
    pub fn state(&self) -> FeatureState {
        self.state
    }

    /// The session the feature lives on.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn ProviderSession> {
        &self.session
    }
}

impl fmt::Debug for FeatureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureHandle")
            .field("provider", &self.provider)
            .field("pair", &self.pair())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Registration surface for one live (slot, feature) pair.
///
/// The wire protocol behind registration state is out of scope here; the
/// handle scopes the provider session to the pair the caller asked about.
#[derive(Clone)]
pub struct RegistrationHandle {
    provider: ProviderId,
    pair: FeaturePair,
    session: Arc<dyn ProviderSession>,
}

impl RegistrationHandle {
    pub(crate) fn new(
        provider: ProviderId,
        pair: FeaturePair,
        session: Arc<dyn ProviderSession>,
    ) -> Self {
        Self {
            provider,
            pair,
            session,
        }
    }

    /// The provider serving the pair.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// The (slot, feature) pair.
    #[must_use]
    pub fn pair(&self) -> FeaturePair {
        self.pair
    }

    /// The session the pair lives on.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn ProviderSession> {
        &self.session
    }
}

impl fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("provider", &self.provider)
            .field("pair", &self.pair)
            .finish_non_exhaustive()
    }
}

/// Configuration surface for one live (slot, feature) pair.
#[derive(Clone)]
pub struct ConfigHandle {
    provider: ProviderId,
    pair: FeaturePair,
    session: Arc<dyn ProviderSession>,
}

impl ConfigHandle {
    pub(crate) fn new(
        provider: ProviderId,
        pair: FeaturePair,
        session: Arc<dyn ProviderSession>,
    ) -> Self {
        Self {
            provider,
            pair,
            session,
        }
    }

    /// The provider serving the pair.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// The (slot, feature) pair.
    #[must_use]
    pub fn pair(&self) -> FeaturePair {
        self.pair
    }

    /// The session the pair lives on.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn ProviderSession> {
        &self.session
    }
}

impl fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("provider", &self.provider)
            .field("pair", &self.pair)
            .finish_non_exhaustive()
    }
}

/// The live (slot, feature) → handle table.
#[derive(Default)]
pub(crate) struct FeatureTable {
    entries: DashMap<FeaturePair, FeatureHandle>,
}

impl FeatureTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, slot: SlotId, kind: FeatureKind) -> Option<FeatureHandle> {
        self.entries
            .get(&FeaturePair::new(slot, kind))
            .map(|entry| entry.clone())
    }

    pub(crate) fn insert(&self, handle: FeatureHandle) {
        trace!(pair = %handle.pair(), provider = %handle.provider(), "Publishing feature handle");
        self.entries.insert(handle.pair(), handle);
    }

    /// Remove the entry for `pair`, but only if `provider` still owns it.
    ///
    /// During a handover the new owner may have published before the old
    /// owner's teardown is processed; the old owner must not clobber it.
    pub(crate) fn remove_if_owner(&self, pair: FeaturePair, provider: &ProviderId) {
        self.entries
            .remove_if(&pair, |_, handle| handle.provider() == provider);
    }

    pub(crate) fn set_state(&self, pair: FeaturePair, state: FeatureState) {
        if let Some(mut entry) = self.entries.get_mut(&pair) {
            entry.state = state;
        }
    }

    pub(crate) fn pairs(&self) -> Vec<FeaturePair> {
        let mut pairs: Vec<_> = self.entries.iter().map(|entry| *entry.key()).collect();
        pairs.sort_unstable();
        pairs
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for FeatureTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureTable")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Caller observers keyed by (slot, feature) pair.
///
/// Registrations persist across rebinds: the registry is keyed by pair, not
/// by provider or connection, so an observer registered before a crash sees
/// the removal and the later re-creation.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    inner: Mutex<Vec<(FeaturePair, Arc<dyn FeatureObserver>)>>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, pair: FeaturePair, observer: Arc<dyn FeatureObserver>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.push((pair, observer));
        }
    }

    pub(crate) fn notify_created(&self, pair: FeaturePair) {
        for observer in self.observers_for(pair) {
            observer.on_created(pair);
        }
    }

    pub(crate) fn notify_removed(&self, pair: FeaturePair) {
        for observer in self.observers_for(pair) {
            observer.on_removed(pair);
        }
    }

    pub(crate) fn notify_state(&self, pair: FeaturePair, state: FeatureState) {
        for observer in self.observers_for(pair) {
            observer.on_state_changed(pair, state);
        }
    }

    /// Snapshot the observers for `pair` so callbacks run without the lock
    /// held — an observer re-registering from a callback must not deadlock.
    fn observers_for(&self, pair: FeaturePair) -> Vec<Arc<dyn FeatureObserver>> {
        self.inner
            .lock()
            .map(|guard| {
                guard
                    .iter()
                    .filter(|(p, _)| *p == pair)
                    .map(|(_, o)| Arc::clone(o))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.inner.lock().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("ObserverRegistry")
            .field("registered", &count)
            .finish_non_exhaustive()
    }
}
