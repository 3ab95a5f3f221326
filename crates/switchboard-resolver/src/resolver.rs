//! The resolver orchestrator and its caller-facing surface.
//!
//! All catalog, override, and assignment mutation happens on one serialized
//! event queue drained by a spawned loop — package events, override events,
//! query completions, and connection callbacks cannot race each other.
//! Caller reads go through the live feature table, which sits behind its own
//! lock, so a connection callback publishing a handle never deadlocks
//! against a reader.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use switchboard_core::{FeatureKind, FeaturePair, ProviderId, ResolverResult, SlotId};
use switchboard_provider::{FeatureObserver, OverrideSource, ProviderDirectory, StrategySet};

use crate::assignment::{SlotOverrideTable, compute_assignment};
use crate::binding::{BindState, BindingController};
use crate::catalog::CandidateRegistry;
use crate::config::ResolverConfig;
use crate::events::{ResolverEvent, ResolverNotice};
use crate::query::QueryCoordinator;
use crate::table::{ConfigHandle, FeatureHandle, FeatureTable, ObserverRegistry, RegistrationHandle};

/// Capacity of the notice broadcast channel.
const NOTICE_CAPACITY: usize = 256;

/// Upper bound on providers recomputed per event; reaching it logs and
/// defers, instead of letting override/default recomputation chase its tail.
const MAX_RECOMPUTE_PASSES: usize = 32;

/// Point-in-time snapshot of one provider's binding controller.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    /// The provider.
    pub provider: ProviderId,
    /// Current connection state.
    pub state: BindState,
    /// Number of desired (slot, feature) pairs, emergency included.
    pub desired_pairs: usize,
    /// Number of live (created) pairs.
    pub live_pairs: usize,
    /// Consecutive failed connects since the last success.
    pub retry_attempts: u32,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
}

/// The caller-facing resolver handle. Cheap to clone; all clones share the
/// same orchestrator loop and live table.
#[derive(Debug, Clone)]
pub struct FeatureResolver {
    events: mpsc::UnboundedSender<ResolverEvent>,
    table: Arc<FeatureTable>,
    observers: Arc<ObserverRegistry>,
    notices: broadcast::Sender<ResolverNotice>,
    resolving: Arc<AtomicUsize>,
}

impl FeatureResolver {
    /// Validate the configuration, prime the catalog and override table, and
    /// spawn the orchestrator loop.
    ///
    /// Priming failures that the running system also tolerates (an offline
    /// directory) are logged, not returned: the catalog simply starts empty.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the configuration is inconsistent.
    pub async fn start(
        config: ResolverConfig,
        directory: Arc<dyn ProviderDirectory>,
        override_source: Arc<dyn OverrideSource>,
        strategies: StrategySet,
    ) -> ResolverResult<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let table = Arc::new(FeatureTable::new());
        let observers = Arc::new(ObserverRegistry::new());
        let resolving = Arc::new(AtomicUsize::new(0));

        let queries = QueryCoordinator::new(
            config.query.timeout(),
            config.query.retry_delay(),
            Arc::clone(&resolving),
            events_tx.clone(),
        );
        let mut orchestrator = Orchestrator {
            registry: CandidateRegistry::new(
                config.expected_permission_marker.clone(),
                config.allow_unverified_candidates,
            ),
            overrides: SlotOverrideTable::new(config.slot_count),
            device_default: config.device_default.clone(),
            controllers: HashMap::new(),
            queries,
            config,
            directory,
            strategies,
            table: Arc::clone(&table),
            observers: Arc::clone(&observers),
            notices: notices.clone(),
            events_tx: events_tx.clone(),
        };
        orchestrator.prime(override_source.as_ref()).await;
        tokio::spawn(orchestrator.run(events_rx));

        Ok(Self {
            events: events_tx,
            table,
            observers,
            notices,
            resolving,
        })
    }

    /// The live handle for `(slot, kind)`, registering `observer` for
    /// create/remove/status-change callbacks that persist across rebinds.
    ///
    /// `None` is a normal transient state — not yet bound, mid-handover, or
    /// genuinely unsupported look identical to callers.
    pub fn feature_handle(
        &self,
        slot: SlotId,
        kind: FeatureKind,
        observer: Arc<dyn FeatureObserver>,
    ) -> Option<FeatureHandle> {
        self.observers.register(FeaturePair::new(slot, kind), observer);
        self.table.get(slot, kind)
    }

    /// The live handle for `(slot, kind)` without registering an observer.
    #[must_use]
    pub fn current_handle(&self, slot: SlotId, kind: FeatureKind) -> Option<FeatureHandle> {
        self.table.get(slot, kind)
    }

    /// The registration surface for a live `(slot, kind)`.
    #[must_use]
    pub fn registration_handle(&self, slot: SlotId, kind: FeatureKind) -> Option<RegistrationHandle> {
        self.table.get(slot, kind).map(|handle| {
            RegistrationHandle::new(
                handle.provider().clone(),
                handle.pair(),
                Arc::clone(handle.session()),
            )
        })
    }

    /// The configuration surface for a live `(slot, kind)`.
    #[must_use]
    pub fn config_handle(&self, slot: SlotId, kind: FeatureKind) -> Option<ConfigHandle> {
        self.table.get(slot, kind).map(|handle| {
            ConfigHandle::new(
                handle.provider().clone(),
                handle.pair(),
                Arc::clone(handle.session()),
            )
        })
    }

    /// Every (slot, feature) pair currently live, in order.
    #[must_use]
    pub fn live_pairs(&self) -> Vec<FeaturePair> {
        self.table.pairs()
    }

    /// Whether a capability query (or its unprocessed completion) is
    /// outstanding — the catalog may be about to change.
    #[must_use]
    pub fn is_resolving(&self) -> bool {
        self.resolving.load(Ordering::SeqCst) > 0
    }

    /// Enable serving on `slot`, broadcast to every bound controller.
    pub fn enable(&self, slot: SlotId) {
        let _ = self
            .events
            .send(ResolverEvent::SetSlotEnabled { slot, enabled: true });
    }

    /// Disable serving on `slot`, broadcast to every bound controller.
    pub fn disable(&self, slot: SlotId) {
        let _ = self
            .events
            .send(ResolverEvent::SetSlotEnabled { slot, enabled: false });
    }

    /// A package was installed or updated.
    pub fn package_added(&self, package: impl Into<String>) {
        let _ = self.events.send(ResolverEvent::PackageAdded {
            package: package.into(),
        });
    }

    /// A package was uninstalled.
    pub fn package_removed(&self, package: impl Into<String>) {
        let _ = self.events.send(ResolverEvent::PackageRemoved {
            package: package.into(),
        });
    }

    /// The carrier override for `slot` changed.
    pub fn override_changed(&self, slot: SlotId, provider: Option<ProviderId>) {
        let _ = self
            .events
            .send(ResolverEvent::OverrideChanged { slot, provider });
    }

    /// Test hook: replace the device default provider.
    pub fn set_device_default_for_test(&self, provider: Option<ProviderId>) {
        let _ = self
            .events
            .send(ResolverEvent::SetDeviceDefault { provider });
    }

    /// Subscribe to resolver notices.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<ResolverNotice> {
        self.notices.subscribe()
    }

    /// Snapshot every provider's controller state.
    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let (tx, rx) = oneshot::channel();
        if self
            .events
            .send(ResolverEvent::StatusReport { ack: tx })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Wait until every previously submitted event has been processed.
    pub async fn settled(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(ResolverEvent::Settled { ack: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Unbind every provider and stop the orchestrator loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(ResolverEvent::Shutdown { ack: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Owns all mutable resolver state; lives inside the spawned loop task.
struct Orchestrator {
    config: ResolverConfig,
    directory: Arc<dyn ProviderDirectory>,
    strategies: StrategySet,
    registry: CandidateRegistry,
    overrides: SlotOverrideTable,
    device_default: Option<ProviderId>,
    controllers: HashMap<ProviderId, BindingController>,
    queries: QueryCoordinator,
    table: Arc<FeatureTable>,
    observers: Arc<ObserverRegistry>,
    notices: broadcast::Sender<ResolverNotice>,
    events_tx: mpsc::UnboundedSender<ResolverEvent>,
}

impl Orchestrator {
    /// Read the override source for every slot and run initial discovery.
    async fn prime(&mut self, override_source: &dyn OverrideSource) {
        for slot in (0..self.overrides.slot_count()).map(SlotId::new) {
            if let Some(provider) = override_source.override_for(slot).await {
                debug!(%slot, provider = %provider, "Priming carrier override");
                let _ = self.overrides.set(slot, Some(provider));
            }
        }

        match self.registry.discover(self.directory.as_ref(), None).await {
            Ok(admitted) => {
                info!(candidates = admitted.len(), "Initial discovery complete");
                self.recompute(admitted);
            }
            Err(error) => {
                warn!(error = %error, "Initial discovery failed; starting with an empty catalog");
            }
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ResolverEvent>) {
        info!(slots = self.overrides.slot_count(), "Resolver event loop started");
        while let Some(event) = events.recv().await {
            trace!(event = event.name(), "Processing resolver event");
            if let ResolverEvent::Shutdown { ack } = event {
                for controller in self.controllers.values_mut() {
                    controller.unbind();
                }
                let _ = ack.send(());
                break;
            }
            self.handle(event).await;
        }
        info!("Resolver event loop stopped");
    }

    async fn handle(&mut self, event: ResolverEvent) {
        match event {
            ResolverEvent::PackageAdded { package } => self.on_package_added(&package).await,
            ResolverEvent::PackageRemoved { package } => self.on_package_removed(&package),
            ResolverEvent::OverrideChanged { slot, provider } => {
                self.on_override_changed(slot, provider);
            }
            ResolverEvent::SetDeviceDefault { provider } => self.on_set_device_default(provider),
            ResolverEvent::SetSlotEnabled { slot, enabled } => {
                self.on_set_slot_enabled(slot, enabled);
            }
            ResolverEvent::StatusReport { ack } => {
                let _ = ack.send(self.statuses());
            }
            ResolverEvent::Settled { ack } => {
                let _ = ack.send(());
            }
            // Intercepted by the run loop before dispatch.
            ResolverEvent::Shutdown { .. } => {}
            ResolverEvent::ConnectFinished {
                provider,
                generation,
                outcome,
            } => match self.controllers.get_mut(&provider) {
                Some(controller) => controller.on_connect_finished(generation, outcome),
                None => {
                    debug!(provider = %provider, "Connect finished for a removed provider");
                    if let Ok(session) = outcome {
                        tokio::spawn(async move {
                            session.disconnect().await;
                        });
                    }
                }
            },
            ResolverEvent::ConnectionLost {
                provider,
                generation,
                cause,
            } => {
                if let Some(controller) = self.controllers.get_mut(&provider) {
                    controller.on_connection_lost(generation, cause);
                }
            }
            ResolverEvent::RetryDue {
                provider,
                generation,
            } => {
                if let Some(controller) = self.controllers.get_mut(&provider) {
                    controller.on_retry_due(generation);
                }
            }
            ResolverEvent::FeatureCreated {
                provider,
                generation,
                pair,
                outcome,
            } => {
                if let Some(controller) = self.controllers.get_mut(&provider) {
                    controller.on_feature_created(generation, pair, outcome);
                }
            }
            ResolverEvent::FeatureStateChanged {
                provider,
                generation,
                pair,
                state,
            } => {
                if let Some(controller) = self.controllers.get_mut(&provider) {
                    controller.on_feature_state(generation, pair, state);
                }
            }
            ResolverEvent::DeclarationChanged { provider, features } => {
                if self.registry.replace_features(&provider, features) {
                    info!(provider = %provider, "Provider updated its feature declaration");
                    self.recompute(vec![provider]);
                }
            }
            ResolverEvent::QueryFinished { provider, outcome } => {
                self.on_query_finished(provider, outcome);
            }
            ResolverEvent::QueryRetryDue { provider } => self.on_query_retry_due(provider),
        }
    }

    async fn on_package_added(&mut self, package: &str) {
        let previous: HashSet<ProviderId> = self
            .registry
            .get_by_package(package)
            .iter()
            .map(|candidate| candidate.provider().clone())
            .collect();

        match self
            .registry
            .discover(self.directory.as_ref(), Some(package))
            .await
        {
            Ok(admitted) => {
                info!(package, candidates = admitted.len(), "Package discovery complete");
                let admitted_set: HashSet<ProviderId> = admitted.iter().cloned().collect();
                // Components the updated package no longer exports.
                for gone in previous.difference(&admitted_set) {
                    self.drop_candidate(gone.clone());
                }
                self.recompute(admitted);
            }
            Err(error) => {
                warn!(package, error = %error, "Discovery failed; catalog unchanged");
            }
        }
    }

    fn on_package_removed(&mut self, package: &str) {
        let removed = self.registry.remove_package(package);
        if removed.is_empty() {
            debug!(package, "Uninstall for a package with no candidates");
            return;
        }
        info!(package, candidates = removed.len(), "Package uninstalled");
        for provider in removed {
            if let Some(mut controller) = self.controllers.remove(&provider) {
                controller.unbind();
            }
            self.queries.forget(&provider);
        }
        // A coverage gap may have opened for the device default.
        self.recompute(Vec::new());
    }

    fn on_override_changed(&mut self, slot: SlotId, provider: Option<ProviderId>) {
        let old = self.overrides.override_for(slot).cloned();
        match self.overrides.set(slot, provider.clone()) {
            Err(error) => {
                warn!(%slot, error = %error, "Rejecting override change");
            }
            Ok(false) => {
                debug!(%slot, "Override unchanged, nothing to do");
            }
            Ok(true) => {
                info!(
                    %slot,
                    old = old.as_ref().map_or("<none>", |p| p.as_str()),
                    new = provider.as_ref().map_or("<none>", |p| p.as_str()),
                    "Carrier override changed"
                );
                let mut seeds = Vec::new();
                if let Some(old) = old {
                    seeds.push(old);
                }
                if let Some(new) = provider {
                    seeds.push(new);
                }
                self.recompute(seeds);
            }
        }
    }

    fn on_set_device_default(&mut self, provider: Option<ProviderId>) {
        if self.device_default == provider {
            return;
        }
        info!(
            new = provider.as_ref().map_or("<none>", |p| p.as_str()),
            "Device default replaced"
        );
        let old = std::mem::replace(&mut self.device_default, provider);
        self.recompute(old.into_iter().collect::<Vec<_>>());
    }

    fn on_set_slot_enabled(&mut self, slot: SlotId, enabled: bool) {
        if !self.overrides.contains_slot(slot) {
            warn!(%slot, "Rejecting enable/disable for out-of-range slot");
            return;
        }
        for controller in self.controllers.values_mut() {
            controller.set_slot_enabled(slot, enabled);
        }
    }

    fn on_query_finished(
        &mut self,
        provider: ProviderId,
        outcome: ResolverResult<switchboard_core::FeatureSet>,
    ) {
        self.queries.on_finished(&provider);
        if self.registry.get(&provider).is_none() {
            debug!(provider = %provider, "Query finished for a removed candidate");
            return;
        }
        match outcome {
            Ok(features) => {
                info!(provider = %provider, features = %features, "Capability query succeeded");
                self.registry.set_queried(&provider, features);
                self.recompute(vec![provider]);
            }
            Err(error) => {
                warn!(provider = %provider, error = %error, "Capability query failed");
                if self.is_relevant(&provider) {
                    self.queries.schedule_retry(provider);
                }
            }
        }
    }

    fn on_query_retry_due(&mut self, provider: ProviderId) {
        self.queries.forget(&provider);
        let still_pending = self
            .registry
            .get(&provider)
            .is_some_and(|candidate| candidate.is_pending_query());
        if still_pending && self.is_relevant(&provider) {
            let flavor = self
                .registry
                .get(&provider)
                .map(|candidate| candidate.descriptor.flavor)
                .unwrap_or_default();
            self.queries
                .start(provider, self.strategies.for_flavor(flavor));
        }
    }

    fn is_relevant(&self, provider: &ProviderId) -> bool {
        self.overrides.is_override(provider) || self.device_default.as_ref() == Some(provider)
    }

    /// Recompute assignments for the seed providers plus the device default.
    ///
    /// Gap filling makes the default's assignment depend on every override's
    /// declaration, so the default is recomputed on every pass. The worklist
    /// is deduplicated and capped; state reconverges on the next event if
    /// the cap is ever hit.
    fn recompute(&mut self, seeds: Vec<ProviderId>) {
        let mut worklist: VecDeque<ProviderId> = VecDeque::new();
        let mut enqueued: HashSet<ProviderId> = HashSet::new();
        for provider in seeds {
            if enqueued.insert(provider.clone()) {
                worklist.push_back(provider);
            }
        }
        if let Some(default) = self.device_default.clone() {
            if enqueued.insert(default.clone()) {
                worklist.push_back(default);
            }
        }

        let mut passes = 0usize;
        while let Some(provider) = worklist.pop_front() {
            passes = passes.saturating_add(1);
            if passes > MAX_RECOMPUTE_PASSES {
                warn!(
                    limit = MAX_RECOMPUTE_PASSES,
                    "Recompute worklist hit its cap; deferring the rest to the next event"
                );
                break;
            }
            self.apply_assignment(&provider);
        }
    }

    /// Apply the assignment policy to one candidate.
    fn apply_assignment(&mut self, provider: &ProviderId) {
        let Some(candidate) = self.registry.get(provider) else {
            if let Some(mut controller) = self.controllers.remove(provider) {
                controller.unbind();
            }
            return;
        };
        let flavor = candidate.descriptor.flavor;
        let pending_query = candidate.is_pending_query();
        let relevant = self.is_relevant(provider);

        if pending_query {
            // Unused candidates are never queried.
            if relevant {
                self.queries
                    .start(provider.clone(), self.strategies.for_flavor(flavor));
            }
            return;
        }

        let desired = compute_assignment(
            provider,
            &self.registry,
            &self.overrides,
            self.device_default.as_ref(),
        );
        debug!(provider = %provider, desired = %desired, "Assignment recomputed");

        if desired.has_bindable() {
            if !self.controllers.contains_key(provider) {
                let controller = BindingController::new(
                    provider.clone(),
                    self.strategies.for_flavor(flavor),
                    self.config.backoff.clone(),
                    self.events_tx.clone(),
                    Arc::clone(&self.table),
                    Arc::clone(&self.observers),
                    self.notices.clone(),
                );
                self.controllers.insert(provider.clone(), controller);
            }
            if let Some(controller) = self.controllers.get_mut(provider) {
                match controller.state() {
                    BindState::Unbound => controller.bind(desired),
                    // Binding/Bound diff live; RetryPending rebinds with the
                    // latest set at its own backoff cadence.
                    BindState::Binding | BindState::Bound | BindState::RetryPending => {
                        controller.set_desired(desired);
                    }
                }
            }
        } else if let Some(controller) = self.controllers.get_mut(provider) {
            // Assignment dropped to zero bindable pairs: tear down reactively.
            controller.unbind();
            controller.set_desired(desired);
        }
    }

    fn drop_candidate(&mut self, provider: ProviderId) {
        debug!(provider = %provider, "Dropping candidate");
        self.registry.remove(&provider);
        if let Some(mut controller) = self.controllers.remove(&provider) {
            controller.unbind();
        }
        self.queries.forget(&provider);
    }

    fn statuses(&self) -> Vec<ProviderStatus> {
        let mut statuses: Vec<ProviderStatus> = self
            .controllers
            .iter()
            .map(|(provider, controller)| ProviderStatus {
                provider: provider.clone(),
                state: controller.state(),
                desired_pairs: controller.desired().len(),
                live_pairs: controller.live_pair_count(),
                retry_attempts: controller.retry_attempts(),
                connected_at: controller.connected_at(),
            })
            .collect();
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }
}
