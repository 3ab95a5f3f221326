//! Mock implementations of the provider-facing traits.
//!
//! All mocks use `std::sync::Mutex` internally so builder methods work in
//! both sync and async contexts without a runtime, and scripted behavior is
//! queued ahead of time the way the exercising test expects it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};

use switchboard_core::{
    CandidateDescriptor, FeaturePair, FeatureSet, ProviderId, ResolverError, ResolverResult,
    SlotId,
};
use switchboard_provider::{
    ConnectionStrategy, DeathNotifier, DeathWatch, DisconnectCause, FeatureObserver, FeatureRef,
    FeatureState, FeatureStatusSink, OverrideSource, ProviderDirectory, ProviderSession,
};

/// Mock provider directory with a scripted candidate list.
#[derive(Debug, Default)]
pub struct MockDirectory {
    descriptors: Mutex<Vec<CandidateDescriptor>>,
    fail_next: AtomicBool,
    queries: Mutex<Vec<(String, Option<String>)>>,
}

impl MockDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate to the directory.
    pub fn add(&self, descriptor: CandidateDescriptor) {
        if let Ok(mut guard) = self.descriptors.lock() {
            guard.retain(|d| d.provider != descriptor.provider);
            guard.push(descriptor);
        }
    }

    /// Remove every candidate belonging to `package`.
    pub fn remove_package(&self, package: &str) {
        if let Ok(mut guard) = self.descriptors.lock() {
            guard.retain(|d| d.provider.package() != package);
        }
    }

    /// Make the next query fail with a discovery error.
    pub fn fail_next_query(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The `(interface, package_filter)` arguments of every query so far.
    #[must_use]
    pub fn queries(&self) -> Vec<(String, Option<String>)> {
        self.queries.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProviderDirectory for MockDirectory {
    async fn query(
        &self,
        interface_name: &str,
        package_filter: Option<&str>,
    ) -> ResolverResult<Vec<CandidateDescriptor>> {
        if let Ok(mut guard) = self.queries.lock() {
            guard.push((
                interface_name.to_string(),
                package_filter.map(ToString::to_string),
            ));
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ResolverError::Discovery("directory offline".to_string()));
        }
        let descriptors = self.descriptors.lock().map(|g| g.clone()).unwrap_or_default();
        Ok(descriptors
            .into_iter()
            .filter(|d| package_filter.is_none_or(|p| d.provider.package() == p))
            .collect())
    }
}

/// Mock per-slot override source.
#[derive(Debug, Default)]
pub struct MockOverrideSource {
    overrides: Mutex<HashMap<SlotId, ProviderId>>,
}

impl MockOverrideSource {
    /// Create a source with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `provider` as the override for `slot`.
    pub fn set(&self, slot: SlotId, provider: ProviderId) {
        if let Ok(mut guard) = self.overrides.lock() {
            guard.insert(slot, provider);
        }
    }

    /// Clear the override for `slot`.
    pub fn clear(&self, slot: SlotId) {
        if let Ok(mut guard) = self.overrides.lock() {
            guard.remove(&slot);
        }
    }
}

#[async_trait]
impl OverrideSource for MockOverrideSource {
    async fn override_for(&self, slot: SlotId) -> Option<ProviderId> {
        self.overrides.lock().ok().and_then(|g| g.get(&slot).cloned())
    }
}

/// A scripted remote session handed out by [`MockConnector`].
pub struct MockSession {
    provider: ProviderId,
    live: Mutex<HashMap<FeaturePair, uuid::Uuid>>,
    created_log: Mutex<Vec<FeaturePair>>,
    removed_log: Mutex<Vec<FeaturePair>>,
    enable_log: Mutex<Vec<(SlotId, bool)>>,
    fail_creates: Mutex<HashSet<FeaturePair>>,
    status_sinks: Mutex<HashMap<FeaturePair, Arc<dyn FeatureStatusSink>>>,
    death: Mutex<Option<DeathNotifier>>,
    declaration_tx: mpsc::UnboundedSender<FeatureSet>,
    declaration_rx: Mutex<Option<mpsc::UnboundedReceiver<FeatureSet>>>,
    killed: AtomicBool,
    disconnected: AtomicBool,
}

impl MockSession {
    fn new(provider: ProviderId) -> Self {
        let (declaration_tx, declaration_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            live: Mutex::new(HashMap::new()),
            created_log: Mutex::new(Vec::new()),
            removed_log: Mutex::new(Vec::new()),
            enable_log: Mutex::new(Vec::new()),
            fail_creates: Mutex::new(HashSet::new()),
            status_sinks: Mutex::new(HashMap::new()),
            death: Mutex::new(None),
            declaration_tx,
            declaration_rx: Mutex::new(Some(declaration_rx)),
            killed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Simulate the remote process dying.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.death.lock() {
            if let Some(notifier) = guard.take() {
                notifier.notify(DisconnectCause::Died);
            }
        }
    }

    /// Simulate a remote-initiated disconnect.
    pub fn drop_connection(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.death.lock() {
            if let Some(notifier) = guard.take() {
                notifier.notify(DisconnectCause::Disconnected);
            }
        }
    }

    /// Push a provider-initiated feature-declaration update.
    pub fn push_declaration(&self, features: FeatureSet) {
        let _ = self.declaration_tx.send(features);
    }

    /// Drive the status sink registered for `pair`.
    pub fn drive_state(&self, pair: FeaturePair, state: FeatureState) {
        let sink = self
            .status_sinks
            .lock()
            .ok()
            .and_then(|g| g.get(&pair).cloned());
        if let Some(sink) = sink {
            sink.on_state(pair, state);
        }
    }

    /// Make the next `create_feature` for `pair` fail.
    pub fn fail_next_create(&self, pair: FeaturePair) {
        if let Ok(mut guard) = self.fail_creates.lock() {
            guard.insert(pair);
        }
    }

    /// Pairs currently created on the remote.
    #[must_use]
    pub fn live_pairs(&self) -> Vec<FeaturePair> {
        self.live
            .lock()
            .map(|g| {
                let mut pairs: Vec<_> = g.keys().copied().collect();
                pairs.sort_unstable();
                pairs
            })
            .unwrap_or_default()
    }

    /// Every pair ever created on this session, in call order.
    #[must_use]
    pub fn created_log(&self) -> Vec<FeaturePair> {
        self.created_log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Every pair ever removed from this session, in call order.
    #[must_use]
    pub fn removed_log(&self) -> Vec<FeaturePair> {
        self.removed_log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Every enable/disable broadcast received.
    #[must_use]
    pub fn enable_log(&self) -> Vec<(SlotId, bool)> {
        self.enable_log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Whether the session is still usable (not killed, not disconnected).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.killed.load(Ordering::SeqCst) && !self.disconnected.load(Ordering::SeqCst)
    }

    /// Whether `disconnect` was called.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for MockSession {
    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn watch_death(&self) -> DeathWatch {
        let (notifier, watch) = DeathWatch::channel();
        if let Ok(mut guard) = self.death.lock() {
            *guard = Some(notifier);
        }
        watch
    }

    async fn create_feature(
        &self,
        pair: FeaturePair,
        status: Arc<dyn FeatureStatusSink>,
    ) -> ResolverResult<FeatureRef> {
        let scripted_failure = self
            .fail_creates
            .lock()
            .map(|mut g| g.remove(&pair))
            .unwrap_or(false);
        if scripted_failure {
            return Err(ResolverError::RemoteCall {
                provider: self.provider.clone(),
                operation: "create_feature",
                reason: "scripted failure".to_string(),
            });
        }

        let reference = FeatureRef::new(pair);
        if let Ok(mut guard) = self.live.lock() {
            guard.insert(pair, reference.id());
        }
        if let Ok(mut guard) = self.created_log.lock() {
            guard.push(pair);
        }
        if let Ok(mut guard) = self.status_sinks.lock() {
            guard.insert(pair, status);
        }
        Ok(reference)
    }

    async fn remove_feature(&self, reference: &FeatureRef) -> ResolverResult<()> {
        if let Ok(mut guard) = self.live.lock() {
            guard.remove(&reference.pair());
        }
        if let Ok(mut guard) = self.removed_log.lock() {
            guard.push(reference.pair());
        }
        if let Ok(mut guard) = self.status_sinks.lock() {
            guard.remove(&reference.pair());
        }
        Ok(())
    }

    async fn set_slot_enabled(&self, slot: SlotId, enabled: bool) -> ResolverResult<()> {
        if let Ok(mut guard) = self.enable_log.lock() {
            guard.push((slot, enabled));
        }
        Ok(())
    }

    fn declaration_updates(&self) -> Option<mpsc::UnboundedReceiver<FeatureSet>> {
        self.declaration_rx.lock().ok().and_then(|mut g| g.take())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("provider", &self.provider)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Handle releasing a held connect or query gate.
#[derive(Debug, Clone)]
pub struct GateHandle {
    semaphore: Arc<Semaphore>,
}

impl GateHandle {
    /// Let one held call proceed.
    pub fn release(&self) {
        self.semaphore.add_permits(1);
    }
}

/// Mock connection strategy serving scripted sessions and feature reports.
#[derive(Default)]
pub struct MockConnector {
    latest: Mutex<HashMap<ProviderId, Arc<MockSession>>>,
    history: Mutex<Vec<Arc<MockSession>>>,
    connect_log: Mutex<Vec<ProviderId>>,
    connect_failures: Mutex<HashMap<ProviderId, u32>>,
    connect_gates: Mutex<HashMap<ProviderId, Arc<Semaphore>>>,
    reports: Mutex<HashMap<ProviderId, VecDeque<ResolverResult<FeatureSet>>>>,
    query_log: Mutex<Vec<ProviderId>>,
    query_gates: Mutex<HashMap<ProviderId, Arc<Semaphore>>>,
}

impl MockConnector {
    /// Create a connector with no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connects to `provider` fail.
    pub fn fail_connects(&self, provider: &ProviderId, count: u32) {
        if let Ok(mut guard) = self.connect_failures.lock() {
            guard.insert(provider.clone(), count);
        }
    }

    /// Hold connects to `provider` until the returned gate is released.
    #[must_use]
    pub fn hold_connects(&self, provider: &ProviderId) -> GateHandle {
        let semaphore = Arc::new(Semaphore::new(0));
        if let Ok(mut guard) = self.connect_gates.lock() {
            guard.insert(provider.clone(), Arc::clone(&semaphore));
        }
        GateHandle { semaphore }
    }

    /// Hold capability queries to `provider` until the gate is released.
    #[must_use]
    pub fn hold_queries(&self, provider: &ProviderId) -> GateHandle {
        let semaphore = Arc::new(Semaphore::new(0));
        if let Ok(mut guard) = self.query_gates.lock() {
            guard.insert(provider.clone(), Arc::clone(&semaphore));
        }
        GateHandle { semaphore }
    }

    /// Queue a feature report for the next capability query to `provider`.
    pub fn script_report(&self, provider: &ProviderId, report: ResolverResult<FeatureSet>) {
        if let Ok(mut guard) = self.reports.lock() {
            guard.entry(provider.clone()).or_default().push_back(report);
        }
    }

    /// The most recent session connected for `provider`.
    #[must_use]
    pub fn session(&self, provider: &ProviderId) -> Option<Arc<MockSession>> {
        self.latest.lock().ok().and_then(|g| g.get(provider).cloned())
    }

    /// Every session ever connected, in connect order.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.history.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of sessions for `provider` that are still alive.
    #[must_use]
    pub fn live_session_count(&self, provider: &ProviderId) -> usize {
        self.history
            .lock()
            .map(|g| {
                g.iter()
                    .filter(|s| s.provider() == provider && s.is_alive())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of connect attempts made to `provider`.
    #[must_use]
    pub fn connect_count(&self, provider: &ProviderId) -> usize {
        self.connect_log
            .lock()
            .map(|g| g.iter().filter(|p| *p == provider).count())
            .unwrap_or(0)
    }

    /// Number of capability queries issued to `provider`.
    #[must_use]
    pub fn query_count(&self, provider: &ProviderId) -> usize {
        self.query_log
            .lock()
            .map(|g| g.iter().filter(|p| *p == provider).count())
            .unwrap_or(0)
    }

    async fn pass_gate(gates: &Mutex<HashMap<ProviderId, Arc<Semaphore>>>, provider: &ProviderId) {
        let gate = gates.lock().ok().and_then(|g| g.get(provider).cloned());
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl ConnectionStrategy for MockConnector {
    fn interface_name(&self) -> &'static str {
        "dev.switchboard.provider.v2"
    }

    async fn connect(&self, provider: &ProviderId) -> ResolverResult<Arc<dyn ProviderSession>> {
        if let Ok(mut guard) = self.connect_log.lock() {
            guard.push(provider.clone());
        }
        Self::pass_gate(&self.connect_gates, provider).await;

        let should_fail = self
            .connect_failures
            .lock()
            .map(|mut g| match g.get_mut(provider) {
                Some(remaining) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if should_fail {
            return Err(ResolverError::Connection {
                provider: provider.clone(),
                reason: "scripted connect failure".to_string(),
            });
        }

        let session = Arc::new(MockSession::new(provider.clone()));
        if let Ok(mut guard) = self.latest.lock() {
            guard.insert(provider.clone(), Arc::clone(&session));
        }
        if let Ok(mut guard) = self.history.lock() {
            guard.push(Arc::clone(&session));
        }
        Ok(session)
    }

    async fn query_features(&self, provider: &ProviderId) -> ResolverResult<FeatureSet> {
        if let Ok(mut guard) = self.query_log.lock() {
            guard.push(provider.clone());
        }
        Self::pass_gate(&self.query_gates, provider).await;

        self.reports
            .lock()
            .ok()
            .and_then(|mut g| g.get_mut(provider).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| {
                Err(ResolverError::Query {
                    provider: provider.clone(),
                    reason: "no feature report scripted".to_string(),
                })
            })
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector").finish_non_exhaustive()
    }
}

/// An event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    /// `on_created` fired.
    Created(FeaturePair),
    /// `on_removed` fired.
    Removed(FeaturePair),
    /// `on_state_changed` fired.
    StateChanged(FeaturePair, FeatureState),
}

/// Feature observer that records every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    /// Create an observer with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every captured event, in callback order.
    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of `on_created` callbacks for `pair`.
    #[must_use]
    pub fn created_count(&self, pair: FeaturePair) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Created(p) if *p == pair))
            .count()
    }

    /// Number of `on_removed` callbacks for `pair`.
    #[must_use]
    pub fn removed_count(&self, pair: FeaturePair) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Removed(p) if *p == pair))
            .count()
    }

    /// Clear the log.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl FeatureObserver for RecordingObserver {
    fn on_created(&self, pair: FeaturePair) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(ObservedEvent::Created(pair));
        }
    }

    fn on_removed(&self, pair: FeaturePair) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(ObservedEvent::Removed(pair));
        }
    }

    fn on_state_changed(&self, pair: FeaturePair, state: FeatureState) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(ObservedEvent::StateChanged(pair, state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::FeatureKind;

    fn pair(slot: u32, kind: FeatureKind) -> FeaturePair {
        FeaturePair::new(SlotId::new(slot), kind)
    }

    #[tokio::test]
    async fn test_directory_package_filter() {
        let directory = MockDirectory::new();
        directory.add(CandidateDescriptor::new("com.a/Svc", "marker"));
        directory.add(CandidateDescriptor::new("com.b/Svc", "marker"));

        let all = directory.query("iface", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = directory.query("iface", Some("com.a")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].provider.package(), "com.a");
    }

    #[tokio::test]
    async fn test_directory_scripted_failure() {
        let directory = MockDirectory::new();
        directory.fail_next_query();
        assert!(directory.query("iface", None).await.is_err());
        assert!(directory.query("iface", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_create_remove_cycle() {
        let connector = MockConnector::new();
        let provider = ProviderId::new("com.a/Svc");
        let session = connector.connect(&provider).await.unwrap();

        struct NullSink;
        impl FeatureStatusSink for NullSink {
            fn on_state(&self, _pair: FeaturePair, _state: FeatureState) {}
        }

        let p = pair(0, FeatureKind::MmTel);
        let reference = session.create_feature(p, Arc::new(NullSink)).await.unwrap();
        let mock = connector.session(&provider).unwrap();
        assert_eq!(mock.live_pairs(), vec![p]);

        session.remove_feature(&reference).await.unwrap();
        assert!(mock.live_pairs().is_empty());
        assert_eq!(mock.removed_log(), vec![p]);
    }

    #[tokio::test]
    async fn test_connector_scripted_connect_failures() {
        let connector = MockConnector::new();
        let provider = ProviderId::new("com.a/Svc");
        connector.fail_connects(&provider, 2);

        assert!(connector.connect(&provider).await.is_err());
        assert!(connector.connect(&provider).await.is_err());
        assert!(connector.connect(&provider).await.is_ok());
        assert_eq!(connector.connect_count(&provider), 3);
    }

    #[tokio::test]
    async fn test_session_kill_fires_death_watch() {
        let connector = MockConnector::new();
        let provider = ProviderId::new("com.a/Svc");
        let session = connector.connect(&provider).await.unwrap();
        let watch = session.watch_death();

        let mock = connector.session(&provider).unwrap();
        mock.kill();
        assert_eq!(watch.wait().await, DisconnectCause::Died);
        assert_eq!(connector.live_session_count(&provider), 0);
    }

    #[tokio::test]
    async fn test_scripted_feature_reports() {
        let connector = MockConnector::new();
        let provider = ProviderId::new("com.a/Svc");

        let report: FeatureSet = [pair(0, FeatureKind::MmTel)].into_iter().collect();
        connector.script_report(&provider, Ok(report.clone()));

        assert_eq!(connector.query_features(&provider).await.unwrap(), report);
        // Unscripted queries fail deterministically.
        assert!(connector.query_features(&provider).await.is_err());
        assert_eq!(connector.query_count(&provider), 2);
    }
}
