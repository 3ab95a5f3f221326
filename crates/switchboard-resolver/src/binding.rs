//! Per-provider connection lifecycle: bind, live diffing, crash, retry.
//!
//! One [`BindingController`] exists per provider identity, owned by the
//! orchestrator and driven only from its serialized event loop. Every remote
//! operation is issued as a spawned task that posts its completion back onto
//! the queue, so nothing here ever blocks event processing.
//!
//! Each bind attempt mints a fresh generation token. Async completions carry
//! the generation they were issued under; anything stale — a connect that
//! resolves after an unbind, a retry timer that fires after a teardown, a
//! feature-create racing a reassignment — is discarded on arrival.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchboard_core::{Backoff, BackoffPolicy, FeaturePair, FeatureSet, ProviderId};
use switchboard_provider::{
    ConnectionStrategy, DisconnectCause, FeatureRef, FeatureState, FeatureStatusSink,
    ProviderSession,
};

use crate::events::{ResolverEvent, ResolverNotice};
use crate::table::{FeatureHandle, FeatureTable, ObserverRegistry};

/// Connection state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// No connection and none wanted (or an explicit unbind happened).
    Unbound,
    /// A connect request is in flight.
    Binding,
    /// Connected; live features are being served.
    Bound,
    /// The connection was lost; a backoff retry timer is pending.
    RetryPending,
}

impl BindState {
    /// Stable lowercase name for logs and status snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Binding => "binding",
            Self::Bound => "bound",
            Self::RetryPending => "retry_pending",
        }
    }
}

/// A live pair: either waiting for its create to complete, or created.
enum LiveEntry {
    Pending,
    Live(FeatureRef),
}

/// Relays provider-driven status callbacks onto the event queue.
///
/// The remote side calls [`FeatureStatusSink::on_state`] on its own callback
/// thread; the relay turns that into a queued event so state is only ever
/// mutated from the orchestrator loop.
struct StatusRelay {
    provider: ProviderId,
    generation: Uuid,
    events: mpsc::UnboundedSender<ResolverEvent>,
}

impl FeatureStatusSink for StatusRelay {
    fn on_state(&self, pair: FeaturePair, state: FeatureState) {
        let _ = self.events.send(ResolverEvent::FeatureStateChanged {
            provider: self.provider.clone(),
            generation: self.generation,
            pair,
            state,
        });
    }
}

/// Owns one provider's connection lifecycle.
pub(crate) struct BindingController {
    provider: ProviderId,
    strategy: Arc<dyn ConnectionStrategy>,
    events: mpsc::UnboundedSender<ResolverEvent>,
    table: Arc<FeatureTable>,
    observers: Arc<ObserverRegistry>,
    notices: broadcast::Sender<ResolverNotice>,

    state: BindState,
    generation: Uuid,
    desired: FeatureSet,
    live: HashMap<FeaturePair, LiveEntry>,
    session: Option<Arc<dyn ProviderSession>>,
    backoff: Backoff,
    retry_cancel: Option<CancellationToken>,
    watch_task: Option<JoinHandle<()>>,
    declaration_task: Option<JoinHandle<()>>,
    connected_at: Option<DateTime<Utc>>,
}

impl BindingController {
    pub(crate) fn new(
        provider: ProviderId,
        strategy: Arc<dyn ConnectionStrategy>,
        backoff: BackoffPolicy,
        events: mpsc::UnboundedSender<ResolverEvent>,
        table: Arc<FeatureTable>,
        observers: Arc<ObserverRegistry>,
        notices: broadcast::Sender<ResolverNotice>,
    ) -> Self {
        Self {
            provider,
            strategy,
            events,
            table,
            observers,
            notices,
            state: BindState::Unbound,
            generation: Uuid::new_v4(),
            desired: FeatureSet::new(),
            live: HashMap::new(),
            session: None,
            backoff: Backoff::new(backoff),
            retry_cancel: None,
            watch_task: None,
            declaration_task: None,
            connected_at: None,
        }
    }

    pub(crate) fn state(&self) -> BindState {
        self.state
    }

    pub(crate) fn desired(&self) -> &FeatureSet {
        &self.desired
    }

    pub(crate) fn retry_attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    pub(crate) fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub(crate) fn live_pair_count(&self) -> usize {
        self.live
            .values()
            .filter(|e| matches!(e, LiveEntry::Live(_)))
            .count()
    }

    /// Start serving `desired`. Only legal from [`BindState::Unbound`].
    pub(crate) fn bind(&mut self, desired: FeatureSet) {
        if self.state != BindState::Unbound {
            warn!(
                provider = %self.provider,
                state = self.state.as_str(),
                "Ignoring bind request outside the unbound state"
            );
            return;
        }
        self.desired = desired;
        self.start_connect();
    }

    /// Replace the desired set, diffing it against what is live.
    ///
    /// An empty bindable result does not close the connection; only an
    /// explicit [`unbind`](Self::unbind) from the orchestrator does. This is
    /// what keeps a transient all-features-moved-away recompute from
    /// flapping the connection.
    pub(crate) fn set_desired(&mut self, desired: FeatureSet) {
        self.desired = desired;
        if self.state != BindState::Bound {
            // Binding: the connect completion creates from the latest set.
            // RetryPending/Unbound: the next bind attempt picks it up.
            return;
        }

        let additions: Vec<FeaturePair> = self
            .desired
            .bindable()
            .filter(|pair| !self.live.contains_key(pair))
            .collect();
        let removals: Vec<FeaturePair> = self
            .live
            .keys()
            .filter(|pair| !self.desired.contains(**pair))
            .copied()
            .collect();

        if additions.is_empty() && removals.is_empty() {
            debug!(provider = %self.provider, "Feature set unchanged, nothing to diff");
            return;
        }
        info!(
            provider = %self.provider,
            added = additions.len(),
            removed = removals.len(),
            "Applying feature-set delta"
        );
        for pair in removals {
            self.issue_remove(pair);
        }
        for pair in additions {
            self.issue_create(pair);
        }
    }

    /// Handle a connect completion.
    pub(crate) fn on_connect_finished(
        &mut self,
        generation: Uuid,
        outcome: switchboard_core::ResolverResult<Arc<dyn ProviderSession>>,
    ) {
        if generation != self.generation || self.state != BindState::Binding {
            // An unbind (or a newer attempt) overtook this connect. If it
            // actually succeeded, the session is unwanted: tear it down.
            debug!(provider = %self.provider, "Discarding stale connect result");
            if let Ok(session) = outcome {
                tokio::spawn(async move {
                    session.disconnect().await;
                });
            }
            return;
        }

        match outcome {
            Ok(session) => {
                info!(provider = %self.provider, "Provider connected");
                self.state = BindState::Bound;
                self.backoff.reset();
                self.connected_at = Some(Utc::now());

                // Death subscription first: a crash during feature creation
                // must not go unnoticed.
                let watch = session.watch_death();
                let events = self.events.clone();
                let provider = self.provider.clone();
                self.watch_task = Some(tokio::spawn(async move {
                    let cause = watch.wait().await;
                    let _ = events.send(ResolverEvent::ConnectionLost {
                        provider,
                        generation,
                        cause,
                    });
                }));

                if let Some(mut updates) = session.declaration_updates() {
                    let events = self.events.clone();
                    let provider = self.provider.clone();
                    self.declaration_task = Some(tokio::spawn(async move {
                        while let Some(features) = updates.recv().await {
                            let _ = events.send(ResolverEvent::DeclarationChanged {
                                provider: provider.clone(),
                                features,
                            });
                        }
                    }));
                }

                self.session = Some(session);
                self.notice(ResolverNotice::ProviderBound {
                    provider: self.provider.clone(),
                });

                let pairs: Vec<FeaturePair> = self.desired.bindable().collect();
                for pair in pairs {
                    self.issue_create(pair);
                }
            }
            Err(error) => {
                warn!(provider = %self.provider, error = %error, "Connect failed");
                self.schedule_retry();
            }
        }
    }

    /// Handle a feature-create completion.
    pub(crate) fn on_feature_created(
        &mut self,
        generation: Uuid,
        pair: FeaturePair,
        outcome: switchboard_core::ResolverResult<FeatureRef>,
    ) {
        if generation != self.generation || self.state != BindState::Bound {
            // The connection this create belonged to is already gone; the
            // teardown's disconnect reclaims the remote side.
            debug!(provider = %self.provider, pair = %pair, "Discarding stale create result");
            return;
        }

        match outcome {
            Ok(reference) => {
                if !self.desired.contains(pair) || !self.live.contains_key(&pair) {
                    // Reassigned while the create was in flight.
                    debug!(provider = %self.provider, pair = %pair, "Created feature no longer desired");
                    if let Some(session) = self.session.clone() {
                        let provider = self.provider.clone();
                        tokio::spawn(async move {
                            if let Err(error) = session.remove_feature(&reference).await {
                                warn!(provider = %provider, error = %error, "Cleanup remove failed");
                            }
                        });
                    }
                    self.live.remove(&pair);
                    return;
                }

                debug!(provider = %self.provider, pair = %pair, "Feature created");
                if let Some(session) = &self.session {
                    self.table.insert(FeatureHandle::new(
                        self.provider.clone(),
                        reference.clone(),
                        Arc::clone(session),
                    ));
                }
                self.live.insert(pair, LiveEntry::Live(reference));
                self.observers.notify_created(pair);
                self.notice(ResolverNotice::FeatureAvailable {
                    pair,
                    provider: self.provider.clone(),
                });
            }
            Err(error) => {
                // Logged, not retried in isolation: the next recomputation
                // diffs desired against live and reissues the create.
                warn!(provider = %self.provider, pair = %pair, error = %error, "create_feature failed");
                self.live.remove(&pair);
            }
        }
    }

    /// Handle a provider-reported feature status change.
    pub(crate) fn on_feature_state(&mut self, generation: Uuid, pair: FeaturePair, state: FeatureState) {
        if generation != self.generation || !matches!(self.live.get(&pair), Some(LiveEntry::Live(_))) {
            return;
        }
        self.table.set_state(pair, state);
        self.observers.notify_state(pair, state);
    }

    /// Handle the connection dying or being dropped by the remote.
    pub(crate) fn on_connection_lost(&mut self, generation: Uuid, cause: DisconnectCause) {
        if generation != self.generation || self.state != BindState::Bound {
            debug!(provider = %self.provider, "Discarding stale death notification");
            return;
        }
        warn!(provider = %self.provider, cause = %cause, "Provider connection lost");

        let pairs: Vec<FeaturePair> = self.live.keys().copied().collect();
        for pair in pairs {
            if let Some(LiveEntry::Live(_)) = self.live.remove(&pair) {
                self.report_removed(pair);
            }
        }
        self.live.clear();
        self.session = None;
        self.connected_at = None;
        self.stop_session_tasks();

        self.notice(ResolverNotice::ProviderLost {
            provider: self.provider.clone(),
            cause,
        });
        self.schedule_retry();
    }

    /// Handle a backoff timer firing.
    pub(crate) fn on_retry_due(&mut self, generation: Uuid) {
        if generation != self.generation || self.state != BindState::RetryPending {
            debug!(provider = %self.provider, "Discarding stale retry timer");
            return;
        }
        self.retry_cancel = None;
        if self.desired.has_bindable() {
            info!(
                provider = %self.provider,
                attempt = self.backoff.attempt(),
                "Retrying provider connection"
            );
            self.start_connect();
        } else {
            self.state = BindState::Unbound;
        }
    }

    /// Tear the binding down: remove all live features, unsubscribe the
    /// death watch, disconnect, cancel any pending retry.
    pub(crate) fn unbind(&mut self) {
        if self.state == BindState::Unbound {
            return;
        }
        info!(provider = %self.provider, state = self.state.as_str(), "Unbinding provider");

        if let Some(token) = self.retry_cancel.take() {
            token.cancel();
        }
        self.stop_session_tasks();

        let mut refs = Vec::new();
        let pairs: Vec<FeaturePair> = self.live.keys().copied().collect();
        for pair in pairs {
            if let Some(LiveEntry::Live(reference)) = self.live.remove(&pair) {
                self.report_removed(pair);
                refs.push(reference);
            }
        }
        self.live.clear();

        if let Some(session) = self.session.take() {
            let provider = self.provider.clone();
            tokio::spawn(async move {
                for reference in refs {
                    if let Err(error) = session.remove_feature(&reference).await {
                        warn!(provider = %provider, error = %error, "remove_feature during unbind failed");
                    }
                }
                session.disconnect().await;
            });
        }

        // Invalidate every in-flight completion for this binding.
        self.generation = Uuid::new_v4();
        self.state = BindState::Unbound;
        self.connected_at = None;
        self.notice(ResolverNotice::ProviderUnbound {
            provider: self.provider.clone(),
        });
    }

    /// Broadcast an enable/disable to the provider if it is bound for `slot`.
    pub(crate) fn set_slot_enabled(&mut self, slot: switchboard_core::SlotId, enabled: bool) {
        if self.state != BindState::Bound || self.desired.for_slot(slot).is_empty() {
            return;
        }
        if let Some(session) = self.session.clone() {
            let provider = self.provider.clone();
            tokio::spawn(async move {
                if let Err(error) = session.set_slot_enabled(slot, enabled).await {
                    warn!(provider = %provider, slot = %slot, error = %error, "set_slot_enabled failed");
                }
            });
        }
    }

    fn start_connect(&mut self) {
        self.generation = Uuid::new_v4();
        self.state = BindState::Binding;
        debug!(provider = %self.provider, "Issuing connect request");

        let strategy = Arc::clone(&self.strategy);
        let provider = self.provider.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = strategy.connect(&provider).await;
            let _ = events.send(ResolverEvent::ConnectFinished {
                provider,
                generation,
                outcome,
            });
        });
    }

    fn issue_create(&mut self, pair: FeaturePair) {
        let Some(session) = self.session.clone() else {
            return;
        };
        self.live.insert(pair, LiveEntry::Pending);

        let relay = Arc::new(StatusRelay {
            provider: self.provider.clone(),
            generation: self.generation,
            events: self.events.clone(),
        });
        let provider = self.provider.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = session.create_feature(pair, relay).await;
            let _ = events.send(ResolverEvent::FeatureCreated {
                provider,
                generation,
                pair,
                outcome,
            });
        });
    }

    fn issue_remove(&mut self, pair: FeaturePair) {
        match self.live.remove(&pair) {
            Some(LiveEntry::Live(reference)) => {
                self.report_removed(pair);
                if let Some(session) = self.session.clone() {
                    let provider = self.provider.clone();
                    tokio::spawn(async move {
                        if let Err(error) = session.remove_feature(&reference).await {
                            warn!(provider = %provider, pair = %pair, error = %error, "remove_feature failed");
                        }
                    });
                }
            }
            // Pending: the create completion sees the pair undesired and
            // cleans up the remote side itself.
            Some(LiveEntry::Pending) | None => {}
        }
    }

    /// Publish a pair's removal: table, observers, notices.
    fn report_removed(&self, pair: FeaturePair) {
        self.table.remove_if_owner(pair, &self.provider);
        self.observers.notify_removed(pair);
        self.notice(ResolverNotice::FeatureUnavailable {
            pair,
            provider: self.provider.clone(),
        });
    }

    fn schedule_retry(&mut self) {
        self.state = BindState::RetryPending;
        let delay = self.backoff.next_delay();
        info!(
            provider = %self.provider,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );

        let token = CancellationToken::new();
        self.retry_cancel = Some(token.clone());
        let events = self.events.clone();
        let provider = self.provider.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(ResolverEvent::RetryDue { provider, generation });
                }
            }
        });
    }

    /// Abort the death watch and declaration forwarder.
    ///
    /// Aborting the watch task drops the `DeathWatch`, which is the explicit
    /// unsubscription: the notifier side observes the cancellation, so an
    /// intentional unbind racing a crash cannot produce a stale callback.
    fn stop_session_tasks(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        if let Some(task) = self.declaration_task.take() {
            task.abort();
        }
    }

    fn notice(&self, notice: ResolverNotice) {
        let _ = self.notices.send(notice);
    }
}

impl Drop for BindingController {
    fn drop(&mut self) {
        if let Some(token) = self.retry_cancel.take() {
            token.cancel();
        }
        self.stop_session_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::SlotId;
    use switchboard_test::{MockConnector, mmtel_rcs};
    use tokio::sync::mpsc::unbounded_channel;

    fn controller(
        connector: Arc<MockConnector>,
    ) -> (
        BindingController,
        mpsc::UnboundedReceiver<ResolverEvent>,
    ) {
        let (tx, rx) = unbounded_channel();
        let (notices, _) = broadcast::channel(64);
        let controller = BindingController::new(
            ProviderId::new("com.a/Svc"),
            connector,
            BackoffPolicy::default(),
            tx,
            Arc::new(FeatureTable::new()),
            Arc::new(ObserverRegistry::new()),
            notices,
        );
        (controller, rx)
    }

    #[tokio::test]
    async fn test_bind_issues_connect_and_transitions() {
        let connector = Arc::new(MockConnector::new());
        let (mut ctrl, mut rx) = controller(Arc::clone(&connector));

        ctrl.bind(mmtel_rcs(&[0]));
        assert_eq!(ctrl.state(), BindState::Binding);

        let event = rx.recv().await.unwrap();
        match event {
            ResolverEvent::ConnectFinished { provider, outcome, .. } => {
                assert_eq!(provider, ProviderId::new("com.a/Svc"));
                assert!(outcome.is_ok());
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_bind_outside_unbound_is_ignored() {
        let connector = Arc::new(MockConnector::new());
        let (mut ctrl, _rx) = controller(Arc::clone(&connector));

        ctrl.bind(mmtel_rcs(&[0]));
        ctrl.bind(mmtel_rcs(&[0]));
        tokio::task::yield_now().await;
        assert_eq!(connector.connect_count(&ProviderId::new("com.a/Svc")), 1);
    }

    #[tokio::test]
    async fn test_stale_connect_result_is_discarded_and_torn_down() {
        let connector = Arc::new(MockConnector::new());
        let (mut ctrl, mut rx) = controller(Arc::clone(&connector));
        let provider = ProviderId::new("com.a/Svc");

        ctrl.bind(mmtel_rcs(&[0]));
        let ResolverEvent::ConnectFinished { generation, outcome, .. } = rx.recv().await.unwrap()
        else {
            panic!("expected connect completion");
        };

        // Unbind overtakes the in-flight connect.
        ctrl.unbind();
        assert_eq!(ctrl.state(), BindState::Unbound);

        ctrl.on_connect_finished(generation, outcome);
        assert_eq!(ctrl.state(), BindState::Unbound);
        assert_eq!(ctrl.live_pair_count(), 0);

        // The unwanted session gets disconnected by the discard path.
        tokio::task::yield_now().await;
        let session = connector.session(&provider).unwrap();
        for _ in 0..20 {
            if session.is_disconnected() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(session.is_disconnected());
    }

    #[tokio::test]
    async fn test_connect_failure_schedules_retry() {
        let connector = Arc::new(MockConnector::new());
        let (mut ctrl, mut rx) = controller(Arc::clone(&connector));
        let provider = ProviderId::new("com.a/Svc");
        connector.fail_connects(&provider, 1);

        ctrl.bind(mmtel_rcs(&[0]));
        let ResolverEvent::ConnectFinished { generation, outcome, .. } = rx.recv().await.unwrap()
        else {
            panic!("expected connect completion");
        };
        ctrl.on_connect_finished(generation, outcome);

        assert_eq!(ctrl.state(), BindState::RetryPending);
        assert_eq!(ctrl.retry_attempts(), 1);
    }

    #[tokio::test]
    async fn test_set_slot_enabled_requires_bound_slot() {
        let connector = Arc::new(MockConnector::new());
        let (mut ctrl, mut rx) = controller(Arc::clone(&connector));
        let provider = ProviderId::new("com.a/Svc");

        ctrl.bind(mmtel_rcs(&[0]));
        let ResolverEvent::ConnectFinished { generation, outcome, .. } = rx.recv().await.unwrap()
        else {
            panic!("expected connect completion");
        };
        ctrl.on_connect_finished(generation, outcome);

        // Slot 1 is not part of the assignment: no broadcast.
        ctrl.set_slot_enabled(SlotId::new(1), true);
        ctrl.set_slot_enabled(SlotId::new(0), false);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let session = connector.session(&provider).unwrap();
        assert_eq!(session.enable_log(), vec![(SlotId::new(0), false)]);
    }
}
