//! Dynamic capability queries for candidates without static declarations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use switchboard_core::{ProviderId, ResolverError};
use switchboard_provider::ConnectionStrategy;

use crate::events::ResolverEvent;

/// Issues and supervises capability queries, one in flight per candidate.
///
/// A query opens a transient connection (distinct from the binding
/// controller's long-lived one), requests a feature report under an explicit
/// timeout, and posts the typed outcome back onto the event queue. Failures
/// are retried after a fixed delay; duplicate requests while one is
/// outstanding are no-ops.
pub(crate) struct QueryCoordinator {
    timeout: Duration,
    retry_delay: Duration,
    in_flight: HashSet<ProviderId>,
    retry_timers: HashMap<ProviderId, CancellationToken>,
    outstanding: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<ResolverEvent>,
}

impl QueryCoordinator {
    pub(crate) fn new(
        timeout: Duration,
        retry_delay: Duration,
        outstanding: Arc<AtomicUsize>,
        events: mpsc::UnboundedSender<ResolverEvent>,
    ) -> Self {
        Self {
            timeout,
            retry_delay,
            in_flight: HashSet::new(),
            retry_timers: HashMap::new(),
            outstanding,
            events,
        }
    }

    /// Start a query for `provider` unless one is already outstanding.
    pub(crate) fn start(&mut self, provider: ProviderId, strategy: Arc<dyn ConnectionStrategy>) {
        if self.in_flight.contains(&provider) {
            debug!(provider = %provider, "Capability query already in flight, suppressing duplicate");
            return;
        }
        if let Some(token) = self.retry_timers.remove(&provider) {
            token.cancel();
        }

        info!(provider = %provider, "Issuing capability query");
        self.in_flight.insert(provider.clone());
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let timeout = self.timeout;
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, strategy.query_features(&provider))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ResolverError::QueryTimeout {
                    provider: provider.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            let _ = events.send(ResolverEvent::QueryFinished { provider, outcome });
        });
    }

    /// Bookkeeping for a processed completion. Must run for every
    /// `QueryFinished` event, even when the candidate is gone.
    pub(crate) fn on_finished(&mut self, provider: &ProviderId) {
        if self.in_flight.remove(provider) {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Schedule a fixed-delay retry for a failed query.
    pub(crate) fn schedule_retry(&mut self, provider: ProviderId) {
        if let Some(previous) = self.retry_timers.remove(&provider) {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.retry_timers.insert(provider.clone(), token.clone());

        let delay = self.retry_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(ResolverEvent::QueryRetryDue { provider });
                }
            }
        });
    }

    /// Forget a candidate: cancel its retry timer. An in-flight query cannot
    /// be recalled; its completion is ignored once the candidate is gone.
    pub(crate) fn forget(&mut self, provider: &ProviderId) {
        if let Some(token) = self.retry_timers.remove(provider) {
            token.cancel();
        }
    }
}

impl Drop for QueryCoordinator {
    fn drop(&mut self) {
        for token in self.retry_timers.values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::FeatureSet;
    use switchboard_test::MockConnector;
    use tokio::sync::mpsc::unbounded_channel;

    fn coordinator() -> (
        QueryCoordinator,
        mpsc::UnboundedReceiver<ResolverEvent>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = unbounded_channel();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let coordinator = QueryCoordinator::new(
            Duration::from_millis(200),
            Duration::from_millis(100),
            Arc::clone(&outstanding),
            tx,
        );
        (coordinator, rx, outstanding)
    }

    #[tokio::test]
    async fn test_query_success_posts_features() {
        let (mut coordinator, mut rx, outstanding) = coordinator();
        let connector = Arc::new(MockConnector::new());
        let provider = ProviderId::new("com.a/Svc");
        connector.script_report(&provider, Ok(FeatureSet::new()));

        coordinator.start(provider.clone(), Arc::clone(&connector) as Arc<dyn ConnectionStrategy>);
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);

        let ResolverEvent::QueryFinished { provider: p, outcome } = rx.recv().await.unwrap()
        else {
            panic!("expected query completion");
        };
        assert_eq!(p, provider);
        assert!(outcome.is_ok());

        coordinator.on_finished(&p);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_start_suppressed() {
        let (mut coordinator, _rx, _) = coordinator();
        let connector = Arc::new(MockConnector::new());
        let provider = ProviderId::new("com.a/Svc");
        let _gate = connector.hold_queries(&provider);

        coordinator.start(provider.clone(), Arc::clone(&connector) as Arc<dyn ConnectionStrategy>);
        coordinator.start(provider.clone(), Arc::clone(&connector) as Arc<dyn ConnectionStrategy>);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.query_count(&provider), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_produces_structured_error() {
        let (mut coordinator, mut rx, _) = coordinator();
        let connector = Arc::new(MockConnector::new());
        let provider = ProviderId::new("com.a/Svc");
        let _gate = connector.hold_queries(&provider);

        coordinator.start(provider.clone(), Arc::clone(&connector) as Arc<dyn ConnectionStrategy>);
        tokio::time::advance(Duration::from_millis(250)).await;

        let ResolverEvent::QueryFinished { outcome, .. } = rx.recv().await.unwrap() else {
            panic!("expected query completion");
        };
        assert!(matches!(outcome, Err(ResolverError::QueryTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timer_fires_after_fixed_delay() {
        let (mut coordinator, mut rx, _) = coordinator();
        let provider = ProviderId::new("com.a/Svc");

        coordinator.schedule_retry(provider.clone());
        tokio::time::advance(Duration::from_millis(150)).await;

        let ResolverEvent::QueryRetryDue { provider: p } = rx.recv().await.unwrap() else {
            panic!("expected retry event");
        };
        assert_eq!(p, provider);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_cancels_retry() {
        let (mut coordinator, mut rx, _) = coordinator();
        let provider = ProviderId::new("com.a/Svc");

        coordinator.schedule_retry(provider.clone());
        coordinator.forget(&provider);
        tokio::time::advance(Duration::from_millis(500)).await;

        assert!(rx.try_recv().is_err());
    }
}
