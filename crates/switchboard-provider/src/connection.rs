//! Remote provider connections: strategy, session handle, death watch.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use switchboard_core::{FeaturePair, FeatureSet, InterfaceFlavor, ProviderId, ResolverResult};

use crate::observer::FeatureStatusSink;

/// Why a live connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The remote end disconnected (service torn down, rebind elsewhere).
    Disconnected,
    /// The remote process died.
    Died,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Died => f.write_str("died"),
        }
    }
}

/// One-shot subscription to a connection's death.
///
/// Dropping the watch cancels the subscription; the notifier side observes
/// the cancellation and stops holding the callback. This is how a clean
/// unbind avoids stale death callbacks racing with an intentional teardown.
#[derive(Debug)]
pub struct DeathWatch {
    rx: oneshot::Receiver<DisconnectCause>,
}

impl DeathWatch {
    /// Create a connected notifier/watch pair.
    #[must_use]
    pub fn channel() -> (DeathNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (DeathNotifier { tx }, Self { rx })
    }

    /// Wait for the connection to go away.
    ///
    /// A notifier dropped without signalling is treated as a process death:
    /// the remote side vanished without the courtesy of a disconnect.
    pub async fn wait(self) -> DisconnectCause {
        self.rx.await.unwrap_or(DisconnectCause::Died)
    }
}

/// Sending half of a [`DeathWatch`].
#[derive(Debug)]
pub struct DeathNotifier {
    tx: oneshot::Sender<DisconnectCause>,
}

impl DeathNotifier {
    /// Signal the watcher. A cancelled watch ignores the signal.
    pub fn notify(self, cause: DisconnectCause) {
        let _ = self.tx.send(cause);
    }

    /// Whether the watch side is still subscribed.
    #[must_use]
    pub fn is_watched(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Opaque reference to a feature created on a remote provider.
///
/// Every successful `create_feature` mints a fresh reference, so a
/// bind → unbind → bind cycle yields new instances keyed by the same pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRef {
    id: Uuid,
    pair: FeaturePair,
}

impl FeatureRef {
    /// Mint a reference for a newly created feature.
    #[must_use]
    pub fn new(pair: FeaturePair) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair,
        }
    }

    /// The reference token.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The (slot, feature) pair the reference is scoped to.
    #[must_use]
    pub fn pair(&self) -> FeaturePair {
        self.pair
    }
}

/// The live remote handle of a bound provider.
///
/// All methods are asynchronous from the controller's perspective: a request
/// is issued and completes later, never blocking the resolver's event queue.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// The provider this session is bound to.
    fn provider(&self) -> &ProviderId;

    /// Subscribe to this connection's death. At most one watch is active per
    /// session; a second call replaces the first.
    fn watch_death(&self) -> DeathWatch;

    /// Create a feature on the remote provider.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::RemoteCall`] when the
    /// remote rejects the request; the caller logs and leaves reconciliation
    /// to the next recomputation.
    async fn create_feature(
        &self,
        pair: FeaturePair,
        status: Arc<dyn FeatureStatusSink>,
    ) -> ResolverResult<FeatureRef>;

    /// Remove a previously created feature.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::RemoteCall`] when the
    /// remote rejects the request.
    async fn remove_feature(&self, reference: &FeatureRef) -> ResolverResult<()>;

    /// Enable or disable serving on a slot, broadcast by the resolver.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::RemoteCall`] on rejection.
    async fn set_slot_enabled(&self, slot: switchboard_core::SlotId, enabled: bool)
    -> ResolverResult<()>;

    /// Take the provider-initiated feature-declaration update channel.
    ///
    /// Yields the provider's full new declaration whenever it changes its
    /// supported set mid-session. The channel can be taken once; subsequent
    /// calls return `None`.
    fn declaration_updates(&self) -> Option<mpsc::UnboundedReceiver<FeatureSet>>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&self);
}

/// How to reach providers of one interface flavor.
///
/// A strategy owns the interface name and both connection modes: the
/// long-lived session used by the binding controller, and the transient
/// capability-query channel. Selected per candidate at discovery time; the
/// controller itself is flavor-agnostic.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    /// The remote interface name this strategy binds.
    fn interface_name(&self) -> &'static str;

    /// Open a long-lived session to `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::Connection`] when the
    /// connect request is rejected; the caller schedules backoff.
    async fn connect(&self, provider: &ProviderId) -> ResolverResult<Arc<dyn ProviderSession>>;

    /// Open a transient connection and request a feature report.
    ///
    /// Distinct from the long-lived session: used only for candidates
    /// lacking a static declaration. The caller wraps this in its own
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::Query`] when the report
    /// cannot be obtained.
    async fn query_features(&self, provider: &ProviderId) -> ResolverResult<FeatureSet>;
}

/// The strategies available to the resolver, one per interface flavor.
#[derive(Clone)]
pub struct StrategySet {
    current: Arc<dyn ConnectionStrategy>,
    legacy: Arc<dyn ConnectionStrategy>,
}

impl StrategySet {
    /// Build a set from one strategy per flavor.
    #[must_use]
    pub fn new(current: Arc<dyn ConnectionStrategy>, legacy: Arc<dyn ConnectionStrategy>) -> Self {
        Self { current, legacy }
    }

    /// Use one strategy for every flavor.
    #[must_use]
    pub fn uniform(strategy: Arc<dyn ConnectionStrategy>) -> Self {
        Self {
            current: Arc::clone(&strategy),
            legacy: strategy,
        }
    }

    /// The strategy for the given flavor.
    #[must_use]
    pub fn for_flavor(&self, flavor: InterfaceFlavor) -> Arc<dyn ConnectionStrategy> {
        match flavor {
            InterfaceFlavor::Current => Arc::clone(&self.current),
            InterfaceFlavor::Legacy => Arc::clone(&self.legacy),
        }
    }
}

impl fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySet")
            .field("current", &self.current.interface_name())
            .field("legacy", &self.legacy.interface_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{FeatureKind, SlotId};

    #[tokio::test]
    async fn test_death_watch_delivers_cause() {
        let (notifier, watch) = DeathWatch::channel();
        assert!(notifier.is_watched());
        notifier.notify(DisconnectCause::Died);
        assert_eq!(watch.wait().await, DisconnectCause::Died);
    }

    #[tokio::test]
    async fn test_dropped_watch_cancels_subscription() {
        let (notifier, watch) = DeathWatch::channel();
        drop(watch);
        assert!(!notifier.is_watched());
    }

    #[tokio::test]
    async fn test_dropped_notifier_reads_as_death() {
        let (notifier, watch) = DeathWatch::channel();
        drop(notifier);
        assert_eq!(watch.wait().await, DisconnectCause::Died);
    }

    #[test]
    fn test_feature_refs_are_unique() {
        let pair = FeaturePair::new(SlotId::new(0), FeatureKind::MmTel);
        let a = FeatureRef::new(pair);
        let b = FeatureRef::new(pair);
        assert_eq!(a.pair(), b.pair());
        assert_ne!(a.id(), b.id());
    }
}
