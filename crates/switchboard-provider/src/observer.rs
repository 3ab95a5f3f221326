//! Feature status callbacks.

use std::fmt;

use switchboard_core::FeaturePair;

/// Status of a live feature as reported by its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    /// The feature exists but is still initializing.
    Initializing,
    /// The feature is ready for use.
    Ready,
    /// The feature is temporarily unavailable.
    Unavailable,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Provider-side sink for per-feature status transitions.
///
/// Passed to [`ProviderSession::create_feature`](crate::ProviderSession::create_feature);
/// the remote side drives it on its own callback thread. Implementations must
/// not block and must not assume any particular calling thread.
pub trait FeatureStatusSink: Send + Sync {
    /// The feature's status changed.
    fn on_state(&self, pair: FeaturePair, state: FeatureState);
}

/// Caller-registered observer for a (slot, feature) pair.
///
/// Registration persists across rebinds: when a provider crashes and is later
/// reconnected, the same observer sees the removal and the re-creation.
pub trait FeatureObserver: Send + Sync {
    /// A live handle for the pair became available.
    fn on_created(&self, pair: FeaturePair);

    /// The pair's handle was removed (reassignment, unbind, or crash).
    fn on_removed(&self, pair: FeaturePair);

    /// The provider reported a status change for the pair.
    fn on_state_changed(&self, pair: FeaturePair, state: FeatureState);
}
