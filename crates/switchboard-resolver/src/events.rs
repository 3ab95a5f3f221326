//! The resolver's serialized event queue and public notice stream.

use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use switchboard_core::{FeaturePair, FeatureSet, ProviderId, ResolverResult, SlotId};
use switchboard_provider::{DisconnectCause, FeatureRef, FeatureState, ProviderSession};

use crate::resolver::ProviderStatus;

/// Everything the orchestrator processes, external commands and internal
/// completions alike, in strict arrival order.
pub(crate) enum ResolverEvent {
    /// A package was installed or updated.
    PackageAdded { package: String },
    /// A package was uninstalled.
    PackageRemoved { package: String },
    /// The per-slot override configuration changed.
    OverrideChanged {
        slot: SlotId,
        provider: Option<ProviderId>,
    },
    /// Test-only replacement of the device default provider.
    SetDeviceDefault { provider: Option<ProviderId> },
    /// Enable or disable serving on a slot, broadcast to bound controllers.
    SetSlotEnabled { slot: SlotId, enabled: bool },
    /// Snapshot per-provider controller state.
    StatusReport {
        ack: oneshot::Sender<Vec<ProviderStatus>>,
    },
    /// Ack once every previously queued event has been processed.
    Settled { ack: oneshot::Sender<()> },
    /// Unbind everything and stop the loop.
    Shutdown { ack: oneshot::Sender<()> },

    /// An async connect attempt finished.
    ConnectFinished {
        provider: ProviderId,
        generation: Uuid,
        outcome: ResolverResult<Arc<dyn ProviderSession>>,
    },
    /// A live connection was lost or died.
    ConnectionLost {
        provider: ProviderId,
        generation: Uuid,
        cause: DisconnectCause,
    },
    /// A backoff retry timer fired.
    RetryDue { provider: ProviderId, generation: Uuid },
    /// An async `create_feature` finished.
    FeatureCreated {
        provider: ProviderId,
        generation: Uuid,
        pair: FeaturePair,
        outcome: ResolverResult<FeatureRef>,
    },
    /// The provider reported a status change for a live feature.
    FeatureStateChanged {
        provider: ProviderId,
        generation: Uuid,
        pair: FeaturePair,
        state: FeatureState,
    },
    /// The provider pushed a new feature declaration mid-session.
    DeclarationChanged {
        provider: ProviderId,
        features: FeatureSet,
    },

    /// A capability query finished (success, failure, or timeout).
    QueryFinished {
        provider: ProviderId,
        outcome: ResolverResult<FeatureSet>,
    },
    /// A fixed-delay query retry timer fired.
    QueryRetryDue { provider: ProviderId },
}

impl ResolverEvent {
    /// Short name for logging.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::PackageAdded { .. } => "package_added",
            Self::PackageRemoved { .. } => "package_removed",
            Self::OverrideChanged { .. } => "override_changed",
            Self::SetDeviceDefault { .. } => "set_device_default",
            Self::SetSlotEnabled { .. } => "set_slot_enabled",
            Self::StatusReport { .. } => "status_report",
            Self::Settled { .. } => "settled",
            Self::Shutdown { .. } => "shutdown",
            Self::ConnectFinished { .. } => "connect_finished",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::RetryDue { .. } => "retry_due",
            Self::FeatureCreated { .. } => "feature_created",
            Self::FeatureStateChanged { .. } => "feature_state_changed",
            Self::DeclarationChanged { .. } => "declaration_changed",
            Self::QueryFinished { .. } => "query_finished",
            Self::QueryRetryDue { .. } => "query_retry_due",
        }
    }
}

/// Broadcast notifications of resolver state transitions.
///
/// Best-effort: lagging subscribers lose the oldest notices, and nothing in
/// the resolver depends on anyone listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverNotice {
    /// A provider connection was established.
    ProviderBound {
        /// The bound provider.
        provider: ProviderId,
    },
    /// A provider connection was lost or died; a retry is scheduled.
    ProviderLost {
        /// The lost provider.
        provider: ProviderId,
        /// Why the connection went away.
        cause: DisconnectCause,
    },
    /// A provider was intentionally unbound.
    ProviderUnbound {
        /// The unbound provider.
        provider: ProviderId,
    },
    /// A live feature handle became available.
    FeatureAvailable {
        /// The (slot, feature) pair.
        pair: FeaturePair,
        /// The provider serving it.
        provider: ProviderId,
    },
    /// A live feature handle went away.
    FeatureUnavailable {
        /// The (slot, feature) pair.
        pair: FeaturePair,
        /// The provider that was serving it.
        provider: ProviderId,
    },
}
