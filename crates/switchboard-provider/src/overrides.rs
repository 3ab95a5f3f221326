//! Per-slot provider override configuration.

use async_trait::async_trait;

use switchboard_core::{ProviderId, SlotId};

/// Source of per-slot carrier overrides.
///
/// Read once per slot at startup to prime the resolver's override table.
/// Later changes are delivered as `override_changed` events on the resolver
/// surface by whoever consumes the underlying slot-keyed notification.
#[async_trait]
pub trait OverrideSource: Send + Sync {
    /// The provider configured to own `slot`, if any.
    async fn override_for(&self, slot: SlotId) -> Option<ProviderId>;
}
