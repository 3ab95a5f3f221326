//! The candidate registry: discovered providers and their declarations.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use switchboard_core::{
    CandidateDescriptor, FeatureSet, InterfaceFlavor, ProviderId, ResolverResult,
};
use switchboard_provider::ProviderDirectory;

/// Where a candidate's current feature declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureOrigin {
    /// Declared statically in the candidate's package metadata.
    StaticDeclaration,
    /// No static declaration; a dynamic capability query is owed.
    PendingQuery,
    /// Obtained from a completed capability query or a provider-initiated
    /// declaration update.
    Queried,
}

/// A discovered provider candidate.
#[derive(Debug, Clone)]
pub struct ProviderCandidate {
    /// The directory descriptor the candidate was admitted with.
    pub descriptor: CandidateDescriptor,
    /// The currently known declared (slot, feature) support.
    pub features: FeatureSet,
    /// Where `features` came from.
    pub origin: FeatureOrigin,
    /// When the candidate was first discovered.
    pub discovered_at: DateTime<Utc>,
    /// When the candidate was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ProviderCandidate {
    fn from_descriptor(descriptor: CandidateDescriptor) -> Self {
        let now = Utc::now();
        let (features, origin) = match &descriptor.static_features {
            Some(features) => (features.clone(), FeatureOrigin::StaticDeclaration),
            None => (FeatureSet::new(), FeatureOrigin::PendingQuery),
        };
        Self {
            descriptor,
            features,
            origin,
            discovered_at: now,
            updated_at: now,
        }
    }

    /// The candidate's identity.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.descriptor.provider
    }

    /// Whether a capability query is still owed.
    #[must_use]
    pub fn is_pending_query(&self) -> bool {
        self.origin == FeatureOrigin::PendingQuery
    }
}

/// Outcome of admitting a descriptor into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The candidate was not known before.
    Inserted,
    /// An existing entry was replaced.
    Replaced,
    /// The descriptor's permission marker did not match; dropped.
    Rejected,
}

/// Cache of discovered provider candidates, keyed by identity.
///
/// Entries persist until explicit removal: losing a connection or an
/// assignment does not evict a candidate from the catalog.
#[derive(Debug)]
pub(crate) struct CandidateRegistry {
    entries: HashMap<ProviderId, ProviderCandidate>,
    expected_marker: String,
    allow_unverified: bool,
}

impl CandidateRegistry {
    pub(crate) fn new(expected_marker: impl Into<String>, allow_unverified: bool) -> Self {
        Self {
            entries: HashMap::new(),
            expected_marker: expected_marker.into(),
            allow_unverified,
        }
    }

    /// Query the directory and admit the results.
    ///
    /// Returns the identities of every admitted candidate. On a directory
    /// error the registry is left unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the directory's `Discovery` error.
    pub(crate) async fn discover(
        &mut self,
        directory: &dyn ProviderDirectory,
        package_filter: Option<&str>,
    ) -> ResolverResult<Vec<ProviderId>> {
        let descriptors = directory
            .query(InterfaceFlavor::Current.interface_name(), package_filter)
            .await?;
        debug!(
            count = descriptors.len(),
            filter = package_filter.unwrap_or("<all>"),
            "Directory reported candidates"
        );

        let mut admitted = Vec::new();
        for descriptor in descriptors {
            let provider = descriptor.provider.clone();
            if self.upsert(descriptor) != UpsertOutcome::Rejected {
                admitted.push(provider);
            }
        }
        Ok(admitted)
    }

    /// Merge or replace a cached entry by identifier.
    ///
    /// A package update resets a dynamic candidate to `PendingQuery` — its
    /// implementation may have changed, so previously queried features are
    /// stale.
    pub(crate) fn upsert(&mut self, descriptor: CandidateDescriptor) -> UpsertOutcome {
        if descriptor.permission_marker != self.expected_marker {
            if self.allow_unverified {
                debug!(
                    provider = %descriptor.provider,
                    marker = %descriptor.permission_marker,
                    "Admitting unverified candidate (test override)"
                );
            } else {
                warn!(
                    provider = %descriptor.provider,
                    marker = %descriptor.permission_marker,
                    "Dropping candidate with unexpected permission marker"
                );
                return UpsertOutcome::Rejected;
            }
        }

        match self.entries.get_mut(&descriptor.provider) {
            Some(existing) => {
                let (features, origin) = match &descriptor.static_features {
                    Some(features) => (features.clone(), FeatureOrigin::StaticDeclaration),
                    None => (FeatureSet::new(), FeatureOrigin::PendingQuery),
                };
                existing.descriptor = descriptor;
                existing.features = features;
                existing.origin = origin;
                existing.updated_at = Utc::now();
                UpsertOutcome::Replaced
            }
            None => {
                self.entries.insert(
                    descriptor.provider.clone(),
                    ProviderCandidate::from_descriptor(descriptor),
                );
                UpsertOutcome::Inserted
            }
        }
    }

    pub(crate) fn get(&self, provider: &ProviderId) -> Option<&ProviderCandidate> {
        self.entries.get(provider)
    }

    /// Every candidate belonging to `package`.
    pub(crate) fn get_by_package(&self, package: &str) -> Vec<&ProviderCandidate> {
        self.entries
            .values()
            .filter(|c| c.provider().package() == package)
            .collect()
    }

    /// Drop a single candidate.
    pub(crate) fn remove(&mut self, provider: &ProviderId) -> bool {
        self.entries.remove(provider).is_some()
    }

    /// Drop every candidate belonging to `package`, returning their ids.
    pub(crate) fn remove_package(&mut self, package: &str) -> Vec<ProviderId> {
        let removed: Vec<ProviderId> = self
            .entries
            .keys()
            .filter(|id| id.package() == package)
            .cloned()
            .collect();
        for id in &removed {
            self.entries.remove(id);
        }
        removed
    }

    /// Record the outcome of a capability query.
    ///
    /// Returns `false` when the candidate is gone (uninstalled while the
    /// query was in flight).
    pub(crate) fn set_queried(&mut self, provider: &ProviderId, features: FeatureSet) -> bool {
        match self.entries.get_mut(provider) {
            Some(candidate) => {
                candidate.features = features;
                candidate.origin = FeatureOrigin::Queried;
                candidate.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Replace a candidate's declared features (provider-initiated update).
    pub(crate) fn replace_features(&mut self, provider: &ProviderId, features: FeatureSet) -> bool {
        match self.entries.get_mut(provider) {
            Some(candidate) => {
                candidate.features = features;
                candidate.origin = FeatureOrigin::Queried;
                candidate.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// A candidate's currently declared features, empty when unknown.
    pub(crate) fn declared_features(&self, provider: &ProviderId) -> FeatureSet {
        self.entries
            .get(provider)
            .map(|c| c.features.clone())
            .unwrap_or_default()
    }

    pub(crate) fn ids(&self) -> Vec<ProviderId> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{BIND_PERMISSION_MARKER, FeatureKind, FeaturePair, SlotId};

    fn features() -> FeatureSet {
        [FeaturePair::new(SlotId::new(0), FeatureKind::MmTel)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_marker_mismatch_rejected() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        let descriptor = CandidateDescriptor::new("com.a/Svc", "wrong.marker");
        assert_eq!(registry.upsert(descriptor), UpsertOutcome::Rejected);
        assert!(registry.get(&ProviderId::new("com.a/Svc")).is_none());
    }

    #[test]
    fn test_marker_mismatch_admitted_with_test_override() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, true);
        let descriptor = CandidateDescriptor::new("com.a/Svc", "wrong.marker");
        assert_eq!(registry.upsert(descriptor), UpsertOutcome::Inserted);
    }

    #[test]
    fn test_static_candidate_not_pending() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        let descriptor = CandidateDescriptor::new("com.a/Svc", BIND_PERMISSION_MARKER)
            .with_static_features(features());
        registry.upsert(descriptor);

        let candidate = registry.get(&ProviderId::new("com.a/Svc")).unwrap();
        assert!(!candidate.is_pending_query());
        assert_eq!(candidate.origin, FeatureOrigin::StaticDeclaration);
        assert_eq!(candidate.features, features());
    }

    #[test]
    fn test_dynamic_candidate_pending_until_queried() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        registry.upsert(CandidateDescriptor::new("com.a/Svc", BIND_PERMISSION_MARKER));

        let id = ProviderId::new("com.a/Svc");
        assert!(registry.get(&id).unwrap().is_pending_query());

        assert!(registry.set_queried(&id, features()));
        let candidate = registry.get(&id).unwrap();
        assert!(!candidate.is_pending_query());
        assert_eq!(candidate.origin, FeatureOrigin::Queried);
    }

    #[test]
    fn test_upsert_resets_dynamic_candidate_to_pending() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        let id = ProviderId::new("com.a/Svc");
        registry.upsert(CandidateDescriptor::new("com.a/Svc", BIND_PERMISSION_MARKER));
        registry.set_queried(&id, features());

        // Package update: queried features are stale.
        let outcome =
            registry.upsert(CandidateDescriptor::new("com.a/Svc", BIND_PERMISSION_MARKER));
        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert!(registry.get(&id).unwrap().is_pending_query());
    }

    #[test]
    fn test_remove_package_drops_all_components() {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        registry.upsert(CandidateDescriptor::new("com.a/One", BIND_PERMISSION_MARKER));
        registry.upsert(CandidateDescriptor::new("com.a/Two", BIND_PERMISSION_MARKER));
        registry.upsert(CandidateDescriptor::new("com.b/Svc", BIND_PERMISSION_MARKER));

        let removed = registry.remove_package("com.a");
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.ids(), vec![ProviderId::new("com.b/Svc")]);
        assert_eq!(registry.get_by_package("com.a").len(), 0);
    }

    #[test]
    fn test_declared_features_empty_for_unknown() {
        let registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        assert!(registry.declared_features(&ProviderId::new("ghost")).is_empty());
    }
}
