//! The assignment engine: which candidate owns which (slot, feature) pairs.
//!
//! Pure policy over the candidate registry, the override table, and the
//! device default. Recomputed wholesale on every catalog or override event;
//! never mutated incrementally.

use std::collections::HashMap;

use switchboard_core::{FeatureSet, ProviderId, ResolverError, ResolverResult, SlotId};

use crate::catalog::CandidateRegistry;

/// Per-slot carrier overrides, bounded by the configured slot count.
#[derive(Debug, Clone)]
pub(crate) struct SlotOverrideTable {
    slot_count: u32,
    overrides: HashMap<SlotId, ProviderId>,
}

impl SlotOverrideTable {
    pub(crate) fn new(slot_count: u32) -> Self {
        Self {
            slot_count,
            overrides: HashMap::new(),
        }
    }

    pub(crate) fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slot_count).map(SlotId::new)
    }

    pub(crate) fn contains_slot(&self, slot: SlotId) -> bool {
        slot.index() < self.slot_count
    }

    pub(crate) fn override_for(&self, slot: SlotId) -> Option<&ProviderId> {
        self.overrides.get(&slot)
    }

    /// Set or clear the override for a slot.
    ///
    /// Returns whether the table actually changed, so an override-changed
    /// event naming the already-configured provider is a no-op end to end.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range slots as a `ConfigInconsistency` no-op.
    pub(crate) fn set(
        &mut self,
        slot: SlotId,
        provider: Option<ProviderId>,
    ) -> ResolverResult<bool> {
        if !self.contains_slot(slot) {
            return Err(ResolverError::ConfigInconsistency(format!(
                "override for out-of-range {slot} (slot_count {})",
                self.slot_count
            )));
        }
        let changed = match provider {
            Some(provider) => self.overrides.insert(slot, provider.clone()) != Some(provider),
            None => self.overrides.remove(&slot).is_some(),
        };
        Ok(changed)
    }

    /// The slots `provider` is the override for.
    pub(crate) fn override_slots(&self, provider: &ProviderId) -> Vec<SlotId> {
        let mut slots: Vec<SlotId> = self
            .overrides
            .iter()
            .filter(|(_, p)| *p == provider)
            .map(|(slot, _)| *slot)
            .collect();
        slots.sort_unstable();
        slots
    }

    pub(crate) fn is_override(&self, provider: &ProviderId) -> bool {
        self.overrides.values().any(|p| p == provider)
    }
}

/// Compute the desired (slot, feature) set for one candidate.
///
/// - A carrier override owns its declared pairs on exactly the slots it is
///   the override for — never a slot it wasn't assigned, even if it declares
///   support there. Override status wins over device-default status.
/// - The device default covers every slot without an override in full, and
///   fills the gaps the override's declaration leaves open on the rest.
/// - Anything else owns nothing.
///
/// Emergency pairs ride along for callback completeness; whether the result
/// justifies a live connection is [`FeatureSet::has_bindable`]'s call.
pub(crate) fn compute_assignment(
    candidate: &ProviderId,
    registry: &CandidateRegistry,
    overrides: &SlotOverrideTable,
    device_default: Option<&ProviderId>,
) -> FeatureSet {
    let declared = registry.declared_features(candidate);
    if declared.is_empty() {
        return FeatureSet::new();
    }

    let override_slots = overrides.override_slots(candidate);
    if !override_slots.is_empty() {
        let mut desired = FeatureSet::new();
        for slot in override_slots {
            desired.extend(&declared.for_slot(slot));
        }
        return desired;
    }

    if device_default == Some(candidate) {
        let mut desired = FeatureSet::new();
        for slot in overrides.slots() {
            let mine = declared.for_slot(slot);
            match overrides.override_for(slot) {
                None => desired.extend(&mine),
                Some(override_id) => {
                    let covered = registry.declared_features(override_id).for_slot(slot);
                    desired.extend(&mine.minus(&covered));
                }
            }
        }
        return desired;
    }

    FeatureSet::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{
        BIND_PERMISSION_MARKER, CandidateDescriptor, FeatureKind, FeaturePair,
    };

    fn pair(slot: u32, kind: FeatureKind) -> FeaturePair {
        FeaturePair::new(SlotId::new(slot), kind)
    }

    fn set(pairs: &[(u32, FeatureKind)]) -> FeatureSet {
        pairs.iter().map(|&(s, k)| pair(s, k)).collect()
    }

    fn registry_with(candidates: &[(&str, FeatureSet)]) -> CandidateRegistry {
        let mut registry = CandidateRegistry::new(BIND_PERMISSION_MARKER, false);
        for (id, features) in candidates {
            registry.upsert(
                CandidateDescriptor::new(*id, BIND_PERMISSION_MARKER)
                    .with_static_features(features.clone()),
            );
        }
        registry
    }

    #[test]
    fn test_device_default_covers_everything_without_overrides() {
        let default = ProviderId::new("com.default/Svc");
        let declared = set(&[
            (0, FeatureKind::MmTel),
            (0, FeatureKind::Rcs),
            (1, FeatureKind::MmTel),
            (1, FeatureKind::Rcs),
        ]);
        let registry = registry_with(&[("com.default/Svc", declared.clone())]);
        let overrides = SlotOverrideTable::new(2);

        let desired = compute_assignment(&default, &registry, &overrides, Some(&default));
        assert_eq!(desired, declared);
    }

    #[test]
    fn test_override_filtered_to_assigned_slot_only() {
        // The override declares support on both slots but is only assigned
        // slot 0; it must not acquire slot 1.
        let override_id = ProviderId::new("com.carrier/Svc");
        let registry = registry_with(&[(
            "com.carrier/Svc",
            set(&[(0, FeatureKind::MmTel), (1, FeatureKind::MmTel)]),
        )]);
        let mut overrides = SlotOverrideTable::new(2);
        overrides
            .set(SlotId::new(0), Some(override_id.clone()))
            .unwrap();

        let desired = compute_assignment(&override_id, &registry, &overrides, None);
        assert_eq!(desired, set(&[(0, FeatureKind::MmTel)]));
    }

    #[test]
    fn test_device_default_gap_filling() {
        // Scenario B: slot 0 override declares only MmTel; the default
        // declaring MmTel+Rcs on both slots keeps slot0/rcs and all of slot 1.
        let default = ProviderId::new("com.default/Svc");
        let override_id = ProviderId::new("com.carrier/Svc");
        let registry = registry_with(&[
            (
                "com.default/Svc",
                set(&[
                    (0, FeatureKind::MmTel),
                    (0, FeatureKind::Rcs),
                    (1, FeatureKind::MmTel),
                    (1, FeatureKind::Rcs),
                ]),
            ),
            ("com.carrier/Svc", set(&[(0, FeatureKind::MmTel)])),
        ]);
        let mut overrides = SlotOverrideTable::new(2);
        overrides
            .set(SlotId::new(0), Some(override_id.clone()))
            .unwrap();

        let desired = compute_assignment(&default, &registry, &overrides, Some(&default));
        assert_eq!(
            desired,
            set(&[
                (0, FeatureKind::Rcs),
                (1, FeatureKind::MmTel),
                (1, FeatureKind::Rcs),
            ])
        );
    }

    #[test]
    fn test_unrelated_candidate_owns_nothing() {
        let registry = registry_with(&[("com.other/Svc", set(&[(0, FeatureKind::MmTel)]))]);
        let overrides = SlotOverrideTable::new(2);
        let default = ProviderId::new("com.default/Svc");

        let desired = compute_assignment(
            &ProviderId::new("com.other/Svc"),
            &registry,
            &overrides,
            Some(&default),
        );
        assert!(desired.is_empty());
    }

    #[test]
    fn test_override_status_wins_over_default_status() {
        // A candidate that is both slot 0's override and the device default
        // is treated as an override: slot 0 only, no gap filling elsewhere.
        let id = ProviderId::new("com.both/Svc");
        let registry = registry_with(&[(
            "com.both/Svc",
            set(&[(0, FeatureKind::MmTel), (1, FeatureKind::MmTel)]),
        )]);
        let mut overrides = SlotOverrideTable::new(2);
        overrides.set(SlotId::new(0), Some(id.clone())).unwrap();

        let desired = compute_assignment(&id, &registry, &overrides, Some(&id));
        assert_eq!(desired, set(&[(0, FeatureKind::MmTel)]));
    }

    #[test]
    fn test_emergency_retained_but_not_bindable() {
        let default = ProviderId::new("com.default/Svc");
        let registry = registry_with(&[(
            "com.default/Svc",
            set(&[(0, FeatureKind::Emergency)]),
        )]);
        let overrides = SlotOverrideTable::new(1);

        let desired = compute_assignment(&default, &registry, &overrides, Some(&default));
        assert!(desired.contains(pair(0, FeatureKind::Emergency)));
        assert!(!desired.has_bindable());
    }

    #[test]
    fn test_gap_filling_against_unknown_override_covers_whole_slot() {
        // The configured override was uninstalled: its declaration is empty,
        // so the default covers the slot in full.
        let default = ProviderId::new("com.default/Svc");
        let registry = registry_with(&[("com.default/Svc", set(&[(0, FeatureKind::MmTel)]))]);
        let mut overrides = SlotOverrideTable::new(1);
        overrides
            .set(SlotId::new(0), Some(ProviderId::new("com.gone/Svc")))
            .unwrap();

        let desired = compute_assignment(&default, &registry, &overrides, Some(&default));
        assert_eq!(desired, set(&[(0, FeatureKind::MmTel)]));
    }

    #[test]
    fn test_out_of_range_slot_rejected() {
        let mut overrides = SlotOverrideTable::new(2);
        let result = overrides.set(SlotId::new(5), Some(ProviderId::new("com.a/Svc")));
        assert!(matches!(
            result,
            Err(ResolverError::ConfigInconsistency(_))
        ));
    }

    #[test]
    fn test_set_same_override_reports_unchanged() {
        let mut overrides = SlotOverrideTable::new(1);
        let id = ProviderId::new("com.a/Svc");
        assert!(overrides.set(SlotId::new(0), Some(id.clone())).unwrap());
        assert!(!overrides.set(SlotId::new(0), Some(id)).unwrap());
        assert!(overrides.set(SlotId::new(0), None).unwrap());
        assert!(!overrides.set(SlotId::new(0), None).unwrap());
    }
}
