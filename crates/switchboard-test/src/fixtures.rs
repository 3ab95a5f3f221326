//! Fixture builders for descriptors and feature sets.

use switchboard_core::{
    BIND_PERMISSION_MARKER, CandidateDescriptor, FeatureKind, FeaturePair, FeatureSet, SlotId,
};

/// Build a feature set from `(slot, kind)` tuples.
#[must_use]
pub fn feature_set(pairs: &[(u32, FeatureKind)]) -> FeatureSet {
    pairs
        .iter()
        .map(|&(slot, kind)| FeaturePair::new(SlotId::new(slot), kind))
        .collect()
}

/// MmTel + Rcs on every given slot.
#[must_use]
pub fn mmtel_rcs(slots: &[u32]) -> FeatureSet {
    slots
        .iter()
        .flat_map(|&slot| {
            [
                FeaturePair::new(SlotId::new(slot), FeatureKind::MmTel),
                FeaturePair::new(SlotId::new(slot), FeatureKind::Rcs),
            ]
        })
        .collect()
}

/// MmTel + Rcs + Emergency on every given slot.
#[must_use]
pub fn full_stack(slots: &[u32]) -> FeatureSet {
    slots
        .iter()
        .flat_map(|&slot| {
            [
                FeaturePair::new(SlotId::new(slot), FeatureKind::MmTel),
                FeaturePair::new(SlotId::new(slot), FeatureKind::Rcs),
                FeaturePair::new(SlotId::new(slot), FeatureKind::Emergency),
            ]
        })
        .collect()
}

/// A correctly guarded candidate with a static feature declaration.
#[must_use]
pub fn static_candidate(id: &str, features: FeatureSet) -> CandidateDescriptor {
    CandidateDescriptor::new(id, BIND_PERMISSION_MARKER).with_static_features(features)
}

/// A correctly guarded candidate whose features must be queried dynamically.
#[must_use]
pub fn dynamic_candidate(id: &str) -> CandidateDescriptor {
    CandidateDescriptor::new(id, BIND_PERMISSION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmtel_rcs_shape() {
        let set = mmtel_rcs(&[0, 1]);
        assert_eq!(set.len(), 4);
        assert!(set.has_bindable());
    }

    #[test]
    fn test_full_stack_includes_emergency() {
        let set = full_stack(&[0]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.bindable().count(), 2);
    }
}
