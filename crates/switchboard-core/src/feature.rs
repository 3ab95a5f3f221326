//! Feature kinds, (slot, feature) pairs, and feature-set arithmetic.
//!
//! A [`FeatureSet`] is the unit the assignment engine and binding controller
//! trade in: the set of (slot, feature) pairs a provider declares, is desired
//! to serve, or currently serves live. Sets are ordered so diffs and test
//! assertions are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::slot::SlotId;

/// A discrete capability unit a provider can expose for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Multimedia telephony (voice/video calling).
    MmTel,
    /// Rich communication services (messaging, presence).
    Rcs,
    /// The emergency pseudo-feature. Tracked for callback completeness but
    /// never alone justifies a live connection.
    Emergency,
}

impl FeatureKind {
    /// Whether this is the emergency pseudo-feature.
    #[must_use]
    pub const fn is_emergency(self) -> bool {
        matches!(self, Self::Emergency)
    }

    /// Stable lowercase name, used in logs and wire identifiers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MmTel => "mmtel",
            Self::Rcs => "rcs",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (slot, feature) pair — the unit of ownership in the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeaturePair {
    /// The slot the feature is scoped to.
    pub slot: SlotId,
    /// The feature kind.
    pub kind: FeatureKind,
}

impl FeaturePair {
    /// Create a pair.
    #[must_use]
    pub const fn new(slot: SlotId, kind: FeatureKind) -> Self {
        Self { slot, kind }
    }

    /// Whether this pair is the emergency pseudo-feature on its slot.
    #[must_use]
    pub const fn is_emergency(self) -> bool {
        self.kind.is_emergency()
    }
}

impl fmt::Display for FeaturePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slot, self.kind)
    }
}

/// An ordered set of (slot, feature) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<FeaturePair>);

impl FeatureSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Number of pairs in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the set contains the given pair.
    #[must_use]
    pub fn contains(&self, pair: FeaturePair) -> bool {
        self.0.contains(&pair)
    }

    /// Insert a pair. Returns `true` if it was not already present.
    pub fn insert(&mut self, pair: FeaturePair) -> bool {
        self.0.insert(pair)
    }

    /// Remove a pair. Returns `true` if it was present.
    pub fn remove(&mut self, pair: FeaturePair) -> bool {
        self.0.remove(&pair)
    }

    /// Iterate over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = FeaturePair> + '_ {
        self.0.iter().copied()
    }

    /// The subset of pairs scoped to `slot`.
    #[must_use]
    pub fn for_slot(&self, slot: SlotId) -> Self {
        self.0.iter().filter(|p| p.slot == slot).copied().collect()
    }

    /// Set difference: pairs in `self` that are not in `other`.
    #[must_use]
    pub fn minus(&self, other: &Self) -> Self {
        self.0.difference(&other.0).copied().collect()
    }

    /// Merge every pair of `other` into `self`.
    pub fn extend(&mut self, other: &Self) {
        self.0.extend(other.iter());
    }

    /// Iterate over the non-emergency pairs.
    pub fn bindable(&self) -> impl Iterator<Item = FeaturePair> + '_ {
        self.iter().filter(|p| !p.is_emergency())
    }

    /// Whether the set contains at least one non-emergency pair.
    ///
    /// A desired set causes a live connection only if this holds.
    #[must_use]
    pub fn has_bindable(&self) -> bool {
        self.bindable().next().is_some()
    }

    /// Compute the delta from `self` to `newer`.
    ///
    /// `added` holds pairs present in `newer` only, `removed` pairs present
    /// in `self` only. Pairs in both are untouched by delta application.
    #[must_use]
    pub fn diff(&self, newer: &Self) -> FeatureDelta {
        FeatureDelta {
            added: newer.0.difference(&self.0).copied().collect(),
            removed: self.0.difference(&newer.0).copied().collect(),
        }
    }
}

impl FromIterator<FeaturePair> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = FeaturePair>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, pair) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{pair}")?;
        }
        write!(f, "}}")
    }
}

/// The difference between two feature sets, applied as create/remove deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureDelta {
    /// Pairs to create.
    pub added: Vec<FeaturePair>,
    /// Pairs to remove.
    pub removed: Vec<FeaturePair>,
}

impl FeatureDelta {
    /// Whether the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(slot: u32, kind: FeatureKind) -> FeaturePair {
        FeaturePair::new(SlotId::new(slot), kind)
    }

    #[test]
    fn test_for_slot_filters() {
        let set: FeatureSet = [
            pair(0, FeatureKind::MmTel),
            pair(0, FeatureKind::Rcs),
            pair(1, FeatureKind::MmTel),
        ]
        .into_iter()
        .collect();

        let slot0 = set.for_slot(SlotId::new(0));
        assert_eq!(slot0.len(), 2);
        assert!(!slot0.contains(pair(1, FeatureKind::MmTel)));
    }

    #[test]
    fn test_diff_reports_additions_and_removals() {
        let old: FeatureSet = [pair(0, FeatureKind::MmTel), pair(0, FeatureKind::Rcs)]
            .into_iter()
            .collect();
        let new: FeatureSet = [pair(0, FeatureKind::Rcs), pair(1, FeatureKind::MmTel)]
            .into_iter()
            .collect();

        let delta = old.diff(&new);
        assert_eq!(delta.added, vec![pair(1, FeatureKind::MmTel)]);
        assert_eq!(delta.removed, vec![pair(0, FeatureKind::MmTel)]);
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let set: FeatureSet = [pair(0, FeatureKind::MmTel)].into_iter().collect();
        assert!(set.diff(&set.clone()).is_empty());
    }

    #[test]
    fn test_emergency_is_not_bindable() {
        let emergency_only: FeatureSet = [pair(0, FeatureKind::Emergency)].into_iter().collect();
        assert!(!emergency_only.has_bindable());

        let mixed: FeatureSet = [pair(0, FeatureKind::Emergency), pair(0, FeatureKind::MmTel)]
            .into_iter()
            .collect();
        assert!(mixed.has_bindable());
        assert_eq!(mixed.bindable().count(), 1);
    }

    #[test]
    fn test_minus() {
        let a: FeatureSet = [pair(0, FeatureKind::MmTel), pair(1, FeatureKind::Rcs)]
            .into_iter()
            .collect();
        let b: FeatureSet = [pair(0, FeatureKind::MmTel)].into_iter().collect();
        let diff = a.minus(&b);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(pair(1, FeatureKind::Rcs)));
    }

    #[test]
    fn test_display() {
        let set: FeatureSet = [pair(0, FeatureKind::MmTel)].into_iter().collect();
        assert_eq!(set.to_string(), "{slot0/mmtel}");
    }

    #[test]
    fn test_serde_round_trip() {
        let set: FeatureSet = [pair(0, FeatureKind::MmTel), pair(1, FeatureKind::Emergency)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&set).unwrap();
        let back: FeatureSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
