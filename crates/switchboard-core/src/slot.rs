//! Hardware slot identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a hardware slot (a line position) that features are scoped to.
///
/// Slots are dense indices starting at zero; the valid range is fixed by the
/// resolver configuration, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u32);

impl SlotId {
    /// Create a slot identity from its index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The slot's index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

impl From<u32> for SlotId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_display() {
        assert_eq!(SlotId::new(0).to_string(), "slot0");
        assert_eq!(SlotId::new(3).to_string(), "slot3");
    }

    #[test]
    fn test_slot_ordering() {
        assert!(SlotId::new(0) < SlotId::new(1));
        assert_eq!(SlotId::from(2).index(), 2);
    }
}
