//! Convenience re-exports of the types most call sites need.

pub use crate::backoff::{Backoff, BackoffPolicy};
pub use crate::error::{ResolverError, ResolverResult};
pub use crate::feature::{FeatureDelta, FeatureKind, FeaturePair, FeatureSet};
pub use crate::provider::{CandidateDescriptor, InterfaceFlavor, ProviderId};
pub use crate::slot::SlotId;
