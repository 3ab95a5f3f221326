//! Provider identities and discovery descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::feature::FeatureSet;

/// The protection marker a provider's service entry point must be guarded by
/// to be admitted to the candidate registry.
pub const BIND_PERMISSION_MARKER: &str = "dev.switchboard.permission.BIND_PROVIDER";

/// Identity of a feature provider: `package/component`.
///
/// The package part names the installable unit the provider ships in; the
/// component part names the service entry point within it. Per-slot overrides
/// and the device default are configured by full identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package part (everything before the first `/`).
    #[must_use]
    pub fn package(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The component part, if the identity carries one.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, c)| c)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which remote-interface flavor a candidate speaks.
///
/// Selected per candidate at discovery time; the binding controller is
/// flavor-agnostic and works through the matching connection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceFlavor {
    /// The current provider interface.
    #[default]
    Current,
    /// The legacy provider interface, kept for not-yet-migrated providers.
    Legacy,
}

impl InterfaceFlavor {
    /// The remote interface name providers of this flavor are discovered and
    /// connected under.
    #[must_use]
    pub const fn interface_name(self) -> &'static str {
        match self {
            Self::Current => "dev.switchboard.provider.v2",
            Self::Legacy => "dev.switchboard.provider.v1",
        }
    }
}

/// A provider candidate as reported by the provider directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescriptor {
    /// The candidate's identity.
    pub provider: ProviderId,
    /// Statically declared (slot, feature) support, if the provider ships a
    /// declaration. `None` marks the candidate for a dynamic capability query.
    pub static_features: Option<FeatureSet>,
    /// The protection marker the candidate's service entry point is guarded
    /// by. Candidates whose marker does not match the expected value are
    /// dropped at registry admission.
    pub permission_marker: String,
    /// The remote-interface flavor to connect with.
    #[serde(default)]
    pub flavor: InterfaceFlavor,
}

impl CandidateDescriptor {
    /// Create a descriptor with no static feature declaration.
    pub fn new(provider: impl Into<ProviderId>, permission_marker: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            static_features: None,
            permission_marker: permission_marker.into(),
            flavor: InterfaceFlavor::default(),
        }
    }

    /// Attach a static feature declaration.
    #[must_use]
    pub fn with_static_features(mut self, features: FeatureSet) -> Self {
        self.static_features = Some(features);
        self
    }

    /// Select the interface flavor.
    #[must_use]
    pub fn with_flavor(mut self, flavor: InterfaceFlavor) -> Self {
        self.flavor = flavor;
        self
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parts() {
        let id = ProviderId::new("com.example.carrier/ProviderService");
        assert_eq!(id.package(), "com.example.carrier");
        assert_eq!(id.component(), Some("ProviderService"));

        let bare = ProviderId::new("com.example.carrier");
        assert_eq!(bare.package(), "com.example.carrier");
        assert_eq!(bare.component(), None);
    }

    #[test]
    fn test_flavor_interface_names() {
        assert_eq!(
            InterfaceFlavor::Current.interface_name(),
            "dev.switchboard.provider.v2"
        );
        assert_eq!(
            InterfaceFlavor::Legacy.interface_name(),
            "dev.switchboard.provider.v1"
        );
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = CandidateDescriptor::new("com.example/Svc", "marker")
            .with_flavor(InterfaceFlavor::Legacy);
        assert_eq!(descriptor.provider.as_str(), "com.example/Svc");
        assert!(descriptor.static_features.is_none());
        assert_eq!(descriptor.flavor, InterfaceFlavor::Legacy);
    }
}
