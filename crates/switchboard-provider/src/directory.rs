//! Provider directory queries.

use async_trait::async_trait;

use switchboard_core::{CandidateDescriptor, ResolverResult};

/// The external directory of installed provider packages.
///
/// Invoked once per discovery event (startup and package-added). The
/// directory reports every installed service entry point exported under the
/// given interface name; admission filtering (permission markers) happens in
/// the resolver's candidate registry, not here.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Query candidates exporting `interface_name`.
    ///
    /// With a `package_filter`, only candidates from that package are
    /// returned — used when reacting to a single package change.
    ///
    /// # Errors
    ///
    /// Returns [`switchboard_core::ResolverError::Discovery`] when the
    /// directory cannot be queried; the caller leaves its catalog unchanged.
    async fn query(
        &self,
        interface_name: &str,
        package_filter: Option<&str>,
    ) -> ResolverResult<Vec<CandidateDescriptor>>;
}
