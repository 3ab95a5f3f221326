//! Switchboard Resolver - provider catalog, assignment, and supervision.
//!
//! This crate keeps a consistent mapping from (slot, feature) to exactly one
//! out-of-process provider under continuously arriving asynchronous events:
//! package installs and removals, per-slot carrier overrides, remote
//! connection death, and delayed capability discovery.
//!
//! # Architecture
//!
//! ```text
//! package / override / query events
//!   → serialized event queue (one orchestrator loop, no concurrent writers)
//!   → candidate registry + assignment engine
//!   → per-provider desired feature set
//!   → binding controller (connect, live diffing, backoff retry)
//!   → live handle table (own lock, read from any caller thread)
//!   → caller reads
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard_core::{FeatureKind, SlotId};
//! use switchboard_provider::StrategySet;
//! use switchboard_resolver::{FeatureResolver, ResolverConfig};
//!
//! # async fn example(
//! #     directory: Arc<dyn switchboard_provider::ProviderDirectory>,
//! #     overrides: Arc<dyn switchboard_provider::OverrideSource>,
//! #     strategies: StrategySet,
//! # ) -> switchboard_core::ResolverResult<()> {
//! let config = ResolverConfig::load("/etc/switchboard/resolver.toml")?;
//! let resolver = FeatureResolver::start(config, directory, overrides, strategies).await?;
//!
//! // React to the world changing.
//! resolver.package_added("com.example.carrier");
//! resolver.settled().await;
//!
//! // Absent handles are a normal transient state, not an error.
//! if let Some(handle) = resolver.current_handle(SlotId::new(0), FeatureKind::MmTel) {
//!     println!("mmtel served by {}", handle.provider());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod assignment;
mod binding;
mod catalog;
mod config;
mod events;
mod query;
mod resolver;
mod table;

pub use binding::BindState;
pub use catalog::{FeatureOrigin, ProviderCandidate, UpsertOutcome};
pub use config::{QueryConfig, ResolverConfig};
pub use events::ResolverNotice;
pub use resolver::{FeatureResolver, ProviderStatus};
pub use table::{ConfigHandle, FeatureHandle, RegistrationHandle};
