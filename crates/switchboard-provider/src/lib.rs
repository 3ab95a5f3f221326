//! Switchboard Provider - the seams between the resolver and the outside.
//!
//! This crate defines the traits the resolver engine works against:
//! - [`ProviderDirectory`] — where candidates are discovered
//! - [`OverrideSource`] — per-slot carrier override configuration
//! - [`ConnectionStrategy`] — how a candidate of a given interface flavor is
//!   connected and capability-queried
//! - [`ProviderSession`] — the live remote handle of a bound provider
//! - [`FeatureObserver`] / [`FeatureStatusSink`] — caller- and provider-side
//!   feature callbacks
//!
//! Implementations live outside this workspace (or in `switchboard-test` for
//! tests); the wire protocol behind them is deliberately unspecified.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod connection;
pub mod directory;
pub mod observer;
pub mod overrides;

pub use connection::{
    ConnectionStrategy, DeathNotifier, DeathWatch, DisconnectCause, FeatureRef, ProviderSession,
    StrategySet,
};
pub use directory::ProviderDirectory;
pub use observer::{FeatureObserver, FeatureState, FeatureStatusSink};
pub use overrides::OverrideSource;
