//! Tiered request throttling.
//!
//! - `registry`: scope name to rate limit table
//! - `policy`: admin multiplier on role-sensitive scopes
//! - `principal`: who a request is counted against
//! - `store`: fixed-window counters

pub mod policy;
pub mod principal;
pub mod registry;
pub mod store;

pub use policy::AdminOverride;
pub use principal::Principal;
pub use registry::{RateLimit, ScopeRule, ThrottleConfig, ThrottleRegistry, UnknownScope, Window};
pub use store::{CounterStore, MemoryCounterStore, ScopeCheck, Verdict};
