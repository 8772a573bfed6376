//! Admin analytics over all users and tasks.

pub mod api;
pub mod store;

pub use store::AnalyticsStore;
