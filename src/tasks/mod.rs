//! Per-user tasks: storage and HTTP handlers.

pub mod api;
pub mod models;
pub mod store;

pub use store::TaskStore;
