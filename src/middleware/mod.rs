//! Middleware for request logging and throttling.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{throttle_middleware, GateError, RequestGate, ThrottleState};
