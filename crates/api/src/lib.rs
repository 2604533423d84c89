//! # DocFlow API
//!
//! The HTTP surface and application wiring: route handlers, validation with
//! structured per-field errors, the application context, and the health /
//! metrics listener.

pub mod context;
pub mod error;
pub mod routes;
pub mod validation;

pub use context::AppContext;
pub use routes::{build_ops_router, build_router};
