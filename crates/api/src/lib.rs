//! HTTP API: session middleware, authorization and administration routes.

pub mod app;
pub mod context;
pub mod middleware;
