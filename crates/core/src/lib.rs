//! `orgguard-core` — identifiers and the domain error model shared by every crate.
//!
//! Pure types only; no IO.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{PrincipalId, RoleId, TenantId};
