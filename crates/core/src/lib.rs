//! `warden-core`: foundation building blocks shared by the auth crates.
//!
//! This crate contains **pure** primitives (no storage, no transport).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{PermissionId, RoleId, UserId};
