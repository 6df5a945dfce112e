//! `warden-auth`: authentication/authorization core.
//!
//! This crate is intentionally decoupled from HTTP and storage: it talks to
//! persistence only through the [`AuthStore`] adapter trait, and returns
//! [`DomainResult`] outcomes for a route layer to translate.

pub mod config;
pub mod password;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod secret;
pub mod service;
pub mod session;
pub mod session_manager;
pub mod store;
pub mod token;
pub mod token_manager;
pub mod user;

pub use config::{AuthConfig, ConfigError, PasswordCost};
pub use permissions::{
    NewPermission, Permission, PermissionAction, PermissionKey, PermissionPatch, PermissionType,
};
pub use resolver::{AuthorizationExplanation, PermissionResolver};
pub use roles::{NewRole, Role, RolePatch};
pub use service::{AuthService, IssuedToken, LoginOutcome, ReapReport};
pub use session::{Session, SessionId};
pub use session_manager::SessionManager;
pub use store::{AuthStore, StoreError, StoreResult};
pub use token::{Token, TokenRejection, TokenValue};
pub use token_manager::{TokenManager, TokenOutcome};
pub use user::{NewUser, User, UserPatch};

pub use warden_core::{DomainError, DomainResult, ErrorKind};
