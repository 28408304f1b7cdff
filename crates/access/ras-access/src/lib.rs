//! Authentication chain, access checks and axum integration.
//!
//! [`AuthRegistry`] is built once at startup. Each request gets an
//! [`AuthScope`] holding its own provider instances; an [`AuthChain`] binds
//! the first provider that accepts the request, and the [`AccessEngine`]
//! answers permission checks for whoever that provider says is logged in.

pub mod access;
pub mod chain;
pub mod config;
pub mod csrf;
pub mod http;
pub mod registry;
pub mod scope;

pub use access::AccessEngine;
pub use chain::{AccessDenied, AuthChain, ChainOptions};
pub use config::{AuthSettings, CsrfSettings, JwtSettings};
pub use csrf::{CsrfGuard, SESSION_CSRF_TOKEN};
pub use http::{AuthLayerState, SessionHandle, require_auth};
pub use registry::{AuthRegistry, AuthRegistryBuilder};
pub use scope::AuthScope;

pub use ras_auth_core::{AuthError, AuthName, AuthProvider, ProviderKind};
pub use ras_permission_core::{
    CONTROL_PANEL, NewPermission, PermissionGrant, PermissionTypes, PermissionsStorage, TypeSpec,
};
