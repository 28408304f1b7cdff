//! axum integration.
//!
//! ```ignore
//! let state = AuthLayerState::from_settings(registry, &settings)?;
//! let app = Router::new()
//!     .route("/admin", get(admin))
//!     .route_layer(middleware::from_fn_with_state(state, require_auth));
//! ```
//!
//! On success the request carries the [`AccessEngine`] and the
//! `Arc<AuthScope>` as extensions.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ras_auth_core::{AuthResult, HttpRequestContext, MemorySessionStore, SessionStore};
use tracing::{debug, warn};

use crate::access::AccessEngine;
use crate::chain::{AccessDenied, AuthChain, ChainOptions};
use crate::config::AuthSettings;
use crate::registry::AuthRegistry;

/// Default cap on a request body buffered for credential lookup.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The caller's session, inserted as a request extension by the host's
/// session layer.
#[derive(Clone)]
pub struct SessionHandle(pub Arc<dyn SessionStore>);

#[derive(Clone)]
pub struct AuthLayerState {
    registry: Arc<AuthRegistry>,
    chain: Arc<AuthChain>,
    body_limit: usize,
}

impl AuthLayerState {
    pub fn new(registry: Arc<AuthRegistry>, chain: Arc<AuthChain>) -> Self {
        Self {
            registry,
            chain,
            body_limit: MAX_BODY_BYTES,
        }
    }

    /// Largest body buffered when the chain reads body parameters. Larger
    /// bodies are answered with 413.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn from_names(
        registry: Arc<AuthRegistry>,
        names: &[&str],
        options: ChainOptions,
    ) -> AuthResult<Self> {
        let chain = registry.middleware(names, options)?;
        Ok(Self::new(registry, chain))
    }

    pub fn from_settings(registry: Arc<AuthRegistry>, settings: &AuthSettings) -> AuthResult<Self> {
        let chain = registry.middleware_from_settings(settings)?;
        Ok(Self::new(registry, chain))
    }

    pub fn chain(&self) -> &Arc<AuthChain> {
        &self.chain
    }
}

/// Runs the configured chain and rejects the request when it is denied.
///
/// The body is only buffered, and re-attached afterwards, when a step of
/// the chain reads body parameters.
pub async fn require_auth(
    State(state): State<AuthLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let (body, params) = if state.chain.reads_body() {
        match to_bytes(body, state.body_limit).await {
            Ok(bytes) => {
                let params = body_params(&parts.headers, &bytes);
                (Body::from(bytes), params)
            }
            Err(e) => {
                warn!("Failed to buffer request body: {}", e);
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        }
    } else {
        (body, Vec::new())
    };

    let mut context = HttpRequestContext::new(parts.headers.clone()).with_body_params(params);
    if let Some(query) = parts.uri.query() {
        context = context.with_query(query);
    }
    // Only present when the middleware is installed with `route_layer`.
    if let Ok(params) = RawPathParams::from_request_parts(&mut parts, &state).await {
        for (name, value) in params.iter() {
            context = context.with_route_param(name, value);
        }
    }

    let session: Arc<dyn SessionStore> = match parts.extensions.get::<SessionHandle>() {
        Some(SessionHandle(session)) => session.clone(),
        None => {
            debug!("No session on request, using an ephemeral one");
            Arc::new(MemorySessionStore::new())
        }
    };

    let scope = Arc::new(state.registry.scope(session));
    if let Err(denied) = state.chain.process_request(&scope, &context).await {
        return denied.into_response();
    }

    parts.extensions.insert(scope.access());
    parts.extensions.insert(scope);

    next.run(Request::from_parts(parts, body)).await
}

/// Flat string view of a JSON object or urlencoded form body.
fn body_params(headers: &HeaderMap, bytes: &Bytes) -> Vec<(String, String)> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(serde_json::Value::Object(fields)) => fields
                .into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::String(s) => Some((key, s)),
                    serde_json::Value::Number(n) => Some((key, n.to_string())),
                    serde_json::Value::Bool(b) => Some((key, b.to_string())),
                    _ => None,
                })
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("Ignoring unparsable JSON body: {}", e);
                Vec::new()
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(bytes)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    } else {
        Vec::new()
    }
}

impl<S> FromRequestParts<S> for AccessEngine
where
    S: Send + Sync,
{
    type Rejection = AccessDenied;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessEngine>()
            .cloned()
            .ok_or(AccessDenied { redirect: None })
    }
}
