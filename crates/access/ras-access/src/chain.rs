//! The authentication chain: providers tried in order until one accepts
//! the request.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use ras_auth_core::{AuthName, ProviderKind, RequestContext};
use thiserror::Error;
use tracing::{debug, info};

use crate::csrf::CsrfGuard;
use crate::scope::AuthScope;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChainOptions {
    /// Redirect target for denied requests; `None` answers 401.
    pub redirect: Option<String>,
}

impl ChainOptions {
    pub fn redirect(target: impl Into<String>) -> Self {
        Self {
            redirect: Some(target.into()),
        }
    }
}

/// Every provider in the chain declined the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Access denied")]
pub struct AccessDenied {
    pub redirect: Option<String>,
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        match self.redirect {
            Some(target) => (StatusCode::FOUND, [(header::LOCATION, target)]).into_response(),
            None => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthChain {
    csrf: Option<CsrfGuard>,
    providers: Vec<ProviderKind>,
    options: ChainOptions,
}

impl AuthChain {
    /// Builds a chain from auth names. `csrf` anywhere in the list turns on
    /// the CSRF guard, which always runs before the providers.
    pub fn new(names: &[AuthName], csrf: CsrfGuard, options: ChainOptions) -> Self {
        let guarded = names.contains(&AuthName::Csrf);
        Self {
            csrf: guarded.then_some(csrf),
            providers: names.iter().filter_map(|n| n.provider_kind()).collect(),
            options,
        }
    }

    pub fn providers(&self) -> &[ProviderKind] {
        &self.providers
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn is_csrf_guarded(&self) -> bool {
        self.csrf.is_some()
    }

    /// Whether any step may look at body parameters. Basic and public
    /// providers only read headers.
    pub fn reads_body(&self) -> bool {
        self.csrf.is_some()
            || self
                .providers
                .iter()
                .any(|kind| !matches!(kind, ProviderKind::Basic | ProviderKind::Public))
    }

    fn denied(&self) -> AccessDenied {
        AccessDenied {
            redirect: self.options.redirect.clone(),
        }
    }

    /// Runs the chain for one request.
    ///
    /// The first provider that is already logged in, or that authenticates
    /// the request, becomes the scope's active provider. A chain without
    /// providers accepts the request with `Ok(None)`.
    pub async fn process_request(
        &self,
        scope: &AuthScope,
        request: &dyn RequestContext,
    ) -> Result<Option<ProviderKind>, AccessDenied> {
        if let Some(csrf) = &self.csrf {
            if !csrf.verify(scope.session().as_ref(), request).await {
                info!("Request rejected by CSRF guard");
                return Err(self.denied());
            }
        }

        if self.providers.is_empty() {
            return Ok(None);
        }

        for &kind in &self.providers {
            let provider = scope.provider(kind);

            if provider.id().await.is_some() {
                debug!(provider = %kind, "Already logged in");
                scope.bind(kind).await;
                return Ok(Some(kind));
            }

            let credentials = provider.extract_credentials(request);
            if provider.authenticate(&credentials, Some(request)).await {
                debug!(provider = %kind, "Authenticated");
                scope.bind(kind).await;
                return Ok(Some(kind));
            }

            debug!(provider = %kind, "Provider declined request");
        }

        info!(providers = ?self.providers, "No auth provider accepted the request");
        Err(self.denied())
    }
}
