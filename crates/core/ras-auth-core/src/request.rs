//! Read-only view of an inbound request, as seen by providers.

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue, header};

const BEARER: &str = "bearer";

/// Lookups a provider may perform to locate a credential.
pub trait RequestContext: Send + Sync {
    fn header(&self, name: &str) -> Option<&str>;

    fn cookie(&self, name: &str) -> Option<&str>;

    fn route_param(&self, name: &str) -> Option<&str>;

    fn body_param(&self, name: &str) -> Option<&str>;

    fn query_param(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(request: &dyn RequestContext) -> Option<&str> {
    let value = request.header(header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Bearer credential lookup in fixed order: Authorization header, route
/// argument `token`, parsed body field `token`, cookie `token`.
/// The first non-empty source wins.
pub fn read_token(request: &dyn RequestContext) -> Option<String> {
    bearer_token(request)
        .or_else(|| non_empty(request.route_param("token")))
        .or_else(|| non_empty(request.body_param("token")))
        .or_else(|| non_empty(request.cookie("token")))
        .map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// [`RequestContext`] backed by `http` types.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestContext {
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    query: HashMap<String, String>,
    route: HashMap<String, String>,
    body: HashMap<String, String>,
}

impl HttpRequestContext {
    pub fn new(headers: HeaderMap) -> Self {
        let cookies = parse_cookies(&headers);
        Self {
            headers,
            cookies,
            ..Default::default()
        }
    }

    /// Adds a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
            self.cookies = parse_cookies(&self.headers);
        }
        self
    }

    /// Parses an `application/x-www-form-urlencoded` query string.
    pub fn with_query(mut self, query: &str) -> Self {
        self.query.extend(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
        self
    }

    pub fn with_route_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route.insert(name.into(), value.into());
        self
    }

    pub fn with_body_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    pub fn with_body_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl RequestContext for HttpRequestContext {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    fn route_param(&self, name: &str) -> Option<&str> {
        self.route.get(name).map(String::as_str)
    }

    fn body_param(&self, name: &str) -> Option<&str> {
        self.body.get(name).map(String::as_str)
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}
