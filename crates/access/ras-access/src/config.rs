//! Authentication settings.
//!
//! Loaded from an optional TOML file plus `RAS_AUTH__…` environment
//! variables (`__` separates nested keys, e.g. `RAS_AUTH__JWT__SECRET`).
//! Environment variables take precedence over the file.

use anyhow::{Context, Result};
use chrono::Duration;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use ras_auth_core::AuthName;
use ras_identity_jwt::TokenConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainOptions;
use crate::csrf::CsrfGuard;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Ordered auth names tried for protected routes.
    pub chain: Vec<String>,

    /// Where denied requests are sent; `None` answers 401.
    pub redirect: Option<String>,

    pub jwt: JwtSettings,

    pub csrf: CsrfSettings,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            redirect: None,
            jwt: JwtSettings::default(),
            csrf: CsrfSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,

    /// Token lifetime (default: one week)
    #[serde(default = "default_jwt_ttl")]
    pub ttl_seconds: i64,

    #[serde(default)]
    pub activation_delay_seconds: i64,

    #[serde(default)]
    pub leeway_seconds: i64,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_issuer")]
    pub audience: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            ttl_seconds: default_jwt_ttl(),
            activation_delay_seconds: 0,
            leeway_seconds: 0,
            issuer: default_issuer(),
            audience: default_issuer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfSettings {
    #[serde(default = "default_csrf_header")]
    pub header: String,

    #[serde(default = "default_csrf_field")]
    pub field: String,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            header: default_csrf_header(),
            field: default_csrf_field(),
        }
    }
}

fn default_chain() -> Vec<String> {
    vec![AuthName::Session.as_str().to_string()]
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_jwt_ttl() -> i64 {
    7 * 24 * 3600
}

fn default_issuer() -> String {
    "ras-auth".to_string()
}

fn default_csrf_header() -> String {
    "x-csrf-token".to_string()
}

fn default_csrf_field() -> String {
    "csrf_token".to_string()
}

impl AuthSettings {
    /// Loads settings from `path` (if it exists) and the environment, then
    /// validates them.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                info!("Loading auth configuration from {}", path);
                builder = builder.add_source(File::with_name(path));
            } else {
                debug!("No auth config file found at {}, using defaults", path);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RAS_AUTH")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("chain")
                .try_parsing(true),
        );

        let settings: AuthSettings = builder
            .build()
            .context("Failed to build auth configuration")?
            .try_deserialize()
            .context("Failed to deserialize auth configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from a TOML document, without consulting the
    /// environment.
    pub fn from_toml(source: &str) -> Result<Self> {
        let settings: AuthSettings = ConfigBuilder::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .context("Failed to build auth configuration")?
            .try_deserialize()
            .context("Failed to deserialize auth configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for name in &self.chain {
            name.parse::<AuthName>()
                .with_context(|| format!("Invalid auth chain entry '{name}'"))?;
        }

        if self.jwt.secret.is_empty() {
            anyhow::bail!("JWT secret cannot be empty");
        }

        if !cfg!(debug_assertions) && self.jwt.secret == default_jwt_secret() {
            anyhow::bail!("JWT secret must be changed from default in production");
        }

        if self.jwt.ttl_seconds <= 0 {
            anyhow::bail!("JWT TTL must be positive");
        }

        if self.jwt.activation_delay_seconds < 0 || self.jwt.leeway_seconds < 0 {
            anyhow::bail!("JWT activation delay and leeway cannot be negative");
        }

        self.token_config()?;

        if self.csrf.header.is_empty() || self.csrf.field.is_empty() {
            anyhow::bail!("CSRF header and field names cannot be empty");
        }

        Ok(())
    }

    pub fn token_config(&self) -> Result<TokenConfig> {
        Ok(TokenConfig {
            issuer: self.jwt.issuer.clone(),
            audience: self.jwt.audience.clone(),
            ttl: seconds("ttl_seconds", self.jwt.ttl_seconds)?,
            activation_delay: seconds(
                "activation_delay_seconds",
                self.jwt.activation_delay_seconds,
            )?,
            leeway: seconds("leeway_seconds", self.jwt.leeway_seconds)?,
        })
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            redirect: self.redirect.clone(),
        }
    }

    pub fn csrf_guard(&self) -> CsrfGuard {
        CsrfGuard::new(&self.csrf.header, &self.csrf.field)
    }

    pub fn chain_names(&self) -> Vec<&str> {
        self.chain.iter().map(String::as_str).collect()
    }
}

fn seconds(field: &str, value: i64) -> Result<Duration> {
    Duration::try_seconds(value).with_context(|| format!("JWT {field} is out of range: {value}"))
}
