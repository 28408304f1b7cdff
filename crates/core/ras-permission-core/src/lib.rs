//! Permission names, permission types and the storage adapter contract.
//!
//! Permissions travel as strings of the form `"<name>"` or
//! `"<name>:<type1>[,<type2>...]"`. This crate turns those strings into a
//! canonical [`PermissionName`] and defines [`PermissionsStorage`], the
//! adapter that actually answers allow/deny questions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use ras_identity_core::AuthId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;

pub use memory::MemoryPermissions;

/// Name of the permission that gates the administration area.
pub const CONTROL_PANEL: &str = "ControlPanel";

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Permission storage error: {0}")]
    Storage(String),

    #[error("Unknown permission: {0}")]
    UnknownPermission(String),
}

pub type PermissionResult<T> = Result<T, PermissionError>;

/// One access type.
///
/// The four universal types are modelled explicitly; any other token is
/// kept verbatim and left for the storage adapter to judge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionType {
    Read,
    Write,
    Delete,
    Execute,
    Other(String),
}

impl PermissionType {
    pub fn as_str(&self) -> &str {
        match self {
            PermissionType::Read => "read",
            PermissionType::Write => "write",
            PermissionType::Delete => "delete",
            PermissionType::Execute => "execute",
            PermissionType::Other(other) => other,
        }
    }
}

impl FromStr for PermissionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Ok(match token.to_ascii_lowercase().as_str() {
            "read" => PermissionType::Read,
            "write" => PermissionType::Write,
            "delete" => PermissionType::Delete,
            "execute" => PermissionType::Execute,
            _ => PermissionType::Other(token.to_string()),
        })
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let Ok(parsed) = raw.parse();
        Ok(parsed)
    }
}

/// A set of access types. Ordering and duplicates in the input are irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTypes(BTreeSet<PermissionType>);

impl PermissionTypes {
    /// `read`, `write`, `delete` and `execute`.
    pub fn full() -> Self {
        [
            PermissionType::Read,
            PermissionType::Write,
            PermissionType::Delete,
            PermissionType::Execute,
        ]
        .into_iter()
        .collect()
    }

    pub fn read() -> Self {
        Self::single(PermissionType::Read)
    }

    pub fn write() -> Self {
        Self::single(PermissionType::Write)
    }

    pub fn delete() -> Self {
        Self::single(PermissionType::Delete)
    }

    pub fn execute() -> Self {
        Self::single(PermissionType::Execute)
    }

    pub fn single(permission_type: PermissionType) -> Self {
        Self(BTreeSet::from([permission_type]))
    }

    /// Splits a comma separated list, trimming tokens and dropping empty ones.
    pub fn parse_list(raw: &str) -> Self {
        raw.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                let Ok(parsed) = token.parse::<PermissionType>();
                parsed
            })
            .collect()
    }

    pub fn is_full(&self) -> bool {
        Self::full().is_subset(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, permission_type: &PermissionType) -> bool {
        self.0.contains(permission_type)
    }

    pub fn is_subset(&self, other: &PermissionTypes) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionType> {
        self.0.iter()
    }
}

impl FromIterator<PermissionType> for PermissionTypes {
    fn from_iter<I: IntoIterator<Item = PermissionType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PermissionTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(PermissionType::as_str).collect();
        f.write_str(&joined.join(","))
    }
}

/// A permission string split into its name and optional type list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionName {
    pub name: String,
    /// `None` when the string carried no type segment.
    pub types: Option<PermissionTypes>,
}

/// Splits `"name"` / `"name:types"` on the first `:`.
///
/// A `full` segment (any case) expands to every type, a segment with no
/// usable tokens also means full, and no segment at all leaves the types
/// unspecified for the caller to default.
pub fn resolve_permission_name(raw: &str) -> PermissionName {
    match raw.split_once(':') {
        None => PermissionName {
            name: raw.trim().to_string(),
            types: None,
        },
        Some((name, segment)) => {
            let segment = segment.trim();
            let types = if segment.eq_ignore_ascii_case("full") {
                PermissionTypes::full()
            } else {
                let parsed = PermissionTypes::parse_list(segment);
                if parsed.is_empty() {
                    PermissionTypes::full()
                } else {
                    parsed
                }
            };
            PermissionName {
                name: name.trim().to_string(),
                types: Some(types),
            }
        }
    }
}

/// A type argument as callers supply it: already a set, or raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Set(PermissionTypes),
    Raw(String),
}

impl From<PermissionTypes> for TypeSpec {
    fn from(types: PermissionTypes) -> Self {
        TypeSpec::Set(types)
    }
}

impl From<PermissionType> for TypeSpec {
    fn from(permission_type: PermissionType) -> Self {
        TypeSpec::Set(PermissionTypes::single(permission_type))
    }
}

impl From<&str> for TypeSpec {
    fn from(raw: &str) -> Self {
        TypeSpec::Raw(raw.to_string())
    }
}

impl From<String> for TypeSpec {
    fn from(raw: String) -> Self {
        TypeSpec::Raw(raw)
    }
}

/// Normalises a type argument. Never fails: missing information yields
/// the full set.
pub fn resolve_permission_type(spec: Option<TypeSpec>) -> PermissionTypes {
    let resolved = match spec {
        Some(TypeSpec::Set(types)) => types,
        Some(TypeSpec::Raw(raw)) if raw.trim().eq_ignore_ascii_case("full") => {
            PermissionTypes::full()
        }
        Some(TypeSpec::Raw(raw)) => PermissionTypes::parse_list(&raw),
        None => PermissionTypes::full(),
    };

    if resolved.is_empty() {
        PermissionTypes::full()
    } else {
        resolved
    }
}

/// Registration payload for a permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Owning extension/module, if any.
    pub extension: Option<String>,
    pub deny: bool,
}

impl NewPermission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn deny(mut self, deny: bool) -> Self {
        self.deny = deny;
        self
    }
}

/// One permission row held for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub name: String,
    pub types: PermissionTypes,
    pub deny: bool,
}

/// Storage-backed permission checks.
#[async_trait]
pub trait PermissionsStorage: Send + Sync {
    /// Whether `auth_id` holds `types` on `name`; with `deny` set, whether
    /// those types are explicitly denied instead.
    async fn has_permissions(
        &self,
        name: &str,
        auth_id: &AuthId,
        types: &PermissionTypes,
        deny: bool,
    ) -> PermissionResult<bool>;

    async fn add_permission(&self, permission: NewPermission) -> PermissionResult<bool>;

    async fn user_permissions(&self, auth_id: &AuthId) -> PermissionResult<Vec<PermissionGrant>>;
}
