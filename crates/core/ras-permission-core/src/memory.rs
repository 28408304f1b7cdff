//! In-memory permissions storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ras_identity_core::AuthId;
use tokio::sync::RwLock;

use crate::{
    NewPermission, PermissionGrant, PermissionResult, PermissionTypes, PermissionsStorage,
    resolve_permission_name,
};

/// Grant and deny tables kept in process memory.
///
/// Grants for the same name accumulate: a check passes when the union of
/// the matching rows covers every requested type.
#[derive(Clone, Default)]
pub struct MemoryPermissions {
    catalogue: Arc<RwLock<BTreeMap<String, NewPermission>>>,
    grants: Arc<RwLock<HashMap<AuthId, Vec<PermissionGrant>>>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `permission` (`"name"` or `"name:types"`, bare names mean
    /// every type) to `auth_id`.
    pub async fn grant(&self, auth_id: impl Into<AuthId>, permission: &str) {
        self.insert(auth_id.into(), permission, false).await;
    }

    /// Records an explicit deny for `permission`.
    pub async fn deny(&self, auth_id: impl Into<AuthId>, permission: &str) {
        self.insert(auth_id.into(), permission, true).await;
    }

    /// Drops every row for `name`; returns how many were removed.
    pub async fn revoke(&self, auth_id: &AuthId, name: &str) -> usize {
        let mut grants = self.grants.write().await;
        let Some(rows) = grants.get_mut(auth_id) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| row.name != name);
        before - rows.len()
    }

    pub async fn permission(&self, name: &str) -> Option<NewPermission> {
        self.catalogue.read().await.get(name).cloned()
    }

    async fn insert(&self, auth_id: AuthId, permission: &str, deny: bool) {
        let resolved = resolve_permission_name(permission);
        let grant = PermissionGrant {
            name: resolved.name,
            types: resolved.types.unwrap_or_else(PermissionTypes::full),
            deny,
        };
        self.grants
            .write()
            .await
            .entry(auth_id)
            .or_default()
            .push(grant);
    }
}

#[async_trait]
impl PermissionsStorage for MemoryPermissions {
    async fn has_permissions(
        &self,
        name: &str,
        auth_id: &AuthId,
        types: &PermissionTypes,
        deny: bool,
    ) -> PermissionResult<bool> {
        let grants = self.grants.read().await;
        let Some(rows) = grants.get(auth_id) else {
            return Ok(false);
        };

        let held: PermissionTypes = rows
            .iter()
            .filter(|row| row.name == name && row.deny == deny)
            .flat_map(|row| row.types.iter().cloned())
            .collect();

        Ok(!held.is_empty() && types.is_subset(&held))
    }

    async fn add_permission(&self, permission: NewPermission) -> PermissionResult<bool> {
        if permission.name.trim().is_empty() {
            return Ok(false);
        }
        let mut catalogue = self.catalogue.write().await;
        if catalogue.contains_key(&permission.name) {
            return Ok(false);
        }
        catalogue.insert(permission.name.clone(), permission);
        Ok(true)
    }

    async fn user_permissions(&self, auth_id: &AuthId) -> PermissionResult<Vec<PermissionGrant>> {
        Ok(self
            .grants
            .read()
            .await
            .get(auth_id)
            .cloned()
            .unwrap_or_default())
    }
}
