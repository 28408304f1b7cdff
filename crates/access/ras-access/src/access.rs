//! Permission checks for the current principal.

use std::sync::Arc;

use ras_auth_core::AuthId;
use ras_permission_core::{
    CONTROL_PANEL, NewPermission, PermissionGrant, PermissionName, PermissionTypes,
    PermissionsStorage, TypeSpec, resolve_permission_name, resolve_permission_type,
};
use tracing::warn;

use crate::scope::AuthScope;

/// Answers "may this principal do that" by delegating to the permissions
/// storage. When no id is passed, the scope's active provider supplies it.
///
/// Checks never fail: a missing principal or a storage error is a denial.
#[derive(Clone)]
pub struct AccessEngine {
    storage: Arc<dyn PermissionsStorage>,
    scope: Arc<AuthScope>,
}

impl AccessEngine {
    pub fn new(storage: Arc<dyn PermissionsStorage>, scope: Arc<AuthScope>) -> Self {
        Self { storage, scope }
    }

    pub fn scope(&self) -> &Arc<AuthScope> {
        &self.scope
    }

    pub fn storage(&self) -> &Arc<dyn PermissionsStorage> {
        &self.storage
    }

    /// `permission` is `"name"` or `"name:types"`. Types embedded in the
    /// name win over `types`; with neither, the check asks for every type.
    pub async fn has_access(
        &self,
        permission: &str,
        types: Option<TypeSpec>,
        auth_id: Option<&AuthId>,
    ) -> bool {
        self.check(permission, types, auth_id, false).await
    }

    /// Same as [`has_access`](Self::has_access) against the deny table.
    pub async fn has_deny(
        &self,
        permission: &str,
        types: Option<TypeSpec>,
        auth_id: Option<&AuthId>,
    ) -> bool {
        self.check(permission, types, auth_id, true).await
    }

    /// True as soon as one of `permissions` is granted.
    pub async fn has_access_one_from(
        &self,
        permissions: &[&str],
        types: Option<TypeSpec>,
        auth_id: Option<&AuthId>,
    ) -> bool {
        let Some(id) = self.principal(auth_id).await else {
            return false;
        };
        for permission in permissions {
            if self
                .check(permission, types.clone(), Some(&id), false)
                .await
            {
                return true;
            }
        }
        false
    }

    pub async fn has_control_panel_access(&self, auth_id: Option<&AuthId>) -> bool {
        self.has_access(
            CONTROL_PANEL,
            Some(TypeSpec::Set(PermissionTypes::full())),
            auth_id,
        )
        .await
    }

    pub async fn add_permission(&self, permission: NewPermission) -> bool {
        match self.storage.add_permission(permission).await {
            Ok(added) => added,
            Err(e) => {
                warn!("Failed to add permission: {}", e);
                false
            }
        }
    }

    pub async fn user_permissions(&self, auth_id: Option<&AuthId>) -> Vec<PermissionGrant> {
        let Some(id) = self.principal(auth_id).await else {
            return Vec::new();
        };
        match self.storage.user_permissions(&id).await {
            Ok(grants) => grants,
            Err(e) => {
                warn!(user_id = %id, "Failed to load user permissions: {}", e);
                Vec::new()
            }
        }
    }

    pub fn resolve_permission_name(&self, raw: &str) -> PermissionName {
        resolve_permission_name(raw)
    }

    pub fn full_permissions(&self) -> PermissionTypes {
        PermissionTypes::full()
    }

    pub fn control_panel_permission(&self) -> &'static str {
        CONTROL_PANEL
    }

    async fn principal(&self, auth_id: Option<&AuthId>) -> Option<AuthId> {
        match auth_id {
            Some(id) => Some(id.clone()),
            None => self.scope.id().await,
        }
    }

    async fn check(
        &self,
        permission: &str,
        types: Option<TypeSpec>,
        auth_id: Option<&AuthId>,
        deny: bool,
    ) -> bool {
        let Some(id) = self.principal(auth_id).await else {
            return false;
        };

        let resolved = resolve_permission_name(permission);
        let types = resolved
            .types
            .unwrap_or_else(|| resolve_permission_type(types));

        match self
            .storage
            .has_permissions(&resolved.name, &id, &types, deny)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(permission = %resolved.name, user_id = %id, "Permission check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AuthRegistry;
    use async_trait::async_trait;
    use ras_auth_core::{Credentials, MemorySessionStore};
    use ras_identity_local::LocalUserStore;
    use ras_permission_core::{MemoryPermissions, PermissionError, PermissionResult};
    use std::sync::Mutex;

    /// Records every call and grants whatever it is told to.
    #[derive(Default)]
    struct RecordingStorage {
        answer: bool,
        calls: Mutex<Vec<(String, AuthId, PermissionTypes, bool)>>,
    }

    impl RecordingStorage {
        fn granting() -> Self {
            Self {
                answer: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, AuthId, PermissionTypes, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PermissionsStorage for RecordingStorage {
        async fn has_permissions(
            &self,
            name: &str,
            auth_id: &AuthId,
            types: &PermissionTypes,
            deny: bool,
        ) -> PermissionResult<bool> {
            self.calls.lock().unwrap().push((
                name.to_string(),
                auth_id.clone(),
                types.clone(),
                deny,
            ));
            Ok(self.answer)
        }

        async fn add_permission(&self, _permission: NewPermission) -> PermissionResult<bool> {
            Ok(true)
        }

        async fn user_permissions(
            &self,
            _auth_id: &AuthId,
        ) -> PermissionResult<Vec<PermissionGrant>> {
            Err(PermissionError::Storage("offline".to_string()))
        }
    }

    fn engine(storage: Arc<dyn PermissionsStorage>) -> AccessEngine {
        let registry = AuthRegistry::builder().permissions(storage).build();
        Arc::new(registry.scope(Arc::new(MemorySessionStore::new()))).access()
    }

    #[tokio::test]
    async fn test_control_panel_asks_for_full_access() {
        let storage = Arc::new(RecordingStorage::granting());
        let engine = engine(storage.clone());

        assert!(engine.has_control_panel_access(Some(&AuthId::from(7))).await);
        assert_eq!(
            storage.calls(),
            vec![(
                "ControlPanel".to_string(),
                AuthId::from(7),
                PermissionTypes::full(),
                false
            )]
        );
    }

    #[tokio::test]
    async fn test_full_suffix_expands_to_every_type() {
        let storage = Arc::new(RecordingStorage::granting());
        let engine = engine(storage.clone());

        assert!(
            engine
                .has_access("ControlPanel:full", None, Some(&AuthId::from(7)))
                .await
        );
        assert_eq!(storage.calls()[0].0, "ControlPanel");
        assert_eq!(storage.calls()[0].2, PermissionTypes::full());
        assert!(!storage.calls()[0].3);
    }

    #[tokio::test]
    async fn test_no_principal_never_reaches_storage() {
        let storage = Arc::new(RecordingStorage::granting());
        let engine = engine(storage.clone());

        assert!(!engine.has_control_panel_access(None).await);
        assert!(!engine.has_access("Users:read", None, None).await);
        assert!(!engine.has_deny("Users", None, None).await);
        assert!(!engine.has_access_one_from(&["A", "B"], None, None).await);
        assert!(engine.user_permissions(None).await.is_empty());
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_types_in_name_win_over_argument() {
        let storage = Arc::new(RecordingStorage::granting());
        let engine = engine(storage.clone());
        let id = AuthId::from(1);

        engine
            .has_access("Users:read", Some("write".into()), Some(&id))
            .await;
        engine
            .has_access("Users", Some("write,delete".into()), Some(&id))
            .await;
        engine.has_deny("Users", None, Some(&id)).await;

        let calls = storage.calls();
        assert_eq!(calls[0].2, PermissionTypes::read());
        assert_eq!(calls[1].2, PermissionTypes::parse_list("write,delete"));
        assert_eq!(calls[2].2, PermissionTypes::full());
        assert!(calls[2].3);
    }

    #[tokio::test]
    async fn test_one_from_short_circuits() {
        let storage = Arc::new(MemoryPermissions::new());
        storage.grant(3, "Reports:read").await;
        let engine = engine(storage);
        let id = AuthId::from(3);

        assert!(
            engine
                .has_access_one_from(&["Users", "Reports"], Some("read".into()), Some(&id))
                .await
        );
        assert!(
            !engine
                .has_access_one_from(&["Users", "Reports"], Some("write".into()), Some(&id))
                .await
        );
    }

    #[tokio::test]
    async fn test_storage_errors_read_as_empty() {
        let engine = engine(Arc::new(RecordingStorage::granting()));
        assert!(
            engine
                .user_permissions(Some(&AuthId::from(1)))
                .await
                .is_empty()
        );
        assert!(engine.add_permission(NewPermission::new("Reports")).await);
    }

    #[tokio::test]
    async fn test_principal_comes_from_the_active_provider() {
        let users = LocalUserStore::new();
        users
            .add_user(7, "root".to_string(), "toor".to_string(), None, None)
            .await
            .unwrap();
        let storage = Arc::new(MemoryPermissions::new());
        storage.grant(7, "ControlPanel:full").await;

        let registry = AuthRegistry::builder()
            .users(Arc::new(users))
            .permissions(storage)
            .build();
        let scope = Arc::new(registry.scope(Arc::new(MemorySessionStore::new())));
        let engine = scope.access();

        assert!(!engine.has_control_panel_access(None).await);
        assert!(scope.authenticate(&Credentials::basic("root", "toor")).await);
        assert!(engine.has_control_panel_access(None).await);
        assert!(engine.has_access("ControlPanel:read,write", None, None).await);
        assert_eq!(engine.user_permissions(None).await.len(), 1);
    }

    #[test]
    fn test_pass_throughs() {
        let engine = engine(Arc::new(MemoryPermissions::new()));
        assert!(engine.full_permissions().is_full());
        assert_eq!(engine.control_panel_permission(), "ControlPanel");
        assert_eq!(engine.resolve_permission_name("Files:FULL").types, Some(PermissionTypes::full()));
    }
}
