//! Idempotent assignment, removal and set synchronisation of roles and
//! permissions

use crate::catalog::{PermissionCatalog, RoleCatalog};
use crate::error::{AuthzError, Result};
use crate::store::{GrantFilter, Store};
use crate::types::{
    EntityRef, EntityType, Grant, NewGrant, PermissionRef, Relation, RoleRef, SyncReport,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for `assign_*`
#[derive(Debug, Clone, PartialEq)]
pub struct AssignOptions {
    /// Skip the insert when this many active rows already link actor and
    /// target; `None` never skips
    pub max_concurrent: Option<usize>,

    pub context: Option<Value>,

    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for AssignOptions {
    fn default() -> Self {
        Self {
            max_concurrent: Some(1),
            context: None,
            expires_at: None,
        }
    }
}

impl AssignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow up to `limit` concurrently active rows
    pub fn stacking(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.max_concurrent = None;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Write side of the membership and delegation relations
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    roles: RoleCatalog,
    permissions: PermissionCatalog,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            roles: RoleCatalog::new(store.clone()),
            permissions: PermissionCatalog::new(store.clone()),
            store,
        }
    }

    /// Make the actor a member of a role
    ///
    /// Slugs are get-or-created. Returns the new row, or `None` when the
    /// stacking limit was already reached.
    pub async fn assign_role(
        &self,
        actor: &EntityRef,
        role: &RoleRef,
        options: AssignOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        let target = self.role_target(role, now).await?;
        self.assign(Relation::Membership, actor, target, options, now).await
    }

    /// Give the actor a permission directly; see [`Self::assign_role`]
    pub async fn assign_permission(
        &self,
        actor: &EntityRef,
        permission: &PermissionRef,
        options: AssignOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        let target = self.permission_target(permission, now).await?;
        self.assign(Relation::Delegation, actor, target, options, now).await
    }

    /// Delete every membership row linking the actor to the role
    pub async fn remove_role(&self, actor: &EntityRef, role: &RoleRef) -> Result<usize> {
        let target = match role {
            RoleRef::Id(id) => EntityRef::role(*id),
            RoleRef::Slug(slug) => match self.roles.find(slug).await? {
                Some(role) => role.entity_ref(),
                None => return Ok(0),
            },
        };
        self.remove(Relation::Membership, actor, &target).await
    }

    /// Delete the actor's direct rows for the permission
    ///
    /// Holdings through the actor's roles are unaffected.
    pub async fn remove_permission(&self, actor: &EntityRef, permission: &PermissionRef) -> Result<usize> {
        let target = match permission {
            PermissionRef::Id(id) => EntityRef::permission(*id),
            PermissionRef::Slug(slug) => match self.permissions.find(slug).await? {
                Some(permission) => permission.entity_ref(),
                None => return Ok(0),
            },
        };
        self.remove(Relation::Delegation, actor, &target).await
    }

    /// Make the actor's memberships match `roles`
    pub async fn sync_roles(&self, actor: &EntityRef, roles: &[RoleRef], now: DateTime<Utc>) -> Result<SyncReport> {
        let mut targets = Vec::with_capacity(roles.len());
        for role in roles {
            targets.push(self.role_target(role, now).await?);
        }
        self.sync(Relation::Membership, EntityType::Role, actor, targets, now).await
    }

    /// Make the actor's direct permissions match `permissions`
    pub async fn sync_permissions(
        &self,
        actor: &EntityRef,
        permissions: &[PermissionRef],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let mut targets = Vec::with_capacity(permissions.len());
        for permission in permissions {
            targets.push(self.permission_target(permission, now).await?);
        }
        self.sync(Relation::Delegation, EntityType::Permission, actor, targets, now).await
    }

    /// Extend an active timed membership by `hours`, or add one lasting `hours`
    ///
    /// A permanent membership is left as is. Returns the changed or created
    /// row, `None` when nothing changed.
    pub async fn extend_or_add_role(
        &self,
        actor: &EntityRef,
        role: &RoleRef,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        if hours <= 0 {
            return Ok(None);
        }
        let extension = Duration::try_hours(hours).ok_or_else(|| out_of_range(hours))?;
        let added_expiry = now
            .checked_add_signed(extension)
            .ok_or_else(|| out_of_range(hours))?;

        let target = self.role_target(role, now).await?;
        let filter = GrantFilter::for_subject(actor).target(&target).active_at(now);
        let active = self.store.query_grants(Relation::Membership, &filter).await?;

        if active.iter().any(|row| row.expires_at.is_none()) {
            debug!("{} holds {} permanently, nothing to extend", actor, target);
            return Ok(None);
        }

        let latest = active.into_iter().max_by_key(|row| row.expires_at);
        match latest {
            Some(mut row) => {
                let expiry = match row.expires_at {
                    Some(at) => Some(
                        at.checked_add_signed(extension)
                            .ok_or_else(|| out_of_range(hours))?,
                    ),
                    None => None,
                };
                self.store
                    .update_grant_expiry(Relation::Membership, row.id, expiry, now)
                    .await?;
                row.expires_at = expiry;
                row.updated_at = now;

                info!("Extended membership of {} in {} by {}h", actor, target, hours);
                Ok(Some(row))
            }
            None => {
                let grant = NewGrant::new(actor.clone(), target.clone()).with_expiry(Some(added_expiry));
                let row = self.store.insert_grant(Relation::Membership, grant, now).await?;

                info!("Added {}h membership of {} in {}", hours, actor, target);
                Ok(Some(row))
            }
        }
    }

    async fn role_target(&self, role: &RoleRef, now: DateTime<Utc>) -> Result<EntityRef> {
        self.roles
            .resolve(role, true, now)
            .await?
            .map(|role| role.entity_ref())
            .ok_or_else(|| AuthzError::InvalidReference(format!("{} cannot be resolved", role)))
    }

    async fn permission_target(&self, permission: &PermissionRef, now: DateTime<Utc>) -> Result<EntityRef> {
        self.permissions
            .resolve(permission, true, now)
            .await?
            .map(|permission| permission.entity_ref())
            .ok_or_else(|| AuthzError::InvalidReference(format!("{} cannot be resolved", permission)))
    }

    async fn assign(
        &self,
        relation: Relation,
        actor: &EntityRef,
        target: EntityRef,
        options: AssignOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        actor.validate()?;

        let grant = NewGrant::new(actor.clone(), target)
            .with_context(options.context)
            .with_expiry(options.expires_at);

        let created = match options.max_concurrent {
            Some(limit) => {
                self.store
                    .insert_grant_if_below(relation, grant, limit, now)
                    .await?
            }
            None => Some(self.store.insert_grant(relation, grant, now).await?),
        };

        match &created {
            Some(row) => info!("Assigned {} {} to {}", relation, row.target, actor),
            None => debug!("{} already holds its {} limit, skipping", actor, relation),
        }
        Ok(created)
    }

    async fn remove(&self, relation: Relation, actor: &EntityRef, target: &EntityRef) -> Result<usize> {
        let filter = GrantFilter::for_subject(actor).target(target);
        let removed = self.store.delete_grants(relation, &filter).await?;
        if removed > 0 {
            info!("Removed {} {} row(s) of {} to {}", removed, relation, actor, target);
        }
        Ok(removed)
    }

    async fn sync(
        &self,
        relation: Relation,
        kind: EntityType,
        actor: &EntityRef,
        targets: Vec<EntityRef>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        actor.validate()?;

        let keep: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        let stale = GrantFilter::for_subject(actor)
            .target_type(kind)
            .exclude_target_ids(keep);
        let removed = self.store.delete_grants(relation, &stale).await?;

        let mut created = 0;
        let mut seen = HashSet::new();
        for target in targets {
            if !seen.insert(target.id.clone()) {
                continue;
            }
            let grant = NewGrant::new(actor.clone(), target);
            if self
                .store
                .insert_grant_if_below(relation, grant, 1, now)
                .await?
                .is_some()
            {
                created += 1;
            }
        }

        info!("Synced {} of {}: {} removed, {} created", relation, actor, removed, created);
        Ok(SyncReport { removed, created })
    }
}

fn out_of_range(hours: i64) -> AuthzError {
    AuthzError::InvalidReference(format!("extension of {}h is out of range", hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::NewRole;
    use uuid::Uuid;

    fn setup() -> (InMemoryStore, Reconciler) {
        let store = InMemoryStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_assign_role_twice_keeps_one_row() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        let first = reconciler
            .assign_role(&user, &"editor".into(), AssignOptions::default(), now)
            .await
            .unwrap();
        let second = reconciler
            .assign_role(&user, &"editor".into(), AssignOptions::default(), now)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.len(Relation::Membership).await, 1);
    }

    #[tokio::test]
    async fn test_assign_stacks_up_to_the_limit() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        for _ in 0..5 {
            reconciler
                .assign_permission(&user, &"quota".into(), AssignOptions::new().stacking(3), now)
                .await
                .unwrap();
        }
        assert_eq!(store.len(Relation::Delegation).await, 3);

        reconciler
            .assign_permission(&user, &"quota".into(), AssignOptions::new().unlimited(), now)
            .await
            .unwrap();
        assert_eq!(store.len(Relation::Delegation).await, 4);
    }

    #[tokio::test]
    async fn test_expired_membership_does_not_block_assignment() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        reconciler
            .assign_role(
                &user,
                &"trial".into(),
                AssignOptions::new().expires_at(now + Duration::hours(1)),
                now,
            )
            .await
            .unwrap();

        let later = now + Duration::hours(2);
        let renewed = reconciler
            .assign_role(&user, &"trial".into(), AssignOptions::default(), later)
            .await
            .unwrap();
        assert!(renewed.is_some());
        assert_eq!(store.len(Relation::Membership).await, 2);
    }

    #[tokio::test]
    async fn test_assign_unknown_role_id_is_invalid_reference() {
        let (_, reconciler) = setup();
        let result = reconciler
            .assign_role(
                &EntityRef::new("User", "1"),
                &RoleRef::Id(Uuid::new_v4()),
                AssignOptions::default(),
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_remove_is_a_counted_no_op_when_nothing_matches() {
        let (_, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        assert_eq!(reconciler.remove_role(&user, &"ghost".into()).await.unwrap(), 0);
        assert_eq!(reconciler.remove_permission(&user, &"ghost".into()).await.unwrap(), 0);

        reconciler
            .assign_role(&user, &"editor".into(), AssignOptions::new().stacking(2), now)
            .await
            .unwrap();
        reconciler
            .assign_role(&user, &"editor".into(), AssignOptions::new().stacking(2), now)
            .await
            .unwrap();
        assert_eq!(reconciler.remove_role(&user, &"editor".into()).await.unwrap(), 2);
        assert_eq!(reconciler.remove_role(&user, &"editor".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_roles_preserves_unchanged_rows() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();
        let expiry = now + Duration::days(3);

        let a = reconciler
            .assign_role(&user, &"a".into(), AssignOptions::new().expires_at(expiry), now)
            .await
            .unwrap()
            .unwrap();
        reconciler
            .assign_role(&user, &"c".into(), AssignOptions::default(), now)
            .await
            .unwrap();

        let later = now + Duration::minutes(5);
        let report = reconciler
            .sync_roles(&user, &["a".into(), "b".into()], later)
            .await
            .unwrap();
        assert_eq!(report, SyncReport { removed: 1, created: 1 });

        let rows = store
            .query_grants(Relation::Membership, &GrantFilter::for_subject(&user))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let kept = rows.iter().find(|r| r.id == a.id).unwrap();
        assert_eq!(kept.created_at, now);
        assert_eq!(kept.expires_at, Some(expiry));
    }

    #[tokio::test]
    async fn test_sync_to_empty_set_clears_the_kind() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        reconciler
            .assign_permission(&user, &"blog".into(), AssignOptions::default(), now)
            .await
            .unwrap();
        reconciler
            .assign_role(&user, &"editor".into(), AssignOptions::default(), now)
            .await
            .unwrap();

        let report = reconciler.sync_permissions(&user, &[], now).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(store.len(Relation::Delegation).await, 0);
        assert_eq!(store.len(Relation::Membership).await, 1);
    }

    #[tokio::test]
    async fn test_extend_or_add_role() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        assert!(reconciler
            .extend_or_add_role(&user, &"trial".into(), 0, now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.len(Relation::Membership).await, 0);

        let added = reconciler
            .extend_or_add_role(&user, &"trial".into(), 24, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.expires_at, Some(now + Duration::hours(24)));

        let extended = reconciler
            .extend_or_add_role(&user, &"trial".into(), 24, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.id, added.id);
        assert_eq!(extended.expires_at, Some(now + Duration::hours(48)));
        assert_eq!(store.len(Relation::Membership).await, 1);
    }

    #[tokio::test]
    async fn test_extend_or_add_role_rejects_out_of_range_hours() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        let result = reconciler
            .extend_or_add_role(&user, &"vip".into(), 10_000_000_000, now)
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));

        let result = reconciler
            .extend_or_add_role(&user, &"vip".into(), i64::MAX, now)
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));
        assert_eq!(store.len(Relation::Membership).await, 0);

        let near_limit = (DateTime::<Utc>::MAX_UTC - now).num_hours() - 1;
        let added = reconciler
            .extend_or_add_role(&user, &"vip".into(), near_limit, now)
            .await
            .unwrap();
        assert!(added.is_some());

        let result = reconciler
            .extend_or_add_role(&user, &"vip".into(), near_limit, now)
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));
        assert_eq!(store.len(Relation::Membership).await, 1);
    }

    #[tokio::test]
    async fn test_extend_leaves_permanent_membership_alone() {
        let (store, reconciler) = setup();
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        let role = RoleCatalog::new(Arc::new(store.clone()))
            .create(NewRole::new("Member"), now)
            .await
            .unwrap();
        reconciler
            .assign_role(&user, &(&role).into(), AssignOptions::default(), now)
            .await
            .unwrap();

        let result = reconciler
            .extend_or_add_role(&user, &(&role).into(), 24, now)
            .await
            .unwrap();
        assert!(result.is_none());

        let rows = store
            .query_grants(Relation::Membership, &GrantFilter::for_subject(&user))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].expires_at.is_none());
    }
}
