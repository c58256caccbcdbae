//! Actor to role memberships

use crate::catalog::RoleCatalog;
use crate::error::Result;
use crate::store::{GrantFilter, Store};
use crate::types::{EntityRef, EntityType, Grant, Relation, Role, RoleId, RoleRef};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Read side of the membership relation
#[derive(Clone)]
pub struct MembershipIndex {
    store: Arc<dyn Store>,
    roles: RoleCatalog,
}

/// Role id carried by a membership row, if it is well formed
pub(crate) fn role_id_of(grant: &Grant) -> Option<RoleId> {
    if grant.target.entity_type != EntityType::Role {
        return None;
    }
    match Uuid::parse_str(&grant.target.id) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Skipping membership {} with malformed role id '{}'", grant.id, grant.target.id);
            None
        }
    }
}

impl MembershipIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            roles: RoleCatalog::new(store.clone()),
            store,
        }
    }

    /// Ids of roles the actor is an active member of, in first-granted order
    pub async fn active_role_ids(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<RoleId>> {
        let filter = GrantFilter::for_subject(actor)
            .target_type(EntityType::Role)
            .active_at(now);
        let rows = self.store.query_grants(Relation::Membership, &filter).await?;

        let mut seen = HashSet::new();
        let ids: Vec<RoleId> = rows
            .iter()
            .filter_map(role_id_of)
            .filter(|id| seen.insert(*id))
            .collect();

        debug!("{} holds {} active role(s)", actor, ids.len());
        Ok(ids)
    }

    /// Set of roles the actor is an active member of
    pub async fn active_roles(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<HashSet<RoleId>> {
        Ok(self.active_role_ids(actor, now).await?.into_iter().collect())
    }

    /// Role records behind [`Self::active_roles`]
    pub async fn roles(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<Role>> {
        let mut roles = Vec::new();
        for id in self.active_role_ids(actor, now).await? {
            if let Some(role) = self.roles.find_by_id(id).await? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    pub async fn is_member(&self, actor: &EntityRef, role: RoleId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.count_active(actor, role, now).await? > 0)
    }

    /// Active membership rows linking the actor to the role
    pub async fn count_active(&self, actor: &EntityRef, role: RoleId, now: DateTime<Utc>) -> Result<usize> {
        let filter = GrantFilter::for_subject(actor)
            .target(&EntityRef::role(role))
            .active_at(now);
        self.store.count_grants(Relation::Membership, &filter).await
    }

    /// Whether the actor holds the role; unknown slugs are simply not held
    pub async fn has_role(&self, actor: &EntityRef, role: &RoleRef, now: DateTime<Utc>) -> Result<bool> {
        match role {
            RoleRef::Id(id) => self.is_member(actor, *id, now).await,
            RoleRef::Slug(slug) => match self.roles.find(slug).await? {
                Some(role) => self.is_member(actor, role.id, now).await,
                None => Ok(false),
            },
        }
    }

    /// True when any of `roles` is held; false for an empty list
    pub async fn has_any_role(&self, actor: &EntityRef, roles: &[RoleRef], now: DateTime<Utc>) -> Result<bool> {
        if roles.is_empty() {
            return Ok(false);
        }

        let held = self.active_roles(actor, now).await?;
        for role in roles {
            if let Some(id) = self.lookup(role).await? {
                if held.contains(&id) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// True when every one of `roles` is held; true for an empty list
    pub async fn has_all_roles(&self, actor: &EntityRef, roles: &[RoleRef], now: DateTime<Utc>) -> Result<bool> {
        if roles.is_empty() {
            return Ok(true);
        }

        let held = self.active_roles(actor, now).await?;
        for role in roles {
            match self.lookup(role).await? {
                Some(id) if held.contains(&id) => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn lookup(&self, role: &RoleRef) -> Result<Option<RoleId>> {
        match role {
            RoleRef::Id(id) => Ok(Some(*id)),
            RoleRef::Slug(slug) => Ok(self.roles.find(slug).await?.map(|r| r.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{NewGrant, NewRole};
    use chrono::Duration;

    async fn fixture() -> (InMemoryStore, MembershipIndex, Role, Role) {
        let store = InMemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let catalog = RoleCatalog::new(shared.clone());
        let now = Utc::now();

        let admin = catalog.create(NewRole::new("Admin"), now).await.unwrap();
        let editor = catalog.create(NewRole::new("Editor"), now).await.unwrap();
        (store, MembershipIndex::new(shared), admin, editor)
    }

    fn member(actor: &EntityRef, role: &Role, expires_at: Option<DateTime<Utc>>) -> Grant {
        NewGrant::new(actor.clone(), role.entity_ref())
            .with_expiry(expires_at)
            .into_grant(Utc::now())
    }

    #[tokio::test]
    async fn test_active_roles_skip_expired_memberships() {
        let (store, index, admin, editor) = fixture().await;
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        store.seed_grant(Relation::Membership, member(&user, &admin, None)).await;
        store
            .seed_grant(Relation::Membership, member(&user, &editor, Some(now - Duration::minutes(1))))
            .await;

        let active = index.active_roles(&user, now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains(&admin.id));

        let roles = index.roles(&user, now).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].slug, "admin");
    }

    #[tokio::test]
    async fn test_membership_expiring_exactly_now_is_inactive() {
        let (store, index, admin, _) = fixture().await;
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        store.seed_grant(Relation::Membership, member(&user, &admin, Some(now))).await;

        assert!(!index.is_member(&user, admin.id, now).await.unwrap());
        assert!(index
            .is_member(&user, admin.id, now - Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_has_role_by_slug_and_id() {
        let (store, index, admin, editor) = fixture().await;
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        store.seed_grant(Relation::Membership, member(&user, &admin, None)).await;

        assert!(index.has_role(&user, &"admin".into(), now).await.unwrap());
        assert!(index.has_role(&user, &admin.id.into(), now).await.unwrap());
        assert!(!index.has_role(&user, &(&editor).into(), now).await.unwrap());
        assert!(!index.has_role(&user, &"missing".into(), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_any_and_all_roles() {
        let (store, index, admin, _) = fixture().await;
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        store.seed_grant(Relation::Membership, member(&user, &admin, None)).await;

        assert!(!index.has_any_role(&user, &[], now).await.unwrap());
        assert!(index.has_all_roles(&user, &[], now).await.unwrap());

        let mixed = vec![RoleRef::from("editor"), RoleRef::from("admin")];
        assert!(index.has_any_role(&user, &mixed, now).await.unwrap());
        assert!(!index.has_all_roles(&user, &mixed, now).await.unwrap());

        let unknown = vec![RoleRef::from("ghost")];
        assert!(!index.has_any_role(&user, &unknown, now).await.unwrap());
        assert!(!index.has_all_roles(&user, &unknown, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_stacked_memberships_are_counted() {
        let (store, index, admin, _) = fixture().await;
        let user = EntityRef::new("User", "1");
        let now = Utc::now();

        store.seed_grant(Relation::Membership, member(&user, &admin, None)).await;
        store
            .seed_grant(Relation::Membership, member(&user, &admin, Some(now + Duration::hours(1))))
            .await;

        assert_eq!(index.count_active(&user, admin.id, now).await.unwrap(), 2);
        assert_eq!(index.active_role_ids(&user, now).await.unwrap(), vec![admin.id]);
    }
}
