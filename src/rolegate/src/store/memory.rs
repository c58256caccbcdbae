//! In-memory store implementation

use super::{CatalogKey, GrantFilter, Store};
use crate::error::{AuthzError, Result};
use crate::types::{
    EntityRef, Grant, GrantId, NewGrant, NewRole, Permission, PermissionId, PermissionUsage,
    Relation, Role, RoleId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, Role>,
    /// Insertion-ordered rows per relation
    grants: HashMap<Relation, Vec<Grant>>,
    usages: Vec<PermissionUsage>,
}

impl Tables {
    fn rows(&self, relation: Relation) -> &[Grant] {
        self.grants.get(&relation).map(Vec::as_slice).unwrap_or(&[])
    }

    fn rows_mut(&mut self, relation: Relation) -> &mut Vec<Grant> {
        self.grants.entry(relation).or_default()
    }
}

/// Store keeping every table behind one lock
///
/// A single lock makes the conditional writes (`first_or_create_*`,
/// `insert_grant_if_below`, unique role slugs) atomic. Cloning shares state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a relation, expired ones included
    pub async fn len(&self, relation: Relation) -> usize {
        self.tables.read().await.rows(relation).len()
    }

    /// Insert a fully formed row, bypassing every uniqueness rule
    ///
    /// Lets callers seed rows with arbitrary timestamps, e.g. already expired
    /// memberships.
    pub async fn seed_grant(&self, relation: Relation, grant: Grant) {
        self.tables.write().await.rows_mut(relation).push(grant);
    }
}

fn same_link(grant: &Grant, subject: &EntityRef, target: &EntityRef) -> bool {
    &grant.subject == subject && &grant.target == target
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_permission(&self, key: CatalogKey<'_>) -> Result<Option<Permission>> {
        let tables = self.tables.read().await;
        Ok(match key {
            CatalogKey::Id(id) => tables.permissions.get(&id).cloned(),
            CatalogKey::Slug(slug) => tables.permissions.values().find(|p| p.slug == slug).cloned(),
        })
    }

    async fn first_or_create_permission(
        &self,
        slug: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Permission> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.permissions.values().find(|p| p.slug == slug) {
            return Ok(existing.clone());
        }

        let permission = Permission {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_role(&self, key: CatalogKey<'_>) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(match key {
            CatalogKey::Id(id) => tables.roles.get(&id).cloned(),
            CatalogKey::Slug(slug) => tables.roles.values().find(|r| r.slug == slug).cloned(),
        })
    }

    async fn insert_role(
        &self,
        role: NewRole,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Role>> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.slug == slug) {
            return Ok(None);
        }

        if let Some(parent_id) = role.parent_id {
            if !tables.roles.contains_key(&parent_id) {
                return Err(AuthzError::InvalidReference(format!(
                    "parent role#{} does not exist",
                    parent_id
                )));
            }
        }

        let role = Role {
            id: Uuid::new_v4(),
            name: role.name,
            slug: slug.to_string(),
            description: role.description,
            parent_id: role.parent_id,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(role.id, role.clone());
        Ok(Some(role))
    }

    async fn role_children(&self, parent_id: RoleId) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut children: Vec<Role> = tables
            .roles
            .values()
            .filter(|r| r.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.slug.cmp(&b.slug)));
        Ok(children)
    }

    async fn insert_grant(
        &self,
        relation: Relation,
        grant: NewGrant,
        now: DateTime<Utc>,
    ) -> Result<Grant> {
        let row = grant.into_grant(now);
        self.tables.write().await.rows_mut(relation).push(row.clone());
        Ok(row)
    }

    async fn insert_grant_if_below(
        &self,
        relation: Relation,
        grant: NewGrant,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        let mut tables = self.tables.write().await;
        let active = tables
            .rows(relation)
            .iter()
            .filter(|g| same_link(g, &grant.subject, &grant.target) && g.is_active(now))
            .count();

        if active >= limit {
            return Ok(None);
        }

        let row = grant.into_grant(now);
        tables.rows_mut(relation).push(row.clone());
        Ok(Some(row))
    }

    async fn first_or_create_grant(
        &self,
        relation: Relation,
        grant: NewGrant,
        now: DateTime<Utc>,
    ) -> Result<(Grant, bool)> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .rows(relation)
            .iter()
            .find(|g| same_link(g, &grant.subject, &grant.target))
        {
            return Ok((existing.clone(), false));
        }

        let row = grant.into_grant(now);
        tables.rows_mut(relation).push(row.clone());
        Ok((row, true))
    }

    async fn query_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<Vec<Grant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rows(relation)
            .iter()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect())
    }

    async fn count_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables.rows(relation).iter().filter(|g| filter.matches(g)).count())
    }

    async fn delete_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let rows = tables.rows_mut(relation);
        let before = rows.len();
        rows.retain(|g| !filter.matches(g));
        Ok(before - rows.len())
    }

    async fn update_grant_expiry(
        &self,
        relation: Relation,
        id: GrantId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .rows_mut(relation)
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| AuthzError::InvalidReference(format!("{} row {} does not exist", relation, id)))?;

        row.expires_at = expires_at;
        row.updated_at = now;
        Ok(())
    }

    async fn insert_usage(
        &self,
        permission_id: PermissionId,
        user: &EntityRef,
        usage: f64,
        context: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<PermissionUsage> {
        let record = PermissionUsage {
            id: Uuid::new_v4(),
            permission_id,
            user: user.clone(),
            usage,
            context,
            created_at: now,
        };
        self.tables.write().await.usages.push(record.clone());
        Ok(record)
    }

    async fn query_usages(
        &self,
        permission_id: PermissionId,
        user: Option<&EntityRef>,
    ) -> Result<Vec<PermissionUsage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .usages
            .iter()
            .filter(|u| u.permission_id == permission_id)
            .filter(|u| user.map_or(true, |user| &u.user == user))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(user: &str, article: &str) -> NewGrant {
        NewGrant::new(EntityRef::new("User", user), EntityRef::new("Article", article))
    }

    #[tokio::test]
    async fn test_permission_first_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let first = store.first_or_create_permission("blog.edit", None, now).await.unwrap();
        let second = store
            .first_or_create_permission("blog.edit", Some("ignored"), now)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.description.is_none());
        assert!(store.find_permission(CatalogKey::Slug("blog")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_role_rejects_taken_slug() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let admin = store.insert_role(NewRole::new("Admin"), "admin", now).await.unwrap();
        assert!(admin.is_some());

        let clash = store.insert_role(NewRole::new("Admin"), "admin", now).await.unwrap();
        assert!(clash.is_none());
    }

    #[tokio::test]
    async fn test_insert_role_with_unknown_parent_fails() {
        let store = InMemoryStore::new();
        let orphan = NewRole::new("Child").with_parent(Uuid::new_v4());
        let result = store.insert_role(orphan, "child", Utc::now()).await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_insert_grant_if_below_counts_only_active_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        store
            .seed_grant(
                Relation::Membership,
                link("1", "7").with_expiry(Some(now - Duration::hours(1))).into_grant(now),
            )
            .await;

        let created = store
            .insert_grant_if_below(Relation::Membership, link("1", "7"), 1, now)
            .await
            .unwrap();
        assert!(created.is_some());

        let blocked = store
            .insert_grant_if_below(Relation::Membership, link("1", "7"), 1, now)
            .await
            .unwrap();
        assert!(blocked.is_none());
        assert_eq!(store.len(Relation::Membership).await, 2);
    }

    #[tokio::test]
    async fn test_first_or_create_grant_returns_existing_row() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let (first, created) = store
            .first_or_create_grant(Relation::Access, link("1", "7"), now)
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store
            .first_or_create_grant(
                Relation::Access,
                link("1", "7").with_context(Some(serde_json::json!({"level": 2}))),
                now,
            )
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert!(second.context.is_none());
    }

    #[tokio::test]
    async fn test_relations_are_isolated() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        store.insert_grant(Relation::Access, link("1", "7"), now).await.unwrap();

        let filter = GrantFilter::new();
        assert_eq!(store.count_grants(Relation::Access, &filter).await.unwrap(), 1);
        assert_eq!(store.count_grants(Relation::Membership, &filter).await.unwrap(), 0);
        assert_eq!(store.delete_grants(Relation::Delegation, &filter).await.unwrap(), 0);
        assert_eq!(store.delete_grants(Relation::Access, &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_invalid_reference() {
        let store = InMemoryStore::new();
        let result = store
            .update_grant_expiry(Relation::Membership, Uuid::new_v4(), None, Utc::now())
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidReference(_))));
    }
}
