//! Effective permission resolution
//!
//! An actor's effective permission set is the union of what it holds directly
//! and what its active roles hold. Role parents are never consulted.
//!
//! Matching is hierarchical over dot-separated slugs: holding `lection` grants
//! `lection.45` and `lection.45.quiz`, never the other way round, and the
//! wildcard `*` grants everything.

use crate::catalog::PermissionCatalog;
use crate::delegation::DelegationIndex;
use crate::error::Result;
use crate::membership::MembershipIndex;
use crate::store::Store;
use crate::types::{EntityRef, Permission, PermissionId, WILDCARD};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Hash set of held slugs answering hierarchical queries
///
/// A query is granted when the wildcard or any of its dot-boundary prefixes
/// (`a`, `a.b`, ..., the query itself) is held, which is equivalent to
/// scanning every held slug with [`crate::types::slug_grants`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedPermissions {
    slugs: HashSet<String>,
}

impl GrantedPermissions {
    pub fn new<I, S>(slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slugs: slugs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_permissions(permissions: &[Permission]) -> Self {
        Self::new(permissions.iter().map(|p| p.slug.clone()))
    }

    pub fn grants(&self, query: &str) -> bool {
        if self.slugs.contains(WILDCARD) || self.slugs.contains(query) {
            return true;
        }
        query
            .match_indices('.')
            .any(|(boundary, _)| self.slugs.contains(&query[..boundary]))
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.slugs.contains(slug)
    }

    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}

/// Computes effective permissions and answers permission checks
#[derive(Clone)]
pub struct PermissionResolver {
    memberships: MembershipIndex,
    delegations: DelegationIndex,
    permissions: PermissionCatalog,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            memberships: MembershipIndex::new(store.clone()),
            delegations: DelegationIndex::new(store.clone()),
            permissions: PermissionCatalog::new(store),
        }
    }

    /// Permissions the actor holds directly
    pub async fn individual_permissions(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<Permission>> {
        let ids = self
            .delegations
            .active_permission_ids(vec![actor.clone()], now)
            .await?;
        self.load(ids).await
    }

    /// Permissions held through the actor's active roles, deduplicated across roles
    pub async fn role_permissions(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<Permission>> {
        let ids = self.role_permission_ids(actor, now).await?;
        self.load(ids).await
    }

    /// Direct and role-mediated permissions, deduplicated by id
    pub async fn effective_permissions(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<Permission>> {
        let mut ids = self
            .delegations
            .active_permission_ids(vec![actor.clone()], now)
            .await?;
        ids.extend(self.role_permission_ids(actor, now).await?);

        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(*id));

        debug!("{} resolves to {} effective permission(s)", actor, ids.len());
        self.load(ids).await
    }

    /// Effective permission slugs prepared for repeated checks
    pub async fn granted(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<GrantedPermissions> {
        let permissions = self.effective_permissions(actor, now).await?;
        Ok(GrantedPermissions::from_permissions(&permissions))
    }

    pub async fn has_permission(&self, actor: &EntityRef, query: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.granted(actor, now).await?.grants(query))
    }

    /// False for an empty query list
    pub async fn has_any_permission(&self, actor: &EntityRef, queries: &[&str], now: DateTime<Utc>) -> Result<bool> {
        if queries.is_empty() {
            return Ok(false);
        }
        let granted = self.granted(actor, now).await?;
        Ok(queries.iter().any(|q| granted.grants(q)))
    }

    /// True for an empty query list
    pub async fn has_all_permissions(&self, actor: &EntityRef, queries: &[&str], now: DateTime<Utc>) -> Result<bool> {
        if queries.is_empty() {
            return Ok(true);
        }
        let granted = self.granted(actor, now).await?;
        Ok(queries.iter().all(|q| granted.grants(q)))
    }

    async fn role_permission_ids(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<PermissionId>> {
        let roles: Vec<EntityRef> = self
            .memberships
            .active_role_ids(actor, now)
            .await?
            .into_iter()
            .map(EntityRef::role)
            .collect();
        self.delegations.active_permission_ids(roles, now).await
    }

    async fn load(&self, ids: Vec<PermissionId>) -> Result<Vec<Permission>> {
        let mut permissions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(permission) = self.permissions.find_by_id(id).await? {
                permissions.push(permission);
            }
        }
        Ok(permissions)
    }
}
