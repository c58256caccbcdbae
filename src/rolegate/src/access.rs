//! Entity to resource access links and transitive access checks
//!
//! An access row links an entity (an actor, a role or a permission) to a
//! resource. An actor reaches a resource when it holds an active row directly,
//! or when one of its active roles or effective permissions does.

use crate::error::Result;
use crate::membership::MembershipIndex;
use crate::resolver::PermissionResolver;
use crate::store::{GrantFilter, Store};
use crate::types::{EntityRef, EntityType, Grant, NewGrant, Relation, SyncReport};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Write and direct-read side of the access relation
#[derive(Clone)]
pub struct AccessIndex {
    store: Arc<dyn Store>,
}

impl AccessIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Link `entity` to `resource`
    ///
    /// When a row already links the pair (active or not) it is returned as is;
    /// `context` and `expires_at` only apply to a newly created row.
    pub async fn grant(
        &self,
        entity: &EntityRef,
        resource: &EntityRef,
        context: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Grant> {
        entity.validate()?;
        resource.validate()?;

        let grant = NewGrant::new(entity.clone(), resource.clone())
            .with_context(context)
            .with_expiry(expires_at);
        let (row, created) = self
            .store
            .first_or_create_grant(Relation::Access, grant, now)
            .await?;

        if created {
            info!("Granted {} access to {}", entity, resource);
        }
        Ok(row)
    }

    /// Delete every row linking `entity` to `resource`
    pub async fn revoke(&self, entity: &EntityRef, resource: &EntityRef) -> Result<usize> {
        resource.validate()?;
        let filter = GrantFilter::for_subject(entity).target(resource);
        let removed = self.store.delete_grants(Relation::Access, &filter).await?;
        if removed > 0 {
            info!("Revoked {} access row(s) of {} to {}", removed, entity, resource);
        }
        Ok(removed)
    }

    /// Delete the entity's rows, optionally only those for one resource kind
    pub async fn revoke_all(&self, entity: &EntityRef, resource_type: Option<&EntityType>) -> Result<usize> {
        let filter = Self::scoped(entity, resource_type);
        let removed = self.store.delete_grants(Relation::Access, &filter).await?;
        info!("Revoked {} access row(s) of {}", removed, entity);
        Ok(removed)
    }

    /// Direct rows of the entity that are active at `now`
    pub async fn active(
        &self,
        entity: &EntityRef,
        resource_type: Option<&EntityType>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>> {
        let filter = Self::scoped(entity, resource_type).active_at(now);
        self.store.query_grants(Relation::Access, &filter).await
    }

    /// Direct rows of the entity that have expired at `now`
    pub async fn expired(
        &self,
        entity: &EntityRef,
        resource_type: Option<&EntityType>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>> {
        let filter = Self::scoped(entity, resource_type).expired_at(now);
        self.store.query_grants(Relation::Access, &filter).await
    }

    /// Make the entity's direct rows of `resource_type` match `target_ids`
    ///
    /// Rows for other ids are deleted whether active or not. A kept id whose
    /// row has expired loses that row and gets a fresh one, as do ids without
    /// any row; both use `context` and `expires_at`. Active rows are kept
    /// untouched. Other resource kinds are left alone.
    pub async fn sync(
        &self,
        entity: &EntityRef,
        resource_type: &EntityType,
        target_ids: &[String],
        context: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        entity.validate()?;

        let stale = Self::scoped(entity, Some(resource_type)).exclude_target_ids(target_ids.to_vec());
        let mut removed = self.store.delete_grants(Relation::Access, &stale).await?;

        let lapsed = Self::scoped(entity, Some(resource_type))
            .target_ids(target_ids.to_vec())
            .expired_at(now);
        removed += self.store.delete_grants(Relation::Access, &lapsed).await?;

        let mut created = 0;
        let mut seen = HashSet::new();
        for id in target_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let resource = EntityRef::new(resource_type.clone(), id.clone());
            resource.validate()?;

            let grant = NewGrant::new(entity.clone(), resource)
                .with_context(context.clone())
                .with_expiry(expires_at);
            let (_, inserted) = self
                .store
                .first_or_create_grant(Relation::Access, grant, now)
                .await?;
            if inserted {
                created += 1;
            }
        }

        info!(
            "Synced {} access to {}: {} removed, {} created",
            entity, resource_type, removed, created
        );
        Ok(SyncReport { removed, created })
    }

    fn scoped(entity: &EntityRef, resource_type: Option<&EntityType>) -> GrantFilter {
        let filter = GrantFilter::for_subject(entity);
        match resource_type {
            Some(kind) => filter.target_type(kind.clone()),
            None => filter,
        }
    }
}

/// Transitive access through roles and permissions
#[derive(Clone)]
pub struct AccessResolver {
    store: Arc<dyn Store>,
    memberships: MembershipIndex,
    permissions: PermissionResolver,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            memberships: MembershipIndex::new(store.clone()),
            permissions: PermissionResolver::new(store.clone()),
            store,
        }
    }

    /// The actor, its active roles and its effective permissions
    pub async fn candidates(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<Vec<EntityRef>> {
        let mut candidates = vec![actor.clone()];
        candidates.extend(
            self.memberships
                .active_role_ids(actor, now)
                .await?
                .into_iter()
                .map(EntityRef::role),
        );
        candidates.extend(
            self.permissions
                .effective_permissions(actor, now)
                .await?
                .iter()
                .map(|p| p.entity_ref()),
        );

        debug!("{} reaches resources through {} entities", actor, candidates.len());
        Ok(candidates)
    }

    pub async fn has_access(&self, actor: &EntityRef, resource: &EntityRef, now: DateTime<Utc>) -> Result<bool> {
        resource.validate()?;

        let filter = GrantFilter::new()
            .subjects(self.candidates(actor, now).await?)
            .target(resource)
            .active_at(now);
        Ok(self.store.count_grants(Relation::Access, &filter).await? > 0)
    }

    /// Every active row the actor reaches, deduplicated by row id
    pub async fn all_access(
        &self,
        actor: &EntityRef,
        resource_type: Option<&EntityType>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>> {
        let mut filter = GrantFilter::new()
            .subjects(self.candidates(actor, now).await?)
            .active_at(now);
        if let Some(kind) = resource_type {
            filter = filter.target_type(kind.clone());
        }

        let rows = self.store.query_grants(Relation::Access, &filter).await?;
        let mut seen = HashSet::new();
        Ok(rows.into_iter().filter(|row| seen.insert(row.id)).collect())
    }

    /// Distinct ids of reachable resources of one kind, in first-seen order
    pub async fn accessible_ids(
        &self,
        actor: &EntityRef,
        resource_type: &EntityType,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows = self.all_access(actor, Some(resource_type), now).await?;
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .map(|row| row.target.id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }
}
