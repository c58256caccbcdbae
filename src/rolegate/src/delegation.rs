//! Direct actor to permission grants

use crate::error::Result;
use crate::store::{GrantFilter, Store};
use crate::types::{EntityRef, EntityType, Grant, PermissionId, Relation};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Read side of the delegation relation
///
/// The subject may be of any kind. Roles hold their permissions through this
/// same relation.
#[derive(Clone)]
pub struct DelegationIndex {
    store: Arc<dyn Store>,
}

pub(crate) fn permission_id_of(grant: &Grant) -> Option<PermissionId> {
    if grant.target.entity_type != EntityType::Permission {
        return None;
    }
    match Uuid::parse_str(&grant.target.id) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Skipping delegation {} with malformed permission id '{}'", grant.id, grant.target.id);
            None
        }
    }
}

impl DelegationIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Permission ids directly and actively held by any of `subjects`, in first-granted order
    pub async fn active_permission_ids(
        &self,
        subjects: Vec<EntityRef>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionId>> {
        if subjects.is_empty() {
            return Ok(Vec::new());
        }

        let filter = GrantFilter::new()
            .subjects(subjects)
            .target_type(EntityType::Permission)
            .active_at(now);
        let rows = self.store.query_grants(Relation::Delegation, &filter).await?;

        let mut seen = HashSet::new();
        Ok(rows
            .iter()
            .filter_map(permission_id_of)
            .filter(|id| seen.insert(*id))
            .collect())
    }

    /// Set of permissions the actor directly and actively holds
    pub async fn active_permissions(&self, actor: &EntityRef, now: DateTime<Utc>) -> Result<HashSet<PermissionId>> {
        Ok(self
            .active_permission_ids(vec![actor.clone()], now)
            .await?
            .into_iter()
            .collect())
    }
}
