//! Per-permission usage ledger

use crate::catalog::PermissionCatalog;
use crate::error::{AuthzError, Result};
use crate::store::Store;
use crate::types::{EntityRef, Permission, PermissionRef, PermissionUsage};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Records how much of a permission a user consumed
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn Store>,
    permissions: PermissionCatalog,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            permissions: PermissionCatalog::new(store.clone()),
            store,
        }
    }

    /// Append a usage record, creating the permission when named by an unknown slug
    pub async fn record(
        &self,
        permission: &PermissionRef,
        user: &EntityRef,
        usage: f64,
        context: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<PermissionUsage> {
        user.validate()?;
        let permission = self.require(permission, now).await?;

        let record = self
            .store
            .insert_usage(permission.id, user, usage, context, now)
            .await?;
        debug!("{} used {} of '{}'", user, usage, permission.slug);
        Ok(record)
    }

    /// Usage records of a permission, optionally narrowed to one user
    pub async fn usages(
        &self,
        permission: &PermissionRef,
        user: Option<&EntityRef>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionUsage>> {
        match self.permissions.resolve(permission, false, now).await? {
            Some(permission) => self.store.query_usages(permission.id, user).await,
            None => Ok(Vec::new()),
        }
    }

    /// Sum of recorded usage
    pub async fn total_usage(
        &self,
        permission: &PermissionRef,
        user: Option<&EntityRef>,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        Ok(self
            .usages(permission, user, now)
            .await?
            .iter()
            .map(|record| record.usage)
            .sum())
    }

    async fn require(&self, permission: &PermissionRef, now: DateTime<Utc>) -> Result<Permission> {
        match self.permissions.resolve(permission, true, now).await? {
            Some(permission) => Ok(permission),
            None => Err(AuthzError::InvalidReference(format!(
                "{} cannot be resolved",
                permission
            ))),
        }
    }
}
