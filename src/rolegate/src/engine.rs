//! Engine facade
//!
//! Wires the catalogs, indexes and resolvers to one [`Store`] and one
//! [`Clock`]. Every public call reads the clock once and evaluates all of its
//! sub-queries against that instant.
//!
//! ```text
//! Reconciler / AccessIndex ──writes──▶ Store ◀──reads── MembershipIndex
//!                                        ▲               DelegationIndex
//!                                        │                     │
//!                              AccessResolver ◀── PermissionResolver
//! ```

use crate::access::{AccessIndex, AccessResolver};
use crate::catalog::{PermissionCatalog, RoleCatalog};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::membership::MembershipIndex;
use crate::metrics::{CheckKind, EngineMetrics, MetricsCollector};
use crate::reconciler::{AssignOptions, Reconciler};
use crate::resolver::PermissionResolver;
use crate::store::{InMemoryStore, Store};
use crate::temporal::{Clock, SystemClock};
use crate::types::{
    EntityRef, EntityType, Grant, NewRole, Permission, PermissionRef, PermissionUsage, Role,
    RoleRef, SyncReport,
};
use crate::usage::UsageLedger;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Authorization engine
///
/// Stateless apart from its collaborators; share it behind an `Arc`.
pub struct AuthzEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    metrics: Option<Arc<MetricsCollector>>,

    permissions: PermissionCatalog,
    roles: RoleCatalog,
    memberships: MembershipIndex,
    resolver: PermissionResolver,
    access: AccessIndex,
    access_resolver: AccessResolver,
    reconciler: Reconciler,
    usage: UsageLedger,
}

impl AuthzEngine {
    /// Create an engine over `store` using the wall clock
    pub fn new(config: EngineConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        info!(
            "AuthzEngine initialized with metrics={}, default_max_concurrent={:?}",
            config.enable_metrics, config.default_max_concurrent
        );

        Ok(Self {
            permissions: PermissionCatalog::new(store.clone()),
            roles: RoleCatalog::new(store.clone()),
            memberships: MembershipIndex::new(store.clone()),
            resolver: PermissionResolver::new(store.clone()),
            access: AccessIndex::new(store.clone()),
            access_resolver: AccessResolver::new(store.clone()),
            reconciler: Reconciler::new(store.clone()),
            usage: UsageLedger::new(store.clone()),
            store,
            clock: Arc::new(SystemClock),
            config,
            metrics,
        })
    }

    /// Engine over a fresh [`InMemoryStore`] with the default configuration
    pub fn in_memory() -> Result<Self> {
        Self::new(EngineConfig::default(), Arc::new(InMemoryStore::new()))
    }

    /// Replace the clock, e.g. with a [`crate::ManualClock`]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Current evaluation instant
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reference built from a persisted kind name, decoded with the configured morph names
    pub fn entity_ref(&self, kind: &str, id: impl Into<String>) -> EntityRef {
        EntityRef::new(self.config.morph.decode(kind), id)
    }

    /// Metrics snapshot, `None` when metrics are disabled
    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(collector) => Some(collector.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format, `None` when metrics are disabled
    pub async fn export_metrics(&self) -> Option<String> {
        match &self.metrics {
            Some(collector) => Some(collector.export_prometheus().await),
            None => None,
        }
    }

    /// Options used by [`Self::assign_role`] and [`Self::assign_permission`]
    pub fn default_assign_options(&self) -> AssignOptions {
        AssignOptions {
            max_concurrent: self.config.default_max_concurrent,
            ..AssignOptions::default()
        }
    }

    // Catalog

    #[instrument(skip(self))]
    pub async fn create_role(&self, role: NewRole) -> Result<Role> {
        let start = Instant::now();
        let result = self.roles.create(role, self.now()).await;
        self.finish_mutation(start, result).await
    }

    pub async fn find_role(&self, slug: &str) -> Result<Option<Role>> {
        self.roles.find(slug).await
    }

    pub async fn role_children(&self, role: &Role) -> Result<Vec<Role>> {
        self.roles.children(role).await
    }

    pub async fn role_parent(&self, role: &Role) -> Result<Option<Role>> {
        self.roles.parent(role).await
    }

    /// Get or create a permission by slug
    #[instrument(skip(self))]
    pub async fn permission(&self, slug: &str) -> Result<Permission> {
        self.permissions.get_or_create(slug, self.now()).await
    }

    pub async fn find_permission(&self, slug: &str) -> Result<Option<Permission>> {
        self.permissions.find(slug).await
    }

    // Roles

    /// Active roles of the actor
    #[instrument(skip(self))]
    pub async fn roles(&self, actor: &EntityRef) -> Result<Vec<Role>> {
        let start = Instant::now();
        let result = self.memberships.roles(actor, self.now()).await;
        self.finish(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_role(&self, actor: &EntityRef, role: &RoleRef) -> Result<bool> {
        let start = Instant::now();
        let result = self.memberships.has_role(actor, role, self.now()).await;
        self.finish_check(CheckKind::Role, start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_any_role(&self, actor: &EntityRef, roles: &[RoleRef]) -> Result<bool> {
        let start = Instant::now();
        let result = self.memberships.has_any_role(actor, roles, self.now()).await;
        self.finish_check(CheckKind::Role, start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_all_roles(&self, actor: &EntityRef, roles: &[RoleRef]) -> Result<bool> {
        let start = Instant::now();
        let result = self.memberships.has_all_roles(actor, roles, self.now()).await;
        self.finish_check(CheckKind::Role, start, result).await
    }

    // Permissions

    /// Effective permissions of the actor
    #[instrument(skip(self))]
    pub async fn permissions(&self, actor: &EntityRef) -> Result<Vec<Permission>> {
        let start = Instant::now();
        let result = self.resolver.effective_permissions(actor, self.now()).await;
        self.finish(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn individual_permissions(&self, actor: &EntityRef) -> Result<Vec<Permission>> {
        let start = Instant::now();
        let result = self.resolver.individual_permissions(actor, self.now()).await;
        self.finish(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn role_permissions(&self, actor: &EntityRef) -> Result<Vec<Permission>> {
        let start = Instant::now();
        let result = self.resolver.role_permissions(actor, self.now()).await;
        self.finish(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_permission(&self, actor: &EntityRef, permission: &str) -> Result<bool> {
        let start = Instant::now();
        let result = self.resolver.has_permission(actor, permission, self.now()).await;
        self.finish_check(CheckKind::Permission, start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_any_permission(&self, actor: &EntityRef, permissions: &[&str]) -> Result<bool> {
        let start = Instant::now();
        let result = self
            .resolver
            .has_any_permission(actor, permissions, self.now())
            .await;
        self.finish_check(CheckKind::Permission, start, result).await
    }

    #[instrument(skip(self))]
    pub async fn has_all_permissions(&self, actor: &EntityRef, permissions: &[&str]) -> Result<bool> {
        let start = Instant::now();
        let result = self
            .resolver
            .has_all_permissions(actor, permissions, self.now())
            .await;
        self.finish_check(CheckKind::Permission, start, result).await
    }

    // Assignment

    /// Assign a role with the configured stacking limit
    pub async fn assign_role(&self, actor: &EntityRef, role: &RoleRef) -> Result<Option<Grant>> {
        self.assign_role_with(actor, role, self.default_assign_options()).await
    }

    #[instrument(skip(self))]
    pub async fn assign_role_with(
        &self,
        actor: &EntityRef,
        role: &RoleRef,
        options: AssignOptions,
    ) -> Result<Option<Grant>> {
        let start = Instant::now();
        let result = self.reconciler.assign_role(actor, role, options, self.now()).await;
        self.finish_mutation(start, result).await
    }

    /// Assign a permission with the configured stacking limit
    pub async fn assign_permission(&self, actor: &EntityRef, permission: &PermissionRef) -> Result<Option<Grant>> {
        self.assign_permission_with(actor, permission, self.default_assign_options())
            .await
    }

    #[instrument(skip(self))]
    pub async fn assign_permission_with(
        &self,
        actor: &EntityRef,
        permission: &PermissionRef,
        options: AssignOptions,
    ) -> Result<Option<Grant>> {
        let start = Instant::now();
        let result = self
            .reconciler
            .assign_permission(actor, permission, options, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn remove_role(&self, actor: &EntityRef, role: &RoleRef) -> Result<usize> {
        let start = Instant::now();
        let result = self.reconciler.remove_role(actor, role).await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn remove_permission(&self, actor: &EntityRef, permission: &PermissionRef) -> Result<usize> {
        let start = Instant::now();
        let result = self.reconciler.remove_permission(actor, permission).await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn sync_roles(&self, actor: &EntityRef, roles: &[RoleRef]) -> Result<SyncReport> {
        let start = Instant::now();
        let result = self.reconciler.sync_roles(actor, roles, self.now()).await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn sync_permissions(&self, actor: &EntityRef, permissions: &[PermissionRef]) -> Result<SyncReport> {
        let start = Instant::now();
        let result = self
            .reconciler
            .sync_permissions(actor, permissions, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn extend_or_add_role(&self, actor: &EntityRef, role: &RoleRef, hours: i64) -> Result<Option<Grant>> {
        let start = Instant::now();
        let result = self
            .reconciler
            .extend_or_add_role(actor, role, hours, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    // Access

    #[instrument(skip(self))]
    pub async fn grant_access(
        &self,
        entity: &EntityRef,
        resource: &EntityRef,
        context: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Grant> {
        let start = Instant::now();
        let result = self
            .access
            .grant(entity, resource, context, expires_at, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn revoke_access(&self, entity: &EntityRef, resource: &EntityRef) -> Result<usize> {
        let start = Instant::now();
        let result = self.access.revoke(entity, resource).await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn revoke_all_access(&self, entity: &EntityRef, resource_type: Option<&EntityType>) -> Result<usize> {
        let start = Instant::now();
        let result = self.access.revoke_all(entity, resource_type).await;
        self.finish_mutation(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn sync_access(
        &self,
        entity: &EntityRef,
        resource_type: &EntityType,
        ids: &[String],
        context: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let result = self
            .access
            .sync(entity, resource_type, ids, context, expires_at, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    /// Active rows owned directly by the entity
    pub async fn accesses(&self, entity: &EntityRef, resource_type: Option<&EntityType>) -> Result<Vec<Grant>> {
        self.access.active(entity, resource_type, self.now()).await
    }

    /// Expired rows owned directly by the entity
    pub async fn expired_accesses(&self, entity: &EntityRef, resource_type: Option<&EntityType>) -> Result<Vec<Grant>> {
        self.access.expired(entity, resource_type, self.now()).await
    }

    #[instrument(skip(self))]
    pub async fn has_access(&self, actor: &EntityRef, resource: &EntityRef) -> Result<bool> {
        let start = Instant::now();
        let result = self.access_resolver.has_access(actor, resource, self.now()).await;
        self.finish_check(CheckKind::Access, start, result).await
    }

    #[instrument(skip(self))]
    pub async fn all_access(&self, actor: &EntityRef, resource_type: Option<&EntityType>) -> Result<Vec<Grant>> {
        let start = Instant::now();
        let result = self
            .access_resolver
            .all_access(actor, resource_type, self.now())
            .await;
        self.finish(start, result).await
    }

    #[instrument(skip(self))]
    pub async fn accessible_ids(&self, actor: &EntityRef, resource_type: &EntityType) -> Result<Vec<String>> {
        let start = Instant::now();
        let result = self
            .access_resolver
            .accessible_ids(actor, resource_type, self.now())
            .await;
        self.finish(start, result).await
    }

    // Usage

    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        permission: &PermissionRef,
        user: &EntityRef,
        usage: f64,
        context: Option<Value>,
    ) -> Result<PermissionUsage> {
        let start = Instant::now();
        let result = self
            .usage
            .record(permission, user, usage, context, self.now())
            .await;
        self.finish_mutation(start, result).await
    }

    pub async fn usages(&self, permission: &PermissionRef, user: Option<&EntityRef>) -> Result<Vec<PermissionUsage>> {
        self.usage.usages(permission, user, self.now()).await
    }

    pub async fn total_usage(&self, permission: &PermissionRef, user: Option<&EntityRef>) -> Result<f64> {
        self.usage.total_usage(permission, user, self.now()).await
    }

    async fn finish<T>(&self, start: Instant, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_latency(start.elapsed()).await;
            if result.is_err() {
                metrics.record_error().await;
            }
        }
        if let Err(e) = &result {
            warn!("Engine call failed: {}", e);
        }
        result
    }

    async fn finish_check(&self, kind: CheckKind, start: Instant, result: Result<bool>) -> Result<bool> {
        if let (Some(metrics), Ok(allowed)) = (&self.metrics, &result) {
            metrics.record_check(kind, *allowed).await;
        }
        self.finish(start, result).await
    }

    async fn finish_mutation<T>(&self, start: Instant, result: Result<T>) -> Result<T> {
        if let (Some(metrics), Ok(_)) = (&self.metrics, &result) {
            metrics.record_mutation().await;
        }
        self.finish(start, result).await
    }
}
