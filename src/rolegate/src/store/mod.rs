//! Storage seam for catalog rows, grants and usage records
//!
//! The engine never persists anything itself: every read and write goes through
//! a [`Store`]. Two implementations ship with the crate:
//!
//! - [`InMemoryStore`] - lock-protected maps, used by tests and embedders
//! - `PostgresStore` - sqlx connection pool (`postgres` feature)

use crate::error::Result;
use crate::temporal;
use crate::types::{
    EntityRef, EntityType, Grant, GrantId, NewGrant, NewRole, Permission, PermissionId,
    PermissionUsage, Relation, Role, RoleId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Catalog lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKey<'a> {
    Id(uuid::Uuid),
    Slug(&'a str),
}

/// Temporal restriction applied to a grant query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    /// Active and expired rows alike
    #[default]
    Any,
    /// Rows active at the instant
    ActiveAt(DateTime<Utc>),
    /// Rows expired at the instant
    ExpiredAt(DateTime<Utc>),
}

impl Activity {
    pub fn admits(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        match self {
            Self::Any => true,
            Self::ActiveAt(now) => temporal::is_active(expires_at, *now),
            Self::ExpiredAt(now) => temporal::is_expired(expires_at, *now),
        }
    }
}

/// Predicate over grant rows; every populated field must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantFilter {
    /// Subject must be one of these
    pub subjects: Option<Vec<EntityRef>>,

    /// Target must equal this reference
    pub target: Option<EntityRef>,

    /// Target must be of this kind
    pub target_type: Option<EntityType>,

    /// Target id must be one of these
    pub target_ids: Option<Vec<String>>,

    /// Target id must not be one of these
    pub exclude_target_ids: Option<Vec<String>>,

    pub activity: Activity,
}

impl GrantFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows held by a single subject
    pub fn for_subject(subject: &EntityRef) -> Self {
        Self::new().subjects(vec![subject.clone()])
    }

    pub fn subjects(mut self, subjects: Vec<EntityRef>) -> Self {
        self.subjects = Some(subjects);
        self
    }

    pub fn target(mut self, target: &EntityRef) -> Self {
        self.target = Some(target.clone());
        self
    }

    pub fn target_type(mut self, target_type: EntityType) -> Self {
        self.target_type = Some(target_type);
        self
    }

    pub fn target_ids(mut self, ids: Vec<String>) -> Self {
        self.target_ids = Some(ids);
        self
    }

    pub fn exclude_target_ids(mut self, ids: Vec<String>) -> Self {
        self.exclude_target_ids = Some(ids);
        self
    }

    pub fn active_at(mut self, now: DateTime<Utc>) -> Self {
        self.activity = Activity::ActiveAt(now);
        self
    }

    pub fn expired_at(mut self, now: DateTime<Utc>) -> Self {
        self.activity = Activity::ExpiredAt(now);
        self
    }

    /// Evaluate the predicate against a row
    pub fn matches(&self, grant: &Grant) -> bool {
        if let Some(subjects) = &self.subjects {
            if !subjects.contains(&grant.subject) {
                return false;
            }
        }

        if let Some(target) = &self.target {
            if &grant.target != target {
                return false;
            }
        }

        if let Some(target_type) = &self.target_type {
            if &grant.target.entity_type != target_type {
                return false;
            }
        }

        if let Some(ids) = &self.target_ids {
            if !ids.contains(&grant.target.id) {
                return false;
            }
        }

        if let Some(ids) = &self.exclude_target_ids {
            if ids.contains(&grant.target.id) {
                return false;
            }
        }

        self.activity.admits(grant.expires_at)
    }
}

/// Storage backend trait
///
/// Implementations must make `first_or_create_*`, `insert_role` and
/// `insert_grant_if_below` atomic with respect to concurrent callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look a permission up by id or slug
    async fn find_permission(&self, key: CatalogKey<'_>) -> Result<Option<Permission>>;

    /// Return the permission with `slug`, creating it when missing
    async fn first_or_create_permission(
        &self,
        slug: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Permission>;

    /// Look a role up by id or slug
    async fn find_role(&self, key: CatalogKey<'_>) -> Result<Option<Role>>;

    /// Insert a role under exactly `slug`; `None` when the slug is taken
    async fn insert_role(&self, role: NewRole, slug: &str, now: DateTime<Utc>)
        -> Result<Option<Role>>;

    /// Roles whose parent is `parent_id`
    async fn role_children(&self, parent_id: RoleId) -> Result<Vec<Role>>;

    /// Unconditionally insert a grant row
    async fn insert_grant(&self, relation: Relation, grant: NewGrant, now: DateTime<Utc>)
        -> Result<Grant>;

    /// Insert a grant unless `limit` or more active rows already link the same
    /// subject and target; `None` when the limit was reached
    async fn insert_grant_if_below(
        &self,
        relation: Relation,
        grant: NewGrant,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>>;

    /// Return the row linking subject and target (active or not), inserting
    /// `grant` when none exists. The flag is true when a row was created.
    async fn first_or_create_grant(
        &self,
        relation: Relation,
        grant: NewGrant,
        now: DateTime<Utc>,
    ) -> Result<(Grant, bool)>;

    /// Rows matching the filter, oldest first
    async fn query_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<Vec<Grant>>;

    /// Number of rows matching the filter
    async fn count_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<usize>;

    /// Delete rows matching the filter, returning how many were removed
    async fn delete_grants(&self, relation: Relation, filter: &GrantFilter) -> Result<usize>;

    /// Replace the expiry of a single row
    async fn update_grant_expiry(
        &self,
        relation: Relation,
        id: GrantId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Append a usage record
    async fn insert_usage(
        &self,
        permission_id: PermissionId,
        user: &EntityRef,
        usage: f64,
        context: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<PermissionUsage>;

    /// Usage records of a permission, optionally for a single user
    async fn query_usages(
        &self,
        permission_id: PermissionId,
        user: Option<&EntityRef>,
    ) -> Result<Vec<PermissionUsage>>;
}
