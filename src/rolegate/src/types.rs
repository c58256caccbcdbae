//! Core resolution types

use crate::error::{AuthzError, Result};
use crate::temporal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique role identifier
pub type RoleId = Uuid;

/// Unique permission identifier
pub type PermissionId = Uuid;

/// Unique grant row identifier
pub type GrantId = Uuid;

/// Slug that satisfies every permission check
pub const WILDCARD: &str = "*";

/// Kind of an addressable entity
///
/// `Role` and `Permission` are the kinds the engine itself resolves through.
/// Everything else (users, articles, teams, ...) is an opaque model name that is
/// only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Role,
    Permission,
    Model(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role => "Role",
            Self::Permission => "Permission",
            Self::Model(name) => name,
        }
    }
}

/// Parses the default kind names only
///
/// With custom morph names configured, build role and permission refs through
/// [`EntityRef::role`], [`EntityRef::permission`] or `AuthzEngine::entity_ref`;
/// any other name parses as a [`EntityType::Model`].
impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        match value {
            "Role" => Self::Role,
            "Permission" => Self::Permission,
            other => Self::Model(other.to_string()),
        }
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Role" => Self::Role,
            "Permission" => Self::Permission,
            _ => Self::Model(value),
        }
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Model(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polymorphic reference to an actor or a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind (e.g. "User", "Article", `Role`)
    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// Opaque identifier within the kind
    pub id: String,
}

impl EntityRef {
    /// Create a reference from a kind and an id
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Reference to a role row
    pub fn role(id: RoleId) -> Self {
        Self::new(EntityType::Role, id.to_string())
    }

    /// Reference to a permission row
    pub fn permission(id: PermissionId) -> Self {
        Self::new(EntityType::Permission, id.to_string())
    }

    /// Fails with `InvalidReference` when the kind or the id is missing
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.as_str().is_empty() {
            return Err(AuthzError::InvalidReference(format!(
                "entity '{}' has no type",
                self.id
            )));
        }
        if self.id.is_empty() {
            return Err(AuthzError::InvalidReference(format!(
                "an id must be provided for entity type '{}'",
                self.entity_type
            )));
        }
        Ok(())
    }

    /// Parse the id as a UUID, used for role and permission references
    pub fn uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.id).map_err(|_| {
            AuthzError::InvalidReference(format!("'{}' is not a valid {} id", self.id, self.entity_type))
        })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,

    /// Globally unique slug
    pub slug: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Structural parent, never traversed by resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RoleId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::role(self.id)
    }
}

/// Input for creating a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,

    /// Requested slug; the name is slugified when absent
    #[serde(default)]
    pub slug: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

impl NewRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent_id: RoleId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Permission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,

    /// Dot-separated hierarchical slug (e.g. "lection.45.quiz")
    pub slug: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::permission(self.id)
    }

    /// Whether holding this permission satisfies `query`
    pub fn grants(&self, query: &str) -> bool {
        slug_grants(&self.slug, query)
    }
}

/// Hierarchical match: `held` grants `query` when equal, when `held` is the
/// wildcard, or when `query` extends `held` by a dot-separated suffix.
pub fn slug_grants(held: &str, query: &str) -> bool {
    if held == WILDCARD || held == query {
        return true;
    }
    query
        .strip_prefix(held)
        .map_or(false, |rest| rest.starts_with('.'))
}

/// The three timed relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Actor is a member of a role
    Membership,
    /// Actor directly holds a permission
    Delegation,
    /// Entity may reach a resource
    Access,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Membership => "membership",
            Self::Delegation => "delegation",
            Self::Access => "access",
        };
        f.write_str(name)
    }
}

/// A stored membership, delegation or access row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,

    /// Holder of the grant
    pub subject: EntityRef,

    /// Role, permission or resource the grant points at
    pub target: EntityRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        temporal::is_active(self.expires_at, now)
    }
}

/// Attributes for a grant about to be inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGrant {
    pub subject: EntityRef,
    pub target: EntityRef,

    #[serde(default)]
    pub context: Option<Value>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewGrant {
    pub fn new(subject: EntityRef, target: EntityRef) -> Self {
        Self {
            subject,
            target,
            context: None,
            expires_at: None,
        }
    }

    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Materialize the row with a fresh id
    pub fn into_grant(self, now: DateTime<Utc>) -> Grant {
        Grant {
            id: Uuid::new_v4(),
            subject: self.subject,
            target: self.target,
            context: self.context,
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rows removed and created by a sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub removed: usize,
    pub created: usize,
}

/// Ways of naming a role
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleRef {
    Id(RoleId),
    Slug(String),
}

impl From<&Role> for RoleRef {
    fn from(role: &Role) -> Self {
        Self::Id(role.id)
    }
}

impl From<RoleId> for RoleRef {
    fn from(id: RoleId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RoleRef {
    fn from(slug: &str) -> Self {
        Self::Slug(slug.to_string())
    }
}

impl From<String> for RoleRef {
    fn from(slug: String) -> Self {
        Self::Slug(slug)
    }
}

impl TryFrom<&EntityRef> for RoleRef {
    type Error = AuthzError;

    fn try_from(entity: &EntityRef) -> Result<Self> {
        if entity.entity_type != EntityType::Role {
            return Err(AuthzError::InvalidReference(format!(
                "{} is not a role",
                entity
            )));
        }
        Ok(Self::Id(entity.uuid()?))
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "role#{}", id),
            Self::Slug(slug) => write!(f, "role '{}'", slug),
        }
    }
}

/// Ways of naming a permission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionRef {
    Id(PermissionId),
    Slug(String),
}

impl From<&Permission> for PermissionRef {
    fn from(permission: &Permission) -> Self {
        Self::Id(permission.id)
    }
}

impl From<PermissionId> for PermissionRef {
    fn from(id: PermissionId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for PermissionRef {
    fn from(slug: &str) -> Self {
        Self::Slug(slug.to_string())
    }
}

impl From<String> for PermissionRef {
    fn from(slug: String) -> Self {
        Self::Slug(slug)
    }
}

impl TryFrom<&EntityRef> for PermissionRef {
    type Error = AuthzError;

    fn try_from(entity: &EntityRef) -> Result<Self> {
        if entity.entity_type != EntityType::Permission {
            return Err(AuthzError::InvalidReference(format!(
                "{} is not a permission",
                entity
            )));
        }
        Ok(Self::Id(entity.uuid()?))
    }
}

impl fmt::Display for PermissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "permission#{}", id),
            Self::Slug(slug) => write!(f, "permission '{}'", slug),
        }
    }
}

/// One recorded use of a permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionUsage {
    pub id: Uuid,
    pub permission_id: PermissionId,

    /// Who consumed the permission
    pub user: EntityRef,

    /// Amount consumed (e.g. tokens, minutes, requests)
    pub usage: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    pub created_at: DateTime<Utc>,
}
