//! Permission and role catalogs
//!
//! Catalog rows are created on first reference (get-or-create by slug) and are
//! never deleted by the engine.

use crate::error::{AuthzError, Result};
use crate::store::{CatalogKey, Store};
use crate::types::{NewRole, Permission, PermissionId, PermissionRef, Role, RoleId, RoleRef};
use chrono::{DateTime, Utc};
use deunicode::deunicode_char;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on `-N` suffixes tried while deriving a unique role slug
const MAX_SLUG_SUFFIX: usize = 10_000;

/// Lowercase ASCII slug with single dashes between words
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    // Starts true so the slug never begins with a dash
    let mut pending_dash = true;

    let mut push = |byte: u8| match byte {
        b'a'..=b'z' | b'0'..=b'9' => {
            slug.push(byte as char);
            pending_dash = false;
        }
        b'A'..=b'Z' => {
            slug.push(byte.to_ascii_lowercase() as char);
            pending_dash = false;
        }
        _ => {
            if !pending_dash {
                slug.push('-');
                pending_dash = true;
            }
        }
    };

    for c in input.chars() {
        if c.is_ascii() {
            push(c as u8);
        } else {
            for &b in deunicode_char(c).unwrap_or("-").as_bytes() {
                push(b);
            }
        }
    }

    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Canonical permission records keyed by slug
#[derive(Clone)]
pub struct PermissionCatalog {
    store: Arc<dyn Store>,
}

impl PermissionCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Return the permission with `slug`, creating it when missing
    pub async fn get_or_create(&self, slug: &str, now: DateTime<Utc>) -> Result<Permission> {
        if slug.is_empty() {
            return Err(AuthzError::InvalidReference(
                "permission slug cannot be empty".to_string(),
            ));
        }
        self.store.first_or_create_permission(slug, None, now).await
    }

    /// Like [`Self::get_or_create`], recording a description on creation
    pub async fn get_or_create_described(
        &self,
        slug: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Permission> {
        if slug.is_empty() {
            return Err(AuthzError::InvalidReference(
                "permission slug cannot be empty".to_string(),
            ));
        }
        self.store
            .first_or_create_permission(slug, Some(description), now)
            .await
    }

    pub async fn find(&self, slug: &str) -> Result<Option<Permission>> {
        self.store.find_permission(CatalogKey::Slug(slug)).await
    }

    pub async fn find_by_id(&self, id: PermissionId) -> Result<Option<Permission>> {
        self.store.find_permission(CatalogKey::Id(id)).await
    }

    /// Resolve a reference to a catalog row
    ///
    /// Slugs are get-or-created when `create` is set and looked up otherwise;
    /// ids must exist.
    pub async fn resolve(
        &self,
        reference: &PermissionRef,
        create: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Permission>> {
        match reference {
            PermissionRef::Slug(slug) if create => self.get_or_create(slug, now).await.map(Some),
            PermissionRef::Slug(slug) => self.find(slug).await,
            PermissionRef::Id(id) => match self.find_by_id(*id).await? {
                Some(permission) => Ok(Some(permission)),
                None => Err(AuthzError::InvalidReference(format!(
                    "permission#{} does not exist",
                    id
                ))),
            },
        }
    }
}

/// Role records with unique, auto-suffixed slugs
#[derive(Clone)]
pub struct RoleCatalog {
    store: Arc<dyn Store>,
}

impl RoleCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a role, suffixing `-1`, `-2`, ... onto the slug until it is unique
    pub async fn create(&self, role: NewRole, now: DateTime<Utc>) -> Result<Role> {
        let base = slugify(role.slug.as_deref().unwrap_or(&role.name));
        if base.is_empty() {
            return Err(AuthzError::InvalidReference(format!(
                "cannot derive a slug for role '{}'",
                role.name
            )));
        }

        let mut candidate = base.clone();
        for suffix in 1..=MAX_SLUG_SUFFIX {
            if let Some(created) = self.store.insert_role(role.clone(), &candidate, now).await? {
                debug!("Created role '{}' ({})", created.slug, created.id);
                return Ok(created);
            }
            candidate = format!("{}-{}", base, suffix);
        }

        Err(AuthzError::Internal(format!(
            "no free slug for role '{}' after {} attempts",
            base, MAX_SLUG_SUFFIX
        )))
    }

    /// Return the role with `slug`, creating one named after it when missing
    pub async fn get_or_create(&self, slug: &str, now: DateTime<Utc>) -> Result<Role> {
        if let Some(role) = self.find(slug).await? {
            return Ok(role);
        }

        let normalized = slugify(slug);
        if normalized != slug {
            if let Some(role) = self.find(&normalized).await? {
                return Ok(role);
            }
        }

        if normalized.is_empty() {
            return Err(AuthzError::InvalidReference(format!(
                "'{}' is not a usable role slug",
                slug
            )));
        }

        // Concurrent creators race on the unique slug; the loser re-reads
        match self.store.insert_role(NewRole::new(slug), &normalized, now).await? {
            Some(role) => Ok(role),
            None => self.find(&normalized).await?.ok_or_else(|| {
                AuthzError::Internal(format!("role '{}' vanished after insert", normalized))
            }),
        }
    }

    pub async fn find(&self, slug: &str) -> Result<Option<Role>> {
        self.store.find_role(CatalogKey::Slug(slug)).await
    }

    pub async fn find_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        self.store.find_role(CatalogKey::Id(id)).await
    }

    /// Resolve a reference to a catalog row; see [`PermissionCatalog::resolve`]
    pub async fn resolve(
        &self,
        reference: &RoleRef,
        create: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Role>> {
        match reference {
            RoleRef::Slug(slug) if create => self.get_or_create(slug, now).await.map(Some),
            RoleRef::Slug(slug) => self.find(slug).await,
            RoleRef::Id(id) => match self.find_by_id(*id).await? {
                Some(role) => Ok(Some(role)),
                None => Err(AuthzError::InvalidReference(format!("role#{} does not exist", id))),
            },
        }
    }

    pub async fn parent(&self, role: &Role) -> Result<Option<Role>> {
        match role.parent_id {
            Some(parent_id) => self.find_by_id(parent_id).await,
            None => Ok(None),
        }
    }

    pub async fn children(&self, role: &Role) -> Result<Vec<Role>> {
        self.store.role_children(role.id).await
    }
}
