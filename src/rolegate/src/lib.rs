//! # Rolegate
//!
//! Role, permission and access resolution with expiring grants.
//!
//! ## Features
//!
//! - **Hierarchical permissions**: holding `lection` grants `lection.45.quiz`, `*` grants everything
//! - **Roles as permission carriers** with stackable, time-boxed memberships
//! - **Transitive access** from actors, their roles and their permissions to resources
//! - **Idempotent reconciliation**: assign, remove, sync and extend without duplicate rows
//! - **Pluggable storage** through the async [`Store`] trait (in-memory, PostgreSQL)
//!
//! ## Example
//!
//! ```rust
//! use rolegate::{AuthzEngine, EntityRef};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AuthzEngine::in_memory()?;
//!
//!     let learner = engine.create_role(rolegate::NewRole::new("Learner")).await?;
//!     engine.assign_permission(&learner.entity_ref(), &"lection".into()).await?;
//!
//!     let alice = EntityRef::new("User", "alice");
//!     engine.assign_role(&alice, &(&learner).into()).await?;
//!
//!     let lection = engine.permission("lection").await?;
//!     engine
//!         .grant_access(&lection.entity_ref(), &EntityRef::new("Article", "7"), None, None)
//!         .await?;
//!
//!     assert!(engine.has_permission(&alice, "lection.45").await?);
//!     assert!(engine.has_access(&alice, &EntityRef::new("Article", "7")).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod catalog;
pub mod config;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod telemetry;
pub mod temporal;
pub mod types;
pub mod usage;

// Re-export commonly used types
pub use access::{AccessIndex, AccessResolver};
pub use catalog::{slugify, PermissionCatalog, RoleCatalog};
pub use config::{EngineConfig, LoggingConfig, MorphNames, TableNames};
pub use delegation::DelegationIndex;
pub use engine::AuthzEngine;
pub use error::{AuthzError, Result};
pub use membership::MembershipIndex;
pub use metrics::{CheckKind, EngineMetrics, MetricsCollector};
pub use reconciler::{AssignOptions, Reconciler};
pub use resolver::{GrantedPermissions, PermissionResolver};
pub use store::{Activity, CatalogKey, GrantFilter, InMemoryStore, Store};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
pub use temporal::{Clock, ManualClock, SystemClock};
pub use types::{
    EntityRef, EntityType, Grant, GrantId, NewGrant, NewRole, Permission, PermissionId,
    PermissionRef, PermissionUsage, Relation, Role, RoleId, RoleRef, SyncReport, WILDCARD,
};
pub use usage::UsageLedger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
