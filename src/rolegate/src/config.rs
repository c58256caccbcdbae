//! Engine configuration loading and validation

use crate::error::{AuthzError, Result};
use crate::types::{EntityType, Relation};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete engine configuration
///
/// Resolved once at start-up and injected into [`crate::AuthzEngine`];
/// resolution code never looks configuration up on its own.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub tables: TableNames,

    #[serde(default)]
    pub morph: MorphNames,

    /// Stacking limit applied by `assign_*` when the caller passes no options
    #[serde(default = "default_max_concurrent")]
    pub default_max_concurrent: Option<usize>,

    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage table names, overridable so the engine can bind to existing schemas
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TableNames {
    pub roles: String,
    pub permissions: String,
    pub role_members: String,
    pub permission_members: String,
    pub accesses: String,
    pub permission_usages: String,
}

/// Type discriminators persisted for role and permission references
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MorphNames {
    pub role: String,
    pub permission: String,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    pub ansi: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> Option<usize> {
    Some(1)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            morph: MorphNames::default(),
            default_max_concurrent: default_max_concurrent(),
            enable_metrics: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            roles: "roles".to_string(),
            permissions: "permissions".to_string(),
            role_members: "role_members".to_string(),
            permission_members: "permission_members".to_string(),
            accesses: "accesses".to_string(),
            permission_usages: "permission_usages".to_string(),
        }
    }
}

impl Default for MorphNames {
    fn default() -> Self {
        Self {
            role: "Role".to_string(),
            permission: "Permission".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl TableNames {
    /// Table backing a relation kind
    pub fn for_relation(&self, relation: Relation) -> &str {
        match relation {
            Relation::Membership => &self.role_members,
            Relation::Delegation => &self.permission_members,
            Relation::Access => &self.accesses,
        }
    }

    fn all(&self) -> [(&'static str, &str); 6] {
        [
            ("roles", &self.roles),
            ("permissions", &self.permissions),
            ("role_members", &self.role_members),
            ("permission_members", &self.permission_members),
            ("accesses", &self.accesses),
            ("permission_usages", &self.permission_usages),
        ]
    }
}

impl MorphNames {
    /// Persisted discriminator for an entity type
    pub fn encode<'a>(&'a self, entity_type: &'a EntityType) -> &'a str {
        match entity_type {
            EntityType::Role => &self.role,
            EntityType::Permission => &self.permission,
            EntityType::Model(name) => name,
        }
    }

    /// Entity type for a persisted discriminator
    pub fn decode(&self, raw: &str) -> EntityType {
        if raw == self.role {
            EntityType::Role
        } else if raw == self.permission {
            EntityType::Permission
        } else {
            EntityType::Model(raw.to_string())
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (key, name) in self.tables.all() {
            if !is_identifier(name) {
                return Err(AuthzError::Config(format!(
                    "tables.{} must be a plain SQL identifier, got '{}'",
                    key, name
                )));
            }
        }

        if self.morph.role.is_empty() || self.morph.permission.is_empty() {
            return Err(AuthzError::Config("morph names cannot be empty".to_string()));
        }

        if self.morph.role == self.morph.permission {
            return Err(AuthzError::Config(format!(
                "morph names for roles and permissions must differ (both '{}')",
                self.morph.role
            )));
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_max_concurrent, Some(1));
        assert_eq!(config.tables.for_relation(Relation::Access), "accesses");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            enable_metrics = false

            [tables]
            role_members = "model_has_roles"

            [morph]
            role = "App\\Role"
            "#,
        )
        .unwrap();

        assert!(!config.enable_metrics);
        assert_eq!(config.tables.role_members, "model_has_roles");
        assert_eq!(config.tables.roles, "roles");
        assert_eq!(config.morph.role, "App\\Role");
        assert_eq!(config.morph.permission, "Permission");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_unsafe_table_names() {
        let result = EngineConfig::from_toml_str(
            r#"
            [tables]
            accesses = "accesses; DROP TABLE roles"
            "#,
        );
        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    #[test]
    fn test_rejects_clashing_morph_names() {
        let mut config = EngineConfig::default();
        config.morph.permission = config.morph.role.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_morph_round_trip() {
        let morph = MorphNames {
            role: "acl_role".to_string(),
            permission: "acl_permission".to_string(),
        };
        assert_eq!(morph.encode(&EntityType::Role), "acl_role");
        assert_eq!(morph.decode("acl_permission"), EntityType::Permission);
        assert_eq!(morph.decode("User"), EntityType::Model("User".to_string()));
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("/definitely/not/here.toml"));
    }

    #[test]
    fn test_invalid_file_keeps_config_error() {
        let path = std::env::temp_dir().join(format!("rolegate-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[tables]\nrole_members = \"bad name\"\n").unwrap();

        let err = EngineConfig::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            err.downcast_ref::<AuthzError>(),
            Some(AuthzError::Config(_))
        ));
    }
}
