use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, EntityType, TenantEntityKey};

/// One tenant connection from `config/tenants.yaml`: the upstream ad
/// account this pipeline keeps complete, and the credentials to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub name: String,
    /// Upstream account reference, e.g. `act_1234567890`.
    pub connection_id: String,
    pub access_token: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: EntityType,
    /// Overrides the global default lookback when set.
    pub lookback_days: Option<u32>,
    pub notes: Option<String>,
}

fn default_entity_type() -> EntityType {
    EntityType::Ad
}

impl TenantConfig {
    #[must_use]
    pub fn entity_key(&self) -> TenantEntityKey {
        TenantEntityKey {
            tenant_id: self.tenant_id.clone(),
            connection_id: self.connection_id.clone(),
            entity_type: self.entity_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TenantsFile {
    pub tenants: Vec<TenantConfig>,
}

impl TenantsFile {
    #[must_use]
    pub fn find(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.tenant_id == tenant_id)
    }
}

/// Load and validate the tenants configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_tenants(path: &Path) -> Result<TenantsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TenantsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let tenants_file: TenantsFile = serde_yaml::from_str(&content)?;

    validate_tenants(&tenants_file)?;

    Ok(tenants_file)
}

fn validate_tenants(tenants_file: &TenantsFile) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();
    let mut seen_connections = HashSet::new();

    for tenant in &tenants_file.tenants {
        if tenant.tenant_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tenant_id must be non-empty".to_string(),
            ));
        }
        if tenant.connection_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' has an empty connection_id",
                tenant.tenant_id
            )));
        }
        if tenant.access_token.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' has an empty access_token",
                tenant.tenant_id
            )));
        }
        if let Some(days) = tenant.lookback_days {
            if days == 0 {
                return Err(ConfigError::Validation(format!(
                    "tenant '{}' has lookback_days 0",
                    tenant.tenant_id
                )));
            }
        }
        if !seen_ids.insert(tenant.tenant_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate tenant_id '{}'",
                tenant.tenant_id
            )));
        }
        if !seen_connections.insert(tenant.connection_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate connection_id '{}'",
                tenant.connection_id
            )));
        }
    }

    Ok(())
}
