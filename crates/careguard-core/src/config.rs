use crate::error::{GuardError, Result};
use crate::paths;
use crate::rbac::RoleMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// GovernanceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// How often the background sweeper expires stale tickets.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Entries fetched per page by audit queries.
    #[serde(default = "default_audit_page_size")]
    pub audit_page_size: usize,
    /// Capacity of the resolution event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_audit_page_size() -> usize {
    256
}

fn default_event_buffer() -> usize {
    256
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            audit_page_size: default_audit_page_size(),
            event_buffer: default_event_buffer(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    7420
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub site: String,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub roles: RoleMatrix,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            site: site.into(),
            governance: GovernanceConfig::default(),
            server: ServerConfig::default(),
            roles: RoleMatrix::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(GuardError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::replace_file(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.governance.sweep_interval_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "governance.sweep_interval_seconds must be greater than 0".into(),
            });
        }
        if self.governance.audit_page_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "governance.audit_page_size must be greater than 0".into(),
            });
        }
        if self.governance.event_buffer == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "governance.event_buffer must be greater than 0".into(),
            });
        }

        if self.roles.approver_roles().next().is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no role may approve: queued actions can only time out".into(),
            });
        }
        for (name, grant) in &self.roles.roles {
            if grant.actions.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("role '{name}' grants no action types"),
                });
            }
            if name.chars().any(|c| c.is_ascii_uppercase()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "role '{name}' has uppercase characters; lookups match lowercase names"
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::RoleGrant;
    use tempfile::TempDir;

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(GuardError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("north-clinic");
        cfg.governance.sweep_interval_seconds = 30;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.site, "north-clinic");
        assert_eq!(loaded.governance.sweep_interval_seconds, 30);
        assert_eq!(loaded.roles, cfg.roles);
    }

    #[test]
    fn minimal_yaml_takes_defaults() {
        let cfg: Config = serde_yaml::from_str("site: lab\n").unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.server.port, 7420);
        assert_eq!(cfg.governance.sweep_interval_seconds, 5);
        assert!(cfg.roles.grant("clinical_director").is_some());
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::new("x").validate().is_empty());
    }

    #[test]
    fn validate_flags_bad_settings() {
        let mut cfg = Config::new("x");
        cfg.governance.sweep_interval_seconds = 0;
        cfg.roles.roles.clear();
        cfg.roles.roles.insert(
            "Pharmacist".into(),
            RoleGrant {
                actions: vec![],
                submit: true,
                approve: false,
            },
        );
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("sweep_interval")));
        assert!(warnings.iter().any(|w| w.message.contains("no role may approve")));
        assert!(warnings.iter().any(|w| w.message.contains("grants no action types")));
        assert!(warnings.iter().any(|w| w.message.contains("uppercase")));
    }
}
