use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TabulaError};
use crate::types::RoleName;

/// Top-level configuration for the Tabula application.
///
/// Loaded from `~/.tabula/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabulaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl TabulaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TabulaConfig = toml::from_str(&content)?;
        config.routing.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TabulaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory that relative dataset paths are resolved against.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.tabula/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

/// Conversational front-door settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Whether turns are accepted at all.
    pub enabled: bool,
    /// Maximum utterance length in characters.
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_length: 2000,
        }
    }
}

/// External generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Upper bound for a single plan or synthesize call.
    pub timeout_ms: u64,
    /// Number of recent turns passed as conversational context.
    pub context_turns: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            context_turns: 5,
        }
    }
}

/// Session memory persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding sessions and turns.
    pub db_path: String,
    /// Extra attempts after a failed write.
    pub write_retries: u32,
    /// Delay between write attempts.
    pub retry_delay_ms: u64,
    /// Upper bound for a single write attempt.
    pub write_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.tabula/sessions.db".to_string(),
            write_retries: 2,
            retry_delay_ms: 100,
            write_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

/// Handoff tie-breaking policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Roles in descending precedence when several roles' triggers match.
    pub priority: Vec<RoleName>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            priority: vec![
                RoleName::DataLoader,
                RoleName::Analytics,
                RoleName::Communication,
                RoleName::Coordinator,
            ],
        }
    }
}

impl RoutingConfig {
    /// Reject priority lists that name a role twice.
    pub fn validate(&self) -> Result<()> {
        for (i, role) in self.priority.iter().enumerate() {
            if self.priority[..i].contains(role) {
                return Err(TabulaError::Config(format!(
                    "routing.priority lists {} more than once",
                    role
                )));
            }
        }
        Ok(())
    }

    /// Rank of a role; lower wins. Unlisted roles rank after listed ones.
    pub fn rank(&self, role: RoleName) -> usize {
        self.priority
            .iter()
            .position(|r| *r == role)
            .unwrap_or(self.priority.len())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = TabulaConfig::default();
        assert_eq!(config.general.data_dir, "~/.tabula/data");
        assert_eq!(config.general.log_level, "info");
        assert!(config.chat.enabled);
        assert_eq!(config.chat.max_message_length, 2000);
        assert_eq!(config.inference.context_turns, 5);
        assert_eq!(config.storage.write_retries, 2);
        assert_eq!(config.routing.priority[0], RoleName::DataLoader);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[inference]
timeout_ms = 1500
context_turns = 3

[storage]
db_path = "/tmp/tabula.db"
write_retries = 4

[routing]
priority = ["analytics", "data_loader", "communication"]
"#;
        let file = create_temp_config(content);
        let config = TabulaConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.inference.timeout_ms, 1500);
        assert_eq!(config.inference.context_turns, 3);
        assert_eq!(config.storage.write_retries, 4);
        assert_eq!(config.storage.retry_delay_ms, 100);
        assert_eq!(config.routing.priority[0], RoleName::Analytics);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = TabulaConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.chat.max_message_length, 2000);
        assert_eq!(config.routing.priority.len(), 4);
    }

    #[test]
    fn test_load_rejects_duplicate_priority() {
        let content = r#"
[routing]
priority = ["analytics", "analytics"]
"#;
        let file = create_temp_config(content);
        let err = TabulaConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, TabulaError::Config(_)));
    }

    #[test]
    fn test_load_rejects_unknown_role() {
        let content = r#"
[routing]
priority = ["insight"]
"#;
        let file = create_temp_config(content);
        assert!(TabulaConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TabulaConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.tabula/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TabulaConfig::default();
        config.inference.timeout_ms = 42;
        config.save(&path).unwrap();

        let reloaded = TabulaConfig::load(&path).unwrap();
        assert_eq!(reloaded.inference.timeout_ms, 42);
        assert_eq!(reloaded.routing.priority, config.routing.priority);
    }

    #[test]
    fn test_rank_unlisted_roles_last() {
        let routing = RoutingConfig {
            priority: vec![RoleName::Analytics],
        };
        assert_eq!(routing.rank(RoleName::Analytics), 0);
        assert_eq!(routing.rank(RoleName::DataLoader), 1);
        assert_eq!(routing.rank(RoleName::Coordinator), 1);
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/data"), PathBuf::from("/var/data"));
        assert!(!expand_home("~/x").to_string_lossy().starts_with('~'));
    }
}
