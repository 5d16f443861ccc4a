use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Helpdesk service connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the helpdesk service (default: http://localhost:8000)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 150 = 2.5 min, a swarm run can take 2)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    150
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Workflow tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Milliseconds between poll ticks (default: 2000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fail the run when the service shrinks or rewrites its handoff sequence
    #[serde(default)]
    pub strict_sequence: bool,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            strict_sequence: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to `{state}/logs/` instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_state_path")]
    pub state: String,
}

fn default_state_path() -> String {
    ".seance".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: default_state_path(),
        }
    }
}

impl Config {
    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".seance/config.toml")
    }

    /// Load layered configuration: embedded defaults, project file, user file,
    /// explicit file, then `SEANCE`-prefixed environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut sources: Vec<PathBuf> = Vec::new();

        let project_config = Self::project_config_path();
        if project_config.exists() {
            sources.push(project_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("seance").join("config.toml");
            if user_config.exists() {
                sources.push(user_config);
            }
        }

        if let Some(path) = config_path {
            sources.push(PathBuf::from(path));
        }

        Self::load_from(&sources)
    }

    /// Load defaults overlaid with the given files (in order) and the environment
    pub fn load_from(files: &[PathBuf]) -> Result<Self> {
        // Start with embedded defaults so the tool works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        for file in files {
            builder = builder.add_source(config::File::from(file.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SEANCE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config as TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Save config to `.seance/config.toml`
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::project_config_path())
    }

    /// Get absolute path to state directory
    pub fn state_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.paths.state);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.timeout_secs, 150);
        assert_eq!(config.workflow.poll_interval_ms, 2000);
        assert!(!config.workflow.strict_sequence);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.to_file);
    }

    #[test]
    fn test_load_without_files_matches_defaults() {
        let config = Config::load_from(&[]).unwrap();
        assert_eq!(config.workflow, WorkflowConfig::default());
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[workflow]
poll_interval_ms = 500
strict_sequence = true

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = Config::load_from(&[path]).unwrap();
        assert_eq!(config.workflow.poll_interval_ms, 500);
        assert!(config.workflow.strict_sequence);
        assert_eq!(config.logging.level, "debug");
        // untouched sections keep their defaults
        assert_eq!(config.api.timeout_secs, 150);
    }

    #[test]
    fn test_later_files_win() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first.toml");
        let second = temp_dir.path().join("second.toml");
        std::fs::write(&first, "[api]\nbase_url = \"http://first:1\"\ntimeout_secs = 10\n").unwrap();
        std::fs::write(&second, "[api]\nbase_url = \"http://second:2\"\n").unwrap();

        let config = Config::load_from(&[first, second]).unwrap();
        assert_eq!(config.api.base_url, "http://second:2");
        assert_eq!(config.api.timeout_secs, 10);
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.api.base_url = "http://helpdesk:9000".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&[path]).unwrap();
        assert_eq!(loaded.api.base_url, "http://helpdesk:9000");
    }

    #[test]
    fn test_logs_path_under_state() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.state = temp_dir.path().to_string_lossy().to_string();

        assert!(config.logs_path().ends_with("logs"));
        assert!(config.logs_path().starts_with(temp_dir.path()));
    }
}
