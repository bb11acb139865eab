use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collaborators::StageCommand;
use crate::pipeline::StageId;

/// Main configuration structure for clipflow
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClipflowConfig {
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Status broadcast settings
    pub broadcast: BroadcastConfig,
    /// Where job records live
    pub store: StoreConfig,
    pub shutdown: ShutdownConfig,
    /// External command run for each stage, keyed by stage id
    pub stages: BTreeMap<StageId, StageCommand>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    /// Snapshots buffered per topic before slow receivers start lagging
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory holding one JSON file per job (file backend)
    pub path: PathBuf,
    /// SQLite URL (sqlite backend, requires the `database` feature)
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight stage hand-offs on exit
    pub drain_timeout_seconds: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from(".clipflow/jobs"),
            url: "sqlite://.clipflow/clipflow.db".to_string(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: 30,
        }
    }
}

impl Default for ClipflowConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig::default(),
            broadcast: BroadcastConfig::default(),
            store: StoreConfig::default(),
            shutdown: ShutdownConfig::default(),
            stages: BTreeMap::new(),
        }
    }
}

impl ClipflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (clipflow.toml, .clipflow-rc)
    /// 3. Environment variables (prefixed with CLIPFLOW_, `__` between sections)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ClipflowConfig::load`], reading files from `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let defaults = Config::try_from(&ClipflowConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        let main_file = dir.join("clipflow.toml");
        if main_file.exists() {
            builder = builder.add_source(File::from(main_file));
        }

        let rc_file = dir.join(".clipflow-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("CLIPFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ClipflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = ClipflowConfig::load_env_file();
        ClipflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ClipflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let config = config()?;
    tracing::info!(
        store = ?config.store.backend,
        stage_hooks = config.stages.len(),
        "Configuration loaded successfully"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = ClipflowConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.broadcast.capacity, 64);
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(30));
        assert!(config.stages.is_empty());
    }

    #[test]
    fn file_overrides_defaults_and_declares_stage_hooks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("clipflow.toml"),
            r#"
[store]
backend = "memory"

[broadcast]
capacity = 8

[stages.transcription]
program = "whisper-worker"
args = ["--model", "small"]
"#,
        )
        .unwrap();

        let config = ClipflowConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.broadcast.capacity, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.observability.log_level, "info");

        let hook = &config.stages[&StageId::Transcription];
        assert_eq!(hook.program, "whisper-worker");
        assert_eq!(hook.args, vec!["--model", "small"]);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let mut config = ClipflowConfig::default();
        config.observability.json_logs = true;
        config.shutdown.drain_timeout_seconds = 5;
        config.save_to_file(dir.path().join("clipflow.toml")).unwrap();

        let loaded = ClipflowConfig::load_from(dir.path()).unwrap();
        assert!(loaded.observability.json_logs);
        assert_eq!(loaded.shutdown.drain_timeout_seconds, 5);
    }
}
