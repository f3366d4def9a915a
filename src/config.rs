use chrono::{DateTime, Local};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::RetryPolicy;
use crate::environment::ResetConfig;
use crate::error::{LearnerError, Result};
use crate::model::{AgentConfig, ModelDims};

/// Placeholder in run names replaced by the start time
pub const TIME_PLACEHOLDER: &str = "{time}";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Run name; `{time}` expands to the start timestamp
    pub name: String,
    /// Algorithm registered in `model::build_algorithm`
    pub algorithm: String,
    /// Directory holding one sub-directory per run
    pub model_root: String,
    pub replay: EndpointConfig,
    /// Parameter server bind address
    pub learner: EndpointConfig,
    /// Actor hub bind address
    pub websocket: EndpointConfig,
    pub retry: RetryConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
    pub environment: EnvironmentConfig,
    /// Environment reset parameters (`copy` = number of agents)
    #[serde(default)]
    pub reset_config: ResetConfig,
    /// Model hyperparameters handed to the algorithm
    #[serde(default)]
    pub agent_config: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Fixed delay between replay attempts
    pub delay_ms: u64,
    /// Give up after this many attempts (unset = retry forever)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    /// Save the model and reset actors every N training steps
    pub save_model_per_step: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    pub enabled: bool,
    pub max_episode_steps: usize,
}

/// Simulation the actors run, and the model sizes it implies
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    pub state_dim: usize,
    pub action_dim: usize,
    /// Port the simulation build listens on
    #[serde(default)]
    pub build_port: Option<u16>,
    /// Simulation build per platform (`linux`, `macos`, `windows`)
    #[serde(default)]
    pub build_path: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    pub fn dims(&self) -> ModelDims {
        ModelDims {
            state_dim: self.state_dim,
            action_dim: self.action_dim,
        }
    }

    /// Build for the platform this process runs on
    pub fn platform_build_path(&self) -> Option<&str> {
        self.build_path
            .get(std::env::consts::OS)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Command-line overrides applied after file loading
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub replay_host: Option<String>,
    pub replay_port: Option<u16>,
    pub learner_port: Option<u16>,
    pub websocket_port: Option<u16>,
    pub build_port: Option<u16>,
    pub name: Option<String>,
    pub algorithm: Option<String>,
}

impl AppConfig {
    /// Load defaults, then the optional config file, then `DS_LEARNER__*` variables
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("name", TIME_PLACEHOLDER)?
            .set_default("algorithm", "linear")?
            .set_default("model_root", "models")?
            .set_default("replay.host", "127.0.0.1")?
            .set_default("replay.port", 61000)?
            .set_default("learner.host", "0.0.0.0")?
            .set_default("learner.port", 61001)?
            .set_default("websocket.host", "0.0.0.0")?
            .set_default("websocket.port", 61002)?
            .set_default("retry.delay_ms", 1000)?
            .set_default("training.save_model_per_step", 10000)?
            .set_default("evaluation.enabled", true)?
            .set_default("evaluation.max_episode_steps", 1000)?
            .set_default("environment.state_dim", 3)?
            .set_default("environment.action_dim", 1)?
            .set_default("reset_config.copy", 1.0)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("DS_LEARNER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(host) = &overrides.replay_host {
            self.replay.host = host.clone();
        }
        if let Some(port) = overrides.replay_port {
            self.replay.port = port;
        }
        if let Some(port) = overrides.learner_port {
            self.learner.port = port;
        }
        if let Some(port) = overrides.websocket_port {
            self.websocket.port = port;
        }
        if let Some(port) = overrides.build_port {
            self.environment.build_port = Some(port);
        }
        if let Some(name) = &overrides.name {
            self.name = name.clone();
        }
        if let Some(algorithm) = &overrides.algorithm {
            self.algorithm = algorithm.clone();
        }
        self
    }

    /// Expand `{time}` in the run name
    pub fn resolve_name(mut self, started_at: DateTime<Local>) -> Self {
        let stamp = started_at.format("%Y%m%d%H%M%S").to_string();
        self.name = self.name.replace(TIME_PLACEHOLDER, &stamp);
        self
    }

    /// Directory for this run's checkpoints, logs and summaries
    pub fn run_dir(&self) -> PathBuf {
        Path::new(&self.model_root).join(&self.name)
    }

    /// Write the effective configuration to `<run_dir>/config.toml`
    pub fn dump(&self) -> Result<PathBuf> {
        let dir = self.run_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Aligned `key: value` listing for the startup log
    pub fn summary(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        let mut out = String::new();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                out.push_str(&format!("\n{:>25}: {}", key, rendered));
            }
        }
        Ok(out)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }

        for (label, endpoint) in [
            ("replay", &self.replay),
            ("learner", &self.learner),
            ("websocket", &self.websocket),
        ] {
            if endpoint.port == 0 {
                errors.push(format!("{}.port must be non-zero", label));
            }
            if endpoint.host.trim().is_empty() {
                errors.push(format!("{}.host must not be empty", label));
            }
        }

        if self.learner.port == self.websocket.port {
            errors.push("learner.port and websocket.port must differ".to_string());
        }

        if self.retry.delay_ms == 0 {
            errors.push("retry.delay_ms must be positive".to_string());
        }

        if self.retry.max_attempts == Some(0) {
            errors.push("retry.max_attempts must be at least 1 when set".to_string());
        }

        if self.environment.state_dim == 0 || self.environment.action_dim == 0 {
            errors.push("environment.state_dim and environment.action_dim must be positive".to_string());
        }

        if self.environment.build_port == Some(0) {
            errors.push("environment.build_port must be non-zero when set".to_string());
        }

        if self.training.save_model_per_step == 0 {
            errors.push("training.save_model_per_step must be positive".to_string());
        }

        match self.reset_config.get("copy") {
            Some(copy) if *copy >= 1.0 => {}
            _ => errors.push("reset_config.copy must be at least 1".to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, joining every problem into one fatal error
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| LearnerError::InvalidConfig(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn defaults() -> AppConfig {
        AppConfig::load(None).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = defaults();
        assert_eq!(config.replay.addr(), "127.0.0.1:61000");
        assert_eq!(config.learner.port, 61001);
        assert_eq!(config.websocket.port, 61002);
        assert_eq!(config.retry.policy().delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.reset_config.get("copy"), Some(&1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_merges_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "replay:\n  host: 10.0.0.5\n  port: 7000\nreset_config:\n  scale: 2.5\nagent_config:\n  gamma: 0.95\n"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.replay.addr(), "10.0.0.5:7000");
        assert_eq!(config.learner.port, 61001);
        assert_eq!(config.reset_config.get("copy"), Some(&1.0));
        assert_eq!(config.reset_config.get("scale"), Some(&2.5));
        assert_eq!(config.agent_config["gamma"].as_f64(), Some(0.95));
    }

    #[test]
    fn test_environment_section_sizes_model() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "environment:\n  state_dim: 8\n  action_dim: 2\n  build_port: 5005\n  build_path:\n    linux: builds/ball.x86_64\n    windows: builds/ball.exe\n"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(
            config.environment.dims(),
            ModelDims {
                state_dim: 8,
                action_dim: 2
            }
        );
        assert_eq!(config.environment.build_port, Some(5005));
        assert_eq!(config.environment.build_path.len(), 2);

        let overridden = config.with_overrides(&ConfigOverrides {
            build_port: Some(6006),
            ..Default::default()
        });
        assert_eq!(overridden.environment.build_port, Some(6006));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/learner.yaml"))).is_err());
    }

    #[test]
    fn test_overrides_and_name_resolution() {
        let overrides = ConfigOverrides {
            learner_port: Some(7001),
            name: Some("run-{time}".to_string()),
            ..Default::default()
        };
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        let config = defaults().with_overrides(&overrides).resolve_name(started);

        assert_eq!(config.learner.port, 7001);
        assert_eq!(config.name, "run-20240309140506");
        assert_eq!(
            config.run_dir(),
            Path::new("models").join("run-20240309140506")
        );
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = defaults();
        config.websocket.port = config.learner.port;
        config.retry.max_attempts = Some(0);
        config.reset_config.insert("copy".into(), 0.0);
        config.environment.action_dim = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_dump_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = defaults();
        config.model_root = dir.path().to_string_lossy().to_string();
        config.name = "dump".to_string();

        let path = config.dump().unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("save_model_per_step = 10000"));

        let summary = config.summary().unwrap();
        assert!(summary.contains("algorithm: linear"));
    }
}
