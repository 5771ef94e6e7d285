// Relay configuration
//
// Values come from three layers, highest priority first: command line,
// config file (<config_dir>/pty-relay/config.toml), built-in defaults.

mod merger;

pub use merger::{
    ConfigMerger, PartialAlertConfig, PartialConfig, PartialProcessConfig, PartialServerConfig,
};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::supervisor::{SupervisorConfig, TerminalSize};
use crate::terminal::DEFAULT_REPLAY_LIMIT;

pub const DEFAULT_PORT: u16 = 3420;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_NTFY_SERVER: &str = "https://ntfy.sh";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    /// Fixed auth token; a random one is generated when unset
    pub token: Option<String>,
    /// Hard deadline for the shutdown sequence
    pub shutdown_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            token: None,
            shutdown_deadline_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub cwd: Option<PathBuf>,
    /// Reject all observer input
    pub read_only: bool,
    pub replay_limit: usize,
    pub restart_delay_ms: u64,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let size = TerminalSize::default();
        Self {
            cwd: None,
            read_only: false,
            replay_limit: DEFAULT_REPLAY_LIMIT,
            restart_delay_ms: 1_000,
            cols: size.cols,
            rows: size.rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    pub ntfy_server: String,
    /// Alerts are only delivered when a topic is set
    pub ntfy_topic: Option<String>,
    pub ntfy_token: Option<String>,
    pub debounce_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ntfy_server: DEFAULT_NTFY_SERVER.to_string(),
            ntfy_topic: None,
            ntfy_token: None,
            debounce_ms: 3_000,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub process: ProcessConfig,
    pub alerts: AlertConfig,
}

impl RelayConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pty-relay").join("config.toml"))
    }

    /// Resolve the final configuration from an optional file and CLI overrides.
    ///
    /// An explicitly given file must exist; the default location may be absent.
    pub fn load(explicit_path: Option<&Path>, cli: PartialConfig) -> Result<Self> {
        let file = match explicit_path {
            Some(path) => Some(read_partial(path)?),
            None => match Self::default_path() {
                Some(path) if path.exists() => Some(read_partial(&path)?),
                _ => None,
            },
        };

        let config = ConfigMerger::new()
            .with_file(file)
            .with_cli(Some(cli))
            .merge();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.process.replay_limit == 0 {
            return Err(RelayError::Config(
                "replay_limit must be greater than zero".to_string(),
            ));
        }
        if self.process.cols == 0 || self.process.rows == 0 {
            return Err(RelayError::Config(format!(
                "terminal size must be positive, got {}x{}",
                self.process.cols, self.process.rows
            )));
        }
        if let Some(ref topic) = self.alerts.ntfy_topic {
            if topic.trim().is_empty() || topic.contains('/') {
                return Err(RelayError::Config(format!(
                    "invalid ntfy topic '{}'",
                    topic
                )));
            }
        }
        Ok(())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.process.restart_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.alerts.debounce_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_deadline_ms)
    }

    /// Alerts go out only when enabled and a topic is configured
    pub fn alerts_active(&self) -> bool {
        self.alerts.enabled && self.alerts.ntfy_topic.is_some()
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            replay_limit: self.process.replay_limit,
            restart_delay: self.restart_delay(),
            initial_size: TerminalSize::new(self.process.cols, self.process.rows),
            read_only: self.process.read_only,
        }
    }
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let partial = toml::from_str(&contents).map_err(|e| {
        RelayError::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(partial)
}
