// Configuration merging with priority

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{AlertConfig, ProcessConfig, RelayConfig, ServerConfig};

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialConfig {
    #[serde(default)]
    pub server: Option<PartialServerConfig>,
    #[serde(default)]
    pub process: Option<PartialProcessConfig>,
    #[serde(default)]
    pub alerts: Option<PartialAlertConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialServerConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub token: Option<String>,
    pub shutdown_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialProcessConfig {
    pub cwd: Option<PathBuf>,
    pub read_only: Option<bool>,
    pub replay_limit: Option<usize>,
    pub restart_delay_ms: Option<u64>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialAlertConfig {
    pub enabled: Option<bool>,
    pub ntfy_server: Option<String>,
    pub ntfy_topic: Option<String>,
    pub ntfy_token: Option<String>,
    pub debounce_ms: Option<u64>,
}

/// Configuration merger
/// Priority order: CLI -> File -> Defaults
pub struct ConfigMerger {
    defaults: RelayConfig,
    file: Option<PartialConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    pub fn new() -> Self {
        Self {
            defaults: RelayConfig::default(),
            file: None,
            cli: None,
        }
    }

    /// Set config file values
    pub fn with_file(mut self, config: Option<PartialConfig>) -> Self {
        self.file = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all configs with priority
    pub fn merge(&self) -> RelayConfig {
        let mut result = self.defaults.clone();

        if let Some(ref file) = self.file {
            result = self.merge_partial(&result, file);
        }

        // CLI overrides (highest priority)
        if let Some(ref cli) = self.cli {
            result = self.merge_partial(&result, cli);
        }

        result
    }

    fn merge_partial(&self, base: &RelayConfig, partial: &PartialConfig) -> RelayConfig {
        RelayConfig {
            server: partial
                .server
                .as_ref()
                .map(|p| self.merge_server(&base.server, p))
                .unwrap_or_else(|| base.server.clone()),
            process: partial
                .process
                .as_ref()
                .map(|p| self.merge_process(&base.process, p))
                .unwrap_or_else(|| base.process.clone()),
            alerts: partial
                .alerts
                .as_ref()
                .map(|p| self.merge_alerts(&base.alerts, p))
                .unwrap_or_else(|| base.alerts.clone()),
        }
    }

    fn merge_server(&self, base: &ServerConfig, partial: &PartialServerConfig) -> ServerConfig {
        ServerConfig {
            port: partial.port.unwrap_or(base.port),
            bind: partial.bind.clone().unwrap_or_else(|| base.bind.clone()),
            token: partial.token.clone().or_else(|| base.token.clone()),
            shutdown_deadline_ms: partial
                .shutdown_deadline_ms
                .unwrap_or(base.shutdown_deadline_ms),
        }
    }

    fn merge_process(&self, base: &ProcessConfig, partial: &PartialProcessConfig) -> ProcessConfig {
        ProcessConfig {
            cwd: partial.cwd.clone().or_else(|| base.cwd.clone()),
            read_only: partial.read_only.unwrap_or(base.read_only),
            replay_limit: partial.replay_limit.unwrap_or(base.replay_limit),
            restart_delay_ms: partial.restart_delay_ms.unwrap_or(base.restart_delay_ms),
            cols: partial.cols.unwrap_or(base.cols),
            rows: partial.rows.unwrap_or(base.rows),
        }
    }

    fn merge_alerts(&self, base: &AlertConfig, partial: &PartialAlertConfig) -> AlertConfig {
        AlertConfig {
            enabled: partial.enabled.unwrap_or(base.enabled),
            ntfy_server: partial
                .ntfy_server
                .clone()
                .unwrap_or_else(|| base.ntfy_server.clone()),
            ntfy_topic: partial.ntfy_topic.clone().or_else(|| base.ntfy_topic.clone()),
            ntfy_token: partial.ntfy_token.clone().or_else(|| base.ntfy_token.clone()),
            debounce_ms: partial.debounce_ms.unwrap_or(base.debounce_ms),
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config() -> PartialConfig {
        PartialConfig {
            server: Some(PartialServerConfig {
                port: Some(4000),
                bind: Some("127.0.0.1".to_string()),
                ..Default::default()
            }),
            alerts: Some(PartialAlertConfig {
                ntfy_topic: Some("file-topic".to_string()),
                debounce_ms: Some(5000),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_overrides_file_config() {
        let cli = PartialConfig {
            server: Some(PartialServerConfig {
                port: Some(5000),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigMerger::new()
            .with_file(Some(file_config()))
            .with_cli(Some(cli))
            .merge();

        assert_eq!(result.server.port, 5000); // CLI wins
        assert_eq!(result.server.bind, "127.0.0.1"); // File wins
        assert_eq!(result.alerts.ntfy_topic.as_deref(), Some("file-topic"));
        assert_eq!(result.alerts.debounce_ms, 5000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let result = ConfigMerger::new().with_file(Some(file_config())).merge();
        let defaults = RelayConfig::default();

        assert_eq!(result.server.port, 4000);
        assert_eq!(result.process, defaults.process); // Untouched section
        assert_eq!(result.alerts.ntfy_server, defaults.alerts.ntfy_server);
    }

    #[test]
    fn test_returns_defaults_when_no_configs_exist() {
        let result = ConfigMerger::new().merge();
        assert_eq!(result, RelayConfig::default());
    }

    #[test]
    fn test_option_fields_fall_through() {
        // A CLI section without a token keeps the file's token
        let file = PartialConfig {
            server: Some(PartialServerConfig {
                token: Some("from-file".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cli = PartialConfig {
            server: Some(PartialServerConfig {
                port: Some(1234),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigMerger::new()
            .with_file(Some(file))
            .with_cli(Some(cli))
            .merge();
        assert_eq!(result.server.token.as_deref(), Some("from-file"));
        assert_eq!(result.server.port, 1234);
    }

    #[test]
    fn test_partial_config_from_toml() {
        let partial: PartialConfig = toml::from_str(
            r#"
            [process]
            read_only = true
            restart_delay_ms = 2500

            [alerts]
            enabled = false
            "#,
        )
        .unwrap();

        let process = partial.process.unwrap();
        assert_eq!(process.read_only, Some(true));
        assert_eq!(process.restart_delay_ms, Some(2500));
        assert_eq!(process.cols, None);
        assert_eq!(partial.alerts.unwrap().enabled, Some(false));
        assert!(partial.server.is_none());
    }
}
