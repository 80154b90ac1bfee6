use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::hub::{HubSettings, PollMode};
use crate::probe::ProbeCommand;
use crate::system::history;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub probe: ProbeConfig,
    pub apps: AppsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub publish_interval_ms: u64,
    pub poll_mode: String,
    pub history_length: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            publish_interval_ms: 3000,
            poll_mode: "shared".to_string(),
            history_length: history::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8080".to_string(),
            channel_capacity: 16,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe executable; unset runs this binary's own `probe` subcommand.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            command: None,
            args: Vec::new(),
            working_dir: None,
            timeout_ms: 2500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    pub allow_list: Vec<String>,
}

impl Default for AppsConfig {
    fn default() -> Self {
        AppsConfig {
            allow_list: [
                "chrome.exe",
                "node.exe",
                "code.exe",
                "python.exe",
                "postman.exe",
                "slack.exe",
                "adobe premiere pro.exe",
                "afterfx.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Config {
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            interval: Duration::from_millis(self.general.publish_interval_ms.max(1)),
            mode: PollMode::from_str_config(&self.general.poll_mode),
            history_capacity: self.general.history_length,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms.max(1))
    }

    pub fn probe_command(&self) -> std::io::Result<ProbeCommand> {
        let mut command = match &self.probe.command {
            Some(program) => ProbeCommand::new(program),
            None => ProbeCommand::builtin()?,
        };
        command.args.extend(self.probe.args.iter().cloned());
        command.working_dir = self.probe.working_dir.clone();
        Ok(command)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("procfeed").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(path = %path.display(), "cannot read config, using defaults: {err}");
            return Config::default();
        }
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), "invalid config, using defaults: {err}");
            Config::default()
        }
    }
}
