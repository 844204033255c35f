use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat, RelayMode};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8082))
}

fn default_origin_port() -> u16 {
    80
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache_data")
}

fn default_cache_capacity() -> usize {
    100
}

fn default_relay_mode() -> RelayMode {
    RelayMode::Single
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    64 * 1024 * 1024
}

fn default_poll_backoff_threshold() -> u32 {
    16
}

fn default_poll_backoff_step_us() -> u64 {
    250
}

fn default_poll_backoff_max_ms() -> u64 {
    50
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_origin_port")]
    pub origin_port: u16,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_relay_mode")]
    pub relay_mode: RelayMode,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_poll_backoff_threshold")]
    pub poll_backoff_threshold: u32,
    #[serde(default = "default_poll_backoff_step_us")]
    pub poll_backoff_step_us: u64,
    #[serde(default = "default_poll_backoff_max_ms")]
    pub poll_backoff_max_ms: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            origin_port: default_origin_port(),
            cache_dir: default_cache_dir(),
            cache_capacity: default_cache_capacity(),
            relay_mode: default_relay_mode(),
            log: default_log_format(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            max_message_size: default_max_message_size(),
            poll_backoff_threshold: default_poll_backoff_threshold(),
            poll_backoff_step_us: default_poll_backoff_step_us(),
            poll_backoff_max_ms: default_poll_backoff_max_ms(),
            metrics_listen: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CELLPROXY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        if let Some(listen) = cli.listen {
            settings.listen = listen;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn poll_backoff_step(&self) -> Duration {
        Duration::from_micros(self.poll_backoff_step_us)
    }

    pub fn poll_backoff_max(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_max_ms)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.cache_capacity > 0,
            "cache_capacity must be at least 1 (got {})",
            self.cache_capacity
        );
        ensure!(
            self.origin_port > 0,
            "origin_port must be greater than 0 (got {})",
            self.origin_port
        );
        ensure!(
            self.max_message_size > 0,
            "max_message_size must be greater than 0 (got {})",
            self.max_message_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.poll_backoff_max_ms > 0,
            "poll_backoff_max_ms must be greater than 0 (got {})",
            self.poll_backoff_max_ms
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/cellproxy/cellproxy.toml"),
        PathBuf::from("cellproxy.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
