use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Source};
use serde::Deserialize;

use crate::backoff::ExponentialBackoff;
use crate::networking::connection::ConnectionConfig;

/// Looked up in the working directory when no config file is named.
pub const DEFAULT_CONFIG: &str = "config";
pub const ENV_PREFIX: &str = "SHIP";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientSettings {
    pub node: NodeSettings,
    pub stream: StreamSettings,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeSettings {
    pub host: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamSettings {
    /// First block wanted; the node's retained range may push it later.
    pub start_block: u32,
    /// Stop once this block is reached. 0 streams forever.
    pub stop_before: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<String>,
    pub start_block: Option<u32>,
    pub stop_before: Option<u32>,
}

impl ClientSettings {
    /// Loads `config_name` (any format the config crate knows, extension
    /// optional), then `SHIP_*` environment variables (`SHIP_NODE__HOST`),
    /// then `overrides`. A missing default config file is not an error.
    pub fn load(config_name: Option<&str>, overrides: &Overrides) -> crate::Result<Self> {
        let file = match config_name {
            Some(name) => File::with_name(name),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        Self::build(file, ENV_PREFIX, overrides)
    }

    pub fn from_toml(text: &str, overrides: &Overrides) -> crate::Result<Self> {
        Self::build(File::from_str(text, FileFormat::Toml), ENV_PREFIX, overrides)
    }

    fn build<S>(file: S, env_prefix: &str, overrides: &Overrides) -> crate::Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut settings = Config::default();
        settings
            .set_default("node.host", "127.0.0.1")?
            .set_default("node.port", "8080")?
            .set_default("stream.start_block", 0i64)?
            .set_default("stream.stop_before", 0i64)?
            .set_default("reconnect.initial_delay_ms", 500i64)?
            .set_default("reconnect.max_delay_ms", 30_000i64)?
            .set_default("reconnect.backoff_factor", 2.0)?;

        settings
            .merge(file)?
            .merge(Environment::with_prefix(env_prefix).separator("__"))?;

        if let Some(host) = &overrides.host {
            settings.set("node.host", host.as_str())?;
        }
        if let Some(port) = &overrides.port {
            settings.set("node.port", port.as_str())?;
        }
        if let Some(start_block) = overrides.start_block {
            settings.set("stream.start_block", i64::from(start_block))?;
        }
        if let Some(stop_before) = overrides.stop_before {
            settings.set("stream.stop_before", i64::from(stop_before))?;
        }

        let settings: ClientSettings = settings.try_into()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.connection_config().websocket_url()?;
        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be positive".into());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must not be below initial_delay_ms".into());
        }
        let factor = self.reconnect.backoff_factor;
        if factor.is_nan() || factor < 1.0 {
            return Err("reconnect.backoff_factor must be at least 1.0".into());
        }
        if self.stream.stop_before != 0 && self.stream.stop_before <= self.stream.start_block {
            return Err("stream.stop_before must be after stream.start_block".into());
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.node.host.clone(), self.node.port.clone())
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect.initial_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
            self.reconnect.backoff_factor,
        )
    }
}
