//! Relay configuration.
//!
//! Settings are read once at startup from a `key=value` file (by default
//! `~/.skeeterrc`) and are immutable afterwards. Blank lines and lines
//! starting with `#` are ignored. Durations are whole seconds except
//! `linger_ms`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use skeeter_proto::HEARTBEAT_TOPIC;

use crate::error::Error;

/// Name of the configuration file in the home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".skeeterrc";

/// Default wait on the database socket while a command is in flight.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 5;

/// Default idle wait between notification checks.
pub const DEFAULT_NOTIFY_CHECK_INTERVAL_SECS: u64 = 1;

/// Default time between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default delay before reconnecting after a connectivity failure.
pub const DEFAULT_DATABASE_RETRY_DELAY_SECS: u64 = 5;

/// Largest send queue NNG accepts for a publish socket, in messages.
pub const MAX_HWM: u32 = 8192;

/// Default time allowed for queued messages to flush when closing the bus.
pub const DEFAULT_LINGER_MS: u64 = 1000;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Database target: a bare database name, a `key=value` connection
    /// string, or a `postgres://` URL.
    pub database: String,

    /// Address the publish socket binds to (e.g., "tcp://0.0.0.0:5555").
    pub pub_socket_uri: String,

    /// Channels to `LISTEN` on, subscribed in this order.
    pub channels: Vec<String>,

    /// Outbound queue depth of the publish socket, in messages.
    pub hwm: Option<u32>,

    /// Time allowed for queued messages to flush on close.
    pub linger: Duration,

    /// Wait bound while the database session is not ready.
    pub polling_interval: Duration,

    /// Wait bound while no notification is pending.
    pub notify_check_interval: Duration,

    /// Time between heartbeats.
    pub heartbeat_interval: Duration,

    /// Delay before reconnecting after a connectivity failure.
    pub database_retry_delay: Duration,
}

impl RelayConfig {
    /// Create a configuration with default timings and no channels.
    pub fn new(database: impl Into<String>, pub_socket_uri: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            pub_socket_uri: pub_socket_uri.into(),
            channels: Vec::new(),
            hwm: None,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
            polling_interval: Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS),
            notify_check_interval: Duration::from_secs(DEFAULT_NOTIFY_CHECK_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            database_retry_delay: Duration::from_secs(DEFAULT_DATABASE_RETRY_DELAY_SECS),
        }
    }

    /// Set the channel list.
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the publish socket high-water-mark.
    pub fn with_hwm(mut self, hwm: u32) -> Self {
        self.hwm = Some(hwm);
        self
    }

    /// Set the linger duration.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Set the polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the notify check interval.
    pub fn with_notify_check_interval(mut self, interval: Duration) -> Self {
        self.notify_check_interval = interval;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reconnect delay.
    pub fn with_database_retry_delay(mut self, delay: Duration) -> Self {
        self.database_retry_delay = delay;
        self
    }

    /// Check invariants the relay loop depends on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.trim().is_empty() {
            return Err(Error::Config("database must not be empty".to_string()));
        }
        if self.pub_socket_uri.trim().is_empty() {
            return Err(Error::Config("pub_socket_uri must not be empty".to_string()));
        }
        if let Some(position) = self.channels.iter().position(|c| c.is_empty()) {
            return Err(Error::Config(format!("channel {} is empty", position)));
        }
        if let Some(hwm) = self.hwm.filter(|hwm| *hwm > MAX_HWM) {
            return Err(Error::Config(format!(
                "hwm {} exceeds the maximum of {}",
                hwm, MAX_HWM
            )));
        }
        if self.channels.iter().any(|c| c == HEARTBEAT_TOPIC) {
            tracing::warn!(
                channel = HEARTBEAT_TOPIC,
                "channel shares its topic with relay heartbeats"
            );
        }
        for (name, value) in [
            ("polling_interval", self.polling_interval),
            ("notify_check_interval", self.notify_check_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut database = None;
        let mut pub_socket_uri = None;
        let mut channels = None;
        let mut config = RelayConfig::new("", "");

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!("line {}: expected key=value, got {:?}", line_no, line))
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "database" => database = Some(value.to_string()),
                "pub_socket_uri" => pub_socket_uri = Some(value.to_string()),
                "channels" => channels = Some(parse_channels(value, line_no)?),
                "hwm" => config.hwm = Some(parse_number(key, value, line_no)?),
                "linger_ms" => {
                    config.linger = Duration::from_millis(parse_number(key, value, line_no)?)
                }
                "polling_interval" => {
                    config.polling_interval = Duration::from_secs(parse_number(key, value, line_no)?)
                }
                "notify_check_interval" => {
                    config.notify_check_interval =
                        Duration::from_secs(parse_number(key, value, line_no)?)
                }
                "heartbeat_interval" => {
                    config.heartbeat_interval =
                        Duration::from_secs(parse_number(key, value, line_no)?)
                }
                "database_retry_delay" => {
                    config.database_retry_delay =
                        Duration::from_secs(parse_number(key, value, line_no)?)
                }
                other => {
                    tracing::warn!(key = other, line = line_no, "ignoring unknown configuration key");
                }
            }
        }

        config.database = database.ok_or_else(|| missing_key("database"))?;
        config.pub_socket_uri = pub_socket_uri.ok_or_else(|| missing_key("pub_socket_uri"))?;
        config.channels = channels.ok_or_else(|| missing_key("channels"))?;
        config.validate()?;
        Ok(config)
    }
}

fn missing_key(key: &str) -> Error {
    Error::Config(format!("missing required key {:?}", key))
}

fn parse_number<T: FromStr>(key: &str, value: &str, line_no: usize) -> Result<T, Error> {
    value.parse::<T>().map_err(|_| {
        Error::Config(format!(
            "line {}: {} must be a non-negative integer, got {:?}",
            line_no, key, value
        ))
    })
}

fn parse_channels(value: &str, line_no: usize) -> Result<Vec<String>, Error> {
    value
        .split(',')
        .map(str::trim)
        .map(|channel| {
            if channel.is_empty() {
                Err(Error::Config(format!(
                    "line {}: empty channel name in {:?}",
                    line_no, value
                )))
            } else {
                Ok(channel.to_string())
            }
        })
        .collect()
}

/// Command-line arguments for the relay.
#[derive(Parser, Debug)]
#[command(name = "skeeter")]
#[command(version, about = "Relay PostgreSQL notifications to an NNG publish socket", long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.skeeterrc).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the database target from the configuration file.
    #[arg(long)]
    pub database: Option<String>,

    /// Override the publish socket address from the configuration file.
    #[arg(long)]
    pub bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub check: bool,
}

impl Args {
    /// Resolve the configuration file path.
    pub fn config_path(&self) -> Result<PathBuf, Error> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_CONFIG_FILE))
                .ok_or_else(|| {
                    Error::Config("cannot locate home directory; pass --config".to_string())
                }),
        }
    }

    /// Load the configuration file and apply command-line overrides.
    pub fn load_config(&self) -> Result<RelayConfig, Error> {
        let mut config = RelayConfig::from_file(self.config_path()?)?;
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(bind) = &self.bind {
            config.pub_socket_uri = bind.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
