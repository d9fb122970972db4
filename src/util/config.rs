use core::fmt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::accrual::ChannelRates;
use crate::util::chatters::DEFAULT_CHATTERS_HOST;

pub const DEFAULT_INTERVAL_MINUTES: i64 = 10;
pub const DEFAULT_LOG_FILTER: &str = "chatters_ledger=debug,sqlx=warn,info";

/// Process settings; every flag falls back to an environment variable (`.env` is honoured).
#[derive(Parser, Debug, Clone)]
#[command(name = "chatters-ledger", version, about = "Credit chat presence to channel ledgers")]
pub struct Settings {
    /// Path to the JSON channel list
    #[arg(short, long, env = "CHATTERS_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Redis instance holding live-state flags and last-seen hashes
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Host serving `/group/user/<channel>/chatters`
    #[arg(long, env = "CHATTERS_HOST", default_value = DEFAULT_CHATTERS_HOST)]
    pub chatters_host: String,

    /// Minutes credited per run; should match the scheduling interval
    #[arg(long, env = "CHATTERS_INTERVAL_MINUTES", default_value_t = DEFAULT_INTERVAL_MINUTES)]
    pub interval_minutes: i64,

    /// Create the `tb_user` table in each channel ledger if it is missing
    #[arg(long, default_value_t = false)]
    pub init_schema: bool,

    /// OTLP collector; traces and logs are exported when set
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl Settings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_minutes <= 0 {
            return Err(ConfigErr::Interval(self.interval_minutes));
        }

        Ok(())
    }
}

/// One monitored channel as it appears in the config file.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub streamer: String,

    /// Ledger store connection string
    pub dsn: String,

    #[serde(default)]
    pub base_points: Option<i64>,

    #[serde(default)]
    pub base_points_subbed: Option<i64>,

    /// Fraction of the regular rate granted while offline; `0.0` disables offline points
    #[serde(default)]
    pub offline_chat_point_rate: f32,
}

impl ChannelConfig {
    pub fn rates(&self) -> ChannelRates {
        ChannelRates::new(
            self.base_points,
            self.base_points_subbed,
            self.offline_chat_point_rate,
        )
    }
}

// dsn may carry credentials
impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("streamer", &self.streamer)
            .field("dsn", &"<redacted>")
            .field("base_points", &self.base_points)
            .field("base_points_subbed", &self.base_points_subbed)
            .field("offline_chat_point_rate", &self.offline_chat_point_rate)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    streams: Vec<ChannelConfig>,
}

#[instrument]
pub fn load_channels(path: &Path) -> ConfigResult<Vec<ChannelConfig>> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigErr::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let channels = parse_channels(&raw)?;
    tracing::debug!(count = channels.len(), "loaded channel config");

    Ok(channels)
}

pub fn parse_channels(raw: &str) -> ConfigResult<Vec<ChannelConfig>> {
    let file: ConfigFile = serde_json::from_str(raw)?;
    let mut seen = HashSet::new();

    for channel in &file.streams {
        if channel.streamer.trim().is_empty() {
            return Err(ConfigErr::Invalid("empty streamer name".into()));
        }

        if channel.dsn.trim().is_empty() {
            return Err(ConfigErr::Invalid(format!(
                "empty dsn for streamer '{}'",
                channel.streamer
            )));
        }

        let rate = channel.offline_chat_point_rate;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConfigErr::Invalid(format!(
                "offline_chat_point_rate for '{}' must be a non-negative number (got {})",
                channel.streamer, rate
            )));
        }

        // the same streamer may feed several ledgers, but one ledger is credited once per run
        if !seen.insert((channel.streamer.as_str(), channel.dsn.as_str())) {
            return Err(ConfigErr::Duplicate(channel.streamer.clone()));
        }
    }

    Ok(file.streams)
}

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

#[derive(Debug, Error)]
pub enum ConfigErr {
    #[error("unable to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid channel config: {0}")]
    Invalid(String),

    #[error("streamer '{0}' is configured more than once for the same dsn")]
    Duplicate(String),

    #[error("interval must be a positive number of minutes (got {0})")]
    Interval(i64),
}
