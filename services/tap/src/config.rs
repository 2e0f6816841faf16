use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tap_cloud::ReceiveOptions;
use tap_common::{DEFAULT_REGION, DEFAULT_RETENTION_SECONDS};

/// What happens to a message once it has been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Delete each message after it is emitted so it is never redelivered.
    Delete,
    /// Leave messages in the queue; they expire with the retention window.
    None,
}

impl FromStr for AckMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delete" | "ack" | "true" | "1" | "yes" => Ok(AckMode::Delete),
            "none" | "off" | "false" | "0" | "no" => Ok(AckMode::None),
            other => bail!("unknown ack mode: {other}"),
        }
    }
}

/// What gets written to stdout per delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// The published payload carried in the envelope's `Message` field.
    Message,
    /// The delivered body, envelope included.
    Raw,
}

// Tap configuration sourced from environment variables, a YAML file, then flags.
#[derive(Debug, Clone)]
pub struct TapConfig {
    // Region all clients are pinned to.
    pub region: String,
    pub ack_mode: AckMode,
    pub output_mode: OutputMode,
    // Long-poll wait per receive call; bounds shutdown latency.
    pub wait_time_seconds: i32,
    pub max_messages: i32,
    pub visibility_timeout_seconds: Option<i32>,
    // Retention applied to the provisioned queue.
    pub retention_seconds: u32,
    // Pause after a failed receive before polling again.
    pub poll_backoff_ms: u64,
    // Extra time granted to the drain loop on top of one poll wait at shutdown.
    pub drain_grace_ms: u64,
    // Prometheus endpoint; disabled when unset.
    pub metrics_bind: Option<SocketAddr>,
}

const DEFAULT_WAIT_TIME_SECONDS: i32 = 5;
const DEFAULT_MAX_MESSAGES: i32 = 10;
const DEFAULT_POLL_BACKOFF_MS: u64 = 1000;
const DEFAULT_DRAIN_GRACE_MS: u64 = 2000;

const MAX_WAIT_TIME_SECONDS: i32 = 20;
const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;
const MIN_RETENTION_SECONDS: u32 = 60;
const MAX_RETENTION_SECONDS: u32 = 1_209_600;

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            ack_mode: AckMode::Delete,
            output_mode: OutputMode::Message,
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
            max_messages: DEFAULT_MAX_MESSAGES,
            visibility_timeout_seconds: None,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            poll_backoff_ms: DEFAULT_POLL_BACKOFF_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            metrics_bind: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TapConfigOverride {
    region: Option<String>,
    ack_mode: Option<AckMode>,
    output_mode: Option<OutputMode>,
    wait_time_seconds: Option<i32>,
    max_messages: Option<i32>,
    visibility_timeout_seconds: Option<i32>,
    retention_seconds: Option<u32>,
    poll_backoff_ms: Option<u64>,
    drain_grace_ms: Option<u64>,
    metrics_bind: Option<String>,
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parse {key}: {err}")),
        Err(_) => Ok(None),
    }
}

impl TapConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        // An explicit TAP_REGION wins over the SDK's own AWS_REGION.
        let region = std::env::var("TAP_REGION")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.region);
        let ack_mode = env_parsed::<AckMode>("TAP_ACK_MODE")?.unwrap_or(defaults.ack_mode);
        let output_mode = match std::env::var("TAP_OUTPUT").ok().as_deref() {
            Some("raw") => OutputMode::Raw,
            Some("message") | None => OutputMode::Message,
            Some(other) => bail!("parse TAP_OUTPUT: unknown output mode {other}"),
        };
        let wait_time_seconds =
            env_parsed("TAP_WAIT_TIME_SECS")?.unwrap_or(defaults.wait_time_seconds);
        let max_messages = env_parsed("TAP_MAX_MESSAGES")?.unwrap_or(defaults.max_messages);
        let visibility_timeout_seconds = env_parsed("TAP_VISIBILITY_TIMEOUT_SECS")?;
        let retention_seconds =
            env_parsed("TAP_RETENTION_SECS")?.unwrap_or(defaults.retention_seconds);
        let poll_backoff_ms =
            env_parsed("TAP_POLL_BACKOFF_MS")?.unwrap_or(defaults.poll_backoff_ms);
        let drain_grace_ms = env_parsed("TAP_DRAIN_GRACE_MS")?.unwrap_or(defaults.drain_grace_ms);
        let metrics_bind = env_parsed::<SocketAddr>("TAP_METRICS_BIND")?;
        Ok(Self {
            region,
            ack_mode,
            output_mode,
            wait_time_seconds,
            max_messages,
            visibility_timeout_seconds,
            retention_seconds,
            poll_backoff_ms,
            drain_grace_ms,
            metrics_bind,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("TAP_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read TAP_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: TapConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse tap config yaml")?;
        if let Some(value) = override_cfg.region {
            self.region = value;
        }
        if let Some(value) = override_cfg.ack_mode {
            self.ack_mode = value;
        }
        if let Some(value) = override_cfg.output_mode {
            self.output_mode = value;
        }
        if let Some(value) = override_cfg.wait_time_seconds {
            self.wait_time_seconds = value;
        }
        if let Some(value) = override_cfg.max_messages {
            self.max_messages = value;
        }
        if let Some(value) = override_cfg.visibility_timeout_seconds {
            self.visibility_timeout_seconds = Some(value);
        }
        if let Some(value) = override_cfg.retention_seconds {
            self.retention_seconds = value;
        }
        if let Some(value) = override_cfg.poll_backoff_ms {
            self.poll_backoff_ms = value;
        }
        if let Some(value) = override_cfg.drain_grace_ms {
            self.drain_grace_ms = value;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        Ok(())
    }

    /// Reject values the messaging service would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            bail!("region must not be empty");
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            bail!(
                "wait time must be between 0 and {MAX_WAIT_TIME_SECONDS} seconds, got {}",
                self.wait_time_seconds
            );
        }
        if !(1..=10).contains(&self.max_messages) {
            bail!("max messages must be between 1 and 10, got {}", self.max_messages);
        }
        if let Some(value) = self.visibility_timeout_seconds
            && !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&value)
        {
            bail!("visibility timeout must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECONDS} seconds, got {value}");
        }
        if !(MIN_RETENTION_SECONDS..=MAX_RETENTION_SECONDS).contains(&self.retention_seconds) {
            bail!(
                "retention must be between {MIN_RETENTION_SECONDS} and {MAX_RETENTION_SECONDS} seconds, got {}",
                self.retention_seconds
            );
        }
        Ok(())
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    /// Longest the control task waits for the drain loop after cancelling it.
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds.max(0) as u64)
            + Duration::from_millis(self.drain_grace_ms)
    }
}
