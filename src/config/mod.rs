use crate::output::{ColorMode, OutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Size of a latency-mode payload.
pub const LATENCY_MESSAGE_SIZE: usize = crate::payload::TIMESTAMP_LEN;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub admin: Admin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default, with = "test_mode_serde")]
    pub test: TestMode,
    /// Messages sent by each publisher.
    #[serde(default = "default_num_messages")]
    pub num_messages: u64,
    /// Payload size in throughput mode.
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    #[serde(default = "default_publishers")]
    pub publishers: usize,
    #[serde(default = "default_subscribers")]
    pub subscribers: usize,
    /// How long subscribers may keep draining after the last publisher ends.
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
    /// Consecutive receive errors a subscriber tolerates before giving up.
    #[serde(default = "default_max_receive_errors")]
    pub max_receive_errors: u64,
    /// Stop a publisher at its first publish error. When false, errors are
    /// counted and publishing continues.
    #[serde(default = "default_abort_on_publish_error")]
    pub abort_on_publish_error: bool,
}

impl Default for General {
    fn default() -> Self {
        Self {
            test: TestMode::default(),
            num_messages: default_num_messages(),
            message_size: default_message_size(),
            publishers: default_publishers(),
            subscribers: default_subscribers(),
            drain_timeout: default_drain_timeout(),
            max_receive_errors: default_max_receive_errors(),
            abort_on_publish_error: default_abort_on_publish_error(),
        }
    }
}

impl General {
    /// Payload size actually sent for the configured mode.
    pub fn effective_message_size(&self) -> usize {
        match self.test {
            TestMode::Throughput => self.message_size,
            TestMode::Latency => LATENCY_MESSAGE_SIZE,
        }
    }

    /// Messages each subscriber should see.
    pub fn expected_per_subscriber(&self) -> u64 {
        self.num_messages.saturating_mul(self.publishers as u64)
    }
}

fn default_num_messages() -> u64 {
    10_000
}

fn default_message_size() -> usize {
    1000
}

fn default_publishers() -> usize {
    1
}

fn default_subscribers() -> usize {
    1
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_receive_errors() -> u64 {
    10
}

fn default_abort_on_publish_error() -> bool {
    true
}

/// What a run measures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Uniform zero-filled messages; reports send and receive rates.
    Throughput,
    /// Timestamped messages; subscribers report end-to-end latency.
    #[default]
    Latency,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Throughput => "throughput",
            TestMode::Latency => "latency",
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "throughput" => Ok(TestMode::Throughput),
            "latency" => Ok(TestMode::Latency),
            _ => Err(ConfigError::Invalid(format!(
                "invalid test mode '{}', expected: throughput, latency",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Kafka,
    RethinkDb,
    Nsq,
    /// In-process broker, no network.
    Mock,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Kafka => "kafka",
            BrokerKind::RethinkDb => "rethinkdb",
            BrokerKind::Nsq => "nsq",
            BrokerKind::Mock => "mock",
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(BrokerKind::Kafka),
            "rethinkdb" | "rethink" => Ok(BrokerKind::RethinkDb),
            "nsq" => Ok(BrokerKind::Nsq),
            "mock" => Ok(BrokerKind::Mock),
            _ => Err(ConfigError::Invalid(format!(
                "invalid broker '{}', expected: kafka, rethinkdb, nsq, mock",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default, with = "broker_kind_serde")]
    pub kind: BrokerKind,
    /// Broker host. Any port given here is replaced by the family's
    /// conventional port when peers connect.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port requested from the broker controller. For NSQ this is the host
    /// port nsqd's TCP listener is published on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Start and stop the broker with Docker around the run.
    #[serde(default)]
    pub provision: bool,
    /// Pause between provisioning and the first connection.
    #[serde(default = "default_startup_delay", with = "humantime_serde")]
    pub startup_delay: Duration,
    /// Directory holding the Kafka docker-compose project.
    #[serde(default = "default_compose_dir")]
    pub compose_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            host: default_host(),
            port: default_port(),
            provision: false,
            startup_delay: default_startup_delay(),
            compose_dir: default_compose_dir(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4150
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_compose_dir() -> PathBuf {
    PathBuf::from("docker/kafka")
}

/// Admin/metrics configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Admin {
    /// Listen address for Prometheus metrics endpoint.
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    /// Output format (clean, json, verbose, quiet).
    #[serde(default, with = "output_format_serde")]
    pub format: OutputFormat,
    /// Color mode (auto, always, never).
    #[serde(default, with = "color_mode_serde")]
    pub color: ColorMode,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.num_messages == 0 {
            return Err(ConfigError::Invalid(
                "num_messages must be greater than zero".to_string(),
            ));
        }
        if general.publishers == 0 {
            return Err(ConfigError::Invalid(
                "publishers must be greater than zero".to_string(),
            ));
        }
        if general.test == TestMode::Throughput && general.message_size == 0 {
            return Err(ConfigError::Invalid(
                "message_size must be greater than zero".to_string(),
            ));
        }
        if self.broker.kind == BrokerKind::Nsq
            && self.broker.provision
            && crate::broker::RESERVED_PORTS.contains(&self.broker.port)
        {
            return Err(ConfigError::Invalid(format!(
                "port {} is reserved for nsqlookupd/nsqd",
                self.broker.port
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime_parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn humantime_parse(s: &str) -> Result<Duration, String> {
        // Simple parser for durations like "500ms", "10s", "1m"
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration".to_string());
        }

        let (num, suffix) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));

        let value: u64 = num.parse().map_err(|e| format!("invalid number: {e}"))?;

        let multiplier = match suffix.trim() {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
            "ms" => return Ok(Duration::from_millis(value)),
            "us" => return Ok(Duration::from_micros(value)),
            "" => 1, // default to seconds
            other => return Err(format!("unknown time unit: {other}")),
        };

        Ok(Duration::from_secs(value * multiplier))
    }
}

mod test_mode_serde {
    use super::TestMode;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TestMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod broker_kind_serde {
    use super::BrokerKind;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BrokerKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod output_format_serde {
    use crate::output::OutputFormat;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod color_mode_serde {
    use crate::output::ColorMode;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ColorMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
