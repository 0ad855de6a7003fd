//! Streaming configuration and TOML loading
//!
//! Configuration is resolved in priority order:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (applied by the binary)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! The TOML file has two tables:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [stream]
//! url = "https://audio-mp3.ibiblio.org/wxyc.mp3"
//! max_reconnect_attempts = 5
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default station stream
pub const DEFAULT_STREAM_URL: &str = "https://audio-mp3.ibiblio.org/wxyc.mp3";

/// Policy applied when the decoded buffer queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued buffer (favors fresh audio, live radio default)
    DropOldest,
    /// Make the decoder wait for space (favors completeness)
    BlockProducer,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Reconnect backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction in [0, 1)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-session streaming configuration
///
/// Supplied once at session start and immutable for the session's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfiguration {
    /// Source stream URL (http or https)
    pub url: String,

    /// Reconnect automatically after unintentional disconnects and errors
    pub auto_reconnect: bool,

    /// Reconnect attempts allowed before the session fails
    pub max_reconnect_attempts: u32,

    /// Maximum number of decoded buffers held between decoder and renderer
    pub buffer_queue_capacity: usize,

    /// Buffers that must be queued before playback starts (or resumes after a stall)
    pub minimum_buffers_before_playback: usize,

    /// Timeout for establishing the connection (not applied to the stream body)
    pub connection_timeout_ms: u64,

    /// What to do when the buffer queue is full
    pub overflow_policy: OverflowPolicy,

    /// Network chunks that may be read ahead of the decoder; once this many
    /// are in flight the client stops reading the socket
    pub max_pending_chunks: usize,

    /// Reconnect delay growth
    pub backoff: BackoffConfig,

    /// How long playback may stay stalled before it is treated as a failure
    pub stall_timeout_ms: u64,

    /// How often the control context samples render statistics for underruns
    pub underrun_check_interval_ms: u64,

    /// User-Agent sent with stream requests
    pub user_agent: String,

    /// Per-subscriber buffer for engine event notifications
    pub event_capacity: usize,
}

impl Default for StreamingConfiguration {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            buffer_queue_capacity: 32,
            minimum_buffers_before_playback: 8,
            connection_timeout_ms: 10_000,
            overflow_policy: OverflowPolicy::DropOldest,
            max_pending_chunks: 16,
            backoff: BackoffConfig::default(),
            stall_timeout_ms: 10_000,
            underrun_check_interval_ms: 100,
            user_agent: format!("WXYC-Stream/{}", env!("CARGO_PKG_VERSION")),
            event_capacity: 100,
        }
    }
}

impl StreamingConfiguration {
    /// Default configuration pointed at `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn underrun_check_interval(&self) -> Duration {
        Duration::from_millis(self.underrun_check_interval_ms.max(1))
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(Error::Config("stream url must not be empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "stream url must use http or https: {}",
                url
            )));
        }
        if self.buffer_queue_capacity == 0 {
            return Err(Error::Config(
                "buffer_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.minimum_buffers_before_playback == 0 {
            return Err(Error::Config(
                "minimum_buffers_before_playback must be at least 1".to_string(),
            ));
        }
        if self.minimum_buffers_before_playback > self.buffer_queue_capacity {
            return Err(Error::Config(format!(
                "minimum_buffers_before_playback ({}) exceeds buffer_queue_capacity ({})",
                self.minimum_buffers_before_playback, self.buffer_queue_capacity
            )));
        }
        if self.max_pending_chunks == 0 {
            return Err(Error::Config(
                "max_pending_chunks must be at least 1".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(Error::Config(
                "connection_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(self.backoff.multiplier >= 1.0) {
            return Err(Error::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(Error::Config(format!(
                "backoff jitter must be in [0, 1), got {}",
                self.backoff.jitter
            )));
        }
        if self.backoff.initial_delay_ms > self.backoff.max_delay_ms {
            return Err(Error::Config(
                "backoff initial_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Contents of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub stream: StreamingConfiguration,
}

impl TomlConfig {
    /// Parse configuration from TOML text; missing keys take built-in defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded TOML configuration from {:?}", path);
        Ok(config)
    }

    /// Load from an explicit path, else the platform default location, else defaults
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                debug!("No config file at {:?}, using built-in defaults", path);
                Ok(Self::default())
            }
            None => {
                debug!("No config directory for this platform, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Platform default configuration file path
///
/// `~/.config/wxyc/stream.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wxyc").join("stream.toml"))
}
