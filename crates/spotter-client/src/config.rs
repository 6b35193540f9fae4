//! Client configuration loaded from environment variables.
//!
//! Everything has a default so the engine can run against a local backend
//! with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use spotter_net::HealthPolicy;
use spotter_shared::constants::DEFAULT_SEND_TIMEOUT_SECS;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat backend.
    /// Env: `SPOTTER_API_URL`
    /// Default: `http://localhost:3000/api`
    pub api_base_url: String,

    /// Id this console sends as; decides which messages are "own".
    /// Env: `SPOTTER_SENDER_ID`
    /// Default: `trainer`
    pub sender_id: String,

    /// Health probe cadence.
    /// Env: `SPOTTER_HEALTH_INTERVAL_SECS`, `SPOTTER_PROBE_TIMEOUT_SECS`
    pub health: HealthPolicy,

    /// Bound on a single persistence attempt.
    /// Env: `SPOTTER_SEND_TIMEOUT_SECS`
    /// Default: 30 s
    pub send_timeout: Duration,

    /// SQLite file mirroring the offline queue.  `None` keeps the queue in
    /// memory only.
    /// Env: `SPOTTER_QUEUE_JOURNAL`
    pub queue_journal: Option<PathBuf>,

    /// Synthesize a delivery ack this long after a message is sent.
    /// Env: `SPOTTER_SIMULATED_DELIVERY_MS`
    /// Default: off
    pub simulated_delivery: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            sender_id: "trainer".to_string(),
            health: HealthPolicy::default(),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            queue_journal: None,
            simulated_delivery: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup, falling back to
    /// defaults for missing or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("SPOTTER_API_URL") {
            if url.trim().is_empty() {
                tracing::warn!("Empty SPOTTER_API_URL, using default");
            } else {
                config.api_base_url = url.trim().to_string();
            }
        }

        if let Some(id) = lookup("SPOTTER_SENDER_ID") {
            if !id.trim().is_empty() {
                config.sender_id = id.trim().to_string();
            }
        }

        if let Some(secs) = parse_secs(&lookup, "SPOTTER_HEALTH_INTERVAL_SECS") {
            config.health.interval = secs;
            if config.health.max_interval < secs {
                config.health.max_interval = secs;
            }
        }

        if let Some(secs) = parse_secs(&lookup, "SPOTTER_PROBE_TIMEOUT_SECS") {
            config.health.probe_timeout = secs;
        }

        if let Some(secs) = parse_secs(&lookup, "SPOTTER_SEND_TIMEOUT_SECS") {
            config.send_timeout = secs;
        }

        if let Some(path) = lookup("SPOTTER_QUEUE_JOURNAL") {
            if !path.is_empty() {
                config.queue_journal = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("SPOTTER_SIMULATED_DELIVERY_MS") {
            match val.parse::<u64>() {
                Ok(0) => config.simulated_delivery = None,
                Ok(ms) => config.simulated_delivery = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid SPOTTER_SIMULATED_DELIVERY_MS, delivery simulation stays off"
                ),
            }
        }

        config
    }
}

/// A positive number of seconds, or `None` (with a warning when malformed).
fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(Duration::from_secs(n)),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            None
        }
    }
}
