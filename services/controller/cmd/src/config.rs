//! Configuration handling for the controller.
//!
//! Values come from an optional YAML file, then `OFC_*` environment
//! variables, then command line flags (applied in `main`). Durations use
//! humantime syntax (`5s`, `1500ms`) everywhere.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ofc_session::{SessionConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address to accept switch connections on
    pub listen_address: IpAddr,
    /// Port to accept switch connections on
    pub listen_port: u16,
    /// Interval between keepalive probes
    #[serde(with = "humantime_str")]
    pub echo_interval: Duration,
    /// Interval between feature request retries
    #[serde(with = "humantime_str")]
    pub features_retry_interval: Duration,
    /// Silence after which a switch is dropped
    #[serde(with = "humantime_str")]
    pub keepalive_timeout: Duration,
    /// Interval between liveness checks
    #[serde(with = "humantime_str")]
    pub keepalive_check_interval: Duration,
    /// Decoded messages buffered per connection
    pub inbound_queue: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_PORT,
            echo_interval: session.echo_interval,
            features_retry_interval: session.features_retry_interval,
            keepalive_timeout: session.keepalive_timeout,
            keepalive_check_interval: session.keepalive_check_interval,
            inbound_queue: session.inbound_queue,
        }
    }
}

mod humantime_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl ControllerConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file means defaults; a file that does not parse is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = serde_yaml::from_str::<Self>(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file {:?}", path))
            }
        };

        config.apply_environment_overrides()?;
        Ok(config)
    }

    /// Apply `OFC_*` environment variable overrides
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("OFC_LISTEN_ADDRESS") {
            self.listen_address = value
                .parse()
                .with_context(|| format!("invalid OFC_LISTEN_ADDRESS: {}", value))?;
            info!("Listen address overridden by environment: {}", self.listen_address);
        }

        if let Some(value) = lookup("OFC_LISTEN_PORT") {
            self.listen_port = value
                .parse()
                .with_context(|| format!("invalid OFC_LISTEN_PORT: {}", value))?;
            info!("Listen port overridden by environment: {}", self.listen_port);
        }

        let durations = [
            ("OFC_ECHO_INTERVAL", &mut self.echo_interval),
            ("OFC_FEATURES_RETRY_INTERVAL", &mut self.features_retry_interval),
            ("OFC_KEEPALIVE_TIMEOUT", &mut self.keepalive_timeout),
            ("OFC_KEEPALIVE_CHECK_INTERVAL", &mut self.keepalive_check_interval),
        ];
        for (key, slot) in durations {
            if let Some(value) = lookup(key) {
                *slot = humantime::parse_duration(&value)
                    .with_context(|| format!("invalid {}: {}", key, value))?;
                info!("{} overridden by environment: {:?}", key, slot);
            }
        }

        Ok(())
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("echo_interval", self.echo_interval),
            ("features_retry_interval", self.features_retry_interval),
            ("keepalive_timeout", self.keepalive_timeout),
            ("keepalive_check_interval", self.keepalive_check_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.inbound_queue == 0 {
            bail!("inbound_queue must be greater than zero");
        }
        if self.keepalive_timeout < self.echo_interval {
            warn!(
                "keepalive_timeout ({:?}) is shorter than echo_interval ({:?}); healthy switches may be dropped",
                self.keepalive_timeout, self.echo_interval
            );
        }
        Ok(())
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    /// Per-session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            echo_interval: self.echo_interval,
            features_retry_interval: self.features_retry_interval,
            keepalive_timeout: self.keepalive_timeout,
            keepalive_check_interval: self.keepalive_check_interval,
            inbound_queue: self.inbound_queue,
        }
    }
}
