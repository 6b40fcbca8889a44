//! # Configuration
//!
//! Loads the detector configuration from a TOML file. Follows a fail-safe
//! approach: a missing default file degrades to built-in defaults so the
//! controller still starts on a freshly flashed Pi, while a file that exists but
//! can't be parsed or fails validation is an error.
//!
//! Precedence, lowest to highest: defaults, file, `BACKEND_URL` environment
//! variable, command line flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detector::engine::EngineSettings;
use crate::detector::DetectorConfig;
use crate::reporting::DetectorIdentity;
use crate::sensor::{Channels, MAX_RANGE_CM};

const CONFIG_DIR: &str = ".config/motion-sentinel";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding `reporting_endpoint`
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub trig_channel: u8,
    pub echo_channel: u8,
    pub indicator_channel: u8,
    pub distance_threshold_cm: f64,
    pub release_timeout_seconds: f64,
    pub sample_period_seconds: f64,
    pub reporting_endpoint: String,
    pub report_timeout_seconds: f64,
    pub device_id: String,
    pub location: String,
    /// Skip GPIO entirely and use the simulated sensor
    pub simulate: bool,
    pub mqtt: Option<MqttSettings>,
}

impl Default for Config {
    fn default() -> Self {
        let channels = Channels::default();
        Self {
            trig_channel: channels.trigger,
            echo_channel: channels.echo,
            indicator_channel: channels.indicator,
            distance_threshold_cm: 30.0,
            release_timeout_seconds: 5.0,
            sample_period_seconds: 0.1,
            reporting_endpoint: "http://localhost:3001".to_string(),
            report_timeout_seconds: 5.0,
            device_id: "ultrasonic_sensor".to_string(),
            location: "entrada".to_string(),
            simulate: false,
            mqtt: None,
        }
    }
}

/// Broker connection for status publishing
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub status_topic: String,
    pub keep_alive_seconds: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "raspberry-pi-motion".to_string(),
            status_topic: "/motion/status".to_string(),
            keep_alive_seconds: 5,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path. The file must exist.
    pub async fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    /// Load from the default location, falling back to defaults if absent
    pub async fn load_default() -> Result<Self> {
        let path = default_config_path();

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;

        if exists {
            info!("Using config file {}", path.display());
            Self::load_from(&path).await
        } else {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Apply `BACKEND_URL` if set
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            self.apply_backend_url(url);
        }
    }

    fn apply_backend_url(&mut self, url: String) {
        if !url.trim().is_empty() {
            debug!("Reporting endpoint overridden by {}", BACKEND_URL_ENV);
            self.reporting_endpoint = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.distance_threshold_cm > 0.0 && self.distance_threshold_cm < MAX_RANGE_CM) {
            return Err(eyre!(
                "distance_threshold_cm must be between 0 and {}, got {}",
                MAX_RANGE_CM,
                self.distance_threshold_cm
            ));
        }
        for (name, value) in [
            ("release_timeout_seconds", self.release_timeout_seconds),
            ("sample_period_seconds", self.sample_period_seconds),
            ("report_timeout_seconds", self.report_timeout_seconds),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(eyre!("{} must be a positive number, got {}", name, value));
            }
            Duration::try_from_secs_f64(value)
                .map_err(|e| eyre!("{} is out of range ({}): {}", name, value, e))?;
        }

        let channels = self.channels();
        if channels.trigger == channels.echo
            || channels.trigger == channels.indicator
            || channels.echo == channels.indicator
        {
            return Err(eyre!(
                "trig_channel, echo_channel and indicator_channel must be distinct, got {:?}",
                channels
            ));
        }

        if self.reporting_endpoint.trim().is_empty() {
            return Err(eyre!("reporting_endpoint must not be empty"));
        }

        Ok(())
    }

    pub fn channels(&self) -> Channels {
        Channels {
            trigger: self.trig_channel,
            echo: self.echo_channel,
            indicator: self.indicator_channel,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            distance_threshold_cm: self.distance_threshold_cm,
            release_timeout: Duration::from_secs_f64(self.release_timeout_seconds),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            sample_period: Duration::from_secs_f64(self.sample_period_seconds),
            ..EngineSettings::default()
        }
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.report_timeout_seconds)
    }

    pub fn identity(&self) -> DetectorIdentity {
        DetectorIdentity {
            device: self.device_id.clone(),
            location: self.location.clone(),
            channels: self.channels(),
            threshold_cm: self.distance_threshold_cm,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.detector_config(), DetectorConfig::default());
        assert_eq!(
            config.engine_settings().sample_period,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml_str(
            r#"
            trig_channel = 5
            echo_channel = 6
            indicator_channel = 13
            distance_threshold_cm = 45.5
            release_timeout_seconds = 2.5
            sample_period_seconds = 0.05
            reporting_endpoint = "http://backend.local:3001"
            location = "garage"

            [mqtt]
            host = "broker.local"
            status_topic = "/garage/motion"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.channels(),
            Channels {
                trigger: 5,
                echo: 6,
                indicator: 13
            }
        );
        assert_eq!(
            config.detector_config().release_timeout,
            Duration::from_millis(2500)
        );
        assert_eq!(config.identity().location, "garage");

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.status_topic, "/garage/motion");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::from_toml_str("distance_threshold_cm = 0").is_err());
        assert!(Config::from_toml_str("distance_threshold_cm = 400").is_err());
        assert!(Config::from_toml_str("release_timeout_seconds = -1").is_err());
        assert!(Config::from_toml_str("sample_period_seconds = 0").is_err());
        assert!(Config::from_toml_str("release_timeout_seconds = 1e30").is_err());
        assert!(Config::from_toml_str("report_timeout_seconds = 1e20").is_err());
        assert!(Config::from_toml_str("echo_channel = 23").is_err());
        assert!(Config::from_toml_str("reporting_endpoint = \" \"").is_err());
        assert!(Config::from_toml_str("trig_channel = \"twenty\"").is_err());
    }

    #[test]
    fn backend_url_overrides_endpoint() {
        let mut config = Config::default();
        config.apply_backend_url("http://10.0.0.2:3001".to_string());
        assert_eq!(config.reporting_endpoint, "http://10.0.0.2:3001");

        config.apply_backend_url("   ".to_string());
        assert_eq!(config.reporting_endpoint, "http://10.0.0.2:3001");
    }

    #[test]
    fn large_but_representable_timeouts_are_usable() {
        let config = Config::from_toml_str("release_timeout_seconds = 86400").unwrap();
        assert_eq!(
            config.detector_config().release_timeout,
            Duration::from_secs(86_400)
        );
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("motion-sentinel-does-not-exist.toml");
        assert!(Config::load_from(&path).await.is_err());
    }
}
