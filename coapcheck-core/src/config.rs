use crate::error::{CoapCheckError, Result};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory where text reports are written; stdout when unset
    pub report_dir: Option<Utf8PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Check request URIs against the paths expected by each testcase
    #[serde(default)]
    pub urifilter: bool,
    #[serde(default)]
    pub profile: Profile,
    /// Case-insensitive substring a testcase name must contain to be selected
    pub testcase_filter: Option<String>,
    /// Include per-test traces in the report
    #[serde(default = "default_true")]
    pub verbose: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            urifilter: false,
            profile: Profile::default(),
            testcase_filter: None,
            verbose: true,
        }
    }
}

/// Which side of the exchange the implementation under test plays
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Client,
    ReverseProxy,
}

/// CoAP transmission parameters (RFC 7252 section 4.8)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: f64,
    #[serde(default = "default_ack_random_factor")]
    pub ack_random_factor: f64,
    #[serde(default = "default_max_retransmit")]
    pub max_retransmit: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ack_timeout: default_ack_timeout(),
            ack_random_factor: default_ack_random_factor(),
            max_retransmit: default_max_retransmit(),
        }
    }
}

impl TimingConfig {
    /// MAX_EXCHANGE_LIFETIME in seconds: 58 with the default parameters
    pub fn max_exchange_lifetime(&self) -> f64 {
        let backoff = self.ack_timeout
            * self.ack_random_factor
            * 2f64.powi(self.max_retransmit.min(31) as i32);
        10.0 + backoff.round()
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

const fn default_ack_timeout() -> f64 {
    2.0
}

const fn default_ack_random_factor() -> f64 {
    1.5
}

const fn default_max_retransmit() -> u32 {
    4
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::find_config_file()?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoapCheckError::Config(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| CoapCheckError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::debug!("Using default configuration: {}", e);
            Self::default()
        })
    }

    fn find_config_file() -> Result<PathBuf> {
        let candidates = [
            dirs::config_dir().map(|p| p.join("coapcheck/coapcheck.toml")),
            Some(PathBuf::from("/etc/coapcheck/coapcheck.toml")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(CoapCheckError::Config("Config file not found".to_owned()))
    }

    fn expand_paths(&mut self) {
        fn expand_tilde(path: &Utf8PathBuf) -> Utf8PathBuf {
            let path_str = path.as_str();
            if path_str.starts_with("~/") {
                if let Some(home) = dirs::home_dir() {
                    if let Some(home_str) = home.to_str() {
                        return Utf8PathBuf::from(path_str.replacen("~", home_str, 1));
                    }
                }
            }
            path.clone()
        }

        if let Some(dir) = &self.general.report_dir {
            self.general.report_dir = Some(expand_tilde(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if !(timing.ack_timeout.is_finite() && timing.ack_timeout > 0.0) {
            return Err(CoapCheckError::Config(format!(
                "ack_timeout must be positive, got {}",
                timing.ack_timeout
            )));
        }
        if !(timing.ack_random_factor.is_finite() && timing.ack_random_factor >= 1.0) {
            return Err(CoapCheckError::Config(format!(
                "ack_random_factor must be at least 1.0, got {}",
                timing.ack_random_factor
            )));
        }
        if timing.max_retransmit == 0 || timing.max_retransmit > 20 {
            return Err(CoapCheckError::Config(format!(
                "max_retransmit must be between 1 and 20, got {}",
                timing.max_retransmit
            )));
        }
        if let Some(filter) = &self.analysis.testcase_filter {
            if filter.trim().is_empty() {
                return Err(CoapCheckError::Config(
                    "testcase_filter must not be empty".to_owned(),
                ));
            }
        }
        Ok(())
    }
}
