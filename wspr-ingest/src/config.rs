//! Fleet configuration.
//!
//! The configuration document is YAML on disk. A loaded [`FleetConfig`]
//! is treated as an immutable snapshot: reloads build a new snapshot and
//! hand it to the coordinator, which diffs it against the previous one.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder returned instead of secrets by [`FleetConfig::redacted`].
pub const REDACTED: &str = "***";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("publisher is enabled but no host is configured")]
    PublisherHostMissing,

    #[error("publisher is enabled but port is 0")]
    PublisherPortMissing,

    #[error("publisher is enabled but topic_prefix is empty")]
    PublisherTopicPrefixMissing,

    #[error("publisher qos must be 0, 1 or 2 (got {0})")]
    InvalidQos(u8),

    #[error("at least one receiver is required")]
    NoReceivers,

    #[error("receiver name '{0}' is used more than once")]
    DuplicateReceiver(String),

    #[error("band name '{0}' is used more than once")]
    DuplicateBand(String),

    #[error("band '{band}' refers to unknown receiver '{receiver}'")]
    UnknownReceiver { band: String, receiver: String },

    #[error("band '{0}' has a non-positive frequency")]
    InvalidFrequency(String),

    #[error("bands '{first}' and '{second}' would share work directory '{unique_id}'")]
    SharedWorkDir {
        first: String,
        second: String,
        unique_id: String,
    },

    #[error("decoder.decoder_path is required")]
    DecoderPathMissing,

    #[error("decoder binary not found: {0}")]
    DecoderNotFound(PathBuf),

    #[error("decoder binary is not executable: {0}")]
    DecoderNotExecutable(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_publisher_port")]
    pub port: u16,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default)]
    pub qos: u8,

    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,

    pub host: String,

    #[serde(default = "default_receiver_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replaces the publisher's topic prefix for spots from this receiver
    #[serde(default)]
    pub topic_prefix_override: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub name: String,

    #[serde(alias = "frequency_kHz")]
    pub frequency_khz: f64,

    pub receiver_name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub decoder_path: PathBuf,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub keep_audio: bool,

    #[serde(default = "default_true")]
    pub compression: bool,

    #[serde(default = "default_recorder_path")]
    pub recorder_path: PathBuf,

    #[serde(default = "default_resampler_path")]
    pub resampler_path: PathBuf,

    #[serde(default = "default_cty_path")]
    pub cty_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,

    #[serde(default)]
    pub bands: Vec<BandConfig>,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A band that should have a running job, paired with its receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBand {
    pub band: BandConfig,
    pub receiver: ReceiverConfig,
    /// Position among the active bands of the same receiver
    pub receiver_index: usize,
}

fn default_true() -> bool {
    true
}

fn default_publisher_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "wspr".to_string()
}

fn default_receiver_port() -> u16 {
    8073
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("wspr_work")
}

fn default_recorder_path() -> PathBuf {
    PathBuf::from("kiwirecorder.py")
}

fn default_resampler_path() -> PathBuf {
    PathBuf::from("sox")
}

fn default_cty_path() -> PathBuf {
    PathBuf::from("cty.dat")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_publisher_port(),
            use_tls: false,
            username: String::new(),
            password: String::new(),
            topic_prefix: default_topic_prefix(),
            qos: 0,
            retain: false,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            decoder_path: PathBuf::new(),
            work_dir: default_work_dir(),
            keep_audio: false,
            compression: true,
            recorder_path: default_recorder_path(),
            resampler_path: default_resampler_path(),
            cty_path: default_cty_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            quiet: false,
        }
    }
}

impl BandConfig {
    /// `<receiver>_<floor(kHz)>`, also the name of the job's work directory.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.receiver_name, self.frequency_khz.floor() as u64)
    }

    /// Whether a running job for `self` must be restarted to serve `other`.
    pub fn needs_restart(&self, other: &BandConfig) -> bool {
        self.frequency_khz != other.frequency_khz || self.receiver_name != other.receiver_name
    }
}

impl FleetConfig {
    /// Read and parse a configuration file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the document next to `path` and rename it into place.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, self.to_yaml()?)
            .with_context(|| format!("Failed to write '{}'", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace '{}'", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let publisher = &self.publisher;
        if publisher.enabled {
            if publisher.host.trim().is_empty() {
                return Err(ConfigError::PublisherHostMissing);
            }
            if publisher.port == 0 {
                return Err(ConfigError::PublisherPortMissing);
            }
            if publisher.topic_prefix.trim().is_empty() {
                return Err(ConfigError::PublisherTopicPrefixMissing);
            }
        }
        if publisher.qos > 2 {
            return Err(ConfigError::InvalidQos(publisher.qos));
        }

        if self.receivers.is_empty() {
            return Err(ConfigError::NoReceivers);
        }

        let mut receiver_names = HashSet::new();
        for receiver in &self.receivers {
            if !receiver_names.insert(receiver.name.as_str()) {
                return Err(ConfigError::DuplicateReceiver(receiver.name.clone()));
            }
        }

        let mut band_names = HashSet::new();
        let mut work_dirs: HashMap<String, &str> = HashMap::new();
        for band in &self.bands {
            if !band_names.insert(band.name.as_str()) {
                return Err(ConfigError::DuplicateBand(band.name.clone()));
            }
            if !band.enabled {
                continue;
            }
            if !receiver_names.contains(band.receiver_name.as_str()) {
                return Err(ConfigError::UnknownReceiver {
                    band: band.name.clone(),
                    receiver: band.receiver_name.clone(),
                });
            }
            if !(band.frequency_khz.is_finite() && band.frequency_khz > 0.0) {
                return Err(ConfigError::InvalidFrequency(band.name.clone()));
            }
            let unique_id = band.unique_id();
            if let Some(first) = work_dirs.insert(unique_id.clone(), band.name.as_str()) {
                return Err(ConfigError::SharedWorkDir {
                    first: first.to_string(),
                    second: band.name.clone(),
                    unique_id,
                });
            }
        }

        validate_decoder_binary(&self.decoder.decoder_path)
    }

    pub fn receiver(&self, name: &str) -> Option<&ReceiverConfig> {
        self.receivers.iter().find(|r| r.name == name)
    }

    /// Enabled bands on enabled receivers, in config order.
    pub fn active_bands(&self) -> Vec<ActiveBand> {
        let mut per_receiver: HashMap<&str, usize> = Default::default();

        self.bands
            .iter()
            .filter(|band| band.enabled)
            .filter_map(|band| {
                let receiver = self.receiver(&band.receiver_name)?;
                if !receiver.enabled {
                    return None;
                }
                let index = per_receiver.entry(receiver.name.as_str()).or_insert(0);
                let receiver_index = *index;
                *index += 1;

                Some(ActiveBand {
                    band: band.clone(),
                    receiver: receiver.clone(),
                    receiver_index,
                })
            })
            .collect()
    }

    /// Copy with every password replaced by [`REDACTED`].
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.publisher.password.is_empty() {
            copy.publisher.password = REDACTED.to_string();
        }
        for receiver in &mut copy.receivers {
            if !receiver.password.is_empty() {
                receiver.password = REDACTED.to_string();
            }
        }
        copy
    }

    /// Put back secrets that a client echoed as [`REDACTED`].
    pub fn restore_secrets(&mut self, current: &FleetConfig) {
        if self.publisher.password == REDACTED {
            self.publisher.password = current.publisher.password.clone();
        }
        for receiver in &mut self.receivers {
            if receiver.password == REDACTED {
                receiver.password = current
                    .receiver(&receiver.name)
                    .map(|r| r.password.clone())
                    .unwrap_or_default();
            }
        }
    }
}

fn validate_decoder_binary(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::DecoderPathMissing);
    }

    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::DecoderNotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(ConfigError::DecoderNotFound(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ConfigError::DecoderNotExecutable(path.to_path_buf()));
        }
    }

    Ok(())
}
