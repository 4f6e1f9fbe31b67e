use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RecorderError;
use crate::source::parse_source_address;
use crate::types::TransportMode;

/// Top-level recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Upstream transport settings
    pub source: SourceConfig,

    /// Segment boundary and output settings
    pub recording: RecordingConfig,

    /// Event loop settings
    pub session: SessionConfig,

    /// Simulated stream source settings
    pub simulation: SimulationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Stream source address (rtsp://[user[:pass]@]host[:port]/path)
    pub address: String,

    /// Credentials, overriding any embedded in the address
    pub username: Option<String>,
    pub password: Option<String>,

    /// Requested delivery mode; only reliable ordered delivery is accepted
    pub transport_mode: TransportMode,

    /// Media type prefix identifying the elementary stream to record
    pub expected_media_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Playback time per segment file
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub segment_interval: Duration,

    /// Overall recording ceiling; the session finishes once elapsed
    /// position reaches it
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub recording_ceiling: Duration,

    /// Directory receiving segment files
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bus polling period of the event loop
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub poll_period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Playback time covered by one emitted sample
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub pts_step: Duration,

    /// Wall-clock delay between emitted samples
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub pacing: Duration,

    /// Stop the source after this many samples (None: run until told)
    pub total_samples: Option<u64>,

    /// Inject a fatal transport failure before emitting this sample
    pub fail_after: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset
    pub level: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            recording: RecordingConfig::default(),
            session: SessionConfig::default(),
            simulation: SimulationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            address: "rtsp://127.0.0.1:8554/camera".to_string(),
            username: None,
            password: None,
            transport_mode: TransportMode::Tcp,
            expected_media_prefix: "application/x-rtp".to_string(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            segment_interval: Duration::from_secs(10),
            recording_ceiling: Duration::from_secs(30),
            output_dir: PathBuf::from("./recordings"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(100),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            // 25 samples per second of playback time, paced in real time
            pts_step: Duration::from_millis(40),
            pacing: Duration::from_millis(40),
            total_samples: None,
            fail_after: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self, RecorderError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| RecorderError::Configuration {
                    message: format!("failed to read config file {}: {}", path.display(), e),
                })?;

        let config: Self = toml::from_str(&content).map_err(|e| RecorderError::Configuration {
            message: format!("failed to parse config file {}: {}", path.display(), e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        parse_source_address(&self.source.address).map_err(|e| RecorderError::Configuration {
            message: e.to_string(),
        })?;

        if self.source.transport_mode != TransportMode::Tcp {
            return Err(RecorderError::Configuration {
                message: "transport mode must request reliable ordered delivery (tcp)".to_string(),
            });
        }

        if self.recording.segment_interval.is_zero() {
            return Err(RecorderError::Configuration {
                message: "segment interval must be greater than zero".to_string(),
            });
        }

        if self.recording.recording_ceiling < self.recording.segment_interval {
            return Err(RecorderError::Configuration {
                message: "recording ceiling must be at least one segment interval".to_string(),
            });
        }

        if self.session.poll_period.is_zero() {
            return Err(RecorderError::Configuration {
                message: "poll period must be greater than zero".to_string(),
            });
        }

        if self.simulation.pts_step.is_zero() || self.simulation.pacing.is_zero() {
            return Err(RecorderError::Configuration {
                message: "simulation pts step and pacing must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Apply environment variable overrides to a configuration.
pub fn apply_env_overrides(config: &mut RecorderConfig) {
    if let Ok(address) = env::var("SEGMENT_RECORDER_SOURCE") {
        config.source.address = address;
    }
    if let Ok(dir) = env::var("SEGMENT_RECORDER_OUTPUT_DIR") {
        config.recording.output_dir = PathBuf::from(dir);
    }
    if let Ok(secs) = env::var("SEGMENT_RECORDER_INTERVAL_SECS") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.recording.segment_interval = Duration::from_secs(secs);
        }
    }
    if let Ok(level) = env::var("SEGMENT_RECORDER_LOG_LEVEL") {
        config.logging.level = level;
    }
}
