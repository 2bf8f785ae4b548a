//! Playback tuning knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlaybackError;
use crate::prefetch::BufferLimits;

/// Engine configuration. Every field has a default, so a JSON file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Samples scanned per indexing batch.
    pub index_batch: usize,
    /// Frames per stream indexed when the header leaves the capture mode open.
    pub validation_frames: usize,
    /// With no image stream active, motion samples buffered before pacing.
    pub motion_prefetch_threshold: usize,
    /// Decoded samples held ahead of delivery at most.
    pub max_prefetch_depth: usize,
    pub realtime: bool,
    /// Samples due within this many microseconds are delivered without sleeping.
    pub due_slack_us: u64,
    /// Upper bound on one pacing sleep.
    pub max_sleep_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            index_batch: 32,
            validation_frames: 10,
            motion_prefetch_threshold: 4,
            max_prefetch_depth: 16,
            realtime: true,
            due_slack_us: 1_000,
            max_sleep_ms: 10,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json(json: &str) -> Result<Self, PlaybackError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlaybackError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PlaybackError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms.max(1))
    }

    pub(crate) fn batch(&self) -> usize {
        self.index_batch.max(1)
    }

    pub(crate) fn limits(&self) -> BufferLimits {
        BufferLimits {
            motion_threshold: self.motion_prefetch_threshold,
            max_depth: self.max_prefetch_depth.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlaybackConfig::from_json(r#"{ "realtime": false, "index_batch": 8 }"#).unwrap();
        assert!(!config.realtime);
        assert_eq!(config.index_batch, 8);
        assert_eq!(config.validation_frames, 10);
        assert_eq!(config.max_prefetch_depth, 16);
        assert_eq!(config.max_sleep(), Duration::from_millis(10));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            PlaybackConfig::from_json("{ realtime: "),
            Err(PlaybackError::Config(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{ "due_slack_us": 250 }"#).unwrap();
        let config = PlaybackConfig::load(file.path()).unwrap();
        assert_eq!(config.due_slack_us, 250);
        assert!(PlaybackConfig::load("/nonexistent/playback.json").is_err());
    }
}
