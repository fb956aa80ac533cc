use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::stream::MediaType;

/// Queue sizes and retry policy for one decode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Packets buffered per stream between demux and decode.
    pub packet_queue_capacity: usize,
    /// Decoded video frames buffered per video stream.
    pub video_frame_queue_capacity: usize,
    /// Decoded audio frames buffered per audio stream.
    pub audio_frame_queue_capacity: usize,
    /// Diagnostic events buffered for slow subscribers.
    pub event_capacity: usize,
    pub read_retry_delay_ms: u64,
    /// Consecutive container read errors before the source is treated as ended.
    pub max_consecutive_read_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 64,
            video_frame_queue_capacity: 8,
            audio_frame_queue_capacity: 32,
            event_capacity: 256,
            read_retry_delay_ms: 5,
            max_consecutive_read_errors: 32,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let capacities = [
            ("packet_queue_capacity", self.packet_queue_capacity),
            ("video_frame_queue_capacity", self.video_frame_queue_capacity),
            ("audio_frame_queue_capacity", self.audio_frame_queue_capacity),
            ("event_capacity", self.event_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(PipelineError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn frame_queue_capacity(&self, media_type: MediaType) -> usize {
        match media_type {
            MediaType::Video => self.video_frame_queue_capacity,
            MediaType::Audio => self.audio_frame_queue_capacity,
        }
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(r#"{ "packet_queue_capacity": 16 }"#).unwrap();
        assert_eq!(config.packet_queue_capacity, 16);
        assert_eq!(config.video_frame_queue_capacity, 8);
        assert_eq!(config.frame_queue_capacity(MediaType::Audio), 32);
        assert_eq!(config.read_retry_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "video_frame_queue_capacity": 0 }"#)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::InvalidConfig(
                "video_frame_queue_capacity must be > 0".to_string()
            ))
        );
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(PipelineConfig::from_json_str("{ not json").is_err());
    }
}
