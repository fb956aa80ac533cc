use std::path::Path;
use std::sync::{Arc, LazyLock};

use decode_bus::PipelineConfig;
use decode_bus::synthetic::SyntheticEngine;
use serde::{Deserialize, Serialize};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "DECODE_PIPE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_addr: String,
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    /// Pause after every consumed frame, simulating a slow renderer.
    pub consumer_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_addr: "0.0.0.0:8080".to_string(),
            pipeline: PipelineConfig::default(),
            source: SourceConfig::default(),
            consumer_delay_ms: 10,
        }
    }
}

/// Shape of the synthetic source the demo decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub video_fps: u32,
    pub video_frames: usize,
    pub audio_sample_rate: u32,
    pub audio_samples_per_frame: u32,
    /// 0 disables the audio stream.
    pub audio_frames: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            video_fps: 25,
            video_frames: 250,
            audio_sample_rate: 48000,
            audio_samples_per_frame: 1024,
            audio_frames: 469,
        }
    }
}

impl SourceConfig {
    pub fn build_engine(&self) -> Arc<SyntheticEngine> {
        let mut builder = SyntheticEngine::builder().video(0, self.video_fps, self.video_frames);
        if self.audio_frames > 0 {
            builder = builder.audio(
                1,
                self.audio_sample_rate,
                self.audio_samples_per_frame,
                self.audio_frames,
            );
        }
        builder.build()
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.pipeline.validate()?;
        if config.source.video_fps == 0 {
            anyhow::bail!("source.video_fps must be > 0");
        }
        Ok(config)
    }

    /// Reads the file named by `DECODE_PIPE_CONFIG`, defaults when unset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| {
        AppConfig::from_env().unwrap_or_else(|e| {
            eprintln!("Error loading config: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json_str(
            r#"{"api_addr": "127.0.0.1:9000", "pipeline": {"video_frame_queue_capacity": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.api_addr, "127.0.0.1:9000");
        assert_eq!(config.pipeline.video_frame_queue_capacity, 2);
        assert_eq!(config.pipeline.packet_queue_capacity, 64);
        assert_eq!(config.source.video_fps, 25);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_json_str(r#"{"pipeline": {"packet_queue_capacity": 0}}"#).is_err());
        assert!(AppConfig::from_json_str(r#"{"source": {"video_fps": 0}}"#).is_err());
        assert!(AppConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_source_without_audio() {
        let source = SourceConfig {
            audio_frames: 0,
            video_frames: 3,
            ..Default::default()
        };
        let engine = source.build_engine();
        assert_eq!(engine.streams().len(), 1);
        assert_eq!(engine.total_packets(), 3);
    }
}
