use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

/// Static description of one elementary stream, as opened by the demuxer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    index: i32,
    media_type: MediaType,
    /// Frame rate as `num/den`, video only.
    rate: (u32, u32),
    /// Hz, audio only.
    sample_rate: u32,
}

impl StreamInfo {
    pub fn video(index: i32, rate_num: u32, rate_den: u32) -> Self {
        Self {
            index,
            media_type: MediaType::Video,
            rate: (rate_num, rate_den),
            sample_rate: 0,
        }
    }

    pub fn audio(index: i32, sample_rate: u32) -> Self {
        Self {
            index,
            media_type: MediaType::Audio,
            rate: (0, 1),
            sample_rate,
        }
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    pub fn rate(&self) -> (u32, u32) {
        self.rate
    }

    pub fn fps(&self) -> f32 {
        if self.rate.1 == 0 {
            return 0.0;
        }
        self.rate.0 as f32 / self.rate.1 as f32
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Codec-independent duration guess for a frame the engine gave no
    /// duration for. Never below 1ms.
    pub fn estimate_duration_ms(&self, sample_count: u32) -> i64 {
        let estimate = match self.media_type {
            MediaType::Video => {
                let (num, den) = self.rate;
                if num == 0 {
                    0
                } else {
                    1000 * den as i64 / num as i64
                }
            }
            MediaType::Audio => {
                if self.sample_rate == 0 {
                    0
                } else {
                    sample_count as i64 * 1000 / self.sample_rate as i64
                }
            }
        };
        estimate.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_duration_from_frame_rate() {
        assert_eq!(StreamInfo::video(0, 25, 1).estimate_duration_ms(0), 40);
        assert_eq!(StreamInfo::video(0, 30000, 1001).estimate_duration_ms(0), 33);
    }

    #[test]
    fn test_audio_duration_from_samples() {
        let audio = StreamInfo::audio(1, 48000);
        assert_eq!(audio.estimate_duration_ms(1024), 21);
        assert_eq!(audio.estimate_duration_ms(48000), 1000);
    }

    #[test]
    fn test_duration_never_below_one() {
        assert_eq!(StreamInfo::video(0, 0, 1).estimate_duration_ms(0), 1);
        assert_eq!(StreamInfo::audio(1, 48000).estimate_duration_ms(0), 1);
        assert_eq!(StreamInfo::audio(1, 0).estimate_duration_ms(1024), 1);
        assert_eq!(StreamInfo::video(0, 5000, 1).estimate_duration_ms(0), 1);
    }
}
