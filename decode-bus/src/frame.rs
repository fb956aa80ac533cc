use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::stream::MediaType;

/// A decoded, converted unit with a repaired timestamp. Holds no native
/// resources; dropping it releases the payload.
#[derive(Debug, Clone)]
pub struct Frame {
    generation: u64,
    stream_index: i32,
    media_type: MediaType,
    payload: Bytes,
    timestamp_ms: i64,
    duration_ms: i64,
}

impl Frame {
    pub fn new(
        generation: u64,
        stream_index: i32,
        media_type: MediaType,
        payload: Bytes,
        timestamp_ms: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            generation,
            stream_index,
            media_type,
            payload,
            timestamp_ms,
            duration_ms,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stream_index(&self) -> i32 {
        self.stream_index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame stream: {}, type: {:?}, generation: {}, ts: {}ms, duration: {}ms, payload_len: {}",
            self.stream_index,
            self.media_type,
            self.generation,
            self.timestamp_ms,
            self.duration_ms,
            self.payload.len()
        )
    }
}
