use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-decoder counters, updated by the decode worker and the consumer side.
#[derive(Debug, Default)]
pub struct DecoderStats {
    packets_received: AtomicU64,
    packets_decoded: AtomicU64,
    packets_discarded: AtomicU64,
    frames_emitted: AtomicU64,
    frames_discarded: AtomicU64,
    codec_errors: AtomicU64,
    flushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_decoded: u64,
    pub packets_discarded: u64,
    pub frames_emitted: u64,
    pub frames_discarded: u64,
    pub codec_errors: u64,
    pub flushes: u64,
}

impl DecoderStats {
    pub(crate) fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_decoded(&self) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packets_discarded(&self, count: usize) {
        self.packets_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame_emitted(&self) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frames_discarded(&self, count: usize) {
        self.frames_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn codec_error(&self) {
        self.codec_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flushed(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            packets_discarded: self.packets_discarded.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            codec_errors: self.codec_errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}
