use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use decode_bus::stats::StatsSnapshot;
use decode_bus::synthetic::SyntheticEngine;
use decode_bus::{DecoderPhase, MediaType, PipelineController, StreamDecoder};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

/// What a consumer has taken from one stream so far.
#[derive(Debug)]
struct Consumed {
    frames: AtomicU64,
    last_timestamp_ms: AtomicI64,
}

impl Default for Consumed {
    fn default() -> Self {
        Self {
            frames: AtomicU64::new(0),
            last_timestamp_ms: AtomicI64::new(-1),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub stream_index: i32,
    pub media_type: MediaType,
    pub phase: DecoderPhase,
    pub queued_packets: usize,
    pub queued_frames: usize,
    pub consumed_frames: u64,
    pub last_timestamp_ms: Option<i64>,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub running: bool,
    pub completed: bool,
    pub generation: u64,
    pub streams: Vec<StreamStatus>,
}

/// A decode session on the synthetic source plus one consumer task per
/// stream that pulls frames as a renderer would.
pub struct Session {
    controller: PipelineController,
    engine: Arc<SyntheticEngine>,
    consumed: BTreeMap<i32, Arc<Consumed>>,
    consumer_delay: Duration,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let engine = config.source.build_engine();
        let controller =
            PipelineController::new(engine.clone(), engine.streams(), config.pipeline.clone())?;
        let consumed = controller
            .decoders()
            .iter()
            .map(|d| (d.stream_index(), Arc::new(Consumed::default())))
            .collect();

        Ok(Self {
            controller,
            engine,
            consumed,
            consumer_delay: Duration::from_millis(config.consumer_delay_ms),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts decoding. Consumers and the event logger are spawned on the
    /// first start and live until `shutdown`.
    pub fn start(&self) -> anyhow::Result<()> {
        self.controller.start_decode()?;

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return Ok(());
        }
        for decoder in self.controller.decoders() {
            let Some(consumed) = self.consumed.get(&decoder.stream_index()) else {
                continue;
            };
            tasks.push(tokio::spawn(consume_frames(
                decoder,
                Arc::clone(consumed),
                self.consumer_delay,
                self.cancel.child_token(),
            )));
        }
        tasks.push(tokio::spawn(log_events(
            self.controller.event_stream(),
            self.cancel.child_token(),
        )));
        Ok(())
    }

    pub async fn stop(&self) {
        self.controller.stop_decode().await;
    }

    pub fn seek(&self, target_ms: i64) -> anyhow::Result<()> {
        self.controller.seek_decoder(target_ms)
    }

    pub fn status(&self) -> SessionStatus {
        let streams = self
            .controller
            .decoders()
            .iter()
            .map(|decoder| {
                let consumed = self.consumed.get(&decoder.stream_index());
                StreamStatus {
                    stream_index: decoder.stream_index(),
                    media_type: decoder.media_type(),
                    phase: decoder.phase(),
                    queued_packets: decoder.queued_packets(),
                    queued_frames: decoder.queued_frames(),
                    consumed_frames: consumed.map_or(0, |c| c.frames.load(Ordering::Relaxed)),
                    last_timestamp_ms: consumed
                        .map(|c| c.last_timestamp_ms.load(Ordering::Relaxed))
                        .filter(|ts| *ts >= 0),
                    stats: decoder.stats(),
                }
            })
            .collect();

        SessionStatus {
            running: self.controller.is_running(),
            completed: self.controller.completed(),
            generation: self.controller.generation(),
            streams,
        }
    }

    /// Disposes the decode session and joins the consumers.
    pub async fn shutdown(&self) {
        self.controller.dispose().await;
        self.cancel.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        let counters = self.engine.counters();
        log::info!(
            "session shut down: {} packets / {} frames rented, {} / {} outstanding",
            counters.packets_rented(),
            counters.frames_rented(),
            counters.packets_outstanding(),
            counters.frames_outstanding()
        );
    }
}

async fn consume_frames(
    decoder: Arc<StreamDecoder>,
    consumed: Arc<Consumed>,
    delay: Duration,
    cancel: CancellationToken,
) {
    let stream_index = decoder.stream_index();
    let mut frames = Box::pin(decoder.frame_stream(cancel.clone()));

    while let Some(frame) = frames.next().await {
        consumed.frames.fetch_add(1, Ordering::Relaxed);
        consumed
            .last_timestamp_ms
            .store(frame.timestamp_ms(), Ordering::Relaxed);
        log::trace!("consumer {}: {}", stream_index, frame);

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    log::debug!("consumer {} finished", stream_index);
}

async fn log_events(mut events: decode_bus::event::EventStream, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            Some(Ok(event)) => match serde_json::to_string(&event) {
                Ok(json) => log::debug!("pipeline event: {}", json),
                Err(e) => log::warn!("serialize event: {}", e),
            },
            Some(Err(e)) => log::warn!("event stream: {}", e),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn small_config() -> AppConfig {
        AppConfig {
            source: SourceConfig {
                video_frames: 10,
                audio_frames: 20,
                audio_sample_rate: 1000,
                audio_samples_per_frame: 20,
                ..Default::default()
            },
            consumer_delay_ms: 0,
            ..Default::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn consumed_all(session: &Session, video: u64, audio: u64) -> bool {
        let status = session.status();
        status.streams.len() == 2
            && status.streams[0].consumed_frames == video
            && status.streams[1].consumed_frames == audio
    }

    #[tokio::test]
    async fn test_session_consumes_every_frame() -> anyhow::Result<()> {
        let session = Session::new(&small_config())?;
        session.start()?;

        wait_until(|| consumed_all(&session, 10, 20)).await;
        wait_until(|| session.status().completed).await;
        let status = session.status();
        assert!(status.running);
        assert_eq!(status.streams[0].last_timestamp_ms, Some(360));
        assert_eq!(status.streams[1].stats.frames_emitted, 20);

        session.shutdown().await;
        assert!(!session.status().running);
        assert_eq!(session.engine.counters().packets_outstanding(), 0);
        assert_eq!(session.engine.counters().frames_outstanding(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_seek_replays_from_target() -> anyhow::Result<()> {
        let session = Session::new(&small_config())?;
        session.start()?;
        wait_until(|| consumed_all(&session, 10, 20)).await;

        session.seek(200)?;
        assert_eq!(session.status().generation, 1);
        // video frames 5..10 and audio frames 10..20 are played again
        wait_until(|| consumed_all(&session, 15, 30)).await;

        session.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_after_stop() -> anyhow::Result<()> {
        let session = Session::new(&small_config())?;
        session.start()?;
        session.stop().await;
        assert!(!session.status().running);

        session.seek(0)?;
        session.start()?;
        assert!(session.status().running);
        wait_until(|| session.status().completed).await;

        session.shutdown().await;
        Ok(())
    }
}
