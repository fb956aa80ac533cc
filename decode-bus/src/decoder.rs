use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    context::PipelineContext,
    engine::CodecStatus,
    error::{PipelineError, is_shutdown_error},
    event::PipelineEvent,
    frame::Frame,
    packet::{Packet, PacketCmd},
    pool::PooledFrame,
    queue::{BoundedQueue, PopError, PushError},
    stats::{DecoderStats, StatsSnapshot},
    stream::{MediaType, StreamInfo},
    timestamp::TimestampRepairer,
};

/// What the decode worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DecoderPhase {
    Idle = 0,
    Waiting = 1,
    Decoding = 2,
    Flushing = 3,
    Stopped = 4,
}

impl DecoderPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DecoderPhase::Waiting,
            2 => DecoderPhase::Decoding,
            3 => DecoderPhase::Flushing,
            4 => DecoderPhase::Stopped,
            _ => DecoderPhase::Idle,
        }
    }
}

/// Mutable decode state. Only the stream's own worker touches it while a
/// session runs; the controller may touch it while no worker exists.
#[derive(Debug, Default)]
struct DecodeState {
    generation: u64,
    timestamps: TimestampRepairer,
}

/// Decodes one elementary stream: packets in, generation-tagged frames out.
pub struct StreamDecoder {
    info: StreamInfo,
    context: Arc<PipelineContext>,
    packets_in: BoundedQueue<PacketCmd>,
    frames_out: BoundedQueue<Frame>,
    state: Mutex<DecodeState>,
    phase: AtomicU8,
    stats: DecoderStats,
}

impl StreamDecoder {
    pub fn new(info: StreamInfo, context: Arc<PipelineContext>) -> Self {
        let config = context.config();
        let packets_in = BoundedQueue::new(config.packet_queue_capacity);
        let frames_out = BoundedQueue::new(config.frame_queue_capacity(info.media_type()));
        let state = DecodeState {
            generation: context.generation(),
            timestamps: TimestampRepairer::new(),
        };

        Self {
            info,
            context,
            packets_in,
            frames_out,
            state: Mutex::new(state),
            phase: AtomicU8::new(DecoderPhase::Idle as u8),
            stats: DecoderStats::default(),
        }
    }

    pub fn stream_index(&self) -> i32 {
        self.info.index()
    }

    pub fn media_type(&self) -> MediaType {
        self.info.media_type()
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn phase(&self) -> DecoderPhase {
        DecoderPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: DecoderPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queued_packets(&self) -> usize {
        self.packets_in.len()
    }

    pub fn queued_frames(&self) -> usize {
        self.frames_out.len()
    }

    pub fn frame_capacity(&self) -> usize {
        self.frames_out.capacity()
    }

    /// Timestamp of the last frame produced since the latest flush.
    pub fn last_output_ms(&self) -> Option<i64> {
        self.lock_state().timestamps.last_output_ms()
    }

    fn lock_state(&self) -> MutexGuard<'_, DecodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Takes ownership of `packet`, suspending while the input queue is full.
    /// On cancellation or closure the packet is returned to the pool here.
    pub async fn enqueue_packet(
        &self,
        packet: Packet,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.enqueue_cmd(PacketCmd::Data(packet), cancel).await?;
        self.stats.packet_received();
        Ok(())
    }

    /// Queues the end-of-stream marker for `generation`.
    pub async fn enqueue_eof(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.enqueue_cmd(PacketCmd::Eof { generation }, cancel)
            .await
    }

    async fn enqueue_cmd(&self, cmd: PacketCmd, cancel: &CancellationToken) -> anyhow::Result<()> {
        match self.packets_in.push(cmd, cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = match &err {
                    PushError::Cancelled(_) => PipelineError::Cancelled,
                    _ => PipelineError::QueueClosed,
                };
                if let PacketCmd::Data(_) = err.into_inner() {
                    self.stats.packets_discarded(1);
                }
                Err(reason.into())
            }
        }
    }

    /// Pops the next frame of the current generation; stale frames met on
    /// the way are dropped.
    pub fn try_dequeue_frame(&self) -> Option<Frame> {
        loop {
            let frame = self.frames_out.try_pop()?;
            if frame.generation() == self.context.generation() {
                return Some(frame);
            }
            self.stats.frames_discarded(1);
        }
    }

    /// Returns a copy of the next current-generation frame without removing
    /// it. The queue sits behind a lock, so no reference can escape; the copy
    /// only bumps the payload's refcount. Use `peek_frame_with` to inspect
    /// in place.
    pub fn try_peek_frame(&self) -> Option<Frame> {
        self.peek_frame_with(Frame::clone)
    }

    /// Applies `f` to the next current-generation frame without removing it.
    /// `f` runs under the output queue lock.
    pub fn peek_frame_with<R>(&self, f: impl FnOnce(&Frame) -> R) -> Option<R> {
        let generation = self.context.generation();
        let stale = self
            .frames_out
            .pop_front_while(|frame| frame.generation() != generation);
        self.stats.frames_discarded(stale);
        self.frames_out.peek_with(f)
    }

    /// Waits for the next current-generation frame. `None` once the output
    /// queue is closed or `cancel` fires.
    pub async fn next_frame(&self, cancel: &CancellationToken) -> Option<Frame> {
        loop {
            let ready = self.frames_out.item_notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(frame) = self.try_dequeue_frame() {
                return Some(frame);
            }
            if self.frames_out.is_closed() || cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut ready => {}
            }
        }
    }

    /// Frames as a stream, ending when the decoder is disposed or `cancel`
    /// fires.
    pub fn frame_stream(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold((self, cancel), |(decoder, cancel)| async move {
            let frame = decoder.next_frame(&cancel).await?;
            Some((frame, (decoder, cancel)))
        })
    }

    /// Drops queued data not tagged with `generation`, resets timestamp
    /// repair and the engine's codec state for this stream.
    pub(crate) fn flush(&self, generation: u64) {
        let previous = self.phase();
        self.set_phase(DecoderPhase::Flushing);

        let packets = self
            .packets_in
            .retain(|cmd| cmd.generation() == generation);
        let frames = self
            .frames_out
            .retain(|frame| frame.generation() == generation);
        {
            let mut state = self.lock_state();
            state.generation = generation;
            state.timestamps.reset();
        }
        self.context.engine().flush_codec(self.stream_index());

        self.stats.packets_discarded(packets);
        self.stats.frames_discarded(frames);
        self.stats.flushed();
        log::debug!(
            "stream {} flushed to generation {}: dropped {} packets, {} frames",
            self.stream_index(),
            generation,
            packets,
            frames
        );
        self.context.emit(PipelineEvent::Flushed {
            stream_index: self.stream_index(),
            generation,
        });
        self.set_phase(previous);
    }

    /// Releases everything still queued. Called after the worker exited.
    pub(crate) fn drain_queues(&self) {
        let packets = self.packets_in.drain();
        let frames = self.frames_out.drain();
        self.stats.packets_discarded(packets.len());
        self.stats.frames_discarded(frames.len());
        if !packets.is_empty() || !frames.is_empty() {
            log::debug!(
                "stream {} drained {} packets, {} frames",
                self.stream_index(),
                packets.len(),
                frames.len()
            );
        }
    }

    pub(crate) fn close(&self) {
        self.packets_in.close();
        self.frames_out.close();
    }

    /// Flushes if the session generation moved; returns the current one.
    fn sync_generation(&self) -> u64 {
        let current = self.context.generation();
        if self.local_generation() != current {
            self.flush(current);
        }
        current
    }

    /// The decode worker. Runs until `cancel` fires or the input queue closes.
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        log::info!(
            "stream {} ({:?}) decode loop started",
            self.stream_index(),
            self.media_type()
        );

        loop {
            self.sync_generation();
            self.set_phase(DecoderPhase::Waiting);

            let cmd = match self.next_packet(&cancel).await {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(PopError::Cancelled) => break,
                Err(PopError::Closed) => {
                    log::debug!("stream {} input queue closed", self.stream_index());
                    break;
                }
            };

            let generation = self.sync_generation();
            if cmd.generation() != generation {
                log::trace!(
                    "stream {} discard stale packet of generation {}",
                    self.stream_index(),
                    cmd.generation()
                );
                self.stats.packets_discarded(1);
                continue;
            }

            self.set_phase(DecoderPhase::Decoding);
            let result = match cmd {
                PacketCmd::Data(packet) => self.decode_packet(packet, generation, &cancel).await,
                PacketCmd::Eof { .. } => self.decode_eof(generation, &cancel).await,
            };
            if let Err(e) = result {
                if is_shutdown_error(&e) {
                    break;
                }
                log::error!("stream {} decode error: {:#}", self.stream_index(), e);
            }
        }

        self.set_phase(DecoderPhase::Stopped);
        log::info!("stream {} decode loop exited", self.stream_index());
    }

    /// Next queued command; `Ok(None)` when a seek arrived while waiting.
    async fn next_packet(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<PacketCmd>, PopError> {
        let seek = self.context.seek_notified();
        tokio::pin!(seek);
        seek.as_mut().enable();

        if self.context.generation() != self.local_generation() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            result = self.packets_in.pop(cancel) => result.map(Some),
            _ = &mut seek => Ok(None),
        }
    }

    async fn decode_packet(
        &self,
        packet: Packet,
        generation: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let engine = self.context.engine();
        let index = self.stream_index();

        let mut status = engine.send_packet(index, packet.handle());
        if status == CodecStatus::TryAgain {
            // Codec input is full: drain, then resubmit once.
            self.drain_frames(generation, cancel).await?;
            if self.context.generation() != generation {
                return Ok(());
            }
            status = engine.send_packet(index, packet.handle());
        }

        match status {
            CodecStatus::Ok => self.stats.packet_decoded(),
            CodecStatus::Error(message) => {
                self.report_codec_error(message);
                return Ok(());
            }
            other => {
                log::warn!("stream {} packet not accepted: {:?}", index, other);
                self.stats.packets_discarded(1);
                return Ok(());
            }
        }

        let result = self.drain_frames(generation, cancel).await;
        drop(packet);
        result
    }

    async fn decode_eof(&self, generation: u64, cancel: &CancellationToken) -> anyhow::Result<()> {
        if let CodecStatus::Error(message) = self.context.engine().send_eof(self.stream_index()) {
            self.report_codec_error(message);
            return Ok(());
        }
        self.drain_frames(generation, cancel).await?;
        log::info!(
            "stream {} reached end of stream (generation {})",
            self.stream_index(),
            generation
        );
        Ok(())
    }

    /// Receives frames until the codec wants more input, reports end of
    /// stream, fails, or the generation moves on.
    async fn drain_frames(&self, generation: u64, cancel: &CancellationToken) -> anyhow::Result<()> {
        let engine = self.context.engine();
        let index = self.stream_index();

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled.into());
            }
            if self.context.generation() != generation {
                return Ok(());
            }

            let native = match PooledFrame::rent(engine) {
                Ok(native) => native,
                Err(e) => {
                    self.report_codec_error(format!("rent frame: {:#}", e));
                    return Ok(());
                }
            };
            match engine.receive_frame(index, native.handle()) {
                CodecStatus::Ok => {}
                CodecStatus::TryAgain | CodecStatus::EndOfFile => return Ok(()),
                CodecStatus::Error(message) => {
                    self.report_codec_error(message);
                    return Ok(());
                }
            }

            let frame = match self.convert_frame(&native, generation) {
                Ok(frame) => frame,
                Err(e) => {
                    self.report_codec_error(format!("convert frame: {:#}", e));
                    return Ok(());
                }
            };
            // The native frame goes back before we can suspend on a full queue.
            drop(native);

            self.enqueue_frame(frame, cancel).await?;
        }
    }

    fn convert_frame(&self, native: &PooledFrame, generation: u64) -> anyhow::Result<Frame> {
        let engine = self.context.engine();
        let index = self.stream_index();
        let handle = native.handle();

        let raw_ms = engine.raw_timestamp_ms(index, handle);
        let mut duration_ms = engine.duration_ms(index, handle);
        if duration_ms <= 0 {
            duration_ms = self
                .info
                .estimate_duration_ms(engine.sample_count(index, handle));
        }
        let payload = engine.convert_frame(index, handle)?;
        let timestamp_ms = self.lock_state().timestamps.repair(raw_ms, duration_ms);

        Ok(Frame::new(
            generation,
            index,
            self.media_type(),
            payload,
            timestamp_ms,
            duration_ms,
        ))
    }

    /// Pushes to the output queue. This is where a slow consumer holds the
    /// decoder back. A frame overtaken by a seek is dropped instead.
    async fn enqueue_frame(&self, frame: Frame, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut frame = frame;
        loop {
            let space = self.frames_out.space_notified();
            let seek = self.context.seek_notified();
            tokio::pin!(space, seek);
            space.as_mut().enable();
            seek.as_mut().enable();

            if self.context.generation() != frame.generation() {
                self.stats.frames_discarded(1);
                return Ok(());
            }
            match self.frames_out.try_push(frame) {
                Ok(()) => {
                    self.stats.frame_emitted();
                    return Ok(());
                }
                Err(PushError::Full(rejected)) => frame = rejected,
                Err(PushError::Closed(_)) => {
                    self.stats.frames_discarded(1);
                    return Err(PipelineError::QueueClosed.into());
                }
                Err(PushError::Cancelled(_)) => {
                    self.stats.frames_discarded(1);
                    return Err(PipelineError::Cancelled.into());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stats.frames_discarded(1);
                    return Err(PipelineError::Cancelled.into());
                }
                _ = &mut space => {}
                _ = &mut seek => {}
            }
        }
    }

    fn report_codec_error(&self, message: String) {
        self.stats.codec_error();
        log::error!("stream {} codec error: {}", self.stream_index(), message);
        self.context.emit(PipelineEvent::CodecError {
            stream_index: self.stream_index(),
            message,
        });
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
