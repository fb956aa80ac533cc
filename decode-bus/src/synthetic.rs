//! Deterministic in-memory `CodecEngine`.
//!
//! Generates an interleaved packet schedule for the configured streams and
//! "decodes" each packet into one frame whose payload names the stream and
//! packet ordinal. Pool traffic is counted so callers can check that every
//! rented handle came back exactly once. Used by the demo binary and tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::engine::{CodecEngine, CodecStatus, FrameHandle, PacketHandle, ReadStatus};
use crate::stream::{MediaType, StreamInfo};

#[derive(Debug, Clone)]
struct StreamScript {
    info: StreamInfo,
    packets: usize,
    samples_per_frame: u32,
    timestamps: Option<Vec<Option<i64>>>,
    codec_delay: usize,
    corrupt: HashSet<usize>,
}

impl StreamScript {
    fn pts_ms(&self, seq: usize) -> i64 {
        let seq = seq as i64;
        match self.info.media_type() {
            MediaType::Video => {
                let (num, den) = self.info.rate();
                if num == 0 {
                    seq
                } else {
                    seq * 1000 * den as i64 / num as i64
                }
            }
            MediaType::Audio => {
                let rate = self.info.sample_rate().max(1) as i64;
                seq * self.samples_per_frame as i64 * 1000 / rate
            }
        }
    }

    fn raw_timestamp(&self, seq: usize) -> Option<i64> {
        match &self.timestamps {
            Some(script) if seq < script.len() => script[seq],
            _ => Some(self.pts_ms(seq)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledPacket {
    stream_index: i32,
    seq: usize,
    pts_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct DecodedUnit {
    stream_index: i32,
    seq: usize,
    raw_ms: Option<i64>,
    duration_ms: i64,
    samples: u32,
}

#[derive(Debug, Default)]
struct CodecState {
    pending: VecDeque<DecodedUnit>,
    eof: bool,
    flushes: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    position: usize,
    next_id: u64,
    packets: HashMap<u64, Option<ScheduledPacket>>,
    frames: HashMap<u64, Option<DecodedUnit>>,
    codecs: HashMap<i32, CodecState>,
    read_errors: u32,
    try_agains: u32,
    read_calls: u64,
    seeks: Vec<i64>,
    released: bool,
}

/// Pool traffic seen by a `SyntheticEngine`.
#[derive(Debug, Default)]
pub struct PoolCounters {
    packets_rented: AtomicU64,
    packets_returned: AtomicU64,
    frames_rented: AtomicU64,
    frames_returned: AtomicU64,
    double_returns: AtomicU64,
}

impl PoolCounters {
    pub fn packets_rented(&self) -> u64 {
        self.packets_rented.load(Ordering::SeqCst)
    }

    pub fn packets_returned(&self) -> u64 {
        self.packets_returned.load(Ordering::SeqCst)
    }

    pub fn packets_outstanding(&self) -> u64 {
        self.packets_rented() - self.packets_returned()
    }

    pub fn frames_rented(&self) -> u64 {
        self.frames_rented.load(Ordering::SeqCst)
    }

    pub fn frames_returned(&self) -> u64 {
        self.frames_returned.load(Ordering::SeqCst)
    }

    pub fn frames_outstanding(&self) -> u64 {
        self.frames_rented() - self.frames_returned()
    }

    /// Handles returned that were not outstanding. Always 0 unless a caller
    /// returned something twice.
    pub fn double_returns(&self) -> u64 {
        self.double_returns.load(Ordering::SeqCst)
    }
}

type ReleaseHook = Box<dyn Fn() + Send + Sync>;

pub struct SyntheticEngine {
    streams: HashMap<i32, StreamScript>,
    schedule: Vec<ScheduledPacket>,
    report_durations: bool,
    state: Mutex<EngineState>,
    counters: PoolCounters,
    release_hook: Mutex<Option<ReleaseHook>>,
}

impl SyntheticEngine {
    pub fn builder() -> SyntheticEngineBuilder {
        SyntheticEngineBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Streams in index order.
    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<StreamInfo> = self.streams.values().map(|s| s.info.clone()).collect();
        streams.sort_by_key(StreamInfo::index);
        streams
    }

    pub fn total_packets(&self) -> usize {
        self.schedule.len()
    }

    /// Packets the demuxer would produce for `stream_index`.
    pub fn packets_for(&self, stream_index: i32) -> usize {
        self.streams.get(&stream_index).map_or(0, |s| s.packets)
    }

    /// Schedule position of the next packet to be read.
    pub fn position(&self) -> usize {
        self.lock().position
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.lock().seeks.clone()
    }

    pub fn flush_count(&self, stream_index: i32) -> usize {
        self.lock()
            .codecs
            .get(&stream_index)
            .map_or(0, |codec| codec.flushes)
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Makes the next `count` container reads fail.
    pub fn inject_read_errors(&self, count: u32) {
        self.lock().read_errors = count;
    }

    /// Makes the next `count` container reads report `TryAgain`.
    pub fn inject_try_again(&self, count: u32) {
        self.lock().try_agains = count;
    }

    /// Container reads attempted so far, whatever their outcome.
    pub fn read_calls(&self) -> u64 {
        self.lock().read_calls
    }

    /// Runs `hook` inside `release_session`, after the engine is marked
    /// released.
    pub fn on_release(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self
            .release_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Recovers the packet ordinal from a converted payload.
    pub fn payload_seq(payload: &[u8]) -> Option<usize> {
        let text = std::str::from_utf8(payload).ok()?;
        let (_, seq) = text.split_once('#')?;
        seq.parse().ok()
    }

    fn next_id(state: &mut EngineState) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

impl CodecEngine for SyntheticEngine {
    fn rent_packet(&self) -> anyhow::Result<PacketHandle> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state);
        state.packets.insert(id, None);
        self.counters.packets_rented.fetch_add(1, Ordering::SeqCst);
        Ok(PacketHandle::new(id))
    }

    fn return_packet(&self, handle: PacketHandle) {
        if self.lock().packets.remove(&handle.raw()).is_some() {
            self.counters.packets_returned.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.double_returns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rent_frame(&self) -> anyhow::Result<FrameHandle> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state);
        state.frames.insert(id, None);
        self.counters.frames_rented.fetch_add(1, Ordering::SeqCst);
        Ok(FrameHandle::new(id))
    }

    fn return_frame(&self, handle: FrameHandle) {
        if self.lock().frames.remove(&handle.raw()).is_some() {
            self.counters.frames_returned.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.double_returns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn read_packet(&self, packet: &PacketHandle) -> ReadStatus {
        let mut state = self.lock();
        state.read_calls += 1;
        if state.try_agains > 0 {
            state.try_agains -= 1;
            return ReadStatus::TryAgain;
        }
        if state.read_errors > 0 {
            state.read_errors -= 1;
            return ReadStatus::Error("injected read error".to_string());
        }
        let Some(next) = self.schedule.get(state.position).copied() else {
            return ReadStatus::EndOfFile;
        };
        match state.packets.get_mut(&packet.raw()) {
            Some(slot) => *slot = Some(next),
            None => return ReadStatus::Error(format!("unknown packet handle {}", packet.raw())),
        }
        state.position += 1;
        ReadStatus::Ok {
            stream_index: next.stream_index,
        }
    }

    fn send_packet(&self, stream_index: i32, packet: &PacketHandle) -> CodecStatus {
        let Some(script) = self.streams.get(&stream_index) else {
            return CodecStatus::Error(format!("no codec for stream {}", stream_index));
        };
        let mut state = self.lock();
        let Some(Some(content)) = state.packets.get(&packet.raw()).copied() else {
            return CodecStatus::Error(format!("empty packet handle {}", packet.raw()));
        };
        if content.stream_index != stream_index {
            return CodecStatus::Error(format!(
                "packet of stream {} sent to stream {}",
                content.stream_index, stream_index
            ));
        }
        if script.corrupt.contains(&content.seq) {
            return CodecStatus::Error(format!("corrupt packet #{}", content.seq));
        }

        let codec = state.codecs.entry(stream_index).or_default();
        if codec.eof {
            return CodecStatus::EndOfFile;
        }
        let duration_ms = if self.report_durations {
            script.pts_ms(content.seq + 1) - script.pts_ms(content.seq)
        } else {
            0
        };
        codec.pending.push_back(DecodedUnit {
            stream_index,
            seq: content.seq,
            raw_ms: script.raw_timestamp(content.seq),
            duration_ms,
            samples: script.samples_per_frame,
        });
        CodecStatus::Ok
    }

    fn send_eof(&self, stream_index: i32) -> CodecStatus {
        self.lock().codecs.entry(stream_index).or_default().eof = true;
        CodecStatus::Ok
    }

    fn receive_frame(&self, stream_index: i32, frame: &FrameHandle) -> CodecStatus {
        let delay = self
            .streams
            .get(&stream_index)
            .map_or(0, |script| script.codec_delay);
        let mut state = self.lock();
        let codec = state.codecs.entry(stream_index).or_default();
        let ready = codec.pending.len() > delay || (codec.eof && !codec.pending.is_empty());
        if !ready {
            return if codec.eof {
                CodecStatus::EndOfFile
            } else {
                CodecStatus::TryAgain
            };
        }
        let unit = codec.pending.pop_front();
        match state.frames.get_mut(&frame.raw()) {
            Some(slot) => {
                *slot = unit;
                CodecStatus::Ok
            }
            None => CodecStatus::Error(format!("unknown frame handle {}", frame.raw())),
        }
    }

    fn flush_codec(&self, stream_index: i32) {
        let mut state = self.lock();
        let codec = state.codecs.entry(stream_index).or_default();
        codec.pending.clear();
        codec.eof = false;
        codec.flushes += 1;
    }

    fn seek_container(&self, target_ms: i64) -> anyhow::Result<()> {
        let mut state = self.lock();
        state.position = self
            .schedule
            .iter()
            .position(|p| p.pts_ms >= target_ms)
            .unwrap_or(self.schedule.len());
        state.seeks.push(target_ms);
        Ok(())
    }

    fn raw_timestamp_ms(&self, _stream_index: i32, frame: &FrameHandle) -> Option<i64> {
        self.lock()
            .frames
            .get(&frame.raw())
            .copied()
            .flatten()
            .and_then(|unit| unit.raw_ms)
    }

    fn duration_ms(&self, _stream_index: i32, frame: &FrameHandle) -> i64 {
        self.lock()
            .frames
            .get(&frame.raw())
            .copied()
            .flatten()
            .map_or(0, |unit| unit.duration_ms)
    }

    fn sample_count(&self, _stream_index: i32, frame: &FrameHandle) -> u32 {
        self.lock()
            .frames
            .get(&frame.raw())
            .copied()
            .flatten()
            .map_or(0, |unit| unit.samples)
    }

    fn convert_frame(&self, stream_index: i32, frame: &FrameHandle) -> anyhow::Result<Bytes> {
        let unit = self
            .lock()
            .frames
            .get(&frame.raw())
            .copied()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("frame handle {} holds no picture", frame.raw()))?;
        if unit.stream_index != stream_index {
            anyhow::bail!(
                "frame of stream {} converted as stream {}",
                unit.stream_index,
                stream_index
            );
        }
        Ok(Bytes::from(format!("s{}#{}", unit.stream_index, unit.seq)))
    }

    fn release_session(&self) {
        self.lock().released = true;
        let hook = self
            .release_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }
}

#[derive(Default)]
pub struct SyntheticEngineBuilder {
    streams: Vec<StreamScript>,
    omit_durations: bool,
    read_errors: u32,
}

impl SyntheticEngineBuilder {
    /// Adds a video stream of `packets` frames at `fps`.
    pub fn video(mut self, stream_index: i32, fps: u32, packets: usize) -> Self {
        self.streams.push(StreamScript {
            info: StreamInfo::video(stream_index, fps, 1),
            packets,
            samples_per_frame: 0,
            timestamps: None,
            codec_delay: 0,
            corrupt: HashSet::new(),
        });
        self
    }

    /// Adds an audio stream of `packets` frames, `samples_per_frame` each.
    pub fn audio(
        mut self,
        stream_index: i32,
        sample_rate: u32,
        samples_per_frame: u32,
        packets: usize,
    ) -> Self {
        self.streams.push(StreamScript {
            info: StreamInfo::audio(stream_index, sample_rate),
            packets,
            samples_per_frame,
            timestamps: None,
            codec_delay: 0,
            corrupt: HashSet::new(),
        });
        self
    }

    fn stream_mut(&mut self, stream_index: i32) -> Option<&mut StreamScript> {
        self.streams
            .iter_mut()
            .find(|s| s.info.index() == stream_index)
    }

    /// Overrides the codec timestamps of the first packets of a stream;
    /// `None` entries come back as "no timestamp".
    pub fn timestamps(mut self, stream_index: i32, timestamps: Vec<Option<i64>>) -> Self {
        if let Some(stream) = self.stream_mut(stream_index) {
            stream.timestamps = Some(timestamps);
        }
        self
    }

    /// Frames stay buffered in the codec until `delay` more packets arrive
    /// or end of stream is signalled.
    pub fn codec_delay(mut self, stream_index: i32, delay: usize) -> Self {
        if let Some(stream) = self.stream_mut(stream_index) {
            stream.codec_delay = delay;
        }
        self
    }

    /// Packet `seq` of the stream fails to decode.
    pub fn corrupt_packet(mut self, stream_index: i32, seq: usize) -> Self {
        if let Some(stream) = self.stream_mut(stream_index) {
            stream.corrupt.insert(seq);
        }
        self
    }

    /// Report 0 durations so decoders fall back to their estimates.
    pub fn omit_durations(mut self) -> Self {
        self.omit_durations = true;
        self
    }

    pub fn read_errors(mut self, count: u32) -> Self {
        self.read_errors = count;
        self
    }

    pub fn build(self) -> Arc<SyntheticEngine> {
        let mut schedule: Vec<ScheduledPacket> = self
            .streams
            .iter()
            .flat_map(|script| {
                (0..script.packets).map(move |seq| ScheduledPacket {
                    stream_index: script.info.index(),
                    seq,
                    pts_ms: script.pts_ms(seq),
                })
            })
            .collect();
        schedule.sort_by_key(|p| (p.pts_ms, p.stream_index, p.seq));

        let state = EngineState {
            read_errors: self.read_errors,
            ..Default::default()
        };
        let streams = self
            .streams
            .into_iter()
            .map(|script| (script.info.index(), script))
            .collect();

        Arc::new(SyntheticEngine {
            streams,
            schedule,
            report_durations: !self.omit_durations,
            state: Mutex::new(state),
            counters: PoolCounters::default(),
            release_hook: Mutex::new(None),
        })
    }
}
