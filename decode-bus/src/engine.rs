use bytes::Bytes;

/// Opaque id of a pooled native packet. Not `Clone`: a handle has one owner
/// and goes back to the pool exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PacketHandle(u64);

impl PacketHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque id of a pooled native frame.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl FrameHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Result of reading one packet from the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Ok { stream_index: i32 },
    EndOfFile,
    TryAgain,
    Error(String),
}

/// Result of a send/receive call against a stream's codec state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecStatus {
    Ok,
    /// Needs more input (receive) or must be drained first (send).
    TryAgain,
    EndOfFile,
    Error(String),
}

impl CodecStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CodecStatus::Ok)
    }
}

/// The native demux/codec collaborator.
///
/// Per-stream codec state is addressed by stream index and is only ever
/// touched by that stream's decode worker. The container is only touched by
/// the demux worker. Pool operations may be called from any worker.
pub trait CodecEngine: Send + Sync {
    fn rent_packet(&self) -> anyhow::Result<PacketHandle>;

    fn return_packet(&self, handle: PacketHandle);

    fn rent_frame(&self) -> anyhow::Result<FrameHandle>;

    fn return_frame(&self, handle: FrameHandle);

    /// Reads the next container packet into `packet`.
    fn read_packet(&self, packet: &PacketHandle) -> ReadStatus;

    fn send_packet(&self, stream_index: i32, packet: &PacketHandle) -> CodecStatus;

    /// Signals end of input so buffered frames can be drained.
    fn send_eof(&self, _stream_index: i32) -> CodecStatus {
        CodecStatus::Ok
    }

    fn receive_frame(&self, stream_index: i32, frame: &FrameHandle) -> CodecStatus;

    fn flush_codec(&self, stream_index: i32);

    fn seek_container(&self, target_ms: i64) -> anyhow::Result<()>;

    /// Presentation time of a decoded frame, `None` when the codec has none.
    fn raw_timestamp_ms(&self, stream_index: i32, frame: &FrameHandle) -> Option<i64>;

    /// Duration of a decoded frame, 0 when unknown.
    fn duration_ms(&self, stream_index: i32, frame: &FrameHandle) -> i64;

    /// Samples per channel in a decoded audio frame, 0 for video or unknown.
    fn sample_count(&self, _stream_index: i32, _frame: &FrameHandle) -> u32 {
        0
    }

    /// Pixel/sample format conversion into an owned payload.
    fn convert_frame(&self, stream_index: i32, frame: &FrameHandle) -> anyhow::Result<Bytes>;

    /// Releases session-wide native resources. Called once, after every
    /// worker has exited.
    fn release_session(&self) {}
}
