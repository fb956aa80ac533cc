//! Concurrent decode pipeline: one demux worker feeding one decode worker per
//! elementary stream through bounded queues, with generation-tagged data so a
//! seek invalidates everything in flight without locking the workers.
//!
//! ```text
//!                        ┌─► packets_in ─► StreamDecoder (video) ─► frames_out ─► consumer
//! CodecEngine ─► demux ──┤
//!   (container)          └─► packets_in ─► StreamDecoder (audio) ─► frames_out ─► consumer
//! ```
//!
//! The codec itself lives behind [`engine::CodecEngine`].

pub mod config;
pub mod context;
pub mod controller;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod stream;
pub mod synthetic;
pub mod timestamp;

pub use config::PipelineConfig;
pub use controller::PipelineController;
pub use decoder::{DecoderPhase, StreamDecoder};
pub use engine::{CodecEngine, CodecStatus, FrameHandle, PacketHandle, ReadStatus};
pub use error::PipelineError;
pub use frame::Frame;
pub use stream::{MediaType, StreamInfo};
