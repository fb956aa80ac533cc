use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;

pub type EventSender = tokio::sync::broadcast::Sender<PipelineEvent>;
pub type EventReceiver = tokio::sync::broadcast::Receiver<PipelineEvent>;
pub type EventStream = BroadcastStream<PipelineEvent>;

/// Diagnostics published by the workers. Sending never blocks; events are
/// dropped when nobody subscribes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started { generation: u64 },
    Stopped,
    SeekRequested { target_ms: i64, generation: u64 },
    ContainerSeeked { target_ms: i64, generation: u64 },
    Flushed { stream_index: i32, generation: u64 },
    CodecError { stream_index: i32, message: String },
    ReadError { message: String },
    EndOfFile { generation: u64 },
}

pub(crate) fn emit(sender: &EventSender, event: PipelineEvent) {
    // Err only means there are no subscribers.
    let _ = sender.send(event);
}
