use thiserror::Error;

/// Contract violations and shutdown signals raised by the pipeline.
///
/// Public operations return `anyhow::Result`; callers that need to branch on
/// the cause can `downcast_ref::<PipelineError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("decode session already started")]
    AlreadyStarted,

    #[error("decode session disposed")]
    Disposed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("queue closed")]
    QueueClosed,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Cancellation and queue closure are the normal ways a worker unwinds.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::QueueClosed)
    }
}

/// True when `err` is one of the expected shutdown signals.
pub fn is_shutdown_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PipelineError>()
        .is_some_and(PipelineError::is_shutdown)
}
