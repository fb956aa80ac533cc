use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::CodecEngine;
use crate::event::{self, EventReceiver, EventSender, PipelineEvent};

/// Session-wide state shared by the controller and every worker.
///
/// `generation` and `completed` are the only values written across worker
/// boundaries, and only through `begin_seek` / `mark_completed`.
pub struct PipelineContext {
    engine: Arc<dyn CodecEngine>,
    config: PipelineConfig,
    generation: AtomicU64,
    completed: AtomicBool,
    seek_target_ms: AtomicI64,
    seek_signal: Notify,
    cancel: CancellationToken,
    events: EventSender,
}

impl PipelineContext {
    pub fn new(engine: Arc<dyn CodecEngine>, config: PipelineConfig) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(config.event_capacity.max(1));
        Self {
            engine,
            config,
            generation: AtomicU64::new(0),
            completed: AtomicBool::new(false),
            seek_target_ms: AtomicI64::new(0),
            seek_signal: Notify::new(),
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub fn engine(&self) -> &Arc<dyn CodecEngine> {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub(crate) fn clear_completed(&self) {
        self.completed.store(false, Ordering::Release);
    }

    pub fn seek_target_ms(&self) -> i64 {
        self.seek_target_ms.load(Ordering::Acquire)
    }

    /// Publishes a seek: clears `completed`, stores the target, then bumps
    /// the generation. Returns the new generation.
    pub(crate) fn begin_seek(&self, target_ms: i64) -> u64 {
        self.completed.store(false, Ordering::Release);
        self.seek_target_ms.store(target_ms, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.seek_signal.notify_waiters();
        generation
    }

    /// Future completing on the next `begin_seek`. Enable it before reading
    /// the generation to avoid missing a seek.
    pub fn seek_notified(&self) -> Notified<'_> {
        self.seek_signal.notified()
    }

    /// Session token; cancelled only when the session is disposed.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        event::emit(&self.events, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticEngine;

    fn context() -> PipelineContext {
        let engine = SyntheticEngine::builder().video(0, 25, 4).build();
        PipelineContext::new(engine, PipelineConfig::default())
    }

    #[test]
    fn test_seek_bumps_generation_and_clears_completed() {
        let ctx = context();
        assert_eq!(ctx.generation(), 0);
        ctx.mark_completed();
        assert!(ctx.completed());

        assert_eq!(ctx.begin_seek(1500), 1);
        assert_eq!(ctx.generation(), 1);
        assert_eq!(ctx.seek_target_ms(), 1500);
        assert!(!ctx.completed());

        assert_eq!(ctx.begin_seek(0), 2);
    }

    #[tokio::test]
    async fn test_seek_wakes_waiter() {
        let ctx = Arc::new(context());
        let seen = ctx.generation();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let seek = ctx.seek_notified();
                tokio::pin!(seek);
                seek.as_mut().enable();
                if ctx.generation() == seen {
                    seek.await;
                }
                ctx.generation()
            })
        };

        tokio::task::yield_now().await;
        ctx.begin_seek(10);
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let ctx = context();
        let mut rx = ctx.subscribe();
        ctx.begin_seek(20);
        ctx.emit(PipelineEvent::SeekRequested {
            target_ms: 20,
            generation: 1,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::SeekRequested {
                target_ms: 20,
                generation: 1
            }
        );
    }
}
