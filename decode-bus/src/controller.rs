use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PipelineConfig,
    context::PipelineContext,
    decoder::StreamDecoder,
    engine::{CodecEngine, ReadStatus},
    error::PipelineError,
    event::{EventReceiver, EventStream, PipelineEvent},
    packet::Packet,
    pool::PooledPacket,
    stream::StreamInfo,
};

/// Stream index to decoder lookup used by the demux worker.
#[derive(Clone, Default)]
pub struct PacketRouter {
    decoders: BTreeMap<i32, Arc<StreamDecoder>>,
}

impl PacketRouter {
    pub fn insert(&mut self, decoder: Arc<StreamDecoder>) -> Option<Arc<StreamDecoder>> {
        self.decoders.insert(decoder.stream_index(), decoder)
    }

    pub fn route(&self, stream_index: i32) -> Option<&Arc<StreamDecoder>> {
        self.decoders.get(&stream_index)
    }

    pub fn decoders(&self) -> impl Iterator<Item = &Arc<StreamDecoder>> {
        self.decoders.values()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

struct DecodeTasks {
    cancel: CancellationToken,
    demux: JoinHandle<()>,
    decoders: Vec<JoinHandle<()>>,
}

enum Session {
    Idle,
    Running(DecodeTasks),
    /// Workers cancelled, not yet joined. Flips to true once the session is
    /// back to `Idle`.
    Stopping(watch::Receiver<bool>),
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns one decode session: a demux worker plus one decode worker per
/// stream, started and stopped together.
pub struct PipelineController {
    context: Arc<PipelineContext>,
    router: Arc<PacketRouter>,
    session: Arc<Mutex<Session>>,
    /// Generation the container read position currently belongs to.
    container_generation: Arc<AtomicU64>,
    disposed: AtomicBool,
}

impl PipelineController {
    pub fn new(
        engine: Arc<dyn CodecEngine>,
        streams: Vec<StreamInfo>,
        config: PipelineConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        if streams.is_empty() {
            anyhow::bail!("no streams to decode");
        }

        let context = Arc::new(PipelineContext::new(engine, config));
        let mut router = PacketRouter::default();
        for info in streams {
            let index = info.index();
            let decoder = Arc::new(StreamDecoder::new(info, Arc::clone(&context)));
            if router.insert(decoder).is_some() {
                anyhow::bail!("duplicate stream index {}", index);
            }
        }

        Ok(Self {
            container_generation: Arc::new(AtomicU64::new(context.generation())),
            context,
            router: Arc::new(router),
            session: Arc::new(Mutex::new(Session::Idle)),
            disposed: AtomicBool::new(false),
        })
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        lock_session(&self.session)
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    pub fn completed(&self) -> bool {
        self.context.completed()
    }

    pub fn generation(&self) -> u64 {
        self.context.generation()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_session(), Session::Running(_))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn decoder(&self, stream_index: i32) -> Option<Arc<StreamDecoder>> {
        self.router.route(stream_index).cloned()
    }

    pub fn decoders(&self) -> Vec<Arc<StreamDecoder>> {
        self.router.decoders().cloned().collect()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.context.subscribe()
    }

    pub fn event_stream(&self) -> EventStream {
        BroadcastStream::new(self.context.subscribe())
    }

    /// Spawns the demux worker and one decode worker per stream. Must be
    /// called from within a tokio runtime.
    pub fn start_decode(&self) -> anyhow::Result<()> {
        if self.is_disposed() || self.context.is_cancelled() {
            return Err(PipelineError::Disposed.into());
        }

        let mut session = self.lock_session();
        if !matches!(*session, Session::Idle) {
            return Err(PipelineError::AlreadyStarted.into());
        }

        let cancel = self.context.cancel_token().child_token();
        let decoders = self
            .router
            .decoders()
            .map(|decoder| tokio::spawn(Arc::clone(decoder).run(cancel.clone())))
            .collect();
        let demux = tokio::spawn(demux_loop(
            Arc::clone(&self.context),
            Arc::clone(&self.router),
            Arc::clone(&self.container_generation),
            cancel.clone(),
        ));

        *session = Session::Running(DecodeTasks {
            cancel,
            demux,
            decoders,
        });

        let generation = self.context.generation();
        log::info!(
            "decode session started: {} streams, generation {}",
            self.router.len(),
            generation
        );
        self.context.emit(PipelineEvent::Started { generation });
        Ok(())
    }

    /// Cancels every worker and waits for all of them to exit, then releases
    /// whatever is still queued. A no-op when not running. Concurrent callers
    /// all wait for the same join; dropping this future does not abort it.
    pub async fn stop_decode(&self) {
        let mut stopped = {
            let mut session = self.lock_session();
            match std::mem::replace(&mut *session, Session::Idle) {
                Session::Idle => return,
                Session::Stopping(stopped) => {
                    *session = Session::Stopping(stopped.clone());
                    stopped
                }
                Session::Running(tasks) => {
                    let (done, stopped) = watch::channel(false);
                    *session = Session::Stopping(stopped.clone());
                    tokio::spawn(join_workers(
                        tasks,
                        Arc::clone(&self.context),
                        Arc::clone(&self.router),
                        Arc::clone(&self.session),
                        done,
                    ));
                    stopped
                }
            }
        };

        loop {
            let finished = *stopped.borrow_and_update();
            if finished {
                break;
            }
            if stopped.changed().await.is_err() {
                log::error!("decode session join task vanished");
                break;
            }
        }
    }

    /// Requests a seek to `target_ms`. While running this only bumps the
    /// generation; the workers pick it up. While idle it is applied here.
    pub fn seek_decoder(&self, target_ms: i64) -> anyhow::Result<()> {
        if self.is_disposed() {
            return Err(PipelineError::Disposed.into());
        }

        let session = self.lock_session();
        let generation = self.context.begin_seek(target_ms);
        log::info!("seek to {}ms, generation {}", target_ms, generation);
        self.context.emit(PipelineEvent::SeekRequested {
            target_ms,
            generation,
        });

        if matches!(*session, Session::Idle) {
            self.context.engine().seek_container(target_ms)?;
            self.container_generation
                .store(generation, Ordering::Release);
            for decoder in self.router.decoders() {
                decoder.flush(generation);
            }
            self.context.emit(PipelineEvent::ContainerSeeked {
                target_ms,
                generation,
            });
        }
        Ok(())
    }

    /// Stops the session for good: joins the workers, closes every queue and
    /// releases the engine's session resources. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_decode().await;
        for decoder in self.router.decoders() {
            decoder.close();
            decoder.drain_queues();
        }
        self.context.cancel_token().cancel();
        self.context.engine().release_session();
        log::info!("decode session disposed");
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if !self.is_disposed() {
            log::warn!("PipelineController dropped without dispose, cancelling workers");
            self.context.cancel_token().cancel();
        }
    }
}

/// TryAgain reads retried with a bare yield before backing off by the retry
/// delay.
const TRY_AGAIN_SPINS: u32 = 16;

/// Cancels a run, joins its workers, drains the queues and returns the
/// session to `Idle`. Runs as its own task so an abandoned `stop_decode`
/// cannot leave the session half stopped.
async fn join_workers(
    tasks: DecodeTasks,
    context: Arc<PipelineContext>,
    router: Arc<PacketRouter>,
    session: Arc<Mutex<Session>>,
    done: watch::Sender<bool>,
) {
    tasks.cancel.cancel();
    let handles = std::iter::once(tasks.demux).chain(tasks.decoders);
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            if e.is_panic() {
                log::error!("decode worker panicked: {}", e);
            } else {
                log::debug!("decode worker aborted: {}", e);
            }
        }
    }

    for decoder in router.decoders() {
        decoder.drain_queues();
    }
    *lock_session(&session) = Session::Idle;

    log::info!("decode session stopped");
    context.emit(PipelineEvent::Stopped);
    done.send_replace(true);
}

/// Reads packets and routes them to decoders until cancelled. Seeks the
/// container whenever the session generation moves past the one the read
/// position belongs to.
async fn demux_loop(
    context: Arc<PipelineContext>,
    router: Arc<PacketRouter>,
    container_generation: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let engine = Arc::clone(context.engine());
    let max_errors = context.config().max_consecutive_read_errors;
    let retry_delay = context.config().read_retry_delay();
    let mut generation = container_generation.load(Ordering::Acquire);
    let mut read_errors = 0u32;
    let mut try_agains = 0u32;

    log::info!("demux loop started at generation {}", generation);

    while !cancel.is_cancelled() {
        let current = context.generation();
        if current != generation {
            let target_ms = context.seek_target_ms();
            match engine.seek_container(target_ms) {
                Ok(()) => {
                    log::debug!("container seeked to {}ms (generation {})", target_ms, current);
                    context.emit(PipelineEvent::ContainerSeeked {
                        target_ms,
                        generation: current,
                    });
                }
                Err(e) => {
                    log::error!("container seek to {}ms failed: {:#}", target_ms, e);
                    context.emit(PipelineEvent::ReadError {
                        message: format!("seek: {:#}", e),
                    });
                }
            }
            generation = current;
            container_generation.store(current, Ordering::Release);
            context.clear_completed();
            read_errors = 0;
            try_agains = 0;
            continue;
        }

        let packet = match PooledPacket::rent(&engine) {
            Ok(packet) => packet,
            Err(e) => {
                log::error!("rent packet: {:#}", e);
                if !sleep_or_cancel(retry_delay, &cancel).await {
                    break;
                }
                continue;
            }
        };

        match engine.read_packet(packet.handle()) {
            ReadStatus::Ok { stream_index } => {
                read_errors = 0;
                try_agains = 0;
                let Some(decoder) = router.route(stream_index) else {
                    log::trace!("no decoder for stream {}, packet dropped", stream_index);
                    continue;
                };
                let packet = Packet::new(generation, stream_index, packet);
                if let Err(e) = decoder.enqueue_packet(packet, &cancel).await {
                    log::debug!("demux stop routing: {}", e);
                    break;
                }
            }
            ReadStatus::TryAgain => {
                drop(packet);
                try_agains = try_agains.saturating_add(1);
                if try_agains < TRY_AGAIN_SPINS {
                    tokio::task::yield_now().await;
                } else if !sleep_or_cancel(retry_delay, &cancel).await {
                    break;
                }
            }
            ReadStatus::EndOfFile => {
                drop(packet);
                if !end_of_source(&context, &router, generation, &cancel).await {
                    break;
                }
            }
            ReadStatus::Error(message) => {
                drop(packet);
                read_errors += 1;
                log::warn!("read packet error ({} in a row): {}", read_errors, message);
                context.emit(PipelineEvent::ReadError { message });
                if read_errors >= max_errors {
                    log::error!("giving up on source after {} read errors", read_errors);
                    if !end_of_source(&context, &router, generation, &cancel).await {
                        break;
                    }
                } else if !sleep_or_cancel(retry_delay, &cancel).await {
                    break;
                }
            }
        }
    }

    log::info!("demux loop exited");
}

/// Marks the session completed, sends end-of-stream to every decoder and
/// parks until a seek arrives. Returns false when cancelled.
async fn end_of_source(
    context: &PipelineContext,
    router: &PacketRouter,
    generation: u64,
    cancel: &CancellationToken,
) -> bool {
    if context.generation() == generation {
        context.mark_completed();
        log::info!("end of source at generation {}", generation);
        context.emit(PipelineEvent::EndOfFile { generation });

        for decoder in router.decoders() {
            if decoder.enqueue_eof(generation, cancel).await.is_err() {
                return false;
            }
        }
    }

    loop {
        let seek = context.seek_notified();
        tokio::pin!(seek);
        seek.as_mut().enable();

        if context.generation() != generation {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = &mut seek => {}
        }
    }
}

async fn sleep_or_cancel(delay: std::time::Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
