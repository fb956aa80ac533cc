use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio_util::sync::CancellationToken;

/// Why a push did not happen. The rejected item is handed back so the caller
/// decides how to release it.
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
    Cancelled(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) | PushError::Cancelled(item) => item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Closed,
    Cancelled,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO with cancellable async push/pop and non-blocking access.
///
/// Producers suspend while the queue is full, consumers while it is empty.
/// The mutex is only held for the duration of a `VecDeque` operation, never
/// across an await.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    item_ready: Notify,
    space_ready: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Future completing on the next pop, drain or close. Enable it before
    /// re-checking the queue to avoid missing a wake-up.
    pub fn space_notified(&self) -> Notified<'_> {
        self.space_ready.notified()
    }

    /// Future completing on the next push or close.
    pub fn item_notified(&self) -> Notified<'_> {
        self.item_ready.notified()
    }

    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            if inner.items.len() >= self.capacity {
                return Err(PushError::Full(item));
            }
            inner.items.push_back(item);
        }
        self.item_ready.notify_waiters();
        Ok(())
    }

    /// Pushes `item`, suspending while the queue is full.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), PushError<T>> {
        let mut item = item;
        loop {
            let space = self.space_notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(rejected)) => item = rejected,
                Err(err) => return Err(err),
            }
            if cancel.is_cancelled() {
                return Err(PushError::Cancelled(item));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PushError::Cancelled(item)),
                _ = &mut space => {}
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.space_ready.notify_waiters();
        }
        item
    }

    /// Pops the oldest item, suspending while the queue is empty. Items still
    /// queued at close time are handed out before `Closed` is reported.
    pub async fn pop(&self, cancel: &CancellationToken) -> Result<T, PopError> {
        loop {
            let ready = self.item_notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.space_ready.notify_waiters();
                    return Ok(item);
                }
                if inner.closed {
                    return Err(PopError::Closed);
                }
            }
            if cancel.is_cancelled() {
                return Err(PopError::Cancelled);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PopError::Cancelled),
                _ = &mut ready => {}
            }
        }
    }

    /// Pops the front item while `predicate` holds for it; returns how many
    /// were removed. Removed items are dropped outside the lock.
    pub fn pop_front_while(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let mut removed = Vec::new();
        {
            let mut inner = self.lock();
            while inner.items.front().is_some_and(&mut predicate) {
                if let Some(item) = inner.items.pop_front() {
                    removed.push(item);
                }
            }
        }
        let count = removed.len();
        drop(removed);
        if count > 0 {
            self.space_ready.notify_waiters();
        }
        count
    }

    /// Applies `f` to the front item without removing it.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.lock().items.front().map(f)
    }

    /// Drops every item for which `keep` is false; returns how many went.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let removed: VecDeque<T> = {
            let mut inner = self.lock();
            let (kept, removed): (VecDeque<T>, VecDeque<T>) =
                inner.items.drain(..).partition(|item| keep(item));
            inner.items = kept;
            removed
        };
        let count = removed.len();
        drop(removed);
        if count > 0 {
            self.space_ready.notify_waiters();
        }
        count
    }

    /// Removes and returns everything queued.
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.lock().items.drain(..).collect();
        if !items.is_empty() {
            self.space_ready.notify_waiters();
        }
        items
    }

    /// Rejects further pushes and wakes every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
