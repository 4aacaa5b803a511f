//! In-memory session queue for fast, deterministic tests.
//!
//! [`InMemoryCommandQueue`] keeps one FIFO deque per session key and a set of
//! locked sessions. A receive hands out the head of the first unlocked,
//! non-empty session and locks it until the delivery is settled, so every
//! subscription sees the same per-session order and no two subscribers ever
//! hold the same session.

use async_stream::stream;
use rollcall_core::command::RegistrationCommand;
use rollcall_core::queue::{
    CommandQueue, Delivery, DeliveryStream, QueueError, QueueFuture, Settlement,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug)]
struct Message {
    command: RegistrationCommand,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    sessions: HashMap<String, VecDeque<Message>>,
    /// Sessions with messages, in the order they become eligible
    ready: VecDeque<String>,
    locked: HashSet<String>,
    closed: bool,
}

impl QueueState {
    fn mark_ready(&mut self, session: &str) {
        if !self.ready.iter().any(|s| s == session) {
            self.ready.push_back(session.to_string());
        }
    }

    fn take_next(&mut self) -> Option<(String, Message)> {
        let position = self
            .ready
            .iter()
            .position(|session| !self.locked.contains(session))?;
        let session = self.ready.remove(position)?;

        let queue = self.sessions.get_mut(&session)?;
        let mut message = queue.pop_front()?;
        if queue.is_empty() {
            self.sessions.remove(&session);
        } else {
            self.ready.push_back(session.clone());
        }

        message.delivery_count += 1;
        self.locked.insert(session.clone());
        Some((session, message))
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    fail_enqueues: AtomicUsize,
    enqueued: AtomicU64,
    abandoned: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, session: &str, requeue: Option<Message>) {
        {
            let mut state = self.lock();
            state.locked.remove(session);
            if let Some(message) = requeue {
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                state
                    .sessions
                    .entry(session.to_string())
                    .or_default()
                    .push_front(message);
                state.mark_ready(session);
            }
        }
        self.notify.notify_waiters();
    }
}

/// Settlement handle of one in-memory delivery.
///
/// Dropping it unsettled puts the message back at the head of its session.
struct InMemorySettlement {
    shared: Arc<Shared>,
    session: String,
    message: Option<Message>,
}

impl InMemorySettlement {
    fn finish(&mut self, requeue: bool) {
        if let Some(message) = self.message.take() {
            self.shared
                .settle(&self.session, requeue.then_some(message));
        }
    }
}

impl Settlement for InMemorySettlement {
    fn complete(mut self: Box<Self>) -> QueueFuture<'static, ()> {
        self.finish(false);
        Box::pin(async { Ok(()) })
    }

    fn abandon(mut self: Box<Self>) -> QueueFuture<'static, ()> {
        self.finish(true);
        Box::pin(async { Ok(()) })
    }
}

impl Drop for InMemorySettlement {
    fn drop(&mut self) {
        self.finish(true);
    }
}

/// In-memory session-ordered command queue.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```ignore
/// use rollcall_testing::InMemoryCommandQueue;
///
/// let queue = InMemoryCommandQueue::new();
/// queue.enqueue(&command).await?;
///
/// let mut deliveries = queue.subscribe().await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// delivery.complete().await?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCommandQueue {
    shared: Arc<Shared>,
}

impl InMemoryCommandQueue {
    /// Create a new empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` enqueue calls fail with [`QueueError::Unavailable`]
    pub fn fail_next_enqueues(&self, count: usize) {
        self.shared.fail_enqueues.store(count, Ordering::SeqCst);
    }

    /// Stop handing out deliveries; open subscriptions end
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    /// Commands waiting (not handed out) across all sessions
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().sessions.values().map(VecDeque::len).sum()
    }

    /// Commands waiting in one session, oldest first
    #[must_use]
    pub fn session(&self, session_key: &str) -> Vec<RegistrationCommand> {
        self.shared
            .lock()
            .sessions
            .get(session_key)
            .map(|queue| queue.iter().map(|m| m.command.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether a delivery of the session is currently held by a consumer
    #[must_use]
    pub fn is_locked(&self, session_key: &str) -> bool {
        self.shared.lock().locked.contains(session_key)
    }

    /// Total commands successfully enqueued
    #[must_use]
    pub fn enqueued_total(&self) -> u64 {
        self.shared.enqueued.load(Ordering::SeqCst)
    }

    /// Total deliveries put back for redelivery
    #[must_use]
    pub fn abandoned_total(&self) -> u64 {
        self.shared.abandoned.load(Ordering::SeqCst)
    }

    /// Whether nothing is waiting and nothing is held
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.sessions.is_empty() && state.locked.is_empty()
    }

    /// Hand out the next eligible delivery without waiting.
    #[must_use]
    pub fn try_receive(&self) -> Option<Delivery> {
        let (session, message) = self.shared.lock().take_next()?;
        let command = message.command.clone();
        let delivery_count = message.delivery_count;
        let settlement = InMemorySettlement {
            shared: Arc::clone(&self.shared),
            session,
            message: Some(message),
        };
        Some(Delivery::new(command, delivery_count, Box::new(settlement)))
    }
}

impl CommandQueue for InMemoryCommandQueue {
    fn enqueue<'a>(&'a self, command: &'a RegistrationCommand) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let injected = self
                .shared
                .fail_enqueues
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(QueueError::Unavailable(
                    "injected enqueue failure".to_string(),
                ));
            }

            let session = command.session_key();
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                state
                    .sessions
                    .entry(session.clone())
                    .or_default()
                    .push_back(Message {
                        command: command.clone(),
                        delivery_count: 0,
                    });
                state.mark_ready(&session);
            }
            self.shared.enqueued.fetch_add(1, Ordering::SeqCst);
            self.shared.notify.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream> {
        let queue = self.clone();
        Box::pin(async move {
            let deliveries: DeliveryStream = Box::pin(stream! {
                loop {
                    // Registered before checking so a concurrent settle is not missed.
                    let notified = queue.shared.notify.notified();
                    if queue.shared.lock().closed {
                        break;
                    }
                    match queue.try_receive() {
                        Some(delivery) => yield Ok(delivery),
                        None => notified.await,
                    }
                }
            });
            Ok(deliveries)
        })
    }
}
