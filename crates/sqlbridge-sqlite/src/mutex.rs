//! FIFO connection lock built on asupersync's async mutex.
//!
//! The mutex provides exclusion and cancellation through [`Cx`]. In front of
//! it sits a ticket queue that lets only the oldest caller contend, so callers
//! are served in the order they first polled [`ConnectionMutex::lock`] and a
//! later caller can never overtake one that is already queued.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use asupersync::sync::{Mutex, OwnedMutexGuard};
use asupersync::{Cx, Outcome};
use sqlbridge_core::{ConnectionErrorKind, Error};

#[derive(Default)]
struct Queue {
    next_ticket: u64,
    waiting: VecDeque<(u64, Option<Waker>)>,
}

type SharedQueue = Arc<std::sync::Mutex<Queue>>;

fn lock_queue(queue: &std::sync::Mutex<Queue>) -> MutexGuard<'_, Queue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue-based mutual exclusion for one connection.
#[derive(Clone)]
pub struct ConnectionMutex {
    inner: Arc<Mutex<()>>,
    queue: SharedQueue,
}

impl Default for ConnectionMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMutex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            queue: SharedQueue::default(),
        }
    }

    /// Wait until every earlier caller has released, then hold the lock.
    ///
    /// Returns `Cancelled` if `cx` is cancelled before the lock is acquired;
    /// the caller leaves the queue and the next one moves up.
    pub async fn lock(&self, cx: &Cx) -> Outcome<ConnectionGuard, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let ticket = Ticket::issue(&self.queue);
        Turn { ticket: &ticket, cx }.await;
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        // Only the front ticket gets here, so nobody can barge past it.
        let locked = OwnedMutexGuard::lock(Arc::clone(&self.inner), cx).await;
        drop(ticket);
        match locked {
            Ok(guard) => Outcome::Ok(ConnectionGuard { _guard: guard }),
            Err(_) => match cx.cancel_reason() {
                Some(reason) => Outcome::Cancelled(reason),
                None => Outcome::Err(Error::connection(
                    ConnectionErrorKind::Lock,
                    "Failed to acquire connection lock",
                )),
            },
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Number of callers queued behind the current holder.
    pub fn waiters(&self) -> usize {
        lock_queue(&self.queue).waiting.len()
    }
}

impl fmt::Debug for ConnectionMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// A place in the queue. Dropping it leaves the queue and, if it was at the
/// front, wakes the caller behind it.
struct Ticket {
    queue: SharedQueue,
    id: u64,
}

impl Ticket {
    fn issue(queue: &SharedQueue) -> Self {
        let mut state = lock_queue(queue);
        let id = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back((id, None));
        drop(state);
        Self {
            queue: Arc::clone(queue),
            id,
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut state = lock_queue(&self.queue);
        let was_front = state.waiting.front().is_some_and(|(id, _)| *id == self.id);
        state.waiting.retain(|(id, _)| *id != self.id);
        let next = if was_front {
            state.waiting.front_mut().and_then(|(_, waker)| waker.take())
        } else {
            None
        };
        drop(state);
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

/// Resolves once the ticket reaches the front or `cx` is cancelled.
struct Turn<'a> {
    ticket: &'a Ticket,
    cx: &'a Cx,
}

impl Future for Turn<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, task: &mut Context<'_>) -> Poll<()> {
        if self.cx.cancel_reason().is_some() {
            return Poll::Ready(());
        }
        let mut state = lock_queue(&self.ticket.queue);
        if state.waiting.front().is_some_and(|(id, _)| *id == self.ticket.id) {
            return Poll::Ready(());
        }
        if let Some((_, waker)) = state.waiting.iter_mut().find(|(id, _)| *id == self.ticket.id) {
            *waker = Some(task.waker().clone());
        }
        Poll::Pending
    }
}

/// Proof of holding the connection lock. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ConnectionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ConnectionGuard {
    /// Release the lock now.
    pub fn unlock(self) {
        drop(self);
    }
}

impl fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard").finish_non_exhaustive()
    }
}
