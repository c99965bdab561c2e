//! Counting semaphore with FIFO grant order.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// A counting semaphore that wakes waiters in the order they arrived.
///
/// When no permit is available, `acquire` parks the caller at the tail of a
/// wait queue. `release` hands the permit directly to the head waiter instead
/// of incrementing the shared count, which is what makes the ordering fair
/// under contention.
///
/// A capacity of zero is legal: every `acquire` blocks until its future is
/// dropped. Callers pair each successful `acquire` with exactly one
/// [`release`](Self::release).
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    avail: usize,
    next_waiter_id: u64,
    queue: VecDeque<Waiter>,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

impl Semaphore {
    /// Creates a semaphore with `capacity` initial permits.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                avail: capacity,
                next_waiter_id: 0,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Acquires one permit, waiting in FIFO order if none is available.
    ///
    /// The returned future is cancel-safe: dropping it while queued removes
    /// this caller's waiter, and a permit granted in the same instant as the
    /// drop is returned to the semaphore rather than lost.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().unwrap();
            if state.avail > 0 {
                state.avail -= 1;
                return;
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.queue.push_back(Waiter { id, grant: tx });
            WaitGuard { sem: self, id, rx }
        };
        wait.granted().await;
    }

    /// Releases one permit.
    ///
    /// If waiters are queued, the head waiter receives the permit directly
    /// and the available count is unchanged; otherwise the count is
    /// incremented for future use.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        grant_or_restore(&mut state);
    }

    /// Number of permits currently available (not held by any caller).
    ///
    /// Introspection only; the value may be stale by the time it is read.
    pub fn available(&self) -> usize {
        self.state.lock().unwrap().avail
    }

    /// Number of callers waiting to acquire a permit.
    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

/// Hands a freed permit to the next live waiter, or restores it to `avail`.
fn grant_or_restore(state: &mut State) {
    while let Some(waiter) = state.queue.pop_front() {
        if waiter.grant.send(()).is_ok() {
            return;
        }
        // Receiver vanished mid-cancellation; move on to the next waiter.
    }
    state.avail += 1;
}

/// Queued waiter handle. Dropping it before the grant arrives cancels the
/// wait and withdraws the queue entry.
struct WaitGuard<'a> {
    sem: &'a Semaphore,
    id: u64,
    rx: oneshot::Receiver<()>,
}

impl WaitGuard<'_> {
    async fn granted(mut self) {
        // A waiter's sender is only dropped after a grant or by our own Drop,
        // so a live guard cannot observe a recv error. Once the grant has
        // been read here, the Drop below sees the channel as closed.
        let _ = (&mut self.rx).await;
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.sem.state.lock().unwrap();
        if let Some(pos) = state.queue.iter().position(|w| w.id == self.id) {
            state.queue.remove(pos);
            return;
        }
        // Our entry was already popped by a release. If the grant landed in
        // the channel after we stopped polling, pass it on so the permit is
        // granted or restored exactly once.
        if self.rx.try_recv().is_ok() {
            grant_or_restore(&mut state);
        }
    }
}
