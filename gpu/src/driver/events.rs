//! Pending-completion queue shared by the drivers.
//!
//! Drivers complete asynchronous requests by scheduling an event. Events only
//! fire while someone pumps the queue through [`EventQueue::process_events`]
//! or waits on a future through [`EventQueue::wait_any`], so callbacks always
//! run on the pumping thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::broker::{FutureId, WaitStatus};

struct PendingEvent {
    id: FutureId,
    /// `None` never becomes ready.
    ready_at: Option<Instant>,
    fire: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct EventState {
    next_id: u64,
    pending: Vec<PendingEvent>,
}

/// Queue of scheduled completions.
#[derive(Default)]
pub(crate) struct EventQueue {
    state: Mutex<EventState>,
    changed: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a future id.
    pub fn next_id(&self) -> FutureId {
        let mut state = self.state.lock();
        state.next_id += 1;
        FutureId(state.next_id)
    }

    /// Schedule `fire` to run once `ready_at` has passed.
    pub fn schedule(
        &self,
        id: FutureId,
        ready_at: Option<Instant>,
        fire: impl FnOnce() + Send + 'static,
    ) {
        self.state.lock().pending.push(PendingEvent {
            id,
            ready_at,
            fire: Box::new(fire),
        });
        self.changed.notify_all();
    }

    /// Register `id` as in flight with nothing to fire yet.
    ///
    /// Waiters block on it until [`EventQueue::resolve`] supplies the
    /// completion.
    pub fn reserve(&self, id: FutureId) {
        self.schedule(id, None, || {});
    }

    /// Make a reserved event ready to fire `fire`.
    ///
    /// Returns `false`, dropping `fire`, if the event was abandoned.
    pub fn resolve(&self, id: FutureId, fire: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.state.lock();
        let Some(event) = state.pending.iter_mut().find(|event| event.id == id) else {
            return false;
        };
        event.ready_at = Some(Instant::now());
        event.fire = Box::new(fire);
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Run `work` on a worker thread and resolve `id` with the completion it
    /// returns.
    ///
    /// The caller gets control back immediately; waiters on `id` block until
    /// the worker is done. If no thread can be spawned the completion is
    /// dropped and `id` resolves to nothing.
    pub fn complete_on_worker<F, C>(self: &Arc<Self>, id: FutureId, name: &str, work: F)
    where
        F: FnOnce() -> C + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.reserve(id);
        let events = self.clone();
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let fire = work();
                if !events.resolve(id, fire) {
                    log::debug!("future {} was abandoned before it completed", id.0);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn {} worker: {}", name, e);
            self.resolve(id, || {});
        }
    }

    /// Fire every ready event. Returns how many fired.
    pub fn process_events(&self) -> usize {
        let now = Instant::now();
        let ready: Vec<PendingEvent> = {
            let mut state = self.state.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|event| event.ready_at.is_some_and(|at| at <= now));
            state.pending = waiting;
            ready
        };

        let fired = ready.len();
        for event in ready {
            log::trace!("firing future {}", event.id.0);
            (event.fire)();
        }
        if fired > 0 {
            self.changed.notify_all();
        }
        fired
    }

    /// Pump the queue until `id` has fired or `timeout` elapses.
    ///
    /// `None` waits without bound.
    pub fn wait_any(&self, id: FutureId, timeout: Option<Duration>) -> WaitStatus {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            self.process_events();

            let mut state = self.state.lock();
            let Some(target) = state.pending.iter().find(|event| event.id == id) else {
                return WaitStatus::Completed;
            };
            if target.ready_at.is_some_and(|at| at <= Instant::now()) {
                // Became ready after the last pump.
                continue;
            }

            let next_ready = state
                .pending
                .iter()
                .filter_map(|event| event.ready_at)
                .min();
            let wake = match (next_ready, deadline) {
                (Some(ready), Some(deadline)) => Some(ready.min(deadline)),
                (ready, deadline) => ready.or(deadline),
            };

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return WaitStatus::TimedOut;
            }

            match wake {
                Some(wake) => {
                    self.changed.wait_until(&mut state, wake);
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// Number of events that have not fired yet.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drop every pending event without firing it.
    pub fn abandon_all(&self) -> usize {
        let abandoned = std::mem::take(&mut self.state.lock().pending);
        let count = abandoned.len();
        drop(abandoned);
        self.changed.notify_all();
        count
    }
}
