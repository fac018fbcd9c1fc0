//! Per-handle rx worker for deferred events.
//!
//! Inbound buffers routed to [`RxContext::Deferred`](crate::RxContext) are
//! pushed on a locked FIFO; a dedicated thread pops them in order and hands each
//! to the processing closure. A companion watchdog thread watches the event in
//! flight and reports a handler that is still running past its deadline.
//! Shutdown drains whatever is still queued, stops both threads and joins them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::warn;

use transport::MsgBuf;

/// A raw inbound frame (header included) waiting for the worker.
pub(crate) struct DeferredEvent {
    pub id: u32,
    pub buf: MsgBuf,
}

#[derive(Clone, Copy)]
struct InFlight {
    id: u32,
    seq: u64,
    started: Instant,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<DeferredEvent>,
    in_flight: Option<InFlight>,
    next_seq: u64,
    stopped: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    ready: Condvar,
    /// Signalled whenever `in_flight` changes or the queue stops.
    busy: Condvar,
}

pub(crate) struct Worker {
    queue: Arc<Queue>,
    thread: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Queue::default()),
            thread: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    /// Starts the worker thread and its watchdog. `process` runs once per
    /// queued event; `on_overrun` runs once for each event whose handler is
    /// still busy `watchdog` after it started.
    pub fn start<F, W>(
        &self,
        name: String,
        watchdog: Duration,
        mut process: F,
        on_overrun: W,
    ) -> std::io::Result<()>
    where
        F: FnMut(DeferredEvent) + Send + 'static,
        W: Fn(u32, Duration) + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let monitor = thread::Builder::new()
            .name(format!("{name}-wd"))
            .spawn(move || watch(&queue, watchdog, on_overrun))?;
        *self.watchdog.lock() = Some(monitor);

        let queue = Arc::clone(&self.queue);
        let spawned = thread::Builder::new().name(name).spawn(move || loop {
            let event = {
                let mut state = queue.state.lock();
                let event = loop {
                    if state.stopped {
                        return;
                    }
                    if let Some(event) = state.items.pop_front() {
                        break event;
                    }
                    queue.ready.wait(&mut state);
                };
                let seq = state.next_seq;
                state.next_seq += 1;
                state.in_flight = Some(InFlight {
                    id: event.id,
                    seq,
                    started: Instant::now(),
                });
                event
            };
            queue.busy.notify_all();
            process(event);
            queue.state.lock().in_flight = None;
            queue.busy.notify_all();
        });
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shutdown();
                Err(err)
            }
        }
    }

    /// Queues an event. Hands it back if the worker has been stopped.
    pub fn enqueue(&self, event: DeferredEvent) -> Result<(), DeferredEvent> {
        let mut state = self.queue.state.lock();
        if state.stopped {
            return Err(event);
        }
        state.items.push_back(event);
        drop(state);
        self.queue.ready.notify_one();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.state.lock().items.len()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Frees every queued event, stops both threads and waits for them to
    /// exit. Returns how many events were discarded.
    pub fn shutdown(&self) -> usize {
        let drained = {
            let mut state = self.queue.state.lock();
            state.stopped = true;
            std::mem::take(&mut state.items)
        };
        self.queue.ready.notify_all();
        self.queue.busy.notify_all();
        let count = drained.len();
        drop(drained);
        join(&self.watchdog, "rx watchdog");
        join(&self.thread, "rx worker");
        count
    }
}

/// Sleeps until the event in flight passes its deadline, then reports it once.
fn watch<W>(queue: &Queue, watchdog: Duration, on_overrun: W)
where
    W: Fn(u32, Duration),
{
    let mut reported = None;
    let mut state = queue.state.lock();
    while !state.stopped {
        match state.in_flight {
            Some(current) if reported != Some(current.seq) => {
                let deadline = current.started + watchdog;
                if Instant::now() < deadline {
                    queue.busy.wait_until(&mut state, deadline);
                    continue;
                }
                reported = Some(current.seq);
                let elapsed = current.started.elapsed();
                MutexGuard::unlocked(&mut state, || {
                    warn!(
                        "deferred handler for event {:#x} still running after {elapsed:?}",
                        current.id
                    );
                    on_overrun(current.id, elapsed);
                });
            }
            _ => queue.busy.wait(&mut state),
        }
    }
}

fn join(slot: &Mutex<Option<JoinHandle<()>>>, what: &str) {
    let Some(handle) = slot.lock().take() else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("{what} panicked");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
