//! Event delivery: the host-facing handler trait and the two dispatch modes.
//!
//! Inline dispatch awaits the handler on the read loop, so events are handled
//! strictly in receipt order. Pooled dispatch hands events to a bounded queue
//! drained by a fixed set of worker tasks; the read loop only waits when the
//! queue is full and the overflow policy is [`OverflowPolicy::Block`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::{ChannelFault, LinkError};
use crate::event::Event;

// ─── EventHandler ─────────────────────────────────────────────────────────────

/// Host-supplied callbacks for push-channel activity.
///
/// Only [`EventHandler::on_event`] is required.
pub trait EventHandler: Send + Sync + 'static {
    /// Called once per event.
    fn on_event(&self, event: Event) -> impl Future<Output = ()> + Send;

    /// Called each time a connection becomes ready.
    fn on_listening(&self) {}

    /// Called once when the channel stops on a terminal condition.
    fn on_fault(&self, fault: &ChannelFault) {
        let _ = fault;
    }

    /// Called for frames that were dropped and for lost connections.
    fn on_error(&self, issue: FrameIssue<'_>) {
        let _ = issue;
    }
}

/// A non-terminal problem reported through [`EventHandler::on_error`].
#[derive(Clone, Copy, Debug)]
pub enum FrameIssue<'a> {
    /// A frame could not be parsed or decoded and was dropped.
    Malformed(&'a str),
    /// The connection was lost; a reconnect may follow.
    Link(&'a LinkError),
}

impl std::fmt::Display for FrameIssue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(s) => write!(f, "dropped frame: {s}"),
            Self::Link(e)      => write!(f, "connection lost: {e}"),
        }
    }
}

// ─── EventStream ──────────────────────────────────────────────────────────────

/// Handler that forwards events into a channel, for hosts that prefer to pull.
///
/// [`EventSink::new`] never applies backpressure: events pile up in memory
/// for as long as the [`EventStream`] is not drained. [`EventSink::bounded`]
/// holds at most `capacity` events and makes the dispatcher wait for room,
/// which with inline dispatch pauses reading from the connection.
pub struct EventSink {
    tx: SinkTx,
}

enum SinkTx {
    Unbounded(mpsc::UnboundedSender<Event>),
    Bounded(mpsc::Sender<Event>),
}

enum StreamRx {
    Unbounded(mpsc::UnboundedReceiver<Event>),
    Bounded(mpsc::Receiver<Event>),
}

/// Receiving half of an [`EventSink`].
pub struct EventStream {
    rx: StreamRx,
}

impl EventSink {
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: SinkTx::Unbounded(tx) }, EventStream { rx: StreamRx::Unbounded(rx) })
    }

    /// A sink holding at most `capacity` undelivered events.
    pub fn bounded(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: SinkTx::Bounded(tx) }, EventStream { rx: StreamRx::Bounded(rx) })
    }
}

impl EventHandler for EventSink {
    async fn on_event(&self, event: Event) {
        match &self.tx {
            SinkTx::Unbounded(tx) => { let _ = tx.send(event); }
            SinkTx::Bounded(tx)   => { let _ = tx.send(event).await; }
        }
    }
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the channel is dropped.
    pub async fn next(&mut self) -> Option<Event> {
        match &mut self.rx {
            StreamRx::Unbounded(rx) => rx.recv().await,
            StreamRx::Bounded(rx)   => rx.recv().await,
        }
    }
}

// ─── DispatchMode ─────────────────────────────────────────────────────────────

/// What to do with a new event when the worker queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for space. The read loop stalls until a worker frees a slot.
    #[default]
    Block,
    /// Evict the oldest queued event.
    DropOldest,
}

/// How events reach the handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Await the handler on the read loop.
    #[default]
    Inline,
    /// Bounded queue drained by `workers` tasks. Ordering across workers is
    /// not preserved; use one worker to keep receipt order.
    Pooled {
        workers:        usize,
        queue_capacity: usize,
        overflow:       OverflowPolicy,
    },
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

pub(crate) enum Dispatcher<H: EventHandler> {
    Inline(Arc<H>),
    Pooled(WorkerPool),
}

impl<H: EventHandler> Dispatcher<H> {
    pub(crate) fn new(mode: DispatchMode, handler: Arc<H>, cancel: CancellationToken) -> Self {
        match mode {
            DispatchMode::Inline => Self::Inline(handler),
            DispatchMode::Pooled { workers, queue_capacity, overflow } => {
                Self::Pooled(WorkerPool::spawn(handler, workers, queue_capacity, overflow, cancel))
            }
        }
    }

    pub(crate) async fn dispatch(&self, event: Event) {
        match self {
            Self::Inline(h) => h.on_event(event).await,
            Self::Pooled(p) => p.push(event).await,
        }
    }

    /// Stop workers; queued events are discarded.
    pub(crate) fn shutdown(&self) {
        if let Self::Pooled(p) = self {
            p.cancel.cancel();
        }
    }
}

// ─── WorkerPool ───────────────────────────────────────────────────────────────

struct Queue {
    items:       Mutex<VecDeque<Event>>,
    capacity:    usize,
    item_ready:  Notify,
    space_ready: Notify,
}

impl Queue {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct WorkerPool {
    queue:    Arc<Queue>,
    overflow: OverflowPolicy,
    cancel:   CancellationToken,
}

impl WorkerPool {
    fn spawn<H: EventHandler>(
        handler:  Arc<H>,
        workers:  usize,
        capacity: usize,
        overflow: OverflowPolicy,
        cancel:   CancellationToken,
    ) -> Self {
        let queue = Arc::new(Queue {
            items:       Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity:    capacity.max(1),
            item_ready:  Notify::new(),
            space_ready: Notify::new(),
        });
        for id in 0..workers.max(1) {
            let queue   = queue.clone();
            let handler = handler.clone();
            let cancel  = cancel.clone();
            tokio::spawn(async move {
                tracing::trace!("[zpw-channel] worker {id} started");
                worker_loop(queue, handler, cancel).await;
                tracing::trace!("[zpw-channel] worker {id} stopped");
            });
        }
        Self { queue, overflow, cancel }
    }

    async fn push(&self, event: Event) {
        let mut event = Some(event);
        loop {
            {
                let mut q = self.queue.lock();
                if q.len() < self.queue.capacity {
                    q.extend(event.take());
                } else if self.overflow == OverflowPolicy::DropOldest {
                    q.pop_front();
                    q.extend(event.take());
                    tracing::warn!("[zpw-channel] dispatch queue full, dropped oldest event");
                }
            }
            if event.is_none() {
                self.queue.item_ready.notify_one();
                return;
            }
            tokio::select! {
                _ = self.queue.space_ready.notified() => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

async fn worker_loop<H: EventHandler>(queue: Arc<Queue>, handler: Arc<H>, cancel: CancellationToken) {
    loop {
        let next = {
            let mut q = queue.lock();
            let next = q.pop_front();
            if next.is_some() && !q.is_empty() {
                queue.item_ready.notify_one();
            }
            next
        };
        match next {
            Some(event) => {
                queue.space_ready.notify_one();
                tokio::select! {
                    _ = handler.on_event(event) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            None => tokio::select! {
                _ = queue.item_ready.notified() => {}
                _ = cancel.cancelled() => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter(AtomicUsize);

    impl EventHandler for Counter {
        async fn on_event(&self, _: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Stuck;

    impl EventHandler for Stuck {
        async fn on_event(&self, _: Event) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test]
    async fn pooled_delivers_everything() {
        let h = Arc::new(Counter(AtomicUsize::new(0)));
        let mode = DispatchMode::Pooled { workers: 3, queue_capacity: 4, overflow: OverflowPolicy::Block };
        let d = Dispatcher::new(mode, h.clone(), CancellationToken::new());
        for _ in 0..50 {
            d.dispatch(Event::SessionTakeover).await;
        }
        for _ in 0..100 {
            if h.0.load(Ordering::SeqCst) == 50 { break; }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.0.load(Ordering::SeqCst), 50);
        d.shutdown();
    }

    #[tokio::test]
    async fn drop_oldest_never_blocks() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::new(Stuck), 1, 2, OverflowPolicy::DropOldest, cancel.clone());
        // The single worker takes one event and never finishes it; the rest
        // must not stall the producer.
        let fill = async {
            for _ in 0..10 {
                pool.push(Event::SessionTakeover).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), fill).await.unwrap();
        assert!(pool.queued() <= 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn block_waits_for_space() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::new(Stuck), 1, 1, OverflowPolicy::Block, cancel.clone());
        pool.push(Event::SessionTakeover).await;
        tokio::time::sleep(Duration::from_millis(50)).await; // worker takes it
        pool.push(Event::SessionTakeover).await;             // fills the queue
        let third = tokio::time::timeout(Duration::from_millis(100), pool.push(Event::SessionTakeover)).await;
        assert!(third.is_err(), "push should block while the queue is full");
        cancel.cancel();
    }

    #[tokio::test]
    async fn bounded_sink_waits_for_room() {
        let (sink, mut stream) = EventSink::bounded(1);
        sink.on_event(Event::SessionTakeover).await;
        let second = tokio::time::timeout(Duration::from_millis(100), sink.on_event(Event::SessionTakeover)).await;
        assert!(second.is_err(), "a full sink should hold the dispatcher");
        assert_eq!(stream.next().await, Some(Event::SessionTakeover));
        tokio::time::timeout(Duration::from_secs(1), sink.on_event(Event::SessionTakeover)).await.unwrap();
        assert_eq!(stream.next().await, Some(Event::SessionTakeover));
    }

    #[tokio::test]
    async fn event_sink_forwards() {
        let (sink, mut stream) = EventSink::new();
        sink.on_event(Event::SessionTakeover).await;
        assert_eq!(stream.next().await, Some(Event::SessionTakeover));
    }
}
