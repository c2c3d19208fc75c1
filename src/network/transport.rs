//! Transport Contract
//!
//! One bounded FIFO per direction, a rebindable sink for inbound signals, and
//! exactly-once reporting of terminal conditions. The two backends only differ
//! in how bytes reach the peer; everything the application sees lives here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::integrity::{IntegrityError, Stamper};
use crate::core::signal::Signal;
use crate::network::direct::DirectTransport;
use crate::network::relayed::RelayedTransport;
use crate::store::StoreError;

/// Receives inbound signals and terminal conditions.
///
/// Callbacks run on the transport's tasks; keep them short.
pub trait SignalSink: Send + Sync {
    /// A signal arrived.
    fn on_signal(&self, signal: Signal);

    /// The outbound channel could not be established or broke; queued
    /// signals were dropped.
    fn on_transfer_failed(&self);

    /// The peer went away (stream closed, mailbox removed).
    fn on_disconnect(&self);
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Outgoing queue is full.
    #[error("outgoing queue is full")]
    QueueFull,
    /// Transport is closed or its outbound channel failed.
    #[error("transport is closed")]
    Closed,
    /// Listening port could not be bound.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Port requested.
        port: u16,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Own mailbox already exists in the store.
    #[error("mailbox already exists: {0}")]
    MailboxInUse(String),
    /// Store failure while opening.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Payload could not be stamped.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),
}

/// Which backend a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Same-subnet TCP.
    Direct,
    /// Store-relayed mailboxes.
    Relayed,
}

/// Current sink plus once-flags for terminal callbacks.
pub(crate) struct SinkSlot {
    sink: watch::Sender<Arc<dyn SignalSink>>,
    failed: AtomicBool,
    disconnected: AtomicBool,
}

impl SinkSlot {
    fn new(sink: Arc<dyn SignalSink>) -> Arc<Self> {
        let (sink, _) = watch::channel(sink);
        Arc::new(Self {
            sink,
            failed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        })
    }

    fn rebind(&self, sink: Arc<dyn SignalSink>) {
        self.sink.send_replace(sink);
    }

    fn current(&self) -> Arc<dyn SignalSink> {
        self.sink.borrow().clone()
    }

    pub(crate) fn deliver(&self, signal: Signal) {
        debug!(%signal, "signal received");
        self.current().on_signal(signal);
    }

    pub(crate) fn transfer_failed(&self) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            warn!("transfer failed");
            self.current().on_transfer_failed();
        }
    }

    pub(crate) fn disconnected(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            warn!("peer disconnected");
            self.current().on_disconnect();
        }
    }
}

/// Plumbing shared by both backends: outgoing queue, sink slot, task handles
/// and the shutdown channel.
pub(crate) struct Link {
    slot: Arc<SinkSlot>,
    outbox: Option<mpsc::Sender<Signal>>,
    shutdown_tx: broadcast::Sender<()>,
    inbound: Option<JoinHandle<()>>,
    outbound: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Link {
    /// New link and the receiving end of its outgoing queue.
    pub(crate) fn new(
        sink: Arc<dyn SignalSink>,
        capacity: usize,
        drain_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Signal>) {
        let (outbox, outbox_rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let link = Self {
            slot: SinkSlot::new(sink),
            outbox: Some(outbox),
            shutdown_tx,
            inbound: None,
            outbound: None,
            drain_timeout,
        };
        (link, outbox_rx)
    }

    pub(crate) fn slot(&self) -> Arc<SinkSlot> {
        Arc::clone(&self.slot)
    }

    pub(crate) fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn attach(&mut self, inbound: JoinHandle<()>, outbound: JoinHandle<()>) {
        self.inbound = Some(inbound);
        self.outbound = Some(outbound);
    }

    pub(crate) fn listen(&self, sink: Arc<dyn SignalSink>) {
        self.slot.rebind(sink);
    }

    pub(crate) fn send(&self, signal: Signal) -> Result<(), TransportError> {
        let outbox = self.outbox.as_ref().ok_or(TransportError::Closed)?;
        match outbox.try_send(signal) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull),
            Err(TrySendError::Closed(_)) => {
                self.slot.transfer_failed();
                Err(TransportError::Closed)
            }
        }
    }

    /// Enqueue all of `signals` back to back, or none of them when the queue
    /// lacks room. Slots are reserved up front so a concurrent `send` cannot
    /// split the batch.
    pub(crate) fn send_all(&self, signals: &[Signal]) -> Result<(), TransportError> {
        let outbox = self.outbox.as_ref().ok_or(TransportError::Closed)?;
        let permits = match outbox.try_reserve_many(signals.len()) {
            Ok(permits) => permits,
            Err(TrySendError::Full(())) => return Err(TransportError::QueueFull),
            Err(TrySendError::Closed(())) => {
                self.slot.transfer_failed();
                return Err(TransportError::Closed);
            }
        };
        for (permit, signal) in permits.zip(signals) {
            permit.send(*signal);
        }
        Ok(())
    }

    /// Enqueue a payload preceded by its check value. The stamper only
    /// advances when both were queued.
    pub(crate) fn send_checked(
        &self,
        stamper: &mut Stamper,
        payload: Signal,
    ) -> Result<(), TransportError> {
        let mut next = stamper.clone();
        let pair = next.stamp(payload)?;
        self.send_all(&pair)?;
        *stamper = next;
        Ok(())
    }

    /// Drain the outgoing queue, then stop both tasks. Idempotent.
    pub(crate) async fn shutdown(&mut self) {
        // Dropping the sender lets the outbound task finish once the queue is empty.
        self.outbox.take();

        if let Some(mut outbound) = self.outbound.take() {
            if tokio::time::timeout(self.drain_timeout, &mut outbound).await.is_err() {
                warn!(timeout = ?self.drain_timeout, "outgoing queue did not drain; dropping");
                outbound.abort();
            }
        }

        let _ = self.shutdown_tx.send(());
        if let Some(mut inbound) = self.inbound.take() {
            if tokio::time::timeout(self.drain_timeout, &mut inbound).await.is_err() {
                inbound.abort();
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.outbound.take() {
            handle.abort();
        }
        if let Some(handle) = self.inbound.take() {
            handle.abort();
        }
    }
}

/// A per-match transport, selected once.
pub enum Transport {
    /// Same-subnet TCP.
    Direct(DirectTransport),
    /// Store-relayed mailboxes.
    Relayed(RelayedTransport),
}

impl Transport {
    /// Backend in use.
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Direct(_) => TransportKind::Direct,
            Transport::Relayed(_) => TransportKind::Relayed,
        }
    }

    fn link(&self) -> &Link {
        match self {
            Transport::Direct(t) => t.link(),
            Transport::Relayed(t) => t.link(),
        }
    }

    /// Enqueue a signal. Never blocks.
    pub fn send(&self, signal: Signal) -> Result<(), TransportError> {
        self.link().send(signal)
    }

    /// Enqueue a payload preceded by its check value.
    pub fn send_checked(&self, stamper: &mut Stamper, payload: Signal) -> Result<(), TransportError> {
        self.link().send_checked(stamper, payload)
    }

    /// Redirect inbound signals to `sink`.
    pub fn listen(&self, sink: Arc<dyn SignalSink>) {
        self.link().listen(sink);
    }

    /// Drain and release everything. Idempotent.
    pub async fn close(&mut self) {
        match self {
            Transport::Direct(t) => t.close().await,
            Transport::Relayed(t) => t.close().await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    use crate::core::integrity::check_value;

    /// Records everything a transport reports.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub signals: Mutex<Vec<Signal>>,
        pub failures: Mutex<usize>,
        pub disconnects: Mutex<usize>,
        pub notify: Notify,
    }

    impl RecordingSink {
        pub(crate) fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }

        pub(crate) fn failures(&self) -> usize {
            *self.failures.lock().unwrap()
        }

        pub(crate) fn disconnects(&self) -> usize {
            *self.disconnects.lock().unwrap()
        }

        /// Wait until `done` holds, re-checking after every callback.
        pub(crate) async fn wait_for(&self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
            tokio::time::timeout(timeout, async {
                loop {
                    let notified = self.notify.notified();
                    if done(self) {
                        return;
                    }
                    notified.await;
                }
            })
            .await
            .is_ok()
        }
    }

    impl SignalSink for RecordingSink {
        fn on_signal(&self, signal: Signal) {
            self.signals.lock().unwrap().push(signal);
            self.notify.notify_waiters();
        }

        fn on_transfer_failed(&self) {
            *self.failures.lock().unwrap() += 1;
            self.notify.notify_waiters();
        }

        fn on_disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
            self.notify.notify_waiters();
        }
    }

    #[tokio::test]
    async fn test_terminal_callbacks_fire_once() {
        let sink = Arc::new(RecordingSink::default());
        let slot = SinkSlot::new(sink.clone());

        slot.transfer_failed();
        slot.transfer_failed();
        slot.disconnected();
        slot.disconnected();

        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_rebind_redirects_delivery() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let slot = SinkSlot::new(first.clone());

        slot.deliver(Signal::ACK);
        slot.rebind(second.clone());
        slot.deliver(Signal::GAME_OVER);

        assert_eq!(first.signals(), vec![Signal::ACK]);
        assert_eq!(second.signals(), vec![Signal::GAME_OVER]);
    }

    #[tokio::test]
    async fn test_link_queue_bounds() {
        let sink = Arc::new(RecordingSink::default());
        let (link, mut rx) = Link::new(sink.clone(), 2, Duration::from_millis(100));

        link.send(Signal::NULL).unwrap();
        assert!(matches!(
            link.send_all(&[Signal::ACK, Signal::ACK]),
            Err(TransportError::QueueFull)
        ));
        link.send(Signal::ACK).unwrap();
        assert!(matches!(link.send(Signal::ACK), Err(TransportError::QueueFull)));

        assert_eq!(rx.recv().await, Some(Signal::NULL));
        assert_eq!(rx.recv().await, Some(Signal::ACK));
    }

    #[tokio::test]
    async fn test_full_queue_does_not_advance_stamper() {
        let sink = Arc::new(RecordingSink::default());
        let (link, mut rx) = Link::new(sink, 3, Duration::from_millis(100));
        let mut stamper = Stamper::new();
        let move_3 = Signal::payload(3).unwrap();

        link.send(Signal::NULL).unwrap();
        link.send(Signal::NULL).unwrap();
        assert!(matches!(
            link.send_checked(&mut stamper, move_3),
            Err(TransportError::QueueFull)
        ));
        assert_eq!(stamper.sequence(), 0);

        assert_eq!(rx.recv().await, Some(Signal::NULL));
        assert_eq!(rx.recv().await, Some(Signal::NULL));
        link.send(Signal::ACK).unwrap();
        link.send_checked(&mut stamper, move_3).unwrap();
        assert_eq!(rx.recv().await, Some(Signal::ACK));
        assert_eq!(stamper.sequence(), 1);
        assert_eq!(rx.recv().await, Some(check_value(0, move_3)));
        assert_eq!(rx.recv().await, Some(move_3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_racing_send_never_splits_a_checked_pair() {
        let sink = Arc::new(RecordingSink::default());
        let move_5 = Signal::payload(5).unwrap();

        for _ in 0..500 {
            let (link, mut rx) = Link::new(sink.clone(), 2, Duration::from_millis(100));
            let link = Arc::new(link);
            let racer = {
                let link = Arc::clone(&link);
                std::thread::spawn(move || {
                    let _ = link.send(Signal::TIME_OUT_SYNC);
                })
            };
            let mut stamper = Stamper::new();
            let paired = link.send_checked(&mut stamper, move_5).is_ok();
            racer.join().unwrap();

            let mut queued = Vec::new();
            while let Ok(signal) = rx.try_recv() {
                queued.push(signal);
            }
            if paired {
                assert_eq!(queued, vec![check_value(0, move_5), move_5]);
                assert_eq!(stamper.sequence(), 1);
            } else {
                assert_eq!(queued, vec![Signal::TIME_OUT_SYNC]);
                assert_eq!(stamper.sequence(), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_send_after_outbound_failure_reports_once() {
        let sink = Arc::new(RecordingSink::default());
        let (link, rx) = Link::new(sink.clone(), 4, Duration::from_millis(100));
        drop(rx);

        assert!(matches!(link.send(Signal::NULL), Err(TransportError::Closed)));
        assert!(matches!(link.send(Signal::NULL), Err(TransportError::Closed)));
        assert_eq!(sink.failures(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let (mut link, _rx) = Link::new(sink, 4, Duration::from_millis(50));
        link.shutdown().await;
        link.shutdown().await;
        assert!(matches!(link.send(Signal::NULL), Err(TransportError::Closed)));
    }
}
