//! Relayed Transport
//!
//! Peers on different subnets exchange signals through two mailbox resources
//! in the shared store. Each side reads its own mailbox and writes the other's,
//! one decimal integer per line. The writer only appends when the opponent's
//! mailbox is empty, so a mailbox never holds more than one undelivered signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::core::signal::Signal;
use crate::network::transport::{Link, SignalSink, SinkSlot, TransportError};
use crate::store::{lines_of, RemoteTextStore, StoreError};

/// Store-relayed transport.
pub struct RelayedTransport {
    link: Link,
    store: Arc<dyn RemoteTextStore>,
    inbox: String,
    peer_inbox: String,
    inbox_deleted: bool,
}

impl RelayedTransport {
    /// Create `inbox` and start exchanging signals with `peer_inbox`.
    ///
    /// Returns immediately; the wait for the opponent's mailbox happens in the
    /// background and signals sent meanwhile are queued.
    #[instrument(skip(store, config, sink))]
    pub async fn open(
        inbox: String,
        peer_inbox: String,
        store: Arc<dyn RemoteTextStore>,
        config: &RelayConfig,
        sink: Arc<dyn SignalSink>,
    ) -> Result<Self, TransportError> {
        if store.exists(&inbox).await? {
            return Err(TransportError::MailboxInUse(inbox));
        }
        store.create(&inbox).await?;

        let (mut link, outbox) = Link::new(sink, config.queue_capacity, config.drain_timeout);
        let inbound = tokio::spawn(run_inbound(
            Arc::clone(&store),
            inbox.clone(),
            config.read_interval,
            link.slot(),
            link.subscribe_shutdown(),
        ));
        let outbound = tokio::spawn(run_outbound(
            Arc::clone(&store),
            peer_inbox.clone(),
            config.clone(),
            outbox,
            link.slot(),
        ));
        link.attach(inbound, outbound);

        info!(%inbox, %peer_inbox, "relayed transport open");
        Ok(Self {
            link,
            store,
            inbox,
            peer_inbox,
            inbox_deleted: false,
        })
    }

    /// Mailbox this side reads.
    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// Mailbox this side writes.
    pub fn peer_inbox(&self) -> &str {
        &self.peer_inbox
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    /// Drain queued signals, stop polling and delete the own mailbox.
    pub async fn close(&mut self) {
        self.link.shutdown().await;

        if !self.inbox_deleted {
            self.inbox_deleted = true;
            match self.store.delete(&self.inbox).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!(inbox = %self.inbox, error = %e, "failed to delete mailbox"),
            }
        }
        debug!(inbox = %self.inbox, "relayed transport closed");
    }
}

/// Poll the own mailbox and deliver whatever the opponent wrote.
async fn run_inbound(
    store: Arc<dyn RemoteTextStore>,
    inbox: String,
    read_interval: Duration,
    slot: Arc<SinkSlot>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(read_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => return,
        }

        let content = match store.read(&inbox).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => {
                warn!(%inbox, "own mailbox vanished");
                slot.disconnected();
                return;
            }
            Err(e) => {
                warn!(%inbox, error = %e, "mailbox read failed");
                slot.transfer_failed();
                return;
            }
        };

        let lines: Vec<String> = lines_of(&content).map(str::to_string).collect();
        if lines.is_empty() {
            continue;
        }
        // Consume before delivering so a slow sink cannot see a line twice.
        if let Err(e) = store.remove_lines(&inbox, &lines).await {
            warn!(%inbox, error = %e, "mailbox consume failed");
            slot.transfer_failed();
            return;
        }

        for line in &lines {
            match line.parse::<Signal>() {
                Ok(signal) => slot.deliver(signal),
                Err(e) => warn!(%inbox, error = %e, "dropping unparseable mailbox line"),
            }
        }
    }
}

/// Wait for the opponent's mailbox, then move queued signals into it one at a
/// time until the queue closes.
async fn run_outbound(
    store: Arc<dyn RemoteTextStore>,
    peer_inbox: String,
    config: RelayConfig,
    mut outbox: mpsc::Receiver<Signal>,
    slot: Arc<SinkSlot>,
) {
    match await_mailbox(store.as_ref(), &peer_inbox, &config).await {
        Ok(true) => debug!(%peer_inbox, "opponent mailbox present"),
        Ok(false) => {
            warn!(%peer_inbox, timeout = ?config.mailbox_timeout, "opponent mailbox never appeared");
            outbox.close();
            slot.transfer_failed();
            return;
        }
        Err(e) => {
            warn!(%peer_inbox, error = %e, "handshake failed");
            outbox.close();
            slot.transfer_failed();
            return;
        }
    }

    let mut ticker = interval(config.write_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Option<Signal> = None;

    loop {
        ticker.tick().await;

        if pending.is_none() {
            match outbox.try_recv() {
                Ok(signal) => pending = Some(signal),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!(%peer_inbox, "outgoing queue drained");
                    return;
                }
            }
        }

        let content = match store.read(&peer_inbox).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => {
                if pending.is_some() {
                    warn!(%peer_inbox, "opponent mailbox vanished with signals queued");
                    outbox.close();
                    slot.transfer_failed();
                } else {
                    slot.disconnected();
                }
                return;
            }
            Err(e) => {
                warn!(%peer_inbox, error = %e, "opponent mailbox read failed");
                outbox.close();
                slot.transfer_failed();
                return;
            }
        };

        let Some(signal) = pending else {
            continue;
        };
        // One-slot semaphore: the opponent has not consumed the last signal yet.
        if lines_of(&content).next().is_some() {
            continue;
        }
        if let Err(e) = store.append_line(&peer_inbox, &signal.to_string()).await {
            warn!(%peer_inbox, error = %e, "mailbox write failed");
            outbox.close();
            slot.transfer_failed();
            return;
        }
        debug!(%signal, "signal relayed");
        pending = None;
    }
}

/// Whether `name` exists before `mailbox_timeout` runs out.
async fn await_mailbox(
    store: &dyn RemoteTextStore,
    name: &str,
    config: &RelayConfig,
) -> Result<bool, StoreError> {
    let deadline = Instant::now() + config.mailbox_timeout;
    loop {
        if store.exists(name).await? {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        sleep(config.mailbox_check_interval.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use crate::core::integrity::{IntegrityError, Stamper, Verified, Verifier};
    use crate::network::transport::tests::RecordingSink;
    use crate::network::transport::Transport;
    use crate::store::{MemoryStore, MATCHMAKING_QUEUE};

    /// Runs every inbound signal through a [`Verifier`].
    #[derive(Default)]
    struct VerifyingSink {
        verifier: Mutex<Verifier>,
        outcomes: Mutex<Vec<Result<Verified, IntegrityError>>>,
        notify: Notify,
    }

    impl VerifyingSink {
        fn outcomes(&self) -> Vec<Result<Verified, IntegrityError>> {
            self.outcomes.lock().unwrap().clone()
        }

        async fn wait_for_outcomes(&self, n: usize) -> bool {
            tokio::time::timeout(WAIT, async {
                loop {
                    let notified = self.notify.notified();
                    if self.outcomes.lock().unwrap().len() >= n {
                        return;
                    }
                    notified.await;
                }
            })
            .await
            .is_ok()
        }
    }

    impl SignalSink for VerifyingSink {
        fn on_signal(&self, signal: Signal) {
            let outcome = self.verifier.lock().unwrap().observe(signal);
            self.outcomes.lock().unwrap().push(outcome);
            self.notify.notify_waiters();
        }

        fn on_transfer_failed(&self) {}

        fn on_disconnect(&self) {}
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> RelayConfig {
        RelayConfig {
            read_interval: Duration::from_millis(5),
            write_interval: Duration::from_millis(5),
            mailbox_check_interval: Duration::from_millis(10),
            mailbox_timeout: Duration::from_secs(2),
            queue_capacity: 64,
            drain_timeout: Duration::from_secs(2),
        }
    }

    async fn open(
        store: &MemoryStore,
        inbox: &str,
        peer_inbox: &str,
        config: &RelayConfig,
    ) -> (RelayedTransport, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let transport = RelayedTransport::open(
            inbox.to_string(),
            peer_inbox.to_string(),
            Arc::new(store.clone()),
            config,
            sink.clone(),
        )
        .await
        .unwrap();
        (transport, sink)
    }

    #[tokio::test]
    async fn test_signal_crosses_and_mailbox_is_emptied() {
        let store = MemoryStore::new();
        let config = fast_config();
        let (mut a, _sink_a) = open(&store, "1-1-1-1-1.txt", "2-2-2-2-2.txt", &config).await;
        let (mut b, sink_b) = open(&store, "2-2-2-2-2.txt", "1-1-1-1-1.txt", &config).await;

        a.link().send(Signal::payload(3).unwrap()).unwrap();

        assert!(sink_b.wait_for(WAIT, |s| !s.signals().is_empty()).await);
        assert_eq!(sink_b.signals(), vec![Signal::payload(3).unwrap()]);
        assert_eq!(store.read("2-2-2-2-2.txt").await.unwrap(), "");

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let store = MemoryStore::new();
        let config = fast_config();
        let (mut a, _sink_a) = open(&store, "a.txt", "b.txt", &config).await;
        let (mut b, sink_b) = open(&store, "b.txt", "a.txt", &config).await;

        let sent = vec![
            Signal::payload(0).unwrap(),
            Signal::payload(6).unwrap(),
            Signal::ACK,
            Signal::payload(6).unwrap(),
            Signal::GAME_OVER,
        ];
        for s in &sent {
            a.link().send(*s).unwrap();
        }

        assert!(sink_b.wait_for(WAIT, |s| s.signals().len() == sent.len()).await);
        assert_eq!(sink_b.signals(), sent);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_missing_peer_mailbox_fails_after_timeout() {
        let store = MemoryStore::new();
        let config = RelayConfig {
            mailbox_timeout: Duration::from_millis(300),
            ..fast_config()
        };
        let started = Instant::now();
        let (mut t, sink) = open(&store, "mine.txt", "never.txt", &config).await;
        t.link().send(Signal::NULL).unwrap();

        assert!(sink.wait_for(WAIT, |s| s.failures() == 1).await);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(matches!(t.link().send(Signal::NULL), Err(TransportError::Closed)));
        assert_eq!(sink.failures(), 1);

        t.close().await;
    }

    #[tokio::test]
    async fn test_existing_inbox_is_refused() {
        let store = MemoryStore::new();
        store.create("taken.txt").await.unwrap();
        let sink = Arc::new(RecordingSink::default());

        let result = RelayedTransport::open(
            "taken.txt".to_string(),
            "other.txt".to_string(),
            Arc::new(store.clone()),
            &fast_config(),
            sink,
        )
        .await;
        assert!(matches!(result, Err(TransportError::MailboxInUse(_))));
    }

    #[tokio::test]
    async fn test_close_deletes_only_own_mailbox() {
        let store = MemoryStore::new();
        store.append_line(MATCHMAKING_QUEUE, "10.0.0.1/24,0,x.txt").await.unwrap();
        store.create("theirs.txt").await.unwrap();
        let (mut t, _sink) = open(&store, "mine.txt", "theirs.txt", &fast_config()).await;

        t.close().await;
        t.close().await;

        assert_eq!(
            store.names().await,
            vec![MATCHMAKING_QUEUE.to_string(), "theirs.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn test_peer_mailbox_removal_is_a_disconnect() {
        let store = MemoryStore::new();
        let config = fast_config();
        let (mut a, sink_a) = open(&store, "a.txt", "b.txt", &config).await;
        let (mut b, _sink_b) = open(&store, "b.txt", "a.txt", &config).await;

        b.close().await;

        assert!(sink_a.wait_for(WAIT, |s| s.disconnects() == 1).await);
        assert_eq!(sink_a.failures(), 0);

        a.close().await;
    }

    #[tokio::test]
    async fn test_vanished_mailbox_with_pending_signal_is_a_failure() {
        let store = MemoryStore::new();
        let config = fast_config();
        // Peer mailbox holds an unconsumed signal, so ours stays pending.
        store.append_line("b.txt", "1").await.unwrap();
        let (mut a, sink) = open(&store, "a.txt", "b.txt", &config).await;
        a.link().send(Signal::payload(2).unwrap()).unwrap();

        sleep(Duration::from_millis(50)).await;
        store.delete("b.txt").await.unwrap();

        assert!(sink.wait_for(WAIT, |s| s.failures() == 1).await);
        assert_eq!(sink.disconnects(), 0);

        a.close().await;
    }

    #[tokio::test]
    async fn test_checked_moves_verify_on_arrival() {
        let store = MemoryStore::new();
        let config = fast_config();
        let (a, _sink_a) = open(&store, "a.txt", "b.txt", &config).await;
        let verifying = Arc::new(VerifyingSink::default());
        let mut b = RelayedTransport::open(
            "b.txt".to_string(),
            "a.txt".to_string(),
            Arc::new(store.clone()),
            &config,
            verifying.clone(),
        )
        .await
        .unwrap();

        let mut sender = Transport::Relayed(a);
        let mut stamper = Stamper::new();
        let moves: Vec<Signal> = [3, 0, 3, 6].iter().map(|c| Signal::payload(*c).unwrap()).collect();
        for m in &moves {
            sender.send_checked(&mut stamper, *m).unwrap();
        }
        sender.send(Signal::GAME_OVER).unwrap();
        assert_eq!(stamper.sequence(), moves.len() as u32);

        assert!(verifying.wait_for_outcomes(moves.len() * 2 + 1).await);
        let mut expected = Vec::new();
        for m in &moves {
            expected.push(Ok(Verified::Armed));
            expected.push(Ok(Verified::Payload(*m)));
        }
        expected.push(Ok(Verified::Passthrough(Signal::GAME_OVER)));
        assert_eq!(verifying.outcomes(), expected);

        sender.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let store = MemoryStore::new();
        store.create("peer.txt").await.unwrap();
        let (mut t, sink) = open(&store, "mine.txt", "peer.txt", &fast_config()).await;

        store.append_line("mine.txt", "not a number").await.unwrap();
        store.append_line("mine.txt", "4").await.unwrap();

        assert!(sink.wait_for(WAIT, |s| !s.signals().is_empty()).await);
        assert_eq!(sink.signals(), vec![Signal::payload(4).unwrap()]);

        t.close().await;
    }

    #[tokio::test]
    async fn test_store_outage_is_terminal() {
        let store = MemoryStore::new();
        store.create("peer.txt").await.unwrap();
        let (mut t, sink) = open(&store, "mine.txt", "peer.txt", &fast_config()).await;

        store.set_offline(true);
        assert!(sink.wait_for(WAIT, |s| s.failures() == 1).await);

        store.set_offline(false);
        t.close().await;
    }
}
