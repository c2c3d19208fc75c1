//! duel-net client
//!
//! Finds an opponent through the shared store, opens whichever transport the
//! two hosts can use, and sends integers typed on stdin as signals.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use duel_net::{
    config::STORE_URL_ENV,
    core::integrity::Verified,
    network::local_interface,
    HttpTextStore, Matchmaker, NetConfig, RemoteTextStore, Signal, SignalSink, Stamper,
    TransportSelector, Verifier, VERSION,
};

/// Logs what the opponent sends and verifies checked payloads.
struct LoggingSink {
    verifier: Mutex<Verifier>,
    ended: mpsc::UnboundedSender<()>,
}

impl SignalSink for LoggingSink {
    fn on_signal(&self, signal: Signal) {
        let mut verifier = self.verifier.lock().unwrap_or_else(PoisonError::into_inner);
        match verifier.observe(signal) {
            Ok(Verified::Armed) => debug!(%signal, "check value"),
            Ok(Verified::Payload(payload)) => info!(%payload, "opponent sent"),
            Ok(Verified::Passthrough(Signal::DISCONNECT)) => {
                info!("opponent left");
                let _ = self.ended.send(());
            }
            Ok(Verified::Passthrough(other)) => info!(signal = %other, kind = ?other.kind(), "control"),
            Err(e) => error!(error = %e, "integrity check failed"),
        }
    }

    fn on_transfer_failed(&self) {
        error!("could not reach opponent");
        let _ = self.ended.send(());
    }

    fn on_disconnect(&self) {
        warn!("opponent disconnected");
        let _ = self.ended.send(());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("duel-net v{}", VERSION);

    let config = NetConfig::from_env().context("failed to load configuration")?;
    let Some(base_url) = config.store.base_url.clone() else {
        bail!("no store configured; set {STORE_URL_ENV}");
    };
    let local = local_interface(config.advertise.as_deref())
        .context("failed to determine local interface")?;
    info!(%local, store = %base_url, "starting");

    let store: Arc<dyn RemoteTextStore> = Arc::new(
        HttpTextStore::new(base_url, config.store.request_timeout)
            .context("failed to build store client")?,
    );
    let matchmaker = Arc::new(Matchmaker::new(
        Arc::clone(&store),
        local,
        config.matchmaking.clone(),
    ));

    let (found_tx, found_rx) = oneshot::channel();
    let pending = matchmaker.join(move |matched| {
        let _ = found_tx.send(matched);
    });
    info!("waiting for an opponent");

    let matched = tokio::select! {
        found = found_rx => match found {
            Ok(matched) => matched,
            // The callback never fires on failure; the task result says why.
            Err(_) => pending.wait().await.context("matchmaking failed")?,
        },
        _ = tokio::signal::ctrl_c() => {
            info!("cancelled");
            pending.cancel().await.context("failed to leave the queue")?;
            return Ok(());
        }
    };
    info!(me = %matched.me, opponent = %matched.opponent, "opponent found");

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(LoggingSink {
        verifier: Mutex::new(Verifier::new()),
        ended: ended_tx,
    });
    let selector = TransportSelector::new(store, &config);
    let mut transport = selector
        .select(&matched.me, &matched.opponent, sink)
        .await
        .context("failed to open transport")?;
    info!(kind = ?transport.kind(), "connected; type numbers to send");

    let mut stamper = Stamper::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let sent = match line.parse::<Signal>() {
                    Ok(signal) if signal.is_payload() => transport.send_checked(&mut stamper, signal),
                    Ok(signal) => transport.send(signal),
                    Err(e) => {
                        warn!(error = %e, "not a signal");
                        continue;
                    }
                };
                if let Err(e) = sent {
                    warn!(error = %e, "send failed");
                }
            }
            _ = ended_rx.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = transport.send(Signal::DISCONNECT) {
        debug!(error = %e, "could not announce disconnect");
    }
    transport.close().await;
    info!("closed");

    Ok(())
}
