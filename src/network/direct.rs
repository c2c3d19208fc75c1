//! Direct Transport
//!
//! Same-subnet peers talk over plain TCP: each side listens on its own port and
//! connects to the peer's. One byte per signal, in both directions.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::DirectConfig;
use crate::core::signal::Signal;
use crate::network::transport::{Link, SignalSink, SinkSlot, TransportError};

/// TCP transport between same-subnet peers.
pub struct DirectTransport {
    link: Link,
    peer: SocketAddr,
    local_port: u16,
}

impl DirectTransport {
    /// Bind `listen_port`, then start accepting from and connecting to `peer`.
    #[instrument(skip(config, sink))]
    pub async fn open(
        peer: SocketAddr,
        listen_port: u16,
        config: &DirectConfig,
        sink: Arc<dyn SignalSink>,
    ) -> Result<Self, TransportError> {
        let bind_err = |source| TransportError::Bind {
            port: listen_port,
            source,
        };
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, listen_port))
            .await
            .map_err(bind_err)?;
        let local_port = listener.local_addr().map_err(bind_err)?.port();

        let (mut link, outbox) = Link::new(sink, config.queue_capacity, config.drain_timeout);
        let inbound = tokio::spawn(run_inbound(
            listener,
            link.slot(),
            link.subscribe_shutdown(),
        ));
        let outbound = tokio::spawn(run_outbound(
            peer,
            outbox,
            link.slot(),
            config.connect_timeout,
            config.connect_retry,
        ));
        link.attach(inbound, outbound);

        info!(%peer, local_port, "direct transport open");
        Ok(Self {
            link,
            peer,
            local_port,
        })
    }

    /// Peer address signals are sent to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Port this side listens on.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    /// Flush queued signals, then close both connections.
    pub async fn close(&mut self) {
        self.link.shutdown().await;
        debug!(peer = %self.peer, "direct transport closed");
    }
}

/// Accept the peer's connection and deliver every byte it sends.
async fn run_inbound(
    listener: TcpListener,
    slot: Arc<SinkSlot>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, addr)) => {
                debug!(%addr, "peer connected");
                stream
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                slot.transfer_failed();
                return;
            }
        },
        _ = shutdown.recv() => return,
    };
    drop(listener);

    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("peer closed its stream");
                    slot.disconnected();
                    return;
                }
                Ok(n) => {
                    for byte in &buf[..n] {
                        slot.deliver(Signal::from_wire(*byte));
                    }
                }
                Err(e) => {
                    debug!(error = %e, "read failed");
                    slot.disconnected();
                    return;
                }
            },
            _ = shutdown.recv() => return,
        }
    }
}

/// Connect to the peer and write queued signals until the queue closes.
async fn run_outbound(
    peer: SocketAddr,
    mut outbox: mpsc::Receiver<Signal>,
    slot: Arc<SinkSlot>,
    connect_timeout: Duration,
    connect_retry: Duration,
) {
    let mut stream = match connect_with_retry(peer, connect_timeout, connect_retry).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%peer, error = %e, "could not reach peer");
            outbox.close();
            slot.transfer_failed();
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }

    while let Some(signal) = outbox.recv().await {
        let written = async {
            stream.write_all(&[signal.value()]).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(%peer, error = %e, "write failed");
            outbox.close();
            slot.transfer_failed();
            return;
        }
    }

    let _ = stream.shutdown().await;
    debug!(%peer, "outgoing queue drained");
}

/// Retry refused connections until `window` elapses; the peer may not have
/// bound its port yet.
async fn connect_with_retry(
    peer: SocketAddr,
    window: Duration,
    retry: Duration,
) -> std::io::Result<TcpStream> {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt = match timeout(remaining, TcpStream::connect(peer)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
        };

        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() + retry < deadline => {
                debug!(%peer, error = %e, "connect failed; retrying");
                sleep(retry).await;
            }
            Err(e) => return Err(e),
        }
    }
}
