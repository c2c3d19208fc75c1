//! Transport Selection
//!
//! Picks the backend once per match: direct TCP when both hosts share a
//! subnet, store-relayed mailboxes otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{DirectConfig, NetConfig, RelayConfig};
use crate::core::participant::Participant;
use crate::network::address::same_subnet;
use crate::network::direct::DirectTransport;
use crate::network::relayed::RelayedTransport;
use crate::network::transport::{SignalSink, Transport, TransportError, TransportKind};
use crate::store::RemoteTextStore;

/// What [`TransportSelector::select`] will open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    /// Connect to `peer` and accept on `listen_port`.
    Direct {
        /// Opponent address and the port it listens on.
        peer: SocketAddr,
        /// Port this side listens on.
        listen_port: u16,
    },
    /// Read `inbox`, write `peer_inbox`.
    Relayed {
        /// Own mailbox.
        inbox: String,
        /// Opponent's mailbox.
        peer_inbox: String,
    },
}

impl TransportPlan {
    /// Backend this plan opens.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportPlan::Direct { .. } => TransportKind::Direct,
            TransportPlan::Relayed { .. } => TransportKind::Relayed,
        }
    }
}

/// Decide how `me` talks to `opponent`.
pub fn plan(me: &Participant, opponent: &Participant, direct: &DirectConfig) -> TransportPlan {
    if same_subnet(&me.interface(), &opponent.interface()) {
        let (send_port, listen_port) = direct.ports(me.side());
        TransportPlan::Direct {
            peer: SocketAddr::from((opponent.address(), send_port)),
            listen_port,
        }
    } else {
        TransportPlan::Relayed {
            inbox: me.mailbox().to_string(),
            peer_inbox: opponent.mailbox().to_string(),
        }
    }
}

/// Opens the transport for a match.
pub struct TransportSelector {
    store: Arc<dyn RemoteTextStore>,
    direct: DirectConfig,
    relay: RelayConfig,
}

impl TransportSelector {
    /// Selector relaying through `store` when needed.
    pub fn new(store: Arc<dyn RemoteTextStore>, config: &NetConfig) -> Self {
        Self {
            store,
            direct: config.direct.clone(),
            relay: config.relay.clone(),
        }
    }

    /// See [`plan`].
    pub fn plan(&self, me: &Participant, opponent: &Participant) -> TransportPlan {
        plan(me, opponent, &self.direct)
    }

    /// Plan and open the transport, delivering inbound signals to `sink`.
    #[instrument(skip_all, fields(me = %me, opponent = %opponent))]
    pub async fn select(
        &self,
        me: &Participant,
        opponent: &Participant,
        sink: Arc<dyn SignalSink>,
    ) -> Result<Transport, TransportError> {
        let plan = self.plan(me, opponent);
        info!(kind = ?plan.kind(), "transport selected");

        let transport = match plan {
            TransportPlan::Direct { peer, listen_port } => Transport::Direct(
                DirectTransport::open(peer, listen_port, &self.direct, sink).await?,
            ),
            TransportPlan::Relayed { inbox, peer_inbox } => Transport::Relayed(
                RelayedTransport::open(inbox, peer_inbox, Arc::clone(&self.store), &self.relay, sink)
                    .await?,
            ),
        };
        Ok(transport)
    }
}
