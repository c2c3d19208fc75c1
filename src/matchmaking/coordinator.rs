//! Matchmaking Coordinator
//!
//! Pairs two players through the shared queue. The store has no locks, so the
//! algorithm is optimistic: append, re-read, and start over whenever the queue
//! looks inconsistent.

use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::{MatchmakingError, WaitingQueue};
use crate::config::MatchmakingConfig;
use crate::core::participant::Participant;
use crate::store::RemoteTextStore;

/// A completed pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// This side.
    pub me: Participant,
    /// The other side; always holds the opposite token.
    pub opponent: Participant,
}

/// Queue state once there is room to join.
#[derive(Debug)]
enum Room {
    Empty,
    Waiting(Participant),
}

#[derive(Debug)]
enum PollOutcome {
    Matched(Participant),
    Restart,
}

/// The record this join currently has in the queue, if any.
type Registration = Arc<Mutex<Option<Participant>>>;

/// Finds opponents for one local host.
pub struct Matchmaker {
    queue: WaitingQueue,
    local: Ipv4Net,
    config: MatchmakingConfig,
}

impl Matchmaker {
    /// Matchmaker for the host at `local`, queueing in `store`.
    pub fn new(store: Arc<dyn RemoteTextStore>, local: Ipv4Net, config: MatchmakingConfig) -> Self {
        Self {
            queue: WaitingQueue::new(store),
            local,
            config,
        }
    }

    /// The queue this matchmaker uses.
    pub fn queue(&self) -> &WaitingQueue {
        &self.queue
    }

    /// Wait for an opponent.
    ///
    /// Retries on contention and only fails when the store does. Dropping the
    /// future may leave this side's record behind; use [`Matchmaker::join`]
    /// when cancellation matters.
    #[instrument(skip(self), fields(local = %self.local))]
    pub async fn find_match(&self) -> Result<Match, MatchmakingError> {
        self.run(&Registration::default()).await
    }

    /// Look for an opponent in the background and call `on_matched` once
    /// when one is found.
    pub fn join<F>(self: &Arc<Self>, on_matched: F) -> PendingMatch
    where
        F: FnOnce(Match) + Send + 'static,
    {
        let registration = Registration::default();
        let this = Arc::clone(self);
        let task_registration = Arc::clone(&registration);

        let handle = tokio::spawn(async move {
            let matched = this.run(&task_registration).await?;
            on_matched(matched.clone());
            Ok(matched)
        });

        PendingMatch {
            handle,
            registration,
            queue: self.queue.clone(),
        }
    }

    async fn run(&self, registration: &Registration) -> Result<Match, MatchmakingError> {
        loop {
            if let Some(matched) = self.attempt(registration).await? {
                info!(me = %matched.me, opponent = %matched.opponent, "matched");
                return Ok(matched);
            }

            // Two joiners that collided would otherwise collide again.
            let jitter = rand::thread_rng().gen_range(0..=millis(self.config.poll_interval));
            sleep(Duration::from_millis(jitter)).await;
        }
    }

    /// One pass of the join algorithm. `None` means start over.
    async fn attempt(&self, registration: &Registration) -> Result<Option<Match>, MatchmakingError> {
        match self.await_room().await? {
            Room::Waiting(opponent) => {
                let me = Participant::opposing(self.local, &opponent, &mut rand::thread_rng());
                // The opponent is polling; it sees this record and clears both.
                self.queue.push(&me).await?;
                debug!(%me, %opponent, "joined waiting opponent");
                Ok(Some(Match { me, opponent }))
            }
            Room::Empty => {
                let me = Participant::with_random_side(self.local, &mut rand::thread_rng());
                *registration.lock().await = Some(me.clone());
                self.queue.push(&me).await?;
                debug!(%me, "waiting in queue");

                let outcome = self.poll(&me).await?;
                match outcome {
                    PollOutcome::Matched(opponent) => {
                        self.queue.remove(&[me.clone(), opponent.clone()]).await?;
                        registration.lock().await.take();
                        Ok(Some(Match { me, opponent }))
                    }
                    PollOutcome::Restart => {
                        self.queue.remove(std::slice::from_ref(&me)).await?;
                        registration.lock().await.take();
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Wait until the queue holds fewer than two entries. A queue stuck at two
    /// or more past `max_availability_wait` belongs to crashed players and is
    /// cleared.
    async fn await_room(&self) -> Result<Room, MatchmakingError> {
        let started = Instant::now();
        loop {
            let mut snapshot = self.queue.snapshot().await?;
            match snapshot.len() {
                0 => return Ok(Room::Empty),
                1 => return Ok(Room::Waiting(snapshot.remove(0))),
                n if started.elapsed() >= self.config.max_availability_wait => {
                    warn!(entries = n, "queue stuck; clearing");
                    self.queue.clear().await?;
                    return Ok(Room::Empty);
                }
                n => {
                    debug!(entries = n, "queue full; waiting");
                    sleep(self.config.availability_interval).await;
                }
            }
        }
    }

    /// Re-read the queue until `me` sits next to exactly one complementary
    /// record, or the queue shows a conflict.
    async fn poll(&self, me: &Participant) -> Result<PollOutcome, MatchmakingError> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let snapshot = self.queue.snapshot().await?;
            if snapshot.len() > 2 {
                debug!(entries = snapshot.len(), "queue overfull; restarting");
                return Ok(PollOutcome::Restart);
            }

            let mut present = false;
            let mut opponent = None;
            for entry in snapshot.iter() {
                if entry == me {
                    present = true;
                } else if entry.side() == me.side() {
                    debug!(%entry, "token collision; restarting");
                    return Ok(PollOutcome::Restart);
                } else {
                    opponent = Some(entry.clone());
                }
            }

            match (present, opponent) {
                (true, Some(opponent)) => return Ok(PollOutcome::Matched(opponent)),
                (false, _) if snapshot.len() < 2 => {
                    debug!(%me, "own record lost; re-adding");
                    self.queue.push(me).await?;
                }
                _ => {}
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a background [`Matchmaker::join`].
pub struct PendingMatch {
    handle: JoinHandle<Result<Match, MatchmakingError>>,
    registration: Registration,
    queue: WaitingQueue,
}

impl PendingMatch {
    /// Wait for the outcome.
    pub async fn wait(self) -> Result<Match, MatchmakingError> {
        self.handle.await?
    }

    /// Whether the join task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop looking and take this side's record out of the queue.
    pub async fn cancel(self) -> Result<(), MatchmakingError> {
        self.handle.abort();
        // Either cancelled or already done; the registration says what is left.
        let _ = self.handle.await;

        let leftover = self.registration.lock().await.take();
        if let Some(me) = leftover {
            debug!(%me, "withdrawing from queue");
            self.queue.remove(&[me]).await?;
        }
        Ok(())
    }
}
