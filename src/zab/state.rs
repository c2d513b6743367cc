//! Proposal and sync state machines
//!
//! Each machine holds exactly one round at a time. A round is identified by a
//! monotonically increasing id; its state and its vote counter live in a
//! `tokio::sync::watch` channel so that every read-modify-write is one atomic
//! `send_if_modified` call and every wait is woken by the transition itself.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// States of a single-instance round
pub trait Phase: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Does a round in this state still own the machine?
    fn in_flight(self) -> bool;
}

/// Leader-side lifecycle of one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    /// No proposal has run yet
    Idle,
    Proposed,
    Acknowledged,
    Committed,
    /// Quorum was not reached within the configured round timeout
    Aborted,
}

impl Phase for ProposalState {
    fn in_flight(self) -> bool {
        matches!(self, ProposalState::Proposed | ProposalState::Acknowledged)
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalState::Idle => write!(f, "IDLE"),
            ProposalState::Proposed => write!(f, "PROPOSED"),
            ProposalState::Acknowledged => write!(f, "ACKNOWLEDGED"),
            ProposalState::Committed => write!(f, "COMMITTED"),
            ProposalState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Initiator-side lifecycle of one catch-up round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Prepared,
    Acked,
    Synced,
    Aborted,
}

impl Phase for SyncState {
    fn in_flight(self) -> bool {
        matches!(self, SyncState::Prepared | SyncState::Acked)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "IDLE"),
            SyncState::Prepared => write!(f, "PREPARED"),
            SyncState::Acked => write!(f, "ACKED"),
            SyncState::Synced => write!(f, "SYNCED"),
            SyncState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Snapshot of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round<S> {
    pub id: u64,
    pub state: S,
    /// Peer responses counted for this round; reset on every forward transition
    pub votes: usize,
}

/// What happened to one peer response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vote", content = "count", rename_all = "lowercase")]
pub enum Vote {
    /// Counted, quorum not reached yet
    Counted(usize),
    /// This response completed the quorum
    Reached(usize),
    /// The round already moved past vote collection
    Late,
    /// The response belongs to a different round
    Stale,
}

pub struct StateMachine<S: Phase> {
    tx: watch::Sender<Round<S>>,
}

impl<S: Phase> StateMachine<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(Round {
            id: 0,
            state: initial,
            votes: 0,
        });
        Self { tx }
    }

    pub fn current(&self) -> Round<S> {
        *self.tx.borrow()
    }

    /// Atomic compare-and-set: `f` inspects and mutates the round under the
    /// channel lock and returns whether waiters must be woken.
    pub fn transition_if(&self, f: impl FnOnce(&mut Round<S>) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Open the next round in `state` unless one is in flight.
    pub fn try_begin(&self, state: S) -> Option<u64> {
        let mut opened = None;
        self.transition_if(|round| {
            if round.state.in_flight() {
                return false;
            }
            *round = Round {
                id: round.id + 1,
                state,
                votes: 0,
            };
            opened = Some(round.id);
            true
        });
        opened
    }

    /// Wait until the machine is free, then open the next round.
    pub async fn begin(&self, state: S) -> Result<u64> {
        loop {
            self.wait_until(|round| !round.state.in_flight()).await?;
            if let Some(id) = self.try_begin(state) {
                return Ok(id);
            }
        }
    }

    /// Move round `id` from `from` to `to`
    pub fn advance(&self, id: u64, from: S, to: S) -> bool {
        self.transition_if(|round| {
            if round.id != id || round.state != from {
                return false;
            }
            round.state = to;
            round.votes = 0;
            true
        })
    }

    /// Terminal transition for a round that is still in flight
    pub fn abort(&self, id: u64, aborted: S) -> bool {
        self.transition_if(|round| {
            if round.id != id || !round.state.in_flight() {
                return false;
            }
            round.state = aborted;
            round.votes = 0;
            true
        })
    }

    /// Count one peer response for round `id` while it is `collecting`.
    /// Once `quorum(votes)` holds the round moves to `reached` and the
    /// counter resets to zero.
    pub fn vote(
        &self,
        id: u64,
        collecting: S,
        reached: S,
        quorum: impl FnOnce(usize) -> bool,
    ) -> Vote {
        let mut vote = Vote::Stale;
        self.transition_if(|round| {
            if round.id != id {
                return false;
            }
            if round.state != collecting {
                vote = Vote::Late;
                return false;
            }
            round.votes += 1;
            if quorum(round.votes) {
                vote = Vote::Reached(round.votes);
                round.state = reached;
                round.votes = 0;
                true
            } else {
                vote = Vote::Counted(round.votes);
                false
            }
        });
        vote
    }

    /// Resolve once `pred` holds for the published round
    pub async fn wait_until(&self, mut pred: impl FnMut(&Round<S>) -> bool) -> Result<Round<S>> {
        let mut rx = self.tx.subscribe();
        let round = rx
            .wait_for(|round| pred(round))
            .await
            .map_err(|_| Error::Internal("state machine closed".into()))?;
        Ok(*round)
    }

    /// [`wait_until`](Self::wait_until) bounded by `timeout` when one is configured
    pub async fn wait_until_within(
        &self,
        timeout: Option<Duration>,
        what: &str,
        pred: impl FnMut(&Round<S>) -> bool,
    ) -> Result<Round<S>> {
        match timeout {
            None => self.wait_until(pred).await,
            Some(limit) => tokio::time::timeout(limit, self.wait_until(pred))
                .await
                .map_err(|_| Error::Timeout(format!("{} after {:?}", what, limit)))?,
        }
    }
}
