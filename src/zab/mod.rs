//! Atomic broadcast core
//!
//! Writes enter through the ordering queue, are forwarded to the leader when
//! needed and replicated with a two-phase propose/acknowledge/commit round.
//! Joining and recovering nodes catch up with a sync round first.

pub mod broadcast;
pub mod election;
pub mod http;
pub mod messages;
pub mod peer_client;
pub mod proposal;
pub mod queue;
pub mod server;
pub mod state;
pub mod sync;

pub use broadcast::{AtomicBroadcast, NodeStatus, Role};
pub use election::{ElectionOps, ElectionOutcome, ElectionTrigger};
pub use messages::{SyncReport, WriteRequest, WriteResponse};
pub use proposal::ProposalOps;
pub use queue::{OrderingQueue, QueueTicket};
pub use server::{ZabNode, ZabServer};
pub use state::{ProposalState, Round, StateMachine, SyncState, Vote};
pub use sync::SyncOps;
