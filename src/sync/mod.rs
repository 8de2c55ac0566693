//! Cross-device state sync
//!
//! One device runs the authoritative [`WorkoutSession`](crate::session::WorkoutSession);
//! the other mirrors it. Snapshots flow one way and carry the session's
//! monotonic sequence number, so the mirror converges by dropping anything
//! not newer than what it already applied. Summaries are delivered
//! at-least-once and deduplicated by workout id on receipt.

pub mod channel;
pub mod mirror;
pub mod snapshot;

pub use channel::{ChannelStats, RetryPolicy, SyncChannel, SyncTransport};
pub use mirror::{
    ApplyOutcome, MirrorEvent, MirrorLink, SessionMirror, SummaryInbox, SummaryReceipt,
};
pub use snapshot::{SyncPayload, SyncSnapshot};
