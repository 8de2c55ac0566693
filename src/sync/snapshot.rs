//! Wire types and frame codec for the peer link

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{SessionStatus, WorkoutSummary};

/// Compact view of the authoritative session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub workout_id: Uuid,
    /// Sender's local sequence; strictly increasing per mutation
    pub sequence: u64,
    pub status: SessionStatus,
    pub segment_index: usize,
    /// Active segment duration as of the sender's last tick
    pub active_elapsed_ms: u64,
}

impl SyncSnapshot {
    /// Whether `self` should replace `other` on the receiving side
    pub fn supersedes(&self, other: &SyncSnapshot) -> bool {
        self.workout_id == other.workout_id && self.sequence > other.sequence
    }
}

/// Everything that crosses the link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncPayload {
    Snapshot(SyncSnapshot),
    Summary(WorkoutSummary),
}

impl SyncPayload {
    pub fn workout_id(&self) -> Uuid {
        match self {
            SyncPayload::Snapshot(snapshot) => snapshot.workout_id,
            SyncPayload::Summary(summary) => summary.workout_id,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, SyncPayload::Summary(_))
    }

    /// Encode into a binary frame
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        bincode::serialize(self).map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Decode a binary frame
    pub fn decode(frame: &[u8]) -> Result<Self, SyncError> {
        bincode::deserialize(frame).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

impl From<SyncSnapshot> for SyncPayload {
    fn from(snapshot: SyncSnapshot) -> Self {
        SyncPayload::Snapshot(snapshot)
    }
}

impl From<WorkoutSummary> for SyncPayload {
    fn from(summary: WorkoutSummary) -> Self {
        SyncPayload::Summary(summary)
    }
}
