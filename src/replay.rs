//! Scripted session replay
//!
//! A replay script is a JSON list of timestamped commands. Offsets are
//! milliseconds from the script's start time and are fed to the session as
//! its wall clock, so a script reproduces a workout deterministically.
//!
//! ```json
//! {
//!   "events": [
//!     { "at_ms": 0,      "action": "sample", "sample": { "heart_rate": 142 } },
//!     { "at_ms": 240000, "action": "complete" },
//!     { "at_ms": 245000, "action": "next" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::logging::DiagnosticReport;
use crate::models::{Segment, SegmentMetrics, WorkoutSummary};
use crate::session::{
    CancelOutcome, Sample, SampleDisposition, SegmentOutcome, SessionSettings, SessionView,
    WorkoutSession,
};
use crate::shadow::ShadowReference;
use crate::shared::SharedSession;
use crate::sync::{ChannelStats, MirrorLink, RetryPolicy, SessionMirror, SyncChannel};

/// One scripted command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayAction {
    Tick,
    Sample { sample: Sample },
    Pause,
    Resume,
    Complete,
    Next {
        #[serde(default)]
        shadow: Option<ShadowReference>,
    },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Offset from the script start, milliseconds
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: ReplayAction,
}

impl ReplayEvent {
    pub fn at(at_ms: u64, action: ReplayAction) -> Self {
        Self { at_ms, action }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,
    /// Reference for the first segment
    #[serde(default)]
    pub shadow: Option<ShadowReference>,
    pub events: Vec<ReplayEvent>,
}

fn default_start() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl ReplayScript {
    pub fn new(events: Vec<ReplayEvent>) -> Self {
        Self {
            start: default_start(),
            shadow: None,
            events,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A command the session refused; the replay carried on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedCommand {
    pub at_ms: u64,
    pub action: ReplayAction,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleCounts {
    pub accepted: u32,
    pub rejected: u32,
    pub discarded: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    pub view: SessionView,
    pub frozen: Vec<SegmentMetrics>,
    pub summary: Option<WorkoutSummary>,
    pub samples: SampleCounts,
    pub rejected_commands: Vec<RejectedCommand>,
}

impl ReplayResult {
    /// Stamp the workout, outcome and any warnings onto a diagnostic report
    pub fn annotate(&self, report: &mut DiagnosticReport) {
        report.set_workout(self.view.workout_id);
        report.set_success(true);
        report.add_context("status", self.view.status.to_string());
        for rejected in &self.rejected_commands {
            report.add_warning(format!(
                "{}ms {:?}: {}",
                rejected.at_ms, rejected.action, rejected.message
            ));
        }
        if self.samples.rejected > 0 {
            report.add_warning(format!(
                "{} samples outside plausible bounds",
                self.samples.rejected
            ));
        }
    }
}

/// Result of a replay whose session was mirrored over the sync path
#[derive(Debug, Clone)]
pub struct SyncedReplay {
    pub result: ReplayResult,
    /// Receiving side after the outbound queue drained
    pub mirror: SessionMirror,
    pub stats: ChannelStats,
}

/// Run `script` against a fresh session on `plan`
///
/// Recoverable misuse (invalid transitions, advancing past the end) is
/// recorded and skipped. Anything else aborts the replay.
pub fn replay(
    plan: Vec<Segment>,
    script: &ReplayScript,
    settings: SessionSettings,
) -> Result<ReplayResult> {
    let session = WorkoutSession::begin(plan, script.shadow, script.start, settings)?;
    drive(&SharedSession::new(session), script)
}

/// Replay while publishing every state change to an in-process mirror
///
/// Must run inside a tokio runtime. Returns once the sync worker has
/// flushed everything the session published.
pub async fn replay_synced(
    plan: Vec<Segment>,
    script: &ReplayScript,
    settings: SessionSettings,
    retry: RetryPolicy,
) -> Result<SyncedReplay> {
    let session = WorkoutSession::begin(plan.clone(), script.shadow, script.start, settings)?;
    let link = MirrorLink::new(SessionMirror::new(session.workout_id(), plan));
    let (channel, worker) = SyncChannel::spawn(link.clone(), retry);

    let result = {
        let shared = SharedSession::new(session).with_publisher(channel);
        drive(&shared, script)?
    };
    let stats = worker.await.map_err(|_| SyncError::ChannelClosed)?;

    Ok(SyncedReplay {
        result,
        mirror: link.mirror(),
        stats,
    })
}

fn drive(session: &SharedSession, script: &ReplayScript) -> Result<ReplayResult> {
    let mut samples = SampleCounts::default();
    let mut rejected_commands = Vec::new();
    let mut last_now = script.start;

    for event in &script.events {
        let now = script.start + Duration::milliseconds(event.at_ms as i64);
        last_now = last_now.max(now);

        match apply(session, &event.action, now, &mut samples) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!(at_ms = event.at_ms, error = %e, "Replay command rejected");
                rejected_commands.push(RejectedCommand {
                    at_ms: event.at_ms,
                    action: event.action.clone(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    debug!(
        events = script.events.len(),
        rejected = rejected_commands.len(),
        "Replay finished"
    );

    Ok(session.read(|s| ReplayResult {
        view: s.view(last_now),
        frozen: s.frozen_metrics().to_vec(),
        summary: s.summary().cloned(),
        samples,
        rejected_commands,
    }))
}

fn apply(
    session: &SharedSession,
    action: &ReplayAction,
    now: DateTime<Utc>,
    samples: &mut SampleCounts,
) -> Result<()> {
    match action {
        ReplayAction::Tick => {
            session.tick(now)?;
        }
        ReplayAction::Sample { sample } => {
            // Samples carry the clock forward like the live host does.
            session.tick(now)?;
            match session.record_sample(sample.clone())? {
                SampleDisposition::Accepted => samples.accepted += 1,
                SampleDisposition::Rejected(_) => samples.rejected += 1,
                SampleDisposition::Discarded => samples.discarded += 1,
            }
        }
        ReplayAction::Pause => session.pause(now)?,
        ReplayAction::Resume => session.resume(now)?,
        ReplayAction::Complete => {
            if let SegmentOutcome::Ignored = session.complete_current_segment(now)? {
                debug!("Complete ignored on finished session");
            }
        }
        ReplayAction::Next { shadow } => {
            session.start_next_segment(*shadow, now)?;
        }
        ReplayAction::Cancel => {
            if let CancelOutcome::Ignored = session.cancel(now)? {
                debug!("Cancel ignored on finished session");
            }
        }
    }
    Ok(())
}
