//! Outbound sync worker
//!
//! Publishing never blocks the caller: payloads go onto an unbounded queue
//! drained by a background task. Snapshots are coalesced so only the newest
//! pending one is sent. Summaries are retried with exponential backoff until
//! the transport accepts them. Dropping every [`SyncChannel`] handle lets the
//! worker flush what is pending and exit.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::models::WorkoutSummary;
use crate::sync::snapshot::{SyncPayload, SyncSnapshot};

/// Delivers encoded frames to the peer device
pub trait SyncTransport: Send + Sync + 'static {
    fn send(&self, frame: Vec<u8>) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Exponential backoff between failed sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor per consecutive failure
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Give up on a payload after this many failures; unlimited when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

/// Counters reported by the worker when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub snapshots_sent: u64,
    pub snapshots_coalesced: u64,
    pub summaries_sent: u64,
    pub retries: u64,
    pub dropped: u64,
}

/// Non-blocking handle for publishing to the peer
#[derive(Debug, Clone)]
pub struct SyncChannel {
    tx: mpsc::UnboundedSender<SyncPayload>,
}

impl SyncChannel {
    /// Start the outbound worker on the current tokio runtime
    pub fn spawn<T: SyncTransport>(
        transport: T,
        retry: RetryPolicy,
    ) -> (Self, JoinHandle<ChannelStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            transport,
            retry,
            rx,
            closed: false,
            pending_snapshot: None,
            pending_summaries: VecDeque::new(),
            attempt: 0,
            stats: ChannelStats::default(),
        };
        let handle = tokio::spawn(worker.run());
        (Self { tx }, handle)
    }

    pub fn publish(&self, payload: impl Into<SyncPayload>) -> Result<(), SyncError> {
        self.tx
            .send(payload.into())
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Worker<T> {
    transport: T,
    retry: RetryPolicy,
    rx: mpsc::UnboundedReceiver<SyncPayload>,
    closed: bool,
    pending_snapshot: Option<SyncSnapshot>,
    pending_summaries: VecDeque<WorkoutSummary>,
    /// Consecutive failures for the payload at the head of the queue
    attempt: u32,
    stats: ChannelStats,
}

impl<T: SyncTransport> Worker<T> {
    async fn run(mut self) -> ChannelStats {
        loop {
            if !self.has_pending() {
                if self.closed {
                    break;
                }
                match self.rx.recv().await {
                    Some(payload) => self.absorb(payload),
                    None => self.closed = true,
                }
            }
            self.drain_ready();
            if !self.has_pending() {
                continue;
            }

            match self.send_pending().await {
                Ok(()) => self.attempt = 0,
                Err(e) => {
                    self.attempt += 1;
                    self.stats.retries += 1;
                    if self.retry.exhausted(self.attempt) {
                        self.drop_head(&e);
                        continue;
                    }
                    let delay = self.retry.delay_for(self.attempt);
                    warn!(
                        error = %e,
                        attempt = self.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Sync send failed; backing off"
                    );
                    self.backoff(delay).await;
                }
            }
        }

        info!(
            snapshots = self.stats.snapshots_sent,
            summaries = self.stats.summaries_sent,
            coalesced = self.stats.snapshots_coalesced,
            "Sync worker stopped"
        );
        self.stats
    }

    fn has_pending(&self) -> bool {
        self.pending_snapshot.is_some() || !self.pending_summaries.is_empty()
    }

    fn absorb(&mut self, payload: SyncPayload) {
        match payload {
            SyncPayload::Snapshot(snapshot) => match &self.pending_snapshot {
                Some(pending) if snapshot.sequence <= pending.sequence => {
                    self.stats.snapshots_coalesced += 1;
                }
                Some(_) => {
                    self.stats.snapshots_coalesced += 1;
                    self.pending_snapshot = Some(snapshot);
                }
                None => self.pending_snapshot = Some(snapshot),
            },
            SyncPayload::Summary(summary) => self.pending_summaries.push_back(summary),
        }
    }

    fn drain_ready(&mut self) {
        while !self.closed {
            match self.rx.try_recv() {
                Ok(payload) => self.absorb(payload),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }
    }

    /// Wait out a backoff delay while still absorbing new payloads
    async fn backoff(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                received = self.rx.recv(), if !self.closed => match received {
                    Some(payload) => self.absorb(payload),
                    None => self.closed = true,
                },
            }
        }
    }

    /// Snapshot first so the peer sees the terminal state before the summary
    async fn send_pending(&mut self) -> Result<(), SyncError> {
        if let Some(snapshot) = self.pending_snapshot {
            match SyncPayload::Snapshot(snapshot).encode() {
                Ok(frame) => {
                    self.transport.send(frame).await?;
                    self.stats.snapshots_sent += 1;
                    debug!(sequence = snapshot.sequence, "Snapshot sent");
                }
                Err(e) => {
                    error!(error = %e, "Dropping unencodable snapshot");
                    self.stats.dropped += 1;
                }
            }
            self.pending_snapshot = None;
            self.attempt = 0;
        }

        while let Some(summary) = self.pending_summaries.front() {
            let workout_id = summary.workout_id;
            match SyncPayload::Summary(summary.clone()).encode() {
                Ok(frame) => {
                    self.transport.send(frame).await?;
                    self.stats.summaries_sent += 1;
                    info!(workout_id = %workout_id, "Summary delivered to peer");
                }
                Err(e) => {
                    error!(workout_id = %workout_id, error = %e, "Dropping unencodable summary");
                    self.stats.dropped += 1;
                }
            }
            self.pending_summaries.pop_front();
            self.attempt = 0;
        }
        Ok(())
    }

    fn drop_head(&mut self, cause: &SyncError) {
        self.attempt = 0;
        self.stats.dropped += 1;
        if let Some(snapshot) = self.pending_snapshot.take() {
            warn!(sequence = snapshot.sequence, error = %cause, "Giving up on snapshot");
        } else if let Some(summary) = self.pending_summaries.pop_front() {
            error!(
                workout_id = %summary.workout_id,
                error = %cause,
                "Giving up on summary delivery"
            );
        }
    }
}
