// Library interface for the HybridRS workout engine
// The CLI and the integration tests both build on these modules

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod plan;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod shadow;
pub mod shared;
pub mod summary;
pub mod sync;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::EngineConfig;
pub use error::{EngineError, ErrorSeverity, Result, SyncError};
pub use logging::{DiagnosticReport, LogConfig, LogFormat, LogLevel};
pub use plan::{hybrid_race_plan, validate_plan, PlanBuilder};
pub use recorder::{SampleBounds, SampleOutcome, SampleRejection, SegmentMetricsRecorder};
pub use session::{
    AdvanceOutcome, CancelOutcome, Sample, SampleDisposition, SegmentOutcome, SessionSettings,
    SessionView, WorkoutSession,
};
pub use shadow::{ShadowComparator, ShadowComparison, ShadowReference};
pub use shared::{JsonSummaryStore, SharedSession, SummarySink, SummaryWriter, WriterStats};
pub use summary::{aggregate, CompromiseThresholds};
