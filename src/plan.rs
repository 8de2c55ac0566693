//! Workout plan construction and structural validation
//!
//! The engine only checks structure: a non-empty list, ordinals contiguous
//! from 0 in list order, unique ids, and targets that make sense for the
//! segment kind. Plan quality (realistic durations etc.) is not judged here.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::models::{MetadataValue, Segment, SegmentKind, SegmentTargets, StationKind};

/// Check the structural invariants of an ordered segment list
pub fn validate_plan(segments: &[Segment]) -> Result<()> {
    if segments.is_empty() {
        return Err(invalid("plan has no segments"));
    }

    let mut ids = HashSet::with_capacity(segments.len());
    for (position, segment) in segments.iter().enumerate() {
        if segment.ordinal != position {
            return Err(invalid(format!(
                "segment at position {} has ordinal {}; ordinals must be contiguous from 0",
                position, segment.ordinal
            )));
        }
        if !ids.insert(segment.id) {
            return Err(invalid(format!("duplicate segment id {}", segment.id)));
        }
        if segment.targets.pace.is_some() && !segment.kind.is_run() {
            return Err(invalid(format!(
                "segment {} ({}) has a pace target but is not a run",
                position, segment.kind
            )));
        }
        if let Some(zone) = segment.targets.heart_rate_zone {
            if zone.min_bpm > zone.max_bpm {
                return Err(invalid(format!(
                    "segment {} heart rate zone {}-{} is inverted",
                    position, zone.min_bpm, zone.max_bpm
                )));
            }
        }
        if matches!(segment.targets.distance_m, Some(d) if d < Decimal::ZERO) {
            return Err(invalid(format!("segment {} has a negative distance target", position)));
        }
    }

    Ok(())
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidPlan {
        reason: reason.into(),
    }
}

/// Builds a plan with contiguous ordinals
#[derive(Debug, Default)]
pub struct PlanBuilder {
    segments: Vec<Segment>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(mut self, kind: SegmentKind, targets: SegmentTargets) -> Self {
        let ordinal = self.segments.len();
        self.segments.push(Segment::new(ordinal, kind, targets));
        self
    }

    /// Set a label on the most recently added segment
    pub fn label(mut self, label: impl Into<String>) -> Self {
        if let Some(last) = self.segments.last_mut() {
            last.label = Some(label.into());
        }
        self
    }

    /// Attach metadata to the most recently added segment
    pub fn metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        if let Some(last) = self.segments.last_mut() {
            last.metadata.insert(key.into(), value);
        }
        self
    }

    pub fn warmup(self, duration_secs: u64) -> Self {
        self.segment(SegmentKind::Warmup, timed(duration_secs))
    }

    pub fn run(self, distance_m: Decimal) -> Self {
        self.segment(
            SegmentKind::Run,
            SegmentTargets {
                distance_m: Some(distance_m),
                ..Default::default()
            },
        )
    }

    pub fn station(self, station: StationKind, targets: SegmentTargets) -> Self {
        self.segment(SegmentKind::Station(station), targets)
    }

    pub fn rest(self, duration_secs: u64) -> Self {
        self.segment(SegmentKind::Rest, timed(duration_secs))
    }

    pub fn cooldown(self, duration_secs: u64) -> Self {
        self.segment(SegmentKind::Cooldown, timed(duration_secs))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn build(self) -> Result<Vec<Segment>> {
        validate_plan(&self.segments)?;
        Ok(self.segments)
    }
}

fn timed(duration_secs: u64) -> SegmentTargets {
    SegmentTargets {
        duration_ms: Some(duration_secs * 1000),
        ..Default::default()
    }
}

fn distance(meters: i64) -> SegmentTargets {
    SegmentTargets {
        distance_m: Some(Decimal::from(meters)),
        ..Default::default()
    }
}

/// Standard race format: warm-up, 8 x (1km run + station), cool-down
pub fn hybrid_race_plan() -> Result<Vec<Segment>> {
    let stations: [(StationKind, SegmentTargets, Option<f64>); 8] = [
        (StationKind::SkiErg, distance(1000), None),
        (StationKind::SledPush, distance(50), Some(152.0)),
        (StationKind::SledPull, distance(50), Some(103.0)),
        (StationKind::BurpeeBroadJumps, distance(80), None),
        (StationKind::Rowing, distance(1000), None),
        (StationKind::FarmersCarry, distance(200), Some(24.0)),
        (StationKind::SandbagLunges, distance(100), Some(20.0)),
        (
            StationKind::WallBalls,
            SegmentTargets {
                reps: Some(100),
                ..Default::default()
            },
            Some(6.0),
        ),
    ];

    let mut builder = PlanBuilder::new().warmup(600);
    for (station, targets, load_kg) in stations {
        builder = builder.run(Decimal::from(1000)).station(station, targets);
        if let Some(load) = load_kg {
            builder = builder.metadata("load_kg", MetadataValue::Number(load));
        }
    }
    builder.cooldown(600).build()
}
