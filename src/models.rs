use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Station exercises used in hybrid fitness races
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationKind {
    SkiErg,
    SledPush,
    SledPull,
    BurpeeBroadJumps,
    Rowing,
    FarmersCarry,
    SandbagLunges,
    WallBalls,
    Custom(String),
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationKind::SkiErg => write!(f, "SkiErg"),
            StationKind::SledPush => write!(f, "Sled Push"),
            StationKind::SledPull => write!(f, "Sled Pull"),
            StationKind::BurpeeBroadJumps => write!(f, "Burpee Broad Jumps"),
            StationKind::Rowing => write!(f, "Rowing"),
            StationKind::FarmersCarry => write!(f, "Farmers Carry"),
            StationKind::SandbagLunges => write!(f, "Sandbag Lunges"),
            StationKind::WallBalls => write!(f, "Wall Balls"),
            StationKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Kind of workout unit; determines which targets are meaningful
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Warmup,
    Run,
    Station(StationKind),
    Rest,
    Transition,
    Strength,
    Cooldown,
}

impl SegmentKind {
    pub fn is_run(&self) -> bool {
        matches!(self, SegmentKind::Run)
    }

    pub fn is_station(&self) -> bool {
        matches!(self, SegmentKind::Station(_))
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::Warmup => write!(f, "Warm-up"),
            SegmentKind::Run => write!(f, "Run"),
            SegmentKind::Station(station) => write!(f, "{}", station),
            SegmentKind::Rest => write!(f, "Rest"),
            SegmentKind::Transition => write!(f, "Transition"),
            SegmentKind::Strength => write!(f, "Strength"),
            SegmentKind::Cooldown => write!(f, "Cool-down"),
        }
    }
}

/// Target running pace, stored as seconds per kilometer
///
/// Parses and renders the `m:ss` form, with an optional `/km` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPace {
    seconds_per_km: u32,
}

impl TargetPace {
    pub fn from_seconds_per_km(seconds_per_km: u32) -> Self {
        Self { seconds_per_km }
    }

    pub fn seconds_per_km(&self) -> u32 {
        self.seconds_per_km
    }

    /// Expected time in milliseconds to cover `distance_m` at this pace
    pub fn expected_duration_ms(&self, distance_m: Decimal) -> u64 {
        let ms = Decimal::from(self.seconds_per_km) * distance_m; // s/km * m == ms
        ms.round().to_u64().unwrap_or(0)
    }
}

impl FromStr for TargetPace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_suffix("/km").unwrap_or(trimmed).trim();
        let (minutes, seconds) = body
            .split_once(':')
            .ok_or_else(|| format!("Invalid pace '{}': expected m:ss", s))?;
        let minutes: u32 = minutes
            .trim()
            .parse()
            .map_err(|_| format!("Invalid pace minutes in '{}'", s))?;
        let seconds: u32 = seconds
            .trim()
            .parse()
            .map_err(|_| format!("Invalid pace seconds in '{}'", s))?;
        if seconds >= 60 {
            return Err(format!("Invalid pace '{}': seconds must be below 60", s));
        }
        let total = minutes
            .checked_mul(60)
            .and_then(|m| m.checked_add(seconds))
            .ok_or_else(|| format!("Invalid pace '{}': too slow to represent", s))?;
        if total == 0 {
            return Err(format!("Invalid pace '{}': must be positive", s));
        }
        Ok(Self::from_seconds_per_km(total))
    }
}

impl TryFrom<String> for TargetPace {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetPace> for String {
    fn from(pace: TargetPace) -> Self {
        pace.to_string()
    }
}

impl fmt::Display for TargetPace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}/km", self.seconds_per_km / 60, self.seconds_per_km % 60)
    }
}

/// Heart rate band a segment should stay within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateZone {
    /// Zone number in the 5-zone model, when derived from one
    pub zone: Option<u8>,
    pub min_bpm: u16,
    pub max_bpm: u16,
}

impl HeartRateZone {
    pub fn new(min_bpm: u16, max_bpm: u16) -> Self {
        Self {
            zone: None,
            min_bpm,
            max_bpm,
        }
    }

    /// Derive a zone band from Lactate Threshold Heart Rate
    ///
    /// - Z1: < 81% LTHR (Active Recovery)
    /// - Z2: 81-89% LTHR (Aerobic Base)
    /// - Z3: 90-93% LTHR (Aerobic)
    /// - Z4: 94-99% LTHR (Lactate Threshold)
    /// - Z5: 100%+ LTHR (VO2 Max)
    pub fn from_lthr(lthr: u16, zone: u8) -> Option<Self> {
        let lthr_decimal = Decimal::from(lthr);
        let pct = |p: Decimal| (lthr_decimal * p).round().to_u16();
        let (min, max) = match zone {
            1 => (Some(0), pct(dec!(0.81))),
            2 => (pct(dec!(0.81)), pct(dec!(0.89))),
            3 => (pct(dec!(0.90)), pct(dec!(0.93))),
            4 => (pct(dec!(0.94)), pct(dec!(0.99))),
            5 => (Some(lthr), Some(lthr + 20)),
            _ => return None,
        };
        Some(Self {
            zone: Some(zone),
            min_bpm: min?,
            max_bpm: max?,
        })
    }

    pub fn contains(&self, bpm: u16) -> bool {
        bpm >= self.min_bpm && bpm <= self.max_bpm
    }
}

/// Optional numeric targets for a segment
///
/// Absent and zero are distinct: `None` means no target was set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentTargets {
    /// Target duration in milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Target distance in meters
    #[serde(default)]
    pub distance_m: Option<Decimal>,

    /// Target repetition count
    #[serde(default)]
    pub reps: Option<u32>,

    /// Target pace (run segments only)
    #[serde(default)]
    pub pace: Option<TargetPace>,

    /// Target heart rate band
    #[serde(default)]
    pub heart_rate_zone: Option<HeartRateZone>,
}

/// Typed value for loosely structured segment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

/// One immutable unit of a workout plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Stable identifier
    pub id: Uuid,

    /// Position within the workout, contiguous from 0
    pub ordinal: usize,

    /// Segment kind
    pub kind: SegmentKind,

    /// Optional targets
    #[serde(default)]
    pub targets: SegmentTargets,

    /// Display label
    #[serde(default)]
    pub label: Option<String>,

    /// Extra typed attributes (equipment weight, lane, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Segment {
    pub fn new(ordinal: usize, kind: SegmentKind, targets: SegmentTargets) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal,
            kind,
            targets,
            label: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

/// Heart rate statistics derived from a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateStats {
    pub min: u16,
    pub max: u16,
    pub avg: u16,
    pub samples: u32,
    /// Sum of all accepted samples, so averages combine without rounding drift
    pub sum: u64,
}

impl HeartRateStats {
    /// Build stats from raw totals; `None` when there are no samples
    pub fn from_totals(min: u16, max: u16, sum: u64, samples: u32) -> Option<Self> {
        if samples == 0 {
            return None;
        }
        let count = u64::from(samples);
        Some(Self {
            min,
            max,
            avg: ((sum + count / 2) / count) as u16,
            samples,
            sum,
        })
    }
}

/// Count of samples dropped for falling outside plausible bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionTally {
    pub heart_rate: u32,
    pub distance: u32,
    pub reps: u32,
    pub calories: u32,
}

impl RejectionTally {
    pub fn total(&self) -> u32 {
        self.heart_rate + self.distance + self.reps + self.calories
    }
}

/// Frozen snapshot of one segment's recorded performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetrics {
    /// Segment this record belongs to
    pub segment_id: Uuid,

    /// Ordinal of the segment
    pub ordinal: usize,

    /// Active duration in milliseconds, paused time excluded
    pub duration_ms: u64,

    /// Distance accumulated in meters
    #[serde(with = "rust_decimal::serde::str")]
    pub distance_m: Decimal,

    /// Repetitions observed
    pub reps: u32,

    /// Calories burned
    pub calories: u32,

    /// Heart rate statistics, absent when no samples arrived
    pub heart_rate: Option<HeartRateStats>,

    /// Dropped sample counts
    pub rejected: RejectionTally,
}

impl SegmentMetrics {
    /// Average pace in seconds per km, when any distance was covered
    pub fn pace_secs_per_km(&self) -> Option<Decimal> {
        if self.distance_m <= Decimal::ZERO {
            return None;
        }
        // ms / m == s / km
        Some(Decimal::from(self.duration_ms) / self.distance_m)
    }
}

/// Lifecycle status of a workout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Active,
    Paused,
    Transitioning,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::NotStarted => "not started",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Transitioning => "transitioning",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Why a segment was flagged as compromised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompromiseReason {
    HeartRateAboveZone,
    PaceBehindTarget,
    PaceAheadOfTarget,
}

impl fmt::Display for CompromiseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompromiseReason::HeartRateAboveZone => write!(f, "heart rate above zone"),
            CompromiseReason::PaceBehindTarget => write!(f, "pace behind target"),
            CompromiseReason::PaceAheadOfTarget => write!(f, "pace ahead of target"),
        }
    }
}

/// Magnitude by which a segment missed its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deviation {
    /// Beats per minute over the zone's upper bound
    Bpm(u16),
    /// Seconds per km off the target pace
    Seconds(u32),
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deviation::Bpm(bpm) => write!(f, "+{} bpm", bpm),
            Deviation::Seconds(secs) => write!(f, "{}s/km", secs),
        }
    }
}

/// A completed segment that deviated from its target beyond tolerance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompromisedSegment {
    pub ordinal: usize,
    pub segment_id: Uuid,
    pub reason: CompromiseReason,
    pub deviation: Deviation,
}

/// Final record of a workout, derived from its frozen metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSummary {
    /// Workout this summary belongs to
    pub workout_id: Uuid,

    /// Completed, or Cancelled for a partial summary
    pub status: SessionStatus,

    /// Sum of all frozen segment durations
    pub total_time_ms: u64,

    /// Time spent in run segments
    pub run_time_ms: u64,

    /// Time spent in station segments
    pub station_time_ms: u64,

    /// Time spent in every other segment kind
    pub other_time_ms: u64,

    /// Number of frozen segments
    pub segments_completed: usize,

    /// Number of segments in the plan
    pub total_segments: usize,

    /// Aggregate heart rate over segments that recorded samples
    pub heart_rate: Option<HeartRateStats>,

    /// Total distance in meters
    #[serde(with = "rust_decimal::serde::str")]
    pub total_distance_m: Decimal,

    /// Total repetitions
    pub total_reps: u32,

    /// Total calories
    pub total_calories: u32,

    /// Samples dropped across all segments
    pub rejected_samples: u32,

    /// Segments that deviated from target
    pub compromised: Vec<CompromisedSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_pace_parsing() {
        let pace: TargetPace = "4:45".parse().unwrap();
        assert_eq!(pace.seconds_per_km(), 285);

        let pace: TargetPace = " 5:05/km ".parse().unwrap();
        assert_eq!(pace.seconds_per_km(), 305);
        assert_eq!(pace.to_string(), "5:05/km");

        assert!("4:75".parse::<TargetPace>().is_err());
        assert!("fast".parse::<TargetPace>().is_err());
        assert!("0:00".parse::<TargetPace>().is_err());
    }

    #[test]
    fn test_target_pace_rejects_overflowing_minutes() {
        let err = "71582789:00".parse::<TargetPace>().unwrap_err();
        assert!(err.contains("too slow"));

        let json = r#"{"pace": "99999999:59/km"}"#;
        assert!(serde_json::from_str::<SegmentTargets>(json).is_err());
    }

    #[test]
    fn test_target_pace_expected_duration() {
        let pace = TargetPace::from_seconds_per_km(300);
        assert_eq!(pace.expected_duration_ms(dec!(1000)), 300_000);
        assert_eq!(pace.expected_duration_ms(dec!(500)), 150_000);
    }

    #[test]
    fn test_target_pace_serde_as_string() {
        let targets = SegmentTargets {
            pace: Some(TargetPace::from_seconds_per_km(270)),
            ..Default::default()
        };
        let json = serde_json::to_string(&targets).unwrap();
        assert!(json.contains("\"4:30/km\""));
        let back: SegmentTargets = serde_json::from_str(&json).unwrap();
        assert_eq!(back, targets);
    }

    #[test]
    fn test_hr_zone_from_lthr() {
        let zone = HeartRateZone::from_lthr(170, 2).unwrap();
        assert_eq!(zone.zone, Some(2));
        assert_eq!(zone.min_bpm, 138);
        assert_eq!(zone.max_bpm, 151);
        assert!(zone.contains(145));
        assert!(!zone.contains(160));

        let zone5 = HeartRateZone::from_lthr(170, 5).unwrap();
        assert_eq!(zone5.max_bpm, 190);

        assert!(HeartRateZone::from_lthr(170, 6).is_none());
    }

    #[test]
    fn test_metadata_is_typed() {
        let json = r#"{"weight_kg": 20, "indoor": true, "lane": "B"}"#;
        let metadata: BTreeMap<String, MetadataValue> = serde_json::from_str(json).unwrap();
        assert_eq!(metadata["weight_kg"], MetadataValue::Number(20.0));
        assert_eq!(metadata["indoor"], MetadataValue::Flag(true));
        assert_eq!(metadata["lane"], MetadataValue::Text("B".to_string()));
    }

    #[test]
    fn test_pace_from_metrics() {
        let metrics = SegmentMetrics {
            segment_id: Uuid::new_v4(),
            ordinal: 1,
            duration_ms: 240_000,
            distance_m: dec!(1000),
            reps: 0,
            calories: 0,
            heart_rate: None,
            rejected: RejectionTally::default(),
        };
        assert_eq!(metrics.pace_secs_per_km(), Some(dec!(240)));

        let stationary = SegmentMetrics {
            distance_m: Decimal::ZERO,
            ..metrics
        };
        assert_eq!(stationary.pace_secs_per_km(), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert_eq!(SessionStatus::NotStarted.to_string(), "not started");
    }
}
