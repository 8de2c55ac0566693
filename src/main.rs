use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tabled::{settings::Style, Table, Tabled};
use uuid::Uuid;

use hybridrs::config::EngineConfig;
use hybridrs::logging::{init_logging, DiagnosticReport, LogLevel};
use hybridrs::models::{Segment, SegmentMetrics, SessionStatus, WorkoutSummary};
use hybridrs::plan::{hybrid_race_plan, validate_plan};
use hybridrs::replay::{replay, replay_synced, ReplayScript, SyncedReplay};
use hybridrs::summary::aggregate;

/// HybridRS - Workout Execution Engine CLI
///
/// Builds segment plans, replays scripted sessions through the engine and
/// aggregates recorded metrics into workout summaries.
#[derive(Parser)]
#[command(name = "hybridrs")]
#[command(version)]
#[command(about = "Workout execution engine CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the standard race plan as JSON
    Plan {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a scripted session against a plan
    Simulate {
        /// Plan file (JSON list of segments)
        #[arg(short, long)]
        plan: PathBuf,

        /// Replay script (JSON)
        #[arg(short, long)]
        script: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Mirror the session to the peer device over a local sync link
        #[arg(long)]
        sync: bool,

        /// Save a diagnostic report for the run
        #[arg(long)]
        diagnostics: bool,
    },

    /// Aggregate frozen segment metrics into a summary
    Summarize {
        /// Plan file (JSON list of segments)
        #[arg(short, long)]
        plan: PathBuf,

        /// Frozen metrics file (JSON list, one record per completed segment)
        #[arg(short, long)]
        metrics: PathBuf,

        /// Workout id to stamp on the summary
        #[arg(long)]
        workout_id: Option<Uuid>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the active configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EngineConfig::default_config_path);
    let mut config = if config_path.exists() {
        EngineConfig::load_from_file(&config_path)?
    } else {
        EngineConfig::default()
    };

    if cli.verbose > 0 {
        config.logging.level = match cli.verbose {
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Plan { output } => {
            let plan = hybrid_race_plan()?;
            let json = serde_json::to_string_pretty(&plan)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write plan: {}", path.display()))?;
                    println!(
                        "{} {} segments written to {}",
                        "✓".green(),
                        plan.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }

        Commands::Simulate {
            plan,
            script,
            json,
            sync,
            diagnostics,
        } => {
            let segments = load_plan(&plan)?;
            let replay_script = ReplayScript::load(&script)
                .with_context(|| format!("Failed to load script: {}", script.display()))?;

            let mut report = DiagnosticReport::new("simulate");
            report.add_context("plan", plan.display().to_string());
            report.add_context("script", script.display().to_string());

            let started = Instant::now();
            let outcome = if sync {
                report.add_context("driver", config.sync.driver.to_string());
                run_synced(segments.clone(), &replay_script, &config).map(|synced| {
                    let SyncedReplay {
                        result,
                        mirror,
                        stats,
                    } = synced;
                    (result, Some((mirror, stats)))
                })
            } else {
                replay(segments.clone(), &replay_script, config.session_settings())
                    .map(|result| (result, None))
            };
            report.set_duration(started.elapsed());

            let (result, mirrored) = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.add_error(&e);
                    if diagnostics {
                        save_diagnostics(&report)?;
                    }
                    return Err(e.into());
                }
            };
            result.annotate(&mut report);
            if diagnostics {
                save_diagnostics(&report)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            for rejected in &result.rejected_commands {
                println!(
                    "{} {:>8}ms {:?}: {}",
                    "!".yellow(),
                    rejected.at_ms,
                    rejected.action,
                    rejected.message
                );
            }
            print_segments(&segments, &result.frozen);
            println!(
                "Samples: {} accepted, {} rejected, {} discarded",
                result.samples.accepted,
                result.samples.rejected,
                result.samples.discarded
            );
            match &result.summary {
                Some(summary) => print_summary(summary),
                None => println!(
                    "{} Session ended {} with no summary",
                    "•".dimmed(),
                    result.view.status
                ),
            }
            if let Some((mirror, stats)) = mirrored {
                let segment = mirror
                    .current_segment()
                    .map(|s| s.display_name())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} mirror: {} on {} (sequence {})",
                    "⇄".cyan(),
                    config.sync.driver.peer(),
                    mirror.status(),
                    segment,
                    mirror.sequence()
                );
                println!(
                    "  {} snapshots sent, {} coalesced, {} summaries, {} retries",
                    stats.snapshots_sent,
                    stats.snapshots_coalesced,
                    stats.summaries_sent,
                    stats.retries
                );
            }
        }

        Commands::Summarize {
            plan,
            metrics,
            workout_id,
            json,
        } => {
            let segments = load_plan(&plan)?;
            let content = fs::read_to_string(&metrics)
                .with_context(|| format!("Failed to read metrics: {}", metrics.display()))?;
            let frozen: Vec<SegmentMetrics> =
                serde_json::from_str(&content).with_context(|| "Failed to parse metrics JSON")?;

            let status = if frozen.len() >= segments.len() {
                SessionStatus::Completed
            } else {
                SessionStatus::Cancelled
            };
            let summary = aggregate(
                workout_id.unwrap_or_else(Uuid::new_v4),
                status,
                &frozen,
                &segments,
                &config.thresholds,
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_segments(&segments, &frozen);
                print_summary(&summary);
            }
        }

        Commands::Config { init, show } => {
            if init {
                if config_path.exists() {
                    println!(
                        "{} Config already exists: {}",
                        "•".dimmed(),
                        config_path.display()
                    );
                } else {
                    let mut fresh = EngineConfig::default();
                    fresh.save_to_file(&config_path)?;
                    println!("{} Wrote {}", "✓".green(), config_path.display());
                }
            }
            if show || !init {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn load_plan(path: &Path) -> Result<Vec<Segment>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan: {}", path.display()))?;
    let plan: Vec<Segment> =
        serde_json::from_str(&content).with_context(|| "Failed to parse plan JSON")?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Drive the replay on a tokio runtime so the sync worker can run
fn run_synced(
    plan: Vec<Segment>,
    script: &ReplayScript,
    config: &EngineConfig,
) -> hybridrs::Result<SyncedReplay> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(replay_synced(
        plan,
        script,
        config.session_settings(),
        config.sync.retry.clone(),
    ))
}

fn save_diagnostics(report: &DiagnosticReport) -> Result<()> {
    let path = report.save_default()?;
    let marker = if report.has_critical() {
        "✗".red()
    } else {
        "!".yellow()
    };
    eprintln!("{} Diagnostic report: {}", marker, path.display());
    Ok(())
}

#[derive(Tabled)]
struct SegmentRow {
    #[tabled(rename = "#")]
    ordinal: usize,
    #[tabled(rename = "Segment")]
    name: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Reps")]
    reps: u32,
    #[tabled(rename = "HR avg")]
    heart_rate: String,
}

fn print_segments(segments: &[Segment], frozen: &[SegmentMetrics]) {
    let rows: Vec<SegmentRow> = frozen
        .iter()
        .map(|m| SegmentRow {
            ordinal: m.ordinal,
            name: segments
                .get(m.ordinal)
                .map(|s| s.display_name())
                .unwrap_or_else(|| "?".to_string()),
            time: format_ms(m.duration_ms),
            distance: format!("{} m", m.distance_m.round_dp(1)),
            reps: m.reps,
            heart_rate: m
                .heart_rate
                .map(|hr| hr.avg.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "No segments completed".dimmed());
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}

fn print_summary(summary: &WorkoutSummary) {
    let heading = if summary.is_partial() {
        "Partial workout summary".yellow().bold()
    } else {
        "Workout summary".green().bold()
    };
    println!("{}", heading);
    println!("  Workout:   {}", summary.workout_id);
    println!(
        "  Segments:  {}/{}",
        summary.segments_completed, summary.total_segments
    );
    println!("  Total:     {}", format_ms(summary.total_time_ms));
    println!("  Running:   {}", format_ms(summary.run_time_ms));
    println!("  Stations:  {}", format_ms(summary.station_time_ms));
    println!("  Distance:  {} m", summary.total_distance_m.round_dp(1));
    if let Some(hr) = summary.heart_rate {
        println!("  Heart rate: avg {} / max {} bpm", hr.avg, hr.max);
    }
    if summary.rejected_samples > 0 {
        println!("  Rejected samples: {}", summary.rejected_samples);
    }
    for flagged in &summary.compromised {
        println!(
            "  {} segment {}: {} ({})",
            "⚠".red(),
            flagged.ordinal,
            flagged.reason,
            flagged.deviation
        );
    }
}

fn format_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let (h, m, s) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
