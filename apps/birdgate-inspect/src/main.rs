//! Read-only inspection CLI for Birdgate window logs: recent windows,
//! species summaries, decision statistics, and per-window detections.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use birdgate_core::config::Config;
use birdgate_core::gate::GateDecision;
use birdgate_core::log::{create_window_log, feature_field, WindowLog};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "birdgate-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show recent windows.
    Recent {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(short, long)]
        stream: Option<String>,
        #[arg(short, long)]
        decision: Option<String>,
    },
    /// Show a species summary.
    Species {
        #[arg(long)]
        hours: Option<f64>,
        #[arg(short, long)]
        stream: Option<String>,
    },
    /// Show decision statistics.
    Stats {
        #[arg(long)]
        hours: Option<f64>,
        #[arg(short, long)]
        stream: Option<String>,
    },
    /// Show detections recorded for one window.
    Detections {
        window_id: i64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::new().filter_level(log::LevelFilter::Warn).init();

    let args = Args::parse();
    let config = Config::load(&args.config).context("failed to load configuration")?;
    let log = create_window_log(&config.storage, &config.site_id).context("failed to open window log")?;

    match args.command {
        Command::Recent { limit, stream, decision } => cmd_recent(log.as_ref(), limit, stream, decision)?,
        Command::Species { hours, stream } => cmd_species(log.as_ref(), hours, stream)?,
        Command::Stats { hours, stream } => cmd_stats(log.as_ref(), hours, stream)?,
        Command::Detections { window_id } => cmd_detections(log.as_ref(), window_id)?,
    }

    Ok(())
}

fn parse_decision(s: &str) -> Result<GateDecision> {
    match s.to_uppercase().as_str() {
        "SILENCE" => Ok(GateDecision::Silence),
        "TRASH" => Ok(GateDecision::Trash),
        "SEND_TO_BIRDNET" => Ok(GateDecision::SendToBirdnet),
        other => bail!(
            "invalid decision '{other}', expected one of SILENCE, TRASH, SEND_TO_BIRDNET"
        ),
    }
}

fn since_from_hours(hours: Option<f64>) -> Option<DateTime<Utc>> {
    hours.map(|h| Utc::now() - Duration::milliseconds((h * 3_600_000.0) as i64))
}

fn format_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

fn cmd_recent(log: &dyn WindowLog, limit: usize, stream: Option<String>, decision: Option<String>) -> Result<()> {
    let decision = decision.map(|d| parse_decision(&d)).transpose()?;
    let windows = log.get_recent_windows(limit, stream.as_deref(), decision)?;

    if windows.is_empty() {
        println!("No windows found");
        return Ok(());
    }

    println!(
        "{:<20} {:<15} {:<15} {:>8} {:>8} {:>8}",
        "Timestamp", "Stream", "Decision", "RMS", "Bird", "SNR"
    );
    println!("{}", "-".repeat(85));

    for w in &windows {
        let timestamp = w.get("timestamp").and_then(|v| v.as_str()).unwrap_or("");
        let stream_name = w.get("stream_name").and_then(|v| v.as_str()).unwrap_or("");
        let decision = w.get("decision").and_then(|v| v.as_str()).unwrap_or("");
        let rms = feature_field(w, "rms_total_db").unwrap_or(0.0);
        let bird = feature_field(w, "rms_bird_band_db").unwrap_or(0.0);
        let snr = feature_field(w, "snr_bird_db").unwrap_or(0.0);

        println!(
            "{:<20} {:<15} {:<15} {:>8.1} {:>8.1} {:>8.1}",
            format_timestamp(timestamp),
            stream_name,
            decision,
            rms,
            bird,
            snr
        );
    }

    Ok(())
}

fn cmd_species(log: &dyn WindowLog, hours: Option<f64>, stream: Option<String>) -> Result<()> {
    let since = since_from_hours(hours);
    let summary = log.get_species_summary(since, stream.as_deref())?;

    if summary.is_empty() {
        println!("No detections found");
        return Ok(());
    }

    println!("{:<40} {:>8} {:>10} {:>10}", "Species", "Count", "Max Conf", "Avg Conf");
    println!("{}", "-".repeat(70));

    for s in &summary {
        println!(
            "{:<40} {:>8} {:>10.2} {:>10.2}",
            s.species, s.detection_count, s.max_confidence, s.avg_confidence
        );
    }

    Ok(())
}

fn cmd_stats(log: &dyn WindowLog, hours: Option<f64>, stream: Option<String>) -> Result<()> {
    let since = since_from_hours(hours);
    let stats = log.get_decision_stats(since, stream.as_deref())?;

    if stats.is_empty() {
        println!("No data found");
        return Ok(());
    }

    let total: i64 = stats.values().sum();
    let mut entries: Vec<_> = stats.iter().collect();
    entries.sort_by_key(|(decision, _)| decision.to_string());

    println!("Decision Statistics");
    println!("{}", "-".repeat(40));
    for (decision, count) in entries {
        let pct = if total > 0 { *count as f64 / total as f64 * 100.0 } else { 0.0 };
        println!("{:<20} {:>10} ({:>5.1}%)", decision, count, pct);
    }
    println!("{}", "-".repeat(40));
    println!("{:<20} {:>10}", "Total", total);

    Ok(())
}

fn cmd_detections(log: &dyn WindowLog, window_id: i64) -> Result<()> {
    let detections = log.get_detections_for_window(window_id)?;

    if detections.is_empty() {
        println!("No detections found for window {window_id}");
        return Ok(());
    }

    println!("Detections for window {window_id}:");
    println!("{}", "-".repeat(50));
    for d in &detections {
        println!("  {:<35} {:.2}", d.species, d.confidence);
    }

    Ok(())
}
