//! Takedown command-line interface.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use clap::{Parser, Subcommand};

/// Wrestler identity the crawl starts from when no seed is supplied.
pub const DEFAULT_SEED: &str = "064ad7f4-8d16-4dd2-94b1-1dd1c45c3832";

/// The command line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Configuration file path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// The command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the wrestler opponent graph from a seed identity.
    Crawl(CrawlArgs),
    /// Replay stored matches with Glicko-2 and write rating snapshots.
    Rate(RateArgs),
    /// Score held-out matches to compare volatility constraints.
    Eval(EvalArgs),
    /// Write conservative per-weight leaderboards from persisted ratings.
    Leaderboard(LeaderboardArgs),
    /// Export the win/loss graph with a force-directed layout.
    Graph(GraphArgs),
}

#[derive(clap::Args, Debug)]
pub struct CrawlArgs {
    /// Seed wrestler identityPersonId.
    #[arg(long, default_value = DEFAULT_SEED)]
    pub seed: String,
    /// Maximum crawl depth.
    #[arg(long, default_value_t = 3)]
    pub depth: i64,
    /// Clear persisted crawler state before starting.
    #[arg(long)]
    pub reset: bool,
    /// Limit the crawl to the provided weight classes (repeat for multiple).
    #[arg(long = "weight-class")]
    pub weight_classes: Vec<String>,
    /// Only keep matches on or after this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub start_date: Option<NaiveDateTime>,
    /// Only keep matches on or before this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub end_date: Option<NaiveDateTime>,
}

#[derive(clap::Args, Debug)]
pub struct RateArgs {
    /// Volatility constraint(s) to evaluate (repeat to compare several).
    #[arg(long = "tau")]
    pub taus: Vec<f64>,
    /// Persist the results for this tau into the ratings table.
    #[arg(long)]
    pub persist_tau: Option<f64>,
    /// Directory where JSON snapshots are written.
    #[arg(long, default_value = "build")]
    pub output_dir: PathBuf,
    /// Only include matches on or after this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub start_date: Option<NaiveDateTime>,
    /// Only include matches on or before this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub end_date: Option<NaiveDateTime>,
}

#[derive(clap::Args, Debug)]
pub struct EvalArgs {
    /// Tau values to evaluate (repeat flag); defaults to the configured tau.
    #[arg(long = "tau")]
    pub taus: Vec<f64>,
    /// Inclusive upper bound for matches used to fit ratings.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub train_end: NaiveDateTime,
    /// Inclusive lower bound for evaluation matches; defaults to
    /// train-end + 1 second.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub eval_start: Option<NaiveDateTime>,
    /// Optional inclusive upper bound for evaluation matches.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub eval_end: Option<NaiveDateTime>,
    /// Optional global lower bound on matches considered (train + eval).
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub start_date: Option<NaiveDateTime>,
    /// Optional global upper bound on matches considered (train + eval).
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub end_date: Option<NaiveDateTime>,
    /// Optional path to write the evaluation summary JSON.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct LeaderboardArgs {
    /// Where to write the leaderboard JSON.
    #[arg(long, default_value = "build/leaderboards.json")]
    pub output: PathBuf,
    /// Maximum wrestlers to keep per weight class (0 keeps all).
    #[arg(long, default_value_t = 25)]
    pub limit: usize,
    /// Only include wrestlers whose last_updated is on or after this date.
    #[arg(long, value_parser = parse_cli_date)]
    pub min_last_updated: Option<NaiveDate>,
}

#[derive(clap::Args, Debug)]
pub struct GraphArgs {
    /// Weight class to include; repeat or comma-separate values. Use '*'
    /// or omit the flag to include all.
    #[arg(short = 'w', long = "weight-class")]
    pub weight_classes: Vec<String>,
    /// Only include matches on or after this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub start_date: Option<NaiveDateTime>,
    /// Only include matches on or before this timestamp.
    #[arg(long, value_parser = parse_cli_timestamp)]
    pub end_date: Option<NaiveDateTime>,
}

/// Parses a CLI timestamp, accepting `YYYY-MM-DD` or a full ISO-8601
/// timestamp. A trailing `z` is normalized; offsets convert to UTC.
pub fn parse_cli_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    let sanitized = value.trim();
    if sanitized.is_empty() {
        return Err("date/time values cannot be empty".into());
    }
    let normalized = sanitized.replace('z', "Z");

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }

    Err(format!(
        "invalid date/time '{value}'; use YYYY-MM-DD or a full ISO-8601 timestamp"
    ))
}

/// Parses a plain `YYYY-MM-DD` CLI date.
pub fn parse_cli_date(value: &str) -> Result<NaiveDate, String> {
    let sanitized = value.trim();
    if sanitized.is_empty() {
        return Err("dates cannot be empty".into());
    }
    NaiveDate::parse_from_str(sanitized, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{value}'; use YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_dates_at_midnight() {
        let parsed = parse_cli_timestamp("2024-03-01").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-01 00:00:00");
    }

    #[test]
    fn parses_iso_timestamps_with_zulu() {
        let parsed = parse_cli_timestamp("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-01 12:30:00");

        // lowercase z is a known client quirk
        let parsed = parse_cli_timestamp("2024-03-01T12:30:00z").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-01 12:30:00");
    }

    #[test]
    fn normalizes_offsets_to_utc() {
        let parsed = parse_cli_timestamp("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-01 10:30:00");
    }

    #[test]
    fn rejects_empty_and_garbage_input() {
        assert!(parse_cli_timestamp("  ").is_err());
        assert!(parse_cli_timestamp("yesterday").is_err());
        assert!(parse_cli_date("").is_err());
        assert!(parse_cli_date("03/01/2024").is_err());
    }
}
