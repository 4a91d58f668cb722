//! Command-line interface for cctally
//!
//! Defines the clap parser: one subcommand per report, with shared global
//! flags for filtering and cost mode. All reports print JSON to stdout.
//!
//! # Example
//!
//! ```bash
//! # Daily usage for January 2024
//! cctally daily --since 2024-01-01 --until 2024-01-31
//!
//! # Ten most recent sessions in one project
//! cctally sessions --project my-project --limit 10
//!
//! # The active billing block with projections
//! cctally blocks --active
//! ```

use crate::error::Result;
use crate::filters::{self, UsageFilter};
use crate::types::CostMode;
use chrono::{Datelike, Duration, NaiveDate};
use clap::{Args, Parser, Subcommand};

/// Aggregate Claude Code usage and cost data from local transcript files
#[derive(Parser, Debug, Clone)]
#[command(name = "cctally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show informational output (default is quiet mode with only warnings and errors)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Cost calculation mode: auto, calculate, or display
    #[arg(long, default_value = "auto", global = true)]
    pub mode: CostMode,

    /// Use only the embedded pricing table, never the network
    #[arg(long, global = true)]
    pub offline: bool,

    /// Filter by start date (YYYY-MM-DD or YYYY-MM)
    #[arg(long, global = true)]
    pub since: Option<String>,

    /// Filter by end date (YYYY-MM-DD or YYYY-MM)
    #[arg(long, global = true)]
    pub until: Option<String>,

    /// Filter by project name
    #[arg(long, short = 'p', global = true)]
    pub project: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Arguments for the session report
#[derive(Args, Debug, Clone)]
pub struct SessionsArgs {
    /// Maximum number of sessions to list (totals still cover all of them)
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

/// Arguments for the blocks report
#[derive(Args, Debug, Clone)]
pub struct BlocksArgs {
    /// Show only the active block
    #[arg(long)]
    pub active: bool,

    /// Show only recent blocks (last 3 days; the active block is always kept)
    #[arg(long)]
    pub recent: bool,
}

/// Available reports
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Overall usage summary
    Summary,
    /// Daily usage rollup
    Daily,
    /// Monthly usage rollup
    Monthly,
    /// Per-session usage, most recent first
    Sessions(SessionsArgs),
    /// 5-hour billing block timeline
    Blocks(BlocksArgs),
}

impl Cli {
    /// Build the usage filter from the global flags
    ///
    /// `--since` in YYYY-MM form means the first day of that month;
    /// `--until` in YYYY-MM form means its last day.
    pub fn build_filter(&self) -> Result<UsageFilter> {
        let mut filter = UsageFilter::new();

        if let Some(since) = &self.since {
            filter = filter.with_since(parse_since_filter(since)?);
        }
        if let Some(until) = &self.until {
            filter = filter.with_until(parse_until_filter(until)?);
        }
        if let Some(project) = &self.project {
            filter = filter.with_project(project.clone());
        }

        Ok(filter)
    }
}

/// Parse a start-date flag: a full date, or a month meaning its first day
pub fn parse_since_filter(s: &str) -> Result<NaiveDate> {
    filters::parse_date(s).or_else(|_| filters::parse_month(s))
}

/// Parse an end-date flag: a full date, or a month meaning its last day
pub fn parse_until_filter(s: &str) -> Result<NaiveDate> {
    if let Ok(date) = filters::parse_date(s) {
        return Ok(date);
    }
    let first = filters::parse_month(s)?;
    Ok(last_day_of_month(first))
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let (next_year, next_month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    // The first of the month always exists
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_accepts_date_and_month() {
        assert_eq!(
            parse_since_filter("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            parse_since_filter("2024-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert!(parse_since_filter("yesterday").is_err());
    }

    #[test]
    fn test_until_month_means_last_day() {
        assert_eq!(
            parse_until_filter("2024-02").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            parse_until_filter("2024-12").unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_build_filter_combines_flags() {
        let cli = Cli::parse_from([
            "cctally",
            "daily",
            "--since",
            "2024-01",
            "--until",
            "2024-01",
            "--project",
            "alpha",
        ]);
        let filter = cli.build_filter().unwrap();
        assert_eq!(filter.since_date, Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(filter.until_date, Some(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert_eq!(filter.project.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_cli_parses_report_subcommands() {
        let cli = Cli::parse_from(["cctally", "blocks", "--active", "--recent"]);
        match cli.command {
            Command::Blocks(args) => {
                assert!(args.active);
                assert!(args.recent);
            }
            _ => panic!("expected blocks subcommand"),
        }

        let cli = Cli::parse_from(["cctally", "sessions", "--limit", "10", "--mode", "calculate"]);
        assert_eq!(cli.mode, CostMode::Calculate);
        match cli.command {
            Command::Sessions(args) => assert_eq!(args.limit, Some(10)),
            _ => panic!("expected sessions subcommand"),
        }
    }
}
