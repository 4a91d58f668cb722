//! cctally - aggregate Claude Code usage and cost data from local transcripts
//!
//! This library provides functionality to:
//! - Discover and parse JSONL transcript files under the Claude data directory
//! - Calculate token costs from LiteLLM pricing data, with tiered 200k rates
//! - Roll usage up by day, month, and session
//! - Reconstruct the 5-hour billing block timeline, with gap blocks and
//!   burn-rate projections for the active block
//! - Memoize rollups behind an explicitly invalidated cache
//!
//! # Examples
//!
//! ```no_run
//! use cctally::{
//!     filters::UsageFilter,
//!     service::UsageService,
//!     types::CostMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> cctally::Result<()> {
//!     let service = UsageService::new(false).await?;
//!     let daily = service.get_daily(&UsageFilter::new(), CostMode::Auto).await?;
//!     for day in &daily.daily {
//!         println!("{}: ${}", day.date, day.total_cost);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod blocks;
pub mod cache;
pub mod cli;
pub mod cost_calculator;
pub mod data_loader;
pub mod error;
pub mod filters;
pub mod pricing;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use error::{CctallyError, Result};
pub use types::{CostMode, DailyDate, ISOTimestamp, ModelName, SessionId, TokenCounts};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
