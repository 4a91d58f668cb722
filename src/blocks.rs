//! Billing block reconstruction
//!
//! Partitions a chronological usage stream into fixed-duration (5-hour)
//! non-overlapping windows. The grid is anchored to the first record's
//! timestamp floored to the hour, not to calendar midnight: each stream gets
//! its own block grid starting at its own first activity. Windows with no
//! activity between two active windows become gap blocks, so the emitted
//! sequence covers the full span from first to last record with no holes.
//!
//! Only the final block can be active, and only while `now` falls inside its
//! window. The active block carries projections that extrapolate the block's
//! burn rate linearly to the end of the window — an approximation assuming
//! the current pace continues, not a guarantee.

use crate::error::{CctallyError, Result};
use crate::types::{ModelName, TokenCounts};
use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nominal billing window length
pub const BLOCK_DURATION_HOURS: i64 = 5;

/// Default recency cutoff for block listings, in days
pub const RECENT_BLOCK_DAYS: i64 = 3;

/// A usage record with its cost already resolved
///
/// Block reconstruction runs downstream of the cost calculator and never
/// recomputes cost.
#[derive(Debug, Clone)]
pub struct CostedRecord {
    pub timestamp: DateTime<Utc>,
    pub model: ModelName,
    pub tokens: TokenCounts,
    pub cost: Decimal,
}

/// Live projections for the currently-open block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockProjection {
    /// Input+output tokens consumed per minute since the block opened
    pub burn_rate_tokens_per_minute: f64,
    /// Cost accrual rate extrapolated to an hour
    pub burn_rate_cost_per_hour: Decimal,
    /// Projected input+output tokens at the end of the window
    pub projected_total_tokens: u64,
    /// Projected cost at the end of the window
    pub projected_total_cost: Decimal,
    /// Minutes left in the window, floored at zero
    pub remaining_minutes: i64,
}

/// One 5-hour billing window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlock {
    /// Block identifier: the start instant in RFC 3339
    pub id: String,
    /// Window start, on the stream's block grid
    pub start_time: DateTime<Utc>,
    /// Window end, `start_time + block duration`
    pub end_time: DateTime<Utc>,
    /// Last usage observed inside the window (None for gap blocks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Whether this is the most recent block and `now` is inside its window
    pub is_active: bool,
    /// Whether this window saw no activity at all
    #[serde(default)]
    pub is_gap: bool,
    /// Token counts within the window
    pub tokens: TokenCounts,
    /// Cost within the window in USD
    pub cost_usd: Decimal,
    /// Unique models used within the window
    pub models: Vec<String>,
    /// Present only while the block is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<BlockProjection>,
}

impl SessionBlock {
    fn gap(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: start_time.to_rfc3339(),
            start_time,
            end_time,
            actual_end_time: None,
            is_active: false,
            is_gap: true,
            tokens: TokenCounts::default(),
            cost_usd: Decimal::ZERO,
            models: Vec::new(),
            projection: None,
        }
    }
}

/// Accumulator for one activity-bearing window
struct BlockAccumulator {
    tokens: TokenCounts,
    cost: Decimal,
    models: BTreeMap<ModelName, ()>,
    last_entry_time: Option<DateTime<Utc>>,
}

impl BlockAccumulator {
    fn new() -> Self {
        Self {
            tokens: TokenCounts::default(),
            cost: Decimal::ZERO,
            models: BTreeMap::new(),
            last_entry_time: None,
        }
    }

    fn add(&mut self, record: &CostedRecord) {
        self.tokens += record.tokens;
        self.cost += record.cost;
        self.models.insert(record.model.clone(), ());
        self.last_entry_time = Some(record.timestamp);
    }

    fn finish(self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> SessionBlock {
        SessionBlock {
            id: start_time.to_rfc3339(),
            start_time,
            end_time,
            actual_end_time: self.last_entry_time,
            is_active: false,
            is_gap: false,
            tokens: self.tokens,
            cost_usd: self.cost,
            models: self.models.into_keys().map(|m| m.to_string()).collect(),
            projection: None,
        }
    }
}

/// Truncate a timestamp to the hour boundary (XX:00:00)
fn floor_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Partition records into contiguous billing blocks
///
/// Records are sorted ascending by timestamp before assignment, so unsorted
/// input is tolerated. A record preceding the block anchor after sorting
/// would mean the grid itself is wrong and is surfaced as
/// [`CctallyError::BlockOrdering`].
pub fn build_blocks(
    mut records: Vec<CostedRecord>,
    block_duration: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<SessionBlock>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let duration_secs = block_duration.num_seconds();
    if duration_secs <= 0 {
        return Err(CctallyError::InvalidArgument(format!(
            "block duration must be positive, got {block_duration}"
        )));
    }

    records.sort_by_key(|r| r.timestamp);

    let anchor = floor_to_hour(records[0].timestamp);
    let window = |index: i64| {
        let start = anchor + Duration::seconds(index * duration_secs);
        (start, start + block_duration)
    };

    let mut blocks = Vec::new();
    let mut current_index: i64 = 0;
    let mut acc = BlockAccumulator::new();

    for record in &records {
        let offset_secs = (record.timestamp - anchor).num_seconds();
        if offset_secs < 0 {
            return Err(CctallyError::BlockOrdering(format!(
                "record at {} precedes block anchor {}",
                record.timestamp.to_rfc3339(),
                anchor.to_rfc3339()
            )));
        }

        let index = offset_secs / duration_secs;
        if index != current_index {
            let (start, end) = window(current_index);
            blocks.push(std::mem::replace(&mut acc, BlockAccumulator::new()).finish(start, end));

            // Idle whole windows between two activity bursts become gap blocks
            for gap_index in (current_index + 1)..index {
                let (gap_start, gap_end) = window(gap_index);
                blocks.push(SessionBlock::gap(gap_start, gap_end));
            }

            current_index = index;
        }

        acc.add(record);
    }

    let (start, end) = window(current_index);
    blocks.push(acc.finish(start, end));

    refresh_activation(&mut blocks, now);

    Ok(blocks)
}

/// Recompute the active flag and projection against the current clock
///
/// Only the most recent block can be open; a `now` beyond its window
/// (offline analysis of old transcripts) leaves everything inactive. Also
/// used to bring a memoized block list back in sync with wall time.
pub fn refresh_activation(blocks: &mut [SessionBlock], now: DateTime<Utc>) {
    for block in blocks.iter_mut() {
        block.is_active = false;
        block.projection = None;
    }

    if let Some(last) = blocks.last_mut()
        && last.start_time <= now
        && now < last.end_time
    {
        last.is_active = true;
        let duration = last.end_time - last.start_time;
        last.projection = Some(project_block(last, duration, now));
    }
}

/// Linear burn-rate extrapolation for the active block
fn project_block(block: &SessionBlock, block_duration: Duration, now: DateTime<Utc>) -> BlockProjection {
    // Floor at one minute to avoid division by zero right after the window opens
    let elapsed_minutes = (now - block.start_time).num_minutes().max(1);
    let remaining_minutes = (block_duration.num_minutes() - elapsed_minutes).max(0);

    let burn_tokens = block.tokens.non_cache_total();
    let burn_rate_tokens_per_minute = burn_tokens as f64 / elapsed_minutes as f64;

    let elapsed = Decimal::from(elapsed_minutes);
    let burn_rate_cost_per_hour = block.cost_usd / elapsed * Decimal::from(60);

    let projected_total_cost =
        block.cost_usd + burn_rate_cost_per_hour * Decimal::from(remaining_minutes) / Decimal::from(60);
    let projected_total_tokens =
        burn_tokens + (burn_rate_tokens_per_minute * remaining_minutes as f64).round() as u64;

    BlockProjection {
        burn_rate_tokens_per_minute,
        burn_rate_cost_per_hour,
        projected_total_tokens,
        projected_total_cost,
        remaining_minutes,
    }
}

/// Filter a block listing by active and recency flags
///
/// `recent` keeps blocks starting within [`RECENT_BLOCK_DAYS`]; active blocks
/// are always retained regardless of age.
pub fn filter_blocks(blocks: &mut Vec<SessionBlock>, active: bool, recent: bool, now: DateTime<Utc>) {
    if active {
        blocks.retain(|b| b.is_active);
    }

    if recent {
        let cutoff = now - Duration::days(RECENT_BLOCK_DAYS);
        blocks.retain(|b| b.is_active || b.start_time > cutoff);
    }
}
