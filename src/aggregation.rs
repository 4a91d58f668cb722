//! Rollup aggregation for usage records
//!
//! Buckets calculated usage records by day, month, and session, producing
//! per-bucket token totals, cost, and per-model breakdowns. Buckets are built
//! fresh on every pass and are immutable once returned; callers that want
//! memoization wrap these entry points with the cache layer.
//!
//! Sort orders: daily and monthly buckets ascend by key; sessions are
//! returned most-recent-activity first, matching how session lists are
//! consumed.

use crate::blocks::{self, CostedRecord, SessionBlock};
use crate::cost_calculator::CostCalculator;
use crate::error::Result;
use crate::types::{CostMode, DailyDate, ModelName, SessionId, TokenCounts, UsageRecord};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-model slice of one rollup bucket
///
/// Owned exclusively by the bucket that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelBreakdown {
    /// Model identifier
    pub model: String,
    /// Token counts attributable to this model within the bucket
    pub tokens: TokenCounts,
    /// Cost attributable to this model within the bucket
    pub cost: Decimal,
    /// Number of usage records for this model within the bucket
    pub entries: u64,
}

/// Daily usage summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    /// Date of usage
    pub date: DailyDate,
    /// Token counts for the day, summed across models
    pub tokens: TokenCounts,
    /// Total cost for the day in USD
    pub total_cost: Decimal,
    /// Unique models used during the day
    pub models_used: Vec<String>,
    /// Per-model breakdown, one entry per distinct model
    pub model_breakdowns: Vec<ModelBreakdown>,
}

/// Monthly usage summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyUsage {
    /// Year and month in YYYY-MM format
    pub month: String,
    /// Token counts for the month
    pub tokens: TokenCounts,
    /// Total cost for the month in USD
    pub total_cost: Decimal,
    /// Unique models used during the month
    pub models_used: Vec<String>,
    /// Per-model breakdown
    pub model_breakdowns: Vec<ModelBreakdown>,
}

/// Session usage summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUsage {
    /// Session identifier
    pub session_id: SessionId,
    /// Project the session belongs to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Earliest usage in the session
    pub start_time: DateTime<Utc>,
    /// Latest usage in the session
    pub end_time: DateTime<Utc>,
    /// Token counts for the session
    pub tokens: TokenCounts,
    /// Total cost for the session
    pub total_cost: Decimal,
    /// Unique models used during the session
    pub models_used: Vec<String>,
    /// Per-model breakdown
    pub model_breakdowns: Vec<ModelBreakdown>,
}

/// Overall usage summary across every record in scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Token counts summed across all records
    pub tokens: TokenCounts,
    /// Total cost in USD
    pub total_cost: Decimal,
    /// Number of distinct sessions observed
    pub total_sessions: usize,
    /// Unique models used
    pub models_used: Vec<String>,
    /// Per-model breakdown
    pub model_breakdowns: Vec<ModelBreakdown>,
    /// Timestamp of the earliest record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_activity: Option<DateTime<Utc>>,
    /// Timestamp of the latest record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Shared accumulator for one rollup bucket
#[derive(Default)]
struct BucketAccumulator {
    tokens: TokenCounts,
    cost: Decimal,
    per_model: BTreeMap<ModelName, ModelBreakdown>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    project: Option<String>,
}

impl BucketAccumulator {
    fn add_record(&mut self, record: &UsageRecord, cost: Decimal) {
        self.tokens += record.tokens;
        self.cost += cost;

        let breakdown = self
            .per_model
            .entry(record.model.clone())
            .or_insert_with(|| ModelBreakdown {
                model: record.model.to_string(),
                tokens: TokenCounts::default(),
                cost: Decimal::ZERO,
                entries: 0,
            });
        breakdown.tokens += record.tokens;
        breakdown.cost += cost;
        breakdown.entries += 1;

        let timestamp = *record.timestamp.inner();
        if self.start_time.is_none_or(|t| timestamp < t) {
            self.start_time = Some(timestamp);
        }
        if self.end_time.is_none_or(|t| timestamp > t) {
            self.end_time = Some(timestamp);
        }

        if self.project.is_none() {
            self.project = record.project.clone();
        }
    }

    fn models_used(&self) -> Vec<String> {
        self.per_model.keys().map(ModelName::to_string).collect()
    }

    fn breakdowns(&self) -> Vec<ModelBreakdown> {
        self.per_model.values().cloned().collect()
    }
}

/// Grand totals summed across a bucket sequence
///
/// Served pre-summed so consumers never re-add bucket fields themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Totals {
    pub tokens: TokenCounts,
    pub total_cost: Decimal,
}

impl Totals {
    pub fn from_daily(daily_usage: &[DailyUsage]) -> Self {
        let mut totals = Self::default();
        for daily in daily_usage {
            totals.tokens += daily.tokens;
            totals.total_cost += daily.total_cost;
        }
        totals
    }

    pub fn from_monthly(monthly_usage: &[MonthlyUsage]) -> Self {
        let mut totals = Self::default();
        for monthly in monthly_usage {
            totals.tokens += monthly.tokens;
            totals.total_cost += monthly.total_cost;
        }
        totals
    }

    pub fn from_sessions(sessions: &[SessionUsage]) -> Self {
        let mut totals = Self::default();
        for session in sessions {
            totals.tokens += session.tokens;
            totals.total_cost += session.total_cost;
        }
        totals
    }

    /// Block totals exclude gap blocks, which carry no activity
    pub fn from_blocks(blocks: &[SessionBlock]) -> Self {
        let mut totals = Self::default();
        for block in blocks.iter().filter(|b| !b.is_gap) {
            totals.tokens += block.tokens;
            totals.total_cost += block.cost_usd;
        }
        totals
    }
}

/// Main aggregation engine
pub struct Aggregator {
    cost_calculator: Arc<CostCalculator>,
}

impl Aggregator {
    /// Create a new Aggregator
    pub fn new(cost_calculator: Arc<CostCalculator>) -> Self {
        Self { cost_calculator }
    }

    /// Aggregate records by calendar day, ascending by date
    pub async fn aggregate_daily(
        &self,
        records: impl Stream<Item = Result<UsageRecord>>,
        cost_mode: CostMode,
    ) -> Result<Vec<DailyUsage>> {
        let mut daily_map: BTreeMap<DailyDate, BucketAccumulator> = BTreeMap::new();

        tokio::pin!(records);
        while let Some(result) = records.next().await {
            let record = result?;
            let cost = self.record_cost(&record, cost_mode).await?;
            daily_map
                .entry(record.timestamp.to_daily_date())
                .or_default()
                .add_record(&record, cost);
        }

        Ok(daily_map
            .into_iter()
            .map(|(date, acc)| DailyUsage {
                date,
                tokens: acc.tokens,
                total_cost: acc.cost,
                models_used: acc.models_used(),
                model_breakdowns: acc.breakdowns(),
            })
            .collect())
    }

    /// Aggregate records by calendar month, ascending by month key
    pub async fn aggregate_monthly(
        &self,
        records: impl Stream<Item = Result<UsageRecord>>,
        cost_mode: CostMode,
    ) -> Result<Vec<MonthlyUsage>> {
        let mut monthly_map: BTreeMap<String, BucketAccumulator> = BTreeMap::new();

        tokio::pin!(records);
        while let Some(result) = records.next().await {
            let record = result?;
            let cost = self.record_cost(&record, cost_mode).await?;
            monthly_map
                .entry(record.timestamp.month_key())
                .or_default()
                .add_record(&record, cost);
        }

        Ok(monthly_map
            .into_iter()
            .map(|(month, acc)| MonthlyUsage {
                month,
                tokens: acc.tokens,
                total_cost: acc.cost,
                models_used: acc.models_used(),
                model_breakdowns: acc.breakdowns(),
            })
            .collect())
    }

    /// Aggregate records by session, most recent activity first
    pub async fn aggregate_sessions(
        &self,
        records: impl Stream<Item = Result<UsageRecord>>,
        cost_mode: CostMode,
    ) -> Result<Vec<SessionUsage>> {
        let mut session_map: BTreeMap<SessionId, BucketAccumulator> = BTreeMap::new();

        tokio::pin!(records);
        while let Some(result) = records.next().await {
            let record = result?;
            let cost = self.record_cost(&record, cost_mode).await?;
            session_map
                .entry(record.session_id.clone())
                .or_default()
                .add_record(&record, cost);
        }

        let mut sessions: Vec<_> = session_map
            .into_iter()
            .map(|(session_id, acc)| SessionUsage {
                session_id,
                project: acc.project.clone(),
                start_time: acc.start_time.unwrap_or_default(),
                end_time: acc.end_time.unwrap_or_default(),
                tokens: acc.tokens,
                total_cost: acc.cost,
                models_used: acc.models_used(),
                model_breakdowns: acc.breakdowns(),
            })
            .collect();

        sessions.sort_by(|a, b| b.end_time.cmp(&a.end_time));

        Ok(sessions)
    }

    /// Summarize every record in scope into a single overall rollup
    pub async fn summarize(
        &self,
        records: impl Stream<Item = Result<UsageRecord>>,
        cost_mode: CostMode,
    ) -> Result<UsageSummary> {
        let mut acc = BucketAccumulator::default();
        let mut sessions = std::collections::HashSet::new();

        tokio::pin!(records);
        while let Some(result) = records.next().await {
            let record = result?;
            let cost = self.record_cost(&record, cost_mode).await?;
            sessions.insert(record.session_id.clone());
            acc.add_record(&record, cost);
        }

        Ok(UsageSummary {
            tokens: acc.tokens,
            total_cost: acc.cost,
            total_sessions: sessions.len(),
            models_used: acc.models_used(),
            model_breakdowns: acc.breakdowns(),
            first_activity: acc.start_time,
            last_activity: acc.end_time,
        })
    }

    /// Reconstruct the 5-hour billing block timeline from a record stream
    ///
    /// Collects the stream into memory so records can be sorted by timestamp,
    /// which block boundary assignment requires.
    pub async fn aggregate_blocks(
        &self,
        records: impl Stream<Item = Result<UsageRecord>>,
        cost_mode: CostMode,
        block_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionBlock>> {
        let mut costed = Vec::new();

        tokio::pin!(records);
        while let Some(result) = records.next().await {
            let record = result?;
            let cost = self.record_cost(&record, cost_mode).await?;
            costed.push(CostedRecord {
                timestamp: *record.timestamp.inner(),
                model: record.model,
                tokens: record.tokens,
                cost,
            });
        }

        blocks::build_blocks(costed, block_duration, now)
    }

    async fn record_cost(&self, record: &UsageRecord, cost_mode: CostMode) -> Result<Decimal> {
        self.cost_calculator
            .calculate_with_mode(&record.tokens, &record.model, record.cost_usd, cost_mode)
            .await
    }
}
