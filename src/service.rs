//! High-level usage query service
//!
//! [`UsageService`] is the facade the CLI (and any embedding program) talks
//! to: it wires the data loader, pricing source, cost calculator, aggregator,
//! and per-kind rollup caches together and exposes one method per report.
//! Reports carry pre-summed grand totals so consumers never re-add bucket
//! fields themselves.
//!
//! Cached rollups never expire on their own; callers invalidate explicitly
//! after new transcript data lands.

use crate::aggregation::{
    Aggregator, DailyUsage, MonthlyUsage, SessionUsage, Totals, UsageSummary,
};
use crate::blocks::{self, SessionBlock, BLOCK_DURATION_HOURS};
use crate::cache::{RollupCache, ScopeKey};
use crate::cost_calculator::CostCalculator;
use crate::data_loader::DataLoader;
use crate::error::{CctallyError, Result};
use crate::filters::UsageFilter;
use crate::pricing::PricingSource;
use crate::types::CostMode;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Which family of cached rollups an invalidation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Summary,
    Daily,
    Monthly,
    Sessions,
    Blocks,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Summary => "summary",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Sessions => "sessions",
            Self::Blocks => "blocks",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for CacheKind {
    type Err = CctallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            "sessions" => Ok(Self::Sessions),
            "blocks" => Ok(Self::Blocks),
            _ => Err(CctallyError::InvalidArgument(format!(
                "unknown cache kind '{s}'"
            ))),
        }
    }
}

/// Daily rollup plus grand totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub daily: Vec<DailyUsage>,
    pub totals: Totals,
}

/// Monthly rollup plus grand totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyReport {
    pub monthly: Vec<MonthlyUsage>,
    pub totals: Totals,
}

/// Session listing plus grand totals
///
/// `totals` and `total_sessions` cover every matching session even when a
/// limit truncates the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub sessions: Vec<SessionUsage>,
    pub total_sessions: usize,
    pub totals: Totals,
}

/// Billing block timeline plus grand totals over non-gap blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReport {
    pub blocks: Vec<SessionBlock>,
    pub totals: Totals,
}

/// Query options for the block timeline
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockOptions {
    /// Return only the active block
    pub active: bool,
    /// Drop inactive blocks older than the recency cutoff
    pub recent: bool,
}

/// Facade over loading, costing, aggregation, and caching
pub struct UsageService {
    loader: DataLoader,
    aggregator: Aggregator,
    summary_cache: RollupCache<UsageSummary>,
    daily_cache: RollupCache<Vec<DailyUsage>>,
    monthly_cache: RollupCache<Vec<MonthlyUsage>>,
    session_cache: RollupCache<Vec<SessionUsage>>,
    block_cache: RollupCache<Vec<SessionBlock>>,
}

impl UsageService {
    /// Create a service over the discovered Claude data directories
    pub async fn new(offline: bool) -> Result<Self> {
        let loader = DataLoader::new().await?;
        Ok(Self::with_loader(loader, offline))
    }

    /// Create a service over an explicit loader
    pub fn with_loader(loader: DataLoader, offline: bool) -> Self {
        let pricing = Arc::new(PricingSource::new(offline));
        let aggregator = Aggregator::new(Arc::new(CostCalculator::new(pricing)));
        Self {
            loader,
            aggregator,
            summary_cache: RollupCache::new(),
            daily_cache: RollupCache::new(),
            monthly_cache: RollupCache::new(),
            session_cache: RollupCache::new(),
            block_cache: RollupCache::new(),
        }
    }

    fn scope_key(filter: &UsageFilter, cost_mode: CostMode) -> ScopeKey {
        let params = format!(
            "since={:?}|until={:?}|mode={}",
            filter.since_date, filter.until_date, cost_mode
        );
        ScopeKey::new(filter.project.clone(), params)
    }

    fn records(
        &self,
        filter: UsageFilter,
    ) -> impl futures::Stream<Item = Result<crate::types::UsageRecord>> + '_ {
        filter.filter_stream(self.loader.load_usage_records())
    }

    /// Overall usage summary across everything the filter admits
    pub async fn get_summary(
        &self,
        filter: &UsageFilter,
        cost_mode: CostMode,
    ) -> Result<UsageSummary> {
        let key = Self::scope_key(filter, cost_mode);
        let summary = self
            .summary_cache
            .get_or_compute(key, || async {
                self.aggregator.summarize(self.records(filter.clone()), cost_mode).await
            })
            .await?;
        Ok((*summary).clone())
    }

    /// Daily rollup, ascending by date
    pub async fn get_daily(
        &self,
        filter: &UsageFilter,
        cost_mode: CostMode,
    ) -> Result<DailyReport> {
        let key = Self::scope_key(filter, cost_mode);
        let daily = self
            .daily_cache
            .get_or_compute(key, || async {
                self.aggregator.aggregate_daily(self.records(filter.clone()), cost_mode).await
            })
            .await?;
        Ok(DailyReport {
            totals: Totals::from_daily(&daily),
            daily: (*daily).clone(),
        })
    }

    /// Monthly rollup, ascending by month
    pub async fn get_monthly(
        &self,
        filter: &UsageFilter,
        cost_mode: CostMode,
    ) -> Result<MonthlyReport> {
        let key = Self::scope_key(filter, cost_mode);
        let monthly = self
            .monthly_cache
            .get_or_compute(key, || async {
                self.aggregator.aggregate_monthly(self.records(filter.clone()), cost_mode).await
            })
            .await?;
        Ok(MonthlyReport {
            totals: Totals::from_monthly(&monthly),
            monthly: (*monthly).clone(),
        })
    }

    /// Session listing, most recent activity first
    ///
    /// A limit truncates the listing only; totals still cover every matching
    /// session.
    pub async fn get_sessions(
        &self,
        filter: &UsageFilter,
        cost_mode: CostMode,
        limit: Option<usize>,
    ) -> Result<SessionReport> {
        let key = Self::scope_key(filter, cost_mode);
        let sessions = self
            .session_cache
            .get_or_compute(key, || async {
                self.aggregator.aggregate_sessions(self.records(filter.clone()), cost_mode).await
            })
            .await?;

        let totals = Totals::from_sessions(&sessions);
        let total_sessions = sessions.len();
        let mut listing = (*sessions).clone();
        if let Some(limit) = limit {
            listing.truncate(limit);
        }

        Ok(SessionReport {
            sessions: listing,
            total_sessions,
            totals,
        })
    }

    /// 5-hour billing block timeline
    ///
    /// The reconstructed grid is cached; the active flag and projections are
    /// recomputed against the current clock on every call.
    pub async fn get_blocks(
        &self,
        filter: &UsageFilter,
        cost_mode: CostMode,
        options: BlockOptions,
    ) -> Result<BlockReport> {
        let now = Utc::now();
        let key = Self::scope_key(filter, cost_mode);
        let cached = self
            .block_cache
            .get_or_compute(key, || async {
                self.aggregator
                    .aggregate_blocks(
                        self.records(filter.clone()),
                        cost_mode,
                        Duration::hours(BLOCK_DURATION_HOURS),
                        now,
                    )
                    .await
            })
            .await?;

        let mut block_list = (*cached).clone();
        blocks::refresh_activation(&mut block_list, now);
        blocks::filter_blocks(&mut block_list, options.active, options.recent, now);

        Ok(BlockReport {
            totals: Totals::from_blocks(&block_list),
            blocks: block_list,
        })
    }

    /// Drop cached rollups
    ///
    /// `kind` of `None` targets every cache; `project` of `None` drops all
    /// entries of the targeted kinds, otherwise entries scoped to that
    /// project plus the unscoped entries that include its data.
    pub async fn invalidate_cache(&self, kind: Option<CacheKind>, project: Option<&str>) {
        let kinds: &[CacheKind] = match kind {
            Some(kind) => &[kind],
            None => &[
                CacheKind::Summary,
                CacheKind::Daily,
                CacheKind::Monthly,
                CacheKind::Sessions,
                CacheKind::Blocks,
            ],
        };

        for kind in kinds {
            match kind {
                CacheKind::Summary => self.summary_cache.invalidate(project).await,
                CacheKind::Daily => self.daily_cache.invalidate(project).await,
                CacheKind::Monthly => self.monthly_cache.invalidate(project).await,
                CacheKind::Sessions => self.session_cache.invalidate(project).await,
                CacheKind::Blocks => self.block_cache.invalidate(project).await,
            }
        }

        info!(
            "Invalidated cache (kind: {}, project: {})",
            kind.map_or_else(|| "all".to_string(), |k| k.to_string()),
            project.unwrap_or("all"),
        );
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn write_transcript(dir: &Path, name: &str, lines: &[String]) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let mut file = tokio::fs::File::create(dir.join(name)).await.unwrap();
        for line in lines {
            file.write_all(line.as_bytes()).await.unwrap();
            file.write_all(b"\n").await.unwrap();
        }
    }

    fn assistant_line(session: &str, ts: &str, input: u64, output: u64, msg: &str) -> String {
        format!(
            r#"{{"sessionId":"{session}","timestamp":"{ts}","type":"assistant","message":{{"id":"{msg}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{input},"output_tokens":{output}}}}},"requestId":"req-{msg}"}}"#
        )
    }

    async fn service_over(temp_dir: &TempDir) -> UsageService {
        let loader = DataLoader::with_paths(vec![temp_dir.path().to_path_buf()]);
        UsageService::with_loader(loader, true)
    }

    #[tokio::test]
    async fn test_summary_counts_sessions_and_costs() {
        let temp = TempDir::new().unwrap();
        write_transcript(
            &temp.path().join("projects").join("alpha"),
            "a.jsonl",
            &[
                assistant_line("s1", "2024-01-15T10:00:00Z", 1000, 500, "m1"),
                assistant_line("s2", "2024-01-16T10:00:00Z", 2000, 1000, "m2"),
            ],
        )
        .await;

        let service = service_over(&temp).await;
        let summary = service
            .get_summary(&UsageFilter::new(), CostMode::Calculate)
            .await
            .unwrap();

        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.tokens.input_tokens, 3000);
        assert_eq!(summary.models_used, vec!["claude-sonnet-4-20250514"]);
    }

    #[tokio::test]
    async fn test_session_limit_truncates_listing_not_totals() {
        let temp = TempDir::new().unwrap();
        write_transcript(
            &temp.path().join("projects").join("alpha"),
            "a.jsonl",
            &[
                assistant_line("s1", "2024-01-15T10:00:00Z", 100, 50, "m1"),
                assistant_line("s2", "2024-01-16T10:00:00Z", 200, 100, "m2"),
                assistant_line("s3", "2024-01-17T10:00:00Z", 300, 150, "m3"),
            ],
        )
        .await;

        let service = service_over(&temp).await;
        let report = service
            .get_sessions(&UsageFilter::new(), CostMode::Calculate, Some(1))
            .await
            .unwrap();

        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.total_sessions, 3);
        assert_eq!(report.totals.tokens.input_tokens, 600);
        // Most recent session first
        assert_eq!(report.sessions[0].session_id.as_str(), "s3");
    }

    #[tokio::test]
    async fn test_cached_report_survives_file_changes_until_invalidated() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("projects").join("alpha");
        write_transcript(
            &project_dir,
            "a.jsonl",
            &[assistant_line("s1", "2024-01-15T10:00:00Z", 100, 50, "m1")],
        )
        .await;

        let service = service_over(&temp).await;
        let filter = UsageFilter::new();

        let before = service.get_daily(&filter, CostMode::Calculate).await.unwrap();
        assert_eq!(before.totals.tokens.input_tokens, 100);

        write_transcript(
            &project_dir,
            "b.jsonl",
            &[assistant_line("s1", "2024-01-15T11:00:00Z", 900, 0, "m2")],
        )
        .await;

        // Cache still serves the old rollup
        let stale = service.get_daily(&filter, CostMode::Calculate).await.unwrap();
        assert_eq!(stale.totals.tokens.input_tokens, 100);

        service.invalidate_cache(Some(CacheKind::Daily), None).await;
        let fresh = service.get_daily(&filter, CostMode::Calculate).await.unwrap();
        assert_eq!(fresh.totals.tokens.input_tokens, 1000);
    }

    #[tokio::test]
    async fn test_project_filter_scopes_reports() {
        let temp = TempDir::new().unwrap();
        write_transcript(
            &temp.path().join("projects").join("alpha"),
            "a.jsonl",
            &[assistant_line("s1", "2024-01-15T10:00:00Z", 100, 50, "m1")],
        )
        .await;
        write_transcript(
            &temp.path().join("projects").join("beta"),
            "b.jsonl",
            &[assistant_line("s2", "2024-01-15T10:00:00Z", 200, 100, "m2")],
        )
        .await;

        let service = service_over(&temp).await;
        let filter = UsageFilter::new().with_project("alpha".to_string());
        let report = service
            .get_sessions(&filter, CostMode::Calculate, None)
            .await
            .unwrap();

        assert_eq!(report.total_sessions, 1);
        assert_eq!(report.sessions[0].project.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_block_report_totals_exclude_gaps() {
        let temp = TempDir::new().unwrap();
        write_transcript(
            &temp.path().join("projects").join("alpha"),
            "a.jsonl",
            &[
                assistant_line("s1", "2024-01-15T10:00:00Z", 1000, 500, "m1"),
                // Skips one whole 5-hour window, leaving a gap block
                assistant_line("s1", "2024-01-15T22:00:00Z", 2000, 1000, "m2"),
            ],
        )
        .await;

        let service = service_over(&temp).await;
        let report = service
            .get_blocks(&UsageFilter::new(), CostMode::Calculate, BlockOptions::default())
            .await
            .unwrap();

        assert_eq!(report.blocks.len(), 3);
        assert!(report.blocks[1].is_gap);
        assert_eq!(report.totals.tokens.input_tokens, 3000);
        // Historical data: nothing is active
        assert!(report.blocks.iter().all(|b| !b.is_active));
    }

    #[tokio::test]
    async fn test_cache_kind_parsing() {
        assert_eq!("daily".parse::<CacheKind>().unwrap(), CacheKind::Daily);
        assert_eq!("BLOCKS".parse::<CacheKind>().unwrap(), CacheKind::Blocks);
        assert!("bogus".parse::<CacheKind>().is_err());
    }
}
