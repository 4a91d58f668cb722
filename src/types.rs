//! Core domain types for cctally
//!
//! This module contains the fundamental types used throughout the cctally
//! library: strongly-typed model names, session IDs, timestamps, token counts,
//! pricing entries, and the usage record extracted from transcript files.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Strongly-typed model name wrapper
///
/// Ensures model identifiers are consistently handled throughout the
/// application and provides type safety when working with them.
///
/// # Examples
/// ```
/// use cctally::types::ModelName;
///
/// let model = ModelName::new("claude-sonnet-4-20250514");
/// assert_eq!(model.as_str(), "claude-sonnet-4-20250514");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    /// Create a new ModelName from any string-like type
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly-typed session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// UTC-normalized ISO timestamp wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ISOTimestamp(DateTime<Utc>);

impl ISOTimestamp {
    /// Create a new ISOTimestamp
    pub fn new(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get the inner DateTime
    pub fn inner(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Convert to DailyDate
    pub fn to_daily_date(&self) -> DailyDate {
        DailyDate::new(self.0.date_naive())
    }

    /// Format the month component as YYYY-MM
    pub fn month_key(&self) -> String {
        self.0.format("%Y-%m").to_string()
    }
}

impl AsRef<DateTime<Utc>> for ISOTimestamp {
    fn as_ref(&self) -> &DateTime<Utc> {
        &self.0
    }
}

/// Daily date for aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DailyDate(NaiveDate);

impl DailyDate {
    /// Create a new DailyDate
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Get the inner NaiveDate
    pub fn inner(&self) -> &NaiveDate {
        &self.0
    }

    /// Format with a chrono format string, e.g. `%Y-%m-%d`
    pub fn format(&self, fmt: &str) -> String {
        self.0.format(fmt).to_string()
    }
}

impl fmt::Display for DailyDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Token counts for usage tracking
///
/// Tracks all four token categories consumed by a Claude API message:
/// input, output, cache creation, and cache read.
///
/// # Examples
/// ```
/// use cctally::types::TokenCounts;
///
/// let tokens = TokenCounts::new(100, 50, 10, 5);
/// assert_eq!(tokens.total(), 165);
///
/// let more = TokenCounts::new(50, 25, 5, 2);
/// let combined = tokens + more;
/// assert_eq!(combined.input_tokens, 150);
/// ```
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCounts {
    /// Input tokens used
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens generated
    #[serde(default)]
    pub output_tokens: u64,
    /// Cache creation tokens
    #[serde(default)]
    pub cache_creation_tokens: u64,
    /// Cache read tokens
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    /// Create new TokenCounts
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
        }
    }

    /// Calculate total tokens across all four categories
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// Input plus output tokens, the quantity burn rates are measured over
    pub fn non_cache_total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_creation_tokens: self.cache_creation_tokens + other.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
        }
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// Cost calculation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CostMode {
    /// Use pre-calculated costs when available, otherwise compute from tokens
    #[default]
    Auto,
    /// Always calculate from tokens
    Calculate,
    /// Always use pre-calculated costs
    Display,
}

impl fmt::Display for CostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Calculate => write!(f, "calculate"),
            Self::Display => write!(f, "display"),
        }
    }
}

impl std::str::FromStr for CostMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "calculate" => Ok(Self::Calculate),
            "display" => Ok(Self::Display),
            _ => Err(format!("Invalid cost mode: {s}")),
        }
    }
}

/// Per-token unit prices for one model
///
/// Unit prices are stored as `Decimal` so thousands of tiny per-token costs
/// accumulate without floating-point drift. The optional `*_above_200k`
/// fields hold the tiered rate applied to the portion of input/output tokens
/// beyond 200k in a single message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per input token
    #[serde(default)]
    pub input_cost_per_token: Option<Decimal>,
    /// Cost per output token
    #[serde(default)]
    pub output_cost_per_token: Option<Decimal>,
    /// Cost per cache creation token
    #[serde(default)]
    pub cache_creation_input_token_cost: Option<Decimal>,
    /// Cost per cache read token
    #[serde(default)]
    pub cache_read_input_token_cost: Option<Decimal>,
    /// Tiered input rate above 200k tokens
    #[serde(
        default,
        rename = "input_cost_per_token_above_200k_tokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_cost_above_200k: Option<Decimal>,
    /// Tiered output rate above 200k tokens
    #[serde(
        default,
        rename = "output_cost_per_token_above_200k_tokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_cost_above_200k: Option<Decimal>,
}

/// A single per-message usage record extracted from a transcript file
///
/// Records are produced by the data loader, costed once by the cost
/// calculator, and consumed by the rollup aggregator and billing block
/// reconstructor. They are not persisted beyond one aggregation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Session identifier for grouping related API calls
    pub session_id: SessionId,
    /// Timestamp when the API call was made, UTC-normalized
    pub timestamp: ISOTimestamp,
    /// Model that was used for this API call
    pub model: ModelName,
    /// Token counts broken down by category
    #[serde(flatten)]
    pub tokens: TokenCounts,
    /// Pre-calculated cost in USD, if the transcript recorded one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<Decimal>,
    /// Project the session belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Claude Code version that wrote the transcript line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Raw message payload inside a transcript line
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    /// Model used
    pub model: String,
    /// Token usage for the message
    pub usage: TokenUsagePayload,
    /// Message ID (used for deduplication)
    #[serde(default)]
    pub id: Option<String>,
}

/// Token usage payload as written by Claude Code
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenUsagePayload {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// Raw JSONL transcript line
///
/// Transcript files interleave many event shapes; only assistant messages
/// carrying usage data become [`UsageRecord`]s. Everything else fails
/// deserialization or is filtered in [`UsageRecord::from_raw`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawTranscriptEntry {
    /// Session ID
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    /// Timestamp
    pub timestamp: String,
    /// Message containing model and usage
    pub message: RawMessage,
    /// Entry type
    #[serde(rename = "type", default)]
    pub entry_type: Option<String>,
    /// Current working directory when the event occurred
    #[serde(default)]
    pub cwd: Option<String>,
    /// Claude Code version number
    #[serde(default)]
    pub version: Option<String>,
    /// Pre-calculated cost in USD (camelCase as written by Claude Code)
    #[serde(rename = "costUSD", default)]
    pub cost_usd: Option<Decimal>,
    /// Request ID (used for deduplication)
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
    /// Flag indicating if this is an API error message
    #[serde(rename = "isApiErrorMessage", default)]
    pub is_api_error_message: Option<bool>,
}

impl UsageRecord {
    /// Create from a raw transcript line
    ///
    /// Returns `None` for entries that carry no billable usage: non-assistant
    /// events, API error messages, and synthetic models.
    pub fn from_raw(raw: RawTranscriptEntry, project: Option<&str>) -> Option<Self> {
        if raw.is_api_error_message.unwrap_or(false) {
            return None;
        }

        if let Some(entry_type) = &raw.entry_type
            && entry_type != "assistant"
        {
            return None;
        }

        // Synthetic models mark errors and aborted turns
        if raw.message.model == "<synthetic>" {
            return None;
        }

        let timestamp = match DateTime::parse_from_rfc3339(&raw.timestamp) {
            Ok(dt) => ISOTimestamp::new(dt.with_timezone(&Utc)),
            Err(_) => return None,
        };

        let session_id = raw.session_id.unwrap_or_else(|| {
            format!(
                "generated-{}-{}",
                timestamp.inner().timestamp(),
                raw.message.model
            )
        });

        let project = project.map(str::to_string).or_else(|| {
            raw.cwd.as_ref().and_then(|cwd| {
                std::path::Path::new(cwd)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
        });

        Some(Self {
            session_id: SessionId::new(session_id),
            timestamp,
            model: ModelName::new(raw.message.model),
            tokens: TokenCounts {
                input_tokens: raw.message.usage.input_tokens,
                output_tokens: raw.message.usage.output_tokens,
                cache_creation_tokens: raw.message.usage.cache_creation_input_tokens,
                cache_read_tokens: raw.message.usage.cache_read_input_tokens,
            },
            cost_usd: raw.cost_usd,
            project,
            version: raw.version,
        })
    }

    /// Generate a deduplication key from message.id and requestId
    pub fn dedup_key(raw: &RawTranscriptEntry) -> Option<String> {
        match (&raw.message.id, &raw.request_id) {
            (Some(msg_id), Some(req_id)) => Some(format!("{msg_id}-{req_id}")),
            (Some(msg_id), None) => Some(msg_id.clone()),
            (None, Some(req_id)) => Some(req_id.clone()),
            _ => None,
        }
    }
}
