//! Pricing table loading and model price resolution
//!
//! Pricing is loaded once per process into an immutable [`PricingTable`]:
//! either from the embedded baseline table (offline mode) or from the LiteLLM
//! pricing dataset, falling back to the embedded data when the network is
//! unavailable. Resolution never fails — an unrecognized model resolves to a
//! zero-cost entry so its tokens are still counted.

use crate::error::Result;
use crate::types::ModelPricing;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// LiteLLM pricing API URL
const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Embedded pricing data for offline mode
const EMBEDDED_PRICING: &str = include_str!("../embedded/pricing.json");

/// Immutable lookup table mapping model identifiers to unit prices
///
/// Shared read-only across an aggregation pass; resolution is a pure function
/// of the table and the model string.
#[derive(Debug)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
    /// Zero-cost entry returned for models the table does not know
    fallback: ModelPricing,
}

impl PricingTable {
    /// Build a table from already-parsed entries
    pub fn from_entries(entries: HashMap<String, ModelPricing>) -> Self {
        Self {
            entries,
            fallback: ModelPricing::default(),
        }
    }

    /// Build the table from the embedded baseline data
    pub fn embedded() -> Result<Self> {
        let data: HashMap<String, serde_json::Value> = serde_json::from_str(EMBEDDED_PRICING)?;
        Ok(Self::from_entries(Self::parse_entries(data)))
    }

    /// Parse a raw JSON pricing map, skipping entries that do not fit
    ///
    /// The LiteLLM dataset mixes providers and shapes; anything that fails to
    /// deserialize into [`ModelPricing`] is ignored.
    fn parse_entries(data: HashMap<String, serde_json::Value>) -> HashMap<String, ModelPricing> {
        let mut entries = HashMap::new();
        for (model_name, value) in data {
            if let Ok(pricing) = serde_json::from_value::<ModelPricing>(value) {
                entries.insert(model_name, pricing);
            }
        }
        entries
    }

    /// Resolve unit prices for a model identifier
    ///
    /// Tries an exact match first, then common name variants, then partial
    /// containment in either direction. Unknown models resolve to the
    /// zero-cost fallback so their tokens are still counted.
    pub fn resolve(&self, model_name: &str) -> &ModelPricing {
        if let Some(pricing) = self.entries.get(model_name) {
            return pricing;
        }

        let variations = [
            format!("anthropic/{model_name}"),
            format!("claude-{model_name}"),
            model_name.replace("claude-3-", "claude-3."),
            model_name.replace("claude-3.", "claude-3-"),
        ];

        for variant in &variations {
            if let Some(pricing) = self.entries.get(variant) {
                debug!("Found pricing for {} using variant {}", model_name, variant);
                return pricing;
            }
        }

        // Family match: a dated table key matching an undated query, or vice
        // versa. Several keys can match; prefer the longest (most specific),
        // then the lexicographically smallest, so resolution is stable across
        // runs rather than following the map's iteration order.
        let mut candidates: Vec<&String> = self
            .entries
            .keys()
            .filter(|key| key.contains(model_name) || model_name.contains(key.as_str()))
            .collect();
        candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        if let Some(key) = candidates.first() {
            debug!("Found pricing for {} using partial match {}", model_name, key);
            return &self.entries[key.as_str()];
        }

        debug!("No pricing for {}, treating cost as zero", model_name);
        &self.fallback
    }

    /// Whether the table has a (possibly fuzzy) match for the model
    pub fn is_known(&self, model_name: &str) -> bool {
        !std::ptr::eq(self.resolve(model_name), &self.fallback)
    }

    /// Model identifiers present in the table
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of models in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads and caches the pricing table for the lifetime of the process
pub struct PricingSource {
    cache: RwLock<Option<Arc<PricingTable>>>,
    offline_mode: bool,
    client: reqwest::Client,
}

impl PricingSource {
    /// Create a new PricingSource
    ///
    /// In offline mode only the embedded baseline table is used.
    pub fn new(offline: bool) -> Self {
        Self {
            cache: RwLock::new(None),
            offline_mode: offline,
            client: reqwest::Client::new(),
        }
    }

    /// Get the pricing table, loading it on first access
    pub async fn table(&self) -> Result<Arc<PricingTable>> {
        {
            let cache = self.cache.read().await;
            if let Some(table) = cache.as_ref() {
                return Ok(Arc::clone(table));
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have loaded while we waited for the write lock
        if let Some(table) = cache.as_ref() {
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(self.load().await?);
        *cache = Some(Arc::clone(&table));
        Ok(table)
    }

    /// Drop the cached table and reload it
    pub async fn refresh(&self) -> Result<()> {
        let table = Arc::new(self.load().await?);
        let mut cache = self.cache.write().await;
        *cache = Some(table);
        Ok(())
    }

    async fn load(&self) -> Result<PricingTable> {
        if self.offline_mode {
            info!("Using embedded pricing data (offline mode)");
            return PricingTable::embedded();
        }

        match self.fetch_litellm_pricing().await {
            Ok(table) => {
                info!("Fetched pricing data for {} models from LiteLLM", table.len());
                Ok(table)
            }
            Err(e) => {
                warn!("Failed to fetch pricing data: {}, using embedded data", e);
                PricingTable::embedded()
            }
        }
    }

    async fn fetch_litellm_pricing(&self) -> Result<PricingTable> {
        let response = self.client.get(LITELLM_PRICING_URL).send().await?;
        let data: HashMap<String, serde_json::Value> = response.json().await?;
        Ok(PricingTable::from_entries(PricingTable::parse_entries(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table_with(model: &str) -> PricingTable {
        let mut entries = HashMap::new();
        entries.insert(
            model.to_string(),
            ModelPricing {
                input_cost_per_token: Some(dec!(0.000003)),
                output_cost_per_token: Some(dec!(0.000015)),
                cache_creation_input_token_cost: Some(dec!(0.00000375)),
                cache_read_input_token_cost: Some(dec!(0.0000003)),
                input_cost_above_200k: None,
                output_cost_above_200k: None,
            },
        );
        PricingTable::from_entries(entries)
    }

    #[test]
    fn test_exact_match() {
        let table = table_with("claude-sonnet-4-20250514");
        assert!(table.is_known("claude-sonnet-4-20250514"));
    }

    #[test]
    fn test_provider_prefix_match() {
        let mut entries = HashMap::new();
        entries.insert("anthropic/claude-3-opus".to_string(), ModelPricing::default());
        let table = PricingTable::from_entries(entries);
        let pricing = table.resolve("claude-3-opus");
        // Resolved via the anthropic/ variant, not the fallback
        assert!(std::ptr::eq(pricing, table.entries.get("anthropic/claude-3-opus").unwrap()));
    }

    #[test]
    fn test_family_match_strips_date_suffix() {
        let table = table_with("claude-sonnet-4-20250514");
        // An undated family name still resolves through partial containment
        assert!(table.is_known("claude-sonnet-4"));
    }

    #[test]
    fn test_partial_match_prefers_most_specific_key() {
        let mut entries = HashMap::new();
        entries.insert(
            "claude-sonnet-4".to_string(),
            ModelPricing {
                input_cost_per_token: Some(dec!(0.000001)),
                ..ModelPricing::default()
            },
        );
        entries.insert(
            "claude-sonnet-4-20250514".to_string(),
            ModelPricing {
                input_cost_per_token: Some(dec!(0.000003)),
                ..ModelPricing::default()
            },
        );
        let table = PricingTable::from_entries(entries);

        // Both keys match the query; the longer, dated key wins every run
        let pricing = table.resolve("claude-sonnet-4-2025");
        assert_eq!(pricing.input_cost_per_token, Some(dec!(0.000003)));
    }

    #[test]
    fn test_unknown_model_resolves_to_zero_cost() {
        let table = table_with("claude-sonnet-4-20250514");
        let pricing = table.resolve("totally-unknown-model");
        assert!(!table.is_known("totally-unknown-model"));
        assert!(pricing.input_cost_per_token.is_none());
        assert!(pricing.output_cost_per_token.is_none());
    }

    #[test]
    fn test_embedded_table_parses() {
        let table = PricingTable::embedded().unwrap();
        assert!(!table.is_empty());
        assert!(table.is_known("claude-sonnet-4-20250514"));
        assert!(table.models().any(|m| m == "claude-3-opus-20240229"));
        let sonnet = table.resolve("claude-sonnet-4-20250514");
        assert_eq!(sonnet.input_cost_per_token, Some(dec!(0.000003)));
        assert_eq!(sonnet.input_cost_above_200k, Some(dec!(0.000006)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_cached_table() {
        let source = PricingSource::new(true);
        let before = source.table().await.unwrap();

        source.refresh().await.unwrap();

        let after = source.table().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.is_known("claude-sonnet-4-20250514"));
    }

    #[tokio::test]
    async fn test_offline_source_serves_embedded_table() {
        let source = PricingSource::new(true);
        let table = source.table().await.unwrap();
        assert!(table.is_known("claude-3-opus-20240229"));
        // Second call hits the cached Arc
        let again = source.table().await.unwrap();
        assert!(Arc::ptr_eq(&table, &again));
    }
}
