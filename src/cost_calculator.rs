//! Cost calculator for computing usage costs from token counts
//!
//! Costs are computed in `Decimal` USD with category-specific rates: cache
//! reads are priced far below input tokens and cache creation above them, so
//! a single blended rate would misstate real spend. Input and output tokens
//! beyond 200k in one message are charged at the tiered rate when the pricing
//! table provides one.

use crate::error::Result;
use crate::pricing::PricingSource;
use crate::types::{CostMode, ModelName, ModelPricing, TokenCounts};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Tokens charged at the base rate before tiered pricing kicks in
const TIER_THRESHOLD_TOKENS: u64 = 200_000;

/// Calculates costs based on token usage and pricing
pub struct CostCalculator {
    pricing: Arc<PricingSource>,
}

impl CostCalculator {
    /// Create a new CostCalculator
    pub fn new(pricing: Arc<PricingSource>) -> Self {
        Self { pricing }
    }

    /// Calculate cost for token usage
    ///
    /// Never fails on an unknown model: the pricing table resolves it to a
    /// zero-cost entry and the tokens still count toward totals.
    pub async fn calculate_cost(
        &self,
        tokens: &TokenCounts,
        model_name: &ModelName,
    ) -> Result<Decimal> {
        let table = self.pricing.table().await?;
        let pricing = table.resolve(model_name.as_str());
        Ok(Self::calculate_from_pricing(tokens, pricing))
    }

    /// Calculate cost from resolved pricing data
    pub fn calculate_from_pricing(tokens: &TokenCounts, pricing: &ModelPricing) -> Decimal {
        let mut cost = Decimal::ZERO;

        if let Some(rate) = pricing.input_cost_per_token {
            cost += Self::tiered_cost(tokens.input_tokens, rate, pricing.input_cost_above_200k);
        }

        if let Some(rate) = pricing.output_cost_per_token {
            cost += Self::tiered_cost(tokens.output_tokens, rate, pricing.output_cost_above_200k);
        }

        if let Some(rate) = pricing.cache_creation_input_token_cost {
            cost += Decimal::from(tokens.cache_creation_tokens) * rate;
        }

        if let Some(rate) = pricing.cache_read_input_token_cost {
            cost += Decimal::from(tokens.cache_read_tokens) * rate;
        }

        debug!(
            "Calculated cost: ${} for {} total tokens",
            cost,
            tokens.total()
        );

        cost
    }

    /// Charge the first 200k tokens at the base rate and the rest at the
    /// tiered rate, when one exists
    fn tiered_cost(tokens: u64, base_rate: Decimal, tiered_rate: Option<Decimal>) -> Decimal {
        match tiered_rate {
            Some(tiered) if tokens > TIER_THRESHOLD_TOKENS => {
                Decimal::from(TIER_THRESHOLD_TOKENS) * base_rate
                    + Decimal::from(tokens - TIER_THRESHOLD_TOKENS) * tiered
            }
            _ => Decimal::from(tokens) * base_rate,
        }
    }

    /// Calculate cost with mode consideration
    ///
    /// `Auto` prefers the cost the transcript recorded at call time and only
    /// computes from tokens when none is present.
    pub async fn calculate_with_mode(
        &self,
        tokens: &TokenCounts,
        model_name: &ModelName,
        pre_calculated: Option<Decimal>,
        mode: CostMode,
    ) -> Result<Decimal> {
        match mode {
            CostMode::Auto => {
                if let Some(cost) = pre_calculated {
                    Ok(cost)
                } else {
                    self.calculate_cost(tokens, model_name).await
                }
            }
            CostMode::Calculate => self.calculate_cost(tokens, model_name).await,
            CostMode::Display => Ok(pre_calculated.unwrap_or(Decimal::ZERO)),
        }
    }
}
