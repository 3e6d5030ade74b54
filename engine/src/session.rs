//! Token usage and cost accumulated across runs.

use std::collections::HashMap;

use steward_types::{ModelPrice, SessionStats, TokenUsage};

/// Looks up per-token prices by model name.
pub trait PricingTable: Send + Sync {
    fn price_of(&self, model: &str) -> Option<ModelPrice>;
}

/// Fixed price list, usually built from `[pricing]` in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    prices: HashMap<String, ModelPrice>,
}

impl StaticPricing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    #[must_use]
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.insert(model, price);
        self
    }
}

impl PricingTable for StaticPricing {
    fn price_of(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }
}

pub struct SessionAccumulator {
    stats: SessionStats,
    pricing: Box<dyn PricingTable>,
}

impl SessionAccumulator {
    #[must_use]
    pub fn new(pricing: Box<dyn PricingTable>) -> Self {
        Self {
            stats: SessionStats::default(),
            pricing,
        }
    }

    /// Add one reply's usage. Unknown models cost nothing.
    pub fn record(&mut self, usage: &TokenUsage, model: &str) {
        self.stats.prompt_tokens += usage.prompt_tokens;
        self.stats.completion_tokens += usage.completion_tokens;
        self.stats.total_tokens += usage.total_tokens;
        match self.pricing.price_of(model) {
            Some(price) => self.stats.total_cost += price.cost_of(usage),
            None => tracing::debug!(model, "No price configured; cost not counted"),
        }
    }

    pub fn record_message(&mut self) {
        self.stats.message_count += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.stats = SessionStats::default();
    }
}

impl std::fmt::Debug for SessionAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAccumulator")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
