//! Cost Attribution
//!
//! The ledger only consumes numbers; where they come from is pluggable.

use crate::api::Usage;
use std::collections::HashMap;

/// Supplies cost figures, in cents, for budget accounting
pub trait CostModel: Send + Sync {
    /// Expected cost of a call before it is made
    fn estimate_cents(&self, model: &str, estimated_tokens: u64) -> u64;

    /// Cost of a completed call
    fn actual_cents(&self, model: &str, usage: &Usage) -> u64 {
        self.estimate_cents(model, usage.tokens())
    }
}

/// Every call is free
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCost;

impl CostModel for NoCost {
    fn estimate_cents(&self, _model: &str, _estimated_tokens: u64) -> u64 {
        0
    }
}

/// Cents per 1000 tokens, per model, rounded up
#[derive(Debug, Default, Clone)]
pub struct FlatRatePricing {
    rates: HashMap<String, u64>,
    default_rate: u64,
}

impl FlatRatePricing {
    pub fn new(default_rate: u64) -> Self {
        Self {
            rates: HashMap::new(),
            default_rate,
        }
    }

    pub fn with_rate(mut self, model: impl Into<String>, cents_per_1k: u64) -> Self {
        self.rates.insert(model.into(), cents_per_1k);
        self
    }

    fn rate(&self, model: &str) -> u64 {
        self.rates.get(model).copied().unwrap_or(self.default_rate)
    }
}

impl CostModel for FlatRatePricing {
    fn estimate_cents(&self, model: &str, estimated_tokens: u64) -> u64 {
        estimated_tokens.saturating_mul(self.rate(model)).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cost() {
        assert_eq!(NoCost.estimate_cents("gpt-4", 10_000), 0);
        assert_eq!(NoCost.actual_cents("gpt-4", &Usage::new(10, 10)), 0);
    }

    #[test]
    fn test_flat_rate_rounds_up() {
        let pricing = FlatRatePricing::new(1).with_rate("gpt-4", 30);
        assert_eq!(pricing.estimate_cents("gpt-4", 1000), 30);
        assert_eq!(pricing.estimate_cents("gpt-4", 1), 1);
        assert_eq!(pricing.estimate_cents("other", 1500), 2);
        assert_eq!(pricing.actual_cents("gpt-4", &Usage::new(500, 500)), 30);
    }
}
