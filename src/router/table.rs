//! Routing Table
//!
//! Priority-ordered fallback chain selection.

use crate::config::RoutingRule;

/// Holds routing rules in registration order
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Candidates to try for a canonical model, in order.
    pub fn select(&self, canonical_model: &str) -> Vec<String> {
        select(canonical_model, &self.rules)
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}

/// Pick the highest-priority rule whose primary is `canonical_model`.
///
/// Ties go to the rule registered first. Without a matching rule the only
/// candidate is the requested model itself.
pub fn select(canonical_model: &str, rules: &[RoutingRule]) -> Vec<String> {
    let mut best: Option<&RoutingRule> = None;

    for rule in rules
        .iter()
        .filter(|r| r.primary() == Some(canonical_model))
    {
        match best {
            Some(current) if current.priority >= rule.priority => {}
            _ => best = Some(rule),
        }
    }

    match best {
        Some(rule) => rule.fallback_models.clone(),
        None => vec![canonical_model.to_string()],
    }
}
