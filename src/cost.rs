//! Per-request cost estimation.
//!
//! Holds a two-level `provider -> model -> price` table in USD per 1,000
//! tokens, merged from built-in defaults and an operator override. Estimation
//! never fails; unknown (provider, model) pairs price at zero and budget
//! enforcement happens separately in the router.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Per-1,000-token prices for one model, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    /// Price per 1,000 input tokens.
    pub input: f64,
    /// Price per 1,000 output tokens.
    pub output: f64,
}

/// Two-level pricing table: provider name to model id to prices.
pub type PricingTable = BTreeMap<String, BTreeMap<String, ModelPrice>>;

/// Built-in pricing defaults for the three supported providers.
pub fn default_pricing() -> PricingTable {
    let mut table = PricingTable::new();
    table.insert(
        "openai".to_owned(),
        BTreeMap::from([
            ("gpt-4o-mini".to_owned(), price(0.00015, 0.0006)),
            ("gpt-4.1-mini".to_owned(), price(0.0004, 0.0016)),
            ("o3-mini".to_owned(), price(0.0011, 0.0044)),
        ]),
    );
    table.insert(
        "anthropic".to_owned(),
        BTreeMap::from([
            (
                "claude-3-5-haiku-latest".to_owned(),
                price(0.00025, 0.00125),
            ),
            ("claude-3-5-sonnet-latest".to_owned(), price(0.003, 0.015)),
            ("claude-3-7-sonnet-latest".to_owned(), price(0.003, 0.015)),
        ]),
    );
    table.insert(
        "gemini".to_owned(),
        BTreeMap::from([
            ("gemini-2.0-flash".to_owned(), price(0.0001, 0.0004)),
            ("gemini-1.5-pro".to_owned(), price(0.00125, 0.005)),
        ]),
    );
    table
}

fn price(input: f64, output: f64) -> ModelPrice {
    ModelPrice { input, output }
}

/// Token-to-USD estimator over the merged pricing table.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    pricing: PricingTable,
}

impl CostEstimator {
    /// Build an estimator from the defaults merged with an operator override.
    ///
    /// Override entries win per (provider, model) key; providers present only
    /// in the override are added wholesale.
    pub fn new(pricing_override: &PricingTable) -> Self {
        let mut pricing = default_pricing();
        for (provider, models) in pricing_override {
            let entry = pricing.entry(provider.clone()).or_default();
            for (model, model_price) in models {
                entry.insert(model.clone(), *model_price);
            }
        }
        Self { pricing }
    }

    /// Estimated cost in USD for a (provider, model) token pair, rounded to
    /// 8 decimals. Returns `0.0` when the pair is not priced.
    pub fn estimate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let Some(model_price) = self
            .pricing
            .get(provider)
            .and_then(|models| models.get(model))
        else {
            return 0.0;
        };
        #[allow(clippy::cast_precision_loss)]
        let (input, output) = (input_tokens as f64, output_tokens as f64);
        let cost = (input / 1000.0) * model_price.input + (output / 1000.0) * model_price.output;
        round8(cost)
    }
}

/// Round to 8 decimal places.
fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}
