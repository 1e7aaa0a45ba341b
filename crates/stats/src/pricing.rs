// crates/stats/src/pricing.rs
//! Static token rates for per-model cost estimates.
//!
//! Rates are USD per million tokens, matched by model-id prefix so dated
//! releases (`claude-sonnet-4-20250514`) resolve to their family. Unknown
//! models get no estimate rather than a guess.

use crate::model::ModelUsage;

#[derive(Debug, Clone, Copy)]
pub struct ModelRates {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_write_per_mtok: f64,
}

const RATES: &[(&str, ModelRates)] = &[
    (
        "claude-opus-4",
        ModelRates {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
            cache_read_per_mtok: 1.5,
            cache_write_per_mtok: 18.75,
        },
    ),
    (
        "claude-sonnet-4",
        ModelRates {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_read_per_mtok: 0.3,
            cache_write_per_mtok: 3.75,
        },
    ),
    (
        "claude-haiku-4",
        ModelRates {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
            cache_read_per_mtok: 0.1,
            cache_write_per_mtok: 1.25,
        },
    ),
    (
        "claude-3-5-sonnet",
        ModelRates {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_read_per_mtok: 0.3,
            cache_write_per_mtok: 3.75,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelRates {
            input_per_mtok: 0.8,
            output_per_mtok: 4.0,
            cache_read_per_mtok: 0.08,
            cache_write_per_mtok: 1.0,
        },
    ),
    (
        "claude-3-opus",
        ModelRates {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
            cache_read_per_mtok: 1.5,
            cache_write_per_mtok: 18.75,
        },
    ),
];

/// Look up rates for a model id by longest matching prefix.
pub fn lookup(model: &str) -> Option<ModelRates> {
    RATES
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, rates)| *rates)
}

/// Estimate the USD cost of a model's accumulated token usage.
pub fn estimate_cost(model: &str, usage: &ModelUsage) -> Option<f64> {
    let rates = lookup(model)?;
    const MTOK: f64 = 1_000_000.0;
    Some(
        usage.input_tokens as f64 / MTOK * rates.input_per_mtok
            + usage.output_tokens as f64 / MTOK * rates.output_per_mtok
            + usage.cache_read_tokens as f64 / MTOK * rates.cache_read_per_mtok
            + usage.cache_creation_tokens as f64 / MTOK * rates.cache_write_per_mtok,
    )
}
