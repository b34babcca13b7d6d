//! Per-token pricing for known models (USD).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token, or `None` for unknown models.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    let model = model.to_ascii_lowercase();
    let per_million = if model.starts_with("gpt-4o-mini") {
        (dec!(0.15), dec!(0.60))
    } else if model.starts_with("gpt-4o") {
        (dec!(2.50), dec!(10.00))
    } else if model.starts_with("gpt-4.1-mini") {
        (dec!(0.40), dec!(1.60))
    } else if model.starts_with("gpt-4.1") {
        (dec!(2.00), dec!(8.00))
    } else if model.contains("haiku") {
        (dec!(0.80), dec!(4.00))
    } else if model.contains("sonnet") {
        (dec!(3.00), dec!(15.00))
    } else if model.contains("opus") {
        (dec!(15.00), dec!(75.00))
    } else {
        return None;
    };
    let million = dec!(1_000_000);
    Some((per_million.0 / million, per_million.1 / million))
}

/// Estimated USD cost of one call.
pub fn estimate(costs: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    costs.0 * Decimal::from(input_tokens) + costs.1 * Decimal::from(output_tokens)
}
