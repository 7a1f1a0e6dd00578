//! Sell-price computation and markup resolution.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::catalog::Category;
use crate::models::config::PricingConfig;

/// Derived sell pricing for one catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePoint {
    /// Sell price ex-GST, rounded to cents.
    pub sell_ex_gst: Decimal,
    /// Sell price inc-GST, rounded to cents. Equals `sell_ex_gst` exactly
    /// when GST does not apply.
    pub sell_inc_gst: Decimal,
}

/// Compute sell pricing from cost, markup, and tax.
///
/// Markup is a multiplier: 1.65 means cost x 1.65. Prices round half-up
/// to cents, the register-facing convention.
pub fn compute_sell_price(
    cost_ex_gst: Decimal,
    markup: Decimal,
    gst_rate: Decimal,
    gst_applicable: bool,
) -> PricePoint {
    let sell_ex_gst = round_cents(cost_ex_gst * markup);
    let sell_inc_gst = if gst_applicable {
        round_cents(sell_ex_gst * (Decimal::ONE + gst_rate))
    } else {
        sell_ex_gst
    };

    PricePoint {
        sell_ex_gst,
        sell_inc_gst,
    }
}

/// Resolve the markup for one line.
///
/// Precedence: explicit manual override on the line, then the vendor's
/// default markup, then the global category table, then the global
/// default.
pub fn resolve_markup(
    manual_override: Option<Decimal>,
    vendor_default: Option<Decimal>,
    category: Category,
    config: &PricingConfig,
) -> Decimal {
    manual_override
        .or(vendor_default)
        .or_else(|| config.category_markups.get(&category).copied())
        .unwrap_or(config.default_markup)
}

fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
