use crate::models::black_scholes;
use crate::models::OptionType;
use crate::portfolio::leg::{Leg, ViewMode};
use crate::portfolio::normalize::{NormalizedLeg, ValuationContext};

/// Per-share price of a leg under the scenario in `ctx`.
///
/// Sole pricing path for table rows, P&L curves and probability consumers:
///
/// 1. Trial mode at the present moment with no IV shift and a positive live
///    quote returns the quote verbatim, so the entry row shows zero P&L.
/// 2. Expired legs settle at intrinsic value.
/// 3. Anything else is BSM at the normalized time and simulated IV.
#[inline]
pub fn resolve_price(
    normalized: &NormalizedLeg,
    leg: &Leg,
    view_mode: ViewMode,
    ctx: &ValuationContext,
) -> f64 {
    if let Some(quote) = bypass_quote(leg, view_mode, ctx) {
        return quote;
    }
    let years = if normalized.is_expired { 0.0 } else { normalized.years_to_expiry };
    model_price(
        leg.option_type,
        leg.strike,
        ctx.underlying_price,
        years,
        ctx.interest_rate,
        normalized.simulated_iv,
    )
}

/// The live quote, when the scenario is indistinguishable from the market.
#[inline]
fn bypass_quote(leg: &Leg, view_mode: ViewMode, ctx: &ValuationContext) -> Option<f64> {
    if view_mode == ViewMode::Trial && ctx.is_present() && ctx.iv_offset == 0.0 {
        leg.usable_quote()
    } else {
        None
    }
}

/// Model price once the quote bypass is ruled out. Shared with the Monte Carlo
/// terminal valuation; `years_to_expiry <= 0` settles at intrinsic.
#[inline]
pub fn model_price(
    option_type: OptionType,
    strike: f64,
    spot: f64,
    years_to_expiry: f64,
    rate: f64,
    vol: f64,
) -> f64 {
    if years_to_expiry <= 0.0 {
        return black_scholes::intrinsic(option_type, spot, strike);
    }
    black_scholes::price(option_type, spot, strike, years_to_expiry, rate, vol)
}
