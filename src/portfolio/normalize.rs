use crate::calendar::TradingCalendar;
use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes;
use crate::portfolio::leg::{Leg, ViewMode};
use chrono::NaiveDate;

/// Trading days per year for BSM time-to-expiry.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Floor on leg IV after the global offset is applied.
pub const MIN_SIMULATED_IV: f64 = 0.001;

/// Immutable per-evaluation snapshot. Rebuilt on every input change and passed
/// explicitly into every normalization and pricing call.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationContext {
    /// Today, fixed at session start
    pub base_date: NaiveDate,
    pub simulated_date: NaiveDate,
    pub underlying_price: f64,
    pub interest_rate: f64,
    /// Added to every leg's IV
    #[serde(default)]
    pub iv_offset: f64,
}

impl ValuationContext {
    pub fn new(
        base_date: NaiveDate,
        simulated_date: NaiveDate,
        underlying_price: f64,
        interest_rate: f64,
        iv_offset: f64,
    ) -> EngineResult<Self> {
        let ctx = Self {
            base_date,
            simulated_date,
            underlying_price,
            interest_rate,
            iv_offset,
        };
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.simulated_date < self.base_date {
            return Err(EngineError::InvalidRequest(format!(
                "simulated date {} is before base date {}",
                self.simulated_date, self.base_date
            )));
        }
        if !self.underlying_price.is_finite() || self.underlying_price <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "underlying price must be positive, got {}",
                self.underlying_price
            )));
        }
        if !self.interest_rate.is_finite() || !self.iv_offset.is_finite() {
            return Err(EngineError::InvalidRequest("rate and IV offset must be finite".into()));
        }
        Ok(())
    }

    /// Same scenario, different spot. Used for curves and terminal valuation.
    #[inline]
    pub fn at_price(&self, underlying_price: f64) -> Self {
        Self { underlying_price, ..*self }
    }

    /// The valuation is for the present moment.
    #[inline]
    pub fn is_present(&self) -> bool {
        self.simulated_date == self.base_date
    }
}

/// Canonical derived view of a leg under a context. Ephemeral; recomputed per
/// evaluation and never written back to the leg.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedLeg {
    pub is_expired: bool,
    pub calendar_days_to_expiry: u32,
    pub trading_days_to_expiry: u32,
    pub years_to_expiry: f64,
    pub simulated_iv: f64,
    pub position_multiplier: f64,
    pub effective_cost_per_share: f64,
    pub cost_basis: f64,
}

/// The single normalization entry point. Cost-basis and IV-offset rules live
/// here and nowhere else.
pub fn normalize(
    leg: &Leg,
    view_mode: ViewMode,
    ctx: &ValuationContext,
    calendar: &dyn TradingCalendar,
) -> NormalizedLeg {
    let is_expired = leg.expiry <= ctx.simulated_date;

    let (calendar_days, trading_days) = if is_expired {
        (0, 0)
    } else {
        (
            calendar.calendar_days_between(ctx.simulated_date, leg.expiry),
            calendar.trading_days_between(ctx.simulated_date, leg.expiry),
        )
    };

    let position_multiplier = leg.position_multiplier();
    let effective_cost_per_share = effective_cost(leg, view_mode, ctx, calendar);

    NormalizedLeg {
        is_expired,
        calendar_days_to_expiry: calendar_days,
        trading_days_to_expiry: trading_days,
        years_to_expiry: trading_days as f64 / TRADING_DAYS_PER_YEAR,
        simulated_iv: (leg.implied_volatility + ctx.iv_offset).max(MIN_SIMULATED_IV),
        position_multiplier,
        effective_cost_per_share,
        cost_basis: position_multiplier * effective_cost_per_share,
    }
}

/// Active groups lock a nonzero fill. Everything else floats to the live quote,
/// or to fair value at the base date with the leg's own IV (no offset), so the
/// entry cost does not move with the scenario being explored.
fn effective_cost(
    leg: &Leg,
    view_mode: ViewMode,
    ctx: &ValuationContext,
    calendar: &dyn TradingCalendar,
) -> f64 {
    if view_mode == ViewMode::Active && leg.entered_cost != 0.0 {
        return leg.entered_cost;
    }
    if let Some(quote) = leg.usable_quote() {
        return quote;
    }
    let years_from_base = if leg.expiry <= ctx.base_date {
        0.0
    } else {
        calendar.trading_days_between(ctx.base_date, leg.expiry) as f64 / TRADING_DAYS_PER_YEAR
    };
    black_scholes::price(
        leg.option_type,
        ctx.underlying_price,
        leg.strike,
        years_from_base,
        ctx.interest_rate,
        leg.implied_volatility,
    )
}
