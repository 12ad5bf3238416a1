use crate::calendar::TradingCalendar;
use crate::errors::{EngineError, EngineResult};
use crate::portfolio::leg::Group;
use crate::portfolio::normalize::{normalize, NormalizedLeg, ValuationContext};
use crate::portfolio::resolver::resolve_price;

/// Upper bound on curve resolution.
pub const MAX_CURVE_POINTS: usize = 2_000;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegValuation {
    pub leg_id: String,
    pub normalized: NormalizedLeg,
    /// Resolved price per share
    pub price: f64,
    pub market_value: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupValuation {
    pub rows: Vec<LegValuation>,
    pub total_cost_basis: f64,
    pub total_market_value: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CurvePoint {
    pub price: f64,
    pub pnl: f64,
}

/// Table rows for a group under one scenario.
pub fn value_group(
    group: &Group,
    ctx: &ValuationContext,
    calendar: &dyn TradingCalendar,
) -> GroupValuation {
    let mut rows = Vec::with_capacity(group.legs.len());
    let mut total_cost_basis = 0.0;
    let mut total_market_value = 0.0;

    for leg in &group.legs {
        let normalized = normalize(leg, group.view_mode, ctx, calendar);
        let price = resolve_price(&normalized, leg, group.view_mode, ctx);
        let market_value = normalized.position_multiplier * price;
        total_cost_basis += normalized.cost_basis;
        total_market_value += market_value;
        rows.push(LegValuation {
            leg_id: leg.id.clone(),
            normalized,
            price,
            market_value,
            pnl: market_value - normalized.cost_basis,
        });
    }

    GroupValuation {
        rows,
        total_cost_basis,
        total_market_value,
        total_pnl: total_market_value - total_cost_basis,
    }
}

/// Portfolio P&L across a uniform grid of underlying prices at the scenario's
/// simulated date. Cost basis is fixed at the context's underlying price; only
/// the resolved leg prices move along the grid.
pub fn pnl_curve(
    group: &Group,
    ctx: &ValuationContext,
    calendar: &dyn TradingCalendar,
    lo: f64,
    hi: f64,
    points: usize,
) -> EngineResult<Vec<CurvePoint>> {
    if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || lo >= hi {
        return Err(EngineError::InvalidRequest(format!(
            "curve bounds must satisfy 0 <= lo < hi, got [{lo}, {hi}]"
        )));
    }
    if !(2..=MAX_CURVE_POINTS).contains(&points) {
        return Err(EngineError::InvalidRequest(format!(
            "curve needs 2..={MAX_CURVE_POINTS} points, got {points}"
        )));
    }

    let normalized: Vec<_> = group
        .legs
        .iter()
        .map(|leg| normalize(leg, group.view_mode, ctx, calendar))
        .collect();
    let cost: f64 = normalized.iter().map(|n| n.cost_basis).sum();

    let step = (hi - lo) / (points - 1) as f64;
    let curve = (0..points)
        .map(|i| {
            let price = if i == points - 1 { hi } else { lo + step * i as f64 };
            let at = ctx.at_price(price);
            let value: f64 = group
                .legs
                .iter()
                .zip(&normalized)
                .map(|(leg, n)| n.position_multiplier * resolve_price(n, leg, group.view_mode, &at))
                .sum();
            CurvePoint { price, pnl: value - cost }
        })
        .collect();
    Ok(curve)
}
