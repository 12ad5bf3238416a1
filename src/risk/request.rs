use crate::calendar::TradingCalendar;
use crate::db::DistributionStore;
use crate::errors::{EngineError, EngineResult};
use crate::models::calibration::{Calibration, DAYS_PER_YEAR};
use crate::portfolio::leg::Group;
use crate::portfolio::normalize::{normalize, ValuationContext};
use crate::risk::monte_carlo::{PriceBounds, SimLeg, SimulationParams};

/// Default histogram half-width in standard deviations of the log price.
pub const DEFAULT_BOUNDS_SIGMAS: f64 = 4.0;

/// What a caller asks for. Everything optional falls back to `SimulationDefaults`
/// or to values derived from the group.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub group: Group,
    pub context: ValuationContext,
    #[serde(default)]
    pub price_bounds: Option<PriceBounds>,
    #[serde(default)]
    pub bin_count: Option<usize>,
    #[serde(default)]
    pub path_count: Option<usize>,
    /// Annualized vol to calibrate against; derived from the legs when absent
    #[serde(default)]
    pub target_vol: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationDefaults {
    pub path_count: usize,
    pub bin_count: usize,
    pub seed: Option<u64>,
}

/// Turn a request into an engine snapshot, or refuse it.
///
/// Refusals: missing distribution parameters for the ticker, zero horizon,
/// simulated date before the base date, bad bounds or counts.
pub fn build_simulation(
    request: &SimulationRequest,
    store: &dyn DistributionStore,
    calendar: &dyn TradingCalendar,
    defaults: &SimulationDefaults,
) -> EngineResult<SimulationParams> {
    let ctx = &request.context;
    ctx.validate()?;

    let ticker = request.group.ticker.trim();
    let params = store
        .by_ticker(ticker)?
        .ok_or_else(|| EngineError::MissingDistribution { ticker: ticker.to_string() })?;

    if ctx.is_present() {
        return Err(EngineError::NothingToSimulate);
    }
    let horizon_days = calendar.calendar_days_between(ctx.base_date, ctx.simulated_date);

    let mode = request.group.view_mode;
    let legs: Vec<SimLeg> = request
        .group
        .legs
        .iter()
        .map(|leg| {
            let n = normalize(leg, mode, ctx, calendar);
            SimLeg::from_normalized(leg, &n, ctx.interest_rate)
        })
        .collect();

    let target_vol = request
        .target_vol
        .filter(|v| v.is_finite() && *v > 0.0)
        .or_else(|| weighted_vol(&request.group, ctx, calendar));
    let calibration = Calibration::from_parameters(&params, target_vol);

    let price_bounds = match request.price_bounds {
        Some(b) => {
            if !(b.lower.is_finite() && b.upper.is_finite()) || b.lower < 0.0 || b.lower >= b.upper {
                return Err(EngineError::InvalidRequest(format!(
                    "price bounds must satisfy 0 <= lower < upper, got [{}, {}]",
                    b.lower, b.upper
                )));
            }
            b
        }
        None => {
            let annual_vol = target_vol.unwrap_or_else(|| annualized(&calibration));
            default_bounds(ctx.underlying_price, annual_vol, horizon_days)
        }
    };

    let bin_count = request.bin_count.unwrap_or(defaults.bin_count);
    let path_count = request.path_count.unwrap_or(defaults.path_count);
    if bin_count == 0 || path_count == 0 {
        return Err(EngineError::InvalidRequest(format!(
            "bin and path counts must be positive, got {bin_count} bins and {path_count} paths"
        )));
    }

    let sim = SimulationParams {
        calibration,
        horizon_days,
        current_price: ctx.underlying_price,
        price_bounds,
        bin_count,
        path_count,
        legs,
        seed: request.seed.or(defaults.seed),
    };
    sim.validate()?;
    Ok(sim)
}

/// |position|-weighted mean of the legs' simulated IVs.
fn weighted_vol(
    group: &Group,
    ctx: &ValuationContext,
    calendar: &dyn TradingCalendar,
) -> Option<f64> {
    let (weighted, weight) = group.legs.iter().fold((0.0, 0.0), |(sum, w), leg| {
        let n = normalize(leg, group.view_mode, ctx, calendar);
        let abs = leg.position.unsigned_abs() as f64;
        (sum + abs * n.simulated_iv, w + abs)
    });
    (weight > 0.0).then(|| weighted / weight)
}

/// Annualized vol implied by a calibration, falling back to the raw scale when
/// the variance is undefined.
fn annualized(calibration: &Calibration) -> f64 {
    calibration.daily_std().unwrap_or(calibration.scale) * DAYS_PER_YEAR.sqrt()
}

/// `current * exp(±k * sigma * sqrt(h / 365))`
pub fn default_bounds(current: f64, annual_vol: f64, horizon_days: u32) -> PriceBounds {
    let half_width = DEFAULT_BOUNDS_SIGMAS * annual_vol * (horizon_days as f64 / DAYS_PER_YEAR).sqrt();
    PriceBounds {
        lower: current * (-half_width).exp(),
        upper: current * half_width.exp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NyseCalendar;
    use crate::db::MemoryStore;
    use crate::models::calibration::DistributionParameters;
    use crate::models::OptionType;
    use crate::portfolio::leg::{Leg, ViewMode};
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with(
            "SPY",
            DistributionParameters { degrees_of_freedom: 4.0, location_drift: 0.0002, historical_scale: 0.008 },
        )
    }

    fn defaults() -> SimulationDefaults {
        SimulationDefaults { path_count: 10_000, bin_count: 80, seed: Some(1) }
    }

    fn request(ticker: &str, sim: NaiveDate) -> SimulationRequest {
        let short = Leg::new(OptionType::Call, -2, 100.0, d(2025, 4, 17), 0.2).unwrap();
        let long = Leg::new(OptionType::Call, 1, 110.0, d(2025, 4, 17), 0.3).unwrap();
        SimulationRequest {
            group: Group::new("ratio", ticker, ViewMode::Trial).with_leg(short).with_leg(long),
            context: ValuationContext::new(d(2025, 3, 3), sim, 100.0, 0.03, 0.0).unwrap(),
            price_bounds: None,
            bin_count: None,
            path_count: None,
            target_vol: None,
            seed: None,
        }
    }

    #[test]
    fn test_missing_ticker_is_refused_with_guidance() {
        let cal = NyseCalendar::new();
        let err = build_simulation(&request("QQQ", d(2025, 3, 20)), &store(), &cal, &defaults()).unwrap_err();
        assert!(matches!(err, EngineError::MissingDistribution { ref ticker } if ticker == "QQQ"));
        assert!(err.to_string().contains("QQQ"));
        assert!(err.is_refusal());
    }

    #[test]
    fn test_zero_horizon_is_refused() {
        let cal = NyseCalendar::new();
        let err = build_simulation(&request("SPY", d(2025, 3, 3)), &store(), &cal, &defaults()).unwrap_err();
        assert!(matches!(err, EngineError::NothingToSimulate));
    }

    #[test]
    fn test_builds_from_group() {
        let cal = NyseCalendar::new();
        let sim = build_simulation(&request("spy", d(2025, 3, 20)), &store(), &cal, &defaults()).unwrap();
        assert_eq!(sim.horizon_days, 17);
        assert_eq!(sim.legs.len(), 2);
        assert_eq!(sim.bin_count, 80);
        assert_eq!(sim.path_count, 10_000);
        assert_eq!(sim.seed, Some(1));
        assert_eq!(sim.calibration.degrees_of_freedom, 4.0);

        // (2 * 0.2 + 1 * 0.3) / 3
        let vol = 0.7 / 3.0;
        let daily = sim.calibration.daily_std().unwrap();
        assert!((daily - vol / 365.0_f64.sqrt()).abs() < 1e-12);

        let expected = default_bounds(100.0, vol, 17);
        assert_eq!(sim.price_bounds, expected);
        assert!(sim.price_bounds.lower < 100.0 && sim.price_bounds.upper > 100.0);

        // Legs are normalized at the simulated date
        let trading = cal.trading_days_between(d(2025, 3, 20), d(2025, 4, 17)) as f64;
        assert!((sim.legs[0].years_to_expiry - trading / 252.0).abs() < 1e-15);
        assert_eq!(sim.legs[0].position_multiplier, -200.0);
    }

    #[test]
    fn test_horizon_past_expiry_settles_legs() {
        let cal = NyseCalendar::new();
        let sim = build_simulation(&request("SPY", d(2025, 5, 1)), &store(), &cal, &defaults()).unwrap();
        assert!(sim.legs.iter().all(|l| l.years_to_expiry == 0.0));
    }

    #[test]
    fn test_empty_group_uses_historical_scale() {
        let cal = NyseCalendar::new();
        let mut req = request("SPY", d(2025, 3, 20));
        req.group.legs.clear();
        let sim = build_simulation(&req, &store(), &cal, &defaults()).unwrap();
        assert_eq!(sim.calibration.scale, 0.008);
        assert!(sim.legs.is_empty());
    }

    #[test]
    fn test_explicit_overrides_and_bad_bounds() {
        let cal = NyseCalendar::new();
        let mut req = request("SPY", d(2025, 3, 20));
        req.price_bounds = Some(PriceBounds { lower: 80.0, upper: 120.0 });
        req.bin_count = Some(40);
        req.seed = Some(9);
        let sim = build_simulation(&req, &store(), &cal, &defaults()).unwrap();
        assert_eq!(sim.price_bounds.lower, 80.0);
        assert_eq!(sim.bin_count, 40);
        assert_eq!(sim.seed, Some(9));

        req.price_bounds = Some(PriceBounds { lower: 120.0, upper: 80.0 });
        assert!(build_simulation(&req, &store(), &cal, &defaults()).is_err());

        req.price_bounds = None;
        req.path_count = Some(0);
        assert!(build_simulation(&req, &store(), &cal, &defaults()).is_err());
    }
}
