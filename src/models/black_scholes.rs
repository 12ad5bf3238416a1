//! Black-Scholes-Merton European option pricing.
//!
//! call = S * Phi(d1) - K * e^{-rT} * Phi(d2)
//! put  = K * e^{-rT} * Phi(-d2) - S * Phi(-d1)
//!
//! where d1 = (ln(S/K) + (r + sigma^2/2)*T) / (sigma * sqrt(T)), d2 = d1 - sigma*sqrt(T).
//!
//! Pure functions, no allocations. Bad inputs are floored, never rejected.

use crate::models::OptionType;

/// Volatility floor applied before d1/d2 are formed.
pub const MIN_VOL: f64 = 1e-4;
/// Spot floor so ln(S/K) stays finite.
pub const MIN_SPOT: f64 = 1e-8;
const MIN_STRIKE: f64 = 1e-8;

// Abramowitz & Stegun 26.2.17
const AS_P: f64 = 0.231_641_9;
const AS_B1: f64 = 0.319_381_530;
const AS_B2: f64 = -0.356_563_782;
const AS_B3: f64 = 1.781_477_937;
const AS_B4: f64 = -1.821_255_978;
const AS_B5: f64 = 1.330_274_429;
const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Standard normal CDF, absolute error below 7.5e-8.
///
/// Evaluated on |x| and reflected, so `norm_cdf(-x) == 1 - norm_cdf(x)` holds
/// to rounding. Display precision only; not for tail-critical settlement.
#[inline]
pub fn norm_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let z = x.abs();
    let t = 1.0 / (1.0 + AS_P * z);
    let poly = t * (AS_B1 + t * (AS_B2 + t * (AS_B3 + t * (AS_B4 + t * AS_B5))));
    let upper = INV_SQRT_2PI * (-0.5 * z * z).exp() * poly;
    if x >= 0.0 {
        1.0 - upper
    } else {
        upper
    }
}

/// Payoff at expiry.
#[inline]
pub fn intrinsic(option_type: OptionType, spot: f64, strike: f64) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// Premium per share. `years_to_expiry <= 0` returns intrinsic value without
/// touching the volatility term.
#[inline]
pub fn price(
    option_type: OptionType,
    spot: f64,
    strike: f64,
    years_to_expiry: f64,
    rate: f64,
    vol: f64,
) -> f64 {
    if years_to_expiry <= 0.0 {
        return intrinsic(option_type, spot, strike);
    }

    let s = spot.max(MIN_SPOT);
    let k = strike.max(MIN_STRIKE);
    let sigma = vol.max(MIN_VOL);
    let t = years_to_expiry;

    let sigma_sqrt_t = sigma * t.sqrt();
    let d1 = ((s / k).ln() + (rate + 0.5 * sigma * sigma) * t) / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;
    let discounted_strike = k * (-rate * t).exp();

    let premium = match option_type {
        OptionType::Call => s * norm_cdf(d1) - discounted_strike * norm_cdf(d2),
        OptionType::Put => discounted_strike * norm_cdf(-d2) - s * norm_cdf(-d1),
    };

    // The rational approximation can dip a hair below zero deep out of the money
    premium.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::distribution::{ContinuousCDF, Normal};

    #[test]
    fn test_norm_cdf_matches_reference() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = -8.0;
        while x <= 8.0 {
            let diff = (norm_cdf(x) - normal.cdf(x)).abs();
            assert!(diff < 1e-7, "Phi({x}) off by {diff}");
            x += 0.05;
        }
    }

    #[test]
    fn test_norm_cdf_symmetry() {
        for &x in &[0.0, 0.3, 1.0, 2.5, 6.0] {
            assert!((norm_cdf(-x) + norm_cdf(x) - 1.0).abs() < 1e-15);
        }
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_expired_is_intrinsic_regardless_of_vol() {
        for &t in &[0.0, -0.5] {
            for &vol in &[0.0, 0.2, 5.0, -1.0] {
                assert_eq!(price(OptionType::Call, 110.0, 100.0, t, 0.03, vol), 10.0);
                assert_eq!(price(OptionType::Call, 90.0, 100.0, t, 0.03, vol), 0.0);
                assert_eq!(price(OptionType::Put, 90.0, 100.0, t, 0.03, vol), 10.0);
                assert_eq!(price(OptionType::Put, 110.0, 100.0, t, 0.03, vol), 0.0);
            }
        }
    }

    #[test]
    fn test_put_call_parity() {
        let spots = [50.0, 95.0, 100.0, 104.5, 180.0];
        let strikes = [60.0, 100.0, 150.0];
        let times = [1.0 / 252.0, 30.0 / 252.0, 1.0, 2.5];
        let rates = [0.0, 0.03, 0.08];
        let vols = [0.05, 0.2, 0.9];
        for &s in &spots {
            for &k in &strikes {
                for &t in &times {
                    for &r in &rates {
                        for &v in &vols {
                            let c = price(OptionType::Call, s, k, t, r, v);
                            let p = price(OptionType::Put, s, k, t, r, v);
                            let parity = s - k * (-r * t).exp();
                            assert!(
                                (c - p - parity).abs() < 1e-6,
                                "parity broken at S={s} K={k} T={t} r={r} v={v}: {}",
                                c - p - parity
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_known_value() {
        // S=100, K=100, T=1, r=5%, vol=20%: call 10.4506, put 5.5735
        let c = price(OptionType::Call, 100.0, 100.0, 1.0, 0.05, 0.2);
        let p = price(OptionType::Put, 100.0, 100.0, 1.0, 0.05, 0.2);
        assert!((c - 10.4506).abs() < 1e-3, "call={c}");
        assert!((p - 5.5735).abs() < 1e-3, "put={p}");
    }

    #[test]
    fn test_degenerate_inputs_are_floored() {
        let c = price(OptionType::Call, 0.0, 100.0, 0.5, 0.03, 0.0);
        assert!(c.is_finite() && c >= 0.0);
        let p = price(OptionType::Put, 100.0, 100.0, 0.5, 0.03, -0.3);
        assert!(p.is_finite() && p >= 0.0);
    }
}
