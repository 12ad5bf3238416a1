//! Student-t scale calibration.
//!
//! Var(t_nu(mu, s)) = s^2 * nu / (nu - 2)   for nu > 2
//!
//! The tail shape (nu) and location drift come from an external historical fit;
//! only the scale is re-derived here so the daily standard deviation matches a
//! live implied-volatility estimate.

/// Calendar days per year used to de-annualize implied volatility.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Per-underlying fit, as stored by the distribution parameter store.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionParameters {
    pub degrees_of_freedom: f64,
    pub location_drift: f64,
    /// Daily scale from the historical fit, used when no live vol is available
    pub historical_scale: f64,
}

/// Sampler inputs after calibration. Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub degrees_of_freedom: f64,
    /// Daily log-return location
    pub drift: f64,
    /// Daily log-return scale
    pub scale: f64,
}

impl Calibration {
    /// Rescale a historical fit to a target annualized vol. Without a target the
    /// historical scale is kept as fitted.
    pub fn from_parameters(params: &DistributionParameters, target_annual_vol: Option<f64>) -> Self {
        let scale = match target_annual_vol {
            Some(vol) if vol.is_finite() && vol > 0.0 => {
                calibrate_scale(params.degrees_of_freedom, vol)
            }
            _ => params.historical_scale,
        };
        Self {
            degrees_of_freedom: params.degrees_of_freedom,
            drift: params.location_drift,
            scale,
        }
    }

    /// Daily standard deviation implied by this calibration, if finite.
    pub fn daily_std(&self) -> Option<f64> {
        let nu = self.degrees_of_freedom;
        if nu > 2.0 {
            Some(self.scale * (nu / (nu - 2.0)).sqrt())
        } else {
            None
        }
    }
}

/// Scale such that the Student-t daily std equals `target_annual_vol / sqrt(365)`.
///
/// For `nu <= 2` the variance is undefined and the daily target is used as the
/// scale directly.
#[inline]
pub fn calibrate_scale(degrees_of_freedom: f64, target_annual_vol: f64) -> f64 {
    let target_daily = target_annual_vol / DAYS_PER_YEAR.sqrt();
    if degrees_of_freedom <= 2.0 {
        return target_daily;
    }
    target_daily / (degrees_of_freedom / (degrees_of_freedom - 2.0)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_matches_target_daily_std() {
        let scale = calibrate_scale(5.0, 0.20);
        let implied = scale * (5.0_f64 / 3.0).sqrt();
        let target = 0.20 / 365.0_f64.sqrt();
        assert!(((implied - target) / target).abs() < 1e-6, "implied={implied} target={target}");
    }

    #[test]
    fn test_degenerate_variance_falls_back() {
        let target = 0.30 / 365.0_f64.sqrt();
        assert_eq!(calibrate_scale(2.0, 0.30), target);
        assert_eq!(calibrate_scale(1.5, 0.30), target);
    }

    #[test]
    fn test_fatter_tails_shrink_scale() {
        assert!(calibrate_scale(3.0, 0.2) < calibrate_scale(10.0, 0.2));
        assert!(calibrate_scale(10.0, 0.2) < calibrate_scale(100.0, 0.2));
    }

    #[test]
    fn test_from_parameters_without_target_keeps_historical() {
        let params = DistributionParameters {
            degrees_of_freedom: 4.0,
            location_drift: 0.0004,
            historical_scale: 0.009,
        };
        let cal = Calibration::from_parameters(&params, None);
        assert_eq!(cal.scale, 0.009);
        assert_eq!(cal.drift, 0.0004);

        let cal = Calibration::from_parameters(&params, Some(0.25));
        let daily = cal.daily_std().unwrap();
        assert!((daily - 0.25 / 365.0_f64.sqrt()).abs() < 1e-12);
    }
}
