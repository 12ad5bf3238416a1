use crate::errors::{EngineError, EngineResult};
use crate::models::calibration::Calibration;
use rand::Rng;
use std::f64::consts::TAU;

/// Student-t daily log-return sampler.
///
/// X = mu + s * Z / sqrt(C / nu),   Z ~ N(0, 1),   C = 2 * Gamma(nu / 2, 1) ~ chi^2(nu)
///
/// Normals come from Box-Muller, gamma variates from Marsaglia-Tsang. The uniform
/// source is any `rand::Rng`; the engine hands each chunk its own seeded stream.
pub struct StudentTSampler {
    drift: f64,
    scale: f64,
    nu: f64,
    normal: NormalSampler,
    gamma: GammaSampler,
}

impl StudentTSampler {
    pub fn new(calibration: &Calibration) -> EngineResult<Self> {
        let nu = calibration.degrees_of_freedom;
        if !nu.is_finite() || nu <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "degrees of freedom must be positive, got {nu}"
            )));
        }
        if !calibration.scale.is_finite() || calibration.scale <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "scale must be positive, got {}",
                calibration.scale
            )));
        }
        if !calibration.drift.is_finite() {
            return Err(EngineError::InvalidRequest("drift must be finite".into()));
        }
        Ok(Self {
            drift: calibration.drift,
            scale: calibration.scale,
            nu,
            normal: NormalSampler::new(),
            gamma: GammaSampler::new(0.5 * nu)?,
        })
    }

    /// One daily log return. NaN only if the gamma rejection loop gave up.
    #[inline]
    pub fn sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let z = self.normal.sample(rng);
        let chi2 = 2.0 * self.gamma.sample(&mut self.normal, rng);
        self.drift + self.scale * z / (chi2 / self.nu).sqrt()
    }

    #[inline]
    pub fn gamma_stats(&self) -> RejectionStats {
        self.gamma.stats()
    }
}

/// Box-Muller standard normals. Each pair of uniforms yields two variates; the
/// second is cached for the next call.
pub struct NormalSampler {
    spare: Option<f64>,
}

impl NormalSampler {
    pub fn new() -> Self {
        Self { spare: None }
    }

    #[inline]
    pub fn sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // u1 in (0, 1] keeps ln finite
        let u1 = 1.0 - rng.gen::<f64>();
        let u2 = rng.gen::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = TAU * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }
}

/// Rejection-loop accounting, for checking the acceptance rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionStats {
    pub attempts: u64,
    pub accepted: u64,
}

impl RejectionStats {
    pub fn absorb(&mut self, other: RejectionStats) {
        self.attempts += other.attempts;
        self.accepted += other.accepted;
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.attempts as f64
    }
}

/// Upper bound on rejection attempts for one draw before the draw is reported
/// as a fault (NaN).
const MAX_ATTEMPTS: u32 = 1_000;

/// Marsaglia-Tsang Gamma(shape, 1).
///
/// For shape < 1 draws Gamma(shape + 1) and multiplies by U^(1/shape).
pub struct GammaSampler {
    shape: f64,
    d: f64,
    c: f64,
    boost: bool,
    stats: RejectionStats,
}

impl GammaSampler {
    pub fn new(shape: f64) -> EngineResult<Self> {
        if !shape.is_finite() || shape <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "gamma shape must be positive, got {shape}"
            )));
        }
        let boost = shape < 1.0;
        let a = if boost { shape + 1.0 } else { shape };
        let d = a - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        Ok(Self {
            shape,
            d,
            c,
            boost,
            stats: RejectionStats::default(),
        })
    }

    #[inline]
    pub fn sample<R: Rng + ?Sized>(&mut self, normal: &mut NormalSampler, rng: &mut R) -> f64 {
        let g = self.sample_core(normal, rng);
        if self.boost {
            let u = 1.0 - rng.gen::<f64>();
            g * u.powf(1.0 / self.shape)
        } else {
            g
        }
    }

    fn sample_core<R: Rng + ?Sized>(&mut self, normal: &mut NormalSampler, rng: &mut R) -> f64 {
        for _ in 0..MAX_ATTEMPTS {
            self.stats.attempts += 1;
            let x = normal.sample(rng);
            let v = 1.0 + self.c * x;
            if v <= 0.0 {
                continue;
            }
            let v = v * v * v;
            let u = 1.0 - rng.gen::<f64>();
            let x2 = x * x;

            // Squeeze first, log test only when it fails
            if u < 1.0 - 0.0331 * x2 * x2 || u.ln() < 0.5 * x2 + self.d * (1.0 - v + v.ln()) {
                self.stats.accepted += 1;
                return self.d * v;
            }
        }
        tracing::error!(shape = self.shape, "gamma rejection loop exhausted");
        f64::NAN
    }

    #[inline]
    pub fn stats(&self) -> RejectionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::{ContinuousCDF, StudentsT};

    fn mean_var(xs: &[f64]) -> (f64, f64) {
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0);
        (mean, var)
    }

    #[test]
    fn test_box_muller_moments() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut normal = NormalSampler::new();
        let xs: Vec<f64> = (0..200_000).map(|_| normal.sample(&mut rng)).collect();
        let (mean, var) = mean_var(&xs);
        assert!(mean.abs() < 0.01, "mean={mean}");
        assert!((var - 1.0).abs() < 0.02, "var={var}");
    }

    #[test]
    fn test_gamma_moments() {
        for &shape in &[0.6, 1.0, 1.5, 5.0, 15.0] {
            let mut rng = StdRng::seed_from_u64(23);
            let mut normal = NormalSampler::new();
            let mut gamma = GammaSampler::new(shape).unwrap();
            let xs: Vec<f64> = (0..200_000).map(|_| gamma.sample(&mut normal, &mut rng)).collect();
            let (mean, var) = mean_var(&xs);
            // Gamma(k, 1): mean = var = k
            assert!(((mean - shape) / shape).abs() < 0.02, "shape={shape} mean={mean}");
            assert!(((var - shape) / shape).abs() < 0.05, "shape={shape} var={var}");
        }
    }

    #[test]
    fn test_rejection_stats_absorb() {
        let mut total = RejectionStats::default();
        assert_eq!(total.acceptance_rate(), 0.0);
        total.absorb(RejectionStats { attempts: 100, accepted: 96 });
        total.absorb(RejectionStats { attempts: 100, accepted: 98 });
        assert_eq!(total.attempts, 200);
        assert!((total.acceptance_rate() - 0.97).abs() < 1e-12);
    }

    #[test]
    fn test_acceptance_rate_above_95_percent() {
        for &nu in &[2.5, 3.0, 4.0, 6.0, 10.0, 20.0, 30.0] {
            let mut rng = StdRng::seed_from_u64(5);
            let mut normal = NormalSampler::new();
            let mut gamma = GammaSampler::new(0.5 * nu).unwrap();
            for _ in 0..200_000 {
                gamma.sample(&mut normal, &mut rng);
            }
            let rate = gamma.stats().acceptance_rate();
            assert!(rate > 0.95, "nu={nu} acceptance={rate}");
        }
    }

    #[test]
    fn test_student_t_variance() {
        let cal = Calibration { degrees_of_freedom: 8.0, drift: 0.001, scale: 0.01 };
        let mut sampler = StudentTSampler::new(&cal).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let xs: Vec<f64> = (0..200_000).map(|_| sampler.sample(&mut rng)).collect();
        let (mean, var) = mean_var(&xs);
        let expected = 0.01 * 0.01 * 8.0 / 6.0;
        assert!((mean - 0.001).abs() < 1.5e-4, "mean={mean}");
        assert!(((var - expected) / expected).abs() < 0.05, "var={var} expected={expected}");
    }

    #[test]
    fn test_student_t_matches_reference_cdf() {
        let cal = Calibration { degrees_of_freedom: 4.0, drift: 0.0, scale: 1.0 };
        let mut sampler = StudentTSampler::new(&cal).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 100_000;
        let xs: Vec<f64> = (0..n).map(|_| sampler.sample(&mut rng)).collect();
        let reference = StudentsT::new(0.0, 1.0, 4.0).unwrap();
        for &q in &[-3.0, -1.0, 0.0, 0.5, 2.0, 4.0] {
            let empirical = xs.iter().filter(|&&x| x <= q).count() as f64 / n as f64;
            let diff = (empirical - reference.cdf(q)).abs();
            assert!(diff < 0.01, "F({q}) empirical={empirical} reference={}", reference.cdf(q));
        }
    }

    #[test]
    fn test_rejects_invalid_calibration() {
        let bad_nu = Calibration { degrees_of_freedom: 0.0, drift: 0.0, scale: 0.01 };
        assert!(StudentTSampler::new(&bad_nu).is_err());
        let bad_scale = Calibration { degrees_of_freedom: 5.0, drift: 0.0, scale: -1.0 };
        assert!(StudentTSampler::new(&bad_scale).is_err());
        assert!(GammaSampler::new(f64::NAN).is_err());
    }

    #[test]
    fn test_same_seed_same_stream() {
        let cal = Calibration { degrees_of_freedom: 3.5, drift: 0.0, scale: 0.02 };
        let mut a = StudentTSampler::new(&cal).unwrap();
        let mut b = StudentTSampler::new(&cal).unwrap();
        let mut ra = StdRng::seed_from_u64(42);
        let mut rb = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            assert_eq!(a.sample(&mut ra), b.sample(&mut rb));
        }
        assert!(a.gamma_stats().attempts >= 1000);
    }
}
