//! Fat-tailed Monte Carlo risk engine.
//!
//! Each path sums `horizon_days` iid Student-t daily log returns:
//!
//!   S_T = S_0 * exp(sum_{d=1..D} X_d),   X_d ~ t_nu(mu, s)
//!
//! Two statistics come out of one pass:
//!
//!   density[i]   = count_i / (N * w)              (in-bound paths only)
//!   E[PnL]       = (1/N) * sum_paths sum_legs (m * V(S_T) - cost)
//!
//! The expectation runs over every path, including the ones outside the
//! histogram bounds, and always divides by the full path count N.

use crate::errors::{EngineError, EngineResult};
use crate::models::calibration::Calibration;
use crate::models::student_t::{RejectionStats, StudentTSampler};
use crate::models::OptionType;
use crate::portfolio::leg::Leg;
use crate::portfolio::normalize::NormalizedLeg;
use crate::portfolio::resolver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Paths per parallel work unit. Fixed so results depend on the seed only,
/// never on the thread count.
pub const CHUNK_PATHS: usize = 16_384;
pub const MAX_PATHS: usize = 20_000_000;
pub const MAX_BINS: usize = 10_000;
/// Ten years of calendar days.
pub const MAX_HORIZON_DAYS: u32 = 3_650;

/// Odd multiplier from Knuth's MMIX LCG; spreads chunk seeds apart.
const CHUNK_SEED_STRIDE: u64 = 6_364_136_223_846_793_005;

/// Leg reduced to what terminal valuation needs.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimLeg {
    #[serde(rename = "type")]
    pub option_type: OptionType,
    pub strike: f64,
    pub rate: f64,
    /// Remaining life at the horizon; <= 0 settles at intrinsic
    pub years_to_expiry: f64,
    pub vol: f64,
    pub position_multiplier: f64,
    pub cost_basis: f64,
}

impl SimLeg {
    pub fn from_normalized(leg: &Leg, normalized: &NormalizedLeg, rate: f64) -> Self {
        Self {
            option_type: leg.option_type,
            strike: leg.strike,
            rate,
            years_to_expiry: if normalized.is_expired { 0.0 } else { normalized.years_to_expiry },
            vol: normalized.simulated_iv,
            position_multiplier: normalized.position_multiplier,
            cost_basis: normalized.cost_basis,
        }
    }

    #[inline]
    pub fn value_at(&self, terminal: f64) -> f64 {
        resolver::model_price(
            self.option_type,
            self.strike,
            terminal,
            self.years_to_expiry,
            self.rate,
            self.vol,
        )
    }

    #[inline]
    pub fn pnl_at(&self, terminal: f64) -> f64 {
        self.position_multiplier * self.value_at(terminal) - self.cost_basis
    }

    fn validate(&self) -> EngineResult<()> {
        let finite = self.strike.is_finite()
            && self.rate.is_finite()
            && self.years_to_expiry.is_finite()
            && self.vol.is_finite()
            && self.position_multiplier.is_finite()
            && self.cost_basis.is_finite();
        if !finite || self.strike <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "simulation leg has invalid fields: {self:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceBounds {
    pub lower: f64,
    pub upper: f64,
}

impl PriceBounds {
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Immutable snapshot handed to the engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub calibration: Calibration,
    pub horizon_days: u32,
    pub current_price: f64,
    pub price_bounds: PriceBounds,
    pub bin_count: usize,
    pub path_count: usize,
    pub legs: Vec<SimLeg>,
    /// Fixed seed for reproducible runs; fresh entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationParams {
    pub fn validate(&self) -> EngineResult<()> {
        if self.horizon_days == 0 {
            return Err(EngineError::NothingToSimulate);
        }
        if self.horizon_days > MAX_HORIZON_DAYS {
            return Err(EngineError::InvalidRequest(format!(
                "horizon of {} days exceeds {MAX_HORIZON_DAYS}",
                self.horizon_days
            )));
        }
        if self.path_count == 0 || self.path_count > MAX_PATHS {
            return Err(EngineError::InvalidRequest(format!(
                "path count must be in 1..={MAX_PATHS}, got {}",
                self.path_count
            )));
        }
        if self.bin_count == 0 || self.bin_count > MAX_BINS {
            return Err(EngineError::InvalidRequest(format!(
                "bin count must be in 1..={MAX_BINS}, got {}",
                self.bin_count
            )));
        }
        if !self.current_price.is_finite() || self.current_price <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "current price must be positive, got {}",
                self.current_price
            )));
        }
        let b = self.price_bounds;
        if !(b.lower.is_finite() && b.upper.is_finite()) || b.lower < 0.0 || b.lower >= b.upper {
            return Err(EngineError::InvalidRequest(format!(
                "price bounds must satisfy 0 <= lower < upper, got [{}, {}]",
                b.lower, b.upper
            )));
        }
        for leg in &self.legs {
            leg.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub bin_centers: Vec<f64>,
    #[serde(rename = "densityPerBin")]
    pub density: Vec<f64>,
    #[serde(rename = "exactExpectedPnL")]
    pub exact_expected_pnl: f64,
    pub path_count: usize,
    /// Histogram integral: fraction of paths inside the bounds
    pub in_bound_mass: f64,
    /// Fraction of all paths ending with P&L > 0
    pub probability_of_profit: f64,
}

impl SimulationResult {
    /// Riemann sum of the density over the bins.
    pub fn density_integral(&self) -> f64 {
        let width = match self.bin_centers.as_slice() {
            [a, b, ..] => b - a,
            _ => return self.in_bound_mass,
        };
        self.density.iter().sum::<f64>() * width
    }
}

/// Cooperative cancellation flag shared between the coordinator and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-chunk accumulator.
struct ChunkTally {
    counts: Vec<u64>,
    pnl_sum: f64,
    profitable: u64,
    gamma: RejectionStats,
}

/// Run the simulation. Pure: no I/O, no state carried between calls.
pub fn simulate(params: &SimulationParams, cancel: &CancelToken) -> EngineResult<SimulationResult> {
    params.validate()?;
    // Fail fast on a bad calibration before fanning out
    StudentTSampler::new(&params.calibration)?;

    let started = Instant::now();
    let n = params.path_count;
    let bins = params.bin_count;
    let base_seed = params.seed.unwrap_or_else(rand::random);
    let chunk_sizes = split_paths(n, CHUNK_PATHS);

    // Indexed collect keeps chunk order, so the reduction below is sequential
    // and bit-for-bit reproducible for a given seed.
    let tallies: EngineResult<Vec<ChunkTally>> = chunk_sizes
        .par_iter()
        .enumerate()
        .map(|(i, &paths)| {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let seed = base_seed.wrapping_add((i as u64).wrapping_mul(CHUNK_SEED_STRIDE));
            simulate_chunk(params, paths, seed)
        })
        .collect();
    let tallies = tallies?;

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut counts = vec![0u64; bins];
    let mut pnl_sum = 0.0;
    let mut profitable = 0u64;
    let mut gamma = RejectionStats::default();
    for t in &tallies {
        for (c, x) in counts.iter_mut().zip(&t.counts) {
            *c += x;
        }
        pnl_sum += t.pnl_sum;
        profitable += t.profitable;
        gamma.absorb(t.gamma);
    }

    let lo = params.price_bounds.lower;
    let width = params.price_bounds.width() / bins as f64;
    let total = n as f64;
    let in_bound: u64 = counts.iter().sum();

    let result = SimulationResult {
        bin_centers: (0..bins).map(|i| lo + (i as f64 + 0.5) * width).collect(),
        density: counts.iter().map(|&c| c as f64 / (total * width)).collect(),
        exact_expected_pnl: pnl_sum / total,
        path_count: n,
        in_bound_mass: in_bound as f64 / total,
        probability_of_profit: profitable as f64 / total,
    };

    tracing::debug!(
        paths = n,
        chunks = tallies.len(),
        horizon_days = params.horizon_days,
        df = params.calibration.degrees_of_freedom,
        gamma_acceptance = gamma.acceptance_rate(),
        expected_pnl = result.exact_expected_pnl,
        density_integral = result.density_integral(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );

    Ok(result)
}

fn simulate_chunk(params: &SimulationParams, paths: usize, seed: u64) -> EngineResult<ChunkTally> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sampler = StudentTSampler::new(&params.calibration)?;

    let bins = params.bin_count;
    let lo = params.price_bounds.lower;
    let hi = params.price_bounds.upper;
    let inv_width = bins as f64 / (hi - lo);
    let mut counts = vec![0u64; bins];
    let mut pnl_sum = 0.0;
    let mut profitable = 0u64;

    for _ in 0..paths {
        let mut log_return = 0.0;
        for _ in 0..params.horizon_days {
            log_return += sampler.sample(&mut rng);
        }
        let terminal = params.current_price * log_return.exp();
        if !terminal.is_finite() {
            return Err(EngineError::Sampler(format!(
                "non-finite terminal price (log return {log_return})"
            )));
        }

        if terminal >= lo && terminal <= hi {
            // terminal == hi lands in the last bin
            let idx = (((terminal - lo) * inv_width) as usize).min(bins - 1);
            counts[idx] += 1;
        }

        let pnl: f64 = params.legs.iter().map(|leg| leg.pnl_at(terminal)).sum();
        if !pnl.is_finite() {
            return Err(EngineError::Sampler(format!(
                "non-finite P&L at terminal price {terminal}"
            )));
        }
        pnl_sum += pnl;
        if pnl > 0.0 {
            profitable += 1;
        }
    }

    Ok(ChunkTally {
        counts,
        pnl_sum,
        profitable,
        gamma: sampler.gamma_stats(),
    })
}

/// Path counts per chunk: full chunks of `chunk`, then the remainder.
#[inline]
fn split_paths(n_paths: usize, chunk: usize) -> Vec<usize> {
    let chunk = chunk.max(1);
    let mut sizes = vec![chunk; n_paths / chunk];
    if n_paths % chunk > 0 {
        sizes.push(n_paths % chunk);
    }
    sizes
}
