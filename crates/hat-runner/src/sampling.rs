//! Randomized trial parameters.
//!
//! Each trial draws `n` (batch size), `c` and `ell` independently and
//! uniformly from inclusive ranges, derives the reconstruction threshold
//! `t`, and splits the `n` points among dealers:
//!
//! ```text
//! t          = ceil(n/(c+1) + c*(ell+1)/(c+1))
//! k          ~ U[0, floor(n / (ell+1))]          (sufficient dealers)
//! count_i    ~ U[ell+1, floor(n / k)]            (i = 1..k)
//! residual   = n - sum(count_i)                  (the insufficient dealer)
//! ```
//!
//! Since `k * (ell+1) <= n`, `floor(n/k) >= ell+1` and `k * floor(n/k) <= n`,
//! so every count range is non-empty and the residual never goes negative.

use rand::Rng;

use crate::error::{ConfigError, TrialError};

/// Inclusive range of positive integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: u64,
    pub max: u64,
}

impl IntRange {
    pub fn new(name: &'static str, min: u64, max: u64) -> Result<Self, ConfigError> {
        if min == 0 {
            return Err(ConfigError::NonPositive { name });
        }
        if min > max {
            return Err(ConfigError::EmptyRange { name, min, max });
        }
        Ok(Self { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterRanges {
    pub n: IntRange,
    pub c: IntRange,
    pub ell: IntRange,
}

impl ParameterRanges {
    /// Rejects ranges whose upper bounds would overflow `t`, `ell + 1`,
    /// `c + 1`, the generator's `n + 1` argument or the signed `max_points`
    /// column.
    pub fn new(n: IntRange, c: IntRange, ell: IntRange) -> Result<Self, ConfigError> {
        if n.max >= i64::MAX as u64 {
            return Err(ConfigError::RangeTooLarge { name: "n" });
        }
        let ell_plus_one = ell
            .max
            .checked_add(1)
            .ok_or(ConfigError::RangeTooLarge { name: "ell" })?;
        c.max
            .checked_add(1)
            .ok_or(ConfigError::RangeTooLarge { name: "c" })?;
        c.max
            .checked_mul(ell_plus_one)
            .and_then(|v| v.checked_add(n.max))
            .ok_or(ConfigError::RangeTooLarge { name: "c" })?;
        Ok(Self { n, c, ell })
    }
}

/// Sampled parameters of one trial. `t` is derived, never sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialParameters {
    pub n: u64,
    pub c: u64,
    pub ell: u64,
    pub t: u64,
}

impl TrialParameters {
    pub fn new(n: u64, c: u64, ell: u64) -> Self {
        Self {
            n,
            c,
            ell,
            t: min_threshold(n, c, ell),
        }
    }
}

/// Minimum number of correct points needed to reconstruct with `c` faulty
/// contributors and sharing degree `ell`.
///
/// Both terms share the denominator `c + 1`, so the ceiling is taken over a
/// single integer quotient and no floating point is involved.
pub fn min_threshold(n: u64, c: u64, ell: u64) -> u64 {
    (n + c * (ell + 1)).div_ceil(c + 1)
}

/// How the `n` points of an instance are split among dealers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealerPartition {
    /// Point counts of the sufficient dealers, each `>= ell + 1`.
    pub sufficient: Vec<u64>,
    /// Per-dealer cap used while sampling; `None` when there are no
    /// sufficient dealers.
    pub max_points: Option<u64>,
}

impl DealerPartition {
    /// Upper bound on how many sufficient dealers fit in `n` points.
    pub fn max_sufficient_dealers(n: u64, ell: u64) -> u64 {
        n / (ell + 1)
    }

    pub fn sample<R: Rng + ?Sized>(n: u64, ell: u64, rng: &mut R) -> Self {
        let min_sufficient_points = ell + 1;
        let dealers = rng.gen_range(0..=Self::max_sufficient_dealers(n, ell));
        if dealers == 0 {
            return Self {
                sufficient: Vec::new(),
                max_points: None,
            };
        }
        let max_points = n / dealers;
        let sufficient = (0..dealers)
            .map(|_| rng.gen_range(min_sufficient_points..=max_points))
            .collect();
        Self {
            sufficient,
            max_points: Some(max_points),
        }
    }

    pub fn dealer_count(&self) -> usize {
        self.sufficient.len()
    }

    /// Points left for the single insufficient dealer.
    pub fn residual(&self, n: u64) -> Result<u64, TrialError> {
        let sum: u64 = self.sufficient.iter().sum();
        n.checked_sub(sum)
            .ok_or(TrialError::InconsistentPartition { n, sum })
    }

    /// Per-dealer cap for progress output, `-1` when unused.
    pub fn max_points_display(&self) -> i64 {
        self.max_points.map(|m| m as i64).unwrap_or(-1)
    }
}

/// Everything sampled for one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPlan {
    pub params: TrialParameters,
    pub partition: DealerPartition,
}

impl TrialPlan {
    pub fn sample<R: Rng + ?Sized>(ranges: &ParameterRanges, rng: &mut R) -> Self {
        let n = ranges.n.sample(rng);
        let c = ranges.c.sample(rng);
        let ell = ranges.ell.sample(rng);
        let params = TrialParameters::new(n, c, ell);
        let partition = DealerPartition::sample(n, ell, rng);
        Self { params, partition }
    }
}
