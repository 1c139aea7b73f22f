//! Log-domain building blocks for the multinomial arithmetic.
//!
//! All probabilities in this crate live as natural logarithms until the last
//! moment. The one subtlety is pruning: a configuration is discarded when its
//! log-probability falls below a cutoff, so the evaluation here is biased
//! *upward* — an overestimate can only let a borderline configuration
//! through, never lose one that belongs in the output.

use std::sync::LazyLock;

use special::Gamma;

/// Stand-in for `log(0)` that keeps cutoff arithmetic finite.
///
/// Using `-inf` directly would make `cutoff - max_other` collapse to `-inf`
/// and the marginal enumeration below it unbounded; any configuration with an
/// actual zero-probability isotope still evaluates to `-inf` and therefore
/// always falls below this floor.
pub(crate) const LOG_PROB_FLOOR: f64 = -1.0e300;

const FACTORIAL_TABLE_SIZE: usize = 2048;

static LOG_FACTORIAL_TABLE: LazyLock<Vec<f64>> = LazyLock::new(|| {
    let mut table = Vec::with_capacity(FACTORIAL_TABLE_SIZE);
    table.push(0.0);
    let mut sum = 0.0_f64;
    for n in 1..FACTORIAL_TABLE_SIZE {
        sum += (n as f64).ln();
        table.push(sum);
    }
    table
});

/// `ln(n!)`, exact summation for small `n`, log-gamma above the table.
pub(crate) fn log_factorial(n: u32) -> f64 {
    LOG_FACTORIAL_TABLE
        .get(n as usize)
        .copied()
        .unwrap_or_else(|| f64::from(n + 1).ln_gamma().0)
}

/// Unnormalized log-probability of a marginal configuration:
/// `ln n! − Σ ln cᵢ! + Σ cᵢ·ln pᵢ` for `n = Σ cᵢ`.
///
/// The result is inflated by a forward error bound over the accumulation, so
/// it is an upper bound on the exact value (the rounding-mode trick of the
/// reference algorithm, expressed without touching the FPU control word).
pub(crate) fn log_multinomial(conf: &[u32], log_probs: &[f64]) -> f64 {
    debug_assert_eq!(conf.len(), log_probs.len());
    let n: u32 = conf.iter().sum();
    let mut sum = log_factorial(n);
    let mut max_abs = sum.abs();
    for &c in conf {
        if c > 1 {
            sum -= log_factorial(c);
            max_abs = max_abs.max(sum.abs());
        }
    }
    for (&c, &lp) in conf.iter().zip(log_probs) {
        if c > 0 {
            sum += f64::from(c) * lp;
            max_abs = max_abs.max(sum.abs());
        }
    }
    if !sum.is_finite() {
        // A zero-abundance isotope was used: exactly -inf, no bias needed.
        return sum;
    }
    let operations = (2 * conf.len() + 2) as f64;
    sum + operations * f64::EPSILON * max_abs
}

/// Kahan compensated accumulator for the running probability mass of the
/// layered generator, where plain summation of millions of tiny `eprob`
/// values drifts enough to mis-time the stopping decision.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn value(&self) -> f64 {
        self.sum
    }
}
