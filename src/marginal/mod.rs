//! Marginal (per-element) isotope distributions.
//!
//! For one element with `k` isotopes and `n` atoms, a marginal configuration
//! is a count vector `(c₁, …, c_k)` with `Σ cᵢ = n`, distributed
//! multinomially over the natural abundances. The joint isotopologue
//! distribution of a molecule is the product of its marginals, and every
//! joint generator in this crate works on marginals brought into one of
//! three shapes: lazily sorted ([`MarginalTrek`]), fully precomputed above a
//! cutoff ([`PrecalculatedMarginal`]), or grown in cutoff slabs
//! ([`LayeredMarginal`]).

mod layered;
mod precalculated;
mod trek;

pub use layered::LayeredMarginal;
pub use precalculated::PrecalculatedMarginal;
pub use trek::MarginalTrek;

use itertools::Itertools;

use crate::numerics::log_multinomial;

/// The bookkeeping every marginal variant starts from: the isotope tables of
/// one element slot, its modal configuration, and the extreme masses.
///
/// Computing the mode needs no enumeration: round `n·pᵢ`, redistribute the
/// rounding residual along the largest fractional remainders, then settle
/// with single-unit transfers until no transfer improves the probability.
#[derive(Clone, Debug)]
pub struct Marginal {
    atom_count: u32,
    masses: Box<[f64]>,
    probs: Box<[f64]>,
    log_probs: Box<[f64]>,
    mode_conf: Box<[u32]>,
    mode_lprob: f64,
}

impl Marginal {
    /// Set up the marginal for `atom_count` atoms over the given isotope
    /// masses and abundances.
    pub(crate) fn new(masses: Vec<f64>, probs: Vec<f64>, atom_count: u32) -> Self {
        debug_assert_eq!(masses.len(), probs.len());
        debug_assert!(!masses.is_empty());
        let log_probs: Box<[f64]> = probs.iter().map(|p| p.ln()).collect();
        let mode_conf = mode_configuration(&probs, &log_probs, atom_count);
        let mode_lprob = log_multinomial(&mode_conf, &log_probs);
        Self {
            atom_count,
            masses: masses.into_boxed_slice(),
            probs: probs.into_boxed_slice(),
            log_probs,
            mode_conf: mode_conf.into_boxed_slice(),
            mode_lprob,
        }
    }

    /// The number of isotopes of this element.
    pub fn isotope_count(&self) -> usize {
        self.masses.len()
    }

    /// The number of atoms distributed over the isotopes.
    pub const fn atom_count(&self) -> u32 {
        self.atom_count
    }

    /// The most probable configuration.
    pub fn mode_conf(&self) -> &[u32] {
        &self.mode_conf
    }

    /// The log-probability of the most probable configuration.
    pub const fn mode_lprob(&self) -> f64 {
        self.mode_lprob
    }

    /// The mass with every atom on the lightest isotope.
    pub fn smallest_mass(&self) -> f64 {
        f64::from(self.atom_count) * self.masses.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// The mass with every atom on the heaviest isotope.
    pub fn largest_mass(&self) -> f64 {
        f64::from(self.atom_count) * self.masses.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// The mass of a configuration.
    pub(crate) fn conf_mass(&self, conf: &[u32]) -> f64 {
        conf.iter()
            .zip(&self.masses)
            .map(|(&c, &m)| f64::from(c) * m)
            .sum()
    }

    /// The (upper-bounded) log-probability of a configuration.
    pub(crate) fn conf_lprob(&self, conf: &[u32]) -> f64 {
        log_multinomial(conf, &self.log_probs)
    }

    pub(crate) fn log_probs(&self) -> &[f64] {
        &self.log_probs
    }
}

/// The closed-form multinomial mode for `n` trials over `probs`.
fn mode_configuration(probs: &[f64], log_probs: &[f64], n: u32) -> Vec<u32> {
    let scaled: Vec<f64> = probs.iter().map(|p| p * f64::from(n)).collect();
    let mut conf: Vec<u32> = scaled.iter().map(|s| s.floor() as u32).collect();
    let assigned: u32 = conf.iter().sum();

    // Hand the leftover units to the largest fractional remainders.
    let leftover = (n - assigned) as usize;
    for index in scaled
        .iter()
        .enumerate()
        .sorted_unstable_by(|a, b| {
            let fa = a.1.fract();
            let fb = b.1.fract();
            fb.partial_cmp(&fa)
                .expect("fractional remainders are never NaN")
                .then(a.0.cmp(&b.0))
        })
        .map(|(i, _)| i)
        .take(leftover)
    {
        conf[index] += 1;
    }

    // Rounding can land one unit off the true argmax; settle with
    // probability-improving single-unit transfers.
    let mut best = log_multinomial(&conf, log_probs);
    loop {
        let mut improved = false;
        for from in 0..conf.len() {
            for to in 0..conf.len() {
                if from == to || conf[from] == 0 {
                    continue;
                }
                conf[from] -= 1;
                conf[to] += 1;
                let lprob = log_multinomial(&conf, log_probs);
                if lprob > best {
                    best = lprob;
                    improved = true;
                } else {
                    conf[from] += 1;
                    conf[to] -= 1;
                }
            }
        }
        if !improved {
            break;
        }
    }
    conf
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_sums_to_atom_count() {
        for n in [0_u32, 1, 7, 100, 2000] {
            let marginal = Marginal::new(
                vec![31.972_071, 32.971_458_76, 33.967_866_9, 35.967_080_76],
                vec![0.9499, 0.0075, 0.0425, 0.0001],
                n,
            );
            assert_eq!(marginal.mode_conf().iter().sum::<u32>(), n);
        }
    }

    #[test]
    fn mode_is_argmax_for_small_cases() {
        let marginal = Marginal::new(
            vec![12.0, 13.003_354_837_8],
            vec![0.989_212, 0.010_788],
            10,
        );
        // Check the mode against every configuration of 10 atoms.
        let best = (0..=10_u32)
            .map(|light| [light, 10 - light])
            .max_by(|a, b| {
                marginal
                    .conf_lprob(a)
                    .partial_cmp(&marginal.conf_lprob(b))
                    .unwrap()
            })
            .unwrap();
        assert_eq!(marginal.mode_conf(), best.as_slice());
    }

    #[test]
    fn mass_extremes() {
        let marginal = Marginal::new(
            vec![1.007_825_032_07, 2.014_101_777_8],
            vec![0.999_885, 0.000_115],
            100,
        );
        assert!((marginal.smallest_mass() - 100.782_503_207).abs() < 1e-9);
        assert!((marginal.largest_mass() - 201.410_177_78).abs() < 1e-9);
    }

    #[test]
    fn single_isotope_element() {
        let marginal = Marginal::new(vec![18.998_403_22], vec![1.0], 42);
        assert_eq!(marginal.mode_conf(), &[42]);
        assert!(marginal.mode_lprob().abs() < 1e-12);
    }
}
