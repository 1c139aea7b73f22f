use tracing::debug;

use crate::error::GeneratorError;
use crate::generator::Generator;
use crate::marginal::PrecalculatedMarginal;
use crate::molecule::Molecule;
use crate::numerics::LOG_PROB_FLOOR;

/// Generates every isotopologue with probability at or above a threshold.
///
/// Emission order is unspecified (deterministic for identical input), and
/// the walk takes time proportional to the output size, not to the joint
/// configuration space: each element's marginal is precomputed above the
/// weakest per-element cutoff that cannot miss a joint survivor, and a
/// multi-radix counter walks the product of the sorted marginals, carrying
/// as soon as the best possible completion of the current prefix falls below
/// the cutoff.
#[derive(Debug)]
pub struct ThresholdGenerator {
    lcutoff: f64,
    marginals: Vec<PrecalculatedMarginal>,
    counter: Vec<usize>,
    /// `max_lp_sum[d]` = sum of the mode log-probabilities of dimensions
    /// `0..=d`: the best any completion of a prefix above `d` can add.
    max_lp_sum: Vec<f64>,
    /// Suffix sums over dimensions `d..`, entry `dim` fixed at zero.
    partial_lprobs: Vec<f64>,
    partial_masses: Vec<f64>,
    partial_eprobs: Vec<f64>,
    started: bool,
    done: bool,
}

/// The pieces shared by all threshold walk variants.
pub(super) struct WalkParts {
    pub(super) lcutoff: f64,
    pub(super) marginals: Vec<PrecalculatedMarginal>,
    pub(super) max_lp_sum: Vec<f64>,
}

impl WalkParts {
    pub(super) fn prepare(
        molecule: Molecule,
        threshold: f64,
        absolute: bool,
    ) -> Result<Self, GeneratorError> {
        if threshold.is_nan() || threshold < 0.0 || (!absolute && threshold > 1.0) {
            return Err(GeneratorError::InvalidThreshold(threshold));
        }
        let (bases, mode_lprob) = molecule.into_parts();
        let lcutoff = if threshold == 0.0 {
            LOG_PROB_FLOOR
        } else if absolute {
            threshold.ln()
        } else {
            threshold.ln() + mode_lprob
        };

        // The weakest per-element cutoff that cannot lose a joint survivor:
        // everything else at its mode, this element must still reach lcutoff.
        let marginals = bases
            .into_iter()
            .map(|base| {
                let cutoff = lcutoff - (mode_lprob - base.mode_lprob());
                PrecalculatedMarginal::new(base, cutoff)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut max_lp_sum = Vec::with_capacity(marginals.len());
        let mut sum = 0.0;
        for marginal in &marginals {
            sum += marginal.mode_lprob();
            max_lp_sum.push(sum);
        }
        debug!(
            dim = marginals.len(),
            lcutoff,
            table_sizes = ?marginals.iter().map(PrecalculatedMarginal::len).collect::<Vec<_>>(),
            "threshold walk prepared"
        );
        Ok(Self {
            lcutoff,
            marginals,
            max_lp_sum,
        })
    }
}

impl ThresholdGenerator {
    /// Take over the molecule and prepare the walk.
    ///
    /// With `absolute` set the cutoff is `ln(threshold)`; otherwise
    /// `threshold` is the fraction of the most probable isotopologue's
    /// probability. A zero threshold means no cutoff: everything with
    /// nonzero probability is emitted.
    ///
    /// # Errors
    /// [`GeneratorError::InvalidThreshold`] when `threshold` is negative, or
    /// above 1 in relative mode; [`GeneratorError::OutOfMemory`] when the
    /// marginal tables cannot be allocated.
    pub fn new(
        molecule: Molecule,
        threshold: f64,
        absolute: bool,
    ) -> Result<Self, GeneratorError> {
        let parts = WalkParts::prepare(molecule, threshold, absolute)?;
        let dim = parts.marginals.len();
        let mut generator = Self {
            lcutoff: parts.lcutoff,
            marginals: parts.marginals,
            counter: vec![0; dim],
            max_lp_sum: parts.max_lp_sum,
            partial_lprobs: vec![0.0; dim + 1],
            partial_masses: vec![0.0; dim + 1],
            partial_eprobs: vec![1.0; dim + 1],
            started: false,
            done: false,
        };
        if dim > 0 {
            generator.recalc(dim - 1);
        }
        Ok(generator)
    }

    /// Force the exhausted state; subsequent `advance` calls return `false`.
    pub fn terminate_search(&mut self) {
        self.done = true;
    }

    fn recalc(&mut self, from: usize) {
        for idx in (0..=from).rev() {
            let position = self.counter[idx];
            self.partial_lprobs[idx] =
                self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(position);
            self.partial_masses[idx] =
                self.partial_masses[idx + 1] + self.marginals[idx].mass(position);
            self.partial_eprobs[idx] =
                self.partial_eprobs[idx + 1] * self.marginals[idx].eprob(position);
        }
    }
}

impl Generator for ThresholdGenerator {
    fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            // The joint mode: either the very first emission, or proof that
            // nothing at all clears the cutoff.
            self.started = true;
            if self.partial_lprobs[0] >= self.lcutoff {
                return true;
            }
            self.done = true;
            return false;
        }
        if self.counter.is_empty() {
            self.done = true;
            return false;
        }

        self.counter[0] += 1;
        let lprob = self.partial_lprobs[1] + self.marginals[0].lprob(self.counter[0]);
        if lprob >= self.lcutoff {
            self.partial_lprobs[0] = lprob;
            self.partial_masses[0] =
                self.partial_masses[1] + self.marginals[0].mass(self.counter[0]);
            self.partial_eprobs[0] =
                self.partial_eprobs[1] * self.marginals[0].eprob(self.counter[0]);
            return true;
        }

        // Carry: the rest of dimension 0 cannot recover, nor can any
        // dimension whose best completion misses the cutoff.
        let mut idx = 0;
        loop {
            self.counter[idx] = 0;
            idx += 1;
            if idx == self.counter.len() {
                self.done = true;
                return false;
            }
            self.counter[idx] += 1;
            let lprob = self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(self.counter[idx]);
            if lprob + self.max_lp_sum[idx - 1] >= self.lcutoff {
                self.partial_lprobs[idx] = lprob;
                self.partial_masses[idx] =
                    self.partial_masses[idx + 1] + self.marginals[idx].mass(self.counter[idx]);
                self.partial_eprobs[idx] =
                    self.partial_eprobs[idx + 1] * self.marginals[idx].eprob(self.counter[idx]);
                self.recalc(idx - 1);
                return true;
            }
        }
    }

    fn mass(&self) -> f64 {
        self.partial_masses[0]
    }

    fn lprob(&self) -> f64 {
        self.partial_lprobs[0]
    }

    fn eprob(&self) -> f64 {
        self.partial_eprobs[0]
    }

    fn signature_length(&self) -> usize {
        self.marginals
            .iter()
            .map(PrecalculatedMarginal::isotope_count)
            .sum()
    }

    fn write_conf_signature(&self, buffer: &mut [u32]) {
        let mut offset = 0;
        for (marginal, &position) in self.marginals.iter().zip(&self.counter) {
            let conf = marginal.conf(position);
            buffer[offset..offset + conf.len()].copy_from_slice(conf);
            offset += conf.len();
        }
    }
}

/// The threshold walk with the hot dimension's tables held inline.
///
/// Functionally identical to [`ThresholdGenerator`]. Dimension 0 changes on
/// every emission, so its log-probability, mass, and probability tables are
/// copied into the generator: the inner loop reads one flat slice instead of
/// chasing through the marginal, which is what the indirection-free original
/// achieved with cached raw pointers.
#[derive(Debug)]
pub struct FastThresholdGenerator {
    lcutoff: f64,
    marginals: Vec<PrecalculatedMarginal>,
    counter: Vec<usize>,
    hot_lprobs: Box<[f64]>,
    hot_masses: Box<[f64]>,
    hot_eprobs: Box<[f64]>,
    max_lp_sum: Vec<f64>,
    partial_lprobs: Vec<f64>,
    partial_masses: Vec<f64>,
    partial_eprobs: Vec<f64>,
    started: bool,
    done: bool,
}

impl FastThresholdGenerator {
    /// Take over the molecule and prepare the walk; see
    /// [`ThresholdGenerator::new`] for the threshold semantics.
    ///
    /// # Errors
    /// As for [`ThresholdGenerator::new`].
    pub fn new(
        molecule: Molecule,
        threshold: f64,
        absolute: bool,
    ) -> Result<Self, GeneratorError> {
        let parts = WalkParts::prepare(molecule, threshold, absolute)?;
        let dim = parts.marginals.len();
        let (hot_lprobs, hot_masses, hot_eprobs): (Box<[f64]>, Box<[f64]>, Box<[f64]>) =
            match parts.marginals.first() {
                Some(hot) => (hot.lprobs().into(), hot.masses().into(), hot.eprobs().into()),
                None => (
                    vec![f64::NEG_INFINITY].into_boxed_slice(),
                    vec![0.0].into_boxed_slice(),
                    vec![0.0].into_boxed_slice(),
                ),
            };
        let mut generator = Self {
            lcutoff: parts.lcutoff,
            marginals: parts.marginals,
            counter: vec![0; dim],
            hot_lprobs,
            hot_masses,
            hot_eprobs,
            max_lp_sum: parts.max_lp_sum,
            partial_lprobs: vec![0.0; dim + 1],
            partial_masses: vec![0.0; dim + 1],
            partial_eprobs: vec![1.0; dim + 1],
            started: false,
            done: false,
        };
        if dim > 0 {
            generator.recalc(dim - 1);
        }
        Ok(generator)
    }

    /// Force the exhausted state; subsequent `advance` calls return `false`.
    pub fn terminate_search(&mut self) {
        self.done = true;
    }

    fn recalc(&mut self, from: usize) {
        for idx in (1..=from).rev() {
            let position = self.counter[idx];
            self.partial_lprobs[idx] =
                self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(position);
            self.partial_masses[idx] =
                self.partial_masses[idx + 1] + self.marginals[idx].mass(position);
            self.partial_eprobs[idx] =
                self.partial_eprobs[idx + 1] * self.marginals[idx].eprob(position);
        }
        let position = self.counter[0];
        self.partial_lprobs[0] = self.partial_lprobs[1] + self.hot_lprobs[position];
        self.partial_masses[0] = self.partial_masses[1] + self.hot_masses[position];
        self.partial_eprobs[0] = self.partial_eprobs[1] * self.hot_eprobs[position];
    }
}

impl Generator for FastThresholdGenerator {
    fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            self.started = true;
            if self.partial_lprobs[0] >= self.lcutoff {
                return true;
            }
            self.done = true;
            return false;
        }
        if self.counter.is_empty() {
            self.done = true;
            return false;
        }

        self.counter[0] += 1;
        let position = self.counter[0];
        let lprob = self.partial_lprobs[1] + self.hot_lprobs[position];
        if lprob >= self.lcutoff {
            self.partial_lprobs[0] = lprob;
            self.partial_masses[0] = self.partial_masses[1] + self.hot_masses[position];
            self.partial_eprobs[0] = self.partial_eprobs[1] * self.hot_eprobs[position];
            return true;
        }

        let mut idx = 0;
        loop {
            self.counter[idx] = 0;
            idx += 1;
            if idx == self.counter.len() {
                self.done = true;
                return false;
            }
            self.counter[idx] += 1;
            let lprob = self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(self.counter[idx]);
            if lprob + self.max_lp_sum[idx - 1] >= self.lcutoff {
                self.partial_lprobs[idx] = lprob;
                self.partial_masses[idx] =
                    self.partial_masses[idx + 1] + self.marginals[idx].mass(self.counter[idx]);
                self.partial_eprobs[idx] =
                    self.partial_eprobs[idx + 1] * self.marginals[idx].eprob(self.counter[idx]);
                self.recalc(idx - 1);
                return true;
            }
        }
    }

    fn mass(&self) -> f64 {
        self.partial_masses[0]
    }

    fn lprob(&self) -> f64 {
        self.partial_lprobs[0]
    }

    fn eprob(&self) -> f64 {
        self.partial_eprobs[0]
    }

    fn signature_length(&self) -> usize {
        self.marginals
            .iter()
            .map(PrecalculatedMarginal::isotope_count)
            .sum()
    }

    fn write_conf_signature(&self, buffer: &mut [u32]) {
        let mut offset = 0;
        for (marginal, &position) in self.marginals.iter().zip(&self.counter) {
            let conf = marginal.conf(position);
            buffer[offset..offset + conf.len()].copy_from_slice(conf);
            offset += conf.len();
        }
    }
}

/// The threshold walk stripped down to counting.
///
/// Maintains neither masses nor probabilities; the same configurations are
/// visited in the same order as by the other two variants.
#[derive(Debug)]
pub struct ThresholdCounter {
    lcutoff: f64,
    marginals: Vec<PrecalculatedMarginal>,
    counter: Vec<usize>,
    hot_lprobs: Box<[f64]>,
    max_lp_sum: Vec<f64>,
    partial_lprobs: Vec<f64>,
    started: bool,
    done: bool,
}

impl ThresholdCounter {
    /// Take over the molecule and prepare the walk; see
    /// [`ThresholdGenerator::new`] for the threshold semantics.
    ///
    /// # Errors
    /// As for [`ThresholdGenerator::new`].
    pub fn new(
        molecule: Molecule,
        threshold: f64,
        absolute: bool,
    ) -> Result<Self, GeneratorError> {
        let parts = WalkParts::prepare(molecule, threshold, absolute)?;
        let dim = parts.marginals.len();
        let hot_lprobs: Box<[f64]> = match parts.marginals.first() {
            Some(hot) => hot.lprobs().into(),
            None => vec![f64::NEG_INFINITY].into_boxed_slice(),
        };
        let mut generator = Self {
            lcutoff: parts.lcutoff,
            marginals: parts.marginals,
            counter: vec![0; dim],
            hot_lprobs,
            max_lp_sum: parts.max_lp_sum,
            partial_lprobs: vec![0.0; dim + 1],
            started: false,
            done: false,
        };
        if dim > 0 {
            generator.recalc(dim - 1);
        }
        Ok(generator)
    }

    /// Advance to the next configuration above the cutoff.
    pub fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            self.started = true;
            if self.partial_lprobs[0] >= self.lcutoff {
                return true;
            }
            self.done = true;
            return false;
        }
        if self.counter.is_empty() {
            self.done = true;
            return false;
        }

        self.counter[0] += 1;
        if self.partial_lprobs[1] + self.hot_lprobs[self.counter[0]] >= self.lcutoff {
            return true;
        }

        let mut idx = 0;
        loop {
            self.counter[idx] = 0;
            idx += 1;
            if idx == self.counter.len() {
                self.done = true;
                return false;
            }
            self.counter[idx] += 1;
            let lprob = self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(self.counter[idx]);
            if lprob + self.max_lp_sum[idx - 1] >= self.lcutoff {
                self.partial_lprobs[idx] = lprob;
                self.recalc(idx - 1);
                return true;
            }
        }
    }

    /// Run the walk to exhaustion and return the number of configurations.
    pub fn count(mut self) -> u64 {
        let mut count = 0;
        while self.advance() {
            count += 1;
        }
        count
    }

    /// Force the exhausted state; subsequent `advance` calls return `false`.
    pub fn terminate_search(&mut self) {
        self.done = true;
    }

    fn recalc(&mut self, from: usize) {
        for idx in (0..=from).rev() {
            let lprob = if idx == 0 {
                self.hot_lprobs[self.counter[0]]
            } else {
                self.marginals[idx].lprob(self.counter[idx])
            };
            self.partial_lprobs[idx] = self.partial_lprobs[idx + 1] + lprob;
        }
    }
}
