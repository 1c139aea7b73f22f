use tracing::{debug, trace};

use crate::error::GeneratorError;
use crate::generator::Generator;
use crate::marginal::LayeredMarginal;
use crate::molecule::Molecule;
use crate::numerics::{KahanSum, LOG_PROB_FLOOR};

/// Generates isotopologues in log-probability layers.
///
/// The generator holds a cutoff; every configuration at or above it is
/// admissible, and each [`next_layer`](Self::next_layer) call lowers the
/// cutoff, revealing one more slab `[cutoff, previous cutoff)`. Within a
/// slab the walk is the threshold sweep over the layered marginals,
/// filtered so configurations of earlier slabs are not re-emitted.
///
/// With a coverage target armed (see [`with_coverage`](Self::with_coverage))
/// the generator grows a layer by its own step whenever a slab runs out and
/// the accumulated probability mass is still short of the target, so a plain
/// `while generator.advance()` loop covers the requested share of the
/// distribution and then stops. Growth only happens at slab boundaries: the
/// emitted set is always exactly "everything at or above the final cutoff".
#[derive(Debug)]
pub struct LayeredGenerator {
    marginals: Vec<LayeredMarginal>,
    /// Per-element mode log-probabilities, fixed across layers.
    mode_lprobs: Vec<f64>,
    mode_lprob: f64,
    counter: Vec<usize>,
    max_lp_sum: Vec<f64>,
    partial_lprobs: Vec<f64>,
    partial_masses: Vec<f64>,
    partial_eprobs: Vec<f64>,
    current_cutoff: f64,
    previous_cutoff: f64,
    delta: f64,
    total_prob: KahanSum,
    coverage_target: Option<f64>,
    started: bool,
    layer_done: bool,
    terminated: bool,
}

impl LayeredGenerator {
    /// Take over the molecule; the first layer spans `delta` (negative) of
    /// log-probability below the joint mode. Without a coverage target the
    /// generator only serves the current layer; lower the cutoff manually
    /// with [`next_layer`](Self::next_layer).
    ///
    /// # Errors
    /// [`GeneratorError::InvalidDelta`] unless `delta` is finite and strictly
    /// negative.
    pub fn new(molecule: Molecule, delta: f64) -> Result<Self, GeneratorError> {
        Self::build(molecule, delta, None)
    }

    /// As [`new`](Self::new), but arm automatic layer growth until the
    /// emitted probability mass reaches `target`.
    ///
    /// # Errors
    /// Additionally [`GeneratorError::InvalidCoverage`] unless `target` lies
    /// strictly between 0 and 1.
    pub fn with_coverage(
        molecule: Molecule,
        delta: f64,
        target: f64,
    ) -> Result<Self, GeneratorError> {
        if !(target > 0.0 && target < 1.0) {
            return Err(GeneratorError::InvalidCoverage(target));
        }
        Self::build(molecule, delta, Some(target))
    }

    fn build(
        molecule: Molecule,
        delta: f64,
        coverage_target: Option<f64>,
    ) -> Result<Self, GeneratorError> {
        if !(delta < 0.0) || delta.is_infinite() {
            return Err(GeneratorError::InvalidDelta(delta));
        }
        let (bases, mode_lprob) = molecule.into_parts();
        let dim = bases.len();
        let mode_lprobs: Vec<f64> = bases
            .iter()
            .map(crate::marginal::Marginal::mode_lprob)
            .collect();
        let current_cutoff = mode_lprob + delta;

        let mut marginals: Vec<LayeredMarginal> =
            bases.into_iter().map(LayeredMarginal::new).collect();
        for (marginal, &mode) in marginals.iter_mut().zip(&mode_lprobs) {
            marginal.extend(current_cutoff - (mode_lprob - mode));
        }

        let mut max_lp_sum = Vec::with_capacity(dim);
        let mut sum = 0.0;
        for &mode in &mode_lprobs {
            sum += mode;
            max_lp_sum.push(sum);
        }

        let mut generator = Self {
            marginals,
            mode_lprobs,
            mode_lprob,
            counter: vec![0; dim],
            max_lp_sum,
            partial_lprobs: vec![0.0; dim + 1],
            partial_masses: vec![0.0; dim + 1],
            partial_eprobs: vec![1.0; dim + 1],
            current_cutoff,
            previous_cutoff: f64::INFINITY,
            delta,
            total_prob: KahanSum::default(),
            coverage_target,
            started: false,
            layer_done: false,
            terminated: false,
        };
        if dim > 0 {
            generator.recalc(dim - 1);
        }
        debug!(dim, current_cutoff, ?coverage_target, "layered generator ready");
        Ok(generator)
    }

    /// The lower log-probability bound of the admissible region.
    pub const fn current_cutoff(&self) -> f64 {
        self.current_cutoff
    }

    /// The probability mass emitted so far.
    pub fn emitted_prob(&self) -> f64 {
        self.total_prob.value()
    }

    /// Lower the cutoff by `delta` (negative), revealing one more slab.
    ///
    /// Meant to be called once `advance` has returned `false`: the sweep
    /// restarts over the grown region and anything at or above the old
    /// cutoff counts as already emitted, so configurations of a
    /// half-consumed slab would be dropped.
    ///
    /// Returns `false` when the generator is terminated, everything has
    /// already been revealed, or `delta` is not a finite negative number.
    pub fn next_layer(&mut self, delta: f64) -> bool {
        if !(delta < 0.0) || delta.is_infinite() {
            return false;
        }
        self.grow_layer(delta)
    }

    /// Force the exhausted state; subsequent `advance` calls return `false`.
    pub fn terminate_search(&mut self) {
        self.terminated = true;
    }

    fn grow_layer(&mut self, delta: f64) -> bool {
        if self.terminated || self.current_cutoff <= LOG_PROB_FLOOR {
            return false;
        }
        self.previous_cutoff = self.current_cutoff;
        self.current_cutoff = (self.current_cutoff + delta).max(LOG_PROB_FLOOR);
        for (marginal, &mode) in self.marginals.iter_mut().zip(&self.mode_lprobs) {
            marginal.extend(self.current_cutoff - (self.mode_lprob - mode));
        }
        self.counter.fill(0);
        self.started = false;
        self.layer_done = false;
        if !self.counter.is_empty() {
            self.recalc(self.counter.len() - 1);
        }
        trace!(
            current = self.current_cutoff,
            previous = self.previous_cutoff,
            emitted = self.total_prob.value(),
            "layer grown"
        );
        true
    }

    /// One step of the threshold sweep over the admissible region,
    /// irrespective of slabs.
    fn step(&mut self) -> bool {
        if self.layer_done {
            return false;
        }
        if !self.started {
            self.started = true;
            if self.partial_lprobs[0] >= self.current_cutoff {
                return true;
            }
            self.layer_done = true;
            return false;
        }
        if self.counter.is_empty() {
            self.layer_done = true;
            return false;
        }

        self.counter[0] += 1;
        let lprob = self.partial_lprobs[1] + self.marginals[0].lprob(self.counter[0]);
        if lprob >= self.current_cutoff {
            self.partial_lprobs[0] = lprob;
            self.partial_masses[0] =
                self.partial_masses[1] + self.marginals[0].mass(self.counter[0]);
            self.partial_eprobs[0] =
                self.partial_eprobs[1] * self.marginals[0].eprob(self.counter[0]);
            return true;
        }

        let mut idx = 0;
        loop {
            self.counter[idx] = 0;
            idx += 1;
            if idx == self.counter.len() {
                self.layer_done = true;
                return false;
            }
            self.counter[idx] += 1;
            let lprob = self.partial_lprobs[idx + 1] + self.marginals[idx].lprob(self.counter[idx]);
            if lprob + self.max_lp_sum[idx - 1] >= self.current_cutoff {
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

impl Generator for LayeredGenerator {
    fn advance(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        loop {
            while self.step() {
                // Skip what earlier slabs already emitted.
                if self.partial_lprobs[0] < self.previous_cutoff {
                    self.total_prob.add(self.partial_eprobs[0]);
                    return true;
                }
            }
            let want_more = self
                .coverage_target
                .is_some_and(|target| self.total_prob.value() < target);
            if !want_more || !self.grow_layer(self.delta) {
                return false;
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
            .map(LayeredMarginal::isotope_count)
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
