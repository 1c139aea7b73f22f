use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

use crate::error::GeneratorError;
use crate::generator::Peak;
use crate::generator::threshold::WalkParts;
use crate::marginal::PrecalculatedMarginal;
use crate::molecule::Molecule;
use crate::numerics::KahanSum;

/// The threshold walk fanned out over worker threads.
///
/// The outermost (slowest-moving) dimension is the work unit: an atomic
/// dispenser hands each worker a unique index into the last element's sorted
/// marginal, and the worker runs the serial carry walk over the remaining
/// dimensions with that index fixed. Shared state is the dispenser, a
/// termination flag, and the immutable precomputed marginals; every worker
/// owns its prefix-sum scratchpad, aligned to a cache line so neighbouring
/// scratchpads never false-share.
///
/// Every per-element cutoff already guarantees that each dispensed outer
/// index admits at least one joint configuration, so no work unit is wasted.
///
/// No ordering holds across workers; the emitted *set* equals the serial
/// [`ThresholdGenerator`](crate::ThresholdGenerator)'s.
#[derive(Debug)]
pub struct ParallelThresholdGenerator {
    lcutoff: f64,
    marginals: Vec<PrecalculatedMarginal>,
    max_lp_sum: Vec<f64>,
    threads: usize,
    terminated: AtomicBool,
}

impl ParallelThresholdGenerator {
    /// Take over the molecule and prepare the walk; see
    /// [`ThresholdGenerator::new`](crate::ThresholdGenerator::new) for the
    /// threshold semantics. `threads == 0` uses rayon's thread count.
    ///
    /// # Errors
    /// As for [`ThresholdGenerator::new`](crate::ThresholdGenerator::new).
    pub fn new(
        molecule: Molecule,
        threshold: f64,
        absolute: bool,
        threads: usize,
    ) -> Result<Self, GeneratorError> {
        let parts = WalkParts::prepare(molecule, threshold, absolute)?;
        let threads = if threads == 0 {
            rayon::current_num_threads()
        } else {
            threads
        };
        debug!(threads, dim = parts.marginals.len(), "parallel threshold generator ready");
        Ok(Self {
            lcutoff: parts.lcutoff,
            marginals: parts.marginals,
            max_lp_sum: parts.max_lp_sum,
            threads,
            terminated: AtomicBool::new(false),
        })
    }

    /// Make every worker's next `advance` return `false`; in-flight
    /// configurations complete.
    pub fn terminate_search(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    /// Run the walk, calling `callback` once per emitted isotopologue, from
    /// whichever worker found it.
    pub fn for_each<F>(&self, callback: F)
    where
        F: Fn(Peak) + Sync,
    {
        let Some(outer) = self.marginals.last() else {
            // A molecule with no element slots has the one empty isotopologue.
            if 0.0 >= self.lcutoff {
                callback(Peak {
                    mass: 0.0,
                    lprob: 0.0,
                    eprob: 1.0,
                });
            }
            return;
        };
        let outer_len = outer.len();
        let dispenser = AtomicUsize::new(0);
        rayon::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|_| {
                    let mut scratch = WorkerScratch::new(self);
                    loop {
                        let outer = dispenser.fetch_add(1, Ordering::Relaxed);
                        if outer >= outer_len || self.terminated.load(Ordering::Relaxed) {
                            break;
                        }
                        scratch.set_outer(outer);
                        while scratch.advance() {
                            callback(Peak {
                                mass: scratch.mass(),
                                lprob: scratch.lprob(),
                                eprob: scratch.eprob(),
                            });
                        }
                    }
                });
            }
        });
    }

    /// The number of isotopologues above the cutoff.
    pub fn count(&self) -> u64 {
        let total = AtomicU64::new(0);
        self.for_each(|_| {
            total.fetch_add(1, Ordering::Relaxed);
        });
        total.into_inner()
    }

    /// The probability mass above the cutoff, worker-locally compensated
    /// before merging.
    pub fn total_prob(&self) -> f64 {
        let total = Mutex::new(KahanSum::default());
        let Some(outer) = self.marginals.last() else {
            return if 0.0 >= self.lcutoff { 1.0 } else { 0.0 };
        };
        let outer_len = outer.len();
        let dispenser = AtomicUsize::new(0);
        rayon::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|_| {
                    let mut scratch = WorkerScratch::new(self);
                    let mut local = KahanSum::default();
                    loop {
                        let outer = dispenser.fetch_add(1, Ordering::Relaxed);
                        if outer >= outer_len || self.terminated.load(Ordering::Relaxed) {
                            break;
                        }
                        scratch.set_outer(outer);
                        while scratch.advance() {
                            local.add(scratch.eprob());
                        }
                    }
                    total
                        .lock()
                        .expect("a worker panicked while summing")
                        .add(local.value());
                });
            }
        });
        total.into_inner().expect("a worker panicked while summing").value()
    }
}

/// One worker's walk state: the inner-dimension counters and prefix sums,
/// with the outermost dimension pinned to the dispensed index.
#[repr(align(64))]
struct WorkerScratch<'a> {
    generator: &'a ParallelThresholdGenerator,
    counter: Vec<usize>,
    partial_lprobs: Vec<f64>,
    partial_masses: Vec<f64>,
    partial_eprobs: Vec<f64>,
    started: bool,
    done: bool,
}

impl<'a> WorkerScratch<'a> {
    fn new(generator: &'a ParallelThresholdGenerator) -> Self {
        let dim = generator.marginals.len();
        Self {
            generator,
            counter: vec![0; dim],
            partial_lprobs: vec![0.0; dim + 1],
            partial_masses: vec![0.0; dim + 1],
            partial_eprobs: vec![1.0; dim + 1],
            started: false,
            done: false,
        }
    }

    /// Pin the outermost dimension and reset the inner walk.
    fn set_outer(&mut self, outer: usize) {
        let dim = self.counter.len();
        self.counter.fill(0);
        self.counter[dim - 1] = outer;
        self.recalc(dim - 1);
        self.started = false;
        self.done = false;
    }

    fn advance(&mut self) -> bool {
        if self.done || self.generator.terminated.load(Ordering::Relaxed) {
            return false;
        }
        let inner_dims = self.counter.len() - 1;
        if !self.started {
            self.started = true;
            if self.partial_lprobs[0] >= self.generator.lcutoff {
                return true;
            }
            self.done = true;
            return false;
        }
        if inner_dims == 0 {
            self.done = true;
            return false;
        }

        let marginals = &self.generator.marginals;
        self.counter[0] += 1;
        let lprob = self.partial_lprobs[1] + marginals[0].lprob(self.counter[0]);
        if lprob >= self.generator.lcutoff {
            self.partial_lprobs[0] = lprob;
            self.partial_masses[0] = self.partial_masses[1] + marginals[0].mass(self.counter[0]);
            self.partial_eprobs[0] = self.partial_eprobs[1] * marginals[0].eprob(self.counter[0]);
            return true;
        }

        let mut idx = 0;
        loop {
            self.counter[idx] = 0;
            idx += 1;
            if idx == inner_dims {
                self.done = true;
                return false;
            }
            self.counter[idx] += 1;
            let lprob = self.partial_lprobs[idx + 1] + marginals[idx].lprob(self.counter[idx]);
            if lprob + self.generator.max_lp_sum[idx - 1] >= self.generator.lcutoff {
                self.partial_lprobs[idx] = lprob;
                self.partial_masses[idx] =
                    self.partial_masses[idx + 1] + marginals[idx].mass(self.counter[idx]);
                self.partial_eprobs[idx] =
                    self.partial_eprobs[idx + 1] * marginals[idx].eprob(self.counter[idx]);
                self.recalc(idx - 1);
                return true;
            }
        }
    }

    fn recalc(&mut self, from: usize) {
        for idx in (0..=from).rev() {
            let marginal = &self.generator.marginals[idx];
            let position = self.counter[idx];
            self.partial_lprobs[idx] = self.partial_lprobs[idx + 1] + marginal.lprob(position);
            self.partial_masses[idx] = self.partial_masses[idx + 1] + marginal.mass(position);
            self.partial_eprobs[idx] = self.partial_eprobs[idx + 1] * marginal.eprob(position);
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
}
