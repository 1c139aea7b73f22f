use std::collections::BinaryHeap;

use ahash::HashSet;
use ordered_float::NotNan;

use crate::marginal::Marginal;

/// A marginal enumerated on demand in strictly non-increasing probability.
///
/// Index `i` is the `i`-th most probable configuration of the element slot,
/// materialized on first access. The tables only ever grow; slices handed out
/// for an index stay valid for the trek's lifetime.
///
/// Expansion is best-first: a priority queue holds the not-yet-visited
/// neighbours of everything emitted so far, where a neighbour moves one atom
/// between an ordered pair of isotopes. Ties in log-probability break on the
/// configuration vector itself, keeping the emission order identical across
/// runs.
#[derive(Debug)]
pub struct MarginalTrek {
    base: Marginal,
    queue: BinaryHeap<Candidate>,
    visited: HashSet<Box<[u32]>>,
    /// Emitted configurations, flat with stride `isotope_count`.
    confs: Vec<u32>,
    lprobs: Vec<f64>,
    masses: Vec<f64>,
    eprobs: Vec<f64>,
}

#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
struct Candidate {
    lprob: NotNan<f64>,
    conf: Box<[u32]>,
}

impl MarginalTrek {
    pub(crate) fn new(base: Marginal) -> Self {
        let mode: Box<[u32]> = base.mode_conf().into();
        let mut visited = HashSet::default();
        visited.insert(mode.clone());
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            lprob: NotNan::new(base.mode_lprob()).expect("log-probabilities are never NaN"),
            conf: mode,
        });
        Self {
            base,
            queue,
            visited,
            confs: Vec::new(),
            lprobs: Vec::new(),
            masses: Vec::new(),
            eprobs: Vec::new(),
        }
    }

    /// The number of configurations materialized so far.
    pub fn len(&self) -> usize {
        self.lprobs.len()
    }

    /// Whether nothing has been materialized yet.
    pub fn is_empty(&self) -> bool {
        self.lprobs.is_empty()
    }

    /// The log-probability the next [`add_next`](Self::add_next) would emit.
    pub fn next_lprob(&self) -> Option<f64> {
        self.queue.peek().map(|c| c.lprob.into_inner())
    }

    /// Materialize the next most probable configuration.
    ///
    /// Returns `false` once every configuration has been emitted.
    pub fn add_next(&mut self) -> bool {
        let Some(Candidate { lprob, conf }) = self.queue.pop() else {
            return false;
        };

        self.confs.extend_from_slice(&conf);
        self.lprobs.push(lprob.into_inner());
        self.masses.push(self.base.conf_mass(&conf));
        self.eprobs.push(lprob.into_inner().exp());

        // Push every one-step transfer that has not been seen yet.
        let isotopes = self.base.isotope_count();
        for from in 0..isotopes {
            if conf[from] == 0 {
                continue;
            }
            for to in 0..isotopes {
                if from == to {
                    continue;
                }
                let mut neighbour: Box<[u32]> = conf.clone();
                neighbour[from] -= 1;
                neighbour[to] += 1;
                if self.visited.insert(neighbour.clone()) {
                    let lprob = self.base.conf_lprob(&neighbour);
                    self.queue.push(Candidate {
                        lprob: NotNan::new(lprob)
                            .expect("log-probabilities are never NaN"),
                        conf: neighbour,
                    });
                }
            }
        }
        true
    }

    /// Materialize up to and including `index`; `false` if the marginal has
    /// fewer configurations in total.
    pub fn ensure(&mut self, index: usize) -> bool {
        while self.len() <= index {
            if !self.add_next() {
                return false;
            }
        }
        true
    }

    /// The log-probability of the `index`-th most probable configuration.
    pub fn lprob(&self, index: usize) -> f64 {
        self.lprobs[index]
    }

    /// The mass of the `index`-th most probable configuration.
    pub fn mass(&self, index: usize) -> f64 {
        self.masses[index]
    }

    /// The probability of the `index`-th most probable configuration.
    pub fn eprob(&self, index: usize) -> f64 {
        self.eprobs[index]
    }

    /// The isotope counts of the `index`-th most probable configuration.
    pub fn conf(&self, index: usize) -> &[u32] {
        let k = self.base.isotope_count();
        &self.confs[index * k..(index + 1) * k]
    }

    pub(crate) fn isotope_count(&self) -> usize {
        self.base.isotope_count()
    }

    pub(crate) fn into_tables(self) -> (Vec<u32>, Vec<f64>, Vec<f64>, Vec<f64>) {
        (self.confs, self.lprobs, self.masses, self.eprobs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn carbon(n: u32) -> MarginalTrek {
        MarginalTrek::new(Marginal::new(
            vec![12.0, 13.003_354_837_8],
            vec![0.989_212, 0.010_788],
            n,
        ))
    }

    #[test]
    fn emits_every_configuration_once() {
        let mut trek = carbon(10);
        let mut emitted = 0;
        while trek.add_next() {
            emitted += 1;
        }
        // 10 atoms over 2 isotopes: 11 configurations.
        assert_eq!(emitted, 11);
        let total: f64 = (0..11).map(|i| trek.eprob(i)).sum();
        assert!((total - 1.0).abs() < 1e-10);
    }

    #[test]
    fn emission_is_sorted_by_probability() {
        let mut trek = MarginalTrek::new(Marginal::new(
            vec![
                31.972_071,
                32.971_458_76,
                33.967_866_9,
                35.967_080_76,
            ],
            vec![0.9499, 0.0075, 0.0425, 0.0001],
            25,
        ));
        assert!(trek.ensure(99));
        for i in 1..100 {
            assert!(trek.lprob(i) <= trek.lprob(i - 1));
        }
    }

    #[test]
    fn first_emission_is_the_mode() {
        let mut trek = carbon(100);
        assert!(trek.ensure(0));
        assert_eq!(trek.conf(0), &[99, 1]);
    }

    #[test]
    fn configurations_sum_to_atom_count() {
        let mut trek = carbon(17);
        assert!(trek.ensure(10));
        for i in 0..=10 {
            assert_eq!(trek.conf(i).iter().sum::<u32>(), 17);
        }
    }
}
