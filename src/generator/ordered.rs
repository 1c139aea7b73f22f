use std::collections::BinaryHeap;

use ahash::HashSet;
use ordered_float::NotNan;
use tracing::debug;

use crate::generator::Generator;
use crate::marginal::MarginalTrek;
use crate::molecule::Molecule;

/// Generates isotopologues in strictly non-increasing probability, starting
/// from the joint mode.
///
/// An isotopologue is a vector of indices, one per element slot, into that
/// slot's probability-sorted marginal. A priority queue keyed by summed
/// log-probability holds the frontier: when a vector is popped it becomes the
/// current emission and its forward neighbours (one index incremented) are
/// admitted, unless already seen. Stepping a dimension past the materialized
/// prefix of its marginal makes the underlying trek grow on demand, so no
/// marginal is ever enumerated further than the emission order requires.
#[derive(Debug)]
pub struct OrderedGenerator {
    treks: Vec<MarginalTrek>,
    queue: BinaryHeap<JointCandidate>,
    visited: HashSet<Box<[u32]>>,
    current: Box<[u32]>,
    current_lprob: f64,
    current_mass: f64,
    current_eprob: f64,
}

#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
struct JointCandidate {
    lprob: NotNan<f64>,
    indices: Box<[u32]>,
}

impl OrderedGenerator {
    /// Take over the molecule and prepare the frontier at the joint mode.
    pub fn new(molecule: Molecule) -> Self {
        let (marginals, mode_lprob) = molecule.into_parts();
        let mut treks: Vec<MarginalTrek> = marginals.into_iter().map(MarginalTrek::new).collect();
        for trek in &mut treks {
            trek.ensure(0);
        }
        let dim = treks.len();

        let seed: Box<[u32]> = vec![0; dim].into_boxed_slice();
        let mut visited = HashSet::default();
        visited.insert(seed.clone());
        let mut queue = BinaryHeap::new();
        queue.push(JointCandidate {
            lprob: NotNan::new(mode_lprob).expect("log-probabilities are never NaN"),
            indices: seed.clone(),
        });

        debug!(dim, mode_lprob, "ordered generator ready");
        Self {
            treks,
            queue,
            visited,
            current: seed,
            current_lprob: f64::NAN,
            current_mass: f64::NAN,
            current_eprob: f64::NAN,
        }
    }

    /// Drop every pending emission; subsequent `advance` calls return `false`.
    pub fn terminate_search(&mut self) {
        self.queue.clear();
    }
}

impl Generator for OrderedGenerator {
    fn advance(&mut self) -> bool {
        let Some(JointCandidate { lprob, indices }) = self.queue.pop() else {
            return false;
        };

        let mut mass = 0.0;
        let mut eprob = 1.0;
        for (trek, &index) in self.treks.iter().zip(&indices) {
            mass += trek.mass(index as usize);
            eprob *= trek.eprob(index as usize);
        }

        for d in 0..self.treks.len() {
            let mut neighbour = indices.clone();
            neighbour[d] += 1;
            if self.visited.contains(&neighbour) {
                continue;
            }
            if !self.treks[d].ensure(neighbour[d] as usize) {
                continue;
            }
            let lprob_sum: f64 = neighbour
                .iter()
                .zip(&self.treks)
                .map(|(&i, trek)| trek.lprob(i as usize))
                .sum();
            self.visited.insert(neighbour.clone());
            self.queue.push(JointCandidate {
                lprob: NotNan::new(lprob_sum).expect("log-probabilities are never NaN"),
                indices: neighbour,
            });
        }

        self.current = indices;
        self.current_lprob = lprob.into_inner();
        self.current_mass = mass;
        self.current_eprob = eprob;
        true
    }

    fn mass(&self) -> f64 {
        self.current_mass
    }

    fn lprob(&self) -> f64 {
        self.current_lprob
    }

    fn eprob(&self) -> f64 {
        self.current_eprob
    }

    fn signature_length(&self) -> usize {
        self.treks.iter().map(MarginalTrek::isotope_count).sum()
    }

    fn write_conf_signature(&self, buffer: &mut [u32]) {
        let mut offset = 0;
        for (trek, &index) in self.treks.iter().zip(&self.current) {
            let conf = trek.conf(index as usize);
            buffer[offset..offset + conf.len()].copy_from_slice(conf);
            offset += conf.len();
        }
    }
}
