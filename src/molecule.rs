use tracing::debug;

use crate::chemistry::parse_formula;
use crate::error::{FormulaError, MoleculeError};
use crate::marginal::Marginal;

/// The full description of a molecule for isotopic fine structure purposes:
/// one element slot per distinct element, each carrying its atom count and
/// isotope tables, with the per-slot marginal bookkeeping already computed.
///
/// A `Molecule` is consumed by value when a generator is built from it — the
/// generator takes over the marginal engines for its lifetime.
#[derive(Clone, Debug)]
pub struct Molecule {
    marginals: Vec<Marginal>,
}

impl Molecule {
    /// Build a molecule from a formula like `"C100H202"`, resolving isotope
    /// masses and abundances against the built-in periodic table.
    ///
    /// Zero-abundance isotopes are left out of the element slots; they
    /// cannot occur in any emitted isotopologue.
    ///
    /// # Errors
    /// When the formula is malformed or names an unknown element.
    pub fn from_formula(formula: &str) -> Result<Self, FormulaError> {
        let counts = parse_formula(formula)?;
        let marginals = counts
            .iter()
            .map(|&(element, count)| {
                let isotopes = element.isotopes();
                let masses = isotopes
                    .iter()
                    .filter(|i| i.2 != 0.0)
                    .map(|i| i.1)
                    .collect();
                let abundances = isotopes
                    .iter()
                    .filter(|i| i.2 != 0.0)
                    .map(|i| i.2)
                    .collect();
                Marginal::new(masses, abundances, count)
            })
            .collect();
        let molecule = Self { marginals };
        debug!(
            formula,
            dim = molecule.dim(),
            mode_lprob = molecule.mode_lprob(),
            "molecule built from formula"
        );
        Ok(molecule)
    }

    /// Build a molecule directly from isotope tables, bypassing the periodic
    /// table. Slot `i` has `atom_counts[i]` atoms over `masses[i].len()`
    /// isotopes with the given masses (Da) and abundances (summing to 1, not
    /// re-checked).
    ///
    /// # Errors
    /// When the table dimensions disagree or a slot has no isotopes.
    pub fn from_parts(
        atom_counts: &[u32],
        masses: &[&[f64]],
        abundances: &[&[f64]],
    ) -> Result<Self, MoleculeError> {
        if masses.len() != atom_counts.len() || abundances.len() != atom_counts.len() {
            return Err(MoleculeError::DimensionMismatch {
                atom_counts: atom_counts.len(),
                masses: masses.len(),
                abundances: abundances.len(),
            });
        }
        let mut marginals = Vec::with_capacity(atom_counts.len());
        for (index, ((&count, &mass), &abundance)) in atom_counts
            .iter()
            .zip(masses)
            .zip(abundances)
            .enumerate()
        {
            if mass.len() != abundance.len() {
                return Err(MoleculeError::MismatchedTables {
                    index,
                    masses: mass.len(),
                    abundances: abundance.len(),
                });
            }
            if mass.is_empty() {
                return Err(MoleculeError::EmptySlot(index));
            }
            marginals.push(Marginal::new(mass.to_vec(), abundance.to_vec(), count));
        }
        let molecule = Self { marginals };
        debug!(dim = molecule.dim(), "molecule built from raw tables");
        Ok(molecule)
    }

    /// The number of element slots.
    pub fn dim(&self) -> usize {
        self.marginals.len()
    }

    /// The length of a configuration signature: the total number of isotopes
    /// over all element slots.
    pub fn signature_length(&self) -> usize {
        self.marginals.iter().map(Marginal::isotope_count).sum()
    }

    /// The log-probability of the most probable isotopologue (every element
    /// slot at its own marginal mode).
    pub fn mode_lprob(&self) -> f64 {
        self.marginals.iter().map(Marginal::mode_lprob).sum()
    }

    /// The mass of the lightest possible isotopologue.
    pub fn lightest_mass(&self) -> f64 {
        self.marginals.iter().map(Marginal::smallest_mass).sum()
    }

    /// The mass of the heaviest possible isotopologue.
    pub fn heaviest_mass(&self) -> f64 {
        self.marginals.iter().map(Marginal::largest_mass).sum()
    }

    /// The per-slot marginal bookkeeping.
    pub fn marginals(&self) -> &[Marginal] {
        &self.marginals
    }

    /// Hand the marginal engines and the joint mode log-probability to a
    /// generator; the molecule is gone afterwards.
    pub(crate) fn into_parts(self) -> (Vec<Marginal>, f64) {
        let mode_lprob = self.mode_lprob();
        (self.marginals, mode_lprob)
    }
}
