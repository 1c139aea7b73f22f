use std::collections::TryReserveError;

use thiserror::Error;

/// Errors from parsing a molecular formula.
///
/// The parser is meant for trusted input (interactive use, test fixtures); it
/// reports what went wrong and where, but makes no hardening promises.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FormulaError {
    /// The formula names an element the built-in periodic table does not carry.
    #[error("unknown element {symbol:?} at byte {offset} of the formula")]
    UnknownElement {
        /// The symbol as written in the formula
        symbol: String,
        /// Byte offset of the symbol within the formula string
        offset: usize,
    },
    /// The formula violates the `([A-Z][a-z]?[0-9]*)+` grammar.
    #[error("malformed formula: {reason} at byte {offset}")]
    MalformedFormula {
        /// What the parser expected to find
        reason: &'static str,
        /// Byte offset where parsing failed
        offset: usize,
    },
}

/// Errors from building a [`Molecule`](crate::Molecule) directly from isotope tables.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MoleculeError {
    /// An element slot was given no isotopes at all.
    #[error("element slot {0} has an empty isotope table")]
    EmptySlot(usize),
    /// An element slot was given a mass table and an abundance table of different lengths.
    #[error("element slot {index} has {masses} isotope masses but {abundances} abundances")]
    MismatchedTables {
        /// Index of the offending element slot
        index: usize,
        /// Number of masses given
        masses: usize,
        /// Number of abundances given
        abundances: usize,
    },
    /// The per-element tables do not agree on the number of element slots.
    #[error(
        "{atom_counts} atom counts given, but {masses} mass tables and {abundances} abundance tables"
    )]
    DimensionMismatch {
        /// Number of atom counts given
        atom_counts: usize,
        /// Number of mass tables given
        masses: usize,
        /// Number of abundance tables given
        abundances: usize,
    },
}

/// Errors from constructing a generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The threshold is negative, or above 1 while interpreted relative to the mode.
    #[error("invalid threshold {0}: must be non-negative, and at most 1 when relative")]
    InvalidThreshold(f64),
    /// The layer step of a layered generator must strictly lower the cutoff.
    #[error("invalid layer delta {0}: must be strictly negative")]
    InvalidDelta(f64),
    /// The coverage target of a layered generator must be a proper probability share.
    #[error("invalid coverage target {0}: must lie strictly between 0 and 1")]
    InvalidCoverage(f64),
    /// Allocating the marginal tables failed.
    #[error("out of memory while sizing the marginal tables")]
    OutOfMemory(#[from] TryReserveError),
}
