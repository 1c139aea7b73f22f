#![doc = include_str!("../README.md")]

/// Contains the periodic table and the molecular formula parser.
pub mod chemistry;
mod error;
pub mod generator;
pub mod marginal;
mod molecule;
mod numerics;

pub use error::{FormulaError, GeneratorError, MoleculeError};
pub use generator::{Generator, Peak};
pub use molecule::Molecule;

/// A subset of the types that are envisioned to be used the most, importing this is a good starting point for working with the crate
pub mod prelude {
    pub use crate::chemistry::Element;
    pub use crate::generator::{
        FastThresholdGenerator, Generator, LayeredGenerator, OrderedGenerator, Peak,
        ThresholdCounter, ThresholdGenerator,
    };
    #[cfg(feature = "parallel")]
    pub use crate::generator::ParallelThresholdGenerator;
    pub use crate::molecule::Molecule;
}
