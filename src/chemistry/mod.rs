mod element;
mod formula;

pub use element::*;
pub use formula::*;
