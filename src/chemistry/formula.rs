use itertools::Itertools;

use crate::chemistry::Element;
use crate::error::FormulaError;

/// Parse a molecular formula matching `([A-Z][a-z]?[0-9]*)+`.
///
/// An absent count means one atom. Element order is irrelevant and repeated
/// elements are summed, so `"C2H5OH"` gives `{C: 2, H: 6, O: 1}`. An
/// explicit zero count (`"H0"`) keeps the element as a degenerate slot with
/// no atoms. Elements outside the built-in periodic table (or without
/// natural abundances) fail with [`FormulaError::UnknownElement`].
///
/// Not hardened against malicious input; meant for trusted formulas.
///
/// # Errors
/// When the string violates the grammar or names an unknown element.
pub fn parse_formula(formula: &str) -> Result<Vec<(Element, u32)>, FormulaError> {
    let bytes = formula.as_bytes();
    if bytes.is_empty() {
        return Err(FormulaError::MalformedFormula {
            reason: "the formula is empty",
            offset: 0,
        });
    }

    let mut counts: Vec<(Element, u32)> = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        if !bytes[index].is_ascii_uppercase() {
            return Err(FormulaError::MalformedFormula {
                reason: "expected an element symbol (uppercase letter)",
                offset: index,
            });
        }
        let start = index;
        index += 1;
        if index < bytes.len() && bytes[index].is_ascii_lowercase() {
            index += 1;
        }
        let symbol = &formula[start..index];

        let digits_start = index;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index += 1;
        }
        let count = if index == digits_start {
            1
        } else {
            formula[digits_start..index].parse::<u32>().map_err(|_| {
                FormulaError::MalformedFormula {
                    reason: "atom count does not fit in 32 bits",
                    offset: digits_start,
                }
            })?
        };

        let element = Element::from_symbol(symbol)
            .filter(|e| !e.isotopes().is_empty())
            .ok_or_else(|| FormulaError::UnknownElement {
                symbol: symbol.to_string(),
                offset: start,
            })?;

        match counts.iter_mut().find(|(e, _)| *e == element) {
            Some((_, n)) => *n += count,
            None => counts.push((element, count)),
        }
    }

    Ok(counts
        .into_iter()
        .sorted_unstable_by_key(|&(e, _)| e)
        .collect())
}
