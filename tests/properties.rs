//! End-to-end properties of the generators, checked against brute-force
//! enumeration where the configuration space is small enough to afford it.

use std::collections::BTreeSet;

use mzfine::chemistry::parse_formula;
use mzfine::prelude::*;

/// Exact-ish `ln(n!)` for test-sized `n`.
fn log_factorial(n: u32) -> f64 {
    (1..=u64::from(n)).map(|i| (i as f64).ln()).sum()
}

/// All ways to put `n` atoms on `k` isotopes.
fn compositions(n: u32, k: usize) -> Vec<Vec<u32>> {
    if k == 1 {
        return vec![vec![n]];
    }
    let mut result = Vec::new();
    for first in (0..=n).rev() {
        for mut rest in compositions(n - first, k - 1) {
            let mut conf = vec![first];
            conf.append(&mut rest);
            result.push(conf);
        }
    }
    result
}

/// A brute-force isotopologue: full signature, exact log-probability, mass.
struct Reference {
    signature: Vec<u32>,
    lprob: f64,
    mass: f64,
}

/// Enumerate the complete fine structure of a (small) formula directly from
/// the periodic table, without any of the crate's enumeration machinery.
fn brute_force(formula: &str) -> Vec<Reference> {
    let counts = parse_formula(formula).unwrap();
    let mut result = vec![Reference {
        signature: Vec::new(),
        lprob: 0.0,
        mass: 0.0,
    }];
    for (element, n) in counts {
        let isotopes = element.isotopes();
        let mut extended = Vec::new();
        for reference in &result {
            for conf in compositions(n, isotopes.len()) {
                let mut lprob = log_factorial(n);
                let mut mass = 0.0;
                for (&count, &(_, isotope_mass, abundance)) in conf.iter().zip(isotopes) {
                    lprob -= log_factorial(count);
                    if count > 0 {
                        lprob += f64::from(count) * abundance.ln();
                    }
                    mass += f64::from(count) * isotope_mass;
                }
                let mut signature = reference.signature.clone();
                signature.extend_from_slice(&conf);
                extended.push(Reference {
                    signature,
                    lprob: reference.lprob + lprob,
                    mass: reference.mass + mass,
                });
            }
        }
        result = extended;
    }
    result
}

fn collect_signatures<G: Generator>(mut generator: G) -> BTreeSet<Vec<u32>> {
    let mut signatures = BTreeSet::new();
    while generator.advance() {
        assert!(
            signatures.insert(generator.conf_signature()),
            "configuration emitted twice"
        );
    }
    signatures
}

#[test]
fn probability_sums_to_one_without_a_cutoff() {
    for formula in ["C1", "H2O", "C2H3", "H2O2S"] {
        let generator =
            ThresholdGenerator::new(Molecule::from_formula(formula).unwrap(), 0.0, false).unwrap();
        let total: f64 = generator.peaks().map(|peak| peak.eprob).sum();
        assert!((total - 1.0).abs() < 1e-10, "{formula}: sums to {total}");
    }
}

#[test]
fn ordered_emission_is_monotone() {
    let mut generator = OrderedGenerator::new(Molecule::from_formula("H2O2S").unwrap());
    let mut previous = f64::INFINITY;
    let mut count = 0;
    while generator.advance() {
        assert!(generator.lprob() <= previous);
        previous = generator.lprob();
        count += 1;
    }
    // H2 over 2 isotopes: 3; O2 over 3: 6; S over 4: 4.
    assert_eq!(count, 3 * 6 * 4);
}

#[test]
fn threshold_matches_brute_force_exactly() {
    for threshold in [1e-1_f64, 1e-3, 2.5e-6, 1e-12] {
        let expected: BTreeSet<Vec<u32>> = brute_force("H2O2S")
            .into_iter()
            .filter(|r| r.lprob >= threshold.ln())
            .map(|r| r.signature)
            .collect();
        let generator =
            ThresholdGenerator::new(Molecule::from_formula("H2O2S").unwrap(), threshold, true)
                .unwrap();
        let emitted = collect_signatures(generator);
        assert_eq!(emitted, expected, "threshold {threshold}");
    }
}

#[test]
fn no_emission_falls_below_the_cutoff() {
    let threshold = 1e-7;
    let mut generator =
        ThresholdGenerator::new(Molecule::from_formula("C6H12O6").unwrap(), threshold, true)
            .unwrap();
    while generator.advance() {
        assert!(generator.lprob() >= threshold.ln());
    }
}

#[test]
fn masses_stay_within_the_theoretical_bounds() {
    let molecule = Molecule::from_formula("C6H12O6").unwrap();
    let lightest = molecule.lightest_mass();
    let heaviest = molecule.heaviest_mass();
    let mut generator = ThresholdGenerator::new(molecule, 1e-9, false).unwrap();
    while generator.advance() {
        assert!(generator.mass() >= lightest - 1e-9);
        assert!(generator.mass() <= heaviest + 1e-9);
    }
}

#[test]
fn signature_recomputation_matches_reported_values() {
    let counts = parse_formula("C6H12O6S2").unwrap();
    let mut generator =
        ThresholdGenerator::new(Molecule::from_formula("C6H12O6S2").unwrap(), 1e-6, false)
            .unwrap();
    while generator.advance() {
        let signature = generator.conf_signature();
        let mut offset = 0;
        let mut mass = 0.0;
        let mut lprob = 0.0;
        for &(element, n) in &counts {
            let isotopes = element.isotopes();
            let conf = &signature[offset..offset + isotopes.len()];
            offset += isotopes.len();
            assert_eq!(conf.iter().sum::<u32>(), n);
            lprob += log_factorial(n);
            for (&count, &(_, isotope_mass, abundance)) in conf.iter().zip(isotopes) {
                lprob -= log_factorial(count);
                if count > 0 {
                    lprob += f64::from(count) * abundance.ln();
                }
                mass += f64::from(count) * isotope_mass;
            }
        }
        assert!((mass - generator.mass()).abs() < 1e-9);
        assert!((lprob - generator.lprob()).abs() < 1e-9);
        assert!((generator.lprob().exp() - generator.eprob()).abs() < 1e-12);
    }
}

#[test]
fn all_threshold_variants_agree_with_the_ordered_generator() {
    let threshold: f64 = 1e-4;
    let molecule = || Molecule::from_formula("C20H30N4O8").unwrap();
    let cutoff = threshold.ln() + molecule().mode_lprob();

    let from_threshold = collect_signatures(
        ThresholdGenerator::new(molecule(), threshold, false).unwrap(),
    );
    let from_fast = collect_signatures(
        FastThresholdGenerator::new(molecule(), threshold, false).unwrap(),
    );
    let counted = ThresholdCounter::new(molecule(), threshold, false)
        .unwrap()
        .count();

    // The ordered generator, stopped at the same cutoff, sees the same set.
    let mut ordered = OrderedGenerator::new(molecule());
    let mut from_ordered = BTreeSet::new();
    while ordered.advance() && ordered.lprob() >= cutoff {
        from_ordered.insert(ordered.conf_signature());
    }

    assert_eq!(from_threshold, from_fast);
    assert_eq!(from_threshold.len() as u64, counted);
    assert_eq!(from_threshold, from_ordered);
}

#[test]
fn layered_run_equals_a_threshold_run_at_its_final_cutoff() {
    let molecule = || Molecule::from_formula("C10H16N5O13P3").unwrap();
    let mut layered = LayeredGenerator::with_coverage(molecule(), -3.0, 0.999).unwrap();
    let mut from_layered = BTreeSet::new();
    while layered.advance() {
        from_layered.insert(layered.conf_signature());
    }
    assert!(layered.emitted_prob() >= 0.999);

    let final_cutoff = layered.current_cutoff();
    let from_threshold = collect_signatures(
        ThresholdGenerator::new(molecule(), final_cutoff.exp(), true).unwrap(),
    );
    assert_eq!(from_layered, from_threshold);
}

#[test]
fn carbon_100_relative_count_matches_direct_computation() {
    let threshold: f64 = 1e-2;
    let molecule = Molecule::from_formula("C100").unwrap();

    // Independently: count the pairs (a, 100 - a) whose multinomial term is
    // within the threshold of the best one.
    let lprob = |heavy: u32| {
        log_factorial(100) - log_factorial(heavy) - log_factorial(100 - heavy)
            + f64::from(100 - heavy) * 0.989_212_f64.ln()
            + f64::from(heavy) * 0.010_788_f64.ln()
    };
    let mode = (0..=100).map(lprob).fold(f64::NEG_INFINITY, f64::max);
    let expected = (0..=100)
        .filter(|&heavy| lprob(heavy) >= mode + threshold.ln())
        .count() as u64;

    let count = ThresholdCounter::new(molecule, threshold, false)
        .unwrap()
        .count();
    assert_eq!(count, expected);
}

#[test]
fn carbon_100_tiny_threshold_emits_everything() {
    let generator = ThresholdGenerator::new(
        Molecule::from_formula("C100").unwrap(),
        1e-200,
        false,
    )
    .unwrap();
    let peaks: Vec<Peak> = generator.peaks().collect();
    assert_eq!(peaks.len(), 101);
    let total: f64 = peaks.iter().map(|peak| peak.eprob).sum();
    assert!((total - 1.0).abs() < 1e-12);
}

#[test]
fn ethanol_parses_to_summed_element_counts() {
    let counts = parse_formula("C2H5OH").unwrap();
    let lookup = |symbol: &str| {
        counts
            .iter()
            .find(|(e, _)| e.symbol() == symbol)
            .map(|&(_, n)| n)
    };
    assert_eq!(lookup("C"), Some(2));
    assert_eq!(lookup("H"), Some(6));
    assert_eq!(lookup("O"), Some(1));
    assert!(parse_formula("co2").is_err());
    assert!(parse_formula("Xz9").is_err());
}

#[cfg(feature = "parallel")]
#[test]
fn parallel_walk_emits_the_serial_set_of_masses() {
    use std::sync::Mutex;

    let molecule = || Molecule::from_formula("C6H12O6S2").unwrap();
    let serial: Vec<Peak> = ThresholdGenerator::new(molecule(), 1e-5, false)
        .unwrap()
        .peaks()
        .collect();

    let parallel = ParallelThresholdGenerator::new(molecule(), 1e-5, false, 4).unwrap();
    let collected = Mutex::new(Vec::new());
    parallel.for_each(|peak| collected.lock().unwrap().push(peak));
    let mut collected = collected.into_inner().unwrap();

    let key = |peak: &Peak| (ordered(peak.mass), ordered(peak.lprob));
    let mut serial = serial;
    serial.sort_by_key(key);
    collected.sort_by_key(key);
    assert_eq!(serial.len(), collected.len());
    for (a, b) in serial.iter().zip(&collected) {
        assert!((a.mass - b.mass).abs() < 1e-12);
        assert!((a.eprob - b.eprob).abs() < 1e-15);
    }
}

#[cfg(feature = "parallel")]
fn ordered(value: f64) -> u64 {
    // Any consistent total order will do for pairing the two sorted lists.
    value.to_bits()
}
