#![allow(dead_code)]

use factor_tree::{FactorTree, InitArgs};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

pub const OPEN: &str = "open";

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vector(rng: &mut StdRng, nstock: usize) -> Vec<f64> {
    (0..nstock).map(|_| rng.gen_range(50.0..150.0)).collect()
}

pub fn open_batch(values: Vec<f64>) -> HashMap<String, Vec<f64>> {
    HashMap::from([(OPEN.to_string(), values)])
}

pub fn build_tree(expression: &str, nstock: usize, batch_per_day: usize) -> FactorTree {
    FactorTree::with_expression(expression, InitArgs::new(nstock, batch_per_day))
        .expect("expression should compile")
}

/// Feeds one day of random `open` batches, returning every batch's output and
/// the per-instrument mean of the day's inputs.
pub fn feed_random_day(
    tree: &mut FactorTree,
    rng: &mut StdRng,
    batches: usize,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let nstock = tree.init_args().nstock;
    let mut outputs = Vec::with_capacity(batches);
    let mut sums = vec![0.0; nstock];
    tree.on_day_begin().expect("day should open");
    for _ in 0..batches {
        let values = random_vector(rng, nstock);
        for (sum, v) in sums.iter_mut().zip(&values) {
            *sum += v;
        }
        outputs.push(tree.update(&open_batch(values)).expect("update"));
    }
    tree.on_day_end().expect("day should close");
    let means = sums.into_iter().map(|s| s / batches as f64).collect();
    (outputs, means)
}

pub fn assert_same_bits(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (idx, (x, y)) in a.iter().zip(b).enumerate() {
        assert_eq!(x.to_bits(), y.to_bits(), "instrument {idx}: {x} vs {y}");
    }
}
