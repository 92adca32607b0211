use crate::error::{CompileError, EngineError};
use crate::runtime::FactorTree;
use crate::types::{DayPhase, InitArgs, InputFieldCatalog};
use std::collections::HashMap;

mod runtime;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9
}

fn batch(fields: &[(&str, &[f64])]) -> HashMap<String, Vec<f64>> {
    fields
        .iter()
        .map(|(name, values)| (name.to_string(), values.to_vec()))
        .collect()
}

fn tree(expression: &str, nstock: usize) -> FactorTree {
    FactorTree::with_expression(expression, InitArgs::new(nstock, 4))
        .expect("expression should compile")
}

/// Runs one full day of single-field batches and returns the last output.
fn run_day(tree: &mut FactorTree, field: &str, batches: &[&[f64]]) -> Vec<f64> {
    tree.on_day_begin().expect("day should open");
    let mut last = Vec::new();
    for values in batches {
        last = tree
            .update(&batch(&[(field, values)]))
            .expect("update should succeed");
    }
    tree.on_day_end().expect("day should close");
    last
}
