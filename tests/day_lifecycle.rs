mod common;

use approx::assert_relative_eq;
use common::{build_tree, feed_random_day, open_batch, random_vector, seeded_rng};
use factor_tree::{DayPhase, EngineError, FactorTree, InitArgs};
use std::collections::{BTreeMap, HashMap};

#[test]
fn ts_mean_five_days_scenario() {
    let mut tree = build_tree("ts_mean(@open, 5)", 5, 4);
    let mut rng = seeded_rng(7);
    let mut day_means = Vec::new();

    for _ in 0..4 {
        let (outputs, means) = feed_random_day(&mut tree, &mut rng, 4);
        for out in &outputs {
            assert_eq!(out.len(), 5);
            assert!(out.iter().all(|v| v.is_nan()));
        }
        day_means.push(means);
    }
    assert_eq!(tree.current_day_index(), 4);

    tree.on_day_begin().expect("day 5 opens");
    let first = random_vector(&mut rng, 5);
    let out = tree.update(&open_batch(first.clone())).expect("update");
    for i in 0..5 {
        let closed: f64 = day_means.iter().map(|m| m[i]).sum();
        assert_relative_eq!(out[i], (closed + first[i]) / 5.0, epsilon = 1e-9);
    }

    let second = random_vector(&mut rng, 5);
    let out = tree.update(&open_batch(second.clone())).expect("update");
    for i in 0..5 {
        let closed: f64 = day_means.iter().map(|m| m[i]).sum();
        let running = (first[i] + second[i]) / 2.0;
        assert_relative_eq!(out[i], (closed + running) / 5.0, epsilon = 1e-9);
    }
    tree.on_day_end().expect("day 5 closes");
    assert_eq!(tree.phase(), DayPhase::Idle);
}

#[test]
fn window_slides_past_oldest_day() {
    let mut tree = build_tree("ts_mean(@open, 2)", 1, 1);
    let mut last = Vec::new();
    for day in 1..=4 {
        tree.on_day_begin().expect("open");
        last = tree
            .update(&open_batch(vec![day as f64]))
            .expect("update");
        tree.on_day_end().expect("close");
    }
    assert_relative_eq!(last[0], 3.5);
}

#[test]
fn nan_in_one_instrument_leaves_others_valid() {
    let mut tree = build_tree("ts_max(@open, 2)", 2, 2);
    for day in 0..2 {
        tree.on_day_begin().expect("open");
        let second = if day == 0 { f64::NAN } else { 1.0 };
        tree.update(&open_batch(vec![1.0 + day as f64, second]))
            .expect("update");
        tree.on_day_end().expect("close");
    }
    tree.on_day_begin().expect("open");
    let out = tree.update(&open_batch(vec![0.5, 9.0])).expect("update");
    assert_eq!(out[0], 2.0);
    assert_eq!(out[1], 9.0);
}

#[test]
fn field_sources_accept_common_map_shapes() {
    let mut tree = build_tree("@open + @close", 2, 4);
    tree.on_day_begin().expect("open");

    let owned: HashMap<String, Vec<f64>> = HashMap::from([
        ("open".to_string(), vec![1.0, 2.0]),
        ("close".to_string(), vec![10.0, 20.0]),
    ]);
    assert_eq!(tree.update(&owned).expect("owned keys"), vec![11.0, 22.0]);

    let open = [3.0, 4.0];
    let close = [30.0, 40.0];
    let borrowed: BTreeMap<&str, &[f64]> =
        BTreeMap::from([("open", &open[..]), ("close", &close[..])]);
    assert_eq!(tree.update(&borrowed).expect("borrowed"), vec![33.0, 44.0]);
    assert_eq!(tree.current_batch_in_day(), 2);
}

#[test]
fn day_counters_follow_lifecycle() {
    let mut tree = FactorTree::with_expression("cs_zscore(@open)", InitArgs::with_nstock(3))
        .expect("compile");
    assert_eq!(tree.phase(), DayPhase::Idle);
    assert_eq!(tree.current_day_index(), 0);

    tree.on_day_begin().expect("open");
    tree.update(&open_batch(vec![1.0, 2.0, 3.0])).expect("update");
    tree.update(&open_batch(vec![1.0, 2.0, 3.0])).expect("update");
    assert_eq!(tree.current_batch_in_day(), 2);
    assert!(matches!(
        tree.on_day_begin(),
        Err(EngineError::DayAlreadyOpen { day_index: 1 })
    ));
    tree.on_day_end().expect("close");

    tree.on_day_begin().expect("open again");
    assert_eq!(tree.current_day_index(), 2);
    assert_eq!(tree.current_batch_in_day(), 0);
}
