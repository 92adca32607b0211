use super::*;

#[test]
fn ts_mean_uses_running_day_value_and_closed_days() {
    let mut t = tree("ts_mean(@open, 3)", 2);
    let day1 = run_day(&mut t, "open", &[&[1.0, 10.0], &[3.0, 30.0]]);
    assert!(day1.iter().all(|v| v.is_nan()));
    let day2 = run_day(&mut t, "open", &[&[4.0, 40.0]]);
    assert!(day2.iter().all(|v| v.is_nan()));

    t.on_day_begin().expect("day 3 opens");
    let out = t
        .update(&batch(&[("open", &[6.0, f64::NAN])]))
        .expect("update");
    // closed days: mean(1, 3) = 2 and 4; running day: 6
    assert!(approx_eq(out[0], 4.0));
    assert!(out[1].is_nan());

    let out = t
        .update(&batch(&[("open", &[12.0, 5.0])]))
        .expect("update");
    // running day becomes mean(6, 12) = 9; the NaN batch still poisons instrument 1
    assert!(approx_eq(out[0], (2.0 + 4.0 + 9.0) / 3.0));
    assert!(out[1].is_nan());
    let cached = t.output().expect("tree exists");
    assert_eq!(cached[0], out[0]);
    assert!(cached[1].is_nan());
}

#[test]
fn lifecycle_misuse_is_rejected_without_side_effects() {
    let mut t = tree("ts_sum(@open, 2)", 1);
    assert!(matches!(t.on_day_end(), Err(EngineError::DayNotOpen)));
    assert!(matches!(
        t.update(&batch(&[("open", &[1.0])])),
        Err(EngineError::DayNotOpen)
    ));

    t.on_day_begin().expect("first open");
    let err = t.on_day_begin().expect_err("second open");
    assert!(matches!(err, EngineError::DayAlreadyOpen { day_index: 1 }));
    assert_eq!(t.current_day_index(), 1);
    assert_eq!(t.phase(), DayPhase::DayOpen);

    t.on_day_end().expect("close");
    assert_eq!(t.phase(), DayPhase::Idle);
    assert!(matches!(t.on_day_end(), Err(EngineError::DayNotOpen)));
}

#[test]
fn calls_without_a_tree_fail_with_no_tree() {
    let mut t = FactorTree::new(InitArgs::with_nstock(3)).expect("valid args");
    assert!(matches!(t.on_day_begin(), Err(EngineError::NoTree)));
    assert!(matches!(t.on_day_end(), Err(EngineError::NoTree)));
    assert!(matches!(
        t.update(&batch(&[("open", &[1.0, 2.0, 3.0])])),
        Err(EngineError::NoTree)
    ));
    assert!(t.output().is_none());
    assert_eq!(t.to_string(), "");
    assert!(t.referenced_fields().is_empty());
}

#[test]
fn missing_field_leaves_state_byte_identical() {
    let mut t = tree("ts_corr(@close, @volume, 2) + in_ts_sum(@close)", 2);
    run_day(&mut t, "close", &[]);
    t.on_day_begin().expect("open");
    t.update(&batch(&[("close", &[1.0, 2.0]), ("volume", &[3.0, 4.0])]))
        .expect("first batch");
    let before = t.checkpoint_bytes().expect("snapshot");

    let err = t
        .update(&batch(&[("close", &[5.0, 6.0])]))
        .expect_err("volume missing");
    assert!(matches!(err, EngineError::MissingField { ref field } if field == "volume"));

    let err = t
        .update(&batch(&[("close", &[5.0, 6.0]), ("volume", &[1.0])]))
        .expect_err("short vector");
    assert!(matches!(
        err,
        EngineError::FieldLengthMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));

    assert_eq!(t.checkpoint_bytes().expect("snapshot"), before);
    assert_eq!(t.current_batch_in_day(), 1);
}

#[test]
fn empty_day_does_not_roll_windows() {
    let mut t = tree("ts_delay(@close, 1)", 1);
    run_day(&mut t, "close", &[&[7.0]]);
    run_day(&mut t, "close", &[]);
    assert_eq!(t.current_day_index(), 2);
    let out = run_day(&mut t, "close", &[&[9.0]]);
    assert!(approx_eq(out[0], 7.0));
}

#[test]
fn batches_past_the_configured_count_are_still_evaluated() {
    let mut t = tree("in_ts_sum(@v)", 1);
    let one: &[f64] = &[1.0];
    let batches = vec![one; 6];
    let out = run_day(&mut t, "v", &batches);
    assert!(approx_eq(out[0], 6.0));
    assert_eq!(t.current_batch_in_day(), 6);
}

#[test]
fn intraday_moments_reset_at_day_begin() {
    let mut t = tree("in_ts_mean(@v)", 1);
    let out = run_day(&mut t, "v", &[&[2.0], &[4.0]]);
    assert!(approx_eq(out[0], 3.0));
    let out = run_day(&mut t, "v", &[&[10.0]]);
    assert!(approx_eq(out[0], 10.0));
}

#[test]
fn intraday_ema_restarts_each_day() {
    let mut t = tree("in_ts_ema(@v, 3)", 2);
    let out = run_day(&mut t, "v", &[&[2.0, f64::NAN], &[6.0, 1.0]]);
    assert!(approx_eq(out[0], 4.0));
    assert!(approx_eq(out[1], 1.0));

    t.on_day_begin().expect("open");
    let out = t
        .update(&batch(&[("v", &[10.0, f64::NAN])]))
        .expect("update");
    assert!(approx_eq(out[0], 10.0));
    assert!(out[1].is_nan());
}

#[test]
fn cross_section_and_elementwise_compose() {
    let mut t = tree("cs_rank(@close) * 2 - cs_demean(@close)", 4);
    t.on_day_begin().expect("open");
    let out = t
        .update(&batch(&[("close", &[3.0, 1.0, 2.0, f64::NAN])]))
        .expect("update");
    assert!(approx_eq(out[0], 2.0 - 1.0));
    assert!(approx_eq(out[1], 0.0 + 1.0));
    assert!(approx_eq(out[2], 1.0 - 0.0));
    assert!(out[3].is_nan());
}

#[test]
fn literal_operands_broadcast() {
    let mut t = tree("max(@x, 0) + 1", 3);
    t.on_day_begin().expect("open");
    let out = t
        .update(&batch(&[("x", &[-2.0, 0.5, f64::INFINITY])]))
        .expect("update");
    assert_eq!(out[0], 1.0);
    assert_eq!(out[1], 1.5);
    assert!(out[2].is_nan());
}

#[test]
fn shared_window_node_is_folded_once_per_batch() {
    let mut shared = tree("ts_sum(@x, 2) + ts_sum(@x, 2)", 1);
    let mut single = tree("ts_sum(@x, 2)", 1);
    for day in 0..3 {
        let values = [day as f64, day as f64 + 0.5];
        let a = run_day(&mut shared, "x", &[&values[..1], &values[1..]]);
        let b = run_day(&mut single, "x", &[&values[..1], &values[1..]]);
        if day == 0 {
            assert!(a[0].is_nan());
        } else {
            assert!(approx_eq(a[0], 2.0 * b[0]));
        }
    }
}
