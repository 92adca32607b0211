use factor_tree::{ConfigError, FactorTree, InitArgs, SetupError, DEFAULT_BATCH_PER_DAY};
use std::io::Write;

#[test]
fn batch_per_day_defaults_when_omitted() {
    let args = InitArgs::from_json_str(r#"{ "nstock": 300 }"#).expect("valid config");
    assert_eq!(args.nstock, 300);
    assert_eq!(args.batch_per_day, DEFAULT_BATCH_PER_DAY);
}

#[test]
fn zero_sizes_are_rejected() {
    for raw in [r#"{ "nstock": 0 }"#, r#"{ "nstock": 5, "batch_per_day": 0 }"#] {
        let err = InitArgs::from_json_str(raw).expect_err("zero is invalid");
        assert!(matches!(err, ConfigError::Invalid { .. }), "{raw}: {err}");
    }
    assert!(matches!(
        InitArgs::from_json_str("{ nstock: 5 }"),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn trees_refuse_zero_sized_init_args() {
    for args in [InitArgs::new(0, 4), InitArgs::new(3, 0), InitArgs::new(0, 0)] {
        assert!(matches!(
            FactorTree::new(args),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            FactorTree::with_expression("ts_mean(@open, 5)", args),
            Err(SetupError::Config(ConfigError::Invalid { .. }))
        ));
    }
    assert!(matches!(
        FactorTree::with_expression("ts_mean(@open", InitArgs::new(3, 4)),
        Err(SetupError::Compile(_))
    ));
}

#[test]
fn loads_from_file_and_round_trips_through_serde() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    let args = InitArgs::new(5, 4);
    write!(file, "{}", serde_json::to_string(&args).expect("serialize")).expect("write");
    let loaded = InitArgs::from_json_file(file.path()).expect("load");
    assert_eq!(loaded, args);
}
