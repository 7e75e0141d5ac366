use std::path::PathBuf;

use ispu_config_compiler::{
    generate_from_path, parse_config_file, parse_config_str, render_generated_config,
    validate_config, ConfigCompilerError,
};

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("missing tools dir")
        .parent()
        .expect("missing repo root")
        .to_path_buf()
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn shipped_config_compiles() {
    let config = repo_root().join("config/ispu.toml");
    let rendered = generate_from_path(&config).expect("shipped config should compile");

    assert!(rendered.starts_with("// @generated"));
    assert!(rendered.contains("pub static ISPU_CONFIG: IspuConfig = IspuConfig {"));
    assert!(rendered.contains("labels: b\"ISPU\","));
    assert!(rendered.contains("null_label: b' ',"));
}

#[test]
fn generation_is_deterministic_for_same_input() {
    let config = fixture("valid_default.toml");
    let first = generate_from_path(&config).expect("first generation failed");
    let second = generate_from_path(&config).expect("second generation failed");
    assert_eq!(first, second);
}

#[test]
fn floats_render_as_rust_literals() {
    let config = parse_config_file(&fixture("valid_default.toml")).expect("fixture should parse");
    validate_config(&config).expect("fixture should validate");
    let rendered = render_generated_config(&config);

    for needle in [
        "acc_sens: 0.000244,",
        "ths: 0.3,",
        "dur: 0.25,",
        "a: [1.0, -1.545153, 0.604521],",
        "b: [0.197739, 0.0, -0.197739],",
        "dtime_multiplier: 1.0,",
        "fast_set: true,",
    ] {
        assert!(
            rendered.contains(needle),
            "rendered output missing `{needle}`"
        );
    }
}

#[test]
fn four_d_mode_and_wider_label_table_render() {
    let path = fixture("valid_4d_six_labels.toml");
    let rendered = generate_from_path(&path).expect("fixture should compile");

    assert!(rendered.contains("d4: true,"));
    assert!(rendered.contains("labels: b\"ABCDEF\","));
    assert!(rendered.contains("fixed_point: true,"));
}

#[test]
fn filter_defaults_to_float_samples() {
    let rendered =
        generate_from_path(&fixture("valid_default.toml")).expect("fixture should compile");
    assert!(rendered.contains("fixed_point: false,"));
}

#[test]
fn fixed_point_filter_rejects_coefficients_outside_i16f16() {
    let text = std::fs::read_to_string(fixture("valid_4d_six_labels.toml"))
        .expect("fixture should be readable")
        .replacen("a = [1.0, -1.660834370919655", "a = [1.0, -40000.0", 1);
    let config = parse_config_str(&text).expect("edited fixture should parse");

    match validate_config(&config) {
        Err(ConfigCompilerError::Validation(msg)) => {
            assert!(msg.contains("filter.iir2 coefficients must lie within"), "{msg}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn dtime_multiplier_defaults_to_one() {
    let text = std::fs::read_to_string(fixture("valid_default.toml"))
        .expect("fixture should be readable")
        .replace("dtime_multiplier = 1.0\n", "");
    let config = parse_config_str(&text).expect("fixture without multipliers should parse");

    assert_eq!(config.free_fall.dtime_multiplier, 1.0);
    assert_eq!(config.wake_up.dtime_multiplier, 1.0);
    assert_eq!(config.detect_6d.dtime_multiplier, 1.0);
}

#[test]
fn semantic_validation_rejects_invalid_values() {
    let cases = [
        (
            "invalid/negative_free_fall_dur.toml",
            "free_fall.dur must be >= 0",
        ),
        (
            "invalid/ths_deg_out_of_range.toml",
            "detect_6d.ths_deg must be in (0, 90)",
        ),
        (
            "invalid/label_count_mismatch.toml",
            "gesture.labels must contain exactly gesture.classes characters",
        ),
        ("invalid/zero_win_len.toml", "gesture.win_len must be > 0"),
        (
            "invalid/zero_dc_gain_fast_set.toml",
            "detect_6d.iir2.fast_set requires non-zero DC gain",
        ),
        ("invalid/a0_not_unity.toml", "gesture.iir2.a[0] must be 1.0"),
    ];

    for (fixture_name, expected_msg) in cases {
        let path = fixture(fixture_name);
        let err = generate_from_path(&path).expect_err("fixture should fail validation");
        match err {
            ConfigCompilerError::Validation(msg) => {
                assert!(
                    msg.contains(expected_msg),
                    "expected validation message containing `{expected_msg}`, got `{msg}`"
                );
            }
            other => panic!("expected validation error, got {other}"),
        }
    }
}

#[test]
fn parse_errors_are_reported_for_schema_mismatches() {
    let path = fixture("invalid/missing_wake_up.toml");
    let err = generate_from_path(&path).expect_err("fixture should fail parsing");

    match err {
        ConfigCompilerError::Parse(msg) => {
            assert!(
                msg.contains("wake_up"),
                "expected parse error mentioning wake_up, got `{msg}`"
            );
        }
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let err = generate_from_path(&fixture("does_not_exist.toml")).expect_err("missing file");
    assert!(matches!(err, ConfigCompilerError::Io(_)));
}
