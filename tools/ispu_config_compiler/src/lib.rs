//! Compiles `config/ispu.toml` into the `ISPU_CONFIG` static included by
//! `ispu_firmware::firmware::config`.

use std::{fmt, fmt::Write as _, fs, path::Path};

use serde::Deserialize;

/// Largest label table the gesture slot can publish.
pub const MAX_LABELS: usize = 8;

#[derive(Debug)]
pub enum ConfigCompilerError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl fmt::Display for ConfigCompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "io error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigCompilerError {}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Iir2Section {
    pub b: [f32; 3],
    pub a: [f32; 3],
    #[serde(default)]
    pub fast_set: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSection {
    pub acc_sens: f32,
    /// Run the filter bank in `I16F16` instead of `f32`.
    #[serde(default)]
    pub fixed_point: bool,
    pub iir2: Iir2Section,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreeFallSection {
    pub acc_sens: f32,
    #[serde(default = "default_multiplier")]
    pub dtime_multiplier: f32,
    pub ths: f32,
    pub dur: f32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WakeUpSection {
    pub acc_sens: f32,
    #[serde(default = "default_multiplier")]
    pub dtime_multiplier: f32,
    pub ths: f32,
    pub wake_dur: f32,
    pub sleep_dur: f32,
    pub iir2: Iir2Section,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Detect6dSection {
    pub acc_sens: f32,
    #[serde(default = "default_multiplier")]
    pub dtime_multiplier: f32,
    #[serde(default)]
    pub d4: bool,
    pub ths_deg: f32,
    pub dur: f32,
    pub iir2: Iir2Section,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GestureSection {
    pub acc_sens: f32,
    pub win_ths: f32,
    pub trig_len: u16,
    pub win_len: u16,
    pub reset_len: u16,
    pub pred_ths: f32,
    pub classes: usize,
    pub labels: String,
    pub null_label: String,
    pub iir2: Iir2Section,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IspuConfigFile {
    pub filter: FilterSection,
    pub free_fall: FreeFallSection,
    pub wake_up: WakeUpSection,
    pub detect_6d: Detect6dSection,
    pub gesture: GestureSection,
}

fn default_multiplier() -> f32 {
    1.0
}

pub fn parse_config_file(path: &Path) -> Result<IspuConfigFile, ConfigCompilerError> {
    let text = fs::read_to_string(path)
        .map_err(|e| ConfigCompilerError::Io(format!("{}: {e}", path.display())))?;
    parse_config_str(&text)
}

pub fn parse_config_str(text: &str) -> Result<IspuConfigFile, ConfigCompilerError> {
    toml::from_str(text).map_err(|e| ConfigCompilerError::Parse(e.to_string()))
}

fn fail(msg: impl Into<String>) -> Result<(), ConfigCompilerError> {
    Err(ConfigCompilerError::Validation(msg.into()))
}

fn check_positive(section: &str, field: &str, value: f32) -> Result<(), ConfigCompilerError> {
    if !value.is_finite() || value <= 0.0 {
        return fail(format!("{section}.{field} must be > 0"));
    }
    Ok(())
}

fn check_non_negative(section: &str, field: &str, value: f32) -> Result<(), ConfigCompilerError> {
    if !value.is_finite() || value < 0.0 {
        return fail(format!("{section}.{field} must be >= 0"));
    }
    Ok(())
}

fn check_iir2(section: &str, iir2: &Iir2Section) -> Result<(), ConfigCompilerError> {
    if iir2.b.iter().chain(iir2.a.iter()).any(|c| !c.is_finite()) {
        return fail(format!("{section}.iir2 coefficients must be finite"));
    }
    if iir2.a[0] != 1.0 {
        return fail(format!("{section}.iir2.a[0] must be 1.0"));
    }
    if iir2.fast_set && 1.0 + iir2.a[1] + iir2.a[2] == 0.0 {
        return fail(format!(
            "{section}.iir2.fast_set requires non-zero DC gain (1 + a1 + a2 != 0)"
        ));
    }
    Ok(())
}

/// Largest magnitude an `I16F16` coefficient holds without saturating.
const FIXED_LIMIT: f32 = 32767.0;

fn check_fixed_range(section: &str, iir2: &Iir2Section) -> Result<(), ConfigCompilerError> {
    if iir2.b.iter().chain(iir2.a.iter()).any(|c| c.abs() > FIXED_LIMIT) {
        return fail(format!(
            "{section}.iir2 coefficients must lie within +/-{FIXED_LIMIT} with fixed_point"
        ));
    }
    Ok(())
}

fn check_label(section: &str, field: &str, label: char) -> Result<(), ConfigCompilerError> {
    let printable = label.is_ascii_graphic() || label == ' ';
    if !printable || matches!(label, '\'' | '"' | '\\') {
        return fail(format!(
            "{section}.{field} must be printable ASCII without quotes or backslashes"
        ));
    }
    Ok(())
}

pub fn validate_config(config: &IspuConfigFile) -> Result<(), ConfigCompilerError> {
    check_positive("filter", "acc_sens", config.filter.acc_sens)?;
    check_iir2("filter", &config.filter.iir2)?;
    if config.filter.fixed_point {
        check_fixed_range("filter", &config.filter.iir2)?;
    }

    let ff = &config.free_fall;
    check_positive("free_fall", "acc_sens", ff.acc_sens)?;
    check_positive("free_fall", "dtime_multiplier", ff.dtime_multiplier)?;
    check_positive("free_fall", "ths", ff.ths)?;
    check_non_negative("free_fall", "dur", ff.dur)?;

    let wu = &config.wake_up;
    check_positive("wake_up", "acc_sens", wu.acc_sens)?;
    check_positive("wake_up", "dtime_multiplier", wu.dtime_multiplier)?;
    check_positive("wake_up", "ths", wu.ths)?;
    check_non_negative("wake_up", "wake_dur", wu.wake_dur)?;
    check_non_negative("wake_up", "sleep_dur", wu.sleep_dur)?;
    check_iir2("wake_up", &wu.iir2)?;

    let d6 = &config.detect_6d;
    check_positive("detect_6d", "acc_sens", d6.acc_sens)?;
    check_positive("detect_6d", "dtime_multiplier", d6.dtime_multiplier)?;
    if !d6.ths_deg.is_finite() || d6.ths_deg <= 0.0 || d6.ths_deg >= 90.0 {
        return fail("detect_6d.ths_deg must be in (0, 90)");
    }
    check_non_negative("detect_6d", "dur", d6.dur)?;
    check_iir2("detect_6d", &d6.iir2)?;

    let g = &config.gesture;
    check_positive("gesture", "acc_sens", g.acc_sens)?;
    check_positive("gesture", "win_ths", g.win_ths)?;
    if g.trig_len == 0 {
        return fail("gesture.trig_len must be > 0");
    }
    if g.win_len == 0 {
        return fail("gesture.win_len must be > 0");
    }
    if !(0.0..=1.0).contains(&g.pred_ths) {
        return fail("gesture.pred_ths must be in [0, 1]");
    }
    if g.classes == 0 || g.classes > MAX_LABELS {
        return fail(format!("gesture.classes must be in 1..={MAX_LABELS}"));
    }
    if g.labels.chars().count() != g.classes {
        return fail("gesture.labels must contain exactly gesture.classes characters");
    }
    for label in g.labels.chars() {
        check_label("gesture", "labels", label)?;
    }
    let mut null_label = g.null_label.chars();
    match (null_label.next(), null_label.next()) {
        (Some(label), None) => check_label("gesture", "null_label", label)?,
        _ => return fail("gesture.null_label must be a single character"),
    }
    check_iir2("gesture", &g.iir2)?;

    Ok(())
}

fn render_iir2(out: &mut String, indent: &str, iir2: &Iir2Section) {
    let _ = writeln!(out, "{indent}iir2: Iir2Conf {{");
    let _ = writeln!(
        out,
        "{indent}    b: [{:?}, {:?}, {:?}],",
        iir2.b[0], iir2.b[1], iir2.b[2]
    );
    let _ = writeln!(
        out,
        "{indent}    a: [{:?}, {:?}, {:?}],",
        iir2.a[0], iir2.a[1], iir2.a[2]
    );
    let _ = writeln!(out, "{indent}    fast_set: {},", iir2.fast_set);
    let _ = writeln!(out, "{indent}}},");
}

/// Renders the validated config as a Rust item list. Output depends only on
/// the input values.
pub fn render_generated_config(config: &IspuConfigFile) -> String {
    let mut out = String::new();
    out.push_str("// @generated by ispu_config_compiler; edit config/ispu.toml instead.\n");
    out.push_str("pub static ISPU_CONFIG: IspuConfig = IspuConfig {\n");

    let f = &config.filter;
    out.push_str("    filter: FilterSlotConfig {\n");
    let _ = writeln!(out, "        acc_sens: {:?},", f.acc_sens);
    let _ = writeln!(out, "        fixed_point: {},", f.fixed_point);
    render_iir2(&mut out, "        ", &f.iir2);
    out.push_str("    },\n");

    let ff = &config.free_fall;
    out.push_str("    free_fall: FreeFallSlotConfig {\n");
    let _ = writeln!(out, "        acc_sens: {:?},", ff.acc_sens);
    let _ = writeln!(out, "        dtime_multiplier: {:?},", ff.dtime_multiplier);
    out.push_str("        detector: FreeFallConf {\n");
    let _ = writeln!(out, "            ths: {:?},", ff.ths);
    let _ = writeln!(out, "            dur: {:?},", ff.dur);
    out.push_str("        },\n");
    out.push_str("    },\n");

    let wu = &config.wake_up;
    out.push_str("    wake_up: WakeUpSlotConfig {\n");
    let _ = writeln!(out, "        acc_sens: {:?},", wu.acc_sens);
    let _ = writeln!(out, "        dtime_multiplier: {:?},", wu.dtime_multiplier);
    out.push_str("        detector: WakeUpConf {\n");
    let _ = writeln!(out, "            ths: {:?},", wu.ths);
    let _ = writeln!(out, "            wake_dur: {:?},", wu.wake_dur);
    let _ = writeln!(out, "            sleep_dur: {:?},", wu.sleep_dur);
    render_iir2(&mut out, "            ", &wu.iir2);
    out.push_str("        },\n");
    out.push_str("    },\n");

    let d6 = &config.detect_6d;
    out.push_str("    detect_6d: Detect6dSlotConfig {\n");
    let _ = writeln!(out, "        acc_sens: {:?},", d6.acc_sens);
    let _ = writeln!(out, "        dtime_multiplier: {:?},", d6.dtime_multiplier);
    out.push_str("        detector: Detect6dConf {\n");
    let _ = writeln!(out, "            d4: {},", d6.d4);
    let _ = writeln!(out, "            ths_deg: {:?},", d6.ths_deg);
    let _ = writeln!(out, "            dur: {:?},", d6.dur);
    render_iir2(&mut out, "            ", &d6.iir2);
    out.push_str("        },\n");
    out.push_str("    },\n");

    let g = &config.gesture;
    out.push_str("    gesture: GestureSlotConfig {\n");
    let _ = writeln!(out, "        acc_sens: {:?},", g.acc_sens);
    let _ = writeln!(out, "        win_ths: {:?},", g.win_ths);
    let _ = writeln!(out, "        trig_len: {},", g.trig_len);
    let _ = writeln!(out, "        win_len: {},", g.win_len);
    let _ = writeln!(out, "        reset_len: {},", g.reset_len);
    let _ = writeln!(out, "        pred_ths: {:?},", g.pred_ths);
    let _ = writeln!(out, "        labels: b\"{}\",", g.labels);
    let _ = writeln!(
        out,
        "        null_label: b'{}',",
        g.null_label.chars().next().unwrap_or(' ')
    );
    render_iir2(&mut out, "        ", &g.iir2);
    out.push_str("    },\n");

    out.push_str("};\n");
    out
}

pub fn generate_from_path(path: &Path) -> Result<String, ConfigCompilerError> {
    let config = parse_config_file(path)?;
    validate_config(&config)?;
    Ok(render_generated_config(&config))
}
