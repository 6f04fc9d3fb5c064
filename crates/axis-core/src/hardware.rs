//! Tolerant parser for the beamline hardware config blob (`bss.config`).
//!
//! The blob is owned by the beamline, not by us: it is loosely structured
//! text with per-axis blocks between `_axis_begin` and `_axis_end`, plus a
//! few global `Key: value` lines for the controller endpoint. One bad axis
//! block must never hide the others, so every field is parsed into a
//! [`Field`] and only an unusable axis is dropped.

use crate::config::{ConfigWarning, WarnLevel};
use crate::error::AxisError;
use crate::types::{Sense, Unit, DEFAULT_VAL2PULSE};
use crate::units;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Result of parsing one field of one axis block.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Ok(T),
    /// Usable value, but not the one written (defaulted or corrected).
    Warning(T, String),
    Error(String),
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Ok(v) | Field::Warning(v, _) => Some(v),
            Field::Error(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsed output
// ---------------------------------------------------------------------------

/// Per-axis hardware parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareAxis {
    pub name: String,
    /// First comma-separated part of `_axis_comment`, if any.
    pub display: Option<String>,
    pub val2pulse: f64,
    pub sense: Sense,
    pub unit: Unit,
}

/// Controller endpoint keys found in the blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Already prefixed: `BL_Object: 41in` becomes `bl_41in`.
    pub bl_object: Option<String>,
}

#[derive(Debug, Default)]
pub struct HardwareConfig {
    /// Axes in file order.
    pub axes: Vec<HardwareAxis>,
    pub network: NetworkSettings,
    pub warnings: Vec<ConfigWarning>,
    /// One `MalformedHardwareConfig` per rejected axis block.
    pub errors: Vec<AxisError>,
}

impl HardwareConfig {
    pub fn axis(&self, name: &str) -> Option<&HardwareAxis> {
        self.axes.iter().find(|a| a.name == name)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const BLOCK_BEGIN: &str = "_axis_begin";
const BLOCK_END: &str = "_axis_end";

pub fn parse_hardware_config(raw: &str) -> HardwareConfig {
    let mut out = HardwareConfig::default();
    let mut block: Option<Vec<(String, String)>> = None;
    let mut block_no = 0usize;

    for line in raw.lines() {
        let s = line.trim();
        if s.starts_with(BLOCK_BEGIN) {
            if let Some(unclosed) = block.take() {
                block_no += 1;
                reject(&mut out, &unclosed, block_no, "block not closed before next _axis_begin");
            }
            block = Some(Vec::new());
            continue;
        }
        if s.starts_with(BLOCK_END) {
            if let Some(fields) = block.take() {
                block_no += 1;
                accept_block(&mut out, fields, block_no);
            }
            continue;
        }
        let Some((key, value)) = s.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match block.as_mut() {
            Some(fields) => fields.push((key.to_string(), value.to_string())),
            None => parse_network_key(&mut out, key, value),
        }
    }

    if let Some(unclosed) = block.take() {
        block_no += 1;
        reject(&mut out, &unclosed, block_no, "block not closed before end of file");
    }
    out
}

fn parse_network_key(out: &mut HardwareConfig, key: &str, value: &str) {
    match key {
        "Ms_IP" if !value.is_empty() => out.network.host = Some(value.to_string()),
        "Ms_Port" => match value.parse::<u16>() {
            Ok(p) => out.network.port = Some(p),
            Err(_) => out.warnings.push(ConfigWarning::warning(format!(
                "ignoring invalid Ms_Port '{value}'"
            ))),
        },
        "BL_Object" if !value.is_empty() => {
            out.network.bl_object = Some(format!("bl_{value}"));
        }
        _ => {}
    }
}

fn lookup<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    // Later keys win, matching a line-by-line overwrite.
    fields
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn block_label(fields: &[(String, String)], block_no: usize) -> String {
    match lookup(fields, "_axis_name") {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("<block #{block_no}>"),
    }
}

fn reject(out: &mut HardwareConfig, fields: &[(String, String)], block_no: usize, reason: &str) {
    let axis = block_label(fields, block_no);
    tracing::warn!(axis = %axis, "hardware config: {reason}");
    out.errors.push(AxisError::MalformedHardwareConfig {
        axis,
        reason: reason.to_string(),
    });
}

pub fn parse_val2pulse(raw: Option<&str>) -> Field<f64> {
    let Some(raw) = raw else {
        return Field::Warning(
            DEFAULT_VAL2PULSE,
            format!("_val2pulse missing, using {DEFAULT_VAL2PULSE}"),
        );
    };
    match raw.parse::<f64>() {
        Ok(v) => match units::validate_factor(v) {
            Ok(()) => Field::Ok(v),
            Err(reason) => Field::Error(reason),
        },
        Err(_) => Field::Error(format!("_val2pulse '{raw}' is not a number")),
    }
}

pub fn parse_sense(raw: Option<&str>) -> Field<Sense> {
    let Some(raw) = raw else {
        return Field::Ok(Sense::Forward);
    };
    match raw.parse::<i32>().map(Sense::try_from) {
        Ok(Ok(s)) => Field::Ok(s),
        Ok(Err(reason)) => Field::Warning(Sense::Forward, format!("{reason}; using +1")),
        Err(_) => Field::Warning(Sense::Forward, format!("_sense '{raw}' is not an integer; using +1")),
    }
}

pub fn parse_unit(raw: Option<&str>) -> Field<Unit> {
    let Some(raw) = raw else {
        return Field::Ok(Unit::Pulse);
    };
    match raw.parse::<Unit>() {
        Ok(u) => Field::Ok(u),
        Err(reason) => Field::Warning(Unit::Pulse, format!("{reason}; using pulse")),
    }
}

fn accept_block(out: &mut HardwareConfig, fields: Vec<(String, String)>, block_no: usize) {
    let name = match lookup(&fields, "_axis_name") {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return reject(out, &fields, block_no, "_axis_name missing"),
    };

    let val2pulse = parse_val2pulse(lookup(&fields, "_val2pulse"));
    let sense = parse_sense(lookup(&fields, "_sense"));
    let unit = parse_unit(lookup(&fields, "_cunit"));

    let problems: Vec<String> = [warning_of(&val2pulse), warning_of(&sense), warning_of(&unit)]
        .into_iter()
        .flatten()
        .collect();

    let (Some(&val2pulse), Some(&sense), Some(&unit)) = (val2pulse.value(), sense.value(), unit.value())
    else {
        let reason = [error_of(&val2pulse), error_of(&sense), error_of(&unit)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("; ");
        return reject(out, &fields, block_no, &reason);
    };

    for p in problems {
        out.warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            axis: Some(name.clone()),
            message: p,
        });
    }

    let display = lookup(&fields, "_axis_comment")
        .and_then(|c| c.split(',').next())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let axis = HardwareAxis {
        name: name.clone(),
        display,
        val2pulse,
        sense,
        unit,
    };
    if let Some(existing) = out.axes.iter_mut().find(|a| a.name == name) {
        out.warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            axis: Some(name),
            message: "axis defined more than once; later block wins".to_string(),
        });
        *existing = axis;
    } else {
        out.axes.push(axis);
    }
}

fn warning_of<T>(f: &Field<T>) -> Option<String> {
    match f {
        Field::Warning(_, r) => Some(r.clone()),
        _ => None,
    }
}

fn error_of<T>(f: &Field<T>) -> Option<String> {
    match f {
        Field::Error(r) => Some(r.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Ms_IP: 192.168.1.20
Ms_Port: 10101
BL_Object: 45xu

_axis_begin
_axis_name: st2_slit1_upper
_axis_comment: Slit1 upper, blade
_val2pulse: 1000
_sense: -1
_cunit: mm
_axis_end

_axis_begin
_axis_name: st2_slit1_lower
_axis_end

_axis_begin
_axis_name: broken_axis
_val2pulse: abc
_axis_end

_axis_begin
_axis_name: odd_sense
_val2pulse: 500
_sense: 3
_cunit: parsec
_axis_end
";

    #[test]
    fn parses_complete_block() {
        let hw = parse_hardware_config(SAMPLE);
        let a = hw.axis("st2_slit1_upper").unwrap();
        assert_eq!(a.display.as_deref(), Some("Slit1 upper"));
        assert_eq!(a.val2pulse, 1000.0);
        assert_eq!(a.sense, Sense::Reverse);
        assert_eq!(a.unit, Unit::Mm);
    }

    #[test]
    fn missing_optional_fields_default() {
        let hw = parse_hardware_config(SAMPLE);
        let a = hw.axis("st2_slit1_lower").unwrap();
        assert_eq!(a.sense, Sense::Forward);
        assert_eq!(a.unit, Unit::Pulse);
        assert_eq!(a.val2pulse, DEFAULT_VAL2PULSE);
        assert!(a.display.is_none());
    }

    #[test]
    fn bad_axis_is_reported_and_others_kept() {
        let hw = parse_hardware_config(SAMPLE);
        assert!(hw.axis("broken_axis").is_none());
        assert_eq!(hw.axes.len(), 3);
        assert_eq!(hw.errors.len(), 1);
        match &hw.errors[0] {
            AxisError::MalformedHardwareConfig { axis, reason } => {
                assert_eq!(axis, "broken_axis");
                assert!(reason.contains("abc"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_fall_back_with_warning() {
        let hw = parse_hardware_config(SAMPLE);
        let a = hw.axis("odd_sense").unwrap();
        assert_eq!(a.sense, Sense::Forward);
        assert_eq!(a.unit, Unit::Pulse);
        let msgs: Vec<_> = hw
            .warnings
            .iter()
            .filter(|w| w.axis.as_deref() == Some("odd_sense"))
            .collect();
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn network_keys_parsed() {
        let hw = parse_hardware_config(SAMPLE);
        assert_eq!(hw.network.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(hw.network.port, Some(10101));
        assert_eq!(hw.network.bl_object.as_deref(), Some("bl_45xu"));
    }

    #[test]
    fn unterminated_and_nameless_blocks_rejected() {
        let raw = "_axis_begin\n_val2pulse: 10\n_axis_end\n_axis_begin\n_axis_name: tail\n";
        let hw = parse_hardware_config(raw);
        assert!(hw.axes.is_empty());
        assert_eq!(hw.errors.len(), 2);
        assert!(hw.errors[1].to_string().contains("tail"));
    }

    #[test]
    fn non_positive_factor_is_an_error() {
        assert!(matches!(parse_val2pulse(Some("0")), Field::Error(_)));
        assert!(matches!(parse_val2pulse(Some("-5")), Field::Error(_)));
        assert_eq!(parse_val2pulse(Some("2.5")), Field::Ok(2.5));
    }
}
