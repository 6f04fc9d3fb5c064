//! Pulse ↔ operator-unit conversion.
//!
//! Both directions go through [`apply_sense`], which is also the sign
//! convention of the controller's native pulse frame. Keep it that way: a
//! second sense implementation is how an axis ends up moving opposite to the
//! displayed direction.

use crate::error::{AxisError, Result};
use crate::types::{Axis, Unit};

/// Outcome of converting an operator value to pulses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub pulse: i64,
    pub warning: Option<PrecisionLoss>,
}

/// A fractional pulse request was rounded to the nearest whole pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionLoss {
    pub requested: f64,
    pub applied: i64,
}

fn apply_sense(value: f64, axis: &Axis) -> f64 {
    value * axis.sense.sign() as f64
}

/// Convert an operator value (in `axis.unit`) to a controller pulse count.
pub fn to_pulse(value: f64, axis: &Axis) -> Result<Conversion> {
    if !value.is_finite() {
        return Err(invalid(axis, value, "value is not a finite number"));
    }
    validate_factor(axis.val2pulse).map_err(|reason| invalid(axis, value, &reason))?;

    let raw = match axis.unit {
        Unit::Pulse => apply_sense(value, axis),
        _ => apply_sense(value * axis.val2pulse, axis),
    };
    // f64::round is half-away-from-zero, so ±sense stay exact mirrors.
    let rounded = raw.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(invalid(axis, value, "pulse count out of range"));
    }
    let pulse = rounded as i64;

    let warning = if axis.unit == Unit::Pulse && value.fract() != 0.0 {
        Some(PrecisionLoss {
            requested: value,
            applied: pulse,
        })
    } else {
        None
    };
    Ok(Conversion { pulse, warning })
}

/// Convert a controller pulse count to the operator value in `axis.unit`.
pub fn to_display(pulse: i64, axis: &Axis) -> f64 {
    match axis.unit {
        Unit::Pulse => apply_sense(pulse as f64, axis),
        _ => apply_sense(pulse as f64 / axis.val2pulse, axis),
    }
}

/// Convert a relative operator delta to a pulse delta.
pub fn delta_to_pulse(delta: f64, axis: &Axis) -> Result<Conversion> {
    to_pulse(delta, axis)
}

/// Express a physical reading from the controller in its own pulse frame.
///
/// Controller replies are already in the controller frame, so no sense is
/// applied here.
pub fn physical_to_controller_pulse(value: f64, axis: &Axis) -> Option<i64> {
    let pulse = (value * axis.val2pulse).round();
    (pulse.is_finite() && pulse >= i64::MIN as f64 && pulse <= i64::MAX as f64)
        .then_some(pulse as i64)
}

/// Check that a conversion factor is usable.
pub fn validate_factor(val2pulse: f64) -> std::result::Result<(), String> {
    if !val2pulse.is_finite() || val2pulse <= 0.0 {
        return Err(format!("val2pulse must be a positive number, got {val2pulse}"));
    }
    Ok(())
}

fn invalid(axis: &Axis, value: f64, reason: &str) -> AxisError {
    AxisError::InvalidUnit {
        axis: axis.name.clone(),
        value,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sense;

    fn mm_axis(val2pulse: f64, sense: Sense) -> Axis {
        Axis::new("slit1")
            .with_val2pulse(val2pulse)
            .with_sense(sense)
            .with_unit(Unit::Mm)
    }

    #[test]
    fn mm_to_pulse_scales_by_factor() {
        let axis = mm_axis(1000.0, Sense::Forward);
        let c = to_pulse(2.5, &axis).unwrap();
        assert_eq!(c.pulse, 2500);
        assert!(c.warning.is_none());
        assert_eq!(to_display(2500, &axis), 2.5);
    }

    #[test]
    fn sense_inversion_is_symmetric() {
        for v in [0.0, 0.0005, 1.2345, -3.75, 12.5, 1e6] {
            let fwd = to_pulse(v, &mm_axis(400.0, Sense::Forward)).unwrap().pulse;
            let rev = to_pulse(v, &mm_axis(400.0, Sense::Reverse)).unwrap().pulse;
            assert_eq!(rev, -fwd, "value {v}");
        }
    }

    #[test]
    fn roundtrip_within_one_pulse() {
        for (factor, v) in [(1000.0, 1.23456), (3.3, -7.9), (0.25, 100.1), (12800.0, 0.0001)] {
            for sense in [Sense::Forward, Sense::Reverse] {
                let axis = mm_axis(factor, sense);
                let pulse = to_pulse(v, &axis).unwrap().pulse;
                let back = to_display(pulse, &axis);
                assert!(
                    (back - v).abs() <= 1.0 / factor,
                    "factor {factor} value {v} came back as {back}"
                );
            }
        }
    }

    #[test]
    fn fractional_pulse_rounds_with_warning() {
        let axis = Axis::new("stage").with_unit(Unit::Pulse);
        let c = to_pulse(10.6, &axis).unwrap();
        assert_eq!(c.pulse, 11);
        assert_eq!(
            c.warning,
            Some(PrecisionLoss {
                requested: 10.6,
                applied: 11
            })
        );
        assert!(to_pulse(10.0, &axis).unwrap().warning.is_none());
    }

    #[test]
    fn pulse_axis_ignores_factor_but_keeps_sense() {
        let axis = Axis::new("stage")
            .with_val2pulse(250.0)
            .with_sense(Sense::Reverse);
        assert_eq!(to_pulse(100.0, &axis).unwrap().pulse, -100);
        assert_eq!(to_display(-100, &axis), 100.0);
    }

    #[test]
    fn non_finite_and_bad_factor_rejected() {
        let axis = mm_axis(1000.0, Sense::Forward);
        assert!(matches!(
            to_pulse(f64::NAN, &axis),
            Err(AxisError::InvalidUnit { .. })
        ));
        assert!(to_pulse(1e300, &axis).is_err());
        assert!(to_pulse(1.0, &mm_axis(0.0, Sense::Forward)).is_err());
        assert!(validate_factor(-2.0).is_err());
        assert!(validate_factor(0.5).is_ok());
    }

    #[test]
    fn physical_reading_ignores_sense() {
        let axis = mm_axis(1000.0, Sense::Reverse);
        assert_eq!(physical_to_controller_pulse(7.15, &axis), Some(7150));
    }
}
