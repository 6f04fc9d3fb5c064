use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// Unit an operator works in for a given axis.
///
/// `Pulse` is the controller's native integer frame; every other unit is a
/// physical unit converted through the axis's `val2pulse` factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Pulse,
    Mm,
    Deg,
    Mrad,
    /// Spelled the way the controller spells it.
    #[serde(rename = "angstroam")]
    Angstrom,
    Kev,
}

impl Unit {
    pub fn all() -> &'static [Unit] {
        &[
            Unit::Pulse,
            Unit::Mm,
            Unit::Deg,
            Unit::Mrad,
            Unit::Angstrom,
            Unit::Kev,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Pulse => "pulse",
            Unit::Mm => "mm",
            Unit::Deg => "deg",
            Unit::Mrad => "mrad",
            Unit::Angstrom => "angstroam",
            Unit::Kev => "kev",
        }
    }

    pub fn is_physical(self) -> bool {
        self != Unit::Pulse
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::all()
            .iter()
            .copied()
            .find(|u| u.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown unit '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Sense
// ---------------------------------------------------------------------------

/// Direction multiplier between the operator frame and the controller frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "i32", into = "i32")]
pub enum Sense {
    #[default]
    Forward,
    Reverse,
}

impl Sense {
    pub fn sign(self) -> i64 {
        match self {
            Sense::Forward => 1,
            Sense::Reverse => -1,
        }
    }
}

impl TryFrom<i32> for Sense {
    type Error = String;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Sense::Forward),
            -1 => Ok(Sense::Reverse),
            other => Err(format!("sense must be 1 or -1, got {other}")),
        }
    }
}

impl From<Sense> for i32 {
    fn from(s: Sense) -> i32 {
        s.sign() as i32
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.sign())
    }
}

// ---------------------------------------------------------------------------
// Axis
// ---------------------------------------------------------------------------

pub const DEFAULT_VAL2PULSE: f64 = 1000.0;

/// One controllable motor degree of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub display: String,
    /// Pulses per physical unit; always > 0.
    pub val2pulse: f64,
    pub sense: Sense,
    pub unit: Unit,
}

impl Axis {
    /// Axis with built-in fallback parameters (`val2pulse=1000`, `+1`, pulse).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display: name.clone(),
            name,
            val2pulse: DEFAULT_VAL2PULSE,
            sense: Sense::Forward,
            unit: Unit::Pulse,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn with_val2pulse(mut self, val2pulse: f64) -> Self {
        self.val2pulse = val2pulse;
        self
    }

    pub fn with_sense(mut self, sense: Sense) -> Self {
        self.sense = sense;
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }
}

// ---------------------------------------------------------------------------
// LayerSource / AxisGroup
// ---------------------------------------------------------------------------

/// Configuration layers in ascending precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSource {
    Defaults,
    Hardware,
    Favorites,
}

impl LayerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerSource::Defaults => "defaults",
            LayerSource::Hardware => "hardware",
            LayerSource::Favorites => "favorites",
        }
    }
}

impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, ordered panel of axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisGroup {
    pub name: String,
    pub axes: Vec<String>,
    pub source: LayerSource,
}

// ---------------------------------------------------------------------------
// MotionState / LimitFlags
// ---------------------------------------------------------------------------

/// Resolved motion state of an axis as last reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Unknown,
    Idle,
    Moving,
    Fault,
}

impl MotionState {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionState::Unknown => "unknown",
            MotionState::Idle => "idle",
            MotionState::Moving => "moving",
            MotionState::Fault => "fault",
        }
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit and home switches, decoded from the controller's 5-bit status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitFlags {
    pub cw_hard: bool,
    pub ccw_hard: bool,
    pub cw_soft: bool,
    pub ccw_soft: bool,
    pub home: bool,
    pub raw: u8,
}

impl LimitFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            cw_hard: bits & 0b00001 != 0,
            ccw_hard: bits & 0b00010 != 0,
            cw_soft: bits & 0b00100 != 0,
            ccw_soft: bits & 0b01000 != 0,
            home: bits & 0b10000 != 0,
            raw: bits & 0b11111,
        }
    }

    pub fn any_limit(&self) -> bool {
        self.cw_hard || self.ccw_hard || self.cw_soft || self.ccw_soft
    }
}
