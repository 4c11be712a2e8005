//! Parameter values — the dynamic get/set value type
//!
//! Modem parameters are exposed over the control plane as a small set of
//! JSON-compatible shapes. Unknown keys are absent on get and ignored on
//! set; the daemon never errors a request over a parameter type.

use serde::{Deserialize, Serialize};

/// A parameter value: one of the shapes the control plane understands.
///
/// Untagged on the wire, so `6`, `6.0`, `true` and `[96000.0]` all parse
/// to the natural variant. Variant order matters for deserialization:
/// booleans and integers are tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag (e.g. `omute`).
    Bool(bool),
    /// Integer (e.g. `iblksize`, `iseqno`).
    Int(i64),
    /// Floating point (e.g. `igain`, `irate`).
    Float(f64),
    /// List of floats (e.g. `irates`).
    FloatList(Vec<f64>),
}

impl ParamValue {
    /// Numeric view, coercing integers to floats. `None` for other shapes.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::Int(v) => Some(v as f64),
            ParamValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view, truncating floats. `None` for other shapes.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ParamValue::Int(v) => Some(v),
            ParamValue::Float(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Boolean view. Integers coerce C-style (0 is false).
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(v) => Some(v),
            ParamValue::Int(v) => Some(v != 0),
            _ => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::FloatList(v)
    }
}
