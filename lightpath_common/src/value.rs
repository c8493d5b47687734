//! Typed channel values and validation.
//!
//! A [`Value`] is whatever a control channel carries. A [`ValueSpec`] is the
//! declared shape of one channel (kind, range, enum states, tolerance) and is
//! the only place values get checked and normalized before a write.

use crate::consts::DEFAULT_FLOAT_TOLERANCE;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 2^63, the first float past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// A single channel value.
///
/// Serialized untagged so schema files can write `stage_value = 1`,
/// `stage_value = 2.5` or `stage_value = "Inserted"` directly. `Enum` is
/// never produced by deserialization; enum channels normalize integers and
/// strings into it through [`ValueSpec::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean (binary) channel value.
    Bool(bool),
    /// Integer channel value.
    Int(i64),
    /// Floating point channel value.
    Float(f64),
    /// String channel value.
    Str(String),
    /// Index into the channel's enum states.
    Enum(u16),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Enum(_) => "enum",
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Enum(e) => Some(f64::from(*e)),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }

    /// Boolean view of the value, if it is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Enum(e) => write!(f, "enum({e})"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Declared kind of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Floating point channel.
    Float,
    /// Integer channel.
    Int,
    /// Binary channel.
    Bool,
    /// Enumerated channel with named states.
    Enum,
    /// Free-form string channel.
    #[serde(rename = "string")]
    Str,
}

impl ValueKind {
    /// Whether a numeric range may be declared for this kind.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Enum => "enum",
            Self::Str => "string",
        };
        f.write_str(s)
    }
}

/// Reason a value was rejected by a [`ValueSpec`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// Value type does not match the declared kind.
    #[error("expected {expected} value, got {got}")]
    WrongType {
        /// Declared kind.
        expected: ValueKind,
        /// Type name of the rejected value.
        got: &'static str,
    },

    /// Numeric value outside the declared inclusive range.
    #[error("{value} outside range [{lo}, {hi}]")]
    OutOfRange {
        /// Rejected value.
        value: f64,
        /// Lower bound.
        lo: f64,
        /// Upper bound.
        hi: f64,
    },

    /// NaN or infinite float.
    #[error("non-finite value {0}")]
    NotFinite(f64),

    /// Enum index or name not among the declared states.
    #[error("{0} is not a valid enum state")]
    UnknownEnumState(String),
}

/// Declared shape of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSpec {
    /// Declared kind.
    pub kind: ValueKind,
    /// Inclusive numeric range `(lo, hi)`.
    pub range: Option<(f64, f64)>,
    /// Enum state names, indexed by enum value.
    pub enum_strs: Vec<String>,
    /// Absolute tolerance for float comparisons.
    pub tolerance: f64,
}

impl ValueSpec {
    /// Spec of the given kind with no range and default tolerance.
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            range: None,
            enum_strs: Vec::new(),
            tolerance: DEFAULT_FLOAT_TOLERANCE,
        }
    }

    /// Builder-style range.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.range = Some((lo, hi));
        self
    }

    /// Builder-style enum states.
    pub fn with_enum_strs<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_strs = states.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Check the spec itself for contradictions.
    ///
    /// # Errors
    /// Returns a human readable reason when the spec is malformed.
    pub fn check(&self) -> Result<(), String> {
        if let Some((lo, hi)) = self.range {
            if !self.kind.is_numeric() {
                return Err(format!("range declared on {} channel", self.kind));
            }
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(format!("invalid range [{lo}, {hi}]"));
            }
        }
        if self.kind == ValueKind::Enum && self.enum_strs.is_empty() {
            return Err("enum channel declares no states".to_string());
        }
        if self.kind == ValueKind::Enum && self.enum_strs.len() > usize::from(u16::MAX) {
            return Err("too many enum states".to_string());
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(format!("invalid tolerance {}", self.tolerance));
        }
        Ok(())
    }

    /// Validate a value against this spec and normalize it to the declared kind.
    ///
    /// Integers are accepted for float channels, integral floats for integer
    /// channels, `0`/`1` for binary channels, and indices or state names for
    /// enum channels.
    ///
    /// # Errors
    /// Returns [`ValueError`] describing the first violated rule.
    pub fn validate(&self, value: &Value) -> Result<Value, ValueError> {
        let wrong_type = || ValueError::WrongType {
            expected: self.kind,
            got: value.type_name(),
        };

        let normalized = match (self.kind, value) {
            (ValueKind::Float, Value::Float(f)) => Value::Float(*f),
            (ValueKind::Float, Value::Int(i)) => Value::Float(*i as f64),
            (ValueKind::Int, Value::Int(i)) => Value::Int(*i),
            (ValueKind::Int, Value::Float(f)) if f.is_finite() && f.fract() == 0.0 => {
                // `as` saturates; 2^63 itself is already out of range.
                if *f < -I64_LIMIT || *f >= I64_LIMIT {
                    return Err(ValueError::OutOfRange {
                        value: *f,
                        lo: i64::MIN as f64,
                        hi: i64::MAX as f64,
                    });
                }
                Value::Int(*f as i64)
            }
            (ValueKind::Bool, Value::Bool(b)) => Value::Bool(*b),
            (ValueKind::Bool, Value::Int(0)) => Value::Bool(false),
            (ValueKind::Bool, Value::Int(1)) => Value::Bool(true),
            (ValueKind::Enum, Value::Enum(e)) => self.enum_index(usize::from(*e))?,
            (ValueKind::Enum, Value::Int(i)) => match usize::try_from(*i) {
                Ok(idx) => self.enum_index(idx)?,
                Err(_) => return Err(ValueError::UnknownEnumState(i.to_string())),
            },
            (ValueKind::Enum, Value::Str(s)) => match self.enum_strs.iter().position(|e| e == s) {
                Some(idx) => self.enum_index(idx)?,
                None => return Err(ValueError::UnknownEnumState(format!("'{s}'"))),
            },
            (ValueKind::Str, Value::Str(s)) => Value::Str(s.clone()),
            _ => return Err(wrong_type()),
        };

        if let Value::Float(f) = normalized {
            if !f.is_finite() {
                return Err(ValueError::NotFinite(f));
            }
        }

        if let (Some((lo, hi)), Some(x)) = (self.range, normalized.as_f64()) {
            if x < lo || x > hi {
                return Err(ValueError::OutOfRange { value: x, lo, hi });
            }
        }

        Ok(normalized)
    }

    /// Whether a channel readback satisfies a normalized target.
    pub fn matches(&self, target: &Value, readback: &Value) -> bool {
        match (target, readback) {
            (Value::Float(a), _) => readback
                .as_f64()
                .is_some_and(|b| (a - b).abs() <= self.tolerance),
            _ => match self.validate(readback) {
                Ok(normalized) => &normalized == target,
                Err(_) => target == readback,
            },
        }
    }

    /// Name of an enum state, if the value is an enum index of this spec.
    pub fn enum_name(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Enum(e) => self.enum_strs.get(usize::from(*e)).map(String::as_str),
            _ => None,
        }
    }

    fn enum_index(&self, idx: usize) -> Result<Value, ValueError> {
        if idx < self.enum_strs.len() {
            // Bounded by `check()`.
            Ok(Value::Enum(idx as u16))
        } else {
            Err(ValueError::UnknownEnumState(idx.to_string()))
        }
    }
}
