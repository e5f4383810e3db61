//! Stack value conversions.
//!
//! `to_*` functions never fail: they return `None` when the value does not
//! convert. `check_*` functions are the coerce-or-raise primitives native
//! functions use for their arguments.

use std::fmt::Display;
use std::rc::Rc;

use crate::error::{HostError, HostResult};
use crate::state::State;
use crate::value::{Value, float_to_integer, format_number};

/// Integer view of a value. Numeric strings and integral floats convert.
pub fn value_to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Number(n) => float_to_integer(*n),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| parse_float(s).and_then(float_to_integer))
        }
        _ => None,
    }
}

/// Float view of a value. Numeric strings convert.
pub fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        Value::String(s) => parse_float(s.trim()),
        _ => None,
    }
}

/// Decimal floats only; the words Rust also accepts (`inf`, `nan`) are not
/// numbers to scripts.
fn parse_float(s: &str) -> Option<f64> {
    if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    s.parse::<f64>().ok()
}

impl State {
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        value_to_integer(&self.value(idx))
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        value_to_number(&self.value(idx))
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_truthy()
    }

    /// String view of a value. Numbers convert to their printed form.
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx) {
            Value::String(s) => Some(s),
            Value::Integer(i) => Some(Rc::from(i.to_string())),
            Value::Number(n) => Some(Rc::from(format_number(n))),
            _ => None,
        }
    }

    /// Error for argument `idx` of the running function.
    pub fn arg_error(&self, idx: i32, message: impl Display) -> HostError {
        HostError::runtime(format!(
            "bad argument #{idx} to '{}' ({message})",
            self.function_name()
        ))
    }

    /// Argument error of the form `<expected> expected, got <type>`.
    pub fn type_error(&self, idx: i32, expected: &str) -> HostError {
        let got = self.type_of(idx).name();
        self.arg_error(idx, format!("{expected} expected, got {got}"))
    }

    pub fn check_integer(&self, idx: i32) -> HostResult<i64> {
        match self.to_integer(idx) {
            Some(i) => Ok(i),
            None if self.to_number(idx).is_some() => {
                Err(self.arg_error(idx, "number has no integer representation"))
            }
            None => Err(self.type_error(idx, "number")),
        }
    }

    pub fn check_number(&self, idx: i32) -> HostResult<f64> {
        self.to_number(idx).ok_or_else(|| self.type_error(idx, "number"))
    }

    pub fn check_str(&self, idx: i32) -> HostResult<Rc<str>> {
        self.to_str(idx).ok_or_else(|| self.type_error(idx, "string"))
    }
}
