//! Runtime values.
//!
//! [`Value`] is the dynamically typed value the runtime manipulates. Scalars
//! are stored inline; tables, functions and userdata blocks live on the
//! collected heap and are referred to through generational handles.

use std::fmt;
use std::rc::Rc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;

/// Generational index of a heap object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GcRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to a heap table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Table(pub(crate) GcRef);

/// Handle to a heap function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Function(pub(crate) GcRef);

/// Handle to a heap userdata block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Userdata(pub(crate) GcRef);

/// Type tag of a value, numbered as the reference runtime numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Type {
    /// An index past the top of the stack.
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
}

impl Type {
    /// The name scripts see for this type.
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::LightUserdata | Type::Userdata => "userdata",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
        }
    }
}

/// A dynamically typed runtime value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    /// A bare address, compared by value and never collected.
    LightUserdata(usize),
    Table(Table),
    Function(Function),
    Userdata(Userdata),
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) | Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::LightUserdata(_) => Type::LightUserdata,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::Userdata(_) => Type::Userdata,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<Table> {
        match self {
            Value::Table(t) => Some(*t),
            _ => None,
        }
    }

    pub(crate) fn gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Table(Table(r)) | Value::Function(Function(r)) | Value::Userdata(Userdata(r)) => {
                Some(*r)
            }
            _ => None,
        }
    }

    /// Primitive equality: no metamethods, numbers compare by value.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Userdata(a), Value::Userdata(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::LightUserdata(p) => write!(f, "userdata: {p:#x}"),
            Value::Table(Table(r)) => write!(f, "table: {}:{}", r.index, r.generation),
            Value::Function(Function(r)) => write!(f, "function: {}:{}", r.index, r.generation),
            Value::Userdata(Userdata(r)) => write!(f, "userdata: {}:{}", r.index, r.generation),
        }
    }
}

/// Floats with an integral value keep a trailing `.0` so they read back as floats.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

// ============================================================================
// Conversions into values
// ============================================================================

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Integer(v as i64)
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::String(v)
    }
}

impl From<Table> for Value {
    fn from(v: Table) -> Self {
        Value::Table(v)
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Value::Function(v)
    }
}

impl From<Userdata> for Value {
    fn from(v: Userdata) -> Self {
        Value::Userdata(v)
    }
}

// ============================================================================
// Table keys
// ============================================================================

/// Hashable form of a non-nil value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Boolean(bool),
    Integer(i64),
    Number(OrderedFloat<f64>),
    String(Rc<str>),
    Light(usize),
    Table(Table),
    Function(Function),
    Userdata(Userdata),
}

impl Key {
    /// Floats with an exact integer value are stored as integers so `t[1]`
    /// and `t[1.0]` name the same slot.
    pub(crate) fn new(value: &Value) -> Result<Key, &'static str> {
        Ok(match value {
            Value::Nil => return Err("index is nil"),
            Value::Boolean(b) => Key::Boolean(*b),
            Value::Integer(i) => Key::Integer(*i),
            Value::Number(n) if n.is_nan() => return Err("index is NaN"),
            Value::Number(n) => match float_to_integer(*n) {
                Some(i) => Key::Integer(i),
                None => Key::Number(OrderedFloat(*n)),
            },
            Value::String(s) => Key::String(s.clone()),
            Value::LightUserdata(p) => Key::Light(*p),
            Value::Table(t) => Key::Table(*t),
            Value::Function(f) => Key::Function(*f),
            Value::Userdata(u) => Key::Userdata(*u),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Key::Boolean(b) => Value::Boolean(*b),
            Key::Integer(i) => Value::Integer(*i),
            Key::Number(n) => Value::Number(n.0),
            Key::String(s) => Value::String(s.clone()),
            Key::Light(p) => Value::LightUserdata(*p),
            Key::Table(t) => Value::Table(*t),
            Key::Function(f) => Value::Function(*f),
            Key::Userdata(u) => Value::Userdata(*u),
        }
    }
}

/// Exact float to integer conversion, `None` when the float has a fraction
/// or falls outside the `i64` range.
pub(crate) fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
