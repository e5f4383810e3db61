//! Native handles to runtime values.
//!
//! A [`Ref`] anchors one runtime value in the registry for as long as the
//! handle lives. Indexing a handle is lazy: `r.index("a")` remembers the
//! table and key and only reads or writes when the result is used, so
//! `r.index("a").index("b").set(x)` assigns into the nested table.
//!
//! Operations that can fail inside the runtime take an optional
//! [`Error`](crate::Error) sink. Without one, failures go to the aborting
//! default sink.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use interlua_host::{CompareOp, HostError, HostResult, StackGuard, State, Type, Value};

use crate::error::{Error, ErrorKind};
use crate::marshal::{Get, Push};

#[derive(Debug)]
enum Slot {
    Value(i32),
    /// `table[key]`, resolved on use.
    Field { table: i32, key: i32 },
}

/// A registry-anchored reference to a runtime value.
pub struct Ref {
    state: State,
    slot: Slot,
}

fn anchor(state: &State, value: Value) -> i32 {
    state.push(value);
    state.reference()
}

impl Ref {
    /// Handle to whatever `value` pushes first; nil if it pushes nothing.
    pub fn new(state: &State, value: impl Push) -> Ref {
        let guard = StackGuard::new(state);
        let base = state.top();
        let first = match value.push(state) {
            0 => Value::Nil,
            _ => state.value(base + 1),
        };
        drop(guard);
        Ref::from_value(state, first)
    }

    pub fn from_value(state: &State, value: Value) -> Ref {
        Ref {
            state: state.clone(),
            slot: Slot::Value(anchor(state, value)),
        }
    }

    /// Handle to the value at stack index `idx`.
    pub fn from_stack(state: &State, idx: i32) -> Ref {
        Ref::from_value(state, state.value(idx))
    }

    pub fn nil(state: &State) -> Ref {
        Ref::from_value(state, Value::Nil)
    }

    pub fn new_table(state: &State) -> Ref {
        Ref::from_value(state, Value::Table(state.new_table()))
    }

    /// Lazy handle to the global `name`.
    pub fn global(state: &State, name: &str) -> Ref {
        Ref {
            state: state.clone(),
            slot: Slot::Field {
                table: anchor(state, Value::Table(state.globals())),
                key: anchor(state, Value::from(name)),
            },
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Resolve the handle, honoring `__index` for lazy field handles.
    pub fn try_value(&self) -> HostResult<Value> {
        match self.slot {
            Slot::Value(r) => Ok(self.state.ref_value(r)),
            Slot::Field { table, key } => {
                let table = self.state.ref_value(table);
                let key = self.state.ref_value(key);
                self.state.index(&table, &key)
            }
        }
    }

    /// [`try_value`](Self::try_value) with failures sent to the aborting
    /// sink.
    pub fn value(&self) -> Value {
        match self.try_value() {
            Ok(value) => value,
            Err(e) => abort_with(e.status.into(), e.message),
        }
    }

    /// Lazy handle to `self[key]`.
    pub fn index(&self, key: impl Push) -> Ref {
        let table = anchor(&self.state, self.value());
        let key = Ref::new(&self.state, key);
        let key_value = key.value();
        Ref {
            state: self.state.clone(),
            slot: Slot::Field {
                table,
                key: anchor(&self.state, key_value),
            },
        }
    }

    /// Assign through the handle: into the table for field handles,
    /// rebinding the handle otherwise.
    pub fn set(&mut self, value: impl Push) -> HostResult<()> {
        let value = Ref::new(&self.state, value).value();
        match self.slot {
            Slot::Value(r) => {
                self.state.unreference(r);
                self.slot = Slot::Value(anchor(&self.state, value));
                Ok(())
            }
            Slot::Field { table, key } => {
                let table = self.state.ref_value(table);
                let key = self.state.ref_value(key);
                self.state.set_index(&table, key, value)
            }
        }
    }

    /// Call the referenced value with `args` and return its first result.
    ///
    /// An `&mut Error` as the last argument is not passed to the callee; it
    /// receives the failure if the call raises. Without one, a failed call
    /// aborts.
    pub fn call<'e, A: CallArgs<'e>>(&self, args: A) -> Ref {
        let state = &self.state;
        let _guard = StackGuard::new(state);
        state.push(self.value());
        let (nargs, sink) = args.push_args(state);
        let status = state.pcall(nargs, 1);
        if status.is_ok() {
            return Ref::from_stack(state, -1);
        }
        let message = state.value(-1).to_string();
        match sink {
            Some(err) => err.set(status.into(), message),
            None => abort_with(status.into(), message),
        }
        Ref::nil(state)
    }

    /// Convert to `T`; a value that does not convert aborts.
    pub fn get<T: Get>(&self) -> T {
        let mut err = Error::abort();
        match self.check::<T>(&mut err) {
            Some(v) => v,
            None => abort_with(err.kind().unwrap_or(ErrorKind::TypeMismatch), err.what()),
        }
    }

    /// Convert to `T`, recording failures into `err`.
    pub fn check<T: Get>(&self, err: &mut Error) -> Option<T> {
        let value = match self.try_value() {
            Ok(value) => value,
            Err(e) => {
                err.set(e.status.into(), e.message);
                return None;
            }
        };
        let _guard = StackGuard::new(&self.state);
        self.state.push(value);
        crate::marshal::fetch::<T>(&self.state, -1, err)
    }

    pub fn type_of(&self) -> Type {
        self.value().type_of()
    }

    pub fn is_nil(&self) -> bool {
        self.type_of() == Type::Nil
    }

    pub fn is_boolean(&self) -> bool {
        self.type_of() == Type::Boolean
    }

    pub fn is_number(&self) -> bool {
        self.type_of() == Type::Number
    }

    pub fn is_string(&self) -> bool {
        self.type_of() == Type::String
    }

    pub fn is_table(&self) -> bool {
        self.type_of() == Type::Table
    }

    pub fn is_function(&self) -> bool {
        self.type_of() == Type::Function
    }

    pub fn is_userdata(&self) -> bool {
        matches!(self.type_of(), Type::Userdata | Type::LightUserdata)
    }

    /// Raw length: table border or string byte count.
    pub fn len(&self) -> usize {
        self.state.raw_len(&self.value())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to the array part of the referenced table.
    pub fn append(&self, value: impl Push) -> HostResult<()> {
        let Value::Table(table) = self.value() else {
            return Err(HostError::runtime(format!(
                "attempt to append to a {} value",
                self.type_of().name()
            )));
        };
        let next = self.state.raw_len(&Value::Table(table)) as i64 + 1;
        let value = Ref::new(&self.state, value).value();
        self.state.raw_set(table, Value::Integer(next), value)
    }

    fn compare(&self, other: &Value, op: CompareOp) -> Option<bool> {
        self.state.compare_values(&self.value(), other, op).ok()
    }

    fn reverse_compare(&self, other: &Value, op: CompareOp) -> Option<bool> {
        self.state.compare_values(other, &self.value(), op).ok()
    }

    fn order(&self, other: &Value) -> Option<Ordering> {
        if self.compare(other, CompareOp::Eq)? {
            Some(Ordering::Equal)
        } else if self.compare(other, CompareOp::Lt)? {
            Some(Ordering::Less)
        } else if self.reverse_compare(other, CompareOp::Lt)? {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

fn abort_with(kind: ErrorKind, message: impl fmt::Display) -> ! {
    crate::error::fatal(kind, message)
}

impl Clone for Ref {
    fn clone(&self) -> Self {
        let state = &self.state;
        let slot = match self.slot {
            Slot::Value(r) => Slot::Value(anchor(state, state.ref_value(r))),
            Slot::Field { table, key } => Slot::Field {
                table: anchor(state, state.ref_value(table)),
                key: anchor(state, state.ref_value(key)),
            },
        };
        Ref {
            state: state.clone(),
            slot,
        }
    }
}

impl Drop for Ref {
    fn drop(&mut self) {
        match self.slot {
            Slot::Value(r) => self.state.unreference(r),
            Slot::Field { table, key } => {
                self.state.unreference(table);
                self.state.unreference(key);
            }
        }
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.try_value().unwrap_or_default();
        f.debug_struct("Ref")
            .field("slot", &self.slot)
            .field("value", &value.to_string())
            .finish()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_value() {
            Ok(value) => write!(f, "{value}"),
            Err(e) => write!(f, "<{}>", e.message),
        }
    }
}

// ============================================================================
// Marshaling
// ============================================================================

impl Push for &Ref {
    fn push(self, state: &State) -> usize {
        state.push(self.value());
        1
    }
}

impl Push for Ref {
    fn push(self, state: &State) -> usize {
        (&self).push(state)
    }
}

impl Get for Ref {
    const PRIMITIVE: bool = true;

    fn check(_: &State, _: i32, _: &mut Error) -> bool {
        true
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        Ok(Ref::from_stack(state, idx))
    }
}

// ============================================================================
// Call arguments
// ============================================================================

/// Last argument of [`Ref::call`]: a value, or the error sink.
pub trait Arg<'e> {
    /// Push the argument, or hand it back as the error sink. Returns the
    /// number of pushed values.
    fn push_last(self, state: &State) -> (i32, Option<&'e mut Error>);
}

impl<'e, T: Push> Arg<'e> for T {
    fn push_last(self, state: &State) -> (i32, Option<&'e mut Error>) {
        (self.push(state) as i32, None)
    }
}

impl<'e> Arg<'e> for &'e mut Error {
    fn push_last(self, _: &State) -> (i32, Option<&'e mut Error>) {
        (0, Some(self))
    }
}

/// Argument tuple of [`Ref::call`].
pub trait CallArgs<'e> {
    fn push_args(self, state: &State) -> (i32, Option<&'e mut Error>);
}

impl<'e> CallArgs<'e> for () {
    fn push_args(self, _: &State) -> (i32, Option<&'e mut Error>) {
        (0, None)
    }
}

macro_rules! impl_call_args {
    ($($name:ident,)* ; $last:ident) => {
        impl<'e, $($name: Push,)* $last: Arg<'e>> CallArgs<'e> for ($($name,)* $last,) {
            #[allow(non_snake_case)]
            fn push_args(self, state: &State) -> (i32, Option<&'e mut Error>) {
                let ($($name,)* $last,) = self;
                let count = 0 $(+ $name.push(state) as i32)*;
                let (last, sink) = $last.push_last(state);
                (count + last, sink)
            }
        }
    };
}

impl_call_args!(; A);
impl_call_args!(A, ; B);
impl_call_args!(A, B, ; C);
impl_call_args!(A, B, C, ; D);
impl_call_args!(A, B, C, D, ; E);
impl_call_args!(A, B, C, D, E, ; F);
impl_call_args!(A, B, C, D, E, F, ; G);
impl_call_args!(A, B, C, D, E, F, G, ; H);

// ============================================================================
// Comparison
// ============================================================================

impl PartialEq for Ref {
    fn eq(&self, other: &Ref) -> bool {
        self.compare(&other.value(), CompareOp::Eq).unwrap_or(false)
    }
}

impl PartialOrd for Ref {
    fn partial_cmp(&self, other: &Ref) -> Option<Ordering> {
        self.order(&other.value())
    }

    fn lt(&self, other: &Ref) -> bool {
        self.compare(&other.value(), CompareOp::Lt).unwrap_or(false)
    }

    fn le(&self, other: &Ref) -> bool {
        self.compare(&other.value(), CompareOp::Le).unwrap_or(false)
    }

    fn gt(&self, other: &Ref) -> bool {
        self.reverse_compare(&other.value(), CompareOp::Lt).unwrap_or(false)
    }

    fn ge(&self, other: &Ref) -> bool {
        self.reverse_compare(&other.value(), CompareOp::Le).unwrap_or(false)
    }
}

macro_rules! impl_compare_primitive {
    ($($ty:ty),*) => {
        $(
            impl PartialEq<$ty> for Ref {
                fn eq(&self, other: &$ty) -> bool {
                    self.compare(&Value::from(other.clone()), CompareOp::Eq).unwrap_or(false)
                }
            }

            impl PartialOrd<$ty> for Ref {
                fn partial_cmp(&self, other: &$ty) -> Option<Ordering> {
                    self.order(&Value::from(other.clone()))
                }
            }
        )*
    };
}

impl_compare_primitive!(i32, i64, f64, bool, &str, String, Rc<str>);
