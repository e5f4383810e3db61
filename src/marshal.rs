//! Conversions between native values and runtime values.
//!
//! [`Push`] moves a native value onto the runtime stack and reports how many
//! slots it produced. [`Get`] validates (`check`) and converts (`get`) the
//! value at a stack index. Class instances pushed by value are copied into a
//! runtime-owned envelope; only raw pointers keep aliasing with native data.

use std::ptr::NonNull;
use std::rc::Rc;

use interlua_host::{HostResult, State, Type, Value};

use crate::check::{get_object, object_arg};
use crate::class::Class;
use crate::envelope::{lend, push_owned, push_pointer};
use crate::error::{CheckError, Error};

/// Native to runtime conversion.
pub trait Push {
    /// Push `self` and return the number of stack slots produced.
    fn push(self, state: &State) -> usize;
}

/// Runtime to native conversion.
pub trait Get: Sized {
    /// True for types the runtime coerces itself. Argument lists made only
    /// of primitives skip the separate check pass.
    const PRIMITIVE: bool = false;

    /// Validate the value at `idx`, recording the reason into `err` on
    /// failure.
    fn check(state: &State, idx: i32, err: &mut Error) -> bool;

    /// Convert the value at `idx`, raising a `bad argument` error if it
    /// does not convert.
    fn get(state: &State, idx: i32) -> HostResult<Self>;
}

fn mismatch(state: &State, idx: i32, expected: &'static str, err: &mut Error) -> bool {
    err.fail(CheckError::TypeMismatch {
        expected,
        got: state.type_of(idx).name(),
    });
    false
}

// ============================================================================
// Numbers
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, state: &State) -> usize {
                    state.push(Value::Integer(self as i64));
                    1
                }
            }

            impl Get for $ty {
                const PRIMITIVE: bool = true;

                fn check(state: &State, idx: i32, err: &mut Error) -> bool {
                    match state.to_integer(idx) {
                        Some(v) if <$ty>::try_from(v).is_ok() => true,
                        Some(v) => {
                            err.fail(CheckError::IntegerOverflow {
                                value: v,
                                target: stringify!($ty),
                            });
                            false
                        }
                        None => mismatch(state, idx, "number", err),
                    }
                }

                fn get(state: &State, idx: i32) -> HostResult<Self> {
                    let v = state.check_integer(idx)?;
                    <$ty>::try_from(v).map_err(|_| {
                        state.arg_error(
                            idx,
                            CheckError::IntegerOverflow {
                                value: v,
                                target: stringify!($ty),
                            },
                        )
                    })
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32);

/// Values above `i64::MAX` wrap to negative runtime integers and wrap back
/// on the way out.
macro_rules! impl_wrapping_integer {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, state: &State) -> usize {
                    state.push(Value::Integer(self as i64));
                    1
                }
            }

            impl Get for $ty {
                const PRIMITIVE: bool = true;

                fn check(state: &State, idx: i32, err: &mut Error) -> bool {
                    state.to_integer(idx).is_some() || mismatch(state, idx, "number", err)
                }

                fn get(state: &State, idx: i32) -> HostResult<Self> {
                    Ok(state.check_integer(idx)? as $ty)
                }
            }
        )*
    };
}

impl_wrapping_integer!(u64, usize);

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, state: &State) -> usize {
                    state.push(Value::Number(self as f64));
                    1
                }
            }

            impl Get for $ty {
                const PRIMITIVE: bool = true;

                fn check(state: &State, idx: i32, err: &mut Error) -> bool {
                    state.to_number(idx).is_some() || mismatch(state, idx, "number", err)
                }

                fn get(state: &State, idx: i32) -> HostResult<Self> {
                    Ok(state.check_number(idx)? as $ty)
                }
            }
        )*
    };
}

impl_float!(f32, f64);

// ============================================================================
// Booleans, characters and strings
// ============================================================================

impl Push for bool {
    fn push(self, state: &State) -> usize {
        state.push(self);
        1
    }
}

/// Every value has a truth value.
impl Get for bool {
    const PRIMITIVE: bool = true;

    fn check(_: &State, _: i32, _: &mut Error) -> bool {
        true
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        Ok(state.to_boolean(idx))
    }
}

impl Push for char {
    fn push(self, state: &State) -> usize {
        state.push(self.to_string());
        1
    }
}

fn single_char(state: &State, idx: i32) -> Option<char> {
    let s = state.to_str(idx)?;
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

impl Get for char {
    const PRIMITIVE: bool = true;

    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        single_char(state, idx).is_some() || mismatch(state, idx, "character", err)
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        single_char(state, idx).ok_or_else(|| state.type_error(idx, "character"))
    }
}

impl Push for &str {
    fn push(self, state: &State) -> usize {
        state.push(self);
        1
    }
}

impl Push for String {
    fn push(self, state: &State) -> usize {
        state.push(self);
        1
    }
}

impl Push for &String {
    fn push(self, state: &State) -> usize {
        state.push(self.as_str());
        1
    }
}

impl Push for Rc<str> {
    fn push(self, state: &State) -> usize {
        state.push(self);
        1
    }
}

impl Get for String {
    const PRIMITIVE: bool = true;

    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        state.to_str(idx).is_some() || mismatch(state, idx, "string", err)
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        Ok(state.check_str(idx)?.to_string())
    }
}

impl Get for Rc<str> {
    const PRIMITIVE: bool = true;

    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        state.to_str(idx).is_some() || mismatch(state, idx, "string", err)
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        state.check_str(idx)
    }
}

// ============================================================================
// Nil, raw values and aggregates
// ============================================================================

/// `None` is nil.
impl<T: Push> Push for Option<T> {
    fn push(self, state: &State) -> usize {
        match self {
            Some(v) => v.push(state),
            None => {
                state.push_nil();
                1
            }
        }
    }
}

/// Nil (or a missing argument) is `None`.
impl<T: Get> Get for Option<T> {
    const PRIMITIVE: bool = T::PRIMITIVE;

    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        state.is_none_or_nil(idx) || T::check(state, idx, err)
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        if state.is_none_or_nil(idx) {
            Ok(None)
        } else {
            T::get(state, idx).map(Some)
        }
    }
}

impl Push for Value {
    fn push(self, state: &State) -> usize {
        state.push(self);
        1
    }
}

impl Get for Value {
    const PRIMITIVE: bool = true;

    fn check(_: &State, _: i32, _: &mut Error) -> bool {
        true
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        Ok(state.value(idx))
    }
}

/// Produces no value.
impl Push for () {
    fn push(self, _: &State) -> usize {
        0
    }
}

macro_rules! impl_push_tuple {
    ($($name:ident),+) => {
        /// Elements are pushed left to right.
        impl<$($name: Push),+> Push for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push(self, state: &State) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.push(state))+
            }
        }
    };
}

impl_push_tuple!(A);
impl_push_tuple!(A, B);
impl_push_tuple!(A, B, C);
impl_push_tuple!(A, B, C, D);
impl_push_tuple!(A, B, C, D, E);
impl_push_tuple!(A, B, C, D, E, F);
impl_push_tuple!(A, B, C, D, E, F, G);
impl_push_tuple!(A, B, C, D, E, F, G, H);

// ============================================================================
// Classes
// ============================================================================

/// By value: the object moves into a runtime-owned envelope.
impl<T: Class> Push for T {
    fn push(self, state: &State) -> usize {
        push_owned(state, self);
        1
    }
}

/// By value: a copy of the object, which may be const.
impl<T: Class + Clone> Get for T {
    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        get_object::<T>(state, idx, true, err).is_some()
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        let ptr = object_arg::<T>(state, idx, true)?;
        let _loan = lend(state, idx, false)?;
        // SAFETY: the checker returned a pointer into a live envelope that
        // the stack keeps reachable for the duration of this call.
        Ok(unsafe { ptr.as_ref() }.clone())
    }
}

/// A class instance pushed by reference.
///
/// The runtime cannot tell a reference from a value, so the object is
/// copied into a fresh owned envelope exactly as a by-value push would.
/// Keep aliasing with `*mut T` or `*const T` instead.
///
/// ```ignore
/// let v = Ref::new(&state, ByRef(&native));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ByRef<'a, T>(pub &'a T);

impl<T: Class + Clone> Push for ByRef<'_, T> {
    fn push(self, state: &State) -> usize {
        push_owned(state, self.0.clone());
        1
    }
}

/// Aliases the native object; the runtime never frees it.
impl<T: Class> Push for *mut T {
    fn push(self, state: &State) -> usize {
        match NonNull::new(self) {
            Some(ptr) => push_pointer(state, ptr, false),
            None => state.push_nil(),
        }
        1
    }
}

/// Aliases the native object through the const facet.
impl<T: Class> Push for *const T {
    fn push(self, state: &State) -> usize {
        match NonNull::new(self.cast_mut()) {
            Some(ptr) => push_pointer(state, ptr, true),
            None => state.push_nil(),
        }
        1
    }
}

/// Requires a mutable object. Nil converts to null.
impl<T: Class> Get for *mut T {
    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        state.type_of(idx) == Type::Nil || get_object::<T>(state, idx, false, err).is_some()
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        if state.type_of(idx) == Type::Nil {
            return Ok(std::ptr::null_mut());
        }
        Ok(object_arg::<T>(state, idx, false)?.as_ptr())
    }
}

/// Accepts const and mutable objects. Nil converts to null.
impl<T: Class> Get for *const T {
    fn check(state: &State, idx: i32, err: &mut Error) -> bool {
        state.type_of(idx) == Type::Nil || get_object::<T>(state, idx, true, err).is_some()
    }

    fn get(state: &State, idx: i32) -> HostResult<Self> {
        if state.type_of(idx) == Type::Nil {
            return Ok(std::ptr::null());
        }
        Ok(object_arg::<T>(state, idx, true)?.as_ptr().cast_const())
    }
}

// ============================================================================
// Argument lists
// ============================================================================

/// A tuple of parameters fetched from consecutive stack slots.
pub trait ArgList: Sized {
    const ARITY: usize;

    /// Fetch the parameters starting at stack index `start`.
    ///
    /// All-primitive lists convert directly and let the runtime raise on the
    /// first value that does not coerce. Otherwise every argument is checked
    /// left to right before any conversion happens.
    fn fetch(state: &State, start: i32) -> HostResult<Self>;
}

impl ArgList for () {
    const ARITY: usize = 0;

    fn fetch(_: &State, _: i32) -> HostResult<Self> {
        Ok(())
    }
}

macro_rules! impl_arg_list {
    ($count:expr; $($name:ident $offset:tt),+) => {
        impl<$($name: Get),+> ArgList for ($($name,)+) {
            const ARITY: usize = $count;

            fn fetch(state: &State, start: i32) -> HostResult<Self> {
                if !($($name::PRIMITIVE)&&+) {
                    let mut err = Error::verbose();
                    $(
                        if !$name::check(state, start + $offset, &mut err) {
                            return Err(state.arg_error(start + $offset, err.what()));
                        }
                    )+
                }
                Ok(($($name::get(state, start + $offset)?,)+))
            }
        }
    };
}

impl_arg_list!(1; A 0);
impl_arg_list!(2; A 0, B 1);
impl_arg_list!(3; A 0, B 1, C 2);
impl_arg_list!(4; A 0, B 1, C 2, D 3);
impl_arg_list!(5; A 0, B 1, C 2, D 3, E 4);
impl_arg_list!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_arg_list!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_arg_list!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Convert the value at `idx` after checking it, recording failures into
/// `err` instead of raising.
pub fn fetch<T: Get>(state: &State, idx: i32, err: &mut Error) -> Option<T> {
    if !T::check(state, idx, err) {
        return None;
    }
    match T::get(state, idx) {
        Ok(v) => Some(v),
        Err(e) => {
            err.set(e.status.into(), e.message);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn round_trip<T: Push + Get>(state: &State, value: T) -> T {
        assert_eq!(value.push(state), 1);
        let out = T::get(state, -1).unwrap();
        state.pop(1);
        out
    }

    #[test]
    fn primitives_round_trip() {
        let state = State::new();
        assert_eq!(round_trip(&state, 0i32), 0);
        assert_eq!(round_trip(&state, i64::MIN), i64::MIN);
        assert_eq!(round_trip(&state, u8::MAX), u8::MAX);
        assert_eq!(round_trip(&state, u64::MAX), u64::MAX);
        assert_eq!(round_trip(&state, usize::MAX), usize::MAX);
        assert_eq!(round_trip(&state, -2.5f64), -2.5);
        assert_eq!(round_trip(&state, f32::MAX), f32::MAX);
        assert!(round_trip(&state, true));
        assert_eq!(round_trip(&state, 'λ'), 'λ');
        assert_eq!(round_trip(&state, String::new()), "");
        assert_eq!(round_trip(&state, Some(String::from("x"))).as_deref(), Some("x"));
        assert_eq!(round_trip::<Option<String>>(&state, None), None);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn integers_are_range_checked() {
        let state = State::new();
        state.push(300);
        let mut err = Error::verbose();
        assert!(!u8::check(&state, 1, &mut err));
        assert_eq!(err.what(), "number 300 out of range for u8");
        assert!(u8::get(&state, 1).is_err());
        assert!(i16::check(&state, 1, &mut err));
    }

    #[test]
    fn checks_name_both_types() {
        let state = State::new();
        state.push("word");
        let mut err = Error::verbose();
        assert!(!f64::check(&state, 1, &mut err));
        assert_eq!(err.what(), "number expected, got string");
        assert_eq!(err.kind(), Some(ErrorKind::TypeMismatch));
        assert!(String::check(&state, 1, &mut err));
        assert!(!char::check(&state, 1, &mut err));
    }

    #[test]
    fn numeric_strings_coerce_on_the_fast_path() {
        let state = State::new();
        state.push("12");
        state.push(3);
        let (a, b) = <(i32, String)>::fetch(&state, 1).unwrap();
        assert_eq!((a, b.as_str()), (12, "3"));
    }

    #[test]
    fn tuples_flatten_in_order() {
        let state = State::new();
        assert_eq!((1, "two", (), 3.5).push(&state), 3);
        assert_eq!(state.to_integer(1), Some(1));
        assert_eq!(state.value(2).as_str(), Some("two"));
        assert_eq!(state.to_number(3), Some(3.5));
    }

    #[test]
    fn fetch_records_instead_of_raising() {
        let state = State::new();
        state.push(true);
        let mut err = Error::verbose();
        assert_eq!(fetch::<i32>(&state, 1, &mut err), None);
        assert_eq!(err.what(), "number expected, got boolean");
        err.reset();
        assert_eq!(fetch::<Option<i32>>(&state, 2, &mut err), Some(None));
        assert!(!err.is_err());
    }
}
