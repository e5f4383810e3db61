//! Native callables bound as runtime functions.
//!
//! Every bound entity becomes one runtime function whose code is a generic
//! trampoline and whose first upvalue is a [`TransferCell`] carrying the
//! Rust callable. Callables must therefore be `Copy` and small: function
//! items, non-capturing closures and closures capturing a few pointers.

use std::ptr::NonNull;

use interlua_host::{Function, HostResult, NativeFn, State, Value};
use parking_lot::Mutex;

use crate::check::object_arg;
use crate::class::Class;
use crate::envelope::lend;
use crate::marshal::{ArgList, Get, Push};
use crate::transfer::{TransferCell, transferred};

/// Whether a variable or field accepts writes from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// A free function or non-capturing closure.
pub trait Callable<Args, R>: Copy + 'static {
    /// Call with arguments fetched from stack index `start` on.
    fn invoke(self, state: &State, start: i32) -> HostResult<usize>;
}

/// A callable taking the object mutably as its first parameter.
///
/// The remaining arguments are fetched before the object is borrowed, so
/// passing the same instance twice never aliases the `&mut T`.
pub trait Method<T, Args, R>: Copy + 'static {
    /// # Safety
    ///
    /// `object` must be the checked pointer for the envelope at argument 1.
    unsafe fn invoke(self, object: NonNull<T>, state: &State) -> HostResult<usize>;
}

/// A callable taking the object by shared reference.
pub trait ConstMethod<T, Args, R>: Copy + 'static {
    /// # Safety
    ///
    /// `object` must be the checked pointer for the envelope at argument 1.
    unsafe fn invoke(self, object: NonNull<T>, state: &State) -> HostResult<usize>;
}

/// Raw member function: receives the checked object and the state, pushes
/// its results and returns how many it pushed.
///
/// The object stays lent for the whole call; fetching the same instance
/// again from the stack fails with an `already borrowed` error.
pub type MemberFn<T> = fn(&mut T, &State) -> HostResult<usize>;

/// Raw member function callable on const instances too.
pub type ConstMemberFn<T> = fn(&T, &State) -> HostResult<usize>;

macro_rules! impl_callables {
    ($($name:ident $arg:ident),*) => {
        impl<Func, R, $($name),*> Callable<($($name,)*), R> for Func
        where
            Func: Fn($($name),*) -> R + Copy + 'static,
            R: Push,
            ($($name,)*): ArgList,
        {
            fn invoke(self, state: &State, start: i32) -> HostResult<usize> {
                let ($($arg,)*) = <($($name,)*)>::fetch(state, start)?;
                Ok(self($($arg),*).push(state))
            }
        }

        impl<Func, T, R, $($name),*> Method<T, ($($name,)*), R> for Func
        where
            Func: Fn(&mut T, $($name),*) -> R + Copy + 'static,
            R: Push,
            ($($name,)*): ArgList,
        {
            unsafe fn invoke(self, object: NonNull<T>, state: &State) -> HostResult<usize> {
                let ($($arg,)*) = <($($name,)*)>::fetch(state, 2)?;
                let _loan = lend(state, 1, true)?;
                // SAFETY: the envelope at argument 1 outlives the call and
                // the exclusive loan keeps every other reference out.
                let object = unsafe { &mut *object.as_ptr() };
                Ok(self(object, $($arg),*).push(state))
            }
        }

        impl<Func, T, R, $($name),*> ConstMethod<T, ($($name,)*), R> for Func
        where
            Func: Fn(&T, $($name),*) -> R + Copy + 'static,
            R: Push,
            ($($name,)*): ArgList,
        {
            unsafe fn invoke(self, object: NonNull<T>, state: &State) -> HostResult<usize> {
                let ($($arg,)*) = <($($name,)*)>::fetch(state, 2)?;
                let _loan = lend(state, 1, false)?;
                // SAFETY: the envelope at argument 1 outlives the call and
                // the shared loan keeps exclusive references out.
                let object = unsafe { &*object.as_ptr() };
                Ok(self(object, $($arg),*).push(state))
            }
        }
    };
}

impl_callables!();
impl_callables!(A a);
impl_callables!(A a, B b);
impl_callables!(A a, B b, C c);
impl_callables!(A a, B b, C c, D d);
impl_callables!(A a, B b, C c, D d, E e);
impl_callables!(A a, B b, C c, D d, E e, F f);
impl_callables!(A a, B b, C c, D d, E e, F f, G g);
impl_callables!(A a, B b, C c, D d, E e, F f, G g, H h);

// ============================================================================
// Trampolines
// ============================================================================

fn function_trampoline<F: Callable<Args, R>, Args, R>(state: &State) -> HostResult<usize> {
    let f = transferred::<F>(state)?;
    f.invoke(state, 1)
}

/// Called through `__call`, so argument 1 is the class table.
fn constructor_trampoline<F: Callable<Args, T>, Args, T: Class>(
    state: &State,
) -> HostResult<usize> {
    let f = transferred::<F>(state)?;
    f.invoke(state, 2)
}

fn method_trampoline<F: Method<T, Args, R>, T: Class, Args, R>(
    state: &State,
) -> HostResult<usize> {
    let f = transferred::<F>(state)?;
    let object = object_arg::<T>(state, 1, false)?;
    // SAFETY: `object_arg` checked argument 1 against `T`.
    unsafe { f.invoke(object, state) }
}

fn const_method_trampoline<F: ConstMethod<T, Args, R>, T: Class, Args, R>(
    state: &State,
) -> HostResult<usize> {
    let f = transferred::<F>(state)?;
    let object = object_arg::<T>(state, 1, true)?;
    // SAFETY: `object_arg` checked argument 1 against `T`.
    unsafe { f.invoke(object, state) }
}

fn member_fn_trampoline<T: Class>(state: &State) -> HostResult<usize> {
    let f = transferred::<MemberFn<T>>(state)?;
    let mut object = object_arg::<T>(state, 1, false)?;
    let _loan = lend(state, 1, true)?;
    // SAFETY: argument 1 holds the object for the whole call and the loan
    // is exclusive.
    f(unsafe { object.as_mut() }, state)
}

fn const_member_fn_trampoline<T: Class>(state: &State) -> HostResult<usize> {
    let f = transferred::<ConstMemberFn<T>>(state)?;
    let object = object_arg::<T>(state, 1, true)?;
    let _loan = lend(state, 1, false)?;
    // SAFETY: argument 1 holds the object for the whole call.
    f(unsafe { object.as_ref() }, state)
}

fn new_bound<F: Copy + 'static>(state: &State, name: &str, code: NativeFn, target: F) -> Function {
    let cell = state.new_userdata(TransferCell::new(target), None);
    state.new_function(name, code, vec![Value::Userdata(cell)])
}

pub(crate) fn bind_function<F: Callable<Args, R>, Args: 'static, R: 'static>(
    state: &State,
    name: &str,
    f: F,
) -> Function {
    new_bound(state, name, function_trampoline::<F, Args, R>, f)
}

pub(crate) fn bind_constructor<F: Callable<Args, T>, Args: 'static, T: Class>(
    state: &State,
    name: &str,
    f: F,
) -> Function {
    new_bound(state, name, constructor_trampoline::<F, Args, T>, f)
}

pub(crate) fn bind_method<F: Method<T, Args, R>, T: Class, Args: 'static, R: 'static>(
    state: &State,
    name: &str,
    f: F,
) -> Function {
    new_bound(state, name, method_trampoline::<F, T, Args, R>, f)
}

pub(crate) fn bind_const_method<F: ConstMethod<T, Args, R>, T: Class, Args: 'static, R: 'static>(
    state: &State,
    name: &str,
    f: F,
) -> Function {
    new_bound(state, name, const_method_trampoline::<F, T, Args, R>, f)
}

pub(crate) fn bind_member_fn<T: Class>(state: &State, name: &str, f: MemberFn<T>) -> Function {
    new_bound(state, name, member_fn_trampoline::<T>, f)
}

pub(crate) fn bind_const_member_fn<T: Class>(
    state: &State,
    name: &str,
    f: ConstMemberFn<T>,
) -> Function {
    new_bound(state, name, const_member_fn_trampoline::<T>, f)
}

// ============================================================================
// Fields and variables
// ============================================================================

/// Accessors for one field of a class.
///
/// Build with [`field!`](crate::field).
pub struct Field<T, U> {
    get: fn(&T) -> &U,
    get_mut: fn(&mut T) -> &mut U,
}

impl<T, U> Field<T, U> {
    pub fn new(get: fn(&T) -> &U, get_mut: fn(&mut T) -> &mut U) -> Self {
        Self { get, get_mut }
    }
}

impl<T, U> Clone for Field<T, U> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, U> Copy for Field<T, U> {}

/// Field accessor pair for `$ty::$field`.
///
/// ```ignore
/// ns.class::<Vec3>("Vec3")?
///     .variable("x", field!(Vec3, x), Access::ReadWrite)?;
/// ```
#[macro_export]
macro_rules! field {
    ($ty:ty, $field:ident) => {
        $crate::Field::new(
            |v: &$ty| &v.$field,
            |v: &mut $ty| &mut v.$field,
        )
    };
}

fn field_getter<T: Class, U: Clone + Push + 'static>(state: &State) -> HostResult<usize> {
    let field = transferred::<Field<T, U>>(state)?;
    let object = object_arg::<T>(state, 1, true)?;
    let value = {
        let _loan = lend(state, 1, false)?;
        // SAFETY: argument 1 holds the object for the whole call.
        (field.get)(unsafe { object.as_ref() }).clone()
    };
    Ok(value.push(state))
}

fn field_setter<T: Class, U: Get + 'static>(state: &State) -> HostResult<usize> {
    let field = transferred::<Field<T, U>>(state)?;
    let mut object = object_arg::<T>(state, 1, false)?;
    let (value,) = <(U,)>::fetch(state, 2)?;
    let _loan = lend(state, 1, true)?;
    // SAFETY: argument 1 holds the object for the whole call and the loan
    // is exclusive.
    *(field.get_mut)(unsafe { object.as_mut() }) = value;
    Ok(0)
}

pub(crate) fn bind_field_getter<T: Class, U: Clone + Push + 'static>(
    state: &State,
    name: &str,
    field: Field<T, U>,
) -> Function {
    new_bound(state, name, field_getter::<T, U>, field)
}

pub(crate) fn bind_field_setter<T: Class, U: Get + 'static>(
    state: &State,
    name: &str,
    field: Field<T, U>,
) -> Function {
    new_bound(state, name, field_setter::<T, U>, field)
}

fn variable_getter<U: Clone + Push + 'static>(state: &State) -> HostResult<usize> {
    let cell = transferred::<&'static Mutex<U>>(state)?;
    let value = cell.lock().clone();
    Ok(value.push(state))
}

fn variable_setter<U: Get + 'static>(state: &State) -> HostResult<usize> {
    let cell = transferred::<&'static Mutex<U>>(state)?;
    let (value,) = <(U,)>::fetch(state, 1)?;
    *cell.lock() = value;
    Ok(0)
}

/// Getter for a native static variable; called with no arguments.
pub(crate) fn bind_variable_getter<U: Clone + Push + 'static>(
    state: &State,
    name: &str,
    cell: &'static Mutex<U>,
) -> Function {
    new_bound(state, name, variable_getter::<U>, cell)
}

/// Setter for a native static variable; called with the new value only.
pub(crate) fn bind_variable_setter<U: Get + 'static>(
    state: &State,
    name: &str,
    cell: &'static Mutex<U>,
) -> Function {
    new_bound(state, name, variable_setter::<U>, cell)
}
