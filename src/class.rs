//! Traits describing native classes.

use std::ptr::NonNull;

/// A native type that can be registered with the runtime.
///
/// ```ignore
/// #[derive(Clone)]
/// struct Vec3 { x: f32, y: f32, z: f32 }
///
/// impl Class for Vec3 {}
/// ```
pub trait Class: 'static {}

/// Single inheritance: `Self` embeds a `P` that scripts may use in place of
/// the whole object.
///
/// # Safety
///
/// `upcast` must return a pointer to a `P` that lives inside the object
/// `this` points to. Use [`inherits!`](crate::inherits) to derive it from a
/// field.
pub unsafe trait Inherits<P: Class>: Class {
    fn upcast(this: NonNull<Self>) -> NonNull<P>;
}

/// Declare that a class extends another through one of its fields.
///
/// ```ignore
/// struct Derived { base: Base, extra: i32 }
/// impl Class for Derived {}
/// inherits!(Derived => Base, base);
/// ```
#[macro_export]
macro_rules! inherits {
    ($derived:ty => $base:ty, $field:ident) => {
        unsafe impl $crate::Inherits<$base> for $derived {
            fn upcast(this: ::std::ptr::NonNull<Self>) -> ::std::ptr::NonNull<$base> {
                // SAFETY: `this` points to a live `$derived`, so the address
                // of its field is non-null and valid for the same lifetime.
                unsafe { ::std::ptr::NonNull::new_unchecked(&raw mut (*this.as_ptr()).$field) }
            }
        }
    };
}

/// Type-erased form of [`Inherits::upcast`] stored in class metadata.
pub type Upcast = fn(NonNull<()>) -> NonNull<()>;

pub(crate) fn erased_upcast<T: Inherits<P>, P: Class>(ptr: NonNull<()>) -> NonNull<()> {
    T::upcast(ptr.cast::<T>()).cast::<()>()
}
