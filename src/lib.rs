//! Bindings between native Rust types and an embedded scripting runtime.
//!
//! Native classes are registered once per runtime and then cross the
//! boundary in both directions: bound functions receive checked, typed
//! arguments and push typed results, and [`Ref`] lets native code call
//! into, index and read values living in the runtime.
//!
//! ```ignore
//! use interlua::prelude::*;
//!
//! #[derive(Clone)]
//! struct Vec3 { x: f32, y: f32, z: f32 }
//! impl Class for Vec3 {}
//!
//! let state = State::new();
//! Namespace::global(&state)?
//!     .class::<Vec3>("Vec3")?
//!     .constructor(|x: f32, y: f32, z: f32| Vec3 { x, y, z })?
//!     .variable("x", field!(Vec3, x), Access::ReadWrite)?;
//!
//! let v = Ref::global(&state, "Vec3").call((2.0, 4.0, 6.0));
//! assert_eq!(v.index("x").get::<f32>(), 2.0);
//! ```
//!
//! Class identity survives the trip through the runtime: every instance
//! carries the metadata node of its concrete class, and the checker walks
//! the inheritance chain (applying upcasts) before handing out a pointer.
//! Const-ness is tracked per instance and checked before identity.

pub mod bind;
pub mod builder;
pub mod check;
pub mod class;
mod dispatch;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod key;
pub mod marshal;
pub mod node;
pub mod transfer;

pub use interlua_host as host;
pub use interlua_host::{State, Value};

pub use bind::{Access, Callable, ConstMemberFn, ConstMethod, Field, MemberFn, Method};
pub use builder::{ClassBuilder, Namespace};
pub use check::{get_object, get_userdata, try_userdata};
pub use class::{Class, Inherits};
pub use envelope::make_const;
pub use error::{CheckError, Error, ErrorKind, OnError, RegistrationError, Verbosity};
pub use handle::{Arg, CallArgs, Ref};
pub use key::{ClassKey, ClassKeys, Facet};
pub use marshal::{ArgList, ByRef, Get, Push, fetch};

pub mod prelude {
    pub use crate::bind::{Access, Field};
    pub use crate::builder::{ClassBuilder, Namespace};
    pub use crate::class::{Class, Inherits};
    pub use crate::error::{Error, ErrorKind, RegistrationError};
    pub use crate::handle::Ref;
    pub use crate::marshal::{ByRef, Get, Push};
    pub use crate::{field, inherits};
    pub use interlua_host::{Config, HostError, HostResult, State, Value};
}
