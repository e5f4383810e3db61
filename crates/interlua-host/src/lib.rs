//! Embedded scripting runtime used by `interlua`.
//!
//! The runtime follows the shape of a Lua-style embedding API: a value stack
//! shared between native functions, tables with metatables that intercept
//! reads, writes, calls and comparisons, opaque userdata blocks with
//! finalizers, a host-private registry, and a mark-and-sweep collector.
//!
//! ```ignore
//! let state = State::new();
//! state.push_function("twice", |s| {
//!     let n = s.check_integer(1)?;
//!     s.push(n * 2);
//!     Ok(1)
//! });
//! state.push(21);
//! state.call(1, 1)?;
//! assert_eq!(state.to_integer(-1), Some(42));
//! ```

pub mod convert;
pub mod error;
pub mod heap;
pub mod state;
pub mod value;

pub use convert::{value_to_integer, value_to_number};
pub use error::{HostError, HostResult, Status};
pub use heap::{AsAny, NativeFn, Payload, Tracer};
pub use state::{CompareOp, Config, MULTRET, REF_NIL, StackGuard, State};
pub use value::{Function, Table, Type, Userdata, Value};
