//! Native objects embedded in runtime userdata blocks.
//!
//! An [`Envelope`] either owns a boxed `T` (dropped when the collector
//! reclaims the block) or borrows a pointer the runtime never frees. Its
//! class node is fixed at creation except for the one-way switch from the
//! mutable facet to the const facet.

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

use interlua_host::{HostResult, Payload, State, Value};

use crate::class::Class;
use crate::error::{CheckError, ErrorKind, fatal};
use crate::key::{ClassKey, Facet};
use crate::node::{ClassRegistry, MetaNode, NodeFlags};

/// Type-erased access to the object an envelope holds.
pub(crate) trait Storage {
    fn as_ptr(&self) -> NonNull<()>;

    fn is_owned(&self) -> bool;
}

/// A runtime-owned copy. The allocation is held as a raw pointer so native
/// code may hold `&mut T` while the envelope is alive.
struct Owned<T>(NonNull<T>);

impl<T> Owned<T> {
    fn new(value: T) -> Self {
        Self(NonNull::from(Box::leak(Box::new(value))))
    }
}

impl<T> Storage for Owned<T> {
    fn as_ptr(&self) -> NonNull<()> {
        self.0.cast()
    }

    fn is_owned(&self) -> bool {
        true
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `Box::leak` in `new` and is released
        // exactly once, here.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// A native object owned elsewhere.
struct Pointer(NonNull<()>);

impl Storage for Pointer {
    fn as_ptr(&self) -> NonNull<()> {
        self.0
    }

    fn is_owned(&self) -> bool {
        false
    }
}

/// Userdata payload for every class instance.
pub struct Envelope {
    storage: Box<dyn Storage>,
    constant: Cell<bool>,
    node: RefCell<Rc<MetaNode>>,
    /// Native references currently lent out: a positive count of shared
    /// loans, or -1 while lent exclusively.
    loans: Cell<isize>,
}

impl Payload for Envelope {}

/// What the checker needs to know about an envelope.
#[derive(Debug, Clone)]
pub(crate) struct EnvelopeInfo {
    pub ptr: NonNull<()>,
    pub constant: bool,
    pub node: Rc<MetaNode>,
}

impl Envelope {
    pub fn is_const(&self) -> bool {
        self.constant.get()
    }

    /// True for copies the runtime destroys; false for borrowed pointers.
    pub fn is_owned(&self) -> bool {
        self.storage.is_owned()
    }

    pub(crate) fn info(&self) -> EnvelopeInfo {
        EnvelopeInfo {
            ptr: self.storage.as_ptr(),
            constant: self.constant.get(),
            node: self.node.borrow().clone(),
        }
    }
}

/// Envelope details of a value, `None` if it is not an envelope.
pub(crate) fn inspect(state: &State, value: &Value) -> Option<EnvelopeInfo> {
    state.with_payload(value, Envelope::info)
}

fn class_node<T: 'static>(state: &State, facet: Facet) -> Rc<MetaNode> {
    let key = ClassKey::of::<T>(facet);
    match ClassRegistry::lookup(state, key) {
        Some(node) => node,
        None => fatal(
            ErrorKind::UnregisteredClass,
            format_args!("class '{}' is not registered", type_name::<T>()),
        ),
    }
}

fn push_envelope(state: &State, storage: Box<dyn Storage>, node: Rc<MetaNode>) {
    let metatable = node.metatable();
    let constant = node.flags().contains(NodeFlags::CONST);
    let envelope = Envelope {
        storage,
        constant: Cell::new(constant),
        node: RefCell::new(node),
        loans: Cell::new(0),
    };
    let block = state.new_userdata(envelope, Some(metatable));
    state.push(block);
}

/// Move `value` into a fresh runtime-owned envelope and push it.
pub(crate) fn push_owned<T: Class>(state: &State, value: T) {
    let node = class_node::<T>(state, Facet::Mutable);
    push_envelope(state, Box::new(Owned::new(value)), node);
}

/// Push a non-owning envelope for `ptr`, on the const facet if `constant`.
pub(crate) fn push_pointer<T: Class>(state: &State, ptr: NonNull<T>, constant: bool) {
    let facet = if constant { Facet::Const } else { Facet::Mutable };
    let node = class_node::<T>(state, facet);
    push_envelope(state, Box::new(Pointer(ptr.cast())), node);
}

/// A native reference to the object in an envelope, released on drop.
///
/// Bound functions take a loan before turning the checked pointer into a
/// reference, so a `&mut T` never coexists with another reference to the
/// same object.
pub(crate) struct Loan {
    state: State,
    value: Value,
    exclusive: bool,
}

impl Drop for Loan {
    fn drop(&mut self) {
        let exclusive = self.exclusive;
        self.state.with_payload(&self.value, |envelope: &Envelope| {
            let loans = envelope.loans.get();
            envelope.loans.set(if exclusive { 0 } else { loans - 1 });
        });
    }
}

/// Lend the object at argument `idx`, exclusively or shared. Fails while
/// an incompatible loan is outstanding.
pub(crate) fn lend(state: &State, idx: i32, exclusive: bool) -> HostResult<Loan> {
    let value = state.value(idx);
    let granted = state.with_payload(&value, |envelope: &Envelope| {
        match (exclusive, envelope.loans.get()) {
            (true, 0) => envelope.loans.set(-1),
            (false, n) if n >= 0 => envelope.loans.set(n + 1),
            _ => return Err(envelope.node.borrow().name().clone()),
        }
        Ok(())
    });
    match granted {
        Some(Err(class)) => Err(state.arg_error(idx, CheckError::AlreadyBorrowed { class })),
        Some(Ok(())) => Ok(Loan {
            state: state.clone(),
            value,
            exclusive,
        }),
        None => Ok(Loan {
            state: state.clone(),
            value: Value::Nil,
            exclusive,
        }),
    }
}

/// Mark the envelope at `idx` const and switch it to the const facet.
///
/// Returns false if the value is not an envelope. Const envelopes stay
/// const.
pub fn make_const(state: &State, idx: i32) -> HostResult<bool> {
    let value = state.value(idx);
    let switched = state.with_payload(&value, |envelope: &Envelope| {
        if envelope.constant.replace(true) {
            return None;
        }
        let const_node = envelope.node.borrow().const_node().cloned()?;
        let metatable = const_node.metatable();
        *envelope.node.borrow_mut() = const_node;
        Some(metatable)
    });
    match switched {
        None => Ok(false),
        Some(None) => Ok(true),
        Some(Some(metatable)) => {
            state.set_metatable(&value, Some(metatable))?;
            Ok(true)
        }
    }
}
