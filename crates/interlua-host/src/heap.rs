//! Collected object heap.
//!
//! Objects live in a generational arena. Freed slots are recycled with a
//! bumped generation so stale handles are detected instead of aliasing a new
//! object. Reclamation is mark-and-sweep: the state hands in its roots, the
//! heap returns the unreachable objects and the caller drops them once the
//! heap is no longer borrowed, which is when userdata finalizers run.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::HostResult;
use crate::state::State;
use crate::value::{Function, GcRef, Key, Table, Userdata, Value};

/// Signature of a native function callable from scripts.
///
/// Arguments are at stack indices `1..=top()`; the function pushes its
/// results and returns how many it pushed.
pub type NativeFn = fn(&State) -> HostResult<usize>;

/// Upcast helper so payloads can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Contents of a userdata block.
///
/// Dropping the payload is the finalizer: it runs when the collector
/// reclaims the block.
pub trait Payload: AsAny {
    /// Report heap values the payload keeps alive.
    fn trace(&self, _tracer: &mut Tracer) {}
}

/// Worklist of values reachable from the object being traced.
pub struct Tracer {
    gray: Vec<GcRef>,
}

impl Tracer {
    pub fn mark(&mut self, value: &Value) {
        if let Some(r) = value.gc_ref() {
            self.gray.push(r);
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

pub(crate) struct TableData {
    pub(crate) entries: FxHashMap<Key, Value>,
    pub(crate) metatable: Option<Table>,
}

impl TableData {
    pub(crate) fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            metatable: None,
        }
    }

    /// Border of the array part: the largest `n` with `t[1..=n]` all non-nil.
    pub(crate) fn border(&self) -> usize {
        let mut n = 0;
        while self.entries.contains_key(&Key::Integer(n as i64 + 1)) {
            n += 1;
        }
        n
    }
}

pub(crate) struct FunctionData {
    pub(crate) name: Rc<str>,
    pub(crate) func: NativeFn,
    pub(crate) upvalues: Vec<Value>,
}

pub(crate) struct UserdataData {
    pub(crate) payload: Box<dyn Payload>,
    pub(crate) metatable: Option<Table>,
}

pub(crate) enum Object {
    Table(TableData),
    Function(FunctionData),
    Userdata(UserdataData),
}

// ============================================================================
// Heap
// ============================================================================

struct HeapSlot {
    generation: u32,
    marked: bool,
    object: Option<Object>,
}

#[derive(Default)]
pub(crate) struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    live: usize,
}

impl Heap {
    pub(crate) fn allocate(&mut self, object: Object) -> GcRef {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            GcRef {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                marked: false,
                object: Some(object),
            });
            GcRef {
                index,
                generation: 0,
            }
        }
    }

    fn get(&self, r: GcRef) -> Option<&Object> {
        let slot = self.slots.get(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.object.as_ref()
    }

    fn get_mut(&mut self, r: GcRef) -> Option<&mut Object> {
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.object.as_mut()
    }

    pub(crate) fn table(&self, t: Table) -> Option<&TableData> {
        match self.get(t.0)? {
            Object::Table(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn table_mut(&mut self, t: Table) -> Option<&mut TableData> {
        match self.get_mut(t.0)? {
            Object::Table(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn function(&self, f: Function) -> Option<&FunctionData> {
        match self.get(f.0)? {
            Object::Function(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn userdata(&self, u: Userdata) -> Option<&UserdataData> {
        match self.get(u.0)? {
            Object::Userdata(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn userdata_mut(&mut self, u: Userdata) -> Option<&mut UserdataData> {
        match self.get_mut(u.0)? {
            Object::Userdata(data) => Some(data),
            _ => None,
        }
    }

    /// Number of live objects.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Mark everything reachable from `roots`, then unlink the rest.
    ///
    /// The unreachable objects are returned rather than dropped so their
    /// finalizers run outside any borrow of the heap.
    pub(crate) fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> Vec<Object> {
        let mut tracer = Tracer { gray: Vec::new() };
        for root in roots {
            tracer.mark(&root);
        }

        while let Some(r) = tracer.gray.pop() {
            let Some(slot) = self.slots.get_mut(r.index as usize) else {
                continue;
            };
            if slot.generation != r.generation || slot.marked {
                continue;
            }
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            slot.marked = true;
            match object {
                Object::Table(data) => {
                    for (key, value) in &data.entries {
                        tracer.mark(&key.to_value());
                        tracer.mark(value);
                    }
                    if let Some(mt) = data.metatable {
                        tracer.gray.push(mt.0);
                    }
                }
                Object::Function(data) => {
                    for upvalue in &data.upvalues {
                        tracer.mark(upvalue);
                    }
                }
                Object::Userdata(data) => {
                    if let Some(mt) = data.metatable {
                        tracer.gray.push(mt.0);
                    }
                    data.payload.trace(&mut tracer);
                }
            }
        }

        let mut garbage = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked {
                slot.marked = false;
                continue;
            }
            if let Some(object) = slot.object.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(index as u32);
                garbage.push(object);
            }
        }
        self.live -= garbage.len();
        garbage
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("live", &self.live)
            .field("free_count", &self.free_list.len())
            .finish()
    }
}
