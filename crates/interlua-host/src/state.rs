//! The runtime state: value stack, call frames, heap and registry.
//!
//! A [`State`] is a cheap, clonable handle. All operations take `&self`;
//! interior state is kept in `RefCell`s that are never held across a call
//! into a native function, so natives may freely re-enter the state.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{HostError, HostResult, Status};
use crate::heap::{FunctionData, Heap, NativeFn, Object, Payload, TableData, UserdataData};
use crate::value::{Function, Key, Table, Type, Userdata, Value};

/// Reference returned by [`State::reference`] for a nil value.
pub const REF_NIL: i32 = -1;

/// Keep every result a call produces.
pub const MULTRET: i32 = -1;

/// Upper bound on `__index` / `__newindex` table chains.
const MAX_META_CHAIN: usize = 100;

/// Comparison primitives with metamethod fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum nesting of native calls before "stack overflow" is raised.
    pub max_call_depth: usize,
}

impl Config {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
        }
    }
}

struct Frame {
    base: usize,
    function: Function,
    name: Rc<str>,
}

struct Inner {
    config: Config,
    stack: RefCell<Vec<Value>>,
    frames: RefCell<Vec<Frame>>,
    heap: RefCell<Heap>,
    globals: Table,
    registry: Table,
    free_refs: RefCell<Vec<i32>>,
    next_ref: Cell<i32>,
    extensions: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
}

/// Handle to a runtime instance.
///
/// Not thread-safe: a state and every value taken from it belong to the
/// thread that created it.
#[derive(Clone)]
pub struct State(Rc<Inner>);

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut heap = Heap::default();
        let globals = Table(heap.allocate(Object::Table(TableData::new())));
        let registry = Table(heap.allocate(Object::Table(TableData::new())));
        Self(Rc::new(Inner {
            config,
            stack: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
            heap: RefCell::new(heap),
            globals,
            registry,
            free_refs: RefCell::new(Vec::new()),
            next_ref: Cell::new(1),
            extensions: RefCell::new(FxHashMap::default()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    /// True when both handles name the same runtime.
    pub fn same(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    fn base(&self) -> usize {
        self.0.frames.borrow().last().map_or(0, |f| f.base)
    }

    fn absolute(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.0.stack.borrow().len();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < len).then_some(pos)
        } else if idx < 0 {
            let offset = idx.unsigned_abs() as usize;
            (offset <= len - base).then(|| len - offset)
        } else {
            None
        }
    }

    /// Number of values in the current frame.
    pub fn top(&self) -> i32 {
        (self.0.stack.borrow().len() - self.base()) as i32
    }

    /// Grow (with nils) or shrink the current frame. Negative indices count
    /// from the top, so `set_top(-2)` pops one value.
    pub fn set_top(&self, idx: i32) {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        let len = if idx >= 0 {
            base + idx as usize
        } else {
            (stack.len() + 1).saturating_sub(idx.unsigned_abs() as usize).max(base)
        };
        stack.resize(len, Value::Nil);
    }

    /// Convert a relative index into one that survives later pushes.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 { idx } else { self.top() + idx + 1 }
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.stack.borrow_mut().push(value.into());
    }

    pub fn push_nil(&self) {
        self.push(Value::Nil);
    }

    pub fn pop(&self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Pop and return the top value, nil on an empty frame.
    pub fn pop_value(&self) -> Value {
        if self.top() > 0 {
            self.0.stack.borrow_mut().pop().unwrap_or_default()
        } else {
            Value::Nil
        }
    }

    /// Value at `idx`, nil if the index is not valid.
    pub fn value(&self, idx: i32) -> Value {
        match self.absolute(idx) {
            Some(pos) => self.0.stack.borrow()[pos].clone(),
            None => Value::Nil,
        }
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&self, idx: i32) {
        let value = self.value(idx);
        self.push(value);
    }

    pub fn type_of(&self, idx: i32) -> Type {
        match self.absolute(idx) {
            Some(pos) => self.0.stack.borrow()[pos].type_of(),
            None => Type::None,
        }
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::None | Type::Nil)
    }

    /// Move the top value into `idx`, shifting the values above it up.
    pub fn insert(&self, idx: i32) {
        if let Some(pos) = self.absolute(idx) {
            let mut stack = self.0.stack.borrow_mut();
            if let Some(value) = stack.pop() {
                stack.insert(pos, value);
            }
        }
    }

    pub fn remove(&self, idx: i32) {
        if let Some(pos) = self.absolute(idx) {
            self.0.stack.borrow_mut().remove(pos);
        }
    }

    /// Pop the top value into `idx`.
    pub fn replace(&self, idx: i32) {
        if let Some(pos) = self.absolute(idx) {
            let mut stack = self.0.stack.borrow_mut();
            if let Some(value) = stack.pop()
                && pos < stack.len()
            {
                stack[pos] = value;
            }
        }
    }

    /// Render the current frame, bottom first, for debugging.
    pub fn dump_stack(&self) -> String {
        let mut out = String::new();
        for idx in 1..=self.top() {
            let value = self.value(idx);
            let _ = writeln!(out, "{idx}: {} ({})", value, value.type_name());
        }
        out
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub fn globals(&self) -> Table {
        self.0.globals
    }

    /// The host-private table, never visible to scripts.
    pub fn registry(&self) -> Table {
        self.0.registry
    }

    pub fn new_table(&self) -> Table {
        Table(self.0.heap.borrow_mut().allocate(Object::Table(TableData::new())))
    }

    /// Table lookup without metamethods. Nil and NaN keys read as nil.
    pub fn raw_get(&self, table: Table, key: &Value) -> HostResult<Value> {
        let Ok(key) = Key::new(key) else {
            return Ok(Value::Nil);
        };
        let heap = self.0.heap.borrow();
        let data = heap.table(table).ok_or_else(dangling)?;
        Ok(data.entries.get(&key).cloned().unwrap_or_default())
    }

    /// Table store without metamethods. Storing nil removes the key.
    pub fn raw_set(&self, table: Table, key: Value, value: Value) -> HostResult<()> {
        let key = Key::new(&key).map_err(HostError::runtime)?;
        let mut heap = self.0.heap.borrow_mut();
        let data = heap.table_mut(table).ok_or_else(dangling)?;
        if value.is_nil() {
            data.entries.remove(&key);
        } else {
            data.entries.insert(key, value);
        }
        Ok(())
    }

    /// Length without metamethods: table border or string byte length.
    pub fn raw_len(&self, value: &Value) -> usize {
        match value {
            Value::Table(t) => self.0.heap.borrow().table(*t).map_or(0, TableData::border),
            Value::String(s) => s.len(),
            _ => 0,
        }
    }

    pub fn metatable(&self, value: &Value) -> Option<Table> {
        let heap = self.0.heap.borrow();
        match value {
            Value::Table(t) => heap.table(*t)?.metatable,
            Value::Userdata(u) => heap.userdata(*u)?.metatable,
            _ => None,
        }
    }

    pub fn set_metatable(&self, value: &Value, metatable: Option<Table>) -> HostResult<()> {
        let mut heap = self.0.heap.borrow_mut();
        match value {
            Value::Table(t) => heap.table_mut(*t).ok_or_else(dangling)?.metatable = metatable,
            Value::Userdata(u) => heap.userdata_mut(*u).ok_or_else(dangling)?.metatable = metatable,
            other => {
                return Err(HostError::runtime(format!(
                    "cannot set the metatable of a {} value",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Field `event` of the value's metatable, nil if there is none.
    pub fn metafield(&self, value: &Value, event: &str) -> HostResult<Value> {
        match self.metatable(value) {
            Some(mt) => self.raw_get(mt, &Value::from(event)),
            None => Ok(Value::Nil),
        }
    }

    /// `obj[key]` honoring `__index`.
    pub fn index(&self, obj: &Value, key: &Value) -> HostResult<Value> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            if let Value::Table(t) = current {
                let value = self.raw_get(t, key)?;
                if !value.is_nil() {
                    return Ok(value);
                }
            }
            let handler = self.metafield(&current, "__index")?;
            match handler {
                Value::Nil if matches!(current, Value::Table(_)) => return Ok(Value::Nil),
                Value::Nil => {
                    return Err(HostError::runtime(format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
                Value::Function(_) => {
                    return self.call_meta(handler, [current, key.clone()]);
                }
                next => current = next,
            }
        }
        Err(HostError::runtime("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` honoring `__newindex`.
    pub fn set_index(&self, obj: &Value, key: Value, value: Value) -> HostResult<()> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            if let Value::Table(t) = current
                && !self.raw_get(t, &key)?.is_nil()
            {
                return self.raw_set(t, key, value);
            }
            let handler = self.metafield(&current, "__newindex")?;
            match handler {
                Value::Nil => {
                    return match current {
                        Value::Table(t) => self.raw_set(t, key, value),
                        other => Err(HostError::runtime(format!(
                            "attempt to index a {} value",
                            other.type_name()
                        ))),
                    };
                }
                Value::Function(_) => {
                    self.push(handler);
                    self.push(current);
                    self.push(key);
                    self.push(value);
                    return self.call(3, 0);
                }
                next => current = next,
            }
        }
        Err(HostError::runtime("'__newindex' chain too long; possible loop"))
    }

    pub fn global(&self, name: &str) -> HostResult<Value> {
        self.index(&Value::Table(self.0.globals), &Value::from(name))
    }

    pub fn set_global(&self, name: &str, value: impl Into<Value>) -> HostResult<()> {
        self.set_index(&Value::Table(self.0.globals), Value::from(name), value.into())
    }

    fn call_meta<const N: usize>(&self, handler: Value, args: [Value; N]) -> HostResult<Value> {
        self.push(handler);
        for arg in args {
            self.push(arg);
        }
        self.call(N as i32, 1)?;
        Ok(self.pop_value())
    }

    // ========================================================================
    // Functions and calls
    // ========================================================================

    /// Create a native function. `name` is used in argument errors.
    pub fn new_function(&self, name: &str, func: NativeFn, upvalues: Vec<Value>) -> Function {
        let data = FunctionData {
            name: Rc::from(name),
            func,
            upvalues,
        };
        Function(self.0.heap.borrow_mut().allocate(Object::Function(data)))
    }

    pub fn push_function(&self, name: &str, func: NativeFn) {
        let f = self.new_function(name, func, Vec::new());
        self.push(f);
    }

    /// Upvalue `n` (1-based) of the running native function.
    pub fn upvalue(&self, n: usize) -> Value {
        let frames = self.0.frames.borrow();
        let Some(frame) = frames.last() else {
            return Value::Nil;
        };
        let heap = self.0.heap.borrow();
        heap.function(frame.function)
            .and_then(|f| f.upvalues.get(n.checked_sub(1)?).cloned())
            .unwrap_or_default()
    }

    /// Name of the running native function, `?` outside any call.
    pub fn function_name(&self) -> Rc<str> {
        self.0
            .frames
            .borrow()
            .last()
            .map_or_else(|| Rc::from("?"), |f| f.name.clone())
    }

    /// Number of active native calls.
    pub fn depth(&self) -> usize {
        self.0.frames.borrow().len()
    }

    /// Call the value below the top `nargs` values.
    ///
    /// Function and arguments are replaced by `nresults` results (all of
    /// them for [`MULTRET`]). On error the function and arguments are popped.
    pub fn call(&self, nargs: i32, nresults: i32) -> HostResult<()> {
        #[cfg(feature = "profiling")]
        profiling::function_scope!();

        let needed = nargs.max(0) as usize + 1;
        let func_pos = {
            let len = self.0.stack.borrow().len();
            if len < self.base() + needed {
                return Err(HostError::runtime("not enough values on the stack for call"));
            }
            len - needed
        };
        let result = self.dispatch(func_pos, nresults);
        if result.is_err() {
            self.0.stack.borrow_mut().truncate(func_pos);
        }
        result
    }

    fn dispatch(&self, func_pos: usize, nresults: i32) -> HostResult<()> {
        let callee = self.0.stack.borrow()[func_pos].clone();
        let function = match callee {
            Value::Function(f) => f,
            other => match self.metafield(&other, "__call")? {
                Value::Function(f) => {
                    self.0.stack.borrow_mut().insert(func_pos, Value::Function(f));
                    f
                }
                _ => {
                    return Err(HostError::runtime(format!(
                        "attempt to call a {} value",
                        other.type_name()
                    )));
                }
            },
        };

        let (func, name) = {
            let heap = self.0.heap.borrow();
            let data = heap.function(function).ok_or_else(dangling)?;
            (data.func, data.name.clone())
        };
        if self.depth() >= self.0.config.max_call_depth {
            return Err(HostError::runtime("stack overflow"));
        }

        self.0.frames.borrow_mut().push(Frame {
            base: func_pos + 1,
            function,
            name,
        });
        let result = func(self);
        self.0.frames.borrow_mut().pop();
        let count = result?;

        let mut stack = self.0.stack.borrow_mut();
        let available = stack.len().saturating_sub(func_pos + 1);
        let first = stack.len() - count.min(available);
        let mut results: Vec<Value> = stack.drain(first..).collect();
        stack.truncate(func_pos);
        if nresults >= 0 {
            results.resize(nresults as usize, Value::Nil);
        }
        stack.extend(results);
        Ok(())
    }

    /// Protected call. On failure the error message replaces the function
    /// and its arguments, and the failure status is returned.
    pub fn pcall(&self, nargs: i32, nresults: i32) -> Status {
        match self.call(nargs, nresults) {
            Ok(()) => Status::Ok,
            Err(err) => {
                self.push(err.message);
                err.status
            }
        }
    }

    // ========================================================================
    // Userdata
    // ========================================================================

    pub fn new_userdata<P: Payload>(&self, payload: P, metatable: Option<Table>) -> Userdata {
        let data = UserdataData {
            payload: Box::new(payload),
            metatable,
        };
        Userdata(self.0.heap.borrow_mut().allocate(Object::Userdata(data)))
    }

    /// Run `f` on the payload of a userdata value if it has type `P`.
    ///
    /// The heap is borrowed while `f` runs, so `f` must not touch the state.
    pub fn with_payload<P: Payload, R>(&self, value: &Value, f: impl FnOnce(&P) -> R) -> Option<R> {
        let Value::Userdata(u) = value else {
            return None;
        };
        let heap = self.0.heap.borrow();
        let payload: &dyn Payload = heap.userdata(*u)?.payload.as_ref();
        payload.as_any().downcast_ref::<P>().map(f)
    }

    // ========================================================================
    // Registry references
    // ========================================================================

    /// Pop the top value and anchor it in the registry.
    pub fn reference(&self) -> i32 {
        let value = self.pop_value();
        if value.is_nil() {
            return REF_NIL;
        }
        let r = self.0.free_refs.borrow_mut().pop().unwrap_or_else(|| {
            let r = self.0.next_ref.get();
            self.0.next_ref.set(r + 1);
            r
        });
        let mut heap = self.0.heap.borrow_mut();
        if let Some(registry) = heap.table_mut(self.0.registry) {
            registry.entries.insert(Key::Integer(r as i64), value);
        }
        r
    }

    pub fn unreference(&self, r: i32) {
        if r <= 0 {
            return;
        }
        let mut heap = self.0.heap.borrow_mut();
        if let Some(registry) = heap.table_mut(self.0.registry)
            && registry.entries.remove(&Key::Integer(r as i64)).is_some()
        {
            self.0.free_refs.borrow_mut().push(r);
        }
    }

    pub fn ref_value(&self, r: i32) -> Value {
        if r <= 0 {
            return Value::Nil;
        }
        self.0
            .heap
            .borrow()
            .table(self.0.registry)
            .and_then(|t| t.entries.get(&Key::Integer(r as i64)).cloned())
            .unwrap_or_default()
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        self.value(a).raw_eq(&self.value(b))
    }

    pub fn compare(&self, a: i32, b: i32, op: CompareOp) -> HostResult<bool> {
        let (x, y) = (self.value(a), self.value(b));
        self.compare_values(&x, &y, op)
    }

    pub fn compare_values(&self, x: &Value, y: &Value, op: CompareOp) -> HostResult<bool> {
        let event = match op {
            CompareOp::Eq => {
                if x.raw_eq(y) {
                    return Ok(true);
                }
                let comparable = matches!(
                    (x, y),
                    (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
                );
                if !comparable {
                    return Ok(false);
                }
                "__eq"
            }
            CompareOp::Lt | CompareOp::Le => {
                if let Some(ordering) = primitive_order(x, y) {
                    // NaN is unordered and compares false
                    return Ok(ordering.is_some_and(|o| match op {
                        CompareOp::Lt => o.is_lt(),
                        _ => o.is_le(),
                    }));
                }
                if op == CompareOp::Lt { "__lt" } else { "__le" }
            }
        };

        let mut handler = self.metafield(x, event)?;
        if handler.is_nil() {
            handler = self.metafield(y, event)?;
        }
        if handler.is_nil() {
            return match op {
                CompareOp::Eq => Ok(false),
                _ if x.type_of() == y.type_of() => Err(HostError::runtime(format!(
                    "attempt to compare two {} values",
                    x.type_name()
                ))),
                _ => Err(HostError::runtime(format!(
                    "attempt to compare {} with {}",
                    x.type_name(),
                    y.type_name()
                ))),
            };
        }
        Ok(self.call_meta(handler, [x.clone(), y.clone()])?.is_truthy())
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full mark-and-sweep pass and return how many objects were freed.
    ///
    /// Userdata payloads of reclaimed blocks are dropped before this returns.
    pub fn collect_garbage(&self) -> usize {
        let mut roots: Vec<Value> = self.0.stack.borrow().clone();
        roots.push(Value::Table(self.0.globals));
        roots.push(Value::Table(self.0.registry));
        roots.extend(self.0.frames.borrow().iter().map(|f| Value::Function(f.function)));

        let garbage = self.0.heap.borrow_mut().collect(roots);
        let freed = garbage.len();
        drop(garbage);

        tracing::debug!(
            target: "interlua::host::gc",
            freed,
            live = self.object_count(),
            "collection finished"
        );
        freed
    }

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.0.heap.borrow().len()
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Per-state slot of type `T`, created with `T::default()` on first use.
    pub fn extension<T: Default + 'static>(&self) -> Rc<T> {
        let id = TypeId::of::<T>();
        if let Some(existing) = self.0.extensions.borrow().get(&id).cloned()
            && let Ok(ext) = existing.downcast::<T>()
        {
            return ext;
        }
        let ext = Rc::new(T::default());
        self.0.extensions.borrow_mut().insert(id, ext.clone());
        ext
    }
}

fn dangling() -> HostError {
    HostError::runtime("access to a collected object")
}

/// Ordering of two numbers or two strings; `None` for other pairs.
fn primitive_order(x: &Value, y: &Value) -> Option<Option<std::cmp::Ordering>> {
    match (x, y) {
        (Value::Integer(a), Value::Integer(b)) => Some(Some(a.cmp(b))),
        (Value::Integer(a), Value::Number(b)) => Some((*a as f64).partial_cmp(b)),
        (Value::Number(a), Value::Integer(b)) => Some(a.partial_cmp(&(*b as f64))),
        (Value::Number(a), Value::Number(b)) => Some(a.partial_cmp(b)),
        (Value::String(a), Value::String(b)) => Some(Some(a.cmp(b))),
        _ => None,
    }
}

/// Restores the stack top when dropped.
pub struct StackGuard<'s> {
    state: &'s State,
    top: i32,
}

impl<'s> StackGuard<'s> {
    pub fn new(state: &'s State) -> Self {
        Self {
            state,
            top: state.top(),
        }
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.state.set_top(self.top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn add(state: &State) -> HostResult<usize> {
        let a = state.check_integer(1)?;
        let b = state.check_integer(2)?;
        state.push(a + b);
        Ok(1)
    }

    fn fail(_: &State) -> HostResult<usize> {
        Err(HostError::runtime("boom"))
    }

    fn counter(state: &State) -> HostResult<usize> {
        let start = state.to_integer(1).unwrap_or(0);
        let step = state.upvalue(1);
        state.push(start + step.as_str().map_or(0, |s| s.len() as i64));
        Ok(1)
    }

    fn recurse(state: &State) -> HostResult<usize> {
        state.push_function("recurse", recurse);
        state.call(0, 0)?;
        Ok(0)
    }

    #[test]
    fn call_replaces_function_and_arguments() {
        let state = State::new();
        state.push("below");
        state.push_function("add", add);
        state.push(2);
        state.push(40);
        state.call(2, 1).unwrap();
        assert_eq!(state.top(), 2);
        assert_eq!(state.to_integer(-1), Some(42));
        assert_eq!(state.value(1).as_str(), Some("below"));
    }

    #[test]
    fn results_are_padded_to_the_requested_count() {
        let state = State::new();
        state.push_function("add", add);
        state.push(1);
        state.push(1);
        state.call(2, 3).unwrap();
        assert_eq!(state.top(), 3);
        assert_eq!(state.to_integer(1), Some(2));
        assert!(state.value(3).is_nil());
    }

    #[test]
    fn pcall_leaves_the_message() {
        let state = State::new();
        state.push_function("fail", fail);
        assert_eq!(state.pcall(0, 1), Status::Runtime);
        assert_eq!(state.top(), 1);
        assert_eq!(state.value(-1).as_str(), Some("boom"));

        state.push_function("add", add);
        state.push("x");
        assert_eq!(state.pcall(1, 1), Status::Runtime);
        assert_eq!(
            state.value(-1).as_str(),
            Some("bad argument #1 to 'add' (number expected, got string)")
        );
    }

    #[test]
    fn upvalues_belong_to_the_running_function() {
        let state = State::new();
        let f = state.new_function("counter", counter, vec![Value::from("abc")]);
        state.push(f);
        state.push(10);
        state.call(1, 1).unwrap();
        assert_eq!(state.to_integer(-1), Some(13));
        assert!(state.upvalue(1).is_nil());
    }

    #[test]
    fn runaway_recursion_overflows() {
        let state = State::with_config(Config::default().with_max_call_depth(16));
        state.push_function("recurse", recurse);
        assert_eq!(state.pcall(0, 0), Status::Runtime);
        assert_eq!(state.value(-1).as_str(), Some("stack overflow"));
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn index_falls_back_to_metatable() {
        fn getter(state: &State) -> HostResult<usize> {
            let key = state.check_str(2)?;
            state.push(format!("got {key}"));
            Ok(1)
        }

        let state = State::new();
        let proto = state.new_table();
        state.raw_set(proto, Value::from("inherited"), Value::from(1)).unwrap();
        let meta = state.new_table();
        state.raw_set(meta, Value::from("__index"), Value::Table(proto)).unwrap();
        let obj = Value::Table(state.new_table());
        state.set_metatable(&obj, Some(meta)).unwrap();

        assert_eq!(state.index(&obj, &Value::from("inherited")).unwrap(), Value::from(1));
        assert!(state.index(&obj, &Value::from("missing")).unwrap().is_nil());

        let f = state.new_function("getter", getter, Vec::new());
        state.raw_set(meta, Value::from("__index"), Value::Function(f)).unwrap();
        assert_eq!(
            state.index(&obj, &Value::from("x")).unwrap(),
            Value::from("got x")
        );
    }

    #[test]
    fn newindex_function_intercepts_absent_keys() {
        fn reject(_: &State) -> HostResult<usize> {
            Err(HostError::runtime("read-only table"))
        }

        let state = State::new();
        let meta = state.new_table();
        let f = state.new_function("reject", reject, Vec::new());
        state.raw_set(meta, Value::from("__newindex"), Value::Function(f)).unwrap();
        let t = state.new_table();
        state.raw_set(t, Value::from("present"), Value::from(1)).unwrap();
        state.set_metatable(&Value::Table(t), Some(meta)).unwrap();

        state.set_index(&Value::Table(t), Value::from("present"), Value::from(2)).unwrap();
        let err = state
            .set_index(&Value::Table(t), Value::from("absent"), Value::from(3))
            .unwrap_err();
        assert_eq!(err.message, "read-only table");
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn indexing_a_number_fails() {
        let state = State::new();
        let err = state.index(&Value::from(1), &Value::from("x")).unwrap_err();
        assert_eq!(err.message, "attempt to index a number value");
    }

    #[test]
    fn tables_are_callable_through_call_metamethod() {
        fn called(state: &State) -> HostResult<usize> {
            // the table itself arrives as the first argument
            state.push(state.type_of(1) == Type::Table && state.to_integer(2) == Some(5));
            Ok(1)
        }

        let state = State::new();
        let t = state.new_table();
        let f = state.new_function("called", called, Vec::new());
        state.raw_set(t, Value::from("__call"), Value::Function(f)).unwrap();
        state.set_metatable(&Value::Table(t), Some(t)).unwrap();

        state.push(t);
        state.push(5);
        state.call(1, 1).unwrap();
        assert!(state.to_boolean(-1));
    }

    #[test]
    fn references_survive_collection() {
        let state = State::new();
        let t = state.new_table();
        state.push(t);
        let r = state.reference();
        assert_eq!(state.top(), 0);
        state.collect_garbage();
        assert_eq!(state.ref_value(r), Value::Table(t));

        state.unreference(r);
        state.collect_garbage();
        assert!(state.ref_value(r).is_nil());

        state.push_nil();
        assert_eq!(state.reference(), REF_NIL);
    }

    struct Probe(Rc<Cell<u32>>);

    impl Payload for Probe {}

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn collected_userdata_runs_its_finalizer_once() {
        let state = State::new();
        let drops = Rc::new(Cell::new(0));
        let u = state.new_userdata(Probe(drops.clone()), None);
        state.push(u);
        state.collect_garbage();
        assert_eq!(drops.get(), 0);

        state.pop(1);
        state.collect_garbage();
        state.collect_garbage();
        assert_eq!(drops.get(), 1);
    }

    struct Other;

    impl Payload for Other {}

    #[test]
    fn payloads_downcast_by_type() {
        let state = State::new();
        let drops = Rc::new(Cell::new(0));
        let u = Value::Userdata(state.new_userdata(Probe(drops), None));
        assert_eq!(state.with_payload(&u, |p: &Probe| p.0.get()), Some(0));
        assert_eq!(state.with_payload(&u, |_: &Other| ()), None);
        assert_eq!(state.with_payload(&Value::from(1), |_: &Probe| ()), None);
    }

    #[test]
    fn comparisons_mix_numbers_and_consult_metamethods() {
        fn always(state: &State) -> HostResult<usize> {
            state.push(true);
            Ok(1)
        }

        let state = State::new();
        assert!(state.compare_values(&Value::from(1), &Value::from(1.5), CompareOp::Lt).unwrap());
        assert!(state.compare_values(&Value::from("a"), &Value::from("b"), CompareOp::Le).unwrap());
        assert!(!state.compare_values(&Value::Number(f64::NAN), &Value::from(1), CompareOp::Lt).unwrap());
        assert!(state.compare_values(&Value::from(1), &Value::from("1"), CompareOp::Lt).is_err());

        let meta = state.new_table();
        let f = state.new_function("always", always, Vec::new());
        state.raw_set(meta, Value::from("__eq"), Value::Function(f)).unwrap();
        let a = Value::Table(state.new_table());
        let b = Value::Table(state.new_table());
        assert!(!state.compare_values(&a, &b, CompareOp::Eq).unwrap());
        state.set_metatable(&a, Some(meta)).unwrap();
        assert!(state.compare_values(&a, &b, CompareOp::Eq).unwrap());
    }

    #[test]
    fn stack_guard_restores_top() {
        let state = State::new();
        state.push(1);
        {
            let _guard = StackGuard::new(&state);
            state.push(2);
            state.push(3);
        }
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn stack_editing() {
        let state = State::new();
        for i in 1..=3 {
            state.push(i);
        }
        state.push(0);
        state.insert(1);
        assert_eq!(state.to_integer(1), Some(0));
        state.remove(1);
        state.push(9);
        state.replace(2);
        assert_eq!(state.to_integer(2), Some(9));
        assert_eq!(state.top(), 3);
        assert_eq!(state.abs_index(-1), 3);
        assert!(state.dump_stack().contains("2: 9 (number)"));
    }

    #[derive(Default)]
    struct Counter(Cell<u32>);

    #[test]
    fn extensions_are_per_state_singletons() {
        let state = State::new();
        state.extension::<Counter>().0.set(4);
        assert_eq!(state.extension::<Counter>().0.get(), 4);
        assert_eq!(State::new().extension::<Counter>().0.get(), 0);
    }
}
