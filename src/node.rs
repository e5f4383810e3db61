//! Class metadata nodes and the per-runtime class registry.
//!
//! A [`MetaNode`] exists for every registered (class, facet) pair and for
//! every namespace. It owns the get-table and set-table that the dispatch
//! hooks consult, plus the parent link used for inherited lookups. Each
//! node is anchored in the runtime through a userdata stored in its own
//! metatable, so the functions it refers to stay reachable.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use interlua_host::{Function, HostError, HostResult, Payload, State, Table, Tracer, Value};
use rustc_hash::FxHashMap;

use crate::class::Upcast;
use crate::dispatch::{index_hook, newindex_hook};
use crate::key::ClassKey;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// Const facet of a class.
        const CONST = 1 << 0;
        /// Static facet of a class.
        const STATIC = 1 << 1;
        const NAMESPACE = 1 << 2;
        /// Writes to unknown names become raw fields.
        const OPEN = 1 << 3;
    }
}

/// Entry of a get-table or set-table.
#[derive(Debug, Clone)]
pub enum Member {
    /// Returned as is when read.
    Method(Function),
    /// Called when read; its result is the attribute value.
    Getter(Function),
    /// Called with the new value when written.
    Setter(Function),
    /// Writes always fail.
    ReadOnly,
    /// Writes fail because the object was reached through a const alias.
    ConstReadOnly,
}

/// Metadata for one class facet or namespace.
pub struct MetaNode {
    key: Option<ClassKey>,
    name: Rc<str>,
    flags: NodeFlags,
    parent: Option<Rc<MetaNode>>,
    upcast: Option<Upcast>,
    const_node: Option<Rc<MetaNode>>,
    metatable: Table,
    getters: RefCell<FxHashMap<Rc<str>, Member>>,
    setters: RefCell<FxHashMap<Rc<str>, Member>>,
}

/// Construction parameters for [`MetaNode::create`].
pub(crate) struct NodeParts {
    pub key: Option<ClassKey>,
    pub name: Rc<str>,
    pub flags: NodeFlags,
    pub parent: Option<Rc<MetaNode>>,
    pub upcast: Option<Upcast>,
    pub const_node: Option<Rc<MetaNode>>,
    /// For static facets and namespaces this is usually the script-visible
    /// table itself; the caller attaches it.
    pub metatable: Table,
}

impl MetaNode {
    /// Build a node and install the dispatch hooks into its metatable.
    ///
    /// The metatable is not attached to anything here.
    pub(crate) fn create(state: &State, parts: NodeParts) -> HostResult<Rc<MetaNode>> {
        let node = Rc::new(MetaNode {
            key: parts.key,
            name: parts.name,
            flags: parts.flags,
            parent: parts.parent,
            upcast: parts.upcast,
            const_node: parts.const_node,
            metatable: parts.metatable,
            getters: RefCell::new(FxHashMap::default()),
            setters: RefCell::new(FxHashMap::default()),
        });

        let mt = node.metatable;
        let anchor = Value::Userdata(state.new_userdata(NodeHandle(node.clone()), None));
        let index = state.new_function("__index", index_hook, vec![anchor.clone()]);
        let newindex = state.new_function("__newindex", newindex_hook, vec![anchor.clone()]);
        state.raw_set(mt, Value::from("__node"), anchor)?;
        state.raw_set(mt, Value::from("__index"), Value::Function(index))?;
        state.raw_set(mt, Value::from("__newindex"), Value::Function(newindex))?;
        Ok(node)
    }

    /// The node anchored in a table's metatable, if any.
    pub(crate) fn of_table(state: &State, table: Table) -> HostResult<Option<Rc<MetaNode>>> {
        let Some(mt) = state.metatable(&Value::Table(table)) else {
            return Ok(None);
        };
        let anchor = state.raw_get(mt, &Value::from("__node"))?;
        Ok(state.with_payload(&anchor, |h: &NodeHandle| h.0.clone()))
    }

    pub fn key(&self) -> Option<ClassKey> {
        self.key
    }

    /// The name scripts see in `__type`, e.g. `Vec3` or `const Vec3`.
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn parent(&self) -> Option<&Rc<MetaNode>> {
        self.parent.as_ref()
    }

    pub(crate) fn upcast(&self) -> Option<Upcast> {
        self.upcast
    }

    /// Const facet of a mutable class node.
    pub(crate) fn const_node(&self) -> Option<&Rc<MetaNode>> {
        self.const_node.as_ref()
    }

    pub fn metatable(&self) -> Table {
        self.metatable
    }

    /// Instance facets pass the object to getters and setters.
    pub fn is_instance(&self) -> bool {
        !self.flags.intersects(NodeFlags::STATIC | NodeFlags::NAMESPACE)
    }

    pub(crate) fn set_getter(&self, name: &str, member: Member) {
        self.getters.borrow_mut().insert(Rc::from(name), member);
    }

    pub(crate) fn set_setter(&self, name: &str, member: Member) {
        self.setters.borrow_mut().insert(Rc::from(name), member);
    }

    /// Walk this node and its ancestors for a readable attribute.
    pub fn find_getter(&self, name: &str) -> Option<Member> {
        let mut node = Some(self);
        while let Some(current) = node {
            if let Some(member) = current.getters.borrow().get(name) {
                return Some(member.clone());
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Walk this node and its ancestors for a writable attribute.
    pub fn find_setter(&self, name: &str) -> Option<Member> {
        let mut node = Some(self);
        while let Some(current) = node {
            if let Some(member) = current.setters.borrow().get(name) {
                return Some(member.clone());
            }
            node = current.parent.as_deref();
        }
        None
    }

    fn trace_members(&self, tracer: &mut Tracer) {
        let tables = [&self.getters, &self.setters];
        for table in tables {
            for member in table.borrow().values() {
                match member {
                    Member::Method(f) | Member::Getter(f) | Member::Setter(f) => {
                        tracer.mark(&Value::Function(*f));
                    }
                    Member::ReadOnly | Member::ConstReadOnly => {}
                }
            }
        }
    }
}

impl fmt::Debug for MetaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaNode")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .field("getters", &self.getters.borrow().len())
            .field("setters", &self.setters.borrow().len())
            .finish()
    }
}

/// Userdata anchoring a node inside the runtime.
pub(crate) struct NodeHandle(pub(crate) Rc<MetaNode>);

impl Payload for NodeHandle {
    fn trace(&self, tracer: &mut Tracer) {
        self.0.trace_members(tracer);
    }
}

/// The node carried by the running hook's first upvalue.
pub(crate) fn hook_node(state: &State) -> HostResult<Rc<MetaNode>> {
    state
        .with_payload(&state.upvalue(1), |h: &NodeHandle| h.0.clone())
        .ok_or_else(|| HostError::runtime("dispatch hook lost its class node"))
}

// ============================================================================
// Class registry
// ============================================================================

/// Side table mapping class keys to metadata nodes, one per runtime.
///
/// The metatable of each node is also stored in the runtime's registry
/// under the key, which keeps the node reachable for the collector.
#[derive(Default)]
pub struct ClassRegistry {
    nodes: RefCell<FxHashMap<ClassKey, Rc<MetaNode>>>,
}

impl ClassRegistry {
    pub fn lookup(state: &State, key: ClassKey) -> Option<Rc<MetaNode>> {
        state.extension::<ClassRegistry>().nodes.borrow().get(&key).cloned()
    }

    pub fn contains(state: &State, key: ClassKey) -> bool {
        state.extension::<ClassRegistry>().nodes.borrow().contains_key(&key)
    }

    pub(crate) fn insert(state: &State, node: Rc<MetaNode>) -> HostResult<()> {
        let Some(key) = node.key else {
            return Ok(());
        };
        state.raw_set(
            state.registry(),
            key.to_value(),
            Value::Table(node.metatable),
        )?;
        state
            .extension::<ClassRegistry>()
            .nodes
            .borrow_mut()
            .insert(key, node);
        Ok(())
    }
}
