//! Fluent registration of namespaces, functions and classes.
//!
//! # Example
//!
//! ```ignore
//! Namespace::global(&state)?
//!     .namespace("geometry")?
//!     .class::<Vec3>("Vec3")?
//!     .constructor(|x: f32, y: f32, z: f32| Vec3 { x, y, z })?
//!     .variable("x", field!(Vec3, x), Access::ReadWrite)?
//!     .const_method("length", |v: &Vec3| v.length())?
//!     .method("scale", |v: &mut Vec3, k: f32| v.scale(k))?
//!     .build()
//!     .function("dot", |a: Vec3, b: Vec3| a.dot(&b))?;
//! ```
//!
//! Registering a class creates three metadata nodes (mutable, const and
//! static facets) and binds the static facet's table under the class name.
//! Registering the same type again reopens the existing nodes.

use std::marker::PhantomData;
use std::rc::Rc;

use interlua_host::{NativeFn, State, Table, Value};
use parking_lot::Mutex;

use crate::bind::{
    Access, Callable, ConstMemberFn, ConstMethod, Field, MemberFn, Method, bind_const_member_fn,
    bind_const_method, bind_constructor, bind_field_getter, bind_field_setter, bind_function,
    bind_member_fn, bind_method, bind_variable_getter, bind_variable_setter,
};
use crate::class::{Class, Inherits, Upcast, erased_upcast};
use crate::error::RegistrationError;
use crate::handle::Ref;
use crate::key::ClassKeys;
use crate::marshal::{Get, Push};
use crate::node::{ClassRegistry, Member, MetaNode, NodeFlags, NodeParts};

type Result<T> = std::result::Result<T, RegistrationError>;

/// A script-visible table of functions, variables, classes and nested
/// namespaces.
#[derive(Clone)]
pub struct Namespace {
    state: State,
    table: Table,
    node: Rc<MetaNode>,
}

impl Namespace {
    /// The global table. Unknown names written by scripts become plain
    /// globals.
    pub fn global(state: &State) -> Result<Namespace> {
        let table = state.globals();
        if let Some(node) = MetaNode::of_table(state, table)? {
            return Ok(Namespace {
                state: state.clone(),
                table,
                node,
            });
        }
        let node = MetaNode::create(
            state,
            NodeParts {
                key: None,
                name: Rc::from("_G"),
                flags: NodeFlags::NAMESPACE | NodeFlags::OPEN,
                parent: None,
                upcast: None,
                const_node: None,
                metatable: state.new_table(),
            },
        )?;
        state.set_metatable(&Value::Table(table), Some(node.metatable()))?;
        Ok(Namespace {
            state: state.clone(),
            table,
            node,
        })
    }

    /// A namespace not bound to any name; hand it to scripts through
    /// [`to_ref`](Self::to_ref).
    pub fn new(state: &State) -> Result<Namespace> {
        Namespace::create(state, "")
    }

    fn create(state: &State, name: &str) -> Result<Namespace> {
        let table = state.new_table();
        let node = MetaNode::create(
            state,
            NodeParts {
                key: None,
                name: Rc::from(name),
                flags: NodeFlags::NAMESPACE,
                parent: None,
                upcast: None,
                const_node: None,
                metatable: table,
            },
        )?;
        state.set_metatable(&Value::Table(table), Some(table))?;
        Ok(Namespace {
            state: state.clone(),
            table,
            node,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn to_ref(&self) -> Ref {
        Ref::from_value(&self.state, Value::Table(self.table))
    }

    /// Open the child namespace `name`, creating it on first use.
    pub fn namespace(&self, name: &str) -> Result<Namespace> {
        let existing = self.state.raw_get(self.table, &Value::from(name))?;
        match existing {
            Value::Nil => {}
            Value::Table(table) => {
                if let Some(node) = MetaNode::of_table(&self.state, table)?
                    && node.flags().contains(NodeFlags::NAMESPACE)
                {
                    return Ok(Namespace {
                        state: self.state.clone(),
                        table,
                        node,
                    });
                }
                return Err(RegistrationError::NotANamespace { name: name.into() });
            }
            _ => return Err(RegistrationError::NotANamespace { name: name.into() }),
        }

        let child = Namespace::create(&self.state, name)?;
        self.state
            .raw_set(self.table, Value::from(name), Value::Table(child.table))?;
        tracing::debug!(target: "interlua::registry", parent = %self.node.name(), name, "opened namespace");
        Ok(child)
    }

    /// Register `T` under `name`.
    pub fn class<T: Class>(&self, name: &str) -> Result<ClassBuilder<T>> {
        ClassBuilder::open(self.clone(), name, None)
    }

    /// Register `T` under `name` as a subclass of the registered class `P`.
    pub fn derived_class<T, P>(&self, name: &str) -> Result<ClassBuilder<T>>
    where
        T: Inherits<P>,
        P: Class,
    {
        let base = ClassKeys::of::<P>();
        if !ClassRegistry::contains(&self.state, base.mutable) {
            return Err(RegistrationError::UnregisteredBase { class: name.into() });
        }
        ClassBuilder::open(self.clone(), name, Some((base, erased_upcast::<T, P> as Upcast)))
    }

    fn add(&self, name: &str, getter: Member, setter: Option<Member>) {
        self.node.set_getter(name, getter);
        if let Some(setter) = setter {
            self.node.set_setter(name, setter);
        }
        tracing::debug!(target: "interlua::registry", namespace = %self.node.name(), name, "registered member");
    }

    pub fn function<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Callable<Args, R>,
        Args: 'static,
        R: 'static,
    {
        let f = bind_function(&self.state, name, f);
        self.add(name, Member::Method(f), None);
        Ok(self)
    }

    /// A raw function working on the stack directly.
    pub fn cfunction(self, name: &str, f: NativeFn) -> Result<Self> {
        let f = self.state.new_function(name, f, Vec::new());
        self.add(name, Member::Method(f), None);
        Ok(self)
    }

    /// Expose a native static variable.
    pub fn variable<U>(self, name: &str, cell: &'static Mutex<U>, access: Access) -> Result<Self>
    where
        U: Clone + Push + Get + 'static,
    {
        let getter = bind_variable_getter(&self.state, name, cell);
        let setter = match access {
            Access::ReadWrite => Member::Setter(bind_variable_setter(&self.state, name, cell)),
            Access::ReadOnly => Member::ReadOnly,
        };
        self.add(name, Member::Getter(getter), Some(setter));
        Ok(self)
    }

    /// An attribute backed by a getter and a setter function.
    pub fn property<G, S, U>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        G: Callable<(), U>,
        S: Callable<(U,), ()>,
        U: 'static,
    {
        let getter = bind_function(&self.state, name, get);
        let setter = bind_function(&self.state, name, set);
        self.add(name, Member::Getter(getter), Some(Member::Setter(setter)));
        Ok(self)
    }

    pub fn property_readonly<G, U>(self, name: &str, get: G) -> Result<Self>
    where
        G: Callable<(), U>,
        U: 'static,
    {
        let getter = bind_function(&self.state, name, get);
        self.add(name, Member::Getter(getter), Some(Member::ReadOnly));
        Ok(self)
    }
}

/// Registration of one class; created by [`Namespace::class`] or
/// [`Namespace::derived_class`].
pub struct ClassBuilder<T: Class> {
    namespace: Namespace,
    name: Rc<str>,
    mutable: Rc<MetaNode>,
    constant: Rc<MetaNode>,
    statics: Rc<MetaNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Class> ClassBuilder<T> {
    fn open(namespace: Namespace, name: &str, base: Option<(ClassKeys, Upcast)>) -> Result<Self> {
        let state = namespace.state.clone();
        let keys = ClassKeys::of::<T>();

        let existing = (
            ClassRegistry::lookup(&state, keys.mutable),
            ClassRegistry::lookup(&state, keys.constant),
            ClassRegistry::lookup(&state, keys.statics),
        );
        let (mutable, constant, statics) = match existing {
            (Some(mutable), Some(constant), Some(statics)) => {
                tracing::debug!(target: "interlua::registry", class = name, "reopened class");
                (mutable, constant, statics)
            }
            _ => {
                let parents = base.map(|(keys, upcast)| {
                    (
                        ClassRegistry::lookup(&state, keys.mutable),
                        ClassRegistry::lookup(&state, keys.constant),
                        ClassRegistry::lookup(&state, keys.statics),
                        upcast,
                    )
                });
                let (parent_mut, parent_const, parent_static, upcast) = match parents {
                    Some((m, c, s, u)) => (m, c, s, Some(u)),
                    None => (None, None, None, None),
                };

                let constant = MetaNode::create(
                    &state,
                    NodeParts {
                        key: Some(keys.constant),
                        name: Rc::from(format!("const {name}")),
                        flags: NodeFlags::CONST,
                        parent: parent_const,
                        upcast,
                        const_node: None,
                        metatable: state.new_table(),
                    },
                )?;
                let mutable = MetaNode::create(
                    &state,
                    NodeParts {
                        key: Some(keys.mutable),
                        name: Rc::from(name),
                        flags: NodeFlags::empty(),
                        parent: parent_mut,
                        upcast,
                        const_node: Some(constant.clone()),
                        metatable: state.new_table(),
                    },
                )?;
                let static_table = state.new_table();
                let statics = MetaNode::create(
                    &state,
                    NodeParts {
                        key: Some(keys.statics),
                        name: Rc::from(name),
                        flags: NodeFlags::STATIC,
                        parent: parent_static,
                        upcast: None,
                        const_node: None,
                        metatable: static_table,
                    },
                )?;
                state.set_metatable(&Value::Table(static_table), Some(static_table))?;

                ClassRegistry::insert(&state, constant.clone())?;
                ClassRegistry::insert(&state, mutable.clone())?;
                ClassRegistry::insert(&state, statics.clone())?;
                tracing::debug!(
                    target: "interlua::registry",
                    class = name,
                    derived = mutable.parent().is_some(),
                    "registered class"
                );
                (mutable, constant, statics)
            }
        };

        state.raw_set(
            namespace.table,
            Value::from(name),
            Value::Table(statics.metatable()),
        )?;
        Ok(ClassBuilder {
            namespace,
            name: Rc::from(name),
            mutable,
            constant,
            statics,
            _marker: PhantomData,
        })
    }

    fn state(&self) -> &State {
        &self.namespace.state
    }

    /// Finish the class and continue with the enclosing namespace.
    pub fn build(self) -> Namespace {
        self.namespace
    }

    /// The constructor scripts invoke by calling the class table.
    pub fn constructor<F, Args>(self, f: F) -> Result<Self>
    where
        F: Callable<Args, T>,
        Args: 'static,
    {
        let ctor = bind_constructor(self.state(), &self.name, f);
        self.state().raw_set(
            self.statics.metatable(),
            Value::from("__call"),
            Value::Function(ctor),
        )?;
        Ok(self)
    }

    /// A method reachable only from mutable instances.
    pub fn method<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Method<T, Args, R>,
        Args: 'static,
        R: 'static,
    {
        let f = bind_method(self.state(), name, f);
        self.mutable.set_getter(name, Member::Method(f));
        Ok(self)
    }

    /// A method reachable from both mutable and const instances.
    pub fn const_method<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: ConstMethod<T, Args, R>,
        Args: 'static,
        R: 'static,
    {
        let f = bind_const_method(self.state(), name, f);
        self.mutable.set_getter(name, Member::Method(f));
        self.constant.set_getter(name, Member::Method(f));
        Ok(self)
    }

    /// A raw member function; arguments after the object start at index 2.
    pub fn cfunction(self, name: &str, f: MemberFn<T>) -> Result<Self> {
        let f = bind_member_fn(self.state(), name, f);
        self.mutable.set_getter(name, Member::Method(f));
        Ok(self)
    }

    /// A raw member function reachable from const instances as well.
    pub fn const_cfunction(self, name: &str, f: ConstMemberFn<T>) -> Result<Self> {
        let f = bind_const_member_fn(self.state(), name, f);
        self.mutable.set_getter(name, Member::Method(f));
        self.constant.set_getter(name, Member::Method(f));
        Ok(self)
    }

    fn add_attribute(&self, name: &str, getter: Member, setter: Option<Member>) {
        self.mutable.set_getter(name, getter.clone());
        self.constant.set_getter(name, getter);
        match setter {
            Some(setter) => {
                self.mutable.set_setter(name, setter);
                self.constant.set_setter(name, Member::ConstReadOnly);
            }
            None => {
                self.mutable.set_setter(name, Member::ReadOnly);
                self.constant.set_setter(name, Member::ReadOnly);
            }
        }
    }

    /// Expose a field. Const instances can read it but never write it.
    pub fn variable<U>(self, name: &str, field: Field<T, U>, access: Access) -> Result<Self>
    where
        U: Clone + Push + Get + 'static,
    {
        let getter = bind_field_getter(self.state(), name, field);
        let setter = match access {
            Access::ReadWrite => Some(Member::Setter(bind_field_setter(self.state(), name, field))),
            Access::ReadOnly => None,
        };
        self.add_attribute(name, Member::Getter(getter), setter);
        Ok(self)
    }

    /// An attribute computed by a getter and stored by a setter.
    pub fn property<G, S, U>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        G: ConstMethod<T, (), U>,
        S: Method<T, (U,), ()>,
        U: 'static,
    {
        let getter = bind_const_method(self.state(), name, get);
        let setter = bind_method(self.state(), name, set);
        self.add_attribute(name, Member::Getter(getter), Some(Member::Setter(setter)));
        Ok(self)
    }

    pub fn property_readonly<G, U>(self, name: &str, get: G) -> Result<Self>
    where
        G: ConstMethod<T, (), U>,
        U: 'static,
    {
        let getter = bind_const_method(self.state(), name, get);
        self.add_attribute(name, Member::Getter(getter), None);
        Ok(self)
    }

    pub fn static_function<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Callable<Args, R>,
        Args: 'static,
        R: 'static,
    {
        let f = bind_function(self.state(), name, f);
        self.statics.set_getter(name, Member::Method(f));
        Ok(self)
    }

    pub fn static_cfunction(self, name: &str, f: NativeFn) -> Result<Self> {
        let f = self.state().new_function(name, f, Vec::new());
        self.statics.set_getter(name, Member::Method(f));
        Ok(self)
    }

    pub fn static_variable<U>(self, name: &str, cell: &'static Mutex<U>, access: Access) -> Result<Self>
    where
        U: Clone + Push + Get + 'static,
    {
        let getter = bind_variable_getter(self.state(), name, cell);
        let setter = match access {
            Access::ReadWrite => Member::Setter(bind_variable_setter(self.state(), name, cell)),
            Access::ReadOnly => Member::ReadOnly,
        };
        self.statics.set_getter(name, Member::Getter(getter));
        self.statics.set_setter(name, setter);
        Ok(self)
    }

    pub fn static_property<G, S, U>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        G: Callable<(), U>,
        S: Callable<(U,), ()>,
        U: 'static,
    {
        let getter = bind_function(self.state(), name, get);
        let setter = bind_function(self.state(), name, set);
        self.statics.set_getter(name, Member::Getter(getter));
        self.statics.set_setter(name, Member::Setter(setter));
        Ok(self)
    }

    pub fn static_property_readonly<G, U>(self, name: &str, get: G) -> Result<Self>
    where
        G: Callable<(), U>,
        U: 'static,
    {
        let getter = bind_function(self.state(), name, get);
        self.statics.set_getter(name, Member::Getter(getter));
        self.statics.set_setter(name, Member::ReadOnly);
        Ok(self)
    }
}
