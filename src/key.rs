//! Class identity keys.
//!
//! Every native type gets three keys, one per [`Facet`]. Keys are interned
//! process-wide on first use and never released, so a key stays valid for
//! any runtime created later and two types never share one.

use std::any::{TypeId, type_name};
use std::fmt;

use interlua_host::Value;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// One of the three registrations a class has in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Facet {
    /// Instances that may be mutated.
    Mutable,
    /// Instances reached through a const alias.
    Const,
    /// The class table itself: constructor and static members.
    Static,
}

/// Stable identity of a (type, facet) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey(usize);

lazy_static! {
    static ref KEYS: Mutex<FxHashMap<(TypeId, Facet), ClassKey>> =
        Mutex::new(FxHashMap::default());
}

impl ClassKey {
    /// Key of `T` for `facet`, allocated on first request.
    pub fn of<T: ?Sized + 'static>(facet: Facet) -> ClassKey {
        let mut keys = KEYS.lock();
        let next = ClassKey(keys.len() + 1);
        *keys.entry((TypeId::of::<T>(), facet)).or_insert_with(|| {
            tracing::trace!(
                target: "interlua::registry",
                ty = type_name::<T>(),
                ?facet,
                key = next.0,
                "allocated class key"
            );
            next
        })
    }

    /// The key as a light userdata value, usable as a runtime table key.
    pub fn to_value(self) -> Value {
        Value::LightUserdata(self.0)
    }
}

impl fmt::Debug for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassKey({:#x})", self.0)
    }
}

/// The three keys of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassKeys {
    pub mutable: ClassKey,
    pub constant: ClassKey,
    pub statics: ClassKey,
}

impl ClassKeys {
    pub fn of<T: ?Sized + 'static>() -> ClassKeys {
        ClassKeys {
            mutable: ClassKey::of::<T>(Facet::Mutable),
            constant: ClassKey::of::<T>(Facet::Const),
            statics: ClassKey::of::<T>(Facet::Static),
        }
    }

    pub fn get(&self, facet: Facet) -> ClassKey {
        match facet {
            Facet::Mutable => self.mutable,
            Facet::Const => self.constant,
            Facet::Static => self.statics,
        }
    }
}
