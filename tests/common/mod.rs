//! Shared fixtures for the integration tests.
//!
//! Native functions registered with `cfunction` stand in for script code:
//! they drive the runtime through the same stack operations a script would.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use interlua::prelude::*;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test output; filter with `RUST_LOG`, e.g.
/// `RUST_LOG=interlua::registry=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Class for Vec3 {}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn scale(&mut self, k: f32) {
        self.x *= k;
        self.y *= k;
        self.z *= k;
    }

    pub fn dot(&self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

/// Registers `Vec3` in the global namespace.
pub fn register_vec3(state: &State) -> Result<Namespace, RegistrationError> {
    Ok(Namespace::global(state)?
        .class::<Vec3>("Vec3")?
        .constructor(Vec3::new)?
        .variable("x", field!(Vec3, x), Access::ReadWrite)?
        .variable("y", field!(Vec3, y), Access::ReadWrite)?
        .variable("z", field!(Vec3, z), Access::ReadWrite)?
        .const_method("length", Vec3::length)?
        .const_method("dot", Vec3::dot)?
        .method("scale", Vec3::scale)?
        .build())
}

/// Counts drops and clones of instances created from it.
#[derive(Debug, Default)]
pub struct Counters {
    pub drops: Cell<u32>,
    pub clones: Cell<u32>,
}

pub struct Tracked {
    pub value: i32,
    pub counters: Rc<Counters>,
}

impl Class for Tracked {}

impl Tracked {
    pub fn new(value: i32, counters: &Rc<Counters>) -> Self {
        Self {
            value,
            counters: counters.clone(),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        self.counters.clones.set(self.counters.clones.get() + 1);
        Self {
            value: self.value,
            counters: self.counters.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.drops.set(self.counters.drops.get() + 1);
    }
}

pub fn register_tracked(state: &State) -> Result<Namespace, RegistrationError> {
    Ok(Namespace::global(state)?
        .class::<Tracked>("Tracked")?
        .variable("value", field!(Tracked, value), Access::ReadWrite)?
        .build())
}

/// Assign `obj[key] = value` the way a script statement would.
pub fn assign(obj: &Ref, key: &str, value: impl Push) -> HostResult<()> {
    obj.index(key).set(value)
}
