//! Benchmarks for calls and attribute access across the binding layer.
//!
//! Each benchmark drives the runtime from native code through [`Ref`], so
//! the numbers include argument checks, dispatch hooks and marshaling.
//!
//! ```bash
//! cargo bench --bench binding_benchmarks
//! cargo bench --features profiling --bench binding_benchmarks
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use interlua::prelude::*;
use parking_lot::Mutex;
use std::hint::black_box;

#[derive(Clone, Copy)]
struct Vec3 {
    x: f32,
    y: f32,
    z: f32,
}

impl Class for Vec3 {}

#[derive(Clone)]
struct Entity {
    id: u32,
}

#[derive(Clone)]
struct Player {
    score: i64,
    entity: Entity,
}

impl Class for Entity {}
impl Class for Player {}
inherits!(Player => Entity, entity);

static TICKS: Mutex<i64> = Mutex::new(0);

fn setup() -> State {
    let state = State::new();
    Namespace::global(&state)
        .and_then(|ns| {
            Ok(ns
                .class::<Vec3>("Vec3")?
                .constructor(|x: f32, y: f32, z: f32| Vec3 { x, y, z })?
                .variable("x", field!(Vec3, x), Access::ReadWrite)?
                .const_method("length", |v: &Vec3| {
                    (v.x * v.x + v.y * v.y + v.z * v.z).sqrt()
                })?
                .method("scale", |v: &mut Vec3, k: f32| {
                    v.x *= k;
                    v.y *= k;
                    v.z *= k;
                })?
                .build()
                .class::<Entity>("Entity")?
                .const_method("id", |e: &Entity| e.id)?
                .build()
                .derived_class::<Player, Entity>("Player")?
                .constructor(|id: u32| Player {
                    score: 0,
                    entity: Entity { id },
                })?
                .variable("score", field!(Player, score), Access::ReadWrite)?
                .build()
                .function("add", |a: i64, b: i64| a + b)?
                .variable("ticks", &TICKS, Access::ReadWrite)?)
        })
        .expect("registration succeeds");
    state
}

fn bench_calls(c: &mut Criterion) {
    let state = setup();
    let mut group = c.benchmark_group("binding/calls");

    let add = Ref::global(&state, "add");
    group.bench_function("free_function", |b| {
        b.iter(|| black_box(add.call((black_box(20), 22)).get::<i64>()));
    });

    let v = Ref::global(&state, "Vec3").call((1.0, 2.0, 2.0));
    let length = v.index("length").value();
    let length = Ref::from_value(&state, length);
    group.bench_function("const_method", |b| {
        b.iter(|| black_box(length.call((&v,)).get::<f32>()));
    });

    let scale = Ref::from_value(&state, v.index("scale").value());
    group.bench_function("mutable_method", |b| {
        b.iter(|| scale.call((&v, black_box(1.0))));
    });

    let player = Ref::global(&state, "Player").call((7,));
    let id = Ref::from_value(&state, player.index("id").value());
    group.bench_function("derived_as_base", |b| {
        b.iter(|| black_box(id.call((&player,)).get::<u32>()));
    });

    group.bench_function("constructor", |b| {
        let class = Ref::global(&state, "Vec3");
        b.iter(|| black_box(class.call((1.0, 2.0, 3.0))));
    });

    group.finish();
}

fn bench_attributes(c: &mut Criterion) {
    let state = setup();
    let mut group = c.benchmark_group("binding/attributes");

    let v = Ref::global(&state, "Vec3").call((1.0, 2.0, 2.0));
    group.bench_function("field_get", |b| {
        b.iter(|| black_box(v.index("x").get::<f32>()));
    });
    group.bench_function("field_set", |b| {
        b.iter(|| v.index("x").set(black_box(4.0)));
    });

    let player = Ref::global(&state, "Player").call((7,));
    group.bench_function("derived_field_get", |b| {
        b.iter(|| black_box(player.index("score").get::<i64>()));
    });

    let ticks = Ref::global(&state, "ticks");
    group.bench_function("variable_get", |b| {
        b.iter(|| black_box(ticks.get::<i64>()));
    });
    group.bench_function("variable_set", |b| {
        let mut ticks = Ref::global(&state, "ticks");
        b.iter(|| ticks.set(black_box(1)));
    });

    group.finish();
}

criterion_group!(benches, bench_calls, bench_attributes);
criterion_main!(benches);
