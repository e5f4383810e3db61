//! Free functions, namespaces, variables and properties.

mod common;

use common::assign;
use interlua::prelude::*;
use parking_lot::Mutex;

fn sum_all(state: &State) -> HostResult<usize> {
    let mut total = 0;
    for idx in 1..=state.top() {
        total += state.check_integer(idx)?;
    }
    state.push(total);
    Ok(1)
}

fn divmod(a: i64, b: i64) -> (i64, i64) {
    (a.div_euclid(b), a.rem_euclid(b))
}

fn greet(name: Option<String>) -> String {
    format!("hello {}", name.as_deref().unwrap_or("stranger"))
}

fn setup() -> State {
    let state = State::new();
    Namespace::global(&state)
        .unwrap()
        .function("greet", greet)
        .unwrap()
        .namespace("math")
        .unwrap()
        .function("add", |a: i64, b: i64| a + b)
        .unwrap()
        .function("divmod", divmod)
        .unwrap()
        .function("byte", |b: u8| b)
        .unwrap()
        .function("initial", |c: char| c.to_ascii_uppercase())
        .unwrap()
        .cfunction("sum", sum_all)
        .unwrap();
    state
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn namespaced_functions_are_callable() {
    let state = setup();
    let math = Ref::global(&state, "math");
    assert!(math.is_table());
    assert_eq!(math.index("add").call((40, 2)).get::<i64>(), 42);
    assert_eq!(math.index("initial").call(("q",)).get::<char>(), 'Q');
}

#[test]
fn tuples_return_several_values() {
    let state = setup();
    let divmod = Ref::global(&state, "math").index("divmod");
    state.push(divmod.value());
    state.push(-7);
    state.push(2);
    state.call(2, 2).unwrap();
    assert_eq!(state.to_integer(-2), Some(-4));
    assert_eq!(state.to_integer(-1), Some(1));
    state.pop(2);
}

#[test]
fn missing_optional_arguments_read_as_none() {
    let state = setup();
    let greet = Ref::global(&state, "greet");
    assert_eq!(greet.call(()).get::<String>(), "hello stranger");
    assert_eq!(greet.call(("Ada",)).get::<String>(), "hello Ada");
    assert_eq!(greet.call((None::<String>,)).get::<String>(), "hello stranger");
}

#[test]
fn raw_functions_work_on_the_stack() {
    let state = setup();
    let sum = Ref::global(&state, "math").index("sum");
    assert_eq!(sum.call((1, 2, 3, 4)).get::<i64>(), 10);
    assert_eq!(sum.call(()).get::<i64>(), 0);
}

#[test]
fn argument_errors_carry_position_and_name() {
    let state = setup();
    let math = Ref::global(&state, "math");

    let mut err = Error::verbose();
    let result = math.index("add").call((1, "two", &mut err));
    assert!(result.is_nil());
    assert_eq!(err.kind(), Some(ErrorKind::Runtime));
    assert_eq!(
        err.what(),
        "bad argument #2 to 'add' (number expected, got string)"
    );

    let mut err = Error::verbose();
    math.index("byte").call((300, &mut err));
    assert_eq!(
        err.what(),
        "bad argument #1 to 'byte' (number 300 out of range for u8)"
    );

    let mut err = Error::verbose();
    math.index("initial").call(("no", &mut err));
    assert!(err.what().starts_with("bad argument #1 to 'initial'"));
}

#[test]
fn numeric_strings_are_accepted_as_numbers() {
    let state = setup();
    let add = Ref::global(&state, "math").index("add");
    assert_eq!(add.call(("40", 2)).get::<i64>(), 42);
}

// ============================================================================
// Namespaces
// ============================================================================

#[test]
fn namespaces_reopen_without_losing_members() {
    let state = setup();
    Namespace::global(&state)
        .unwrap()
        .namespace("math")
        .unwrap()
        .function("neg", |a: i64| -a)
        .unwrap();

    let math = Ref::global(&state, "math");
    assert_eq!(math.index("neg").call((5,)).get::<i64>(), -5);
    assert_eq!(math.index("add").call((1, 1)).get::<i64>(), 2);
}

#[test]
fn nested_namespaces_chain() {
    let state = State::new();
    Namespace::global(&state)
        .unwrap()
        .namespace("outer")
        .unwrap()
        .namespace("inner")
        .unwrap()
        .function("answer", || 42_i32)
        .unwrap();

    let answer = Ref::global(&state, "outer").index("inner").index("answer");
    assert!(answer.is_function());
    assert_eq!(answer.call(()).get::<i32>(), 42);
}

#[test]
fn the_global_namespace_accepts_new_names() {
    let state = setup();
    let mut free = Ref::global(&state, "free");
    free.set(7).unwrap();
    assert_eq!(state.global("free").unwrap(), Value::from(7));
    assert_eq!(Ref::global(&state, "free").get::<i32>(), 7);
}

#[test]
fn named_namespaces_reject_unknown_writes() {
    let state = setup();
    let math = Ref::global(&state, "math");
    let err = assign(&math, "half", 0.5).unwrap_err();
    assert_eq!(err.message, "no writable attribute named 'half'");
    let err = assign(&math, "add", 0).unwrap_err();
    assert_eq!(err.message, "no writable attribute named 'add'");
}

#[test]
fn anonymous_namespaces_bind_through_handles() {
    let state = State::new();
    let tools = Namespace::new(&state)
        .unwrap()
        .function("twice", |x: i32| x * 2)
        .unwrap();
    Ref::global(&state, "tools").set(tools.to_ref()).unwrap();

    let twice = Ref::global(&state, "tools").index("twice");
    assert_eq!(twice.call((21,)).get::<i32>(), 42);
}

// ============================================================================
// Variables and properties
// ============================================================================

static LIMIT: Mutex<i64> = Mutex::new(10);
static VERSION: Mutex<u32> = Mutex::new(3);
static LEVEL: Mutex<f64> = Mutex::new(0.5);

#[test]
fn variables_read_and_write_native_statics() {
    let state = State::new();
    Namespace::global(&state)
        .unwrap()
        .namespace("config")
        .unwrap()
        .variable("limit", &LIMIT, Access::ReadWrite)
        .unwrap()
        .variable("version", &VERSION, Access::ReadOnly)
        .unwrap();

    let config = Ref::global(&state, "config");
    assert_eq!(config.index("limit").get::<i64>(), 10);
    assign(&config, "limit", 25).unwrap();
    assert_eq!(*LIMIT.lock(), 25);
    assert_eq!(config.index("limit").get::<i64>(), 25);

    let err = assign(&config, "version", 4).unwrap_err();
    assert_eq!(err.message, "'version' is read-only");
    assert_eq!(*VERSION.lock(), 3);
    assert_eq!(config.index("version").get::<u32>(), 3);
}

#[test]
fn properties_call_their_accessors() {
    let state = State::new();
    Namespace::global(&state)
        .unwrap()
        .namespace("audio")
        .unwrap()
        .property("level", || *LEVEL.lock(), |v: f64| *LEVEL.lock() = v.clamp(0.0, 1.0))
        .unwrap()
        .property_readonly("channels", || 2_u8)
        .unwrap();

    let audio = Ref::global(&state, "audio");
    assert_eq!(audio.index("level").get::<f64>(), 0.5);
    assign(&audio, "level", 4.0).unwrap();
    assert_eq!(audio.index("level").get::<f64>(), 1.0);

    assert_eq!(audio.index("channels").get::<i32>(), 2);
    let err = assign(&audio, "channels", 6).unwrap_err();
    assert_eq!(err.message, "'channels' is read-only");
}

#[test]
fn failing_setters_surface_their_argument_errors() {
    let state = State::new();
    Namespace::global(&state)
        .unwrap()
        .namespace("limits")
        .unwrap()
        .variable("limit", &LIMIT, Access::ReadWrite)
        .unwrap();

    let limits = Ref::global(&state, "limits");
    let err = assign(&limits, "limit", "lots").unwrap_err();
    assert_eq!(
        err.message,
        "bad argument #1 to 'limit' (number expected, got string)"
    );
}
