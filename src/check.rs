//! Identity and constness checks for class-typed values.
//!
//! Checks run in a fixed order: the expected class must be registered, the
//! value must be a userdata, the userdata must be one of our envelopes, a
//! const envelope must be acceptable, and finally the envelope's class must
//! be the expected one or derive from it. Walking to a parent applies the
//! upcast recorded on the child, so the returned pointer always addresses
//! the expected type.

use std::ptr::NonNull;

use interlua_host::{HostResult, State, Value};

use crate::class::Class;
use crate::envelope::inspect;
use crate::error::{CheckError, Error};
use crate::key::{ClassKey, ClassKeys};
use crate::node::ClassRegistry;

/// Checked pointer to the object at `idx`, or a description of why the
/// value is not usable as the expected class.
pub fn try_userdata(
    state: &State,
    idx: i32,
    expected: ClassKey,
    expected_const: ClassKey,
    allow_const: bool,
) -> Result<NonNull<()>, CheckError> {
    #[cfg(feature = "profiling")]
    profiling::function_scope!();

    let Some(expected_node) = ClassRegistry::lookup(state, expected) else {
        return Err(CheckError::UnregisteredClass);
    };

    let value = state.value(idx);
    if !matches!(value, Value::Userdata(_)) {
        return Err(CheckError::NotAnObject {
            expected: expected_node.name().clone(),
            got: value.type_name(),
        });
    }

    let Some(envelope) = inspect(state, &value) else {
        return Err(CheckError::ForeignObject {
            expected: expected_node.name().clone(),
        });
    };

    if envelope.constant && !allow_const {
        return Err(CheckError::ConstViolation {
            expected: expected_node.name().clone(),
            got: envelope.node.name().clone(),
        });
    }

    let target = if envelope.constant { expected_const } else { expected };
    let mut ptr = envelope.ptr;
    let mut node = Some(&envelope.node);
    while let Some(current) = node {
        if current.key() == Some(target) {
            return Ok(ptr);
        }
        if let Some(upcast) = current.upcast() {
            ptr = upcast(ptr);
        }
        node = current.parent();
    }

    let expected_name = ClassRegistry::lookup(state, target)
        .map_or_else(|| expected_node.name().clone(), |n| n.name().clone());
    Err(CheckError::ClassMismatch {
        expected: expected_name,
        got: envelope.node.name().clone(),
    })
}

/// [`try_userdata`] reporting through an error sink.
pub fn get_userdata(
    state: &State,
    idx: i32,
    expected: ClassKey,
    expected_const: ClassKey,
    allow_const: bool,
    err: &mut Error,
) -> Option<NonNull<()>> {
    match try_userdata(state, idx, expected, expected_const, allow_const) {
        Ok(ptr) => Some(ptr),
        Err(e) => {
            tracing::trace!(target: "interlua::check", idx, error = %e, "class check failed");
            err.fail(e);
            None
        }
    }
}

/// Typed form of [`get_userdata`].
pub fn get_object<T: Class>(
    state: &State,
    idx: i32,
    allow_const: bool,
    err: &mut Error,
) -> Option<NonNull<T>> {
    let keys = ClassKeys::of::<T>();
    get_userdata(state, idx, keys.mutable, keys.constant, allow_const, err).map(NonNull::cast)
}

/// Typed check for argument `idx` of a bound function; failures become a
/// raised `bad argument` error.
pub(crate) fn object_arg<T: Class>(
    state: &State,
    idx: i32,
    allow_const: bool,
) -> HostResult<NonNull<T>> {
    let keys = ClassKeys::of::<T>();
    try_userdata(state, idx, keys.mutable, keys.constant, allow_const)
        .map(NonNull::cast)
        .map_err(|e| {
            tracing::trace!(target: "interlua::check", idx, error = %e, "argument check failed");
            state.arg_error(idx, e)
        })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::envelope::{make_const, push_owned};
    use crate::error::ErrorKind;
    use crate::inherits;
    use crate::node::{MetaNode, NodeFlags, NodeParts};

    struct Base {
        id: u32,
    }

    struct Derived {
        _tag: u64,
        base: Base,
    }

    struct Stranger;
    struct Missing;

    impl Class for Base {}
    impl Class for Derived {}
    impl Class for Stranger {}
    impl Class for Missing {}
    inherits!(Derived => Base, base);

    fn facet(
        state: &State,
        key: ClassKey,
        name: &str,
        flags: NodeFlags,
        parent: Option<Rc<MetaNode>>,
        const_node: Option<Rc<MetaNode>>,
        upcast: Option<crate::class::Upcast>,
    ) -> Rc<MetaNode> {
        let node = MetaNode::create(
            state,
            NodeParts {
                key: Some(key),
                name: Rc::from(name),
                flags,
                parent,
                upcast,
                const_node,
                metatable: state.new_table(),
            },
        )
        .unwrap();
        ClassRegistry::insert(state, node.clone()).unwrap();
        node
    }

    fn setup() -> State {
        let state = State::new();
        let base = ClassKeys::of::<Base>();
        let base_const = facet(&state, base.constant, "const Base", NodeFlags::CONST, None, None, None);
        let base_mut = facet(&state, base.mutable, "Base", NodeFlags::empty(), None, Some(base_const.clone()), None);

        let upcast = Some(crate::class::erased_upcast::<Derived, Base> as crate::class::Upcast);
        let derived = ClassKeys::of::<Derived>();
        let derived_const = facet(
            &state,
            derived.constant,
            "const Derived",
            NodeFlags::CONST,
            Some(base_const),
            None,
            upcast,
        );
        facet(
            &state,
            derived.mutable,
            "Derived",
            NodeFlags::empty(),
            Some(base_mut),
            Some(derived_const),
            upcast,
        );

        let stranger = ClassKeys::of::<Stranger>();
        let stranger_const = facet(&state, stranger.constant, "const Stranger", NodeFlags::CONST, None, None, None);
        facet(&state, stranger.mutable, "Stranger", NodeFlags::empty(), None, Some(stranger_const), None);
        state
    }

    fn quiet_kind<T: Class>(state: &State, allow_const: bool) -> Option<ErrorKind> {
        let mut err = Error::quiet();
        get_object::<T>(state, -1, allow_const, &mut err);
        err.kind()
    }

    #[test]
    fn derived_objects_pass_as_their_base() {
        let state = setup();
        push_owned(&state, Derived { _tag: 0, base: Base { id: 11 } });
        let mut err = Error::verbose();
        let base = get_object::<Base>(&state, -1, false, &mut err).unwrap();
        assert_eq!(unsafe { base.as_ref() }.id, 11);
        assert!(!err.is_err());
    }

    #[test]
    fn unrelated_classes_mismatch() {
        let state = setup();
        push_owned(&state, Stranger);
        let mut err = Error::verbose();
        assert!(get_object::<Base>(&state, -1, false, &mut err).is_none());
        assert_eq!(err.kind(), Some(ErrorKind::ClassMismatch));
        assert_eq!(err.what(), "class mismatch, \"Base\" expected, got \"Stranger\"");
    }

    #[test]
    fn unregistered_expectation_wins_over_everything() {
        let state = setup();
        push_owned(&state, Stranger);
        assert_eq!(quiet_kind::<Missing>(&state, true), Some(ErrorKind::UnregisteredClass));
        state.push(3);
        assert_eq!(quiet_kind::<Missing>(&state, true), Some(ErrorKind::UnregisteredClass));
    }

    #[test]
    fn constness_is_checked_before_identity() {
        let state = setup();
        push_owned(&state, Stranger);
        make_const(&state, -1).unwrap();
        // a const object of the wrong class still reports the const violation
        assert_eq!(quiet_kind::<Base>(&state, false), Some(ErrorKind::ConstViolation));
        assert_eq!(quiet_kind::<Base>(&state, true), Some(ErrorKind::ClassMismatch));
    }

    #[test]
    fn const_objects_walk_the_const_chain() {
        let state = setup();
        push_owned(&state, Derived { _tag: 1, base: Base { id: 5 } });
        make_const(&state, -1).unwrap();
        let mut err = Error::verbose();
        let base = get_object::<Base>(&state, -1, true, &mut err).unwrap();
        assert_eq!(unsafe { base.as_ref() }.id, 5);

        let mut err = Error::verbose();
        assert!(get_object::<Derived>(&state, -1, false, &mut err).is_none());
        assert_eq!(
            err.what(),
            "mutable class \"Derived\" required, got \"const Derived\""
        );
    }

    #[test]
    fn plain_values_and_foreign_blocks_are_rejected() {
        struct Alien;
        impl interlua_host::Payload for Alien {}

        let state = setup();
        state.push(state.new_table());
        let mut err = Error::verbose();
        assert!(get_object::<Base>(&state, -1, false, &mut err).is_none());
        assert_eq!(err.what(), "not an object, class \"Base\" expected, got \"table\"");

        let block = state.new_userdata(Alien, None);
        state.push(Value::Userdata(block));
        assert_eq!(quiet_kind::<Base>(&state, false), Some(ErrorKind::ForeignObject));
    }

    #[test]
    fn argument_checks_raise_positioned_errors() {
        let state = setup();
        state.push(true);
        let err = object_arg::<Base>(&state, 1, false).unwrap_err();
        assert_eq!(
            err.message,
            "bad argument #1 to '?' (not an object, class \"Base\" expected, got \"boolean\")"
        );
    }
}
