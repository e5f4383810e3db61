//! Attribute read and write hooks.
//!
//! One `__index` and one `__newindex` function exist per metadata node,
//! closed over the node. They serve class instances, static class tables and
//! namespaces alike; the node flags decide whether getters and setters
//! receive the object as their first argument.

use interlua_host::{HostError, HostResult, State, Value};

use crate::node::{Member, NodeFlags, hook_node};

/// `__index(obj, key)`.
///
/// Methods are returned as is, getters are invoked, and unknown names read
/// as nil.
pub(crate) fn index_hook(state: &State) -> HostResult<usize> {
    #[cfg(feature = "profiling")]
    profiling::function_scope!();

    let node = hook_node(state)?;
    let key = state.value(2);
    let Some(name) = key.as_str() else {
        state.push_nil();
        return Ok(1);
    };

    if node.is_instance() && name == "__type" {
        state.push(node.name().clone());
        return Ok(1);
    }

    match node.find_getter(name) {
        Some(Member::Method(f)) => state.push(f),
        Some(Member::Getter(f)) => {
            state.push(f);
            if node.is_instance() {
                state.push_value(1);
                state.call(1, 1)?;
            } else {
                state.call(0, 1)?;
            }
        }
        _ => state.push_nil(),
    }
    Ok(1)
}

/// `__newindex(obj, key, value)`.
pub(crate) fn newindex_hook(state: &State) -> HostResult<usize> {
    #[cfg(feature = "profiling")]
    profiling::function_scope!();

    let node = hook_node(state)?;
    let key = state.value(2);
    let member = key.as_str().and_then(|name| node.find_setter(name));

    match member {
        Some(Member::Setter(f)) => {
            state.push(f);
            if node.is_instance() {
                state.push_value(1);
                state.push_value(3);
                state.call(2, 0)?;
            } else {
                state.push_value(3);
                state.call(1, 0)?;
            }
            Ok(0)
        }
        Some(Member::ReadOnly) => Err(HostError::runtime(format!("'{key}' is read-only"))),
        Some(Member::ConstReadOnly) => Err(HostError::runtime(format!(
            "'{key}' is a read-only member of a const class instance"
        ))),
        Some(Member::Method(_) | Member::Getter(_)) | None => {
            if node.flags().contains(NodeFlags::OPEN)
                && let Value::Table(t) = state.value(1)
            {
                state.raw_set(t, key, state.value(3))?;
                return Ok(0);
            }
            Err(HostError::runtime(format!(
                "no writable attribute named '{key}'"
            )))
        }
    }
}
