//! Error types raised by the host runtime.
//!
//! Every failure inside the runtime surfaces as a [`HostError`]: a status code
//! plus the message a protected call would leave on the stack.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Result alias used throughout the host runtime.
pub type HostResult<T> = Result<T, HostError>;

// ============================================================================
// Status codes
// ============================================================================

/// Outcome of a protected call.
///
/// The discriminants follow the numbering embedders of Lua-style runtimes
/// expect, so they can be passed through integer-typed interfaces unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    Runtime = 2,
    Syntax = 3,
    Memory = 4,
    GcMetamethod = 5,
    ErrorHandler = 6,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

// ============================================================================
// Host errors
// ============================================================================

/// A raised runtime error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HostError {
    /// Status reported to the protected caller.
    pub status: Status,
    /// Human-readable message.
    pub message: String,
}

impl HostError {
    /// A plain runtime error, the kind raised by `error()` in scripts.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            status: Status::Runtime,
            message: message.into(),
        }
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self {
            status: Status::Memory,
            message: message.into(),
        }
    }

    pub fn with_status(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}
