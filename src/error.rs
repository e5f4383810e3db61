//! Error channel for checks across the native/script boundary.
//!
//! Two channels exist side by side. Hooks the runtime invokes (bound
//! functions, constructors, attribute reads and writes) raise a
//! [`HostError`]. Native-facing checks record into an [`Error`] sink the
//! caller passes in; the default sink aborts the process.
//!
//! ## Error types
//!
//! ```text
//! Error             - sink: quiet, verbose or aborting
//! ├── ErrorKind     - numeric category recorded by every sink
//! CheckError        - a failed boundary check, formatted on demand
//! RegistrationError - failures while describing classes and namespaces
//! ```

use std::fmt::Display;
use std::rc::Rc;

use interlua_host::{HostError, Status};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

// ============================================================================
// Error kinds
// ============================================================================

/// Category of a recorded failure; the discriminant is the status code an
/// aborting sink prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ErrorKind {
    /// A value of the wrong runtime type for a primitive parameter.
    TypeMismatch = 1,
    /// The expected class was never registered.
    UnregisteredClass = 2,
    /// A const object where a mutable one is required.
    ConstViolation = 3,
    /// The object's class is not the expected one nor derived from it.
    ClassMismatch = 4,
    /// A userdata block not created by this library.
    ForeignObject = 5,
    /// Not a userdata at all.
    NotAnObject = 6,
    /// A failure raised inside the runtime.
    Runtime = 7,
    Memory = 8,
    ErrorHandler = 9,
    /// The object is lent to a running native function.
    AlreadyBorrowed = 10,
}

impl From<Status> for ErrorKind {
    fn from(status: Status) -> Self {
        match status {
            Status::Memory => ErrorKind::Memory,
            Status::ErrorHandler => ErrorKind::ErrorHandler,
            _ => ErrorKind::Runtime,
        }
    }
}

// ============================================================================
// Check errors
// ============================================================================

/// A failed boundary check.
///
/// Class names are shared strings so building one is cheap; the message is
/// only formatted when a verbose sink asks for it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("{expected} expected, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("number {value} out of range for {target}")]
    IntegerOverflow { value: i64, target: &'static str },

    #[error("trying to get an unregistered base class")]
    UnregisteredClass,

    #[error("not an object, class \"{expected}\" expected, got \"{got}\"")]
    NotAnObject { expected: Rc<str>, got: &'static str },

    #[error("foreign object, class \"{expected}\" expected")]
    ForeignObject { expected: Rc<str> },

    #[error("mutable class \"{expected}\" required, got \"{got}\"")]
    ConstViolation { expected: Rc<str>, got: Rc<str> },

    #[error("class mismatch, \"{expected}\" expected, got \"{got}\"")]
    ClassMismatch { expected: Rc<str>, got: Rc<str> },

    #[error("object of class \"{class}\" is already borrowed")]
    AlreadyBorrowed { class: Rc<str> },
}

impl CheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::TypeMismatch { .. } | CheckError::IntegerOverflow { .. } => {
                ErrorKind::TypeMismatch
            }
            CheckError::UnregisteredClass => ErrorKind::UnregisteredClass,
            CheckError::NotAnObject { .. } => ErrorKind::NotAnObject,
            CheckError::ForeignObject { .. } => ErrorKind::ForeignObject,
            CheckError::ConstViolation { .. } => ErrorKind::ConstViolation,
            CheckError::ClassMismatch { .. } => ErrorKind::ClassMismatch,
            CheckError::AlreadyBorrowed { .. } => ErrorKind::AlreadyBorrowed,
        }
    }
}

// ============================================================================
// Registration errors
// ============================================================================

/// Errors raised while registering classes, functions and namespaces.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("trying to register a derived class '{class}' from an unregistered base class")]
    UnregisteredBase { class: String },

    #[error("'{name}' is already bound to a value that is not a namespace")]
    NotANamespace { name: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

// ============================================================================
// Error sink
// ============================================================================

/// What a sink records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Only the kind; messages are never formatted.
    Quiet,
    /// Kind and formatted message.
    Verbose,
}

/// What a sink does once something is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Return,
    /// Print `PANIC (<code>): <message>` and terminate the process.
    Abort,
}

/// Destination for failures reported by native-facing checks.
#[derive(Debug, Clone)]
pub struct Error {
    verbosity: Verbosity,
    on_error: OnError,
    kind: Option<ErrorKind>,
    message: Option<String>,
}

impl Error {
    pub fn new(verbosity: Verbosity, on_error: OnError) -> Self {
        Self {
            verbosity,
            on_error,
            kind: None,
            message: None,
        }
    }

    pub fn quiet() -> Self {
        Self::new(Verbosity::Quiet, OnError::Return)
    }

    pub fn verbose() -> Self {
        Self::new(Verbosity::Verbose, OnError::Return)
    }

    /// The default sink used whenever a caller supplies none.
    pub fn abort() -> Self {
        Self::new(Verbosity::Verbose, OnError::Abort)
    }

    /// Record a failure, replacing any earlier one.
    pub fn set(&mut self, kind: ErrorKind, message: impl Display) {
        if self.on_error == OnError::Abort {
            fatal(kind, message);
        }
        self.kind = Some(kind);
        self.message = match self.verbosity {
            Verbosity::Quiet => None,
            Verbosity::Verbose => Some(message.to_string()),
        };
    }

    pub fn fail(&mut self, error: CheckError) {
        self.set(error.kind(), &error);
    }

    pub fn is_err(&self) -> bool {
        self.kind.is_some()
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Numeric code of the recorded kind, 0 when nothing was recorded.
    pub fn code(&self) -> i32 {
        self.kind.map_or(0, i32::from)
    }

    /// The recorded message; empty for quiet sinks.
    pub fn what(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn reset(&mut self) {
        self.kind = None;
        self.message = None;
    }
}

/// Report an unrecoverable boundary violation and terminate.
pub(crate) fn fatal(kind: ErrorKind, message: impl Display) -> ! {
    let code = i32::from(kind);
    tracing::error!(target: "interlua", code, %message, "unrecoverable boundary violation");
    eprintln!("PANIC ({code}): {message}");
    std::process::abort()
}
