//! Fixed-size cell carrying a copyable value through a runtime userdata.
//!
//! Bound functions are plain `fn` trampolines; the Rust callable they
//! forward to rides along as the function's first upvalue inside a
//! [`TransferCell`].

use std::any::TypeId;
use std::mem::{MaybeUninit, align_of, size_of};
use std::ptr;

use interlua_host::{HostError, HostResult, Payload, State};

const WORDS: usize = 4;

/// A small POD buffer tagged with the type stored in it.
#[derive(Clone, Copy)]
pub struct TransferCell {
    type_id: TypeId,
    data: [MaybeUninit<usize>; WORDS],
}

impl TransferCell {
    /// Bytes available for the stored value.
    pub const CAPACITY: usize = WORDS * size_of::<usize>();

    /// Store `value`. Values larger than [`Self::CAPACITY`] or more aligned
    /// than a pointer are rejected at compile time.
    pub fn new<F: Copy + 'static>(value: F) -> Self {
        const {
            assert!(
                size_of::<F>() <= Self::CAPACITY && align_of::<F>() <= align_of::<usize>(),
                "value does not fit in a transfer cell"
            )
        };
        let mut data = [MaybeUninit::<usize>::uninit(); WORDS];
        // SAFETY: the buffer is large and aligned enough for `F` (checked
        // above) and `F: Copy` has no drop glue to skip.
        unsafe { ptr::write(data.as_mut_ptr().cast::<F>(), value) };
        Self {
            type_id: TypeId::of::<F>(),
            data,
        }
    }

    pub fn holds<F: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<F>()
    }

    /// Copy out the stored value if it is an `F`.
    pub fn get<F: Copy + 'static>(&self) -> Option<F> {
        if !self.holds::<F>() {
            return None;
        }
        // SAFETY: the tag proves `new::<F>` initialized the buffer.
        Some(unsafe { ptr::read(self.data.as_ptr().cast::<F>()) })
    }
}

impl Payload for TransferCell {}

/// The value carried by the running function's first upvalue.
pub(crate) fn transferred<F: Copy + 'static>(state: &State) -> HostResult<F> {
    state
        .with_payload(&state.upvalue(1), |cell: &TransferCell| cell.get::<F>())
        .flatten()
        .ok_or_else(|| HostError::runtime("bound function lost its native target"))
}
