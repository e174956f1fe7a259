//! The `Runtime` collaborator: the one boundary this core calls through to
//! actually touch memory. Device backends (CPU/accelerator) are expected to
//! implement this trait; the core never does more than `alloc`/`dealloc`
//! through it.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::errors::{GPError, GPResult};

/// An opaque handle to a runtime-owned allocation. The core never
/// dereferences this — it only ever adds a byte offset to it when binding a
/// tensor's `DataBlob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimePtr(pub NonNull<u8>);

// SAFETY: the core treats `RuntimePtr` as an opaque token, never dereferencing
// it across threads; runtimes that are actually shared across threads must
// ensure their own `alloc`/`dealloc` are safe to call concurrently.
unsafe impl Send for RuntimePtr {}
unsafe impl Sync for RuntimePtr {}

/// Physical memory collaborator. The allocator calls `alloc` at most once
/// per graph (when `OffsetAllocator::get_ptr` is first invoked) and
/// `dealloc` exactly once, only if `alloc` happened.
pub trait Runtime: fmt::Display + fmt::Debug {
    fn alloc(&self, bytes: usize) -> GPResult<RuntimePtr>;
    fn dealloc(&self, ptr: RuntimePtr, bytes: usize);

    /// Stable identity used to compare runtimes for equality, so
    /// `Graph::add_tensor` can reject mixing tensors from a different
    /// runtime than the graph's. Two runtimes are the same runtime iff this
    /// returns the same string.
    fn identity(&self) -> &str;

    fn same_runtime(&self, other: &dyn Runtime) -> bool {
        self.identity() == other.identity()
    }
}

/// A plain heap-backed runtime, used for standalone use of this crate and as
/// the default test collaborator. Allocates with the system allocator at an
/// 8-byte alignment (matching `OffsetAllocator`'s default alignment).
#[derive(Debug)]
pub struct HeapRuntime {
    name: String,
}

impl HeapRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for HeapRuntime {
    fn default() -> Self {
        Self::new("heap")
    }
}

impl fmt::Display for HeapRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRuntime({})", self.name)
    }
}

impl Runtime for HeapRuntime {
    fn alloc(&self, bytes: usize) -> GPResult<RuntimePtr> {
        let layout = Layout::from_size_align(bytes.max(1), 8)
            .map_err(|e| GPError::RuntimeOom { bytes, reason: e.to_string() })?;
        // SAFETY: layout has non-zero size by construction above.
        let raw = unsafe { alloc::alloc(layout) };
        NonNull::new(raw)
            .map(RuntimePtr)
            .ok_or_else(|| GPError::RuntimeOom { bytes, reason: "system allocator returned null".to_string() })
    }

    fn dealloc(&self, ptr: RuntimePtr, bytes: usize) {
        if let Ok(layout) = Layout::from_size_align(bytes.max(1), 8) {
            // SAFETY: `ptr` was produced by `alloc` above with the same layout.
            unsafe { alloc::dealloc(ptr.0.as_ptr(), layout) };
        }
    }

    fn identity(&self) -> &str {
        &self.name
    }
}
