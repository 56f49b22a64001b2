//! The guest engine seam.
//!
//! A guest is a compiled filesystem engine reached through a flat export
//! table of `i32 -> i32` functions and a single linear memory. Everything
//! above this module (arena, marshalling, clients) talks to a
//! [`GuestModule`] and never to wasmtime directly.
//!
//! # Implementations
//!
//! - [`WasmGuest`]: a wasmtime instance of a real compiled engine
//! - [`SimulatedEngine`](crate::testing::SimulatedEngine): a pure-Rust
//!   stand-in used by tests
//!
//! # Host imports
//!
//! Compiled engines built with emscripten/WASI import a few functions. The
//! host provides:
//!
//! ```text
//! wasi_snapshot_preview1.fd_write(fd, iovs, iovs_len, nwritten) -> errno
//! wasi_snapshot_preview1.fd_close(fd) -> errno
//! wasi_snapshot_preview1.fd_seek(fd, offset, whence, newoffset) -> errno
//! env.emscripten_notify_memory_growth(memory_index)
//! ```
//!
//! Any other import is defined as a trap so that modules carrying unused
//! imports still instantiate.

mod host;
mod runtime;
mod wasm;

pub use host::{
    GuestConsole, HostContext, create_linker, define_module_imports, register_host_imports,
};
pub use runtime::{CompiledModule, GuestRuntime, GuestRuntimeConfig};
pub(crate) use runtime::module_label;
pub use wasm::WasmGuest;

use flashfs_core::error::Result;

/// Identity of the guest's current linear-memory buffer.
///
/// Growth replaces the buffer; a changed identity means every byte view
/// derived from the old one is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferIdentity {
    /// Host address of the first byte.
    pub base: usize,
    /// Length in bytes.
    pub len: usize,
}

/// A compiled filesystem engine with a callable export table.
///
/// Implementations are single-threaded: callers hold `&mut` for every call,
/// which is what serializes access to linear memory and to stateful
/// directory iterators.
pub trait GuestModule: Send {
    /// Label used in logs and errors.
    fn name(&self) -> &str;

    /// Check whether the module exports a function called `export`.
    fn has_export(&self, export: &str) -> bool;

    /// Call an export with `i32` arguments.
    ///
    /// Void exports return 0. Fails with `MissingExport` when the export is
    /// absent and with `Trap` when the guest traps.
    fn call(&mut self, export: &str, args: &[i32]) -> Result<i32>;

    /// The current linear memory.
    fn memory(&self) -> &[u8];

    /// The current linear memory, writable.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Identity of the current memory buffer.
    fn buffer_identity(&self) -> BufferIdentity;
}

impl<G: GuestModule + ?Sized> GuestModule for Box<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn has_export(&self, export: &str) -> bool {
        (**self).has_export(export)
    }

    fn call(&mut self, export: &str, args: &[i32]) -> Result<i32> {
        (**self).call(export, args)
    }

    fn memory(&self) -> &[u8] {
        (**self).memory()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        (**self).memory_mut()
    }

    fn buffer_identity(&self) -> BufferIdentity {
        (**self).buffer_identity()
    }
}
