//! Guest memory arena.
//!
//! The arena owns the guest and is the only component that calls its
//! allocator. Every host-side allocation is made through an [`ArenaScope`],
//! which releases everything it handed out when it goes out of scope, on
//! success and error paths alike.
//!
//! Linear memory can be replaced whenever the guest runs (its allocator may
//! grow it), so the arena never keeps a byte slice across a call. It keeps
//! only the identity of the buffer it last saw and refreshes it after every
//! call; byte access always re-resolves through the guest.

use crate::guest::{BufferIdentity, GuestModule};
use flashfs_core::error::{FsError, Result};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Default allocation export name.
pub const MALLOC_EXPORT: &str = "malloc";
/// Default release export name.
pub const FREE_EXPORT: &str = "free";

/// A region of guest memory obtained from the guest allocator.
///
/// A zero-length allocation is the null pointer, which every engine treats
/// as "no buffer".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub(crate) ptr: u32,
    pub(crate) len: u32,
}

impl Allocation {
    /// The null allocation.
    pub const fn null() -> Self {
        Self { ptr: 0, len: 0 }
    }

    /// Guest address.
    pub const fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Length in bytes.
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Check if this is the null allocation.
    pub const fn is_null(&self) -> bool {
        self.ptr == 0
    }

    /// Check if this allocation holds no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The address as an `i32` call argument.
    pub const fn arg(&self) -> i32 {
        self.ptr as i32
    }

    /// The length as an `i32` call argument.
    pub const fn len_arg(&self) -> i32 {
        self.len as i32
    }
}

/// Host-side allocator wrapper around a guest.
pub struct MemoryArena {
    guest: Box<dyn GuestModule>,
    malloc: &'static str,
    free: &'static str,
    view: BufferIdentity,
    view_changes: u64,
    outstanding: usize,
}

impl MemoryArena {
    /// Wrap a guest using the `malloc`/`free` exports.
    pub fn new(guest: Box<dyn GuestModule>) -> Self {
        Self::with_allocator(guest, MALLOC_EXPORT, FREE_EXPORT)
    }

    /// Wrap a guest using custom allocator exports.
    pub fn with_allocator(
        guest: Box<dyn GuestModule>,
        malloc: &'static str,
        free: &'static str,
    ) -> Self {
        let view = guest.buffer_identity();
        Self {
            guest,
            malloc,
            free,
            view,
            view_changes: 0,
            outstanding: 0,
        }
    }

    /// Label of the wrapped guest.
    pub fn guest_name(&self) -> &str {
        self.guest.name()
    }

    /// Check whether the guest exports `export`.
    pub fn has_export(&self, export: &str) -> bool {
        self.guest.has_export(export)
    }

    /// Allocate `size` bytes of guest memory.
    ///
    /// Zero bytes yields the null allocation without calling the guest. A
    /// null pointer for a positive size is [`FsError::OutOfGuestMemory`].
    /// Prefer [`ArenaScope::alloc`], which guarantees the release.
    pub fn allocate(&mut self, size: usize) -> Result<Allocation> {
        if size == 0 {
            return Ok(Allocation::null());
        }
        let requested = size as u64;
        let len = i32::try_from(size).map_err(|_| FsError::OutOfGuestMemory { requested })?;

        let result = self.guest.call(self.malloc, &[len]);
        self.refresh();
        let ptr = result? as u32;
        if ptr == 0 {
            return Err(FsError::OutOfGuestMemory { requested });
        }

        self.outstanding += 1;
        Ok(Allocation {
            ptr,
            len: len as u32,
        })
    }

    /// Return an allocation to the guest. The null allocation is a no-op.
    pub fn release(&mut self, allocation: Allocation) -> Result<()> {
        if allocation.is_null() {
            return Ok(());
        }
        let result = self.guest.call(self.free, &[allocation.arg()]);
        self.outstanding = self.outstanding.saturating_sub(1);
        self.refresh();
        result.map(|_| ())
    }

    /// Re-derive the memory view if the guest replaced its buffer.
    ///
    /// Returns `true` when the buffer identity changed.
    pub fn refresh(&mut self) -> bool {
        let current = self.guest.buffer_identity();
        if current == self.view {
            return false;
        }
        tracing::trace!(
            guest = self.guest.name(),
            old_len = self.view.len,
            new_len = current.len,
            "Guest memory buffer replaced"
        );
        self.view = current;
        self.view_changes += 1;
        true
    }

    /// Call a guest export, refreshing the view afterwards.
    pub fn call(&mut self, export: &str, args: &[i32]) -> Result<i32> {
        let result = self.guest.call(export, args);
        self.refresh();
        result
    }

    /// Identity of the memory buffer as of the last refresh.
    pub fn view(&self) -> BufferIdentity {
        self.view
    }

    /// Number of buffer replacements observed.
    pub fn view_changes(&self) -> u64 {
        self.view_changes
    }

    /// Current size of guest linear memory.
    pub fn memory_len(&self) -> usize {
        self.guest.memory().len()
    }

    /// Number of allocations not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Open a scope whose allocations are released when it drops.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        ArenaScope {
            arena: self,
            held: Vec::new(),
        }
    }

    /// Borrow `len` bytes of guest memory at `ptr`.
    pub fn bytes(&self, ptr: u32, len: usize) -> Result<&[u8]> {
        let range = self.checked_range(ptr, len)?;
        Ok(&self.guest.memory()[range])
    }

    /// Mutably borrow `len` bytes of guest memory at `ptr`.
    pub fn bytes_mut(&mut self, ptr: u32, len: usize) -> Result<&mut [u8]> {
        let range = self.checked_range(ptr, len)?;
        Ok(&mut self.guest.memory_mut()[range])
    }

    fn checked_range(&self, ptr: u32, len: usize) -> Result<std::ops::Range<usize>> {
        debug_assert_eq!(
            self.view,
            self.guest.buffer_identity(),
            "guest memory accessed without a refresh after growth"
        );
        let start = ptr as usize;
        let end = start.checked_add(len);
        match end {
            Some(end) if end <= self.memory_len() => Ok(start..end),
            _ => Err(FsError::MemoryAccess {
                offset: ptr,
                size: len as u64,
            }),
        }
    }
}

impl fmt::Debug for MemoryArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArena")
            .field("guest", &self.guest.name())
            .field("view", &self.view)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

/// Scoped allocations with guaranteed release.
///
/// Dereferences to the arena, so guest calls and nested scopes go through
/// the scope itself. Allocations are released in reverse order on drop;
/// release failures are logged since drop cannot report them.
pub struct ArenaScope<'a> {
    arena: &'a mut MemoryArena,
    held: Vec<Allocation>,
}

impl ArenaScope<'_> {
    /// Allocate `size` bytes, released when this scope drops.
    pub fn alloc(&mut self, size: usize) -> Result<Allocation> {
        let allocation = self.arena.allocate(size)?;
        if !allocation.is_null() {
            self.held.push(allocation);
        }
        Ok(allocation)
    }

    /// Number of live allocations held by this scope.
    pub fn held(&self) -> usize {
        self.held.len()
    }
}

impl Deref for ArenaScope<'_> {
    type Target = MemoryArena;

    fn deref(&self) -> &MemoryArena {
        self.arena
    }
}

impl DerefMut for ArenaScope<'_> {
    fn deref_mut(&mut self) -> &mut MemoryArena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        while let Some(allocation) = self.held.pop() {
            if let Err(e) = self.arena.release(allocation) {
                tracing::warn!(
                    guest = self.arena.guest_name(),
                    ptr = allocation.ptr,
                    len = allocation.len,
                    error = %e,
                    "Failed to release guest allocation"
                );
            }
        }
    }
}
