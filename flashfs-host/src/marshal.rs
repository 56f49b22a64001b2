//! Marshalling between host values and guest memory.
//!
//! Writers allocate through an [`ArenaScope`] and so are released with it;
//! readers copy out of guest memory into host-owned buffers, because any
//! later call may replace the buffer they were read from.

use crate::arena::{Allocation, ArenaScope, MemoryArena};
use flashfs_core::error::{FsError, Result};

impl ArenaScope<'_> {
    /// Copy `text` into guest memory as a NUL-terminated UTF-8 string.
    pub fn write_c_string(&mut self, text: &str) -> Result<Allocation> {
        let len = text.len() + 1;
        let allocation = self.alloc(len)?;
        let dest = self.bytes_mut(allocation.ptr, len)?;
        dest[..text.len()].copy_from_slice(text.as_bytes());
        dest[text.len()] = 0;
        Ok(allocation)
    }

    /// Copy a payload into guest memory.
    ///
    /// An empty payload yields the null allocation; engines take a null
    /// pointer with zero length as an empty write.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<Allocation> {
        if data.is_empty() {
            return Ok(Allocation::null());
        }
        let allocation = self.alloc(data.len())?;
        self.bytes_mut(allocation.ptr, data.len())?
            .copy_from_slice(data);
        Ok(allocation)
    }

    /// Allocate `size` zeroed bytes, for out-parameters.
    pub fn alloc_zeroed(&mut self, size: usize) -> Result<Allocation> {
        let allocation = self.alloc(size)?;
        if !allocation.is_null() {
            self.bytes_mut(allocation.ptr, size)?.fill(0);
        }
        Ok(allocation)
    }
}

impl MemoryArena {
    /// Copy `len` bytes at `ptr` out of guest memory.
    pub fn read_bytes(&self, ptr: u32, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        Ok(self.bytes(ptr, len)?.to_vec())
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    ///
    /// A missing terminator within the bound is not an error: the string is
    /// cut at the bound and a warning is logged. Invalid UTF-8 is replaced.
    pub fn read_c_string(&self, ptr: u32, max_len: usize) -> Result<String> {
        if ptr == 0 {
            return Ok(String::new());
        }
        let available = self.memory_len().saturating_sub(ptr as usize);
        if available == 0 {
            return Err(FsError::MemoryAccess {
                offset: ptr,
                size: max_len as u64,
            });
        }

        let window = self.bytes(ptr, max_len.min(available))?;
        let end = match window.iter().position(|&b| b == 0) {
            Some(end) => end,
            None => {
                tracing::warn!(
                    guest = self.guest_name(),
                    ptr,
                    max_len,
                    "Guest string not terminated within bound, truncating"
                );
                window.len()
            }
        };
        Ok(String::from_utf8_lossy(&window[..end]).into_owned())
    }

    /// Read a little-endian `u32` at `ptr`.
    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let bytes = self.bytes(ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `i32` at `ptr`.
    pub fn read_i32(&self, ptr: u32) -> Result<i32> {
        self.read_u32(ptr).map(|v| v as i32)
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MemoryArena;
    use crate::testing::SimulatedEngine;

    fn arena() -> MemoryArena {
        MemoryArena::new(Box::new(SimulatedEngine::fatfs()))
    }

    #[test]
    fn c_string_is_nul_terminated() {
        let mut arena = arena();
        let mut scope = arena.scope();
        let s = scope.write_c_string("docs/readme.txt").unwrap();
        assert_eq!(s.len() as usize, "docs/readme.txt".len() + 1);
        let raw = scope.read_bytes(s.ptr(), s.len() as usize).unwrap();
        assert_eq!(raw.last(), Some(&0));
        assert_eq!(scope.read_c_string(s.ptr(), 256).unwrap(), "docs/readme.txt");
    }

    #[test]
    fn empty_payload_is_null() {
        let mut arena = arena();
        let mut scope = arena.scope();
        let data = scope.write_bytes(&[]).unwrap();
        assert!(data.is_null());
        assert_eq!(scope.held(), 0);
    }

    #[test]
    fn read_copies_out() {
        let mut arena = arena();
        let copy = {
            let mut scope = arena.scope();
            let data = scope.write_bytes(b"flash").unwrap();
            let copy = scope.read_bytes(data.ptr(), 5).unwrap();
            scope.bytes_mut(data.ptr(), 5).unwrap().fill(b'x');
            copy
        };
        assert_eq!(copy, b"flash");
    }

    #[test]
    fn unterminated_string_is_truncated() {
        let mut arena = arena();
        let mut scope = arena.scope();
        let data = scope.write_bytes(b"abcdef").unwrap();
        assert_eq!(scope.read_c_string(data.ptr(), 3).unwrap(), "abc");
    }

    #[test]
    fn integers_are_little_endian() {
        let mut arena = arena();
        let mut scope = arena.scope();
        let data = scope.write_bytes(&[0xfe, 0xff, 0xff, 0xff]).unwrap();
        assert_eq!(scope.read_i32(data.ptr()).unwrap(), -2);
        assert_eq!(scope.read_u32(data.ptr()).unwrap(), u32::MAX - 1);
    }

    #[test]
    fn zeroed_out_parameter() {
        let mut arena = arena();
        let mut scope = arena.scope();
        let out = scope.alloc_zeroed(4).unwrap();
        assert_eq!(scope.read_u32(out.ptr()).unwrap(), 0);
    }
}
