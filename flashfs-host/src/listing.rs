//! Directory listing protocols.
//!
//! The result size of a listing is unknown before the guest produces it.
//! Engines solve that one of two ways:
//!
//! - **Grow and retry** ([`ListBuffer`]): the guest fills a caller-supplied
//!   buffer with the whole listing, or reports that the buffer is too small,
//!   in which case the host doubles it and asks again.
//! - **Handle/iterator** ([`read_dir`]): the guest hands out a directory
//!   handle and yields one entry per call into fixed-size out-parameters.

use crate::arena::MemoryArena;
use flashfs_core::codes::ErrorDomain;
use flashfs_core::error::{FsError, Result};
use flashfs_core::listing::{join_entry_path, parse_list_payload};
use flashfs_core::types::{Entry, EntryKind};

/// Largest listing buffer a flat listing will try.
pub const MAX_LIST_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Growable destination buffer for flat listings.
///
/// The capacity survives between listings on the same client, so a large
/// directory costs the retries once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListBuffer {
    capacity: usize,
}

impl ListBuffer {
    /// Start at `initial` bytes.
    pub fn new(initial: usize) -> Self {
        Self {
            capacity: initial.clamp(1, MAX_LIST_BUFFER_SIZE),
        }
    }

    /// Capacity the next listing starts at.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run a flat listing export.
    ///
    /// With a `path` the export is called as `export(path, dest, capacity)`
    /// and lists that directory; without one as `export(dest, capacity)`,
    /// which lists the whole volume. `domain.buffer_too_small` doubles the
    /// buffer and retries; any other negative return is translated through
    /// `domain`. Zero bytes written is an empty listing.
    pub fn fetch(
        &mut self,
        arena: &mut MemoryArena,
        export: &str,
        path: Option<&str>,
        domain: &ErrorDomain,
    ) -> Result<Vec<Entry>> {
        let action = || match path {
            Some(path) => format!("list \"{}\"", path),
            None => "list files".to_string(),
        };
        let mut scope = arena.scope();
        let path_arg = match path {
            Some(path) => Some(scope.write_c_string(path)?),
            None => None,
        };

        loop {
            let capacity = self.capacity;
            let mut attempt = scope.scope();
            let dest = attempt.alloc(capacity)?;
            let mut args = Vec::with_capacity(3);
            if let Some(path_arg) = &path_arg {
                args.push(path_arg.arg());
            }
            args.extend([dest.arg(), capacity as i32]);
            let used = attempt.call(export, &args)?;

            if used == domain.buffer_too_small {
                let grown = capacity.saturating_mul(2);
                if grown > MAX_LIST_BUFFER_SIZE {
                    return Err(domain.error(used, action()));
                }
                tracing::debug!(export, from = capacity, to = grown, "Growing listing buffer");
                self.capacity = grown;
                continue;
            }

            let used = domain.check(used, action)? as usize;
            if used == 0 {
                return Ok(Vec::new());
            }
            if used > capacity {
                return Err(FsError::ListingOverflow {
                    action: action(),
                    written: used,
                    capacity,
                });
            }

            let payload = attempt.read_bytes(dest.ptr(), used)?;
            return Ok(parse_list_payload(&String::from_utf8_lossy(&payload)));
        }
    }
}

/// Export names of a handle/iterator listing.
#[derive(Debug, Clone, Copy)]
pub struct DirExports {
    /// `open(path) -> handle | error`.
    pub open: &'static str,
    /// `read(handle, name, name_cap, type, size) -> 1 | 0 | error`.
    pub read: &'static str,
    /// `close(handle) -> code`.
    pub close: &'static str,
    /// Entry type value meaning "directory".
    pub dir_type: i32,
    /// Longest name the engine produces.
    pub name_max: usize,
}

/// List a directory through the handle/iterator protocol.
///
/// `dir` must be normalized (`/` or `/a/b`); entry paths are `dir` joined
/// with each returned name. The handle is closed on every exit path. When
/// iteration fails and closing fails too, the iteration error wins and the
/// close error is logged.
pub fn read_dir(
    arena: &mut MemoryArena,
    exports: &DirExports,
    dir: &str,
    domain: &ErrorDomain,
) -> Result<Vec<Entry>> {
    let mut scope = arena.scope();
    let path_arg = scope.write_c_string(dir)?;

    let handle = scope.call(exports.open, &[path_arg.arg()])?;
    let handle = domain.check(handle, || format!("open directory \"{}\"", dir))?;

    let entries = read_entries(&mut scope, exports, handle, dir, domain);
    let closed = scope
        .call(exports.close, &[handle])
        .and_then(|code| domain.check(code, || format!("close directory \"{}\"", dir)));

    match (entries, closed) {
        (Ok(entries), Ok(_)) => Ok(entries),
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(error), Ok(_)) => Err(error),
        (Err(error), Err(close_error)) => {
            tracing::warn!(dir, handle, error = %close_error, "Failed to close directory after error");
            Err(error)
        }
    }
}

fn read_entries(
    arena: &mut MemoryArena,
    exports: &DirExports,
    handle: i32,
    dir: &str,
    domain: &ErrorDomain,
) -> Result<Vec<Entry>> {
    let mut scope = arena.scope();
    let name = scope.alloc_zeroed(exports.name_max + 1)?;
    let kind = scope.alloc_zeroed(4)?;
    let size = scope.alloc_zeroed(4)?;

    let mut entries = Vec::new();
    loop {
        let more = scope.call(
            exports.read,
            &[
                handle,
                name.arg(),
                exports.name_max as i32,
                kind.arg(),
                size.arg(),
            ],
        )?;
        if domain.check(more, || format!("read directory \"{}\"", dir))? == 0 {
            break;
        }

        let entry_name = scope.read_c_string(name.ptr(), exports.name_max + 1)?;
        if entry_name.is_empty() || entry_name == "." || entry_name == ".." {
            continue;
        }

        let path = join_entry_path(dir, &entry_name);
        let entry = if scope.read_i32(kind.ptr())? == exports.dir_type {
            Entry::dir(path)
        } else {
            Entry {
                path,
                size: u64::from(scope.read_u32(size.ptr())?),
                kind: EntryKind::File,
            }
        };
        entries.push(entry);
    }

    Ok(entries)
}
