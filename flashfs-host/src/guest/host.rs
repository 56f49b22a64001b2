//! Host imports for guest engines.
//!
//! Compiled engines print diagnostics through WASI `fd_write` and notify
//! the embedder when their memory grows. Each instance gets its own
//! [`HostContext`], stored in the wasmtime store and reached by the import
//! closures through their `Caller`; no import touches process-wide state.

use crate::observability::GUEST_TARGET;
use flashfs_core::error::{FsError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use wasmtime::{
    Caller, Engine, ExternType, Linker, Memory, Module, StoreLimits, StoreLimitsBuilder, Val,
    ValType,
};

/// Number of console lines retained per instance.
const CONSOLE_CAPACITY: usize = 256;

/// WASI imports answered with zeros whatever their declared signature.
const ZERO_STUBS: &[&str] = &["fd_close", "fd_seek"];

/// WASI `EFAULT`.
const WASI_EFAULT: i32 = 21;

/// Recent console output of one guest instance.
///
/// Cloning shares the buffer, so a handle kept by the caller keeps seeing
/// output after the guest moved into a client.
#[derive(Debug, Clone)]
pub struct GuestConsole {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for GuestConsole {
    fn default() -> Self {
        Self::with_capacity(CONSOLE_CAPACITY)
    }
}

impl GuestConsole {
    /// Create a console keeping at most `capacity` lines.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Check whether any retained line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    /// Drop all retained lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

/// Per-instance state reachable from host imports.
pub struct HostContext {
    /// Module label, attached to every console line.
    pub module: String,
    /// Console of this instance.
    pub console: GuestConsole,
    /// Linear memory, set once the instance exists.
    pub memory: Option<Memory>,
    /// Number of `emscripten_notify_memory_growth` calls.
    pub growth_notifications: u64,
    /// Resource limits enforced on the store.
    pub limits: StoreLimits,
}

impl HostContext {
    /// Create a context capping linear memory at `max_memory_bytes`.
    pub fn new(module: impl Into<String>, max_memory_bytes: usize) -> Self {
        Self {
            module: module.into(),
            console: GuestConsole::default(),
            memory: None,
            growth_notifications: 0,
            limits: StoreLimitsBuilder::new()
                .memory_size(max_memory_bytes)
                .instances(1)
                .build(),
        }
    }
}

/// Register every host import with a linker.
pub fn register_host_imports(linker: &mut Linker<HostContext>) -> Result<()> {
    register_wasi_imports(linker)?;
    register_env_imports(linker)?;
    Ok(())
}

/// Create a linker with all host imports registered.
pub fn create_linker(engine: &Engine) -> Result<Linker<HostContext>> {
    let mut linker = Linker::new(engine);
    register_host_imports(&mut linker)?;
    Ok(linker)
}

/// Complete a linker for one module.
///
/// `fd_close`/`fd_seek` get zero-returning stubs typed after the module's
/// own import declaration (toolchains disagree on whether `fd_seek` takes
/// an `i64` or a split pair of `i32`s). Every remaining unknown import
/// becomes a trap.
pub fn define_module_imports(linker: &mut Linker<HostContext>, module: &Module) -> Result<()> {
    for import in module.imports() {
        if import.module() != "wasi_snapshot_preview1" || !ZERO_STUBS.contains(&import.name()) {
            continue;
        }
        let ExternType::Func(func_ty) = import.ty() else {
            continue;
        };
        let results: Vec<ValType> = func_ty.results().collect();
        linker
            .func_new(
                import.module(),
                import.name(),
                func_ty.clone(),
                move |_caller, _params, out| {
                    for (slot, ty) in out.iter_mut().zip(&results) {
                        *slot = zero_value(ty);
                    }
                    Ok(())
                },
            )
            .map_err(|e| host_function_error(import.name(), e))?;
    }

    linker
        .define_unknown_imports_as_traps(module)
        .map_err(|e| host_function_error("unknown imports", e))?;
    Ok(())
}

fn zero_value(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        _ => Val::I32(0),
    }
}

fn host_function_error(function: &str, err: impl std::fmt::Display) -> FsError {
    FsError::HostFunction {
        function: function.to_string(),
        cause: err.to_string(),
    }
}

fn register_wasi_imports(linker: &mut Linker<HostContext>) -> Result<()> {
    // fd_write(fd, iovs, iovs_len, nwritten) -> errno
    // Console output from the guest; stdout/stderr text is forwarded to
    // tracing, other descriptors are accepted and discarded.
    linker
        .func_wrap(
            "wasi_snapshot_preview1",
            "fd_write",
            |mut caller: Caller<'_, HostContext>,
             fd: i32,
             iovs: i32,
             iovs_len: i32,
             nwritten: i32|
             -> i32 {
                let Some(memory) = caller.data().memory else {
                    return 0;
                };

                let mem = memory.data(&caller);
                let mut written: u32 = 0;
                let mut text = Vec::new();
                for i in 0..iovs_len.max(0) as u32 {
                    let base = iovs as u32 as usize + i as usize * 8;
                    let (Some(ptr), Some(len)) = (read_u32(mem, base), read_u32(mem, base + 4))
                    else {
                        return WASI_EFAULT;
                    };
                    let Some(chunk) = mem.get(ptr as usize..ptr as usize + len as usize) else {
                        return WASI_EFAULT;
                    };
                    if fd == 1 || fd == 2 {
                        text.extend_from_slice(chunk);
                    }
                    written = written.wrapping_add(len);
                }

                if !text.is_empty() {
                    let ctx = caller.data();
                    for line in String::from_utf8_lossy(&text).lines() {
                        if line.is_empty() {
                            continue;
                        }
                        tracing::info!(target: GUEST_TARGET, module = %ctx.module, fd, "{}", line);
                        ctx.console.push(line);
                    }
                }

                let out = nwritten as u32 as usize;
                match memory.data_mut(&mut caller).get_mut(out..out + 4) {
                    Some(slot) => {
                        slot.copy_from_slice(&written.to_le_bytes());
                        0
                    }
                    None => WASI_EFAULT,
                }
            },
        )
        .map_err(|e| host_function_error("fd_write", e))?;

    Ok(())
}

fn register_env_imports(linker: &mut Linker<HostContext>) -> Result<()> {
    // emscripten_notify_memory_growth(memory_index)
    linker
        .func_wrap(
            "env",
            "emscripten_notify_memory_growth",
            |mut caller: Caller<'_, HostContext>, memory_index: i32| {
                let ctx = caller.data_mut();
                ctx.growth_notifications += 1;
                tracing::trace!(module = %ctx.module, memory_index, "Guest memory grew");
            },
        )
        .map_err(|e| host_function_error("emscripten_notify_memory_growth", e))?;

    Ok(())
}

fn read_u32(mem: &[u8], offset: usize) -> Option<u32> {
    let bytes = mem.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_evicts_oldest() {
        let console = GuestConsole::with_capacity(2);
        console.push("one");
        console.push("two");
        console.push("three");
        assert_eq!(console.lines(), vec!["two".to_string(), "three".to_string()]);
        assert!(console.contains("thr"));
        console.clear();
        assert!(console.lines().is_empty());
    }

    #[test]
    fn console_clones_share_lines() {
        let console = GuestConsole::default();
        let handle = console.clone();
        console.push("mounted");
        assert!(handle.contains("mounted"));
    }

    #[test]
    fn read_u32_bounds() {
        let mem = [1u8, 0, 0, 0, 2];
        assert_eq!(read_u32(&mem, 0), Some(1));
        assert_eq!(read_u32(&mem, 2), None);
    }

    #[test]
    fn linker_registers_imports() {
        let engine = Engine::default();
        assert!(create_linker(&engine).is_ok());
    }
}
