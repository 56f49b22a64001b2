//! A deterministic guest engine for tests.
//!
//! [`SimulatedEngine`] implements all three export tables in plain Rust
//! over a `Vec<u8>` linear memory. It behaves like a compiled engine where
//! the host can observe it:
//!
//! - a first-fit guest heap; growing memory reallocates the buffer, so the
//!   buffer identity changes exactly like a grown wasm memory
//! - family-specific error codes and lifecycle rules (the handle-based
//!   LittleFS build needs a mount, `lfsjs` mounts inside init, FatFs mounts
//!   lazily)
//! - a handle/iterator directory API for LittleFS, a per-directory flat
//!   listing for `lfsjs` and a whole-volume file listing for FatFs
//! - engine-owned regions (the LittleFS image pointer) that the host must
//!   never free
//!
//! [`SimMonitor`] is a shared handle to the engine's counters and fault
//! injection, still usable after the engine has moved into a client.

mod sim;
mod volume;

pub use sim::SimulatedEngine;
pub use volume::{METADATA_BLOCKS, Node, Volume, VolumeError};

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Injected behavior for the next call of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Return this value without running the export.
    Return(i32),
    /// Trap without running the export.
    Trap,
}

#[derive(Debug, Default)]
struct MonitorState {
    live_allocations: usize,
    growth_events: u64,
    invalid_frees: u64,
    calls: HashMap<String, u64>,
    faults: HashMap<String, VecDeque<Fault>>,
}

/// Observation and fault-injection handle for a [`SimulatedEngine`].
#[derive(Debug, Clone, Default)]
pub struct SimMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl SimMonitor {
    /// Host allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations
    }

    /// Number of times linear memory grew.
    pub fn growth_events(&self) -> u64 {
        self.state.lock().growth_events
    }

    /// Frees of pointers the host never allocated (including engine-owned
    /// regions).
    pub fn invalid_frees(&self) -> u64 {
        self.state.lock().invalid_frees
    }

    /// Number of calls made to `export`, faulted ones included.
    pub fn calls(&self, export: &str) -> u64 {
        self.state.lock().calls.get(export).copied().unwrap_or(0)
    }

    /// Make the next call of `export` return `code` without side effects.
    ///
    /// Faults queue up: two `fail_next` calls fail the next two calls.
    pub fn fail_next(&self, export: &str, code: i32) {
        self.push_fault(export, Fault::Return(code));
    }

    /// Make the next call of `export` trap.
    pub fn trap_next(&self, export: &str) {
        self.push_fault(export, Fault::Trap);
    }

    fn push_fault(&self, export: &str, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(export.to_string())
            .or_default()
            .push_back(fault);
    }

    pub(crate) fn record_call(&self, export: &str) -> Option<Fault> {
        let mut state = self.state.lock();
        *state.calls.entry(export.to_string()).or_default() += 1;
        state.faults.get_mut(export).and_then(VecDeque::pop_front)
    }

    pub(crate) fn allocated(&self) {
        self.state.lock().live_allocations += 1;
    }

    pub(crate) fn freed(&self) {
        let mut state = self.state.lock();
        state.live_allocations = state.live_allocations.saturating_sub(1);
    }

    pub(crate) fn invalid_free(&self) {
        self.state.lock().invalid_frees += 1;
    }

    pub(crate) fn grew(&self) {
        self.state.lock().growth_events += 1;
    }
}
