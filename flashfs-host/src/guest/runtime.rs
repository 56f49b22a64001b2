//! Wasmtime engine and compiled-module cache.
//!
//! Engine binaries are a few hundred kilobytes and take noticeably longer
//! to compile than to instantiate. A [`GuestRuntime`] keys compiled modules
//! by a hash of their bytes, so every filesystem opened over the same
//! `littlefs.wasm` or `fatfs.wasm` shares one compilation.

use dashmap::DashMap;
use flashfs_core::error::{FsError, Result};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, Module};

const PAGE_BYTES: u64 = 64 * 1024;

/// 64 MiB of linear memory.
const DEFAULT_MAX_MEMORY_PAGES: u32 = 1024;

const DEFAULT_FUEL: u64 = 100_000_000;

/// Limits and compilation options shared by every guest of a runtime.
#[derive(Debug, Clone)]
pub struct GuestRuntimeConfig {
    /// Cap on an instance's linear memory, in 64 KiB wasm pages.
    pub max_memory_pages: u32,
    /// Meter guest execution with fuel.
    pub fuel_enabled: bool,
    /// Fuel each instance starts with.
    pub fuel_amount: u64,
    /// Reuse compiled modules across instances.
    pub cache_modules: bool,
    /// Keep DWARF info for guest backtraces.
    pub debug_info: bool,
}

impl Default for GuestRuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel_enabled: false,
            fuel_amount: DEFAULT_FUEL,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl GuestRuntimeConfig {
    /// Tight limits for tests: 16 MiB of memory, fuel on, no cache.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 256,
            fuel_enabled: true,
            fuel_amount: 10_000_000,
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Cap linear memory at `pages`.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Turn fuel metering on or off.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Turn the module cache on or off.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// The memory cap in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (u64::from(self.max_memory_pages) * PAGE_BYTES) as usize
    }

    fn engine_config(&self) -> Config {
        let mut config = Config::new();
        config
            .consume_fuel(self.fuel_enabled)
            .debug_info(self.debug_info)
            .strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

/// An engine binary compiled for this runtime.
#[derive(Debug)]
pub struct CompiledModule {
    module: Module,
    name: String,
}

impl CompiledModule {
    /// The wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Label the module was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Owns the wasmtime [`Engine`] every guest instance is created from.
pub struct GuestRuntime {
    engine: Engine,
    config: GuestRuntimeConfig,
    compiled: DashMap<u64, Arc<CompiledModule>>,
}

impl GuestRuntime {
    /// Build the wasmtime engine for `config`.
    pub fn new(config: GuestRuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.engine_config()).map_err(|e| FsError::ModuleLoad {
            module: "engine".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            engine,
            config,
            compiled: DashMap::new(),
        })
    }

    /// A runtime with [`GuestRuntimeConfig::default`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(GuestRuntimeConfig::default())
    }

    /// The wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Limits this runtime was built with.
    pub fn config(&self) -> &GuestRuntimeConfig {
        &self.config
    }

    /// Compile an engine binary, or hand back the earlier compilation of
    /// identical bytes.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let key = hash_bytes(wasm_bytes);
        if self.config.cache_modules {
            if let Some(hit) = self.compiled.get(&key) {
                tracing::debug!(module = name, "Reusing compiled engine");
                return Ok(Arc::clone(&hit));
            }
        }

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| FsError::ModuleLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        tracing::debug!(module = name, bytes = wasm_bytes.len(), "Compiled engine");

        let compiled = Arc::new(CompiledModule {
            module,
            name: name.to_string(),
        });
        if self.config.cache_modules {
            self.compiled.insert(key, Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Number of distinct binaries compiled and kept.
    pub fn cache_size(&self) -> usize {
        self.compiled.len()
    }

    /// Fuel a new instance starts with; `None` without metering.
    pub fn initial_fuel(&self) -> Option<u64> {
        self.config.fuel_enabled.then_some(self.config.fuel_amount)
    }
}

/// The file name of a module path, used as its label.
pub(crate) fn module_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
