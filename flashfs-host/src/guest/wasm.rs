//! Wasmtime-backed guest instances.

use super::host::{GuestConsole, HostContext, create_linker, define_module_imports};
use super::runtime::{CompiledModule, GuestRuntime};
use super::{BufferIdentity, GuestModule};
use flashfs_core::error::{FsError, Result};
use std::collections::{HashMap, HashSet};
use wasmtime::{ExternType, Func, Instance, Memory, Store, Trap, Val, ValType};

/// An instantiated compiled engine.
pub struct WasmGuest {
    name: String,
    store: Store<HostContext>,
    instance: Instance,
    memory: Memory,
    /// Function exports declared by the module.
    exports: HashSet<String>,
    /// Resolved functions, filled on first call.
    funcs: HashMap<String, Func>,
}

impl WasmGuest {
    /// Instantiate a compiled module with the host imports.
    ///
    /// Linear memory is the export named `memory`, or the first exported
    /// memory when there is no such name.
    pub fn instantiate(runtime: &GuestRuntime, compiled: &CompiledModule) -> Result<Self> {
        let name = compiled.name().to_string();
        let load_error = |cause: String| FsError::ModuleLoad {
            module: name.clone(),
            cause,
        };

        let context = HostContext::new(name.clone(), runtime.config().max_memory_bytes());
        let mut store = Store::new(runtime.engine(), context);
        store.limiter(|ctx| &mut ctx.limits);

        if let Some(fuel) = runtime.initial_fuel() {
            store
                .set_fuel(fuel)
                .map_err(|e| load_error(format!("failed to set fuel: {}", e)))?;
        }

        let module = compiled.module();
        let mut linker = create_linker(runtime.engine())?;
        define_module_imports(&mut linker, module)?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| load_error(format!("failed to instantiate module: {:#}", e)))?;

        let memory = match instance.get_memory(&mut store, "memory") {
            Some(memory) => memory,
            None => instance
                .exports(&mut store)
                .find_map(|export| export.into_memory())
                .ok_or_else(|| load_error("module does not export a linear memory".to_string()))?,
        };
        store.data_mut().memory = Some(memory);

        let exports = module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect();

        tracing::debug!(
            module = %name,
            pages = memory.size(&store),
            "Instantiated guest module"
        );

        Ok(Self {
            name,
            store,
            instance,
            memory,
            exports,
            funcs: HashMap::new(),
        })
    }

    /// Compile and instantiate module bytes in one step.
    pub fn from_bytes(runtime: &GuestRuntime, name: &str, wasm_bytes: &[u8]) -> Result<Self> {
        let compiled = runtime.compile(name, wasm_bytes)?;
        Self::instantiate(runtime, &compiled)
    }

    /// Console output of this instance.
    pub fn console(&self) -> GuestConsole {
        self.store.data().console.clone()
    }

    /// Number of memory-growth notifications received from the guest.
    pub fn growth_notifications(&self) -> u64 {
        self.store.data().growth_notifications
    }

    fn func(&mut self, export: &str) -> Result<Func> {
        if let Some(func) = self.funcs.get(export) {
            return Ok(*func);
        }
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| FsError::MissingExport {
                name: export.to_string(),
            })?;
        self.funcs.insert(export.to_string(), func);
        Ok(func)
    }
}

impl GuestModule for WasmGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_export(&self, export: &str) -> bool {
        self.exports.contains(export)
    }

    fn call(&mut self, export: &str, args: &[i32]) -> Result<i32> {
        let func = self.func(export)?;
        let ty = func.ty(&self.store);

        let params: Vec<ValType> = ty.params().collect();
        if params.len() != args.len() || params.iter().any(|p| !matches!(p, ValType::I32)) {
            return Err(FsError::Trap {
                export: export.to_string(),
                cause: format!(
                    "signature mismatch: expected {} i32 argument(s), export takes {:?}",
                    args.len(),
                    params
                ),
            });
        }

        let params: Vec<Val> = args.iter().map(|&arg| Val::I32(arg)).collect();
        let mut results = vec![Val::I32(0); ty.results().len()];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| FsError::Trap {
                export: export.to_string(),
                cause: describe_trap(&e),
            })?;

        Ok(match results.first() {
            Some(Val::I32(value)) => *value,
            Some(Val::I64(value)) => *value as i32,
            _ => 0,
        })
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn buffer_identity(&self) -> BufferIdentity {
        BufferIdentity {
            base: self.memory.data_ptr(&self.store) as usize,
            len: self.memory.data_size(&self.store),
        }
    }
}

fn describe_trap(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Trap>() {
        Some(trap) => format!("{} ({:#})", trap, err),
        None => format!("{:#}", err),
    }
}
