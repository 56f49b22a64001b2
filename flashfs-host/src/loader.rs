//! Filesystem construction.
//!
//! Construction is the only asynchronous step: fetching and compiling the
//! engine module. Once a guest is instantiated, startup and every later
//! operation are synchronous.
//!
//! - [`create_filesystem`] / [`create_filesystem_from_image`] read the
//!   module from [`FsConfig::module_location`], compile and instantiate it
//!   on the blocking pool, then run the lifecycle.
//! - [`start_filesystem`] / [`start_filesystem_from_image`] run the
//!   lifecycle over an already-instantiated guest.

use crate::arena::MemoryArena;
use crate::client::{FatFsDriver, Filesystem, LfsJsDriver, LittleFsDriver};
use crate::guest::{GuestModule, GuestRuntime, WasmGuest, module_label};
use crate::lifecycle::{EngineDriver, LifecycleController};
use flashfs_core::config::{FsConfig, MountConfig};
use flashfs_core::error::{FsError, Result};
use flashfs_core::types::FsFamily;
use std::sync::{Arc, OnceLock};

/// Exports a guest must have before the lifecycle is attempted.
fn required_exports(family: FsFamily) -> &'static [&'static str] {
    match family {
        FsFamily::LittleFs => &["malloc", "free", "lfs_wasm_init", "lfs_wasm_mount"],
        FsFamily::LfsJs => &["malloc", "free", "lfsjs_init", "lfsjs_list"],
        FsFamily::FatFs => &["malloc", "free", "fatfsjs_init", "fatfsjs_list"],
    }
}

/// Start a fresh filesystem on an instantiated guest.
pub fn start_filesystem(
    guest: Box<dyn GuestModule>,
    config: &FsConfig,
) -> Result<Box<dyn Filesystem>> {
    let mount = config.resolve()?;
    start(guest, mount, None)
}

/// Open an existing image on an instantiated guest.
///
/// The image is validated against the block size before the guest is
/// touched.
pub fn start_filesystem_from_image(
    guest: Box<dyn GuestModule>,
    image: &[u8],
    config: &FsConfig,
) -> Result<Box<dyn Filesystem>> {
    let mount = config.resolve_for_image(image.len())?;
    start(guest, mount, Some(image))
}

fn start(
    guest: Box<dyn GuestModule>,
    mount: MountConfig,
    image: Option<&[u8]>,
) -> Result<Box<dyn Filesystem>> {
    if let Some(missing) = required_exports(mount.family)
        .iter()
        .find(|export| !guest.has_export(export))
    {
        return Err(FsError::ModuleLoad {
            module: guest.name().to_string(),
            cause: format!(
                "not a {} engine: missing export \"{}\"",
                mount.family, missing
            ),
        });
    }

    tracing::info!(
        module = guest.name(),
        family = %mount.family,
        block_size = mount.geometry.block_size,
        block_count = mount.geometry.block_count,
        from_image = image.is_some(),
        "Starting filesystem"
    );

    let arena = MemoryArena::new(guest);
    let list_buffer_size = mount.list_buffer_size;
    match mount.family {
        FsFamily::LittleFs => launch(LittleFsDriver::new(arena), mount, image),
        FsFamily::LfsJs => launch(LfsJsDriver::new(arena, list_buffer_size), mount, image),
        FsFamily::FatFs => launch(FatFsDriver::new(arena, list_buffer_size), mount, image),
    }
}

fn launch<D>(driver: D, mount: MountConfig, image: Option<&[u8]>) -> Result<Box<dyn Filesystem>>
where
    D: EngineDriver,
    D::Client: 'static,
{
    let controller = LifecycleController::new(driver, mount);
    let client = match image {
        Some(image) => controller.start_from_image(image)?,
        None => controller.start()?,
    };
    Ok(Box::new(client))
}

/// Process-wide runtime shared by every filesystem created through this
/// module, so one engine binary compiles once.
fn shared_runtime() -> Result<Arc<GuestRuntime>> {
    static RUNTIME: OnceLock<Arc<GuestRuntime>> = OnceLock::new();
    if let Some(runtime) = RUNTIME.get() {
        return Ok(Arc::clone(runtime));
    }
    let runtime = Arc::new(GuestRuntime::with_defaults()?);
    Ok(Arc::clone(RUNTIME.get_or_init(|| runtime)))
}

/// Load the engine module and create a fresh filesystem.
pub async fn create_filesystem(config: &FsConfig) -> Result<Box<dyn Filesystem>> {
    create_filesystem_with_runtime(shared_runtime()?, config).await
}

/// Load the engine module and open an existing image.
pub async fn create_filesystem_from_image(
    image: &[u8],
    config: &FsConfig,
) -> Result<Box<dyn Filesystem>> {
    create_filesystem_from_image_with_runtime(shared_runtime()?, image, config).await
}

/// Like [`create_filesystem`], on a caller-provided runtime.
pub async fn create_filesystem_with_runtime(
    runtime: Arc<GuestRuntime>,
    config: &FsConfig,
) -> Result<Box<dyn Filesystem>> {
    let mount = config.resolve()?;
    let (name, bytes) = read_module(config).await?;
    run_blocking(move || {
        let guest = instantiate(&runtime, &name, &bytes)?;
        start(guest, mount, None)
    })
    .await
}

/// Like [`create_filesystem_from_image`], on a caller-provided runtime.
pub async fn create_filesystem_from_image_with_runtime(
    runtime: Arc<GuestRuntime>,
    image: &[u8],
    config: &FsConfig,
) -> Result<Box<dyn Filesystem>> {
    let mount = config.resolve_for_image(image.len())?;
    let (name, bytes) = read_module(config).await?;
    let image = image.to_vec();
    run_blocking(move || {
        let guest = instantiate(&runtime, &name, &bytes)?;
        start(guest, mount, Some(&image))
    })
    .await
}

async fn read_module(config: &FsConfig) -> Result<(String, Vec<u8>)> {
    let path = config.module_location();
    tracing::debug!(path = %path.display(), family = %config.family, "Loading engine module");
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| FsError::ModuleLoad {
            module: path.display().to_string(),
            cause: e.to_string(),
        })?;
    Ok((module_label(&path), bytes))
}

fn instantiate(runtime: &GuestRuntime, name: &str, bytes: &[u8]) -> Result<Box<dyn GuestModule>> {
    let compiled = runtime.compile(name, bytes)?;
    Ok(Box::new(WasmGuest::instantiate(runtime, &compiled)?))
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| FsError::ModuleLoad {
            module: "engine".to_string(),
            cause: format!("startup task failed: {}", e),
        })?
}
