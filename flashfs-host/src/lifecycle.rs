//! Lifecycle controller.
//!
//! Brings a freshly instantiated engine from `Uninitialized` to `Ready`:
//!
//! ```text
//! Uninitialized -> Initialized -> (Formatted) -> Mounted -> Ready
//!        \______________\______________\___________\-----> Closed
//! ```
//!
//! Init failures are fatal. A mount failure is fatal unless
//! `auto_format_on_mount_failure` is set, in which case the volume is
//! formatted and the mount retried exactly once. Whenever a step fails the
//! engine is cleaned up best-effort and the original error is returned.

use crate::client::Filesystem;
use flashfs_core::config::MountConfig;
use flashfs_core::error::{FsError, Result};
use flashfs_core::types::{DiskVersion, FsFamily};
use std::fmt;

/// Where an engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Instantiated, nothing configured.
    Uninitialized,
    /// Block parameters accepted.
    Initialized,
    /// Empty on-disk structures written.
    Formatted,
    /// Volume mounted.
    Mounted,
    /// Handed to a client.
    Ready,
    /// Cleaned up; terminal.
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Formatted => "formatted",
            Self::Mounted => "mounted",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Family-specific lifecycle exports.
///
/// Methods return the raw guest code; the controller decides what a
/// negative code means at each step. `Err` is reserved for failures that
/// never reached a return code (traps, missing exports, allocation).
pub trait EngineDriver {
    /// Client produced once the engine is ready.
    type Client: Filesystem;

    /// Engine family.
    fn family(&self) -> FsFamily;

    /// Select the on-disk version for fresh formats. Engines without a
    /// version selector ignore it.
    fn set_disk_version(&mut self, _version: DiskVersion) -> Result<()> {
        Ok(())
    }

    /// Pass block parameters to the engine.
    fn init(&mut self, mount: &MountConfig) -> Result<i32>;

    /// Pass block parameters and an existing image to the engine.
    fn init_from_image(&mut self, image: &[u8], mount: &MountConfig) -> Result<i32>;

    /// Write empty on-disk structures.
    fn format(&mut self) -> Result<i32>;

    /// Mount the volume. `None` when the engine mounts on first use.
    fn mount(&mut self) -> Result<Option<i32>>;

    /// Release engine resources.
    fn cleanup(&mut self) -> Result<()>;

    /// Wrap the ready engine in its client.
    fn into_client(self, mount: &MountConfig) -> Self::Client;
}

/// Drives an [`EngineDriver`] through the lifecycle state machine.
pub struct LifecycleController<D: EngineDriver> {
    driver: D,
    mount: MountConfig,
    state: LifecycleState,
}

impl<D: EngineDriver> LifecycleController<D> {
    /// Create a controller for an uninitialized engine.
    pub fn new(driver: D, mount: MountConfig) -> Self {
        Self {
            driver,
            mount,
            state: LifecycleState::Uninitialized,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Create a fresh filesystem: version selection, init, optional format,
    /// mount with fallback.
    pub fn start(mut self) -> Result<D::Client> {
        let result = self.run_fresh();
        self.finish(result)
    }

    /// Open an existing image: init from the image, mount with fallback.
    ///
    /// The disk version is left alone so the existing layout is never
    /// migrated.
    pub fn start_from_image(mut self, image: &[u8]) -> Result<D::Client> {
        let result = self.run_from_image(image);
        self.finish(result)
    }

    fn run_fresh(&mut self) -> Result<()> {
        if let Some(version) = self.mount.disk_version {
            self.driver.set_disk_version(version)?;
            tracing::debug!(family = %self.driver.family(), version = %version, "Disk version selected");
        }

        let code = self.driver.init(&self.mount)?;
        self.require_init(code, "initialize the engine")?;
        self.transition(LifecycleState::Initialized);

        if self.mount.format_on_init {
            self.format()?;
        }
        self.mount_with_fallback()
    }

    fn run_from_image(&mut self, image: &[u8]) -> Result<()> {
        let code = self.driver.init_from_image(image, &self.mount)?;
        self.require_init(code, "initialize the engine from an image")?;
        self.transition(LifecycleState::Initialized);
        self.mount_with_fallback()
    }

    fn require_init(&self, code: i32, action: &str) -> Result<()> {
        if code < 0 {
            return Err(FsError::Initialization {
                family: self.driver.family(),
                code,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn format(&mut self) -> Result<()> {
        let code = self.driver.format()?;
        self.require_init(code, "format the volume")?;
        self.transition(LifecycleState::Formatted);
        Ok(())
    }

    fn mount_with_fallback(&mut self) -> Result<()> {
        let code = match self.driver.mount()? {
            Some(code) if code < 0 => code,
            _ => {
                self.transition(LifecycleState::Mounted);
                return Ok(());
            }
        };

        let family = self.driver.family();
        if !self.mount.auto_format_on_mount_failure {
            return Err(FsError::Mount { family, code });
        }

        tracing::warn!(%family, code, "Mount failed, formatting and retrying once");
        self.format()?;
        match self.driver.mount()? {
            Some(code) if code < 0 => Err(FsError::Mount { family, code }),
            _ => {
                self.transition(LifecycleState::Mounted);
                Ok(())
            }
        }
    }

    fn finish(mut self, result: Result<()>) -> Result<D::Client> {
        match result {
            Ok(()) => {
                self.transition(LifecycleState::Ready);
                Ok(self.driver.into_client(&self.mount))
            }
            Err(error) => {
                if let Err(cleanup_error) = self.driver.cleanup() {
                    tracing::error!(
                        family = %self.driver.family(),
                        error = %cleanup_error,
                        "Cleanup after failed start also failed"
                    );
                }
                self.transition(LifecycleState::Closed);
                Err(error)
            }
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(
            family = %self.driver.family(),
            from = %self.state,
            to = %next,
            "Lifecycle transition"
        );
        self.state = next;
    }
}
