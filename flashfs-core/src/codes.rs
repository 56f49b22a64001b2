//! Guest error-code tables.
//!
//! Each engine family reports failures in its own numeric domain. Both
//! LittleFS builds use negated POSIX errno values; FatFs returns negated
//! `FRESULT` values.
//! The same literal means different things in each (`-17` is "already
//! exists" for LittleFS but "buffer too small" for FatFs), so every
//! translation goes through the family's [`ErrorDomain`].

use crate::error::{FsError, Result};
use crate::types::FsFamily;

/// LittleFS error codes (`lfs_error`).
pub mod lfs {
    /// No error.
    pub const OK: i32 = 0;
    /// Error during device operation.
    pub const IO: i32 = -5;
    /// Corrupted.
    pub const CORRUPT: i32 = -84;
    /// No directory entry.
    pub const NOENT: i32 = -2;
    /// Entry already exists.
    pub const EXIST: i32 = -17;
    /// Entry is not a directory.
    pub const NOTDIR: i32 = -20;
    /// Entry is a directory.
    pub const ISDIR: i32 = -21;
    /// Directory is not empty.
    pub const NOTEMPTY: i32 = -39;
    /// Bad file number.
    pub const BADF: i32 = -9;
    /// File too large.
    pub const FBIG: i32 = -27;
    /// Invalid parameter.
    pub const INVAL: i32 = -22;
    /// No space left on device.
    pub const NOSPC: i32 = -28;
    /// No more memory available.
    pub const NOMEM: i32 = -12;
    /// File name too long.
    pub const NAMETOOLONG: i32 = -36;

    /// Directory entry type for regular files.
    pub const TYPE_REG: i32 = 1;
    /// Directory entry type for directories.
    pub const TYPE_DIR: i32 = 2;

    /// Maximum file name length (ESP-IDF default).
    pub const NAME_MAX: usize = 64;
}

/// FatFs error codes (negated `FRESULT`).
pub mod fatfs {
    /// Succeeded.
    pub const OK: i32 = 0;
    /// A hard error occurred in the low level disk I/O layer.
    pub const DISK_ERR: i32 = -1;
    /// Assertion failed.
    pub const INT_ERR: i32 = -2;
    /// The physical drive cannot work.
    pub const NOT_READY: i32 = -3;
    /// Could not find the file.
    pub const NO_FILE: i32 = -4;
    /// Could not find the path.
    pub const NO_PATH: i32 = -5;
    /// The path name format is invalid.
    pub const INVALID_NAME: i32 = -6;
    /// Access denied due to prohibited access or directory full.
    pub const DENIED: i32 = -7;
    /// An object with the same name already exists.
    pub const EXIST: i32 = -8;
    /// The file/directory object is invalid.
    pub const INVALID_OBJECT: i32 = -9;
    /// The physical drive is write protected.
    pub const WRITE_PROTECTED: i32 = -10;
    /// The logical drive number is invalid.
    pub const INVALID_DRIVE: i32 = -11;
    /// The volume has no work area.
    pub const NOT_ENABLED: i32 = -12;
    /// There is no valid FAT volume.
    pub const NO_FILESYSTEM: i32 = -13;
    /// The mkfs() aborted due to any problem.
    pub const MKFS_ABORTED: i32 = -14;
    /// Could not get a grant to access the volume within defined period.
    pub const TIMEOUT: i32 = -15;
    /// The operation is rejected according to the file sharing policy.
    pub const LOCKED: i32 = -16;
    /// Working buffer could not be allocated (also: listing buffer too small).
    pub const NOT_ENOUGH_CORE: i32 = -17;
    /// Number of open files exceeds the limit.
    pub const TOO_MANY_OPEN_FILES: i32 = -18;
    /// Given parameter is invalid.
    pub const INVALID_PARAMETER: i32 = -19;
}

/// How one engine family encodes failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDomain {
    /// Family this table belongs to.
    pub family: FsFamily,
    /// Codes meaning "no such file or directory".
    pub not_found: &'static [i32],
    /// Code meaning "already exists".
    pub exists: i32,
    /// Code meaning "device full".
    pub no_space: i32,
    /// Code the flat listing export returns when its buffer is too small.
    pub buffer_too_small: i32,
}

/// LittleFS error domain.
pub const LITTLEFS: ErrorDomain = ErrorDomain {
    family: FsFamily::LittleFs,
    not_found: &[lfs::NOENT],
    exists: lfs::EXIST,
    no_space: lfs::NOSPC,
    buffer_too_small: lfs::NOSPC,
};

/// Error domain of the path-oriented `lfsjs_*` LittleFS build.
pub const LFSJS: ErrorDomain = ErrorDomain {
    family: FsFamily::LfsJs,
    ..LITTLEFS
};

/// FatFs error domain.
pub const FATFS: ErrorDomain = ErrorDomain {
    family: FsFamily::FatFs,
    not_found: &[fatfs::NO_FILE, fatfs::NO_PATH],
    exists: fatfs::EXIST,
    no_space: fatfs::DENIED,
    buffer_too_small: fatfs::NOT_ENOUGH_CORE,
};

impl FsFamily {
    /// The error domain of this family.
    pub const fn error_domain(self) -> &'static ErrorDomain {
        match self {
            Self::LittleFs => &LITTLEFS,
            Self::LfsJs => &LFSJS,
            Self::FatFs => &FATFS,
        }
    }
}

impl ErrorDomain {
    /// Check whether `code` means "not found" in this domain.
    pub fn is_not_found(&self, code: i32) -> bool {
        self.not_found.contains(&code)
    }

    /// Translate a guest return value.
    ///
    /// Non-negative values pass through. Negative values become
    /// [`FsError::NotFound`] or [`FsError::Guest`] carrying the original code
    /// and `action`.
    pub fn check(&self, code: i32, action: impl FnOnce() -> String) -> Result<i32> {
        if code >= 0 {
            return Ok(code);
        }
        Err(self.error(code, action()))
    }

    /// Like [`check`](Self::check), but also maps the family's "device full"
    /// code to [`FsError::CapacityExhausted`].
    ///
    /// Only for operations that allocate blocks: FatFs reuses its "device
    /// full" code for "directory not empty" on removal.
    pub fn check_space(&self, code: i32, action: impl FnOnce() -> String) -> Result<i32> {
        if code == self.no_space {
            return Err(FsError::CapacityExhausted {
                action: action(),
                code,
            });
        }
        self.check(code, action)
    }

    /// Build the error for a negative guest code.
    pub fn error(&self, code: i32, action: String) -> FsError {
        let reason = self.describe(code);
        if self.is_not_found(code) {
            FsError::NotFound {
                action,
                code,
                reason,
            }
        } else {
            FsError::Guest {
                action,
                code,
                reason,
            }
        }
    }

    /// Human-readable name of a code, for diagnostics.
    pub fn describe(&self, code: i32) -> &'static str {
        match self.family {
            FsFamily::LittleFs | FsFamily::LfsJs => match code {
                lfs::OK => "ok",
                lfs::IO => "I/O error",
                lfs::CORRUPT => "corrupted",
                lfs::NOENT => "no such file or directory",
                lfs::EXIST => "already exists",
                lfs::NOTDIR => "not a directory",
                lfs::ISDIR => "is a directory",
                lfs::NOTEMPTY => "directory not empty",
                lfs::BADF => "bad file number",
                lfs::FBIG => "file too large",
                lfs::INVAL => "invalid parameter",
                lfs::NOSPC => "no space left on device",
                lfs::NOMEM => "out of memory",
                lfs::NAMETOOLONG => "file name too long",
                _ => "unknown error",
            },
            FsFamily::FatFs => match code {
                fatfs::OK => "ok",
                fatfs::DISK_ERR => "disk error",
                fatfs::INT_ERR => "internal error",
                fatfs::NOT_READY => "drive not ready",
                fatfs::NO_FILE => "no such file",
                fatfs::NO_PATH => "no such path",
                fatfs::INVALID_NAME => "invalid name",
                fatfs::DENIED => "access denied or directory full",
                fatfs::EXIST => "already exists",
                fatfs::INVALID_OBJECT => "invalid object",
                fatfs::WRITE_PROTECTED => "write protected",
                fatfs::INVALID_DRIVE => "invalid drive",
                fatfs::NOT_ENABLED => "volume not enabled",
                fatfs::NO_FILESYSTEM => "no FAT volume",
                fatfs::MKFS_ABORTED => "format aborted",
                fatfs::TIMEOUT => "timeout",
                fatfs::LOCKED => "locked",
                fatfs::NOT_ENOUGH_CORE => "not enough memory",
                fatfs::TOO_MANY_OPEN_FILES => "too many open files",
                fatfs::INVALID_PARAMETER => "invalid parameter",
                _ => "unknown error",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_literal_differs_per_family() {
        let lfs_err = LITTLEFS.error(-17, "mkdir \"a\"".to_string());
        let fat_err = FATFS.error(-17, "list files".to_string());
        assert_eq!(LITTLEFS.exists, -17);
        assert_eq!(FATFS.buffer_too_small, -17);
        assert!(matches!(lfs_err, FsError::Guest { code: -17, .. }));
        assert!(matches!(fat_err, FsError::Guest { code: -17, .. }));
        assert_ne!(LITTLEFS.describe(-17), FATFS.describe(-17));
    }

    #[test]
    fn check_passes_non_negative() {
        assert_eq!(LITTLEFS.check(0, || unreachable!()).unwrap(), 0);
        assert_eq!(FATFS.check(42, || unreachable!()).unwrap(), 42);
    }

    #[test]
    fn check_maps_distinguished_codes() {
        let err = LITTLEFS
            .check_space(lfs::NOSPC, || "write file \"a\"".to_string())
            .unwrap_err();
        assert!(err.is_capacity_exhausted());

        let err = FATFS
            .check_space(fatfs::DENIED, || "write file \"a\"".to_string())
            .unwrap_err();
        assert!(err.is_capacity_exhausted());

        // Removal reuses DENIED for "not empty"; plain check keeps it generic.
        let err = FATFS
            .check(fatfs::DENIED, || "delete \"d\"".to_string())
            .unwrap_err();
        assert!(matches!(err, FsError::Guest { code: -7, .. }));

        let err = LITTLEFS
            .check(lfs::NOENT, || "stat file \"a\"".to_string())
            .unwrap_err();
        assert!(err.is_not_found());

        for code in [fatfs::NO_FILE, fatfs::NO_PATH] {
            let err = FATFS.check(code, || "stat".to_string()).unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(err.guest_code(), Some(code));
        }

        let err = LITTLEFS
            .check(lfs::CORRUPT, || "read file \"a\"".to_string())
            .unwrap_err();
        assert!(matches!(err, FsError::Guest { code: -84, .. }));
    }

    #[test]
    fn errors_carry_code_description() {
        let err = FATFS.error(fatfs::NO_PATH, "list \"/x\"".to_string());
        assert!(err.to_string().contains("no such path"));

        let err = LFSJS.error(lfs::NOTEMPTY, "delete \"/d\"".to_string());
        assert_eq!(
            err.to_string(),
            "E104: Unable to delete \"/d\": directory not empty (code -39)"
        );
        assert_eq!(LFSJS.describe(lfs::NOSPC), LITTLEFS.describe(lfs::NOSPC));
        assert_eq!(FsFamily::LfsJs.error_domain().buffer_too_small, lfs::NOSPC);
    }
}
