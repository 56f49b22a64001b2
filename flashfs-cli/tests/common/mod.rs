//! Shared helpers for flashfs-cli integration tests.

#![allow(dead_code)]

use std::process::{Command, Output};

/// The `flashfs` binary with a clean logging environment.
pub fn flashfs() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_flashfs"));
    cmd.env_remove("RUST_LOG")
        .env_remove("FLASHFS_LOG_LEVEL")
        .env_remove("FLASHFS_LITTLEFS_WASM")
        .env_remove("FLASHFS_FATFS_WASM")
        .env("FLASHFS_LOG_FORMAT", "compact");
    cmd
}

/// Run `flashfs` with `args`.
pub fn run(args: &[&str]) -> Output {
    flashfs().args(args).output().expect("flashfs should run")
}

/// Stdout as text.
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Stderr as text.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
