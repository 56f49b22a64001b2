//! CLI command implementations.

pub mod cat;
pub mod create;
pub mod edit;
pub mod extract;
pub mod image;
pub mod list;
pub mod usage;
pub mod version;
