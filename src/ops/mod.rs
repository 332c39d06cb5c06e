//! High-level operations.
//!
//! This module contains the implementation of aotbuild commands.

pub mod aotbuild_build;
pub mod aotbuild_il;

pub use aotbuild_build::{build, linkplan, prepare, BuildOptions};
pub use aotbuild_il::{il, IlOptions};
