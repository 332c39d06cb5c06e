//! Core data structures for aotbuild.
//!
//! This module contains the values a build is computed from:
//! - Target profiles (OS, architecture, libc flavor)
//! - The build policy derived from user flags
//! - The on-disk layout of libraries, inputs and outputs

pub mod layout;
pub mod policy;
pub mod target;

pub use layout::BuildPaths;
pub use policy::{BuildPolicy, LinkType, OptimizationMode, PolicyFlags, StandardLibrary};
pub use target::{Libc, TargetArch, TargetOs, TargetProfile};
