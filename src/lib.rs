//! aotbuild - an ahead-of-time native build orchestrator
//!
//! This crate drives a managed-language program from source to a native
//! executable, shared library or firmware image: front-end compile, optional
//! whole-program scan, codegen, and a platform link.

pub mod builder;
pub mod core;
pub mod ops;
pub mod util;

/// Test utilities and mocks for aotbuild unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides recording fakes for tool execution, the
/// front-end, and the code generator.
#[cfg(test)]
pub mod test_support;

pub use builder::pipeline::{BuildContext, BuildFailure, BuildReport, Pipeline, PipelineStage};
pub use core::policy::BuildPolicy;
pub use core::target::{resolve_target, TargetProfile};
pub use util::config::{Config, ToolConfig};
