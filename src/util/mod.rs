//! Shared utilities

pub mod config;
pub mod diagnostic;
pub mod fs;
pub mod process;
pub mod shell;

pub use config::{Config, ToolConfig};
pub use diagnostic::Diagnostic;
pub use process::{CommandRunner, CommandSpec, SystemRunner};
pub use shell::Shell;
