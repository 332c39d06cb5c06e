//! Command implementations

pub mod build;
pub mod completions;
pub mod il;
pub mod linkplan;

use std::path::PathBuf;

use anyhow::{Context, Result};

use aotbuild::core::policy::StandardLibrary;
use aotbuild::core::target::TargetRequest;
use aotbuild::util::config::{default_home, Config, ToolConfig, ToolEnv};
use aotbuild::util::shell::Shell;

use crate::cli::{FrontEndArgs, TargetArgs};

/// Resolve tool locations from the environment and loaded configuration.
pub fn resolve_tools(config: &Config) -> Result<ToolConfig> {
    Ok(ToolConfig::resolve(
        &ToolEnv::capture(),
        &config.tools,
        &default_home()?,
    ))
}

/// Target selectors: CLI > config > host.
pub fn target_request(args: &TargetArgs, config: &Config) -> TargetRequest {
    TargetRequest {
        os: args.os.clone().or_else(|| config.build.os.clone()),
        arch: args.arch.clone().or_else(|| config.build.arch.clone()),
        isa: args.isa.clone(),
        libc: args.libc.clone().or_else(|| config.build.libc.clone()),
    }
}

/// Standard library: CLI > config > default.
///
/// An invalid `--stdlib` is an error; an invalid config value only warns.
pub fn standard_library(
    args: &FrontEndArgs,
    config: &Config,
    shell: &Shell,
) -> Result<StandardLibrary> {
    if let Some(ref stdlib) = args.stdlib {
        return stdlib.parse::<StandardLibrary>().map_err(anyhow::Error::msg);
    }
    let Some(ref stdlib) = config.build.stdlib else {
        return Ok(StandardLibrary::default());
    };
    Ok(stdlib.parse::<StandardLibrary>().unwrap_or_else(|e| {
        shell.warn(format!("ignoring config value: {}", e));
        StandardLibrary::default()
    }))
}

/// Working directory all relative paths and input discovery start from.
pub fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("failed to read the current directory")
}

