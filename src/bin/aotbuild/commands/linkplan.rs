//! `aotbuild linkplan` command
//!
//! Prints the link command a build with the same arguments would run,
//! without compiling anything.

use anyhow::Result;

use aotbuild::core::target::HostInfo;
use aotbuild::ops::aotbuild_build::linkplan;
use aotbuild::util::config::load_config;
use aotbuild::util::shell::Shell;

use super::build::build_options;
use super::{current_dir, resolve_tools};
use crate::cli::BuildArgs;

pub fn execute(args: BuildArgs, shell: &Shell) -> Result<i32> {
    let cwd = current_dir()?;
    let config = load_config(&cwd);
    let tools = resolve_tools(&config)?;
    let opts = build_options(args, &config, shell)?;

    let command = linkplan(&opts, &cwd, tools, &HostInfo::detect())?;
    println!("{}", command);

    Ok(0)
}
