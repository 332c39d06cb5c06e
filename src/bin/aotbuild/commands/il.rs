//! `aotbuild il` command

use anyhow::Result;

use aotbuild::ops::aotbuild_il::{il, IlOptions};
use aotbuild::util::config::load_config;
use aotbuild::util::shell::Shell;

use super::{current_dir, resolve_tools, standard_library, target_request};
use crate::cli::IlArgs;

pub fn execute(args: IlArgs, shell: &Shell) -> Result<i32> {
    let cwd = current_dir()?;
    let config = load_config(&cwd);
    let tools = resolve_tools(&config)?;

    let opts = IlOptions {
        stdlib: standard_library(&args.frontend, &config, shell)?,
        target: target_request(&args.target, &config),
        inputs: args.inputs,
        output: args.output,
        link_type: args.link_type,
        references: args.frontend.references,
        defines: args.frontend.defines,
        lang_version: args.frontend.lang_version,
        deterministic: args.frontend.deterministic || config.build.deterministic,
        no_debug_info: args.no_debug_info,
        optimize: args.optimize,
    };

    il(&opts, &cwd, &tools, shell)
}
