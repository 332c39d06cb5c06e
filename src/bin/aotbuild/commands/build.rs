//! `aotbuild build` command

use anyhow::Result;

use aotbuild::core::policy::PolicyFlags;
use aotbuild::ops::aotbuild_build::{build, BuildOptions};
use aotbuild::util::config::{load_config, Config};
use aotbuild::util::shell::Shell;

use super::{current_dir, resolve_tools, standard_library, target_request};
use crate::cli::BuildArgs;

pub fn execute(args: BuildArgs, shell: &Shell) -> Result<i32> {
    let cwd = current_dir()?;
    let config = load_config(&cwd);
    let tools = resolve_tools(&config)?;
    let opts = build_options(args, &config, shell)?;

    build(&opts, &cwd, tools, shell)
}

/// Fold CLI arguments and configuration into build options (CLI wins).
pub fn build_options(args: BuildArgs, config: &Config, shell: &Shell) -> Result<BuildOptions> {
    let stdlib = standard_library(&args.frontend, config, shell)?;

    let opt_level = args.opt_level.as_deref();
    let flags = PolicyFlags {
        optimize_size: args.optimize_space || opt_level == Some("s"),
        optimize_speed: args.optimize_time || opt_level == Some("t"),
        no_optimization: args.no_optimization || opt_level == Some("0"),
        stdlib,
        no_reflection: args.no_reflection,
        no_stack_trace_data: args.no_stack_trace_data,
        no_globalization: args.no_globalization,
        no_exception_messages: args.no_exception_messages,
        no_debug_info: args.no_debug_info,
        no_pie: args.no_pie,
        no_pthread: args.no_pthread,
        deterministic: args.frontend.deterministic || config.build.deterministic,
        separate_symbols: args.separate_symbols,
        no_link: args.no_link,
        keep_object: args.keep_object,
        features: args.features,
        direct_pinvokes: args.direct_pinvokes,
        ..Default::default()
    };

    // `--ldflags "-a -b"` carries several flags in one value
    let ldflags = args
        .ldflags
        .iter()
        .flat_map(|flags| flags.split_whitespace())
        .map(str::to_string)
        .collect();

    Ok(BuildOptions {
        target: target_request(&args.target, config),
        inputs: args.inputs,
        output: args.output,
        link_type: args.link_type,
        flags,
        references: args.frontend.references,
        defines: args.frontend.defines,
        lang_version: args.frontend.lang_version,
        map: args.map,
        mstat: args.mstat,
        ldflags,
        extra_ld: args.extra_ld,
        print_commands: args.print_commands || config.build.print_commands,
    })
}
