//! Implementation of `aotbuild build` and `aotbuild linkplan`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::builder::codegen::ExternalCodegen;
use crate::builder::frontend::{detect_link_type, ExternalFrontEnd};
use crate::builder::linker::LinkCommand;
use crate::builder::pipeline::{BuildContext, BuildReport, Pipeline};
use crate::core::layout::{
    default_output_path, discover_inputs, library_search_path, output_stem, reference_paths,
    runtime_references, BuildPaths,
};
use crate::core::policy::{BuildPolicy, LinkType, PolicyFlags};
use crate::core::target::{resolve_target, HostInfo, TargetRequest};
use crate::util::config::ToolConfig;
use crate::util::process::SystemRunner;
use crate::util::shell::{Shell, Status};

/// Options for the build command.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Source files; empty means every `*.cs` under the working directory
    pub inputs: Vec<PathBuf>,

    /// Output file (`-o`)
    pub output: Option<PathBuf>,

    /// Explicit link type; detected from the sources when absent
    pub link_type: Option<LinkType>,

    /// OS/arch/ISA/libc selectors
    pub target: TargetRequest,

    /// Policy flags; `link_type` is filled in during preparation
    pub flags: PolicyFlags,

    /// User reference assemblies (`-r`)
    pub references: Vec<PathBuf>,

    /// User defines (`-d`)
    pub defines: Vec<String>,

    pub lang_version: Option<String>,

    /// Object map file (`--map`)
    pub map: Option<PathBuf>,

    /// Emit size-analysis files (`--mstat`)
    pub mstat: bool,

    /// Flags appended to the link command
    pub ldflags: Vec<String>,

    /// Extra link inputs
    pub extra_ld: Vec<String>,

    /// Echo tool commands (`-x`)
    pub print_commands: bool,
}

/// Resolve everything a build needs without running any stage.
///
/// Configuration problems (unknown target names, a libc that does not fit the
/// OS, a missing library directory) fail here.
pub fn prepare(
    opts: &BuildOptions,
    cwd: &Path,
    tools: ToolConfig,
    host: &HostInfo,
) -> Result<BuildContext> {
    let profile = resolve_target(&opts.target, host)?;
    tracing::debug!("target: {}", profile);

    let sources = discover_inputs(&opts.inputs, cwd);
    let link_type = match opts.link_type {
        Some(link_type) => link_type,
        None if sources.is_empty() => LinkType::Executable,
        None => detect_link_type(&sources)?,
    };

    let flags = PolicyFlags {
        link_type,
        ..opts.flags.clone()
    };
    let policy = BuildPolicy::resolve(&flags, &profile);

    let lib_dirs = library_search_path(&tools, &profile)?;

    let output = match opts.output {
        Some(ref output) => output.clone(),
        None => default_output_path(&output_stem(&sources, cwd), profile.os, link_type),
    };
    let paths = BuildPaths::new(output, &profile, link_type, opts.map.clone(), opts.mstat);

    let references = reference_paths(&opts.references, policy.stdlib, &tools.ref_dir())?;
    let runtime_references = runtime_references(&lib_dirs, policy.stdlib)?;

    Ok(BuildContext {
        profile,
        policy,
        tools,
        paths,
        lib_dirs,
        sources,
        references,
        runtime_references,
        defines: opts.defines.clone(),
        lang_version: opts.lang_version.clone(),
        ldflags: opts.ldflags.clone(),
        extra_ld: opts.extra_ld.clone(),
    })
}

/// Run a full build with the external tools. Returns the process exit code.
pub fn build(opts: &BuildOptions, cwd: &Path, tools: ToolConfig, shell: &Shell) -> Result<i32> {
    let ctx = prepare(opts, cwd, tools, &HostInfo::detect())?;
    if ctx.sources.is_empty() {
        bail!("no input files in {}", cwd.display());
    }

    let frontend = ExternalFrontEnd::new(&ctx.tools.frontend);
    let codegen = ExternalCodegen::new(&ctx.tools.codegen);
    let runner = SystemRunner::new(opts.print_commands);

    let report = Pipeline::new(&ctx, &frontend, &codegen, &runner)
        .with_shell(shell.clone())
        .run();
    report_outcome(&ctx, &report, shell);
    Ok(report.exit_code())
}

fn report_outcome(ctx: &BuildContext, report: &BuildReport, shell: &Shell) {
    match report.failure {
        Some(ref failure) => shell.error(failure),
        None => {
            let artifact = if ctx.policy.no_link {
                &ctx.paths.object
            } else {
                &ctx.paths.output
            };
            shell.status(Status::Finished, artifact.display());
        }
    }
}

/// The link command a build with these options would run.
pub fn linkplan(
    opts: &BuildOptions,
    cwd: &Path,
    tools: ToolConfig,
    host: &HostInfo,
) -> Result<LinkCommand> {
    let ctx = prepare(opts, cwd, tools, host)?;
    Ok(ctx.link_command())
}
