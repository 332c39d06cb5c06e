//! Implementation of `aotbuild il`: run only the front-end and keep its output.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::builder::frontend::{
    detect_link_type, implicit_defines, ExternalFrontEnd, FrontEnd, FrontEndRequest,
};
use crate::core::layout::{default_il_path, discover_inputs, output_stem, reference_paths};
use crate::core::policy::{LinkType, StandardLibrary};
use crate::core::target::{resolve_target, HostInfo, TargetRequest};
use crate::util::config::ToolConfig;
use crate::util::diagnostic::emit;
use crate::util::shell::{Shell, Status};

/// Options for the `il` command.
#[derive(Debug, Clone, Default)]
pub struct IlOptions {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub link_type: Option<LinkType>,
    /// Selects the implicit OS/arch defines
    pub target: TargetRequest,
    pub references: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub stdlib: StandardLibrary,
    pub lang_version: Option<String>,
    pub deterministic: bool,
    pub no_debug_info: bool,
    /// Release-mode IL (`-O`)
    pub optimize: bool,
}

/// Build the front-end request for an `il` run.
pub fn il_request(
    opts: &IlOptions,
    cwd: &Path,
    tools: &ToolConfig,
    host: &HostInfo,
) -> Result<FrontEndRequest> {
    let profile = resolve_target(&opts.target, host)?;
    let sources = discover_inputs(&opts.inputs, cwd);
    if sources.is_empty() {
        bail!("no input files in {}", cwd.display());
    }

    let link_type = match opts.link_type {
        Some(link_type) => link_type,
        None => detect_link_type(&sources)?,
    };
    let output = match opts.output {
        Some(ref output) => output.clone(),
        None => default_il_path(&output_stem(&sources, cwd), link_type),
    };

    let mut defines = implicit_defines(&profile);
    defines.extend(opts.defines.iter().cloned());

    Ok(FrontEndRequest {
        references: reference_paths(&opts.references, opts.stdlib, &tools.ref_dir())?,
        sources,
        defines,
        lang_version: opts.lang_version.clone(),
        output_kind: link_type,
        debug_info: !opts.no_debug_info,
        deterministic: opts.deterministic,
        optimize: opts.optimize,
        output,
    })
}

/// Compile a request and report the result. Returns the process exit code.
pub fn compile_il(frontend: &dyn FrontEnd, request: &FrontEndRequest, shell: &Shell) -> i32 {
    match frontend.compile(request) {
        Ok(artifact) => {
            for warning in &artifact.warnings {
                emit(warning, shell.use_color());
            }
            shell.status(Status::Finished, artifact.path.display());
            0
        }
        Err(failure) => {
            for diagnostic in failure.diagnostics() {
                emit(diagnostic, shell.use_color());
            }
            shell.error(&failure);
            1
        }
    }
}

/// Run `aotbuild il` with the external front-end.
pub fn il(opts: &IlOptions, cwd: &Path, tools: &ToolConfig, shell: &Shell) -> Result<i32> {
    let request = il_request(opts, cwd, tools, &HostInfo::detect())?;
    let frontend = ExternalFrontEnd::new(&tools.frontend);
    Ok(compile_il(&frontend, &request, shell))
}
