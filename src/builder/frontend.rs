//! Front-end compiler interface.
//!
//! The front-end turns source files into an IL assembly. [`ExternalFrontEnd`]
//! drives a command-line compiler and parses its diagnostics.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use miette::Diagnostic as MietteDiagnostic;
use regex::Regex;
use thiserror::Error;

use crate::core::policy::LinkType;
use crate::core::target::TargetProfile;
use crate::util::diagnostic::{parse_tool_output, Diagnostic};
use crate::util::fs::remove_file_quietly;
use crate::util::process::{exit_code, ProcessBuilder};

/// Conditional compilation symbol defined for every build.
pub const TOOL_DEFINE: &str = "AOTBUILD";

/// Inputs to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEndRequest {
    pub sources: Vec<PathBuf>,
    pub references: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub lang_version: Option<String>,
    pub output_kind: LinkType,
    pub debug_info: bool,
    pub deterministic: bool,
    /// Release-mode IL
    pub optimize: bool,
    /// Where the IL assembly is written.
    pub output: PathBuf,
}

/// A compiled IL assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlArtifact {
    pub path: PathBuf,
    /// Non-fatal diagnostics reported by the compiler.
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Error, MietteDiagnostic)]
pub enum FrontEndFailure {
    #[error("compilation failed with {} error(s)", .diagnostics.iter().filter(|d| d.is_error()).count())]
    #[diagnostic(code(aotbuild::frontend::errors))]
    Diagnostics { diagnostics: Vec<Diagnostic> },

    #[error("front-end compiler failed: {message}")]
    #[diagnostic(code(aotbuild::frontend::tool))]
    Tool { message: String },
}

impl FrontEndFailure {
    /// Diagnostics to show the user, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            FrontEndFailure::Diagnostics { diagnostics } => diagnostics,
            FrontEndFailure::Tool { .. } => &[],
        }
    }
}

/// A source-to-IL compiler.
pub trait FrontEnd {
    fn compile(&self, request: &FrontEndRequest) -> Result<IlArtifact, FrontEndFailure>;
}

/// Defines every build gets: the architecture, the OS, and the tool marker.
pub fn implicit_defines(profile: &TargetProfile) -> Vec<String> {
    vec![
        profile.arch.define().to_string(),
        profile.os.define().to_string(),
        TOOL_DEFINE.to_string(),
    ]
}

static ENTRY_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bstatic\s+(?:async\s+)?[\w<>\[\]\.]+\s+Main\s*\(\s*(?:[^,()]*)\)")
        .expect("entry point pattern is valid")
});

/// Whether a source text declares a `static Main` with at most one parameter.
pub fn declares_entry_point(source: &str) -> bool {
    ENTRY_POINT.is_match(source)
}

/// Pick executable or shared library from the sources when `--target` is absent.
pub fn detect_link_type(sources: &[PathBuf]) -> Result<LinkType> {
    for source in sources {
        let text = std::fs::read_to_string(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        if declares_entry_point(&text) {
            tracing::debug!("entry point found in {}", source.display());
            return Ok(LinkType::Executable);
        }
    }
    Ok(LinkType::SharedLibrary)
}

/// Runs the command-line front-end compiler.
#[derive(Debug, Clone)]
pub struct ExternalFrontEnd {
    tool: PathBuf,
}

impl ExternalFrontEnd {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        ExternalFrontEnd { tool: tool.into() }
    }

    /// Arguments for a request.
    pub fn arguments(request: &FrontEndRequest) -> Vec<String> {
        let mut args = vec![
            "-nologo".to_string(),
            "-nostdlib".to_string(),
            "-unsafe".to_string(),
            format!("-out:{}", request.output.display()),
            format!(
                "-target:{}",
                match request.output_kind {
                    LinkType::Executable => "exe",
                    LinkType::WindowedExecutable => "winexe",
                    LinkType::SharedLibrary => "library",
                }
            ),
        ];
        if !request.defines.is_empty() {
            args.push(format!("-define:{}", request.defines.join(";")));
        }
        if let Some(ref version) = request.lang_version {
            args.push(format!("-langversion:{}", version));
        }
        if request.debug_info {
            args.push("-debug:embedded".to_string());
        }
        if request.deterministic {
            args.push("-deterministic".to_string());
        }
        if request.optimize {
            args.push("-optimize+".to_string());
        }
        args.extend(
            request
                .references
                .iter()
                .map(|r| format!("-r:{}", r.display())),
        );
        args.extend(request.sources.iter().map(|s| s.display().to_string()));
        args
    }
}

impl FrontEnd for ExternalFrontEnd {
    fn compile(&self, request: &FrontEndRequest) -> Result<IlArtifact, FrontEndFailure> {
        let cmd = ProcessBuilder::new(&self.tool).args(Self::arguments(request));
        tracing::debug!("running front-end: {}", cmd.display_command());

        let output = cmd.exec().map_err(|e| FrontEndFailure::Tool {
            message: format!("{:#}", e),
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let diagnostics = parse_tool_output(&text);

        // Warnings promoted to errors are reported with error severity.
        if diagnostics.iter().any(|d| d.is_error()) {
            remove_il(&request.output);
            return Err(FrontEndFailure::Diagnostics { diagnostics });
        }
        if !output.status.success() {
            remove_il(&request.output);
            return Err(FrontEndFailure::Tool {
                message: format!(
                    "`{}` exited with code {}",
                    self.tool.display(),
                    exit_code(output.status)
                ),
            });
        }

        Ok(IlArtifact {
            path: request.output.clone(),
            warnings: diagnostics,
        })
    }
}

fn remove_il(path: &Path) {
    remove_file_quietly(path);
}
