//! Build pipeline.
//!
//! A build is a fixed sequence of stages:
//!
//! ```text
//! FrontEndCompile -> WholeProgramScan -> Codegen -> NativeObjectEmit
//!     -> PlatformPatch -> Link -> PostLinkFixups
//! ```
//!
//! Stages run one at a time. Each has a predicate over the target and policy;
//! a stage whose predicate is false is recorded as skipped. The first failing
//! stage stops the build, and nothing after it runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use miette::Diagnostic;
use thiserror::Error;

use crate::builder::codegen::{CodegenEngine, CodegenOutput, CodegenRequest};
use crate::builder::exports::write_exports;
use crate::builder::frontend::{implicit_defines, FrontEnd, FrontEndRequest, IlArtifact};
use crate::builder::linker::{self, LinkCommand, LinkRequest};
use crate::builder::patch::patch_riscv_abi;
use crate::builder::postlink::PostLinkSteps;
use crate::builder::scan::{ProgramGraph, ScanResult, Scanner};
use crate::core::layout::{crt_dir, BuildPaths};
use crate::core::policy::{BuildPolicy, LinkType, OptimizationMode};
use crate::core::target::TargetProfile;
use crate::util::config::ToolConfig;
use crate::util::diagnostic::{emit, suggestions};
use crate::util::fs::remove_file_quietly;
use crate::util::process::CommandRunner;
use crate::util::shell::{format_duration, Shell, Status};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    FrontEndCompile,
    WholeProgramScan,
    Codegen,
    NativeObjectEmit,
    PlatformPatch,
    Link,
    PostLinkFixups,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::FrontEndCompile,
        PipelineStage::WholeProgramScan,
        PipelineStage::Codegen,
        PipelineStage::NativeObjectEmit,
        PipelineStage::PlatformPatch,
        PipelineStage::Link,
        PipelineStage::PostLinkFixups,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::FrontEndCompile => "front-end compile",
            PipelineStage::WholeProgramScan => "whole-program scan",
            PipelineStage::Codegen => "codegen",
            PipelineStage::NativeObjectEmit => "native object emit",
            PipelineStage::PlatformPatch => "platform patch",
            PipelineStage::Link => "link",
            PipelineStage::PostLinkFixups => "post-link fixups",
        }
    }

    fn status(&self) -> Status {
        match self {
            PipelineStage::FrontEndCompile => Status::Compiling,
            PipelineStage::WholeProgramScan => Status::Scanning,
            PipelineStage::Codegen | PipelineStage::NativeObjectEmit => Status::Generating,
            PipelineStage::PlatformPatch | PipelineStage::PostLinkFixups => Status::Patching,
            PipelineStage::Link => Status::Linking,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Ran,
    Skipped,
    Failed,
}

/// The stage that stopped a build.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("{stage} failed: {message}")]
#[diagnostic(code(aotbuild::build::stage_failed))]
pub struct BuildFailure {
    pub stage: PipelineStage,
    pub message: String,
    pub exit_code: i32,
}

/// Per-stage outcomes of one run. Stages after a failure are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub stages: Vec<(PipelineStage, StageOutcome)>,
    pub failure: Option<BuildFailure>,
}

impl BuildReport {
    pub fn outcome(&self, stage: PipelineStage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| *outcome)
    }

    pub fn ran(&self, stage: PipelineStage) -> bool {
        self.outcome(stage) == Some(StageOutcome::Ran)
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Process exit code for the build.
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map_or(0, |f| f.exit_code)
    }
}

/// Everything a build needs, resolved before the first stage runs.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub profile: TargetProfile,
    pub policy: BuildPolicy,
    pub tools: ToolConfig,
    pub paths: BuildPaths,
    /// Library search directories; the first is the primary one.
    pub lib_dirs: Vec<PathBuf>,
    pub sources: Vec<PathBuf>,
    /// Reference assemblies for the front-end.
    pub references: Vec<PathBuf>,
    /// Runtime assemblies for codegen.
    pub runtime_references: BTreeMap<String, PathBuf>,
    /// User defines, added after the implicit ones.
    pub defines: Vec<String>,
    pub lang_version: Option<String>,
    pub ldflags: Vec<String>,
    pub extra_ld: Vec<String>,
}

impl BuildContext {
    /// Link request for this build.
    pub fn link_request(&self) -> LinkRequest<'_> {
        LinkRequest {
            profile: &self.profile,
            policy: &self.policy,
            linker: self.tools.ld.clone(),
            object: self.paths.object.clone(),
            output: self.paths.output.clone(),
            lib_dirs: self.lib_dirs.clone(),
            vendor_dir: self.tools.zkvm_dir(),
            vendor_sim_dir: self.tools.zkvm_sim_dir(),
            exports_file: self.paths.exports.clone(),
            ldflags: self.ldflags.clone(),
            extra_ld: self.extra_ld.clone(),
        }
    }

    /// The link command this build would run.
    pub fn link_command(&self) -> LinkCommand {
        linker::synthesize(&self.link_request())
    }

    fn frontend_request(&self, output: PathBuf) -> FrontEndRequest {
        let mut defines = implicit_defines(&self.profile);
        defines.extend(self.defines.iter().cloned());
        FrontEndRequest {
            sources: self.sources.clone(),
            references: self.references.clone(),
            defines,
            lang_version: self.lang_version.clone(),
            output_kind: self.policy.link_type,
            debug_info: self.policy.debug_info,
            deterministic: self.policy.deterministic,
            optimize: self.policy.optimization != OptimizationMode::None,
            output,
        }
    }

    fn codegen_request(&self, il: &Path) -> CodegenRequest<'_> {
        CodegenRequest {
            il: il.to_path_buf(),
            home: self.tools.home.clone(),
            references: self.runtime_references.clone(),
            profile: &self.profile,
            policy: &self.policy,
            object: self.paths.object.clone(),
            map: self.paths.map.clone(),
            mstat: self.paths.mstat.clone(),
        }
    }

    /// Files the platform patch rewrites: the object and, for zkVM
    /// executables, the startup objects linked with it.
    fn abi_patch_targets(&self) -> Vec<PathBuf> {
        let mut targets = vec![self.paths.object.clone()];
        let libc = self.profile.libc;
        if libc.is_zkvm() && self.policy.link_type != LinkType::SharedLibrary {
            let primary = self.lib_dirs.first().cloned().unwrap_or_default();
            let vendor = self.tools.zkvm_dir();
            targets.push(crt_dir(libc, &primary, &vendor).join("crt1.o"));
            targets.push(primary.join("crti.o"));
        }
        targets
    }
}

/// A stage error before it is attributed to a stage.
struct StageError {
    message: String,
    exit_code: i32,
}

impl StageError {
    fn new(message: impl Into<String>) -> Self {
        StageError {
            message: message.into(),
            exit_code: 1,
        }
    }

    fn tool(message: impl Into<String>, exit_code: i32) -> Self {
        StageError {
            message: message.into(),
            exit_code,
        }
    }
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> Self {
        StageError::new(format!("{:#}", e))
    }
}

/// Artifacts handed from one stage to the next.
#[derive(Default)]
struct RunState {
    il: Option<IlArtifact>,
    program: Option<Box<dyn ProgramGraph>>,
    scan: Option<ScanResult>,
    output: Option<CodegenOutput>,
}

/// Runs one build.
pub struct Pipeline<'a> {
    ctx: &'a BuildContext,
    frontend: &'a dyn FrontEnd,
    codegen: &'a dyn CodegenEngine,
    runner: &'a dyn CommandRunner,
    scanner: Scanner,
    shell: Shell,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        frontend: &'a dyn FrontEnd,
        codegen: &'a dyn CodegenEngine,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Pipeline {
            ctx,
            frontend,
            codegen,
            runner,
            scanner: Scanner::new(),
            shell: Shell::quiet(),
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner;
        self
    }

    fn should_run(&self, stage: PipelineStage) -> bool {
        let ctx = self.ctx;
        let linking = !ctx.policy.no_link;
        match stage {
            PipelineStage::FrontEndCompile
            | PipelineStage::Codegen
            | PipelineStage::NativeObjectEmit => true,
            PipelineStage::WholeProgramScan => ctx.policy.use_whole_program_scanner(),
            PipelineStage::PlatformPatch => linking && ctx.profile.arch.requires_abi_patch(),
            PipelineStage::Link => linking,
            // Reached only after a successful link.
            PipelineStage::PostLinkFixups => linking && !self.post_link_steps().is_empty(),
        }
    }

    fn post_link_steps(&self) -> PostLinkSteps {
        PostLinkSteps::plan(
            &self.ctx.profile,
            &self.ctx.policy,
            &self.ctx.tools,
            &self.ctx.paths,
        )
    }

    /// Run every stage and report what happened.
    pub fn run(&self) -> BuildReport {
        let mut report = BuildReport::default();
        let workdir = match tempfile::Builder::new().prefix("aotbuild").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                report.failure = Some(BuildFailure {
                    stage: PipelineStage::FrontEndCompile,
                    message: format!("failed to create a working directory: {}", e),
                    exit_code: 1,
                });
                report
                    .stages
                    .push((PipelineStage::FrontEndCompile, StageOutcome::Failed));
                return report;
            }
        };

        let mut state = RunState::default();
        let build_start = Instant::now();

        for stage in PipelineStage::ALL {
            if !self.should_run(stage) {
                tracing::debug!("skipping {}", stage);
                report.stages.push((stage, StageOutcome::Skipped));
                continue;
            }

            let spinner = self
                .shell
                .spinner(stage.status(), self.ctx.paths.output.display());
            let result = self.execute(stage, &mut state, workdir.path());
            tracing::debug!("{} took {}", stage, format_duration(spinner.elapsed()));
            drop(spinner);

            if let Err(error) = result {
                report.stages.push((stage, StageOutcome::Failed));
                report.failure = Some(BuildFailure {
                    stage,
                    message: error.message,
                    exit_code: error.exit_code,
                });
                if !self.ctx.policy.keep_object {
                    remove_file_quietly(&self.ctx.paths.object);
                }
                return report;
            }
            report.stages.push((stage, StageOutcome::Ran));
        }

        tracing::debug!("build took {}", format_duration(build_start.elapsed()));
        report
    }

    fn execute(
        &self,
        stage: PipelineStage,
        state: &mut RunState,
        workdir: &Path,
    ) -> Result<(), StageError> {
        match stage {
            PipelineStage::FrontEndCompile => self.compile_frontend(state, workdir),
            PipelineStage::WholeProgramScan => self.scan(state),
            PipelineStage::Codegen => self.generate(state),
            PipelineStage::NativeObjectEmit => self.emit_object(state),
            PipelineStage::PlatformPatch => self.patch_platform(),
            PipelineStage::Link => self.link(),
            PipelineStage::PostLinkFixups => self.fix_up(),
        }
    }

    fn compile_frontend(&self, state: &mut RunState, workdir: &Path) -> Result<(), StageError> {
        let name = self
            .ctx
            .paths
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        let extension = match self.ctx.policy.link_type {
            LinkType::SharedLibrary => "dll",
            _ => "exe",
        };
        let request = self
            .ctx
            .frontend_request(workdir.join(format!("{}.{}", name, extension)));

        match self.frontend.compile(&request) {
            Ok(il) => {
                for warning in &il.warnings {
                    emit(warning, self.shell.use_color());
                }
                state.il = Some(il);
                Ok(())
            }
            Err(failure) => {
                for diagnostic in failure.diagnostics() {
                    emit(diagnostic, self.shell.use_color());
                }
                Err(StageError::new(failure.to_string()))
            }
        }
    }

    fn il_path(state: &RunState) -> Result<PathBuf, StageError> {
        state
            .il
            .as_ref()
            .map(|il| il.path.clone())
            .ok_or_else(|| StageError::new("no IL was produced"))
    }

    fn scan(&self, state: &mut RunState) -> Result<(), StageError> {
        let il = Self::il_path(state)?;
        let request = self.ctx.codegen_request(&il);
        let program = self.codegen.load_program(&request)?;
        let result = self.scanner.scan(program.as_ref())?;
        tracing::debug!(
            "scan found {} reachable methods, {} import failures",
            result.reachable.len(),
            result.import_failures.len()
        );
        state.program = Some(program);
        state.scan = Some(result);
        Ok(())
    }

    fn generate(&self, state: &mut RunState) -> Result<(), StageError> {
        let il = Self::il_path(state)?;
        let request = self.ctx.codegen_request(&il);
        let program = match state.program.take() {
            Some(program) => program,
            None => self.codegen.load_program(&request)?,
        };
        // The scan result is consumed here and dropped with the run state.
        let scan = state.scan.take();

        let output = self
            .codegen
            .compile(&request, program.as_ref(), scan.as_ref())
            .map_err(|e| StageError::new(error_chain(&e)))?;
        state.output = Some(output);
        Ok(())
    }

    fn emit_object(&self, state: &mut RunState) -> Result<(), StageError> {
        let paths = &self.ctx.paths;
        let Some(output) = state.output.as_ref() else {
            return Err(StageError::new("codegen produced no object"));
        };
        if !output.object.is_file() {
            return Err(StageError::new(format!(
                "object file '{}' was not written",
                output.object.display()
            )));
        }
        if let Some(ref exports) = paths.exports {
            write_exports(exports, self.ctx.profile.os, &output.exported_symbols)?;
        }
        Ok(())
    }

    fn patch_platform(&self) -> Result<(), StageError> {
        for target in self.ctx.abi_patch_targets() {
            patch_riscv_abi(&target)?;
        }
        Ok(())
    }

    fn link(&self) -> Result<(), StageError> {
        let command = self.ctx.link_command();
        let result = self.runner.run(&command);
        let keep = self.ctx.policy.keep_object;

        if !keep {
            remove_file_quietly(&self.ctx.paths.object);
        }

        let code = result.map_err(|e| {
            StageError::new(format!("{:#}\n{}", e, suggestions::PRINT_COMMANDS))
        })?;
        if code != 0 {
            return Err(StageError::tool(
                format!("linker exited with code {}", code),
                code,
            ));
        }

        if !keep {
            if let Some(ref exports) = self.ctx.paths.exports {
                remove_file_quietly(exports);
            }
        }
        Ok(())
    }

    fn fix_up(&self) -> Result<(), StageError> {
        match self.post_link_steps().run(self.runner)? {
            Some(failed) => Err(StageError::tool(
                format!("{} exited with code {}", failed.tool(), failed.exit_code),
                failed.exit_code,
            )),
            None => Ok(()),
        }
    }
}

/// `error: cause: cause` for an error and its sources.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
