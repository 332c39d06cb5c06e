//! Codegen engine interface and the adapter for the external code generator.
//!
//! The engine exposes the compiled program as a [`ProgramGraph`] so the
//! scanner can analyze it, then compiles against either that graph or a
//! [`ScannedProgram`] built from the scan.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builder::scan::{ImportError, MethodBody, ProgramGraph, ScanResult, ScannedProgram};
use crate::core::layout::MstatPaths;
use crate::core::policy::{BuildPolicy, OptimizationMode, StandardLibrary};
use crate::core::target::TargetProfile;
use crate::util::process::{exit_code, ProcessBuilder};

/// Inputs for code generation.
#[derive(Debug, Clone)]
pub struct CodegenRequest<'a> {
    pub il: PathBuf,
    /// Install home; relative P/Invoke list files resolve against it.
    pub home: PathBuf,
    /// Runtime assemblies by simple name.
    pub references: BTreeMap<String, PathBuf>,
    pub profile: &'a TargetProfile,
    pub policy: &'a BuildPolicy,
    pub object: PathBuf,
    pub map: Option<PathBuf>,
    pub mstat: Option<MstatPaths>,
}

/// Result of a successful codegen run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOutput {
    pub object: PathBuf,
    /// Symbols exported from a shared library.
    pub exported_symbols: Vec<String>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CodegenError {
    #[error("failed to compile '{method}'")]
    #[diagnostic(code(aotbuild::codegen::import))]
    Import {
        method: String,
        #[source]
        error: ImportError,
    },

    #[error("code generation failed: {message}")]
    #[diagnostic(code(aotbuild::codegen::failed))]
    Failed { message: String },
}

impl CodegenError {
    pub fn failed(message: impl Into<String>) -> Self {
        CodegenError::Failed {
            message: message.into(),
        }
    }
}

/// A code generator.
pub trait CodegenEngine {
    /// Load the program described by the IL artifact.
    fn load_program(&self, request: &CodegenRequest<'_>) -> Result<Box<dyn ProgramGraph>>;

    /// Emit the native object. With a scan result, compilation goes through a
    /// [`ScannedProgram`] layered over `program`.
    fn compile(
        &self,
        request: &CodegenRequest<'_>,
        program: &dyn ProgramGraph,
        scan: Option<&ScanResult>,
    ) -> Result<CodegenOutput, CodegenError>;
}

/// Import every method codegen will compile, in a stable order.
///
/// With a scan the method set is the scan's reachable set; otherwise the graph
/// is walked naively from its roots, following every virtual implementation.
/// Import failures surface as [`CodegenError::Import`].
pub fn import_reachable(
    program: &dyn ProgramGraph,
    scan: Option<&ScanResult>,
) -> Result<usize, CodegenError> {
    let to_import = |method: &str| {
        program.import(method).map_err(|error| CodegenError::Import {
            method: method.to_string(),
            error,
        })
    };

    if let Some(scan) = scan {
        for method in &scan.reachable {
            to_import(method)?;
        }
        return Ok(scan.reachable.len());
    }

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = program.roots().into_iter().collect();
    while let Some(method) = queue.pop_front() {
        if !seen.insert(method.clone()) {
            continue;
        }
        let body = to_import(&method)?;
        queue.extend(body.direct_calls);
        for slot in &body.virtual_calls {
            queue.extend(program.implementations(slot).into_iter().map(|(_, m)| m));
        }
    }
    Ok(seen.len())
}

/// Serialized program graph produced by the code generator's `--emit-graph`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramDocument {
    pub roots: Vec<String>,
    pub methods: BTreeMap<String, MethodBody>,
    /// Methods the code generator cannot import, with the reason.
    pub unsupported: BTreeMap<String, String>,
    /// Slot -> implementing `(type, method)` pairs.
    pub implementations: BTreeMap<String, Vec<Implementation>>,
    /// Unmanaged entry points exported from a shared library.
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(rename = "type")]
    pub ty: String,
    pub method: String,
}

impl ProgramDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read program graph: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse program graph: {}", path.display()))
    }
}

impl ProgramGraph for ProgramDocument {
    fn roots(&self) -> Vec<String> {
        self.roots.clone()
    }

    fn import(&self, method: &str) -> Result<MethodBody, ImportError> {
        if let Some(reason) = self.unsupported.get(method) {
            return Err(ImportError::new(method, reason.clone()));
        }
        self.methods
            .get(method)
            .cloned()
            .ok_or_else(|| ImportError::new(method, "method body not found"))
    }

    fn implementations(&self, slot: &str) -> Vec<(String, String)> {
        self.implementations
            .get(slot)
            .map(|impls| {
                impls
                    .iter()
                    .map(|i| (i.ty.clone(), i.method.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn exports(&self) -> Vec<String> {
        self.exports.clone()
    }
}

/// Drives the external code generator.
#[derive(Debug, Clone)]
pub struct ExternalCodegen {
    tool: PathBuf,
}

impl ExternalCodegen {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        ExternalCodegen { tool: tool.into() }
    }

    fn base_command(&self, request: &CodegenRequest<'_>) -> ProcessBuilder {
        let mut cmd = ProcessBuilder::new(&self.tool).arg(&request.il);
        for reference in request.references.values() {
            cmd = cmd.arg(format!("-r:{}", reference.display()));
        }
        cmd
    }
}

/// Target and policy arguments for the code generator.
pub fn codegen_args(request: &CodegenRequest<'_>) -> Vec<String> {
    let profile = request.profile;
    let policy = request.policy;
    let mut args = vec![
        format!("-o:{}", request.object.display()),
        format!("--targetos:{}", profile.os),
        format!("--targetarch:{}", profile.arch),
    ];

    match policy.optimization {
        OptimizationMode::None => {}
        OptimizationMode::PreferSize => args.push("--Os".to_string()),
        OptimizationMode::PreferSpeed => args.push("--Ot".to_string()),
        OptimizationMode::Blended => args.push("-O".to_string()),
    }
    if policy.fold_method_bodies() {
        args.push("--methodbodyfolding".to_string());
    }
    if !profile.isa.is_empty() {
        args.push(format!("--instruction-set:{}", profile.isa.join(",")));
    }
    if policy.debug_info {
        args.push("-g".to_string());
    }
    if !policy.link_type.is_executable() {
        args.push("--nativelib".to_string());
    }
    match policy.stdlib {
        StandardLibrary::DotNet => {}
        StandardLibrary::None => args.push("--stdlib:none".to_string()),
        StandardLibrary::Zero => args.push("--stdlib:zero".to_string()),
    }
    if !policy.reflection {
        args.push("--reflectiondata:none".to_string());
    }
    if policy.stack_trace_data {
        args.push("--stacktracedata".to_string());
    }
    if !policy.globalization {
        args.push("--invariantglobalization".to_string());
    }

    args.extend(
        policy
            .feature_switches
            .iter()
            .map(|(name, value)| format!("--feature:{}={}", name, value)),
    );
    args.extend(
        policy
            .direct_pinvokes
            .iter()
            .map(|p| format!("--directpinvoke:{}", p)),
    );
    args.extend(
        policy
            .direct_pinvoke_lists
            .iter()
            .map(|p| format!("--directpinvokelist:{}", request.home.join(p).display())),
    );

    if let Some(ref map) = request.map {
        args.push(format!("--map:{}", map.display()));
    }
    if let Some(ref mstat) = request.mstat {
        args.push(format!("--mstat:{}", mstat.mstat.display()));
        args.push(format!("--dgmllog:{}", mstat.codegen_dgml.display()));
        if policy.use_whole_program_scanner() {
            args.push(format!("--scandgmllog:{}", mstat.scan_dgml.display()));
        }
    }
    args
}

impl CodegenEngine for ExternalCodegen {
    fn load_program(&self, request: &CodegenRequest<'_>) -> Result<Box<dyn ProgramGraph>> {
        let graph_file = tempfile::Builder::new()
            .prefix("aotbuild-graph")
            .suffix(".json")
            .tempfile()
            .context("failed to create program graph file")?;

        let cmd = self
            .base_command(request)
            .arg(format!("--emit-graph:{}", graph_file.path().display()));
        tracing::debug!("loading program: {}", cmd.display_command());

        let status = cmd.status()?;
        if !status.success() {
            anyhow::bail!(
                "`{}` exited with code {}",
                cmd.display_command(),
                exit_code(status)
            );
        }

        Ok(Box::new(ProgramDocument::load(graph_file.path())?))
    }

    fn compile(
        &self,
        request: &CodegenRequest<'_>,
        program: &dyn ProgramGraph,
        scan: Option<&ScanResult>,
    ) -> Result<CodegenOutput, CodegenError> {
        let scanned;
        let provider: &dyn ProgramGraph = match scan {
            Some(scan) => {
                scanned = ScannedProgram::new(program, scan);
                &scanned
            }
            None => program,
        };
        let count = import_reachable(provider, scan)?;
        tracing::debug!("imported {} methods", count);

        // Kept alive until the tool returns; removed on drop.
        let scan_file = match scan {
            Some(scan) => Some(
                write_scan_results(scan).map_err(|e| CodegenError::failed(format!("{:#}", e)))?,
            ),
            None => None,
        };

        let mut cmd = self.base_command(request).args(codegen_args(request));
        if let Some(ref file) = scan_file {
            cmd = cmd.arg(format!("--scan-results:{}", file.path().display()));
        }

        let status = cmd
            .status()
            .map_err(|e| CodegenError::failed(format!("{:#}", e)))?;
        if !status.success() {
            return Err(CodegenError::failed(format!(
                "`{}` exited with code {}",
                self.tool.display(),
                exit_code(status)
            )));
        }

        Ok(CodegenOutput {
            object: request.object.clone(),
            exported_symbols: provider.exports(),
        })
    }
}

fn write_scan_results(scan: &ScanResult) -> Result<tempfile::NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("aotbuild-scan")
        .suffix(".json")
        .tempfile()
        .context("failed to create scan results file")?;
    serde_json::to_writer(file.as_file(), scan).context("failed to write scan results")?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::scan::Scanner;
    use crate::core::policy::PolicyFlags;
    use crate::core::target::{Libc, TargetArch, TargetOs};
    use crate::test_support::GraphBuilder;

    #[test]
    fn test_program_document_json() {
        let json = r#"{
            "roots": ["Main"],
            "methods": {
                "Main": { "direct_calls": ["Helper"], "virtual_calls": ["Object.ToString"] },
                "Helper": {}
            },
            "unsupported": { "Bad": "function pointers" },
            "implementations": {
                "Object.ToString": [{ "type": "Foo", "method": "Foo.ToString" }]
            },
            "exports": ["Add"]
        }"#;
        let doc: ProgramDocument = serde_json::from_str(json).unwrap();

        assert_eq!(doc.roots(), vec!["Main"]);
        assert_eq!(doc.import("Main").unwrap().direct_calls, vec!["Helper"]);
        assert_eq!(doc.import("Bad").unwrap_err().reason, "function pointers");
        assert!(doc.import("Missing").is_err());
        assert_eq!(
            doc.implementations("Object.ToString"),
            vec![("Foo".to_string(), "Foo.ToString".to_string())]
        );
        assert_eq!(doc.exports(), vec!["Add"]);
    }

    #[test]
    fn test_import_reachable_naive_walk() {
        let graph = GraphBuilder::new()
            .root("Main")
            .method("Main", MethodBody::default().calls(["A"]).calls_virtual("S"))
            .method("A", MethodBody::default().calls(["Main"]))
            .method("X.S", MethodBody::default())
            .implementation("S", "X", "X.S")
            .build();
        assert_eq!(import_reachable(&graph, None).unwrap(), 3);
    }

    #[test]
    fn test_scan_failure_resurfaces_in_codegen() {
        let graph = GraphBuilder::new()
            .root("Main")
            .method("Main", MethodBody::default().calls(["Bad"]))
            .failing("Bad", "unsupported construct")
            .build();
        let scan = Scanner::with_threads(2).scan(&graph).unwrap();
        let scanned = ScannedProgram::new(&graph, &scan);

        match import_reachable(&scanned, Some(&scan)) {
            Err(CodegenError::Import { method, error }) => {
                assert_eq!(method, "Bad");
                assert_eq!(error, scan.import_failures["Bad"]);
            }
            other => panic!("expected import failure, got {:?}", other),
        }
    }

    #[test]
    fn test_codegen_args() {
        let profile = TargetProfile {
            os: TargetOs::Linux,
            arch: TargetArch::X64,
            libc: Libc::Glibc,
            isa: vec!["avx2".to_string(), "bmi".to_string()],
        };
        let flags = PolicyFlags {
            optimize_size: true,
            features: vec!["My.Switch=false".to_string()],
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &profile);
        let request = CodegenRequest {
            il: PathBuf::from("app.dll"),
            home: PathBuf::from("/h"),
            references: BTreeMap::new(),
            profile: &profile,
            policy: &policy,
            object: PathBuf::from("app.o"),
            map: Some(PathBuf::from("app.map.xml")),
            mstat: None,
        };
        let args = codegen_args(&request);

        assert_eq!(&args[..3], ["-o:app.o", "--targetos:linux", "--targetarch:x64"]);
        assert!(args.contains(&"--Os".to_string()));
        assert!(args.contains(&"--instruction-set:avx2,bmi".to_string()));
        assert!(args.contains(&"--feature:My.Switch=false".to_string()));
        assert!(args.contains(&"--map:app.map.xml".to_string()));
        assert!(args.contains(&"--directpinvoke:libSystem.Native".to_string()));
        assert!(!args.contains(&"--nativelib".to_string()));
    }

    #[test]
    fn test_scan_results_file_is_json() {
        let mut scan = ScanResult::default();
        scan.reachable.insert("Main".to_string());
        let file = write_scan_results(&scan).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let back: ScanResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, scan);

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }
}
