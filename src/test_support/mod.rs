//! Test utilities and mocks for aotbuild unit tests.
//!
//! The pipeline talks to the outside world through three seams: the
//! [`CommandRunner`] for tool steps, the [`FrontEnd`] and the
//! [`CodegenEngine`]. Each has a recording fake here.
//!
//! # Example
//!
//! ```rust,ignore
//! use aotbuild::test_support::{FakeCodegen, FakeFrontEnd, GraphBuilder, MockRunner};
//!
//! let runner = MockRunner::new().with_exit_code("objcopy", 3);
//! let codegen = FakeCodegen::new(GraphBuilder::new().root("Main").build());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::builder::codegen::{
    import_reachable, CodegenEngine, CodegenError, CodegenOutput, CodegenRequest, Implementation,
    ProgramDocument,
};
use crate::builder::frontend::{FrontEnd, FrontEndFailure, FrontEndRequest, IlArtifact};
use crate::builder::scan::{ImportError, MethodBody, ProgramGraph, ScanResult, ScannedProgram};
use crate::util::diagnostic::Diagnostic;
use crate::util::process::{CommandRunner, CommandSpec};

/// Pattern for matching commands in [`MockRunner`].
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Match if the command line contains the substring.
    Contains(String),
}

impl CommandPattern {
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Contains(s) => cmd.contains(s.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Exit(i32),
    SpawnError,
}

/// Records every command and answers with scripted exit codes.
///
/// Unmatched commands exit 0. The first matching rule wins.
#[derive(Debug, Default)]
pub struct MockRunner {
    rules: Vec<(CommandPattern, MockOutcome)>,
    calls: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner::default()
    }

    /// Exit with `code` for commands containing `needle`.
    pub fn with_exit_code(mut self, needle: impl Into<String>, code: i32) -> Self {
        self.rules
            .push((CommandPattern::Contains(needle.into()), MockOutcome::Exit(code)));
        self
    }

    /// Fail to start commands containing `needle`.
    pub fn with_spawn_error(mut self, needle: impl Into<String>) -> Self {
        self.rules
            .push((CommandPattern::Contains(needle.into()), MockOutcome::SpawnError));
        self
    }

    /// Command lines run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, command: &CommandSpec) -> Result<i32> {
        let line = command.to_string();
        self.calls.lock().push(line.clone());

        let outcome = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.matches(&line))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or(MockOutcome::Exit(0));
        match outcome {
            MockOutcome::Exit(code) => Ok(code),
            MockOutcome::SpawnError => {
                bail!("failed to execute `{}`: No such file or directory", line)
            }
        }
    }
}

/// Builds a [`ProgramDocument`] for scanner and codegen tests.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    doc: ProgramDocument,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    pub fn root(mut self, method: &str) -> Self {
        self.doc.roots.push(method.to_string());
        self
    }

    /// Add a method, replacing any earlier body with the same name.
    pub fn method(mut self, name: &str, body: MethodBody) -> Self {
        self.doc.unsupported.remove(name);
        self.doc.methods.insert(name.to_string(), body);
        self
    }

    /// Add a method whose import always fails.
    pub fn failing(mut self, name: &str, reason: &str) -> Self {
        self.doc.methods.remove(name);
        self.doc
            .unsupported
            .insert(name.to_string(), reason.to_string());
        self
    }

    pub fn implementation(mut self, slot: &str, ty: &str, method: &str) -> Self {
        self.doc
            .implementations
            .entry(slot.to_string())
            .or_default()
            .push(Implementation {
                ty: ty.to_string(),
                method: method.to_string(),
            });
        self
    }

    pub fn export(mut self, symbol: &str) -> Self {
        self.doc.exports.push(symbol.to_string());
        self
    }

    pub fn build(self) -> ProgramDocument {
        self.doc
    }
}

/// Wraps a graph and counts imports per method.
pub struct CountingGraph<G> {
    inner: G,
    imports: Mutex<HashMap<String, usize>>,
}

impl<G: ProgramGraph> CountingGraph<G> {
    pub fn new(inner: G) -> Self {
        CountingGraph {
            inner,
            imports: Mutex::new(HashMap::new()),
        }
    }

    pub fn imports_of(&self, method: &str) -> usize {
        self.imports.lock().get(method).copied().unwrap_or(0)
    }
}

impl<G: ProgramGraph> ProgramGraph for CountingGraph<G> {
    fn roots(&self) -> Vec<String> {
        self.inner.roots()
    }

    fn import(&self, method: &str) -> Result<MethodBody, ImportError> {
        *self.imports.lock().entry(method.to_string()).or_insert(0) += 1;
        self.inner.import(method)
    }

    fn implementations(&self, slot: &str) -> Vec<(String, String)> {
        self.inner.implementations(slot)
    }

    fn exports(&self) -> Vec<String> {
        self.inner.exports()
    }
}

/// Front-end that writes a placeholder IL file, or fails with fixed
/// diagnostics.
#[derive(Debug, Default)]
pub struct FakeFrontEnd {
    failure: Option<Vec<Diagnostic>>,
    requests: Mutex<Vec<FrontEndRequest>>,
}

impl FakeFrontEnd {
    pub fn new() -> Self {
        FakeFrontEnd::default()
    }

    pub fn failing(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.failure = Some(diagnostics);
        self
    }

    pub fn requests(&self) -> Vec<FrontEndRequest> {
        self.requests.lock().clone()
    }
}

impl FrontEnd for FakeFrontEnd {
    fn compile(&self, request: &FrontEndRequest) -> Result<IlArtifact, FrontEndFailure> {
        self.requests.lock().push(request.clone());
        if let Some(ref diagnostics) = self.failure {
            return Err(FrontEndFailure::Diagnostics {
                diagnostics: diagnostics.clone(),
            });
        }
        std::fs::write(&request.output, b"IL").map_err(|e| FrontEndFailure::Tool {
            message: e.to_string(),
        })?;
        Ok(IlArtifact {
            path: request.output.clone(),
            warnings: Vec::new(),
        })
    }
}

/// Codegen engine over an in-memory program graph.
///
/// Compiles the same way the external adapter does: every reachable method is
/// imported through the (possibly scanned) provider before the object is
/// written.
#[derive(Debug)]
pub struct FakeCodegen {
    graph: ProgramDocument,
    object_bytes: Vec<u8>,
    loads: AtomicUsize,
    compiles: Mutex<Vec<bool>>,
}

impl FakeCodegen {
    pub fn new(graph: ProgramDocument) -> Self {
        FakeCodegen {
            graph,
            object_bytes: b"\x7fELF".to_vec(),
            loads: AtomicUsize::new(0),
            compiles: Mutex::new(Vec::new()),
        }
    }

    /// Contents written to the object file.
    pub fn with_object_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.object_bytes = bytes;
        self
    }

    /// How many times the program was loaded.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// For each compile, whether a scan result was supplied.
    pub fn compiles_with_scan(&self) -> Vec<bool> {
        self.compiles.lock().clone()
    }
}

impl CodegenEngine for FakeCodegen {
    fn load_program(&self, _request: &CodegenRequest<'_>) -> Result<Box<dyn ProgramGraph>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.graph.clone()))
    }

    fn compile(
        &self,
        request: &CodegenRequest<'_>,
        program: &dyn ProgramGraph,
        scan: Option<&ScanResult>,
    ) -> Result<CodegenOutput, CodegenError> {
        self.compiles.lock().push(scan.is_some());

        let scanned;
        let provider: &dyn ProgramGraph = match scan {
            Some(scan) => {
                scanned = ScannedProgram::new(program, scan);
                &scanned
            }
            None => program,
        };
        import_reachable(provider, scan)?;

        std::fs::write(&request.object, &self.object_bytes)
            .map_err(|e| CodegenError::failed(e.to_string()))?;
        Ok(CodegenOutput {
            object: request.object.clone(),
            exported_symbols: provider.exports(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_runner_rules() {
        let runner = MockRunner::new()
            .with_exit_code("objcopy", 3)
            .with_spawn_error("missing-tool");

        assert_eq!(runner.run(&CommandSpec::new("lld").arg("-o")).unwrap(), 0);
        assert_eq!(runner.run(&CommandSpec::new("objcopy")).unwrap(), 3);
        assert!(runner.run(&CommandSpec::new("missing-tool")).is_err());
        assert_eq!(runner.commands(), vec!["lld -o", "objcopy", "missing-tool"]);
    }

    #[test]
    fn test_graph_builder_overrides() {
        let graph = GraphBuilder::new()
            .root("Main")
            .failing("Main", "bad")
            .method("Main", MethodBody::default())
            .build();
        assert!(graph.import("Main").is_ok());
        assert!(graph.unsupported.is_empty());
    }
}
