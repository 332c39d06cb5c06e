//! Whole-program scan.
//!
//! The scanner walks the program graph from its roots and computes what is
//! actually reachable. Codegen then compiles against a [`ScannedProgram`],
//! which layers the scan's facts over the original graph:
//!
//! - virtual calls with a single allocated implementation become direct calls
//! - methods that failed to import during the scan fail again, identically,
//!   without asking the underlying graph a second time
//!
//! The walk is wave based. Every method discovered in a wave is imported in
//! parallel on a rayon pool; results are merged into shared state under a
//! lock, and the next wave starts only when the current one has drained.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use miette::Diagnostic;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a method body references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodBody {
    pub direct_calls: Vec<String>,
    /// Virtual slots invoked through a vtable.
    pub virtual_calls: Vec<String>,
    pub allocated_types: Vec<String>,
    /// Types used in casts and `is` checks.
    pub type_checks: Vec<String>,
    /// Generic dictionary entries looked up at runtime.
    pub dictionary_lookups: Vec<String>,
}

impl MethodBody {
    pub fn calls<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.direct_calls.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn calls_virtual(mut self, slot: impl Into<String>) -> Self {
        self.virtual_calls.push(slot.into());
        self
    }

    pub fn allocates(mut self, ty: impl Into<String>) -> Self {
        self.allocated_types.push(ty.into());
        self
    }

    pub fn checks_type(mut self, ty: impl Into<String>) -> Self {
        self.type_checks.push(ty.into());
        self
    }

    pub fn looks_up(mut self, entry: impl Into<String>) -> Self {
        self.dictionary_lookups.push(entry.into());
        self
    }
}

/// A method body that could not be analyzed.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to import '{method}': {reason}")]
#[diagnostic(code(aotbuild::scan::import_failed))]
pub struct ImportError {
    pub method: String,
    pub reason: String,
}

impl ImportError {
    pub fn new(method: impl Into<String>, reason: impl Into<String>) -> Self {
        ImportError {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// Source of method bodies for analysis and codegen.
pub trait ProgramGraph: Sync {
    /// Entry points and other rooted methods.
    fn roots(&self) -> Vec<String>;

    /// Import the body of a method.
    fn import(&self, method: &str) -> Result<MethodBody, ImportError>;

    /// Every `(type, method)` pair implementing a virtual slot.
    fn implementations(&self, slot: &str) -> Vec<(String, String)>;

    /// Unmanaged entry points exported from a shared library.
    fn exports(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Facts computed by the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub reachable: BTreeSet<String>,
    pub allocated: BTreeSet<String>,
    /// Slot -> the only method that can be behind it.
    pub devirtualized: BTreeMap<String, String>,
    /// Type -> slots that are actually called on it.
    pub vtable_layout: BTreeMap<String, BTreeSet<String>>,
    /// Method -> generic dictionary entries it needs.
    pub dictionary_layout: BTreeMap<String, BTreeSet<String>>,
    /// Checked types that are never allocated; the checks always fail.
    pub dead_type_checks: BTreeSet<String>,
    pub import_failures: BTreeMap<String, ImportError>,
}

#[derive(Default)]
struct ScanState {
    reachable: BTreeSet<String>,
    allocated: BTreeSet<String>,
    called_slots: BTreeSet<String>,
    type_checks: BTreeSet<String>,
    dictionary_layout: BTreeMap<String, BTreeSet<String>>,
    failures: BTreeMap<String, ImportError>,
    discovered: BTreeSet<String>,
}

impl ScanState {
    fn record(&mut self, method: &str, body: MethodBody) {
        self.discovered.extend(body.direct_calls);
        self.called_slots.extend(body.virtual_calls);
        self.allocated.extend(body.allocated_types);
        self.type_checks.extend(body.type_checks);
        if !body.dictionary_lookups.is_empty() {
            self.dictionary_layout
                .entry(method.to_string())
                .or_default()
                .extend(body.dictionary_lookups);
        }
    }

    /// Methods found since the last wave that haven't been visited yet.
    fn next_wave(&mut self, graph: &dyn ProgramGraph) -> Vec<String> {
        for slot in &self.called_slots {
            for (ty, method) in graph.implementations(slot) {
                if self.allocated.contains(&ty) {
                    self.discovered.insert(method);
                }
            }
        }

        let wave: Vec<String> = std::mem::take(&mut self.discovered)
            .into_iter()
            .filter(|m| !self.reachable.contains(m))
            .collect();
        self.reachable.extend(wave.iter().cloned());
        wave
    }
}

/// Parallel whole-program scanner.
#[derive(Debug, Clone)]
pub struct Scanner {
    threads: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Create a scanner sized to the host's logical CPU count.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Scanner { threads }
    }

    pub fn with_threads(threads: usize) -> Self {
        Scanner {
            threads: threads.max(1),
        }
    }

    /// Scan the graph to a fixpoint.
    pub fn scan(&self, graph: &dyn ProgramGraph) -> Result<ScanResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("aotbuild-scan-{}", i))
            .build()
            .context("failed to create scanner thread pool")?;

        let state = Mutex::new(ScanState::default());
        let mut wave = {
            let mut s = state.lock();
            s.discovered.extend(graph.roots());
            s.next_wave(graph)
        };

        let mut waves = 0usize;
        while !wave.is_empty() {
            waves += 1;
            tracing::trace!("scan wave {}: {} methods", waves, wave.len());

            pool.install(|| {
                wave.par_iter().for_each(|method| {
                    let imported = graph.import(method);
                    let mut s = state.lock();
                    match imported {
                        Ok(body) => s.record(method, body),
                        Err(e) => {
                            s.failures.insert(method.clone(), e);
                        }
                    }
                });
            });

            wave = state.lock().next_wave(graph);
        }

        let state = state.into_inner();
        let result = finish(graph, state);
        tracing::debug!(
            "scan finished after {} waves: {} reachable, {} devirtualized, {} import failures",
            waves,
            result.reachable.len(),
            result.devirtualized.len(),
            result.import_failures.len()
        );
        Ok(result)
    }
}

fn finish(graph: &dyn ProgramGraph, state: ScanState) -> ScanResult {
    let mut devirtualized = BTreeMap::new();
    let mut vtable_layout: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for slot in &state.called_slots {
        let mut targets = BTreeSet::new();
        for (ty, method) in graph.implementations(slot) {
            if state.allocated.contains(&ty) {
                vtable_layout.entry(ty).or_default().insert(slot.clone());
                targets.insert(method);
            }
        }
        if targets.len() == 1 {
            if let Some(target) = targets.into_iter().next() {
                devirtualized.insert(slot.clone(), target);
            }
        }
    }

    let dead_type_checks = state
        .type_checks
        .difference(&state.allocated)
        .cloned()
        .collect();

    ScanResult {
        reachable: state.reachable,
        allocated: state.allocated,
        devirtualized,
        vtable_layout,
        dictionary_layout: state.dictionary_layout,
        dead_type_checks,
        import_failures: state.failures,
    }
}

/// A program graph refined by a completed scan.
///
/// Wraps the original graph by reference; nothing is copied.
pub struct ScannedProgram<'a> {
    inner: &'a dyn ProgramGraph,
    scan: &'a ScanResult,
}

impl<'a> ScannedProgram<'a> {
    pub fn new(inner: &'a dyn ProgramGraph, scan: &'a ScanResult) -> Self {
        ScannedProgram { inner, scan }
    }
}

impl ProgramGraph for ScannedProgram<'_> {
    fn roots(&self) -> Vec<String> {
        self.inner.roots()
    }

    fn import(&self, method: &str) -> Result<MethodBody, ImportError> {
        if let Some(failure) = self.scan.import_failures.get(method) {
            return Err(failure.clone());
        }

        let mut body = self.inner.import(method)?;
        let (direct, remaining): (Vec<String>, Vec<String>) = body
            .virtual_calls
            .into_iter()
            .partition(|slot| self.scan.devirtualized.contains_key(slot));
        body.direct_calls.extend(
            direct
                .iter()
                .filter_map(|slot| self.scan.devirtualized.get(slot).cloned()),
        );
        body.virtual_calls = remaining;
        Ok(body)
    }

    fn implementations(&self, slot: &str) -> Vec<(String, String)> {
        self.inner
            .implementations(slot)
            .into_iter()
            .filter(|(ty, _)| self.scan.allocated.contains(ty))
            .collect()
    }

    fn exports(&self) -> Vec<String> {
        self.inner.exports()
    }
}
