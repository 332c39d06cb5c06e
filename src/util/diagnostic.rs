//! User-facing diagnostic messages.
//!
//! Front-end diagnostics are parsed from the compiler's
//! `file(line,col): error CODE: message` output into [`Diagnostic`] values
//! and rendered back out verbatim-ish, with optional color.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

/// Common suggestion messages.
pub mod suggestions {
    /// Missing library directories.
    pub const SET_HOME: &str = "help: Set AOTBUILD_HOME to the aotbuild install directory";

    /// Tool failures.
    pub const PRINT_COMMANDS: &str = "help: Run with `-x` to print the commands being run";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Position of a diagnostic in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.path.display(), self.line, self.column)
    }
}

/// A diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    /// Compiler diagnostic id, e.g. `CS0103`
    pub code: Option<String>,
    pub location: Option<SourceLocation>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            severity: Severity::Error,
            code: None,
            location: None,
            suggestions: Vec::new(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(message)
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        if let Some(ref location) = self.location {
            output.push_str(&format!("{}: ", location));
        }

        let severity_str = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
                Severity::Info => "\x1b[1;36minfo\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "info",
            }
        };
        output.push_str(severity_str);

        if let Some(ref code) = self.code {
            output.push(' ');
            output.push_str(code);
        }
        output.push_str(&format!(": {}\n", self.message));

        for suggestion in &self.suggestions {
            output.push_str(&format!("  {}\n", suggestion));
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

static TOOL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<path>.+?)\((?P<line>\d+),(?P<col>\d+)(?:,\d+,\d+)?\)\s*:\s*)?(?P<sev>error|warning|info)\s+(?P<code>[A-Za-z]+\d+)\s*:\s*(?P<msg>.*)$",
    )
    .expect("diagnostic pattern is valid")
});

/// Parse one line of compiler output.
///
/// Returns `None` for lines that are not diagnostics.
pub fn parse_tool_line(line: &str) -> Option<Diagnostic> {
    let caps = TOOL_LINE.captures(line.trim_end())?;

    let severity = match &caps["sev"] {
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    };
    let location = match (caps.name("path"), caps.name("line"), caps.name("col")) {
        (Some(path), Some(line), Some(col)) => Some(SourceLocation {
            path: PathBuf::from(path.as_str()),
            line: line.as_str().parse().ok()?,
            column: col.as_str().parse().ok()?,
        }),
        _ => None,
    };

    Some(Diagnostic {
        message: caps["msg"].to_string(),
        severity,
        code: Some(caps["code"].to_string()),
        location,
        suggestions: Vec::new(),
    })
}

/// Parse every diagnostic line in a block of tool output.
pub fn parse_tool_output(output: &str) -> Vec<Diagnostic> {
    output.lines().filter_map(parse_tool_line).collect()
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}
