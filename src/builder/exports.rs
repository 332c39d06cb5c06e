//! Exports file for shared libraries: a module-definition file on Windows, a
//! version script everywhere else.

use std::path::Path;

use anyhow::Result;

use crate::core::target::TargetOs;
use crate::util::fs::write_string;

/// Render the exports file contents for `os`.
pub fn render_exports(os: TargetOs, symbols: &[String]) -> String {
    let mut out = String::new();
    if os == TargetOs::Windows {
        out.push_str("EXPORTS\n");
        for symbol in symbols {
            out.push_str("   ");
            out.push_str(symbol);
            out.push('\n');
        }
    } else {
        out.push_str("V1.0 {\n");
        if !symbols.is_empty() {
            out.push_str("    global:\n");
            for symbol in symbols {
                out.push_str("        ");
                out.push_str(symbol);
                out.push_str(";\n");
            }
        }
        out.push_str("    local: *;\n");
        out.push_str("};\n");
    }
    out
}

/// Write the exports file for a shared library.
pub fn write_exports(path: &Path, os: TargetOs, symbols: &[String]) -> Result<()> {
    tracing::debug!("writing {} exports to {}", symbols.len(), path.display());
    write_string(path, &render_exports(os, symbols))
}
