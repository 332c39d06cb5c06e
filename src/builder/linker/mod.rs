//! Linker command synthesis.
//!
//! Turns a resolved target and policy into the exact `lld` invocation for the
//! final link. There is one pure function per linker flavor:
//!
//! - [`windows`]: `lld -flavor link` for Windows and UEFI images
//! - [`linux`]: `lld -flavor ld` for every Linux libc flavor
//! - [`zisk`]: the symbol-wrap table appended for the zkVM flavors
//!
//! Nothing here touches the filesystem or the environment; every path comes
//! in through [`LinkRequest`].

pub mod linux;
pub mod windows;
pub mod zisk;

use std::path::{Path, PathBuf};

use crate::core::policy::BuildPolicy;
use crate::core::target::TargetProfile;
use crate::util::process::CommandSpec;

/// A synthesized linker invocation: the linker path plus ordered tokens.
pub type LinkCommand = CommandSpec;

/// Everything the synthesizer needs to build a link command.
#[derive(Debug, Clone)]
pub struct LinkRequest<'a> {
    pub profile: &'a TargetProfile,
    pub policy: &'a BuildPolicy,
    /// Linker executable
    pub linker: PathBuf,
    /// Native object produced by codegen
    pub object: PathBuf,
    pub output: PathBuf,
    /// Library search directories; the first one holds the startup objects.
    pub lib_dirs: Vec<PathBuf>,
    /// zkVM vendor object directory
    pub vendor_dir: PathBuf,
    /// zkVM simulator directory (linker script only)
    pub vendor_sim_dir: PathBuf,
    /// Exports file for shared libraries
    pub exports_file: Option<PathBuf>,
    /// User flags appended verbatim at the end
    pub ldflags: Vec<String>,
    /// Extra inputs; `{libpath}` expands to the primary library directory
    pub extra_ld: Vec<String>,
}

impl LinkRequest<'_> {
    /// Primary library directory.
    pub fn primary_lib_dir(&self) -> &Path {
        self.lib_dirs
            .first()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Path of a file inside the primary library directory, as a token.
    pub(crate) fn primary(&self, file: &str) -> String {
        path_arg(&self.primary_lib_dir().join(file))
    }

    /// Path of a file inside the zkVM vendor directory, as a token.
    pub(crate) fn vendor(&self, file: &str) -> String {
        path_arg(&self.vendor_dir.join(file))
    }
}

/// Build the link command for the request's target.
pub fn synthesize(request: &LinkRequest<'_>) -> LinkCommand {
    if request.profile.os.is_pe() {
        windows::link_command(request)
    } else {
        linux::link_command(request)
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
