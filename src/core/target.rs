//! Target profile resolution.
//!
//! Turns the user-facing target hints (`--os`, `--arch`, `-m`, `--libc`) plus
//! host defaults into one canonical [`TargetProfile`]. Resolution is a pure
//! function of its inputs; the host is passed in as a [`HostInfo`] value so
//! tests can pretend to be any machine.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic as MietteDiagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    Linux,
    Uefi,
}

impl TargetOs {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Windows => "windows",
            TargetOs::Linux => "linux",
            TargetOs::Uefi => "uefi",
        }
    }

    /// Preprocessor symbol handed to the front-end.
    pub fn define(&self) -> &'static str {
        match self {
            TargetOs::Windows => "WINDOWS",
            TargetOs::Linux => "LINUX",
            TargetOs::Uefi => "UEFI",
        }
    }

    /// Whether the target links with the PE/COFF (`lld-link`) flavor.
    pub fn is_pe(&self) -> bool {
        matches!(self, TargetOs::Windows | TargetOs::Uefi)
    }

    /// Extension of the native object file produced by codegen.
    pub fn object_extension(&self) -> &'static str {
        if self.is_pe() {
            "obj"
        } else {
            "o"
        }
    }
}

impl FromStr for TargetOs {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(TargetOs::Windows),
            "linux" => Ok(TargetOs::Linux),
            "uefi" => Ok(TargetOs::Uefi),
            _ => Err(ConfigError::unsupported("OS", s)),
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    X86,
    X64,
    Arm64,
    RiscV64,
}

impl TargetArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetArch::X86 => "x86",
            TargetArch::X64 => "x64",
            TargetArch::Arm64 => "arm64",
            TargetArch::RiscV64 => "riscv64",
        }
    }

    /// Preprocessor symbol handed to the front-end.
    pub fn define(&self) -> &'static str {
        match self {
            TargetArch::X86 => "X86",
            TargetArch::X64 => "X64",
            TargetArch::Arm64 => "ARM64",
            TargetArch::RiscV64 => "RISCV64",
        }
    }

    /// Whether objects for this architecture need the float ABI header fixup
    /// before linking.
    pub fn requires_abi_patch(&self) -> bool {
        matches!(self, TargetArch::RiscV64)
    }
}

impl FromStr for TargetArch {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i686" | "i386" => Ok(TargetArch::X86),
            "x64" | "x86_64" | "amd64" => Ok(TargetArch::X64),
            "arm64" | "aarch64" => Ok(TargetArch::Arm64),
            "riscv64" => Ok(TargetArch::RiscV64),
            _ => Err(ConfigError::unsupported("architecture", s)),
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// C runtime flavor the final image links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Libc {
    /// No C runtime (Windows, UEFI).
    None,
    /// Windows static-hosted CRT shim.
    Shcrt,
    Glibc,
    Bionic,
    Musl,
    /// RISC-V zkVM firmware image.
    Zisk,
    /// zkVM flavor linked for the simulator memory map.
    ZiskSim,
}

impl Libc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Libc::None => "none",
            Libc::Shcrt => "shcrt",
            Libc::Glibc => "glibc",
            Libc::Bionic => "bionic",
            Libc::Musl => "musl",
            Libc::Zisk => "zisk",
            Libc::ZiskSim => "zisk_sim",
        }
    }

    /// zkVM flavors: bare-metal, symbol-wrapped, musl underneath.
    pub fn is_zkvm(&self) -> bool {
        matches!(self, Libc::Zisk | Libc::ZiskSim)
    }

    /// Flavors that force a fully static link against `libc.a`.
    pub fn is_static(&self) -> bool {
        matches!(self, Libc::Musl | Libc::Zisk | Libc::ZiskSim)
    }

    /// Flavors without locale data; globalization is forced to invariant mode.
    pub fn lacks_locale_support(&self) -> bool {
        matches!(self, Libc::Bionic | Libc::Musl | Libc::Zisk | Libc::ZiskSim)
    }

    /// Directory name used under `lib/<os>/<arch>/` for this flavor.
    ///
    /// The zkVM flavors reuse the musl sysroot; their own objects live in a
    /// separate vendor directory.
    pub fn lib_dir_name(&self) -> &'static str {
        if self.is_zkvm() {
            "musl"
        } else {
            self.as_str()
        }
    }

    /// Whether this flavor can be used with the given OS.
    pub fn valid_for(&self, os: TargetOs) -> bool {
        match os {
            TargetOs::Windows => matches!(self, Libc::None | Libc::Shcrt),
            TargetOs::Linux => matches!(
                self,
                Libc::Glibc | Libc::Bionic | Libc::Musl | Libc::Zisk | Libc::ZiskSim
            ),
            TargetOs::Uefi => matches!(self, Libc::None),
        }
    }
}

impl FromStr for Libc {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Libc::None),
            "shcrt" => Ok(Libc::Shcrt),
            "glibc" => Ok(Libc::Glibc),
            "bionic" => Ok(Libc::Bionic),
            "musl" => Ok(Libc::Musl),
            "zisk" => Ok(Libc::Zisk),
            "zisk_sim" | "zisk-sim" => Ok(Libc::ZiskSim),
            _ => Err(ConfigError::unsupported("libc", s)),
        }
    }
}

impl fmt::Display for Libc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors. These are raised before any pipeline stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Error, MietteDiagnostic)]
pub enum ConfigError {
    #[error("Target {kind} '{value}' is not supported")]
    #[diagnostic(code(aotbuild::config::unsupported_target))]
    UnsupportedTarget { kind: &'static str, value: String },

    #[error("libc '{libc}' is not valid for target {os}/{arch}")]
    #[diagnostic(
        code(aotbuild::config::invalid_libc),
        help("Windows: shcrt|none, Linux: glibc|bionic|musl|zisk|zisk_sim, UEFI: none")
    )]
    InvalidLibcForTarget {
        libc: Libc,
        os: TargetOs,
        arch: TargetArch,
    },
}

impl ConfigError {
    fn unsupported(kind: &'static str, value: &str) -> Self {
        ConfigError::UnsupportedTarget {
            kind,
            value: value.to_string(),
        }
    }
}

/// The machine the orchestrator runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Host OS name as reported by `std::env::consts::OS`.
    pub os: String,
    /// Host architecture name as reported by `std::env::consts::ARCH`.
    pub arch: String,
}

impl HostInfo {
    /// Detect the current host.
    pub fn detect() -> Self {
        HostInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        HostInfo {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

/// User-supplied target hints, all optional.
#[derive(Debug, Clone, Default)]
pub struct TargetRequest {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub isa: Option<String>,
    pub libc: Option<String>,
}

/// Canonical, internally consistent target descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub os: TargetOs,
    pub arch: TargetArch,
    pub libc: Libc,
    /// Normalized instruction-set extensions (`-m`), in request order.
    pub isa: Vec<String>,
}

impl TargetProfile {
    /// Default libc for an OS/arch pair when the user didn't pick one.
    ///
    /// Windows x86 has no `shcrt` startup object, so it falls back to `none`.
    pub fn default_libc(os: TargetOs, arch: TargetArch) -> Libc {
        match (os, arch) {
            (TargetOs::Windows, TargetArch::X86) => Libc::None,
            (TargetOs::Windows, _) => Libc::Shcrt,
            (TargetOs::Linux, _) => Libc::Glibc,
            (TargetOs::Uefi, _) => Libc::None,
        }
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.os, self.arch, self.libc)
    }
}

/// Resolve a [`TargetProfile`] from user hints and the host.
pub fn resolve_target(req: &TargetRequest, host: &HostInfo) -> Result<TargetProfile, ConfigError> {
    let os = match req.os.as_deref() {
        Some(s) => s.parse::<TargetOs>()?,
        None => match host.os.as_str() {
            "windows" => TargetOs::Windows,
            "linux" => TargetOs::Linux,
            other => return Err(ConfigError::unsupported("OS", other)),
        },
    };

    let arch = match req.arch.as_deref() {
        Some(s) => s.parse::<TargetArch>()?,
        None => host.arch.parse::<TargetArch>()?,
    };

    let libc = match req.libc.as_deref() {
        Some(s) => {
            let libc = s.parse::<Libc>()?;
            let arch_ok = !libc.is_zkvm() || arch == TargetArch::RiscV64;
            if !libc.valid_for(os) || !arch_ok {
                return Err(ConfigError::InvalidLibcForTarget { libc, os, arch });
            }
            libc
        }
        None => TargetProfile::default_libc(os, arch),
    };

    let isa = match req.isa.as_deref() {
        Some(s) => parse_isa(s)?,
        None => Vec::new(),
    };

    Ok(TargetProfile {
        os,
        arch,
        libc,
        isa,
    })
}

fn parse_isa(s: &str) -> Result<Vec<String>, ConfigError> {
    let mut out: Vec<String> = Vec::new();
    for token in s.split(',') {
        let token = token.trim().to_ascii_lowercase();
        if token.is_empty() {
            return Err(ConfigError::unsupported("instruction set", s));
        }
        if !out.contains(&token) {
            out.push(token);
        }
    }
    Ok(out)
}
