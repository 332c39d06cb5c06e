//! Configuration for aotbuild.
//!
//! Two optional configuration files are read:
//! - Global: `<config dir>/aotbuild/config.toml` - User-wide defaults
//! - Project: `.aotbuild/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config. Environment variables
//! (`AOTBUILD_*`) take precedence over both, and explicit CLI flags win over
//! everything.
//!
//! Tool locations are resolved once into a [`ToolConfig`] which is threaded
//! through the pipeline, so nothing below the CLI reads the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Install root override.
pub const ENV_HOME: &str = "AOTBUILD_HOME";
/// Library search path override (OS path-list syntax).
pub const ENV_LIB: &str = "AOTBUILD_LIB";
/// Linker executable override.
pub const ENV_LD: &str = "AOTBUILD_LD";
/// objcopy executable override.
pub const ENV_OBJCOPY: &str = "AOTBUILD_OBJCOPY";
/// Front-end compiler override.
pub const ENV_FRONTEND: &str = "AOTBUILD_FRONTEND";
/// Codegen engine override.
pub const ENV_CODEGEN: &str = "AOTBUILD_CODEGEN";

const ENV_VARS: &[&str] = &[
    ENV_HOME,
    ENV_LIB,
    ENV_LD,
    ENV_OBJCOPY,
    ENV_FRONTEND,
    ENV_CODEGEN,
];

/// aotbuild configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default target/build settings
    pub build: BuildDefaults,

    /// Tool location overrides
    pub tools: ToolOverrides,
}

/// Defaults for `aotbuild build` flags that have no CLI value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub libc: Option<String>,
    pub stdlib: Option<String>,
    pub deterministic: bool,
    pub print_commands: bool,
}

/// Tool location overrides from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverrides {
    pub home: Option<PathBuf>,
    /// Library search directories, most specific first
    pub lib: Vec<PathBuf>,
    pub ld: Option<PathBuf>,
    pub objcopy: Option<PathBuf>,
    pub frontend: Option<PathBuf>,
    pub codegen: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let b = other.build;
        if b.os.is_some() {
            self.build.os = b.os;
        }
        if b.arch.is_some() {
            self.build.arch = b.arch;
        }
        if b.libc.is_some() {
            self.build.libc = b.libc;
        }
        if b.stdlib.is_some() {
            self.build.stdlib = b.stdlib;
        }
        self.build.deterministic |= b.deterministic;
        self.build.print_commands |= b.print_commands;

        let t = other.tools;
        if t.home.is_some() {
            self.tools.home = t.home;
        }
        if !t.lib.is_empty() {
            self.tools.lib = t.lib;
        }
        if t.ld.is_some() {
            self.tools.ld = t.ld;
        }
        if t.objcopy.is_some() {
            self.tools.objcopy = t.objcopy;
        }
        if t.frontend.is_some() {
            self.tools.frontend = t.frontend;
        }
        if t.codegen.is_some() {
            self.tools.codegen = t.codegen;
        }
    }
}

/// Path of the global config file, if a config directory exists for this user.
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "aotbuild").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the project config file under `cwd`.
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".aotbuild").join("config.toml")
}

/// Load global and project configuration, project taking precedence.
pub fn load_config(cwd: &Path) -> Config {
    let mut config = global_config_path()
        .map(|p| Config::load_or_default(&p))
        .unwrap_or_default();
    config.merge(Config::load_or_default(&project_config_path(cwd)));
    config
}

/// Snapshot of the `AOTBUILD_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct ToolEnv {
    vars: BTreeMap<String, String>,
}

impl ToolEnv {
    /// Capture the relevant variables from the process environment.
    pub fn capture() -> Self {
        let vars = ENV_VARS
            .iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        ToolEnv { vars }
    }

    /// Build from explicit pairs (tests, embedding).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ToolEnv {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Resolved locations of the install home and every external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Install root holding `bin/`, `lib/`, `ref/` and helper scripts.
    pub home: PathBuf,
    /// Explicit library search path, replacing the `home/lib` layout.
    pub lib_path_override: Option<Vec<PathBuf>>,
    pub ld: PathBuf,
    pub objcopy: PathBuf,
    pub patch_elf: PathBuf,
    pub frontend: PathBuf,
    pub codegen: PathBuf,
}

impl ToolConfig {
    /// Resolve tool locations.
    ///
    /// Precedence for each tool: environment variable, then config file, then
    /// the bundled copy under `home/bin`. The front-end and codegen tools fall
    /// back to a `PATH` lookup when the bundled copy is missing.
    pub fn resolve(env: &ToolEnv, overrides: &ToolOverrides, default_home: &Path) -> ToolConfig {
        let home = env
            .get(ENV_HOME)
            .map(PathBuf::from)
            .or_else(|| overrides.home.clone())
            .unwrap_or_else(|| default_home.to_path_buf());

        let lib_path_override = match env.get(ENV_LIB) {
            Some(paths) => Some(std::env::split_paths(paths).collect()),
            None if !overrides.lib.is_empty() => Some(overrides.lib.clone()),
            None => None,
        };

        let bundled = |name: &str| home.join("bin").join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
        let pick = |var: &str, cfg: &Option<PathBuf>, default: PathBuf| {
            env.get(var)
                .map(PathBuf::from)
                .or_else(|| cfg.clone())
                .unwrap_or(default)
        };
        let on_path = |name: &str| {
            let bundled = bundled(name);
            if bundled.exists() {
                bundled
            } else {
                crate::util::process::find_executable(name).unwrap_or(bundled)
            }
        };

        ToolConfig {
            ld: pick(ENV_LD, &overrides.ld, bundled("lld")),
            objcopy: pick(ENV_OBJCOPY, &overrides.objcopy, bundled("llvm-objcopy")),
            patch_elf: home.join("patch_elf.py"),
            frontend: pick(ENV_FRONTEND, &overrides.frontend, on_path("aot-frontend")),
            codegen: pick(ENV_CODEGEN, &overrides.codegen, on_path("ilc")),
            lib_path_override,
            home,
        }
    }

    /// Directory holding the zkVM vendor objects.
    pub fn zkvm_dir(&self) -> PathBuf {
        self.home.join("lib").join("linux").join("riscv64").join("zisk")
    }

    /// Directory holding the zkVM simulator linker script.
    pub fn zkvm_sim_dir(&self) -> PathBuf {
        self.home.join("lib").join("linux").join("riscv64").join("zisk_sim")
    }

    /// Directory of reference assemblies for the front-end.
    pub fn ref_dir(&self) -> PathBuf {
        self.home.join("ref")
    }
}

/// Install home used when neither `AOTBUILD_HOME` nor config name one: the
/// directory holding the running executable.
pub fn default_home() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the aotbuild executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}
