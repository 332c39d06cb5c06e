//! On-disk layout: library search path, output naming, intermediate file
//! paths, and input/reference discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use miette::Diagnostic;
use thiserror::Error;

use crate::core::policy::{LinkType, StandardLibrary};
use crate::core::target::{Libc, TargetOs, TargetProfile};
use crate::util::config::ToolConfig;
use crate::util::fs::{append_extension, glob_in, walk_files};

/// Reference assemblies shipped in `home/ref` that must not be handed to the
/// front-end.
const EXCLUDED_REFERENCES: &[&str] = &[
    "zerolib.dll",
    "KernelTraceControl.dll",
    "KernelTraceControl.Win61.dll",
    "msdia140.dll",
];

#[derive(Debug, Error, Diagnostic)]
pub enum LayoutError {
    #[error("Directory '{}' doesn't exist.", .0.display())]
    #[diagnostic(
        code(aotbuild::layout::missing_lib_dir),
        help("set AOTBUILD_LIB or AOTBUILD_HOME to a directory holding the target libraries")
    )]
    MissingLibraryDir(PathBuf),
}

/// Ordered library search directories; the first is the primary directory.
pub fn library_search_path(
    tools: &ToolConfig,
    profile: &TargetProfile,
) -> Result<Vec<PathBuf>, LayoutError> {
    if let Some(ref dirs) = tools.lib_path_override {
        return Ok(dirs.clone());
    }

    let dirs = default_library_dirs(&tools.home, profile);
    let joined = std::env::join_paths(&dirs)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| format!("{:?}", dirs));
    tracing::info!("Library path: {}", joined);

    if !dirs[0].is_dir() {
        return Err(LayoutError::MissingLibraryDir(dirs[0].clone()));
    }
    Ok(dirs)
}

/// `home/lib/<os>/<arch>[/<libc>]` down to `home/lib`, most specific first.
/// Only Linux has a libc level; zkVM flavors share the musl directory.
pub fn default_library_dirs(home: &Path, profile: &TargetProfile) -> Vec<PathBuf> {
    let lib = home.join("lib");
    let os = lib.join(profile.os.as_str());
    let arch = os.join(profile.arch.as_str());

    let mut dirs = Vec::with_capacity(4);
    if profile.os == TargetOs::Linux {
        dirs.push(arch.join(profile.libc.lib_dir_name()));
    }
    dirs.push(arch);
    dirs.push(os);
    dirs.push(lib);
    dirs
}

/// Output path without suffix: the first input's stem, or the name of `cwd`,
/// placed in `cwd`.
pub fn output_stem(inputs: &[PathBuf], cwd: &Path) -> PathBuf {
    let name = match inputs.first() {
        Some(first) => first.file_stem().map(|s| s.to_os_string()),
        None => cwd.file_name().map(|s| s.to_os_string()),
    };
    cwd.join(name.unwrap_or_else(|| "out".into()))
}

/// Final artifact path derived from the stem when `-o` is absent.
pub fn default_output_path(stem: &Path, os: TargetOs, link_type: LinkType) -> PathBuf {
    match os {
        TargetOs::Windows if link_type.is_executable() => append_extension(stem, "exe"),
        TargetOs::Windows => append_extension(stem, "dll"),
        TargetOs::Uefi => append_extension(stem, "efi"),
        TargetOs::Linux if link_type == LinkType::SharedLibrary => {
            let file = format!(
                "lib{}.so",
                stem.file_name().unwrap_or_default().to_string_lossy()
            );
            stem.with_file_name(file)
        }
        TargetOs::Linux => stem.to_path_buf(),
    }
}

/// IL output path for `aotbuild il`.
pub fn default_il_path(stem: &Path, link_type: LinkType) -> PathBuf {
    if link_type.is_executable() {
        append_extension(stem, "exe")
    } else {
        append_extension(stem, "dll")
    }
}

/// Size-analysis outputs written by `--mstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MstatPaths {
    pub mstat: PathBuf,
    pub scan_dgml: PathBuf,
    pub codegen_dgml: PathBuf,
}

/// Every path a build reads or writes next to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub output: PathBuf,
    pub object: PathBuf,
    /// Exports file, present only for shared libraries.
    pub exports: Option<PathBuf>,
    pub patched: PathBuf,
    pub debug_symbols: PathBuf,
    pub map: Option<PathBuf>,
    pub mstat: Option<MstatPaths>,
}

impl BuildPaths {
    /// Derive intermediate paths from the final output path.
    pub fn new(
        output: PathBuf,
        profile: &TargetProfile,
        link_type: LinkType,
        map: Option<PathBuf>,
        mstat: bool,
    ) -> Self {
        let object = output.with_extension(profile.os.object_extension());
        let exports = (link_type == LinkType::SharedLibrary).then(|| {
            output.with_extension(if profile.os == TargetOs::Windows {
                "def"
            } else {
                "txt"
            })
        });
        let mstat = mstat.then(|| MstatPaths {
            mstat: output.with_extension("mstat"),
            scan_dgml: output.with_extension("scan.dgml.xml"),
            codegen_dgml: output.with_extension("codegen.dgml.xml"),
        });

        BuildPaths {
            object,
            exports,
            patched: output.with_extension("patched"),
            debug_symbols: append_extension(&output, "dwo"),
            map,
            mstat,
            output,
        }
    }
}

/// Source inputs: the explicit list, or every `*.cs` under `cwd` except
/// `._*` resource-fork files.
pub fn discover_inputs(explicit: &[PathBuf], cwd: &Path) -> Vec<PathBuf> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    walk_files(cwd, "cs", |name| name.starts_with("._"))
}

/// Reference assemblies for the front-end.
pub fn reference_paths(
    user: &[PathBuf],
    stdlib: StandardLibrary,
    ref_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut refs = user.to_vec();
    match stdlib {
        StandardLibrary::None => {}
        StandardLibrary::Zero => refs.push(ref_dir.join("zerolib.dll")),
        StandardLibrary::DotNet => {
            for dll in glob_in(ref_dir, "*.dll")? {
                let name = dll.file_name().unwrap_or_default().to_string_lossy();
                if !EXCLUDED_REFERENCES.iter().any(|ex| name == *ex) {
                    refs.push(dll);
                }
            }
        }
    }
    Ok(refs)
}

/// Runtime assemblies handed to codegen, keyed by simple name. The most
/// specific library directory wins when a name appears more than once.
pub fn runtime_references(
    lib_dirs: &[PathBuf],
    stdlib: StandardLibrary,
) -> Result<BTreeMap<String, PathBuf>> {
    let mask = match stdlib {
        StandardLibrary::None => return Ok(BTreeMap::new()),
        StandardLibrary::DotNet => "*.dll",
        StandardLibrary::Zero => "zerolib.dll",
    };

    let mut refs = BTreeMap::new();
    for dir in lib_dirs {
        for dll in glob_in(dir, mask)? {
            let Some(name) = dll.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if name.starts_with("System.Diagnostics") {
                continue;
            }
            refs.entry(name).or_insert(dll);
        }
    }
    Ok(refs)
}

/// Startup object directory for a libc: the zkVM vendor directory for `zisk`
/// flavors, otherwise the primary library directory.
pub fn crt_dir<'a>(libc: Libc, primary: &'a Path, vendor: &'a Path) -> &'a Path {
    if libc.is_zkvm() {
        vendor
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::TargetArch;
    use crate::util::config::{ToolEnv, ToolOverrides};
    use tempfile::TempDir;

    fn profile(os: TargetOs, arch: TargetArch, libc: Libc) -> TargetProfile {
        TargetProfile {
            os,
            arch,
            libc,
            isa: Vec::new(),
        }
    }

    #[test]
    fn test_library_dirs_linux() {
        let dirs = default_library_dirs(
            Path::new("/h"),
            &profile(TargetOs::Linux, TargetArch::X64, Libc::Glibc),
        );
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/h/lib/linux/x64/glibc"),
                PathBuf::from("/h/lib/linux/x64"),
                PathBuf::from("/h/lib/linux"),
                PathBuf::from("/h/lib"),
            ]
        );
    }

    #[test]
    fn test_library_dirs_zkvm_uses_musl() {
        let dirs = default_library_dirs(
            Path::new("/h"),
            &profile(TargetOs::Linux, TargetArch::RiscV64, Libc::ZiskSim),
        );
        assert_eq!(dirs[0], PathBuf::from("/h/lib/linux/riscv64/musl"));
    }

    #[test]
    fn test_library_dirs_windows_has_no_libc_level() {
        let dirs = default_library_dirs(
            Path::new("/h"),
            &profile(TargetOs::Windows, TargetArch::X64, Libc::Shcrt),
        );
        assert_eq!(dirs.len(), 3);
        assert_eq!(dirs[0], PathBuf::from("/h/lib/windows/x64"));
    }

    #[test]
    fn test_missing_primary_dir() {
        let tmp = TempDir::new().unwrap();
        let tools = ToolConfig::resolve(&ToolEnv::default(), &ToolOverrides::default(), tmp.path());
        let p = profile(TargetOs::Linux, TargetArch::X64, Libc::Musl);

        let err = library_search_path(&tools, &p).unwrap_err();
        let expected = tmp.path().join("lib/linux/x64/musl");
        assert_eq!(
            err.to_string(),
            format!("Directory '{}' doesn't exist.", expected.display())
        );

        std::fs::create_dir_all(&expected).unwrap();
        let dirs = library_search_path(&tools, &p).unwrap();
        assert_eq!(dirs[0], expected);
    }

    #[test]
    fn test_lib_override_skips_check() {
        let mut tools =
            ToolConfig::resolve(&ToolEnv::default(), &ToolOverrides::default(), Path::new("/none"));
        tools.lib_path_override = Some(vec![PathBuf::from("/custom")]);
        let p = profile(TargetOs::Linux, TargetArch::X64, Libc::Glibc);
        assert_eq!(
            library_search_path(&tools, &p).unwrap(),
            vec![PathBuf::from("/custom")]
        );
    }

    #[test]
    fn test_output_naming() {
        let stem = Path::new("/w/hello");
        assert_eq!(
            default_output_path(stem, TargetOs::Windows, LinkType::Executable),
            PathBuf::from("/w/hello.exe")
        );
        assert_eq!(
            default_output_path(stem, TargetOs::Windows, LinkType::SharedLibrary),
            PathBuf::from("/w/hello.dll")
        );
        assert_eq!(
            default_output_path(stem, TargetOs::Uefi, LinkType::Executable),
            PathBuf::from("/w/hello.efi")
        );
        assert_eq!(
            default_output_path(stem, TargetOs::Linux, LinkType::SharedLibrary),
            PathBuf::from("/w/libhello.so")
        );
        assert_eq!(
            default_output_path(stem, TargetOs::Linux, LinkType::Executable),
            PathBuf::from("/w/hello")
        );
    }

    #[test]
    fn test_output_stem() {
        let cwd = Path::new("/work/proj");
        assert_eq!(
            output_stem(&[PathBuf::from("src/app.cs")], cwd),
            PathBuf::from("/work/proj/app")
        );
        assert_eq!(output_stem(&[], cwd), PathBuf::from("/work/proj/proj"));
    }

    #[test]
    fn test_build_paths() {
        let p = profile(TargetOs::Linux, TargetArch::X64, Libc::Musl);
        let paths = BuildPaths::new(
            PathBuf::from("/o/libfoo.so"),
            &p,
            LinkType::SharedLibrary,
            None,
            true,
        );
        assert_eq!(paths.object, PathBuf::from("/o/libfoo.o"));
        assert_eq!(paths.exports, Some(PathBuf::from("/o/libfoo.txt")));
        assert_eq!(paths.debug_symbols, PathBuf::from("/o/libfoo.so.dwo"));
        assert_eq!(paths.patched, PathBuf::from("/o/libfoo.patched"));
        let mstat = paths.mstat.unwrap();
        assert_eq!(mstat.scan_dgml, PathBuf::from("/o/libfoo.scan.dgml.xml"));

        let w = profile(TargetOs::Windows, TargetArch::X64, Libc::Shcrt);
        let paths = BuildPaths::new(
            PathBuf::from("/o/foo.dll"),
            &w,
            LinkType::SharedLibrary,
            None,
            false,
        );
        assert_eq!(paths.object, PathBuf::from("/o/foo.obj"));
        assert_eq!(paths.exports, Some(PathBuf::from("/o/foo.def")));
        assert!(paths.mstat.is_none());

        let exe = BuildPaths::new(PathBuf::from("/o/app"), &p, LinkType::Executable, None, false);
        assert!(exe.exports.is_none());
    }

    #[test]
    fn test_reference_paths() {
        let tmp = TempDir::new().unwrap();
        for name in [
            "System.Runtime.dll",
            "zerolib.dll",
            "msdia140.dll",
            "KernelTraceControl.dll",
        ] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        let user = vec![PathBuf::from("mine.dll")];

        let refs = reference_paths(&user, StandardLibrary::DotNet, tmp.path()).unwrap();
        assert_eq!(
            refs,
            vec![PathBuf::from("mine.dll"), tmp.path().join("System.Runtime.dll")]
        );

        let refs = reference_paths(&user, StandardLibrary::Zero, tmp.path()).unwrap();
        assert_eq!(refs[1], tmp.path().join("zerolib.dll"));

        let refs = reference_paths(&user, StandardLibrary::None, tmp.path()).unwrap();
        assert_eq!(refs, user);
    }

    #[test]
    fn test_runtime_references_most_specific_wins() {
        let tmp = TempDir::new().unwrap();
        let specific = tmp.path().join("x64");
        std::fs::create_dir_all(&specific).unwrap();
        std::fs::write(specific.join("System.Private.CoreLib.dll"), "").unwrap();
        std::fs::write(tmp.path().join("System.Private.CoreLib.dll"), "").unwrap();
        std::fs::write(tmp.path().join("System.Diagnostics.Tracing.dll"), "").unwrap();

        let refs = runtime_references(
            &[specific.clone(), tmp.path().to_path_buf()],
            StandardLibrary::DotNet,
        )
        .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs["System.Private.CoreLib"],
            specific.join("System.Private.CoreLib.dll")
        );
    }
}
