//! `lld -flavor link` command for Windows and UEFI images.

use crate::core::policy::{LinkType, StandardLibrary};
use crate::core::target::{Libc, TargetArch, TargetOs};
use crate::util::process::CommandSpec;

use super::{path_arg, LinkCommand, LinkRequest};

const DOTNET_RUNTIME_LIBS: &[&str] = &[
    "Runtime.WorkstationGC.lib",
    "System.IO.Compression.Native.Aot.lib",
    "System.Globalization.Native.Aot.lib",
];

const SYSTEM_LIBS: &[&str] = &[
    "advapi32.lib",
    "bcrypt.lib",
    "crypt32.lib",
    "iphlpapi.lib",
    "kernel32.lib",
    "mswsock.lib",
    "ncrypt.lib",
    "normaliz.lib",
    "ntdll.lib",
    "ole32.lib",
    "oleaut32.lib",
    "user32.lib",
    "version.lib",
    "ws2_32.lib",
    "shell32.lib",
    "Secur32.Lib",
];

const UCRT_LIBS: &[&str] = &[
    "api-ms-win-crt-conio-l1-1-0.lib",
    "api-ms-win-crt-convert-l1-1-0.lib",
    "api-ms-win-crt-environment-l1-1-0.lib",
    "api-ms-win-crt-filesystem-l1-1-0.lib",
    "api-ms-win-crt-heap-l1-1-0.lib",
    "api-ms-win-crt-locale-l1-1-0.lib",
    "api-ms-win-crt-multibyte-l1-1-0.lib",
    "api-ms-win-crt-math-l1-1-0.lib",
    "api-ms-win-crt-process-l1-1-0.lib",
    "api-ms-win-crt-runtime-l1-1-0.lib",
    "api-ms-win-crt-stdio-l1-1-0.lib",
    "api-ms-win-crt-string-l1-1-0.lib",
    "api-ms-win-crt-time-l1-1-0.lib",
    "api-ms-win-crt-utility-l1-1-0.lib",
];

/// Build the PE/COFF link command.
pub fn link_command(req: &LinkRequest<'_>) -> LinkCommand {
    let profile = req.profile;
    let policy = req.policy;
    let uefi = profile.os == TargetOs::Uefi;

    let mut cmd = CommandSpec::new(&req.linker).args(["-flavor", "link"]);

    // Inputs and output
    cmd = cmd.arg(path_arg(&req.object));
    cmd = cmd.arg(format!("/out:{}", req.output.display()));
    if policy.deterministic {
        cmd = cmd.arg("/Brepro");
    }

    for dir in &req.lib_dirs {
        cmd = cmd.arg(format!("/libpath:{}", dir.display()));
    }

    // Subsystem
    match (uefi, policy.link_type) {
        (true, _) => cmd = cmd.arg("/subsystem:EFI_APPLICATION"),
        (false, LinkType::Executable) => cmd = cmd.arg("/subsystem:console"),
        (false, LinkType::WindowedExecutable) => cmd = cmd.arg("/subsystem:windows"),
        (false, LinkType::SharedLibrary) => {}
    }

    // Entry point
    if uefi {
        cmd = cmd.arg("/entry:EfiMain");
    } else if policy.link_type.is_executable() {
        if policy.stdlib == StandardLibrary::DotNet {
            cmd = cmd.args(["/entry:wmainCRTStartup", "bootstrapper.obj"]);
        } else {
            cmd = cmd.arg("/entry:__managed__Main");
        }
        if !policy.position_independent {
            cmd = cmd.arg("/fixed");
        }
    } else {
        cmd = cmd.arg("/dll");
        if policy.stdlib == StandardLibrary::DotNet {
            cmd = cmd.arg("bootstrapperdll.obj");
        }
        if let Some(ref exports) = req.exports_file {
            cmd = cmd.arg(format!("/def:{}", exports.display()));
        }
    }

    cmd = cmd.arg("/incremental:no");
    if policy.debug_info {
        cmd = cmd.arg("/debug");
    }

    // Managed runtime
    if policy.stdlib == StandardLibrary::DotNet {
        cmd = cmd.args(DOTNET_RUNTIME_LIBS.iter().copied());
    } else {
        cmd = cmd.args(["/merge:.modules=.rdata", "/merge:.managedcode=.text"]);
        if policy.stdlib == StandardLibrary::Zero
            && matches!(
                profile.arch,
                TargetArch::Arm64 | TargetArch::X86 | TargetArch::RiscV64
            )
        {
            cmd = cmd.arg("zerolibnative.obj");
        }
    }

    // System libraries
    if profile.os == TargetOs::Windows {
        if profile.arch != TargetArch::X86 {
            cmd = cmd.arg("sokol.lib");
        }
        cmd = cmd.args(SYSTEM_LIBS.iter().copied());

        if profile.libc != Libc::None {
            cmd = cmd.arg("shcrt.lib");
            cmd = cmd.args(UCRT_LIBS.iter().copied());
        }
    }

    cmd = cmd.args(["/opt:ref,icf", "/nodefaultlib:libcpmt.lib"]);
    cmd.args(req.ldflags.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{BuildPolicy, PolicyFlags};
    use crate::core::target::TargetProfile;
    use std::path::PathBuf;

    fn profile(os: TargetOs, arch: TargetArch, libc: Libc) -> TargetProfile {
        TargetProfile {
            os,
            arch,
            libc,
            isa: Vec::new(),
        }
    }

    fn command(profile: &TargetProfile, flags: PolicyFlags) -> Vec<String> {
        let policy = BuildPolicy::resolve(&flags, profile);
        let shared = policy.link_type == LinkType::SharedLibrary;
        let req = LinkRequest {
            profile,
            policy: &policy,
            linker: PathBuf::from("lld"),
            object: PathBuf::from("app.obj"),
            output: PathBuf::from("app.exe"),
            lib_dirs: vec![PathBuf::from("L1"), PathBuf::from("L2")],
            vendor_dir: PathBuf::new(),
            vendor_sim_dir: PathBuf::new(),
            exports_file: shared.then(|| PathBuf::from("app.def")),
            ldflags: vec![],
            extra_ld: vec![],
        };
        link_command(&req).args
    }

    fn position(args: &[String], token: &str) -> usize {
        args.iter()
            .position(|a| a == token)
            .unwrap_or_else(|| panic!("missing {}", token))
    }

    #[test]
    fn test_console_exe_order() {
        let p = profile(TargetOs::Windows, TargetArch::X64, Libc::Shcrt);
        let args = command(
            &p,
            PolicyFlags {
                deterministic: true,
                ..Default::default()
            },
        );

        assert_eq!(
            &args[..8],
            [
                "-flavor",
                "link",
                "app.obj",
                "/out:app.exe",
                "/Brepro",
                "/libpath:L1",
                "/libpath:L2",
                "/subsystem:console"
            ]
        );
        assert!(position(&args, "/entry:wmainCRTStartup") < position(&args, "bootstrapper.obj"));
        assert!(position(&args, "/incremental:no") < position(&args, "/debug"));
        assert!(position(&args, "sokol.lib") < position(&args, "shcrt.lib"));
        assert!(args.contains(&"api-ms-win-crt-utility-l1-1-0.lib".to_string()));
        assert_eq!(
            &args[args.len() - 2..],
            ["/opt:ref,icf", "/nodefaultlib:libcpmt.lib"]
        );
        assert!(!args.contains(&"/fixed".to_string()));
    }

    #[test]
    fn test_x86_without_libc() {
        let p = profile(TargetOs::Windows, TargetArch::X86, Libc::None);
        let args = command(
            &p,
            PolicyFlags {
                no_pie: true,
                link_type: LinkType::WindowedExecutable,
                ..Default::default()
            },
        );
        assert!(args.contains(&"/subsystem:windows".to_string()));
        assert!(args.contains(&"/fixed".to_string()));
        assert!(!args.contains(&"sokol.lib".to_string()));
        assert!(!args.contains(&"shcrt.lib".to_string()));
        assert!(args.contains(&"kernel32.lib".to_string()));
    }

    #[test]
    fn test_arm64_never_fixed() {
        let p = profile(TargetOs::Windows, TargetArch::Arm64, Libc::Shcrt);
        let args = command(
            &p,
            PolicyFlags {
                no_pie: true,
                ..Default::default()
            },
        );
        assert!(!args.contains(&"/fixed".to_string()));
    }

    #[test]
    fn test_shared_library() {
        let p = profile(TargetOs::Windows, TargetArch::X64, Libc::Shcrt);
        let args = command(
            &p,
            PolicyFlags {
                link_type: LinkType::SharedLibrary,
                no_debug_info: true,
                ..Default::default()
            },
        );
        let dll = position(&args, "/dll");
        assert_eq!(args[dll + 1], "bootstrapperdll.obj");
        assert_eq!(args[dll + 2], "/def:app.def");
        assert!(!args.iter().any(|a| a.starts_with("/subsystem:")));
        assert!(!args.iter().any(|a| a.starts_with("/entry:")));
        assert!(!args.contains(&"/debug".to_string()));
    }

    #[test]
    fn test_uefi_zero_stdlib() {
        let p = profile(TargetOs::Uefi, TargetArch::X64, Libc::None);
        let args = command(
            &p,
            PolicyFlags {
                stdlib: StandardLibrary::Zero,
                ..Default::default()
            },
        );
        assert!(args.contains(&"/subsystem:EFI_APPLICATION".to_string()));
        assert!(args.contains(&"/entry:EfiMain".to_string()));
        assert!(args.contains(&"/merge:.managedcode=.text".to_string()));
        assert!(!args.contains(&"zerolibnative.obj".to_string()));
        assert!(!args.contains(&"kernel32.lib".to_string()));
        assert!(!args.contains(&"Runtime.WorkstationGC.lib".to_string()));

        let p = profile(TargetOs::Uefi, TargetArch::Arm64, Libc::None);
        let args = command(
            &p,
            PolicyFlags {
                stdlib: StandardLibrary::Zero,
                ..Default::default()
            },
        );
        assert!(args.contains(&"zerolibnative.obj".to_string()));
    }
}
