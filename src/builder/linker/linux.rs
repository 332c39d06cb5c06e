//! `lld -flavor ld` command for Linux targets.
//!
//! The libc flavor decides startup objects and static vs dynamic linking:
//! `musl` and the zkVM flavors link fully static against `libc.a`, everything
//! else links dynamically against the system C library.

use crate::core::policy::{LinkType, StandardLibrary};
use crate::core::target::{Libc, TargetArch};
use crate::util::process::CommandSpec;

use super::{path_arg, zisk, LinkCommand, LinkRequest};

const HARDENING_FLAGS: &[&str] = &[
    "-z",
    "now",
    "-z",
    "relro",
    "-z",
    "noexecstack",
    "--hash-style=gnu",
    "--eh-frame-hdr",
    "-z",
    "nostart-stop-gc",
];

const DOTNET_NATIVE_LIBS: &[&str] = &[
    "-latomic",
    "-leventpipe-disabled",
    "-laotminipal",
    "-lstandalonegc-disabled",
    "-lstdc++compat",
    "-lRuntime.WorkstationGC",
    "-lSystem.IO.Compression.Native",
    "-lSystem.Security.Cryptography.Native.OpenSsl",
];

const COMMON_LIBS: &[&str] = &[
    "--as-needed",
    "-ldl",
    "-lm",
    "-lz",
    "-z",
    "relro",
    "-z",
    "now",
    "--discard-all",
    "--gc-sections",
];

fn dynamic_linker(arch: TargetArch) -> &'static str {
    match arch {
        TargetArch::Arm64 => "/lib/ld-linux-aarch64.so.1",
        TargetArch::RiscV64 => "/lib/ld-linux-riscv64-lp64d.so.1",
        _ => "/lib64/ld-linux-x86-64.so.2",
    }
}

/// Build the ELF link command.
pub fn link_command(req: &LinkRequest<'_>) -> LinkCommand {
    let profile = req.profile;
    let policy = req.policy;
    let libc = profile.libc;
    let shared = policy.link_type == LinkType::SharedLibrary;
    let dotnet = policy.stdlib == StandardLibrary::DotNet;
    let glibc_like = !matches!(libc, Libc::Bionic) && !libc.is_static();

    let mut cmd = CommandSpec::new(&req.linker).args(["-flavor", "ld"]);

    for dir in &req.lib_dirs {
        cmd = cmd.arg(format!("-L{}", dir.display()));
    }

    cmd = cmd.args(HARDENING_FLAGS.iter().copied());
    if profile.arch == TargetArch::Arm64 {
        cmd = cmd.args(["-EL", "--fix-cortex-a53-843419"]);
    }
    if libc == Libc::Bionic {
        cmd = cmd.args([
            "--warn-shared-textrel",
            "-z",
            "max-page-size=4096",
            "--enable-new-dtags",
        ]);
    }

    if libc.is_static() {
        cmd = cmd.arg("-static");
    }

    // Startup objects
    if !shared {
        if libc == Libc::Bionic {
            cmd = cmd.args(["-dynamic-linker", "/system/bin/linker64"]);
            cmd = cmd.arg(req.primary("crtbegin_dynamic.o"));
        } else if libc.is_static() {
            if libc.is_zkvm() {
                cmd = cmd.arg(req.vendor("crt1.o"));
            } else {
                cmd = cmd.arg(req.primary("crt1.o"));
            }
            cmd = cmd.arg(req.primary("crti.o"));
        } else {
            cmd = cmd.args(["-dynamic-linker", dynamic_linker(profile.arch)]);
            cmd = cmd.arg(req.primary("Scrt1.o"));
        }
        if !dotnet {
            cmd = cmd.arg("--defsym=main=__managed__Main");
        }
    } else if libc == Libc::Bionic {
        cmd = cmd.arg(req.primary("crtbegin_so.o"));
    }

    cmd = cmd.arg("-o").arg(path_arg(&req.output));

    if glibc_like {
        cmd = cmd.arg(req.primary("crti.o"));
        cmd = cmd.arg(req.primary("crtbeginS.o"));
    }

    cmd = cmd.arg(path_arg(&req.object));
    cmd = cmd.args(["--as-needed", "--gc-sections", "-rpath", "$ORIGIN"]);

    if shared {
        if dotnet {
            cmd = cmd.arg(req.primary("libbootstrapperdll.o"));
        }
        cmd = cmd.arg("-shared");
        if let Some(ref exports) = req.exports_file {
            cmd = cmd.arg(format!("--version-script={}", exports.display()));
        }
    } else {
        if dotnet {
            cmd = cmd.arg(req.primary("libbootstrapper.o"));
        }
        if policy.position_independent {
            cmd = cmd.arg("-pie");
        }
    }

    // Managed runtime
    if policy.stdlib != StandardLibrary::None {
        cmd = cmd.arg("-lSystem.Native");
        if dotnet {
            cmd = cmd.args(DOTNET_NATIVE_LIBS.iter().copied());
            if libc != Libc::Bionic {
                cmd = cmd.arg("-lSystem.Globalization.Native");
            }
        } else if matches!(profile.arch, TargetArch::Arm64 | TargetArch::RiscV64) {
            cmd = cmd.arg(req.primary("libzerolibnative.o"));
        }
    }

    cmd = cmd.args(COMMON_LIBS.iter().copied());

    // C library
    if !libc.is_static() {
        cmd = cmd.args(["-lc", "-lgcc"]);
    }
    if glibc_like {
        cmd = cmd.args(["-lrt", "--as-needed", "-lgcc_s", "--no-as-needed"]);
        if policy.pthread {
            cmd = cmd.arg("-lpthread");
        }
    } else if libc.is_static() {
        cmd = cmd.arg(req.primary("libc.a"));
    }

    // End objects
    if libc == Libc::Bionic {
        cmd = cmd.arg(req.primary(if shared {
            "crtend_so.o"
        } else {
            "crtend_android.o"
        }));
    } else if libc.is_static() {
        cmd = cmd.arg(req.primary("crtn.o"));
    } else {
        cmd = cmd.arg(req.primary("crtendS.o"));
        cmd = cmd.arg(req.primary("crtn.o"));
    }

    let primary = path_arg(req.primary_lib_dir());
    cmd = cmd.args(req.extra_ld.iter().map(|a| a.replace("{libpath}", &primary)));

    if libc == Libc::Musl {
        cmd = cmd.arg(req.primary("nofp.o"));
    }
    if libc.is_zkvm() {
        cmd = cmd.args(zisk::link_block(req));
    }

    cmd.args(req.ldflags.iter().cloned())
}
