//! Link inputs for the zkVM (`zisk`, `zisk_sim`) flavors.
//!
//! The runtime's OS-facing entry points are redirected to vendor shims with
//! `--wrap`. Each shim object is linked whole-archive, after the `--wrap`
//! flags for the symbols it defines.

use crate::core::target::Libc;

use super::{path_arg, LinkRequest};

/// A shim object set and the symbols it takes over.
#[derive(Debug, Clone, Copy)]
pub struct WrapGroup {
    pub name: &'static str,
    pub objects: &'static [&'static str],
    pub symbols: &'static [&'static str],
    /// Extra symbols wrapped only on the device flavor, where console and
    /// write go through the vendor's output channel.
    pub device_symbols: &'static [&'static str],
}

impl WrapGroup {
    /// Symbols wrapped for the given flavor.
    pub fn symbols_for(&self, libc: Libc) -> impl Iterator<Item = &'static str> + '_ {
        let device: &'static [&'static str] = if libc == Libc::Zisk {
            self.device_symbols
        } else {
            &[]
        };
        self.symbols.iter().chain(device.iter()).copied()
    }
}

pub const WRAP_GROUPS: &[WrapGroup] = &[
    WrapGroup {
        name: "rhp",
        objects: &["rhp.o"],
        symbols: &[
            "RhpNewFast",
            "RhpNewObject",
            "RhpNewPtrArrayFast",
            "RhpNewArrayFast",
            "RhNewString",
            "S_P_CoreLib_System_Runtime_TypeCast__CheckCastAny",
            "S_P_CoreLib_System_Diagnostics_Tracing_EventPipeEventProvider__Register",
            "S_P_CoreLib_System_Diagnostics_Tracing_EventSource__InitializeDefaultEventSources",
            "GlobalizationNative_GetDefaultLocaleName",
            "S_P_CoreLib_System_Threading_ProcessorIdCache__ProcessorNumberSpeedCheck",
            "RhGetThreadStaticStorage",
            "S_P_CoreLib_Internal_Runtime_ThreadStatics__GetUninlinedThreadStaticBaseForType",
            "_Z16InitializeCGroupv",
            "S_P_CoreLib_Internal_Runtime_CompilerHelpers_StartupCodeHelpers__InitializeCommandLineArgs",
            "__GetNonGCStaticBase_S_P_CoreLib_System_Environment",
            "S_P_CoreLib_System_Threading_Thread__WaitForForegroundThreads",
            "S_P_CoreLib_System_Threading_Lock__Enter",
            "S_P_CoreLib_System_Threading_Lock__EnterAndGetCurrentThreadId",
            "S_P_CoreLib_System_Threading_Lock__TryEnterSlow_0",
            "S_P_CoreLib_System_Threading_Lock__Exit_0",
            "S_P_CoreLib_System_Threading_Lock__Exit_1",
            "S_P_CoreLib_System_Threading_Lock__ExitAll",
            "_ZN6Thread10IsDetachedEv",
        ],
        device_symbols: &[
            "System_Console_Interop_Sys__InitializeTerminalAndSignalHandling",
            "SystemNative_SetTerminalInvalidationHandler",
            "SystemNative_Write",
        ],
    },
    WrapGroup {
        name: "rhp_native",
        objects: &["rhp_native.o"],
        symbols: &["RhpAssignRefRiscV64", "RhpCidResolve"],
        device_symbols: &[],
    },
    WrapGroup {
        name: "pal",
        objects: &["pal.o"],
        symbols: &[
            "getenv",
            "getcwd",
            "getpid",
            "getegid",
            "geteuid",
            "sched_getaffinity",
            "open",
            "__libc_malloc_impl",
            "__libc_realloc",
            "__libc_free",
            "pthread_create",
            "pthread_sigmask",
            "__clock_gettime",
            "clock_gettime",
            "__malloc_allzerop",
            "mmap",
            "munmap",
            "mlock",
            "munlock",
            "mlockall",
            "munlockall",
            "sched_yield",
            "sigaction",
            "signal",
            "syscall",
            "sysconf",
        ],
        device_symbols: &["__stdio_write"],
    },
    WrapGroup {
        name: "tls",
        objects: &["tls.o"],
        symbols: &["__tls_get_addr", "__init_tls", "__init_tp", "__copy_tls"],
        device_symbols: &[],
    },
    WrapGroup {
        name: "rng",
        objects: &["rng_stupid.o"],
        symbols: &["minipal_get_cryptographically_secure_random_bytes"],
        device_symbols: &[],
    },
    WrapGroup {
        name: "ugc",
        objects: &[
            "uGC.cpp.obj",
            "uGCHandleManager.cpp.obj",
            "uGCHandleStore.cpp.obj",
            "uGCHeap.cpp.obj",
        ],
        symbols: &["GC_Initialize", "GC_VersionInfo"],
        device_symbols: &[],
    },
];

/// Tokens for the zkVM block at the end of the Linux link line.
pub fn link_block(req: &LinkRequest<'_>) -> Vec<String> {
    let libc = req.profile.libc;
    let mut args = Vec::new();

    let script_dir = if libc == Libc::Zisk {
        &req.vendor_dir
    } else {
        &req.vendor_sim_dir
    };
    args.push(format!("-T{}", path_arg(&script_dir.join("script.ld"))));
    args.push(req.vendor("entrypoint.o"));
    args.push(req.vendor("nofp.o"));

    args.push("--whole-archive".to_string());
    args.push(req.vendor("ubootstrap.o"));
    args.push(req.vendor("stdcppshim.o"));
    for group in WRAP_GROUPS {
        args.extend(group.symbols_for(libc).map(|s| format!("--wrap={}", s)));
        args.extend(group.objects.iter().map(|o| req.vendor(o)));
    }
    args.push("--no-whole-archive".to_string());

    args
}
