//! Build policy: the feature/policy table.
//!
//! Raw CLI flags are folded into one immutable [`BuildPolicy`] by an ordered
//! list of rules. Every later stage reads the policy; nothing mutates it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::target::{TargetArch, TargetOs, TargetProfile};

/// Code generation optimization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMode {
    None,
    PreferSize,
    PreferSpeed,
    Blended,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::None => "none",
            OptimizationMode::PreferSize => "size",
            OptimizationMode::PreferSpeed => "speed",
            OptimizationMode::Blended => "blended",
        }
    }
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the link step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Executable,
    /// GUI-subsystem executable (Windows).
    WindowedExecutable,
    SharedLibrary,
}

impl LinkType {
    pub fn is_executable(&self) -> bool {
        matches!(self, LinkType::Executable | LinkType::WindowedExecutable)
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exe" => Ok(LinkType::Executable),
            "winexe" => Ok(LinkType::WindowedExecutable),
            "shared" => Ok(LinkType::SharedLibrary),
            _ => Err(format!("invalid build target '{}', valid values: exe, winexe, shared", s)),
        }
    }
}

/// Which managed standard library the program is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardLibrary {
    /// Full-featured runtime library.
    #[default]
    DotNet,
    /// No standard library; the program is its own system module.
    None,
    /// Minimal zero-dependency library.
    Zero,
}

impl FromStr for StandardLibrary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dotnet" => Ok(StandardLibrary::DotNet),
            "none" => Ok(StandardLibrary::None),
            "zero" => Ok(StandardLibrary::Zero),
            _ => Err(format!("invalid stdlib '{}', valid values: dotnet, none, zero", s)),
        }
    }
}

/// Raw flags as the user typed them.
#[derive(Debug, Clone)]
pub struct PolicyFlags {
    pub optimize_size: bool,
    pub optimize_speed: bool,
    pub no_optimization: bool,
    pub link_type: LinkType,
    pub stdlib: StandardLibrary,
    pub no_reflection: bool,
    pub no_stack_trace_data: bool,
    pub no_globalization: bool,
    pub no_exception_messages: bool,
    pub no_debug_info: bool,
    pub no_pie: bool,
    pub no_pthread: bool,
    pub deterministic: bool,
    pub separate_symbols: bool,
    pub no_link: bool,
    pub keep_object: bool,
    /// `Key=value` feature switch overrides.
    pub features: Vec<String>,
    /// Direct P/Invoke requests (`library` or `library!function`).
    pub direct_pinvokes: Vec<String>,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        PolicyFlags {
            optimize_size: false,
            optimize_speed: false,
            no_optimization: false,
            link_type: LinkType::Executable,
            stdlib: StandardLibrary::DotNet,
            no_reflection: false,
            no_stack_trace_data: false,
            no_globalization: false,
            no_exception_messages: false,
            no_debug_info: false,
            no_pie: false,
            no_pthread: false,
            deterministic: false,
            separate_symbols: false,
            no_link: false,
            keep_object: false,
            features: Vec::new(),
            direct_pinvokes: Vec::new(),
        }
    }
}

/// Immutable, fully resolved build policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPolicy {
    pub optimization: OptimizationMode,
    pub link_type: LinkType,
    pub stdlib: StandardLibrary,
    pub reflection: bool,
    pub stack_trace_data: bool,
    pub globalization: bool,
    pub exception_messages: bool,
    pub debug_info: bool,
    pub position_independent: bool,
    pub deterministic: bool,
    pub pthread: bool,
    pub separate_symbols: bool,
    pub no_link: bool,
    pub keep_object: bool,
    pub feature_switches: BTreeMap<String, bool>,
    pub direct_pinvokes: Vec<String>,
    /// Files listing additional direct P/Invoke entrypoints.
    pub direct_pinvoke_lists: Vec<String>,
}

/// Feature switches that are always applied before user overrides.
const DEFAULT_FEATURE_SWITCHES: &[(&str, bool)] = &[
    ("System.Diagnostics.Debugger.IsSupported", false),
    ("System.Diagnostics.Tracing.EventSource.IsSupported", false),
    ("System.Runtime.Serialization.EnableUnsafeBinaryFormatterSerialization", false),
    ("System.Resources.ResourceManager.AllowCustomResourceTypes", false),
    ("System.Text.Encoding.EnableUnsafeUTF7Encoding", false),
    ("System.Linq.Expressions.CanEmitObjectArrayDelegate", false),
    ("System.ComponentModel.DefaultValueAttribute.IsSupported", false),
    ("System.ComponentModel.Design.IDesignerHost.IsSupported", false),
    (
        "System.ComponentModel.TypeConverter.EnableUnsafeBinaryFormatterInDesigntimeLicenseContextSerialization",
        false,
    ),
    ("System.ComponentModel.TypeDescriptor.IsComObjectDescriptorSupported", false),
    ("System.Data.DataSet.XmlSerializationIsSupported", false),
    ("System.Linq.Enumerable.IsSizeOptimized", true),
    ("System.Net.SocketsHttpHandler.Http3Support", false),
    ("System.Reflection.Metadata.MetadataUpdater.IsSupported", false),
    ("System.Runtime.CompilerServices.RuntimeFeature.IsDynamicCodeSupported", false),
    ("System.Runtime.InteropServices.BuiltInComInterop.IsSupported", false),
    ("System.Runtime.InteropServices.EnableConsumingManagedCodeFromNativeHosting", false),
    ("System.Runtime.InteropServices.EnableCppCLIHostActivation", false),
    (
        "System.Runtime.InteropServices.Marshalling.EnableGeneratedComInterfaceComImportInterop",
        false,
    ),
    ("System.StartupHookProvider.IsSupported", false),
    ("System.Text.Json.JsonSerializer.IsReflectionEnabledByDefault", false),
    ("System.Threading.Thread.EnableAutoreleasePool", false),
    ("System.Threading.ThreadPool.UseWindowsThreadPool", true),
    ("System.Globalization.PredefinedCulturesOnly", true),
];

const WINDOWS_DIRECT_PINVOKES: &[&str] = &[
    "System.IO.Compression.Native",
    "System.Globalization.Native",
    "sokol",
    "shell32!CommandLineToArgvW",
];

const LINUX_DIRECT_PINVOKES: &[&str] = &[
    "libSystem.Native",
    "libSystem.Globalization.Native",
    "libSystem.IO.Compression.Native",
    "libSystem.Net.Security.Native",
    "libSystem.Security.Cryptography.Native.OpenSsl",
    "libsokol",
];

/// Name of the list file shipped in the install home with Windows API entrypoints.
pub const WINDOWS_API_LIST: &str = "WindowsAPIs.txt";

impl BuildPolicy {
    /// Resolve the policy from raw flags and the already-resolved target.
    pub fn resolve(flags: &PolicyFlags, target: &TargetProfile) -> BuildPolicy {
        let optimization = select_optimization(flags);

        let stack_trace_data =
            !flags.no_stack_trace_data && flags.stdlib == StandardLibrary::DotNet;
        let reflection = !flags.no_reflection && flags.stdlib == StandardLibrary::DotNet;
        let globalization = !flags.no_globalization && !target.libc.lacks_locale_support();
        if !flags.no_globalization && !globalization {
            tracing::debug!(
                "globalization disabled: libc '{}' has no locale support",
                target.libc
            );
        }

        let position_independent = match flags.link_type {
            LinkType::SharedLibrary => true,
            _ => !flags.no_pie || target.arch == TargetArch::Arm64,
        };

        let feature_switches = feature_switches(
            flags,
            !flags.no_reflection,
            globalization,
            stack_trace_data,
        );

        let (direct_pinvokes, direct_pinvoke_lists) = direct_pinvokes(flags, target.os);

        BuildPolicy {
            optimization,
            link_type: flags.link_type,
            stdlib: flags.stdlib,
            reflection,
            stack_trace_data,
            globalization,
            exception_messages: !flags.no_exception_messages,
            debug_info: !flags.no_debug_info,
            position_independent,
            deterministic: flags.deterministic,
            pthread: !flags.no_pthread,
            separate_symbols: flags.separate_symbols,
            no_link: flags.no_link,
            keep_object: flags.keep_object,
            feature_switches,
            direct_pinvokes,
            direct_pinvoke_lists,
        }
    }

    /// The whole-program scanner runs for every optimized build.
    pub fn use_whole_program_scanner(&self) -> bool {
        self.optimization != OptimizationMode::None
    }

    /// Identical method bodies are folded in optimized builds.
    pub fn fold_method_bodies(&self) -> bool {
        self.optimization != OptimizationMode::None
    }
}

/// First matching branch wins: size, then speed, then explicit none.
fn select_optimization(flags: &PolicyFlags) -> OptimizationMode {
    if flags.optimize_size {
        if flags.optimize_speed {
            tracing::warn!("overriding -Ot with -Os");
        }
        OptimizationMode::PreferSize
    } else if flags.optimize_speed {
        OptimizationMode::PreferSpeed
    } else if flags.no_optimization {
        OptimizationMode::None
    } else {
        OptimizationMode::Blended
    }
}

fn feature_switches(
    flags: &PolicyFlags,
    reflection_requested: bool,
    globalization: bool,
    stack_trace_data: bool,
) -> BTreeMap<String, bool> {
    let mut switches: BTreeMap<String, bool> = DEFAULT_FEATURE_SWITCHES
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

    if flags.no_exception_messages || !reflection_requested {
        switches.insert("System.Resources.UseSystemResourceKeys".to_string(), true);
    }
    if !globalization {
        switches.insert("System.Globalization.Invariant".to_string(), true);
    }
    if !stack_trace_data {
        switches.insert("System.Diagnostics.StackTrace.IsSupported".to_string(), false);
    }

    for entry in &flags.features {
        if let Some((name, value)) = parse_feature_switch(entry) {
            switches.insert(name.to_string(), value);
        }
    }

    switches
}

/// Parse a `Key=value` feature switch.
///
/// Malformed entries yield `None` and are skipped without a diagnostic. Any
/// value other than `false` means `true`.
pub fn parse_feature_switch(entry: &str) -> Option<(&str, bool)> {
    let index = entry.find('=')?;
    if index == 0 || index == entry.len() - 1 {
        return None;
    }
    let (name, value) = (&entry[..index], &entry[index + 1..]);
    Some((name, value != "false"))
}

fn direct_pinvokes(flags: &PolicyFlags, os: TargetOs) -> (Vec<String>, Vec<String>) {
    let mut entries = flags.direct_pinvokes.clone();
    let mut lists = Vec::new();

    match os {
        TargetOs::Windows => {
            lists.push(WINDOWS_API_LIST.to_string());
            entries.extend(WINDOWS_DIRECT_PINVOKES.iter().map(|s| s.to_string()));
        }
        TargetOs::Linux => {
            entries.extend(LINUX_DIRECT_PINVOKES.iter().map(|s| s.to_string()));
        }
        TargetOs::Uefi => {}
    }

    (entries, lists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::{resolve_target, HostInfo, TargetRequest};

    fn target(os: &str, arch: &str, libc: Option<&str>) -> TargetProfile {
        resolve_target(
            &TargetRequest {
                os: Some(os.to_string()),
                arch: Some(arch.to_string()),
                isa: None,
                libc: libc.map(String::from),
            },
            &HostInfo::new("linux", "x86_64"),
        )
        .unwrap()
    }

    fn linux() -> TargetProfile {
        target("linux", "x64", None)
    }

    #[test]
    fn test_optimization_precedence() {
        // (size, speed, none) -> expected
        let cases = [
            ((false, false, false), OptimizationMode::Blended),
            ((true, false, false), OptimizationMode::PreferSize),
            ((false, true, false), OptimizationMode::PreferSpeed),
            ((false, false, true), OptimizationMode::None),
            ((true, true, false), OptimizationMode::PreferSize),
            ((true, false, true), OptimizationMode::PreferSize),
            ((false, true, true), OptimizationMode::PreferSpeed),
            ((true, true, true), OptimizationMode::PreferSize),
        ];

        for ((size, speed, none), expected) in cases {
            let flags = PolicyFlags {
                optimize_size: size,
                optimize_speed: speed,
                no_optimization: none,
                ..Default::default()
            };
            let policy = BuildPolicy::resolve(&flags, &linux());
            assert_eq!(policy.optimization, expected, "flags {:?}", (size, speed, none));
            assert_eq!(
                policy.use_whole_program_scanner(),
                expected != OptimizationMode::None
            );
        }
    }

    #[test]
    fn test_blended_uses_scanner() {
        let policy = BuildPolicy::resolve(&PolicyFlags::default(), &linux());
        assert_eq!(policy.optimization, OptimizationMode::Blended);
        assert!(policy.use_whole_program_scanner());
    }

    #[test]
    fn test_stack_trace_forced_off_without_full_stdlib() {
        let flags = PolicyFlags {
            stdlib: StandardLibrary::Zero,
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &linux());
        assert!(!policy.stack_trace_data);
        assert!(!policy.reflection);
        assert_eq!(
            policy.feature_switches.get("System.Diagnostics.StackTrace.IsSupported"),
            Some(&false)
        );
    }

    #[test]
    fn test_globalization_forced_off_for_minimal_libcs() {
        for libc in ["bionic", "musl"] {
            let policy = BuildPolicy::resolve(&PolicyFlags::default(), &target("linux", "x64", Some(libc)));
            assert!(!policy.globalization, "{}", libc);
            assert_eq!(
                policy.feature_switches.get("System.Globalization.Invariant"),
                Some(&true)
            );
        }

        let zisk = target("linux", "riscv64", Some("zisk"));
        assert!(!BuildPolicy::resolve(&PolicyFlags::default(), &zisk).globalization);

        // A user override cannot turn it back on.
        let flags = PolicyFlags {
            features: vec!["System.Globalization.Invariant=false".to_string()],
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &target("linux", "x64", Some("musl")));
        assert!(!policy.globalization);

        let policy = BuildPolicy::resolve(&PolicyFlags::default(), &linux());
        assert!(policy.globalization);
        assert!(!policy.feature_switches.contains_key("System.Globalization.Invariant"));
    }

    #[test]
    fn test_position_independence() {
        let no_pie = PolicyFlags {
            no_pie: true,
            ..Default::default()
        };
        assert!(!BuildPolicy::resolve(&no_pie, &linux()).position_independent);
        assert!(BuildPolicy::resolve(&no_pie, &target("linux", "arm64", None)).position_independent);

        let shared = PolicyFlags {
            no_pie: true,
            link_type: LinkType::SharedLibrary,
            ..Default::default()
        };
        assert!(BuildPolicy::resolve(&shared, &linux()).position_independent);
        assert!(BuildPolicy::resolve(&PolicyFlags::default(), &linux()).position_independent);
    }

    #[test]
    fn test_feature_switch_parsing() {
        assert_eq!(parse_feature_switch("Foo=true"), Some(("Foo", true)));
        assert_eq!(parse_feature_switch("Foo=false"), Some(("Foo", false)));
        assert_eq!(parse_feature_switch("Foo=anything"), Some(("Foo", true)));
        assert_eq!(parse_feature_switch("Foo=a=b"), Some(("Foo", true)));
        assert_eq!(parse_feature_switch("Foo"), None);
        assert_eq!(parse_feature_switch("=true"), None);
        assert_eq!(parse_feature_switch("Foo="), None);
    }

    #[test]
    fn test_malformed_feature_switches_are_skipped() {
        let flags = PolicyFlags {
            features: vec![
                "Custom.Switch=false".to_string(),
                "broken".to_string(),
                "System.Linq.Enumerable.IsSizeOptimized=false".to_string(),
            ],
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &linux());
        assert_eq!(policy.feature_switches.get("Custom.Switch"), Some(&false));
        assert_eq!(
            policy.feature_switches.get("System.Linq.Enumerable.IsSizeOptimized"),
            Some(&false)
        );
        assert!(!policy.feature_switches.contains_key("broken"));
    }

    #[test]
    fn test_system_resource_keys() {
        let policy = BuildPolicy::resolve(&PolicyFlags::default(), &linux());
        assert!(!policy.feature_switches.contains_key("System.Resources.UseSystemResourceKeys"));

        let flags = PolicyFlags {
            no_exception_messages: true,
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &linux());
        assert_eq!(
            policy.feature_switches.get("System.Resources.UseSystemResourceKeys"),
            Some(&true)
        );
    }

    #[test]
    fn test_direct_pinvokes_per_os() {
        let flags = PolicyFlags {
            direct_pinvokes: vec!["mylib!foo".to_string()],
            ..Default::default()
        };
        let policy = BuildPolicy::resolve(&flags, &target("windows", "x64", None));
        assert_eq!(policy.direct_pinvokes[0], "mylib!foo");
        assert!(policy.direct_pinvokes.contains(&"shell32!CommandLineToArgvW".to_string()));
        assert_eq!(policy.direct_pinvoke_lists, vec![WINDOWS_API_LIST.to_string()]);

        let policy = BuildPolicy::resolve(&flags, &linux());
        assert!(policy.direct_pinvokes.contains(&"libSystem.Native".to_string()));
        assert!(policy.direct_pinvoke_lists.is_empty());

        let policy = BuildPolicy::resolve(&flags, &target("uefi", "x64", None));
        assert_eq!(policy.direct_pinvokes, vec!["mylib!foo".to_string()]);
    }
}
