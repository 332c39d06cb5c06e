//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use aotbuild::core::policy::LinkType;
use aotbuild::util::shell::ColorChoice;

/// aotbuild - Ahead-of-time compile managed sources into native executables
#[derive(Parser)]
#[command(name = "aotbuild")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile sources to a native executable or library
    Build(BuildArgs),

    /// Compile sources to IL only
    Il(IlArgs),

    /// Print the link command a build would run
    Linkplan(BuildArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Target selection shared by every compiling command.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target OS: windows, linux, uefi
    #[arg(long)]
    pub os: Option<String>,

    /// Target architecture: x86, x64, arm64, riscv64
    #[arg(long)]
    pub arch: Option<String>,

    /// Instruction set extensions, comma separated (e.g. `avx2,bmi` or `native`)
    #[arg(short = 'm', long = "isa", value_name = "ISA")]
    pub isa: Option<String>,

    /// C library: none, shcrt, glibc, bionic, musl, zisk, zisk_sim
    #[arg(long)]
    pub libc: Option<String>,
}

/// Front-end inputs shared by `build` and `il`.
#[derive(Args, Debug, Clone, Default)]
pub struct FrontEndArgs {
    /// Reference assembly
    #[arg(short = 'r', long = "reference", value_name = "FILE")]
    pub references: Vec<PathBuf>,

    /// Preprocessor symbol
    #[arg(short = 'd', long = "define", value_name = "SYMBOL")]
    pub defines: Vec<String>,

    /// Standard library: dotnet, none, zero
    #[arg(long)]
    pub stdlib: Option<String>,

    /// Source language version
    #[arg(long = "langversion", value_name = "VERSION")]
    pub lang_version: Option<String>,

    /// Produce deterministic outputs
    #[arg(long)]
    pub deterministic: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Source files (defaults to every `.cs` file under the current directory)
    pub inputs: Vec<PathBuf>,

    /// Output file
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Build target: exe, winexe, shared
    #[arg(long = "target", value_name = "KIND")]
    pub link_type: Option<LinkType>,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub frontend: FrontEndArgs,

    /// Optimization level: `-Os` (size), `-Ot` (speed), `-O0` (none)
    #[arg(short = 'O', value_name = "LEVEL", value_parser = ["s", "t", "0"])]
    pub opt_level: Option<String>,

    /// Favor code size
    #[arg(long)]
    pub optimize_space: bool,

    /// Favor code speed
    #[arg(long)]
    pub optimize_time: bool,

    /// Disable optimizations
    #[arg(long)]
    pub no_optimization: bool,

    /// Disable reflection support
    #[arg(long)]
    pub no_reflection: bool,

    /// Omit stack trace metadata
    #[arg(long = "no-stacktrace-data")]
    pub no_stack_trace_data: bool,

    /// Disable culture-specific globalization
    #[arg(long)]
    pub no_globalization: bool,

    /// Replace exception messages with resource keys
    #[arg(long)]
    pub no_exception_messages: bool,

    /// Do not produce position-independent code
    #[arg(long)]
    pub no_pie: bool,

    /// Omit debug information
    #[arg(long)]
    pub no_debug_info: bool,

    /// Do not link against pthread
    #[arg(long)]
    pub no_pthread: bool,

    /// Move debug symbols to a separate file
    #[arg(long)]
    pub separate_symbols: bool,

    /// Produce the object file only, do not link
    #[arg(short = 'c', long = "no-link")]
    pub no_link: bool,

    /// Arguments appended to the linker command line
    #[arg(long, value_name = "FLAGS", allow_hyphen_values = true)]
    pub ldflags: Vec<String>,

    /// Extra linker inputs; `{libpath}` expands to the primary library directory
    #[arg(long = "extra-ld", value_name = "INPUT", allow_hyphen_values = true)]
    pub extra_ld: Vec<String>,

    /// Call a native library directly (`lib` or `lib!function`)
    #[arg(short = 'i', value_name = "LIBRARY")]
    pub direct_pinvokes: Vec<String>,

    /// Feature switch (`Name=value`)
    #[arg(long = "feature", value_name = "NAME=VALUE")]
    pub features: Vec<String>,

    /// Write an object map file
    #[arg(long, value_name = "FILE")]
    pub map: Option<PathBuf>,

    /// Write size statistics files
    #[arg(long)]
    pub mstat: bool,

    /// Keep the intermediate object and exports files
    #[arg(long)]
    pub keep_object: bool,

    /// Print the commands of external tools
    #[arg(short = 'x')]
    pub print_commands: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IlArgs {
    /// Source files (defaults to every `.cs` file under the current directory)
    pub inputs: Vec<PathBuf>,

    /// Output file
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Build target: exe, winexe, shared
    #[arg(long = "target", value_name = "KIND")]
    pub link_type: Option<LinkType>,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub frontend: FrontEndArgs,

    /// Omit debug information
    #[arg(long)]
    pub no_debug_info: bool,

    /// Compile with optimizations
    #[arg(short = 'O')]
    pub optimize: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
