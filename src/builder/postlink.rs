//! Steps that run on the linked image: the zkVM ELF rewrite and splitting
//! debug symbols into a side file.

use anyhow::Result;

use crate::core::layout::BuildPaths;
use crate::core::policy::BuildPolicy;
use crate::core::target::{Libc, TargetProfile};
use crate::util::config::ToolConfig;
use crate::util::process::{CommandRunner, CommandSpec};

/// A post-link step that exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    pub command: CommandSpec,
    pub exit_code: i32,
}

impl FailedStep {
    /// File name of the tool that failed, e.g. `llvm-objcopy`.
    pub fn tool(&self) -> String {
        let program = &self.command.program;
        program
            .file_name()
            .unwrap_or(program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

/// Post-link commands for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostLinkSteps {
    /// zkVM image rewrite; its exit status is advisory.
    pub elf_patch: Option<CommandSpec>,
    /// objcopy sequence; the first failure aborts the rest.
    pub split_symbols: Vec<CommandSpec>,
}

impl PostLinkSteps {
    /// Plan the post-link work for a target.
    pub fn plan(
        profile: &TargetProfile,
        policy: &BuildPolicy,
        tools: &ToolConfig,
        paths: &BuildPaths,
    ) -> Self {
        let elf_patch = (profile.libc == Libc::Zisk).then(|| {
            CommandSpec::new(&tools.patch_elf)
                .arg(paths.output.display().to_string())
                .arg(paths.patched.display().to_string())
                .args([
                    "--fix-init-array",
                    "--fix-tdata",
                    "--split-code-data",
                    "--remove-eh",
                ])
        });

        let split = policy.debug_info && policy.separate_symbols && !profile.os.is_pe();
        let split_symbols = if split {
            split_symbol_commands(tools, paths)
        } else {
            Vec::new()
        };

        PostLinkSteps {
            elf_patch,
            split_symbols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elf_patch.is_none() && self.split_symbols.is_empty()
    }

    /// Run every step. Returns the step that failed the build, if any.
    pub fn run(&self, runner: &dyn CommandRunner) -> Result<Option<FailedStep>> {
        if let Some(ref patch) = self.elf_patch {
            let code = runner.run(patch)?;
            if code != 0 {
                tracing::warn!("ELF patch step exited with code {}", code);
            }
        }

        for step in &self.split_symbols {
            let code = runner.run(step)?;
            if code != 0 {
                return Ok(Some(FailedStep {
                    command: step.clone(),
                    exit_code: code,
                }));
            }
        }
        Ok(None)
    }
}

fn split_symbol_commands(tools: &ToolConfig, paths: &BuildPaths) -> Vec<CommandSpec> {
    let output = paths.output.display().to_string();
    let side_file = paths.debug_symbols.display().to_string();

    vec![
        CommandSpec::new(&tools.objcopy)
            .arg("--only-keep-debug")
            .arg(&output)
            .arg(&side_file),
        CommandSpec::new(&tools.objcopy)
            .args(["--strip-debug", "--strip-unneeded"])
            .arg(&output),
        CommandSpec::new(&tools.objcopy)
            .arg(format!("--add-gnu-debuglink={}", side_file))
            .arg(&output),
    ]
}
