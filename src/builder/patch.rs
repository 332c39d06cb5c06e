//! RISC-V ELF ABI patch.
//!
//! Objects emitted for riscv64 may carry a float-ABI flag in `e_flags` that
//! the bundled linker refuses to mix with the soft-float runtime objects. The
//! patch clears the float-ABI bits so every input agrees.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};

/// Offset of the low byte of `e_flags` in a 64-bit ELF header.
const E_FLAGS_OFFSET: u64 = 0x30;

/// `EF_RISCV_FLOAT_ABI_DOUBLE` with and without `EF_RISCV_RVC`.
const PATCHABLE_VALUES: [u8; 2] = [4, 5];

/// Clear the float-ABI flag of a riscv64 object in place.
///
/// Returns whether the file was modified. Running it again on a patched file
/// is a no-op.
pub fn patch_riscv_abi(path: &Path) -> Result<bool> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {} for patching", path.display()))?;

    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(E_FLAGS_OFFSET))?;
    if file.read_exact(&mut byte).is_err() {
        tracing::debug!("{} is too short to carry ELF flags", path.display());
        return Ok(false);
    }

    if !PATCHABLE_VALUES.contains(&byte[0]) {
        return Ok(false);
    }

    file.seek(SeekFrom::Start(E_FLAGS_OFFSET))?;
    file.write_all(&[0])
        .with_context(|| format!("failed to patch {}", path.display()))?;
    tracing::debug!("patched float ABI flag in {}", path.display());
    Ok(true)
}
