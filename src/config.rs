//! The configuration surface named in spec.md §6. CLI argument parsing,
//! file I/O, and help/usage text are explicitly out of scope (spec.md
//! §1); this module only holds the resolved struct a CLI layer would
//! populate before driving [`crate::asm::Assembler`].

use bitflags::bitflags;

use crate::gpu::GpuDevice;

bitflags! {
    /// Flags accepted by the assembler driver (spec.md §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AsmFlags: u32 {
        const ALL               = 1 << 0;
        /// Default on, per spec.md §6.
        const WARNINGS           = 1 << 1;
        const FORCE_ADD_SYMBOLS  = 1 << 2;
        const ALTMACRO_DEFAULT   = 1 << 3;
        const BUGGY_FP_LIT       = 1 << 4;
        const OLD_MOD_PARAM      = 1 << 5;
        /// Pure mode for tests: no file I/O side effects (spec.md §6).
        const TESTRUN            = 1 << 6;
    }
}

impl Default for AsmFlags {
    fn default() -> Self {
        AsmFlags::WARNINGS
    }
}

/// The `POLICY` version stamp from spec.md §9's open question. Only one
/// threshold is evidenced in the retrieved corpus; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Policy(pub u32);

impl Policy {
    /// CLRX 0.2: AMDCL2 SGPR accounting folds VCC/FLAT_SCRATCH/XNACK
    /// reservations into a single reported count instead of reporting the
    /// user-specified count unchanged.
    pub const UNIFIED_SGPR_COUNT: Policy = Policy(200);

    /// The oldest policy this core understands.
    pub const BASE: Policy = Policy(100);

    #[must_use]
    pub fn at_least(self, threshold: Policy) -> bool {
        self >= threshold
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::BASE
    }
}

/// `major*100+minor`, kept as a single integer throughout per spec.md §9's
/// design note rather than scattered `if version < K` checks against two
/// separate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriverVersion(pub u32);

impl DriverVersion {
    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self(major * 100 + minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Amd,
    AmdCl2,
    Gallium,
    Rocm,
    RawCode,
}

/// Process exit codes (spec.md §6): owned by the CLI layer, named here so
/// the core and its caller agree on the mapping from `good`/fatal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Errors = 1,
    Internal = 2,
}

#[derive(Debug, Clone)]
pub struct AsmConfig {
    pub include_paths: Vec<String>,
    pub predefined_symbols: Vec<(String, i64)>,
    pub device: GpuDevice,
    pub driver_version: DriverVersion,
    pub llvm_version: u32,
    pub format: BinaryFormat,
    pub flags: AsmFlags,
    pub policy: Policy,
}

impl AsmConfig {
    #[must_use]
    pub fn new(device: GpuDevice, format: BinaryFormat) -> Self {
        Self {
            include_paths: Vec::new(),
            predefined_symbols: Vec::new(),
            device,
            driver_version: DriverVersion::new(0, 0),
            llvm_version: 0,
            format,
            flags: AsmFlags::default(),
            policy: Policy::default(),
        }
    }
}
