//! AMDCL2 (AMD OpenCL 2.0) format backend (spec.md §4.7, component C7).
//!
//! Grounded on `original_source/amdasm/DisasmAmdCL2.cpp` for the
//! main+inner-ELF-pair container shape and the pgmRSRC1/2 bit-packing
//! formulas.

use crate::config::{AsmConfig, Policy};
use crate::diag::Sink;
use crate::elf::{self, AmdHsaKernelCode, ElfBuilder, ElfClass, SectionSpec, AMD_HSA_KERNEL_CODE_SIZE};
use crate::gpu::GpuArchitecture;
use crate::section::{SectionId, SectionKind, SectionTable};
use crate::symbol::SymbolTable;

use super::{DisasmInput, DisasmKernel, FormatError, FormatHandler, SectionRole};

/// Compact 2-bit encoding used by `.gdata`/`.ddata`/`.bdata` text
/// relocations (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegmentKind {
    GlobalData = 0,
    DynamicData = 1,
    BssData = 2,
}

#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub vgprs: u32,
    pub sgprs: u32,
    pub priority: u32,
    pub float_mode: u32,
    pub priv_mode: bool,
    pub dx10_clamp: bool,
    pub debug_mode: bool,
    pub ieee_mode: bool,
    pub tg_size: bool,
    pub exceptions: u32,
    pub use_setup: bool,
    pub hsalayout: bool,
    pub dim_mask: u32,
}

impl KernelConfig {
    /// `pgmRSRC1`/`pgmRSRC2` bit-packing formulas (spec.md §4.7, verbatim).
    ///
    /// The reported SGPR count is gated by `Policy::UNIFIED_SGPR_COUNT`
    /// (spec.md §9's open question; resolution in DESIGN.md): under the
    /// old policy the extra VCC/FLAT_SCRATCH/XNACK SGPRs are added on top
    /// of the user-specified `sgprsnum`; under the new policy `sgprsnum`
    /// is already the total and nothing is added.
    #[must_use]
    pub fn pgm_rsrc1(&self, arch: GpuArchitecture, policy: Policy) -> u32 {
        let sgprs = if policy.at_least(Policy::UNIFIED_SGPR_COUNT) {
            self.sgprs
        } else {
            self.sgprs + AmdCl2Handler::extra_reserved_sgprs(arch, self.use_setup)
        };
        let vgprs_field = (self.vgprs.saturating_sub(1)) / 4;
        let sgprs_field = (sgprs.saturating_sub(1)) / 8;
        (vgprs_field & 0x3f)
            | ((sgprs_field & 0xf) << 6)
            | ((self.priority & 0x3) << 10)
            | ((self.float_mode & 0xff) << 12)
            | (u32::from(self.priv_mode) << 20)
            | (u32::from(self.dx10_clamp) << 21)
            | (u32::from(self.debug_mode) << 22)
            | (u32::from(self.ieee_mode) << 23)
            | ((self.exceptions & 0x7f) << 24)
    }

    /// Low bits carry the `.dims` group-dimension mask (spec.md §8
    /// scenario S3); bit 10 carries `tgsize` as in the legacy backend.
    #[must_use]
    pub fn pgm_rsrc2(&self) -> u32 {
        (self.dim_mask & 0x7) | (u32::from(self.tg_size) << 10)
    }
}

struct KernelState {
    name: String,
    setup: SectionId,
    text: SectionId,
    config: KernelConfig,
}

#[derive(Default)]
pub struct AmdCl2Handler {
    class: Option<ElfClass>,
    gdata: Option<SectionId>,
    ddata: Option<SectionId>,
    bdata: Option<SectionId>,
    sampler_init: Option<SectionId>,
    kernels: Vec<KernelState>,
    active: Option<usize>,
}

impl AmdCl2Handler {
    #[must_use]
    pub fn new(class: ElfClass) -> Self {
        Self { class: Some(class), ..Self::default() }
    }

    fn active_mut(&mut self) -> Result<&mut KernelState, FormatError> {
        let idx = self.active.ok_or(FormatError::NoActiveKernel)?;
        Ok(&mut self.kernels[idx])
    }

    /// Extra reserved SGPRs for VCC/FLAT_SCRATCH/XNACK (spec.md §4.7).
    #[must_use]
    pub fn extra_reserved_sgprs(arch: GpuArchitecture, enqueue_or_generic_ptrs: bool) -> u32 {
        let mut extra = 2; // VCC
        extra += match arch {
            GpuArchitecture::Gcn1_1 => 4,
            _ if arch >= GpuArchitecture::Gcn1_2 => 6,
            _ => 0,
        };
        if enqueue_or_generic_ptrs && arch >= GpuArchitecture::Gcn1_2 {
            extra += 4; // XNACK
        }
        extra
    }

    /// Hidden kernarg entries appended after the user's declared arguments
    /// when `.usesetup` is active (spec.md §4.7); each is a 8-byte kernarg
    /// slot, so they widen `kernarg_segment_size` by their count times 8.
    fn hidden_args(use_setup: bool) -> &'static [&'static str] {
        if use_setup {
            &["_.global_offset_0", "_.global_offset_1", "_.global_offset_2", "_.printf_buffer", "_.vqueue_pointer", "_.aqlwrap_pointer"]
        } else {
            &[]
        }
    }

    /// Builds the inner ELF (spec.md §4.7: `.hsatext` plus the optional
    /// `.hsadata_readonly_agent`/`.hsadata_global_agent`/`.hsabss_global_agent`
    /// segments the 2-bit `DataSegmentKind` encoding addresses).
    fn inner_elf(&self, class: ElfClass, sections: &SectionTable, config: &AsmConfig) -> Vec<u8> {
        let mut builder = ElfBuilder::new(class, elf::ET_DYN, elf::EM_AMDGCN_LEGACY);
        let mut hsatext = Vec::new();
        for kernel in &self.kernels {
            let hidden = Self::hidden_args(kernel.config.use_setup);
            let mut code = AmdHsaKernelCode {
                compute_pgm_rsrc1: kernel.config.pgm_rsrc1(config.device.architecture(), config.policy),
                compute_pgm_rsrc2: kernel.config.pgm_rsrc2(),
                kernel_code_entry_offset: AMD_HSA_KERNEL_CODE_SIZE as u64,
                kernarg_segment_size: (hidden.len() as u64) * 8,
                ..Default::default()
            };
            code.amd_code_version_major = 1;
            let mut w = elf::Writer::new();
            code.write_to(&mut w);
            hsatext.extend_from_slice(&w.into_bytes());
        }
        builder.add_section(SectionSpec::new(".hsatext", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_EXECINSTR, hsatext));
        if let Some(id) = self.gdata {
            builder.add_section(SectionSpec::new(".hsadata_readonly_agent", elf::SHT_PROGBITS, elf::SHF_ALLOC, sections.get(id).content.clone()));
        }
        if let Some(id) = self.ddata {
            builder.add_section(SectionSpec::new(".hsadata_global_agent", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE, sections.get(id).content.clone()));
        }
        if let Some(id) = self.bdata {
            builder.add_section(SectionSpec::new(".hsabss_global_agent", elf::SHT_NOBITS, elf::SHF_ALLOC | elf::SHF_WRITE, sections.get(id).content.clone()));
        }
        if let Some(id) = self.sampler_init {
            builder.add_section(SectionSpec::new(".hsaimage_samplerinit", elf::SHT_PROGBITS, elf::SHF_ALLOC, sections.get(id).content.clone()));
        }
        builder.build()
    }
}

impl FormatHandler for AmdCl2Handler {
    fn begin_kernel(&mut self, name: &str, sections: &mut SectionTable) {
        let setup = sections.create(format!("{name}.setup"), SectionKind::Setup);
        let text = sections.create(format!("{name}.text"), SectionKind::Text);
        self.active = Some(self.kernels.len());
        self.kernels.push(KernelState { name: name.to_string(), setup, text, config: KernelConfig::default() });
    }

    fn end_kernel(&mut self) {
        self.active = None;
    }

    fn select_section(
        &mut self,
        role: SectionRole,
        _kernel: Option<&str>,
        sections: &mut SectionTable,
    ) -> Result<SectionId, FormatError> {
        match role {
            SectionRole::Text => Ok(self.active_mut()?.text),
            SectionRole::Setup => Ok(self.active_mut()?.setup),
            SectionRole::Rodata => Ok(*self.gdata.get_or_insert_with(|| sections.create(".hsadata_readonly_agent", SectionKind::Rodata))),
            SectionRole::Data => Ok(*self.ddata.get_or_insert_with(|| sections.create(".hsadata_global_agent", SectionKind::Data))),
            SectionRole::Bss => Ok(*self.bdata.get_or_insert_with(|| sections.create(".hsabss_global_agent", SectionKind::Bss))),
            SectionRole::SamplerInit => {
                Ok(*self.sampler_init.get_or_insert_with(|| sections.create(".hsaimage_samplerinit", SectionKind::SamplerInit)))
            }
            other => Err(FormatError::UnknownPseudoOp(format!("{other:?}"))),
        }
    }

    fn handle_pseudo_op(
        &mut self,
        name: &str,
        args: &str,
        _config: &AsmConfig,
        _sections: &mut SectionTable,
        _symbols: &SymbolTable,
        _diagnostics: &mut Sink,
    ) -> Result<bool, FormatError> {
        let value = || args.trim().parse::<u32>().unwrap_or(0);
        match name.to_ascii_lowercase().as_str() {
            ".sgprsnum" => {
                self.active_mut()?.config.sgprs = value();
                Ok(true)
            }
            ".vgprsnum" => {
                self.active_mut()?.config.vgprs = value();
                Ok(true)
            }
            ".dx10clamp" => {
                self.active_mut()?.config.dx10_clamp = true;
                Ok(true)
            }
            ".ieeemode" => {
                self.active_mut()?.config.ieee_mode = true;
                Ok(true)
            }
            ".usesetup" => {
                self.active_mut()?.config.use_setup = true;
                Ok(true)
            }
            ".hsalayout" => {
                self.active_mut()?.config.hsalayout = true;
                Ok(true)
            }
            ".dims" => {
                let mut mask = 0u32;
                for (i, tok) in args.split(',').enumerate().take(3) {
                    if !tok.trim().is_empty() {
                        mask |= 1 << i;
                    }
                }
                self.active_mut()?.config.dim_mask = mask;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn finalize(
        &mut self,
        sections: &SectionTable,
        _symbols: &SymbolTable,
        config: &AsmConfig,
    ) -> Result<Vec<u8>, FormatError> {
        let class = self.class.unwrap_or(ElfClass::Elf64);
        let inner = self.inner_elf(class, sections, config);

        let mut outer = ElfBuilder::new(class, elf::ET_DYN, elf::EM_AMDGCN_LEGACY);
        outer.add_section(SectionSpec::new(".inner", elf::SHT_PROGBITS, 0, inner));
        Ok(outer.build())
    }

    fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, FormatError> {
        let view = elf::ElfHeaderView::parse(bytes).map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let shnum = view.e_shnum().map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let mut kernels = Vec::new();
        for i in 0..shnum {
            let Ok(hdr) = view.section_header(i) else { continue };
            if hdr.sh_type().unwrap_or(0) != elf::SHT_PROGBITS {
                continue;
            }
            let Ok(size) = hdr.sh_size() else { continue };
            let Ok(offset) = hdr.sh_offset() else { continue };
            kernels.push(DisasmKernel { name: format!("section{i}"), code_offset: offset, code_size: size, header: None, metadata_text: None });
        }
        Ok(DisasmInput { format: Some(crate::config::BinaryFormat::AmdCl2), kernels, code: bytes.to_vec(), ..Default::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuArchitecture;

    #[test]
    fn dims_set_low_bits_of_pgm_rsrc2() {
        let cfg = KernelConfig { dim_mask: 1, ..KernelConfig::default() };
        assert_eq!(cfg.pgm_rsrc2() & 0x7, 1);
    }

    #[test]
    fn old_policy_adds_extra_sgprs_new_policy_does_not() {
        let cfg = KernelConfig { sgprs: 12, ..KernelConfig::default() };
        let extra = AmdCl2Handler::extra_reserved_sgprs(GpuArchitecture::Gcn1_2, false);
        assert!(extra > 0);
        let old = cfg.pgm_rsrc1(GpuArchitecture::Gcn1_2, Policy::BASE);
        let new = cfg.pgm_rsrc1(GpuArchitecture::Gcn1_2, Policy::UNIFIED_SGPR_COUNT);
        assert_ne!(old, new);
    }
}
