//! Gallium Compute format backend (spec.md §4.8, component C8).
//!
//! Grounded on `original_source/amdasm/DisasmGallium.cpp` for the
//! single-ELF `.AMDGPU.config`/`.AMDGPU.scratch` layout and the
//! fixed prog-info address table.

use crate::config::AsmConfig;
use crate::diag::Sink;
use crate::elf::{self, AmdHsaKernelCode, ElfBuilder, ElfClass, SectionSpec};
use crate::section::{RelocationKind, SectionId, SectionKind, SectionTable};
use crate::symbol::SymbolTable;

use super::{DisasmInput, DisasmKernel, FormatError, FormatHandler, SectionRole};

pub const PROGINFO_PGMRSRC1: u32 = 0xb848;
pub const PROGINFO_PGMRSRC2: u32 = 0xb84c;
pub const PROGINFO_SCRATCH_SIZE: u32 = 0xb860;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Scalar,
    Constant,
    Global,
    Local,
    Image2dRo,
    Image2dWo,
    Image3dRo,
    Image3dWo,
    Sampler,
}

impl ArgType {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Self::Scalar,
            "constant" => Self::Constant,
            "global" => Self::Global,
            "local" => Self::Local,
            "image2d_ro" | "image2dro" => Self::Image2dRo,
            "image2d_wo" | "image2dwo" => Self::Image2dWo,
            "image3d_ro" | "image3dro" => Self::Image3dRo,
            "image3d_wo" | "image3dwo" => Self::Image3dWo,
            "sampler" => Self::Sampler,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSemantic {
    General,
    GridDim,
    GridOffset,
    ImgSize,
    ImgFormat,
}

impl ArgSemantic {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "general" => Self::General,
            "griddim" => Self::GridDim,
            "gridoffset" => Self::GridOffset,
            "imgsize" => Self::ImgSize,
            "imgformat" => Self::ImgFormat,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArgDescriptor {
    pub kind: ArgType,
    pub sign_extended: bool,
    pub semantic: ArgSemantic,
    pub size: u32,
    pub target_size: u32,
    pub target_align: u32,
}

#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub pgm_rsrc1: u32,
    pub pgm_rsrc2: u32,
    pub scratch_size: u32,
    pub spilled_sgprs: Option<u32>,
    pub spilled_vgprs: Option<u32>,
    pub use_amdhsa_header: bool,
    pub sgprs: u32,
    pub vgprs: u32,
    pub args: Vec<ArgDescriptor>,
}

/// Parses one `.arg` directive's comma-separated field list (spec.md §8
/// scenario S2): `type,size[,target_size[,target_align[,sext|zext[,semantic]]]]`.
/// An omitted `target_size`/`target_align` defaults to `size`.
fn parse_arg_descriptor(args: &str) -> Option<ArgDescriptor> {
    let fields: Vec<&str> = args.split(',').map(str::trim).collect();
    let kind = ArgType::parse(fields.first()?)?;
    let size: u32 = fields.get(1)?.parse().ok()?;
    let target_size = fields.get(2).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()).unwrap_or(size);
    let target_align = fields.get(3).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()).unwrap_or(size);
    let mut sign_extended = false;
    let mut semantic = ArgSemantic::General;
    for field in fields.iter().skip(4).filter(|s| !s.is_empty()) {
        match field.to_ascii_lowercase().as_str() {
            "sext" => sign_extended = true,
            "zext" => sign_extended = false,
            other => semantic = ArgSemantic::parse(other).unwrap_or(semantic),
        }
    }
    Some(ArgDescriptor { kind, sign_extended, semantic, size, target_size, target_align })
}

struct KernelState {
    name: String,
    code_offset: u64,
    config: KernelConfig,
}

#[derive(Default)]
pub struct GalliumHandler {
    class: Option<ElfClass>,
    text: Option<SectionId>,
    rodata: Option<SectionId>,
    comment: Option<SectionId>,
    scratch_sym: Option<String>,
    kernels: Vec<KernelState>,
    active: Option<usize>,
    llvm_version: u32,
}

impl GalliumHandler {
    #[must_use]
    pub fn new(class: ElfClass, llvm_version: u32) -> Self {
        Self { class: Some(class), llvm_version, ..Self::default() }
    }

    fn active_mut(&mut self) -> Result<&mut KernelState, FormatError> {
        let idx = self.active.ok_or(FormatError::NoActiveKernel)?;
        Ok(&mut self.kernels[idx])
    }

    fn config_entries(cfg: &KernelConfig, llvm_version: u32) -> Vec<(u32, u32)> {
        let mut entries = vec![
            (PROGINFO_PGMRSRC1, cfg.pgm_rsrc1),
            (PROGINFO_PGMRSRC2, cfg.pgm_rsrc2),
            (PROGINFO_SCRATCH_SIZE, cfg.scratch_size),
        ];
        if llvm_version >= 30900 {
            entries.push((0xb828, cfg.spilled_sgprs.unwrap_or(0)));
            entries.push((0xb82c, cfg.spilled_vgprs.unwrap_or(0)));
        }
        entries
    }

    /// `.scratchsym SYM` relocations must point exactly at the symbol —
    /// no nonzero addend (spec.md §4.8; see DESIGN.md open-question
    /// resolution for why this is enforced uniformly).
    pub fn check_scratch_relocation(&self, symbol_name: &str, addend: i64) -> Result<(), FormatError> {
        if self.scratch_sym.as_deref() == Some(symbol_name) && addend != 0 {
            return Err(FormatError::MalformedContainer(format!(
                "'.scratchsym {symbol_name}' reference must not carry a nonzero addend (got {addend})"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn scratch_relocation_kind(low: bool) -> RelocationKind {
        if low {
            RelocationKind::Low32
        } else {
            RelocationKind::High32
        }
    }

    /// Binary-format kernel table (spec.md §4.8: "Kernels are listed in a
    /// binary-format kernel table (names + code offsets + arg
    /// descriptors)"). One entry per kernel: name (u32 length-prefixed),
    /// code offset (u64), SGPR/VGPR counts, arg count, then one fixed-size
    /// record per argument.
    fn kernel_table(&self) -> Vec<u8> {
        let mut w = elf::Writer::new();
        w.write_u32(self.kernels.len() as u32);
        for kernel in &self.kernels {
            let name = kernel.name.as_bytes();
            w.write_u32(name.len() as u32);
            w.write_bytes(name);
            w.write_u64(kernel.code_offset);
            w.write_u32(kernel.config.sgprs);
            w.write_u32(kernel.config.vgprs);
            w.write_u32(kernel.config.args.len() as u32);
            for arg in &kernel.config.args {
                w.write_u8(arg.kind as u8);
                w.write_u8(u8::from(arg.sign_extended));
                w.write_u8(arg.semantic as u8);
                w.write_u32(arg.size);
                w.write_u32(arg.target_size);
                w.write_u32(arg.target_align);
            }
        }
        w.into_bytes()
    }
}

impl FormatHandler for GalliumHandler {
    fn begin_kernel(&mut self, name: &str, sections: &mut SectionTable) {
        let text = *self.text.get_or_insert_with(|| sections.create(".text", SectionKind::Text));
        let code_offset = sections.get(text).cursor();
        self.active = Some(self.kernels.len());
        self.kernels.push(KernelState { name: name.to_string(), code_offset, config: KernelConfig::default() });
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
            SectionRole::Text => Ok(*self.text.get_or_insert_with(|| sections.create(".text", SectionKind::Text))),
            SectionRole::Rodata => Ok(*self.rodata.get_or_insert_with(|| sections.create(".rodata", SectionKind::Rodata))),
            SectionRole::Comment => Ok(*self.comment.get_or_insert_with(|| sections.create(".comment", SectionKind::Comment))),
            SectionRole::Config => Ok(sections.create(".AMDGPU.config", SectionKind::Config)),
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
        match name.to_ascii_lowercase().as_str() {
            ".scratchsym" => {
                self.scratch_sym = Some(args.trim().to_string());
                Ok(true)
            }
            ".hsaconfig" => {
                self.active_mut()?.config.use_amdhsa_header = true;
                Ok(true)
            }
            ".pgmrsrc1" => {
                self.active_mut()?.config.pgm_rsrc1 = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".pgmrsrc2" => {
                self.active_mut()?.config.pgm_rsrc2 = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".scratchbuffer" => {
                self.active_mut()?.config.scratch_size = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".sgprsnum" => {
                self.active_mut()?.config.sgprs = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".vgprsnum" => {
                self.active_mut()?.config.vgprs = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            // `.args` just opens the argument-list block; the arguments
            // themselves come one per `.arg` line (spec.md §4.8).
            ".args" => Ok(true),
            ".arg" => {
                let Some(descriptor) = parse_arg_descriptor(args) else {
                    return Err(FormatError::MalformedContainer(format!("malformed '.arg {args}'")));
                };
                self.active_mut()?.config.args.push(descriptor);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn finalize(
        &mut self,
        sections: &SectionTable,
        _symbols: &SymbolTable,
        _config: &AsmConfig,
    ) -> Result<Vec<u8>, FormatError> {
        let class = self.class.unwrap_or(ElfClass::Elf64);
        let mut builder = ElfBuilder::new(class, elf::ET_EXEC, elf::EM_AMDGPU);

        if let Some(id) = self.text {
            let mut data = sections.get(id).content.clone();
            for kernel in &self.kernels {
                if kernel.config.use_amdhsa_header && self.llvm_version >= 40000 {
                    let mut code = AmdHsaKernelCode {
                        compute_pgm_rsrc1: kernel.config.pgm_rsrc1,
                        compute_pgm_rsrc2: kernel.config.pgm_rsrc2,
                        ..Default::default()
                    };
                    code.amd_code_version_major = 1;
                    let mut w = elf::Writer::new();
                    code.write_to(&mut w);
                    let mut header_and_code = w.into_bytes();
                    header_and_code.extend_from_slice(&data);
                    data = header_and_code;
                }
            }
            builder.add_section(SectionSpec::new(".text", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_EXECINSTR, data));
        }
        if let Some(id) = self.rodata {
            builder.add_section(SectionSpec::new(".rodata", elf::SHT_PROGBITS, elf::SHF_ALLOC, sections.get(id).content.clone()));
        }
        let mut config_bytes = elf::Writer::new();
        for kernel in &self.kernels {
            for (addr, value) in Self::config_entries(&kernel.config, self.llvm_version) {
                config_bytes.write_u32(addr);
                config_bytes.write_u32(value);
            }
        }
        builder.add_section(SectionSpec::new(".AMDGPU.config", elf::SHT_PROGBITS, 0, config_bytes.into_bytes()));
        builder.add_section(SectionSpec::new(".AMDGPU.kerneltable", elf::SHT_PROGBITS, 0, self.kernel_table()));
        if let Some(id) = self.comment {
            builder.add_section(SectionSpec::new(".comment", elf::SHT_PROGBITS, 0, sections.get(id).content.clone()));
        }
        Ok(builder.build())
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
            let (Ok(size), Ok(offset)) = (hdr.sh_size(), hdr.sh_offset()) else { continue };
            kernels.push(DisasmKernel { name: format!("kernel{i}"), code_offset: offset, code_size: size, header: None, metadata_text: None });
        }
        Ok(DisasmInput { format: Some(crate::config::BinaryFormat::Gallium), kernels, code: bytes.to_vec(), ..Default::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AsmConfig;
    use crate::gpu::GpuDevice;

    /// spec.md §8 scenario S2.
    #[test]
    fn config_and_arg_directives_populate_kernel_config() {
        let mut handler = GalliumHandler::new(ElfClass::Elf64, 0);
        let mut sections = SectionTable::new();
        let symbols = SymbolTable::new();
        let mut sink = Sink::new();
        let config = AsmConfig::new(GpuDevice::Pitcairn, crate::config::BinaryFormat::Gallium);

        handler.begin_kernel("k", &mut sections);
        for (name, args) in [
            (".sgprsnum", "36"),
            (".vgprsnum", "139"),
            (".pgmrsrc2", "523243"),
            (".scratchbuffer", "230"),
            (".args", ""),
            (".arg", "scalar,8,,,sext,griddim"),
        ] {
            assert!(handler.handle_pseudo_op(name, args, &config, &mut sections, &symbols, &mut sink).unwrap());
        }

        let kernel = &handler.kernels[0];
        assert_eq!(kernel.config.sgprs, 36);
        assert_eq!(kernel.config.vgprs, 139);
        assert_eq!(kernel.config.pgm_rsrc2, 0x7fbeb);
        assert_eq!(kernel.config.scratch_size, 230);
        assert_eq!(kernel.config.args.len(), 1);
        let arg = &kernel.config.args[0];
        assert_eq!(arg.kind, ArgType::Scalar);
        assert!(arg.sign_extended);
        assert_eq!(arg.semantic, ArgSemantic::GridDim);
        assert_eq!(arg.size, 8);
        assert_eq!(arg.target_size, 8);
        assert_eq!(arg.target_align, 8);
    }

    #[test]
    fn finalize_emits_kernel_table_with_names_offsets_and_args() {
        let mut handler = GalliumHandler::new(ElfClass::Elf64, 0);
        let mut sections = SectionTable::new();
        let symbols = SymbolTable::new();
        let config = AsmConfig::new(GpuDevice::Pitcairn, crate::config::BinaryFormat::Gallium);
        let c = config.clone();
        handler.begin_kernel("vectorAdd", &mut sections);
        handler.handle_pseudo_op(".sgprsnum", "4", &c, &mut sections, &symbols, &mut Sink::new()).unwrap();
        handler.handle_pseudo_op(".arg", "scalar,8", &c, &mut sections, &symbols, &mut Sink::new()).unwrap();
        handler.end_kernel();

        let table = handler.kernel_table();
        // count (u32) + name-len (u32) + name bytes
        assert_eq!(&table[0..4], &1u32.to_le_bytes());
        assert_eq!(&table[4..8], &9u32.to_le_bytes());
        assert_eq!(&table[8..17], b"vectorAdd");
        let code_offset = u64::from_le_bytes(table[17..25].try_into().unwrap());
        assert_eq!(code_offset, 0);
        let sgprs = u32::from_le_bytes(table[25..29].try_into().unwrap());
        assert_eq!(sgprs, 4);

        // finalize() must include that table as a section in the image.
        let image = handler.finalize(&sections, &symbols, &config).unwrap();
        let view = elf::ElfHeaderView::parse(&image).unwrap();
        assert!(image.windows(table.len()).any(|w| w == table.as_slice()));
        let _ = view.e_shnum().unwrap();
    }
}
