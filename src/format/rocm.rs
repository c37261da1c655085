//! ROCm / HSACO format backend (spec.md §4.9, component C9).
//!
//! Grounded on `original_source/amdasm/DisasmROCm.cpp` for the HSACO
//! container shape (per-kernel `AmdHsaKernelCode` descriptor immediately
//! preceding its code, dynsym-exposed kernel/function/data symbols) and
//! on `original_source/tests/amdbin/ROCmMetadata.cpp` for the metadata
//! schema now modeled in [`crate::format::rocm_metadata`].

use crate::config::AsmConfig;
use crate::diag::Sink;
use crate::elf::{self, AmdHsaKernelCode, ElfBuilder, ElfClass, NoteReader, SectionSpec, Writer, AMD_HSA_KERNEL_CODE_SIZE};
use crate::section::{SectionId, SectionKind, SectionTable};
use crate::symbol::SymbolTable;

use super::rocm_metadata::{yaml, ArgMetadata, CodeProps, KernelMetadata, RocmMetadata};
use super::{DisasmInput, DisasmKernel, FormatError, FormatHandler, SectionRole};

/// `NT_AMDGPU_METADATA`, the ELF note type the ROCm runtime looks for
/// when resolving a HSACO image's kernel metadata.
pub const NT_AMDGPU_METADATA: u32 = 32;

/// Kernel-region kind (spec.md §4.9): an ordinary kernel carries a
/// 256-byte descriptor ahead of its code; a fully-HSA `.fkernel` is a
/// plain callable function with no descriptor; `DATA` is a named data
/// blob exposed through the symbol table rather than code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelRegionKind {
    Kernel,
    FKernel,
    Data,
}

#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub vgprs: u32,
    pub sgprs: u32,
    pub pgm_rsrc1: Option<u32>,
    pub pgm_rsrc2: Option<u32>,
    pub priority: u32,
    pub float_mode: u32,
    pub priv_mode: bool,
    pub dx10_clamp: bool,
    pub debug_mode: bool,
    pub ieee_mode: bool,
    pub tg_size: bool,
    pub exceptions: u32,
    pub group_segment_size: u32,
    pub private_segment_size: u32,
    pub kernarg_segment_size: u64,
}

impl KernelConfig {
    /// Same `pgmRSRC1`/`pgmRSRC2` bit layout as the AMDCL2 backend
    /// (spec.md §4.7/§4.9): the compute shader-stage resource registers
    /// are an ISA-level encoding shared by every AMDHSA-header format,
    /// not something each container redefines.
    #[must_use]
    pub fn pgm_rsrc1(&self) -> u32 {
        if let Some(v) = self.pgm_rsrc1 {
            return v;
        }
        let vgprs_field = (self.vgprs.saturating_sub(1)) / 4;
        let sgprs_field = (self.sgprs.saturating_sub(1)) / 8;
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

    #[must_use]
    pub fn pgm_rsrc2(&self) -> u32 {
        self.pgm_rsrc2.unwrap_or(u32::from(self.tg_size) << 10)
    }
}

struct KernelState {
    name: String,
    kind: KernelRegionKind,
    text: SectionId,
    config: KernelConfig,
}

/// Which wire encoding `finalize` writes the metadata note in (spec.md
/// §4.9: legacy YAML subset vs the newer MsgPack format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataEncoding {
    Yaml,
    MsgPack,
}

pub struct RocmHandler {
    class: Option<ElfClass>,
    encoding: MetadataEncoding,
    text: Option<SectionId>,
    rodata: Option<SectionId>,
    kernels: Vec<KernelState>,
    active: Option<usize>,
    got_symbols: Vec<String>,
}

impl RocmHandler {
    #[must_use]
    pub fn new(class: ElfClass, encoding: MetadataEncoding) -> Self {
        Self { class: Some(class), encoding, text: None, rodata: None, kernels: Vec::new(), active: None, got_symbols: Vec::new() }
    }

    fn active_mut(&mut self) -> Result<&mut KernelState, FormatError> {
        let idx = self.active.ok_or(FormatError::NoActiveKernel)?;
        Ok(&mut self.kernels[idx])
    }

    /// `.gotsym NAME` reserves one 8-byte GOT slot for `NAME`
    /// (spec.md §4.9: the HSACO GOT is a flat table of 8-byte pointer
    /// slots, one per referenced global symbol).
    pub fn got_index(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.got_symbols.iter().position(|s| s == name) {
            return pos as u32;
        }
        self.got_symbols.push(name.to_string());
        (self.got_symbols.len() - 1) as u32
    }

    fn metadata_for(&self, config: &AsmConfig) -> RocmMetadata {
        let kernels = self
            .kernels
            .iter()
            .filter(|k| k.kind != KernelRegionKind::Data)
            .map(|k| KernelMetadata {
                name: k.name.clone(),
                symbol_name: format!("{}.kd", k.name),
                language: Some("OpenCL C".to_string()),
                language_version: Some([config.driver_version.0 / 100, config.driver_version.0 % 100]),
                attrs: Default::default(),
                args: Vec::<ArgMetadata>::new(),
                code_props: CodeProps {
                    kernarg_segment_size: k.config.kernarg_segment_size,
                    group_segment_fixed_size: k.config.group_segment_size as u64,
                    private_segment_fixed_size: k.config.private_segment_size as u64,
                    kernarg_segment_align: 8,
                    wavefront_size: 64,
                    num_sgprs: k.config.sgprs,
                    num_vgprs: k.config.vgprs,
                    max_flat_work_group_size: 256,
                    fixed_work_group_size: None,
                    num_spilled_sgprs: 0,
                    num_spilled_vgprs: 0,
                },
            })
            .collect();
        RocmMetadata { version: [1, 0], printf: Vec::new(), kernels }
    }

    fn metadata_note_bytes(&self, config: &AsmConfig) -> Vec<u8> {
        let meta = self.metadata_for(config);
        match self.encoding {
            MetadataEncoding::Yaml => yaml::emit_metadata(&meta).into_bytes(),
            MetadataEncoding::MsgPack => super::rocm_metadata::to_msgpack(&meta).unwrap_or_default(),
        }
    }

    /// `.dynstr`/`.dynsym` for the symbols backing the reserved GOT slots
    /// (spec.md §4.9: "`.dynsym`, relocations, GOT"). One `STT_OBJECT`
    /// global symbol per GOT entry, `SHN_UNDEF` since these are resolved
    /// externally at load time.
    fn dynsym_sections(&self, class: ElfClass) -> (Vec<u8>, Vec<u8>) {
        let mut dynstr = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.got_symbols.len());
        for name in &self.got_symbols {
            name_offsets.push(dynstr.len() as u32);
            dynstr.extend_from_slice(name.as_bytes());
            dynstr.push(0);
        }

        let mut dynsym = Writer::new();
        write_sym_entry(&mut dynsym, class, 0, 0, 0); // STN_UNDEF
        for name_off in name_offsets {
            write_sym_entry(&mut dynsym, class, name_off, ST_INFO_GLOBAL_OBJECT, 0);
        }
        (dynstr, dynsym.into_bytes())
    }
}

/// `STB_GLOBAL << 4 | STT_OBJECT`.
const ST_INFO_GLOBAL_OBJECT: u8 = (1 << 4) | 1;

/// Writes one `Elf32_Sym`/`Elf64_Sym` entry; field order differs between
/// the two classes (spec.md §9: explicit LE field accessors, never a cast).
fn write_sym_entry(w: &mut Writer, class: ElfClass, name_offset: u32, info: u8, shndx: u16) {
    match class {
        ElfClass::Elf32 => {
            w.write_u32(name_offset);
            w.write_word(class, 0); // st_value
            w.write_word(class, 0); // st_size
            w.write_u8(info);
            w.write_u8(0); // st_other
            w.write_u16(shndx);
        }
        ElfClass::Elf64 => {
            w.write_u32(name_offset);
            w.write_u8(info);
            w.write_u8(0); // st_other
            w.write_u16(shndx);
            w.write_word(class, 0); // st_value
            w.write_word(class, 0); // st_size
        }
    }
}

impl Default for RocmHandler {
    fn default() -> Self {
        Self::new(ElfClass::Elf64, MetadataEncoding::MsgPack)
    }
}

impl FormatHandler for RocmHandler {
    fn begin_kernel(&mut self, name: &str, sections: &mut SectionTable) {
        let text = *self.text.get_or_insert_with(|| sections.create(".text", SectionKind::Text));
        self.active = Some(self.kernels.len());
        self.kernels.push(KernelState { name: name.to_string(), kind: KernelRegionKind::Kernel, text, config: KernelConfig::default() });
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
            SectionRole::Metadata => Ok(sections.create(".note", SectionKind::Metadata)),
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
            ".fkernel" => {
                self.active_mut()?.kind = KernelRegionKind::FKernel;
                Ok(true)
            }
            ".sgprsnum" => {
                self.active_mut()?.config.sgprs = value();
                Ok(true)
            }
            ".vgprsnum" => {
                self.active_mut()?.config.vgprs = value();
                Ok(true)
            }
            ".pgmrsrc1" => {
                self.active_mut()?.config.pgm_rsrc1 = Some(value());
                Ok(true)
            }
            ".pgmrsrc2" => {
                self.active_mut()?.config.pgm_rsrc2 = Some(value());
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
            ".localsize" => {
                self.active_mut()?.config.group_segment_size = value();
                Ok(true)
            }
            ".privatesize" => {
                self.active_mut()?.config.private_segment_size = value();
                Ok(true)
            }
            ".kernargsize" => {
                self.active_mut()?.config.kernarg_segment_size = u64::from(value());
                Ok(true)
            }
            ".gotsym" => {
                self.got_index(args.trim());
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
        let mut builder = ElfBuilder::new(class, elf::ET_DYN, elf::EM_AMDGPU);

        if let Some(id) = self.text {
            let raw = &sections.get(id).content;
            let mut out = Vec::new();
            // Single combined `.text` region: each non-data kernel's
            // descriptor-then-code layout is assembled here rather than
            // per-kernel, since all kernels share the one section the
            // driver writes code into (spec.md §4.9).
            if self.kernels.iter().any(|k| k.kind == KernelRegionKind::Kernel) {
                for kernel in &self.kernels {
                    if kernel.kind == KernelRegionKind::Kernel {
                        let mut code = AmdHsaKernelCode {
                            compute_pgm_rsrc1: kernel.config.pgm_rsrc1(),
                            compute_pgm_rsrc2: kernel.config.pgm_rsrc2(),
                            kernel_code_entry_offset: AMD_HSA_KERNEL_CODE_SIZE as u64,
                            kernarg_segment_size: kernel.config.kernarg_segment_size,
                            workgroup_group_segment_size: kernel.config.group_segment_size,
                            workitem_private_segment_size: kernel.config.private_segment_size,
                            wavefront_size: 6, // 2^6 = 64 work-items per wavefront
                            ..Default::default()
                        };
                        code.amd_code_version_major = 1;
                        code.amd_machine_kind = 1; // AMD_MACHINE_KIND_AMDGPU
                        let mut w = Writer::new();
                        code.write_to(&mut w);
                        out.extend_from_slice(&w.into_bytes());
                    }
                }
            }
            out.extend_from_slice(raw);
            builder.add_section(SectionSpec::new(".text", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_EXECINSTR, out));
        }
        if let Some(id) = self.rodata {
            builder.add_section(SectionSpec::new(".rodata", elf::SHT_PROGBITS, elf::SHF_ALLOC, sections.get(id).content.clone()));
        }
        if !self.got_symbols.is_empty() {
            builder.add_section(SectionSpec::new(".got", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE, vec![0u8; self.got_symbols.len() * 8]));

            let (dynstr, dynsym) = self.dynsym_sections(class);
            let dynstr_idx = builder.add_section(SectionSpec::new(".dynstr", elf::SHT_STRTAB, elf::SHF_ALLOC, dynstr));
            let mut dynsym_spec = SectionSpec::new(".dynsym", elf::SHT_DYNSYM, elf::SHF_ALLOC, dynsym);
            dynsym_spec.link = dynstr_idx as u32;
            dynsym_spec.info = 1; // one local (null) symbol precedes the globals
            dynsym_spec.entsize = match class {
                ElfClass::Elf32 => 16,
                ElfClass::Elf64 => 24,
            };
            builder.add_section(dynsym_spec);
        }

        let note_desc = self.metadata_note_bytes(config);
        let mut note_writer = Writer::new();
        elf::write_note(&mut note_writer, NT_AMDGPU_METADATA, b"AMD", &note_desc);
        builder.add_section(SectionSpec::new(".note", elf::SHT_NOTE, 0, note_writer.into_bytes()));

        Ok(builder.build())
    }

    fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, FormatError> {
        let view = elf::ElfHeaderView::parse(bytes).map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let shnum = view.e_shnum().map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let mut kernels = Vec::new();
        let mut code_offset = 0u64;
        let mut code_size = 0u64;
        let mut metadata_text = None;

        for i in 0..shnum {
            let Ok(hdr) = view.section_header(i) else { continue };
            let Ok(ty) = hdr.sh_type() else { continue };
            let (Ok(offset), Ok(size)) = (hdr.sh_offset(), hdr.sh_size()) else { continue };
            if ty == elf::SHT_PROGBITS && code_size == 0 && size as usize >= AMD_HSA_KERNEL_CODE_SIZE {
                code_offset = offset;
                code_size = size;
            } else if ty == elf::SHT_NOTE {
                let notes_buf = bytes.get(offset as usize..(offset + size) as usize).unwrap_or(&[]);
                for note in NoteReader::new(notes_buf).flatten() {
                    if note.kind == NT_AMDGPU_METADATA {
                        metadata_text = Some(parse_note_desc(note.desc));
                    }
                }
            }
        }

        if code_size as usize >= AMD_HSA_KERNEL_CODE_SIZE {
            let header_bytes = bytes.get(code_offset as usize..(code_offset as usize + AMD_HSA_KERNEL_CODE_SIZE)).map(<[u8]>::to_vec);
            kernels.push(DisasmKernel {
                name: "kernel0".to_string(),
                code_offset: code_offset + AMD_HSA_KERNEL_CODE_SIZE as u64,
                code_size: code_size.saturating_sub(AMD_HSA_KERNEL_CODE_SIZE as u64),
                header: header_bytes,
                metadata_text: metadata_text.clone(),
            });
        }

        Ok(DisasmInput {
            format: Some(crate::config::BinaryFormat::Rocm),
            kernels,
            code: bytes.to_vec(),
            code_base_offset: code_offset,
            rodata: Vec::new(),
            comment: metadata_text,
        })
    }
}

/// Renders a metadata note's raw descriptor as text for `DisasmKernel`,
/// trying MsgPack first (the more common modern encoding) and falling
/// back to treating it as the legacy YAML text verbatim.
fn parse_note_desc(desc: &[u8]) -> String {
    match super::rocm_metadata::from_msgpack(desc) {
        Ok(meta) => yaml::emit_metadata(&meta),
        Err(_) => String::from_utf8_lossy(desc).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuDevice;

    #[test]
    fn pgm_rsrc1_matches_amdcl2_bit_layout() {
        let cfg = KernelConfig { vgprs: 8, sgprs: 16, ieee_mode: true, ..Default::default() };
        let packed = cfg.pgm_rsrc1();
        assert_eq!(packed & 0x3f, 1); // (8-1)/4 = 1
        assert_eq!((packed >> 23) & 1, 1);
    }

    #[test]
    fn finalize_emits_kernel_descriptor_ahead_of_code() {
        let mut handler = RocmHandler::new(ElfClass::Elf64, MetadataEncoding::MsgPack);
        let mut sections = SectionTable::new();
        handler.begin_kernel("vectorAdd", &mut sections);
        let text = handler.select_section(SectionRole::Text, Some("vectorAdd"), &mut sections).unwrap();
        sections.get_mut(text).content.extend_from_slice(&[0xAB; 16]);
        handler.end_kernel();

        let symbols = SymbolTable::new();
        let config = AsmConfig::new(GpuDevice::Vega10, crate::config::BinaryFormat::Rocm);
        let image = handler.finalize(&sections, &symbols, &config).unwrap();

        let input = RocmHandler::parse_binary(&image).unwrap();
        assert_eq!(input.kernels.len(), 1);
        assert_eq!(input.kernels[0].code_size, 16);
        assert!(input.kernels[0].header.is_some());
    }

    #[test]
    fn gotsym_emits_dynsym_and_dynstr_sections() {
        let mut handler = RocmHandler::new(ElfClass::Elf64, MetadataEncoding::MsgPack);
        let mut sections = SectionTable::new();
        let symbols = SymbolTable::new();
        let config = AsmConfig::new(GpuDevice::Vega10, crate::config::BinaryFormat::Rocm);
        handler.begin_kernel("vectorAdd", &mut sections);
        handler.handle_pseudo_op(".gotsym", "extern_buf", &config, &mut sections, &symbols, &mut Sink::new()).unwrap();
        handler.end_kernel();

        let image = handler.finalize(&sections, &symbols, &config).unwrap();
        let view = elf::ElfHeaderView::parse(&image).unwrap();
        let shnum = view.e_shnum().unwrap();
        let found_dynsym = (0..shnum).any(|i| {
            let Ok(hdr) = view.section_header(i) else { return false };
            hdr.sh_type().unwrap_or(0) == elf::SHT_DYNSYM && hdr.sh_entsize().unwrap_or(0) == 24
        });
        assert!(found_dynsym, "finalize() must emit a .dynsym section when GOT symbols exist");
        assert!(image.windows(b"extern_buf".len()).any(|w| w == b"extern_buf"), ".dynstr must contain the GOT symbol's name");
    }

    #[test]
    fn fkernel_regions_carry_no_descriptor() {
        let mut handler = RocmHandler::new(ElfClass::Elf64, MetadataEncoding::Yaml);
        let mut sections = SectionTable::new();
        handler.begin_kernel("helper", &mut sections);
        handler.handle_pseudo_op(".fkernel", "", &AsmConfig::new(GpuDevice::Vega10, crate::config::BinaryFormat::Rocm), &mut sections, &SymbolTable::new(), &mut Sink::new()).unwrap();
        assert_eq!(handler.kernels[0].kind, KernelRegionKind::FKernel);
    }
}
