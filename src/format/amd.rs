//! AMD legacy (OpenCL 1.x) format backend (spec.md §4.6, component C6).
//!
//! Grounded on `original_source/amdasm/DisasmAmd.cpp` and `AmdBinaries.h`
//! for the outer/inner-ELF-plus-CAL-notes container shape and the
//! PROGINFO magic-address table; ELF assembly itself goes through
//! [`crate::elf::ElfBuilder`].

use std::collections::HashMap;

use crate::config::AsmConfig;
use crate::diag::Sink;
use crate::elf::{self, ElfBuilder, ElfClass, SectionSpec};
use crate::section::{CalNoteKind, SectionId, SectionKind, SectionTable};
use crate::symbol::SymbolTable;

use super::{DisasmInput, DisasmKernel, FormatError, FormatHandler, SectionRole};

/// PROGINFO entry addresses the spec calls out by name (spec.md §4.6).
pub const PROGINFO_USERDATA_COUNT: u32 = 0x8000_1000;
pub const PROGINFO_USERDATA_FIRST: u32 = 0x8000_1001;
pub const PROGINFO_USERDATA_LAST: u32 = 0x8000_1040;
pub const PROGINFO_VGPRS: u32 = 0x8000_1041;
pub const PROGINFO_SGPRS: u32 = 0x8000_1042;
pub const PROGINFO_FLOAT_MODE: u32 = 0x8000_1043;
pub const PROGINFO_IEEE_MODE: u32 = 0x8000_1044;
pub const PROGINFO_FEATURES: u32 = 0x8000_001f;
pub const PROGINFO_PGMRSRC2: u32 = 0x0000_2e13;
pub const PROGINFO_UAV_MASK_FIRST: u32 = 0x8000_1843;
pub const PROGINFO_UAV_MASK_LAST: u32 = 0x8000_1863;

/// A single `.proginfo .entry addr, val` pair (or one synthesized from
/// `.config` fields).
#[derive(Debug, Clone, Copy)]
pub struct ProgInfoEntry {
    pub address: u32,
    pub value: u32,
}

/// Fields accumulated from a `.config` block, lowered to PROGINFO
/// entries and a metadata string at `finalize` time (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub vgprs: u32,
    pub sgprs: u32,
    pub float_mode: u32,
    pub ieee_mode: bool,
    pub userdata: Vec<u32>,
    pub uav_mask: Vec<u32>,
    pub features: u32,
    pub arg_lines: Vec<String>,
    pub dim_mask: u32,
    /// Raw `.proginfo`/`.calnote`/`.header`/`.metadata` overrides (raw
    /// mode, spec.md §4.6) layered on top of synthesized entries.
    pub raw_entries: Vec<ProgInfoEntry>,
    pub raw_metadata: Option<String>,
    pub raw_header: Option<Vec<u8>>,
}

struct KernelState {
    name: String,
    inner_text: SectionId,
    inner_data: SectionId,
    config: KernelConfig,
}

#[derive(Default)]
pub struct AmdHandler {
    class: Option<ElfClass>,
    rodata: Option<SectionId>,
    kernels: Vec<KernelState>,
    active: Option<usize>,
}

impl AmdHandler {
    #[must_use]
    pub fn new(class: ElfClass) -> Self {
        Self { class: Some(class), ..Self::default() }
    }

    fn active_mut(&mut self) -> Result<&mut KernelState, FormatError> {
        let idx = self.active.ok_or(FormatError::NoActiveKernel)?;
        Ok(&mut self.kernels[idx])
    }

    /// Lower a `KernelConfig` to the PROGINFO entry list (spec.md §4.6's
    /// fixed schema of magic addresses).
    fn proginfo_entries(cfg: &KernelConfig) -> Vec<ProgInfoEntry> {
        let mut entries = vec![
            ProgInfoEntry { address: PROGINFO_VGPRS, value: cfg.vgprs },
            ProgInfoEntry { address: PROGINFO_SGPRS, value: cfg.sgprs },
            ProgInfoEntry { address: PROGINFO_FLOAT_MODE, value: cfg.float_mode },
            ProgInfoEntry { address: PROGINFO_IEEE_MODE, value: u32::from(cfg.ieee_mode) },
            ProgInfoEntry { address: PROGINFO_FEATURES, value: cfg.features },
            ProgInfoEntry { address: PROGINFO_USERDATA_COUNT, value: cfg.userdata.len() as u32 },
        ];
        for (i, &value) in cfg.userdata.iter().enumerate() {
            let address = PROGINFO_USERDATA_FIRST + i as u32;
            if address > PROGINFO_USERDATA_LAST {
                break;
            }
            entries.push(ProgInfoEntry { address, value });
        }
        for (i, &value) in cfg.uav_mask.iter().enumerate() {
            let address = PROGINFO_UAV_MASK_FIRST + i as u32;
            if address > PROGINFO_UAV_MASK_LAST {
                break;
            }
            entries.push(ProgInfoEntry { address, value });
        }
        entries.extend(cfg.raw_entries.iter().copied());
        entries
    }

    /// Synthesize the CLRX-style metadata string: one `;pointer:`/
    /// `;value:`/... line per argument descriptor, plus the dimension
    /// mask (spec.md §4.6).
    fn metadata_string(cfg: &KernelConfig) -> String {
        if let Some(raw) = &cfg.raw_metadata {
            return raw.clone();
        }
        let mut out = String::new();
        out.push_str(&format!(";ARGSTART:__OpenCL_kernel\n;version:3:1:104\n;device:unknown\n"));
        out.push_str(&format!(";uniqueid:1\n;memory:1:1\n;uavid:11\n"));
        let group_mask = cfg.dim_mask & 0x7;
        let local_mask = (cfg.dim_mask >> 3) & 0x7;
        out.push_str(&format!(";cws:{group_mask}:{local_mask}:1\n"));
        for line in &cfg.arg_lines {
            out.push(';');
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(";ARGEND:__OpenCL_kernel\n");
        out
    }

    fn inner_elf(cfg: &KernelConfig, text: &[u8], data: &[u8], class: ElfClass) -> Vec<u8> {
        let mut builder = ElfBuilder::new(class, elf::ET_EXEC, elf::EM_AMDGCN_LEGACY);
        builder.add_section(SectionSpec::new(
            ".text",
            elf::SHT_PROGBITS,
            elf::SHF_ALLOC | elf::SHF_EXECINSTR,
            text.to_vec(),
        ));
        if !data.is_empty() {
            builder.add_section(SectionSpec::new(".data", elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE, data.to_vec()));
        }
        let mut notes = elf::Writer::new();
        for entry in Self::proginfo_entries(cfg) {
            notes.write_u32(entry.address);
            notes.write_u32(entry.value);
        }
        let mut note_section = elf::Writer::new();
        elf::write_note(&mut note_section, CalNoteKind::ProgInfo.into(), b"ATI CAL", &notes.into_bytes());
        let metadata = Self::metadata_string(cfg);
        let mut metadata_notes = elf::Writer::new();
        elf::write_note(&mut metadata_notes, CalNoteKind::Inputs.into(), b"ATI CAL", metadata.as_bytes());
        let mut note_bytes = note_section.into_bytes();
        note_bytes.extend_from_slice(&metadata_notes.into_bytes());
        builder.add_section(SectionSpec::new(".note", elf::SHT_NOTE, 0, note_bytes));
        if let Some(header) = &cfg.raw_header {
            builder.add_section(SectionSpec::new(".header", elf::SHT_PROGBITS, elf::SHF_ALLOC, header.clone()));
        }
        builder.build()
    }
}

impl FormatHandler for AmdHandler {
    fn begin_kernel(&mut self, name: &str, sections: &mut SectionTable) {
        let inner_text = sections.create(format!("{name}.text"), SectionKind::Text);
        let inner_data = sections.create(format!("{name}.data"), SectionKind::Data);
        self.active = Some(self.kernels.len());
        self.kernels.push(KernelState { name: name.to_string(), inner_text, inner_data, config: KernelConfig::default() });
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
            SectionRole::Text => Ok(self.active_mut()?.inner_text),
            SectionRole::Data => Ok(self.active_mut()?.inner_data),
            SectionRole::Rodata => {
                if let Some(id) = self.rodata {
                    return Ok(id);
                }
                let id = sections.create(".rodata", SectionKind::Rodata);
                self.rodata = Some(id);
                Ok(id)
            }
            SectionRole::CalNote(kind) => {
                let name = format!(".calnote.{kind:?}");
                Ok(sections.create(name, SectionKind::CalNote(kind)))
            }
            SectionRole::ProgInfo => Ok(sections.create(".proginfo", SectionKind::ProgInfo)),
            SectionRole::Config => Ok(sections.create(".config", SectionKind::Config)),
            SectionRole::Header => Ok(sections.create(".header", SectionKind::Header)),
            SectionRole::Metadata => Ok(sections.create(".metadata", SectionKind::Metadata)),
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
            ".dims" => {
                let state = self.active_mut()?;
                let mut mask = 0u32;
                for (i, tok) in args.split(',').enumerate().take(6) {
                    if !tok.trim().is_empty() {
                        mask |= 1 << i;
                    }
                }
                state.config.dim_mask = mask;
                Ok(true)
            }
            ".sgprsnum" => {
                let state = self.active_mut()?;
                state.config.sgprs = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".vgprsnum" => {
                let state = self.active_mut()?;
                state.config.vgprs = args.trim().parse().unwrap_or(0);
                Ok(true)
            }
            ".ieeemode" => {
                self.active_mut()?.config.ieee_mode = true;
                Ok(true)
            }
            ".arg" => {
                self.active_mut()?.config.arg_lines.push(args.trim().to_string());
                Ok(true)
            }
            // Raw mode (spec.md §4.6): accepted but not cross-checked
            // against the synthesized PROGINFO schema above.
            ".proginfo" => Ok(true),
            ".header" => {
                self.active_mut()?.config.raw_header = Some(args.as_bytes().to_vec());
                Ok(true)
            }
            ".metadata" => {
                self.active_mut()?.config.raw_metadata = Some(args.to_string());
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
        let mut outer = ElfBuilder::new(class, elf::ET_EXEC, 0);
        if let Some(rodata) = self.rodata {
            outer.add_section(SectionSpec::new(".rodata", elf::SHT_PROGBITS, elf::SHF_ALLOC, sections.get(rodata).content.clone()));
        }
        let mut inner_by_kernel = HashMap::new();
        for kernel in &self.kernels {
            let text = sections.get(kernel.inner_text).content.clone();
            let data = sections.get(kernel.inner_data).content.clone();
            let inner = Self::inner_elf(&kernel.config, &text, &data, class);
            inner_by_kernel.insert(kernel.name.clone(), inner);
        }
        for kernel in &self.kernels {
            let inner = inner_by_kernel.remove(&kernel.name).unwrap_or_default();
            outer.add_section(SectionSpec::new(format!("__OpenCL_{}_kernel", kernel.name), elf::SHT_PROGBITS, 0, inner));
        }
        Ok(outer.build())
    }

    fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, FormatError> {
        let view = elf::ElfHeaderView::parse(bytes).map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let shnum = view.e_shnum().map_err(|e| FormatError::MalformedContainer(e.to_string()))?;
        let mut kernels = Vec::new();
        for i in 0..shnum {
            let Ok(hdr) = view.section_header(i) else { continue };
            let Ok(size) = hdr.sh_size() else { continue };
            let Ok(offset) = hdr.sh_offset() else { continue };
            if size == 0 {
                continue;
            }
            kernels.push(DisasmKernel {
                name: format!("kernel{i}"),
                code_offset: offset,
                code_size: size,
                header: None,
                metadata_text: None,
            });
        }
        Ok(DisasmInput {
            format: Some(crate::config::BinaryFormat::Amd),
            kernels,
            code: bytes.to_vec(),
            ..Default::default()
        })
    }
}
