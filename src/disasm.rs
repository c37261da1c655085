//! The disassembly driver (spec.md §4.10, component C10).
//!
//! Grounded on `original_source/amdasm/Disassembler.cpp`'s shared
//! dispatch-by-container-signature driver: one outer-ELF sniff picks the
//! backend, then a per-architecture `IsaDisassembler` (an external
//! collaborator, never implemented here — spec.md §1 puts the GCN opcode
//! table out of scope) walks each kernel's code region. Label synthesis
//! and relocation-expression rendering mirror `ISADisassembler::writeLocation`
//! / `writeRelocation` in the same file, adapted from an output-stream
//! push model to a string-building one.

use std::{error, fmt};

use crate::config::{BinaryFormat, DriverVersion};
use crate::elf;
use crate::format::amd::AmdHandler;
use crate::format::amdcl2::AmdCl2Handler;
use crate::format::gallium::GalliumHandler;
use crate::format::rocm::RocmHandler;
use crate::format::{DisasmInput, DisasmKernel, FormatError, FormatHandler, RawCodeHandler};
use crate::gpu::GpuArchitecture;
use crate::isa::IsaDisassembler;
use crate::section::RelocationKind;

/// The fixed size of the AMDHSA kernel-code header each backend's
/// `parse_binary` already carves out of the code region (spec.md §4.9).
const AMDHSA_HEADER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisasmError {
    Elf(elf::Error),
    Format(FormatError),
    /// The outer ELF header doesn't match any of the four known
    /// `(e_machine, e_type)` signatures (spec.md §4.10).
    UnrecognizedContainer,
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf(e) => write!(f, "{e}"),
            Self::Format(e) => write!(f, "{e}"),
            Self::UnrecognizedContainer => f.write_str("not a recognized AMD GPU binary container"),
        }
    }
}

impl error::Error for DisasmError {}

impl From<elf::Error> for DisasmError {
    fn from(e: elf::Error) -> Self {
        Self::Elf(e)
    }
}

impl From<FormatError> for DisasmError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

/// Picks a backend from the outer ELF header's `(e_machine, e_type)` pair
/// (spec.md §4.10's implicit "how is the format picked" gap, resolved
/// against each backend's own `finalize`: AMD leaves `e_machine` as plain
/// 0 and emits `ET_EXEC`; AMDCL2 is `EM_AMDGCN_LEGACY`/`ET_DYN`; Gallium is
/// `EM_AMDGPU`/`ET_EXEC`; ROCm is `EM_AMDGPU`/`ET_DYN`). `RawCode` has no
/// container and is never auto-detected — callers that already know
/// they're looking at a bare code blob should go straight to
/// [`RawCodeHandler::parse_binary`].
pub fn detect_format(bytes: &[u8]) -> Result<BinaryFormat, DisasmError> {
    let view = elf::ElfHeaderView::parse(bytes)?;
    let e_type = view.e_type()?;
    let e_machine = view.e_machine()?;
    match (e_machine, e_type) {
        (elf::EM_AMDGCN_LEGACY, t) if t == elf::ET_DYN => Ok(BinaryFormat::AmdCl2),
        (elf::EM_AMDGPU, t) if t == elf::ET_DYN => Ok(BinaryFormat::Rocm),
        (elf::EM_AMDGPU, t) if t == elf::ET_EXEC => Ok(BinaryFormat::Gallium),
        (0, t) if t == elf::ET_EXEC => Ok(BinaryFormat::Amd),
        _ => Err(DisasmError::UnrecognizedContainer),
    }
}

/// Detects the container format and parses it into the shared
/// [`DisasmInput`] shape.
pub fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, DisasmError> {
    let format = detect_format(bytes)?;
    parse_binary_as(bytes, format)
}

/// Parses `bytes` with a caller-chosen backend, skipping auto-detection
/// (useful when the format is already known, e.g. from a CLI flag).
pub fn parse_binary_as(bytes: &[u8], format: BinaryFormat) -> Result<DisasmInput, DisasmError> {
    let input = match format {
        BinaryFormat::Amd => AmdHandler::parse_binary(bytes)?,
        BinaryFormat::AmdCl2 => AmdCl2Handler::parse_binary(bytes)?,
        BinaryFormat::Gallium => GalliumHandler::parse_binary(bytes)?,
        BinaryFormat::Rocm => RocmHandler::parse_binary(bytes)?,
        BinaryFormat::RawCode => RawCodeHandler::parse_binary(bytes)?,
    };
    Ok(input)
}

/// Reconstructs assembler source text from a parsed binary (spec.md
/// §4.10): re-assembling the output should yield an equivalent binary,
/// modulo documented lossy fields like `.driver_info`.
///
/// Each backend's `parse_binary` already separates the 256-byte AMDHSA
/// kernel-code header (when present) from the surrounding code region
/// into [`DisasmKernel::header`], so this driver only has to decide how
/// to *render* it — a `.skip 256` stub when dumping symbolically, or the
/// raw bytes when `dump_raw_header` is set.
///
/// Relocations are not re-extracted here: none of the four backends'
/// `parse_binary` currently surfaces a container-level relocation table
/// (only code/kernel regions and metadata text), so there is nothing yet
/// for this driver to seed into the `IsaDisassembler` via
/// `add_relocation`/`add_named_label` before calling `disassemble`.
/// [`render_relocation`] implements spec.md §4.10's textual
/// re-expression rule (`sym+N` / `(sym+N)>>32` / `(sym+N)&0xffffffff`)
/// standalone, ready for a container relocation table to drive once one
/// is extracted.
pub struct Disassembler<'d> {
    isa: &'d mut dyn IsaDisassembler,
    dump_raw_header: bool,
}

impl<'d> Disassembler<'d> {
    #[must_use]
    pub fn new(isa: &'d mut dyn IsaDisassembler) -> Self {
        Self { isa, dump_raw_header: false }
    }

    #[must_use]
    pub fn with_raw_header_dump(mut self, value: bool) -> Self {
        self.dump_raw_header = value;
        self
    }

    /// Renders the whole input: any top-level comment, then each
    /// kernel's `.kernel` scope, header, and disassembled code region in
    /// container order.
    pub fn render(&mut self, input: &DisasmInput, arch: GpuArchitecture, driver_version: DriverVersion) -> String {
        let mut out = String::new();
        if let Some(comment) = &input.comment {
            for line in comment.lines() {
                out.push_str("; ");
                out.push_str(line);
                out.push('\n');
            }
        }
        for (index, kernel) in input.kernels.iter().enumerate() {
            self.render_kernel(&mut out, input, kernel, index, arch, driver_version);
        }
        out
    }

    fn render_kernel(
        &mut self,
        out: &mut String,
        input: &DisasmInput,
        kernel: &DisasmKernel,
        section_index: usize,
        arch: GpuArchitecture,
        driver_version: DriverVersion,
    ) {
        out.push_str(".kernel ");
        out.push_str(&kernel.name);
        out.push('\n');

        if let Some(meta) = &kernel.metadata_text {
            for line in meta.lines() {
                out.push_str("; ");
                out.push_str(line);
                out.push('\n');
            }
        }

        if let Some(header) = &kernel.header {
            if !self.dump_raw_header && header.len() == AMDHSA_HEADER_SIZE {
                out.push_str("    .skip 256\n");
            } else {
                dump_bytes(out, header);
            }
        }

        let start = kernel.code_offset as usize;
        let end = start.saturating_add(kernel.code_size as usize).min(input.code.len());
        let code = input.code.get(start..end).unwrap_or(&[]);

        self.isa.set_input(code, kernel.code_offset);
        self.isa.analyze_before_disassemble(arch, driver_version);
        self.isa.prepare_labels_and_relocations();
        let instructions = self.isa.disassemble(arch, driver_version);

        for inst in &instructions {
            if inst.is_branch_target_candidate {
                out.push_str(&format!(".L{}_{section_index}\n", inst.offset));
            }
            out.push_str("    ");
            out.push_str(&inst.text);
            out.push('\n');
        }
    }
}

/// Renders a raw byte run as `.byte`/`.fill` lines, mirroring
/// `CLRX::printDisasmData`'s repeated-byte collapsing: runs of 8 or more
/// identical bytes become one `.fill`, everything else is emitted as
/// comma-separated `.byte` lines of up to 16 entries.
fn dump_bytes(out: &mut String, data: &[u8]) {
    const PER_LINE: usize = 16;
    let mut i = 0;
    while i < data.len() {
        let mut run_end = i + 1;
        while run_end < data.len() && data[run_end] == data[i] {
            run_end += 1;
        }
        let run_len = run_end - i;
        if run_len >= 8 {
            out.push_str(&format!("    .fill {run_len}, 1, 0x{:02x}\n", data[i]));
            i = run_end;
        } else {
            let line_end = (i + PER_LINE).min(data.len());
            out.push_str("    .byte ");
            let parts: Vec<String> = data[i..line_end].iter().map(|b| format!("0x{b:02x}")).collect();
            out.push_str(&parts.join(", "));
            out.push('\n');
            i = line_end;
        }
    }
}

/// Re-expresses a relocation as the smallest source expression that
/// produces the same `(symbol, addend, kind)` triple (spec.md §4.10):
/// `sym`/`sym+N`/`sym-N` for a bare symbol reference, parenthesized
/// `(sym+N)&0xffffffff` for `Low32`, `(sym+N)>>32` for `High32` — the
/// parenthesization only appears when the addend is nonzero, matching
/// `ISADisassembler::writeRelocation`.
#[must_use]
pub fn render_relocation(kind: RelocationKind, symbol_name: &str, addend: i64) -> String {
    let mut s = String::new();
    let wrap = addend != 0;
    if wrap {
        s.push('(');
    }
    s.push_str(symbol_name);
    if addend != 0 {
        if addend > 0 {
            s.push('+');
        }
        s.push_str(&addend.to_string());
    }
    if wrap {
        s.push(')');
    }
    match kind {
        RelocationKind::Low32 => s.push_str("&0xffffffff"),
        RelocationKind::High32 => s.push_str(">>32"),
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{ElfBuilder, ElfClass};
    use crate::isa::DisasmInstruction;

    struct StubDisassembler {
        instructions: Vec<DisasmInstruction>,
    }

    impl IsaDisassembler for StubDisassembler {
        fn set_input(&mut self, _bytes: &[u8], _base_offset: u64) {}
        fn analyze_before_disassemble(&mut self, _arch: GpuArchitecture, _driver_version: DriverVersion) {}
        fn prepare_labels_and_relocations(&mut self) {}
        fn disassemble(&mut self, _arch: GpuArchitecture, _driver_version: DriverVersion) -> Vec<DisasmInstruction> {
            self.instructions.clone()
        }
        fn add_named_label(&mut self, _offset: u64, _name: &str) {}
        fn add_relocation(&mut self, _offset: u64, _kind: RelocationKind, _symbol_idx: u32, _addend: i64) {}
        fn clear_relocations(&mut self) {}
        fn set_dont_print_labels(&mut self, _value: bool) {}
    }

    #[test]
    fn detect_format_matches_each_backend_signature() {
        let amd = ElfBuilder::new(ElfClass::Elf64, elf::ET_EXEC, 0).build();
        assert_eq!(detect_format(&amd), Ok(BinaryFormat::Amd));

        let amdcl2 = ElfBuilder::new(ElfClass::Elf64, elf::ET_DYN, elf::EM_AMDGCN_LEGACY).build();
        assert_eq!(detect_format(&amdcl2), Ok(BinaryFormat::AmdCl2));

        let gallium = ElfBuilder::new(ElfClass::Elf64, elf::ET_EXEC, elf::EM_AMDGPU).build();
        assert_eq!(detect_format(&gallium), Ok(BinaryFormat::Gallium));

        let rocm = ElfBuilder::new(ElfClass::Elf64, elf::ET_DYN, elf::EM_AMDGPU).build();
        assert_eq!(detect_format(&rocm), Ok(BinaryFormat::Rocm));
    }

    #[test]
    fn detect_format_rejects_unknown_signature() {
        let weird = ElfBuilder::new(ElfClass::Elf64, elf::ET_REL, 999).build();
        assert_eq!(detect_format(&weird), Err(DisasmError::UnrecognizedContainer));
    }

    #[test]
    fn detect_format_rejects_non_elf() {
        let junk = vec![0u8; 16];
        assert!(matches!(detect_format(&junk), Err(DisasmError::Elf(_))));
    }

    #[test]
    fn render_relocation_matches_three_forms() {
        assert_eq!(render_relocation(RelocationKind::Low32, "foo", 0), "foo&0xffffffff");
        assert_eq!(render_relocation(RelocationKind::Low32, "foo", 4), "(foo+4)&0xffffffff");
        assert_eq!(render_relocation(RelocationKind::High32, "foo", -8), "(foo-8)>>32");
        assert_eq!(render_relocation(RelocationKind::High32, "foo", 0), "foo>>32");
    }

    #[test]
    fn dump_bytes_collapses_long_runs_into_fill() {
        let mut out = String::new();
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&[1, 2, 3]);
        dump_bytes(&mut out, &data);
        assert!(out.contains(".fill 10, 1, 0x00"));
        assert!(out.contains(".byte 0x01, 0x02, 0x03"));
    }

    #[test]
    fn render_emits_skip_stub_for_full_size_header_and_synthesizes_labels() {
        let input = DisasmInput {
            format: Some(BinaryFormat::Rocm),
            kernels: vec![DisasmKernel {
                name: "foo".to_string(),
                code_offset: 0,
                code_size: 8,
                header: Some(vec![0u8; AMDHSA_HEADER_SIZE]),
                metadata_text: None,
            }],
            code: vec![0u8; 8],
            code_base_offset: 0,
            rodata: Vec::new(),
            comment: None,
        };
        let mut stub = StubDisassembler {
            instructions: vec![
                DisasmInstruction { offset: 0, length: 4, text: "s_nop 0".to_string(), is_branch_target_candidate: false },
                DisasmInstruction { offset: 4, length: 4, text: "s_endpgm".to_string(), is_branch_target_candidate: true },
            ],
        };
        let mut disasm = Disassembler::new(&mut stub);
        let text = disasm.render(&input, GpuArchitecture::Gcn1_1, DriverVersion::new(20, 4));
        assert!(text.contains(".kernel foo"));
        assert!(text.contains(".skip 256"));
        assert!(text.contains("s_nop 0"));
        assert!(text.contains(".L4_0"));
        assert!(text.contains("s_endpgm"));
    }

    #[test]
    fn render_dumps_raw_header_bytes_when_requested() {
        let input = DisasmInput {
            format: Some(BinaryFormat::Rocm),
            kernels: vec![DisasmKernel {
                name: "foo".to_string(),
                code_offset: 0,
                code_size: 0,
                header: Some(vec![0xabu8; AMDHSA_HEADER_SIZE]),
                metadata_text: None,
            }],
            code: Vec::new(),
            code_base_offset: 0,
            rodata: Vec::new(),
            comment: None,
        };
        let mut stub = StubDisassembler { instructions: Vec::new() };
        let mut disasm = Disassembler::new(&mut stub).with_raw_header_dump(true);
        let text = disasm.render(&input, GpuArchitecture::Gcn1_1, DriverVersion::new(20, 4));
        assert!(!text.contains(".skip 256"));
        assert!(text.contains(".fill 256, 1, 0xab"));
    }
}
