//! GPU instruction encoder/decoder seams (spec.md §1, §6).
//!
//! The GCN instruction table itself — one opcode bound to one bit
//! pattern, architecture by architecture — is explicitly out of scope:
//! it is an external collaborator this crate calls through, never
//! implements. What lives here is only the trait boundary C4 and C10
//! drive it through.

use crate::config::DriverVersion;
use crate::diag::Sink;
use crate::gpu::GpuArchitecture;
use crate::pos::PositionChain;
use crate::section::{RelocationKind, SectionId};
use crate::symbol::SymbolId;

/// What an `IsaEncoder` hands back to the caller after binding a
/// relocatable immediate to a symbol it cannot yet resolve.
#[derive(Debug, Clone, Copy)]
pub struct PendingRelocation {
    pub offset: u64,
    pub kind: RelocationKind,
    pub symbol: SymbolId,
    pub addend: i64,
}

/// Emits encoded bytes (and any relocations they need) into the
/// current text section on behalf of C4.
pub trait EncodeSink {
    fn emit_bytes(&mut self, bytes: &[u8]);
    fn add_relocation(&mut self, reloc: PendingRelocation);
    fn current_section(&self) -> SectionId;
    fn current_offset(&self) -> u64;
}

/// Resolves a name to a symbol (and, where already known, its value) for
/// an encoder that needs to look one up mid-instruction (e.g. to decide
/// an addressing mode before an operand is fully evaluated).
pub trait SymbolLookup {
    fn lookup(&mut self, name: &str) -> Option<SymbolId>;
}

/// Per-architecture instruction assembler (spec.md §6): "encode(line,
/// arch, emit_callback, reloc_callback, symbol_lookup, error_sink)".
pub trait IsaEncoder {
    /// Assemble one already-tokenized instruction line. Returns `Ok(())`
    /// once bytes (and any relocations) have been emitted via `sink`;
    /// parse/encode errors are reported through `diagnostics` and do not
    /// themselves abort the assembly pass (spec.md §7 format errors).
    fn encode(
        &mut self,
        line: &str,
        arch: GpuArchitecture,
        sink: &mut dyn EncodeSink,
        symbols: &mut dyn SymbolLookup,
        diagnostics: &mut Sink,
        pos: &PositionChain,
    );
}

/// A single recovered instruction, ready for text emission by C10.
#[derive(Debug, Clone)]
pub struct DisasmInstruction {
    pub offset: u64,
    pub length: u64,
    pub text: String,
    pub is_branch_target_candidate: bool,
}

/// Per-architecture instruction disassembler (spec.md §6).
pub trait IsaDisassembler {
    fn set_input(&mut self, bytes: &[u8], base_offset: u64);

    /// First pass over a code region: collect branch/call targets and
    /// any other facts needed before emitting instruction text (spec.md
    /// §4.10 "invokes `analyze_before_disassemble` ... to collect branch
    /// targets").
    fn analyze_before_disassemble(&mut self, arch: GpuArchitecture, driver_version: DriverVersion);

    /// Resolve the label/relocation set gathered during analysis against
    /// the symbol table C10 owns, before `disassemble` starts emitting.
    fn prepare_labels_and_relocations(&mut self);

    /// Decode the whole region, returning instructions in offset order.
    fn disassemble(&mut self, arch: GpuArchitecture, driver_version: DriverVersion) -> Vec<DisasmInstruction>;

    fn add_named_label(&mut self, offset: u64, name: &str);
    fn add_relocation(&mut self, offset: u64, kind: RelocationKind, symbol_idx: u32, addend: i64);
    fn clear_relocations(&mut self);
    fn set_dont_print_labels(&mut self, value: bool);
}
