//! Format handler interface (spec.md §4.5, component C5).
//!
//! Grounded on the teacher's `BitStreamVisitor` trait (`src/visitor.rs`):
//! the same "one trait, one impl per concrete schema" shape, retargeted
//! from "visit a block/record kind" to "own a binary container's
//! section-naming and finalisation rules".

pub mod amd;
pub mod amdcl2;
pub mod gallium;
pub mod rocm;
pub mod rocm_metadata;

use std::{error, fmt};

use crate::config::{AsmConfig, BinaryFormat};
use crate::diag::Sink;
use crate::section::{CalNoteKind, SectionId, SectionTable};
use crate::symbol::SymbolTable;

/// Semantic section role the driver asks a handler to resolve to a
/// concrete `SectionId` (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionRole {
    Text,
    Data,
    Rodata,
    Bss,
    Metadata,
    Header,
    Stub,
    Setup,
    CalNote(CalNoteKind),
    ProgInfo,
    Config,
    Comment,
    SamplerInit,
    ControlDirective,
    Extra { name: String, elf_type: u32, flags: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    UnknownPseudoOp(String),
    MalformedContainer(String),
    NoActiveKernel,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPseudoOp(name) => write!(f, "unknown pseudo-op '{name}' for this format"),
            Self::MalformedContainer(msg) => write!(f, "malformed container: {msg}"),
            Self::NoActiveKernel => write!(f, "directive requires an active '.kernel' scope"),
        }
    }
}

impl error::Error for FormatError {}

/// One recovered kernel, the common shape `DisasmInput` passes to C10
/// regardless of which backend produced it.
#[derive(Debug, Clone, Default)]
pub struct DisasmKernel {
    pub name: String,
    pub code_offset: u64,
    pub code_size: u64,
    pub header: Option<Vec<u8>>,
    pub metadata_text: Option<String>,
}

/// Format-agnostic view over a parsed binary, handed to C10 (spec.md
/// §4.5, §4.10). Each backend's `parse_binary` populates one of these
/// from its own container layout.
#[derive(Debug, Clone, Default)]
pub struct DisasmInput {
    pub format: Option<BinaryFormat>,
    pub kernels: Vec<DisasmKernel>,
    pub code: Vec<u8>,
    pub code_base_offset: u64,
    pub rodata: Vec<u8>,
    pub comment: Option<String>,
}

/// Per-format backend (spec.md §4.5): AMD, AMDCL2, Gallium, ROCm, and a
/// `RawCode` passthrough used when no container is requested.
pub trait FormatHandler {
    fn begin_kernel(&mut self, name: &str, sections: &mut SectionTable);
    fn end_kernel(&mut self);

    fn select_section(
        &mut self,
        role: SectionRole,
        kernel: Option<&str>,
        sections: &mut SectionTable,
    ) -> Result<SectionId, FormatError>;

    /// Attempt a format-specific pseudo-op (`.config`, `.arg`, ...).
    /// Returns `Ok(true)` if handled, `Ok(false)` if the name isn't one
    /// of this format's directives (the driver then tries the generic
    /// table).
    fn handle_pseudo_op(
        &mut self,
        name: &str,
        args: &str,
        config: &AsmConfig,
        sections: &mut SectionTable,
        symbols: &SymbolTable,
        diagnostics: &mut Sink,
    ) -> Result<bool, FormatError>;

    fn finalize(
        &mut self,
        sections: &SectionTable,
        symbols: &SymbolTable,
        config: &AsmConfig,
    ) -> Result<Vec<u8>, FormatError>;

    fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, FormatError>
    where
        Self: Sized;
}

/// `RAWCODE`: no container at all, `finalize` returns the text section
/// verbatim (used for architectures/tests that don't need a wrapper).
#[derive(Debug, Default)]
pub struct RawCodeHandler {
    text: Option<SectionId>,
}

impl FormatHandler for RawCodeHandler {
    fn begin_kernel(&mut self, _name: &str, _sections: &mut SectionTable) {}
    fn end_kernel(&mut self) {}

    fn select_section(
        &mut self,
        role: SectionRole,
        _kernel: Option<&str>,
        sections: &mut SectionTable,
    ) -> Result<SectionId, FormatError> {
        match role {
            SectionRole::Text => {
                if let Some(id) = self.text {
                    return Ok(id);
                }
                let id = sections.create(".text", crate::section::SectionKind::Text);
                self.text = Some(id);
                Ok(id)
            }
            other => Err(FormatError::UnknownPseudoOp(format!("{other:?}"))),
        }
    }

    fn handle_pseudo_op(
        &mut self,
        name: &str,
        _args: &str,
        _config: &AsmConfig,
        _sections: &mut SectionTable,
        _symbols: &SymbolTable,
        _diagnostics: &mut Sink,
    ) -> Result<bool, FormatError> {
        let _ = name;
        Ok(false)
    }

    fn finalize(
        &mut self,
        sections: &SectionTable,
        _symbols: &SymbolTable,
        _config: &AsmConfig,
    ) -> Result<Vec<u8>, FormatError> {
        let id = self.text.ok_or(FormatError::NoActiveKernel)?;
        Ok(sections.get(id).content.clone())
    }

    fn parse_binary(bytes: &[u8]) -> Result<DisasmInput, FormatError> {
        Ok(DisasmInput { code: bytes.to_vec(), ..Default::default() })
    }
}
