//! Section, relocation, and code-flow model (spec.md §3, §4.3).

use num_enum::IntoPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

/// Format-specific section role. The actual set of `kind`s that occur for
/// a given backend is owned by that backend's `FormatHandler`
/// (spec.md §4.3: "Sections are owned by the active format handler").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
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
    /// `EXTRA(name, elf_type, flags)` from spec.md §4.5, for sections a
    /// format handler creates that don't fit a predefined role.
    Extra,
}

/// The on-disk CAL note type numbering (`ATI CAL` notes, spec.md §4.6):
/// a fixed, meaning-bearing integer enum in the same shape as the
/// teacher's `num_enum`-backed schema enums, so `u32::from` gives the
/// exact wire value `elf::write_note` expects instead of an `as u32 + 1`
/// offset hack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive)]
#[repr(u32)]
pub enum CalNoteKind {
    ProgInfo = 1,
    Inputs,
    Outputs,
    CondOut,
    Float32Consts,
    Int32Consts,
    Bool32Consts,
    EarlyExit,
    GlobalBuffers,
    ConstantBuffers,
    InputSamplers,
    PersistentBuffers,
    ScratchBuffers,
    SubConstantBuffers,
    UavMailboxSize,
    Uav,
    UavOpMask,
}

/// A section may be absolute: no byte content, `.` is a symbolic counter
/// only. Legal only for AMD global-data-like sections (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStorage {
    Concrete,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Low32,
    High32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub kind: RelocationKind,
    pub symbol: crate::symbol::SymbolId,
    pub addend: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFlowKind {
    Jump,
    CJump,
    Call,
    Return,
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeFlowEntry {
    pub offset: u64,
    /// `None` for `Return`/`Start`/`End`, which carry no target.
    pub target: Option<u64>,
    pub kind: CodeFlowKind,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub kind: SectionKind,
    pub owner_kernel: Option<String>,
    pub storage: SectionStorage,
    pub content: Vec<u8>,
    /// Symbolic cursor used only when `storage == Absolute`.
    pub absolute_cursor: u64,
    pub code_flow: Vec<CodeFlowEntry>,
    pub relocations: Vec<Relocation>,
    pub alignment: u64,
}

impl Section {
    #[must_use]
    pub fn new(id: SectionId, name: impl Into<String>, kind: SectionKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            owner_kernel: None,
            storage: SectionStorage::Concrete,
            content: Vec::new(),
            absolute_cursor: 0,
            code_flow: Vec::new(),
            relocations: Vec::new(),
            alignment: 1,
        }
    }

    /// Current value of `.` (location counter) within this section.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        match self.storage {
            SectionStorage::Concrete => self.content.len() as u64,
            SectionStorage::Absolute => self.absolute_cursor,
        }
    }

    /// Error returned when bytes are emitted into a section whose kind
    /// cannot hold raw content (spec.md §4.3: "a metadata-only section
    /// that does not accept raw bytes is an error").
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), SectionError> {
        match self.storage {
            SectionStorage::Absolute => Err(SectionError::AbsoluteSectionCannotHoldBytes),
            SectionStorage::Concrete => {
                self.content.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Move `.` within the section. Rewinding is permitted (spec.md §3);
    /// callers enforce the "overwritten bytes must match on second pass"
    /// invariant by comparing before writing.
    pub fn set_cursor(&mut self, new_cursor: u64) {
        match self.storage {
            SectionStorage::Absolute => self.absolute_cursor = new_cursor,
            SectionStorage::Concrete => {
                let new_len = new_cursor as usize;
                if new_len > self.content.len() {
                    self.content.resize(new_len, 0);
                } else {
                    self.content.truncate(new_len);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionError {
    AbsoluteSectionCannotHoldBytes,
}

impl std::fmt::Display for SectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbsoluteSectionCannotHoldBytes => {
                f.write_str("cannot emit bytes into an absolute (content-less) section")
            }
        }
    }
}

impl std::error::Error for SectionError {}

/// Owns all sections created by a translation unit's format handler.
#[derive(Debug, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: impl Into<String>, kind: SectionKind) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section::new(id, name, kind));
        id
    }

    #[must_use]
    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Sort a kernel's code-flow entries by `(offset, target, kind)` as
    /// required by spec.md §8 testable property 11.
    pub fn sorted_code_flow(&self, id: SectionId) -> Vec<CodeFlowEntry> {
        let mut entries = self.get(id).code_flow.clone();
        entries.sort_by_key(|e| (e.offset, e.target, code_flow_kind_rank(e.kind)));
        entries
    }
}

fn code_flow_kind_rank(kind: CodeFlowKind) -> u8 {
    match kind {
        CodeFlowKind::Jump => 0,
        CodeFlowKind::CJump => 1,
        CodeFlowKind::Call => 2,
        CodeFlowKind::Return => 3,
        CodeFlowKind::Start => 4,
        CodeFlowKind::End => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolId;

    #[test]
    fn emitting_into_absolute_section_is_an_error() {
        let mut table = SectionTable::new();
        let id = table.create(".bss", SectionKind::Bss);
        table.get_mut(id).storage = SectionStorage::Absolute;
        let err = table.get_mut(id).emit_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, SectionError::AbsoluteSectionCannotHoldBytes);
    }

    #[test]
    fn code_flow_entries_sort_by_offset_target_kind() {
        let mut table = SectionTable::new();
        let id = table.create(".text", SectionKind::Text);
        let sec = table.get_mut(id);
        sec.code_flow.push(CodeFlowEntry { offset: 4, target: Some(100), kind: CodeFlowKind::Call });
        sec.code_flow.push(CodeFlowEntry { offset: 4, target: Some(10), kind: CodeFlowKind::Jump });
        sec.code_flow.push(CodeFlowEntry { offset: 4, target: Some(20), kind: CodeFlowKind::Jump });
        let sorted = table.sorted_code_flow(id);
        let targets: Vec<_> = sorted.iter().map(|e| e.target).collect();
        assert_eq!(targets, vec![Some(10), Some(20), Some(100)]);
    }

    #[test]
    fn relocation_records_symbol_offset_kind_addend() {
        let reloc = Relocation { offset: 16, kind: RelocationKind::High32, symbol: SymbolId(0), addend: 21 };
        assert_eq!(reloc.offset, 16);
        assert_eq!(reloc.addend, 21);
    }
}
