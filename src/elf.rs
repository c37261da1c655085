//! Shared little-endian ELF views (spec.md §9 design note).
//!
//! Every header family here is a struct with explicit field accessors
//! over a borrowed `&[u8]` (or, for emission, a growing `Vec<u8>`) —
//! never a transmute of arbitrary memory. Grounded on the teacher's
//! `bits::Cursor` (`src/bits.rs`): the same "explicit cursor over a
//! borrowed slice" discipline, generalized from bit- to byte-granularity
//! and duplicated as a `Writer` for the assemble path.

use std::{error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferOverflow,
    BadMagic,
    UnsupportedClass,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BufferOverflow => "ELF buffer overflow",
            Self::BadMagic => "not an ELF file (bad magic)",
            Self::UnsupportedClass => "unsupported ELF class (expected 32- or 64-bit)",
        })
    }
}

impl error::Error for Error {}

pub const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// `EM_AMDGPU`, used by ROCm HSACO and Gallium-with-AMDHSA-header images.
pub const EM_AMDGPU: u16 = 224;
/// Legacy driver-assigned machine id used by the AMD (OpenCL 1.x) and
/// AMDCL2 inner ELF containers.
pub const EM_AMDGCN_LEGACY: u16 = 0x3fd;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const ET_REL: u16 = 1;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_REL: u32 = 9;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 2;
pub const SHF_EXECINSTR: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// A byte-granularity read cursor over a borrowed buffer (the `elf`
/// analogue of the teacher's bit-granularity `bits::Cursor`).
#[derive(Clone, Copy)]
pub struct Reader<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> Reader<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn seek(&mut self, offset: usize) -> Result<(), Error> {
        if offset > self.buffer.len() {
            return Err(Error::BufferOverflow);
        }
        self.offset = offset;
        Ok(())
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'input [u8], Error> {
        let bytes = self.buffer.get(self.offset..self.offset + len).ok_or(Error::BufferOverflow)?;
        self.offset += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn align(&mut self, to: usize) -> Result<(), Error> {
        let rem = self.offset % to;
        if rem != 0 {
            self.skip(to - rem)?;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    /// Read a 32- or 64-bit "native word" depending on `class`
    /// (used for ELF fields whose width depends on the ident byte).
    pub fn read_word(&mut self, class: ElfClass) -> Result<u64, Error> {
        match class {
            ElfClass::Elf32 => self.read_u32().map(u64::from),
            ElfClass::Elf64 => self.read_u64(),
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &'input [u8] {
        self.buffer
    }
}

/// A byte-granularity write cursor building an in-memory image.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_word(&mut self, class: ElfClass, v: u64) {
        match class {
            ElfClass::Elf32 => self.write_u32(v as u32),
            ElfClass::Elf64 => self.write_u64(v),
        }
    }

    pub fn pad_to(&mut self, align: usize) {
        if align == 0 {
            return;
        }
        let rem = self.buffer.len() % align;
        if rem != 0 {
            self.buffer.resize(self.buffer.len() + (align - rem), 0);
        }
    }

    /// Overwrite `len` bytes at `offset` (used to patch section-header
    /// offsets/sizes once the whole image layout is known).
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Parsed `e_ident` plus the class-independent parts of the ELF header.
#[derive(Debug, Clone, Copy)]
pub struct Ident {
    pub class: ElfClass,
    pub little_endian: bool,
    pub os_abi: u8,
}

pub fn parse_ident(buffer: &[u8]) -> Result<Ident, Error> {
    if buffer.len() < 16 || buffer[0..4] != ELFMAG {
        return Err(Error::BadMagic);
    }
    let class = match buffer[4] {
        1 => ElfClass::Elf32,
        2 => ElfClass::Elf64,
        _ => return Err(Error::UnsupportedClass),
    };
    Ok(Ident { class, little_endian: buffer[5] == 1, os_abi: buffer[7] })
}

/// A borrowed view over an ELF header (class-generic field accessors;
/// field widths/offsets differ between ELF32 and ELF64 on disk).
#[derive(Clone, Copy)]
pub struct ElfHeaderView<'a> {
    class: ElfClass,
    buf: &'a [u8],
}

impl<'a> ElfHeaderView<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        let ident = parse_ident(buf)?;
        Ok(Self { class: ident.class, buf })
    }

    fn reader_at(&self, offset: usize) -> Reader<'a> {
        let mut r = Reader::new(self.buf);
        let _ = r.seek(offset);
        r
    }

    #[must_use]
    pub fn class(&self) -> ElfClass {
        self.class
    }

    pub fn e_type(&self) -> Result<u16, Error> {
        self.reader_at(16).read_u16()
    }

    pub fn e_machine(&self) -> Result<u16, Error> {
        self.reader_at(18).read_u16()
    }

    pub fn e_entry(&self) -> Result<u64, Error> {
        self.reader_at(24).read_word(self.class)
    }

    fn word_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    pub fn e_shoff(&self) -> Result<u64, Error> {
        // e_phoff and e_shoff both precede e_shoff; offset computed from the
        // fixed prefix (e_ident[16] + type(2) + machine(2) + version(4) +
        // entry/phoff(word) + shoff(word)).
        let off = 24 + self.word_size() * 2;
        self.reader_at(off).read_word(self.class)
    }

    pub fn e_shentsize(&self) -> Result<u16, Error> {
        // after shoff, e_flags(4) + ehsize(2) + phentsize(2) + phnum(2)
        let off = 24 + self.word_size() * 2 + self.word_size() + 4 + 2 + 2 + 2;
        self.reader_at(off).read_u16()
    }

    pub fn e_shnum(&self) -> Result<u16, Error> {
        let off = 24 + self.word_size() * 3 + 4 + 2 + 2 + 2 + 2;
        self.reader_at(off).read_u16()
    }

    pub fn e_shstrndx(&self) -> Result<u16, Error> {
        let off = 24 + self.word_size() * 3 + 4 + 2 + 2 + 2 + 2 + 2;
        self.reader_at(off).read_u16()
    }

    /// Byte range of section header `index` within the image.
    pub fn section_header(&self, index: u16) -> Result<SectionHeaderView<'a>, Error> {
        let shoff = self.e_shoff()? as usize;
        let entsize = self.e_shentsize()? as usize;
        let start = shoff + entsize * index as usize;
        let buf = self.buf.get(start..start + entsize).ok_or(Error::BufferOverflow)?;
        Ok(SectionHeaderView { class: self.class, buf })
    }
}

/// Borrowed view over one ELF section header entry.
#[derive(Clone, Copy)]
pub struct SectionHeaderView<'a> {
    class: ElfClass,
    buf: &'a [u8],
}

impl SectionHeaderView<'_> {
    pub fn name_index(&self) -> Result<u32, Error> {
        Reader::new(self.buf).read_u32()
    }

    pub fn sh_type(&self) -> Result<u32, Error> {
        let mut r = Reader::new(self.buf);
        r.skip(4)?;
        r.read_u32()
    }

    pub fn sh_flags(&self) -> Result<u64, Error> {
        let mut r = Reader::new(self.buf);
        r.skip(8)?;
        r.read_word(self.class)
    }

    pub fn sh_offset(&self) -> Result<u64, Error> {
        let mut r = Reader::new(self.buf);
        r.skip(8 + self.class_word() * 2)?;
        r.read_word(self.class)
    }

    pub fn sh_size(&self) -> Result<u64, Error> {
        let mut r = Reader::new(self.buf);
        r.skip(8 + self.class_word() * 3)?;
        r.read_word(self.class)
    }

    pub fn sh_entsize(&self) -> Result<u64, Error> {
        let mut r = Reader::new(self.buf);
        r.skip(16 + self.class_word() * 5)?;
        r.read_word(self.class)
    }

    fn class_word(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// One section queued for emission by [`ElfBuilder`].
pub struct SectionSpec {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub data: Vec<u8>,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, sh_type: u32, flags: u64, data: Vec<u8>) -> Self {
        Self { name: name.into(), sh_type, flags, data, link: 0, info: 0, addralign: 1, entsize: 0 }
    }
}

/// Assembles a minimal, valid ELF image (header + section data + string
/// table + section header table) from a flat list of named sections.
/// No program headers: none of the four target formats need them for
/// the relocatable objects this crate emits.
pub struct ElfBuilder {
    class: ElfClass,
    e_type: u16,
    e_machine: u16,
    sections: Vec<SectionSpec>,
}

impl ElfBuilder {
    #[must_use]
    pub fn new(class: ElfClass, e_type: u16, e_machine: u16) -> Self {
        Self { class, e_type, e_machine, sections: vec![SectionSpec::new("", 0, 0, Vec::new())] }
    }

    pub fn add_section(&mut self, section: SectionSpec) -> usize {
        self.sections.push(section);
        self.sections.len() - 1
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let word = match self.class {
            ElfClass::Elf32 => 4usize,
            ElfClass::Elf64 => 8usize,
        };
        let ehsize = 16 + 2 + 2 + 4 + word * 3 + 4 + 2 + 2 + 2 + 2 + 2 + 2;

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrndx = self.sections.len() as u16;

        let mut w = Writer::new();
        w.write_bytes(&ELFMAG);
        w.write_u8(match self.class {
            ElfClass::Elf32 => 1,
            ElfClass::Elf64 => 2,
        });
        w.write_u8(1); // little-endian
        w.write_u8(1); // EI_VERSION
        w.write_bytes(&[0u8; 9]); // EI_OSABI..EI_PAD
        w.write_u16(self.e_type);
        w.write_u16(self.e_machine);
        w.write_u32(1); // e_version
        w.write_word(self.class, 0); // e_entry
        w.write_word(self.class, 0); // e_phoff
        let e_shoff_patch_at = w.position();
        w.write_word(self.class, 0); // e_shoff (patched below)
        w.write_u32(0); // e_flags
        w.write_u16(ehsize as u16);
        w.write_u16(0); // e_phentsize
        w.write_u16(0); // e_phnum
        let shentsize = 4 + 4 + word * 4 + 4 + 4 + word * 2;
        w.write_u16(shentsize as u16);
        w.write_u16((self.sections.len() + 1) as u16);
        w.write_u16(shstrndx);

        let mut offsets = Vec::with_capacity(self.sections.len() + 1);
        offsets.push(0u64);
        for s in &self.sections[1..] {
            w.pad_to(s.addralign.max(1) as usize);
            offsets.push(w.position() as u64);
            w.write_bytes(&s.data);
        }
        w.pad_to(1);
        let shstrtab_offset = w.position() as u64;
        w.write_bytes(&shstrtab);

        w.pad_to(word);
        let shoff = w.position() as u64;
        for (i, s) in self.sections.iter().enumerate() {
            w.write_u32(name_offsets[i]);
            w.write_u32(s.sh_type);
            w.write_word(self.class, s.flags);
            w.write_word(self.class, 0); // sh_addr
            w.write_word(self.class, offsets[i]);
            w.write_word(self.class, s.data.len() as u64);
            w.write_u32(s.link);
            w.write_u32(s.info);
            w.write_word(self.class, s.addralign);
            w.write_word(self.class, s.entsize);
        }
        // null shstrtab entry
        w.write_u32(0);
        w.write_u32(SHT_STRTAB);
        w.write_word(self.class, 0);
        w.write_word(self.class, 0);
        w.write_word(self.class, shstrtab_offset);
        w.write_word(self.class, shstrtab.len() as u64);
        w.write_u32(0);
        w.write_u32(0);
        w.write_word(self.class, 1);
        w.write_word(self.class, 0);

        let shoff_bytes = match self.class {
            ElfClass::Elf32 => (shoff as u32).to_le_bytes().to_vec(),
            ElfClass::Elf64 => shoff.to_le_bytes().to_vec(),
        };
        let mut image = w.into_bytes();
        image[e_shoff_patch_at..e_shoff_patch_at + shoff_bytes.len()].copy_from_slice(&shoff_bytes);
        image
    }
}

/// One ELF note record (`SHT_NOTE` / `PT_NOTE`), used for AMD CAL notes
/// (`name = "ATI CAL"`) and AMDGPU ROCm metadata notes.
pub struct NoteRecord<'a> {
    pub kind: u32,
    pub name: &'a [u8],
    pub desc: &'a [u8],
}

pub struct NoteReader<'a> {
    reader: Reader<'a>,
}

impl<'a> NoteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { reader: Reader::new(buf) }
    }
}

impl<'a> Iterator for NoteReader<'a> {
    type Item = Result<NoteRecord<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.remaining() == 0 {
            return None;
        }
        Some((|| {
            let namesz = self.reader.read_u32()? as usize;
            let descsz = self.reader.read_u32()? as usize;
            let kind = self.reader.read_u32()?;
            let name = self.reader.read_bytes(namesz)?;
            self.reader.align(4)?;
            let desc = self.reader.read_bytes(descsz)?;
            self.reader.align(4)?;
            Ok(NoteRecord { kind, name, desc })
        })())
    }
}

pub fn write_note(w: &mut Writer, kind: u32, name: &[u8], desc: &[u8]) {
    w.write_u32(name.len() as u32);
    w.write_u32(desc.len() as u32);
    w.write_u32(kind);
    w.write_bytes(name);
    w.pad_to(4);
    w.write_bytes(desc);
    w.pad_to(4);
}

/// AMDHSA kernel-code header (spec.md §4.9): 128 bytes of typed fields
/// followed by a 128-byte control directive, 256 bytes total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmdHsaKernelCode {
    pub amd_code_version_major: u32,
    pub amd_code_version_minor: u32,
    pub amd_machine_kind: u16,
    pub amd_machine_major: u16,
    pub amd_machine_minor: u16,
    pub amd_machine_stepping: u16,
    pub kernel_code_entry_offset: u64,
    pub kernel_code_prefetch_offset: u64,
    pub kernel_code_prefetch_size: u64,
    pub max_scratch_backing_memory_size: u64,
    pub compute_pgm_rsrc1: u32,
    pub compute_pgm_rsrc2: u32,
    pub enable_sgpr_register_flags: u16,
    pub enable_feature_flags: u16,
    pub workitem_private_segment_size: u32,
    pub workgroup_group_segment_size: u32,
    pub gds_segment_size: u32,
    pub kernarg_segment_size: u64,
    pub workgroup_fbarrier_count: u32,
    pub wavefront_sgpr_count: u16,
    pub workitem_vgpr_count: u16,
    pub reserved_vgpr_first: u16,
    pub reserved_vgpr_count: u16,
    pub reserved_sgpr_first: u16,
    pub reserved_sgpr_count: u16,
    pub debug_wavefront_private_segment_offset_sgpr: u16,
    pub debug_private_segment_buffer_sgpr: u16,
    pub kernarg_segment_alignment: u8,
    pub group_segment_alignment: u8,
    pub private_segment_alignment: u8,
    pub wavefront_size: u8,
    pub call_convention: u32,
    pub runtime_loader_kernel_symbol: u64,
    /// Padding bringing the fixed portion up to 128 bytes (the real
    /// AMDHSA layout reserves this span for fields this crate never
    /// produces or interprets).
    pub reserved: [u8; 12],
    pub control_directive: [u8; 128],
}

pub const AMD_HSA_KERNEL_CODE_SIZE: usize = 256;

impl AmdHsaKernelCode {
    pub fn read_from(buf: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(buf);
        Ok(Self {
            amd_code_version_major: r.read_u32()?,
            amd_code_version_minor: r.read_u32()?,
            amd_machine_kind: r.read_u16()?,
            amd_machine_major: r.read_u16()?,
            amd_machine_minor: r.read_u16()?,
            amd_machine_stepping: r.read_u16()?,
            kernel_code_entry_offset: r.read_u64()?,
            kernel_code_prefetch_offset: r.read_u64()?,
            kernel_code_prefetch_size: r.read_u64()?,
            max_scratch_backing_memory_size: r.read_u64()?,
            compute_pgm_rsrc1: r.read_u32()?,
            compute_pgm_rsrc2: r.read_u32()?,
            enable_sgpr_register_flags: r.read_u16()?,
            enable_feature_flags: r.read_u16()?,
            workitem_private_segment_size: r.read_u32()?,
            workgroup_group_segment_size: r.read_u32()?,
            gds_segment_size: r.read_u32()?,
            kernarg_segment_size: r.read_u64()?,
            workgroup_fbarrier_count: r.read_u32()?,
            wavefront_sgpr_count: r.read_u16()?,
            workitem_vgpr_count: r.read_u16()?,
            reserved_vgpr_first: r.read_u16()?,
            reserved_vgpr_count: r.read_u16()?,
            reserved_sgpr_first: r.read_u16()?,
            reserved_sgpr_count: r.read_u16()?,
            debug_wavefront_private_segment_offset_sgpr: r.read_u16()?,
            debug_private_segment_buffer_sgpr: r.read_u16()?,
            kernarg_segment_alignment: r.read_u8()?,
            group_segment_alignment: r.read_u8()?,
            private_segment_alignment: r.read_u8()?,
            wavefront_size: r.read_u8()?,
            call_convention: r.read_u32()?,
            runtime_loader_kernel_symbol: r.read_u64()?,
            reserved: r.read_bytes(12)?.try_into().unwrap(),
            control_directive: r.read_bytes(128)?.try_into().unwrap(),
        })
    }

    pub fn write_to(&self, w: &mut Writer) {
        w.write_u32(self.amd_code_version_major);
        w.write_u32(self.amd_code_version_minor);
        w.write_u16(self.amd_machine_kind);
        w.write_u16(self.amd_machine_major);
        w.write_u16(self.amd_machine_minor);
        w.write_u16(self.amd_machine_stepping);
        w.write_u64(self.kernel_code_entry_offset);
        w.write_u64(self.kernel_code_prefetch_offset);
        w.write_u64(self.kernel_code_prefetch_size);
        w.write_u64(self.max_scratch_backing_memory_size);
        w.write_u32(self.compute_pgm_rsrc1);
        w.write_u32(self.compute_pgm_rsrc2);
        w.write_u16(self.enable_sgpr_register_flags);
        w.write_u16(self.enable_feature_flags);
        w.write_u32(self.workitem_private_segment_size);
        w.write_u32(self.workgroup_group_segment_size);
        w.write_u32(self.gds_segment_size);
        w.write_u64(self.kernarg_segment_size);
        w.write_u32(self.workgroup_fbarrier_count);
        w.write_u16(self.wavefront_sgpr_count);
        w.write_u16(self.workitem_vgpr_count);
        w.write_u16(self.reserved_vgpr_first);
        w.write_u16(self.reserved_vgpr_count);
        w.write_u16(self.reserved_sgpr_first);
        w.write_u16(self.reserved_sgpr_count);
        w.write_u16(self.debug_wavefront_private_segment_offset_sgpr);
        w.write_u16(self.debug_private_segment_buffer_sgpr);
        w.write_u8(self.kernarg_segment_alignment);
        w.write_u8(self.group_segment_alignment);
        w.write_u8(self.private_segment_alignment);
        w.write_u8(self.wavefront_size);
        w.write_u32(self.call_convention);
        w.write_u64(self.runtime_loader_kernel_symbol);
        w.write_bytes(&self.reserved);
        w.write_bytes(&self.control_directive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_le_words() {
        let buf = [0x01, 0x02, 0x03, 0x04];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0x0403_0201);
    }

    #[test]
    fn builder_round_trips_through_header_view() {
        let mut b = ElfBuilder::new(ElfClass::Elf64, ET_REL, EM_AMDGPU);
        b.add_section(SectionSpec::new(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, vec![0xAA; 16]));
        let image = b.build();
        let view = ElfHeaderView::parse(&image).unwrap();
        assert_eq!(view.class(), ElfClass::Elf64);
        assert_eq!(view.e_machine().unwrap(), EM_AMDGPU);
        assert_eq!(view.e_shnum().unwrap(), 3); // null + .text + .shstrtab
        let text_hdr = view.section_header(1).unwrap();
        assert_eq!(text_hdr.sh_type().unwrap(), SHT_PROGBITS);
        assert_eq!(text_hdr.sh_size().unwrap(), 16);
    }

    #[test]
    fn note_round_trips() {
        let mut w = Writer::new();
        write_note(&mut w, 7, b"ATI CAL", &[1, 2, 3]);
        let bytes = w.into_bytes();
        let mut notes = NoteReader::new(&bytes);
        let note = notes.next().unwrap().unwrap();
        assert_eq!(note.kind, 7);
        assert_eq!(note.name, b"ATI CAL");
        assert_eq!(note.desc, &[1, 2, 3]);
        assert!(notes.next().is_none());
    }

    #[test]
    fn amdhsa_kernel_code_round_trips() {
        let mut code = AmdHsaKernelCode::default();
        code.amd_code_version_major = 1;
        code.kernel_code_entry_offset = 256;
        code.compute_pgm_rsrc1 = 0x1234_5678;
        code.wavefront_size = 6;
        let mut w = Writer::new();
        code.write_to(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), AMD_HSA_KERNEL_CODE_SIZE);
        let parsed = AmdHsaKernelCode::read_from(&bytes).unwrap();
        assert_eq!(parsed, code);
    }
}
