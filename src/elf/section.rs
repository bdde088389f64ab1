//! ELF64 section headers (`Elf64_Shdr`).

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{self, Read, Write};

use crate::primitives::{ElfAddr, ElfOff, ElfWord, ElfXword};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// The section's type (`sh_type`); determines how the reader interprets
/// its contents.
pub enum SectionType {
    /// Inactive section header; no associated section.
    Null = 0,
    /// Program-defined data (code, initialized data, …).
    ProgBits = 1,
    /// A symbol table (`.symtab`).
    SymTab = 2,
    /// A string table (`.strtab`, `.shstrtab`, `.dynstr`).
    StrTab = 3,
    /// Relocations with explicit addends (`.rela.*`). The only relocation
    /// section kind this linker reads.
    Rela = 4,
    /// A symbol hash table.
    Hash = 5,
    /// Dynamic linking information (`.dynamic`).
    Dynamic = 6,
    /// Auxiliary information (`.note.*`). Retained but not interpreted.
    Note = 7,
    /// Occupies no file space; contributes to memory size only (`.bss`).
    NoBits = 8,
    /// Relocations without explicit addends (`.rel.*`). Not supported as
    /// input (only `SHT_RELA` relocations are accepted); a section of this
    /// type is retained but never interpreted as relocations.
    Rel = 9,
    /// The dynamic symbol table (`.dynsym`).
    DynSym = 11,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Section attribute flags (`sh_flags`).
    pub struct SectionFlags: u64 {
        /// Occupies memory during execution.
        const ALLOC = 0x2;
        /// Writable.
        const WRITE = 0x1;
        /// Executable.
        const EXECINSTR = 0x4;
        /// May be merged to eliminate duplication.
        const MERGE = 0x10;
        /// Contains null-terminated strings.
        const STRINGS = 0x20;
        /// `sh_info` holds a section header table index.
        const INFO_LINK = 0x40;
    }
}

#[derive(Debug, Clone)]
/// An ELF64 section header, with the section's name already resolved from
/// the section header string table.
pub struct SectionHeader {
    /// Section name (resolved from `.shstrtab`; `sh_name` is the byte offset).
    pub name: String,
    /// Section type.
    pub section_type: SectionType,
    /// Raw `sh_type`, preserved for section types this parser does not
    /// interpret (so round-tripping via the writer stays byte-faithful).
    pub raw_type: u32,
    /// Attribute flags.
    pub flags: SectionFlags,
    /// Virtual address once laid out (0 until [`crate::layout::MemoryLayout`] runs).
    pub address: u64,
    /// Offset into the *input* object file (before relinking).
    pub offset: u64,
    /// Size in bytes. For `SHT_NOBITS`, this is the memory size; the
    /// section occupies no file space.
    pub size: u64,
    /// Section header table index of an associated section (meaning
    /// depends on `section_type`).
    pub link: u32,
    /// Extra information (meaning depends on `section_type`).
    pub info: u32,
    /// Required alignment; 0 or 1 means no constraint.
    pub addr_align: u64,
    /// Size of each entry, for sections holding a fixed-size-entry table.
    pub entry_size: u64,
}

impl SectionHeader {
    /// Whether this section occupies memory at load time.
    pub fn is_alloc(&self) -> bool {
        self.flags.contains(SectionFlags::ALLOC)
    }

    /// Whether this section contributes bytes to the file image (`SHT_NOBITS`
    /// sections reserve memory only).
    pub fn occupies_file_space(&self) -> bool {
        self.section_type != SectionType::NoBits
    }
}

/// Raw, name-less on-disk representation of `Elf64_Shdr`; produced by the
/// writer after section names have been placed in the output string table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSectionHeader {
    /// Byte offset of the name in the owning string table.
    pub name_offset: u32,
    /// Raw `sh_type`.
    pub section_type: u32,
    /// Raw `sh_flags`.
    pub flags: u64,
    /// `sh_addr`.
    pub address: u64,
    /// `sh_offset`.
    pub offset: u64,
    /// `sh_size`.
    pub size: u64,
    /// `sh_link`.
    pub link: u32,
    /// `sh_info`.
    pub info: u32,
    /// `sh_addralign`.
    pub addr_align: u64,
    /// `sh_entsize`.
    pub entry_size: u64,
}

impl FromReader for RawSectionHeader {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            name_offset: ElfWord::from_reader(reader)?.0,
            section_type: ElfWord::from_reader(reader)?.0,
            flags: ElfXword::from_reader(reader)?.0,
            address: ElfAddr::from_reader(reader)?.0,
            offset: ElfOff::from_reader(reader)?.0,
            size: ElfXword::from_reader(reader)?.0,
            link: ElfWord::from_reader(reader)?.0,
            info: ElfWord::from_reader(reader)?.0,
            addr_align: ElfXword::from_reader(reader)?.0,
            entry_size: ElfXword::from_reader(reader)?.0,
        })
    }
}

impl ToWriter for RawSectionHeader {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        ElfWord(self.name_offset).to_writer(writer)?;
        ElfWord(self.section_type).to_writer(writer)?;
        ElfXword(self.flags).to_writer(writer)?;
        ElfAddr(self.address).to_writer(writer)?;
        ElfOff(self.offset).to_writer(writer)?;
        ElfXword(self.size).to_writer(writer)?;
        ElfWord(self.link).to_writer(writer)?;
        ElfWord(self.info).to_writer(writer)?;
        ElfXword(self.addr_align).to_writer(writer)?;
        ElfXword(self.entry_size).to_writer(writer)
    }
}

impl HasWrittenSize for RawSectionHeader {
    const SIZE: usize = 64;
}
