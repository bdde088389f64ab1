//! The ELF64 file header (`Elf64_Ehdr`), the 64-byte block that sits at
//! the front of every ELF file and tells a reader how to find everything
//! else.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{self, Read, Write};

use crate::elf::identification::{ElfIdentification, ELF_CLASS_64, ELF_DATA_LSB};
use crate::primitives::{ElfAddr, ElfHalfWord, ElfOff, ElfWord};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// The ELF object's type (`e_type`).
pub enum ElfType {
    /// No file type.
    None = 0,
    /// Relocatable file (`ET_REL`); the only type [`crate::object::ElfParser`] accepts as input.
    Relocatable = 1,
    /// Executable file (`ET_EXEC`); emitted for a non-PIE link.
    Executable = 2,
    /// Shared object / position-independent executable (`ET_DYN`).
    Dynamic = 3,
    /// Core file. Never produced by this linker.
    Core = 4,
}

/// `EM_X86_64`, the only machine this linker accepts or emits.
pub const EM_X86_64: u16 = 62;

/// Size, in bytes, of the fixed portion of an ELF64 header (identification
/// plus the rest of `Elf64_Ehdr`).
pub const ELF_HEADER_SIZE: u64 = 64;

#[derive(Debug, Clone)]
/// The ELF64 file header.
pub struct ElfHeader {
    /// The 16-byte identification block.
    pub identification: ElfIdentification,
    /// Object file type.
    pub e_type: ElfType,
    /// Target machine. Always [`EM_X86_64`] for input accepted by this linker.
    pub e_machine: u16,
    /// Object file version; always 1.
    pub e_version: u32,
    /// Virtual address of the entry point, or 0 for `ET_REL`.
    pub e_entry: u64,
    /// File offset of the program header table, or 0 if absent.
    pub e_phoff: u64,
    /// File offset of the section header table, or 0 if absent.
    pub e_shoff: u64,
    /// Processor-specific flags. Unused for x86-64.
    pub e_flags: u32,
    /// Size of this header.
    pub e_ehsize: u16,
    /// Size of one program header table entry.
    pub e_phentsize: u16,
    /// Number of program header table entries.
    pub e_phnum: u16,
    /// Size of one section header table entry.
    pub e_shentsize: u16,
    /// Number of section header table entries.
    pub e_shnum: u16,
    /// Index into the section header table of the section name string table.
    pub e_shstrndx: u16,
}

impl ElfHeader {
    /// `true` if the identification bytes name ELF64 little-endian.
    pub fn is_supported_class_and_encoding(&self) -> bool {
        self.identification.class == ELF_CLASS_64 && self.identification.data == ELF_DATA_LSB
    }
}

impl FromReader for ElfHeader {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let identification = ElfIdentification::from_reader(reader)?;
        let e_type_raw = ElfHalfWord::from_reader(reader)?.0;
        let e_type = ElfType::from_u16(e_type_raw)
            .unwrap_or(ElfType::None);
        let e_machine = ElfHalfWord::from_reader(reader)?.0;
        let e_version = ElfWord::from_reader(reader)?.0;
        let e_entry = ElfAddr::from_reader(reader)?.0;
        let e_phoff = ElfOff::from_reader(reader)?.0;
        let e_shoff = ElfOff::from_reader(reader)?.0;
        let e_flags = ElfWord::from_reader(reader)?.0;
        let e_ehsize = ElfHalfWord::from_reader(reader)?.0;
        let e_phentsize = ElfHalfWord::from_reader(reader)?.0;
        let e_phnum = ElfHalfWord::from_reader(reader)?.0;
        let e_shentsize = ElfHalfWord::from_reader(reader)?.0;
        let e_shnum = ElfHalfWord::from_reader(reader)?.0;
        let e_shstrndx = ElfHalfWord::from_reader(reader)?.0;
        Ok(Self {
            identification,
            e_type,
            e_machine,
            e_version,
            e_entry,
            e_phoff,
            e_shoff,
            e_flags,
            e_ehsize,
            e_phentsize,
            e_phnum,
            e_shentsize,
            e_shnum,
            e_shstrndx,
        })
    }
}

impl ToWriter for ElfHeader {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.identification.to_writer(writer)?;
        ElfHalfWord(self.e_type as u16).to_writer(writer)?;
        ElfHalfWord(self.e_machine).to_writer(writer)?;
        ElfWord(self.e_version).to_writer(writer)?;
        ElfAddr(self.e_entry).to_writer(writer)?;
        ElfOff(self.e_phoff).to_writer(writer)?;
        ElfOff(self.e_shoff).to_writer(writer)?;
        ElfWord(self.e_flags).to_writer(writer)?;
        ElfHalfWord(self.e_ehsize).to_writer(writer)?;
        ElfHalfWord(self.e_phentsize).to_writer(writer)?;
        ElfHalfWord(self.e_phnum).to_writer(writer)?;
        ElfHalfWord(self.e_shentsize).to_writer(writer)?;
        ElfHalfWord(self.e_shnum).to_writer(writer)?;
        ElfHalfWord(self.e_shstrndx).to_writer(writer)
    }
}

impl HasWrittenSize for ElfHeader {
    const SIZE: usize = ELF_HEADER_SIZE as usize;
}
