//! ELF64 program headers (`Elf64_Phdr`), describing the segments the
//! kernel maps at load time.

use bitflags::bitflags;
use std::io::{self, Read, Write};

use crate::primitives::{ElfAddr, ElfOff, ElfWord, ElfXword};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

/// `PT_NULL`: unused entry.
pub const PT_NULL: u32 = 0;
/// `PT_LOAD`: a loadable segment.
pub const PT_LOAD: u32 = 1;
/// `PT_DYNAMIC`: dynamic linking information.
pub const PT_DYNAMIC: u32 = 2;
/// `PT_INTERP`: path to the program interpreter.
pub const PT_INTERP: u32 = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Segment permission flags (`p_flags`).
    pub struct SegmentFlags: u32 {
        /// Executable.
        const X = 0x1;
        /// Writable.
        const W = 0x2;
        /// Readable.
        const R = 0x4;
    }
}

/// A single program header entry.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type (`PT_LOAD`, `PT_INTERP`, `PT_DYNAMIC`, …).
    pub segment_type: u32,
    /// Permission flags.
    pub flags: SegmentFlags,
    /// Offset of the segment's first byte in the output file.
    pub offset: u64,
    /// Virtual address of the segment's first byte.
    pub vaddr: u64,
    /// Physical address; equal to `vaddr` for this linker's output.
    pub paddr: u64,
    /// Size in the file. May be less than `memsz` when the segment has a
    /// `SHT_NOBITS` tail.
    pub filesz: u64,
    /// Size in memory.
    pub memsz: u64,
    /// Required alignment.
    pub align: u64,
}

impl FromReader for ProgramHeader {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let segment_type = ElfWord::from_reader(reader)?.0;
        let flags = SegmentFlags::from_bits_truncate(ElfWord::from_reader(reader)?.0);
        let offset = ElfOff::from_reader(reader)?.0;
        let vaddr = ElfAddr::from_reader(reader)?.0;
        let paddr = ElfAddr::from_reader(reader)?.0;
        let filesz = ElfXword::from_reader(reader)?.0;
        let memsz = ElfXword::from_reader(reader)?.0;
        let align = ElfXword::from_reader(reader)?.0;
        Ok(Self {
            segment_type,
            flags,
            offset,
            vaddr,
            paddr,
            filesz,
            memsz,
            align,
        })
    }
}

impl ToWriter for ProgramHeader {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        ElfWord(self.segment_type).to_writer(writer)?;
        ElfWord(self.flags.bits()).to_writer(writer)?;
        ElfOff(self.offset).to_writer(writer)?;
        ElfAddr(self.vaddr).to_writer(writer)?;
        ElfAddr(self.paddr).to_writer(writer)?;
        ElfXword(self.filesz).to_writer(writer)?;
        ElfXword(self.memsz).to_writer(writer)?;
        ElfXword(self.align).to_writer(writer)
    }
}

impl HasWrittenSize for ProgramHeader {
    const SIZE: usize = 56;
}
