//! The `.dynamic` section (`Elf64_Dyn` entries) consumed by the runtime
//! dynamic loader.

use std::io::{self, Read, Write};

use crate::primitives::{ElfSxword, ElfXword};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

/// Dynamic section tags this linker emits or recognizes. Named after the
/// standard `DT_*` constants.
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DynamicTag {
    /// Terminates the `.dynamic` array.
    Null = 0,
    /// Name of a required shared library (string table offset).
    Needed = 1,
    /// Total size, in bytes, of the PLT relocation table.
    PltRelSz = 2,
    /// Address of the procedure linkage table's GOT.
    PltGot = 3,
    /// Address of the symbol hash table.
    Hash = 4,
    /// Address of the dynamic string table.
    StrTab = 5,
    /// Address of the dynamic symbol table.
    SymTab = 6,
    /// Address of the PLT relocation table (`.rela.plt`).
    JmpRel = 23,
    /// Address of `.rela.dyn`.
    Rela = 7,
    /// Total size, in bytes, of `.rela.dyn`.
    RelaSz = 8,
    /// Size, in bytes, of one `.rela.dyn`/`.rela.plt` entry.
    RelaEnt = 9,
    /// Size, in bytes, of the dynamic string table.
    StrSz = 10,
    /// Size, in bytes, of one dynamic symbol table entry.
    SymEnt = 11,
    /// Whether `.rela.plt` relocations are `DT_REL` (0) or `DT_RELA` (1)
    /// entries; this linker always emits `Rela`.
    PltRel = 20,
}

/// One `Elf64_Dyn` entry: `(tag, value)`. The value's meaning — an
/// address, a size, or a string table offset — depends on the tag.
#[derive(Debug, Clone, Copy)]
pub struct DynamicEntry {
    /// The raw tag. Kept raw rather than as [`DynamicTag`] so `DT_NEEDED`
    /// (which repeats, once per library) and any future tag can be
    /// represented without widening the enum.
    pub tag: i64,
    /// The tag-dependent payload.
    pub value: u64,
}

impl DynamicEntry {
    /// Build an entry from a [`DynamicTag`] and value.
    pub fn new(tag: DynamicTag, value: u64) -> Self {
        Self {
            tag: tag as i64,
            value,
        }
    }

    /// The terminating `DT_NULL` entry.
    pub fn null() -> Self {
        Self::new(DynamicTag::Null, 0)
    }
}

impl FromReader for DynamicEntry {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let tag = ElfSxword::from_reader(reader)?.0;
        let value = ElfXword::from_reader(reader)?.0;
        Ok(Self { tag, value })
    }
}

impl ToWriter for DynamicEntry {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        ElfSxword(self.tag).to_writer(writer)?;
        ElfXword(self.value).to_writer(writer)
    }
}

impl HasWrittenSize for DynamicEntry {
    const SIZE: usize = 16;
}
