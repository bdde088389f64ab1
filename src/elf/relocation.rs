//! x86-64 relocation entries (`Elf64_Rela`) and relocation type codes.
//!
//! The set of x86-64 relocations is closed and fixed, so it is modeled as
//! a single tagged enum dispatched by a match rather than through an open
//! trait hierarchy.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{self, Read, Write};

use crate::primitives::{ElfAddr, ElfSxword, ElfXword};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// An x86-64 relocation type, as carried in the low 32 bits of `r_info`.
///
/// [`RelocationType::Relocator`][crate::relocator::Relocator] dispatches on
/// this to compute each patch; see the module documentation there for the
/// per-type formulas (`S`, `A`, `P`, `G`, `L`, `B`).
pub enum RelocationType {
    /// No operation.
    None = 0,
    /// `S + A`, 64-bit.
    Direct64 = 1,
    /// `S + A - P`, 32-bit, PC-relative.
    Pc32 = 2,
    /// `G + A`, 32-bit, GOT-relative.
    Got32 = 3,
    /// `L + A - P`, 32-bit, PLT-relative.
    Plt32 = 4,
    /// Runtime copy relocation; recorded only, applied by the dynamic
    /// loader, not by this linker.
    Copy = 5,
    /// `S`, 64-bit; GOT slot filled at load time with the symbol's address.
    GlobDat = 6,
    /// `S`, 64-bit; PLT's GOT slot filled at first call (or eagerly, if
    /// `DT_BIND_NOW`).
    JumpSlot = 7,
    /// `B + A`, 64-bit; load-base-relative fixup for position-independent
    /// code with no symbol.
    Relative = 8,
    /// `G + GOT + A - P`, 32-bit; PC-relative GOT access.
    GotPcRel = 9,
    /// `S + A`, 32-bit, zero-extended.
    Direct32 = 10,
    /// `S + A`, 32-bit signed, sign-extended; overflow-checked.
    Direct32Signed = 11,
}

impl RelocationType {
    /// Width in bits of the field this relocation type patches. `None`
    /// and `Copy` patch nothing.
    pub fn width_bits(self) -> u8 {
        match self {
            RelocationType::None | RelocationType::Copy => 0,
            RelocationType::Direct64
            | RelocationType::GlobDat
            | RelocationType::JumpSlot
            | RelocationType::Relative => 64,
            RelocationType::Pc32
            | RelocationType::Got32
            | RelocationType::Plt32
            | RelocationType::GotPcRel
            | RelocationType::Direct32
            | RelocationType::Direct32Signed => 32,
        }
    }

    /// `true` if a relocation of this type requires the symbol to have a
    /// GOT slot allocated.
    pub fn requires_got(self) -> bool {
        matches!(
            self,
            RelocationType::Got32
                | RelocationType::GotPcRel
                | RelocationType::GlobDat
                | RelocationType::JumpSlot
        )
    }

    /// `true` if a relocation of this type requires the symbol to have a
    /// PLT stub allocated (implying it is a call to a dynamic-external
    /// function).
    pub fn requires_plt(self) -> bool {
        matches!(self, RelocationType::Plt32)
    }
}

/// A fully decoded relocation: the (section, offset, type, symbol, addend)
/// tuple, plus the index of the containing section for diagnostics.
#[derive(Debug, Clone)]
pub struct RelocationEntry {
    /// Section header index the relocation applies to.
    pub section_index: usize,
    /// Byte offset within that section.
    pub offset: u64,
    /// Relocation type.
    pub reloc_type: RelocationType,
    /// Index into the source object's symbol table.
    pub symbol_index: u32,
    /// Explicit addend.
    pub addend: i64,
}

/// Raw, undecoded representation of `Elf64_Rela`.
#[derive(Debug, Clone, Copy)]
pub struct RawRela {
    /// `r_offset`.
    pub offset: u64,
    /// `r_info`: `(symbol_index << 32) | relocation_type`.
    pub info: u64,
    /// `r_addend`.
    pub addend: i64,
}

impl RawRela {
    /// Decode `r_info` into `(symbol_index, raw_type)` using the ELF64
    /// convention `sym = info >> 32`, `type = info & 0xFFFFFFFF`.
    pub fn symbol_and_type(&self) -> (u32, u32) {
        ((self.info >> 32) as u32, (self.info & 0xFFFF_FFFF) as u32)
    }

    /// Pack a `(symbol_index, raw_type)` pair into `r_info`.
    pub fn pack_info(symbol_index: u32, raw_type: u32) -> u64 {
        ((symbol_index as u64) << 32) | raw_type as u64
    }
}

impl FromReader for RawRela {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            offset: ElfAddr::from_reader(reader)?.0,
            info: ElfXword::from_reader(reader)?.0,
            addend: ElfSxword::from_reader(reader)?.0,
        })
    }
}

impl ToWriter for RawRela {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        ElfAddr(self.offset).to_writer(writer)?;
        ElfXword(self.info).to_writer(writer)?;
        ElfSxword(self.addend).to_writer(writer)
    }
}

impl HasWrittenSize for RawRela {
    const SIZE: usize = 24;
}
