//! ELF64 symbol table entries (`Elf64_Sym`).

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{self, Read, Write};

use crate::primitives::{ElfAddr, ElfByte, ElfHalfWord, ElfWord, ElfXword};
use crate::traits::{FromReader, HasWrittenSize, ToWriter};

/// `SHN_UNDEF`: the symbol is undefined in its source object.
pub const SHN_UNDEF: u16 = 0;
/// `SHN_ABS`: the symbol has an absolute value, not relative to any section.
pub const SHN_ABS: u16 = 0xfff1;
/// `SHN_COMMON`: the symbol labels a common block (tentative definition).
pub const SHN_COMMON: u16 = 0xfff2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// Symbol binding (upper 4 bits of `st_info`).
pub enum SymbolBinding {
    /// Not visible outside the defining object; never merged across objects.
    Local = 0,
    /// Visible to all objects; exactly one strong definition may exist.
    Global = 1,
    /// Like `Global`, but yields to any strong definition of the same name.
    Weak = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// Symbol type (lower 4 bits of `st_info`).
pub enum SymbolType {
    /// No type specified.
    NoType = 0,
    /// Data object (variable, array, …).
    Object = 1,
    /// Function or other executable code.
    Func = 2,
    /// Associated with a section; used for relocations against section
    /// contents rather than named symbols.
    Section = 3,
    /// The source file's name.
    File = 4,
    /// A common block (tentative definition); mutually exclusive with a
    /// `st_shndx` of [`super::symbol::SHN_COMMON`] in well-formed input, but
    /// recorded independently since some assemblers only set one.
    Common = 5,
}

/// Where a symbol's definition lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolDefinition {
    /// No definition in this object (`st_shndx == SHN_UNDEF`).
    Undefined,
    /// An absolute value, independent of any section (`SHN_ABS`).
    Absolute,
    /// A tentative common-block definition of the given size (`SHN_COMMON`);
    /// `st_size` carries the size, `st_value` carries the alignment for a
    /// compiler/assembler-dependent subset of producers, but in the
    /// general case alignment is the symbol's natural alignment and must
    /// be supplied by [`crate::symtab`] from `st_value` when nonzero.
    Common,
    /// Defined relative to section index `usize` in the same object, at the symbol's `st_value`.
    Section(usize),
}

#[derive(Debug, Clone)]
/// One entry of an ELF64 symbol table, with the name already resolved.
pub struct Symbol {
    /// Symbol name (empty string for the reserved index-0 entry).
    pub name: String,
    /// Binding (local/global/weak).
    pub binding: SymbolBinding,
    /// Type (function/object/…).
    pub symbol_type: SymbolType,
    /// Visibility byte (`st_other`); not interpreted beyond being preserved.
    pub other: u8,
    /// Where this symbol is defined.
    pub definition: SymbolDefinition,
    /// Value: a virtual/section-relative address for a definition, or the
    /// required alignment for a common symbol when nonzero.
    pub value: u64,
    /// Size in bytes (0 if unknown or not applicable).
    pub size: u64,
}

impl Symbol {
    /// `true` if this is the binding that is never merged across objects.
    pub fn is_local(&self) -> bool {
        self.binding == SymbolBinding::Local
    }

    /// `true` if `self` is undefined in its source object.
    pub fn is_undefined(&self) -> bool {
        matches!(self.definition, SymbolDefinition::Undefined)
    }
}

/// Raw, name-less on-disk representation of `Elf64_Sym`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSymbol {
    /// Byte offset of the name in the owning string table.
    pub name_offset: u32,
    /// `st_info`: `(binding << 4) | type`.
    pub info: u8,
    /// `st_other`.
    pub other: u8,
    /// `st_shndx`.
    pub section_index: u16,
    /// `st_value`.
    pub value: u64,
    /// `st_size`.
    pub size: u64,
}

impl RawSymbol {
    /// Decode the binding/type nibbles of `info`.
    pub fn binding_and_type(&self) -> (SymbolBinding, SymbolType) {
        let binding = SymbolBinding::from_u8(self.info >> 4).unwrap_or(SymbolBinding::Local);
        let ty = SymbolType::from_u8(self.info & 0xf).unwrap_or(SymbolType::NoType);
        (binding, ty)
    }

    /// Pack a binding/type pair back into an `st_info` byte.
    pub fn pack_info(binding: SymbolBinding, ty: SymbolType) -> u8 {
        ((binding as u8) << 4) | (ty as u8 & 0xf)
    }
}

impl FromReader for RawSymbol {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            name_offset: ElfWord::from_reader(reader)?.0,
            info: ElfByte::from_reader(reader)?.0,
            other: ElfByte::from_reader(reader)?.0,
            section_index: ElfHalfWord::from_reader(reader)?.0,
            value: ElfAddr::from_reader(reader)?.0,
            size: ElfXword::from_reader(reader)?.0,
        })
    }
}

impl ToWriter for RawSymbol {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        ElfWord(self.name_offset).to_writer(writer)?;
        ElfByte(self.info).to_writer(writer)?;
        ElfByte(self.other).to_writer(writer)?;
        ElfHalfWord(self.section_index).to_writer(writer)?;
        ElfAddr(self.value).to_writer(writer)?;
        ElfXword(self.size).to_writer(writer)
    }
}

impl HasWrittenSize for RawSymbol {
    const SIZE: usize = 24;
}
