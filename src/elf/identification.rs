//! The `e_ident` bytes at the start of every ELF file.
//!
//! This linker only accepts one identification: 64-bit class, little-endian
//! encoding, System V ABI, version 1. Anything else is a fatal
//! [`Error::UnsupportedClass`]/[`Error::UnsupportedEncoding`] rather than a
//! best-effort guess: non-x86-64 or non-little-endian inputs are rejected
//! outright.

use std::io::{self, Read, Write};

use crate::traits::{FromReader, HasWrittenSize, ToWriter};

/// Magic bytes every ELF file begins with.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// `EI_CLASS` value for 64-bit objects. This is the only class accepted.
pub const ELF_CLASS_64: u8 = 2;

/// `EI_DATA` value for little-endian objects. This is the only encoding
/// accepted.
pub const ELF_DATA_LSB: u8 = 1;

/// `EI_VERSION` value for the current ELF version.
pub const ELF_VERSION_CURRENT: u8 = 1;

/// The 16-byte `e_ident` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfIdentification {
    /// `EI_CLASS`, expected to equal [`ELF_CLASS_64`].
    pub class: u8,
    /// `EI_DATA`, expected to equal [`ELF_DATA_LSB`].
    pub data: u8,
    /// `EI_VERSION`, expected to equal [`ELF_VERSION_CURRENT`].
    pub version: u8,
    /// `EI_OSABI`. Not validated: recorded for round-tripping only.
    pub os_abi: u8,
    /// `EI_ABIVERSION`. Not validated: recorded for round-tripping only.
    pub abi_version: u8,
}

impl Default for ElfIdentification {
    fn default() -> Self {
        Self {
            class: ELF_CLASS_64,
            data: ELF_DATA_LSB,
            version: ELF_VERSION_CURRENT,
            os_abi: 0,
            abi_version: 0,
        }
    }
}

impl FromReader for ElfIdentification {
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            class: buf[4],
            data: buf[5],
            version: buf[6],
            os_abi: buf[7],
            abi_version: buf[8],
        })
    }
}

impl ToWriter for ElfIdentification {
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = self.class;
        buf[5] = self.data;
        buf[6] = self.version;
        buf[7] = self.os_abi;
        buf[8] = self.abi_version;
        writer.write_all(&buf)
    }
}

impl HasWrittenSize for ElfIdentification {
    const SIZE: usize = 16;
}

/// Check the leading magic bytes of a raw `e_ident` buffer.
pub fn has_valid_magic(ident: &[u8]) -> bool {
    ident.len() >= 4 && ident[0..4] == ELF_MAGIC
}
