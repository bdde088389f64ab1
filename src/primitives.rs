//! Fixed-width little-endian primitives used throughout ELF64 structures.
//!
//! Each wrapper is a thin newtype over the matching Rust integer, with
//! [`FromReader`]/[`ToWriter`]/[`HasWrittenSize`] implementations that
//! always read and write little-endian bytes. No code outside this module
//! is permitted to reach for `from_le_bytes`/`to_le_bytes` directly; this
//! is the one place that knows about byte order, which is what keeps
//! output deterministic across platforms.

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::mem::size_of;

use crate::traits::{FromReader, HasWrittenSize, ToWriter};

macro_rules! elf_primitive {
    ($name:ident, $raw:ty, $doc:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[doc = $doc]
        pub struct $name(pub $raw);

        impl FromReader for $name {
            fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
                let mut buf = [0u8; size_of::<$raw>()];
                reader.read_exact(&mut buf)?;
                Ok(Self(<$raw>::from_le_bytes(buf)))
            }
        }

        impl ToWriter for $name {
            fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                writer.write_all(&self.0.to_le_bytes())
            }
        }

        impl HasWrittenSize for $name {
            const SIZE: usize = size_of::<$raw>();
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for $raw {
            fn from(val: $name) -> Self {
                val.0
            }
        }

        impl From<$raw> for $name {
            fn from(val: $raw) -> Self {
                Self(val)
            }
        }
    };
}

elf_primitive!(ElfByte, u8, "A single byte (`unsigned char`).");
elf_primitive!(ElfHalfWord, u16, "A 16-bit unsigned field (`Elf64_Half`).");
elf_primitive!(ElfWord, u32, "A 32-bit unsigned field (`Elf64_Word`).");
elf_primitive!(ElfSword, i32, "A 32-bit signed field (`Elf64_Sword`).");
elf_primitive!(ElfXword, u64, "A 64-bit unsigned field (`Elf64_Xword`).");
elf_primitive!(ElfSxword, i64, "A 64-bit signed field (`Elf64_Sxword`).");
elf_primitive!(ElfAddr, u64, "A 64-bit virtual address (`Elf64_Addr`).");
elf_primitive!(ElfOff, u64, "A 64-bit file offset (`Elf64_Off`).");
elf_primitive!(ElfSectionIndex, u16, "A section header table index (`Elf64_Section`).");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn half_word_round_trips_little_endian() {
        let mut buf = Vec::new();
        ElfHalfWord(0x1234).to_writer(&mut buf).unwrap();
        assert_eq!(buf, vec![0x34, 0x12]);
        let mut cursor = Cursor::new(buf);
        assert_eq!(ElfHalfWord::from_reader(&mut cursor).unwrap().0, 0x1234);
    }

    #[test]
    fn xword_round_trips_little_endian() {
        let mut buf = Vec::new();
        ElfXword(0x0102030405060708).to_writer(&mut buf).unwrap();
        assert_eq!(buf, vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        let mut cursor = Cursor::new(buf);
        assert_eq!(
            ElfXword::from_reader(&mut cursor).unwrap().0,
            0x0102030405060708
        );
    }

    #[test]
    fn truncated_read_is_an_io_error() {
        let mut cursor = Cursor::new(vec![0x01u8]);
        assert!(ElfWord::from_reader(&mut cursor).is_err());
    }
}
