//! Shared traits for decoding and encoding the fixed-width little-endian
//! primitives that make up every ELF64 structure.
//!
//! This linker only ever reads and writes ELF64 little-endian x86-64, so
//! these traits carry no class/endianness parameters: one place that
//! knows how bytes become integers, so every struct built on top gets
//! correct, byte-exact encoding for free.

use std::io::{self, Read, Write};

/// Decode an owned instance of a type from a reader.
///
/// Returns a plain [`io::Result`] rather than the crate's [`Error`][crate::error::Error]:
/// at this level there is no input object name to attach to a diagnostic
/// yet. Callers in [`crate::object`] catch `io::ErrorKind::UnexpectedEof`
/// and re-raise it as [`Error::UnexpectedEof`][crate::error::Error::UnexpectedEof]
/// with the object's name attached.
pub trait FromReader: Sized {
    /// Decode an instance of this type from `reader`.
    fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Encode an instance of a type to a writer.
pub trait ToWriter {
    /// Encode this value to `writer`.
    fn to_writer<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

/// A type whose encoded size is always the same, known at compile time.
pub trait HasWrittenSize {
    /// The size, in bytes, this type occupies when written.
    const SIZE: usize;
}
