//! Error types surfaced by every stage of the link pipeline.
//!
//! Every error the core can raise is fatal to the link: there is no
//! recovery path, only a single diagnostic describing what went wrong and
//! where. Each variant therefore carries enough structured context (object
//! name, section name, symbol name, relocation computation inputs) to
//! render that diagnostic without the caller having to go dig through the
//! data model again.

use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
/// Error type for every stage of a link, from parsing an input object
/// through writing the final image.
pub enum Error {
    /// The ELF identification bytes `{0x7F, 'E', 'L', 'F'}` were missing or wrong.
    #[error("{object}: not an ELF file (bad magic)")]
    BadMagic {
        /// Name of the offending object, for diagnostics.
        object: String,
    },

    /// The object's class was not `ELFCLASS64`.
    #[error("{object}: unsupported ELF class {class} (only ELFCLASS64 is supported)")]
    UnsupportedClass {
        /// Name of the offending object.
        object: String,
        /// The raw `EI_CLASS` byte found.
        class: u8,
    },

    /// The object's data encoding was not little-endian.
    #[error("{object}: unsupported data encoding {encoding} (only ELFDATA2LSB is supported)")]
    UnsupportedEncoding {
        /// Name of the offending object.
        object: String,
        /// The raw `EI_DATA` byte found.
        encoding: u8,
    },

    /// The object's machine was not `EM_X86_64`.
    #[error("{object}: unsupported machine {machine} (only EM_X86_64 is supported)")]
    UnsupportedMachine {
        /// Name of the offending object.
        object: String,
        /// The raw `e_machine` value found.
        machine: u16,
    },

    /// The object's `e_type` was not `ET_REL`.
    #[error("{object}: expected a relocatable object (ET_REL), found e_type={found}")]
    NotRelocatable {
        /// Name of the offending object.
        object: String,
        /// The raw `e_type` value found.
        found: u16,
    },

    /// A section, symbol, or relocation table was truncated relative to
    /// what the header table claims.
    #[error("{object}: truncated {what} (expected at least {expected} bytes, found {found})")]
    Truncated {
        /// Name of the offending object.
        object: String,
        /// What was being read (e.g. "section header table").
        what: &'static str,
        /// Bytes required.
        expected: usize,
        /// Bytes actually available.
        found: usize,
    },

    /// A string table index or section index referenced a slot that does
    /// not exist.
    #[error("{object}: inconsistent index: {what} index {index} is out of range (have {count})")]
    InconsistentIndex {
        /// Name of the offending object.
        object: String,
        /// What kind of index this is (e.g. "section header string table").
        what: &'static str,
        /// The out-of-range index.
        index: usize,
        /// Number of valid entries.
        count: usize,
    },

    /// An unknown or unsupported section, symbol, or relocation discriminant
    /// was found where the parser requires a known one.
    #[error("{object}: unsupported {what} {value}")]
    UnsupportedValue {
        /// Name of the offending object.
        object: String,
        /// What field this is (e.g. "relocation type").
        what: &'static str,
        /// The unsupported raw value.
        value: u64,
    },

    /// Two objects both provided a strong (non-weak) definition of the same
    /// global symbol.
    #[error(
        "multiple definition of `{symbol}`: first defined in `{first}`, \
         also defined in `{second}`"
    )]
    MultipleDefinition {
        /// The symbol name in conflict.
        symbol: String,
        /// The object that defined it first.
        first: String,
        /// The object that redefined it.
        second: String,
    },

    /// One or more global symbols remained undefined after library
    /// resolution ran.
    #[error("undefined reference(s) to: {}", format_undefined(.0))]
    UndefinedSymbols(
        /// Each unresolved name paired with every object that referenced it.
        Vec<(String, Vec<String>)>,
    ),

    /// A relocation site is outside the bounds of its containing section.
    #[error(
        "{object}: relocation at offset {offset:#x} of section `{section}` \
         (width {width} bytes) exceeds the section's size ({size:#x})"
    )]
    RelocationOutOfRange {
        /// Name of the object containing the relocation.
        object: String,
        /// Name of the section being patched.
        section: String,
        /// Byte offset of the relocation within the section.
        offset: u64,
        /// Width in bytes of the field being patched.
        width: u8,
        /// Size of the containing section.
        size: u64,
    },

    /// An unsupported x86-64 relocation type was encountered.
    #[error("{object}: unsupported relocation type {reloc_type} against symbol `{symbol}`")]
    UnsupportedRelocationType {
        /// Name of the object containing the relocation.
        object: String,
        /// The raw relocation type code.
        reloc_type: u32,
        /// The symbol the relocation targets.
        symbol: String,
    },

    /// A relocation's computed value does not fit in its field's width.
    #[error(
        "relocation overflow: symbol `{symbol}` at {site:#x} \
         (S={s:#x}, A={a:#x}, P={p:#x}{got}) computed {computed:#x}, \
         which does not fit in {width} bits"
    )]
    RelocationOverflow {
        /// Symbol the relocation targets.
        symbol: String,
        /// Virtual address of the relocation site.
        site: u64,
        /// Resolved symbol address (`S`).
        s: i64,
        /// Addend (`A`).
        a: i64,
        /// Virtual address of the patched field (`P`).
        p: i64,
        /// GOT-relative offset (`G`), rendered only when relevant.
        got: GotDiagnostic,
        /// The value that was computed before truncation.
        computed: i64,
        /// Width of the target field, in bits.
        width: u8,
    },

    /// Two assigned load segments overlap in virtual memory.
    #[error(
        "layout error: segment `{a}` [{a_start:#x}, {a_end:#x}) overlaps \
         segment `{b}` [{b_start:#x}, {b_end:#x})"
    )]
    SegmentOverlap {
        /// Name of the first segment (for diagnostics; segments are
        /// otherwise unnamed in the data model).
        a: &'static str,
        /// Start of the first segment's virtual address range.
        a_start: u64,
        /// End (exclusive) of the first segment's virtual address range.
        a_end: u64,
        /// Name of the second segment.
        b: &'static str,
        /// Start of the second segment's virtual address range.
        b_start: u64,
        /// End (exclusive) of the second segment's virtual address range.
        b_end: u64,
    },

    /// A `PT_LOAD`'s virtual address and file offset disagree modulo the
    /// page size.
    #[error(
        "layout error: segment `{segment}` violates congruence: \
         vaddr {vaddr:#x} mod {align:#x} != file_offset {file_offset:#x} mod {align:#x}"
    )]
    AlignmentContradiction {
        /// Name of the segment.
        segment: &'static str,
        /// Assigned virtual address.
        vaddr: u64,
        /// Assigned file offset.
        file_offset: u64,
        /// Required page alignment.
        align: u64,
    },

    /// The configured entry symbol was not found among defined symbols.
    #[error("entry symbol `{symbol}` is undefined")]
    MissingEntrySymbol {
        /// The configured entry symbol name.
        symbol: String,
    },

    /// `-static` was requested but at least one symbol requires dynamic
    /// linking.
    #[error("static link requested but `{symbol}` requires the dynamic linker")]
    StaticLinkRequiresDynamicSymbol {
        /// The symbol that forced dynamic linking.
        symbol: String,
    },

    /// No input objects were supplied.
    #[error("no input files")]
    NoInputFiles,

    /// Reading an input or writing the output failed at the OS level.
    #[error("I/O error on `{path}`: {source}")]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A table (section headers, symbols, relocations) ran out of bytes
    /// mid-read. Distinct from [`Error::Truncated`], which is raised once
    /// the whole-table length is already known to be short; this variant
    /// is raised by the low-level primitive decoders while reading one
    /// field at a time.
    #[error("{object}: unexpected end of data while reading {what}")]
    UnexpectedEof {
        /// Name of the object being parsed.
        object: String,
        /// What was being read (e.g. "section header").
        what: &'static str,
    },
}

/// Placeholder rendered in [`Error::RelocationOverflow`] when the
/// relocation type involved does not use the GOT; avoids a `None`
/// showing up as a raw `Option` in the formatted diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct GotDiagnostic(pub Option<u64>);

impl std::fmt::Display for GotDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(g) => write!(f, ", G={g:#x}"),
            None => Ok(()),
        }
    }
}

fn format_undefined(entries: &[(String, Vec<String>)]) -> String {
    entries
        .iter()
        .map(|(name, referrers)| format!("`{name}` (referenced by {})", referrers.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
