//! The ELF64 object-file parser.
//!
//! [`ElfParser::parse`] turns one relocatable object's bytes into a
//! [`ParsedObject`]: a header, a section table with names already
//! resolved, a symbol table with names and section indices resolved, and
//! every `SHT_RELA` relocation, decoded. Per the data model, everything
//! this produces is immutable afterwards — later stages only read it,
//! until the relocator mutates section byte buffers in place.

use std::io::Cursor;

use crate::elf::header::{ElfHeader, ElfType, EM_X86_64};
use crate::elf::identification::{has_valid_magic, ELF_CLASS_64, ELF_DATA_LSB};
use crate::elf::relocation::{RawRela, RelocationEntry, RelocationType};
use crate::elf::section::{RawSectionHeader, SectionFlags, SectionHeader, SectionType};
use crate::elf::symbol::{RawSymbol, Symbol, SymbolDefinition, SHN_ABS, SHN_COMMON, SHN_UNDEF};
use crate::error::{Error, Result};
use crate::traits::FromReader;

/// An ELF64 relocatable object after parsing: every header decoded, every
/// name resolved, every relocation and symbol table entry read.
#[derive(Debug, Clone)]
pub struct ParsedObject {
    /// Name used in diagnostics (conventionally the input path).
    pub name: String,
    /// The file header.
    pub header: ElfHeader,
    /// Section headers, in file order, with names resolved.
    pub sections: Vec<SectionHeader>,
    /// Raw bytes of each section's contents, aligned by index with
    /// `sections`. Empty for `SHT_NOBITS` and any section with no file
    /// representation (e.g. `SHT_NULL`).
    pub section_data: Vec<Vec<u8>>,
    /// Every symbol table entry across all `SHT_SYMTAB` sections, in table
    /// order; local symbols keep their original index for relocation
    /// lookups.
    pub symbols: Vec<Symbol>,
    /// Every decoded relocation, across all `SHT_RELA` sections.
    pub relocations: Vec<RelocationEntry>,
}

impl ParsedObject {
    /// Look up a symbol by its index in [`ParsedObject::symbols`].
    pub fn symbol(&self, index: u32) -> Option<&Symbol> {
        self.symbols.get(index as usize)
    }
}

/// Stateless entry point for parsing one object's bytes.
pub struct ElfParser;

impl ElfParser {
    /// Parse `bytes` as an ELF64 x86-64 relocatable object named `name`
    /// (used only for diagnostics).
    pub fn parse(name: &str, bytes: &[u8]) -> Result<ParsedObject> {
        if bytes.len() < 16 || !has_valid_magic(&bytes[..4.min(bytes.len())]) {
            return Err(Error::BadMagic {
                object: name.to_string(),
            });
        }

        let mut cursor = Cursor::new(bytes);
        let header = ElfHeader::from_reader(&mut cursor).map_err(|_| Error::UnexpectedEof {
            object: name.to_string(),
            what: "ELF header",
        })?;

        if header.identification.class != ELF_CLASS_64 {
            return Err(Error::UnsupportedClass {
                object: name.to_string(),
                class: header.identification.class,
            });
        }
        if header.identification.data != ELF_DATA_LSB {
            return Err(Error::UnsupportedEncoding {
                object: name.to_string(),
                encoding: header.identification.data,
            });
        }
        if header.e_machine != EM_X86_64 {
            return Err(Error::UnsupportedMachine {
                object: name.to_string(),
                machine: header.e_machine,
            });
        }
        if header.e_type != ElfType::Relocatable {
            return Err(Error::NotRelocatable {
                object: name.to_string(),
                found: header.e_type as u16,
            });
        }

        let raw_sections = read_section_headers(name, bytes, &header)?;

        if raw_sections.is_empty() {
            return Ok(ParsedObject {
                name: name.to_string(),
                header,
                sections: Vec::new(),
                section_data: Vec::new(),
                symbols: Vec::new(),
                relocations: Vec::new(),
            });
        }

        let shstrtab = raw_sections
            .get(header.e_shstrndx as usize)
            .ok_or_else(|| Error::InconsistentIndex {
                object: name.to_string(),
                what: "section header string table",
                index: header.e_shstrndx as usize,
                count: raw_sections.len(),
            })?;
        let shstrtab_bytes = slice_section(name, bytes, shstrtab, "section header string table")?;

        let mut sections = Vec::with_capacity(raw_sections.len());
        let mut section_data = Vec::with_capacity(raw_sections.len());
        for raw in &raw_sections {
            let section_name = read_cstr(shstrtab_bytes, raw.name_offset as usize);
            let section_type = SectionType::from_u32_or_null(raw.section_type);
            let data = if section_type == SectionType::NoBits || raw.section_type == 0 {
                Vec::new()
            } else {
                slice_section(name, bytes, raw, "section contents")?.to_vec()
            };
            sections.push(SectionHeader {
                name: section_name,
                section_type,
                raw_type: raw.section_type,
                flags: SectionFlags::from_bits_truncate(raw.flags),
                address: raw.address,
                offset: raw.offset,
                size: raw.size,
                link: raw.link,
                info: raw.info,
                addr_align: raw.addr_align,
                entry_size: raw.entry_size,
            });
            section_data.push(data);
        }

        let symbols = read_symbols(name, bytes, &raw_sections, &sections)?;
        let relocations = read_relocations(name, bytes, &raw_sections, &sections)?;

        Ok(ParsedObject {
            name: name.to_string(),
            header,
            sections,
            section_data,
            symbols,
            relocations,
        })
    }
}

impl SectionType {
    /// Map a raw `sh_type` to [`SectionType`], collapsing anything this
    /// linker does not interpret to [`SectionType::Null`] rather than
    /// failing: unknown section types are retained (their raw value
    /// survives in [`SectionHeader::raw_type`]) but not acted on, per the
    /// spec's "unknown section types are retained but not interpreted".
    fn from_u32_or_null(raw: u32) -> Self {
        use num_traits::FromPrimitive;
        SectionType::from_u32(raw).unwrap_or(SectionType::Null)
    }
}

fn read_section_headers(
    name: &str,
    bytes: &[u8],
    header: &ElfHeader,
) -> Result<Vec<RawSectionHeader>> {
    if header.e_shnum == 0 {
        return Ok(Vec::new());
    }
    let table_start = header.e_shoff as usize;
    let entry_size = header.e_shentsize as usize;
    let needed = entry_size * header.e_shnum as usize;
    if table_start + needed > bytes.len() {
        return Err(Error::Truncated {
            object: name.to_string(),
            what: "section header table",
            expected: needed,
            found: bytes.len().saturating_sub(table_start),
        });
    }
    let mut cursor = Cursor::new(&bytes[table_start..table_start + needed]);
    (0..header.e_shnum)
        .map(|_| {
            RawSectionHeader::from_reader(&mut cursor).map_err(|_| Error::UnexpectedEof {
                object: name.to_string(),
                what: "section header",
            })
        })
        .collect()
}

fn slice_section<'a>(
    name: &str,
    bytes: &'a [u8],
    section: &RawSectionHeader,
    what: &'static str,
) -> Result<&'a [u8]> {
    let start = section.offset as usize;
    let end = start
        .checked_add(section.size as usize)
        .ok_or(Error::Truncated {
            object: name.to_string(),
            what,
            expected: section.size as usize,
            found: 0,
        })?;
    bytes.get(start..end).ok_or(Error::Truncated {
        object: name.to_string(),
        what,
        expected: end.saturating_sub(start),
        found: bytes.len().saturating_sub(start.min(bytes.len())),
    })
}

fn read_cstr(buf: &[u8], offset: usize) -> String {
    let Some(slice) = buf.get(offset..) else {
        return String::new();
    };
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

fn read_symbols(
    name: &str,
    bytes: &[u8],
    raw_sections: &[RawSectionHeader],
    sections: &[SectionHeader],
) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    for (idx, raw) in raw_sections.iter().enumerate() {
        if sections[idx].section_type != SectionType::SymTab {
            continue;
        }
        let strtab = raw_sections
            .get(raw.link as usize)
            .ok_or(Error::InconsistentIndex {
                object: name.to_string(),
                what: "symbol table's string table",
                index: raw.link as usize,
                count: raw_sections.len(),
            })?;
        let strtab_bytes = slice_section(name, bytes, strtab, "symbol string table")?;

        let entry_size = if raw.entry_size == 0 {
            24
        } else {
            raw.entry_size as usize
        };
        let sym_bytes = slice_section(name, bytes, raw, "symbol table")?;
        if sym_bytes.len() % entry_size != 0 {
            return Err(Error::Truncated {
                object: name.to_string(),
                what: "symbol table",
                expected: sym_bytes.len(),
                found: (sym_bytes.len() / entry_size) * entry_size,
            });
        }
        let mut cursor = Cursor::new(sym_bytes);
        let count = sym_bytes.len() / entry_size;
        for _ in 0..count {
            let raw_sym = RawSymbol::from_reader(&mut cursor).map_err(|_| Error::UnexpectedEof {
                object: name.to_string(),
                what: "symbol table entry",
            })?;
            let (binding, symbol_type) = raw_sym.binding_and_type();
            let definition = match raw_sym.section_index {
                SHN_UNDEF => SymbolDefinition::Undefined,
                SHN_ABS => SymbolDefinition::Absolute,
                SHN_COMMON => SymbolDefinition::Common,
                idx => SymbolDefinition::Section(idx as usize),
            };
            symbols.push(Symbol {
                name: read_cstr(strtab_bytes, raw_sym.name_offset as usize),
                binding,
                symbol_type,
                other: raw_sym.other,
                definition,
                value: raw_sym.value,
                size: raw_sym.size,
            });
        }
    }
    Ok(symbols)
}

fn read_relocations(
    name: &str,
    bytes: &[u8],
    raw_sections: &[RawSectionHeader],
    sections: &[SectionHeader],
) -> Result<Vec<RelocationEntry>> {
    use num_traits::FromPrimitive;

    let mut relocations = Vec::new();
    for (idx, raw) in raw_sections.iter().enumerate() {
        if sections[idx].section_type != SectionType::Rela {
            continue;
        }
        let applies_to = raw.info as usize;
        if applies_to >= raw_sections.len() {
            return Err(Error::InconsistentIndex {
                object: name.to_string(),
                what: "relocation target section",
                index: applies_to,
                count: raw_sections.len(),
            });
        }
        let entry_size = if raw.entry_size == 0 {
            24
        } else {
            raw.entry_size as usize
        };
        let rela_bytes = slice_section(name, bytes, raw, "relocation table")?;
        if rela_bytes.len() % entry_size != 0 {
            return Err(Error::Truncated {
                object: name.to_string(),
                what: "relocation table",
                expected: rela_bytes.len(),
                found: (rela_bytes.len() / entry_size) * entry_size,
            });
        }
        let mut cursor = Cursor::new(rela_bytes);
        let count = rela_bytes.len() / entry_size;
        for _ in 0..count {
            let raw_rela = RawRela::from_reader(&mut cursor).map_err(|_| Error::UnexpectedEof {
                object: name.to_string(),
                what: "relocation entry",
            })?;
            let (symbol_index, raw_type) = raw_rela.symbol_and_type();
            let reloc_type =
                RelocationType::from_u32(raw_type).ok_or(Error::UnsupportedRelocationType {
                    object: name.to_string(),
                    reloc_type: raw_type,
                    symbol: format!("<symbol #{symbol_index}>"),
                })?;
            relocations.push(RelocationEntry {
                section_index: applies_to,
                offset: raw_rela.offset,
                reloc_type,
                symbol_index,
                addend: raw_rela.addend,
            });
        }
    }
    Ok(relocations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_object() -> Vec<u8> {
        // A single object with no sections beyond the mandatory null
        // entry and an empty shstrtab: header-only, used to exercise the
        // rejection paths rather than a full parse.
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        bytes[4] = ELF_CLASS_64;
        bytes[5] = ELF_DATA_LSB;
        bytes[6] = 1;
        // e_type = ET_REL
        bytes[16] = 1;
        bytes[17] = 0;
        // e_machine = EM_X86_64
        bytes[18] = 62;
        bytes[19] = 0;
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_object();
        bytes[0] = 0;
        let err = ElfParser::parse("bad", &bytes).unwrap_err();
        assert!(matches!(err, Error::BadMagic { .. }));
    }

    #[test]
    fn rejects_non_x86_64_machine() {
        let mut bytes = minimal_object();
        bytes[18] = 3; // EM_386
        let err = ElfParser::parse("i386", &bytes).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMachine { .. }));
    }

    #[test]
    fn rejects_non_relocatable_type() {
        let mut bytes = minimal_object();
        bytes[16] = 2; // ET_EXEC
        let err = ElfParser::parse("exe", &bytes).unwrap_err();
        assert!(matches!(err, Error::NotRelocatable { .. }));
    }

    #[test]
    fn parses_header_only_object() {
        let bytes = minimal_object();
        let obj = ElfParser::parse("empty.o", &bytes).unwrap();
        assert_eq!(obj.sections.len(), 0);
        assert_eq!(obj.symbols.len(), 0);
        assert_eq!(obj.relocations.len(), 0);
    }
}
