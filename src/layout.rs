//! Virtual memory layout: groups every `ALLOC` section from every input
//! object into the three canonical load segments (text, rodata,
//! data/bss), reserves address ranges for `.got`, `.plt`, and
//! `.dynamic`, and resolves the entry point.
//!
//! Cyclic section/symbol references are avoided by keying everything off
//! stable `(object_index, section_index)` pairs rather than pointers;
//! this module's output is consumed read-only by
//! [`crate::relocator::Relocator`] and [`crate::writer::ElfWriter`].

use std::collections::HashMap;

use crate::config::{LinkerConfig, DEFAULT_ENTRY_SYMBOL, PAGE_SIZE};
use crate::elf::header::ELF_HEADER_SIZE;
use crate::elf::program_header::{ProgramHeader, SegmentFlags, PT_DYNAMIC, PT_INTERP, PT_LOAD};
use crate::elf::section::SectionType;
use crate::elf::symbol::SymbolDefinition;
use crate::error::{Error, Result};
use crate::gotplt::GotPltPlan;
use crate::object::ParsedObject;
use crate::symtab::{GlobalSymbolTable, SymbolState};

/// One `PT_LOAD` segment's placement, independent of the on-disk
/// [`ProgramHeader`] encoding.
#[derive(Debug, Clone)]
pub struct LoadSegment {
    /// Label used only in diagnostics (`text`, `rodata`, `data`).
    pub label: &'static str,
    /// Permission flags.
    pub flags: SegmentFlags,
    /// Virtual address of the segment's first byte.
    pub vaddr: u64,
    /// Offset of the segment's first byte in the output file.
    pub file_offset: u64,
    /// Bytes present in the file.
    pub file_size: u64,
    /// Bytes occupied in memory (`>= file_size` when a `NOBITS` tail is present).
    pub mem_size: u64,
}

impl LoadSegment {
    /// Convert to the on-disk program header form.
    pub fn to_program_header(&self) -> ProgramHeader {
        ProgramHeader {
            segment_type: PT_LOAD,
            flags: self.flags,
            offset: self.file_offset,
            vaddr: self.vaddr,
            paddr: self.vaddr,
            filesz: self.file_size,
            memsz: self.mem_size,
            align: PAGE_SIZE,
        }
    }
}

/// Sizes of every dynamic-linking structure, known once symbol resolution
/// and GOT/PLT planning have run but before any address exists. Consumed
/// by [`MemoryLayout::build`] so `.dynsym`/`.dynstr`/`.hash`/`.rela.dyn`/
/// `.rela.plt` get real mapped addresses instead of trailing the file
/// unmapped — the dynamic loader resolves them through `.dynamic`'s
/// pointers, which must themselves be valid runtime addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicSectionSizes {
    pub dynsym_size: u64,
    pub dynstr_size: u64,
    pub hash_size: u64,
    pub rela_dyn_size: u64,
    pub rela_plt_size: u64,
    pub dynamic_entry_count: usize,
}

/// The complete address assignment for one link.
#[derive(Debug, Clone)]
pub struct MemoryLayout {
    /// The load segments, in output order (text, rodata, data/bss).
    pub segments: Vec<LoadSegment>,
    section_addresses: HashMap<(usize, usize), u64>,
    /// Address assigned to each surviving common symbol's storage in the
    /// synthesized `.bss` tail.
    pub common_symbol_addresses: HashMap<String, u64>,
    /// Base address of `.got`, if one was reserved.
    pub got_address: Option<u64>,
    /// Base address of `.plt`, if one was reserved.
    pub plt_address: Option<u64>,
    /// Base address of `.dynamic`, if one was reserved.
    pub dynamic_address: Option<u64>,
    /// Address of the null-terminated interpreter path, if `PT_INTERP` is
    /// needed.
    pub interpreter_address: Option<u64>,
    /// Base address of `.dynsym`, if one was reserved.
    pub dynsym_address: Option<u64>,
    /// Base address of `.dynstr`, if one was reserved.
    pub dynstr_address: Option<u64>,
    /// Base address of the classic ELF hash table, if one was reserved.
    pub hash_address: Option<u64>,
    /// Base address of `.rela.dyn`, if one was reserved.
    pub rela_dyn_address: Option<u64>,
    /// Base address of `.rela.plt`, if one was reserved.
    pub rela_plt_address: Option<u64>,
    /// Resolved entry point virtual address.
    pub entry: u64,
    /// Machine code for a synthesized `_start` trampoline, appended to the
    /// text segment, when the configured entry symbol was undefined and
    /// `main` was used as a fallback. `None` when the entry symbol was
    /// found directly.
    pub synthesized_start: Option<Vec<u8>>,
}

impl MemoryLayout {
    /// Address assigned to section `section_index` of object `object_index`,
    /// or `None` if that section is not `ALLOC` (and therefore was never
    /// placed in a segment).
    pub fn section_address(&self, object_index: usize, section_index: usize) -> Option<u64> {
        self.section_addresses
            .get(&(object_index, section_index))
            .copied()
    }

    /// Build the full layout for one link.
    pub fn build(
        objects: &[ParsedObject],
        symtab: &GlobalSymbolTable,
        plan: &GotPltPlan,
        dynamic_sizes: &DynamicSectionSizes,
        config: &LinkerConfig,
    ) -> Result<Self> {
        let dynamic_entry_count = dynamic_sizes.dynamic_entry_count;
        let mut text = SegmentCursor::new();
        let mut rodata = SegmentCursor::new();
        let mut data = SegmentCursor::new();

        // The ELF header and program header table occupy the very front of
        // the text segment, so the first byte of the file is the file's
        // first byte and vaddr/file_offset start in lockstep.
        let program_header_count = 1 // the text segment itself
            + if !rodata_will_exist(objects) { 0 } else { 1 }
            + 1 // data segment always present (even if empty, for symmetry with GOT/dynamic)
            + if dynamic_entry_count > 0 { 1 } else { 0 } // PT_DYNAMIC
            + if dynamic_entry_count > 0 { 1 } else { 0 }; // PT_INTERP
        text.reserve(ELF_HEADER_SIZE + (program_header_count as u64) * 56);

        // The interpreter path is a tiny, file-backed, read-only blob; it
        // rides in the text segment right after the program header table,
        // same as every other file-backed chunk reserved before the
        // NOBITS tail.
        let interpreter_reserve = if dynamic_entry_count > 0 {
            Some(text.reserve_chunk(config.interpreter.len() as u64 + 1, 1, true))
        } else {
            None
        };

        let mut section_addresses = HashMap::new();

        // Two passes over every section: file-backed content first, then
        // `NOBITS` tails, so every `NOBITS` section lands after all
        // file-backed sections in its segment and contributes only to
        // `mem_size` — never shifting a later section's file offset.
        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if !section.is_alloc() || section.section_type == SectionType::NoBits {
                    continue;
                }
                let align = section.addr_align.max(1);
                let cursor = if section.flags.contains(crate::elf::section::SectionFlags::EXECINSTR) {
                    &mut text
                } else if section.flags.contains(crate::elf::section::SectionFlags::WRITE) {
                    &mut data
                } else {
                    &mut rodata
                };
                let offset = cursor.reserve_chunk(section.size, align, true);
                section_addresses.insert((object_index, section_index), offset);
            }
        }
        let plt_reserve = if plan.plt_stub_count() > 0 {
            Some(text.reserve_chunk(16 * (1 + plan.plt_stub_count() as u64), 16, true))
        } else {
            None
        };

        // Whether a `_start` trampoline needs synthesizing is decided
        // purely from symbol resolution state, before any address exists,
        // so its space can be reserved in the text segment now — the same
        // way `.plt`/`.got` reserve space ahead of their own addresses.
        let needs_synthesized_start = entry_requires_synthesized_stub(symtab, config);
        let start_stub_reserve = if needs_synthesized_start {
            Some(text.reserve_chunk(SYNTHESIZED_START_LEN, 1, true))
        } else {
            None
        };

        // `.got` and `.dynamic` are file-backed, so both must be placed
        // before the data segment's `NOBITS` tail: within one `PT_LOAD`,
        // `vaddr - file_offset` is constant, which only holds if nothing
        // file-backed follows a memory-only gap.
        let got_reserve = if plan.got_slot_count() > 0 {
            Some(data.reserve_chunk(8 * (3 + plan.got_slot_count() as u64), 8, true))
        } else {
            None
        };

        let dynamic_reserve = if dynamic_entry_count > 0 {
            Some(data.reserve_chunk(16 * dynamic_entry_count as u64, 8, true))
        } else {
            None
        };

        // `.dynsym`/`.dynstr`/hash/`.rela.*` are read only at runtime but,
        // like `.got`/`.dynamic` above, must be file-backed chunks placed
        // before the data segment's `NOBITS` tail — the loader reaches
        // them through `.dynamic`'s pointers, so each needs a real mapped
        // address, not just a spot past the end of the file.
        let dynsym_reserve = if dynamic_sizes.dynsym_size > 0 {
            Some(data.reserve_chunk(dynamic_sizes.dynsym_size, 8, true))
        } else {
            None
        };
        let dynstr_reserve = if dynamic_sizes.dynstr_size > 0 {
            Some(data.reserve_chunk(dynamic_sizes.dynstr_size, 1, true))
        } else {
            None
        };
        let hash_reserve = if dynamic_sizes.hash_size > 0 {
            Some(data.reserve_chunk(dynamic_sizes.hash_size, 4, true))
        } else {
            None
        };
        let rela_dyn_reserve = if dynamic_sizes.rela_dyn_size > 0 {
            Some(data.reserve_chunk(dynamic_sizes.rela_dyn_size, 8, true))
        } else {
            None
        };
        let rela_plt_reserve = if dynamic_sizes.rela_plt_size > 0 {
            Some(data.reserve_chunk(dynamic_sizes.rela_plt_size, 8, true))
        } else {
            None
        };

        // Every `NOBITS` section, across every object, lands in the data
        // segment's tail, after every file-backed chunk above.
        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if !section.is_alloc() || section.section_type != SectionType::NoBits {
                    continue;
                }
                let align = section.addr_align.max(1);
                let offset = data.reserve_chunk(section.size, align, false);
                section_addresses.insert((object_index, section_index), offset);
            }
        }

        // Common symbols, sorted by descending alignment per the merge
        // rule, are packed at the very end of the data segment's tail.
        let mut commons = symtab
            .common_symbols()
            .into_iter()
            .map(|(name, size, align)| (name.to_string(), size, align.max(1)))
            .collect::<Vec<_>>();
        commons.sort_by(|a, b| b.2.cmp(&a.2).then(b.1.cmp(&a.1)));
        let mut common_symbol_addresses = HashMap::new();

        // Common-symbol offsets are relative to the data segment for now;
        // converted to absolute addresses once the segment's base vaddr
        // is known.
        let mut common_relative = Vec::with_capacity(commons.len());
        for (name, size, align) in &commons {
            let offset = data.reserve_chunk(*size, *align, false);
            common_relative.push((name.clone(), offset));
        }

        let base = config.base_address;
        let text_vaddr = base;
        let text_file_offset = 0u64;
        let (text_mem_size, text_file_size) = text.sizes();

        let rodata_vaddr = round_up(text_vaddr + text_mem_size, PAGE_SIZE);
        let rodata_file_offset =
            align_file_offset_to_vaddr(text_file_offset + text_file_size, rodata_vaddr, PAGE_SIZE);
        let (rodata_mem_size, rodata_file_size) = rodata.sizes();

        let data_vaddr = round_up(rodata_vaddr + rodata_mem_size, PAGE_SIZE);
        let data_file_offset = align_file_offset_to_vaddr(
            rodata_file_offset + rodata_file_size,
            data_vaddr,
            PAGE_SIZE,
        );
        let (data_mem_size, data_file_size) = data.sizes();

        let mut segments = vec![LoadSegment {
            label: "text",
            flags: SegmentFlags::R | SegmentFlags::X,
            vaddr: text_vaddr,
            file_offset: text_file_offset,
            file_size: text_file_size,
            mem_size: text_mem_size,
        }];
        if rodata_mem_size > 0 {
            segments.push(LoadSegment {
                label: "rodata",
                flags: SegmentFlags::R,
                vaddr: rodata_vaddr,
                file_offset: rodata_file_offset,
                file_size: rodata_file_size,
                mem_size: rodata_mem_size,
            });
        }
        segments.push(LoadSegment {
            label: "data",
            flags: SegmentFlags::R | SegmentFlags::W,
            vaddr: data_vaddr,
            file_offset: data_file_offset,
            file_size: data_file_size,
            mem_size: data_mem_size,
        });

        check_no_overlap(&segments)?;
        for segment in &segments {
            if segment.vaddr % PAGE_SIZE != segment.file_offset % PAGE_SIZE {
                return Err(Error::AlignmentContradiction {
                    segment: segment.label,
                    vaddr: segment.vaddr,
                    file_offset: segment.file_offset,
                    align: PAGE_SIZE,
                });
            }
        }

        // Translate every relative offset recorded above into an absolute
        // virtual address now that each segment's base is fixed.
        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if !section.is_alloc() {
                    continue;
                }
                if let Some(rel) = section_addresses.get_mut(&(object_index, section_index)) {
                    let base_vaddr = if section.section_type == SectionType::NoBits {
                        data_vaddr
                    } else if section.flags.contains(crate::elf::section::SectionFlags::EXECINSTR) {
                        text_vaddr
                    } else if section.flags.contains(crate::elf::section::SectionFlags::WRITE) {
                        data_vaddr
                    } else {
                        rodata_vaddr
                    };
                    *rel += base_vaddr;
                }
            }
        }
        for (name, rel) in common_relative {
            common_symbol_addresses.insert(name, rel + data_vaddr);
        }
        let plt_address = plt_reserve.map(|rel| rel + text_vaddr);
        let got_address = got_reserve.map(|rel| rel + data_vaddr);
        let dynamic_address = dynamic_reserve.map(|rel| rel + data_vaddr);
        let interpreter_address = interpreter_reserve.map(|rel| rel + text_vaddr);
        let dynsym_address = dynsym_reserve.map(|rel| rel + data_vaddr);
        let dynstr_address = dynstr_reserve.map(|rel| rel + data_vaddr);
        let hash_address = hash_reserve.map(|rel| rel + data_vaddr);
        let rela_dyn_address = rela_dyn_reserve.map(|rel| rel + data_vaddr);
        let rela_plt_address = rela_plt_reserve.map(|rel| rel + data_vaddr);
        let start_stub_address = start_stub_reserve.map(|rel| rel + text_vaddr);

        let mut layout = MemoryLayout {
            segments,
            section_addresses,
            common_symbol_addresses,
            got_address,
            plt_address,
            dynamic_address,
            interpreter_address,
            dynsym_address,
            dynstr_address,
            hash_address,
            rela_dyn_address,
            rela_plt_address,
            entry: 0,
            synthesized_start: None,
        };

        layout.entry = layout.resolve_entry(objects, symtab, config, start_stub_address)?;

        Ok(layout)
    }

    fn symbol_address(
        &self,
        objects: &[ParsedObject],
        symtab: &GlobalSymbolTable,
        name: &str,
    ) -> Option<u64> {
        let entry = symtab.get(name)?;
        match entry.state {
            SymbolState::Strong { object, symbol } | SymbolState::Weak { object, symbol } => {
                let symbol = objects[object].symbol(symbol)?;
                match symbol.definition {
                    SymbolDefinition::Section(section_index) => self
                        .section_address(object, section_index)
                        .map(|base| base + symbol.value),
                    SymbolDefinition::Absolute => Some(symbol.value),
                    SymbolDefinition::Common | SymbolDefinition::Undefined => {
                        self.common_symbol_addresses.get(&entry.name).copied()
                    }
                }
            }
            SymbolState::Common { .. } => self.common_symbol_addresses.get(&entry.name).copied(),
            SymbolState::DynamicExternal { .. } | SymbolState::Undefined => None,
        }
    }

    fn resolve_entry(
        &mut self,
        objects: &[ParsedObject],
        symtab: &GlobalSymbolTable,
        config: &LinkerConfig,
        start_stub_address: Option<u64>,
    ) -> Result<u64> {
        if let Some(addr) = self.symbol_address(objects, symtab, &config.entry_symbol) {
            return Ok(addr);
        }
        if config.entry_symbol == DEFAULT_ENTRY_SYMBOL {
            if let Some(main_addr) = self.symbol_address(objects, symtab, "main") {
                // `call main ; mov edi, eax ; mov eax, 60 ; syscall`
                let stub_vaddr = start_stub_address
                    .expect("space for the synthesized _start stub was reserved in the text segment");
                let rel32 = (main_addr as i64 - (stub_vaddr as i64 + 5)) as i32;
                let mut code = Vec::with_capacity(SYNTHESIZED_START_LEN as usize);
                code.push(0xE8);
                code.extend_from_slice(&rel32.to_le_bytes());
                code.extend_from_slice(&[0x89, 0xC7]);
                code.extend_from_slice(&[0xB8, 0x3C, 0x00, 0x00, 0x00]);
                code.extend_from_slice(&[0x0F, 0x05]);
                self.synthesized_start = Some(code);
                return Ok(stub_vaddr);
            }
        }
        Err(Error::MissingEntrySymbol {
            symbol: config.entry_symbol.clone(),
        })
    }

    /// Build the `PT_INTERP` and `PT_DYNAMIC` program headers, if this
    /// link needs them. Called by the writer after [`MemoryLayout::build`]
    /// and [`crate::dynbuilder::DynamicBuilder`] have both run, once the
    /// interpreter string has itself been placed in the data segment.
    pub fn auxiliary_program_headers(
        &self,
        interpreter_vaddr: Option<u64>,
        interpreter_len: u64,
        dynamic_size: u64,
    ) -> Vec<ProgramHeader> {
        let mut headers = Vec::new();
        if let Some(vaddr) = interpreter_vaddr {
            headers.push(ProgramHeader {
                segment_type: PT_INTERP,
                flags: SegmentFlags::R,
                offset: self.file_offset_of(vaddr),
                vaddr,
                paddr: vaddr,
                filesz: interpreter_len,
                memsz: interpreter_len,
                align: 1,
            });
        }
        if let Some(dyn_addr) = self.dynamic_address {
            headers.push(ProgramHeader {
                segment_type: PT_DYNAMIC,
                flags: SegmentFlags::R | SegmentFlags::W,
                offset: self.file_offset_of(dyn_addr),
                vaddr: dyn_addr,
                paddr: dyn_addr,
                filesz: dynamic_size,
                memsz: dynamic_size,
                align: 8,
            });
        }
        headers
    }

    /// Translate a virtual address this layout assigned back to its file
    /// offset, by locating the containing segment.
    pub fn file_offset_of(&self, vaddr: u64) -> u64 {
        self.segments
            .iter()
            .find(|s| vaddr >= s.vaddr && vaddr < s.vaddr + s.mem_size)
            .map(|s| s.file_offset + (vaddr - s.vaddr))
            .unwrap_or(0)
    }
}

/// Length in bytes of the synthesized `_start` trampoline (`call main ;
/// mov edi, eax ; mov eax, 60 ; syscall`).
const SYNTHESIZED_START_LEN: u64 = 14;

/// `true` if `name` is resolved to a real definition (not left undefined
/// or deferred to the dynamic loader) and therefore has an address.
fn symbol_resolves(symtab: &GlobalSymbolTable, name: &str) -> bool {
    symtab.get(name).is_some_and(|entry| {
        !matches!(
            entry.state,
            SymbolState::Undefined | SymbolState::DynamicExternal { .. }
        )
    })
}

/// `true` if resolving the entry point will need the `_start`-from-`main`
/// fallback, decided purely from symbol state, before any address exists
/// — so the trampoline's space can be reserved in the text segment
/// alongside every other address-independent reservation.
fn entry_requires_synthesized_stub(symtab: &GlobalSymbolTable, config: &LinkerConfig) -> bool {
    if symbol_resolves(symtab, &config.entry_symbol) {
        return false;
    }
    config.entry_symbol == DEFAULT_ENTRY_SYMBOL && symbol_resolves(symtab, "main")
}

fn rodata_will_exist(objects: &[ParsedObject]) -> bool {
    objects.iter().any(|object| {
        object.sections.iter().any(|section| {
            section.is_alloc()
                && section.section_type != SectionType::NoBits
                && !section.flags.contains(crate::elf::section::SectionFlags::EXECINSTR)
                && !section.flags.contains(crate::elf::section::SectionFlags::WRITE)
        })
    })
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

fn align_file_offset_to_vaddr(cursor: u64, vaddr: u64, page: u64) -> u64 {
    let want = vaddr % page;
    let current = cursor % page;
    if current <= want {
        cursor + (want - current)
    } else {
        cursor + (page - current) + want
    }
}

fn check_no_overlap(segments: &[LoadSegment]) -> Result<()> {
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            let a = &segments[i];
            let b = &segments[j];
            let a_end = a.vaddr + a.mem_size;
            let b_end = b.vaddr + b.mem_size;
            if a.vaddr < b_end && b.vaddr < a_end {
                return Err(Error::SegmentOverlap {
                    a: a.label,
                    a_start: a.vaddr,
                    a_end,
                    b: b.label,
                    b_start: b.vaddr,
                    b_end,
                });
            }
        }
    }
    Ok(())
}

/// Tracks chunks reserved within one not-yet-based segment: offsets are
/// relative to the segment's eventual base vaddr until
/// [`MemoryLayout::build`] fixes it.
#[derive(Debug, Default)]
struct SegmentCursor {
    mem_cursor: u64,
    file_cursor: u64,
}

impl SegmentCursor {
    fn new() -> Self {
        Self::default()
    }

    fn reserve(&mut self, size: u64) {
        self.mem_cursor += size;
        self.file_cursor += size;
    }

    /// Reserve `size` bytes aligned to `align`, returning the relative
    /// offset assigned. `has_file_content` is false for `NOBITS` tails,
    /// which advance `mem_cursor` but not `file_cursor`.
    fn reserve_chunk(&mut self, size: u64, align: u64, has_file_content: bool) -> u64 {
        self.mem_cursor = round_up(self.mem_cursor, align);
        let offset = self.mem_cursor;
        self.mem_cursor += size;
        if has_file_content {
            self.file_cursor = offset;
            self.file_cursor += size;
        }
        offset
    }

    /// `(memory size, file size)` accumulated so far.
    fn sizes(&self) -> (u64, u64) {
        (self.mem_cursor, self.file_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_offset_alignment_matches_vaddr_modulo_page() {
        let offset = align_file_offset_to_vaddr(100, 0x401234, PAGE_SIZE);
        assert_eq!(offset % PAGE_SIZE, 0x401234 % PAGE_SIZE);
        assert!(offset >= 100);
    }

    #[test]
    fn round_up_is_idempotent_on_aligned_values() {
        assert_eq!(round_up(0x1000, 0x1000), 0x1000);
        assert_eq!(round_up(0x1001, 0x1000), 0x2000);
    }

    #[test]
    fn overlapping_segments_are_rejected() {
        let segments = vec![
            LoadSegment {
                label: "a",
                flags: SegmentFlags::R,
                vaddr: 0x1000,
                file_offset: 0,
                file_size: 0x2000,
                mem_size: 0x2000,
            },
            LoadSegment {
                label: "b",
                flags: SegmentFlags::R,
                vaddr: 0x1500,
                file_offset: 0x2000,
                file_size: 0x1000,
                mem_size: 0x1000,
            },
        ];
        assert!(check_no_overlap(&segments).is_err());
    }
}
