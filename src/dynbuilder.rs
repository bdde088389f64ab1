//! Builds the runtime dynamic-linking structures: `.dynsym`, `.dynstr`,
//! `.rela.dyn`, `.rela.plt`, the classic ELF hash table, and the
//! `.dynamic` section itself.
//!
//! Grounded in the same `(tag, value)` shape real dynamic sections use;
//! emitted only when [`DynamicBuilder::needed`] says this link has any
//! `DT_NEEDED` library or dynamic-external symbol.

use std::collections::HashMap;

use crate::elf::dynamic::{DynamicEntry, DynamicTag};
use crate::elf::relocation::RawRela;
use crate::gotplt::{GotPltImage, GotPltPlan};
use crate::layout::{DynamicSectionSizes, MemoryLayout};
use crate::strtab::StringTableBuilder;
use crate::symtab::GlobalSymbolTable;
use crate::traits::{HasWrittenSize, ToWriter};

/// Everything the writer needs to emit the dynamic-linking sections.
#[derive(Debug, Clone, Default)]
pub struct DynamicImage {
    /// `.dynsym` bytes (fixed 24-byte `Elf64_Sym` entries, index 0 is the
    /// mandatory null entry).
    pub dynsym: Vec<u8>,
    /// `.dynstr` bytes.
    pub dynstr: Vec<u8>,
    /// `.rela.dyn` bytes (`GLOB_DAT`/`RELATIVE` entries).
    pub rela_dyn: Vec<u8>,
    /// `.rela.plt` bytes (`JUMP_SLOT` entries, one per PLT stub, in stub order).
    pub rela_plt: Vec<u8>,
    /// Classic ELF hash table bytes.
    pub hash: Vec<u8>,
    /// `.dynamic` entries, not yet serialized (the writer fills in
    /// section addresses once it knows where each of the above landed).
    pub dynamic_entries: Vec<DynamicEntry>,
    /// Names of every `DT_NEEDED` shared library, in first-seen order.
    pub needed_libraries: Vec<String>,
}

/// Computes the classic ELF hash of a symbol name (`SH_DRH` / System V ABI
/// algorithm): `h = 0; for c in name: h = (h<<4)+c; g = h & 0xF0000000; if
/// g != 0 { h ^= g>>24 }; h &= !g`.
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in name {
        h = (h << 4).wrapping_add(byte as u32);
        let g = h & 0xF000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Everything about the dynamic-linking structures that is decided purely
/// from symbol resolution and GOT/PLT planning, before any address
/// exists. [`MemoryLayout::build`] consumes [`DynamicPlan::sizes`] to
/// reserve real mapped addresses for `.dynsym`/`.dynstr`/`.hash`/
/// `.rela.dyn`/`.rela.plt`; [`DynamicBuilder::build`] then reuses the
/// precomputed bytes and fills in the address-dependent parts.
#[derive(Debug, Clone, Default)]
pub struct DynamicPlan {
    dynsym: Vec<u8>,
    dynstr: Vec<u8>,
    hash: Vec<u8>,
    name_to_dynsym_index: HashMap<String, usize>,
    needed_libraries: Vec<String>,
    library_offsets: HashMap<String, u32>,
    rela_dyn_count: usize,
    rela_plt_count: usize,
    has_plt: bool,
    has_got: bool,
}

impl DynamicPlan {
    /// Build the symbol-shaped part of the dynamic sections: `.dynsym`,
    /// `.dynstr`, and the hash table don't depend on any GOT/PLT address,
    /// only on the set of dynamic-external symbols.
    pub fn build(symtab: &GlobalSymbolTable, plan: &GotPltPlan) -> Self {
        let mut dynstr = StringTableBuilder::new();
        let mut dynsym = vec![0u8; <crate::elf::symbol::RawSymbol as HasWrittenSize>::SIZE];
        // Index 0 is the mandatory null entry, already zeroed above.

        let externals = symtab.dynamic_externals();
        let mut needed_libraries = Vec::new();
        let mut name_to_dynsym_index = HashMap::new();

        for (index, &(name, library)) in externals.iter().enumerate() {
            let name_offset = dynstr.intern(name);
            let raw = crate::elf::symbol::RawSymbol {
                name_offset,
                info: crate::elf::symbol::RawSymbol::pack_info(
                    crate::elf::symbol::SymbolBinding::Global,
                    crate::elf::symbol::SymbolType::Func,
                ),
                other: 0,
                section_index: crate::elf::symbol::SHN_UNDEF,
                value: 0,
                size: 0,
            };
            let mut buf = Vec::new();
            raw.to_writer(&mut buf).expect("writing to a Vec never fails");
            dynsym.extend_from_slice(&buf);
            name_to_dynsym_index.insert(name.to_string(), index + 1);

            if !needed_libraries.iter().any(|l: &String| l == library) {
                needed_libraries.push(library.to_string());
            }
        }

        let mut library_offsets = HashMap::new();
        for library in &needed_libraries {
            let offset = dynstr.intern(library);
            library_offsets.insert(library.clone(), offset);
        }

        let hash = build_hash_table(
            &externals
                .iter()
                .map(|&(n, _)| n.to_string())
                .collect::<Vec<_>>(),
        );

        let rela_dyn_count = plan
            .got_symbols()
            .iter()
            .filter(|n| !plan.is_plt_backed(n) && name_to_dynsym_index.contains_key(n.as_str()))
            .count();
        let rela_plt_count = plan
            .plt_symbols()
            .iter()
            .filter(|n| name_to_dynsym_index.contains_key(n.as_str()))
            .count();

        Self {
            dynsym,
            dynstr: dynstr.into_bytes(),
            hash,
            name_to_dynsym_index,
            needed_libraries,
            library_offsets,
            rela_dyn_count,
            rela_plt_count,
            has_plt: plan.plt_stub_count() > 0,
            has_got: plan.got_slot_count() > 0,
        }
    }

    /// Sizes [`MemoryLayout::build`] needs to reserve real addresses for
    /// every dynamic section this plan describes.
    pub fn sizes(&self) -> DynamicSectionSizes {
        let rela_dyn_size = (self.rela_dyn_count * 24) as u64;
        let rela_plt_size = (self.rela_plt_count * 24) as u64;
        let has_plt_got = self.has_plt || self.has_got;
        let entry_count = self.needed_libraries.len()
            + 2 // DT_STRTAB, DT_STRSZ
            + 2 // DT_SYMTAB, DT_SYMENT
            + if self.hash.is_empty() { 0 } else { 1 } // DT_HASH
            + if has_plt_got { 1 } else { 0 } // DT_PLTGOT
            + if rela_plt_size > 0 { 3 } else { 0 } // DT_PLTRELSZ, DT_PLTREL, DT_JMPREL
            + if rela_dyn_size > 0 { 3 } else { 0 } // DT_RELA, DT_RELASZ, DT_RELAENT
            + 1; // DT_NULL
        DynamicSectionSizes {
            dynsym_size: self.dynsym.len() as u64,
            dynstr_size: self.dynstr.len() as u64,
            hash_size: self.hash.len() as u64,
            rela_dyn_size,
            rela_plt_size,
            dynamic_entry_count: entry_count,
        }
    }
}

/// Builds the dynamic-linking structures for one link.
pub struct DynamicBuilder;

impl DynamicBuilder {
    /// `true` if this link needs any dynamic-linking structures at all:
    /// at least one symbol resolved to a shared library, or at least one
    /// `R_X86_64_RELATIVE` is required (PIE output).
    pub fn needed(symtab: &GlobalSymbolTable, pie: bool) -> bool {
        pie || !symtab.dynamic_externals().is_empty()
    }

    /// Build every dynamic section's bytes, given the finished GOT/PLT
    /// image and layout. Dynamic symbol table indices follow
    /// [`GotPltPlan::plt_symbols`][crate::gotplt::GotPltPlan::plt_symbols]
    /// order for dynamic-external functions, so `.rela.plt` entry `i`
    /// targets `.dynsym` entry `i + 1`.
    pub fn build(
        plan_data: &DynamicPlan,
        gotplt: &GotPltImage,
        plan: &GotPltPlan,
        layout: &MemoryLayout,
    ) -> DynamicImage {
        let name_to_dynsym_index = &plan_data.name_to_dynsym_index;

        let mut rela_dyn = Vec::new();
        if layout.got_address.is_some() {
            for name in plan.got_symbols() {
                // PLT-backed slots are bound lazily via `.rela.plt`'s
                // `JUMP_SLOT` entries, not eagerly via `GLOB_DAT` here.
                if plan.is_plt_backed(name) {
                    continue;
                }
                let Some(&dynsym_index) = name_to_dynsym_index.get(name) else {
                    continue;
                };
                let addr = gotplt.got_addresses.get(name).copied().unwrap_or(0);
                let rela = RawRela {
                    offset: addr,
                    info: RawRela::pack_info(dynsym_index as u32, 6 /* R_X86_64_GLOB_DAT */),
                    addend: 0,
                };
                let mut buf = Vec::new();
                rela.to_writer(&mut buf).expect("writing to a Vec never fails");
                rela_dyn.extend_from_slice(&buf);
            }
        }

        // Entry order must match the stub index each PLT trampoline pushes
        // (see `GotPltBuilder::build`), so this follows `plan.plt_symbols`
        // rather than `gotplt.plt_addresses`' arbitrary hash order.
        let mut rela_plt = Vec::new();
        for name in plan.plt_symbols() {
            let Some(&dynsym_index) = name_to_dynsym_index.get(name) else {
                continue;
            };
            let got_slot = gotplt.got_addresses.get(name).copied().unwrap_or(0);
            let rela = RawRela {
                offset: got_slot,
                info: RawRela::pack_info(dynsym_index as u32, 7 /* R_X86_64_JUMP_SLOT */),
                addend: 0,
            };
            let mut buf = Vec::new();
            rela.to_writer(&mut buf).expect("writing to a Vec never fails");
            rela_plt.extend_from_slice(&buf);
        }

        let mut entries = Vec::new();
        for library in &plan_data.needed_libraries {
            let offset = plan_data.library_offsets.get(library).copied().unwrap_or(0);
            entries.push(DynamicEntry::new(DynamicTag::Needed, offset as u64));
        }
        if let Some(dynstr_addr) = layout.dynstr_address {
            entries.push(DynamicEntry::new(DynamicTag::StrTab, dynstr_addr));
        }
        entries.push(DynamicEntry::new(DynamicTag::StrSz, plan_data.dynstr.len() as u64));
        if let Some(dynsym_addr) = layout.dynsym_address {
            entries.push(DynamicEntry::new(DynamicTag::SymTab, dynsym_addr));
        }
        entries.push(DynamicEntry::new(DynamicTag::SymEnt, 24));
        if let Some(hash_addr) = layout.hash_address {
            entries.push(DynamicEntry::new(DynamicTag::Hash, hash_addr));
        }
        if let Some(plt_addr) = layout.plt_address {
            entries.push(DynamicEntry::new(DynamicTag::PltGot, plt_addr));
        } else if let Some(got_addr) = layout.got_address {
            entries.push(DynamicEntry::new(DynamicTag::PltGot, got_addr));
        }
        if !rela_plt.is_empty() {
            entries.push(DynamicEntry::new(DynamicTag::PltRelSz, rela_plt.len() as u64));
            entries.push(DynamicEntry::new(DynamicTag::PltRel, 7 /* DT_RELA */));
            if let Some(rela_plt_addr) = layout.rela_plt_address {
                entries.push(DynamicEntry::new(DynamicTag::JmpRel, rela_plt_addr));
            }
        }
        if !rela_dyn.is_empty() {
            if let Some(rela_dyn_addr) = layout.rela_dyn_address {
                entries.push(DynamicEntry::new(DynamicTag::Rela, rela_dyn_addr));
            }
            entries.push(DynamicEntry::new(DynamicTag::RelaSz, rela_dyn.len() as u64));
            entries.push(DynamicEntry::new(DynamicTag::RelaEnt, 24));
        }
        entries.push(DynamicEntry::null());

        DynamicImage {
            dynsym: plan_data.dynsym.clone(),
            dynstr: plan_data.dynstr.clone(),
            rela_dyn,
            rela_plt,
            hash: plan_data.hash.clone(),
            dynamic_entries: entries,
            needed_libraries: plan_data.needed_libraries.clone(),
        }
    }
}

/// Classic ELF hash table: one bucket array and one chain array, sized
/// by a bucket count proportional to the symbol count (a fixed small
/// prime is enough here; this linker never emits more than a few dozen
/// dynamic symbols).
fn build_hash_table(names: &[String]) -> Vec<u8> {
    let nbucket = names.len().max(1) as u32;
    let nchain = (names.len() + 1) as u32; // + the null symbol at index 0
    let mut buckets = vec![0u32; nbucket as usize];
    let mut chains = vec![0u32; nchain as usize];

    for (index, name) in names.iter().enumerate() {
        let dynsym_index = (index + 1) as u32;
        let bucket = elf_hash(name.as_bytes()) % nbucket;
        chains[dynsym_index as usize] = buckets[bucket as usize];
        buckets[bucket as usize] = dynsym_index;
    }

    let mut bytes = Vec::with_capacity(8 + buckets.len() * 4 + chains.len() * 4);
    bytes.extend_from_slice(&nbucket.to_le_bytes());
    bytes.extend_from_slice(&nchain.to_le_bytes());
    for b in buckets {
        bytes.extend_from_slice(&b.to_le_bytes());
    }
    for c in chains {
        bytes.extend_from_slice(&c.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf_hash_matches_known_vector() {
        // `printf` under the classic SysV ELF hash algorithm.
        assert_eq!(elf_hash(b"printf"), 0x077905a6);
    }

    #[test]
    fn hash_table_chain_reaches_every_symbol() {
        let names = vec!["foo".to_string(), "bar".to_string(), "baz".to_string()];
        let table = build_hash_table(&names);
        let nbucket = u32::from_le_bytes(table[0..4].try_into().unwrap());
        let buckets_start = 8;
        let chains_start = buckets_start + nbucket as usize * 4;
        for (index, name) in names.iter().enumerate() {
            let want_index = (index + 1) as u32;
            let bucket = elf_hash(name.as_bytes()) % nbucket;
            let mut cursor = u32::from_le_bytes(
                table[buckets_start + bucket as usize * 4..buckets_start + bucket as usize * 4 + 4]
                    .try_into()
                    .unwrap(),
            );
            let mut found = false;
            while cursor != 0 {
                if cursor == want_index {
                    found = true;
                    break;
                }
                cursor = u32::from_le_bytes(
                    table[chains_start + cursor as usize * 4..chains_start + cursor as usize * 4 + 4]
                        .try_into()
                        .unwrap(),
                );
            }
            assert!(found, "{name} not reachable via its bucket chain");
        }
    }
}
