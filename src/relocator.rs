//! Per-relocation-type dispatch: patches section bytes in place using
//! the formulas from the relocation type table.
//!
//! The set of x86-64 relocations is closed, so dispatch is a single match
//! rather than a trait per relocation type — see
//! [`crate::elf::relocation::RelocationType`] for the formula each variant
//! implements (`S`, `A`, `P`, `G`, `L`, `B`).

use crate::config::LinkerConfig;
use crate::elf::relocation::RelocationType;
use crate::elf::symbol::SymbolDefinition;
use crate::error::{Error, GotDiagnostic, Result};
use crate::gotplt::GotPltImage;
use crate::layout::MemoryLayout;
use crate::object::ParsedObject;
use crate::symtab::{GlobalSymbolTable, SymbolState};

/// Applies every relocation in every input object against a finished
/// [`MemoryLayout`] and [`GotPltImage`], mutating each object's section
/// bytes in place.
pub struct Relocator<'a> {
    layout: &'a MemoryLayout,
    gotplt: &'a GotPltImage,
    symtab: &'a GlobalSymbolTable,
    config: &'a LinkerConfig,
    saw_relative: std::cell::Cell<bool>,
}

impl<'a> Relocator<'a> {
    /// Build a relocator bound to one link's resolved state.
    pub fn new(
        layout: &'a MemoryLayout,
        gotplt: &'a GotPltImage,
        symtab: &'a GlobalSymbolTable,
        config: &'a LinkerConfig,
    ) -> Self {
        Self {
            layout,
            gotplt,
            symtab,
            config,
            saw_relative: std::cell::Cell::new(false),
        }
    }

    /// `true` if [`Relocator::apply_all`] applied at least one
    /// `R_X86_64_RELATIVE` relocation, which requires `ET_DYN` output.
    pub fn saw_relative(&self) -> bool {
        self.saw_relative.get()
    }

    /// Apply every relocation across every object, mutating
    /// `section_data` in place. `section_data` is indexed the same way
    /// as `objects[i].sections`/`objects[i].section_data`.
    pub fn apply_all(
        &self,
        objects: &[ParsedObject],
        section_data: &mut [Vec<Vec<u8>>],
    ) -> Result<()> {
        for (object_index, object) in objects.iter().enumerate() {
            for relocation in &object.relocations {
                self.apply_one(
                    objects,
                    object_index,
                    object,
                    relocation,
                    &mut section_data[object_index],
                )?;
            }
        }
        Ok(())
    }

    fn apply_one(
        &self,
        objects: &[ParsedObject],
        object_index: usize,
        object: &ParsedObject,
        relocation: &crate::elf::relocation::RelocationEntry,
        section_data: &mut [Vec<u8>],
    ) -> Result<()> {
        if relocation.reloc_type == RelocationType::None
            || relocation.reloc_type == RelocationType::Copy
        {
            return Ok(());
        }

        let section = &object.sections[relocation.section_index];
        let section_vaddr = self
            .layout
            .section_address(object_index, relocation.section_index)
            .unwrap_or(0);
        let patch_site = section_vaddr + relocation.offset;

        let width_bits = relocation.reloc_type.width_bits();
        let width_bytes = (width_bits / 8) as usize;
        let offset = relocation.offset as usize;
        if offset + width_bytes > section_data[relocation.section_index].len() {
            return Err(Error::RelocationOutOfRange {
                object: object.name.clone(),
                section: section.name.clone(),
                offset: relocation.offset,
                width: width_bits,
                size: section_data[relocation.section_index].len() as u64,
            });
        }

        let symbol = object.symbol(relocation.symbol_index);
        let symbol_name = symbol.map(|s| s.name.as_str()).unwrap_or("");

        let s = self.symbol_value(objects, object_index, object, relocation.symbol_index)?;
        let a = relocation.addend;
        let p = patch_site as i64;
        let g = self.gotplt.got_addresses.get(symbol_name).copied();
        let got_base = self.layout.got_address.unwrap_or(0) as i64;
        let l = self.gotplt.plt_addresses.get(symbol_name).copied();

        let computed: i64 = match relocation.reloc_type {
            RelocationType::None | RelocationType::Copy => unreachable!(),
            RelocationType::Direct64 | RelocationType::Direct32 => s + a,
            RelocationType::Pc32 => s + a - p,
            RelocationType::Plt32 => {
                let l = l.ok_or_else(|| Error::UnsupportedRelocationType {
                    object: object.name.clone(),
                    reloc_type: 4,
                    symbol: symbol_name.to_string(),
                })? as i64;
                l + a - p
            }
            RelocationType::Got32 => {
                let g = g.ok_or_else(|| Error::UnsupportedRelocationType {
                    object: object.name.clone(),
                    reloc_type: 3,
                    symbol: symbol_name.to_string(),
                })? as i64;
                (g - got_base) + a
            }
            RelocationType::GotPcRel => {
                let g = g.ok_or_else(|| Error::UnsupportedRelocationType {
                    object: object.name.clone(),
                    reloc_type: 9,
                    symbol: symbol_name.to_string(),
                })? as i64;
                (g - got_base) + got_base + a - p
            }
            RelocationType::Direct32Signed => s + a,
            RelocationType::GlobDat | RelocationType::JumpSlot => s,
            RelocationType::Relative => {
                // `B`, the load base, is 0 for a non-PIE static image;
                // for a PIE/DYN output the loader applies the runtime
                // bias itself, so the static addend alone is written.
                self.saw_relative.set(true);
                a
            }
        };

        // Every 32-bit relocation except the explicitly zero-extending
        // `R_X86_64_32` produces a signed value (PC-relative
        // displacements are routinely negative).
        let signed_check = !matches!(relocation.reloc_type, RelocationType::Direct32);
        check_fits(
            computed,
            width_bits,
            signed_check,
            symbol_name,
            patch_site,
            s,
            a,
            p,
            g,
        )?;

        let bytes = section_data
            .get_mut(relocation.section_index)
            .expect("bounds already checked");
        match width_bytes {
            4 => bytes[offset..offset + 4].copy_from_slice(&(computed as i32).to_le_bytes()),
            8 => bytes[offset..offset + 8].copy_from_slice(&computed.to_le_bytes()),
            _ => {}
        }

        Ok(())
    }

    fn symbol_value(
        &self,
        objects: &[ParsedObject],
        object_index: usize,
        object: &ParsedObject,
        symbol_index: u32,
    ) -> Result<i64> {
        let Some(symbol) = object.symbol(symbol_index) else {
            return Ok(0);
        };
        if symbol.name.is_empty() {
            // Section symbols (STT_SECTION) reference a section directly
            // rather than a merged global name.
            return Ok(match symbol.definition {
                SymbolDefinition::Section(section_index) => self
                    .layout
                    .section_address(object_index, section_index)
                    .unwrap_or(0) as i64
                    + symbol.value as i64,
                SymbolDefinition::Absolute => symbol.value as i64,
                _ => 0,
            });
        }
        if symbol.is_local() {
            return Ok(match symbol.definition {
                SymbolDefinition::Section(section_index) => self
                    .layout
                    .section_address(object_index, section_index)
                    .unwrap_or(0) as i64
                    + symbol.value as i64,
                SymbolDefinition::Absolute => symbol.value as i64,
                SymbolDefinition::Common => self
                    .layout
                    .common_symbol_addresses
                    .get(&symbol.name)
                    .copied()
                    .unwrap_or(0) as i64,
                SymbolDefinition::Undefined => {
                    return Err(Error::UndefinedSymbols(vec![(
                        symbol.name.clone(),
                        vec![object.name.clone()],
                    )]))
                }
            });
        }

        let Some(entry) = self.symtab.get(&symbol.name) else {
            return Err(Error::UndefinedSymbols(vec![(
                symbol.name.clone(),
                vec![object.name.clone()],
            )]));
        };
        match &entry.state {
            SymbolState::Strong {
                object: winner_object,
                symbol: winner_symbol,
            }
            | SymbolState::Weak {
                object: winner_object,
                symbol: winner_symbol,
            } => {
                let winning = objects[*winner_object]
                    .symbol(*winner_symbol)
                    .expect("symtab indices always reference a real symbol");
                Ok(match winning.definition {
                    SymbolDefinition::Section(section_index) => self
                        .layout
                        .section_address(*winner_object, section_index)
                        .unwrap_or(0) as i64
                        + winning.value as i64,
                    SymbolDefinition::Absolute => winning.value as i64,
                    SymbolDefinition::Common | SymbolDefinition::Undefined => self
                        .layout
                        .common_symbol_addresses
                        .get(&entry.name)
                        .copied()
                        .unwrap_or(0) as i64,
                })
            }
            SymbolState::Common { .. } => Ok(self
                .layout
                .common_symbol_addresses
                .get(&symbol.name)
                .copied()
                .unwrap_or(0) as i64),
            SymbolState::DynamicExternal { .. } => {
                if self.config.static_link {
                    return Err(Error::StaticLinkRequiresDynamicSymbol {
                        symbol: symbol.name.clone(),
                    });
                }
                // A dynamic-external's "address" for a direct (non-PLT,
                // non-GOT) relocation is not resolvable at link time;
                // only GLOB_DAT/JUMP_SLOT (filled in at load time) and
                // PLT32 (routed through `L`) are valid against it.
                Ok(0)
            }
            SymbolState::Undefined => Err(Error::UndefinedSymbols(vec![(
                symbol.name.clone(),
                vec![object.name.clone()],
            )])),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn check_fits(
    computed: i64,
    width_bits: u8,
    signed: bool,
    symbol: &str,
    site: u64,
    s: i64,
    a: i64,
    p: i64,
    g: Option<u64>,
) -> Result<()> {
    let fits = match width_bits {
        64 => true,
        32 => {
            if signed {
                computed >= i32::MIN as i64 && computed <= i32::MAX as i64
            } else {
                computed >= 0 && computed <= u32::MAX as i64
            }
        }
        _ => true,
    };
    if fits {
        Ok(())
    } else {
        Err(Error::RelocationOverflow {
            symbol: symbol.to_string(),
            site,
            s,
            a,
            p,
            got: GotDiagnostic(g),
            computed,
            width: width_bits,
        })
    }
}
