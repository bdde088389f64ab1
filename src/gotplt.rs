//! GOT slot allocation and PLT stub synthesis.
//!
//! Split into two phases, mirroring the layout/relocation split: first
//! [`GotPltPlan::build`] scans every relocation to decide *how many*
//! slots and stubs are needed (consumed by
//! [`crate::layout::MemoryLayout`] to size the reserved regions), then
//! [`GotPltBuilder::build`] — run once addresses are known — produces
//! the actual bytes.

use std::collections::HashMap;

use crate::elf::relocation::RelocationType;
use crate::layout::MemoryLayout;
use crate::object::ParsedObject;
use crate::symtab::GlobalSymbolTable;

/// Number of reserved GOT slots before any symbol-specific entry: the
/// link-time `.dynamic` pointer, the link-map pointer, and the resolver
/// entry point.
pub const RESERVED_GOT_SLOTS: usize = 3;

/// Size in bytes of one PLT entry (including PLT0).
pub const PLT_ENTRY_SIZE: u64 = 16;

/// How many GOT slots and PLT stubs a link needs, decided purely from
/// which symbols are targeted by GOT-/PLT-requiring relocations — before
/// any address is known.
#[derive(Debug, Clone, Default)]
pub struct GotPltPlan {
    /// Symbols needing a GOT slot, in first-seen order.
    got_symbols: Vec<String>,
    /// Symbols needing a PLT stub (always dynamic-external functions),
    /// in first-seen order.
    plt_symbols: Vec<String>,
}

impl GotPltPlan {
    /// Scan every relocation across every object and collect the GOT/PLT
    /// symbol sets.
    pub fn build(objects: &[ParsedObject], symtab: &GlobalSymbolTable) -> Self {
        let mut got_seen = HashMap::new();
        let mut plt_seen = HashMap::new();
        let mut got_symbols = Vec::new();
        let mut plt_symbols = Vec::new();

        for object in objects {
            for relocation in &object.relocations {
                let Some(symbol) = object.symbol(relocation.symbol_index) else {
                    continue;
                };
                if symbol.name.is_empty() {
                    continue;
                }
                // Every object's local reference to the same global name
                // resolves through one merged entry, so GOT/PLT slots
                // are keyed by name, not by (object, symbol_index).
                let canonical = symbol.name.clone();

                // A PLT stub only makes sense for a call that actually
                // goes through the dynamic loader; a PLT32 relocation
                // against a symbol this link defines itself is just a
                // direct call and the relocator treats it as such.
                let is_dynamic_external = symtab
                    .get(&canonical)
                    .is_some_and(|entry| matches!(entry.state, crate::symtab::SymbolState::DynamicExternal { .. }));
                let wants_plt = relocation.reloc_type.requires_plt() && is_dynamic_external;

                // Every PLT stub needs its own GOT slot (the stub jumps
                // through it), independent of whether the relocation type
                // that triggered the stub also sets `requires_got`.
                if (relocation.reloc_type.requires_got() || wants_plt)
                    && !got_seen.contains_key(&canonical)
                {
                    got_seen.insert(canonical.clone(), got_symbols.len());
                    got_symbols.push(canonical.clone());
                }
                if wants_plt && !plt_seen.contains_key(&canonical) {
                    plt_seen.insert(canonical.clone(), plt_symbols.len());
                    plt_symbols.push(canonical);
                }
            }
        }

        Self {
            got_symbols,
            plt_symbols,
        }
    }

    /// Number of symbol-specific GOT slots this link needs (excluding the
    /// three reserved slots).
    pub fn got_slot_count(&self) -> usize {
        self.got_symbols.len()
    }

    /// Number of PLT stubs this link needs (excluding PLT0).
    pub fn plt_stub_count(&self) -> usize {
        self.plt_symbols.len()
    }

    /// Index assigned to `name`'s GOT slot, if one was planned. Index 0
    /// is the first *symbol* slot, i.e. [`RESERVED_GOT_SLOTS`] must still
    /// be added by the caller to get the absolute slot number.
    pub fn got_index(&self, name: &str) -> Option<usize> {
        self.got_symbols.iter().position(|n| n == name)
    }

    /// Index assigned to `name`'s PLT stub, if one was planned. Index 0
    /// is the first stub *after* PLT0.
    pub fn plt_index(&self, name: &str) -> Option<usize> {
        self.plt_symbols.iter().position(|n| n == name)
    }

    /// Symbols with a planned GOT slot, in slot order.
    pub fn got_symbols(&self) -> &[String] {
        &self.got_symbols
    }

    /// `true` if `name`'s GOT slot is the one a PLT stub jumps through
    /// (and so is initialized to the stub's lazy-binding entry point
    /// rather than left for the dynamic loader to bind via `GLOB_DAT`).
    pub fn is_plt_backed(&self, name: &str) -> bool {
        self.plt_index(name).is_some()
    }

    /// Symbols with a planned PLT stub, in stub order.
    pub fn plt_symbols(&self) -> &[String] {
        &self.plt_symbols
    }
}

/// The realized GOT and PLT contents, once [`MemoryLayout`] has assigned
/// addresses.
#[derive(Debug, Clone)]
pub struct GotPltImage {
    /// Raw `.got` bytes (8 bytes per slot, including the 3 reserved slots).
    pub got_bytes: Vec<u8>,
    /// Raw `.plt` bytes (16 bytes per stub, including PLT0).
    pub plt_bytes: Vec<u8>,
    /// `name -> absolute GOT slot address`, including symbol-specific slots.
    pub got_addresses: HashMap<String, u64>,
    /// `name -> absolute PLT stub address`.
    pub plt_addresses: HashMap<String, u64>,
}

/// Builds GOT/PLT byte contents from a [`GotPltPlan`] and a finished
/// [`MemoryLayout`].
pub struct GotPltBuilder;

impl GotPltBuilder {
    /// Emit `.got`/`.plt` bytes. `dynamic_address` fills reserved GOT
    /// slot 0 (the `.dynamic` pointer); slots 1 and 2 are left zero for
    /// the dynamic loader to fill at load time.
    pub fn build(plan: &GotPltPlan, layout: &MemoryLayout, dynamic_address: u64) -> GotPltImage {
        let got_base = layout.got_address.unwrap_or(0);
        let plt_base = layout.plt_address.unwrap_or(0);

        let mut got_bytes = vec![0u8; 8 * (RESERVED_GOT_SLOTS + plan.got_slot_count())];
        got_bytes[0..8].copy_from_slice(&dynamic_address.to_le_bytes());

        let mut got_addresses = HashMap::new();
        for (index, name) in plan.got_symbols.iter().enumerate() {
            let slot = RESERVED_GOT_SLOTS + index;
            got_addresses.insert(name.clone(), got_base + (slot as u64) * 8);
        }

        let stub_count = plan.plt_symbols.len();
        let mut plt_bytes = vec![0u8; (PLT_ENTRY_SIZE as usize) * (1 + stub_count)];
        // PLT0: push *GOT[1]; jmp *GOT[2]
        plt_bytes[0] = 0xFF; // push (indirect, via ModRM below)
        plt_bytes[1] = 0x35; // ModRM for push [rip+disp32], patched against GOT[1]
        let got1 = got_base + 8;
        let plt0_next = plt_base + 6;
        let push_disp = (got1 as i64 - plt0_next as i64) as i32;
        plt_bytes[2..6].copy_from_slice(&push_disp.to_le_bytes());
        plt_bytes[6] = 0xFF; // jmp (indirect)
        plt_bytes[7] = 0x25; // ModRM for jmp [rip+disp32], patched against GOT[2]
        let got2 = got_base + 16;
        let plt0_end = plt_base + 12;
        let jmp_disp = (got2 as i64 - plt0_end as i64) as i32;
        plt_bytes[8..12].copy_from_slice(&jmp_disp.to_le_bytes());
        // Remaining 4 bytes of PLT0 are padding (0x90 NOP, matching convention).
        plt_bytes[12..16].copy_from_slice(&[0x90, 0x90, 0x90, 0x90]);

        let mut plt_addresses = HashMap::new();
        for (index, name) in plan.plt_symbols.iter().enumerate() {
            let stub_offset = (PLT_ENTRY_SIZE as usize) * (1 + index);
            let stub_addr = plt_base + stub_offset as u64;
            plt_addresses.insert(name.clone(), stub_addr);

            let got_slot_addr = got_addresses
                .get(name)
                .copied()
                .expect("every PLT symbol is given a GOT slot during planning");

            // jmp *got_slot(%rip)            bytes  0..6
            plt_bytes[stub_offset] = 0xFF;
            plt_bytes[stub_offset + 1] = 0x25;
            let jmp_next = stub_addr + 6;
            let disp = (got_slot_addr as i64 - jmp_next as i64) as i32;
            plt_bytes[stub_offset + 2..stub_offset + 6].copy_from_slice(&disp.to_le_bytes());
            // push imm32 (the relocation index into .rela.plt)  bytes 6..11
            plt_bytes[stub_offset + 6] = 0x68;
            plt_bytes[stub_offset + 7..stub_offset + 11]
                .copy_from_slice(&(index as u32).to_le_bytes());
            // jmp PLT0 (rel32)                bytes 11..16
            plt_bytes[stub_offset + 11] = 0xE9;
            let jmp_plt0_next = stub_addr + 16;
            let rel = (plt_base as i64 - jmp_plt0_next as i64) as i32;
            plt_bytes[stub_offset + 12..stub_offset + 16].copy_from_slice(&rel.to_le_bytes());

            // Lazy binding: until the resolver runs, the GOT slot points
            // back at this stub's own `push`/`jmp PLT0` tail (the 11th
            // byte) instead of at the real symbol, so the first call
            // falls through into the resolver rather than jumping
            // nowhere.
            let slot_index = RESERVED_GOT_SLOTS
                + plan
                    .got_index(name)
                    .expect("every PLT symbol is given a GOT slot during planning");
            let slot_offset = slot_index * 8;
            let initial_target = stub_addr + 11;
            got_bytes[slot_offset..slot_offset + 8].copy_from_slice(&initial_target.to_le_bytes());
        }

        GotPltImage {
            got_bytes,
            plt_bytes,
            got_addresses,
            plt_addresses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_got_slots_are_always_present() {
        let plan = GotPltPlan::default();
        assert_eq!(plan.got_slot_count(), 0);
        assert_eq!(plan.plt_stub_count(), 0);
    }
}
