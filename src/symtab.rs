//! The symbol resolution engine: merges every object's non-local symbols
//! into one [`GlobalSymbolTable`], applying the strong/weak/common
//! precedence rules, then lets a
//! [`LibraryResolver`][crate::resolver::LibraryResolver] fill in whatever
//! remains undefined.

use std::collections::HashMap;

use crate::elf::symbol::{SymbolBinding, SymbolDefinition, SymbolType};
use crate::error::{Error, Result};
use crate::object::ParsedObject;
use crate::resolver::LibraryResolver;

/// Where a global symbol's final definition comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolState {
    /// No definition has been seen for this name (yet).
    Undefined,
    /// A strong definition has not been seen, but a weak one has; this is
    /// tentative and may still be displaced by a strong definition.
    Weak {
        /// Index into the object list that provided the winning weak definition.
        object: usize,
        /// Index into that object's symbol table.
        symbol: u32,
    },
    /// A single strong (global, non-weak, non-common) definition won.
    Strong {
        /// Index into the object list that provided the definition.
        object: usize,
        /// Index into that object's symbol table.
        symbol: u32,
    },
    /// A common (tentative) definition is current; may be displaced by a
    /// strong definition or enlarged by a wider common symbol.
    Common {
        /// Size in bytes of the widest common symbol seen so far.
        size: u64,
        /// Alignment of the winning common symbol (for the tie-break rule).
        align: u64,
        /// Index into the object list that provided the winning common
        /// definition, kept so the `.bss` symbol can be attributed to it.
        object: usize,
        /// Index into that object's symbol table.
        symbol: u32,
    },
    /// Resolved by [`LibraryResolver`] to a name provided by a shared
    /// library; no local definition exists, but the symbol will appear in
    /// `.dynsym` and be referenced via `DT_NEEDED`.
    DynamicExternal {
        /// Short name of the shared library providing this symbol.
        library: String,
    },
}

/// One entry of the global symbol table: a name, its resolution state,
/// and enough provenance to produce a useful diagnostic if it never
/// resolves.
#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    /// The symbol's name.
    pub name: String,
    /// Current resolution state.
    pub state: SymbolState,
    /// Names of every object that held an undefined reference to this
    /// symbol, in first-seen order; used only to render
    /// [`Error::UndefinedSymbols`].
    pub referenced_by: Vec<String>,
}

impl GlobalSymbol {
    fn new(name: String) -> Self {
        Self {
            name,
            state: SymbolState::Undefined,
            referenced_by: Vec::new(),
        }
    }

    /// `true` if this name still has no definition of any kind.
    pub fn is_undefined(&self) -> bool {
        matches!(self.state, SymbolState::Undefined)
    }
}

/// The merged, name-keyed symbol table produced from every input object.
#[derive(Debug, Clone, Default)]
pub struct GlobalSymbolTable {
    entries: HashMap<String, GlobalSymbol>,
    /// Insertion order of names, preserved so later stages (layout,
    /// dynamic symbol table construction) iterate deterministically
    /// rather than in hash order.
    order: Vec<String>,
}

impl GlobalSymbolTable {
    /// Merge every object's non-local symbols, applying the
    /// strong/weak/common precedence table. Local symbols are never
    /// merged — they remain namespaced to their source object.
    pub fn merge(objects: &[ParsedObject]) -> Result<Self> {
        let mut table = Self::default();

        for (object_index, object) in objects.iter().enumerate() {
            for (symbol_index, symbol) in object.symbols.iter().enumerate() {
                if symbol.is_local() || symbol.name.is_empty() {
                    continue;
                }
                table.merge_one(objects, object_index, symbol_index as u32, symbol)?;
            }
        }

        Ok(table)
    }

    fn merge_one(
        &mut self,
        objects: &[ParsedObject],
        object_index: usize,
        symbol_index: u32,
        symbol: &crate::elf::symbol::Symbol,
    ) -> Result<()> {
        let object = &objects[object_index];
        let entry = self.entry(&symbol.name);

        if symbol.is_undefined() {
            if !entry.referenced_by.contains(&object.name) {
                entry.referenced_by.push(object.name.clone());
            }
            return Ok(());
        }

        let incoming_is_common = matches!(symbol.definition, SymbolDefinition::Common)
            || symbol.symbol_type == SymbolType::Common;
        let incoming_is_weak = symbol.binding == SymbolBinding::Weak;

        let new_state = if incoming_is_common {
            let size = symbol.size;
            let align = symbol.value.max(1);
            match &entry.state {
                SymbolState::Undefined | SymbolState::Weak { .. } => Some(SymbolState::Common {
                    size,
                    align,
                    object: object_index,
                    symbol: symbol_index,
                }),
                SymbolState::Common {
                    size: existing_size,
                    align: existing_align,
                    ..
                } => {
                    if size > *existing_size
                        || (size == *existing_size && align > *existing_align)
                    {
                        Some(SymbolState::Common {
                            size,
                            align,
                            object: object_index,
                            symbol: symbol_index,
                        })
                    } else {
                        None
                    }
                }
                SymbolState::Strong { .. } => None,
                SymbolState::DynamicExternal { .. } => Some(SymbolState::Common {
                    size,
                    align,
                    object: object_index,
                    symbol: symbol_index,
                }),
            }
        } else if incoming_is_weak {
            match &entry.state {
                SymbolState::Undefined => Some(SymbolState::Weak {
                    object: object_index,
                    symbol: symbol_index,
                }),
                _ => None,
            }
        } else {
            // Strong definition.
            match &entry.state {
                SymbolState::Undefined | SymbolState::Weak { .. } | SymbolState::Common { .. } => {
                    Some(SymbolState::Strong {
                        object: object_index,
                        symbol: symbol_index,
                    })
                }
                SymbolState::Strong {
                    object: first_object,
                    ..
                } => {
                    return Err(Error::MultipleDefinition {
                        symbol: symbol.name.clone(),
                        first: objects[*first_object].name.clone(),
                        second: object.name.clone(),
                    });
                }
                SymbolState::DynamicExternal { .. } => Some(SymbolState::Strong {
                    object: object_index,
                    symbol: symbol_index,
                }),
            }
        };

        if let Some(state) = new_state {
            self.entry(&symbol.name).state = state;
        }
        Ok(())
    }

    fn entry(&mut self, name: &str) -> &mut GlobalSymbol {
        if !self.entries.contains_key(name) {
            self.order.push(name.to_string());
            self.entries
                .insert(name.to_string(), GlobalSymbol::new(name.to_string()));
        }
        self.entries.get_mut(name).expect("just inserted")
    }

    /// Ask `resolver` to satisfy every name still [`SymbolState::Undefined`].
    /// Names the resolver cannot satisfy remain undefined; the caller is
    /// expected to call [`GlobalSymbolTable::check_fully_resolved`]
    /// afterwards.
    pub fn resolve_with_library<R: LibraryResolver>(&mut self, resolver: &R) -> Result<()> {
        let undefined_names: Vec<String> = self
            .order
            .iter()
            .filter(|name| self.entries[*name].is_undefined())
            .cloned()
            .collect();
        if undefined_names.is_empty() {
            return Ok(());
        }

        let satisfied = resolver.resolve(&undefined_names)?;
        for (name, library) in satisfied {
            if let Some(entry) = self.entries.get_mut(&name) {
                if entry.is_undefined() {
                    entry.state = SymbolState::DynamicExternal { library };
                }
            }
        }
        Ok(())
    }

    /// Fail the link if any name is still undefined after library
    /// resolution, naming every such symbol and every object that
    /// referenced it.
    pub fn check_fully_resolved(&self) -> Result<()> {
        let unresolved: Vec<(String, Vec<String>)> = self
            .order
            .iter()
            .filter_map(|name| {
                let entry = &self.entries[name];
                entry
                    .is_undefined()
                    .then(|| (entry.name.clone(), entry.referenced_by.clone()))
            })
            .collect();
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(Error::UndefinedSymbols(unresolved))
        }
    }

    /// Look up a resolved symbol by name.
    pub fn get(&self, name: &str) -> Option<&GlobalSymbol> {
        self.entries.get(name)
    }

    /// Iterate every global symbol in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &GlobalSymbol> {
        self.order.iter().map(move |name| &self.entries[name])
    }

    /// Every name currently in [`SymbolState::Common`] state, in
    /// first-seen order. Consumed by [`crate::layout::MemoryLayout`] to
    /// synthesize the merged `.bss` tail.
    pub fn common_symbols(&self) -> Vec<(&str, u64, u64)> {
        self.iter()
            .filter_map(|entry| match entry.state {
                SymbolState::Common { size, align, .. } => Some((entry.name.as_str(), size, align)),
                _ => None,
            })
            .collect()
    }

    /// Every name resolved as [`SymbolState::DynamicExternal`], in
    /// first-seen order, paired with the providing library.
    pub fn dynamic_externals(&self) -> Vec<(&str, &str)> {
        self.iter()
            .filter_map(|entry| match &entry.state {
                SymbolState::DynamicExternal { library } => {
                    Some((entry.name.as_str(), library.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::symbol::{Symbol, SymbolBinding, SymbolDefinition, SymbolType};

    fn obj(name: &str, symbols: Vec<Symbol>) -> ParsedObject {
        ParsedObject {
            name: name.to_string(),
            header: crate::elf::header::ElfHeader {
                identification: crate::elf::identification::ElfIdentification::default(),
                e_type: crate::elf::header::ElfType::Relocatable,
                e_machine: crate::elf::header::EM_X86_64,
                e_version: 1,
                e_entry: 0,
                e_phoff: 0,
                e_shoff: 0,
                e_flags: 0,
                e_ehsize: 64,
                e_phentsize: 0,
                e_phnum: 0,
                e_shentsize: 0,
                e_shnum: 0,
                e_shstrndx: 0,
            },
            sections: Vec::new(),
            section_data: Vec::new(),
            symbols,
            relocations: Vec::new(),
        }
    }

    fn sym(name: &str, binding: SymbolBinding, definition: SymbolDefinition) -> Symbol {
        Symbol {
            name: name.to_string(),
            binding,
            symbol_type: SymbolType::Func,
            other: 0,
            definition,
            value: 0,
            size: 0,
        }
    }

    #[test]
    fn strong_wins_over_weak() {
        let a = obj(
            "a.o",
            vec![sym("foo", SymbolBinding::Weak, SymbolDefinition::Section(1))],
        );
        let b = obj(
            "b.o",
            vec![sym(
                "foo",
                SymbolBinding::Global,
                SymbolDefinition::Section(1),
            )],
        );
        let table = GlobalSymbolTable::merge(&[a, b]).unwrap();
        assert!(matches!(
            table.get("foo").unwrap().state,
            SymbolState::Strong { object: 1, .. }
        ));
    }

    #[test]
    fn two_strong_definitions_error() {
        let a = obj(
            "a.o",
            vec![sym(
                "bar",
                SymbolBinding::Global,
                SymbolDefinition::Section(1),
            )],
        );
        let b = obj(
            "b.o",
            vec![sym(
                "bar",
                SymbolBinding::Global,
                SymbolDefinition::Section(1),
            )],
        );
        let err = GlobalSymbolTable::merge(&[a, b]).unwrap_err();
        assert!(matches!(err, Error::MultipleDefinition { .. }));
    }

    #[test]
    fn common_symbols_take_the_larger_size() {
        let mut s1 = sym("buf", SymbolBinding::Global, SymbolDefinition::Common);
        s1.symbol_type = SymbolType::Common;
        s1.size = 4;
        s1.value = 4;
        let mut s2 = sym("buf", SymbolBinding::Global, SymbolDefinition::Common);
        s2.symbol_type = SymbolType::Common;
        s2.size = 16;
        s2.value = 16;
        let a = obj("a.o", vec![s1]);
        let b = obj("b.o", vec![s2]);
        let table = GlobalSymbolTable::merge(&[a, b]).unwrap();
        let commons = table.common_symbols();
        assert_eq!(commons, vec![("buf", 16, 16)]);
    }

    #[test]
    fn undefined_after_merge_is_reported_with_referrers() {
        let a = obj(
            "a.o",
            vec![sym(
                "missing",
                SymbolBinding::Global,
                SymbolDefinition::Undefined,
            )],
        );
        let table = GlobalSymbolTable::merge(&[a]).unwrap();
        let err = table.check_fully_resolved().unwrap_err();
        match err {
            Error::UndefinedSymbols(v) => {
                assert_eq!(v.len(), 1);
                assert_eq!(v[0].0, "missing");
                assert_eq!(v[0].1, vec!["a.o".to_string()]);
            }
            _ => panic!("expected UndefinedSymbols"),
        }
    }
}
