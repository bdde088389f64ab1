//! Wires every stage together in sequence: parse (performed by the
//! caller, one [`ElfParser`][crate::object::ElfParser] per input) → merge
//! → resolve against libraries → plan GOT/PLT and dynamic sections →
//! assign addresses → build GOT/PLT and dynamic images → relocate →
//! write.
//!
//! Input objects are processed in exactly the order given — symbol
//! resolution tie-breaks depend on it — and nothing here is `Clone` or
//! stored behind a `static`; an embedder runs two links concurrently by
//! owning two [`LinkContext`]s, not by sharing one.

use std::path::Path;

use log::{debug, error};

use crate::config::LinkerConfig;
use crate::dynbuilder::{DynamicBuilder, DynamicPlan};
use crate::error::{Error, Result};
use crate::gotplt::{GotPltBuilder, GotPltPlan};
use crate::layout::{DynamicSectionSizes, MemoryLayout};
use crate::object::ParsedObject;
use crate::relocator::Relocator;
use crate::resolver::StaticTableResolver;
use crate::symtab::GlobalSymbolTable;
use crate::writer::{persist_executable, ElfWriter};

/// A symbol this link should treat as provided by a named shared
/// library, standing in for real archive/`.so` search (see
/// [`crate::resolver::LibraryResolver`]).
#[derive(Debug, Clone)]
pub struct LibraryRef {
    /// The symbol name the library provides.
    pub name: String,
    /// The library's short name, as it would appear in `DT_NEEDED`
    /// (e.g. `"libc.so.6"`).
    pub library: String,
}

impl LibraryRef {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
        }
    }
}

/// Orchestrates one link from already-parsed objects through to a
/// finished image.
pub struct LinkContext<'a> {
    objects: &'a [ParsedObject],
    config: &'a LinkerConfig,
}

impl<'a> LinkContext<'a> {
    /// Bind a context to one set of input objects and one configuration.
    pub fn new(objects: &'a [ParsedObject], config: &'a LinkerConfig) -> Self {
        Self { objects, config }
    }

    /// Run the full pipeline and return the finished image bytes.
    pub fn link(&self, libraries: &[LibraryRef]) -> Result<Vec<u8>> {
        if self.objects.is_empty() {
            return Err(Error::NoInputFiles);
        }

        debug!("merging symbols from {} object(s)", self.objects.len());
        let mut symtab = GlobalSymbolTable::merge(self.objects)?;

        let resolver = libraries
            .iter()
            .fold(StaticTableResolver::new(), |table, entry| {
                table.provide(entry.name.clone(), entry.library.clone())
            });
        debug!(
            "resolving undefined symbols against {} library mapping(s)",
            libraries.len()
        );
        symtab.resolve_with_library(&resolver)?;
        symtab.check_fully_resolved()?;

        if self.config.static_link {
            if let Some((name, _)) = symtab.dynamic_externals().first() {
                return Err(Error::StaticLinkRequiresDynamicSymbol {
                    symbol: name.to_string(),
                });
            }
        }

        debug!("planning GOT/PLT slots");
        let gotplt_plan = GotPltPlan::build(self.objects, &symtab);

        let needs_dynamic = DynamicBuilder::needed(&symtab, self.config.pie);
        let dynamic_plan = needs_dynamic.then(|| DynamicPlan::build(&symtab, &gotplt_plan));
        let dynamic_sizes = dynamic_plan
            .as_ref()
            .map(DynamicPlan::sizes)
            .unwrap_or_default();

        debug!("assigning virtual memory layout");
        let layout = MemoryLayout::build(
            self.objects,
            &symtab,
            &gotplt_plan,
            &dynamic_sizes,
            self.config,
        )?;

        let gotplt_image =
            GotPltBuilder::build(&gotplt_plan, &layout, layout.dynamic_address.unwrap_or(0));

        let dynamic_image = dynamic_plan
            .as_ref()
            .map(|plan_data| DynamicBuilder::build(plan_data, &gotplt_image, &gotplt_plan, &layout));

        debug!("applying relocations");
        let mut section_data: Vec<Vec<Vec<u8>>> = self
            .objects
            .iter()
            .map(|object| object.section_data.clone())
            .collect();
        let relocator = Relocator::new(&layout, &gotplt_image, &symtab, self.config);
        relocator.apply_all(self.objects, &mut section_data)?;

        debug!("writing output image");
        let writer = ElfWriter::new(
            &layout,
            &gotplt_image,
            dynamic_image.as_ref(),
            self.config,
            relocator.saw_relative(),
        );
        writer.write(self.objects, &section_data)
    }
}

/// Link `objects` against `libraries` under `config`, returning the
/// finished image bytes.
pub fn link(
    objects: &[ParsedObject],
    libraries: &[LibraryRef],
    config: &LinkerConfig,
) -> Result<Vec<u8>> {
    LinkContext::new(objects, config).link(libraries).map_err(|err| {
        error!("link failed: {err}");
        err
    })
}

/// Link `objects` against `libraries` under `config` and persist the
/// result to `out_path`, atomically and with the executable bit set.
/// Any failure — including one raised after the temporary file was
/// created — leaves no partial file at `out_path`.
pub fn link_to_file(
    objects: &[ParsedObject],
    libraries: &[LibraryRef],
    config: &LinkerConfig,
    out_path: &Path,
) -> Result<()> {
    let bytes = link(objects, libraries, config)?;
    persist_executable(out_path, &bytes).map_err(|err| {
        error!("writing `{}` failed: {err}", out_path.display());
        err
    })
}
