//! Link-wide configuration, populated by the (out-of-scope) command-line
//! layer and consumed only by the core.

use typed_builder::TypedBuilder;

/// Default base virtual address for a non-PIE executable.
pub const DEFAULT_BASE_ADDRESS: u64 = 0x400000;

/// Default path to the host's dynamic loader, written into `PT_INTERP`.
pub const DEFAULT_INTERPRETER: &str = "/lib64/ld-linux-x86-64.so.2";

/// Default entry symbol name, consulted before falling back to `main`.
pub const DEFAULT_ENTRY_SYMBOL: &str = "_start";

/// Page size assumed for segment alignment throughout the layout and
/// writer stages.
pub const PAGE_SIZE: u64 = 0x1000;

#[derive(Debug, Clone, TypedBuilder)]
/// Configuration for a single link.
///
/// A plain builder-constructed value threaded through the pipeline rather
/// than a collection of loose function parameters or process-global state.
pub struct LinkerConfig {
    /// Base virtual address for the lowest `PT_LOAD` segment.
    #[builder(default = DEFAULT_BASE_ADDRESS)]
    pub base_address: u64,

    /// Name of the symbol to use as the entry point. Falls back to `main`
    /// (wrapped in a synthesized `_start`) if this name is undefined and
    /// equal to the default.
    #[builder(default = DEFAULT_ENTRY_SYMBOL.to_string(), setter(into))]
    pub entry_symbol: String,

    /// Path written into `PT_INTERP` when the output requires the dynamic
    /// loader.
    #[builder(default = DEFAULT_INTERPRETER.to_string(), setter(into))]
    pub interpreter: String,

    /// Disable dynamic linking. If any symbol would require the dynamic
    /// loader, the link fails with
    /// [`Error::StaticLinkRequiresDynamicSymbol`][crate::error::Error::StaticLinkRequiresDynamicSymbol].
    #[builder(default = false)]
    pub static_link: bool,

    /// Emit `ET_DYN` (position-independent executable) instead of
    /// `ET_EXEC`, even when no `R_X86_64_RELATIVE` relocation forces it.
    #[builder(default = false)]
    pub pie: bool,

    /// Ordered list of library search paths, consulted by the
    /// [`LibraryResolver`][crate::resolver::LibraryResolver].
    #[builder(default, setter(into))]
    pub library_search_paths: Vec<std::path::PathBuf>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
