//! Abstraction over how still-undefined symbols get satisfied by library
//! code once every input object has been merged.
//!
//! The core pipeline never reads a filesystem path itself beyond opening
//! the input objects it was given; archive and shared-library discovery
//! goes through this trait so embedders can swap in a search-path-aware
//! implementation or, in tests, a fixed table.

use std::collections::HashMap;

use crate::error::Result;

/// Resolves a batch of still-undefined symbol names to the libraries that
/// provide them.
///
/// Per the archive member selection rule, once a resolver reports that a
/// name is available from a library, every other symbol contributed by
/// the same archive member is expected to be pulled in too — this
/// linker includes whole members rather than tracking per-symbol
/// extraction, so implementations should treat "provides one symbol"
/// and "provides all symbols in that member" as the same event.
pub trait LibraryResolver {
    /// Attempt to resolve each name in `undefined`. Returns `(name,
    /// library short name)` pairs for every name that could be
    /// satisfied; names with no match are simply omitted, not erred on —
    /// the caller decides whether any remaining gap is fatal.
    fn resolve(&self, undefined: &[String]) -> Result<Vec<(String, String)>>;
}

/// A resolver backed by a fixed `name -> library` table, standing in for
/// real archive/`.so` discovery. Useful for embedding scenarios and
/// tests where the set of externally-provided symbols is known ahead of
/// time, and for exercising the "include whole member" rule: every name
/// mapped to the same library is resolved together.
#[derive(Debug, Clone, Default)]
pub struct StaticTableResolver {
    table: HashMap<String, String>,
}

impl StaticTableResolver {
    /// An empty resolver: nothing is ever resolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that `library` provides `name`.
    pub fn provide(mut self, name: impl Into<String>, library: impl Into<String>) -> Self {
        self.table.insert(name.into(), library.into());
        self
    }
}

impl LibraryResolver for StaticTableResolver {
    fn resolve(&self, undefined: &[String]) -> Result<Vec<(String, String)>> {
        Ok(undefined
            .iter()
            .filter_map(|name| {
                self.table
                    .get(name)
                    .map(|library| (name.clone(), library.clone()))
            })
            .collect())
    }
}

/// A resolver that never resolves anything — the default for a link that
/// provides no libraries, equivalent to static linking against nothing
/// but the input objects themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl LibraryResolver for NullResolver {
    fn resolve(&self, _undefined: &[String]) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_resolves_known_names_only() {
        let resolver = StaticTableResolver::new()
            .provide("printf", "libc.so.6")
            .provide("malloc", "libc.so.6");
        let resolved = resolver
            .resolve(&["printf".to_string(), "unknown_symbol".to_string()])
            .unwrap();
        assert_eq!(resolved, vec![("printf".to_string(), "libc.so.6".to_string())]);
    }

    #[test]
    fn null_resolver_resolves_nothing() {
        let resolved = NullResolver.resolve(&["foo".to_string()]).unwrap();
        assert!(resolved.is_empty());
    }
}
