//! A static/dynamic linker for x86-64 ELF64 relocatable object files.
//!
//! [`ElfParser::parse`] turns each input object's bytes into a
//! [`ParsedObject`]; [`link`]/[`link_to_file`] drive the rest of the
//! pipeline — symbol merge, resolution against libraries, GOT/PLT and
//! dynamic-section planning, memory layout, relocation, and final image
//! emission — and return the linked bytes or persist them to a path.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, missing_docs)]

pub mod config;
pub mod dynbuilder;
pub mod elf;
pub mod error;
pub mod gotplt;
pub mod layout;
pub mod linker;
pub mod object;
pub mod primitives;
pub mod relocator;
pub mod resolver;
pub mod strtab;
pub mod symtab;
pub mod traits;
pub mod writer;

pub use config::LinkerConfig;
pub use error::{Error, Result};
pub use linker::{link, link_to_file, LibraryRef, LinkContext};
pub use object::{ElfParser, ParsedObject};
pub use resolver::{LibraryResolver, NullResolver, StaticTableResolver};
