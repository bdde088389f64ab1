//! Emits the final ELF64 image: header, program headers, every segment's
//! bytes, the section-only payloads (`.dynsym`, `.dynstr`, `.rela.*`,
//! `.hash`, `.dynamic`, `.interp`), `.shstrtab`, and the section header
//! table.
//!
//! Grounded in the same two-pass shape every ELF writer in the pack uses:
//! first decide every offset and size, then stream bytes out in one pass
//! so nothing is written twice.

use std::io::{self, Write};

use crate::config::LinkerConfig;
use crate::dynbuilder::DynamicImage;
use crate::elf::header::{ElfHeader, ElfType, EM_X86_64, ELF_HEADER_SIZE};
use crate::elf::identification::ElfIdentification;
use crate::elf::program_header::ProgramHeader;
use crate::elf::section::{RawSectionHeader, SectionFlags, SectionType};
use crate::error::Result;
use crate::gotplt::GotPltImage;
use crate::layout::MemoryLayout;
use crate::object::ParsedObject;
use crate::strtab::StringTableBuilder;
use crate::traits::{HasWrittenSize, ToWriter};

/// One extra (non-`PT_LOAD`-described) section the writer must describe in
/// `.shstrtab`/the section header table: `.got`, `.plt`, `.dynsym`, etc.
struct ExtraSection<'a> {
    name: &'a str,
    section_type: SectionType,
    flags: SectionFlags,
    address: u64,
    data: &'a [u8],
    align: u64,
    entry_size: u64,
    link: u32,
    info: u32,
}

/// Builds the final ELF64 image bytes from every stage's output.
pub struct ElfWriter<'a> {
    layout: &'a MemoryLayout,
    gotplt: &'a GotPltImage,
    dynamic: Option<&'a DynamicImage>,
    config: &'a LinkerConfig,
    saw_relative: bool,
}

impl<'a> ElfWriter<'a> {
    /// Build a writer bound to one link's finished state. `dynamic` is
    /// `None` for a fully static link with no PLT/GOT/`.dynamic` section.
    /// `saw_relative` records whether the relocator applied any
    /// `R_X86_64_RELATIVE` relocation, which forces `ET_DYN` output even
    /// when `config.pie` wasn't set explicitly.
    pub fn new(
        layout: &'a MemoryLayout,
        gotplt: &'a GotPltImage,
        dynamic: Option<&'a DynamicImage>,
        config: &'a LinkerConfig,
        saw_relative: bool,
    ) -> Self {
        Self {
            layout,
            gotplt,
            dynamic,
            config,
            saw_relative,
        }
    }

    /// Render the complete output image, given every object's (already
    /// relocated) section bytes.
    pub fn write(&self, objects: &[ParsedObject], section_data: &[Vec<Vec<u8>>]) -> Result<Vec<u8>> {
        let mut file = vec![0u8; 0];

        // Every segment's reserved region is laid out by `MemoryLayout`;
        // the writer just has to place bytes at the offsets it already
        // computed. Grow the buffer once to the largest file offset any
        // segment occupies, then splat content in.
        let file_end = self
            .layout
            .segments
            .iter()
            .map(|s| s.file_offset + s.file_size)
            .max()
            .unwrap_or(0);
        file.resize(file_end as usize, 0);

        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if !section.is_alloc() || !section.occupies_file_space() {
                    continue;
                }
                let Some(vaddr) = self.layout.section_address(object_index, section_index) else {
                    continue;
                };
                let offset = self.layout.file_offset_of(vaddr) as usize;
                let bytes = &section_data[object_index][section_index];
                ensure_len(&mut file, offset + bytes.len());
                file[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }

        if let Some(code) = &self.layout.synthesized_start {
            let vaddr = self.layout.entry;
            let offset = self.layout.file_offset_of(vaddr) as usize;
            ensure_len(&mut file, offset + code.len());
            file[offset..offset + code.len()].copy_from_slice(code);
        }

        if let Some(got_addr) = self.layout.got_address {
            let offset = self.layout.file_offset_of(got_addr) as usize;
            ensure_len(&mut file, offset + self.gotplt.got_bytes.len());
            file[offset..offset + self.gotplt.got_bytes.len()].copy_from_slice(&self.gotplt.got_bytes);
        }
        if let Some(plt_addr) = self.layout.plt_address {
            let offset = self.layout.file_offset_of(plt_addr) as usize;
            ensure_len(&mut file, offset + self.gotplt.plt_bytes.len());
            file[offset..offset + self.gotplt.plt_bytes.len()].copy_from_slice(&self.gotplt.plt_bytes);
        }
        if let (Some(dyn_addr), Some(dynamic)) = (self.layout.dynamic_address, self.dynamic) {
            let mut buf = Vec::new();
            for entry in &dynamic.dynamic_entries {
                entry.to_writer(&mut buf).expect("writing to a Vec never fails");
            }
            let offset = self.layout.file_offset_of(dyn_addr) as usize;
            ensure_len(&mut file, offset + buf.len());
            file[offset..offset + buf.len()].copy_from_slice(&buf);
        }
        if let Some(interp_addr) = self.layout.interpreter_address {
            let mut bytes = self.config.interpreter.as_bytes().to_vec();
            bytes.push(0);
            let offset = self.layout.file_offset_of(interp_addr) as usize;
            ensure_len(&mut file, offset + bytes.len());
            file[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }

        // `.dynsym`/`.dynstr`/`.hash`/`.rela.*` each have a real mapped
        // address reserved by `MemoryLayout::build` (the dynamic loader
        // reaches them through `.dynamic`'s pointers, which must resolve
        // to valid runtime addresses), so they're placed the same way as
        // `.got`/`.plt`/`.dynamic` above rather than appended past the
        // mapped segments.
        let mut extras: Vec<ExtraSection> = Vec::new();
        if let Some(dynamic) = self.dynamic {
            if let Some(addr) = self.layout.dynsym_address {
                let offset = self.layout.file_offset_of(addr) as usize;
                ensure_len(&mut file, offset + dynamic.dynsym.len());
                file[offset..offset + dynamic.dynsym.len()].copy_from_slice(&dynamic.dynsym);
                extras.push(ExtraSection {
                    name: ".dynsym",
                    section_type: SectionType::DynSym,
                    flags: SectionFlags::ALLOC,
                    address: addr,
                    data: &dynamic.dynsym,
                    align: 8,
                    entry_size: 24,
                    link: 0, // patched to `.dynstr`'s index below
                    info: 1,
                });
            }
            if let Some(addr) = self.layout.dynstr_address {
                let offset = self.layout.file_offset_of(addr) as usize;
                ensure_len(&mut file, offset + dynamic.dynstr.len());
                file[offset..offset + dynamic.dynstr.len()].copy_from_slice(&dynamic.dynstr);
                extras.push(ExtraSection {
                    name: ".dynstr",
                    section_type: SectionType::StrTab,
                    flags: SectionFlags::ALLOC,
                    address: addr,
                    data: &dynamic.dynstr,
                    align: 1,
                    entry_size: 0,
                    link: 0,
                    info: 0,
                });
            }
            if let Some(addr) = self.layout.hash_address {
                let offset = self.layout.file_offset_of(addr) as usize;
                ensure_len(&mut file, offset + dynamic.hash.len());
                file[offset..offset + dynamic.hash.len()].copy_from_slice(&dynamic.hash);
                extras.push(ExtraSection {
                    name: ".hash",
                    section_type: SectionType::Hash,
                    flags: SectionFlags::ALLOC,
                    address: addr,
                    data: &dynamic.hash,
                    align: 8,
                    entry_size: 4,
                    link: 0,
                    info: 0,
                });
            }
            if let Some(addr) = self.layout.rela_dyn_address {
                let offset = self.layout.file_offset_of(addr) as usize;
                ensure_len(&mut file, offset + dynamic.rela_dyn.len());
                file[offset..offset + dynamic.rela_dyn.len()].copy_from_slice(&dynamic.rela_dyn);
                extras.push(ExtraSection {
                    name: ".rela.dyn",
                    section_type: SectionType::Rela,
                    flags: SectionFlags::ALLOC,
                    address: addr,
                    data: &dynamic.rela_dyn,
                    align: 8,
                    entry_size: 24,
                    link: 0,
                    info: 0,
                });
            }
            if let Some(addr) = self.layout.rela_plt_address {
                let offset = self.layout.file_offset_of(addr) as usize;
                ensure_len(&mut file, offset + dynamic.rela_plt.len());
                file[offset..offset + dynamic.rela_plt.len()].copy_from_slice(&dynamic.rela_plt);
                extras.push(ExtraSection {
                    name: ".rela.plt",
                    section_type: SectionType::Rela,
                    flags: SectionFlags::ALLOC,
                    address: addr,
                    data: &dynamic.rela_plt,
                    align: 8,
                    entry_size: 24,
                    link: 0,
                    info: 0,
                });
            }
        }

        // Build the section header table: the mandatory null entry, one
        // per allocated input section (deduplicated by name is not
        // attempted — every input section keeps its own header, same as a
        // non-merging linker), the synthetic extras above, then
        // `.shstrtab` itself.
        let mut shstrtab = StringTableBuilder::new();
        let mut section_headers = vec![RawSectionHeader::default()];

        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if !section.is_alloc() {
                    continue;
                }
                let name_offset = shstrtab.intern(&section.name);
                let address = self
                    .layout
                    .section_address(object_index, section_index)
                    .unwrap_or(0);
                let offset = if section.occupies_file_space() {
                    self.layout.file_offset_of(address)
                } else {
                    0
                };
                section_headers.push(RawSectionHeader {
                    name_offset,
                    section_type: section.raw_type,
                    flags: section.flags.bits(),
                    address,
                    offset,
                    size: section.size,
                    link: 0,
                    info: 0,
                    addr_align: section.addr_align.max(1),
                    entry_size: section.entry_size,
                });
            }
        }

        let extras_base_index = section_headers.len();
        let dynstr_index = extras.iter().position(|e| e.name == ".dynstr");
        for extra in &extras {
            let name_offset = shstrtab.intern(extra.name);
            let offset = self.layout.file_offset_of(extra.address);
            let link = if extra.name == ".dynsym" {
                dynstr_index
                    .map(|idx| (extras_base_index + idx) as u32)
                    .unwrap_or(0)
            } else {
                extra.link
            };
            section_headers.push(RawSectionHeader {
                name_offset,
                section_type: extra.section_type as u32,
                flags: extra.flags.bits(),
                address: extra.address,
                offset,
                size: extra.data.len() as u64,
                link,
                info: extra.info,
                addr_align: extra.align,
                entry_size: extra.entry_size,
            });
        }

        let shstrndx = section_headers.len() as u16;
        let shstrtab_name_offset = shstrtab.intern(".shstrtab");
        let shstrtab_bytes = shstrtab.into_bytes();
        let shstrtab_offset = round_up(file.len() as u64, 1);
        file.extend_from_slice(&shstrtab_bytes);
        section_headers.push(RawSectionHeader {
            name_offset: shstrtab_name_offset,
            section_type: SectionType::StrTab as u32,
            flags: 0,
            address: 0,
            offset: shstrtab_offset,
            size: shstrtab_bytes.len() as u64,
            link: 0,
            info: 0,
            addr_align: 1,
            entry_size: 0,
        });

        let shoff = round_up(file.len() as u64, 8);
        file.extend(std::iter::repeat(0u8).take((shoff - file.len() as u64) as usize));
        for header in &section_headers {
            header.to_writer(&mut file).expect("writing to a Vec never fails");
        }

        // Program headers: one per `PT_LOAD` segment plus the auxiliary
        // `PT_INTERP`/`PT_DYNAMIC` entries, written at the fixed offset
        // `MemoryLayout::build` already budgeted for.
        let dynamic_size = self
            .dynamic
            .map(|d| d.dynamic_entries.len() as u64 * 16)
            .unwrap_or(0);
        let interp_len = self.config.interpreter.len() as u64 + 1;
        let auxiliary = self.layout.auxiliary_program_headers(
            self.layout.interpreter_address,
            interp_len,
            dynamic_size,
        );

        let mut program_headers: Vec<ProgramHeader> =
            self.layout.segments.iter().map(|s| s.to_program_header()).collect();
        program_headers.extend(auxiliary);

        let phoff = ELF_HEADER_SIZE;
        let mut phdr_bytes = Vec::new();
        for header in &program_headers {
            header.to_writer(&mut phdr_bytes).expect("writing to a Vec never fails");
        }
        let phdr_end = phoff as usize + phdr_bytes.len();
        ensure_len(&mut file, phdr_end);
        file[phoff as usize..phdr_end].copy_from_slice(&phdr_bytes);

        let e_type = if self.config.pie || self.saw_relative {
            ElfType::Dynamic
        } else {
            ElfType::Executable
        };
        let header = ElfHeader {
            identification: ElfIdentification::default(),
            e_type,
            e_machine: EM_X86_64,
            e_version: 1,
            e_entry: self.layout.entry,
            e_phoff: phoff,
            e_shoff: shoff,
            e_flags: 0,
            e_ehsize: ELF_HEADER_SIZE as u16,
            e_phentsize: <ProgramHeader as HasWrittenSize>::SIZE as u16,
            e_phnum: program_headers.len() as u16,
            e_shentsize: <RawSectionHeader as HasWrittenSize>::SIZE as u16,
            e_shnum: section_headers.len() as u16,
            e_shstrndx: shstrndx,
        };
        let mut header_bytes = Vec::new();
        header.to_writer(&mut header_bytes).expect("writing to a Vec never fails");
        file[0..header_bytes.len()].copy_from_slice(&header_bytes);

        Ok(file)
    }
}

fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

/// Persist `bytes` to `path`, setting the executable bit on Unix and
/// cleaning up a partial file if the write itself fails midway.
pub fn persist_executable(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, bytes).map_err(|source| crate::error::Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("rld-tmp");
    let result = (|| -> io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        set_executable(&file)?;
        Ok(())
    })();

    match result {
        Ok(()) => std::fs::rename(&tmp_path, path),
        Err(err) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

#[cfg(unix)]
fn set_executable(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    file.set_permissions(perms)
}

#[cfg(not(unix))]
fn set_executable(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_handles_unaligned_and_unit_align() {
        assert_eq!(round_up(10, 8), 16);
        assert_eq!(round_up(16, 8), 16);
        assert_eq!(round_up(5, 1), 5);
    }

    #[test]
    fn ensure_len_only_grows() {
        let mut buf = vec![1, 2, 3];
        ensure_len(&mut buf, 2);
        assert_eq!(buf.len(), 3);
        ensure_len(&mut buf, 5);
        assert_eq!(buf.len(), 5);
    }
}
