//! Extraction of every ELF structure this crate models from a byte buffer
//! mapping the whole file.
//!
//! Before every dereference of a computed offset, the required end offset is
//! compared against the buffer size; failures surface as [ReadError] naming
//! the decoded field, never as a silent truncation. Iteration order follows
//! the file: dynamic entries, program headers and section headers come back
//! in file order.

use crate::codec;
use crate::elf::dynamic::{DynamicEntry, DynamicSection, DynamicTag};
use crate::elf::file_header::{FileHeader, FILE_HEADER_SIZE_32, FILE_HEADER_SIZE_64};
use crate::elf::got::GlobalOffsetTable;
use crate::elf::gnu_hash::GnuHashTable;
use crate::elf::headers::{FileAllHeaders, ProgramHeaderTable};
use crate::elf::ident::{Class, DataFormat, Ident, ELF_MAGIC, IDENT_SIZE};
use crate::elf::interp::ProgramInterpreterSection;
use crate::elf::note::{NoteSection, NoteSectionTable};
use crate::elf::program_header::ProgramHeader;
use crate::elf::section_header::{SectionHeader, SectionType};
use crate::elf::string_table::StringTable;
use crate::elf::symbol_table::{PartialSymbolTable, PartialSymbolTableEntry};
use crate::elf::writer_file::FileWriterFile;
use crate::error::{ReadError, StringTableError};
use num_traits::FromPrimitive;

type Result<T> = std::result::Result<T, ReadError>;

/// Size in bytes of a program header table entry, per class
pub fn program_header_entry_size(class: Class) -> u64 {
    match class {
        Class::Class64 => 56,
        _ => 32,
    }
}

/// Size in bytes of a section header table entry, per class
pub fn section_header_entry_size(class: Class) -> u64 {
    match class {
        Class::Class64 => 64,
        _ => 40,
    }
}

/// Size in bytes of a symbol table entry, per class
pub fn symbol_table_entry_size(class: Class) -> u64 {
    match class {
        Class::Class64 => 24,
        _ => 16,
    }
}

fn check_size(map: &[u8], required: u64, what: &'static str) -> Result<()> {
    if required > map.len() as u64 {
        return Err(ReadError::FileTooSmall {
            what,
            required,
            available: map.len() as u64,
        });
    }
    Ok(())
}

/// Extract the identification bytes
///
/// Only truncation is an error here; an unrecognised class, data format or
/// OS ABI comes back as a non-valid [Ident] so callers can answer "is this
/// an ELF file" without failing.
pub fn extract_ident(map: &[u8]) -> Result<Ident> {
    check_size(map, IDENT_SIZE as u64, "identification bytes")?;

    Ok(Ident {
        has_valid_elf_magic: map[..4] == ELF_MAGIC,
        class: Class::from_u8(map[4]).unwrap_or(Class::None),
        data_format: DataFormat::from_u8(map[5]).unwrap_or(DataFormat::None),
        version: map[6],
        os_abi: map[7],
        abi_version: map[8],
    })
}

/// Extract the file header, dispatching on the identification bytes to the
/// 52-byte or 64-byte layout
pub fn extract_file_header(map: &[u8]) -> Result<FileHeader> {
    let ident = extract_ident(map)?;
    if !ident.is_valid() {
        return Err(ReadError::InvalidMagicType);
    }

    let header_size = match ident.class {
        Class::Class64 => FILE_HEADER_SIZE_64,
        _ => FILE_HEADER_SIZE_32,
    };
    check_size(map, u64::from(header_size), "file header")?;

    let format = ident.data_format;
    let n = ident.class.n_word_size() as usize;
    let mut offset = IDENT_SIZE;

    let object_file_type = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let machine = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let version = codec::get_word(&map[offset..], format);
    offset += 4;
    let entry = codec::get_address(&map[offset..], ident);
    offset += n;
    let phoff = codec::get_offset(&map[offset..], ident);
    offset += n;
    let shoff = codec::get_offset(&map[offset..], ident);
    offset += n;
    let flags = codec::get_word(&map[offset..], format);
    offset += 4;
    let ehsize = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let phentsize = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let phnum = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let shentsize = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let shnum = codec::get_half_word(&map[offset..], format);
    offset += 2;
    let shstrndx = codec::get_half_word(&map[offset..], format);

    Ok(FileHeader {
        ident,
        object_file_type,
        machine,
        version,
        entry,
        phoff,
        shoff,
        flags,
        ehsize,
        phentsize,
        phnum,
        shentsize,
        shnum,
        shstrndx,
    })
}

fn extract_program_header_at(map: &[u8], file_header: &FileHeader, offset: usize) -> ProgramHeader {
    let ident = file_header.ident;
    let format = ident.data_format;
    let entry = &map[offset..];

    match ident.class {
        Class::Class64 => ProgramHeader {
            segment_type: codec::get_word(entry, format),
            flags: codec::get_word(&entry[4..], format),
            offset: codec::get_offset(&entry[8..], ident),
            vaddr: codec::get_address(&entry[16..], ident),
            paddr: codec::get_address(&entry[24..], ident),
            filesz: codec::get_n_word(&entry[32..], ident),
            memsz: codec::get_n_word(&entry[40..], ident),
            align: codec::get_n_word(&entry[48..], ident),
        },
        _ => ProgramHeader {
            segment_type: codec::get_word(entry, format),
            offset: codec::get_offset(&entry[4..], ident),
            vaddr: codec::get_address(&entry[8..], ident),
            paddr: codec::get_address(&entry[12..], ident),
            filesz: codec::get_n_word(&entry[16..], ident),
            memsz: codec::get_n_word(&entry[20..], ident),
            flags: codec::get_word(&entry[24..], format),
            align: codec::get_n_word(&entry[28..], ident),
        },
    }
}

/// Extract the whole program header table, in file order
pub fn extract_all_program_headers(
    map: &[u8],
    file_header: &FileHeader,
) -> Result<ProgramHeaderTable> {
    let entry_size = u64::from(file_header.phentsize);
    let minimum = program_header_entry_size(file_header.ident.class);
    if entry_size < minimum {
        return Err(ReadError::UnexpectedEntrySize {
            what: "program header table",
            expected: minimum,
            actual: entry_size,
        });
    }
    check_size(
        map,
        file_header.phoff + u64::from(file_header.phnum) * entry_size,
        "program header table",
    )?;

    let mut table = ProgramHeaderTable::default();
    for i in 0..u64::from(file_header.phnum) {
        let offset = (file_header.phoff + i * entry_size) as usize;
        table.add_header_from_file(extract_program_header_at(map, file_header, offset));
    }
    Ok(table)
}

fn extract_section_header_at(map: &[u8], file_header: &FileHeader, offset: usize) -> SectionHeader {
    let ident = file_header.ident;
    let format = ident.data_format;
    let entry = &map[offset..];

    match ident.class {
        Class::Class64 => SectionHeader {
            name: String::new(),
            name_index: codec::get_word(entry, format),
            section_type: codec::get_word(&entry[4..], format),
            flags: codec::get_n_word(&entry[8..], ident),
            addr: codec::get_address(&entry[16..], ident),
            offset: codec::get_offset(&entry[24..], ident),
            size: codec::get_n_word(&entry[32..], ident),
            link: codec::get_word(&entry[40..], format),
            info: codec::get_word(&entry[44..], format),
            addralign: codec::get_n_word(&entry[48..], ident),
            entsize: codec::get_n_word(&entry[56..], ident),
        },
        _ => SectionHeader {
            name: String::new(),
            name_index: codec::get_word(entry, format),
            section_type: codec::get_word(&entry[4..], format),
            flags: codec::get_n_word(&entry[8..], ident),
            addr: codec::get_address(&entry[12..], ident),
            offset: codec::get_offset(&entry[16..], ident),
            size: codec::get_n_word(&entry[20..], ident),
            link: codec::get_word(&entry[24..], format),
            info: codec::get_word(&entry[28..], format),
            addralign: codec::get_n_word(&entry[32..], ident),
            entsize: codec::get_n_word(&entry[36..], ident),
        },
    }
}

/// Extract the whole section header table, in file order, with names
/// resolved through the section name string table
pub fn extract_all_section_headers(
    map: &[u8],
    file_header: &FileHeader,
) -> Result<Vec<SectionHeader>> {
    let entry_size = u64::from(file_header.shentsize);
    let minimum = section_header_entry_size(file_header.ident.class);
    if file_header.shnum > 0 && entry_size < minimum {
        return Err(ReadError::UnexpectedEntrySize {
            what: "section header table",
            expected: minimum,
            actual: entry_size,
        });
    }
    check_size(
        map,
        file_header.shoff + u64::from(file_header.shnum) * entry_size,
        "section header table",
    )?;

    let mut table = Vec::with_capacity(usize::from(file_header.shnum));
    for i in 0..u64::from(file_header.shnum) {
        let offset = (file_header.shoff + i * entry_size) as usize;
        table.push(extract_section_header_at(map, file_header, offset));
    }

    if file_header.shstrndx != 0 {
        if usize::from(file_header.shstrndx) >= table.len() {
            return Err(ReadError::SectionLinkOutOfRange {
                name: ".shstrtab".to_string(),
                link: u32::from(file_header.shstrndx),
                count: file_header.shnum,
            });
        }
        let names_header = table[usize::from(file_header.shstrndx)].clone();
        check_size(map, names_header.file_offset_end(), "section name string table")?;
        let names =
            &map[names_header.offset as usize..(names_header.offset + names_header.size) as usize];

        for header in &mut table {
            let index = header.name_index as usize;
            if index >= names.len() {
                return Err(ReadError::StringTable(StringTableError::IndexOutOfBounds {
                    index: index as u64,
                    size: names.len() as u64,
                }));
            }
            header.name = codec::get_null_terminated_string(&names[index..]).ok_or(
                ReadError::NotNullTerminatedString {
                    offset: names_header.offset + index as u64,
                },
            )?;
        }
    }

    for header in &table {
        if header.link_is_section_index() && header.link as usize >= table.len() {
            return Err(ReadError::SectionLinkOutOfRange {
                name: header.name.clone(),
                link: header.link,
                count: file_header.shnum,
            });
        }
    }

    Ok(table)
}

/// Find the dynamic section header in `table`
pub fn find_dynamic_section_header(table: &[SectionHeader]) -> Option<&SectionHeader> {
    table.iter().find(|h| h.is_dynamic_section_header())
}

/// Extract the dynamic section with its embedded string table
///
/// The `.dynamic` section is located by name and type; its `link` field
/// references the `.dynstr` section, whose bytes are copied into the
/// returned section.
pub fn extract_dynamic_section(
    map: &[u8],
    file_header: &FileHeader,
    section_header_table: &[SectionHeader],
) -> Result<DynamicSection> {
    let header =
        find_dynamic_section_header(section_header_table).ok_or(ReadError::DynamicSectionRead {
            reason: "file has no .dynamic section".to_string(),
        })?;

    check_size(map, header.file_offset_end(), "dynamic section")?;

    let ident = file_header.ident;
    let entry_size = 2 * ident.class.n_word_size();
    let count = header.size / entry_size;

    let mut section = DynamicSection::default();
    let mut saw_null_entry = false;
    for i in 0..count {
        let offset = (header.offset + i * entry_size) as usize;
        let entry = DynamicEntry {
            tag: codec::get_signed_n_word(&map[offset..], ident),
            val_or_ptr: codec::get_n_word(&map[offset + ident.class.n_word_size() as usize..], ident),
        };
        saw_null_entry = saw_null_entry || entry.is_null();
        section.add_entry_from_file(entry);
    }
    if !saw_null_entry {
        return Err(ReadError::DynamicSectionRead {
            reason: "missing Null terminator entry".to_string(),
        });
    }

    let string_table_header = section_header_table
        .get(header.link as usize)
        .filter(|h| h.section_type() == SectionType::StringTable)
        .ok_or(ReadError::DynamicSectionRead {
            reason: format!(
                "link {} does not reference a string table section",
                header.link
            ),
        })?;
    check_size(
        map,
        string_table_header.file_offset_end(),
        "dynamic string table",
    )?;
    let bytes = &map[string_table_header.offset as usize
        ..(string_table_header.offset + string_table_header.size) as usize];
    section.set_string_table_from_file(StringTable::from_bytes(bytes)?);

    for entry in section.entries().iter().take_while(|e| !e.is_null()) {
        let references_string = matches!(
            entry.tag_type(),
            DynamicTag::Needed | DynamicTag::SoName | DynamicTag::RPath | DynamicTag::Runpath
        );
        if references_string && !section.string_table().index_is_valid(entry.val_or_ptr) {
            return Err(ReadError::StringTable(StringTableError::IndexOutOfBounds {
                index: entry.val_or_ptr,
                size: section.string_table().byte_count(),
            }));
        }
    }

    Ok(section)
}

/// Extract the section-association entries of the first symbol table
/// section of `section_type` (SymbolTable for `.symtab`, DynSym for
/// `.dynsym`)
///
/// A file without such a section yields an empty table.
pub fn extract_partial_symbol_table(
    map: &[u8],
    file_header: &FileHeader,
    section_header_table: &[SectionHeader],
    section_type: SectionType,
) -> Result<PartialSymbolTable> {
    let header = match section_header_table
        .iter()
        .find(|h| h.section_type() == section_type)
    {
        Some(header) => header,
        None => return Ok(PartialSymbolTable::default()),
    };

    let class = file_header.ident.class;
    let minimum = symbol_table_entry_size(class);
    let entry_size = if header.entsize > 0 { header.entsize } else { minimum };
    if entry_size < minimum {
        return Err(ReadError::UnexpectedEntrySize {
            what: "symbol table",
            expected: minimum,
            actual: entry_size,
        });
    }
    check_size(map, header.file_offset_end(), "symbol table")?;

    let ident = file_header.ident;
    let format = ident.data_format;
    let mut table = PartialSymbolTable::default();

    for i in 0..header.size / entry_size {
        let offset = header.offset + i * entry_size;
        let entry_bytes = &map[offset as usize..];

        let entry = match class {
            Class::Class64 => PartialSymbolTableEntry {
                file_map_offset: offset,
                name: codec::get_word(entry_bytes, format),
                info: entry_bytes[4],
                other: entry_bytes[5],
                shndx: codec::get_half_word(&entry_bytes[6..], format),
                value: codec::get_address(&entry_bytes[8..], ident),
                size: codec::get_n_word(&entry_bytes[16..], ident),
            },
            _ => PartialSymbolTableEntry {
                file_map_offset: offset,
                name: codec::get_word(entry_bytes, format),
                value: codec::get_address(&entry_bytes[4..], ident),
                size: codec::get_n_word(&entry_bytes[8..], ident),
                info: entry_bytes[12],
                other: entry_bytes[13],
                shndx: codec::get_half_word(&entry_bytes[14..], format),
            },
        };

        if entry.is_section_association()
            && usize::from(entry.shndx) < section_header_table.len()
        {
            table.add_entry_from_file(entry);
        }
    }

    Ok(table)
}

/// Extract a global offset table (`.got` or `.got.plt`) described by
/// `header`
pub fn extract_global_offset_table(
    map: &[u8],
    file_header: &FileHeader,
    header: &SectionHeader,
) -> Result<GlobalOffsetTable> {
    check_size(map, header.file_offset_end(), "global offset table")?;

    let ident = file_header.ident;
    let entry_size = ident.class.n_word_size();
    let mut table = GlobalOffsetTable::default();
    for i in 0..header.size / entry_size {
        let offset = (header.offset + i * entry_size) as usize;
        table.add_entry_from_file(codec::get_address(&map[offset..], ident));
    }
    Ok(table)
}

/// Extract the GNU hash table described by `header`
pub fn extract_gnu_hash_table(
    map: &[u8],
    file_header: &FileHeader,
    header: &SectionHeader,
) -> Result<GnuHashTable> {
    check_size(map, header.file_offset_end(), "GNU hash table")?;
    if header.size < 16 {
        return Err(ReadError::GnuHashTableRead {
            reason: format!("section is only {} bytes", header.size),
        });
    }

    let ident = file_header.ident;
    let format = ident.data_format;
    let base = header.offset as usize;
    let bucket_count = codec::get_word(&map[base..], format);
    let symoffset = codec::get_word(&map[base + 4..], format);
    let bloom_size = codec::get_word(&map[base + 8..], format);
    let bloom_shift = codec::get_word(&map[base + 12..], format);

    let n = ident.class.n_word_size();
    let fixed = 16 + u64::from(bloom_size) * n + u64::from(bucket_count) * 4;
    if fixed > header.size || (header.size - fixed) % 4 != 0 {
        return Err(ReadError::GnuHashTableRead {
            reason: format!(
                "{} bloom words and {} buckets do not fit a {} byte section",
                bloom_size, bucket_count, header.size
            ),
        });
    }
    let chain_count = (header.size - fixed) / 4;

    let mut table = GnuHashTable {
        symoffset,
        bloom_shift,
        bloom: Vec::with_capacity(bloom_size as usize),
        buckets: Vec::with_capacity(bucket_count as usize),
        chain: Vec::with_capacity(chain_count as usize),
    };

    let mut offset = base + 16;
    for _ in 0..bloom_size {
        table.bloom.push(codec::get_n_word(&map[offset..], ident));
        offset += n as usize;
    }
    for _ in 0..bucket_count {
        table.buckets.push(codec::get_word(&map[offset..], format));
        offset += 4;
    }
    for _ in 0..chain_count {
        table.chain.push(codec::get_word(&map[offset..], format));
        offset += 4;
    }

    Ok(table)
}

/// Extract the program interpreter section described by `header`
pub fn extract_program_interpreter_section(
    map: &[u8],
    header: &SectionHeader,
) -> Result<ProgramInterpreterSection> {
    check_size(map, header.file_offset_end(), "program interpreter section")?;

    let bytes = &map[header.offset as usize..(header.offset + header.size) as usize];
    let path = codec::get_null_terminated_string(bytes).ok_or(
        ReadError::NotNullTerminatedString {
            offset: header.offset,
        },
    )?;
    Ok(ProgramInterpreterSection { path })
}

/// Extract every note section, in file order
pub fn extract_note_section_table(
    map: &[u8],
    file_header: &FileHeader,
    section_header_table: &[SectionHeader],
) -> Result<NoteSectionTable> {
    let format = file_header.ident.data_format;
    let mut table = NoteSectionTable::default();

    for header in section_header_table
        .iter()
        .filter(|h| h.is_note_section_header())
    {
        check_size(map, header.file_offset_end(), "note section")?;
        if header.size < 12 {
            return Err(ReadError::NoteSectionRead {
                name: header.name.clone(),
                reason: format!("section is only {} bytes", header.size),
            });
        }

        let base = header.offset as usize;
        let name_size = codec::get_word(&map[base..], format);
        let description_size = codec::get_word(&map[base + 4..], format);
        let note_type = codec::get_word(&map[base + 8..], format);

        if name_size == 0 || u64::from(name_size) > header.size - 12 {
            return Err(ReadError::NoteSectionRead {
                name: header.name.clone(),
                reason: format!("name size {} does not fit the section", name_size),
            });
        }
        let name_bytes = &map[base + 12..base + 12 + name_size as usize];
        if name_bytes[name_bytes.len() - 1] != 0 {
            return Err(ReadError::NoteSectionRead {
                name: header.name.clone(),
                reason: "name is not null terminated".to_string(),
            });
        }
        let name = String::from_utf8_lossy(&name_bytes[..name_bytes.len() - 1]).into_owned();

        let mut section = NoteSection {
            name,
            description_size,
            note_type,
            description: Vec::new(),
        };
        let description_words = u64::from(description_size).next_multiple_of(4) / 4;
        let description_offset = base + 12 + section.padded_name_size() as usize;

        for i in 0..description_words as usize {
            let offset = description_offset + i * 4;
            if offset + 4 > (header.offset + header.size) as usize {
                return Err(ReadError::NoteSectionRead {
                    name: header.name.clone(),
                    reason: format!(
                        "description of {} bytes does not fit the section",
                        description_size
                    ),
                });
            }
            section.description.push(codec::get_word(&map[offset..], format));
        }

        if section.byte_count() != header.size {
            return Err(ReadError::NoteSectionRead {
                name: header.name.clone(),
                reason: format!(
                    "decoded note is {} bytes but the section declares {}",
                    section.byte_count(),
                    header.size
                ),
            });
        }

        table.add_section_from_file(header.clone(), section);
    }

    Ok(table)
}

/// Extract everything [FileWriterFile] needs from a buffer mapping a whole
/// file
///
/// The file must be an executable or a shared library and must have a
/// dynamic section; those are the only files the editor accepts.
pub fn extract_file_writer_file(map: &[u8]) -> Result<FileWriterFile> {
    let file_header = extract_file_header(map)?;
    if !file_header.seems_valid() {
        return Err(ReadError::NotAnExecutableOrSharedLibrary);
    }

    let program_headers = extract_all_program_headers(map, &file_header)?;
    let section_headers = extract_all_section_headers(map, &file_header)?;

    let mut headers = FileAllHeaders::default();
    headers.set_file_header(file_header);
    headers.set_program_header_table(program_headers);
    headers.set_section_header_table(section_headers);

    if !headers.contains_dynamic_section_header()
        || !headers.program_header_table().contains_dynamic_program_header()
        || !headers.contains_dynamic_string_table_section_header()
    {
        return Err(ReadError::DynamicSectionRead {
            reason: "file has no complete dynamic section".to_string(),
        });
    }

    let dynamic_section =
        extract_dynamic_section(map, headers.file_header(), headers.section_header_table())?;
    let symtab = extract_partial_symbol_table(
        map,
        headers.file_header(),
        headers.section_header_table(),
        SectionType::SymbolTable,
    )?;
    let dynsym = extract_partial_symbol_table(
        map,
        headers.file_header(),
        headers.section_header_table(),
        SectionType::DynSym,
    )?;

    let got = if headers.contains_got_section_header() {
        extract_global_offset_table(map, headers.file_header(), headers.got_section_header())?
    } else {
        GlobalOffsetTable::default()
    };
    let got_plt = if headers.contains_got_plt_section_header() {
        extract_global_offset_table(map, headers.file_header(), headers.got_plt_section_header())?
    } else {
        GlobalOffsetTable::default()
    };
    let program_interpreter = if headers.contains_program_interpreter_section_header() {
        extract_program_interpreter_section(map, headers.program_interpreter_section_header())?
    } else {
        ProgramInterpreterSection::default()
    };
    let gnu_hash = if headers.contains_gnu_hash_table_section_header() {
        extract_gnu_hash_table(map, headers.file_header(), headers.gnu_hash_table_section_header())?
    } else {
        GnuHashTable::default()
    };
    let note_table =
        extract_note_section_table(map, headers.file_header(), headers.section_header_table())?;

    Ok(FileWriterFile::from_original_file(
        headers,
        dynamic_section,
        symtab,
        dynsym,
        got,
        got_plt,
        program_interpreter,
        gnu_hash,
        note_table,
    ))
}
