//! Serialisation of a mutated [FileWriterFile] back onto a writable byte
//! buffer.
//!
//! The buffer is expected to still contain the original file bytes; only
//! the records the model carries are re-emitted, so every unchanged record
//! round-trips byte-exact. Holes left by shrinking or moving the dynamic
//! string table are zeroed so no stale path leaks.

use crate::codec;
use crate::elf::dynamic::DynamicSection;
use crate::elf::file_header::FileHeader;
use crate::elf::got::GlobalOffsetTable;
use crate::elf::gnu_hash::GnuHashTable;
use crate::elf::ident::{Ident, ELF_MAGIC, IDENT_SIZE};
use crate::elf::note::NoteSection;
use crate::elf::offset_range::OffsetRange;
use crate::elf::program_header::ProgramHeader;
use crate::elf::section_header::SectionHeader;
use crate::elf::symbol_table::PartialSymbolTable;
use crate::elf::writer_file::FileWriterFile;
use crate::error::WriteError;

/// Overwrite `range` with `value`
fn replace_bytes(map: &mut [u8], range: OffsetRange, value: u8) {
    for byte in &mut map[range.begin() as usize..range.end() as usize] {
        *byte = value;
    }
}

/// Emit the identification bytes and the file header at offset 0
pub fn write_file_header(map: &mut [u8], header: &FileHeader) {
    let ident = header.ident;
    let format = ident.data_format;
    let n = ident.class.n_word_size() as usize;

    map[..4].copy_from_slice(&ELF_MAGIC);
    map[4] = ident.class as u8;
    map[5] = ident.data_format as u8;
    map[6] = ident.version;
    map[7] = ident.os_abi;
    map[8] = ident.abi_version;
    for byte in &mut map[9..IDENT_SIZE] {
        *byte = 0;
    }

    let mut offset = IDENT_SIZE;
    codec::set_half_word(&mut map[offset..], header.object_file_type, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.machine, format);
    offset += 2;
    codec::set_word(&mut map[offset..], header.version, format);
    offset += 4;
    codec::set_address(&mut map[offset..], header.entry, ident);
    offset += n;
    codec::set_offset(&mut map[offset..], header.phoff, ident);
    offset += n;
    codec::set_offset(&mut map[offset..], header.shoff, ident);
    offset += n;
    codec::set_word(&mut map[offset..], header.flags, format);
    offset += 4;
    codec::set_half_word(&mut map[offset..], header.ehsize, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.phentsize, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.phnum, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.shentsize, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.shnum, format);
    offset += 2;
    codec::set_half_word(&mut map[offset..], header.shstrndx, format);
}

fn write_program_header_at(map: &mut [u8], header: &ProgramHeader, ident: Ident, offset: usize) {
    use crate::elf::ident::Class;
    let format = ident.data_format;
    let entry = &mut map[offset..];

    match ident.class {
        Class::Class64 => {
            codec::set_word(entry, header.segment_type, format);
            codec::set_word(&mut entry[4..], header.flags, format);
            codec::set_offset(&mut entry[8..], header.offset, ident);
            codec::set_address(&mut entry[16..], header.vaddr, ident);
            codec::set_address(&mut entry[24..], header.paddr, ident);
            codec::set_n_word(&mut entry[32..], header.filesz, ident);
            codec::set_n_word(&mut entry[40..], header.memsz, ident);
            codec::set_n_word(&mut entry[48..], header.align, ident);
        }
        _ => {
            codec::set_word(entry, header.segment_type, format);
            codec::set_offset(&mut entry[4..], header.offset, ident);
            codec::set_address(&mut entry[8..], header.vaddr, ident);
            codec::set_address(&mut entry[12..], header.paddr, ident);
            codec::set_n_word(&mut entry[16..], header.filesz, ident);
            codec::set_n_word(&mut entry[20..], header.memsz, ident);
            codec::set_word(&mut entry[24..], header.flags, format);
            codec::set_n_word(&mut entry[28..], header.align, ident);
        }
    }
}

/// Emit the program header table at `phoff`
pub fn write_all_program_headers(
    map: &mut [u8],
    file_header: &FileHeader,
    headers: &[ProgramHeader],
) {
    let entry_size = u64::from(file_header.phentsize);
    for (i, header) in headers.iter().enumerate() {
        let offset = (file_header.phoff + i as u64 * entry_size) as usize;
        write_program_header_at(map, header, file_header.ident, offset);
    }
}

fn write_section_header_at(map: &mut [u8], header: &SectionHeader, ident: Ident, offset: usize) {
    use crate::elf::ident::Class;
    let format = ident.data_format;
    let entry = &mut map[offset..];

    match ident.class {
        Class::Class64 => {
            codec::set_word(entry, header.name_index, format);
            codec::set_word(&mut entry[4..], header.section_type, format);
            codec::set_n_word(&mut entry[8..], header.flags, ident);
            codec::set_address(&mut entry[16..], header.addr, ident);
            codec::set_offset(&mut entry[24..], header.offset, ident);
            codec::set_n_word(&mut entry[32..], header.size, ident);
            codec::set_word(&mut entry[40..], header.link, format);
            codec::set_word(&mut entry[44..], header.info, format);
            codec::set_n_word(&mut entry[48..], header.addralign, ident);
            codec::set_n_word(&mut entry[56..], header.entsize, ident);
        }
        _ => {
            codec::set_word(entry, header.name_index, format);
            codec::set_word(&mut entry[4..], header.section_type, format);
            codec::set_n_word(&mut entry[8..], header.flags, ident);
            codec::set_address(&mut entry[12..], header.addr, ident);
            codec::set_offset(&mut entry[16..], header.offset, ident);
            codec::set_n_word(&mut entry[20..], header.size, ident);
            codec::set_word(&mut entry[24..], header.link, format);
            codec::set_word(&mut entry[28..], header.info, format);
            codec::set_n_word(&mut entry[32..], header.addralign, ident);
            codec::set_n_word(&mut entry[36..], header.entsize, ident);
        }
    }
}

/// Emit the section header table at `shoff`
pub fn write_all_section_headers(
    map: &mut [u8],
    file_header: &FileHeader,
    headers: &[SectionHeader],
) {
    let entry_size = u64::from(file_header.shentsize);
    for (i, header) in headers.iter().enumerate() {
        let offset = (file_header.shoff + i as u64 * entry_size) as usize;
        write_section_header_at(map, header, file_header.ident, offset);
    }
}

/// Emit the dynamic section entries at `offset`
pub fn write_dynamic_section(
    map: &mut [u8],
    section: &DynamicSection,
    ident: Ident,
    offset: u64,
) {
    let n = ident.class.n_word_size();
    for (i, entry) in section.entries().iter().enumerate() {
        let entry_offset = (offset + i as u64 * 2 * n) as usize;
        codec::set_signed_n_word(&mut map[entry_offset..], entry.tag, ident);
        codec::set_n_word(&mut map[entry_offset + n as usize..], entry.val_or_ptr, ident);
    }
}

/// Emit a global offset table at its section offset
pub fn write_global_offset_table(
    map: &mut [u8],
    table: &GlobalOffsetTable,
    ident: Ident,
    offset: u64,
) {
    let n = ident.class.n_word_size();
    for (i, entry) in table.entries().iter().enumerate() {
        codec::set_address(&mut map[(offset + i as u64 * n) as usize..], *entry, ident);
    }
}

/// Emit the GNU hash table at its section offset
pub fn write_gnu_hash_table(map: &mut [u8], table: &GnuHashTable, ident: Ident, offset: u64) {
    let format = ident.data_format;
    let n = ident.class.n_word_size() as usize;
    let base = offset as usize;

    codec::set_word(&mut map[base..], table.buckets.len() as u32, format);
    codec::set_word(&mut map[base + 4..], table.symoffset, format);
    codec::set_word(&mut map[base + 8..], table.bloom.len() as u32, format);
    codec::set_word(&mut map[base + 12..], table.bloom_shift, format);

    let mut cursor = base + 16;
    for bloom in &table.bloom {
        codec::set_n_word(&mut map[cursor..], *bloom, ident);
        cursor += n;
    }
    for bucket in &table.buckets {
        codec::set_word(&mut map[cursor..], *bucket, format);
        cursor += 4;
    }
    for value in &table.chain {
        codec::set_word(&mut map[cursor..], *value, format);
        cursor += 4;
    }
}

/// Emit one note section at its section offset
pub fn write_note_section(map: &mut [u8], section: &NoteSection, ident: Ident, offset: u64) {
    let format = ident.data_format;
    let base = offset as usize;

    codec::set_word(&mut map[base..], section.name.len() as u32 + 1, format);
    codec::set_word(&mut map[base + 4..], section.description_size, format);
    codec::set_word(&mut map[base + 8..], section.note_type, format);

    let name_bytes = section.name.as_bytes();
    map[base + 12..base + 12 + name_bytes.len()].copy_from_slice(name_bytes);
    for byte in &mut map[base + 12 + name_bytes.len()..base + 12 + section.padded_name_size() as usize]
    {
        *byte = 0;
    }

    let mut cursor = base + 12 + section.padded_name_size() as usize;
    for word in &section.description {
        codec::set_word(&mut map[cursor..], *word, format);
        cursor += 4;
    }
}

/// Emit the section-association entries of a symbol table at their recorded
/// file offsets
pub fn write_partial_symbol_table(map: &mut [u8], table: &PartialSymbolTable, ident: Ident) {
    use crate::elf::ident::Class;
    let format = ident.data_format;

    for entry in table.entries() {
        let base = entry.file_map_offset as usize;
        match ident.class {
            Class::Class64 => {
                codec::set_word(&mut map[base..], entry.name, format);
                map[base + 4] = entry.info;
                map[base + 5] = entry.other;
                codec::set_half_word(&mut map[base + 6..], entry.shndx, format);
                codec::set_address(&mut map[base + 8..], entry.value, ident);
                codec::set_n_word(&mut map[base + 16..], entry.size, ident);
            }
            _ => {
                codec::set_word(&mut map[base..], entry.name, format);
                codec::set_address(&mut map[base + 4..], entry.value, ident);
                codec::set_n_word(&mut map[base + 8..], entry.size, ident);
                map[base + 12] = entry.info;
                map[base + 13] = entry.other;
                codec::set_half_word(&mut map[base + 14..], entry.shndx, format);
            }
        }
    }
}

/// Serialise `file` onto `map`
///
/// `map` must still hold the original file bytes (possibly extended) and be
/// at least [FileWriterFile::minimum_size_to_write_file] bytes. Emission
/// order: string table holes are zeroed first, then the semantic sections,
/// then the three header tables.
pub fn write_file(map: &mut [u8], file: &FileWriterFile) -> Result<(), WriteError> {
    let required = file.minimum_size_to_write_file();
    if (map.len() as u64) < required {
        return Err(WriteError::MapTooSmall {
            required,
            available: map.len() as u64,
        });
    }

    let headers = file.headers();
    let ident = file.file_header().ident;

    // The old string table must not leak stale paths: zero the whole
    // original range when the table moved away, or just the tail hole when
    // it shrank in place.
    if file.dynamic_string_table_moves_to_end() {
        replace_bytes(map, file.original_dynamic_string_table_offset_range(), 0);
    } else {
        let begin = file.dynamic_string_table_offset_range().end();
        let end = file.original_dynamic_string_table_offset_range().end();
        if begin < end {
            replace_bytes(map, OffsetRange::from_begin_and_end_offsets(begin, end), 0);
        }
    }

    if file.dynamic_section_moves_to_end() {
        if !file.got().is_empty() && headers.contains_got_section_header() {
            write_global_offset_table(map, file.got(), ident, headers.got_section_header().offset);
        }
        if !file.got_plt().is_empty() && headers.contains_got_plt_section_header() {
            write_global_offset_table(
                map,
                file.got_plt(),
                ident,
                headers.got_plt_section_header().offset,
            );
        }
    }

    if !file.program_interpreter().is_empty()
        && headers.contains_program_interpreter_section_header()
    {
        let offset = headers.program_interpreter_section_header().offset as usize;
        let path = file.program_interpreter().path.as_bytes();
        map[offset..offset + path.len()].copy_from_slice(path);
        map[offset + path.len()] = 0;
    }

    if !file.gnu_hash().is_empty() && headers.contains_gnu_hash_table_section_header() {
        write_gnu_hash_table(
            map,
            file.gnu_hash(),
            ident,
            headers.gnu_hash_table_section_header().offset,
        );
    }

    for (header, section) in file.note_table().sections() {
        write_note_section(map, section, ident, header.offset);
    }

    write_partial_symbol_table(map, file.symtab(), ident);
    write_partial_symbol_table(map, file.dynsym(), ident);

    write_dynamic_section(
        map,
        file.dynamic_section(),
        ident,
        headers.dynamic_section_header().offset,
    );

    let string_table_offset = headers.dynamic_string_table_section_header().offset as usize;
    let string_table_bytes = file.dynamic_section().string_table().as_bytes();
    map[string_table_offset..string_table_offset + string_table_bytes.len()]
        .copy_from_slice(string_table_bytes);

    write_file_header(map, file.file_header());
    write_all_program_headers(
        map,
        file.file_header(),
        headers.program_header_table().headers(),
    );
    write_all_section_headers(map, file.file_header(), headers.section_header_table());

    Ok(())
}
