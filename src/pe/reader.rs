//! Extraction of the PE structures this crate models: DOS stub, COFF
//! header, optional header, section table, and the import and delay-load
//! directories.
//!
//! PE images are always little-endian, so the word accessors are used with
//! a fixed LSB format. The reader is inspection-only; PE writing is not
//! supported.

use crate::codec;
use crate::elf::ident::DataFormat;
use crate::error::ReadError;
use crate::pe::file_header::{
    CoffHeader, DosHeader, ImageDataDirectory, MagicType, OptionalHeader, COFF_HEADER_SIZE,
    DOS_HEADER_SIZE, DOS_MAGIC, PE_SIGNATURE, PE_SIGNATURE_OFFSET_OFFSET,
};
use crate::pe::import::{
    DelayLoadDirectoryEntry, ImportDirectoryEntry, DELAY_LOAD_DIRECTORY_ENTRY_SIZE,
    IMPORT_DIRECTORY_ENTRY_SIZE,
};
use crate::pe::section_header::{
    find_section_for_rva, PeSectionHeader, PE_SECTION_HEADER_SIZE,
};

type Result<T> = std::result::Result<T, ReadError>;

const FORMAT: DataFormat = DataFormat::Lsb;

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

/// Check if `map` starts with the DOS magic
pub fn starts_with_dos_magic(map: &[u8]) -> bool {
    map.len() >= 2 && map[..2] == DOS_MAGIC
}

/// Extract the DOS header
pub fn extract_dos_header(map: &[u8]) -> Result<DosHeader> {
    check_size(map, DOS_HEADER_SIZE, "DOS header")?;
    if !starts_with_dos_magic(map) {
        return Err(ReadError::InvalidMagicType);
    }
    Ok(DosHeader {
        pe_signature_offset: codec::get_word(&map[PE_SIGNATURE_OFFSET_OFFSET as usize..], FORMAT),
    })
}

/// Check if `map` holds the PE signature where the DOS header says it is
pub fn contains_pe_signature(map: &[u8], dos_header: &DosHeader) -> bool {
    let offset = dos_header.pe_signature_offset as usize;
    map.len() >= offset + 4 && map[offset..offset + 4] == PE_SIGNATURE
}

fn coff_header_offset(dos_header: &DosHeader) -> u64 {
    u64::from(dos_header.pe_signature_offset) + 4
}

/// Extract the COFF file header, validating the PE signature before it
pub fn extract_coff_header(map: &[u8], dos_header: &DosHeader) -> Result<CoffHeader> {
    let offset = coff_header_offset(dos_header);
    check_size(map, offset + COFF_HEADER_SIZE, "COFF header")?;
    if !contains_pe_signature(map, dos_header) {
        return Err(ReadError::InvalidMagicType);
    }

    let header = &map[offset as usize..];
    Ok(CoffHeader {
        machine: codec::get_half_word(header, FORMAT),
        number_of_sections: codec::get_half_word(&header[2..], FORMAT),
        time_date_stamp: codec::get_word(&header[4..], FORMAT),
        pointer_to_symbol_table: codec::get_word(&header[8..], FORMAT),
        number_of_symbols: codec::get_word(&header[12..], FORMAT),
        size_of_optional_header: codec::get_half_word(&header[16..], FORMAT),
        characteristics: codec::get_half_word(&header[18..], FORMAT),
    })
}

fn optional_header_offset(dos_header: &DosHeader) -> u64 {
    coff_header_offset(dos_header) + COFF_HEADER_SIZE
}

fn extract_data_directory(map: &[u8], offset: u64) -> ImageDataDirectory {
    ImageDataDirectory {
        virtual_address: codec::get_word(&map[offset as usize..], FORMAT),
        size: codec::get_word(&map[offset as usize + 4..], FORMAT),
    }
}

/// Extract the optional header, dispatching on the magic to the PE32 or
/// PE32+ layout
pub fn extract_optional_header(
    map: &[u8],
    dos_header: &DosHeader,
    coff_header: &CoffHeader,
) -> Result<OptionalHeader> {
    let offset = optional_header_offset(dos_header);
    check_size(
        map,
        offset + u64::from(coff_header.size_of_optional_header),
        "optional header",
    )?;

    let mut header = OptionalHeader {
        magic: codec::get_half_word(&map[offset as usize..], FORMAT),
        number_of_rva_and_sizes: 0,
        import_table: ImageDataDirectory::default(),
        delay_import_table: ImageDataDirectory::default(),
    };

    // The count of data directories sits at the end of the
    // Windows-specific fields: 92 bytes in for PE32, 108 for PE32+
    let directories_count_offset = match header.magic_type() {
        MagicType::Pe32 => 92u64,
        MagicType::Pe32Plus => 108,
        _ => return Err(ReadError::InvalidMagicType),
    };
    header.number_of_rva_and_sizes =
        codec::get_word(&map[(offset + directories_count_offset) as usize..], FORMAT);

    let directories_offset = offset + directories_count_offset + 4;
    let directory_count = u64::from(header.number_of_rva_and_sizes);
    let optional_header_size = u64::from(coff_header.size_of_optional_header);
    let directory_fits = move |index: u64| -> bool {
        directory_count > index
            && directories_count_offset + 4 + (index + 1) * 8 <= optional_header_size
    };

    if directory_fits(1) {
        header.import_table = extract_data_directory(map, directories_offset + 8);
    }
    if directory_fits(13) {
        header.delay_import_table = extract_data_directory(map, directories_offset + 13 * 8);
    }

    Ok(header)
}

/// Extract the section table
pub fn extract_section_table(
    map: &[u8],
    dos_header: &DosHeader,
    coff_header: &CoffHeader,
) -> Result<Vec<PeSectionHeader>> {
    let offset =
        optional_header_offset(dos_header) + u64::from(coff_header.size_of_optional_header);
    check_size(
        map,
        offset + u64::from(coff_header.number_of_sections) * PE_SECTION_HEADER_SIZE,
        "section table",
    )?;

    let mut table = Vec::with_capacity(usize::from(coff_header.number_of_sections));
    for i in 0..u64::from(coff_header.number_of_sections) {
        let entry = &map[(offset + i * PE_SECTION_HEADER_SIZE) as usize..];
        let name_end = entry[..8].iter().position(|&b| b == 0).unwrap_or(8);
        table.push(PeSectionHeader {
            name: String::from_utf8_lossy(&entry[..name_end]).into_owned(),
            virtual_size: codec::get_word(&entry[8..], FORMAT),
            virtual_address: codec::get_word(&entry[12..], FORMAT),
            size_of_raw_data: codec::get_word(&entry[16..], FORMAT),
            pointer_to_raw_data: codec::get_word(&entry[20..], FORMAT),
        });
    }
    Ok(table)
}

fn rva_to_checked_file_offset(
    map: &[u8],
    section_table: &[PeSectionHeader],
    rva: u32,
    what: &'static str,
) -> Result<u64> {
    let section =
        find_section_for_rva(section_table, rva).ok_or(ReadError::ImportDirectoryRead {
            reason: format!("RVA {:#x} is not covered by any section", rva),
        })?;
    let offset = section.rva_to_file_offset(rva);
    check_size(map, offset, what)?;
    Ok(offset)
}

fn extract_dll_name_at_rva(
    map: &[u8],
    section_table: &[PeSectionHeader],
    rva: u32,
) -> Result<String> {
    let offset = rva_to_checked_file_offset(map, section_table, rva, "DLL name")?;
    codec::get_null_terminated_string(&map[offset as usize..]).ok_or(
        ReadError::NotNullTerminatedString { offset },
    )
}

/// Extract the imported DLL names from the import directory table, in
/// directory order
pub fn extract_import_table_dll_names(
    map: &[u8],
    section_table: &[PeSectionHeader],
    optional_header: &OptionalHeader,
) -> Result<Vec<String>> {
    if !optional_header.contains_import_table() {
        return Ok(Vec::new());
    }

    let table_offset = rva_to_checked_file_offset(
        map,
        section_table,
        optional_header.import_table.virtual_address,
        "import directory table",
    )?;

    let mut names = Vec::new();
    let mut offset = table_offset;
    loop {
        check_size(map, offset + IMPORT_DIRECTORY_ENTRY_SIZE, "import directory table")?;
        let bytes = &map[offset as usize..];
        let entry = ImportDirectoryEntry {
            import_lookup_table_rva: codec::get_word(bytes, FORMAT),
            time_date_stamp: codec::get_word(&bytes[4..], FORMAT),
            forwarder_chain: codec::get_word(&bytes[8..], FORMAT),
            name_rva: codec::get_word(&bytes[12..], FORMAT),
            import_address_table_rva: codec::get_word(&bytes[16..], FORMAT),
        };
        if entry.is_null() {
            break;
        }
        names.push(extract_dll_name_at_rva(map, section_table, entry.name_rva)?);
        offset += IMPORT_DIRECTORY_ENTRY_SIZE;
    }
    Ok(names)
}

/// Extract the delay-loaded DLL names from the delay-load directory table,
/// in directory order
pub fn extract_delay_load_dll_names(
    map: &[u8],
    section_table: &[PeSectionHeader],
    optional_header: &OptionalHeader,
) -> Result<Vec<String>> {
    if !optional_header.contains_delay_import_table() {
        return Ok(Vec::new());
    }

    let table_offset = rva_to_checked_file_offset(
        map,
        section_table,
        optional_header.delay_import_table.virtual_address,
        "delay-load directory table",
    )?;

    let mut names = Vec::new();
    let mut offset = table_offset;
    loop {
        check_size(
            map,
            offset + DELAY_LOAD_DIRECTORY_ENTRY_SIZE,
            "delay-load directory table",
        )?;
        let bytes = &map[offset as usize..];
        let entry = DelayLoadDirectoryEntry {
            attributes: codec::get_word(bytes, FORMAT),
            name_rva: codec::get_word(&bytes[4..], FORMAT),
            module_handle_rva: codec::get_word(&bytes[8..], FORMAT),
            delay_import_address_table_rva: codec::get_word(&bytes[12..], FORMAT),
            delay_import_name_table_rva: codec::get_word(&bytes[16..], FORMAT),
            bound_delay_import_table_rva: codec::get_word(&bytes[20..], FORMAT),
            unload_delay_import_table_rva: codec::get_word(&bytes[24..], FORMAT),
            time_stamp: codec::get_word(&bytes[28..], FORMAT),
        };
        if entry.is_null() {
            break;
        }
        names.push(extract_dll_name_at_rva(map, section_table, entry.name_rva)?);
        offset += DELAY_LOAD_DIRECTORY_ENTRY_SIZE;
    }
    Ok(names)
}

/// Get every DLL name the image imports: the import directory first, then
/// the delay-load directory, each in directory order
pub fn get_needed_shared_libraries(map: &[u8]) -> Result<Vec<String>> {
    let dos_header = extract_dos_header(map)?;
    let coff_header = extract_coff_header(map, &dos_header)?;
    let optional_header = extract_optional_header(map, &dos_header, &coff_header)?;
    let section_table = extract_section_table(map, &dos_header, &coff_header)?;

    let mut names = extract_import_table_dll_names(map, &section_table, &optional_header)?;
    names.extend(extract_delay_load_dll_names(
        map,
        &section_table,
        &optional_header,
    )?);
    Ok(names)
}
