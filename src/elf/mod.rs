//! Reading, modelling and rewriting of ELF (System V) executables and
//! shared libraries.
//!
//! The reader extracts an owned model from a byte buffer mapping the whole
//! file; [writer_file::FileWriterFile] mutates the model while preserving
//! every invariant the loader requires; the writer serialises the model back
//! onto a (possibly resized) buffer.

pub mod algorithm;
pub mod dynamic;
pub mod file_header;
pub mod got;
pub mod gnu_hash;
pub mod headers;
pub mod ident;
pub mod interp;
pub mod note;
pub mod offset_range;
pub mod program_header;
pub mod reader;
pub mod section_header;
pub mod string_table;
pub mod symbol_table;
pub mod writer;
pub mod writer_file;

#[allow(clippy::unwrap_used)]
#[cfg(test)]
pub(crate) mod testutils {
    //! A synthetic but fully valid 64-bit little-endian shared object,
    //! assembled from the crate's own model, for the end-to-end tests.

    use super::dynamic::{DynamicEntry, DynamicSection};
    use super::file_header::FileHeader;
    use super::got::GlobalOffsetTable;
    use super::gnu_hash::GnuHashTable;
    use super::headers::{FileAllHeaders, ProgramHeaderTable};
    use super::ident::{Class, DataFormat, Ident};
    use super::interp::ProgramInterpreterSection;
    use super::note::{NoteSection, NoteSectionTable};
    use super::program_header::{ProgramHeader, SegmentType};
    use super::section_header::SectionHeader;
    use super::string_table::StringTable;
    use super::symbol_table::{PartialSymbolTable, PartialSymbolTableEntry};
    use super::writer;
    use super::writer_file::FileWriterFile;

    /// File offset of the `.interp` section
    pub const INTERP_OFFSET: u64 = 344;
    /// File offset of the `.note.ABI-tag` section
    pub const NOTE_OFFSET: u64 = 372;
    /// File offset of the `.gnu.hash` section
    pub const GNU_HASH_OFFSET: u64 = 408;
    /// File offset of the `.dynsym` section
    pub const DYNSYM_OFFSET: u64 = 440;
    /// File offset of the `.dynstr` section
    pub const DYNSTR_OFFSET: u64 = 488;
    /// File offset of the `.dynamic` section
    pub const DYNAMIC_OFFSET: u64 = 512;
    /// File offset of the `.got.plt` section
    pub const GOT_PLT_OFFSET: u64 = 624;
    /// File offset of the `.symtab` section
    pub const SYMTAB_OFFSET: u64 = 648;
    /// File offset of the `.shstrtab` section
    pub const SHSTRTAB_OFFSET: u64 = 720;
    /// File offset of the section header table
    pub const SHT_OFFSET: u64 = 808;
    /// Size of the image
    pub const IMAGE_SIZE: u64 = SHT_OFFSET + 10 * 64;
    /// The runpath the image starts with
    pub const ORIGINAL_RUN_PATH: &str = "$ORIGIN/lib";
    /// The interpreter path of the image
    pub const INTERPRETER_PATH: &str = "/lib64/ld-linux-x86-64.so.2";

    /// Content of `.dynstr`
    pub const DYNSTR_BYTES: &[u8] = b"\0libc.so.6\0$ORIGIN/lib\0";
    /// Content of `.shstrtab`
    pub const SHSTRTAB_BYTES: &[u8] =
        b"\0.interp\0.note.ABI-tag\0.gnu.hash\0.dynsym\0.dynstr\0.dynamic\0.got.plt\0.symtab\0.shstrtab\0";

    fn section(
        name: &str,
        name_index: u32,
        section_type: u32,
        flags: u64,
        addr: u64,
        offset: u64,
        size: u64,
        link: u32,
        addralign: u64,
        entsize: u64,
    ) -> SectionHeader {
        SectionHeader {
            name: name.to_string(),
            name_index,
            section_type,
            flags,
            addr,
            offset,
            size,
            link,
            info: 0,
            addralign,
            entsize,
        }
    }

    fn segment(
        segment_type: SegmentType,
        flags: u32,
        offset: u64,
        size: u64,
        align: u64,
    ) -> ProgramHeader {
        let mut header = ProgramHeader {
            segment_type: 0,
            flags,
            offset,
            vaddr: offset,
            paddr: offset,
            filesz: size,
            memsz: size,
            align,
        };
        header.set_segment_type(segment_type);
        header
    }

    /// Build the model of the test image
    pub fn build_file_writer_file() -> FileWriterFile {
        let file_header = FileHeader {
            ident: Ident {
                has_valid_elf_magic: true,
                class: Class::Class64,
                data_format: DataFormat::Lsb,
                version: 1,
                os_abi: 0,
                abi_version: 0,
            },
            object_file_type: 3,
            machine: 0x3e,
            version: 1,
            entry: 0,
            phoff: 64,
            shoff: SHT_OFFSET,
            flags: 0,
            ehsize: 64,
            phentsize: 56,
            phnum: 5,
            shentsize: 64,
            shnum: 10,
            shstrndx: 9,
        };

        let mut program_headers = ProgramHeaderTable::default();
        program_headers.add_header_from_file(segment(
            SegmentType::ProgramHeaderTable,
            0x4,
            64,
            5 * 56,
            8,
        ));
        program_headers.add_header_from_file(segment(
            SegmentType::Interpreter,
            0x4,
            INTERP_OFFSET,
            28,
            1,
        ));
        program_headers.add_header_from_file(segment(SegmentType::Load, 0x5, 0, 648, 0x1000));
        program_headers.add_header_from_file(segment(
            SegmentType::Dynamic,
            0x6,
            DYNAMIC_OFFSET,
            112,
            8,
        ));
        program_headers.add_header_from_file(segment(SegmentType::Note, 0x4, NOTE_OFFSET, 32, 4));

        let section_headers = vec![
            section("", 0, 0, 0, 0, 0, 0, 0, 0, 0),
            section(".interp", 1, 1, 2, INTERP_OFFSET, INTERP_OFFSET, 28, 0, 1, 0),
            section(
                ".note.ABI-tag",
                9,
                7,
                2,
                NOTE_OFFSET,
                NOTE_OFFSET,
                32,
                0,
                4,
                0,
            ),
            section(
                ".gnu.hash",
                23,
                0x6fff_fff6,
                2,
                GNU_HASH_OFFSET,
                GNU_HASH_OFFSET,
                32,
                4,
                8,
                0,
            ),
            section(
                ".dynsym",
                33,
                0xb,
                2,
                DYNSYM_OFFSET,
                DYNSYM_OFFSET,
                48,
                5,
                8,
                24,
            ),
            section(".dynstr", 41, 3, 2, DYNSTR_OFFSET, DYNSTR_OFFSET, 23, 0, 1, 0),
            section(
                ".dynamic",
                49,
                6,
                3,
                DYNAMIC_OFFSET,
                DYNAMIC_OFFSET,
                112,
                5,
                8,
                16,
            ),
            section(
                ".got.plt",
                58,
                1,
                3,
                GOT_PLT_OFFSET,
                GOT_PLT_OFFSET,
                24,
                0,
                8,
                8,
            ),
            section(".symtab", 67, 2, 0, 0, SYMTAB_OFFSET, 72, 0, 8, 24),
            section(".shstrtab", 75, 3, 0, 0, SHSTRTAB_OFFSET, 85, 0, 1, 0),
        ];

        let mut headers = FileAllHeaders::default();
        headers.set_file_header(file_header);
        headers.set_program_header_table(program_headers);
        headers.set_section_header_table(section_headers);

        let mut dynamic_section = DynamicSection::default();
        dynamic_section.set_string_table_from_file(StringTable::from_bytes(DYNSTR_BYTES).unwrap());
        for (tag, value) in [
            (1, 1),                         // NEEDED libc.so.6
            (29, 11),                       // RUNPATH $ORIGIN/lib
            (5, DYNSTR_OFFSET),             // STRTAB
            (6, DYNSYM_OFFSET),             // SYMTAB
            (0x6fff_fef5, GNU_HASH_OFFSET), // GNU_HASH
            (10, 23),                       // STRSZ
            (0, 0),                         // NULL
        ] {
            dynamic_section.add_entry_from_file(DynamicEntry {
                tag,
                val_or_ptr: value,
            });
        }

        let mut dynsym = PartialSymbolTable::default();
        dynsym.add_entry_from_file(PartialSymbolTableEntry {
            file_map_offset: DYNSYM_OFFSET + 24,
            name: 0,
            info: 3,
            other: 0,
            shndx: 6,
            value: DYNAMIC_OFFSET,
            size: 0,
        });

        let mut symtab = PartialSymbolTable::default();
        symtab.add_entry_from_file(PartialSymbolTableEntry {
            file_map_offset: SYMTAB_OFFSET + 24,
            name: 0,
            info: 3,
            other: 0,
            shndx: 1,
            value: INTERP_OFFSET,
            size: 0,
        });
        symtab.add_entry_from_file(PartialSymbolTableEntry {
            file_map_offset: SYMTAB_OFFSET + 48,
            name: 0,
            info: 3,
            other: 0,
            shndx: 5,
            value: DYNSTR_OFFSET,
            size: 0,
        });

        let mut got_plt = GlobalOffsetTable::default();
        got_plt.add_entry_from_file(DYNAMIC_OFFSET);
        got_plt.add_entry_from_file(0);
        got_plt.add_entry_from_file(0);

        let gnu_hash = GnuHashTable {
            symoffset: 1,
            bloom_shift: 6,
            bloom: vec![0],
            buckets: vec![1],
            chain: vec![0],
        };

        let mut note_table = NoteSectionTable::default();
        note_table.add_section_from_file(
            headers.section_header_table()[2].clone(),
            NoteSection {
                name: "GNU".to_string(),
                description_size: 16,
                note_type: 1,
                description: vec![0, 3, 2, 0],
            },
        );

        FileWriterFile::from_original_file(
            headers,
            dynamic_section,
            symtab,
            dynsym,
            GlobalOffsetTable::default(),
            got_plt,
            ProgramInterpreterSection {
                path: INTERPRETER_PATH.to_string(),
            },
            gnu_hash,
            note_table,
        )
    }

    /// Build the byte image of the test file
    pub fn build_test_image() -> Vec<u8> {
        let file = build_file_writer_file();
        let mut image = vec![0u8; file.minimum_size_to_write_file() as usize];
        writer::write_file(&mut image, &file).unwrap();

        // The writer re-emits the global offset tables only when `.dynamic`
        // moved, and never touches `.shstrtab`; seed both by hand.
        writer::write_global_offset_table(
            &mut image,
            file.got_plt(),
            file.file_header().ident,
            GOT_PLT_OFFSET,
        );
        image[SHSTRTAB_OFFSET as usize..SHSTRTAB_OFFSET as usize + SHSTRTAB_BYTES.len()]
            .copy_from_slice(SHSTRTAB_BYTES);

        image
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::program_header::{SegmentPermissions, SegmentType};
    use super::reader;
    use super::testutils::*;
    use super::writer;
    use super::writer_file::EditorState;
    use crate::NullLogger;

    /// Every Load segment must keep `(vaddr % align) == (offset % align)`
    fn assert_load_segments_are_congruent(map: &[u8]) {
        let file_header = reader::extract_file_header(map).unwrap();
        let table = reader::extract_all_program_headers(map, &file_header).unwrap();
        for header in table.headers() {
            if header.segment_type() == SegmentType::Load && header.align > 1 {
                assert_eq!(
                    header.vaddr % header.align,
                    header.offset % header.align,
                    "load segment at {:#x} lost its page congruence",
                    header.offset
                );
            }
        }
    }

    /// Every section-association symbol must hold its section's address
    fn assert_section_associations_are_consistent(map: &[u8]) {
        let file = reader::extract_file_writer_file(map).unwrap();
        let table = file.headers().section_header_table();
        for entry in file.symtab().entries().iter().chain(file.dynsym().entries()) {
            assert_eq!(entry.value, table[usize::from(entry.shndx)].addr);
        }
    }

    #[test]
    fn test_extract_model_from_image() {
        let image = build_test_image();
        let file = reader::extract_file_writer_file(&image).unwrap();

        assert!(file.seems_valid());
        assert_eq!(file.state(), EditorState::Loaded);
        assert_eq!(file.file_header().phnum, 5);
        assert_eq!(file.file_header().shnum, 10);
        assert_eq!(
            file.dynamic_section().get_run_path().unwrap().unwrap(),
            ORIGINAL_RUN_PATH
        );
        assert_eq!(
            file.dynamic_section().get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
        assert_eq!(file.dynamic_section().get_so_name().unwrap(), None);
        assert_eq!(file.program_interpreter().path, INTERPRETER_PATH);
        assert_eq!(file.got_plt().entries(), &[DYNAMIC_OFFSET, 0, 0]);
        assert_eq!(file.gnu_hash().buckets, vec![1]);
        assert_eq!(file.note_table().section_count(), 1);
        assert_eq!(file.note_table().sections()[0].1.name, "GNU");
        assert_eq!(file.symtab().entries().len(), 2);
        assert_eq!(file.dynsym().entries().len(), 1);
        assert_eq!(file.minimum_size_to_write_file(), IMAGE_SIZE);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let image = build_test_image();
        let file = reader::extract_file_writer_file(&image).unwrap();

        let mut output = image.clone();
        writer::write_file(&mut output, &file).unwrap();
        assert_eq!(output, image);
    }

    #[test]
    fn test_rewrite_same_run_path_is_byte_identical() {
        let image = build_test_image();
        let mut file = reader::extract_file_writer_file(&image).unwrap();

        file.set_run_path(ORIGINAL_RUN_PATH, &mut NullLogger).unwrap();
        assert_eq!(file.state(), EditorState::Edited);
        assert_eq!(file.minimum_size_to_write_file(), IMAGE_SIZE);

        let mut output = image.clone();
        writer::write_file(&mut output, &file).unwrap();
        assert_eq!(output, image);
    }

    #[test]
    fn test_equal_length_run_path_changes_only_string_bytes() {
        let image = build_test_image();
        let mut file = reader::extract_file_writer_file(&image).unwrap();

        file.set_run_path("$ORIGIN/LIB", &mut NullLogger).unwrap();
        let mut output = image.clone();
        writer::write_file(&mut output, &file).unwrap();

        let differing: Vec<usize> = (0..image.len()).filter(|&i| image[i] != output[i]).collect();
        assert_eq!(differing, vec![
            DYNSTR_OFFSET as usize + 19,
            DYNSTR_OFFSET as usize + 20,
            DYNSTR_OFFSET as usize + 21,
        ]);

        let reread = reader::extract_file_writer_file(&output).unwrap();
        assert_eq!(
            reread.dynamic_section().get_run_path().unwrap().unwrap(),
            "$ORIGIN/LIB"
        );
    }

    #[test]
    fn test_shorter_run_path_shrinks_string_table_in_place() {
        let image = build_test_image();
        let mut file = reader::extract_file_writer_file(&image).unwrap();

        file.set_run_path("/opt", &mut NullLogger).unwrap();
        let mut output = image.clone();
        writer::write_file(&mut output, &file).unwrap();

        let reread = reader::extract_file_writer_file(&output).unwrap();
        assert_eq!(reread.file_header().phnum, 5);
        let string_table = reread.headers().dynamic_string_table_section_header();
        assert_eq!(string_table.offset, DYNSTR_OFFSET);
        assert_eq!(string_table.size, 16); // "\0libc.so.6\0/opt\0"
        assert_eq!(reread.dynamic_section().get_run_path().unwrap().unwrap(), "/opt");

        // The hole between the new and the original table end is zeroed
        for i in DYNSTR_OFFSET + 16..DYNSTR_OFFSET + 23 {
            assert_eq!(output[i as usize], 0, "stale byte at {:#x}", i);
        }
        assert_load_segments_are_congruent(&output);
    }

    #[test]
    fn test_remove_run_path() {
        let image = build_test_image();
        let mut file = reader::extract_file_writer_file(&image).unwrap();

        file.set_run_path("", &mut NullLogger).unwrap();
        let mut output = image.clone();
        writer::write_file(&mut output, &file).unwrap();

        let reread = reader::extract_file_writer_file(&output).unwrap();
        assert_eq!(reread.dynamic_section().get_run_path().unwrap(), None);
        assert_eq!(reread.dynamic_section().entry_count(), 6);
        assert_eq!(reread.headers().dynamic_section_header().size, 96);
        assert_eq!(
            reread
                .headers()
                .program_header_table()
                .dynamic_program_header()
                .filesz,
            96
        );
        // "\0libc.so.6\0"
        assert_eq!(reread.headers().dynamic_string_table_section_header().size, 11);
        assert_eq!(
            reread.dynamic_section().get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
    }

    #[test]
    fn test_long_run_path_moves_string_table() {
        let image = build_test_image();
        let mut file = reader::extract_file_writer_file(&image).unwrap();

        let run_path = "a".repeat(10_000);
        file.set_run_path(&run_path, &mut NullLogger).unwrap();

        let minimum = file.minimum_size_to_write_file();
        assert!(minimum > IMAGE_SIZE);

        let mut output = image.clone();
        output.resize(minimum as usize, 0);
        writer::write_file(&mut output, &file).unwrap();

        let reread = reader::extract_file_writer_file(&output).unwrap();
        assert_eq!(reread.file_header().phnum, 6);
        assert_eq!(
            reread.dynamic_section().get_run_path().unwrap().unwrap(),
            run_path
        );

        // The string table moved past the original end of the file and
        // DT_STRTAB follows it
        let string_table = reread.headers().dynamic_string_table_section_header();
        assert!(string_table.offset >= IMAGE_SIZE);
        assert_eq!(
            reread.dynamic_section().get_string_table_address().unwrap(),
            string_table.addr
        );

        // The evacuated sections moved too, and the old string table bytes
        // are zeroed
        assert!(reread.headers().program_interpreter_section_header().offset >= IMAGE_SIZE);
        for i in DYNSTR_OFFSET..DYNSTR_OFFSET + 23 {
            assert_eq!(output[i as usize], 0, "stale byte at {:#x}", i);
        }
        assert_eq!(reread.program_interpreter().path, INTERPRETER_PATH);
        assert_eq!(reread.note_table().sections()[0].1.name, "GNU");

        // The new load segment is read-only and covers the moved sections
        let last = reread
            .headers()
            .program_header_table()
            .headers()
            .last()
            .unwrap();
        assert_eq!(last.segment_type(), SegmentType::Load);
        assert_eq!(last.permissions(), SegmentPermissions::READ);
        assert!(last.offset <= string_table.offset);
        assert!(last.file_offset_end() >= string_table.file_offset_end());

        assert_load_segments_are_congruent(&output);
        assert_section_associations_are_consistent(&output);

        // Idempotence: applying the same runpath to the result changes
        // nothing
        let mut second = reader::extract_file_writer_file(&output).unwrap();
        second.set_run_path(&run_path, &mut NullLogger).unwrap();
        let mut second_output = output.clone();
        writer::write_file(&mut second_output, &second).unwrap();
        assert_eq!(second_output, output);
    }

    #[test]
    fn test_insert_run_path_moves_dynamic_section() {
        let image = build_test_image();

        // First produce an image without a runpath
        let mut file = reader::extract_file_writer_file(&image).unwrap();
        file.set_run_path("", &mut NullLogger).unwrap();
        let mut removed = image.clone();
        writer::write_file(&mut removed, &file).unwrap();

        // Inserting a runpath grows the dynamic section by one entry, so
        // both .dynamic and .dynstr must move
        let mut file = reader::extract_file_writer_file(&removed).unwrap();
        file.set_run_path("/x", &mut NullLogger).unwrap();
        let minimum = file.minimum_size_to_write_file();
        let mut output = removed.clone();
        output.resize(minimum as usize, 0);
        writer::write_file(&mut output, &file).unwrap();

        let reread = reader::extract_file_writer_file(&output).unwrap();
        assert_eq!(reread.dynamic_section().get_run_path().unwrap().unwrap(), "/x");
        assert_eq!(
            reread.dynamic_section().get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );

        let dynamic_header = reread.headers().dynamic_section_header();
        assert!(dynamic_header.offset >= IMAGE_SIZE);
        assert_eq!(
            reread
                .headers()
                .program_header_table()
                .dynamic_program_header()
                .offset,
            dynamic_header.offset
        );

        // Entry 0 of .got.plt follows the moved dynamic section
        assert_eq!(reread.got_plt().entries()[0], dynamic_header.addr);

        // The new load segment must be writable since it covers .dynamic
        let last = reread
            .headers()
            .program_header_table()
            .headers()
            .last()
            .unwrap();
        assert_eq!(last.segment_type(), SegmentType::Load);
        assert!(last.permissions().contains(SegmentPermissions::WRITE));

        assert_load_segments_are_congruent(&output);
        assert_section_associations_are_consistent(&output);
    }
}
