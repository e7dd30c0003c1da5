//! The layout engine: combines the headers and the semantic sections of a
//! file, remembers the original layout, and decides whether an edit fits in
//! place or must move sections to the end of the file.
//!
//! This is the only component that mutates headers in response to section
//! moves; the writer is pure serialisation.

use crate::elf::dynamic::DynamicSection;
use crate::elf::file_header::FileHeader;
use crate::elf::got::GlobalOffsetTable;
use crate::elf::gnu_hash::GnuHashTable;
use crate::elf::headers::{
    find_count_of_sections_to_move_to_free_size, make_load_program_header_covering_sections,
    FileAllHeaders, MoveSectionAlignment,
};
use crate::elf::ident::Class;
use crate::elf::interp::ProgramInterpreterSection;
use crate::elf::note::NoteSectionTable;
use crate::elf::offset_range::OffsetRange;
use crate::elf::program_header::SegmentPermissions;
use crate::elf::symbol_table::PartialSymbolTable;
use crate::error::MoveSectionError;
use crate::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The life cycle of a [FileWriterFile]
pub enum EditorState {
    /// Read-only; all caches are populated, nothing was mutated
    Loaded,
    /// One or more mutators ran; the minimum writable size may differ from
    /// the source size
    Edited,
    /// A failed edit poisoned the model; it must be discarded
    Invalid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Snapshot of the file layout as it was before any edit
pub struct FileWriterFileLayout {
    dynamic_section_offset_range: OffsetRange,
    dynamic_string_table_offset_range: OffsetRange,
    global_offset_range: OffsetRange,
    dynamic_section_address: u64,
}

impl FileWriterFileLayout {
    /// Capture the layout of `headers`
    ///
    /// The dynamic section and dynamic string table headers must exist.
    pub fn from_file(headers: &FileAllHeaders) -> Self {
        debug_assert!(headers.contains_dynamic_section_header());
        debug_assert!(headers.contains_dynamic_string_table_section_header());

        Self {
            dynamic_section_offset_range: OffsetRange::from_section_header(
                headers.dynamic_section_header(),
            ),
            dynamic_string_table_offset_range: OffsetRange::from_section_header(
                headers.dynamic_string_table_section_header(),
            ),
            global_offset_range: headers.global_file_offset_range(),
            dynamic_section_address: headers.dynamic_section_header().addr,
        }
    }

    /// File range of the dynamic section before any edit
    pub fn dynamic_section_offset_range(&self) -> OffsetRange {
        self.dynamic_section_offset_range
    }

    /// File range of the dynamic string table before any edit
    pub fn dynamic_string_table_offset_range(&self) -> OffsetRange {
        self.dynamic_string_table_offset_range
    }

    /// File range of the whole file before any edit
    pub fn global_offset_range(&self) -> OffsetRange {
        self.global_offset_range
    }

    /// Virtual address of the dynamic section before any edit
    pub fn dynamic_section_address(&self) -> u64 {
        self.dynamic_section_address
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FileOffsetChanges {
    original_dynamic_section_byte_count: u64,
    original_dynamic_string_table_byte_count: u64,
    class: Option<Class>,
}

impl FileOffsetChanges {
    fn set_original_sizes(&mut self, dynamic_section: &DynamicSection, class: Class) {
        self.original_dynamic_section_byte_count = dynamic_section.byte_count(class);
        self.original_dynamic_string_table_byte_count =
            dynamic_section.string_table().byte_count();
        self.class = Some(class);
    }

    fn dynamic_section_changes_offset(&self, dynamic_section: &DynamicSection) -> i64 {
        let class = self.class.unwrap_or(Class::Class64);
        dynamic_section.byte_count(class) as i64 - self.original_dynamic_section_byte_count as i64
    }

    fn dynamic_string_table_changes_offset(&self, dynamic_section: &DynamicSection) -> i64 {
        dynamic_section.string_table().byte_count() as i64
            - self.original_dynamic_string_table_byte_count as i64
    }
}

#[derive(Debug, Clone)]
/// A file being edited: headers, semantic sections, and the original layout
pub struct FileWriterFile {
    headers: FileAllHeaders,
    dynamic_section: DynamicSection,
    symtab: PartialSymbolTable,
    dynsym: PartialSymbolTable,
    got: GlobalOffsetTable,
    got_plt: GlobalOffsetTable,
    program_interpreter: ProgramInterpreterSection,
    gnu_hash: GnuHashTable,
    note_table: NoteSectionTable,
    original_layout: FileWriterFileLayout,
    offset_changes: FileOffsetChanges,
    state: EditorState,
}

impl FileWriterFile {
    /// Build a file model from everything the reader extracted
    ///
    /// `headers` must be valid and contain the dynamic program header, the
    /// dynamic section header and the dynamic string table section header.
    #[allow(clippy::too_many_arguments)]
    pub fn from_original_file(
        headers: FileAllHeaders,
        dynamic_section: DynamicSection,
        symtab: PartialSymbolTable,
        dynsym: PartialSymbolTable,
        got: GlobalOffsetTable,
        got_plt: GlobalOffsetTable,
        program_interpreter: ProgramInterpreterSection,
        gnu_hash: GnuHashTable,
        note_table: NoteSectionTable,
    ) -> Self {
        debug_assert!(headers.seems_valid());
        debug_assert!(!dynamic_section.is_null());
        debug_assert!(headers.contains_dynamic_section_header());
        debug_assert!(headers.contains_dynamic_string_table_section_header());

        let original_layout = FileWriterFileLayout::from_file(&headers);
        let mut offset_changes = FileOffsetChanges::default();
        offset_changes.set_original_sizes(&dynamic_section, headers.file_header().ident.class);

        Self {
            headers,
            dynamic_section,
            symtab,
            dynsym,
            got,
            got_plt,
            program_interpreter,
            gnu_hash,
            note_table,
            original_layout,
            offset_changes,
            state: EditorState::Loaded,
        }
    }

    /// The current editor state
    pub fn state(&self) -> EditorState {
        self.state
    }

    /// The headers
    pub fn headers(&self) -> &FileAllHeaders {
        &self.headers
    }

    /// The file header
    pub fn file_header(&self) -> &FileHeader {
        self.headers.file_header()
    }

    /// The dynamic section
    pub fn dynamic_section(&self) -> &DynamicSection {
        &self.dynamic_section
    }

    /// The section associations of `.symtab`
    pub fn symtab(&self) -> &PartialSymbolTable {
        &self.symtab
    }

    /// The section associations of `.dynsym`
    pub fn dynsym(&self) -> &PartialSymbolTable {
        &self.dynsym
    }

    /// The `.got` section
    pub fn got(&self) -> &GlobalOffsetTable {
        &self.got
    }

    /// The `.got.plt` section
    pub fn got_plt(&self) -> &GlobalOffsetTable {
        &self.got_plt
    }

    /// The program interpreter section
    pub fn program_interpreter(&self) -> &ProgramInterpreterSection {
        &self.program_interpreter
    }

    /// The GNU hash table
    pub fn gnu_hash(&self) -> &GnuHashTable {
        &self.gnu_hash
    }

    /// The note sections
    pub fn note_table(&self) -> &NoteSectionTable {
        &self.note_table
    }

    /// The layout of the file before any edit
    pub fn original_layout(&self) -> &FileWriterFileLayout {
        &self.original_layout
    }

    /// Minimum size in bytes a buffer must have to write this file
    pub fn minimum_size_to_write_file(&self) -> u64 {
        self.headers.global_file_offset_range().minimum_size_to_access_range()
    }

    /// Check if the dynamic section now lies past the original end of the
    /// file
    pub fn dynamic_section_moves_to_end(&self) -> bool {
        self.headers.dynamic_section_header().offset >= self.original_layout.global_offset_range().end()
    }

    /// Check if the dynamic string table now lies past the original end of
    /// the file
    pub fn dynamic_string_table_moves_to_end(&self) -> bool {
        self.headers.dynamic_string_table_section_header().offset
            >= self.original_layout.global_offset_range().end()
    }

    /// File range of the dynamic string table as laid out now
    pub fn dynamic_string_table_offset_range(&self) -> OffsetRange {
        OffsetRange::from_section_header(self.headers.dynamic_string_table_section_header())
    }

    /// File range of the dynamic string table before any edit
    pub fn original_dynamic_string_table_offset_range(&self) -> OffsetRange {
        self.original_layout.dynamic_string_table_offset_range()
    }

    /// Check if this file seems valid
    pub fn seems_valid(&self) -> bool {
        self.state != EditorState::Invalid && self.headers.seems_valid()
    }

    /// Set the runtime search path (DT_RUNPATH)
    ///
    /// An empty `run_path` removes the entry. If the dynamic section or its
    /// string table grows, they move to the end of the file: room for a new
    /// Load program header is freed by evacuating the sections right after
    /// the program header table, the evacuated and grown sections are
    /// covered by the new Load segment, and every cross reference
    /// (section-association symbols, `.got.plt` entry 0, DT_STRTAB,
    /// DT_GNU_HASH) is rewritten. Shifting the data that follows a grown
    /// section is not an option: that would invalidate references this
    /// crate does not know how to rewrite. It is not a linker.
    pub fn set_run_path(
        &mut self,
        run_path: &str,
        logger: &mut dyn Logger,
    ) -> Result<(), MoveSectionError> {
        if self.state == EditorState::Invalid {
            return Err(MoveSectionError::FileIsInvalid);
        }

        self.dynamic_section.set_run_path(run_path);

        let class = self.headers.file_header().ident.class;
        self.headers
            .set_dynamic_section_size(self.dynamic_section.byte_count(class));
        self.headers
            .set_dynamic_string_table_size(self.dynamic_section.string_table().byte_count());

        let must_move_dynamic_section = self
            .offset_changes
            .dynamic_section_changes_offset(&self.dynamic_section)
            > 0;
        let must_move_string_table = self
            .offset_changes
            .dynamic_string_table_changes_offset(&self.dynamic_section)
            > 0;

        if !must_move_dynamic_section && !must_move_string_table {
            self.state = EditorState::Edited;
            return Ok(());
        }

        logger.message("the new run path does not fit in place, sections will move to the end of the file");

        let change_map = self.headers.sort_section_header_table_by_file_offset();
        self.symtab.update_section_indexes(&change_map);
        self.dynsym.update_section_indexes(&change_map);

        let entry_size = self.headers.file_header().phentsize;
        let section_count = self.headers.section_header_table().len();
        let count_to_move =
            find_count_of_sections_to_move_to_free_size(self.headers.section_header_table(), entry_size);
        if count_to_move >= section_count {
            self.state = EditorState::Invalid;
            return Err(MoveSectionError::NotEnoughSections {
                required: count_to_move,
                available: section_count,
            });
        }

        let mut moved_section_indexes = if count_to_move > 1 {
            self.move_first_count_sections_to_end(count_to_move, logger)?
        } else {
            Vec::new()
        };

        if must_move_dynamic_section {
            logger.verbose("moving the .dynamic section to the end of the file");
            self.move_dynamic_section_to_end(MoveSectionAlignment::SectionAlignment);
            moved_section_indexes.push(self.headers.dynamic_section_header_index());
        }

        if must_move_string_table {
            logger.verbose("moving the .dynstr section to the end of the file");
            self.move_dynamic_string_table_to_end(MoveSectionAlignment::SectionAlignment);
            moved_section_indexes.push(self.headers.dynamic_string_table_section_header_index());
        }

        self.symtab
            .update_virtual_addresses(&moved_section_indexes, self.headers.section_header_table());
        self.dynsym
            .update_virtual_addresses(&moved_section_indexes, self.headers.section_header_table());

        if !moved_section_indexes.is_empty() {
            let mut load = make_load_program_header_covering_sections(
                &moved_section_indexes,
                self.headers.section_header_table(),
                self.headers.file_header().page_size(),
            );
            let mut permissions = SegmentPermissions::READ;
            if must_move_dynamic_section {
                permissions |= SegmentPermissions::WRITE;
            }
            load.set_permissions(permissions);
            self.headers.add_program_header(load);
        }

        self.state = EditorState::Edited;
        Ok(())
    }

    /// Move the first `count` sections (the null section included) to the
    /// end of the file
    ///
    /// Returns the indexes of the moved section headers. The table must be
    /// sorted by file offset. Note sections belong to one PT_NOTE segment
    /// and are moved as a whole group.
    fn move_first_count_sections_to_end(
        &mut self,
        count: usize,
        logger: &mut dyn Logger,
    ) -> Result<Vec<u16>, MoveSectionError> {
        debug_assert!(count > 0);
        debug_assert!(count <= self.headers.section_header_table().len());
        debug_assert!(self.headers.section_header_table_is_sorted_by_file_offset());

        let mut moved_section_indexes = Vec::new();
        let mut index = 1usize;

        while index < count {
            let alignment = if index > 1 {
                MoveSectionAlignment::SectionAlignment
            } else {
                MoveSectionAlignment::NextPage
            };
            let header = self.headers.section_header_table()[index].clone();

            if header.is_note_section_header() {
                logger.verbose("moving the note sections to the end of the file");
                self.headers.move_note_sections_to_end(alignment);
                let note_indexes = self.headers.get_note_section_header_indexes();
                self.note_table
                    .update_section_headers(self.headers.section_header_table());
                index += note_indexes.len();
                moved_section_indexes.extend(note_indexes);
            } else if header.is_program_interpreter_section_header() {
                logger.verbose("moving the .interp section to the end of the file");
                self.headers.move_program_interpreter_section_to_end(alignment);
                moved_section_indexes.push(index as u16);
                index += 1;
            } else if header.is_gnu_hash_table_section_header() {
                logger.verbose("moving the .gnu.hash section to the end of the file");
                self.headers.move_gnu_hash_table_to_end(alignment);
                let address = self.headers.gnu_hash_table_section_header().addr;
                if self.dynamic_section.contains_gnu_hash_table_address() {
                    self.dynamic_section.set_gnu_hash_table_address(address);
                }
                moved_section_indexes.push(index as u16);
                index += 1;
            } else {
                self.state = EditorState::Invalid;
                return Err(MoveSectionError::UnsupportedSection { name: header.name });
            }
        }

        Ok(moved_section_indexes)
    }

    fn move_dynamic_section_to_end(&mut self, alignment: MoveSectionAlignment) {
        self.headers.move_dynamic_section_to_end(alignment);

        let new_address = self.headers.dynamic_section_header().addr;
        let original_address = self.original_layout.dynamic_section_address();
        if self.got.contains_dynamic_section_address(original_address) {
            self.got.set_dynamic_section_address(new_address);
        }
        if self.got_plt.contains_dynamic_section_address(original_address) {
            self.got_plt.set_dynamic_section_address(new_address);
        }
    }

    fn move_dynamic_string_table_to_end(&mut self, alignment: MoveSectionAlignment) {
        self.headers.move_dynamic_string_table_to_end(alignment);

        if self.dynamic_section.contains_string_table_address() {
            let address = self.headers.dynamic_string_table_section_header().addr;
            self.dynamic_section.set_string_table_address(address);
        }
    }
}
