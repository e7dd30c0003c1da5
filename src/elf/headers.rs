//! The authoritative aggregate of file header, program header table and
//! section header table, with every header mutation that follows a section
//! move.
//!
//! [FileAllHeaders] maintains the invariant that `phnum`/`shnum` in the file
//! header always equal the sizes of the two tables, and owns the derived
//! indices of the headers the editor cares about.

use crate::elf::algorithm::{
    find_next_aligned_address, find_next_congruent_address,
};
use crate::elf::file_header::FileHeader;
use crate::elf::offset_range::OffsetRange;
use crate::elf::program_header::{ProgramHeader, SegmentType};
use crate::elf::section_header::SectionHeader;

/// How a section moved to the end of the file is aligned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSectionAlignment {
    /// Begin the section on the next page boundary
    NextPage,
    /// Align the section to its own `addralign`
    SectionAlignment,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Map from old to new section header table indices, produced by a table
/// re-sort
pub struct SectionIndexChangeMap {
    map: Vec<u16>,
}

impl SectionIndexChangeMap {
    /// Build an identity map for a table of `count` headers
    pub fn identity(count: u16) -> Self {
        Self {
            map: (0..count).collect(),
        }
    }

    /// Build a map from the sorted order: `order[new] == old`
    pub fn from_sorted_order(order: &[u16]) -> Self {
        let mut map = vec![0u16; order.len()];
        for (new_index, &old_index) in order.iter().enumerate() {
            map[old_index as usize] = new_index as u16;
        }
        Self { map }
    }

    /// Count of entries in this map
    pub fn entry_count(&self) -> usize {
        self.map.len()
    }

    /// The new index of the header that was at `old_index`
    ///
    /// Indices outside the mapped table (e.g. SHN_UNDEF or the reserved
    /// range) are returned unchanged.
    pub fn index_for_old_index(&self, old_index: u16) -> u16 {
        match self.map.get(old_index as usize) {
            Some(&new_index) => new_index,
            None => old_index,
        }
    }

    /// Check if this map leaves every index unchanged
    pub fn is_identity(&self) -> bool {
        self.map
            .iter()
            .enumerate()
            .all(|(i, &new_index)| i == usize::from(new_index))
    }
}

/// Find the index of the first section header with `name`
///
/// Returns 0 (the null section header) if no header matches.
pub fn find_index_of_first_section_header(table: &[SectionHeader], name: &str) -> u16 {
    table
        .iter()
        .position(|header| header.name == name)
        .unwrap_or(0) as u16
}

/// Check if `headers` are sorted by file offset
pub fn section_headers_are_sorted_by_file_offset(headers: &[SectionHeader]) -> bool {
    headers.windows(2).all(|pair| pair[0].offset <= pair[1].offset)
}

/// Find how many leading sections (null section included) must move to the
/// end of the file to free `size` bytes at the head of the file
///
/// Walks sections from the lowest non-zero offset, accumulating section
/// bytes and inter-section gaps, until the freed total reaches `size`. If
/// the requested size is greater than the total the sections represent, the
/// returned count is greater than the count of headers.
///
/// `headers` must be sorted by file offset.
pub fn find_count_of_sections_to_move_to_free_size(headers: &[SectionHeader], size: u16) -> usize {
    debug_assert!(size > 0);
    debug_assert!(section_headers_are_sorted_by_file_offset(headers));

    // The null section (and any malformed sibling) declares offset 0, which
    // has no meaning; sections start after the file header and, most of the
    // time, after the program header table.
    let first = match headers.iter().position(|header| header.offset > 0) {
        Some(first) => first,
        None => return headers.len() + 1,
    };

    let requested = u64::from(size);
    let mut count = first + 1;
    let mut total: u64 = 0;
    // There is a gap between the beginning of the file and the first
    // section; it is not a hole but the file header and program header
    // table, so accounting starts at the first section's offset.
    let mut previous_end = headers[first].offset;

    for header in &headers[first..] {
        total += header.offset - previous_end;
        if requested <= total {
            return count;
        }
        total += header.size;
        if requested <= total {
            return count;
        }
        previous_end = header.offset + header.size;
        count += 1;
    }

    count
}

/// Synthesise a Load program header spanning the given sections
///
/// The caller sets the permission flags afterwards.
pub fn make_load_program_header_covering_sections(
    indexes: &[u16],
    table: &[SectionHeader],
    page_size: u64,
) -> ProgramHeader {
    debug_assert!(!indexes.is_empty());

    let mut offset = u64::MAX;
    let mut vaddr = u64::MAX;
    let mut file_end = 0u64;
    let mut vaddr_end = 0u64;

    for &index in indexes {
        let header = &table[usize::from(index)];
        offset = offset.min(header.offset);
        vaddr = vaddr.min(header.addr);
        file_end = file_end.max(header.file_offset_end());
        vaddr_end = vaddr_end.max(header.virtual_address_end());
    }

    let mut load = ProgramHeader {
        segment_type: 0,
        flags: 0,
        offset,
        vaddr,
        paddr: vaddr,
        filesz: file_end - offset,
        memsz: vaddr_end - vaddr,
        align: page_size,
    };
    load.set_segment_type(SegmentType::Load);
    load
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// The program header table of a file, with the indices of the known
/// segments
pub struct ProgramHeaderTable {
    table: Vec<ProgramHeader>,
    dynamic_index: Option<usize>,
    program_header_table_index: Option<usize>,
    interpreter_index: Option<usize>,
    note_index: Option<usize>,
    gnu_relro_index: Option<usize>,
}

impl ProgramHeaderTable {
    /// Count of headers in this table
    pub fn header_count(&self) -> usize {
        self.table.len()
    }

    /// Check if this table is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The headers of this table, in file order
    pub fn headers(&self) -> &[ProgramHeader] {
        &self.table
    }

    /// Get the header at `index`
    pub fn header_at(&self, index: usize) -> &ProgramHeader {
        &self.table[index]
    }

    /// Add a header decoded from the file; only the internal index of a
    /// known segment is updated, nothing else in the table is adjusted
    pub fn add_header_from_file(&mut self, header: ProgramHeader) {
        match header.segment_type() {
            SegmentType::Dynamic => self.dynamic_index = Some(self.table.len()),
            SegmentType::ProgramHeaderTable => {
                self.program_header_table_index = Some(self.table.len());
            }
            SegmentType::Interpreter => self.interpreter_index = Some(self.table.len()),
            SegmentType::Note => self.note_index = Some(self.table.len()),
            SegmentType::GnuRelRo => self.gnu_relro_index = Some(self.table.len()),
            _ => {}
        }
        self.table.push(header);
    }

    /// Add a header to this table, keeping the PT_PHDR sizes in sync with
    /// the grown table
    pub fn add_header(&mut self, header: ProgramHeader, program_header_entry_size: u16) {
        self.add_header_from_file(header);

        if let Some(index) = self.program_header_table_index {
            let size = (self.table.len() * usize::from(program_header_entry_size)) as u64;
            self.table[index].memsz = size;
            self.table[index].filesz = size;
        }
    }

    /// Check if the dynamic program header exists (PT_DYNAMIC)
    pub fn contains_dynamic_program_header(&self) -> bool {
        self.dynamic_index.is_some()
    }

    /// Get the dynamic program header
    ///
    /// It must exist.
    pub fn dynamic_program_header(&self) -> &ProgramHeader {
        debug_assert!(self.contains_dynamic_program_header());
        &self.table[self.dynamic_index.unwrap_or_default()]
    }

    fn dynamic_program_header_mut(&mut self) -> &mut ProgramHeader {
        debug_assert!(self.contains_dynamic_program_header());
        &mut self.table[self.dynamic_index.unwrap_or_default()]
    }

    /// Check if the program header of the program header table exists
    /// (PT_PHDR)
    pub fn contains_program_header_table_header(&self) -> bool {
        self.program_header_table_index.is_some()
    }

    /// Get the program header of the program header table (PT_PHDR)
    ///
    /// It must exist.
    pub fn program_header_table_header(&self) -> &ProgramHeader {
        debug_assert!(self.contains_program_header_table_header());
        &self.table[self.program_header_table_index.unwrap_or_default()]
    }

    /// Check if the program interpreter program header exists (PT_INTERP)
    pub fn contains_program_interpreter_program_header(&self) -> bool {
        self.interpreter_index.is_some()
    }

    /// Get the program interpreter program header (PT_INTERP)
    ///
    /// It must exist.
    pub fn program_interpreter_program_header(&self) -> &ProgramHeader {
        debug_assert!(self.contains_program_interpreter_program_header());
        &self.table[self.interpreter_index.unwrap_or_default()]
    }

    fn program_interpreter_program_header_mut(&mut self) -> &mut ProgramHeader {
        debug_assert!(self.contains_program_interpreter_program_header());
        &mut self.table[self.interpreter_index.unwrap_or_default()]
    }

    /// Check if the note program header exists (PT_NOTE)
    pub fn contains_note_program_header(&self) -> bool {
        self.note_index.is_some()
    }

    /// Get the note program header (PT_NOTE)
    ///
    /// It must exist.
    pub fn note_program_header(&self) -> &ProgramHeader {
        debug_assert!(self.contains_note_program_header());
        &self.table[self.note_index.unwrap_or_default()]
    }

    fn note_program_header_mut(&mut self) -> &mut ProgramHeader {
        debug_assert!(self.contains_note_program_header());
        &mut self.table[self.note_index.unwrap_or_default()]
    }

    /// Check if the GNU read-only-after-relocation program header exists
    /// (PT_GNU_RELRO)
    pub fn contains_gnu_relro_program_header(&self) -> bool {
        self.gnu_relro_index.is_some()
    }

    /// Get the GNU read-only-after-relocation program header (PT_GNU_RELRO)
    ///
    /// It must exist.
    pub fn gnu_relro_program_header(&self) -> &ProgramHeader {
        debug_assert!(self.contains_gnu_relro_program_header());
        &self.table[self.gnu_relro_index.unwrap_or_default()]
    }

    /// Set the file size and memory size of the dynamic segment
    ///
    /// The dynamic program header must exist.
    pub fn set_dynamic_section_size(&mut self, size: u64) {
        let header = self.dynamic_program_header_mut();
        header.filesz = size;
        header.memsz = size;
    }

    /// Set the virtual address and file offset of the dynamic segment
    ///
    /// The dynamic program header must exist.
    pub fn set_dynamic_section_virtual_address_and_file_offset(
        &mut self,
        virtual_address: u64,
        file_offset: u64,
    ) {
        let header = self.dynamic_program_header_mut();
        header.vaddr = virtual_address;
        header.paddr = virtual_address;
        header.offset = file_offset;
    }

    /// File offset 1 past the last byte of the last segment
    pub fn find_last_segment_file_offset_end(&self) -> u64 {
        self.table
            .iter()
            .map(ProgramHeader::file_offset_end)
            .max()
            .unwrap_or(0)
    }

    /// Virtual address 1 past the last byte of the last segment
    pub fn find_last_segment_virtual_address_end(&self) -> u64 {
        self.table
            .iter()
            .map(ProgramHeader::virtual_address_end)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// File header, program header table and section header table of a file,
/// kept mutually consistent
pub struct FileAllHeaders {
    file_header: FileHeader,
    program_header_table: ProgramHeaderTable,
    section_header_table: Vec<SectionHeader>,
    dynamic_section_index: Option<u16>,
    dynamic_string_table_index: Option<u16>,
    got_index: Option<u16>,
    got_plt_index: Option<u16>,
    gnu_hash_index: Option<u16>,
    interpreter_index: Option<u16>,
}

impl FileAllHeaders {
    /// Set the file header
    ///
    /// Must be called before the two tables are set.
    pub fn set_file_header(&mut self, header: FileHeader) {
        debug_assert!(!self.contains_program_header_table());
        debug_assert!(!self.contains_section_header_table());
        self.file_header = header;
    }

    /// Get the file header
    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    /// Check if the program header table exists
    pub fn contains_program_header_table(&self) -> bool {
        !self.program_header_table.is_empty()
    }

    /// Set the program header table, updating `phnum`
    pub fn set_program_header_table(&mut self, table: ProgramHeaderTable) {
        debug_assert!(table.header_count() <= usize::from(u16::MAX));
        self.file_header.phnum = table.header_count() as u16;
        self.program_header_table = table;
    }

    /// Get the program header table
    pub fn program_header_table(&self) -> &ProgramHeaderTable {
        &self.program_header_table
    }

    /// Check if the section header table exists
    pub fn contains_section_header_table(&self) -> bool {
        !self.section_header_table.is_empty()
    }

    /// Set the section header table, updating `shnum` and the derived
    /// section indices
    pub fn set_section_header_table(&mut self, table: Vec<SectionHeader>) {
        debug_assert!(table.len() <= usize::from(u16::MAX));
        self.file_header.shnum = table.len() as u16;
        self.section_header_table = table;
        self.recompute_known_section_indexes();
    }

    /// Get the section header table
    pub fn section_header_table(&self) -> &[SectionHeader] {
        &self.section_header_table
    }

    fn recompute_known_section_indexes(&mut self) {
        fn find(table: &[SectionHeader], pred: fn(&SectionHeader) -> bool) -> Option<u16> {
            table.iter().position(pred).map(|i| i as u16)
        }

        let table = &self.section_header_table;
        let dynamic = find(table, SectionHeader::is_dynamic_section_header);
        let dynamic_string_table =
            find(table, SectionHeader::is_dynamic_string_table_section_header);
        let got = find(table, SectionHeader::is_got_section_header);
        let got_plt = find(table, SectionHeader::is_got_plt_section_header);
        let gnu_hash = find(table, SectionHeader::is_gnu_hash_table_section_header);
        let interpreter = find(table, SectionHeader::is_program_interpreter_section_header);

        self.dynamic_section_index = dynamic;
        self.dynamic_string_table_index = dynamic_string_table;
        self.got_index = got;
        self.got_plt_index = got_plt;
        self.gnu_hash_index = gnu_hash;
        self.interpreter_index = interpreter;
    }

    /// Check if the dynamic section header exists
    pub fn contains_dynamic_section_header(&self) -> bool {
        self.dynamic_section_index.is_some()
    }

    /// Index of the dynamic section header
    ///
    /// It must exist.
    pub fn dynamic_section_header_index(&self) -> u16 {
        debug_assert!(self.contains_dynamic_section_header());
        self.dynamic_section_index.unwrap_or_default()
    }

    /// Get the dynamic section header
    ///
    /// It must exist.
    pub fn dynamic_section_header(&self) -> &SectionHeader {
        &self.section_header_table[usize::from(self.dynamic_section_header_index())]
    }

    /// Check if the dynamic string table section header exists
    pub fn contains_dynamic_string_table_section_header(&self) -> bool {
        self.dynamic_string_table_index.is_some()
    }

    /// Index of the dynamic string table section header
    ///
    /// It must exist.
    pub fn dynamic_string_table_section_header_index(&self) -> u16 {
        debug_assert!(self.contains_dynamic_string_table_section_header());
        self.dynamic_string_table_index.unwrap_or_default()
    }

    /// Get the dynamic string table section header
    ///
    /// It must exist.
    pub fn dynamic_string_table_section_header(&self) -> &SectionHeader {
        &self.section_header_table[usize::from(self.dynamic_string_table_section_header_index())]
    }

    /// Check if the `.got` section header exists
    pub fn contains_got_section_header(&self) -> bool {
        self.got_index.is_some()
    }

    /// Get the `.got` section header
    ///
    /// It must exist.
    pub fn got_section_header(&self) -> &SectionHeader {
        debug_assert!(self.contains_got_section_header());
        &self.section_header_table[usize::from(self.got_index.unwrap_or_default())]
    }

    /// Check if the `.got.plt` section header exists
    pub fn contains_got_plt_section_header(&self) -> bool {
        self.got_plt_index.is_some()
    }

    /// Get the `.got.plt` section header
    ///
    /// It must exist.
    pub fn got_plt_section_header(&self) -> &SectionHeader {
        debug_assert!(self.contains_got_plt_section_header());
        &self.section_header_table[usize::from(self.got_plt_index.unwrap_or_default())]
    }

    /// Check if the `.gnu.hash` section header exists
    pub fn contains_gnu_hash_table_section_header(&self) -> bool {
        self.gnu_hash_index.is_some()
    }

    /// Get the `.gnu.hash` section header
    ///
    /// It must exist.
    pub fn gnu_hash_table_section_header(&self) -> &SectionHeader {
        debug_assert!(self.contains_gnu_hash_table_section_header());
        &self.section_header_table[usize::from(self.gnu_hash_index.unwrap_or_default())]
    }

    /// Check if the program interpreter section header exists
    pub fn contains_program_interpreter_section_header(&self) -> bool {
        self.interpreter_index.is_some()
    }

    /// Get the program interpreter section header
    ///
    /// It must exist.
    pub fn program_interpreter_section_header(&self) -> &SectionHeader {
        debug_assert!(self.contains_program_interpreter_section_header());
        &self.section_header_table[usize::from(self.interpreter_index.unwrap_or_default())]
    }

    /// Indexes of the note section headers, in table order
    pub fn get_note_section_header_indexes(&self) -> Vec<u16> {
        self.section_header_table
            .iter()
            .enumerate()
            .filter(|(_, header)| header.is_note_section_header())
            .map(|(i, _)| i as u16)
            .collect()
    }

    /// Check about validity
    pub fn seems_valid(&self) -> bool {
        if !self.file_header.seems_valid() {
            return false;
        }
        if usize::from(self.file_header.phnum) != self.program_header_table.header_count() {
            return false;
        }
        if usize::from(self.file_header.shnum) != self.section_header_table.len() {
            return false;
        }
        if self.contains_dynamic_section_header()
            && !self.program_header_table.contains_dynamic_program_header()
        {
            return false;
        }
        true
    }

    /// Set the size of the dynamic section, both in its section header and
    /// in the dynamic program header
    pub fn set_dynamic_section_size(&mut self, size: u64) {
        debug_assert!(self.contains_dynamic_section_header());
        let index = usize::from(self.dynamic_section_header_index());
        self.section_header_table[index].size = size;
        self.program_header_table.set_dynamic_section_size(size);
    }

    /// Set the size of the dynamic string table section
    pub fn set_dynamic_string_table_size(&mut self, size: u64) {
        debug_assert!(self.contains_dynamic_string_table_section_header());
        let index = usize::from(self.dynamic_string_table_section_header_index());
        self.section_header_table[index].size = size;
    }

    /// File offset 1 past the last byte any header claims
    pub fn find_global_file_offset_end(&self) -> u64 {
        let mut end = u64::from(self.file_header.ehsize);
        end = end.max(self.file_header.program_header_table_end());
        end = end.max(self.file_header.section_header_table_end());
        end = end.max(self.program_header_table.find_last_segment_file_offset_end());
        for header in &self.section_header_table {
            end = end.max(header.file_offset_end());
        }
        end
    }

    /// Virtual address 1 past the last byte any header claims
    pub fn find_global_virtual_address_end(&self) -> u64 {
        let mut end = self
            .program_header_table
            .find_last_segment_virtual_address_end();
        for header in &self.section_header_table {
            if header.addr != 0 {
                end = end.max(header.virtual_address_end());
            }
        }
        end
    }

    /// File offset range covering the whole file as the headers declare it
    pub fn global_file_offset_range(&self) -> OffsetRange {
        OffsetRange::from_begin_and_end_offsets(0, self.find_global_file_offset_end())
    }

    /// Check if the section header table is sorted by file offset
    pub fn section_header_table_is_sorted_by_file_offset(&self) -> bool {
        section_headers_are_sorted_by_file_offset(&self.section_header_table)
    }

    /// Stable-sort the section header table by file offset
    ///
    /// Sorting invalidates every `link`/`info` field that is a section
    /// header table index; they are remembered by section name before the
    /// sort and restored after. `shstrndx` and the derived indices are
    /// updated. Returns the old-index to new-index map, which the caller
    /// must apply to every other structure holding section indices (symbol
    /// tables).
    pub fn sort_section_header_table_by_file_offset(&mut self) -> SectionIndexChangeMap {
        let count = self.section_header_table.len() as u16;
        if self.section_header_table_is_sorted_by_file_offset() {
            return SectionIndexChangeMap::identity(count);
        }

        let table = &self.section_header_table;
        let link_target_names: Vec<Option<String>> = table
            .iter()
            .map(|header| {
                if header.link_is_section_index() {
                    table
                        .get(header.link as usize)
                        .map(|target| target.name.clone())
                } else {
                    None
                }
            })
            .collect();
        let info_target_names: Vec<Option<String>> = table
            .iter()
            .map(|header| {
                if header.info_is_section_index() {
                    table
                        .get(header.info as usize)
                        .map(|target| target.name.clone())
                } else {
                    None
                }
            })
            .collect();

        let mut order: Vec<u16> = (0..count).collect();
        order.sort_by_key(|&index| self.section_header_table[usize::from(index)].offset);
        let change_map = SectionIndexChangeMap::from_sorted_order(&order);

        self.section_header_table = order
            .iter()
            .map(|&old_index| self.section_header_table[usize::from(old_index)].clone())
            .collect();

        for (new_index, &old_index) in order.iter().enumerate() {
            if let Some(name) = &link_target_names[usize::from(old_index)] {
                self.section_header_table[new_index].link =
                    u32::from(find_index_of_first_section_header(
                        &self.section_header_table,
                        name,
                    ));
            }
            if let Some(name) = &info_target_names[usize::from(old_index)] {
                self.section_header_table[new_index].info =
                    u32::from(find_index_of_first_section_header(
                        &self.section_header_table,
                        name,
                    ));
            }
        }

        self.file_header.shstrndx = change_map.index_for_old_index(self.file_header.shstrndx);
        self.recompute_known_section_indexes();

        change_map
    }

    /// Append a program header, updating `phnum` and the PT_PHDR sizes
    pub fn add_program_header(&mut self, header: ProgramHeader) {
        let entry_size = self.file_header.phentsize;
        self.program_header_table.add_header(header, entry_size);
        debug_assert!(self.program_header_table.header_count() <= usize::from(u16::MAX));
        self.file_header.phnum = self.program_header_table.header_count() as u16;
    }

    /// Move the section at `index` just past the current end of the file
    ///
    /// The new offset is rounded up to the page size or to the section's own
    /// alignment, and the new address re-establishes the page congruence
    /// `(addr % page) == (offset % page)`.
    fn place_section_at_end(&mut self, index: usize, alignment: MoveSectionAlignment) {
        let page_size = self.file_header.page_size();
        let file_end = self.find_global_file_offset_end();
        let address_end = self.find_global_virtual_address_end();

        let header = &mut self.section_header_table[index];
        let section_alignment = match alignment {
            MoveSectionAlignment::NextPage => page_size,
            MoveSectionAlignment::SectionAlignment => header.addralign.max(1),
        };

        header.offset = find_next_aligned_address(file_end, section_alignment);
        header.addr = find_next_congruent_address(address_end, header.offset, page_size);
    }

    /// Move the program interpreter section (`.interp`) to the end of the
    /// file, updating the PT_INTERP segment
    pub fn move_program_interpreter_section_to_end(&mut self, alignment: MoveSectionAlignment) {
        debug_assert!(self.contains_program_interpreter_section_header());

        let index = usize::from(self.interpreter_index.unwrap_or_default());
        self.place_section_at_end(index, alignment);

        let header = self.section_header_table[index].clone();
        if self
            .program_header_table
            .contains_program_interpreter_program_header()
        {
            let segment = self
                .program_header_table
                .program_interpreter_program_header_mut();
            segment.offset = header.offset;
            segment.vaddr = header.addr;
            segment.paddr = header.addr;
            segment.filesz = header.size;
            segment.memsz = header.size;
        }
    }

    /// Move the GNU hash table section (`.gnu.hash`) to the end of the file
    pub fn move_gnu_hash_table_to_end(&mut self, alignment: MoveSectionAlignment) {
        debug_assert!(self.contains_gnu_hash_table_section_header());

        let index = usize::from(self.gnu_hash_index.unwrap_or_default());
        self.place_section_at_end(index, alignment);
    }

    /// Move the dynamic section to the end of the file, updating the
    /// PT_DYNAMIC segment
    pub fn move_dynamic_section_to_end(&mut self, alignment: MoveSectionAlignment) {
        debug_assert!(self.contains_dynamic_section_header());

        let index = usize::from(self.dynamic_section_index.unwrap_or_default());
        self.place_section_at_end(index, alignment);

        let header = self.section_header_table[index].clone();
        if self.program_header_table.contains_dynamic_program_header() {
            self.program_header_table
                .set_dynamic_section_virtual_address_and_file_offset(header.addr, header.offset);
            self.program_header_table.set_dynamic_section_size(header.size);
        }
    }

    /// Move the dynamic string table section (`.dynstr`) to the end of the
    /// file
    pub fn move_dynamic_string_table_to_end(&mut self, alignment: MoveSectionAlignment) {
        debug_assert!(self.contains_dynamic_string_table_section_header());

        let index = usize::from(self.dynamic_string_table_index.unwrap_or_default());
        self.place_section_at_end(index, alignment);
    }

    /// Move every note section, as one contiguous group, to the end of the
    /// file, and rebuild the PT_NOTE segment bounds
    ///
    /// All notes share one PT_NOTE segment, so moving any one requires
    /// moving them all.
    pub fn move_note_sections_to_end(&mut self, alignment: MoveSectionAlignment) {
        let indexes = self.get_note_section_header_indexes();
        debug_assert!(!indexes.is_empty());

        let first_index = usize::from(indexes[0]);
        self.place_section_at_end(first_index, alignment);

        // Pack the remaining notes behind the first one, preserving the
        // address-to-offset delta so the whole group stays congruent. The
        // delta is a multiple of the page size but may be negative once
        // sections land past the end of the file, hence the wrapping
        // arithmetic.
        let first = &self.section_header_table[first_index];
        let delta = first.addr.wrapping_sub(first.offset);
        let mut offset_end = first.file_offset_end();

        for &index in &indexes[1..] {
            let header = &mut self.section_header_table[usize::from(index)];
            header.offset = find_next_aligned_address(offset_end, header.addralign.max(1));
            header.addr = header.offset.wrapping_add(delta);
            offset_end = header.file_offset_end();
        }

        if self.program_header_table.contains_note_program_header() {
            let first = &self.section_header_table[first_index];
            let begin = first.offset;
            let vaddr = first.addr;
            let size = offset_end - begin;
            let segment = self.program_header_table.note_program_header_mut();
            segment.offset = begin;
            segment.vaddr = vaddr;
            segment.paddr = vaddr;
            segment.filesz = size;
            segment.memsz = size;
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::elf::algorithm::virtual_address_and_file_offset_is_congruent;
    use crate::elf::file_header::ObjectFileType;
    use crate::elf::ident::{Class, DataFormat, Ident};

    fn file_header() -> FileHeader {
        FileHeader {
            ident: Ident {
                has_valid_elf_magic: true,
                class: Class::Class64,
                data_format: DataFormat::Lsb,
                version: 1,
                os_abi: 0,
                abi_version: 0,
            },
            object_file_type: ObjectFileType::SharedObject as u16,
            machine: 0x3e,
            version: 1,
            entry: 0,
            phoff: 64,
            shoff: 0x2000,
            flags: 0,
            ehsize: 64,
            phentsize: 56,
            phnum: 0,
            shentsize: 64,
            shnum: 0,
            shstrndx: 0,
        }
    }

    fn section(name: &str, section_type: u32, offset: u64, size: u64) -> SectionHeader {
        SectionHeader::builder()
            .name(name)
            .name_index(0)
            .section_type(section_type)
            .flags(0)
            .addr(offset)
            .offset(offset)
            .size(size)
            .link(0)
            .info(0)
            .addralign(8)
            .entsize(0)
            .build()
    }

    fn segment(segment_type: SegmentType, offset: u64, size: u64) -> ProgramHeader {
        let mut header = ProgramHeader {
            segment_type: 0,
            flags: 4,
            offset,
            vaddr: offset,
            paddr: offset,
            filesz: size,
            memsz: size,
            align: if segment_type == SegmentType::Load {
                0x1000
            } else {
                8
            },
        };
        header.set_segment_type(segment_type);
        header
    }

    fn headers_under_test() -> FileAllHeaders {
        let mut headers = FileAllHeaders::default();
        headers.set_file_header(file_header());

        let mut program_headers = ProgramHeaderTable::default();
        program_headers.add_header_from_file(segment(SegmentType::ProgramHeaderTable, 64, 4 * 56));
        program_headers.add_header_from_file(segment(SegmentType::Load, 0, 0x1000));
        program_headers.add_header_from_file(segment(SegmentType::Interpreter, 0x200, 28));
        program_headers.add_header_from_file(segment(SegmentType::Dynamic, 0x800, 0x100));
        headers.set_program_header_table(program_headers);

        let mut null = section("", 0, 0, 0);
        null.addralign = 0;
        let mut dynamic = section(".dynamic", 6, 0x800, 0x100);
        dynamic.link = 3;
        let dynstr = section(".dynstr", 3, 0x900, 0x40);
        let interp = section(".interp", 1, 0x200, 28);
        headers.set_section_header_table(vec![null, interp, dynamic, dynstr]);
        headers
    }

    #[test]
    fn test_header_counts_stay_in_sync() {
        let headers = headers_under_test();
        assert_eq!(headers.file_header().phnum, 4);
        assert_eq!(headers.file_header().shnum, 4);
        assert!(headers.seems_valid());
    }

    #[test]
    fn test_known_section_indexes() {
        let headers = headers_under_test();
        assert_eq!(headers.dynamic_section_header_index(), 2);
        assert_eq!(headers.dynamic_string_table_section_header_index(), 3);
        assert!(headers.contains_program_interpreter_section_header());
        assert!(!headers.contains_got_plt_section_header());
        assert!(!headers.contains_gnu_hash_table_section_header());
    }

    #[test]
    fn test_set_dynamic_section_size_updates_both_headers() {
        let mut headers = headers_under_test();
        headers.set_dynamic_section_size(0x120);
        assert_eq!(headers.dynamic_section_header().size, 0x120);
        let segment = headers.program_header_table().dynamic_program_header();
        assert_eq!(segment.filesz, 0x120);
        assert_eq!(segment.memsz, 0x120);
    }

    #[test]
    fn test_add_program_header_updates_phnum_and_phdr() {
        let mut headers = headers_under_test();
        headers.add_program_header(segment(SegmentType::Load, 0x3000, 0x40));
        assert_eq!(headers.file_header().phnum, 5);
        let phdr = headers.program_header_table().program_header_table_header();
        assert_eq!(phdr.filesz, 5 * 56);
        assert_eq!(phdr.memsz, 5 * 56);
    }

    #[test]
    fn test_global_ends() {
        let headers = headers_under_test();
        // The section header table is the highest record: 0x2000 + 4 * 64
        assert_eq!(headers.find_global_file_offset_end(), 0x2000 + 4 * 64);
        assert_eq!(headers.find_global_virtual_address_end(), 0x1000);
    }

    #[test]
    fn test_sort_is_identity_when_sorted() {
        let mut headers = headers_under_test();
        let map = headers.sort_section_header_table_by_file_offset();
        assert!(map.is_identity());
    }

    #[test]
    fn test_sort_repairs_links_and_shstrndx() {
        let mut headers = FileAllHeaders::default();
        let mut fh = file_header();
        fh.shstrndx = 1;
        headers.set_file_header(fh);

        let mut program_headers = ProgramHeaderTable::default();
        program_headers.add_header_from_file(segment(SegmentType::Dynamic, 0x400, 0x100));
        headers.set_program_header_table(program_headers);

        // Out of file-offset order: shstrtab after dynamic in the file but
        // before it in the table
        let null = section("", 0, 0, 0);
        let shstrtab = section(".shstrtab", 3, 0x900, 0x40);
        let mut dynamic = section(".dynamic", 6, 0x400, 0x100);
        dynamic.link = 3;
        let dynstr = section(".dynstr", 3, 0x600, 0x40);
        headers.set_section_header_table(vec![null, shstrtab, dynamic, dynstr]);

        let map = headers.sort_section_header_table_by_file_offset();
        assert!(!map.is_identity());

        // New order: null, .dynamic, .dynstr, .shstrtab
        assert_eq!(headers.section_header_table()[1].name, ".dynamic");
        assert_eq!(headers.section_header_table()[2].name, ".dynstr");
        assert_eq!(headers.section_header_table()[3].name, ".shstrtab");
        assert_eq!(map.index_for_old_index(1), 3);
        assert_eq!(map.index_for_old_index(2), 1);
        assert_eq!(map.index_for_old_index(3), 2);

        // The dynamic section still links to .dynstr and shstrndx follows
        assert_eq!(headers.section_header_table()[1].link, 2);
        assert_eq!(headers.file_header().shstrndx, 3);
        assert_eq!(headers.dynamic_section_header_index(), 1);
    }

    #[test]
    fn test_move_dynamic_section_to_end() {
        let mut headers = headers_under_test();
        let file_end = headers.find_global_file_offset_end();
        headers.move_dynamic_section_to_end(MoveSectionAlignment::SectionAlignment);

        let header = headers.dynamic_section_header();
        assert!(header.offset >= file_end);
        assert_eq!(header.offset % 8, 0);
        assert!(virtual_address_and_file_offset_is_congruent(
            header.addr,
            header.offset,
            0x1000
        ));

        let segment = headers.program_header_table().dynamic_program_header();
        assert_eq!(segment.offset, header.offset);
        assert_eq!(segment.vaddr, header.addr);
        assert_eq!(segment.filesz, header.size);
    }

    #[test]
    fn test_move_interpreter_section_next_page() {
        let mut headers = headers_under_test();
        headers.move_program_interpreter_section_to_end(MoveSectionAlignment::NextPage);

        let header = headers.program_interpreter_section_header();
        assert_eq!(header.offset % 0x1000, 0);
        assert_eq!(header.addr % 0x1000, 0);
        let segment = headers
            .program_header_table()
            .program_interpreter_program_header();
        assert_eq!(segment.offset, header.offset);
        assert_eq!(segment.filesz, header.size);
    }

    #[test]
    fn test_find_count_of_sections_to_move() {
        // size: 20 at 50, 30 gap at 70, 10 at 100
        let table = vec![
            section("", 0, 0, 0),
            section(".a", 1, 50, 20),
            section(".b", 1, 100, 10),
        ];
        // 16 bytes fit in .a alone: move the null section and .a
        assert_eq!(find_count_of_sections_to_move_to_free_size(&table, 16), 2);
        // 40 bytes need .a plus the gap behind it
        assert_eq!(find_count_of_sections_to_move_to_free_size(&table, 40), 3);
        // 56 bytes need .a, the gap and .b
        assert_eq!(find_count_of_sections_to_move_to_free_size(&table, 56), 3);
        // More than everything: count exceeds the table size
        assert_eq!(find_count_of_sections_to_move_to_free_size(&table, 100), 4);
    }

    #[test]
    fn test_make_load_program_header_covering_sections() {
        let table = vec![
            section("", 0, 0, 0),
            section(".a", 1, 0x3000, 0x40),
            section(".b", 1, 0x3040, 0x20),
        ];
        let load = make_load_program_header_covering_sections(&[1, 2], &table, 0x1000);
        assert_eq!(load.segment_type(), SegmentType::Load);
        assert_eq!(load.offset, 0x3000);
        assert_eq!(load.filesz, 0x60);
        assert_eq!(load.memsz, 0x60);
        assert_eq!(load.align, 0x1000);
    }
}
