//! Note sections (`.note.*`) and the table grouping them.
//!
//! All notes of a file share one PT_NOTE segment, so moving any of them
//! means moving them all; the table keeps each note next to its section
//! header so the group can be relocated and re-emitted together.

use typed_builder::TypedBuilder;

use crate::elf::section_header::SectionHeader;

#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
/// One decoded note section
pub struct NoteSection {
    /// The note owner name, without its trailing NUL
    #[builder(setter(into))]
    pub name: String,
    /// Declared size of the description in bytes (may not be word-aligned)
    pub description_size: u32,
    /// Owner-specific note type
    pub note_type: u32,
    /// The description, as the 4-byte words stored in the file (padding
    /// included)
    pub description: Vec<u32>,
}

impl NoteSection {
    /// Check if this note is absent
    pub fn is_null(&self) -> bool {
        self.name.is_empty() && self.description.is_empty()
    }

    /// Size in bytes of the name field, its NUL and padding to a 4-byte
    /// boundary included
    pub fn padded_name_size(&self) -> u64 {
        let with_nul = self.name.len() as u64 + 1;
        with_nul.next_multiple_of(4)
    }

    /// Size in bytes of this note as stored in the file
    pub fn byte_count(&self) -> u64 {
        12 + self.padded_name_size() + 4 * self.description.len() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Every note section of a file, each next to its section header
pub struct NoteSectionTable {
    sections: Vec<(SectionHeader, NoteSection)>,
}

impl NoteSectionTable {
    /// Check if the file has no note sections
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Count of note sections
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// The note sections with their headers, in file order
    pub fn sections(&self) -> &[(SectionHeader, NoteSection)] {
        &self.sections
    }

    /// Add a note section decoded from the file
    pub fn add_section_from_file(&mut self, header: SectionHeader, section: NoteSection) {
        self.sections.push((header, section));
    }

    /// Refresh the stored headers from `section_header_table` after the
    /// group was moved
    pub fn update_section_headers(&mut self, section_header_table: &[SectionHeader]) {
        for (header, _) in &mut self.sections {
            if let Some(updated) = section_header_table
                .iter()
                .find(|candidate| candidate.name == header.name)
            {
                *header = updated.clone();
            }
        }
    }
}
