//! Implementation of section headers and the predicates the editor needs on
//! them.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use typed_builder::TypedBuilder;

/// First value of the OS-specific section type range
pub const SECTION_TYPE_OS_SPECIFIC_START: u32 = 0x6000_0000;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The section type (sh_type)
pub enum SectionType {
    /// Inactive header without an associated section
    Null = 0x00,
    /// Program data
    ProgramData = 0x01,
    /// Symbol table
    SymbolTable = 0x02,
    /// String table
    StringTable = 0x03,
    /// Relocation entries with addends
    Rela = 0x04,
    /// Dynamic linking information
    Dynamic = 0x06,
    /// Notes
    Note = 0x07,
    /// Program space with no file data (bss)
    NoBits = 0x08,
    /// Dynamic linker symbol table
    DynSym = 0x0b,
    /// Array of constructors
    InitArray = 0x0e,
    /// Array of destructors
    FiniArray = 0x0f,
    /// Any value at or above 0x60000000 (not directly from the standard)
    OsSpecific = 0x6000_0000,
}

#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
/// A section header with its name resolved through the section name string
/// table
///
/// The raw `section_type` word is kept so unrecognised values re-serialise
/// byte-exact.
pub struct SectionHeader {
    /// The resolved section name
    #[builder(setter(into))]
    pub name: String,
    /// Offset of the name in the section name string table (sh_name)
    pub name_index: u32,
    /// Raw section type (sh_type). See [SectionHeader::section_type].
    pub section_type: u32,
    /// Section attribute flags (sh_flags)
    pub flags: u64,
    /// Virtual address of the section's first byte, 0 if not mapped
    pub addr: u64,
    /// File offset of the section's first byte
    pub offset: u64,
    /// Size of the section in bytes
    pub size: u64,
    /// Interpretation depends on the section type; a section header table
    /// index for the types where [SectionHeader::link_is_section_index] holds
    pub link: u32,
    /// Interpretation depends on the section type; see
    /// [SectionHeader::info_is_section_index]
    pub info: u32,
    /// Required alignment of the section
    pub addralign: u64,
    /// Size of one entry, for sections holding fixed-size entries
    pub entsize: u64,
}

impl SectionHeader {
    /// Get the typed section type
    pub fn section_type(&self) -> SectionType {
        if self.section_type >= SECTION_TYPE_OS_SPECIFIC_START {
            return SectionType::OsSpecific;
        }
        SectionType::from_u32(self.section_type).unwrap_or(SectionType::Null)
    }

    /// Set the section type
    pub fn set_section_type(&mut self, section_type: SectionType) {
        self.section_type = section_type as u32;
    }

    /// Check whether `link` holds a section header table index
    ///
    /// True for the dynamic section and symbol tables (their string table),
    /// relocation sections (their symbol table) and the OS-specific range,
    /// which covers `.gnu.hash` and the GNU versioning sections.
    pub fn link_is_section_index(&self) -> bool {
        matches!(
            self.section_type(),
            SectionType::Dynamic
                | SectionType::SymbolTable
                | SectionType::DynSym
                | SectionType::Rela
                | SectionType::OsSpecific
        ) && self.link != 0
    }

    /// Check whether `info` holds a section header table index
    pub fn info_is_section_index(&self) -> bool {
        matches!(self.section_type(), SectionType::Rela) && self.info != 0
    }

    /// File offset 1 past the last byte of this section in the file
    ///
    /// A NoBits section occupies no file bytes.
    pub fn file_offset_end(&self) -> u64 {
        if self.section_type() == SectionType::NoBits {
            return self.offset;
        }
        self.offset + self.size
    }

    /// Virtual address 1 past the last byte of this section in memory
    pub fn virtual_address_end(&self) -> u64 {
        self.addr + self.size
    }

    /// Check if this header describes the `.dynamic` section
    pub fn is_dynamic_section_header(&self) -> bool {
        self.section_type() == SectionType::Dynamic && self.name == ".dynamic"
    }

    /// Check if this header describes the dynamic string table (`.dynstr`)
    pub fn is_dynamic_string_table_section_header(&self) -> bool {
        self.section_type() == SectionType::StringTable && self.name == ".dynstr"
    }

    /// Check if this header describes the program interpreter section
    /// (`.interp`)
    pub fn is_program_interpreter_section_header(&self) -> bool {
        self.section_type() == SectionType::ProgramData && self.name == ".interp"
    }

    /// Check if this header describes the GNU hash table (`.gnu.hash`)
    pub fn is_gnu_hash_table_section_header(&self) -> bool {
        self.section_type() == SectionType::OsSpecific && self.name == ".gnu.hash"
    }

    /// Check if this header describes a note section
    pub fn is_note_section_header(&self) -> bool {
        self.section_type() == SectionType::Note
    }

    /// Check if this header describes the global offset table (`.got`)
    pub fn is_got_section_header(&self) -> bool {
        self.section_type() == SectionType::ProgramData && self.name == ".got"
    }

    /// Check if this header describes the PLT global offset table
    /// (`.got.plt`)
    pub fn is_got_plt_section_header(&self) -> bool {
        self.section_type() == SectionType::ProgramData && self.name == ".got.plt"
    }

    /// Check if this header describes a debug information section
    pub fn is_debug_section_header(&self) -> bool {
        self.name.starts_with(".debug")
    }
}
