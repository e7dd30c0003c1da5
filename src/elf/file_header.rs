//! Implementation of the ELF file header, the only record required to live
//! at a fixed offset (0) in the file.

use std::fmt::Display;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use typed_builder::TypedBuilder;

use crate::elf::ident::{Class, Ident};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The object file type (e_type)
pub enum ObjectFileType {
    /// No file type
    None = 0x00,
    /// A relocatable file
    RelocatableFile = 0x01,
    /// An executable file
    ExecutableFile = 0x02,
    /// A shared object
    SharedObject = 0x03,
    /// A core file
    CoreFile = 0x04,
    /// Not from the standard
    Unknown = 0x1000,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The machine the object targets (e_machine), restricted to the
/// architectures this crate recognises
pub enum Machine {
    /// No specific instruction set
    None = 0x00,
    /// x86
    X86 = 0x03,
    /// AMD x86-64
    X86_64 = 0x3e,
    /// Not from the standard
    Unknown = 0xffff,
}

/// Size in bytes of the file header of a 32-bit file
pub const FILE_HEADER_SIZE_32: u16 = 52;
/// Size in bytes of the file header of a 64-bit file
pub const FILE_HEADER_SIZE_64: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
/// The ELF file header
///
/// Open-domain fields (`object_file_type`, `machine`) keep their raw wire
/// value so an unchanged header re-serialises byte-exact; the typed
/// accessors interpret them.
pub struct FileHeader {
    /// The identification bytes. See [Ident].
    pub ident: Ident,
    /// Raw object file type (e_type). See [FileHeader::object_file_type].
    pub object_file_type: u16,
    /// Raw machine (e_machine). See [FileHeader::machine].
    pub machine: u16,
    /// The object file version (1 for every conforming file)
    pub version: u32,
    /// Virtual address of the entry point, 0 if the file has none
    pub entry: u64,
    /// File offset of the program header table
    pub phoff: u64,
    /// File offset of the section header table
    pub shoff: u64,
    /// Processor-specific flags
    pub flags: u32,
    /// Size in bytes of this header
    pub ehsize: u16,
    /// Size in bytes of one program header table entry
    pub phentsize: u16,
    /// Count of program header table entries
    pub phnum: u16,
    /// Size in bytes of one section header table entry
    pub shentsize: u16,
    /// Count of section header table entries
    pub shnum: u16,
    /// Index of the section name string table in the section header table
    pub shstrndx: u16,
}

impl Default for FileHeader {
    /// An all-zero header with an invalid identification
    fn default() -> Self {
        Self {
            ident: Ident::default(),
            object_file_type: 0,
            machine: 0,
            version: 0,
            entry: 0,
            phoff: 0,
            shoff: 0,
            flags: 0,
            ehsize: 0,
            phentsize: 0,
            phnum: 0,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        }
    }
}

impl FileHeader {
    /// Get the typed object file type
    pub fn object_file_type(&self) -> ObjectFileType {
        ObjectFileType::from_u16(self.object_file_type).unwrap_or(ObjectFileType::Unknown)
    }

    /// Get the typed machine
    pub fn machine(&self) -> Machine {
        Machine::from_u16(self.machine).unwrap_or(Machine::Unknown)
    }

    /// Check if this file is an executable or a shared library
    ///
    /// Only those object file types are legal to edit.
    pub fn is_executable_or_shared_library(&self) -> bool {
        matches!(
            self.object_file_type(),
            ObjectFileType::ExecutableFile | ObjectFileType::SharedObject
        )
    }

    /// Size in bytes this header must declare for its class
    pub fn expected_header_size(&self) -> u16 {
        match self.ident.class {
            Class::Class64 => FILE_HEADER_SIZE_64,
            _ => FILE_HEADER_SIZE_32,
        }
    }

    /// Check whether this header seems to describe a file this crate can
    /// edit
    pub fn seems_valid(&self) -> bool {
        self.ident.is_valid()
            && self.is_executable_or_shared_library()
            && self.ehsize == self.expected_header_size()
    }

    /// The page size assumed for load-segment congruence
    pub fn page_size(&self) -> u64 {
        0x1000
    }

    /// End offset (1 past the last byte) of the program header table
    pub fn program_header_table_end(&self) -> u64 {
        self.phoff + u64::from(self.phnum) * u64::from(self.phentsize)
    }

    /// End offset (1 past the last byte) of the section header table
    pub fn section_header_table_end(&self) -> u64 {
        self.shoff + u64::from(self.shnum) * u64::from(self.shentsize)
    }
}

impl Display for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "class: {:?}, data format: {:?}",
            self.ident.class, self.ident.data_format
        )?;
        writeln!(
            f,
            "type: {:#06x} ({:?}), machine: {:#06x} ({:?})",
            self.object_file_type,
            self.object_file_type(),
            self.machine,
            self.machine()
        )?;
        writeln!(f, "entry: {:#x}", self.entry)?;
        writeln!(
            f,
            "program headers: {} entries of {} bytes at {:#x}",
            self.phnum, self.phentsize, self.phoff
        )?;
        writeln!(
            f,
            "section headers: {} entries of {} bytes at {:#x} (shstrndx: {})",
            self.shnum, self.shentsize, self.shoff, self.shstrndx
        )
    }
}
