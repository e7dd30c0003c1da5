//! Implementation of program headers, which describe the segments the
//! loader maps at run time.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use typed_builder::TypedBuilder;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The segment type (p_type)
pub enum SegmentType {
    /// Unused entry
    Null = 0,
    /// Loadable segment
    Load = 1,
    /// Dynamic linking information
    Dynamic = 2,
    /// Program interpreter path
    Interpreter = 3,
    /// Auxiliary information
    Note = 4,
    /// The program header table itself
    ProgramHeaderTable = 6,
    /// Thread-local storage template
    Tls = 7,
    /// Exception handling frame (GNU extension)
    GnuEhFrame = 0x6474_e550,
    /// Stack executability marker (GNU extension)
    GnuStack = 0x6474_e551,
    /// Region to make read-only after relocation (GNU extension)
    GnuRelRo = 0x6474_e552,
    /// Not from the standard
    Unknown = 0xffff_ffff,
}

bitflags! {
    /// Segment permission flags (p_flags)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentPermissions: u32 {
        /// Executable segment
        const EXECUTE = 0x1;
        /// Writable segment
        const WRITE = 0x2;
        /// Readable segment
        const READ = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
/// A program header
///
/// The raw `segment_type` and `flags` words are kept so unrecognised values
/// re-serialise byte-exact.
///
/// For a Load segment the loader requires
/// `vaddr % align == offset % align`; any edit changing either field must
/// re-establish the congruence.
pub struct ProgramHeader {
    /// Raw segment type (p_type). See [ProgramHeader::segment_type].
    pub segment_type: u32,
    /// Raw permission flags (p_flags)
    pub flags: u32,
    /// File offset of the segment's first byte
    pub offset: u64,
    /// Virtual address of the segment's first byte
    pub vaddr: u64,
    /// Physical address, on platforms where that is meaningful
    pub paddr: u64,
    /// Count of bytes of the segment in the file
    pub filesz: u64,
    /// Count of bytes of the segment in memory
    pub memsz: u64,
    /// Alignment of the segment in memory and in the file
    pub align: u64,
}

impl ProgramHeader {
    /// Get the typed segment type
    pub fn segment_type(&self) -> SegmentType {
        SegmentType::from_u32(self.segment_type).unwrap_or(SegmentType::Unknown)
    }

    /// Set the segment type
    pub fn set_segment_type(&mut self, segment_type: SegmentType) {
        self.segment_type = segment_type as u32;
    }

    /// Get the permission flags (ignoring OS- and processor-specific bits)
    pub fn permissions(&self) -> SegmentPermissions {
        SegmentPermissions::from_bits_truncate(self.flags)
    }

    /// Set the permission flags
    pub fn set_permissions(&mut self, permissions: SegmentPermissions) {
        self.flags = permissions.bits();
    }

    /// File offset 1 past the last byte of this segment in the file
    pub fn file_offset_end(&self) -> u64 {
        self.offset + self.filesz
    }

    /// Virtual address 1 past the last byte of this segment in memory
    pub fn virtual_address_end(&self) -> u64 {
        self.vaddr + self.memsz
    }
}
