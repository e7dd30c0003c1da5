//! Implementation of the PE headers: the DOS stub header, the COFF file
//! header and the PE32/PE32+ optional header.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// The DOS magic value, `'M' 'Z'`
pub const DOS_MAGIC: [u8; 2] = [0x4d, 0x5a];

/// The PE signature, `'P' 'E' 0 0`
pub const PE_SIGNATURE: [u8; 4] = [0x50, 0x45, 0x00, 0x00];

/// File offset of the PE signature offset field in the DOS header
/// (e_lfanew)
pub const PE_SIGNATURE_OFFSET_OFFSET: u64 = 0x3c;

/// Size in bytes of the DOS header
pub const DOS_HEADER_SIZE: u64 = 64;

/// Size in bytes of the COFF file header
pub const COFF_HEADER_SIZE: u64 = 20;

/// Minimum size in bytes of the optional header
///
/// The optional header must at least carry the standard fields and the
/// Windows-specific fields; for a PE32 image that is 96 bytes and for a
/// PE32+ image 112. At least one data directory is assumed present, so 112
/// is the minimum accepted here.
pub const MINIMUM_OPTIONAL_HEADER_SIZE: u16 = 112;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// The decoded DOS header, reduced to the one field that matters: the file
/// offset of the PE signature
pub struct DosHeader {
    /// File offset of the PE signature (e_lfanew)
    pub pe_signature_offset: u32,
}

impl DosHeader {
    /// Check if this header is absent
    pub fn is_null(&self) -> bool {
        self.pe_signature_offset == 0
    }

    /// Check if this header seems valid
    pub fn seems_valid(&self) -> bool {
        !self.is_null()
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The machine a PE image targets, restricted to the architectures this
/// crate recognises
pub enum MachineType {
    /// Applicable to any machine type
    Unknown = 0x0,
    /// x64 (x86-64)
    Amd64 = 0x8664,
    /// Intel 386 or later and compatible processors
    I386 = 0x14c,
    /// Not from the standard
    NotHandled = 0x9998,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// The COFF file header
pub struct CoffHeader {
    /// Raw target machine (see [CoffHeader::machine_type])
    pub machine: u16,
    /// Count of sections in the section table
    pub number_of_sections: u16,
    /// Low 32 bits of the link time
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, 0 if absent
    pub pointer_to_symbol_table: u32,
    /// Count of entries of the COFF symbol table
    pub number_of_symbols: u32,
    /// Size in bytes of the optional header that follows
    pub size_of_optional_header: u16,
    /// Attribute flags
    pub characteristics: u16,
}

impl CoffHeader {
    /// Get the typed machine
    pub fn machine_type(&self) -> MachineType {
        MachineType::from_u16(self.machine).unwrap_or(MachineType::NotHandled)
    }

    /// Check if this header refers to a valid executable image
    /// (IMAGE_FILE_EXECUTABLE_IMAGE)
    pub fn is_valid_executable_image(&self) -> bool {
        self.characteristics & 0x0002 != 0
    }

    /// Check if this header refers to a machine based on a 32-bit word
    /// architecture (IMAGE_FILE_32BIT_MACHINE)
    pub fn is_32_bit_word_machine(&self) -> bool {
        self.characteristics & 0x0100 != 0
    }

    /// Check if this header refers to a DLL image (IMAGE_FILE_DLL)
    pub fn is_dll(&self) -> bool {
        self.characteristics & 0x2000 != 0
    }

    /// Check if this COFF header seems valid
    pub fn seems_valid(&self) -> bool {
        if self.machine_type() == MachineType::NotHandled
            || self.machine_type() == MachineType::Unknown
        {
            return false;
        }
        if !self.is_valid_executable_image() {
            return false;
        }
        if self.size_of_optional_header < MINIMUM_OPTIONAL_HEADER_SIZE {
            return false;
        }
        true
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The optional header magic, discriminating PE32 from PE32+
pub enum MagicType {
    /// Not from the standard
    Unknown = 0,
    /// PE32, 32-bit executable
    Pe32 = 0x10b,
    /// PE32+, 64-bit executable
    Pe32Plus = 0x20b,
    /// ROM image
    RomImage = 0x107,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// One entry of the data directory array of the optional header
pub struct ImageDataDirectory {
    /// RVA of the table the directory points at
    pub virtual_address: u32,
    /// Size in bytes of that table
    pub size: u32,
}

impl ImageDataDirectory {
    /// Check if this directory is absent
    pub fn is_null(&self) -> bool {
        self.virtual_address == 0 || self.size == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// The optional header, reduced to the fields the import readers need
pub struct OptionalHeader {
    /// Raw magic (see [OptionalHeader::magic_type])
    pub magic: u16,
    /// Count of data directories that follow the Windows-specific fields
    pub number_of_rva_and_sizes: u32,
    /// Directory of the import table (index 1)
    pub import_table: ImageDataDirectory,
    /// Directory of the delay-load import table (index 13)
    pub delay_import_table: ImageDataDirectory,
}

impl OptionalHeader {
    /// Get the typed magic
    pub fn magic_type(&self) -> MagicType {
        MagicType::from_u16(self.magic).unwrap_or(MagicType::Unknown)
    }

    /// Check if this header seems valid
    pub fn seems_valid(&self) -> bool {
        matches!(self.magic_type(), MagicType::Pe32 | MagicType::Pe32Plus)
            && self.number_of_rva_and_sizes != 0
    }

    /// Check if this header declares the import table
    pub fn contains_import_table(&self) -> bool {
        self.number_of_rva_and_sizes >= 2 && !self.import_table.is_null()
    }

    /// Check if this header declares the delay-load import table
    pub fn contains_delay_import_table(&self) -> bool {
        self.number_of_rva_and_sizes >= 14 && !self.delay_import_table.is_null()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_coff_header_predicates() {
        let header = CoffHeader {
            machine: 0x8664,
            number_of_sections: 2,
            time_date_stamp: 0,
            pointer_to_symbol_table: 0,
            number_of_symbols: 0,
            size_of_optional_header: 240,
            characteristics: 0x2002,
        };
        assert_eq!(header.machine_type(), MachineType::Amd64);
        assert!(header.is_valid_executable_image());
        assert!(header.is_dll());
        assert!(!header.is_32_bit_word_machine());
        assert!(header.seems_valid());

        let mut object_file = header;
        object_file.characteristics = 0;
        assert!(!object_file.seems_valid());

        let mut arm = header;
        arm.machine = 0xaa64;
        assert_eq!(arm.machine_type(), MachineType::NotHandled);
        assert!(!arm.seems_valid());
    }

    #[test]
    fn test_optional_header_directories() {
        let mut header = OptionalHeader {
            magic: 0x20b,
            number_of_rva_and_sizes: 16,
            import_table: ImageDataDirectory {
                virtual_address: 0x2000,
                size: 60,
            },
            delay_import_table: ImageDataDirectory::default(),
        };
        assert_eq!(header.magic_type(), MagicType::Pe32Plus);
        assert!(header.seems_valid());
        assert!(header.contains_import_table());
        assert!(!header.contains_delay_import_table());

        header.number_of_rva_and_sizes = 1;
        assert!(!header.contains_import_table());
    }
}
