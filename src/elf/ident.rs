//! Implementation of the identification bytes at the beginning of an ELF
//! file. They specify how the rest of the file is to be decoded and are
//! themselves class- and endianness-independent.

use num_derive::{FromPrimitive, ToPrimitive};
use typed_builder::TypedBuilder;

/// The ELF magic value, `0x7F 'E' 'L' 'F'`
pub const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

/// Count of identification bytes at the beginning of a file (EI_NIDENT)
pub const IDENT_SIZE: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
/// The file's class, i.e. whether its words occupy 4 or 8 bytes
pub enum Class {
    /// Unspecified or invalid class
    None = 0,
    /// 32-bit objects
    Class32 = 1,
    /// 64-bit objects
    Class64 = 2,
}

impl Class {
    /// Size in bytes of a N-word (address, offset) for this class
    ///
    /// Must not be called on [Class::None].
    pub fn n_word_size(self) -> u64 {
        match self {
            Class::Class32 => 4,
            Class::Class64 => 8,
            Class::None => unreachable!("a valid class is required"),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
/// The file's data format, i.e. whether multi-byte words are stored
/// least- or most-significant byte first
pub enum DataFormat {
    /// Unspecified or invalid data format
    None = 0,
    /// Two's complement, little-endian
    Lsb = 1,
    /// Two's complement, big-endian
    Msb = 2,
}

/// OS ABI byte for Unix System V
pub const OS_ABI_SYSTEM_V: u8 = 0;
/// OS ABI byte for objects using GNU/Linux ELF extensions
pub const OS_ABI_LINUX: u8 = 3;
/// First OS ABI byte of the architecture-specific range
pub const OS_ABI_ARCHITECTURE_SPECIFIC: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
/// The decoded identification bytes of an ELF file
pub struct Ident {
    /// Whether the first four bytes were the ELF magic value
    pub has_valid_elf_magic: bool,
    /// The file's class. See [Class].
    pub class: Class,
    /// The file's data format. See [DataFormat].
    pub data_format: DataFormat,
    /// The identification version (1 for every conforming file)
    pub version: u8,
    /// The OS ABI byte. Only System V, Linux and the architecture-specific
    /// range are considered valid here.
    pub os_abi: u8,
    /// The ABI version, interpreted relative to [Ident::os_abi]
    pub abi_version: u8,
}

impl Default for Ident {
    /// An all-invalid identification, as an empty model starts out
    fn default() -> Self {
        Self {
            has_valid_elf_magic: false,
            class: Class::None,
            data_format: DataFormat::None,
            version: 0,
            os_abi: 0,
            abi_version: 0,
        }
    }
}

impl Ident {
    /// Check whether the OS ABI byte belongs to the supported set
    pub fn os_abi_is_valid(&self) -> bool {
        self.os_abi == OS_ABI_SYSTEM_V
            || self.os_abi == OS_ABI_LINUX
            || self.os_abi >= OS_ABI_ARCHITECTURE_SPECIFIC
    }

    /// Check whether these identification bytes describe a file this crate
    /// can decode
    pub fn is_valid(&self) -> bool {
        self.has_valid_elf_magic
            && self.class != Class::None
            && self.data_format != DataFormat::None
            && self.version == 1
            && self.os_abi_is_valid()
    }
}
