//! Endian- and class-aware primitives to decode and encode the words an
//! object file is made of.
//!
//! The half-word and word accessors take the data format alone, so the PE
//! reader (always little-endian) shares them. The N-word, address, offset and
//! signed accessors depend on the file class (4 bytes on a 32-bit file,
//! 8 bytes on a 64-bit file) and take the full [Ident].
//!
//! Every accessor reads or writes at the *start* of the given slice; call
//! sites pass `&map[offset..]`. Slices shorter than the accessed word, or a
//! `None` class or data format, are programmer errors: every call site is
//! guarded by an explicit size check against a validated [Ident]. The buffer
//! may be unaligned.

use crate::elf::ident::{Class, DataFormat, Ident};

/// Decode a 16-bit half-word
pub fn get_half_word(array: &[u8], format: DataFormat) -> u16 {
    let bytes = [array[0], array[1]];
    match format {
        DataFormat::Lsb => u16::from_le_bytes(bytes),
        DataFormat::Msb => u16::from_be_bytes(bytes),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    }
}

/// Decode a 32-bit word
pub fn get_word(array: &[u8], format: DataFormat) -> u32 {
    let bytes = [array[0], array[1], array[2], array[3]];
    match format {
        DataFormat::Lsb => u32::from_le_bytes(bytes),
        DataFormat::Msb => u32::from_be_bytes(bytes),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    }
}

/// Decode a 64-bit extended word
pub fn get_extended_word(array: &[u8], format: DataFormat) -> u64 {
    let bytes = [
        array[0], array[1], array[2], array[3], array[4], array[5], array[6], array[7],
    ];
    match format {
        DataFormat::Lsb => u64::from_le_bytes(bytes),
        DataFormat::Msb => u64::from_be_bytes(bytes),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    }
}

/// Decode a N-word: 4 bytes on a 32-bit file, 8 bytes on a 64-bit file
pub fn get_n_word(array: &[u8], ident: Ident) -> u64 {
    match ident.class {
        Class::Class32 => u64::from(get_word(array, ident.data_format)),
        Class::Class64 => get_extended_word(array, ident.data_format),
        Class::None => unreachable!("codec requires a valid class"),
    }
}

/// Decode a signed N-word, sign-extended to 64 bits
pub fn get_signed_n_word(array: &[u8], ident: Ident) -> i64 {
    match ident.class {
        Class::Class32 => i64::from(get_word(array, ident.data_format) as i32),
        Class::Class64 => get_extended_word(array, ident.data_format) as i64,
        Class::None => unreachable!("codec requires a valid class"),
    }
}

/// Decode an address (a N-word)
pub fn get_address(array: &[u8], ident: Ident) -> u64 {
    get_n_word(array, ident)
}

/// Decode a file offset (a N-word)
pub fn get_offset(array: &[u8], ident: Ident) -> u64 {
    get_n_word(array, ident)
}

/// Encode a 16-bit half-word
pub fn set_half_word(array: &mut [u8], value: u16, format: DataFormat) {
    let bytes = match format {
        DataFormat::Lsb => value.to_le_bytes(),
        DataFormat::Msb => value.to_be_bytes(),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    };
    array[..2].copy_from_slice(&bytes);
}

/// Encode a 32-bit word
pub fn set_word(array: &mut [u8], value: u32, format: DataFormat) {
    let bytes = match format {
        DataFormat::Lsb => value.to_le_bytes(),
        DataFormat::Msb => value.to_be_bytes(),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    };
    array[..4].copy_from_slice(&bytes);
}

/// Encode a 64-bit extended word
pub fn set_extended_word(array: &mut [u8], value: u64, format: DataFormat) {
    let bytes = match format {
        DataFormat::Lsb => value.to_le_bytes(),
        DataFormat::Msb => value.to_be_bytes(),
        DataFormat::None => unreachable!("codec requires a valid data format"),
    };
    array[..8].copy_from_slice(&bytes);
}

/// Encode a N-word
///
/// On a 32-bit file the value must fit in 32 bits.
pub fn set_n_word(array: &mut [u8], value: u64, ident: Ident) {
    match ident.class {
        Class::Class32 => {
            debug_assert!(value <= u64::from(u32::MAX));
            set_word(array, value as u32, ident.data_format);
        }
        Class::Class64 => set_extended_word(array, value, ident.data_format),
        Class::None => unreachable!("codec requires a valid class"),
    }
}

/// Encode a signed N-word
pub fn set_signed_n_word(array: &mut [u8], value: i64, ident: Ident) {
    match ident.class {
        Class::Class32 => {
            debug_assert!(value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX));
            set_word(array, (value as i32) as u32, ident.data_format);
        }
        Class::Class64 => set_extended_word(array, value as u64, ident.data_format),
        Class::None => unreachable!("codec requires a valid class"),
    }
}

/// Encode an address (a N-word)
pub fn set_address(array: &mut [u8], value: u64, ident: Ident) {
    set_n_word(array, value, ident);
}

/// Encode a file offset (a N-word)
pub fn set_offset(array: &mut [u8], value: u64, ident: Ident) {
    set_n_word(array, value, ident);
}

/// Get the length in bytes of the NUL-terminated string at the start of
/// `array`, not counting the terminator
///
/// Returns `None` if the slice ends before a NUL is found.
pub fn find_null_terminated_string_length(array: &[u8]) -> Option<usize> {
    array.iter().position(|&b| b == 0)
}

/// Decode the NUL-terminated string at the start of `array` as UTF-8
///
/// Invalid UTF-8 sequences are replaced, as object files give no encoding
/// guarantee. Returns `None` if the slice ends before a NUL is found.
pub fn get_null_terminated_string(array: &[u8]) -> Option<String> {
    let len = find_null_terminated_string_length(array)?;
    Some(String::from_utf8_lossy(&array[..len]).into_owned())
}
