//! Error types for ELF and PE file handling

/// Error type for string table framing problems
///
/// From the TIS ELF specification v1.2, Book I, "String Table": a string
/// table begins and ends with a null byte. A table that violates either
/// framing rule cannot be indexed safely.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StringTableError {
    #[error("string table does not begin with a null byte")]
    /// The first byte of the table is not NUL
    MissingLeadingNullByte,
    #[error("string table is not null terminated")]
    /// The last byte of the table is not NUL
    MissingTerminatingNullByte,
    #[error("index {index} is out of the string table bounds ({size} bytes)")]
    /// An entry referenced an index past the end of the table
    IndexOutOfBounds {
        /// The requested index
        index: u64,
        /// The size of the table in bytes
        size: u64,
    },
}

/// Error type for malformed or truncated input files
///
/// Raised by the readers. Non-recoverable for the current file: the first
/// error encountered is surfaced verbatim and extraction stops.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("file is too small to read {what}: need {required} bytes, have {available}")]
    /// The map ends before the record that was about to be decoded
    FileTooSmall {
        /// Name of the record or field being decoded
        what: &'static str,
        /// End offset required to decode it
        required: u64,
        /// Size of the map
        available: u64,
    },
    #[error("invalid magic type")]
    /// The file does not start with the expected magic value
    InvalidMagicType,
    #[error("string starting at offset {offset} is not null terminated")]
    /// A bounded string ran to the end of its region without a NUL
    NotNullTerminatedString {
        /// File offset the string starts at
        offset: u64,
    },
    #[error(transparent)]
    /// A string table violated its framing rules
    StringTable(#[from] StringTableError),
    #[error("could not read the dynamic section: {reason}")]
    /// The dynamic section or its string table is malformed
    DynamicSectionRead {
        /// What was wrong
        reason: String,
    },
    #[error("could not read note section {name}: {reason}")]
    /// A note section is malformed
    NoteSectionRead {
        /// Name of the offending section
        name: String,
        /// What was wrong
        reason: String,
    },
    #[error("could not read the import tables: {reason}")]
    /// A PE import or delay-load directory is malformed
    ImportDirectoryRead {
        /// What was wrong
        reason: String,
    },
    #[error("could not read the GNU hash table: {reason}")]
    /// The `.gnu.hash` section is malformed
    GnuHashTableRead {
        /// What was wrong
        reason: String,
    },
    #[error("unexpected {what} entry size {actual}, expected at least {expected}")]
    /// A table declares an entry size the decoder cannot work with
    UnexpectedEntrySize {
        /// Name of the table being decoded
        what: &'static str,
        /// Minimum entry size the decoder needs
        expected: u64,
        /// Entry size the table declares
        actual: u64,
    },
    #[error("section header {name} links to index {link}, but the table has {count} entries")]
    /// A section header `link` index is out of range
    SectionLinkOutOfRange {
        /// Name of the offending section header
        name: String,
        /// The out-of-range index
        link: u32,
        /// Count of entries in the section header table
        count: u16,
    },
    #[error("file is not an executable or a shared library")]
    /// The object-file type permits no edits (only Exec and SharedObject do)
    NotAnExecutableOrSharedLibrary,
}

/// Error type for edits the layout engine cannot carry out
///
/// After such an error the `FileWriterFile` is poisoned and must be
/// discarded.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveSectionError {
    #[error("moving section {name} to the end is not supported")]
    /// The section's move semantics are not implemented
    UnsupportedSection {
        /// Name of the section that was asked to move
        name: String,
    },
    #[error("should move {required} sections, but file contains only {available} sections")]
    /// Too few low-offset sections exist to free room for a program header
    NotEnoughSections {
        /// Count of sections that would have to move
        required: usize,
        /// Count of sections in the file
        available: usize,
    },
    #[error("file was poisoned by a previous failed edit")]
    /// A mutation was attempted after a failed edit
    FileIsInvalid,
}

/// Error type for failures while persisting a mutated file
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("output surface is too small: need {required} bytes, have {available}")]
    /// The writable map is smaller than the minimum size to write the file
    MapTooSmall {
        /// Minimum size the model needs
        required: u64,
        /// Size of the map
        available: u64,
    },
    #[error("an I/O error occurred: {kind}")]
    /// An OS-level I/O failure
    Io {
        /// The kind of I/O error
        kind: std::io::ErrorKind,
    },
}

/// Error type covering every failure of the file IO engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    /// Malformed or truncated input
    Read(#[from] ReadError),
    #[error(transparent)]
    /// Failure while persisting the file
    Write(#[from] WriteError),
    #[error(transparent)]
    /// An edit the layout engine refuses
    MoveSection(#[from] MoveSectionError),
    #[error("an I/O error occurred: {kind}")]
    /// An OS-level I/O failure outside the writer
    Io {
        /// The kind of I/O error
        kind: std::io::ErrorKind,
    },
    #[error("operation is not supported for this file format")]
    /// A format-specific operation was invoked on the wrong format
    UnsupportedFileFormat,
    #[error("file was opened read-only")]
    /// A mutation was attempted on a read-only mapping
    FileIsReadOnly,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io { kind: e.kind() }
    }
}

impl From<StringTableError> for Error {
    fn from(e: StringTableError) -> Self {
        Self::Read(ReadError::StringTable(e))
    }
}

/// Result alias for fallible operations of this crate
pub type Result<T> = std::result::Result<T, Error>;
