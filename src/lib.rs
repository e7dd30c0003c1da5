//! Inspection and rewriting of linkage metadata in compiled binaries,
//! without recourse to a linker.
//!
//! Two wire-level object formats are handled: ELF (System V), readable and
//! editable, and PE/COFF (Windows), readable only. The central operation is
//! reading a binary's runtime search path, needed-library list and
//! interpreter, and persisting an edit of the runtime search path
//! (DT_RUNPATH) while preserving every invariant the loader requires:
//! records referencing each other by file offset and virtual address,
//! page-congruent load segments, and cross references the formats are not
//! self-relocating enough to carry automatically. An edit that cannot be
//! done in place moves the grown sections to the end of the file under a
//! freshly synthesised load segment; an edit that would require rewriting
//! relocations is refused.
//!
//! [engine::ExecutableFileIoEngine] is the entry point; the `elf` and `pe`
//! modules expose the underlying readers, the model, and the ELF layout
//! engine and writer.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, missing_docs)]

pub mod codec;
pub mod elf;
pub mod engine;
pub mod error;
pub mod pe;

pub use engine::{
    ExecutableFileFormat, ExecutableFileIoEngine, OpenMode, OperatingSystem, Platform, Processor,
};
pub use error::{Error, MoveSectionError, ReadError, Result, StringTableError, WriteError};

/// Diagnostics sink for the components that report progress
///
/// The layout engine and the IO engine receive one by reference; components
/// that never log do not.
pub trait Logger {
    /// Report something the user should see
    fn message(&mut self, text: &str);

    /// Report a detail only useful when tracing an edit
    fn verbose(&mut self, text: &str);
}

/// A [Logger] that discards everything
pub struct NullLogger;

impl Logger for NullLogger {
    fn message(&mut self, _text: &str) {}

    fn verbose(&mut self, _text: &str) {}
}
