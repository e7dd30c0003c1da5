//! The file IO engine: opens an executable or shared library, memory-maps
//! it, detects its format, and offers the linkage-metadata queries and the
//! run-path edit on top of the format readers and writers.
//!
//! The format is picked once at construction through a small tagged enum;
//! no dynamic dispatch is involved.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::elf::file_header::Machine;
use crate::elf::ident::{OS_ABI_LINUX, OS_ABI_SYSTEM_V};
use crate::elf::{reader as elf_reader, writer as elf_writer};
use crate::error::{Error, Result};
use crate::pe::file_header::MachineType;
use crate::pe::reader as pe_reader;
use crate::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a file is opened
pub enum OpenMode {
    /// Queries only
    ReadOnly,
    /// Queries and edits
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The operating system a file targets
pub enum OperatingSystem {
    /// Linux (or another System V platform)
    Linux,
    /// Windows
    Windows,
    /// Could not be determined
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The executable file format
pub enum ExecutableFileFormat {
    /// ELF (System V)
    Elf,
    /// PE/COFF (Windows)
    Pe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The processor a file targets
pub enum Processor {
    /// 32-bit x86
    X86_32,
    /// 64-bit x86
    X86_64,
    /// Could not be determined
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a file runs on: operating system, file format and processor
pub struct Platform {
    /// The operating system
    pub operating_system: OperatingSystem,
    /// The executable file format
    pub executable_file_format: ExecutableFileFormat,
    /// The processor
    pub processor: Processor,
}

#[derive(Debug)]
enum Mapping {
    Read(Mmap),
    Write(MmapMut),
    // Transient state while the file is resized
    Unmapped,
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::Read(map) => map,
            Mapping::Write(map) => map,
            Mapping::Unmapped => &[],
        }
    }
}

#[derive(Debug)]
/// An opened and memory-mapped executable or shared library
pub struct ExecutableFileIoEngine {
    file: File,
    mapping: Mapping,
    mode: OpenMode,
}

impl ExecutableFileIoEngine {
    /// Open the file at `path` and map it whole
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let file = match mode {
            OpenMode::ReadOnly => File::open(path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let mapping = Self::map_file(&file, mode)?;
        Ok(Self {
            file,
            mapping,
            mode,
        })
    }

    fn map_file(file: &File, mode: OpenMode) -> Result<Mapping> {
        // The mapping stays private to this engine and the caller
        // serialises access to the file, so no other writer invalidates it.
        match mode {
            OpenMode::ReadOnly => Ok(Mapping::Read(unsafe { Mmap::map(file)? })),
            OpenMode::ReadWrite => Ok(Mapping::Write(unsafe { MmapMut::map_mut(file)? })),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.mapping.bytes()
    }

    /// Check if this file starts with the ELF magic
    pub fn is_elf_file(&self) -> bool {
        elf_reader::extract_ident(self.bytes())
            .map(|ident| ident.has_valid_elf_magic)
            .unwrap_or(false)
    }

    /// Check if this file carries the DOS magic and the PE signature
    pub fn is_pe_file(&self) -> bool {
        pe_reader::extract_dos_header(self.bytes())
            .map(|dos| pe_reader::contains_pe_signature(self.bytes(), &dos))
            .unwrap_or(false)
    }

    fn executable_file_format(&self) -> Result<ExecutableFileFormat> {
        if self.is_elf_file() {
            return Ok(ExecutableFileFormat::Elf);
        }
        if self.is_pe_file() {
            return Ok(ExecutableFileFormat::Pe);
        }
        Err(Error::UnsupportedFileFormat)
    }

    /// Check if this file is an executable or a shared library
    pub fn is_executable_or_shared_library(&self) -> Result<bool> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                Ok(header.is_executable_or_shared_library())
            }
            ExecutableFileFormat::Pe => {
                let dos = pe_reader::extract_dos_header(self.bytes())?;
                let coff = pe_reader::extract_coff_header(self.bytes(), &dos)?;
                Ok(coff.is_valid_executable_image())
            }
        }
    }

    /// Check if this file carries debug information sections
    pub fn contains_debug_symbols(&self) -> Result<bool> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                let sections = elf_reader::extract_all_section_headers(self.bytes(), &header)?;
                Ok(sections.iter().any(|s| s.is_debug_section_header()))
            }
            ExecutableFileFormat::Pe => {
                let dos = pe_reader::extract_dos_header(self.bytes())?;
                let coff = pe_reader::extract_coff_header(self.bytes(), &dos)?;
                let sections = pe_reader::extract_section_table(self.bytes(), &dos, &coff)?;
                Ok(sections.iter().any(|s| s.is_debug_section()))
            }
        }
    }

    /// Get the platform this file runs on
    pub fn get_platform(&self) -> Result<Platform> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                let operating_system = match header.ident.os_abi {
                    OS_ABI_SYSTEM_V | OS_ABI_LINUX => OperatingSystem::Linux,
                    _ => OperatingSystem::Unknown,
                };
                let processor = match header.machine() {
                    Machine::X86 => Processor::X86_32,
                    Machine::X86_64 => Processor::X86_64,
                    _ => Processor::Unknown,
                };
                Ok(Platform {
                    operating_system,
                    executable_file_format: ExecutableFileFormat::Elf,
                    processor,
                })
            }
            ExecutableFileFormat::Pe => {
                let dos = pe_reader::extract_dos_header(self.bytes())?;
                let coff = pe_reader::extract_coff_header(self.bytes(), &dos)?;
                let processor = match coff.machine_type() {
                    MachineType::I386 => Processor::X86_32,
                    MachineType::Amd64 => Processor::X86_64,
                    _ => Processor::Unknown,
                };
                Ok(Platform {
                    operating_system: OperatingSystem::Windows,
                    executable_file_format: ExecutableFileFormat::Pe,
                    processor,
                })
            }
        }
    }

    /// Get the declared shared object name (DT_SONAME)
    ///
    /// `None` for a PE file and for an ELF file without one.
    pub fn get_so_name(&self) -> Result<Option<String>> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Pe => Ok(None),
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                let sections = elf_reader::extract_all_section_headers(self.bytes(), &header)?;
                if elf_reader::find_dynamic_section_header(&sections).is_none() {
                    return Ok(None);
                }
                let dynamic =
                    elf_reader::extract_dynamic_section(self.bytes(), &header, &sections)?;
                Ok(dynamic.get_so_name()?)
            }
        }
    }

    /// Get the libraries this file needs, in the order the loader resolves
    /// them: DT_NEEDED entries for ELF, imported then delay-loaded DLL
    /// names for PE
    pub fn get_needed_shared_libraries(&self) -> Result<Vec<String>> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Pe => Ok(pe_reader::get_needed_shared_libraries(self.bytes())?),
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                let sections = elf_reader::extract_all_section_headers(self.bytes(), &header)?;
                if elf_reader::find_dynamic_section_header(&sections).is_none() {
                    return Ok(Vec::new());
                }
                let dynamic =
                    elf_reader::extract_dynamic_section(self.bytes(), &header, &sections)?;
                Ok(dynamic.get_needed_shared_libraries()?)
            }
        }
    }

    /// Get the runtime search path (DT_RUNPATH)
    ///
    /// Empty for a file without one; PE has no equivalent notion.
    pub fn get_run_path(&self) -> Result<String> {
        match self.executable_file_format()? {
            ExecutableFileFormat::Pe => Ok(String::new()),
            ExecutableFileFormat::Elf => {
                let header = elf_reader::extract_file_header(self.bytes())?;
                let sections = elf_reader::extract_all_section_headers(self.bytes(), &header)?;
                if elf_reader::find_dynamic_section_header(&sections).is_none() {
                    return Ok(String::new());
                }
                let dynamic =
                    elf_reader::extract_dynamic_section(self.bytes(), &header, &sections)?;
                Ok(dynamic.get_run_path()?.unwrap_or_default())
            }
        }
    }

    /// Set the runtime search path (DT_RUNPATH) and persist the file
    ///
    /// An empty `run_path` removes the entry. The file grows when the edit
    /// cannot be done in place; it is then unmapped, resized and remapped
    /// before the model is serialised and flushed.
    pub fn set_run_path(&mut self, run_path: &str, logger: &mut dyn Logger) -> Result<()> {
        if self.executable_file_format()? != ExecutableFileFormat::Elf {
            return Err(Error::UnsupportedFileFormat);
        }
        if self.mode != OpenMode::ReadWrite {
            return Err(Error::FileIsReadOnly);
        }

        let mut file = elf_reader::extract_file_writer_file(self.bytes())?;
        file.set_run_path(run_path, logger)?;

        let minimum_size = file.minimum_size_to_write_file();
        if minimum_size > self.bytes().len() as u64 {
            logger.verbose("growing the file to hold the moved sections");
            self.mapping = Mapping::Unmapped;
            self.file.set_len(minimum_size)?;
            self.mapping = Self::map_file(&self.file, OpenMode::ReadWrite)?;
        }

        match &mut self.mapping {
            Mapping::Write(map) => {
                elf_writer::write_file(&mut map[..], &file)?;
                map.flush().map_err(|e| Error::Io { kind: e.kind() })?;
                Ok(())
            }
            _ => Err(Error::FileIsReadOnly),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::elf::testutils;
    use crate::pe::reader::test::build_test_pe_image;
    use crate::NullLogger;
    use std::path::PathBuf;

    struct RecordingLogger {
        messages: Vec<String>,
        verbose_messages: Vec<String>,
    }

    impl Logger for RecordingLogger {
        fn message(&mut self, text: &str) {
            self.messages.push(text.to_string());
        }

        fn verbose(&mut self, text: &str) {
            self.verbose_messages.push(text.to_string());
        }
    }

    struct TempFile {
        path: PathBuf,
    }

    impl TempFile {
        fn with_bytes(name: &str, bytes: &[u8]) -> Self {
            let mut path = std::env::temp_dir();
            path.push(format!("elfedit-test-{}-{}", std::process::id(), name));
            std::fs::write(&path, bytes).unwrap();
            Self { path }
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn test_elf_queries() {
        let temp = TempFile::with_bytes("elf-queries", &testutils::build_test_image());
        let engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadOnly).unwrap();

        assert!(engine.is_elf_file());
        assert!(!engine.is_pe_file());
        assert!(engine.is_executable_or_shared_library().unwrap());
        assert!(!engine.contains_debug_symbols().unwrap());
        assert_eq!(
            engine.get_platform().unwrap(),
            Platform {
                operating_system: OperatingSystem::Linux,
                executable_file_format: ExecutableFileFormat::Elf,
                processor: Processor::X86_64,
            }
        );
        assert_eq!(engine.get_so_name().unwrap(), None);
        assert_eq!(
            engine.get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
        assert_eq!(engine.get_run_path().unwrap(), testutils::ORIGINAL_RUN_PATH);
    }

    #[test]
    fn test_pe_queries() {
        let temp = TempFile::with_bytes("pe-queries", &build_test_pe_image());
        let engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadOnly).unwrap();

        assert!(engine.is_pe_file());
        assert!(!engine.is_elf_file());
        assert!(engine.is_executable_or_shared_library().unwrap());
        assert_eq!(
            engine.get_platform().unwrap(),
            Platform {
                operating_system: OperatingSystem::Windows,
                executable_file_format: ExecutableFileFormat::Pe,
                processor: Processor::X86_64,
            }
        );
        assert_eq!(engine.get_so_name().unwrap(), None);
        assert_eq!(
            engine.get_needed_shared_libraries().unwrap(),
            vec![
                "KERNEL32.dll".to_string(),
                "msvcrt.dll".to_string(),
                "user32.dll".to_string(),
            ]
        );
        assert_eq!(engine.get_run_path().unwrap(), "");
    }

    #[test]
    fn test_set_run_path_in_place() {
        let temp = TempFile::with_bytes("runpath-in-place", &testutils::build_test_image());

        let mut engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadWrite).unwrap();
        engine.set_run_path("/opt", &mut NullLogger).unwrap();
        drop(engine);

        let bytes = std::fs::read(&temp.path).unwrap();
        assert_eq!(bytes.len() as u64, testutils::IMAGE_SIZE);

        let engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadOnly).unwrap();
        assert_eq!(engine.get_run_path().unwrap(), "/opt");
    }

    #[test]
    fn test_set_run_path_grows_file() {
        let temp = TempFile::with_bytes("runpath-grows", &testutils::build_test_image());
        let run_path = "b".repeat(10_000);

        let mut logger = RecordingLogger {
            messages: Vec::new(),
            verbose_messages: Vec::new(),
        };
        let mut engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadWrite).unwrap();
        engine.set_run_path(&run_path, &mut logger).unwrap();
        drop(engine);

        assert!(!logger.messages.is_empty());
        assert!(!logger.verbose_messages.is_empty());

        let bytes = std::fs::read(&temp.path).unwrap();
        assert!(bytes.len() as u64 > testutils::IMAGE_SIZE);

        let engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadOnly).unwrap();
        assert_eq!(engine.get_run_path().unwrap(), run_path);
        assert_eq!(
            engine.get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
    }

    #[test]
    fn test_set_run_path_requires_write_mode() {
        let temp = TempFile::with_bytes("runpath-readonly", &testutils::build_test_image());
        let mut engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadOnly).unwrap();
        assert!(matches!(
            engine.set_run_path("/opt", &mut NullLogger),
            Err(Error::FileIsReadOnly)
        ));
    }

    #[test]
    fn test_set_run_path_rejects_pe() {
        let temp = TempFile::with_bytes("runpath-pe", &build_test_pe_image());
        let mut engine = ExecutableFileIoEngine::open(&temp.path, OpenMode::ReadWrite).unwrap();
        assert!(matches!(
            engine.set_run_path("/opt", &mut NullLogger),
            Err(Error::UnsupportedFileFormat)
        ));
    }
}
