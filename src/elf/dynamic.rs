//! Implementation of the `.dynamic` section: the ordered list of tagged
//! entries the dynamic loader consumes, backed by an owned copy of the
//! dynamic string table (`.dynstr`).

use std::fmt::Display;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::elf::ident::Class;
use crate::elf::string_table::StringTable;
use crate::error::StringTableError;

#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// The tag of a dynamic section entry (d_tag)
pub enum DynamicTag {
    /// Marks the end of the dynamic array
    Null = 0,
    /// String table offset of a needed library name
    Needed = 1,
    /// Total size of the PLT relocations
    PltRelSz = 2,
    /// Address of the legacy symbol hash table
    Hash = 4,
    /// Address of the dynamic string table
    StringTable = 5,
    /// Address of the dynamic symbol table
    SymbolTable = 6,
    /// Address of the relocation table with addends
    Rela = 7,
    /// Total size of the relocation table with addends
    RelaSz = 8,
    /// Size of one relocation entry with addend
    RelaEnt = 9,
    /// Size in bytes of the dynamic string table
    StringTableSize = 10,
    /// Size of one symbol table entry
    SymbolEntrySize = 11,
    /// Address of the initialization function
    Init = 12,
    /// Address of the termination function
    Fini = 13,
    /// String table offset of the shared object name
    SoName = 14,
    /// String table offset of the search path (superseded by Runpath)
    RPath = 15,
    /// Start symbol search at this object
    Symbolic = 16,
    /// Address of the array of initialization functions
    InitArray = 25,
    /// Address of the array of termination functions
    FiniArray = 26,
    /// Size in bytes of the initialization function array
    InitArraySz = 27,
    /// Size in bytes of the termination function array
    FiniArraySz = 28,
    /// String table offset of the runtime search path
    Runpath = 29,
    /// Flags for this object
    Flags = 30,
    /// Address of the array of pre-initialization functions
    PreInitArray = 32,
    /// Size in bytes of the pre-initialization function array
    PreInitArraySz = 33,
    /// Address of the GNU-style symbol hash table
    GnuHash = 0x6fff_fef5,
    /// State flags (DF_1_*)
    Flags1 = 0x6fff_fffb,
    /// Not from the standard
    Unknown = 100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One entry of the dynamic section (ElfN_Dyn)
///
/// The raw tag is kept so unrecognised entries re-serialise byte-exact.
pub struct DynamicEntry {
    /// Raw entry tag (d_tag)
    pub tag: i64,
    /// Value or address, depending on the tag (d_un)
    pub val_or_ptr: u64,
}

impl DynamicEntry {
    /// Get the typed tag
    pub fn tag_type(&self) -> DynamicTag {
        DynamicTag::from_i64(self.tag).unwrap_or(DynamicTag::Unknown)
    }

    /// Check if this entry is the array terminator
    pub fn is_null(&self) -> bool {
        self.tag == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// The logical dynamic section
///
/// Entries are kept in file order, required so the needed-library list comes
/// back in the order the loader resolves it. Entries after the first Null
/// terminator are padding; they are retained verbatim so an unchanged
/// section re-serialises byte-exact, and every query and mutation honors the
/// first Null as the terminator.
pub struct DynamicSection {
    entries: Vec<DynamicEntry>,
    string_table: StringTable,
}

impl DynamicSection {
    /// Check if this section is absent
    pub fn is_null(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry decoded from the file
    pub fn add_entry_from_file(&mut self, entry: DynamicEntry) {
        self.entries.push(entry);
    }

    /// The entries of this section, in file order, padding included
    pub fn entries(&self) -> &[DynamicEntry] {
        &self.entries
    }

    /// Count of entries, padding included
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Size in bytes of this section for `class`
    pub fn byte_count(&self, class: Class) -> u64 {
        2 * class.n_word_size() * self.entries.len() as u64
    }

    /// The embedded string table (byte-identical copy of `.dynstr`)
    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    /// Set the embedded string table from the file
    pub fn set_string_table_from_file(&mut self, table: StringTable) {
        self.string_table = table;
    }

    fn index_of_first_tag(&self, tag: DynamicTag) -> Option<usize> {
        self.entries
            .iter()
            .take_while(|entry| tag == DynamicTag::Null || !entry.is_null())
            .position(|entry| entry.tag_type() == tag)
    }

    /// Get the shared object name (DT_SONAME), if declared
    pub fn get_so_name(&self) -> Result<Option<String>, StringTableError> {
        match self.index_of_first_tag(DynamicTag::SoName) {
            Some(i) => Ok(Some(
                self.string_table.string_at_index(self.entries[i].val_or_ptr)?,
            )),
            None => Ok(None),
        }
    }

    /// Get the needed library names (DT_NEEDED), in file order
    pub fn get_needed_shared_libraries(&self) -> Result<Vec<String>, StringTableError> {
        self.entries
            .iter()
            .take_while(|entry| !entry.is_null())
            .filter(|entry| entry.tag_type() == DynamicTag::Needed)
            .map(|entry| self.string_table.string_at_index(entry.val_or_ptr))
            .collect()
    }

    /// Get the runtime search path (DT_RUNPATH), if declared
    ///
    /// Files carrying several Runpath entries are handled by reading only
    /// the first.
    pub fn get_run_path(&self) -> Result<Option<String>, StringTableError> {
        match self.index_of_first_tag(DynamicTag::Runpath) {
            Some(i) => Ok(Some(
                self.string_table.string_at_index(self.entries[i].val_or_ptr)?,
            )),
            None => Ok(None),
        }
    }

    /// Set, replace or remove the runtime search path (DT_RUNPATH)
    ///
    /// This is the purely logical update; reconciling the file layout with
    /// the new sizes is the layout engine's concern. The string table is
    /// compacted only from the tail: offsets of strings before the edited
    /// one are never re-indexed, so every surviving entry still indexes a
    /// NUL-terminated sequence.
    pub fn set_run_path(&mut self, run_path: &str) {
        let existing = self.index_of_first_tag(DynamicTag::Runpath);

        match existing {
            None => {
                if run_path.is_empty() {
                    return;
                }
                let index = self.string_table.append_string(run_path);
                let insert_at = self
                    .index_of_first_tag(DynamicTag::Null)
                    .unwrap_or(self.entries.len());
                self.entries.insert(
                    insert_at,
                    DynamicEntry {
                        tag: DynamicTag::Runpath as i64,
                        val_or_ptr: index,
                    },
                );
            }
            Some(i) => {
                let index = self.entries[i].val_or_ptr;

                if run_path.is_empty() {
                    self.entries.remove(i);
                    if self.string_table.index_is_valid(index)
                        && self.string_table.string_is_at_tail(index)
                    {
                        self.string_table.truncate_at(index);
                    }
                    return;
                }

                if !self.string_table.index_is_valid(index) {
                    self.entries[i].val_or_ptr = self.string_table.append_string(run_path);
                    return;
                }

                let old_length = self.string_table.string_length_at(index);
                if run_path.len() as u64 == old_length {
                    self.string_table.overwrite_string_at(index, run_path);
                } else if self.string_table.string_is_at_tail(index) {
                    self.string_table.replace_tail_string_at(index, run_path);
                } else {
                    self.entries[i].val_or_ptr = self.string_table.append_string(run_path);
                }
            }
        }
    }

    /// Check if this section declares the string table address (DT_STRTAB)
    pub fn contains_string_table_address(&self) -> bool {
        self.index_of_first_tag(DynamicTag::StringTable).is_some()
    }

    /// Get the declared string table address (DT_STRTAB)
    pub fn get_string_table_address(&self) -> Option<u64> {
        self.index_of_first_tag(DynamicTag::StringTable)
            .map(|i| self.entries[i].val_or_ptr)
    }

    /// Rewrite the declared string table address (DT_STRTAB)
    pub fn set_string_table_address(&mut self, address: u64) {
        if let Some(i) = self.index_of_first_tag(DynamicTag::StringTable) {
            self.entries[i].val_or_ptr = address;
        }
    }

    /// Check if this section declares the GNU hash table address
    /// (DT_GNU_HASH)
    pub fn contains_gnu_hash_table_address(&self) -> bool {
        self.index_of_first_tag(DynamicTag::GnuHash).is_some()
    }

    /// Get the declared GNU hash table address (DT_GNU_HASH)
    pub fn get_gnu_hash_table_address(&self) -> Option<u64> {
        self.index_of_first_tag(DynamicTag::GnuHash)
            .map(|i| self.entries[i].val_or_ptr)
    }

    /// Rewrite the declared GNU hash table address (DT_GNU_HASH)
    pub fn set_gnu_hash_table_address(&mut self, address: u64) {
        if let Some(i) = self.index_of_first_tag(DynamicTag::GnuHash) {
            self.entries[i].val_or_ptr = address;
        }
    }
}

impl Display for DynamicSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "tag: {:#x} ({:?}), value: {:#x}",
                entry.tag,
                entry.tag_type(),
                entry.val_or_ptr
            )?;
            if entry.is_null() {
                break;
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    /// A dynamic section with a needed library, a SONAME and a runpath at
    /// the tail of the string table
    fn section_with_run_path() -> DynamicSection {
        let mut section = DynamicSection::default();
        section.set_string_table_from_file(
            StringTable::from_bytes(b"\0libc.so.6\0libA.so\0$ORIGIN/lib\0").unwrap(),
        );
        section.add_entry_from_file(DynamicEntry { tag: 1, val_or_ptr: 1 });
        section.add_entry_from_file(DynamicEntry {
            tag: 14,
            val_or_ptr: 11,
        });
        section.add_entry_from_file(DynamicEntry {
            tag: 29,
            val_or_ptr: 19,
        });
        section.add_entry_from_file(DynamicEntry {
            tag: 5,
            val_or_ptr: 0x3000,
        });
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });
        section
    }

    #[test]
    fn test_queries() {
        let section = section_with_run_path();
        assert!(!section.is_null());
        assert_eq!(section.get_so_name().unwrap().unwrap(), "libA.so");
        assert_eq!(
            section.get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
        assert_eq!(section.get_run_path().unwrap().unwrap(), "$ORIGIN/lib");
        assert_eq!(section.get_string_table_address(), Some(0x3000));
        assert_eq!(section.byte_count(Class::Class64), 5 * 16);
        assert_eq!(section.byte_count(Class::Class32), 5 * 8);
    }

    #[test]
    fn test_set_run_path_noop_when_absent_and_empty() {
        let mut section = DynamicSection::default();
        section.set_string_table_from_file(StringTable::from_bytes(b"\0").unwrap());
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });
        let before = section.clone();
        section.set_run_path("");
        assert_eq!(section, before);
    }

    #[test]
    fn test_set_run_path_removal() {
        let mut section = section_with_run_path();
        section.set_run_path("");
        assert_eq!(section.get_run_path().unwrap(), None);
        assert_eq!(section.entry_count(), 4);
        // The string was at the tail, so the table was compacted
        assert_eq!(section.string_table().as_bytes(), b"\0libc.so.6\0libA.so\0");
    }

    #[test]
    fn test_set_run_path_insertion() {
        let mut section = section_with_run_path();
        section.set_run_path("");
        section.set_run_path("/opt/lib");
        assert_eq!(section.get_run_path().unwrap().unwrap(), "/opt/lib");
        // Inserted immediately before the terminal Null
        assert_eq!(section.entries()[3].tag_type(), DynamicTag::Runpath);
        assert!(section.entries()[4].is_null());
        assert_eq!(
            section.string_table().as_bytes(),
            b"\0libc.so.6\0libA.so\0/opt/lib\0"
        );
    }

    #[test]
    fn test_set_run_path_same_length_overwrites_in_place() {
        let mut section = section_with_run_path();
        let size_before = section.string_table().byte_count();
        section.set_run_path("$ORIGIN/LIB");
        assert_eq!(section.get_run_path().unwrap().unwrap(), "$ORIGIN/LIB");
        assert_eq!(section.string_table().byte_count(), size_before);
        assert_eq!(section.entries()[2].val_or_ptr, 19);
    }

    #[test]
    fn test_set_run_path_shorter_truncates_tail() {
        let mut section = section_with_run_path();
        section.set_run_path("/opt");
        assert_eq!(section.get_run_path().unwrap().unwrap(), "/opt");
        assert_eq!(section.entries()[2].val_or_ptr, 19);
        assert_eq!(
            section.string_table().as_bytes(),
            b"\0libc.so.6\0libA.so\0/opt\0"
        );
    }

    #[test]
    fn test_set_run_path_longer_grows_tail() {
        let mut section = section_with_run_path();
        section.set_run_path("/a/considerably/longer/run/path");
        assert_eq!(
            section.get_run_path().unwrap().unwrap(),
            "/a/considerably/longer/run/path"
        );
        assert_eq!(section.entries()[2].val_or_ptr, 19);
        assert_eq!(
            section.string_table().byte_count(),
            19 + "/a/considerably/longer/run/path".len() as u64 + 1
        );
    }

    #[test]
    fn test_set_run_path_not_at_tail_appends() {
        let mut section = DynamicSection::default();
        // The runpath string is followed by another string
        section.set_string_table_from_file(
            StringTable::from_bytes(b"\0$ORIGIN/lib\0libc.so.6\0").unwrap(),
        );
        section.add_entry_from_file(DynamicEntry {
            tag: 29,
            val_or_ptr: 1,
        });
        section.add_entry_from_file(DynamicEntry {
            tag: 1,
            val_or_ptr: 13,
        });
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });

        section.set_run_path("/opt");
        // Appended at the tail; the needed-library offset is untouched
        assert_eq!(section.entries()[0].val_or_ptr, 23);
        assert_eq!(section.entries()[1].val_or_ptr, 13);
        assert_eq!(
            section.string_table().as_bytes(),
            b"\0$ORIGIN/lib\0libc.so.6\0/opt\0"
        );
        assert_eq!(
            section.get_needed_shared_libraries().unwrap(),
            vec!["libc.so.6".to_string()]
        );
    }

    #[test]
    fn test_gnu_hash_address() {
        let mut section = DynamicSection::default();
        section.set_string_table_from_file(StringTable::from_bytes(b"\0").unwrap());
        section.add_entry_from_file(DynamicEntry {
            tag: 0x6fff_fef5,
            val_or_ptr: 0x2a0,
        });
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });

        assert!(section.contains_gnu_hash_table_address());
        assert_eq!(section.get_gnu_hash_table_address(), Some(0x2a0));
        section.set_gnu_hash_table_address(0x4000);
        assert_eq!(section.get_gnu_hash_table_address(), Some(0x4000));
    }

    #[test]
    fn test_padding_entries_are_ignored_by_queries() {
        let mut section = section_with_run_path();
        // Padding after the terminator, as linkers commonly emit
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });
        section.add_entry_from_file(DynamicEntry { tag: 0, val_or_ptr: 0 });
        assert_eq!(section.entry_count(), 7);

        // Insertion still lands before the first Null
        section.set_run_path("");
        section.set_run_path("/opt/lib");
        assert_eq!(section.entries()[3].tag_type(), DynamicTag::Runpath);
        assert!(section.entries()[4].is_null());
        assert_eq!(section.entry_count(), 7);
    }
}
