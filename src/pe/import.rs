//! Records of the import directory table and the delay-load import table.

/// Size in bytes of one import directory table entry
pub const IMPORT_DIRECTORY_ENTRY_SIZE: u64 = 20;

/// Size in bytes of one delay-load directory table entry
pub const DELAY_LOAD_DIRECTORY_ENTRY_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// One entry of the import directory table; the table is terminated by an
/// all-zero entry
pub struct ImportDirectoryEntry {
    /// RVA of the import lookup table
    pub import_lookup_table_rva: u32,
    /// 0 until the image is bound
    pub time_date_stamp: u32,
    /// Index of the first forwarder reference
    pub forwarder_chain: u32,
    /// RVA of the imported DLL name
    pub name_rva: u32,
    /// RVA of the import address table
    pub import_address_table_rva: u32,
}

impl ImportDirectoryEntry {
    /// Check if this entry is the table terminator
    pub fn is_null(&self) -> bool {
        self.import_lookup_table_rva == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name_rva == 0
            && self.import_address_table_rva == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// One entry of the delay-load directory table; the table is terminated by
/// an all-zero entry
pub struct DelayLoadDirectoryEntry {
    /// Reserved, must be 0
    pub attributes: u32,
    /// RVA of the delay-loaded DLL name
    pub name_rva: u32,
    /// RVA of the module handle the loader updates
    pub module_handle_rva: u32,
    /// RVA of the delay import address table
    pub delay_import_address_table_rva: u32,
    /// RVA of the delay import name table
    pub delay_import_name_table_rva: u32,
    /// RVA of the bound delay import table
    pub bound_delay_import_table_rva: u32,
    /// RVA of the unload delay import table
    pub unload_delay_import_table_rva: u32,
    /// 0 until the image is bound
    pub time_stamp: u32,
}

impl DelayLoadDirectoryEntry {
    /// Check if this entry is the table terminator
    pub fn is_null(&self) -> bool {
        self.name_rva == 0 && self.delay_import_address_table_rva == 0
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(ImportDirectoryEntry::default().is_null());
        assert!(DelayLoadDirectoryEntry::default().is_null());

        let entry = ImportDirectoryEntry {
            name_rva: 0x2050,
            ..ImportDirectoryEntry::default()
        };
        assert!(!entry.is_null());

        let delay = DelayLoadDirectoryEntry {
            name_rva: 0x2060,
            delay_import_address_table_rva: 0x2100,
            ..DelayLoadDirectoryEntry::default()
        };
        assert!(!delay.is_null());
    }
}
