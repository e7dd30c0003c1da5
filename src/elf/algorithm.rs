//! Page, alignment and congruence arithmetic shared by the layout engine.

/// Find the address of the next page starting at `start`
///
/// Example with a page size of 8:
/// - 0: already at the beginning of a page
/// - 3: next page is at 8
/// - 9: next page is at 16
pub fn find_address_of_next_page(start: u64, page_size: u64) -> u64 {
    debug_assert!(page_size > 0);
    find_next_aligned_address(start, page_size)
}

/// Find the next address at or after `start` that is aligned to `alignment`
pub fn find_next_aligned_address(start: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    let offset = start % alignment;
    if offset == 0 {
        return start;
    }
    start + alignment - offset
}

/// Check if `virtual_address` and `file_offset` are congruent modulo
/// `page_size`
///
/// From the TIS ELF specification v1.2, Book I and Book III, "Program
/// Header": loadable segments must satisfy this congruence so that `mmap`
/// maps them at the correct page offset.
pub fn virtual_address_and_file_offset_is_congruent(
    virtual_address: u64,
    file_offset: u64,
    page_size: u64,
) -> bool {
    debug_assert!(page_size > 0);
    (virtual_address % page_size) == (file_offset % page_size)
}

/// Find the smallest address at or after `start` that is congruent to
/// `file_offset` modulo `page_size`
pub fn find_next_congruent_address(start: u64, file_offset: u64, page_size: u64) -> u64 {
    debug_assert!(page_size > 0);

    let target = file_offset % page_size;
    let current = start % page_size;
    let address = if current <= target {
        start + (target - current)
    } else {
        start + page_size - (current - target)
    };
    debug_assert!(virtual_address_and_file_offset_is_congruent(
        address,
        file_offset,
        page_size
    ));
    address
}
