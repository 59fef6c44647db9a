#![allow(clippy::used_underscore_items, clippy::cast_possible_truncation)]

const _IOC_NRBITS: u32 = 8;
const _IOC_TYPEBITS: u32 = 8;
const _IOC_SIZEBITS: u32 = 14;

const _IOC_NRSHIFT: u32 = 0;
const _IOC_TYPESHIFT: u32 = _IOC_NRSHIFT + _IOC_NRBITS;
const _IOC_SIZESHIFT: u32 = _IOC_TYPESHIFT + _IOC_TYPEBITS;
const _IOC_DIRSHIFT: u32 = _IOC_SIZESHIFT + _IOC_SIZEBITS;

const _IOC_NONE: u32 = 0;

#[must_use]
pub const fn _ioc(dir: u32, type_: u32, nr: u32, size: usize) -> u32 {
    (dir << _IOC_DIRSHIFT)
        | (type_ << _IOC_TYPESHIFT)
        | (nr << _IOC_NRSHIFT)
        | ((size as u32) << _IOC_SIZESHIFT)
}

/// VFIO encodes every request as `_IO(type, nr)`; the argument size lives in `argsz`.
#[must_use]
pub const fn io(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_NONE, type_, nr, 0)
}

// ===============================================================================================
// Page Granularity
// ===============================================================================================

/// Granularity of every length and offset handed to the VFIO map/unmap primitives.
pub const PAGE_SIZE: usize = 4096;

/// `PAGE_SIZE - 1`, the alignment mask.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

#[must_use]
pub const fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_MASK as u64)
}

/// Rounds `len` up to whole pages. Zero rounds up to a single page, and `None` means the
/// rounded length does not fit in `usize`.
#[must_use]
pub const fn page_align_up(len: usize) -> Option<usize> {
    if len == 0 {
        return Some(PAGE_SIZE);
    }
    ((len - 1) | PAGE_MASK).checked_add(1)
}

#[must_use]
pub const fn page_offset(addr: u64) -> u64 {
    addr & PAGE_MASK as u64
}

/// Length of the page-aligned span that covers `len` bytes starting `offset` bytes into a page.
#[must_use]
pub const fn page_span(offset: u64, len: usize) -> Option<usize> {
    match (offset as usize).checked_add(len) {
        Some(end) => page_align_up(end),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfio_request_numbers_match_linux_headers() {
        // VFIO_GET_API_VERSION == _IO(';', 100)
        assert_eq!(io(0x3B, 100), 0x3B64);
        // VFIO_IOMMU_MAP_DMA == _IO(';', 113)
        assert_eq!(io(0x3B, 113), 0x3B71);
    }

    #[test]
    fn page_rounding() {
        assert_eq!(page_align_up(0), Some(PAGE_SIZE));
        assert_eq!(page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(page_align_up(4096), Some(4096));
        assert_eq!(page_align_up(4097), Some(8192));
        assert_eq!(page_align_down(0x1234), 0x1000);
        assert_eq!(page_offset(0x1234), 0x234);
    }

    #[test]
    fn span_covers_unaligned_ranges() {
        assert_eq!(page_span(0, 4096), Some(4096));
        assert_eq!(page_span(0xFFF, 1), Some(4096));
        assert_eq!(page_span(0xFFF, 2), Some(8192));
        assert_eq!(page_span(0x10, 4096), Some(8192));
    }

    #[test]
    fn rounding_past_the_address_space_is_none() {
        assert_eq!(page_align_up(usize::MAX), None);
        assert_eq!(page_align_up(usize::MAX - PAGE_MASK + 1), None);
        assert_eq!(page_align_up(usize::MAX - PAGE_MASK), Some(usize::MAX - PAGE_MASK));
        assert_eq!(page_span(0x10, usize::MAX - 0x8), None);
    }
}
