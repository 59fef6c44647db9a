use crate::cma::config::PhysWindow;
use crate::error::{CmaError, CmaResult};
use crate::utils::{page_align_down, page_offset, page_span};
use log::warn;
use std::io;
use std::ptr::NonNull;

/// The region half of the device-access capability: the device's memory-mapped region 0.
pub trait RegionMapper {
    /// Offset of region 0 within the device's mapping space.
    fn region_offset(&self) -> u64;

    /// Map `len` bytes at the page-aligned `offset` of the device's mapping space.
    fn map_region(&self, offset: u64, len: usize) -> io::Result<NonNull<u8>>;

    /// Release a mapping made by [`Self::map_region`].
    ///
    /// # Safety
    /// `addr`/`len` must describe a live mapping returned by `map_region`.
    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;
}

impl<T: RegionMapper + ?Sized> RegionMapper for &T {
    fn region_offset(&self) -> u64 {
        (**self).region_offset()
    }

    fn map_region(&self, offset: u64, len: usize) -> io::Result<NonNull<u8>> {
        (**self).map_region(offset, len)
    }

    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        unsafe { (**self).unmap_region(addr, len) }
    }
}

/// Translates physical bus addresses inside a fixed window into process virtual addresses.
#[derive(Debug, Clone, Copy)]
pub struct RegionWindow {
    window: PhysWindow,
}

impl RegionWindow {
    #[must_use]
    pub const fn new(window: PhysWindow) -> Self {
        Self { window }
    }

    #[must_use]
    pub const fn window(&self) -> PhysWindow {
        self.window
    }

    /// Maps `[phys, phys + len)` and returns the virtual address of `phys`.
    ///
    /// The mapping covers whole pages; the returned pointer keeps the sub-page offset of the
    /// requested address.
    ///
    /// # Errors
    /// `OutOfWindow` if any part of the range falls outside the window, `RegionMap` if the
    /// device refuses the mapping.
    pub fn map<R: RegionMapper + ?Sized>(
        &self,
        region: &R,
        phys: u64,
        len: usize,
    ) -> CmaResult<NonNull<u8>> {
        let offset = self
            .window
            .offset_of(phys, len)
            .ok_or(CmaError::OutOfWindow { phys, len })?;

        let mmap_offset = offset + region.region_offset();
        let sub_page = page_offset(mmap_offset);
        let base = page_align_down(mmap_offset);
        let span = page_span(sub_page, len).ok_or(CmaError::OutOfWindow { phys, len })?;

        let mapped = region.map_region(base, span).map_err(|e| {
            warn!(target: "vfio_cma", "mapping 0x{span:x} bytes of device region at 0x{base:x} failed: {e}");
            CmaError::RegionMap(e)
        })?;

        // SAFETY: `sub_page` is below the page size and the mapping spans at least one page.
        Ok(unsafe { mapped.add(sub_page as usize) })
    }

    /// Releases the pages a matching [`Self::map`] call mapped.
    ///
    /// # Safety
    /// `addr`/`len` must be the pointer and length of a prior successful `map` (or lie within
    /// it), and nothing may access the mapping afterwards. There is no reference counting.
    pub unsafe fn unmap<R: RegionMapper + ?Sized>(
        &self,
        region: &R,
        addr: NonNull<u8>,
        len: usize,
    ) -> CmaResult<()> {
        let sub_page = page_offset(addr.as_ptr() as u64);
        let span = page_span(sub_page, len).ok_or_else(|| {
            CmaError::RegionUnmap(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unmap length overflows the address space",
            ))
        })?;
        // SAFETY: stepping back to the page start stays within the original mapping.
        let base = unsafe { addr.sub(sub_page as usize) };

        unsafe { region.unmap_region(base, span) }.map_err(CmaError::RegionUnmap)
    }
}

impl Default for RegionWindow {
    fn default() -> Self {
        Self::new(PhysWindow::FABRIC)
    }
}
