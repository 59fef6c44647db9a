use crate::cma::memory::{Allocation, DmaMapper, IovaCursor};
use crate::error::{CmaError, CmaResult};
use crate::utils::{PAGE_SIZE, page_align_up};
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::ptr::{self, NonNull};

/// Hands out page-rounded anonymous buffers, each mapped into the device's IOVA space at the
/// cursor position, and remembers which IOVA belongs to which buffer.
///
/// Not thread safe; callers serialize access.
#[derive(Debug)]
pub struct DmaAllocator {
    cursor: IovaCursor,
    // CPU address -> record
    allocations: HashMap<usize, Allocation>,
}

impl DmaAllocator {
    #[must_use]
    pub fn new(iova_base: u64) -> Self {
        Self::with_cursor(IovaCursor::new(iova_base))
    }

    #[must_use]
    pub fn with_cursor(cursor: IovaCursor) -> Self {
        Self {
            cursor,
            allocations: HashMap::new(),
        }
    }

    /// Allocates at least `len` bytes of zeroed memory and maps it for the device.
    ///
    /// `_cacheable` is accepted for compatibility with the CMA interface; coherency is handled
    /// with explicit cache maintenance instead.
    ///
    /// # Errors
    /// Fails if the IOVA space is exhausted, the host is out of memory, or the IOMMU rejects the
    /// mapping. Nothing is left allocated on failure.
    pub fn allocate<D: DmaMapper + ?Sized>(
        &mut self,
        mapper: &D,
        len: usize,
        _cacheable: bool,
    ) -> CmaResult<NonNull<u8>> {
        let size = page_align_up(len).ok_or(CmaError::IovaExhausted { size: len })?;
        let iova = self
            .cursor
            .peek(size)
            .ok_or(CmaError::IovaExhausted { size })?;

        let ptr = map_anonymous(size).map_err(CmaError::AnonymousMap)?;

        if let Err(source) = mapper.map_dma(ptr.as_ptr() as u64, iova, size) {
            warn!(target: "vfio_cma", "IOMMU map of 0x{size:x} bytes at IOVA 0x{iova:x} failed: {source}");
            unsafe { unmap_anonymous(ptr, size) };
            return Err(CmaError::DmaMap { iova, size, source });
        }

        self.allocations.insert(
            ptr.as_ptr() as usize,
            Allocation {
                ptr: ptr.as_ptr(),
                size,
                iova,
            },
        );
        self.cursor.advance(size);

        debug!(target: "vfio_cma", "allocated {:p} -> IOVA 0x{iova:x} (0x{size:x} bytes)", ptr.as_ptr());
        Ok(ptr)
    }

    /// The IOVA of a buffer returned by [`Self::allocate`], or `None` for any other address.
    #[must_use]
    pub fn device_address_of(&self, addr: *const u8) -> Option<u64> {
        self.allocations.get(&(addr as usize)).map(|a| a.iova)
    }

    #[must_use]
    pub fn get(&self, addr: *const u8) -> Option<&Allocation> {
        self.allocations.get(&(addr as usize))
    }

    /// Unmaps and releases a buffer.
    ///
    /// Returns `Ok(false)` when `addr` is not a live allocation (unknown pointer or double free).
    ///
    /// # Errors
    /// If the IOMMU refuses to unmap, the buffer stays allocated and tracked.
    pub fn free<D: DmaMapper + ?Sized>(&mut self, mapper: &D, addr: *mut u8) -> CmaResult<bool> {
        let key = addr as usize;
        let Some(alloc) = self.allocations.get(&key) else {
            return Ok(false);
        };
        let (iova, size) = (alloc.iova, alloc.size);

        if let Err(source) = mapper.unmap_dma(iova, size) {
            warn!(target: "vfio_cma", "IOMMU unmap of IOVA 0x{iova:x} failed, keeping {addr:p}: {source}");
            return Err(CmaError::DmaUnmap { iova, size, source });
        }

        self.allocations.remove(&key);
        if let Some(ptr) = NonNull::new(addr) {
            unsafe { unmap_anonymous(ptr, size) };
        }

        debug!(target: "vfio_cma", "freed {addr:p} (IOVA 0x{iova:x})");
        Ok(true)
    }

    /// Frees every live buffer. Buffers the IOMMU refuses to unmap stay tracked.
    ///
    /// Returns the number of buffers released.
    pub fn release_all<D: DmaMapper + ?Sized>(&mut self, mapper: &D) -> usize {
        let live: Vec<*mut u8> = self.allocations.values().map(|a| a.ptr).collect();
        live.into_iter()
            .filter(|&ptr| matches!(self.free(mapper, ptr), Ok(true)))
            .count()
    }

    /// Always zero: capacity is bounded only by host memory and the IOVA range.
    #[must_use]
    pub const fn available_pages(&self) -> u32 {
        0
    }

    /// IOVA the next allocation will receive.
    #[must_use]
    pub const fn next_iova(&self) -> u64 {
        self.cursor.position()
    }

    pub fn live_allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// Private, zero-filled, read/write anonymous memory.
fn map_anonymous(size: usize) -> io::Result<NonNull<u8>> {
    debug_assert_eq!(size % PAGE_SIZE, 0);
    let ret = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ret == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ret.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// # Safety
/// `ptr`/`size` must describe a mapping made by [`map_anonymous`].
unsafe fn unmap_anonymous(ptr: NonNull<u8>, size: usize) {
    if unsafe { libc::munmap(ptr.as_ptr().cast(), size) } != 0 {
        warn!(
            target: "vfio_cma",
            "munmap of {:p} failed: {}",
            ptr.as_ptr(),
            io::Error::last_os_error()
        );
    }
}
