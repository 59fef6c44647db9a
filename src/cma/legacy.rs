//! The `libxlnk_cma` call surface: fixed-width integers in, sentinels out.
//!
//! Every failure collapses to the sentinel `libxlnk_cma` callers test for (`0` or null);
//! callers that want the reason use the `Result`-returning methods on [`CmaContext`].

use crate::cma::context::CmaContext;
use crate::cma::memory::DmaMapper;
use crate::cma::window::RegionMapper;
use log::debug;
use std::ffi::c_void;
use std::ptr::{self, NonNull};

impl<B: DmaMapper + RegionMapper> CmaContext<B> {
    /// Returns the mapped virtual address, or 0 on failure.
    pub fn cma_mmap(&self, phy_addr: u64, len: u32) -> u64 {
        match self.map_window(phy_addr, len as usize) {
            Ok(ptr) => ptr.as_ptr() as u64,
            Err(e) => {
                debug!(target: "vfio_cma", "cma_mmap(0x{phy_addr:x}, {len}): {e}");
                0
            }
        }
    }

    /// Always returns 0.
    ///
    /// # Safety
    /// See [`CmaContext::unmap_window`].
    pub unsafe fn cma_munmap(&self, buf: *mut c_void, len: u32) -> u32 {
        if let Some(addr) = NonNull::new(buf.cast::<u8>())
            && let Err(e) = unsafe { self.unmap_window(addr, len as usize) }
        {
            debug!(target: "vfio_cma", "cma_munmap({buf:p}, {len}): {e}");
        }
        0
    }

    /// Returns the buffer, or null on failure.
    pub fn cma_alloc(&mut self, len: u32, cacheable: u32) -> *mut c_void {
        match self.allocate(len as usize, cacheable != 0) {
            Ok(ptr) => ptr.as_ptr().cast(),
            Err(e) => {
                debug!(target: "vfio_cma", "cma_alloc({len}): {e}");
                ptr::null_mut()
            }
        }
    }

    /// The buffer's device address; 0 for pointers this allocator did not return.
    pub fn cma_get_phy_addr(&self, buf: *const c_void) -> u64 {
        self.device_address_of(buf.cast()).unwrap_or(0)
    }

    pub fn cma_free(&mut self, buf: *mut c_void) {
        if let Err(e) = self.free(buf.cast()) {
            debug!(target: "vfio_cma", "cma_free({buf:p}): {e}");
        }
    }

    pub const fn cma_pages_available(&self) -> u32 {
        self.available_pages()
    }

    /// # Safety
    /// `[buf, buf + size)` must be mapped memory.
    pub unsafe fn cma_flush_cache(&self, buf: *mut c_void, phys_addr: u32, size: i32) {
        let size = usize::try_from(size).unwrap_or(0);
        unsafe { self.flush(buf.cast_const().cast(), phys_addr, size) };
    }

    /// # Safety
    /// `[buf, buf + size)` must be mapped memory.
    pub unsafe fn cma_invalidate_cache(&self, buf: *mut c_void, phys_addr: u32, size: i32) {
        let size = usize::try_from(size).unwrap_or(0);
        unsafe { self.invalidate(buf.cast_const().cast(), phys_addr, size) };
    }
}

#[cfg(test)]
mod tests {
    use crate::cma::config::CmaConfig;
    use crate::cma::context::CmaContext;
    use crate::cma::testing::FakeBackend;
    use std::ffi::c_void;
    use std::ptr;

    fn context() -> CmaContext<FakeBackend> {
        CmaContext::with_backend(FakeBackend::new(0), &CmaConfig::default())
    }

    #[test]
    fn alloc_and_lookup_use_sentinels() {
        let mut ctx = context();

        let v1 = ctx.cma_alloc(4096, 0);
        let v2 = ctx.cma_alloc(4096, 1);
        assert!(!v1.is_null() && !v2.is_null());
        assert_eq!(ctx.cma_get_phy_addr(v1), 0x1000);
        assert_eq!(ctx.cma_get_phy_addr(v2), 0x2000);
        assert_eq!(ctx.cma_get_phy_addr(ptr::null()), 0);
        assert_eq!(ctx.cma_pages_available(), 0);

        ctx.cma_free(v1);
        ctx.cma_free(v1);
        assert_eq!(ctx.cma_get_phy_addr(v1), 0);
        assert_eq!(ctx.cma_get_phy_addr(v2), 0x2000);
    }

    #[test]
    fn failed_alloc_is_null() {
        let mut ctx = context();
        ctx.backend().fail_dma_map.set(true);
        assert!(ctx.cma_alloc(4096, 0).is_null());
    }

    #[test]
    fn failed_free_keeps_the_buffer() {
        let mut ctx = context();
        let v = ctx.cma_alloc(100, 0);

        ctx.backend().fail_dma_unmap.set(true);
        ctx.cma_free(v);
        assert_eq!(ctx.cma_get_phy_addr(v), 0x1000);

        ctx.backend().fail_dma_unmap.set(false);
        ctx.cma_free(v);
        assert_eq!(ctx.cma_get_phy_addr(v), 0);
    }

    #[test]
    fn mmap_window_bounds() {
        let ctx = context();

        let addr = ctx.cma_mmap(0x8000_0000, 4096);
        assert_ne!(addr, 0);
        assert_eq!(ctx.cma_mmap(0xC000_0000, 1), 0);
        assert_eq!(ctx.cma_mmap(0x1000, 16), 0);

        assert_eq!(unsafe { ctx.cma_munmap(addr as *mut c_void, 4096) }, 0);
    }

    #[test]
    fn cache_calls_accept_negative_sizes() {
        let mut ctx = context();
        let v = ctx.cma_alloc(4096, 0);
        unsafe {
            ctx.cma_flush_cache(v, 0, 4096);
            ctx.cma_invalidate_cache(v, 0, -1);
        }
        ctx.cma_free(v);
    }
}
