use crate::cma::binding::DeviceBinding;
use crate::cma::cache::{ArchCache, CacheMaintenance};
use crate::cma::config::CmaConfig;
use crate::cma::memory::{DmaAllocator, DmaMapper};
use crate::cma::window::{RegionMapper, RegionWindow};
use crate::error::CmaResult;
use log::warn;
use std::ptr::NonNull;

// ===============================================================================================
// Context Structures
// ===============================================================================================

/// The allocator's process state: the device capability, the window translator, the IOVA
/// bookkeeping and the cache maintenance sequence.
///
/// Created once by [`CmaContext::initialize`] and passed to every operation. It is not
/// synchronized; callers confine it to one thread or wrap it in a lock.
///
/// Dropping the context unmaps and frees every buffer still allocated.
#[derive(Debug)]
pub struct CmaContext<B: DmaMapper + RegionMapper = DeviceBinding> {
    backend: B,
    window: RegionWindow,
    allocator: DmaAllocator,
    cache: ArchCache,
}

impl CmaContext<DeviceBinding> {
    /// Binds the configured device and prepares an empty allocator.
    ///
    /// This is the only entry point that touches the kernel's VFIO topology; call it once,
    /// before any other operation.
    ///
    /// # Errors
    /// Any binding failure. No partially initialized context is returned.
    pub fn initialize(config: &CmaConfig) -> CmaResult<Self> {
        let binding = DeviceBinding::bind(config)?;
        Ok(Self::with_backend(binding, config))
    }

    #[must_use]
    pub const fn binding(&self) -> &DeviceBinding {
        &self.backend
    }
}

impl<B: DmaMapper + RegionMapper> CmaContext<B> {
    /// Builds a context over an already-acquired device capability.
    pub fn with_backend(backend: B, config: &CmaConfig) -> Self {
        Self {
            backend,
            window: RegionWindow::new(config.window),
            allocator: DmaAllocator::new(config.iova_base),
            cache: ArchCache,
        }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub const fn allocator(&self) -> &DmaAllocator {
        &self.allocator
    }

    // ===========================================================================================
    // Region Window
    // ===========================================================================================

    /// Maps a physical bus address inside the device window into this process.
    pub fn map_window(&self, phys: u64, len: usize) -> CmaResult<NonNull<u8>> {
        self.window.map(&self.backend, phys, len)
    }

    /// Releases a mapping made by [`Self::map_window`].
    ///
    /// # Safety
    /// `addr`/`len` must come from a prior `map_window` that has not been unmapped, and nothing
    /// may access the mapping afterwards.
    pub unsafe fn unmap_window(&self, addr: NonNull<u8>, len: usize) -> CmaResult<()> {
        unsafe { self.window.unmap(&self.backend, addr, len) }
    }

    // ===========================================================================================
    // DMA Buffers
    // ===========================================================================================

    /// Allocates a zeroed buffer of at least `len` bytes mapped at the next free IOVA.
    pub fn allocate(&mut self, len: usize, cacheable: bool) -> CmaResult<NonNull<u8>> {
        self.allocator.allocate(&self.backend, len, cacheable)
    }

    /// The IOVA of a buffer returned by [`Self::allocate`].
    #[must_use]
    pub fn device_address_of(&self, addr: *const u8) -> Option<u64> {
        self.allocator.device_address_of(addr)
    }

    /// Frees a buffer. Unknown addresses and repeated frees return `Ok(false)`.
    pub fn free(&mut self, addr: *mut u8) -> CmaResult<bool> {
        self.allocator.free(&self.backend, addr)
    }

    #[must_use]
    pub const fn available_pages(&self) -> u32 {
        self.allocator.available_pages()
    }

    // ===========================================================================================
    // Cache Maintenance
    // ===========================================================================================

    /// Cleans and invalidates every cache line covering `[addr, addr + size)`.
    ///
    /// `_phys_hint` is accepted for interface symmetry and ignored.
    ///
    /// # Safety
    /// The range must be mapped memory.
    pub unsafe fn flush(&self, addr: *const u8, _phys_hint: u32, size: usize) {
        unsafe { self.cache.flush(addr, size) }
    }

    /// Identical to [`Self::flush`].
    ///
    /// # Safety
    /// The range must be mapped memory.
    pub unsafe fn invalidate(&self, addr: *const u8, _phys_hint: u32, size: usize) {
        unsafe { self.cache.invalidate(addr, size) }
    }
}

impl<B: DmaMapper + RegionMapper> Drop for CmaContext<B> {
    fn drop(&mut self) {
        self.allocator.release_all(&self.backend);
        if !self.allocator.is_empty() {
            warn!(
                target: "vfio_cma",
                "{} DMA buffers could not be released at teardown",
                self.allocator.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cma::testing::FakeBackend;
    use crate::utils::{PAGE_MASK, PAGE_SIZE};

    fn context() -> CmaContext<FakeBackend> {
        CmaContext::with_backend(FakeBackend::new(0), &CmaConfig::default())
    }

    #[test]
    fn consecutive_allocations_get_consecutive_iovas() {
        let mut ctx = context();

        let v1 = ctx.allocate(4096, false).unwrap();
        assert_eq!(ctx.device_address_of(v1.as_ptr()), Some(0x1000));

        let v2 = ctx.allocate(4096, false).unwrap();
        assert_eq!(ctx.device_address_of(v2.as_ptr()), Some(0x2000));
    }

    #[test]
    fn free_retires_the_iova_range() {
        let mut ctx = context();

        let v = ctx.allocate(8192, false).unwrap();
        assert!(ctx.free(v.as_ptr()).unwrap());

        let w = ctx.allocate(4096, false).unwrap();
        assert!(ctx.device_address_of(w.as_ptr()).unwrap() >= 0x3000);
        assert_eq!(ctx.backend().live_iovas(), vec![0x3000]);
    }

    #[test]
    fn unknown_free_leaves_state_alone() {
        let mut ctx = context();
        let v = ctx.allocate(4096, false).unwrap();

        let mut stray = [0u8; 16];
        assert!(!ctx.free(stray.as_mut_ptr()).unwrap());
        assert_eq!(ctx.allocator().len(), 1);
        assert_eq!(ctx.allocator().next_iova(), 0x2000);

        assert!(ctx.free(v.as_ptr()).unwrap());
        assert!(!ctx.free(v.as_ptr()).unwrap());
    }

    #[test]
    fn window_start_maps_and_window_end_fails() {
        let ctx = context();

        let ptr = ctx.map_window(0x8000_0000, 4096).unwrap();
        assert!(ctx.map_window(0xC000_0000, 1).is_err());

        unsafe { ctx.unmap_window(ptr, 4096).unwrap() };
    }

    #[test]
    fn window_pointer_keeps_page_offset() {
        let ctx = CmaContext::with_backend(FakeBackend::new(0x80), &CmaConfig::default());
        let phys = 0x8123_4567;

        let ptr = ctx.map_window(phys, 8).unwrap();
        let expected = (phys - 0x8000_0000 + 0x80) as usize & PAGE_MASK;
        assert_eq!(ptr.as_ptr() as usize & PAGE_MASK, expected);

        unsafe { ctx.unmap_window(ptr, 8).unwrap() };
    }

    #[test]
    fn cache_maintenance_over_a_dma_buffer() {
        let mut ctx = context();
        let v = ctx.allocate(PAGE_SIZE, false).unwrap();
        unsafe {
            v.as_ptr().write_bytes(0x5A, PAGE_SIZE);
            ctx.flush(v.as_ptr(), 0, PAGE_SIZE);
            ctx.invalidate(v.as_ptr(), 0, 1);
            assert_eq!(*v.as_ptr().add(PAGE_SIZE - 1), 0x5A);
        }
    }

    #[test]
    fn drop_releases_live_buffers() {
        let backend = FakeBackend::new(0);
        {
            let mut ctx = CmaContext::with_backend(&backend, &CmaConfig::default());
            ctx.allocate(4096, false).unwrap();
            ctx.allocate(4096, false).unwrap();
            assert_eq!(backend.live_iovas(), vec![0x1000, 0x2000]);
        }
        assert!(backend.live_iovas().is_empty());
        assert_eq!(backend.unmap_calls(), 2);
    }

    #[test]
    fn iova_base_comes_from_config() {
        let cfg = CmaConfig::default().iova_base(0x10_0000);
        let mut ctx = CmaContext::with_backend(FakeBackend::new(0), &cfg);
        let v = ctx.allocate(1, false).unwrap();
        assert_eq!(ctx.device_address_of(v.as_ptr()), Some(0x10_0000));
    }
}
