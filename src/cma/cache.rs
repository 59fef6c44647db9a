//! Manual cache maintenance for buffers shared with a device that does not snoop CPU caches.

#![allow(clippy::inline_always)]

/// Stride of the per-line maintenance loop.
pub const CACHE_LINE_SIZE: usize = 64;

/// Start addresses of every cache line intersecting `[addr, addr + size)`.
///
/// At least one line is always produced, so a zero-sized request still maintains the line
/// containing `addr`.
pub fn cache_lines(addr: usize, size: usize) -> impl Iterator<Item = usize> {
    let first = addr & !(CACHE_LINE_SIZE - 1);
    let span = addr - first + size;
    let count = span.div_ceil(CACHE_LINE_SIZE).max(1);
    (0..count).map(move |i| first + i * CACHE_LINE_SIZE)
}

/// Per-architecture cache maintenance instructions.
pub trait CacheMaintenance {
    /// Clean and invalidate the line containing `line` to the point of coherency.
    ///
    /// # Safety
    /// `line` must lie in mapped memory.
    unsafe fn clean_invalidate_line(&self, line: usize);

    /// Orders the preceding maintenance operations before later memory accesses.
    fn barrier(&self);

    /// Writes back and invalidates every line intersecting the buffer.
    ///
    /// # Safety
    /// `[addr, addr + size)` must be mapped memory.
    unsafe fn flush(&self, addr: *const u8, size: usize) {
        for line in cache_lines(addr as usize, size) {
            unsafe { self.clean_invalidate_line(line) };
        }
        self.barrier();
    }

    /// Same sequence as [`Self::flush`]: dirty lines are written back rather than discarded.
    ///
    /// # Safety
    /// `[addr, addr + size)` must be mapped memory.
    unsafe fn invalidate(&self, addr: *const u8, size: usize) {
        unsafe { self.flush(addr, size) };
    }
}

/// The host CPU's cache maintenance sequence.
///
/// - aarch64: `dc civac` per line, then `dsb sy`.
/// - x86_64: `clflush` per line, then `mfence`.
/// - anything else: no-op; the platform is assumed cache coherent for DMA.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchCache;

#[cfg(target_arch = "aarch64")]
impl CacheMaintenance for ArchCache {
    #[inline(always)]
    unsafe fn clean_invalidate_line(&self, line: usize) {
        unsafe {
            std::arch::asm!("dc civac, {0}", in(reg) line, options(nostack, preserves_flags));
        }
    }

    #[inline(always)]
    fn barrier(&self) {
        unsafe {
            std::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl CacheMaintenance for ArchCache {
    #[inline(always)]
    unsafe fn clean_invalidate_line(&self, line: usize) {
        unsafe {
            std::arch::asm!("clflush [{0}]", in(reg) line, options(nostack, preserves_flags));
        }
    }

    #[inline(always)]
    fn barrier(&self) {
        unsafe {
            std::arch::asm!("mfence", options(nostack, preserves_flags));
        }
    }
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
impl CacheMaintenance for ArchCache {
    unsafe fn clean_invalidate_line(&self, _line: usize) {}

    fn barrier(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}
