//! In-process stand-in for the VFIO capability, used by unit tests.

use crate::cma::memory::DmaMapper;
use crate::cma::window::RegionMapper;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::ptr::{self, NonNull};

#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    region_offset: u64,
    pub fail_dma_map: Cell<bool>,
    pub fail_dma_unmap: Cell<bool>,
    pub fail_region_map: Cell<bool>,
    // IOVA -> (vaddr, size)
    dma: RefCell<BTreeMap<u64, (u64, usize)>>,
    history: RefCell<Vec<u64>>,
    unmaps: Cell<usize>,
    region_maps: RefCell<Vec<(u64, usize)>>,
    region_unmaps: RefCell<Vec<usize>>,
}

impl FakeBackend {
    pub fn new(region_offset: u64) -> Self {
        Self {
            region_offset,
            ..Self::default()
        }
    }

    /// Every IOVA ever mapped, in call order.
    pub fn mapped_iovas(&self) -> Vec<u64> {
        self.history.borrow().clone()
    }

    pub fn live_iovas(&self) -> Vec<u64> {
        self.dma.borrow().keys().copied().collect()
    }

    pub fn unmap_calls(&self) -> usize {
        self.unmaps.get()
    }

    pub fn region_maps(&self) -> Vec<(u64, usize)> {
        self.region_maps.borrow().clone()
    }

    pub fn region_unmaps(&self) -> Vec<usize> {
        self.region_unmaps.borrow().clone()
    }
}

impl DmaMapper for FakeBackend {
    fn map_dma(&self, vaddr: u64, iova: u64, size: usize) -> io::Result<()> {
        if self.fail_dma_map.get() {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let mut dma = self.dma.borrow_mut();
        let end = iova + size as u64;
        let overlaps = dma
            .iter()
            .any(|(&start, &(_, len))| start < end && iova < start + len as u64);
        if overlaps {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        dma.insert(iova, (vaddr, size));
        self.history.borrow_mut().push(iova);
        Ok(())
    }

    fn unmap_dma(&self, iova: u64, size: usize) -> io::Result<()> {
        if self.fail_dma_unmap.get() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        match self.dma.borrow_mut().remove(&iova) {
            Some((_, len)) if len == size => {
                self.unmaps.set(self.unmaps.get() + 1);
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }
}

impl RegionMapper for FakeBackend {
    fn region_offset(&self) -> u64 {
        self.region_offset
    }

    fn map_region(&self, offset: u64, len: usize) -> io::Result<NonNull<u8>> {
        if self.fail_region_map.get() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.region_maps.borrow_mut().push((offset, len));
        // Anonymous pages stand in for the device region so the pointer is real and aligned.
        let ret = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
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

    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        self.region_unmaps.borrow_mut().push(len);
        if unsafe { libc::munmap(addr.as_ptr().cast(), len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
