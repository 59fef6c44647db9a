pub mod cursor;
pub mod manager;

use std::io;

/// A live DMA buffer: anonymous process memory mapped 1:1 into the device's IOVA space.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub ptr: *mut u8, // CPU Virtual Address
    pub size: usize,  // Page-rounded size in bytes
    pub iova: u64,    // Device-visible address
}

impl Allocation {
    /// First IOVA past the end of this buffer.
    #[must_use]
    pub const fn iova_end(&self) -> u64 {
        self.iova + self.size as u64
    }
}

/// The IOMMU half of the device-access capability.
pub trait DmaMapper {
    /// Map `size` bytes of process memory at `vaddr` to `iova`, read/write for the device.
    fn map_dma(&self, vaddr: u64, iova: u64, size: usize) -> io::Result<()>;

    /// Remove the device mapping at `iova`.
    fn unmap_dma(&self, iova: u64, size: usize) -> io::Result<()>;
}

impl<T: DmaMapper + ?Sized> DmaMapper for &T {
    fn map_dma(&self, vaddr: u64, iova: u64, size: usize) -> io::Result<()> {
        (**self).map_dma(vaddr, iova, size)
    }

    fn unmap_dma(&self, iova: u64, size: usize) -> io::Result<()> {
        (**self).unmap_dma(iova, size)
    }
}

pub use cursor::IovaCursor;
pub use manager::DmaAllocator;
