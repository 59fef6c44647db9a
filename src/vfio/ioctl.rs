#![allow(clippy::cast_possible_truncation)]

use crate::utils::io;
use std::mem::size_of;

// ===============================================================================================
// Constants and Versioning
// ===============================================================================================

pub const VFIO_TYPE: u32 = 0x3B; // ';'
pub const VFIO_BASE: u32 = 100;

pub const VFIO_API_VERSION: i32 = 0;

/// IOMMU model accepted by `VFIO_CHECK_EXTENSION` / `VFIO_SET_IOMMU`.
pub const VFIO_TYPE1_IOMMU: u32 = 1;

// ===============================================================================================
// Container / Group
// ===============================================================================================

pub const VFIO_GROUP_FLAGS_VIABLE: u32 = 1 << 0;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct GroupStatus {
    pub argsz: u32,
    pub flags: u32,
}

impl Default for GroupStatus {
    fn default() -> Self {
        Self {
            argsz: size_of::<Self>() as u32,
            flags: 0,
        }
    }
}

// ===============================================================================================
// Device
// ===============================================================================================

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DeviceInfo {
    pub argsz: u32,
    pub flags: u32,
    pub num_regions: u32,
    pub num_irqs: u32,
    pub cap_offset: u32,
    pub pad: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            argsz: size_of::<Self>() as u32,
            flags: 0,
            num_regions: 0,
            num_irqs: 0,
            cap_offset: 0,
            pad: 0,
        }
    }
}

pub const VFIO_REGION_INFO_FLAG_MMAP: u32 = 1 << 2;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RegionInfo {
    pub argsz: u32,
    pub flags: u32,
    pub index: u32,
    pub cap_offset: u32,
    pub size: u64,
    /// Offset of the region within the device file, used as the `mmap` offset.
    pub offset: u64,
}

impl RegionInfo {
    #[must_use]
    pub fn for_index(index: u32) -> Self {
        Self {
            argsz: size_of::<Self>() as u32,
            flags: 0,
            index,
            cap_offset: 0,
            size: 0,
            offset: 0,
        }
    }
}

// ===============================================================================================
// Type1 IOMMU DMA Mapping
// ===============================================================================================

pub const VFIO_DMA_MAP_FLAG_READ: u32 = 1 << 0;
pub const VFIO_DMA_MAP_FLAG_WRITE: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DmaMap {
    pub argsz: u32,
    pub flags: u32,
    pub vaddr: u64,
    pub iova: u64,
    pub size: u64,
}

impl DmaMap {
    /// A read/write mapping of `size` bytes at `vaddr` to `iova`.
    #[must_use]
    pub fn read_write(vaddr: u64, iova: u64, size: u64) -> Self {
        Self {
            argsz: size_of::<Self>() as u32,
            flags: VFIO_DMA_MAP_FLAG_READ | VFIO_DMA_MAP_FLAG_WRITE,
            vaddr,
            iova,
            size,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DmaUnmap {
    pub argsz: u32,
    pub flags: u32,
    pub iova: u64,
    /// On return, the number of bytes the kernel actually unmapped.
    pub size: u64,
}

impl DmaUnmap {
    #[must_use]
    pub fn new(iova: u64, size: u64) -> Self {
        Self {
            argsz: size_of::<Self>() as u32,
            flags: 0,
            iova,
            size,
        }
    }
}

// ===============================================================================================
// IOCTL Definitions
// ===============================================================================================

pub const VFIO_GET_API_VERSION: u32 = io(VFIO_TYPE, VFIO_BASE);
pub const VFIO_CHECK_EXTENSION: u32 = io(VFIO_TYPE, VFIO_BASE + 1);
pub const VFIO_SET_IOMMU: u32 = io(VFIO_TYPE, VFIO_BASE + 2);

pub const VFIO_GROUP_GET_STATUS: u32 = io(VFIO_TYPE, VFIO_BASE + 3);
pub const VFIO_GROUP_SET_CONTAINER: u32 = io(VFIO_TYPE, VFIO_BASE + 4);
pub const VFIO_GROUP_GET_DEVICE_FD: u32 = io(VFIO_TYPE, VFIO_BASE + 6);

pub const VFIO_DEVICE_GET_INFO: u32 = io(VFIO_TYPE, VFIO_BASE + 7);
pub const VFIO_DEVICE_GET_REGION_INFO: u32 = io(VFIO_TYPE, VFIO_BASE + 8);

pub const VFIO_IOMMU_MAP_DMA: u32 = io(VFIO_TYPE, VFIO_BASE + 13);
pub const VFIO_IOMMU_UNMAP_DMA: u32 = io(VFIO_TYPE, VFIO_BASE + 14);
