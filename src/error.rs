use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmaError {
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot resolve IOMMU group for device {device}: {source}")]
    Topology {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open VFIO container: {0}")]
    ContainerOpen(#[source] io::Error),

    #[error("Failed to open VFIO group {group}: {source}")]
    GroupOpen {
        group: u32,
        #[source]
        source: io::Error,
    },

    #[error("VFIO group {0} is not viable (all devices must be bound to vfio)")]
    GroupNotViable(u32),

    #[error("Unsupported VFIO API version {0}")]
    UnsupportedApi(i32),

    #[error("Container does not support the Type1 IOMMU")]
    Type1Unsupported,

    #[error("Failed to attach group to container: {0}")]
    SetContainer(#[source] io::Error),

    #[error("Failed to select IOMMU model: {0}")]
    SetIommu(#[source] io::Error),

    #[error("Failed to acquire device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to query device region: {0}")]
    RegionInfo(#[source] io::Error),

    #[error("Physical range 0x{phys:x}+0x{len:x} is outside the device window")]
    OutOfWindow { phys: u64, len: usize },

    #[error("Failed to map device region: {0}")]
    RegionMap(#[source] io::Error),

    #[error("Failed to unmap device region: {0}")]
    RegionUnmap(#[source] io::Error),

    #[error("Out of host memory: {0}")]
    AnonymousMap(#[source] io::Error),

    #[error("IOMMU map of IOVA 0x{iova:x} (0x{size:x} bytes) failed: {source}")]
    DmaMap {
        iova: u64,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("IOMMU unmap of IOVA 0x{iova:x} (0x{size:x} bytes) failed: {source}")]
    DmaUnmap {
        iova: u64,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("IOVA space exhausted for a 0x{size:x} byte allocation")]
    IovaExhausted { size: usize },
}

// A convenient alias
pub type CmaResult<T> = Result<T, CmaError>;
