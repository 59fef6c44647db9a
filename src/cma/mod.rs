//! The IOMMU-backed CMA replacement: device binding, DMA buffers, the physical window and
//! cache maintenance.

pub mod binding;
pub mod cache;
pub mod config;
pub mod context;
pub mod legacy;
pub mod memory;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{DeviceBinding, RegionDescriptor};
pub use cache::{ArchCache, CacheMaintenance};
pub use config::{CmaConfig, PhysWindow};
pub use context::CmaContext;
pub use memory::{Allocation, DmaAllocator, DmaMapper, IovaCursor};
pub use window::{RegionMapper, RegionWindow};
