use crate::cma::config::CmaConfig;
use crate::cma::memory::DmaMapper;
use crate::cma::window::RegionMapper;
use crate::error::{CmaError, CmaResult};
use crate::vfio::ioctl::{
    DmaMap, VFIO_API_VERSION, VFIO_GROUP_FLAGS_VIABLE, VFIO_REGION_INFO_FLAG_MMAP,
    VFIO_TYPE1_IOMMU,
};
use crate::vfio::{VfioContainer, VfioDevice, VfioGroup, sysfs};
use log::{debug, error, warn};
use std::io;
use std::ptr::NonNull;

/// Region 0 of the bound device, as reported by `VFIO_DEVICE_GET_REGION_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub offset: u64,
    pub size: u64,
    pub flags: u32,
}

/// The three VFIO handles plus the region descriptor, acquired once per process.
///
/// Dropping the binding closes the device, group and container in that order.
#[derive(Debug)]
pub struct DeviceBinding {
    pub device: VfioDevice,
    pub group: VfioGroup,
    pub container: VfioContainer,
    pub region: RegionDescriptor,
}

impl DeviceBinding {
    /// Binds the configured platform device into a fresh Type1 container.
    ///
    /// Each step fails fast; no other device is tried and nothing is retried.
    ///
    /// # Errors
    /// Returns the first step that failed: group lookup, container open, API or Type1 support,
    /// group open or viability, container attach, IOMMU selection, device acquisition or the
    /// region query.
    pub fn bind(config: &CmaConfig) -> CmaResult<Self> {
        Self::try_bind(config).inspect_err(|e| {
            error!(target: "vfio_cma", "binding {} failed: {e}", config.device_name);
        })
    }

    fn try_bind(config: &CmaConfig) -> CmaResult<Self> {
        let name = config.device_name.as_str();

        // 1. Locate the IOMMU group
        let group_id =
            sysfs::iommu_group_of(&config.sysfs_root, name).map_err(|source| CmaError::Topology {
                device: name.to_string(),
                source,
            })?;

        // 2. Open the container and group nodes
        let container =
            VfioContainer::open(&config.container_path()).map_err(CmaError::ContainerOpen)?;
        let group = VfioGroup::open(&config.vfio_root, group_id)
            .map_err(|source| CmaError::GroupOpen {
                group: group_id,
                source,
            })?;

        // 3. Validate the container, then attach the group
        let version = container.api_version()?;
        if version != VFIO_API_VERSION {
            return Err(CmaError::UnsupportedApi(version));
        }
        if !container.check_extension(VFIO_TYPE1_IOMMU)? {
            return Err(CmaError::Type1Unsupported);
        }

        if group.status()?.flags & VFIO_GROUP_FLAGS_VIABLE == 0 {
            return Err(CmaError::GroupNotViable(group_id));
        }

        group
            .set_container(&container)
            .map_err(CmaError::SetContainer)?;
        container
            .set_iommu(VFIO_TYPE1_IOMMU)
            .map_err(CmaError::SetIommu)?;

        // 4. Acquire the device and its primary region
        let device = group
            .get_device(name)
            .map_err(|source| CmaError::DeviceOpen {
                device: name.to_string(),
                source,
            })?;

        if let Ok(info) = device.info() {
            debug!(
                target: "vfio_cma",
                "{name}: {} regions, {} irqs",
                info.num_regions, info.num_irqs
            );
        }

        let info = device.region_info(0).map_err(CmaError::RegionInfo)?;
        if info.flags & VFIO_REGION_INFO_FLAG_MMAP == 0 {
            warn!(target: "vfio_cma", "{name}: region 0 does not advertise mmap support");
        }

        let region = RegionDescriptor {
            offset: info.offset,
            size: info.size,
            flags: info.flags,
        };

        debug!(
            target: "vfio_cma",
            "bound {name} (group {group_id}), region 0 at offset 0x{:x} size 0x{:x}",
            region.offset, region.size
        );

        Ok(Self {
            device,
            group,
            container,
            region,
        })
    }
}

impl DmaMapper for DeviceBinding {
    fn map_dma(&self, vaddr: u64, iova: u64, size: usize) -> io::Result<()> {
        let mut args = DmaMap::read_write(vaddr, iova, size as u64);
        self.container.map_dma(&mut args)
    }

    fn unmap_dma(&self, iova: u64, size: usize) -> io::Result<()> {
        let unmapped = self.container.unmap_dma(iova, size as u64)?;
        if unmapped != size as u64 {
            return Err(io::Error::other(format!(
                "kernel unmapped 0x{unmapped:x} of 0x{size:x} bytes"
            )));
        }
        Ok(())
    }
}

impl RegionMapper for DeviceBinding {
    fn region_offset(&self) -> u64 {
        self.region.offset
    }

    fn map_region(&self, offset: u64, len: usize) -> io::Result<NonNull<u8>> {
        self.device.mmap_region(offset, len)
    }

    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        unsafe { self.device.munmap_region(addr, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::PathBuf;

    fn scratch(tag: &str) -> PathBuf {
        let root =
            std::env::temp_dir().join(format!("vfio-cma-bind-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn missing_topology_entry_fails_first() {
        let root = scratch("topo");
        let cfg = CmaConfig::new().sysfs_root(&root).vfio_root(&root);

        let err = DeviceBinding::bind(&cfg).unwrap_err();
        assert!(matches!(err, CmaError::Topology { .. }));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_container_is_reported() {
        let root = scratch("container");
        let dev = root.join("bus/platform/devices/80000000.fabric-vfio");
        fs::create_dir_all(&dev).unwrap();
        symlink("../../../kernel/iommu_groups/4", dev.join("iommu_group")).unwrap();

        let cfg = CmaConfig::new()
            .sysfs_root(&root)
            .vfio_root(root.join("dev-vfio"));

        let err = DeviceBinding::bind(&cfg).unwrap_err();
        assert!(matches!(err, CmaError::ContainerOpen(_)));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_group_node_is_reported() {
        let root = scratch("group");
        let dev = root.join("bus/platform/devices/80000000.fabric-vfio");
        fs::create_dir_all(&dev).unwrap();
        symlink("../../../kernel/iommu_groups/4", dev.join("iommu_group")).unwrap();
        let vfio_root = root.join("dev-vfio");
        fs::create_dir_all(&vfio_root).unwrap();
        fs::write(vfio_root.join("vfio"), b"").unwrap();

        let cfg = CmaConfig::new().sysfs_root(&root).vfio_root(&vfio_root);

        let err = DeviceBinding::bind(&cfg).unwrap_err();
        assert!(matches!(err, CmaError::GroupOpen { group: 4, .. }));
        fs::remove_dir_all(&root).unwrap();
    }
}
