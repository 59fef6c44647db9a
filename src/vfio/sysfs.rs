use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PLATFORM_DEVICES_PATH: &str = "bus/platform/devices";

/// Path of the `iommu_group` link for a platform device under `sysfs_root`.
#[must_use]
pub fn iommu_group_link(sysfs_root: &Path, device_name: &str) -> PathBuf {
    sysfs_root
        .join(PLATFORM_DEVICES_PATH)
        .join(device_name)
        .join("iommu_group")
}

/// Resolves the IOMMU group number of a platform device.
///
/// The kernel exposes the group as a symlink such as `../../../kernel/iommu_groups/3`;
/// the final path component is the group number used under `/dev/vfio`.
///
/// # Errors
/// Returns `NotFound` if the device has no group link and `InvalidData` if the link target
/// does not end in a number.
pub fn iommu_group_of(sysfs_root: &Path, device_name: &str) -> io::Result<u32> {
    let target = fs::read_link(iommu_group_link(sysfs_root, device_name))?;

    target
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse::<u32>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected iommu_group link target {}", target.display()),
            )
        })
}
