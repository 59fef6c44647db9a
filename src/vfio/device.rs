use crate::vfio::ioctl::{
    DeviceInfo, DmaMap, DmaUnmap, GroupStatus, RegionInfo, VFIO_CHECK_EXTENSION,
    VFIO_DEVICE_GET_INFO, VFIO_DEVICE_GET_REGION_INFO, VFIO_GET_API_VERSION,
    VFIO_GROUP_GET_DEVICE_FD, VFIO_GROUP_GET_STATUS, VFIO_GROUP_SET_CONTAINER,
    VFIO_IOMMU_MAP_DMA, VFIO_IOMMU_UNMAP_DMA, VFIO_SET_IOMMU,
};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Issues an IOCTL whose argument is a pointer to `arg`.
///
/// # Safety
/// The caller must ensure that `arg` has the layout the kernel expects for `cmd`.
unsafe fn ioctl_ptr<T>(fd: RawFd, cmd: u32, arg: &mut T) -> io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(fd, cmd as _, arg as *mut T) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

/// Issues an IOCTL whose argument is passed by value.
fn ioctl_val(fd: RawFd, cmd: u32, value: libc::c_ulong) -> io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(fd, cmd as _, value) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

// ===============================================================================================
// Container
// ===============================================================================================

/// A handle to a VFIO container (`/dev/vfio/vfio`), the owner of an IOMMU address space.
#[derive(Clone, Debug)]
pub struct VfioContainer {
    pub file: Arc<File>,
}

impl VfioContainer {
    /// Opens a new container.
    ///
    /// # Errors
    /// Returns an error if the container node cannot be opened (module not loaded, permissions).
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: Arc::new(open_rw(path)?),
        })
    }

    pub fn api_version(&self) -> io::Result<i32> {
        ioctl_val(self.as_raw_fd(), VFIO_GET_API_VERSION, 0)
    }

    /// Returns whether the container supports the IOMMU model `extension`.
    pub fn check_extension(&self, extension: u32) -> io::Result<bool> {
        let ret = ioctl_val(
            self.as_raw_fd(),
            VFIO_CHECK_EXTENSION,
            libc::c_ulong::from(extension),
        )?;
        Ok(ret > 0)
    }

    /// Selects the IOMMU model. Requires at least one group attached to the container.
    pub fn set_iommu(&self, model: u32) -> io::Result<()> {
        ioctl_val(self.as_raw_fd(), VFIO_SET_IOMMU, libc::c_ulong::from(model)).map(|_| ())
    }

    /// Maps `args.size` bytes of process memory at `args.vaddr` to `args.iova`.
    pub fn map_dma(&self, args: &mut DmaMap) -> io::Result<()> {
        unsafe { ioctl_ptr(self.as_raw_fd(), VFIO_IOMMU_MAP_DMA, args) }.map(|_| ())
    }

    /// Unmaps an IOVA range, returning the number of bytes the kernel released.
    pub fn unmap_dma(&self, iova: u64, size: u64) -> io::Result<u64> {
        let mut args = DmaUnmap::new(iova, size);
        unsafe {
            ioctl_ptr(self.as_raw_fd(), VFIO_IOMMU_UNMAP_DMA, &mut args)?;
        }
        Ok(args.size)
    }
}

impl AsRawFd for VfioContainer {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

// ===============================================================================================
// Group
// ===============================================================================================

/// A handle to an IOMMU group node (`/dev/vfio/<group>`).
#[derive(Clone, Debug)]
pub struct VfioGroup {
    pub id: u32,
    pub file: Arc<File>,
}

impl VfioGroup {
    pub fn open(vfio_root: &Path, id: u32) -> io::Result<Self> {
        let file = open_rw(&vfio_root.join(id.to_string()))?;
        Ok(Self {
            id,
            file: Arc::new(file),
        })
    }

    pub fn status(&self) -> io::Result<GroupStatus> {
        let mut status = GroupStatus::default();
        unsafe {
            ioctl_ptr(self.as_raw_fd(), VFIO_GROUP_GET_STATUS, &mut status)?;
        }
        Ok(status)
    }

    /// Attaches this group to `container`.
    pub fn set_container(&self, container: &VfioContainer) -> io::Result<()> {
        let mut fd: libc::c_int = container.as_raw_fd();
        unsafe { ioctl_ptr(self.as_raw_fd(), VFIO_GROUP_SET_CONTAINER, &mut fd) }.map(|_| ())
    }

    /// Acquires a file descriptor for the device `name` within the group.
    pub fn get_device(&self, name: &str) -> io::Result<VfioDevice> {
        let name =
            CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let fd = unsafe {
            libc::ioctl(
                self.as_raw_fd(),
                VFIO_GROUP_GET_DEVICE_FD as _,
                name.as_ptr(),
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the kernel handed us a fresh descriptor that nothing else owns.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(VfioDevice {
            file: Arc::new(File::from(owned)),
        })
    }
}

impl AsRawFd for VfioGroup {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

// ===============================================================================================
// Device
// ===============================================================================================

/// A handle to a device within a VFIO group. Its regions are reached by `mmap` at region offsets.
#[derive(Clone, Debug)]
pub struct VfioDevice {
    pub file: Arc<File>,
}

impl VfioDevice {
    pub fn info(&self) -> io::Result<DeviceInfo> {
        let mut info = DeviceInfo::default();
        unsafe {
            ioctl_ptr(self.as_raw_fd(), VFIO_DEVICE_GET_INFO, &mut info)?;
        }
        Ok(info)
    }

    pub fn region_info(&self, index: u32) -> io::Result<RegionInfo> {
        let mut info = RegionInfo::for_index(index);
        unsafe {
            ioctl_ptr(self.as_raw_fd(), VFIO_DEVICE_GET_REGION_INFO, &mut info)?;
        }
        Ok(info)
    }

    /// Maps `len` bytes of the device file at `offset` as shared read/write memory.
    ///
    /// `offset` must be page aligned.
    pub fn mmap_region(&self, offset: u64, len: usize) -> io::Result<NonNull<u8>> {
        let ret = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if ret == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ret.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
    }

    /// Releases a mapping created by [`Self::mmap_region`].
    ///
    /// # Safety
    /// `addr`/`len` must describe a live mapping and no references into it may outlive this call.
    pub unsafe fn munmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        let ret = unsafe { libc::munmap(addr.as_ptr().cast(), len) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for VfioDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
