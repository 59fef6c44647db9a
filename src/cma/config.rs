use std::env;
use std::path::PathBuf;

/// Platform device bound to `vfio-platform` whose IOMMU group backs all allocations.
pub const DEFAULT_DEVICE_NAME: &str = "80000000.fabric-vfio";

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";
pub const DEFAULT_VFIO_ROOT: &str = "/dev/vfio";

/// First IOVA handed out; the zero page is never mapped.
pub const DEFAULT_IOVA_BASE: u64 = 0x1000;

pub const ENV_DEVICE_NAME: &str = "VFIO_CMA_DEVICE";
pub const ENV_SYSFS_ROOT: &str = "VFIO_CMA_SYSFS_ROOT";

/// The fixed physical bus-address window exposed through the device's region 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysWindow {
    pub base: u64,
    pub size: u64,
}

impl PhysWindow {
    /// `[0x8000_0000, 0xC000_0000)`
    pub const FABRIC: Self = Self {
        base: 0x8000_0000,
        size: 0x4000_0000,
    };

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.size
    }

    /// Offset of `phys` from the window base, if `[phys, phys + len)` lies inside the window.
    #[must_use]
    pub fn offset_of(&self, phys: u64, len: usize) -> Option<u64> {
        let end = phys.checked_add(len as u64)?;
        if phys < self.base || phys >= self.end() || end > self.end() {
            return None;
        }
        Some(phys - self.base)
    }
}

impl Default for PhysWindow {
    fn default() -> Self {
        Self::FABRIC
    }
}

/// Everything the allocator needs to know about its deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmaConfig {
    pub device_name: String,
    pub sysfs_root: PathBuf,
    pub vfio_root: PathBuf,
    pub window: PhysWindow,
    pub iova_base: u64,
}

impl Default for CmaConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            vfio_root: PathBuf::from(DEFAULT_VFIO_ROOT),
            window: PhysWindow::FABRIC,
            iova_base: DEFAULT_IOVA_BASE,
        }
    }
}

impl CmaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with `VFIO_CMA_DEVICE` and `VFIO_CMA_SYSFS_ROOT` applied when set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup(ENV_DEVICE_NAME).filter(|v| !v.is_empty()) {
            self.device_name = name;
        }
        if let Some(root) = lookup(ENV_SYSFS_ROOT).filter(|v| !v.is_empty()) {
            self.sysfs_root = PathBuf::from(root);
        }
        self
    }

    #[must_use]
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    #[must_use]
    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    #[must_use]
    pub fn vfio_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.vfio_root = root.into();
        self
    }

    #[must_use]
    pub fn window(mut self, window: PhysWindow) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn iova_base(mut self, base: u64) -> Self {
        self.iova_base = base;
        self
    }

    /// The container node, `<vfio_root>/vfio`.
    #[must_use]
    pub fn container_path(&self) -> PathBuf {
        self.vfio_root.join("vfio")
    }
}
