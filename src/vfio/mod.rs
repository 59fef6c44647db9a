//! Raw access to the Linux VFIO interface: ioctl definitions, handle types and sysfs lookup.

pub mod device;
pub mod ioctl;
pub mod sysfs;

pub use device::{VfioContainer, VfioDevice, VfioGroup};
