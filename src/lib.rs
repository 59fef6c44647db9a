//! User-space DMA buffers for a fabric accelerator behind an IOMMU.
//!
//! Buffers are ordinary anonymous memory mapped 1:1 into the device's IOVA space through VFIO,
//! standing in for physically contiguous CMA memory. See [`cma::CmaContext`].

pub mod cma;
pub mod error;
pub mod utils;
pub mod vfio;

pub use cma::{CmaConfig, CmaContext};
pub use error::{CmaError, CmaResult};
