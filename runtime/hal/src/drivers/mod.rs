//! Concrete driver transports.
//!
//! - [`kernel`]: load/unload a kernel module and wait for its device nodes.
//! - [`i2c`]: instantiate kernel I2C devices and enumerate adapters.
//! - [`sysfs`]: a file-per-attribute device directory.
//! - [`accessors`]: inventory accessor objects backed by sysfs attributes.

pub mod accessors;
pub mod i2c;
pub mod kernel;
pub mod sysfs;

pub use i2c::I2cKernelDriver;
pub use kernel::KernelDriver;
pub use sysfs::SysfsDriver;
