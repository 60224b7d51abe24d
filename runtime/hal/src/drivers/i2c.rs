//! I2C device instantiation and adapter enumeration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::component::Driver;
use crate::hwio::HwIo;
use crate::types::I2cAddr;
use crate::wait::FileWaiter;
use crate::Result;

const I2C_ADAPTER_ROOT: &str = "/sys/class/i2c-adapter";

/// Enumerate kernel I2C adapters as (bus number, adapter name), bus order.
pub fn kernel_i2c_buses(io: &dyn HwIo) -> Result<Vec<(u16, String)>> {
    let root = Path::new(I2C_ADAPTER_ROOT);
    let mut buses: Vec<u16> = io
        .list_dir(root)?
        .iter()
        .filter_map(|name| name.strip_prefix("i2c-")?.parse().ok())
        .collect();
    buses.sort_unstable();

    let mut out = Vec::with_capacity(buses.len());
    for bus in buses {
        let name_path = root.join(format!("i2c-{}", bus)).join("name");
        out.push((bus, io.read_file(&name_path)?.trim_end().to_string()));
    }
    Ok(out)
}

/// Find the bus number of the `idx`-th adapter carrying the given name.
pub fn i2c_bus_from_name(io: &dyn HwIo, name: &str, idx: usize) -> Option<u16> {
    let mut remaining = idx;
    for (bus, bus_name) in kernel_i2c_buses(io).ok()? {
        if bus_name == name {
            if remaining == 0 {
                return Some(bus);
            }
            remaining -= 1;
        }
    }
    None
}

/// Instantiates a kernel I2C device by writing to the adapter's `new_device`
/// file, and deletes it through `delete_device` on clean.
pub struct I2cKernelDriver {
    io: Arc<dyn HwIo>,
    addr: I2cAddr,
    name: String,
    waiter: FileWaiter,
}

impl I2cKernelDriver {
    pub fn new(io: Arc<dyn HwIo>, addr: I2cAddr, name: impl Into<String>) -> Self {
        Self {
            io,
            addr,
            name: name.into(),
            waiter: FileWaiter::none(),
        }
    }

    pub fn wait_file(mut self, path: impl Into<std::path::PathBuf>, timeout: Duration) -> Self {
        self.waiter = FileWaiter::path(path, timeout);
        self
    }

    pub fn addr(&self) -> &I2cAddr {
        &self.addr
    }
}

impl Driver for I2cKernelDriver {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn setup(&mut self) -> Result<()> {
        let device_path = self.addr.sysfs_path();
        if self.io.path_exists(&device_path) {
            debug!("i2c device {} already exists", device_path.display());
            return Ok(());
        }
        debug!(
            "creating i2c device {} on bus {} at 0x{:02x}",
            self.name,
            self.addr.bus(),
            self.addr.address()
        );
        let new_device = self.addr.sysfs_bus_path().join("new_device");
        self.io
            .write_file(&new_device, &format!("{} 0x{:02x}", self.name, self.addr.address()))?;
        self.waiter.wait_ready(self.io.as_ref());
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        // the device node goes away with the module; only delete if present
        if !self.io.path_exists(&self.addr.sysfs_path()) {
            return Ok(());
        }
        debug!(
            "removing i2c device {} from bus {}",
            self.name,
            self.addr.bus()
        );
        let delete_device = self.addr.sysfs_bus_path().join("delete_device");
        self.io
            .write_file(&delete_device, &format!("0x{:02x}", self.addr.address()))
    }

    fn describe(&self) -> String {
        format!("I2cKernelDriver({}, {})", self.name, self.addr)
    }
}
