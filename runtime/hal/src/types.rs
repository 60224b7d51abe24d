//! Bus addresses and their sysfs locations.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// An address on an I2C bus.
///
/// The bus number is either fixed at construction, or relative to a base
/// discovered at runtime: controllers that fan out virtual buses (the SCD)
/// only learn their first kernel bus number once the kernel driver is
/// configured, so addresses created during platform construction carry a
/// shared offset cell that `refresh()` fills in later.
#[derive(Clone)]
pub struct I2cAddr {
    bus: BusRef,
    address: u8,
}

#[derive(Clone)]
enum BusRef {
    Fixed(u16),
    Shifted { offset: Arc<AtomicU16>, rel: u16 },
}

impl I2cAddr {
    pub fn new(bus: u16, address: u8) -> Self {
        Self {
            bus: BusRef::Fixed(bus),
            address,
        }
    }

    /// An address whose effective bus is `offset + rel`, with `offset`
    /// resolved after kernel driver setup. Before resolution the offset cell
    /// holds 0.
    pub fn shifted(offset: Arc<AtomicU16>, rel: u16, address: u8) -> Self {
        Self {
            bus: BusRef::Shifted { offset, rel },
            address,
        }
    }

    pub fn bus(&self) -> u16 {
        match &self.bus {
            BusRef::Fixed(bus) => *bus,
            BusRef::Shifted { offset, rel } => offset.load(Ordering::Relaxed) + rel,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn sysfs_path(&self) -> PathBuf {
        PathBuf::from(format!("/sys/bus/i2c/devices/{}", self))
    }

    pub fn sysfs_bus_path(&self) -> PathBuf {
        PathBuf::from(format!("/sys/bus/i2c/devices/i2c-{}", self.bus()))
    }
}

impl fmt::Display for I2cAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-00{:02x}", self.bus(), self.address)
    }
}

impl fmt::Debug for I2cAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I2cAddr({})", self)
    }
}

/// A PCI device address (domain:bus:device.function).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddr {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub func: u8,
}

impl PciAddr {
    pub fn new(domain: u16, bus: u8, device: u8, func: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            func,
        }
    }

    pub fn sysfs_path(&self) -> PathBuf {
        PathBuf::from(format!("/sys/bus/pci/devices/{}", self))
    }
}

impl fmt::Display for PciAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.device, self.func
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i2c_addr_display() {
        let addr = I2cAddr::new(3, 0x48);
        assert_eq!(addr.to_string(), "3-0048");
        assert_eq!(
            addr.sysfs_path(),
            PathBuf::from("/sys/bus/i2c/devices/3-0048")
        );
    }

    #[test]
    fn test_shifted_bus_tracks_offset() {
        let offset = Arc::new(AtomicU16::new(0));
        let addr = I2cAddr::shifted(offset.clone(), 4, 0x50);
        assert_eq!(addr.bus(), 4);

        offset.store(13, Ordering::Relaxed);
        assert_eq!(addr.bus(), 17);
        assert_eq!(addr.to_string(), "17-0050");
    }

    #[test]
    fn test_pci_addr_display() {
        let addr = PciAddr::new(0, 4, 0, 0);
        assert_eq!(addr.to_string(), "0000:04:00.0");
        assert_eq!(
            addr.sysfs_path(),
            PathBuf::from("/sys/bus/pci/devices/0000:04:00.0")
        );
    }
}
