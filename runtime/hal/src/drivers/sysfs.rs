//! A device exposing one plain text file per attribute.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::component::Driver;
use crate::hwio::HwIo;
use crate::Result;

/// Reads and writes attribute files under one device directory. Cheap to
/// clone; accessor objects each hold their own copy.
#[derive(Clone)]
pub struct SysfsDriver {
    io: Arc<dyn HwIo>,
    dir: PathBuf,
}

impl SysfsDriver {
    pub fn new(io: Arc<dyn HwIo>, dir: impl Into<PathBuf>) -> Self {
        Self {
            io,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn io(&self) -> &Arc<dyn HwIo> {
        &self.io
    }

    /// Read an attribute, trailing whitespace stripped.
    pub fn read(&self, name: &str) -> Result<String> {
        self.read_at(&self.dir.join(name))
    }

    pub fn read_at(&self, path: &Path) -> Result<String> {
        Ok(self.io.read_file(path)?.trim_end().to_string())
    }

    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        self.write_at(&self.dir.join(name), value)
    }

    pub fn write_at(&self, path: &Path, value: &str) -> Result<()> {
        self.io.write_file(path, value)
    }

    /// Read an attribute as a boolean `0`/`1` file.
    pub fn read_bool(&self, name: &str) -> Result<bool> {
        Ok(self.read(name)? == "1")
    }

    pub fn write_bool(&self, name: &str, value: bool) -> Result<()> {
        self.write(name, if value { "1" } else { "0" })
    }
}

impl Driver for SysfsDriver {
    fn name(&self) -> String {
        "sysfs".to_string()
    }

    fn describe(&self) -> String {
        format!("SysfsDriver(path={})", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwio::SimIo;

    #[test]
    fn test_read_strips_newline() {
        let io = Arc::new(SimIo::new());
        io.prime_read("/sys/bus/pci/devices/0000:04:00.0/qsfp1_present", "1\n");
        let driver = SysfsDriver::new(io, "/sys/bus/pci/devices/0000:04:00.0");
        assert_eq!(driver.read("qsfp1_present").unwrap(), "1");
        assert!(driver.read_bool("qsfp1_present").unwrap());
    }

    #[test]
    fn test_write_bool() {
        let io = Arc::new(SimIo::new());
        let driver = SysfsDriver::new(io.clone(), "/sys/bus/pci/devices/0000:04:00.0");
        driver.write_bool("qsfp1_lp_mode", true).unwrap();
        assert_eq!(
            io.writes_to(Path::new("/sys/bus/pci/devices/0000:04:00.0/qsfp1_lp_mode")),
            vec!["1".to_string()]
        );
    }
}
