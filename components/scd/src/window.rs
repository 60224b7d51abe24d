//! The memory-mapped register window of the controller.
//!
//! One PCI BAR (`resource0` under the device's sysfs directory) carries
//! every watchdog, power-cycle and interrupt register. It is mapped
//! read/write once and cached; all values are unsigned 32-bit little-endian
//! at byte offsets into the window.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use memmap2::MmapMut;

use baseplate_hal::register::RegisterIo;
use baseplate_hal::{HalError, Result};

/// 32-bit little-endian access into the device register window.
pub trait RegisterWindow: Send + Sync {
    fn read32(&self, offset: usize) -> Result<u32>;
    fn write32(&self, offset: usize, value: u32) -> Result<()>;
}

/// The real window: a shared mapping of the PCI resource file.
pub struct MmapWindow {
    map: Mutex<MmapMut>,
}

impl MmapWindow {
    pub fn map(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| HalError::io(path, e))?;
        // Safety: the mapping covers a device resource file whose size is
        // fixed by the kernel; nothing else truncates it.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| HalError::io(path, e))?;
        Ok(Self {
            map: Mutex::new(map),
        })
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset + 4 > len {
            return Err(HalError::Config(format!(
                "register offset {:#x} beyond window of {:#x} bytes",
                offset, len
            )));
        }
        Ok(())
    }
}

impl RegisterWindow for MmapWindow {
    fn read32(&self, offset: usize) -> Result<u32> {
        let map = self.map.lock().unwrap();
        self.check(offset, map.len())?;
        let bytes: [u8; 4] = map[offset..offset + 4].try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        self.check(offset, map.len())?;
        map[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

/// Simulated window: a plain backing store, so arm-then-status style
/// round trips behave like hardware.
#[derive(Default)]
pub struct SimWindow {
    regs: Mutex<HashMap<usize, u32>>,
}

impl SimWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegisterWindow for SimWindow {
    fn read32(&self, offset: usize) -> Result<u32> {
        Ok(self.regs.lock().unwrap().get(&offset).copied().unwrap_or(0))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.regs.lock().unwrap().insert(offset, value);
        Ok(())
    }
}

/// Adapter exposing a window as a [`RegisterIo`], for register maps over
/// window-resident registers.
pub struct WindowIo<W>(pub W);

impl<W: RegisterWindow> RegisterIo for WindowIo<W> {
    fn read(&self, addr: u32) -> Result<u32> {
        self.0.read32(addr as usize)
    }

    fn write(&self, addr: u32, value: u32) -> Result<()> {
        self.0.write32(addr as usize, value)
    }
}

impl RegisterWindow for std::sync::Arc<dyn RegisterWindow> {
    fn read32(&self, offset: usize) -> Result<u32> {
        self.as_ref().read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.as_ref().write32(offset, value)
    }
}
