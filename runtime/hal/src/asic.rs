//! The switch ASIC: a PCI device that only enumerates once its reset is
//! released, some time after the critical bring-up pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::component::{Component, ComponentBase, Priority};
use crate::hwio::HwIo;
use crate::types::PciAddr;
use crate::Result;

const PCI_RESCAN_PATH: &str = "/sys/bus/pci/rescan";

/// Settle time after the device appears, before letting drivers at it.
const ASIC_YIELD_TIME: Duration = Duration::from_secs(2);

pub struct SwitchChip {
    base: ComponentBase,
    io: Arc<dyn HwIo>,
    addr: PciAddr,
}

impl SwitchChip {
    pub fn new(io: Arc<dyn HwIo>, addr: PciAddr) -> Self {
        Self {
            base: ComponentBase::new(Priority::Default),
            io,
            addr,
        }
    }

    pub fn addr(&self) -> PciAddr {
        self.addr
    }

    fn pci_rescan(&self) {
        debug!("rescanning the pci bus");
        if let Err(e) = self.io.write_file(&PathBuf::from(PCI_RESCAN_PATH), "1") {
            error!("pci rescan failed: {}", e);
        }
    }
}

impl Component for SwitchChip {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn label(&self) -> String {
        format!("SwitchChip(addr={})", self.addr)
    }

    /// Poll for the device to enumerate, rescanning the bus once at half the
    /// budget. Expiry logs and proceeds; the chip simply stays unusable.
    fn wait_for_it(&mut self, timeout: Duration) -> Result<()> {
        let dev_path = self.addr.sysfs_path();
        debug!("waiting for switch chip {}", dev_path.display());
        if self.io.is_sim() {
            return Ok(());
        }

        let begin = Instant::now();
        let mut rescan_at = Some(begin + timeout / 2);
        while begin.elapsed() < timeout {
            if self.io.path_exists(&dev_path) {
                debug!("switch chip is ready");
                std::thread::sleep(ASIC_YIELD_TIME);
                return Ok(());
            }
            if let Some(at) = rescan_at {
                if Instant::now() > at {
                    self.pci_rescan();
                    rescan_at = None;
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        error!("timed out waiting for the switch chip {}", dev_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwio::SimIo;

    #[test]
    fn test_sim_wait_returns_immediately() {
        let io = Arc::new(SimIo::new());
        let mut chip = SwitchChip::new(io, PciAddr::new(0, 1, 0, 0));
        chip.wait_for_it(Duration::from_secs(30)).unwrap();
    }
}
