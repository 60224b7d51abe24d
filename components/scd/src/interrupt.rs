//! Interrupt register blocks and per-bit interrupt lines.

use std::sync::Arc;

use log::error;

use baseplate_hal::inventory::InterruptLine;
use baseplate_hal::wait::write_config;
use baseplate_hal::Result;

use crate::{InterruptRegDesc, ScdState};

/// One interrupt register block of the controller: a mask set word, a mask
/// clear word at +0x10 and a status word at +0x20. Mask updates are
/// read-modify-write against the window; failures are logged and swallowed.
pub struct ScdInterruptRegister {
    state: Arc<ScdState>,
    desc: InterruptRegDesc,
}

impl ScdInterruptRegister {
    pub(crate) fn new(state: Arc<ScdState>, desc: InterruptRegDesc) -> Self {
        Self { state, desc }
    }

    pub fn num(&self) -> u32 {
        self.desc.num
    }

    fn read_reg(&self, reg: usize) -> Option<u32> {
        match self.state.window().and_then(|w| w.read32(reg)) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("read register {:#x}: {}", reg, e);
                None
            }
        }
    }

    fn write_reg(&self, reg: usize, value: u32) -> bool {
        match self.state.window().and_then(|w| w.write32(reg, value)) {
            Ok(()) => true,
            Err(e) => {
                error!("write register {:#x} with {:#x}: {}", reg, value, e);
                false
            }
        }
    }

    pub fn set_mask(&self, bit: u32) {
        let mask = 1u32 << bit;
        if let Some(current) = self.read_reg(self.desc.set_addr) {
            self.write_reg(self.desc.set_addr, mask | current);
        }
    }

    pub fn clear_mask(&self, bit: u32) {
        let mask = 1u32 << bit;
        if let Some(current) = self.read_reg(self.desc.set_addr) {
            self.write_reg(self.desc.clear_addr, mask | !current);
        }
    }

    pub fn status(&self) -> Option<u32> {
        self.read_reg(self.desc.status_addr)
    }

    /// Declare the block's offsets to the kernel driver. Gated on the
    /// interrupt-init configuration flag, like the per-bit handles.
    pub(crate) fn setup(&self) -> Result<()> {
        if !self.state.init_irq() {
            return Ok(());
        }
        let num = self.desc.num;
        let read_key = format!("interrupt_mask_read_offset{}", num);
        let set_key = format!("interrupt_mask_set_offset{}", num);
        let clear_key = format!("interrupt_mask_clear_offset{}", num);
        let status_key = format!("interrupt_status_offset{}", num);
        let mask_key = format!("interrupt_mask{}", num);
        write_config(
            self.state.io().as_ref(),
            self.state.sysfs_path(),
            &[
                (read_key.as_str(), self.desc.read_addr.to_string()),
                (set_key.as_str(), self.desc.set_addr.to_string()),
                (clear_key.as_str(), self.desc.clear_addr.to_string()),
                (status_key.as_str(), self.desc.status_addr.to_string()),
                (mask_key.as_str(), self.desc.mask.to_string()),
            ],
        )
    }

    /// A handle on one bit of this block, or `None` when interrupt init is
    /// disabled by configuration.
    pub fn interrupt(self: &Arc<Self>, bit: u32) -> Option<Arc<ScdInterrupt>> {
        if !self.state.init_irq() {
            return None;
        }
        Some(Arc::new(ScdInterrupt {
            reg: self.clone(),
            bit,
        }))
    }
}

/// One named interrupt line: a bit in a block, backed by a UIO device node.
pub struct ScdInterrupt {
    reg: Arc<ScdInterruptRegister>,
    bit: u32,
}

impl InterruptLine for ScdInterrupt {
    fn set(&self) {
        self.reg.set_mask(self.bit);
    }

    fn clear(&self) {
        self.reg.clear_mask(self.bit);
    }

    fn file(&self) -> Option<String> {
        match self.reg.state.uio_device(self.reg.desc.num, self.bit) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("no uio device for interrupt bit {}: {}", self.bit, e);
                None
            }
        }
    }
}
