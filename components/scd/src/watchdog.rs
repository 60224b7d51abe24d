//! Watchdog and power-cycle control through the register window.
//!
//! These are best-effort operational controls, not part of the bring-up
//! critical path: window failures are logged and reported as `false`/`None`.

use std::sync::Arc;

use log::{error, info};
use static_assertions::const_assert;

use baseplate_hal::inventory::{PowerCycle, Watchdog, WatchdogStatus};

use crate::ScdState;

/// Watchdog register layout: bit 31 enables, bits 30:29 select the expiry
/// action, the low bits hold the timeout in the register's native units.
const WD_ENABLE_BIT: u32 = 31;
const WD_ACTION_SHIFT: u32 = 29;
const WD_ACTION_POWERCYCLE: u32 = 2;
const WD_TIMEOUT_MASK: u32 = (1 << 16) - 1;

// the timeout field must not reach into the action bits
const_assert!(WD_TIMEOUT_MASK < (1 << WD_ACTION_SHIFT));

/// Power-cycle trigger: one magic word at a fixed offset. No readback
/// confirms the action; success is the write not failing.
const POWER_CYCLE_REG: usize = 0x7000;
const POWER_CYCLE_MAGIC: u32 = 0xDEAD;

pub struct ScdWatchdog {
    state: Arc<ScdState>,
    reg: usize,
}

impl ScdWatchdog {
    pub fn new(state: Arc<ScdState>, reg: usize) -> Self {
        Self { state, reg }
    }

    fn arm_value(timeout: u32) -> u32 {
        if timeout == 0 {
            return 0;
        }
        (1 << WD_ENABLE_BIT)
            | (WD_ACTION_POWERCYCLE << WD_ACTION_SHIFT)
            | (timeout & WD_TIMEOUT_MASK)
    }
}

impl Watchdog for ScdWatchdog {
    fn arm(&self, timeout: u32) -> bool {
        let value = Self::arm_value(timeout);
        let window = match self.state.window() {
            Ok(window) => window,
            Err(e) => {
                error!("watchdog arm/stop error: {}", e);
                return false;
            }
        };
        info!("watchdog arm reg = {:#034b}", value);
        match window.write32(self.reg, value) {
            Ok(()) => true,
            Err(e) => {
                error!("watchdog arm/stop error: {}", e);
                false
            }
        }
    }

    fn stop(&self) -> bool {
        self.arm(0)
    }

    fn status(&self) -> Option<WatchdogStatus> {
        let window = match self.state.window() {
            Ok(window) => window,
            Err(e) => {
                error!("watchdog status error: {}", e);
                return None;
            }
        };
        match window.read32(self.reg) {
            Ok(value) => Some(WatchdogStatus {
                enabled: (value >> WD_ENABLE_BIT) != 0,
                timeout: value & WD_TIMEOUT_MASK,
            }),
            Err(e) => {
                error!("watchdog status error: {}", e);
                None
            }
        }
    }
}

pub struct ScdPowerCycle {
    state: Arc<ScdState>,
    reg: usize,
    magic: u32,
}

impl ScdPowerCycle {
    pub fn new(state: Arc<ScdState>) -> Self {
        Self {
            state,
            reg: POWER_CYCLE_REG,
            magic: POWER_CYCLE_MAGIC,
        }
    }
}

impl PowerCycle for ScdPowerCycle {
    fn power_cycle(&self) -> bool {
        info!("initiating powercycle through SCD");
        let window = match self.state.window() {
            Ok(window) => window,
            Err(e) => {
                error!("powercycle error: {}", e);
                return false;
            }
        };
        match window.write32(self.reg, self.magic) {
            Ok(()) => {
                info!("powercycle triggered by SCD");
                true
            }
            Err(e) => {
                error!("powercycle error: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseplate_hal::component::Component;
    use baseplate_hal::config::Config;
    use baseplate_hal::hwio::SimIo;
    use baseplate_hal::types::PciAddr;
    use crate::Scd;

    fn scd() -> Scd {
        Scd::new(
            Arc::new(SimIo::new()),
            PciAddr::new(0, 4, 0, 0),
            &Config::default(),
        )
    }

    #[test]
    fn test_arm_encodes_enable_action_timeout() {
        assert_eq!(ScdWatchdog::arm_value(0), 0);
        let value = ScdWatchdog::arm_value(300);
        assert_eq!(value >> 31, 1);
        assert_eq!((value >> 29) & 0b11, WD_ACTION_POWERCYCLE);
        assert_eq!(value & WD_TIMEOUT_MASK, 300);
    }

    #[test]
    fn test_arm_then_status_round_trip() {
        let mut scd = scd();
        let watchdog = scd.create_watchdog(0x0120);

        assert!(watchdog.arm(300));
        let status = watchdog.status().unwrap();
        assert!(status.enabled);
        assert_eq!(status.timeout, 300);
    }

    #[test]
    fn test_stop_disables() {
        let mut scd = scd();
        let watchdog = scd.create_watchdog(0x0120);

        assert!(watchdog.arm(300));
        assert!(watchdog.stop());
        let status = watchdog.status().unwrap();
        assert!(!status.enabled);
        assert_eq!(status.timeout, 0);
    }

    #[test]
    fn test_power_cycle_writes_magic() {
        let mut scd = scd();
        let power = scd.create_power_cycle();
        assert!(power.power_cycle());

        let window = scd.state().window().unwrap();
        assert_eq!(window.read32(POWER_CYCLE_REG).unwrap(), POWER_CYCLE_MAGIC);
    }

    #[test]
    fn test_controls_survive_component_lifecycle() {
        let mut scd = scd();
        let watchdog = scd.create_watchdog(0x0120);
        scd.setup().unwrap();
        assert!(watchdog.arm(60));
    }
}
