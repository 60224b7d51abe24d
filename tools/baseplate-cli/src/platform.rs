//! Reference platform wiring.
//!
//! Pure data: which components exist at which address on the `ridgeline`
//! board. The lifecycle framework neither knows nor cares how this tree was
//! put together.

use std::sync::Arc;

use baseplate_hal::asic::SwitchChip;
use baseplate_hal::component::{Component, FixedSystem, I2cComponent, Priority};
use baseplate_hal::config::Config;
use baseplate_hal::drivers::accessors::{FanImpl, LedImpl, PhyImpl, PsuImpl, TempImpl};
use baseplate_hal::drivers::{I2cKernelDriver, KernelDriver, SysfsDriver};
use baseplate_hal::hwio::HwIo;
use baseplate_hal::inventory::{InterruptLine, Reset};
use baseplate_hal::types::PciAddr;
use baseplate_hal::Result;
use baseplate_scd::{GpioFlags, MdioSpeed, ResetDesc, Scd};

pub const PLATFORM_NAME: &str = "ridgeline";

const SCD_PCI: (u16, u8, u8, u8) = (0, 4, 0, 0);
const FAN_COUNT: u32 = 4;
const MAX_PWM: u32 = 255;

/// Build the full component tree and inventory for the board.
pub fn build(io: Arc<dyn HwIo>, config: &Config) -> Result<FixedSystem> {
    let mut system = FixedSystem::new();
    system
        .base_mut()
        .add_driver(Box::new(KernelDriver::new(io.clone(), "i2c-dev")));

    let pci = PciAddr::new(SCD_PCI.0, SCD_PCI.1, SCD_PCI.2, SCD_PCI.3);
    let mut scd = Scd::new(io.clone(), pci, config);
    let scd_sysfs = pci.sysfs_path();

    scd.add_smbus_master_range(0x8000, 7, 0x100, 8);
    scd.set_cause_register(0x4c00);
    scd.set_msi_rearm_offset(0x180);

    let resets = scd.add_resets(vec![
        ResetDesc {
            addr: 0x4000,
            bit: 0,
            active_low: false,
            name: "switch_chip_reset".to_string(),
        },
        ResetDesc {
            addr: 0x4000,
            bit: 2,
            active_low: false,
            name: "security_chip_reset".to_string(),
        },
        ResetDesc {
            addr: 0x4000,
            bit: 3,
            active_low: false,
            name: "phy0_reset".to_string(),
        },
    ]);

    scd.add_leds(&[
        (0x6050, "status"),
        (0x6060, "fan_status"),
        (0x6070, "psu1"),
        (0x6080, "psu2"),
    ]);
    scd.add_gpio(0x5000, 0, "psu1_present", GpioFlags::RO | GpioFlags::ACTIVE_LOW);
    scd.add_gpio(0x5000, 1, "psu2_present", GpioFlags::RO | GpioFlags::ACTIVE_LOW);
    scd.add_fan_group(0x9000, 3, FAN_COUNT);

    let interrupts = scd.create_interrupt(0x3000, 0, 0xffff_ffff);

    // front panel: 4 QSFP cages and 2 SFP cages
    let mut xcvrs = Vec::new();
    for i in 0..4u32 {
        let line = interrupts
            .interrupt(i)
            .map(|l| l as Arc<dyn InterruptLine>);
        xcvrs.push(scd.add_qsfp(0xa010 + 0x10 * i, i + 1, (8 + i) as u16, line));
    }
    for i in 0..2u32 {
        xcvrs.push(scd.add_sfp(0xa050 + 0x10 * i, 49 + i, (16 + i) as u16, None));
    }

    let watchdog = scd.create_watchdog(0x0120);
    let power_cycle = scd.create_power_cycle();

    // PHY behind the controller's MDIO fabric
    scd.add_mdio_master(0x9400, 0, 2, MdioSpeed::S2_5);
    let _mdio = scd.add_mdio(0, 0)?;
    let phy_reset = resets
        .iter()
        .find(|r| r.name() == "phy0_reset")
        .cloned()
        .map(|r| r as Arc<dyn Reset>);

    // board temperature sensor on the first controller bus
    let temp_addr = scd.i2c_addr(0, 0x48);
    let mut sensor = I2cComponent::new(temp_addr.clone(), Priority::Default);
    sensor.base_mut().add_driver(Box::new(I2cKernelDriver::new(
        io.clone(),
        temp_addr.clone(),
        "lm75",
    )));
    scd.base_mut().add_component(Box::new(sensor));

    // populate the inventory before the tree is consumed
    let scd_sysfs_driver = SysfsDriver::new(io.clone(), scd_sysfs.clone());
    let inventory = &mut system.inventory;

    for reset in &resets {
        inventory.add_reset(reset.clone());
    }
    inventory.add_ports(vec![49, 50], vec![1, 2, 3, 4], vec![]);
    for xcvr in xcvrs {
        inventory.add_xcvr(xcvr);
    }
    for psu in 1..=2 {
        inventory.add_psu(Arc::new(PsuImpl::new(psu, scd_sysfs_driver.clone(), true)));
    }
    for fan in 1..=FAN_COUNT {
        inventory.add_fan(Arc::new(FanImpl::new(fan, io.clone(), &scd_sysfs, MAX_PWM)));
    }
    for led in ["status", "fan_status", "psu1", "psu2"] {
        inventory.add_led(Arc::new(LedImpl::new(
            led,
            SysfsDriver::new(io.clone(), "/sys/class/leds"),
            led == "status",
        )));
    }
    inventory.add_temp(Arc::new(TempImpl::new(
        "board sensor",
        0,
        io.clone(),
        temp_addr,
    )));
    inventory.add_watchdog(watchdog);
    inventory.add_power_cycle(power_cycle);
    inventory.add_phy(Arc::new(PhyImpl::new(0, phy_reset)));

    system.base_mut().add_component(Box::new(scd));

    // the switch ASIC enumerates only after its reset is released; waiting
    // for the platform means waiting for this device to show up on PCI
    system
        .base_mut()
        .add_component(Box::new(SwitchChip::new(io, PciAddr::new(0, 1, 0, 0))));

    Ok(system)
}
