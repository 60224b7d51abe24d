//! End-to-end simulated bring-up of a platform built around one SCD.
//!
//! Drives the same code paths as real hardware bring-up (kernel module
//! loading, descriptor serialization, bus-number resolution, two-pass
//! priority traversal) against the journaling simulation backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use baseplate_hal::bringup::spawn_background;
use baseplate_hal::component::{Component, FixedSystem, Priority};
use baseplate_hal::config::Config;
use baseplate_hal::drivers::KernelDriver;
use baseplate_hal::hwio::{HwIo, SimIo};
use baseplate_hal::inventory::Inventory;
use baseplate_hal::types::PciAddr;
use baseplate_scd::{ResetDesc, Scd};

const SYSFS: &str = "/sys/bus/pci/devices/0000:04:00.0";

fn build_platform(io: &Arc<SimIo>) -> FixedSystem {
    let io: Arc<dyn HwIo> = io.clone();
    let mut system = FixedSystem::new();
    system
        .base_mut()
        .add_driver(Box::new(KernelDriver::new(io.clone(), "i2c-dev")));

    let mut scd = Scd::new(io, PciAddr::new(0, 4, 0, 0), &Config::default());
    scd.add_smbus_master_range(0x8000, 7, 0x100, 8);
    let resets = scd.add_resets(vec![
        ResetDesc {
            addr: 0x4000,
            bit: 0,
            active_low: false,
            name: "switch_chip_reset".to_string(),
        },
        ResetDesc {
            addr: 0x4000,
            bit: 1,
            active_low: false,
            name: "switch_chip_pcie_reset".to_string(),
        },
    ]);
    scd.add_led(0x6050, "status");
    scd.add_fan_group(0x9000, 3, 4);
    let sfp = scd.add_sfp(0xa010, 33, 16, None);
    let qsfp = scd.add_qsfp(0xa050, 5, 24, None);
    let watchdog = scd.create_watchdog(0x0120);
    let power = scd.create_power_cycle();

    let inventory: &mut Inventory = &mut system.inventory;
    for reset in resets {
        inventory.add_reset(reset);
    }
    inventory.add_xcvr(sfp);
    inventory.add_xcvr(qsfp);
    inventory.add_watchdog(watchdog);
    inventory.add_power_cycle(power);
    inventory.add_ports(vec![33], vec![5], vec![]);

    system.base_mut().add_component(Box::new(scd));
    system
}

fn new_object_lines(io: &SimIo) -> Vec<String> {
    io.writes_to(Path::new(&format!("{}/new_object", SYSFS)))
        .iter()
        .flat_map(|chunk| chunk.lines().map(str::to_string).collect::<Vec<_>>())
        .collect()
}

#[test]
fn test_full_platform_bringup() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);

    system.setup_priority(Priority::Default).unwrap();

    // kernel modules went in first
    let commands = io.commands();
    assert!(commands.contains(&"modprobe i2c_dev".to_string()));
    assert!(commands.contains(&"modprobe scd".to_string()));
    assert!(commands.contains(&"modprobe scd_hwmon".to_string()));

    // descriptor serialization reached the kernel configuration interface
    let lines = new_object_lines(&io);
    assert!(lines.contains(&"reset 0x4000 switch_chip_reset 1".to_string()));
    assert!(lines.contains(&"sfp 0xa010 33".to_string()));
    assert!(lines.contains(&"qsfp 0xa050 5".to_string()));
    assert!(lines.contains(&"master 0x8000 0 8".to_string()));
    assert!(lines.contains(&"led 0x6050 status".to_string()));
    assert!(lines.contains(&"fan_group 0x9000 3 4".to_string()));

    // configuration locked after the object set
    assert_eq!(
        io.writes_to(Path::new(&format!("{}/init_trigger", SYSFS))),
        vec!["1".to_string()]
    );

    // transceiver EEPROM devices instantiated on the resolved buses
    let new_devices: Vec<String> = io
        .writes()
        .into_iter()
        .filter(|(path, _)| path.ends_with("new_device"))
        .map(|(_, contents)| contents)
        .collect();
    assert!(new_devices.contains(&"sff8436 0x50".to_string()));
}

#[test]
fn test_inventory_answers_after_bringup() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);
    system.setup_priority(Priority::Default).unwrap();

    let inventory = system.inventory();
    assert_eq!(inventory.xcvrs().len(), 2);
    assert_eq!(inventory.port_range(), Some((5, 33)));
    assert!(inventory.reset("switch_chip_reset").is_some());
    // the qsfp brought its own reset line along
    assert!(inventory.reset("qsfp5").is_some());
    assert!(inventory.xcvr(33).unwrap().reset().is_none());

    let watchdog = &inventory.watchdogs()[0];
    assert!(watchdog.arm(300));
    let status = watchdog.status().unwrap();
    assert!(status.enabled);
    assert_eq!(status.timeout, 300);

    assert!(inventory.power_cycles()[0].power_cycle());
}

#[test]
fn test_reset_sequence_round_trip() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);
    system.setup_priority(Priority::Default).unwrap();

    system.reset_in().unwrap();
    system.reset_out().unwrap();

    let chip_reset = io.writes_to(Path::new(&format!("{}/switch_chip_reset", SYSFS)));
    assert_eq!(chip_reset, vec!["1".to_string(), "0".to_string()]);

    // coming out of reset also reselects the modules
    let modsel = io.writes_to(Path::new(&format!("{}/qsfp5_modsel", SYSFS)));
    assert_eq!(modsel.last(), Some(&"1".to_string()));
}

#[test]
fn test_background_pass_runs_after_critical() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);
    system.setup_priority(Priority::Default).unwrap();

    let task = spawn_background(move || system.setup_priority(Priority::Background));
    task.join(Duration::from_secs(10)).unwrap();
}

#[test]
fn test_clean_unwinds_the_tree() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);
    system.setup_priority(Priority::Default).unwrap();

    // the kernel would have created the device nodes on the resolved buses
    io.prime_read("/sys/bus/i2c/devices/18-0050", "");
    io.prime_read("/sys/bus/i2c/devices/26-0050", "");

    system.clean().unwrap();

    // sim /proc/modules lists nothing, so no rmmod is attempted; the eeprom
    // devices are deleted through their adapters
    assert!(!io.commands().iter().any(|c| c.starts_with("modprobe -r")));
    let deletes: Vec<String> = io
        .writes()
        .into_iter()
        .filter(|(path, _)| path.ends_with("delete_device"))
        .map(|(_, contents)| contents)
        .collect();
    assert_eq!(deletes, vec!["0x50".to_string(), "0x50".to_string()]);
}

#[test]
fn test_dump_shows_the_whole_tree() {
    let io = Arc::new(SimIo::new());
    let mut system = build_platform(&io);
    system.setup_priority(Priority::Default).unwrap();

    let mut out = String::new();
    system.dump(0, &mut out);
    assert!(out.contains("FixedSystem"));
    assert!(out.contains("Scd(addr=0000:04:00.0)"));
    assert!(out.contains("I2cComponent"));
}
