//! The controller's kernel driver: loads `scd-hwmon` and feeds it the
//! accumulated descriptor set through the sysfs configuration protocol.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use baseplate_hal::cause::ReloadCauseEntry;
use baseplate_hal::component::Driver;
use baseplate_hal::drivers::i2c::i2c_bus_from_name;
use baseplate_hal::drivers::KernelDriver;
use baseplate_hal::wait::{write_config, FileWaiter};
use baseplate_hal::{HalError, Result};

use crate::cause;
use crate::interrupt::ScdInterruptRegister;
use crate::ScdState;

const SCD_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The kernel rejects configuration writes larger than one page.
const PAGE_SIZE: usize = 4096;

/// Bus number the simulated kernel driver pretends to start at, when no
/// simulated adapters are primed.
const SIM_I2C_OFFSET: u16 = 2;

pub struct ScdKernelDriver {
    state: Arc<ScdState>,
    kmod: KernelDriver,
}

impl ScdKernelDriver {
    pub fn new(state: Arc<ScdState>) -> Self {
        let kmod = KernelDriver::new(state.io().clone(), "scd-hwmon");
        Self { state, kmod }
    }

    /// Write records to a configuration file in batches that stay within one
    /// page per write.
    fn write_records(&self, records: &[String], filename: &str) -> Result<()> {
        let path = self.state.sysfs_path().join(filename);
        let mut batch: Vec<&str> = Vec::new();
        let mut batch_size = 0;
        for record in records {
            let record_size = record.len() + 1;
            if batch_size + record_size > PAGE_SIZE {
                self.state.io().write_file(&path, &batch.join("\n"))?;
                batch.clear();
                batch_size = 0;
            }
            batch.push(record);
            batch_size += record_size;
        }
        if !batch.is_empty() {
            self.state.io().write_file(&path, &batch.join("\n"))?;
        }
        Ok(())
    }

    /// The configuration interface is usable once the kernel driver has
    /// created its `smbus_tweaks` attribute.
    fn wait_ready(&self) -> Result<()> {
        let path = self.state.sysfs_path().join("smbus_tweaks");
        if !FileWaiter::path(&path, SCD_WAIT_TIMEOUT).wait_ready(self.state.io().as_ref()) {
            return Err(HalError::Timeout(format!("scd ready ({})", path.display())));
        }
        Ok(())
    }

    fn object_records(&self) -> Vec<String> {
        let desc = self.state.descriptors();
        let mut records = Vec::new();
        for m in &desc.masters {
            records.push(format!("master {:#x} {} {}", m.addr, m.id, m.bus_count));
        }
        for fg in &desc.fan_groups {
            records.push(format!("fan_group {:#x} {} {}", fg.addr, fg.platform, fg.count));
        }
        for led in &desc.leds {
            records.push(format!("led {:#x} {}", led.addr, led.name));
        }
        for (addr, id) in &desc.osfps {
            records.push(format!("osfp {:#x} {}", addr, id));
        }
        for (addr, id) in &desc.qsfps {
            records.push(format!("qsfp {:#x} {}", addr, id));
        }
        for (addr, id) in &desc.sfps {
            records.push(format!("sfp {:#x} {}", addr, id));
        }
        for reset in &desc.resets {
            records.push(format!("reset {:#x} {} {}", reset.addr, reset.name, reset.bit));
        }
        for gpio in &desc.gpios {
            records.push(format!(
                "gpio {:#x} {} {} {} {}",
                gpio.addr,
                gpio.name,
                gpio.bit,
                gpio.flags.contains(crate::GpioFlags::RO) as u8,
                gpio.flags.contains(crate::GpioFlags::ACTIVE_LOW) as u8
            ));
        }
        records
    }

    fn tweak_records(&self) -> Vec<String> {
        self.state
            .descriptors()
            .tweaks
            .iter()
            .map(|t| {
                format!(
                    "{:#x} {:#x} {:#x} {:#x} {:#x} {:#x}",
                    t.addr.bus(),
                    t.addr.address(),
                    t.t,
                    t.datr,
                    t.datw,
                    t.ed
                )
            })
            .collect()
    }

    fn master_bus_name(&self) -> String {
        format!("SCD {} SMBus master 0 bus 0", self.state.pci())
    }

    /// Resolve where the kernel put this controller's first virtual bus.
    fn resolve_offset(&self) -> Result<()> {
        match i2c_bus_from_name(self.state.io().as_ref(), &self.master_bus_name(), 0) {
            Some(bus) => {
                self.state.set_i2c_offset(bus);
                Ok(())
            }
            None if self.state.io().is_sim() => {
                self.state.set_i2c_offset(SIM_I2C_OFFSET);
                Ok(())
            }
            None => Err(HalError::Missing(format!(
                "i2c adapter `{}`",
                self.master_bus_name()
            ))),
        }
    }

    fn set_resets(&self, value: bool) -> Result<()> {
        let names = self.state.sysfs_reset_names();
        debug!("resetting devices {:?} -> {}", names, value);
        for name in names {
            self.state
                .io()
                .write_file(&self.state.sysfs_path().join(name), if value { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl Driver for ScdKernelDriver {
    fn name(&self) -> String {
        "scd-hwmon".to_string()
    }

    fn setup(&mut self) -> Result<()> {
        self.kmod.setup()?;

        let records = self.object_records();
        self.wait_ready()?;

        debug!("creating scd objects");
        self.write_records(&records, "new_object")?;

        let (msi_rearm, interrupts) = {
            let desc = self.state.descriptors();
            (desc.msi_rearm_offset, desc.interrupts.clone())
        };
        if let Some(offset) = msi_rearm {
            write_config(
                self.state.io().as_ref(),
                self.state.sysfs_path(),
                &[("msi_rearm_offset", offset.to_string())],
            )?;
        }
        for desc in interrupts {
            ScdInterruptRegister::new(self.state.clone(), desc).setup()?;
        }

        // sync with kernel runtime state before anything dereferences a bus
        self.resolve_offset()?;

        let tweaks = self.tweak_records();
        if !tweaks.is_empty() {
            debug!("applying scd tweaks");
            self.write_records(&tweaks, "smbus_tweaks")?;
        }
        Ok(())
    }

    /// Point of no return: the kernel driver treats the topology as fixed
    /// once the trigger is written.
    fn finish(&mut self) -> Result<()> {
        if self.state.lock_conf() {
            debug!("applying scd configuration");
            write_config(
                self.state.io().as_ref(),
                self.state.sysfs_path(),
                &[("init_trigger", "1".to_string())],
            )?;
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.resolve_offset()
    }

    fn clean(&mut self) -> Result<()> {
        self.kmod.clean()
    }

    fn reset_in(&mut self) -> Result<()> {
        self.set_resets(true)
    }

    fn reset_out(&mut self) -> Result<()> {
        self.set_resets(false)
    }

    fn reload_causes(&mut self, clear: bool) -> Vec<ReloadCauseEntry> {
        cause::read_causes(&self.state, clear)
    }

    fn describe(&self) -> String {
        format!("ScdKernelDriver(addr={})", self.state.pci())
    }
}
