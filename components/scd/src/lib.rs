//! System Control Device.
//!
//! # Purpose
//! One PCI-attached FPGA/CPLD fans out into dozens of virtual SMBus and MDIO
//! masters, GPIOs, resets, LEDs, transceiver slots, a watchdog, power-cycle
//! control and interrupt registers. Everything is reached through two
//! channels: a sysfs configuration protocol consumed by the kernel driver,
//! and one memory-mapped register window.
//!
//! # Configuration protocol
//! Descriptors accumulate in memory while the platform is constructed; no
//! I/O happens until `setup()`, which serializes them as text records into
//! the kernel driver's `new_object` file (page-sized chunks), applies SMBus
//! timing tweaks, and finally locks the topology with `init_trigger`.
//!
//! # Bus addressing
//! The kernel assigns the controller's first virtual bus number only at
//! driver setup. Addresses handed out before that carry a shared offset cell
//! resolved by `refresh()`; dereferencing an address before setup/refresh
//! yields the unshifted bus number.

mod cause;
mod driver;
mod interrupt;
mod watchdog;
mod window;

pub use driver::ScdKernelDriver;
pub use interrupt::{ScdInterrupt, ScdInterruptRegister};
pub use watchdog::{ScdPowerCycle, ScdWatchdog};
pub use window::{MmapWindow, RegisterWindow, SimWindow, WindowIo};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;
use log::{debug, error};

use baseplate_hal::component::{Component, ComponentBase, I2cComponent, Priority};
use baseplate_hal::config::Config;
use baseplate_hal::drivers::accessors::{ResetImpl, XcvrImpl};
use baseplate_hal::drivers::{I2cKernelDriver, KernelDriver, SysfsDriver};
use baseplate_hal::hwio::HwIo;
use baseplate_hal::inventory::{InterruptLine, Reset, Xcvr, XcvrType};
use baseplate_hal::types::{I2cAddr, PciAddr};
use baseplate_hal::wait::FileWaiter;
use baseplate_hal::{HalError, Result};

const SYS_UIO_PATH: &str = "/sys/class/uio";
const MMAP_WAIT: Duration = Duration::from_secs(5);

/// Default SMBus timing tweak values, in controller ticks.
const TWEAK_T: u32 = 1;
const TWEAK_DATR: u32 = 1;
const TWEAK_DATW: u32 = 3;
const TWEAK_ED: u32 = 0;

bitflags! {
    /// GPIO attributes as declared to the kernel driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GpioFlags: u8 {
        const RO = 1 << 0;
        const ACTIVE_LOW = 1 << 1;
    }
}

/// MDIO bus speeds supported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdioSpeed {
    S20,
    S2_5,
    S5,
    S10,
}

#[derive(Debug, Clone, Copy)]
pub struct SmbusMasterDesc {
    pub addr: u32,
    pub id: u32,
    pub bus_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MdioMasterDesc {
    pub addr: u32,
    pub id: u32,
    pub bus_count: u32,
    pub speed: MdioSpeed,
}

/// A handle on one MDIO bus of one master, for wiring PHYs.
#[derive(Debug, Clone, Copy)]
pub struct Mdio {
    pub master: u32,
    pub bus: u32,
}

#[derive(Debug, Clone)]
pub struct BusTweak {
    pub addr: I2cAddr,
    pub t: u32,
    pub datr: u32,
    pub datw: u32,
    pub ed: u32,
}

#[derive(Debug, Clone)]
pub struct FanGroupDesc {
    pub addr: u32,
    pub platform: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct LedDesc {
    pub addr: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GpioDesc {
    pub addr: u32,
    pub bit: u8,
    pub name: String,
    pub flags: GpioFlags,
}

#[derive(Debug, Clone)]
pub struct ResetDesc {
    pub addr: u32,
    pub bit: u8,
    pub active_low: bool,
    pub name: String,
}

/// Offsets of one interrupt register block: set = base, clear = base + 0x10,
/// status = base + 0x20, one word each.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InterruptRegDesc {
    pub num: u32,
    pub read_addr: usize,
    pub set_addr: usize,
    pub clear_addr: usize,
    pub status_addr: usize,
    pub mask: u32,
}

impl InterruptRegDesc {
    pub(crate) fn new(addr: usize, num: u32, mask: u32) -> Self {
        Self {
            num,
            read_addr: addr,
            set_addr: addr,
            clear_addr: addr + 0x10,
            status_addr: addr + 0x20,
            mask,
        }
    }
}

/// A board-level reset line exposed by the kernel driver as a file named
/// after the line, under the controller's sysfs directory.
pub struct ScdReset {
    io: Arc<dyn HwIo>,
    name: String,
    path: PathBuf,
}

impl ScdReset {
    fn new(io: Arc<dyn HwIo>, sysfs: &Path, desc: &ResetDesc) -> Self {
        Self {
            io,
            name: desc.name.clone(),
            path: sysfs.join(&desc.name),
        }
    }

    fn do_reset(&self, value: bool) -> bool {
        debug!("resetting device {} -> {}", self.name, value);
        match self.io.write_file(&self.path, if value { "1" } else { "0" }) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

impl Reset for ScdReset {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self) -> Option<String> {
        self.io
            .read_file(&self.path)
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    fn reset_in(&self) -> bool {
        self.do_reset(true)
    }

    fn reset_out(&self) -> bool {
        self.do_reset(false)
    }
}

#[derive(Default)]
pub(crate) struct ScdDescriptors {
    pub masters: Vec<SmbusMasterDesc>,
    pub mdio_masters: Vec<MdioMasterDesc>,
    pub tweaks: Vec<BusTweak>,
    pub fan_groups: Vec<FanGroupDesc>,
    pub leds: Vec<LedDesc>,
    pub gpios: Vec<GpioDesc>,
    pub resets: Vec<ResetDesc>,
    pub osfps: Vec<(u32, u32)>,
    pub qsfps: Vec<(u32, u32)>,
    pub sfps: Vec<(u32, u32)>,
    pub interrupts: Vec<InterruptRegDesc>,
    pub msi_rearm_offset: Option<u32>,
    pub cause_reg: Option<u32>,
    pub xcvr_handles: Vec<Arc<dyn Xcvr>>,
}

/// State shared between the component, its kernel driver, and the accessor
/// objects handed out to the inventory.
pub struct ScdState {
    io: Arc<dyn HwIo>,
    pci: PciAddr,
    sysfs: PathBuf,
    init_irq: bool,
    lock_conf: bool,
    i2c_offset: Arc<AtomicU16>,
    desc: Mutex<ScdDescriptors>,
    window: Mutex<Option<Arc<dyn RegisterWindow>>>,
    uio_map: Mutex<HashMap<String, String>>,
}

impl ScdState {
    pub fn io(&self) -> &Arc<dyn HwIo> {
        &self.io
    }

    pub fn pci(&self) -> PciAddr {
        self.pci
    }

    pub fn sysfs_path(&self) -> &Path {
        &self.sysfs
    }

    pub(crate) fn init_irq(&self) -> bool {
        self.init_irq
    }

    pub(crate) fn lock_conf(&self) -> bool {
        self.lock_conf
    }

    pub(crate) fn descriptors(&self) -> std::sync::MutexGuard<'_, ScdDescriptors> {
        self.desc.lock().unwrap()
    }

    /// The first kernel bus number of this controller, 0 until `refresh()`
    /// has resolved it.
    pub fn i2c_offset(&self) -> u16 {
        self.i2c_offset.load(Ordering::Relaxed)
    }

    pub(crate) fn set_i2c_offset(&self, offset: u16) {
        self.i2c_offset.store(offset, Ordering::Relaxed);
    }

    /// An address on one of this controller's buses. The effective kernel
    /// bus number is `i2c_offset + bus`, resolved lazily.
    pub fn i2c_addr(&self, bus: u16, address: u8) -> I2cAddr {
        I2cAddr::shifted(self.i2c_offset.clone(), bus, address)
    }

    /// The cached register window, mapping it on first use. Waits (bounded)
    /// for the resource file when the kernel driver has not finished binding.
    pub fn window(&self) -> Result<Arc<dyn RegisterWindow>> {
        let mut cached = self.window.lock().unwrap();
        if let Some(window) = cached.as_ref() {
            return Ok(window.clone());
        }
        let window: Arc<dyn RegisterWindow> = if self.io.is_sim() {
            Arc::new(SimWindow::new())
        } else {
            let path = self.sysfs.join("resource0");
            if !self.io.path_exists(&path)
                && !FileWaiter::path(&path, MMAP_WAIT).wait_ready(self.io.as_ref())
            {
                return Err(HalError::Missing(format!("pci resource {}", path.display())));
            }
            Arc::new(MmapWindow::map(&path)?)
        };
        *cached = Some(window.clone());
        Ok(window)
    }

    pub(crate) fn sysfs_reset_names(&self) -> Vec<String> {
        let desc = self.descriptors();
        let mut names: Vec<String> = desc.resets.iter().map(|r| r.name.clone()).collect();
        names.extend(desc.qsfps.iter().map(|(_, id)| format!("qsfp{}_reset", id)));
        names.extend(desc.osfps.iter().map(|(_, id)| format!("osfp{}_reset", id)));
        names
    }

    /// Resolve the UIO device node for one interrupt bit by matching the
    /// kernel's enumerated UIO names. The map is built lazily and cached.
    pub fn uio_device(&self, reg: u32, bit: u32) -> Result<String> {
        let mut map = self.uio_map.lock().unwrap();
        if map.is_empty() {
            let root = Path::new(SYS_UIO_PATH);
            for uio in self.io.list_dir(root)? {
                let name = self.io.read_file(&root.join(&uio).join("name"))?;
                map.insert(name.trim().to_string(), uio);
            }
        }
        let key = format!("uio-{}-{}-{}", self.pci, reg, bit);
        map.get(&key)
            .map(|uio| format!("/dev/{}", uio))
            .ok_or_else(|| HalError::Missing(format!("uio device {}", key)))
    }
}

/// The System Control Device component. Populated with descriptors during
/// platform construction (no I/O), configured into the kernel driver by its
/// [`ScdKernelDriver`] at setup time.
pub struct Scd {
    base: ComponentBase,
    state: Arc<ScdState>,
}

impl Scd {
    pub fn new(io: Arc<dyn HwIo>, pci: PciAddr, config: &Config) -> Self {
        let sysfs = pci.sysfs_path();
        let state = Arc::new(ScdState {
            io: io.clone(),
            pci,
            sysfs: sysfs.clone(),
            init_irq: config.init_irq,
            lock_conf: config.lock_scd_conf,
            i2c_offset: Arc::new(AtomicU16::new(0)),
            desc: Mutex::new(ScdDescriptors::default()),
            window: Mutex::new(None),
            uio_map: Mutex::new(HashMap::new()),
        });

        let mut base = ComponentBase::new(Priority::Default);
        base.add_driver_as("scd", Box::new(KernelDriver::new(io.clone(), "scd")));
        base.add_driver_as("scd-hwmon", Box::new(ScdKernelDriver::new(state.clone())));
        base.add_driver_as("sysfs", Box::new(SysfsDriver::new(io, sysfs)));

        Self { base, state }
    }

    pub fn state(&self) -> &Arc<ScdState> {
        &self.state
    }

    pub fn i2c_addr(&self, bus: u16, address: u8) -> I2cAddr {
        self.state.i2c_addr(bus, address)
    }

    fn sysfs_driver(&self) -> SysfsDriver {
        SysfsDriver::new(self.state.io.clone(), self.state.sysfs.clone())
    }

    pub fn add_smbus_master(&mut self, addr: u32, id: u32, bus_count: u32) {
        self.state.descriptors().masters.push(SmbusMasterDesc {
            addr,
            id,
            bus_count,
        });
    }

    /// A contiguous run of SMBus masters at a fixed register spacing.
    pub fn add_smbus_master_range(&mut self, addr: u32, count: u32, spacing: u32, bus_count: u32) {
        for id in 0..=count {
            self.add_smbus_master(addr + id * spacing, id, bus_count);
        }
    }

    pub fn add_mdio_master(&mut self, addr: u32, id: u32, bus_count: u32, speed: MdioSpeed) {
        self.state.descriptors().mdio_masters.push(MdioMasterDesc {
            addr,
            id,
            bus_count,
            speed,
        });
    }

    /// A bus of a declared MDIO master. Referencing a bus beyond the
    /// master's declared count is a configuration error.
    pub fn add_mdio(&mut self, master: u32, bus: u32) -> Result<Mdio> {
        let desc = self.state.descriptors();
        let found = desc
            .mdio_masters
            .iter()
            .find(|m| m.id == master)
            .ok_or_else(|| HalError::Config(format!("mdio master {} not declared", master)))?;
        if bus >= found.bus_count {
            return Err(HalError::Config(format!(
                "mdio bus {} out of range for master {} ({} buses)",
                bus, master, found.bus_count
            )));
        }
        Ok(Mdio { master, bus })
    }

    /// SMBus timing override for one device address, applied after the
    /// object set.
    pub fn add_bus_tweak(&mut self, addr: I2cAddr) {
        self.state.descriptors().tweaks.push(BusTweak {
            addr,
            t: TWEAK_T,
            datr: TWEAK_DATR,
            datw: TWEAK_DATW,
            ed: TWEAK_ED,
        });
    }

    pub fn add_fan_group(&mut self, addr: u32, platform: u32, count: u32) {
        self.state.descriptors().fan_groups.push(FanGroupDesc {
            addr,
            platform,
            count,
        });
    }

    pub fn add_led(&mut self, addr: u32, name: impl Into<String>) {
        self.state.descriptors().leds.push(LedDesc {
            addr,
            name: name.into(),
        });
    }

    pub fn add_leds(&mut self, leds: &[(u32, &str)]) {
        for (addr, name) in leds {
            self.add_led(*addr, *name);
        }
    }

    pub fn add_gpio(&mut self, addr: u32, bit: u8, name: impl Into<String>, flags: GpioFlags) {
        self.state.descriptors().gpios.push(GpioDesc {
            addr,
            bit,
            name: name.into(),
            flags,
        });
    }

    pub fn add_reset(&mut self, desc: ResetDesc) -> Arc<ScdReset> {
        let reset = Arc::new(ScdReset::new(
            self.state.io.clone(),
            &self.state.sysfs,
            &desc,
        ));
        self.state.descriptors().resets.push(desc);
        reset
    }

    pub fn add_resets(&mut self, descs: Vec<ResetDesc>) -> Vec<Arc<ScdReset>> {
        descs.into_iter().map(|desc| self.add_reset(desc)).collect()
    }

    pub fn set_msi_rearm_offset(&mut self, offset: u32) {
        self.state.descriptors().msi_rearm_offset = Some(offset);
    }

    /// Declare the reload-cause register, decoded by `reload_causes`.
    pub fn set_cause_register(&mut self, addr: u32) {
        self.state.descriptors().cause_reg = Some(addr);
    }

    pub fn create_watchdog(&mut self, reg: usize) -> Arc<ScdWatchdog> {
        Arc::new(ScdWatchdog::new(self.state.clone(), reg))
    }

    pub fn create_power_cycle(&mut self) -> Arc<ScdPowerCycle> {
        Arc::new(ScdPowerCycle::new(self.state.clone()))
    }

    pub fn create_interrupt(&mut self, addr: usize, num: u32, mask: u32) -> Arc<ScdInterruptRegister> {
        let desc = InterruptRegDesc::new(addr, num, mask);
        self.state.descriptors().interrupts.push(desc);
        Arc::new(ScdInterruptRegister::new(self.state.clone(), desc))
    }

    fn add_xcvr(
        &mut self,
        id: u32,
        ty: XcvrType,
        bus: u16,
        interrupt: Option<Arc<dyn InterruptLine>>,
    ) -> Arc<dyn Xcvr> {
        let addr = self.i2c_addr(bus, XcvrType::EEPROM_ADDR);
        // SFP modules have no reset pin
        let reset: Option<Arc<dyn Reset>> = match ty {
            XcvrType::Sfp => None,
            _ => Some(Arc::new(ResetImpl::new(
                format!("{}{}", ty.type_str(), id),
                self.sysfs_driver(),
            ))),
        };
        let xcvr: Arc<dyn Xcvr> = Arc::new(XcvrImpl::new(
            id,
            ty,
            addr.clone(),
            self.sysfs_driver(),
            reset,
            interrupt,
        ));

        let mut eeprom = I2cComponent::new(addr.clone(), Priority::Default);
        eeprom
            .base_mut()
            .add_driver(Box::new(I2cKernelDriver::new(
                self.state.io.clone(),
                addr.clone(),
                "sff8436",
            )));
        self.base.add_component(Box::new(eeprom));
        self.add_bus_tweak(addr);
        self.state.descriptors().xcvr_handles.push(xcvr.clone());
        xcvr
    }

    pub fn add_osfp(
        &mut self,
        addr: u32,
        id: u32,
        bus: u16,
        interrupt: Option<Arc<dyn InterruptLine>>,
    ) -> Arc<dyn Xcvr> {
        self.state.descriptors().osfps.push((addr, id));
        self.add_xcvr(id, XcvrType::Osfp, bus, interrupt)
    }

    pub fn add_qsfp(
        &mut self,
        addr: u32,
        id: u32,
        bus: u16,
        interrupt: Option<Arc<dyn InterruptLine>>,
    ) -> Arc<dyn Xcvr> {
        self.state.descriptors().qsfps.push((addr, id));
        self.add_xcvr(id, XcvrType::Qsfp, bus, interrupt)
    }

    pub fn add_sfp(
        &mut self,
        addr: u32,
        id: u32,
        bus: u16,
        interrupt: Option<Arc<dyn InterruptLine>>,
    ) -> Arc<dyn Xcvr> {
        self.state.descriptors().sfps.push((addr, id));
        self.add_xcvr(id, XcvrType::Sfp, bus, interrupt)
    }

    /// Every reset file the kernel driver exposes: board resets by their
    /// declared names, transceiver resets as `<type><id>_reset`.
    pub fn sysfs_reset_names(&self) -> Vec<String> {
        self.state.sysfs_reset_names()
    }
}

impl Component for Scd {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn label(&self) -> String {
        format!("Scd(addr={})", self.state.pci)
    }

    fn reset_out(&mut self) -> Result<()> {
        self.base.reset_out_drivers()?;
        self.base.reset_out_children()?;
        // deassert module lines so freshly unreset transceivers respond
        let handles: Vec<Arc<dyn Xcvr>> = self.state.descriptors().xcvr_handles.clone();
        for xcvr in handles {
            xcvr.set_module_select(true);
            xcvr.set_tx_disable(false);
        }
        Ok(())
    }
}
