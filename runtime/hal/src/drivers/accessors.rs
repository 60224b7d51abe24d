//! Inventory accessor objects backed by sysfs attributes.
//!
//! These are the objects components hand to the [`crate::inventory`] during
//! construction. Reads and writes here are operational controls, not
//! bring-up: failures are logged and reported as `None`/`false`, never
//! propagated.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error};

use crate::drivers::sysfs::SysfsDriver;
use crate::hwio::HwIo;
use crate::inventory::{Fan, Gpio, Led, Phy, Psu, Reset, Temp, Xcvr, XcvrType};
use crate::inventory::InterruptLine;
use crate::types::I2cAddr;
use crate::wait::locate_hwmon_path;

const HWMON_WAIT: Duration = Duration::from_secs(1);

/// A reset line exposed as a `<name>_reset` attribute.
pub struct ResetImpl {
    name: String,
    driver: SysfsDriver,
}

impl ResetImpl {
    pub fn new(name: impl Into<String>, driver: SysfsDriver) -> Self {
        Self {
            name: name.into(),
            driver,
        }
    }

    fn write(&self, value: bool) -> bool {
        let attr = format!("{}_reset", self.name);
        match self.driver.write_bool(&attr, value) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write {}: {}", attr, e);
                false
            }
        }
    }
}

impl Reset for ResetImpl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self) -> Option<String> {
        self.driver.read(&format!("{}_reset", self.name)).ok()
    }

    fn reset_in(&self) -> bool {
        debug!("putting {} in reset", self.name);
        self.write(true)
    }

    fn reset_out(&self) -> bool {
        debug!("putting {} out of reset", self.name);
        self.write(false)
    }
}

/// A PSU slot with `psuN_present` and optionally `psuN_status` attributes.
pub struct PsuImpl {
    id: u32,
    driver: SysfsDriver,
    status_gpio: bool,
}

impl PsuImpl {
    pub fn new(id: u32, driver: SysfsDriver, status_gpio: bool) -> Self {
        Self {
            id,
            driver,
            status_gpio,
        }
    }
}

impl Psu for PsuImpl {
    fn name(&self) -> String {
        format!("psu{}", self.id)
    }

    fn presence(&self) -> bool {
        self.driver
            .read_bool(&format!("psu{}_present", self.id))
            .unwrap_or(false)
    }

    fn status(&self) -> bool {
        if !self.status_gpio {
            return self.presence();
        }
        self.driver
            .read_bool(&format!("psu{}_status", self.id))
            .unwrap_or(false)
    }
}

/// A transceiver slot. QSFP/OSFP carry low-power-mode and module-select
/// lines; SFP has neither but supports tx-disable.
pub struct XcvrImpl {
    id: u32,
    ty: XcvrType,
    addr: I2cAddr,
    driver: SysfsDriver,
    reset: Option<Arc<dyn Reset>>,
    interrupt: Option<Arc<dyn InterruptLine>>,
}

impl XcvrImpl {
    pub fn new(
        id: u32,
        ty: XcvrType,
        addr: I2cAddr,
        driver: SysfsDriver,
        reset: Option<Arc<dyn Reset>>,
        interrupt: Option<Arc<dyn InterruptLine>>,
    ) -> Self {
        Self {
            id,
            ty,
            addr,
            driver,
            reset,
            interrupt,
        }
    }

    fn attr(&self, suffix: &str) -> String {
        format!("{}_{}", Xcvr::name(self), suffix)
    }

    fn read_flag(&self, suffix: &str) -> bool {
        self.driver.read_bool(&self.attr(suffix)).unwrap_or(false)
    }

    fn write_flag(&self, suffix: &str, value: bool) -> bool {
        let attr = self.attr(suffix);
        match self.driver.write_bool(&attr, value) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write {}: {}", attr, e);
                false
            }
        }
    }
}

impl Xcvr for XcvrImpl {
    fn id(&self) -> u32 {
        self.id
    }

    fn xcvr_type(&self) -> XcvrType {
        self.ty
    }

    fn addr(&self) -> I2cAddr {
        self.addr.clone()
    }

    fn presence(&self) -> bool {
        self.read_flag("present")
    }

    fn low_power_mode(&self) -> bool {
        match self.ty {
            XcvrType::Sfp => false,
            _ => self.read_flag("lp_mode"),
        }
    }

    fn set_low_power_mode(&self, value: bool) -> bool {
        match self.ty {
            XcvrType::Sfp => false,
            _ => self.write_flag("lp_mode", value),
        }
    }

    fn module_select(&self) -> bool {
        match self.ty {
            XcvrType::Sfp => true,
            _ => self.read_flag("modsel"),
        }
    }

    fn set_module_select(&self, value: bool) -> bool {
        match self.ty {
            XcvrType::Sfp => true,
            _ => {
                debug!("setting modsel for {} to {}", Xcvr::name(self), value);
                self.write_flag("modsel", value)
            }
        }
    }

    fn tx_disable(&self) -> bool {
        match self.ty {
            XcvrType::Sfp => self.read_flag("txdisable"),
            _ => false,
        }
    }

    fn set_tx_disable(&self, value: bool) -> bool {
        match self.ty {
            XcvrType::Sfp => {
                debug!("setting txdisable for {} to {}", Xcvr::name(self), value);
                self.write_flag("txdisable", value)
            }
            _ => false,
        }
    }

    fn reset(&self) -> Option<Arc<dyn Reset>> {
        self.reset.clone()
    }

    fn interrupt_line(&self) -> Option<Arc<dyn InterruptLine>> {
        self.interrupt.clone()
    }
}

/// A fan behind a hwmon directory. The hwmon path materializes some time
/// after driver bind and is located lazily on first access.
pub struct FanImpl {
    id: u32,
    io: Arc<dyn HwIo>,
    device_dir: PathBuf,
    max_pwm: u32,
    hwmon: Mutex<Option<PathBuf>>,
}

impl FanImpl {
    pub fn new(id: u32, io: Arc<dyn HwIo>, device_dir: impl Into<PathBuf>, max_pwm: u32) -> Self {
        Self {
            id,
            io,
            device_dir: device_dir.into(),
            max_pwm,
            hwmon: Mutex::new(None),
        }
    }

    fn driver(&self) -> Option<SysfsDriver> {
        let mut hwmon = self.hwmon.lock().unwrap();
        if hwmon.is_none() {
            *hwmon = locate_hwmon_path(
                self.io.as_ref(),
                &self.device_dir,
                &format!("pwm{}", self.id),
                HWMON_WAIT,
            );
        }
        hwmon
            .as_ref()
            .map(|dir| SysfsDriver::new(self.io.clone(), dir))
    }
}

impl Fan for FanImpl {
    fn name(&self) -> String {
        format!("fan{}", self.id)
    }

    fn speed(&self) -> Option<u32> {
        let driver = self.driver()?;
        let pwm: u32 = driver.read(&format!("pwm{}", self.id)).ok()?.parse().ok()?;
        Some(pwm * 100 / self.max_pwm)
    }

    fn set_speed(&self, percent: u32) -> bool {
        if percent > 100 {
            error!("invalid speed setting {} for fan {}", percent, self.id);
            return false;
        }
        let Some(driver) = self.driver() else {
            return false;
        };
        debug!("setting fan {} speed to {}%", self.id, percent);
        let pwm = percent * self.max_pwm / 100;
        driver
            .write(&format!("pwm{}", self.id), &pwm.to_string())
            .is_ok()
    }

    fn direction(&self) -> Option<String> {
        self.driver()?.read(&format!("fan{}_airflow", self.id)).ok()
    }

    fn presence(&self) -> bool {
        self.driver()
            .and_then(|d| d.read_bool(&format!("fan{}_present", self.id)).ok())
            .unwrap_or(false)
    }

    fn status(&self) -> bool {
        let Some(driver) = self.driver() else {
            return false;
        };
        match driver.read_bool(&format!("fan{}_fault", self.id)) {
            Ok(fault) => !fault,
            Err(_) => self.presence(),
        }
    }
}

/// Default LED brightness-to-color vocabulary.
const LED_COLORS: &[(&str, &str)] = &[("0", "off"), ("1", "green"), ("2", "red"), ("3", "yellow")];

/// An LED exposing a `brightness` file under a per-LED directory.
pub struct LedImpl {
    name: String,
    driver: SysfsDriver,
    status_led: bool,
}

impl LedImpl {
    pub fn new(name: impl Into<String>, driver: SysfsDriver, status_led: bool) -> Self {
        Self {
            name: name.into(),
            driver,
            status_led,
        }
    }

    fn brightness_path(&self) -> PathBuf {
        self.driver.dir().join(&self.name).join("brightness")
    }
}

impl Led for LedImpl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn color(&self) -> Option<String> {
        let raw = self.driver.read_at(&self.brightness_path()).ok()?;
        LED_COLORS
            .iter()
            .find(|(code, _)| *code == raw)
            .map(|(_, color)| color.to_string())
    }

    fn set_color(&self, color: &str) -> bool {
        let value = LED_COLORS
            .iter()
            .find(|(_, name)| *name == color)
            .map(|(code, _)| *code)
            .unwrap_or(color);
        self.driver.write_at(&self.brightness_path(), value).is_ok()
    }

    fn is_status_led(&self) -> bool {
        self.status_led
    }
}

const TEMP_DEFAULT_MIN: f64 = -20.0;

/// A temperature diode behind a hwmon directory. Values are millidegrees on
/// the wire; sysfs indexes diodes from one while manufacturing data indexes
/// from zero. The device directory is derived from the I2C address at access
/// time, since controller-relative bus numbers only settle after refresh.
pub struct TempImpl {
    name: String,
    diode: u32,
    io: Arc<dyn HwIo>,
    addr: I2cAddr,
    hwmon: Mutex<Option<PathBuf>>,
}

impl TempImpl {
    pub fn new(name: impl Into<String>, diode: u32, io: Arc<dyn HwIo>, addr: I2cAddr) -> Self {
        Self {
            name: name.into(),
            diode,
            io,
            addr,
            hwmon: Mutex::new(None),
        }
    }

    fn idx(&self) -> u32 {
        self.diode + 1
    }

    fn driver(&self) -> Option<SysfsDriver> {
        let mut hwmon = self.hwmon.lock().unwrap();
        if hwmon.is_none() {
            *hwmon = locate_hwmon_path(
                self.io.as_ref(),
                &self.addr.sysfs_path(),
                &format!("temp{}", self.idx()),
                HWMON_WAIT,
            );
        }
        hwmon
            .as_ref()
            .map(|dir| SysfsDriver::new(self.io.clone(), dir))
    }

    fn read_milli(&self, attr: &str) -> Option<f64> {
        let raw = self
            .driver()?
            .read(&format!("temp{}_{}", self.idx(), attr))
            .ok()?;
        Some(raw.parse::<f64>().ok()? / 1000.0)
    }

    fn write_milli(&self, attr: &str, value: f64) -> bool {
        let Some(driver) = self.driver() else {
            return false;
        };
        driver
            .write(
                &format!("temp{}_{}", self.idx(), attr),
                &((value * 1000.0) as i64).to_string(),
            )
            .is_ok()
    }
}

impl Temp for TempImpl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn temperature(&self) -> Option<f64> {
        self.read_milli("input")
    }

    fn presence(&self) -> bool {
        // a valid reading is the only presence signal these sensors give
        self.temperature().map(|t| t > 0.0).unwrap_or(false)
    }

    fn low_threshold(&self) -> Option<f64> {
        Some(self.read_milli("min").unwrap_or(TEMP_DEFAULT_MIN))
    }

    fn set_low_threshold(&self, value: f64) -> bool {
        self.write_milli("min", value)
    }

    fn high_threshold(&self) -> Option<f64> {
        self.read_milli("max")
    }

    fn set_high_threshold(&self, value: f64) -> bool {
        self.write_milli("max", value)
    }
}

/// A PHY transceiver chip, reachable over MDIO and optionally resettable.
pub struct PhyImpl {
    id: u32,
    reset: Option<Arc<dyn Reset>>,
}

impl PhyImpl {
    pub fn new(id: u32, reset: Option<Arc<dyn Reset>>) -> Self {
        Self { id, reset }
    }
}

impl Phy for PhyImpl {
    fn id(&self) -> u32 {
        self.id
    }

    fn reset(&self) -> Option<Arc<dyn Reset>> {
        self.reset.clone()
    }
}

/// A GPIO as declared to a controller: pure description, no I/O of its own.
pub struct GpioImpl {
    name: String,
    addr: u32,
    bit: u8,
    ro: bool,
    active_low: bool,
}

impl GpioImpl {
    pub fn new(name: impl Into<String>, addr: u32, bit: u8, ro: bool, active_low: bool) -> Self {
        Self {
            name: name.into(),
            addr,
            bit,
            ro,
            active_low,
        }
    }
}

impl Gpio for GpioImpl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn addr(&self) -> u32 {
        self.addr
    }

    fn bit(&self) -> u8 {
        self.bit
    }

    fn ro(&self) -> bool {
        self.ro
    }

    fn active_low(&self) -> bool {
        self.active_low
    }
}
