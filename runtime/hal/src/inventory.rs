//! Hardware inventory: the aggregation point decoupling "what exists" from
//! "how it was wired".
//!
//! Components register accessor objects as the platform is constructed;
//! external consumers (CLI, daemon) query them later through the matching
//! getters. Reset and transceiver collections are keyed by name and port
//! number, last write wins; everything else is an append-only list.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::types::I2cAddr;

/// Watchdog state as decoded from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogStatus {
    pub enabled: bool,
    pub timeout: u32,
}

/// Transceiver form factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcvrType {
    Sfp,
    Qsfp,
    Osfp,
}

impl XcvrType {
    /// EEPROM address shared by all module types.
    pub const EEPROM_ADDR: u8 = 0x50;

    pub fn type_str(&self) -> &'static str {
        match self {
            XcvrType::Sfp => "sfp",
            XcvrType::Qsfp => "qsfp",
            XcvrType::Osfp => "osfp",
        }
    }
}

pub trait Fan: Send + Sync {
    fn name(&self) -> String;
    /// Speed as a percentage of the maximum PWM.
    fn speed(&self) -> Option<u32>;
    fn set_speed(&self, percent: u32) -> bool;
    fn direction(&self) -> Option<String>;
    fn presence(&self) -> bool;
    fn status(&self) -> bool;
}

pub trait Psu: Send + Sync {
    fn name(&self) -> String;
    fn presence(&self) -> bool;
    fn status(&self) -> bool;
}

pub trait Led: Send + Sync {
    fn name(&self) -> String;
    fn color(&self) -> Option<String>;
    fn set_color(&self, color: &str) -> bool;
    fn is_status_led(&self) -> bool;
}

pub trait Reset: Send + Sync {
    fn name(&self) -> String;
    fn read(&self) -> Option<String>;
    fn reset_in(&self) -> bool;
    fn reset_out(&self) -> bool;
}

pub trait InterruptLine: Send + Sync {
    fn set(&self);
    fn clear(&self);
    /// The UIO device node backing this line, when one exists.
    fn file(&self) -> Option<String>;
}

pub trait Watchdog: Send + Sync {
    fn arm(&self, timeout: u32) -> bool;
    fn stop(&self) -> bool;
    fn status(&self) -> Option<WatchdogStatus>;
}

pub trait PowerCycle: Send + Sync {
    fn power_cycle(&self) -> bool;
}

pub trait Xcvr: Send + Sync {
    fn id(&self) -> u32;
    fn xcvr_type(&self) -> XcvrType;
    /// `sfp12`, `qsfp3`, ...
    fn name(&self) -> String {
        format!("{}{}", self.xcvr_type().type_str(), self.id())
    }
    fn addr(&self) -> I2cAddr;
    fn presence(&self) -> bool;
    fn low_power_mode(&self) -> bool;
    fn set_low_power_mode(&self, value: bool) -> bool;
    fn module_select(&self) -> bool;
    fn set_module_select(&self, value: bool) -> bool;
    fn tx_disable(&self) -> bool;
    fn set_tx_disable(&self, value: bool) -> bool;
    fn reset(&self) -> Option<Arc<dyn Reset>>;
    fn interrupt_line(&self) -> Option<Arc<dyn InterruptLine>>;
}

pub trait Phy: Send + Sync {
    fn id(&self) -> u32;
    fn reset(&self) -> Option<Arc<dyn Reset>>;
}

pub trait Temp: Send + Sync {
    fn name(&self) -> String;
    /// Degrees Celsius.
    fn temperature(&self) -> Option<f64>;
    fn presence(&self) -> bool;
    fn low_threshold(&self) -> Option<f64>;
    fn set_low_threshold(&self, value: f64) -> bool;
    fn high_threshold(&self) -> Option<f64>;
    fn set_high_threshold(&self, value: f64) -> bool;
}

pub trait Gpio: Send + Sync {
    fn name(&self) -> String;
    fn addr(&self) -> u32;
    fn bit(&self) -> u8;
    fn ro(&self) -> bool;
    fn active_low(&self) -> bool;
}

/// The flat aggregation point. One per fixed system; a chassis builds one per
/// sub-system and merges them through [`MetaInventory`].
#[derive(Default)]
pub struct Inventory {
    sfp_range: Vec<u32>,
    qsfp_range: Vec<u32>,
    osfp_range: Vec<u32>,

    xcvrs: BTreeMap<u32, Arc<dyn Xcvr>>,
    leds: BTreeMap<String, Arc<dyn Led>>,
    led_groups: BTreeMap<String, Vec<String>>,
    psus: Vec<Arc<dyn Psu>>,
    fans: Vec<Arc<dyn Fan>>,
    watchdogs: Vec<Arc<dyn Watchdog>>,
    power_cycles: Vec<Arc<dyn PowerCycle>>,
    interrupts: BTreeMap<String, Arc<dyn InterruptLine>>,
    resets: BTreeMap<String, Arc<dyn Reset>>,
    phys: Vec<Arc<dyn Phy>>,
    temps: Vec<Arc<dyn Temp>>,
    gpios: BTreeMap<String, Arc<dyn Gpio>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare which port numbers carry which module type.
    pub fn add_ports(&mut self, sfps: Vec<u32>, qsfps: Vec<u32>, osfps: Vec<u32>) {
        if !sfps.is_empty() {
            self.sfp_range = sfps;
        }
        if !qsfps.is_empty() {
            self.qsfp_range = qsfps;
        }
        if !osfps.is_empty() {
            self.osfp_range = osfps;
        }
    }

    pub fn port_range(&self) -> Option<(u32, u32)> {
        let all: Vec<u32> = self
            .sfp_range
            .iter()
            .chain(&self.qsfp_range)
            .chain(&self.osfp_range)
            .copied()
            .collect();
        Some((*all.iter().min()?, *all.iter().max()?))
    }

    /// Registering a transceiver also registers its reset line, if any.
    pub fn add_xcvr(&mut self, xcvr: Arc<dyn Xcvr>) {
        if let Some(reset) = xcvr.reset() {
            self.add_reset(reset);
        }
        self.xcvrs.insert(xcvr.id(), xcvr);
    }

    pub fn xcvr(&self, id: u32) -> Option<&Arc<dyn Xcvr>> {
        self.xcvrs.get(&id)
    }

    pub fn xcvrs(&self) -> &BTreeMap<u32, Arc<dyn Xcvr>> {
        &self.xcvrs
    }

    /// Port number to module EEPROM sysfs path.
    pub fn port_to_eeprom_mapping(&self) -> BTreeMap<u32, PathBuf> {
        self.xcvrs
            .iter()
            .map(|(id, xcvr)| {
                let addr = xcvr.addr();
                let path = format!(
                    "/sys/class/i2c-adapter/i2c-{0}/{0}-{1:04x}/eeprom",
                    addr.bus(),
                    addr.address()
                );
                (*id, PathBuf::from(path))
            })
            .collect()
    }

    pub fn port_to_i2c_adapter_mapping(&self) -> BTreeMap<u32, u16> {
        self.xcvrs
            .iter()
            .map(|(id, xcvr)| (*id, xcvr.addr().bus()))
            .collect()
    }

    pub fn add_led(&mut self, led: Arc<dyn Led>) {
        self.leds.insert(led.name(), led);
    }

    pub fn add_led_group(&mut self, name: impl Into<String>, leds: Vec<Arc<dyn Led>>) {
        let names = leds.iter().map(|led| led.name()).collect();
        self.led_groups.insert(name.into(), names);
        for led in leds {
            self.add_led(led);
        }
    }

    pub fn led(&self, name: &str) -> Option<&Arc<dyn Led>> {
        self.leds.get(name)
    }

    pub fn leds(&self) -> &BTreeMap<String, Arc<dyn Led>> {
        &self.leds
    }

    pub fn led_group(&self, name: &str) -> Option<&[String]> {
        self.led_groups.get(name).map(|v| v.as_slice())
    }

    pub fn add_psu(&mut self, psu: Arc<dyn Psu>) {
        self.psus.push(psu);
    }

    pub fn psus(&self) -> &[Arc<dyn Psu>] {
        &self.psus
    }

    pub fn num_psus(&self) -> usize {
        self.psus.len()
    }

    pub fn add_fan(&mut self, fan: Arc<dyn Fan>) {
        self.fans.push(fan);
    }

    pub fn fans(&self) -> &[Arc<dyn Fan>] {
        &self.fans
    }

    pub fn num_fans(&self) -> usize {
        self.fans.len()
    }

    pub fn add_watchdog(&mut self, watchdog: Arc<dyn Watchdog>) {
        self.watchdogs.push(watchdog);
    }

    pub fn watchdogs(&self) -> &[Arc<dyn Watchdog>] {
        &self.watchdogs
    }

    pub fn add_power_cycle(&mut self, power_cycle: Arc<dyn PowerCycle>) {
        self.power_cycles.push(power_cycle);
    }

    pub fn power_cycles(&self) -> &[Arc<dyn PowerCycle>] {
        &self.power_cycles
    }

    pub fn add_interrupt(&mut self, name: impl Into<String>, line: Arc<dyn InterruptLine>) {
        self.interrupts.insert(name.into(), line);
    }

    pub fn interrupts(&self) -> &BTreeMap<String, Arc<dyn InterruptLine>> {
        &self.interrupts
    }

    pub fn add_reset(&mut self, reset: Arc<dyn Reset>) {
        self.resets.insert(reset.name(), reset);
    }

    pub fn add_resets(&mut self, resets: Vec<Arc<dyn Reset>>) {
        for reset in resets {
            self.add_reset(reset);
        }
    }

    pub fn reset(&self, name: &str) -> Option<&Arc<dyn Reset>> {
        self.resets.get(name)
    }

    pub fn resets(&self) -> &BTreeMap<String, Arc<dyn Reset>> {
        &self.resets
    }

    pub fn add_phy(&mut self, phy: Arc<dyn Phy>) {
        self.phys.push(phy);
    }

    pub fn phys(&self) -> &[Arc<dyn Phy>] {
        &self.phys
    }

    pub fn add_temp(&mut self, temp: Arc<dyn Temp>) {
        self.temps.push(temp);
    }

    pub fn temps(&self) -> &[Arc<dyn Temp>] {
        &self.temps
    }

    pub fn add_gpio(&mut self, gpio: Arc<dyn Gpio>) {
        self.gpios.insert(gpio.name(), gpio);
    }

    pub fn gpios(&self) -> &BTreeMap<String, Arc<dyn Gpio>> {
        &self.gpios
    }
}

/// A merged view over several inventories: lists concatenate, maps merge
/// (later inventories win on key collision), counts sum. Used when a chassis
/// is modeled as multiple independently wired sub-systems.
pub struct MetaInventory<'a> {
    invs: Vec<&'a Inventory>,
}

impl<'a> MetaInventory<'a> {
    pub fn new(invs: Vec<&'a Inventory>) -> Self {
        Self { invs }
    }

    pub fn fans(&self) -> Vec<Arc<dyn Fan>> {
        self.invs.iter().flat_map(|inv| inv.fans().to_vec()).collect()
    }

    pub fn psus(&self) -> Vec<Arc<dyn Psu>> {
        self.invs.iter().flat_map(|inv| inv.psus().to_vec()).collect()
    }

    pub fn num_fans(&self) -> usize {
        self.invs.iter().map(|inv| inv.num_fans()).sum()
    }

    pub fn num_psus(&self) -> usize {
        self.invs.iter().map(|inv| inv.num_psus()).sum()
    }

    pub fn xcvrs(&self) -> BTreeMap<u32, Arc<dyn Xcvr>> {
        let mut merged = BTreeMap::new();
        for inv in &self.invs {
            merged.extend(inv.xcvrs().iter().map(|(k, v)| (*k, v.clone())));
        }
        merged
    }

    pub fn resets(&self) -> BTreeMap<String, Arc<dyn Reset>> {
        let mut merged = BTreeMap::new();
        for inv in &self.invs {
            merged.extend(inv.resets().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    pub fn leds(&self) -> BTreeMap<String, Arc<dyn Led>> {
        let mut merged = BTreeMap::new();
        for inv in &self.invs {
            merged.extend(inv.leds().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    pub fn interrupts(&self) -> BTreeMap<String, Arc<dyn InterruptLine>> {
        let mut merged = BTreeMap::new();
        for inv in &self.invs {
            merged.extend(inv.interrupts().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    pub fn power_cycles(&self) -> Vec<Arc<dyn PowerCycle>> {
        self.invs
            .iter()
            .flat_map(|inv| inv.power_cycles().to_vec())
            .collect()
    }

    pub fn temps(&self) -> Vec<Arc<dyn Temp>> {
        self.invs.iter().flat_map(|inv| inv.temps().to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeReset(String);

    impl Reset for FakeReset {
        fn name(&self) -> String {
            self.0.clone()
        }

        fn read(&self) -> Option<String> {
            Some("0".to_string())
        }

        fn reset_in(&self) -> bool {
            true
        }

        fn reset_out(&self) -> bool {
            true
        }
    }

    struct FakeXcvr {
        id: u32,
        ty: XcvrType,
        addr: I2cAddr,
        reset: Option<Arc<dyn Reset>>,
    }

    impl Xcvr for FakeXcvr {
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
            true
        }

        fn low_power_mode(&self) -> bool {
            false
        }

        fn set_low_power_mode(&self, _value: bool) -> bool {
            false
        }

        fn module_select(&self) -> bool {
            true
        }

        fn set_module_select(&self, _value: bool) -> bool {
            true
        }

        fn tx_disable(&self) -> bool {
            false
        }

        fn set_tx_disable(&self, _value: bool) -> bool {
            false
        }

        fn reset(&self) -> Option<Arc<dyn Reset>> {
            self.reset.clone()
        }

        fn interrupt_line(&self) -> Option<Arc<dyn InterruptLine>> {
            None
        }
    }

    #[test]
    fn test_xcvr_registers_its_reset() {
        let mut inv = Inventory::new();
        inv.add_xcvr(Arc::new(FakeXcvr {
            id: 5,
            ty: XcvrType::Qsfp,
            addr: I2cAddr::new(21, 0x50),
            reset: Some(Arc::new(FakeReset("qsfp5".to_string()))),
        }));

        assert!(inv.xcvr(5).is_some());
        assert!(inv.reset("qsfp5").is_some());
        assert_eq!(inv.xcvr(5).unwrap().name(), "qsfp5");
    }

    #[test]
    fn test_last_write_wins_on_key_collision() {
        let mut inv = Inventory::new();
        inv.add_reset(Arc::new(FakeReset("mux".to_string())));
        inv.add_reset(Arc::new(FakeReset("mux".to_string())));
        assert_eq!(inv.resets().len(), 1);
    }

    #[test]
    fn test_port_mappings() {
        let mut inv = Inventory::new();
        inv.add_xcvr(Arc::new(FakeXcvr {
            id: 7,
            ty: XcvrType::Sfp,
            addr: I2cAddr::new(23, 0x50),
            reset: None,
        }));

        let eeproms = inv.port_to_eeprom_mapping();
        assert_eq!(
            eeproms[&7],
            PathBuf::from("/sys/class/i2c-adapter/i2c-23/23-0050/eeprom")
        );
        assert_eq!(inv.port_to_i2c_adapter_mapping()[&7], 23);
    }

    #[test]
    fn test_port_range() {
        let mut inv = Inventory::new();
        inv.add_ports(vec![49, 50], vec![1, 2, 3], vec![]);
        assert_eq!(inv.port_range(), Some((1, 50)));
    }

    #[test]
    fn test_meta_inventory_merges() {
        let mut a = Inventory::new();
        let mut b = Inventory::new();
        a.add_reset(Arc::new(FakeReset("scd".to_string())));
        b.add_reset(Arc::new(FakeReset("phy0".to_string())));
        a.add_xcvr(Arc::new(FakeXcvr {
            id: 1,
            ty: XcvrType::Qsfp,
            addr: I2cAddr::new(10, 0x50),
            reset: None,
        }));
        b.add_xcvr(Arc::new(FakeXcvr {
            id: 2,
            ty: XcvrType::Qsfp,
            addr: I2cAddr::new(11, 0x50),
            reset: None,
        }));

        let meta = MetaInventory::new(vec![&a, &b]);
        assert_eq!(meta.resets().len(), 2);
        assert_eq!(meta.xcvrs().len(), 2);
        assert_eq!(meta.num_fans(), 0);
    }
}
