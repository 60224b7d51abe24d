//! The component tree and the staged bring-up protocol.
//!
//! A component owns an ordered set of drivers (its transports to the
//! hardware) and a list of child components. Bring-up is two-staged: a
//! component's `setup()` runs every owned driver's `setup()` then every
//! driver's `finish()`, all before any child is touched; `finish(priority)`
//! then descends into children one priority bucket at a time, which lets the
//! caller run the critical pass to completion, take devices out of reset, and
//! only then start the slow background pass.
//!
//! Teardown is LIFO relative to bring-up: `clean()` and `reset_in()` walk
//! children first and a component's own drivers in reverse registration
//! order, while `reset_out()` walks drivers forward before descending.

use std::time::Duration;

use log::debug;

use crate::cause::ReloadCauseEntry;
use crate::inventory::Inventory;
use crate::types::I2cAddr;
use crate::Result;

/// Default bound for `wait_for_it`.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Bring-up bucket. A child attached to a parent can never run at a stricter
/// bucket than the parent: attachment raises the child to at least the
/// parent's priority, transitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Critical, synchronous bring-up.
    #[default]
    Default,
    /// Slow, deferrable bring-up (PSU/DPM probing and friends).
    Background,
}

/// One transport binding a component to the hardware.
///
/// Lifecycle: `setup()` performs the one-time bring-up (load a module,
/// instantiate an i2c device, map a BAR), `finish()` anything that must wait
/// until sibling drivers have completed setup, `clean()` reverses setup.
/// Setup failures propagate and abort the platform bring-up;
/// `reload_causes` is the one call that never fails.
pub trait Driver: Send {
    fn name(&self) -> String;

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset_in(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset_out(&mut self) -> Result<()> {
        Ok(())
    }

    fn reload_causes(&mut self, _clear: bool) -> Vec<ReloadCauseEntry> {
        Vec::new()
    }

    /// One-line description for `dump`.
    fn describe(&self) -> String {
        self.name()
    }
}

/// Shared state of every tree node: drivers in registration order, children,
/// and the node's priority bucket.
#[derive(Default)]
pub struct ComponentBase {
    drivers: Vec<(String, Box<dyn Driver>)>,
    children: Vec<Box<dyn Component>>,
    pub priority: Priority,
}

impl ComponentBase {
    pub fn new(priority: Priority) -> Self {
        Self {
            drivers: Vec::new(),
            children: Vec::new(),
            priority,
        }
    }

    /// Register a driver under its own name.
    pub fn add_driver(&mut self, driver: Box<dyn Driver>) {
        let key = driver.name();
        self.add_driver_as(key, driver);
    }

    /// Register a driver under an explicit key for later lookup.
    pub fn add_driver_as(&mut self, key: impl Into<String>, driver: Box<dyn Driver>) {
        self.drivers.push((key.into(), driver));
    }

    pub fn driver(&self, key: &str) -> Option<&dyn Driver> {
        self.drivers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, d)| d.as_ref())
    }

    pub fn driver_mut(&mut self, key: &str) -> Option<&mut (dyn Driver + 'static)> {
        self.drivers
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, d)| d.as_mut())
    }

    pub fn drivers(&self) -> impl Iterator<Item = (&str, &dyn Driver)> {
        self.drivers.iter().map(|(k, d)| (k.as_str(), d.as_ref()))
    }

    /// Attach a child, raising it (and its whole subtree) to at least this
    /// node's priority.
    pub fn add_component(&mut self, mut child: Box<dyn Component>) {
        raise_priority(child.as_mut(), self.priority);
        self.children.push(child);
    }

    pub fn add_components(&mut self, children: Vec<Box<dyn Component>>) {
        for child in children {
            self.add_component(child);
        }
    }

    pub fn children(&self) -> &[Box<dyn Component>] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Box<dyn Component>] {
        &mut self.children
    }

    /// Drivers' `setup()` in registration order, then `finish()` in the same
    /// order. Children are not touched here.
    pub fn setup_drivers(&mut self) -> Result<()> {
        for (_, driver) in &mut self.drivers {
            driver.setup()?;
        }
        for (_, driver) in &mut self.drivers {
            driver.finish()?;
        }
        Ok(())
    }

    /// One priority pass: set up direct children in the given bucket, then
    /// recurse through DEFAULT children to reach deeper nodes of the bucket.
    /// Children of BACKGROUND nodes are only reachable once their parent's
    /// bucket runs; that matches how platforms are wired.
    pub fn finish_children(&mut self, priority: Priority) -> Result<()> {
        for child in &mut self.children {
            if child.base().priority == priority {
                child.setup()?;
            }
        }
        for child in &mut self.children {
            if child.base().priority == Priority::Default {
                child.finish(priority)?;
            }
        }
        Ok(())
    }

    /// Every driver's `reset_out`, forward registration order.
    pub fn reset_out_drivers(&mut self) -> Result<()> {
        for (_, driver) in &mut self.drivers {
            driver.reset_out()?;
        }
        Ok(())
    }

    /// Every child's `reset_out`, in order.
    pub fn reset_out_children(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset_out()?;
        }
        Ok(())
    }

    fn drivers_forward(&mut self) -> impl Iterator<Item = &mut Box<dyn Driver>> {
        self.drivers.iter_mut().map(|(_, d)| d)
    }

    fn drivers_reverse(&mut self) -> impl Iterator<Item = &mut Box<dyn Driver>> {
        self.drivers.iter_mut().rev().map(|(_, d)| d)
    }
}

fn raise_priority(component: &mut dyn Component, floor: Priority) {
    let priority = component.base().priority.max(floor);
    component.base_mut().priority = priority;
    for child in component.base_mut().children_mut() {
        raise_priority(child.as_mut(), priority);
    }
}

/// A node of the platform tree. Implementors embed a [`ComponentBase`] and
/// override the traversals only where the hardware demands it (the SCD
/// overrides `reset_out` to also deassert transceiver lines).
pub trait Component: Send {
    fn base(&self) -> &ComponentBase;
    fn base_mut(&mut self) -> &mut ComponentBase;

    fn label(&self) -> String {
        "Component".to_string()
    }

    /// Bring up this node's own drivers. Children are handled by `finish`.
    fn setup(&mut self) -> Result<()> {
        debug!("setting up {}", self.label());
        self.base_mut().setup_drivers()
    }

    /// Descend into children for one priority bucket. Children require the
    /// parent to be fully set up first.
    fn finish(&mut self, priority: Priority) -> Result<()> {
        self.base_mut().finish_children(priority)
    }

    fn refresh(&mut self) -> Result<()> {
        for child in self.base_mut().children_mut() {
            child.refresh()?;
        }
        for driver in self.base_mut().drivers_forward() {
            driver.refresh()?;
        }
        Ok(())
    }

    /// Teardown, LIFO: children first, then own drivers in reverse
    /// registration order.
    fn clean(&mut self) -> Result<()> {
        for child in self.base_mut().children_mut() {
            child.clean()?;
        }
        for driver in self.base_mut().drivers_reverse() {
            driver.clean()?;
        }
        Ok(())
    }

    /// Put devices in reset, child-first.
    fn reset_in(&mut self) -> Result<()> {
        for child in self.base_mut().children_mut() {
            child.reset_in()?;
        }
        for driver in self.base_mut().drivers_reverse() {
            driver.reset_in()?;
        }
        Ok(())
    }

    /// Take devices out of reset, parent-first.
    fn reset_out(&mut self) -> Result<()> {
        self.base_mut().reset_out_drivers()?;
        self.base_mut().reset_out_children()
    }

    /// Collect reload causes from the whole subtree. Never fails; drivers
    /// that cannot determine a cause contribute nothing.
    fn reload_causes(&mut self, clear: bool) -> Vec<ReloadCauseEntry> {
        let mut causes = Vec::new();
        for driver in self.base_mut().drivers_forward() {
            causes.extend(driver.reload_causes(clear));
        }
        for child in self.base_mut().children_mut() {
            causes.extend(child.reload_causes(clear));
        }
        causes
    }

    /// Wait until the hardware behind this subtree is usable. Default is to
    /// propagate; components backed by a physical bus scan override this.
    fn wait_for_it(&mut self, timeout: Duration) -> Result<()> {
        for child in self.base_mut().children_mut() {
            child.wait_for_it(timeout)?;
        }
        Ok(())
    }

    /// Indented human-readable tree of components and drivers.
    fn dump(&self, depth: usize, out: &mut String) {
        let pad = "   ".repeat(depth);
        out.push_str(&format!("{}- {}\n", pad, self.label()));
        for (key, driver) in self.base().drivers() {
            out.push_str(&format!("{}   => {} ({})\n", pad, driver.describe(), key));
        }
        for child in self.base().children() {
            child.dump(depth + 1, out);
        }
    }
}

/// A component living at an I2C address, typically carrying one
/// `I2cKernelDriver` that instantiates the kernel device node.
pub struct I2cComponent {
    base: ComponentBase,
    addr: I2cAddr,
}

impl I2cComponent {
    pub fn new(addr: I2cAddr, priority: Priority) -> Self {
        Self {
            base: ComponentBase::new(priority),
            addr,
        }
    }

    pub fn addr(&self) -> &I2cAddr {
        &self.addr
    }
}

impl Component for I2cComponent {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn label(&self) -> String {
        format!("I2cComponent(addr={})", self.addr)
    }
}

/// The root of a fixed (non-chassis) system: a plain component that also owns
/// the platform inventory and drives the two-pass bring-up.
pub struct FixedSystem {
    base: ComponentBase,
    pub inventory: Inventory,
}

impl Default for FixedSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedSystem {
    pub fn new() -> Self {
        Self {
            base: ComponentBase::new(Priority::Default),
            inventory: Inventory::new(),
        }
    }

    /// One full pass: own drivers, then every descendant in the given
    /// priority bucket.
    pub fn setup_priority(&mut self, priority: Priority) -> Result<()> {
        Component::setup(self)?;
        self.finish(priority)
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }
}

impl Component for FixedSystem {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn label(&self) -> String {
        "FixedSystem".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct RecordingDriver {
        id: String,
        journal: Journal,
    }

    impl RecordingDriver {
        fn boxed(id: &str, journal: &Journal) -> Box<dyn Driver> {
            Box::new(Self {
                id: id.to_string(),
                journal: journal.clone(),
            })
        }

        fn record(&self, op: &str) {
            self.journal.lock().unwrap().push(format!("{}.{}", self.id, op));
        }
    }

    impl Driver for RecordingDriver {
        fn name(&self) -> String {
            self.id.clone()
        }

        fn setup(&mut self) -> Result<()> {
            self.record("setup");
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.record("finish");
            Ok(())
        }

        fn clean(&mut self) -> Result<()> {
            self.record("clean");
            Ok(())
        }

        fn reset_in(&mut self) -> Result<()> {
            self.record("reset_in");
            Ok(())
        }

        fn reset_out(&mut self) -> Result<()> {
            self.record("reset_out");
            Ok(())
        }
    }

    struct Node {
        base: ComponentBase,
        name: String,
    }

    impl Node {
        fn new(name: &str, priority: Priority) -> Self {
            Self {
                base: ComponentBase::new(priority),
                name: name.to_string(),
            }
        }
    }

    impl Component for Node {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ComponentBase {
            &mut self.base
        }

        fn label(&self) -> String {
            self.name.clone()
        }
    }

    #[test]
    fn test_priority_propagates_to_children() {
        let mut parent = Node::new("parent", Priority::Background);
        let mut child = Node::new("child", Priority::Default);
        let grandchild = Node::new("grandchild", Priority::Default);
        child.base_mut().add_component(Box::new(grandchild));
        parent.base_mut().add_component(Box::new(child));

        let child = &parent.base().children()[0];
        assert_eq!(child.base().priority, Priority::Background);
        let grandchild = &child.base().children()[0];
        assert_eq!(grandchild.base().priority, Priority::Background);
    }

    #[test]
    fn test_priority_never_lowers() {
        let mut parent = Node::new("parent", Priority::Default);
        let child = Node::new("child", Priority::Background);
        parent.base_mut().add_component(Box::new(child));
        assert_eq!(
            parent.base().children()[0].base().priority,
            Priority::Background
        );
    }

    #[test]
    fn test_setup_runs_all_setups_before_finishes() {
        let journal: Journal = Default::default();
        let mut node = Node::new("node", Priority::Default);
        node.base_mut().add_driver(RecordingDriver::boxed("a", &journal));
        node.base_mut().add_driver(RecordingDriver::boxed("b", &journal));

        node.setup().unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["a.setup", "b.setup", "a.finish", "b.finish"]
        );
    }

    #[test]
    fn test_clean_is_lifo() {
        let journal: Journal = Default::default();
        let mut node = Node::new("node", Priority::Default);
        for id in ["a", "b", "c"] {
            node.base_mut().add_driver(RecordingDriver::boxed(id, &journal));
        }

        node.setup().unwrap();
        journal.lock().unwrap().clear();
        node.clean().unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["c.clean", "b.clean", "a.clean"]);
    }

    #[test]
    fn test_reset_orders_are_asymmetric() {
        let journal: Journal = Default::default();
        let mut parent = Node::new("parent", Priority::Default);
        parent.base_mut().add_driver(RecordingDriver::boxed("p", &journal));
        let mut child = Node::new("child", Priority::Default);
        child.base_mut().add_driver(RecordingDriver::boxed("c", &journal));
        parent.base_mut().add_component(Box::new(child));

        parent.reset_in().unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["c.reset_in", "p.reset_in"]);

        journal.lock().unwrap().clear();
        parent.reset_out().unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["p.reset_out", "c.reset_out"]);
    }

    #[test]
    fn test_two_pass_bringup() {
        // Depth 3: root (DEFAULT driver) -> mid -> leaf (BACKGROUND driver).
        let journal: Journal = Default::default();
        let mut root = Node::new("root", Priority::Default);
        root.base_mut().add_driver(RecordingDriver::boxed("root", &journal));

        let mut mid = Node::new("mid", Priority::Default);
        let mut leaf = Node::new("leaf", Priority::Background);
        leaf.base_mut().add_driver(RecordingDriver::boxed("leaf", &journal));
        mid.base_mut().add_component(Box::new(leaf));
        root.base_mut().add_component(Box::new(mid));

        root.setup().unwrap();
        root.finish(Priority::Default).unwrap();
        {
            let journal = journal.lock().unwrap();
            assert!(journal.contains(&"root.setup".to_string()));
            assert!(journal.contains(&"root.finish".to_string()));
            assert!(!journal.iter().any(|entry| entry.starts_with("leaf.")));
        }

        root.finish(Priority::Background).unwrap();
        let journal = journal.lock().unwrap();
        let count = journal.iter().filter(|entry| *entry == "leaf.setup").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_driver_lookup_by_key() {
        let journal: Journal = Default::default();
        let mut node = Node::new("node", Priority::Default);
        node.base_mut()
            .add_driver_as("sysfs", RecordingDriver::boxed("drv", &journal));
        assert!(node.base().driver("sysfs").is_some());
        assert!(node.base().driver("drv").is_none());
    }

    #[test]
    fn test_dump_lists_tree() {
        let journal: Journal = Default::default();
        let mut root = Node::new("root", Priority::Default);
        root.base_mut().add_driver(RecordingDriver::boxed("drv", &journal));
        root.base_mut()
            .add_component(Box::new(Node::new("child", Priority::Default)));

        let mut out = String::new();
        root.dump(0, &mut out);
        assert!(out.contains("- root"));
        assert!(out.contains("=> drv"));
        assert!(out.contains("   - child"));
    }
}
