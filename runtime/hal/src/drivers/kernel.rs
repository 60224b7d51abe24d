//! Kernel module driver: modprobe on setup, rmmod on clean.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};

use crate::component::Driver;
use crate::hwio::HwIo;
use crate::wait::FileWaiter;
use crate::Result;

const PROC_MODULES: &str = "/proc/modules";

/// Binds a component to a kernel module. `setup()` loads the module and
/// optionally waits for a file the module is expected to create; `clean()`
/// unloads it if it is still loaded.
pub struct KernelDriver {
    io: Arc<dyn HwIo>,
    module: String,
    args: Vec<String>,
    waiter: FileWaiter,
}

impl KernelDriver {
    pub fn new(io: Arc<dyn HwIo>, module: impl Into<String>) -> Self {
        Self {
            io,
            module: module.into(),
            args: Vec::new(),
            waiter: FileWaiter::none(),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn wait_file(mut self, path: impl Into<std::path::PathBuf>, timeout: Duration) -> Self {
        self.waiter = FileWaiter::path(path, timeout);
        self
    }

    fn module_token(&self) -> String {
        self.module.replace('-', "_")
    }

    /// Whether the module shows up in /proc/modules.
    pub fn loaded(&self) -> bool {
        let Ok(contents) = self.io.read_file(Path::new(PROC_MODULES)) else {
            return false;
        };
        let token = format!("{} ", self.module_token());
        contents.lines().any(|line| line.starts_with(&token))
    }
}

impl Driver for KernelDriver {
    fn name(&self) -> String {
        self.module.clone()
    }

    fn setup(&mut self) -> Result<()> {
        debug!("loading module {}", self.module);
        let token = self.module_token();
        let mut args: Vec<&str> = vec![token.as_str()];
        args.extend(self.args.iter().map(|s| s.as_str()));
        self.io.run("modprobe", &args)?;
        self.waiter.wait_ready(self.io.as_ref());
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        if !self.loaded() {
            debug!("module {} is not loaded", self.module);
            return Ok(());
        }
        debug!("unloading module {}", self.module);
        let token = self.module_token();
        if let Err(e) = self.io.run("modprobe", &["-r", &token]) {
            error!("failed to unload {}: {}", self.module, e);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("KernelDriver({})", self.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwio::SimIo;

    #[test]
    fn test_setup_runs_modprobe_with_underscores() {
        let io = Arc::new(SimIo::new());
        let mut driver = KernelDriver::new(io.clone(), "i2c-dev");
        driver.setup().unwrap();
        assert_eq!(io.commands(), vec!["modprobe i2c_dev".to_string()]);
    }

    #[test]
    fn test_clean_skips_unloaded_module() {
        let io = Arc::new(SimIo::new());
        let mut driver = KernelDriver::new(io.clone(), "scd");
        driver.clean().unwrap();
        assert!(io.commands().is_empty());
    }

    #[test]
    fn test_clean_unloads_loaded_module() {
        let io = Arc::new(SimIo::new());
        io.prime_read(PROC_MODULES, "scd 16384 0 - Live 0x0000000000000000\n");
        let mut driver = KernelDriver::new(io.clone(), "scd");
        assert!(driver.loaded());
        driver.clean().unwrap();
        assert_eq!(io.commands(), vec!["modprobe -r scd".to_string()]);
    }

    #[test]
    fn test_module_args_are_passed() {
        let io = Arc::new(SimIo::new());
        let mut driver = KernelDriver::new(io.clone(), "lm75").with_args(&["force=1"]);
        driver.setup().unwrap();
        assert_eq!(io.commands(), vec!["modprobe lm75 force=1".to_string()]);
    }
}
