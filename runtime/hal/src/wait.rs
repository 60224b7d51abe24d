//! Bounded waits for kernel-created resources.
//!
//! Device nodes, hwmon directories and driver attribute files appear some
//! time after a module is loaded or an object configured. Everything here
//! polls with a fixed delay and an explicit timeout; expiry logs and returns
//! rather than blocking forever.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::hwio::HwIo;
use crate::Result;

/// Polling interval between attempts.
const POLL_DELAY: Duration = Duration::from_millis(50);

/// A bounded retry loop. Each `next()` sleeps one delay, then reports whether
/// the deadline or the attempt cap has been reached.
pub struct Retrier {
    deadline: Instant,
    max_attempts: Option<u32>,
    pub attempt: u32,
}

impl Retrier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            max_attempts: None,
            attempt: 0,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sleep one interval; true while the budget lasts.
    pub fn next(&mut self) -> bool {
        std::thread::sleep(POLL_DELAY);
        if Instant::now() > self.deadline {
            return false;
        }
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return false;
            }
        }
        self.attempt += 1;
        true
    }
}

/// What a [`FileWaiter`] waits for.
#[derive(Debug, Clone)]
pub enum WaitTarget {
    /// A plain path.
    Path(PathBuf),
    /// A chain of name prefixes under a root directory, e.g.
    /// `("<device>", ["hwmon", "hwmon"])` matching `<device>/hwmon/hwmonN`.
    Subdir { root: PathBuf, prefixes: Vec<String> },
}

/// Waits for a file the kernel is expected to create.
#[derive(Debug, Clone)]
pub struct FileWaiter {
    target: Option<WaitTarget>,
    timeout: Duration,
}

impl FileWaiter {
    pub fn none() -> Self {
        Self {
            target: None,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn path(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            target: Some(WaitTarget::Path(path.into())),
            timeout,
        }
    }

    pub fn subdir(root: impl Into<PathBuf>, prefixes: &[&str], timeout: Duration) -> Self {
        Self {
            target: Some(WaitTarget::Subdir {
                root: root.into(),
                prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            }),
            timeout,
        }
    }

    /// Poll until the target exists or the timeout expires. Expiry logs an
    /// error and returns false; callers treating absence as fatal check the
    /// return value.
    pub fn wait_ready(&self, io: &dyn HwIo) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        if io.is_sim() {
            debug!("sim wait on {:?} ready", target);
            return true;
        }

        debug!("waiting on {:?}", target);
        let mut retrier = Retrier::new(self.timeout);
        loop {
            if self.target_exists(io, target) {
                return true;
            }
            if !retrier.next() {
                break;
            }
            debug!("waiting on {:?} attempt {}", target, retrier.attempt);
        }

        if self.target_exists(io, target) {
            return true;
        }
        error!("waiting on {:?} failed", target);
        false
    }

    fn target_exists(&self, io: &dyn HwIo, target: &WaitTarget) -> bool {
        match target {
            WaitTarget::Path(path) => io.path_exists(path),
            WaitTarget::Subdir { root, prefixes } => Self::find_subdir(io, root, prefixes),
        }
    }

    fn find_subdir(io: &dyn HwIo, dir: &Path, prefixes: &[String]) -> bool {
        let Some(prefix) = prefixes.first() else {
            return true;
        };
        let Ok(entries) = io.list_dir(dir) else {
            return false;
        };
        entries
            .iter()
            .filter(|name| name.starts_with(prefix))
            .any(|name| Self::find_subdir(io, &dir.join(name), &prefixes[1..]))
    }
}

/// Write one or more attribute files under a sysfs directory. Bring-up
/// configuration goes through here; failures propagate.
pub fn write_config(io: &dyn HwIo, dir: &Path, entries: &[(&str, String)]) -> Result<()> {
    for (name, value) in entries {
        io.write_file(&dir.join(name), value)?;
    }
    Ok(())
}

/// Locate the hwmon directory under a device that carries attributes with the
/// given prefix (`pwm1`, `temp2_input`, ...). The directory appears some time
/// after driver bind, so this polls within `timeout`.
pub fn locate_hwmon_path(
    io: &dyn HwIo,
    device_dir: &Path,
    prefix: &str,
    timeout: Duration,
) -> Option<PathBuf> {
    let hwmon_root = device_dir.join("hwmon");
    let mut retrier = Retrier::new(timeout);
    loop {
        if let Ok(entries) = io.list_dir(&hwmon_root) {
            for entry in entries {
                let dir = hwmon_root.join(&entry);
                if let Ok(files) = io.list_dir(&dir) {
                    if files.iter().any(|f| f.starts_with(prefix)) {
                        debug!("hwmon path for {} is {}", device_dir.display(), dir.display());
                        return Some(dir);
                    }
                }
            }
        }
        if io.is_sim() || !retrier.next() {
            break;
        }
    }
    error!("could not locate hwmon path under {}", device_dir.display());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwio::SimIo;

    #[test]
    fn test_sim_wait_is_immediate() {
        let io = SimIo::new();
        let waiter = FileWaiter::path("/sys/bus/pci/devices/0000:04:00.0/smbus_tweaks",
                                      Duration::from_secs(5));
        assert!(waiter.wait_ready(&io));
    }

    #[test]
    fn test_waiter_without_target() {
        let io = SimIo::new();
        assert!(!FileWaiter::none().wait_ready(&io));
    }

    #[test]
    fn test_write_config_journals_each_entry() {
        let io = SimIo::new();
        let dir = Path::new("/sys/bus/pci/devices/0000:04:00.0");
        write_config(&io, dir, &[("init_trigger", "1".to_string())]).unwrap();
        assert_eq!(io.writes_to(&dir.join("init_trigger")), vec!["1".to_string()]);
    }

    #[test]
    fn test_locate_hwmon_by_prefix() {
        let io = SimIo::new();
        let dev = Path::new("/sys/bus/i2c/devices/5-004c");
        io.prime_dir(dev.join("hwmon"), &["hwmon3"]);
        io.prime_dir(dev.join("hwmon/hwmon3"), &["name", "pwm1", "fan1_input"]);

        let path = locate_hwmon_path(&io, dev, "pwm1", Duration::from_secs(1));
        assert_eq!(path, Some(dev.join("hwmon/hwmon3")));

        assert_eq!(
            locate_hwmon_path(&io, dev, "curr1", Duration::from_millis(10)),
            None
        );
    }
}
