//! Hardware access strategy.
//!
//! Every driver performs its I/O through an [`HwIo`] handle chosen once at
//! construction time: [`PhysIo`] touches the real filesystem and spawns real
//! helper processes, [`SimIo`] journals every access and serves canned reads
//! so a full bring-up can run on a machine with none of the hardware.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use log::{debug, info};

use crate::{HalError, Result};

/// Raw hardware access: file reads/writes, directory listings, helper
/// processes. Trait objects of this are shared as `Arc<dyn HwIo>`.
pub trait HwIo: Send + Sync {
    /// Read a file to a string. Trailing whitespace is the caller's problem.
    fn read_file(&self, path: &Path) -> Result<String>;

    /// Write a string to a file, truncating.
    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;

    fn path_exists(&self, path: &Path) -> bool;

    /// Entry names (not full paths) of a directory.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Run a helper process to completion, failing on non-zero exit.
    fn run(&self, program: &str, args: &[&str]) -> Result<()>;

    /// Whether this is the simulated implementation. Bounded waits complete
    /// immediately under simulation.
    fn is_sim(&self) -> bool {
        false
    }
}

/// Real hardware access through the host filesystem.
#[derive(Debug, Default)]
pub struct PhysIo;

impl HwIo for PhysIo {
    fn read_file(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| HalError::io(path, e))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).map_err(|e| HalError::io(path, e))
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(path).map_err(|e| HalError::io(path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HalError::io(path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        debug!("exec: {} {}", program, args.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| HalError::io(program, e))?;
        if !status.success() {
            return Err(HalError::Command(
                program.to_string(),
                status.code().unwrap_or(-1),
            ));
        }
        Ok(())
    }
}

/// Simulated hardware access.
///
/// Reads are served from primed values (default `"0"`), writes and commands
/// are journaled for inspection, and a path exists once it has been primed or
/// written. Tests drive the same code paths as real bring-up and then assert
/// on the journal.
#[derive(Default)]
pub struct SimIo {
    reads: Mutex<HashMap<PathBuf, String>>,
    dirs: Mutex<HashMap<PathBuf, Vec<String>>>,
    writes: Mutex<Vec<(PathBuf, String)>>,
    commands: Mutex<Vec<String>>,
}

impl SimIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prime the value returned by subsequent reads of `path`.
    pub fn prime_read(&self, path: impl Into<PathBuf>, value: impl Into<String>) {
        self.reads.lock().unwrap().insert(path.into(), value.into());
    }

    /// Prime a directory listing.
    pub fn prime_dir(&self, path: impl Into<PathBuf>, entries: &[&str]) {
        self.dirs
            .lock()
            .unwrap()
            .insert(path.into(), entries.iter().map(|s| s.to_string()).collect());
    }

    /// Every `(path, contents)` written so far, in order.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.writes.lock().unwrap().clone()
    }

    /// Contents written to one path, in order.
    pub fn writes_to(&self, path: &Path) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Helper commands journaled so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl HwIo for SimIo {
    fn read_file(&self, path: &Path) -> Result<String> {
        let value = self
            .reads
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| "0".to_string());
        debug!("sim read {} -> {:?}", path.display(), value);
        Ok(value)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        info!("sim write {} <- {:?}", path.display(), contents);
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), contents.to_string()));
        // reads after a write observe the written value
        self.reads
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.reads.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains_key(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        self.dirs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| HalError::Missing(format!("sim directory {}", path.display())))
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let line = format!("{} {}", program, args.join(" "));
        info!("sim exec: {}", line);
        self.commands.lock().unwrap().push(line);
        Ok(())
    }

    fn is_sim(&self) -> bool {
        true
    }
}
