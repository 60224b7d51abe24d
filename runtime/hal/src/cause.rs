//! Reload causes: why the system last rebooted, and the persisted history.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Bound on the persisted history; oldest entries are dropped first.
const HISTORY_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReloadCause {
    PowerLoss,
    Watchdog,
    OverTemperature,
    Reboot,
    PowerCycle,
    Unknown,
}

impl fmt::Display for ReloadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadCause::PowerLoss => "powerloss",
            ReloadCause::Watchdog => "watchdog",
            ReloadCause::OverTemperature => "over-temperature",
            ReloadCause::Reboot => "reboot",
            ReloadCause::PowerCycle => "powercycle",
            ReloadCause::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One recorded cause. `time` stays `"unknown"` when the hardware cannot
/// timestamp the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadCauseEntry {
    pub cause: ReloadCause,
    pub time: String,
    pub description: String,
}

impl ReloadCauseEntry {
    pub fn new(cause: ReloadCause) -> Self {
        Self {
            cause,
            time: "unknown".to_string(),
            description: String::new(),
        }
    }

    pub fn described(cause: ReloadCause, description: impl Into<String>) -> Self {
        Self {
            cause,
            time: "unknown".to_string(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ReloadCauseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.description.is_empty() {
            write!(f, ", description: {}", self.description)?;
        }
        if self.time != "unknown" {
            write!(f, ", time: {}", self.time)?;
        }
        Ok(())
    }
}

/// Persisted cause history (bincode on disk).
pub struct CauseStore {
    path: PathBuf,
}

impl CauseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Vec<ReloadCauseEntry> {
        let Ok(bytes) = fs::read(&self.path) else {
            return Vec::new();
        };
        match bincode::deserialize(&bytes) {
            Ok(causes) => causes,
            Err(e) => {
                warn!("corrupt cause history {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn write(&self, causes: &[ReloadCauseEntry]) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match bincode::serialize(&causes) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&self.path, bytes) {
                    warn!("cannot persist cause history {}: {}", self.path.display(), e);
                }
            }
            Err(e) => warn!("cannot encode cause history: {}", e),
        }
    }

    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// Merge freshly read causes into the history: entries matching an
    /// existing (time, cause) pair are dropped, the total is capped at
    /// [`HISTORY_SIZE`] keeping the newest.
    pub fn update(&self, new_causes: Vec<ReloadCauseEntry>) {
        let mut causes = self.read();
        for new_cause in new_causes {
            let seen = causes
                .iter()
                .any(|c| c.time == new_cause.time && c.cause == new_cause.cause);
            if !seen {
                causes.push(new_cause);
            }
        }
        if causes.len() > HISTORY_SIZE {
            causes.drain(..causes.len() - HISTORY_SIZE);
        }
        debug!("persisting {} reload causes", causes.len());
        self.write(&causes);
    }
}
