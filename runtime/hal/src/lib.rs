//! Baseplate HAL - Component and driver lifecycle framework for switch platforms
//!
//! # Purpose
//! A switch board is a tree of devices: CPLDs and FPGAs on PCI, sensors and
//! power controllers on I2C/SMBus, fans, PSUs and transceivers hanging off
//! them. This crate provides the framework that brings that tree up, addresses
//! it, and tears it down in order, without any node having to know about its
//! siblings.
//!
//! # Architecture
//! - [`component`]: the component tree and the staged bring-up protocol
//!   (`setup` -> `finish`, two priority passes), plus teardown and reset
//!   traversals.
//! - [`register`]: declarative, bit-precise accessors over an addressable
//!   register space, bound to a driver's raw read/write.
//! - [`inventory`]: the aggregation point where components register fans,
//!   PSUs, transceivers, resets, LEDs, watchdogs and friends for later query.
//! - [`drivers`]: concrete transports - kernel module load, I2C device
//!   instantiation, sysfs file trees.
//! - [`hwio`]: the hardware access strategy. Every driver holds an
//!   `Arc<dyn HwIo>` selected once at construction; the simulated
//!   implementation lets the whole bring-up sequence run without hardware.
//!
//! # Testing Strategy
//! - Unit tests against [`hwio::SimIo`], which journals every write.
//! - Integration tests drive a whole simulated platform (see the scd crate).

pub mod asic;
pub mod bringup;
pub mod cause;
pub mod component;
pub mod config;
pub mod drivers;
pub mod hwio;
pub mod inventory;
pub mod register;
pub mod types;
pub mod wait;

pub use component::{Component, ComponentBase, Driver, Priority, DEFAULT_WAIT_TIMEOUT};
pub use config::Config;
pub use hwio::{HwIo, PhysIo, SimIo};
pub use inventory::Inventory;
pub use types::{I2cAddr, PciAddr};

use std::path::PathBuf;

use thiserror::Error;

/// Error types for platform bring-up and hardware access
#[derive(Debug, Error)]
pub enum HalError {
    /// Malformed or conflicting descriptors, caught at registration time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bring-up I/O failure; propagates and aborts `setup()`.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A helper process (modprobe) exited non-zero.
    #[error("command `{0}` failed with status {1}")]
    Command(String, i32),

    /// Write attempted on a read-only register or bit field.
    #[error("register `{0}` is read-only")]
    ReadOnly(String),

    /// Register or field name not present in the bound map.
    #[error("no register named `{0}`")]
    UnknownRegister(String),

    /// A bounded wait expired before the resource appeared.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A runtime lookup (bus name, UIO node) found nothing.
    #[error("{0} not found")]
    Missing(String),
}

impl HalError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HalError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HalError>;
