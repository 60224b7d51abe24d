//! baseplate - operator CLI for switch platform bring-up
//!
//! Commands:
//! - `baseplate setup` - bring the platform up (critical pass, then slow pass)
//! - `baseplate clean` - tear the platform down
//! - `baseplate reset {in,out}` - put devices in or out of reset
//! - `baseplate dump` - print the component tree
//! - `baseplate reboot-cause` - show why the system last went down
//! - `baseplate watchdog {arm,stop,status}` - drive the hardware watchdog

mod platform;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::{debug, warn};

use baseplate_hal::bringup::spawn_background;
use baseplate_hal::cause::CauseStore;
use baseplate_hal::component::{Component, Priority, DEFAULT_WAIT_TIMEOUT};
use baseplate_hal::config::{Config, DEFAULT_CONFIG_PATH};
use baseplate_hal::hwio::{HwIo, PhysIo, SimIo};

/// Bound on waiting for a deferred background pass before handing the shell
/// back to the operator.
const BACKGROUND_JOIN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "baseplate")]
#[command(version)]
#[command(about = "Switch platform hardware bring-up and control", long_about = None)]
struct Cli {
    /// Run against the simulation backend instead of real hardware
    #[arg(long, global = true)]
    sim: bool,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the platform up
    Setup {
        /// Take devices out of reset after the critical pass
        #[arg(long)]
        reset: bool,

        /// Defer the slow pass to a background worker
        #[arg(long)]
        background: bool,
    },

    /// Tear the platform down
    Clean,

    /// Drive the board reset lines
    Reset {
        #[arg(value_enum)]
        direction: ResetDirection,
    },

    /// Print the component tree
    Dump,

    /// Show recorded reload causes
    RebootCause {
        /// Show the persisted history instead of the latest causes
        #[arg(long)]
        history: bool,
    },

    /// Drive the hardware watchdog
    Watchdog {
        #[command(subcommand)]
        action: WatchdogAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetDirection {
    In,
    Out,
}

#[derive(Subcommand)]
enum WatchdogAction {
    /// Arm with a timeout in controller ticks
    Arm {
        #[arg(default_value_t = 300)]
        timeout: u32,
    },
    Stop,
    Status,
}

/// Advisory exclusion between concurrent invocations. Held for the duration
/// of a mutating action, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| {
                format!(
                    "cannot take lock {} (another instance running?)",
                    path.display()
                )
            })?;
        debug!("holding lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let config = Config::load(&cli.config);
    let io: Arc<dyn HwIo> = if cli.sim {
        Arc::new(SimIo::new())
    } else {
        Arc::new(PhysIo)
    };

    let mut system = platform::build(io, &config)?;
    debug!("platform {} ready", platform::PLATFORM_NAME);

    match cli.command {
        Commands::Setup { reset, background } => {
            let _lock = LockFile::acquire(&config.lock_file)?;
            debug!("setting up critical drivers");
            system.setup_priority(Priority::Default)?;

            // resettable devices all come up in the critical pass
            if reset {
                debug!("taking devices out of reset");
                system.reset_out()?;
            }

            if background {
                debug!("setting up slow drivers in background");
                let task = spawn_background(move || {
                    let mut system = system;
                    system.setup_priority(Priority::Background)?;
                    system.wait_for_it(DEFAULT_WAIT_TIMEOUT)
                });
                if task.join(BACKGROUND_JOIN_TIMEOUT).is_err() {
                    warn!("background bring-up still running at exit");
                }
            } else {
                debug!("setting up slow drivers normally");
                system.setup_priority(Priority::Background)?;
                system.wait_for_it(DEFAULT_WAIT_TIMEOUT)?;
            }
            println!("{} platform is up", "ok".green().bold());
        }

        Commands::Clean => {
            let _lock = LockFile::acquire(&config.lock_file)?;
            system.clean()?;
            println!("{} platform cleaned", "ok".green().bold());
        }

        Commands::Reset { direction } => match direction {
            ResetDirection::In => system.reset_in()?,
            ResetDirection::Out => system.reset_out()?,
        },

        Commands::Dump => {
            let mut out = String::new();
            system.dump(0, &mut out);
            print!("{}", out);
        }

        Commands::RebootCause { history } => {
            let _lock = LockFile::acquire(&config.lock_file)?;
            let store = CauseStore::new(&config.reboot_cause_file);
            let causes = system.reload_causes(true);
            if !causes.is_empty() {
                store.update(causes.clone());
            }
            let shown = if history { store.read() } else { causes };
            if shown.is_empty() {
                println!("no reload cause recorded");
            }
            for cause in shown {
                println!("{}", cause);
            }
        }

        Commands::Watchdog { action } => {
            let watchdogs = system.inventory().watchdogs();
            let Some(watchdog) = watchdogs.first() else {
                bail!("platform has no watchdog");
            };
            match action {
                WatchdogAction::Arm { timeout } => {
                    if !watchdog.arm(timeout) {
                        bail!("failed to arm watchdog");
                    }
                    println!("{} watchdog armed ({} ticks)", "ok".green().bold(), timeout);
                }
                WatchdogAction::Stop => {
                    if !watchdog.stop() {
                        bail!("failed to stop watchdog");
                    }
                    println!("{} watchdog stopped", "ok".green().bold());
                }
                WatchdogAction::Status => match watchdog.status() {
                    Some(status) => println!(
                        "enabled: {}, timeout: {}",
                        status.enabled, status.timeout
                    ),
                    None => bail!("watchdog status unavailable"),
                },
            }
        }
    }

    Ok(())
}
