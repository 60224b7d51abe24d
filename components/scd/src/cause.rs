//! Reload-cause register decoding.
//!
//! The controller latches why the system last went down in one register;
//! each bit maps to a cause. Decoding is best-effort: a controller without a
//! declared cause register, or an unreadable window, contributes nothing.

use std::sync::Arc;

use log::{debug, error};

use baseplate_hal::cause::{ReloadCause, ReloadCauseEntry};
use baseplate_hal::register::{RegBitFieldDesc, RegisterDesc, RegisterMap};

use crate::window::WindowIo;
use crate::ScdState;

static CAUSE_FIELDS: &[RegBitFieldDesc] = &[
    RegBitFieldDesc::new(0, "powerloss"),
    RegBitFieldDesc::new(1, "watchdog"),
    RegBitFieldDesc::new(2, "overtemp"),
    RegBitFieldDesc::new(3, "reboot"),
    RegBitFieldDesc::new(4, "powercycle"),
];

fn field_cause(name: &str) -> ReloadCause {
    match name {
        "powerloss" => ReloadCause::PowerLoss,
        "watchdog" => ReloadCause::Watchdog,
        "overtemp" => ReloadCause::OverTemperature,
        "reboot" => ReloadCause::Reboot,
        "powercycle" => ReloadCause::PowerCycle,
        _ => ReloadCause::Unknown,
    }
}

pub(crate) fn read_causes(state: &Arc<ScdState>, clear: bool) -> Vec<ReloadCauseEntry> {
    let Some(addr) = state.descriptors().cause_reg else {
        return Vec::new();
    };
    let window = match state.window() {
        Ok(window) => window,
        Err(e) => {
            error!("cannot read reload causes: {}", e);
            return Vec::new();
        }
    };
    let regs = vec![RegisterDesc::new(addr).named("cause").fields(CAUSE_FIELDS)];
    let map = match RegisterMap::bind(regs, Arc::new(WindowIo(window))) {
        Ok(map) => map,
        Err(e) => {
            error!("cannot bind cause registers: {}", e);
            return Vec::new();
        }
    };

    let mut causes = Vec::new();
    for field in CAUSE_FIELDS {
        match map.read(field.name) {
            Ok(1) => causes.push(ReloadCauseEntry::new(field_cause(field.name))),
            Ok(_) => {}
            Err(e) => {
                error!("cannot read cause bit {}: {}", field.name, e);
                return Vec::new();
            }
        }
    }
    if clear {
        debug!("clearing reload cause register {:#x}", addr);
        if let Err(e) = map.write("cause", 0) {
            error!("cannot clear cause register: {}", e);
        }
    }
    causes
}
