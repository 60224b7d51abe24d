//! Declarative, bit-precise accessors over an addressable register space.
//!
//! A driver exposes raw `read(addr)`/`write(addr, value)` through
//! [`RegisterIo`]; a [`RegisterMap`] binds a static table of
//! [`RegisterDesc`]s to one such driver and hands out named accessors for
//! whole registers and single bit fields. All bit writes are
//! read-modify-write against the full register value; two writers touching
//! different bits of the same register race unless serialized externally.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::{HalError, Result};

/// Raw register transport, implemented by drivers that can address a
/// register space (an SMBus device, a memory-mapped window).
pub trait RegisterIo: Send + Sync {
    fn read(&self, addr: u32) -> Result<u32>;
    fn write(&self, addr: u32, value: u32) -> Result<()>;
}

/// One named bit within a register. Fields default to read-only; `flip`
/// marks active-low semantics (logical value is the inverse of the wire bit).
#[derive(Debug, Clone, Copy)]
pub struct RegBitFieldDesc {
    pub bit: u8,
    pub name: &'static str,
    pub ro: bool,
    pub flip: bool,
}

impl RegBitFieldDesc {
    pub const fn new(bit: u8, name: &'static str) -> Self {
        Self {
            bit,
            name,
            ro: true,
            flip: false,
        }
    }

    pub const fn rw(mut self) -> Self {
        self.ro = false;
        self
    }

    pub const fn flipped(mut self) -> Self {
        self.flip = true;
        self
    }
}

/// One register: an address, an optional whole-register accessor name, and
/// any number of named bit fields.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDesc {
    pub addr: u32,
    pub name: Option<&'static str>,
    pub ro: bool,
    pub fields: &'static [RegBitFieldDesc],
}

impl RegisterDesc {
    pub const fn new(addr: u32) -> Self {
        Self {
            addr,
            name: None,
            ro: false,
            fields: &[],
        }
    }

    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub const fn read_only(mut self) -> Self {
        self.ro = true;
        self
    }

    pub const fn fields(mut self, fields: &'static [RegBitFieldDesc]) -> Self {
        self.fields = fields;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Accessor {
    Whole(usize),
    Field(usize, usize),
}

/// A register table bound to one concrete [`RegisterIo`], with one accessor
/// per register name and per bit-field name.
pub struct RegisterMap {
    io: Arc<dyn RegisterIo>,
    regs: Vec<RegisterDesc>,
    names: Vec<&'static str>,
    accessors: HashMap<&'static str, Accessor>,
}

/// One entry of a diagnostic snapshot. `value` is `None` when the read
/// failed; diagnostics never propagate an I/O error.
#[derive(Debug, Clone)]
pub struct RegDiag {
    pub name: &'static str,
    pub addr: u32,
    pub value: Option<u32>,
}

impl RegisterMap {
    /// Bind a descriptor table to a driver. Duplicate accessor names are a
    /// configuration error.
    pub fn bind(regs: impl Into<Vec<RegisterDesc>>, io: Arc<dyn RegisterIo>) -> Result<Self> {
        let regs = regs.into();
        let mut names = Vec::new();
        let mut accessors = HashMap::new();
        for (ri, reg) in regs.iter().enumerate() {
            if let Some(name) = reg.name {
                debug!("registering reg: {}", name);
                if accessors.insert(name, Accessor::Whole(ri)).is_some() {
                    return Err(HalError::Config(format!("duplicate register name `{}`", name)));
                }
                names.push(name);
            }
            for (fi, field) in reg.fields.iter().enumerate() {
                debug!("registering reg field: {}", field.name);
                if accessors.insert(field.name, Accessor::Field(ri, fi)).is_some() {
                    return Err(HalError::Config(format!(
                        "duplicate register field name `{}`",
                        field.name
                    )));
                }
                names.push(field.name);
            }
        }
        Ok(Self {
            io,
            regs,
            names,
            accessors,
        })
    }

    fn accessor(&self, name: &str) -> Result<Accessor> {
        self.accessors
            .get(name)
            .copied()
            .ok_or_else(|| HalError::UnknownRegister(name.to_string()))
    }

    /// Read a register or bit field by name. Field reads apply the `flip`
    /// inversion and return 0/1.
    pub fn read(&self, name: &str) -> Result<u32> {
        match self.accessor(name)? {
            Accessor::Whole(ri) => self.io.read(self.regs[ri].addr),
            Accessor::Field(ri, fi) => {
                let field = &self.regs[ri].fields[fi];
                let bit = self.read_bit(self.regs[ri].addr, field.bit)?;
                Ok(if field.flip { bit ^ 1 } else { bit })
            }
        }
    }

    /// Write a register or bit field by name. Writing a read-only target
    /// fails with [`HalError::ReadOnly`] without touching the hardware.
    pub fn write(&self, name: &str, value: u32) -> Result<()> {
        match self.accessor(name)? {
            Accessor::Whole(ri) => {
                let reg = &self.regs[ri];
                if reg.ro {
                    return Err(HalError::ReadOnly(name.to_string()));
                }
                self.io.write(reg.addr, value)
            }
            Accessor::Field(ri, fi) => {
                let field = &self.regs[ri].fields[fi];
                if field.ro {
                    return Err(HalError::ReadOnly(name.to_string()));
                }
                let logical = value != 0;
                let raw = if field.flip { !logical } else { logical };
                self.write_bit(self.regs[ri].addr, field.bit, raw)
            }
        }
    }

    fn read_bit(&self, addr: u32, bit: u8) -> Result<u32> {
        Ok((self.io.read(addr)? >> bit) & 1)
    }

    /// The only bit-level primitive: read the full register, set or clear
    /// one bit, write the full register back.
    fn write_bit(&self, addr: u32, bit: u8, value: bool) -> Result<()> {
        let mut regval = self.io.read(addr)?;
        if value {
            regval |= 1 << bit;
        } else {
            regval &= !(1 << bit);
        }
        self.io.write(addr, regval)
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Snapshot every accessor. A failing read records `None` instead of
    /// aborting the snapshot.
    pub fn diag(&self) -> Vec<RegDiag> {
        self.names
            .iter()
            .copied()
            .map(|name| {
                let addr = match self.accessors[name] {
                    Accessor::Whole(ri) | Accessor::Field(ri, _) => self.regs[ri].addr,
                };
                RegDiag {
                    name,
                    addr,
                    value: self.read(name).ok(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backing store with one address wired to fail.
    struct FakeIo {
        regs: Mutex<HashMap<u32, u32>>,
        bad_addr: u32,
    }

    impl FakeIo {
        fn new() -> Arc<Self> {
            let mut regs = HashMap::new();
            regs.insert(0x01, 42);
            regs.insert(0x02, 0);
            regs.insert(0x03, 0b1010);
            regs.insert(0x05, 0);
            Arc::new(Self {
                regs: Mutex::new(regs),
                bad_addr: 0x04,
            })
        }

        fn raw(&self, addr: u32) -> u32 {
            self.regs.lock().unwrap()[&addr]
        }
    }

    impl RegisterIo for FakeIo {
        fn read(&self, addr: u32) -> Result<u32> {
            if addr == self.bad_addr {
                return Err(HalError::Missing(format!("register {:#x}", addr)));
            }
            Ok(self.raw(addr))
        }

        fn write(&self, addr: u32, value: u32) -> Result<()> {
            if addr == self.bad_addr {
                return Err(HalError::Missing(format!("register {:#x}", addr)));
            }
            self.regs.lock().unwrap().insert(addr, value);
            Ok(())
        }
    }

    static CONTROL_FIELDS: &[RegBitFieldDesc] = &[
        RegBitFieldDesc::new(0, "write_ok").rw(),
        RegBitFieldDesc::new(1, "fail_write"),
    ];
    static STATUS_FIELDS: &[RegBitFieldDesc] = &[
        RegBitFieldDesc::new(0, "should_be_zero"),
        RegBitFieldDesc::new(1, "should_be_one"),
        RegBitFieldDesc::new(2, "invert_zero").flipped(),
        RegBitFieldDesc::new(3, "invert_one").flipped(),
    ];
    static SCRATCH_FIELDS: &[RegBitFieldDesc] = &[RegBitFieldDesc::new(3, "bit3").rw()];
    static REGS: &[RegisterDesc] = &[
        RegisterDesc::new(0x01).named("revision").read_only(),
        RegisterDesc::new(0x02).fields(CONTROL_FIELDS),
        RegisterDesc::new(0x03).fields(STATUS_FIELDS),
        RegisterDesc::new(0x04).named("io_error"),
        RegisterDesc::new(0x05).named("scratchpad").fields(SCRATCH_FIELDS),
    ];

    fn map() -> (Arc<FakeIo>, RegisterMap) {
        let io = FakeIo::new();
        let map = RegisterMap::bind(REGS, io.clone()).unwrap();
        (io, map)
    }

    #[test]
    fn test_whole_register_read() {
        let (_, map) = map();
        assert_eq!(map.read("revision").unwrap(), 42);
    }

    #[test]
    fn test_read_modify_write_isolation() {
        let (_, map) = map();
        assert_eq!(map.read("scratchpad").unwrap(), 0);

        map.write("scratchpad", 1 << 3).unwrap();
        assert_eq!(map.read("bit3").unwrap(), 1);

        map.write("bit3", 0).unwrap();
        assert_eq!(map.read("scratchpad").unwrap(), 0);

        map.write("scratchpad", 0xff).unwrap();
        map.write("bit3", 0).unwrap();
        assert_eq!(map.read("scratchpad").unwrap(), 0xf7);
        map.write("bit3", 1).unwrap();
        assert_eq!(map.read("scratchpad").unwrap(), 0xff);
    }

    #[test]
    fn test_flip_round_trip() {
        let (io, map) = map();
        assert_eq!(map.read("should_be_zero").unwrap(), 0);
        assert_eq!(map.read("should_be_one").unwrap(), 1);
        // raw bits 2 and 3 are 0 and 1; flipped reads invert
        assert_eq!(map.read("invert_zero").unwrap(), 1);
        assert_eq!(map.read("invert_one").unwrap(), 0);

        // writing logical 1 through a flipped rw field clears the raw bit
        static FLIP_RW: &[RegBitFieldDesc] = &[RegBitFieldDesc::new(2, "lowtrue").rw().flipped()];
        static FLIP_REGS: &[RegisterDesc] = &[RegisterDesc::new(0x03).fields(FLIP_RW)];
        let map = RegisterMap::bind(FLIP_REGS, io.clone()).unwrap();
        map.write("lowtrue", 1).unwrap();
        assert_eq!(io.raw(0x03) & (1 << 2), 0);
        assert_eq!(map.read("lowtrue").unwrap(), 1);
    }

    #[test]
    fn test_read_only_write_fails_without_mutation() {
        let (io, map) = map();
        assert!(matches!(
            map.write("fail_write", 1),
            Err(HalError::ReadOnly(_))
        ));
        assert_eq!(io.raw(0x02), 0);

        assert!(matches!(
            map.write("revision", 7),
            Err(HalError::ReadOnly(_))
        ));
        assert_eq!(io.raw(0x01), 42);

        map.write("write_ok", 1).unwrap();
        assert_eq!(io.raw(0x02), 1);
    }

    #[test]
    fn test_io_error_propagates_on_access() {
        let (_, map) = map();
        assert!(map.read("io_error").is_err());
        assert!(map.write("io_error", 42).is_err());
    }

    #[test]
    fn test_unknown_name() {
        let (_, map) = map();
        assert!(matches!(
            map.read("bogus"),
            Err(HalError::UnknownRegister(_))
        ));
    }

    #[test]
    fn test_duplicate_name_is_config_error() {
        static DUP: &[RegisterDesc] = &[
            RegisterDesc::new(0x01).named("twice"),
            RegisterDesc::new(0x02).named("twice"),
        ];
        let io = FakeIo::new();
        assert!(matches!(
            RegisterMap::bind(DUP, io),
            Err(HalError::Config(_))
        ));
    }

    #[test]
    fn test_diag_survives_bad_register() {
        let (_, map) = map();
        let diag = map.diag();
        let bad = diag.iter().find(|d| d.name == "io_error").unwrap();
        assert_eq!(bad.value, None);
        let good = diag.iter().find(|d| d.name == "revision").unwrap();
        assert_eq!(good.value, Some(42));
    }
}
