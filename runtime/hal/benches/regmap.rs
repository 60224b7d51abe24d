//! Register map accessor overhead against an in-memory backing store.

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::{Arc, Mutex};

use criterion::{criterion_group, criterion_main, Criterion};

use baseplate_hal::register::{RegBitFieldDesc, RegisterDesc, RegisterIo, RegisterMap};
use baseplate_hal::Result;

struct MemIo {
    regs: Mutex<HashMap<u32, u32>>,
}

impl RegisterIo for MemIo {
    fn read(&self, addr: u32) -> Result<u32> {
        Ok(*self.regs.lock().unwrap().entry(addr).or_insert(0))
    }

    fn write(&self, addr: u32, value: u32) -> Result<()> {
        self.regs.lock().unwrap().insert(addr, value);
        Ok(())
    }
}

static FIELDS: &[RegBitFieldDesc] = &[
    RegBitFieldDesc::new(0, "enable").rw(),
    RegBitFieldDesc::new(1, "fault"),
    RegBitFieldDesc::new(2, "present").flipped(),
];
static REGS: &[RegisterDesc] = &[
    RegisterDesc::new(0x0100).named("control").fields(FIELDS),
    RegisterDesc::new(0x0104).named("scratch"),
];

fn bench_regmap(c: &mut Criterion) {
    let io = Arc::new(MemIo {
        regs: Mutex::new(HashMap::new()),
    });
    let map = RegisterMap::bind(REGS, io).unwrap();

    c.bench_function("field_read", |b| {
        b.iter(|| black_box(map.read("present").unwrap()))
    });

    c.bench_function("field_rmw_write", |b| {
        b.iter(|| map.write("enable", black_box(1)).unwrap())
    });

    c.bench_function("whole_register_write", |b| {
        b.iter(|| map.write("scratch", black_box(0xdead_beef)).unwrap())
    });
}

criterion_group!(benches, bench_regmap);
criterion_main!(benches);
