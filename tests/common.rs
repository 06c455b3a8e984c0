//! Shared helpers for the integration suites: entry builders, port test
//! doubles and a cycle-stepping harness.
#![allow(dead_code)]

use bergamot::backend::{Backend, TickInput};
use bergamot::inst::{ExecuteEntry, InstType, QueueKind, ValueOrTag};
use bergamot::mem_pipeline::{DtlbPort, TlbRequest, TlbResponse};
use bergamot::mem_op::MemErrorCode;
use bergamot::retire::RetireOutput;
use bergamot::rob::ExecuteResult;
use bergamot::sma::{Ram, ReadRequest, ReadResponse, SmaReader, SmaWriter, WriteRequest};

pub fn mem_entry(
    ty: InstType,
    func3: u8,
    func7: u8,
    rs1: u64,
    rs2: u64,
    imm: u32,
    pc: u32,
) -> ExecuteEntry {
    ExecuteEntry {
        ty,
        kind: QueueKind::Memory,
        rs1: ValueOrTag::Valid(rs1),
        rs2: ValueOrTag::Valid(rs2),
        func3,
        func7,
        imm,
        pc,
        spec: pc.wrapping_add(4),
        next: pc.wrapping_add(4),
        valid: true,
        ..Default::default()
    }
}

pub fn load_word(address: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::I, 0b010, 0, address as u64, 0, 0, pc)
}

pub fn load_double(address: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::I, 0b011, 0, address as u64, 0, 0, pc)
}

pub fn store_word(address: u32, value: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::S, 0b010, 0, address as u64, value as u64, 0, pc)
}

pub fn store_double(address: u32, value: u64, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::S, 0b011, 0, address as u64, value, 0, pc)
}

pub fn load_reserved(address: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::R, 0b010, 0b00010 << 2, address as u64, 0, 0, pc)
}

pub fn store_conditional(address: u32, value: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::R, 0b010, 0b00011 << 2, address as u64, value as u64, 0, pc)
}

pub fn amo(funct5: u8, address: u32, value: u32, pc: u32) -> ExecuteEntry {
    mem_entry(InstType::R, 0b010, funct5 << 2, address as u64, value as u64, 0, pc)
}

/// An instruction executed by a unit outside the backend; it only passes
/// through the reorder buffer.
pub fn alu_entry(pc: u32) -> ExecuteEntry {
    ExecuteEntry {
        ty: InstType::R,
        kind: QueueKind::Arithmetic,
        pc,
        spec: pc.wrapping_add(4),
        next: pc.wrapping_add(4),
        valid: true,
        ..Default::default()
    }
}

pub fn plain_result(real: u32, value: u64) -> ExecuteResult {
    ExecuteResult {
        result: value,
        real,
        ..Default::default()
    }
}

/// RAM whose write port can be held busy, to keep entries parked in the
/// store queue.
pub struct StickyRam {
    pub ram: Ram,
    pub writable: bool,
}

impl StickyRam {
    pub fn new(ram: Ram) -> Self {
        Self {
            ram,
            writable: true,
        }
    }
}

impl SmaReader for StickyRam {
    fn read(&mut self, req: ReadRequest) -> Option<ReadResponse> {
        self.ram.read(req)
    }
}

impl SmaWriter for StickyRam {
    fn write(&mut self, req: WriteRequest) -> bool {
        self.writable && self.ram.write(req)
    }
}

/// Identity translation that answers after a fixed number of polls.
pub struct SlowDtlb {
    pub latency: u32,
    counter: u32,
}

impl SlowDtlb {
    pub fn new(latency: u32) -> Self {
        Self {
            latency,
            counter: 0,
        }
    }
}

impl DtlbPort for SlowDtlb {
    fn translate(&mut self, req: TlbRequest) -> Option<TlbResponse> {
        if self.counter < self.latency {
            self.counter += 1;
            return None;
        }

        self.counter = 0;
        Some(TlbResponse {
            paddress: req.vaddress,
            error: None,
        })
    }
}

/// Translation that faults every access.
pub struct FaultDtlb;

impl DtlbPort for FaultDtlb {
    fn translate(&mut self, req: TlbRequest) -> Option<TlbResponse> {
        Some(TlbResponse {
            paddress: req.vaddress,
            error: Some(MemErrorCode::PageFault),
        })
    }
}

/// Tick with no new work, collecting the cycles where retirement acted.
pub fn run_cycles<M: SmaReader + SmaWriter>(
    backend: &mut Backend,
    dtlb: &mut dyn DtlbPort,
    mem: &mut M,
    cycles: usize,
) -> Vec<RetireOutput> {
    let mut outs = Vec::new();
    for _ in 0..cycles {
        let out = backend.tick(TickInput::default(), dtlb, mem);
        if out.retire.ready || out.retire.recover {
            outs.push(out.retire);
        }
    }
    outs
}
