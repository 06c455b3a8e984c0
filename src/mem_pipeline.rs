//! The memory pipeline: Decode, Execute, TLB and ReadWrite stages carrying
//! one memory instruction per cycle from the reservation station to an
//! execute result.

use crate::inst::{ExecuteEntry, InstType, Receipt, ValueOrTag};
use crate::mem_op::{Exception, MemErrorCode, MemOp};
use crate::reservation::LoadReservation;
use crate::rob::ExecuteResult;
use crate::sma::{apply_bypass, ReadRequest, ReadResponse, ReadType, SmaReader};
use crate::store_queue::{StoreId, StoreQueue, WriteType};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TlbRequest {
    pub vaddress: u32,
    pub write: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TlbResponse {
    pub paddress: u32,
    pub error: Option<MemErrorCode>,
}

/// Translation port to the external DTLB. Polled once per cycle while a
/// request is outstanding; `None` means the walk has not finished.
pub trait DtlbPort {
    fn translate(&mut self, req: TlbRequest) -> Option<TlbResponse>;
}

/// Bare-mode translation: physical equals virtual, never faults.
#[derive(Debug, Clone, Default)]
pub struct IdentityDtlb;

impl DtlbPort for IdentityDtlb {
    fn translate(&mut self, req: TlbRequest) -> Option<TlbResponse> {
        Some(TlbResponse {
            paddress: req.vaddress,
            error: None,
        })
    }
}

mod stages {
    use crate::inst::Receipt;
    use crate::mem_op::{MemErrorCode, MemOp};

    #[derive(Debug, Clone)]
    pub struct Decoded {
        pub op: MemOp,
        pub add1: u32,
        pub add2: u32,
        /// Store data.
        pub op1: u64,
        pub rd: Receipt,
        pub pc: u32,
        pub next: u32,
        pub error: Option<MemErrorCode>,
        pub valid: bool,
    }

    #[derive(Debug, Clone)]
    pub struct Executed {
        pub op: MemOp,
        pub op1: u64,
        pub vaddress: u32,
        pub rd: Receipt,
        pub pc: u32,
        pub next: u32,
        pub error: Option<MemErrorCode>,
        pub valid: bool,
    }

    #[derive(Debug, Clone)]
    pub struct Translated {
        pub op: MemOp,
        pub op1: u64,
        pub vaddress: u32,
        pub paddress: u32,
        pub rd: Receipt,
        pub pc: u32,
        pub next: u32,
        pub error: Option<MemErrorCode>,
        pub valid: bool,
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum TlbState {
    #[default]
    Idle,
    Busy,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum RwState {
    #[default]
    Idle,
    ReadBottom,
    ReadTop,
    WriteBottom,
    WriteTop,
}

/// External collaborators sampled for one cycle.
pub struct MemPipelineIo<'a> {
    pub dtlb: &'a mut dyn DtlbPort,
    pub sma: &'a mut dyn SmaReader,
    pub stores: &'a mut StoreQueue,
    pub reservation: &'a mut LoadReservation,
    pub recover: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemPipeline {
    decoded: Option<stages::Decoded>,
    executed: Option<stages::Executed>,
    translated: Option<stages::Translated>,
    current: Option<stages::Translated>,
    tlb_state: TlbState,
    rw_state: RwState,
    read_result: u64,
    write_data: u64,
    store_ids: [StoreId; 2],
}

impl MemPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The decode slot is free, a new instruction may issue this cycle.
    pub fn can_issue(&self) -> bool {
        self.decoded.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.decoded.is_none()
            && self.executed.is_none()
            && self.translated.is_none()
            && self.current.is_none()
    }

    /// Decode stage: select the operation and the address addends. An
    /// invalid entry still produces an output and rides the pipeline down
    /// as a bubble.
    pub fn issue(&mut self, entry: &ExecuteEntry) {
        debug_assert!(self.can_issue(), "issue into an occupied decode slot");

        let take = |slot: ValueOrTag| match slot.value() {
            Some(v) => v,
            None => {
                debug_assert!(!entry.valid, "fired entry with a pending operand");
                0
            }
        };

        let op = MemOp::select(entry.ty, entry.func3, entry.func7);
        let add2 = match entry.ty {
            // LR, SC and AMO address straight off rs1.
            InstType::I | InstType::S => entry.imm,
            _ => 0,
        };

        log::trace!("memory decode: {:?} pc={:#010x}", op, entry.pc);
        self.decoded = Some(stages::Decoded {
            op,
            add1: take(entry.rs1) as u32,
            add2,
            op1: take(entry.rs2),
            rd: entry.rd,
            pc: entry.pc,
            next: entry.next,
            error: entry.error,
            valid: entry.valid,
        });
    }

    /// One cycle for the whole pipeline. Stages run back to front so an
    /// entry moves at most one register per tick.
    pub fn tick(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        if io.recover {
            self.recover();
        }

        let result = self.rw_tick(io);
        self.tlb_tick(io);
        self.execute_tick();
        result
    }

    /// Invalidate everything in flight. The TLB FSM keeps going so an
    /// outstanding walk completes; the ReadWrite FSM is snapped out of a
    /// write state so a speculative store never allocates a receipt.
    fn recover(&mut self) {
        if let Some(e) = &mut self.decoded {
            e.valid = false;
        }
        if let Some(e) = &mut self.executed {
            e.valid = false;
        }
        if let Some(e) = &mut self.translated {
            e.valid = false;
        }
        if let Some(e) = &mut self.current {
            e.valid = false;
        }

        if matches!(self.rw_state, RwState::WriteBottom | RwState::WriteTop) {
            self.rw_state = RwState::Idle;
            self.current = None;
        }
    }

    fn execute_tick(&mut self) {
        if self.executed.is_some() {
            return;
        }
        let Some(d) = self.decoded.take() else {
            return;
        };

        let vaddress = d.add1.wrapping_add(d.add2);
        let misaligned = if d.op.is_word() || d.op.is_double() {
            vaddress & 0b11 != 0
        } else if d.op.is_half() {
            vaddress & 0b1 != 0
        } else {
            false
        };

        self.executed = Some(stages::Executed {
            op: d.op,
            op1: d.op1,
            vaddress,
            rd: d.rd,
            pc: d.pc,
            next: d.next,
            error: d.error.or(misaligned.then_some(MemErrorCode::Misaligned)),
            valid: d.valid,
        });
    }

    fn tlb_tick(&mut self, io: &mut MemPipelineIo) {
        // Only poll when the output register can take the answer; while it
        // is occupied the port sees ready low.
        if self.translated.is_some() {
            return;
        }

        let Some(entry) = &self.executed else {
            return;
        };

        if self.tlb_state == TlbState::Idle && !entry.valid {
            // Bubbles skip translation.
            let e = self.executed.take().expect("checked above");
            self.translated = Some(promote(e, 0, None));
            return;
        }

        let req = TlbRequest {
            vaddress: entry.vaddress,
            write: entry.op.writes_memory(),
        };
        match io.dtlb.translate(req) {
            Some(resp) => {
                let e = self.executed.take().expect("checked above");
                // A pre-existing misalignment dominates any TLB error.
                let error = e.error.or(resp.error);
                self.translated = Some(promote(e, resp.paddress, error));
                self.tlb_state = TlbState::Idle;
            }
            None => self.tlb_state = TlbState::Busy,
        }
    }

    fn rw_tick(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        match self.rw_state {
            RwState::Idle => {
                let entry = self.translated.take()?;
                self.begin(entry, io)
            }
            RwState::ReadBottom => self.read_bottom(io),
            RwState::ReadTop => self.read_top(io),
            RwState::WriteBottom => self.write_bottom(io),
            RwState::WriteTop => self.write_top(io),
        }
    }

    fn begin(
        &mut self,
        entry: stages::Translated,
        io: &mut MemPipelineIo,
    ) -> Option<(Receipt, ExecuteResult)> {
        if !entry.valid {
            // Bubble drained.
            return None;
        }

        log::trace!(
            "readwrite: {:?} pc={:#010x} paddr={:#010x}",
            entry.op,
            entry.pc,
            entry.paddress
        );

        if let Some(error) = entry.error {
            let store = entry.op.writes_memory();
            return Some(fault(&entry, Exception::from_error(error, store)));
        }
        if entry.op == MemOp::Undefined {
            return Some(fault(&entry, Exception::IllegalInstruction));
        }

        if entry.op.is_read() || entry.op.is_amo() {
            self.rw_state = RwState::ReadBottom;
            self.current = Some(entry);
            return None;
        }

        // Writes. A store-conditional first settles against the
        // reservation, which it consumes either way.
        if entry.op == MemOp::Sc {
            let ok = io.reservation.check(entry.vaddress);
            io.reservation.clear();
            if !ok {
                return Some(finish(&entry, 1, false, self.store_ids));
            }
        }

        self.write_data = entry.op1;
        self.rw_state = RwState::WriteBottom;
        self.current = Some(entry);
        None
    }

    fn read_bottom(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        let entry = self.current.clone().expect("readBottom without an entry");
        let resp = read_port(
            io,
            ReadRequest {
                address: entry.paddress,
                ty: read_type(entry.op),
            },
        )?;

        if !entry.valid {
            // Recovery hit while the read was in flight; the data is
            // discarded but the port transaction stays clean.
            self.reset();
            return None;
        }
        if resp.error {
            self.reset();
            return Some(fault(&entry, Exception::LoadAccessFault));
        }

        match entry.op {
            MemOp::Ld => {
                self.read_result = resp.data as u64;
                self.rw_state = RwState::ReadTop;
                None
            }
            op if op.is_amo() => {
                self.read_result = resp.data as u64;
                self.write_data = amo_combine(op, resp.data, entry.op1 as u32) as u64;
                self.rw_state = RwState::WriteBottom;
                None
            }
            MemOp::Lr => {
                io.reservation.set(entry.vaddress);
                self.reset();
                Some(finish(&entry, resp.data as u64, false, self.store_ids))
            }
            op => {
                self.reset();
                Some(finish(&entry, extend(op, resp.data), false, self.store_ids))
            }
        }
    }

    fn read_top(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        let entry = self.current.clone().expect("readTop without an entry");
        let resp = read_port(
            io,
            ReadRequest {
                address: entry.paddress.wrapping_add(4),
                ty: ReadType::Word,
            },
        )?;

        if !entry.valid {
            self.reset();
            return None;
        }
        if resp.error {
            self.reset();
            return Some(fault(&entry, Exception::LoadAccessFault));
        }

        let value = self.read_result | (resp.data as u64) << 32;
        self.reset();
        Some(finish(&entry, value, false, self.store_ids))
    }

    fn write_bottom(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        let entry = self.current.clone().expect("writeBottom without an entry");
        debug_assert!(entry.valid, "speculative store survived recovery");

        let id = io
            .stores
            .try_alloc(write_type(entry.op), entry.paddress, self.write_data as u32)?;
        self.store_ids = [id, id];

        if entry.op == MemOp::Sd {
            self.rw_state = RwState::WriteTop;
            return None;
        }

        let value = if entry.op.is_amo() {
            self.read_result
        } else {
            // Plain stores and a successful sc both report zero.
            0
        };
        let ids = self.store_ids;
        self.reset();
        Some(finish(&entry, value, true, ids))
    }

    fn write_top(&mut self, io: &mut MemPipelineIo) -> Option<(Receipt, ExecuteResult)> {
        let entry = self.current.clone().expect("writeTop without an entry");

        let id = io.stores.try_alloc(
            WriteType::Word,
            entry.paddress.wrapping_add(4),
            (self.write_data >> 32) as u32,
        )?;
        self.store_ids[1] = id;

        let ids = self.store_ids;
        self.reset();
        Some(finish(&entry, 0, true, ids))
    }

    fn reset(&mut self) {
        self.rw_state = RwState::Idle;
        self.current = None;
    }
}

fn promote(e: stages::Executed, paddress: u32, error: Option<MemErrorCode>) -> stages::Translated {
    stages::Translated {
        op: e.op,
        op1: e.op1,
        vaddress: e.vaddress,
        paddress,
        rd: e.rd,
        pc: e.pc,
        next: e.next,
        error,
        valid: e.valid,
    }
}

fn read_port(io: &mut MemPipelineIo, req: ReadRequest) -> Option<ReadResponse> {
    let resp = io.sma.read(req)?;
    Some(apply_bypass(resp, io.stores, req))
}

fn read_type(op: MemOp) -> ReadType {
    if op.is_byte() {
        ReadType::Byte
    } else if op.is_half() {
        ReadType::Half
    } else {
        ReadType::Word
    }
}

fn write_type(op: MemOp) -> WriteType {
    if op.is_byte() {
        WriteType::Byte
    } else if op.is_half() {
        WriteType::Half
    } else {
        WriteType::Word
    }
}

/// Widen a completed read to the architectural result.
fn extend(op: MemOp, data: u32) -> u64 {
    match op {
        MemOp::Lb => data as u8 as i8 as i32 as u32 as u64,
        MemOp::Lbu => (data & 0xff) as u64,
        MemOp::Lh => data as u16 as i16 as i32 as u32 as u64,
        MemOp::Lhu => (data & 0xffff) as u64,
        _ => data as u64,
    }
}

/// The four sign cases for AMO min/max, spelled out the way the datapath
/// resolves them.
fn signed_less(a: u32, b: u32) -> bool {
    match (a >> 31, b >> 31) {
        (0, 0) => a < b,
        (0, 1) => false,
        (1, 0) => true,
        (1, 1) => a < b,
        _ => unreachable!(),
    }
}

fn amo_combine(op: MemOp, memory: u32, operand: u32) -> u32 {
    match op {
        MemOp::AmoSwap => operand,
        MemOp::AmoAdd => memory.wrapping_add(operand),
        MemOp::AmoXor => memory ^ operand,
        MemOp::AmoAnd => memory & operand,
        MemOp::AmoOr => memory | operand,
        MemOp::AmoMin => {
            if signed_less(memory, operand) {
                memory
            } else {
                operand
            }
        }
        MemOp::AmoMax => {
            if signed_less(memory, operand) {
                operand
            } else {
                memory
            }
        }
        MemOp::AmoMinu => memory.min(operand),
        MemOp::AmoMaxu => memory.max(operand),
        _ => unreachable!("not an atomic: {:?}", op),
    }
}

fn fault(entry: &stages::Translated, code: Exception) -> (Receipt, ExecuteResult) {
    (
        entry.rd,
        ExecuteResult {
            real: entry.next,
            exception: Some(code),
            ..Default::default()
        },
    )
}

fn finish(
    entry: &stages::Translated,
    value: u64,
    write: bool,
    store_ids: [StoreId; 2],
) -> (Receipt, ExecuteResult) {
    (
        entry.rd,
        ExecuteResult {
            result: value,
            real: entry.next,
            sc: entry.op == MemOp::Sc,
            lr: (entry.op == MemOp::Lr).then_some(entry.vaddress),
            write,
            store_ids,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amo_combine_table() {
        assert_eq!(amo_combine(MemOp::AmoSwap, 1, 2), 2);
        assert_eq!(amo_combine(MemOp::AmoAdd, 1, 2), 3);
        assert_eq!(amo_combine(MemOp::AmoXor, 0b1100, 0b1010), 0b0110);
        assert_eq!(amo_combine(MemOp::AmoAnd, 0b1100, 0b1010), 0b1000);
        assert_eq!(amo_combine(MemOp::AmoOr, 0b1100, 0b1010), 0b1110);

        // Signed comparisons across the sign table.
        let neg1 = -1i32 as u32;
        let neg2 = -2i32 as u32;
        assert_eq!(amo_combine(MemOp::AmoMin, neg1, 1), neg1);
        assert_eq!(amo_combine(MemOp::AmoMax, neg1, 1), 1);
        assert_eq!(amo_combine(MemOp::AmoMin, neg1, neg2), neg2);
        assert_eq!(amo_combine(MemOp::AmoMax, neg1, neg2), neg1);
        assert_eq!(amo_combine(MemOp::AmoMin, 3, 5), 3);

        // Unsigned treats the sign bit as magnitude.
        assert_eq!(amo_combine(MemOp::AmoMinu, neg1, 1), 1);
        assert_eq!(amo_combine(MemOp::AmoMaxu, neg1, 1), neg1);
    }

    #[test]
    fn test_extend_widths() {
        assert_eq!(extend(MemOp::Lb, 0x80), 0xffff_ff80);
        assert_eq!(extend(MemOp::Lbu, 0x80), 0x80);
        assert_eq!(extend(MemOp::Lh, 0x8000), 0xffff_8000);
        assert_eq!(extend(MemOp::Lhu, 0x8000), 0x8000);
        assert_eq!(extend(MemOp::Lw, 0x8000_0000), 0x8000_0000);
    }
}
