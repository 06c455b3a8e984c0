//! In-order retirement: drains the reorder buffer two slots per cycle,
//! commits architectural effects, detects mispredictions, delivers precise
//! exceptions and sequences cache/TLB fences.

use crate::mem_op::Exception;
use crate::reservation::ReservationUpdate;
use crate::rob::{CsrWrite, Rob, RobEntry};
use crate::store_queue::StoreId;

/// Flush-completion lines from the caches and the TLB: high when drained.
#[derive(Debug, Copy, Clone, Default)]
pub struct FlushEmpty {
    pub dcache: bool,
    pub icache: bool,
    pub tlb: bool,
}

/// Redirect targets owned by the CSR file.
#[derive(Debug, Copy, Clone, Default)]
pub struct TrapTargets {
    /// Where an exception steers fetch.
    pub exception: u32,
    /// Where xRET returns to.
    pub xret: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegWrite {
    pub rd: u8,
    pub value: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PredictorUpdate {
    pub pc: u32,
    pub target: u32,
    pub jump: bool,
}

/// Everything retirement drives in one cycle. Consumers apply register,
/// CSR, predictor, store-queue and reservation effects in this order; all
/// of them are in program order by construction.
#[derive(Debug, Clone, Default)]
pub struct RetireOutput {
    /// The ROB row was consumed this cycle.
    pub ready: bool,
    pub recover: bool,
    /// Meaningful when `recover` is set.
    pub correct_pc: u32,
    pub xret: bool,
    pub exception: Option<(u32, Exception)>,
    pub reg_writes: Vec<RegWrite>,
    pub csr_write: Option<CsrWrite>,
    pub predictor: Vec<PredictorUpdate>,
    pub store_commits: Vec<StoreId>,
    pub reservation: Vec<ReservationUpdate>,
    pub flush_dcache: bool,
    pub flush_icache: bool,
    pub flush_tlb: bool,
    /// Instructions architecturally retired this cycle.
    pub retired: u32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum RetireState {
    #[default]
    Retire,
    DCache,
    ICache,
    Tlb,
}

#[derive(Debug, Clone, Default)]
pub struct RetireEngine {
    state: RetireState,
    /// Which slot of the held row triggered the flush.
    flush_id: usize,
    flush_real: u32,
    flush_dcache: bool,
    flush_icache: bool,
    flush_tlb: bool,
    /// The request line has been up for at least one cycle in this state.
    flush_requested: bool,
}

impl RetireEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, rob: &mut Rob, empty: FlushEmpty, traps: TrapTargets) -> RetireOutput {
        let mut out = RetireOutput::default();

        match self.state {
            RetireState::Retire => self.retire_row(rob, traps, &mut out),
            RetireState::DCache => {
                out.flush_dcache = true;
                if self.flush_requested && empty.dcache {
                    self.advance_flush(rob, &mut out);
                } else {
                    self.flush_requested = true;
                }
            }
            RetireState::ICache => {
                out.flush_icache = true;
                if self.flush_requested && empty.icache {
                    self.advance_flush(rob, &mut out);
                } else {
                    self.flush_requested = true;
                }
            }
            RetireState::Tlb => {
                out.flush_tlb = true;
                if self.flush_requested && empty.tlb {
                    self.advance_flush(rob, &mut out);
                } else {
                    self.flush_requested = true;
                }
            }
        }

        out
    }

    fn retire_row(&mut self, rob: &mut Rob, traps: TrapTargets, out: &mut RetireOutput) {
        let Some((index, row)) = rob.retire_port() else {
            return;
        };
        log::trace!("retire row at index {index}");

        for (slot, entry) in row.iter().enumerate() {
            if !entry.valid {
                continue;
            }
            let r = &entry.result;

            if let Some(code) = r.exception {
                log::debug!("exception {:?} at pc={:#010x}", code, entry.pc);
                out.exception = Some((entry.pc, code));
                out.recover = true;
                out.correct_pc = traps.exception;
                break;
            }

            if r.xret {
                out.recover = true;
                out.xret = true;
                out.correct_pc = traps.xret;
                out.retired += 1;
                break;
            }

            if let Some(csr) = r.csr_write {
                // xCSR is serializing: restart the front end right after it.
                out.csr_write = Some(csr);
                out.reg_writes.push(RegWrite {
                    rd: entry.rd,
                    value: r.result,
                });
                out.recover = true;
                out.correct_pc = r.real;
                out.retired += 1;
                break;
            }

            if entry.spec != r.real {
                log::debug!(
                    "mispredict at pc={:#010x}: spec={:#010x} real={:#010x}",
                    entry.pc,
                    entry.spec,
                    r.real
                );
                Self::commit_effects(entry, out);
                out.recover = true;
                out.correct_pc = r.real;
                out.retired += 1;
                break;
            }

            if r.flushes() {
                self.state = match () {
                    _ if r.flush_dcache => RetireState::DCache,
                    _ if r.flush_icache => RetireState::ICache,
                    _ => RetireState::Tlb,
                };
                self.flush_id = slot;
                self.flush_real = r.real;
                self.flush_dcache = r.flush_dcache;
                self.flush_icache = r.flush_icache;
                self.flush_tlb = r.flush_tlb;
                self.flush_requested = false;
                out.retired += 1;
                // The row is held until the fence sequence completes.
                return;
            }

            Self::commit_effects(entry, out);
            out.retired += 1;
        }

        out.ready = true;
        rob.pop_row();
    }

    /// The ordinary architectural effects of one committing instruction.
    fn commit_effects(entry: &RobEntry, out: &mut RetireOutput) {
        let r = &entry.result;

        out.reg_writes.push(RegWrite {
            rd: entry.rd,
            value: r.result,
        });

        if r.branch {
            out.predictor.push(PredictorUpdate {
                pc: entry.pc,
                target: r.real,
                jump: r.real != entry.next,
            });
        }

        if let Some(address) = r.lr {
            out.reservation.push(ReservationUpdate {
                load: true,
                address,
                valid: true,
            });
        }
        if r.sc {
            out.reservation.push(ReservationUpdate {
                load: false,
                address: 0,
                valid: false,
            });
        }

        if r.write {
            out.store_commits.push(r.store_ids[0]);
            out.store_commits.push(r.store_ids[1]);
        }
    }

    /// Move past the flush stage that just drained; after the last one,
    /// redirect fetch and release the row.
    fn advance_flush(&mut self, rob: &mut Rob, out: &mut RetireOutput) {
        self.flush_requested = false;
        self.state = match self.state {
            RetireState::DCache if self.flush_icache => RetireState::ICache,
            RetireState::DCache if self.flush_tlb => RetireState::Tlb,
            RetireState::ICache if self.flush_tlb => RetireState::Tlb,
            _ => {
                log::debug!("fence complete, redirect to {:#010x}", self.flush_real);
                out.recover = true;
                out.correct_pc = self.flush_real;
                out.ready = true;
                rob.pop_row();
                RetireState::Retire
            }
        };
    }
}
