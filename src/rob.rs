use crate::inst::Receipt;
use crate::mem_op::Exception;
use crate::queue::ConfigError;
use crate::store_queue::StoreId;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CsrWrite {
    pub address: u16,
    pub data: u32,
}

/// What a functional unit hands back for one instruction. Everything the
/// retirement engine needs to commit or squash the instruction is in here;
/// nothing downstream re-executes.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub result: u64,
    /// Resolved next PC. Equals the fallthrough for non-control ops.
    pub real: u32,
    /// The instruction is a resolved branch or jump.
    pub branch: bool,
    pub exception: Option<Exception>,
    pub csr_write: Option<CsrWrite>,
    pub xret: bool,
    pub flush_dcache: bool,
    pub flush_icache: bool,
    pub flush_tlb: bool,
    pub sc: bool,
    /// A successful LR carries its reservation address.
    pub lr: Option<u32>,
    /// A write allocated store-queue receipts: one per 32-bit beat, low
    /// word first; single-beat writes carry the same id twice.
    pub write: bool,
    pub store_ids: [StoreId; 2],
}

impl ExecuteResult {
    pub fn flushes(&self) -> bool {
        self.flush_dcache || self.flush_icache || self.flush_tlb
    }
}

/// One reorder-buffer slot. Minted at issue with `valid` set, completed by
/// a functional unit which fills `result` and raises `commit`, consumed by
/// retirement which returns the slot to the allocator.
#[derive(Debug, Clone, Default)]
pub struct RobEntry {
    pub valid: bool,
    pub commit: bool,
    pub pc: u32,
    /// Next PC predicted at fetch; a mismatch against `result.real` is the
    /// sole misprediction signal.
    pub spec: u32,
    /// Fallthrough next PC, for training the branch predictor.
    pub next: u32,
    /// Architectural destination register.
    pub rd: u8,
    pub result: ExecuteResult,
}

/// Circular reorder buffer. Slots pair up into two-wide retirement rows;
/// the slot index is the receipt handed to the producing instruction.
#[derive(Debug, Clone)]
pub struct Rob {
    slots: Vec<RobEntry>,
    /// Next retirement slot, always row-aligned.
    head: usize,
    /// Next allocation slot.
    tail: usize,
    used: usize,
}

impl Rob {
    pub fn new(depth: usize) -> Result<Self, ConfigError> {
        if depth == 0 {
            return Err(ConfigError::BadDepth(depth));
        }
        if depth % 2 != 0 {
            return Err(ConfigError::UnevenDepth(depth));
        }

        Ok(Self {
            slots: vec![RobEntry::default(); depth],
            head: 0,
            tail: 0,
            used: 0,
        })
    }

    pub fn is_full(&self) -> bool {
        self.used == self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn alloc(&mut self, pc: u32, spec: u32, next: u32, rd: u8) -> Option<Receipt> {
        if self.is_full() {
            return None;
        }

        let receipt = Receipt::from(self.tail);
        self.slots[self.tail] = RobEntry {
            valid: true,
            commit: false,
            pc,
            spec,
            next,
            rd,
            result: ExecuteResult::default(),
        };
        self.tail = (self.tail + 1) % self.slots.len();
        self.used += 1;
        Some(receipt)
    }

    /// Functional-unit write-back. A result for a slot that recovery has
    /// already cleared is discarded.
    pub fn complete(&mut self, receipt: Receipt, result: ExecuteResult) {
        let entry = &mut self.slots[receipt.index()];
        if !entry.valid {
            return;
        }
        entry.result = result;
        entry.commit = true;
    }

    /// Two-wide retirement port: the head row and its base index, but only
    /// once every allocated slot in the row has committed. The low bit of
    /// the index selects the slot.
    pub fn retire_port(&self) -> Option<(u32, [RobEntry; 2])> {
        if self.is_empty() {
            return None;
        }

        let lo = self.slots[self.head].clone();
        // Allocation is sequential from the head, so the second slot is
        // occupied exactly when at least two entries are live.
        let hi = if self.used >= 2 {
            self.slots[(self.head + 1) % self.slots.len()].clone()
        } else {
            RobEntry::default()
        };

        let done = |e: &RobEntry| !e.valid || e.commit;
        if !(done(&lo) && done(&hi)) {
            return None;
        }

        Some((self.head as u32, [lo, hi]))
    }

    /// Acknowledge the head row. The allocation pointer skips over an
    /// unallocated second slot, keeping retirement row-aligned.
    pub fn pop_row(&mut self) {
        debug_assert!(!self.is_empty(), "popped an empty reorder buffer");

        let second = (self.head + 1) % self.slots.len();
        let mut freed = 1;
        self.slots[self.head] = RobEntry::default();
        if self.used >= 2 {
            self.slots[second] = RobEntry::default();
            freed = 2;
        } else {
            // The second slot was never allocated; skip it so the next
            // allocation starts a fresh row.
            self.tail = (second + 1) % self.slots.len();
        }

        self.head = (self.head + 2) % self.slots.len();
        self.used -= freed;
    }

    /// Recovery: every remaining entry is speculative, drop them all.
    pub fn recover(&mut self) {
        for slot in &mut self.slots {
            *slot = RobEntry::default();
        }
        self.head = 0;
        self.tail = 0;
        self.used = 0;
    }
}
