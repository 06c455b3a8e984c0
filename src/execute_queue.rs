use crate::inst::{Broadcast, ExecuteEntry};
use crate::queue::{ConfigError, Ring};

/// Per-cycle inputs to a reservation station.
#[derive(Debug, Default)]
pub struct QueueInput<'a> {
    pub enq: Option<ExecuteEntry>,
    pub broadcasts: &'a [Broadcast],
    /// The functional unit can accept a firing this cycle.
    pub deq_ready: bool,
    pub recover: bool,
}

#[derive(Debug, Default)]
pub struct QueueOutput {
    pub fired: Option<ExecuteEntry>,
    pub accepted: bool,
}

/// Common contract of both reservation-station shapes: enqueue, fire,
/// broadcast wake-up and recovery, one step per cycle.
pub trait ExecuteQueue {
    fn tick(&mut self, input: QueueInput) -> QueueOutput;

    fn is_empty(&self) -> bool;

    /// Conservative: true means an enqueue this cycle would be rejected.
    fn is_full(&self) -> bool;
}

/// FIFO reservation station. Only the head may fire, so instructions leave
/// in issue order. Used for the memory subclass.
#[derive(Debug, Clone)]
pub struct InOrderQueue {
    entries: Ring<ExecuteEntry>,
}

impl InOrderQueue {
    pub fn new(depth: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            entries: Ring::new(depth)?,
        })
    }
}

impl ExecuteQueue for InOrderQueue {
    fn tick(&mut self, input: QueueInput) -> QueueOutput {
        if input.recover {
            for entry in self.entries.iter_mut() {
                entry.valid = false;
            }
        }

        for entry in self.entries.iter_mut() {
            entry.listen(input.broadcasts);
        }

        let mut fired = None;
        if input.deq_ready && self.entries.front().map(ExecuteEntry::ready).unwrap_or(false) {
            fired = self.entries.try_pop();
        }

        let mut accepted = false;
        if let Some(mut entry) = input.enq {
            if !input.recover {
                entry.listen(input.broadcasts);

                // Flow-through: an empty queue may fire the incoming entry
                // in the same cycle it arrives.
                if fired.is_none() && input.deq_ready && self.entries.is_empty() && entry.ready() {
                    fired = Some(entry);
                    accepted = true;
                } else if self.entries.try_push(entry).is_none() {
                    accepted = true;
                }
            }
        }

        QueueOutput { fired, accepted }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_full(&self) -> bool {
        self.entries.is_full()
    }
}

/// One cell of the out-of-order station: a data register plus a shadow
/// register, so the cell can accept a new entry in the same cycle the old
/// one moves on. `data` always holds the older of the two.
#[derive(Debug, Clone, Default)]
struct DoubleBuffer {
    data: Option<ExecuteEntry>,
    shadow: Option<ExecuteEntry>,
}

impl DoubleBuffer {
    fn can_accept(&self) -> bool {
        self.shadow.is_none()
    }

    fn push(&mut self, entry: ExecuteEntry) {
        if self.data.is_none() {
            self.data = Some(entry);
        } else {
            debug_assert!(self.shadow.is_none(), "push into a full cell");
            self.shadow = Some(entry);
        }
    }

    /// Dequeue the current entry; the shadow slides into its place keeping
    /// any broadcast matches it already captured.
    fn pop(&mut self) -> Option<ExecuteEntry> {
        let out = self.data.take();
        self.data = self.shadow.take();
        out
    }

    fn listen(&mut self, bus: &[Broadcast]) {
        if let Some(entry) = &mut self.data {
            entry.listen(bus);
        }
        if let Some(entry) = &mut self.shadow {
            entry.listen(bus);
        }
    }

    fn ready(&self) -> bool {
        self.data.as_ref().map(ExecuteEntry::ready).unwrap_or(false)
    }

    fn recover(&mut self) {
        if let Some(entry) = &mut self.data {
            entry.valid = false;
        }
        if let Some(entry) = &mut self.shadow {
            entry.valid = false;
        }
    }

    fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

/// Out-of-order reservation station: a chain of double-buffer cells.
/// Entries enter at cell 0 and migrate one cell tailward per cycle, so the
/// tail holds the oldest instruction. Fire arbitration scans tail to head
/// and picks the oldest ready entry, which maximises downstream wake-ups.
#[derive(Debug, Clone)]
pub struct OutOfOrderQueue {
    cells: Vec<DoubleBuffer>,
}

impl OutOfOrderQueue {
    pub fn new(depth: usize) -> Result<Self, ConfigError> {
        if depth == 0 {
            return Err(ConfigError::BadDepth(depth));
        }

        Ok(Self {
            cells: vec![DoubleBuffer::default(); depth],
        })
    }
}

impl ExecuteQueue for OutOfOrderQueue {
    fn tick(&mut self, input: QueueInput) -> QueueOutput {
        if input.recover {
            for cell in &mut self.cells {
                cell.recover();
            }
        }

        for cell in &mut self.cells {
            cell.listen(input.broadcasts);
        }

        // Migrate tailward. Walking from the tail lets a hole ripple the
        // whole way up in one cycle while each entry moves at most one cell.
        for i in (0..self.cells.len() - 1).rev() {
            if self.cells[i + 1].can_accept() {
                if let Some(entry) = self.cells[i].pop() {
                    self.cells[i + 1].push(entry);
                }
            }
        }

        // Enqueue before arbitration so a just-arrived entry whose operands
        // are already resolved can fire this same cycle.
        let mut accepted = false;
        if let Some(mut entry) = input.enq {
            if !input.recover && self.cells[0].can_accept() {
                entry.listen(input.broadcasts);
                self.cells[0].push(entry);
                accepted = true;
            }
        }

        let mut fired = None;
        if input.deq_ready {
            for cell in self.cells.iter_mut().rev() {
                if cell.ready() {
                    fired = cell.pop();
                    break;
                }
            }
        }

        QueueOutput { fired, accepted }
    }

    fn is_empty(&self) -> bool {
        self.cells.iter().all(DoubleBuffer::is_empty)
    }

    fn is_full(&self) -> bool {
        !self.cells[0].can_accept()
    }
}
