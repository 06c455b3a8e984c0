//! The speculative backend: reservation station, memory pipeline, reorder
//! buffer, store queue, load reservation and retirement, stepped one cycle
//! at a time.

use crate::execute_queue::{ExecuteQueue, InOrderQueue, QueueInput};
use crate::inst::{Broadcast, ExecuteEntry, QueueKind, Receipt};
use crate::mem_pipeline::{DtlbPort, MemPipeline, MemPipelineIo};
use crate::queue::ConfigError;
use crate::reservation::LoadReservation;
use crate::retire::{FlushEmpty, RetireEngine, RetireOutput, TrapTargets};
use crate::rob::{ExecuteResult, Rob};
use crate::sma::{SmaReader, SmaWriter};
use crate::store_queue::StoreQueue;

/// A newly renamed instruction entering the backend. The entry's `rd`
/// field is overwritten with the receipt the reorder buffer mints.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub entry: ExecuteEntry,
    /// Architectural destination register.
    pub rd: u8,
}

/// Per-cycle inputs from the front end and the external collaborators.
#[derive(Debug, Default)]
pub struct TickInput<'a> {
    pub issue: Option<IssueRequest>,
    /// Results arriving from functional units outside the backend.
    pub writebacks: &'a [(Receipt, ExecuteResult)],
    pub flush: FlushEmpty,
    pub traps: TrapTargets,
}

#[derive(Debug, Default)]
pub struct TickOutput {
    pub retire: RetireOutput,
    /// The receipt minted for this cycle's issue, if it was accepted.
    pub issued: Option<Receipt>,
    /// This cycle's data-bus traffic, for any external listeners.
    pub broadcasts: Vec<Broadcast>,
}

pub struct Backend<Q = InOrderQueue> {
    queue: Q,
    pipeline: MemPipeline,
    rob: Rob,
    stores: StoreQueue,
    reservation: LoadReservation,
    retire: RetireEngine,
}

impl Backend<InOrderQueue> {
    /// A backend with the memory subclass on the in-order station, which
    /// keeps memory operations in issue order.
    pub fn new(queue_depth: usize, rob_depth: usize, store_depth: usize) -> Result<Self, ConfigError> {
        Self::with_queue(InOrderQueue::new(queue_depth)?, rob_depth, store_depth)
    }
}

impl<Q: ExecuteQueue> Backend<Q> {
    pub fn with_queue(queue: Q, rob_depth: usize, store_depth: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            queue,
            pipeline: MemPipeline::new(),
            rob: Rob::new(rob_depth)?,
            stores: StoreQueue::new(store_depth)?,
            reservation: LoadReservation::new(),
            retire: RetireEngine::new(),
        })
    }

    pub fn reservation(&self) -> &LoadReservation {
        &self.reservation
    }

    pub fn is_idle(&self) -> bool {
        self.rob.is_empty() && self.queue.is_empty() && self.pipeline.is_empty()
    }

    /// One clock cycle. Retirement runs first, then the memory pipeline,
    /// then the station, so every consumer samples what its producer
    /// registered in earlier cycles.
    pub fn tick<M>(&mut self, input: TickInput, dtlb: &mut dyn DtlbPort, mem: &mut M) -> TickOutput
    where
        M: SmaReader + SmaWriter,
    {
        let retire = self.retire.tick(&mut self.rob, input.flush, input.traps);

        for id in &retire.store_commits {
            self.stores.commit(*id);
        }
        for update in &retire.reservation {
            self.reservation.update(*update);
        }

        let recover = retire.recover;
        if recover {
            log::debug!("recover: redirect to {:#010x}", retire.correct_pc);
            self.rob.recover();
            self.stores.recover();
            self.reservation.recover();
        }

        // External write-backs land in the reorder buffer and on the bus.
        let mut broadcasts = Vec::new();
        if !recover {
            for (receipt, result) in input.writebacks {
                self.rob.complete(*receipt, result.clone());
                broadcasts.push(Broadcast {
                    tag: *receipt,
                    value: result.result,
                });
            }
        }

        let completed = self.pipeline.tick(&mut MemPipelineIo {
            dtlb,
            sma: mem,
            stores: &mut self.stores,
            reservation: &mut self.reservation,
            recover,
        });
        if let Some((receipt, result)) = completed {
            broadcasts.push(Broadcast {
                tag: receipt,
                value: result.result,
            });
            self.rob.complete(receipt, result);
        }

        // Issue: mint a receipt, then hand memory entries to the station.
        // Everything else executes outside and reports back later.
        let mut issued = None;
        let mut enq = None;
        if let Some(req) = input.issue {
            if !recover && !self.rob.is_full() {
                let memory = req.entry.kind == QueueKind::Memory;
                if !memory || !self.queue.is_full() {
                    let receipt = self
                        .rob
                        .alloc(req.entry.pc, req.entry.spec, req.entry.next, req.rd)
                        .expect("allocation with space available");
                    issued = Some(receipt);
                    if memory {
                        let mut entry = req.entry;
                        entry.rd = receipt;
                        enq = Some(entry);
                    }
                }
            }
        }

        let fired = self
            .queue
            .tick(QueueInput {
                enq,
                broadcasts: &broadcasts,
                deq_ready: self.pipeline.can_issue(),
                recover,
            })
            .fired;
        if let Some(entry) = fired {
            if entry.valid {
                self.pipeline.issue(&entry);
            }
        }

        // Retired stores leave for memory as soon as the sink takes them.
        self.stores.drain(mem);

        TickOutput {
            retire,
            issued,
            broadcasts,
        }
    }
}
