//! The reservation-station contract, run over both queue shapes.

use bergamot::execute_queue::{ExecuteQueue, InOrderQueue, OutOfOrderQueue, QueueInput};
use bergamot::inst::{Broadcast, ExecuteEntry, Receipt, ValueOrTag};

trait MakeQueue: ExecuteQueue + Sized {
    fn make(depth: usize) -> Self;
}

impl MakeQueue for InOrderQueue {
    fn make(depth: usize) -> Self {
        InOrderQueue::new(depth).unwrap()
    }
}

impl MakeQueue for OutOfOrderQueue {
    fn make(depth: usize) -> Self {
        OutOfOrderQueue::new(depth).unwrap()
    }
}

fn ready_entry(pc: u32) -> ExecuteEntry {
    ExecuteEntry {
        pc,
        valid: true,
        ..Default::default()
    }
}

fn waiting_entry(pc: u32, tag: Receipt) -> ExecuteEntry {
    ExecuteEntry {
        pc,
        rs1: ValueOrTag::Invalid(tag),
        valid: true,
        ..Default::default()
    }
}

#[generic_tests::define]
mod contract {
    use super::*;

    #[test]
    fn test_broadcast_wakes_then_fires<Q: MakeQueue>() {
        let mut queue = Q::make(4);
        let tag = Receipt::from(5u32);

        assert!(
            queue
                .tick(QueueInput {
                    enq: Some(waiting_entry(0, tag)),
                    ..Default::default()
                })
                .accepted
        );

        // Not fireable while the operand is pending.
        let out = queue.tick(QueueInput {
            deq_ready: true,
            ..Default::default()
        });
        assert!(out.fired.is_none());

        let bus = [Broadcast { tag, value: 42 }];
        let out = queue.tick(QueueInput {
            broadcasts: &bus,
            deq_ready: true,
            ..Default::default()
        });
        let fired = out.fired.expect("woken entry did not fire");
        assert_eq!(fired.rs1, ValueOrTag::Valid(42));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_just_enqueued_entry_can_fire_same_cycle<Q: MakeQueue>() {
        let mut queue = Q::make(4);
        let tag = Receipt::from(9u32);

        // The entry arrives pending but the bus resolves it this cycle.
        let bus = [Broadcast { tag, value: 7 }];
        let out = queue.tick(QueueInput {
            enq: Some(waiting_entry(0, tag)),
            broadcasts: &bus,
            deq_ready: true,
            ..Default::default()
        });
        assert!(out.accepted);
        let fired = out.fired.expect("bypass fire did not happen");
        assert_eq!(fired.rs1, ValueOrTag::Valid(7));
    }

    #[test]
    fn test_recovery_turns_entries_into_bubbles<Q: MakeQueue>() {
        let mut queue = Q::make(2);
        let tag = Receipt::from(1u32);

        for pc in [0, 4] {
            assert!(
                queue
                    .tick(QueueInput {
                        enq: Some(waiting_entry(pc, tag)),
                        ..Default::default()
                    })
                    .accepted
            );
        }

        queue.tick(QueueInput {
            recover: true,
            ..Default::default()
        });

        // The slots drain as bubbles even though the operand never shows.
        let mut drained = 0;
        for _ in 0..8 {
            let out = queue.tick(QueueInput {
                deq_ready: true,
                ..Default::default()
            });
            if let Some(entry) = out.fired {
                assert!(!entry.valid);
                drained += 1;
            }
        }
        assert_eq!(drained, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure_then_drain<Q: MakeQueue>() {
        let mut queue = Q::make(3);
        let tag = Receipt::from(2u32);

        let mut held = 0;
        for pc in 0..32 {
            let out = queue.tick(QueueInput {
                enq: Some(waiting_entry(pc, tag)),
                ..Default::default()
            });
            if !out.accepted {
                break;
            }
            held += 1;
        }
        assert!(held >= 3);
        assert!(queue.is_full());

        let bus = [Broadcast { tag, value: 1 }];
        let mut fired = 0;
        for _ in 0..held * 2 {
            let out = queue.tick(QueueInput {
                broadcasts: &bus,
                deq_ready: true,
                ..Default::default()
            });
            if out.fired.is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, held);
        assert!(queue.is_empty());
    }

    #[instantiate_tests(<InOrderQueue>)]
    mod in_order {}

    #[instantiate_tests(<OutOfOrderQueue>)]
    mod out_of_order {}
}

#[test]
fn test_in_order_head_blocks_younger_ready_entries() {
    let mut queue = InOrderQueue::new(4).unwrap();
    let tag = Receipt::from(3u32);

    queue.tick(QueueInput {
        enq: Some(waiting_entry(0, tag)),
        ..Default::default()
    });
    queue.tick(QueueInput {
        enq: Some(ready_entry(4)),
        ..Default::default()
    });

    // FIFO order: the ready entry behind an unready head must wait.
    let out = queue.tick(QueueInput {
        deq_ready: true,
        ..Default::default()
    });
    assert!(out.fired.is_none());

    let bus = [Broadcast { tag, value: 0 }];
    let out = queue.tick(QueueInput {
        broadcasts: &bus,
        deq_ready: true,
        ..Default::default()
    });
    assert_eq!(out.fired.unwrap().pc, 0);
    let out = queue.tick(QueueInput {
        deq_ready: true,
        ..Default::default()
    });
    assert_eq!(out.fired.unwrap().pc, 4);
}

#[test]
fn test_out_of_order_fires_around_a_blocked_head() {
    let mut queue = OutOfOrderQueue::new(4).unwrap();
    let tag = Receipt::from(3u32);

    queue.tick(QueueInput {
        enq: Some(waiting_entry(0, tag)),
        ..Default::default()
    });
    queue.tick(QueueInput {
        enq: Some(ready_entry(4)),
        ..Default::default()
    });

    let out = queue.tick(QueueInput {
        deq_ready: true,
        ..Default::default()
    });
    assert_eq!(out.fired.unwrap().pc, 4);
}
