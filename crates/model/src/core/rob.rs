//! Reorder buffer: in-order retirement and mispredict recovery.
//!
//! A bounded FIFO of in-flight instructions. Per cycle, up to the retire
//! budget:
//! 1. A completed, correctly-predicted head retires: rename and the LSU are
//!    acked and the retired counter advances.
//! 2. A mispredicted head raises a non-inclusive misprediction flush and
//!    drains every younger entry; the head itself retires next cycle. A
//!    flush always wins over a completion arriving the same cycle.
//! 3. An incomplete head stops retirement for the cycle.
//!
//! Reaching the configured retire limit emits a one-shot stop notification.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::core::flush::{FlushCriteria, FlushKind};
use crate::inst::{InstPtr, Status};
use crate::stats::SimStats;

/// Side effects of one ROB tick.
#[derive(Debug, Default)]
pub struct RetireOutput {
    /// Instructions retired this cycle, program order.
    pub retired: Vec<InstPtr>,
    /// Misprediction flush raised at the head.
    pub flush: Option<FlushCriteria>,
    /// Entries drained behind a mispredicted head (ROB credits to refund).
    pub drained: u32,
    /// The retire limit was reached this cycle (one-shot).
    pub stopped: bool,
}

/// The reorder buffer.
#[derive(Debug)]
pub struct ReorderBuffer {
    entries: VecDeque<InstPtr>,
    capacity: usize,
    num_to_retire: usize,
    /// Retire when this many instructions have retired; zero disables.
    inst_limit: u64,
    num_retired: u64,
    stopped: bool,
    /// Head uid that already raised its flush (retires on the next pass).
    flushed_head: Option<u64>,
}

impl ReorderBuffer {
    /// Creates the buffer.
    pub fn new(capacity: usize, num_to_retire: usize, inst_limit: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            num_to_retire,
            inst_limit,
            num_retired: 0,
            stopped: false,
            flushed_head: None,
        }
    }

    /// Capacity (initial credit grant to dispatch).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lifetime retired count.
    pub fn num_retired(&self) -> u64 {
        self.num_retired
    }

    /// Uid of the current head, if any.
    pub fn head_uid(&self) -> Option<u64> {
        self.entries.front().map(|inst| inst.borrow().unique_id())
    }

    /// Inserts a dispatched instruction at the tail.
    ///
    /// # Panics
    ///
    /// Panics on overflow or out-of-order insertion — dispatch must respect
    /// ROB credits and program order.
    pub fn insert(&mut self, inst: InstPtr) {
        assert!(
            self.entries.len() < self.capacity,
            "ROB overflow inserting {}",
            inst.borrow()
        );
        if let Some(back) = self.entries.back() {
            assert!(
                back.borrow().unique_id() <= inst.borrow().unique_id(),
                "out-of-order ROB insert: {} after {}",
                inst.borrow(),
                back.borrow()
            );
        }
        trace!(inst = %inst.borrow(), "ROB insert");
        self.entries.push_back(inst);
    }

    /// Retires up to the per-cycle budget.
    pub fn tick(&mut self, now: u64, stats: &mut SimStats) -> RetireOutput {
        let mut output = RetireOutput::default();

        for _ in 0..self.num_to_retire {
            let Some(head) = self.entries.front().cloned() else {
                break;
            };
            let (uid, status, mispredicted) = {
                let b = head.borrow();
                (b.unique_id(), b.status(), b.mispredicted)
            };

            // Flush wins over a completion arriving the same cycle: the
            // head's own flush is raised before it is allowed to retire.
            if mispredicted && self.flushed_head != Some(uid) {
                let criteria = FlushCriteria::new(
                    FlushKind::Misprediction,
                    uid,
                    head.borrow().program_id(),
                    false,
                );
                debug!(inst = %head.borrow(), "mispredicted head, draining ROB");
                stats.branch_mispredicts += 1;

                // Drain every entry strictly after the head.
                while self.entries.len() > 1 {
                    let victim = self.entries.pop_back().expect("len checked");
                    victim.borrow_mut().set_status(Status::Flushed);
                    stats.instructions_flushed += 1;
                    output.drained += 1;
                }
                self.flushed_head = Some(uid);
                output.flush = Some(criteria);
                break;
            }

            if status != Status::Completed {
                break; // head not ready
            }

            let _ = self.entries.pop_front();
            head.borrow_mut().set_status(Status::Retired);
            head.borrow_mut().timestamps.retired = now;
            if self.flushed_head == Some(uid) {
                self.flushed_head = None;
            }
            self.num_retired += 1;
            stats.instructions_retired += 1;
            trace!(inst = %head.borrow(), "retired");
            output.retired.push(head);

            if self.inst_limit != 0 && self.num_retired >= self.inst_limit && !self.stopped {
                self.stopped = true;
                output.stopped = true;
                debug!(retired = self.num_retired, "retire limit reached");
                break;
            }
        }

        output
    }

    /// Flush from another unit (replay exhaustion): drains covered entries.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria, stats: &mut SimStats) {
        while let Some(back) = self.entries.back() {
            if !criteria.includes(&back.borrow()) {
                break;
            }
            let victim = self.entries.pop_back().expect("checked non-empty");
            victim.borrow_mut().set_status(Status::Flushed);
            stats.instructions_flushed += 1;
        }
    }

    /// Iterates the live entries head-to-tail.
    pub fn for_each(&self, mut f: impl FnMut(&InstPtr)) {
        for inst in &self.entries {
            f(inst);
        }
    }

    /// True if entry uids are monotone non-decreasing head-to-tail
    /// (invariant checks; uops share their parent's uid).
    pub fn is_program_ordered(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a.borrow().unique_id() <= b.borrow().unique_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{Inst, TargetPipe, UopGenType, into_ptr};

    fn inst(uid: u64, status: Status) -> InstPtr {
        let mut i = Inst::new(
            "add",
            0,
            TargetPipe::Int,
            1,
            UopGenType::None,
            vec![],
            vec![],
            None,
        );
        i.set_unique_id(uid);
        i.set_program_id(uid);
        i.set_status(status);
        into_ptr(i)
    }

    #[test]
    fn test_retire_in_order() {
        let mut rob = ReorderBuffer::new(8, 2, 0);
        let mut stats = SimStats::default();
        rob.insert(inst(1, Status::Completed));
        rob.insert(inst(2, Status::Completed));
        rob.insert(inst(3, Status::Dispatched));

        let out = rob.tick(0, &mut stats);
        assert_eq!(out.retired.len(), 2); // budget is 2
        assert_eq!(out.retired[0].borrow().unique_id(), 1);
        assert_eq!(rob.num_retired(), 2);

        // Head 3 is incomplete: nothing retires.
        let out = rob.tick(1, &mut stats);
        assert!(out.retired.is_empty());
    }

    #[test]
    fn test_incomplete_head_blocks_younger_completed() {
        let mut rob = ReorderBuffer::new(8, 4, 0);
        let mut stats = SimStats::default();
        rob.insert(inst(1, Status::Dispatched));
        rob.insert(inst(2, Status::Completed));
        let out = rob.tick(0, &mut stats);
        assert!(out.retired.is_empty());
    }

    #[test]
    fn test_mispredicted_head_flushes_then_retires() {
        let mut rob = ReorderBuffer::new(8, 4, 0);
        let mut stats = SimStats::default();
        let branch = inst(5, Status::Completed);
        branch.borrow_mut().mispredicted = true;
        rob.insert(branch.clone());
        for uid in 6..10 {
            rob.insert(inst(uid, Status::Dispatched));
        }

        // Cycle 0: flush raised, younger entries drained, head kept.
        let out = rob.tick(0, &mut stats);
        assert!(out.retired.is_empty());
        let criteria = out.flush.expect("flush raised");
        assert_eq!(criteria.unique_id(), 5);
        assert!(!criteria.is_inclusive());
        assert_eq!(rob.len(), 1);
        assert_eq!(stats.instructions_flushed, 4);

        // Cycle 1: the branch itself retires; no second flush.
        let out = rob.tick(1, &mut stats);
        assert_eq!(out.retired.len(), 1);
        assert!(out.flush.is_none());
        assert!(rob.is_empty());
    }

    #[test]
    fn test_flush_wins_over_same_cycle_completion() {
        let mut rob = ReorderBuffer::new(8, 4, 0);
        let mut stats = SimStats::default();
        let branch = inst(1, Status::Completed);
        branch.borrow_mut().mispredicted = true;
        rob.insert(branch);
        let younger = inst(2, Status::Completed);
        rob.insert(younger.clone());

        // Both are completed, but the flush drains the younger one anyway.
        let out = rob.tick(0, &mut stats);
        assert!(out.flush.is_some());
        assert!(out.retired.is_empty());
        assert_eq!(younger.borrow().status(), Status::Flushed);
    }

    #[test]
    fn test_inst_limit_one_shot() {
        let mut rob = ReorderBuffer::new(8, 4, 2);
        let mut stats = SimStats::default();
        for uid in 1..=3 {
            rob.insert(inst(uid, Status::Completed));
        }
        let out = rob.tick(0, &mut stats);
        assert_eq!(out.retired.len(), 2);
        assert!(out.stopped);

        let out = rob.tick(1, &mut stats);
        assert!(!out.stopped, "stop notification is one-shot");
    }

    #[test]
    fn test_external_flush_drains_covered_tail() {
        let mut rob = ReorderBuffer::new(8, 4, 0);
        let mut stats = SimStats::default();
        for uid in 1..=5 {
            rob.insert(inst(uid, Status::Dispatched));
        }
        let criteria = FlushCriteria::new(FlushKind::ReplayExhausted, 3, 3, true);
        rob.handle_flush(&criteria, &mut stats);
        assert_eq!(rob.len(), 2);
        assert_eq!(rob.head_uid(), Some(1));
        assert_eq!(stats.instructions_flushed, 3);
    }

    #[test]
    #[should_panic(expected = "ROB overflow")]
    fn test_overflow_panics() {
        let mut rob = ReorderBuffer::new(2, 4, 0);
        rob.insert(inst(1, Status::Dispatched));
        rob.insert(inst(2, Status::Dispatched));
        rob.insert(inst(3, Status::Dispatched));
    }

    #[test]
    #[should_panic(expected = "out-of-order")]
    fn test_out_of_order_insert_panics() {
        let mut rob = ReorderBuffer::new(8, 4, 0);
        rob.insert(inst(5, Status::Dispatched));
        rob.insert(inst(3, Status::Dispatched));
    }
}
