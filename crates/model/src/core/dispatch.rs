//! Dispatch: routes renamed instructions to issue queues, the LSU/VLSU, and
//! the ROB.
//!
//! Dispatch holds credit counters for every consumer. Per cycle it examines
//! up to `num_to_dispatch` instructions at the head of its queue:
//! 1. Look up the target pipe and the consumers declared to serve it.
//! 2. Send to the first consumer with credits (declared order), consuming one
//!    consumer credit and one ROB credit.
//! 3. If none can accept, record the pipe-busy stall reason and stop — the
//!    instruction is not consumed.
//!
//! ROB-targeted instructions (SYS and friends) skip execution entirely and
//! complete at dispatch. Every dispatched instruction is also handed to the
//! ROB by the caller.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::inst::{InstPtr, N_PIPES, Status, TargetPipe};
use crate::stats::{N_STALL_BINS, SimStats};

/// A consumer that can accept dispatched instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Issue queue by index.
    IssueQueue(usize),
    /// The scalar load/store unit.
    Lsu,
    /// The vector load/store unit.
    Vlsu,
}

/// Why dispatch stopped this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StallReason {
    /// Not stalled.
    #[default]
    NotStalled,
    /// Every consumer serving this pipe is out of credits.
    PipeBusy(TargetPipe),
    /// The ROB has no free entries.
    NoRobCredits,
}

impl StallReason {
    /// Histogram bin for this reason, if it is a stall.
    ///
    /// Bins 0..=20 are the execution pipes in declaration order; bin 21 is
    /// no-ROB-credits.
    pub fn bin(self) -> Option<usize> {
        match self {
            Self::NotStalled => None,
            Self::PipeBusy(pipe) => {
                let idx = pipe.index();
                debug_assert!(idx < N_STALL_BINS - 1, "ROB/SYS pipes cannot be busy");
                Some(idx.min(N_STALL_BINS - 2))
            }
            Self::NoRobCredits => Some(N_STALL_BINS - 1),
        }
    }
}

/// One dispatched instruction and where it went.
#[derive(Debug)]
pub struct Dispatched {
    /// Consumer the instruction was routed to; `None` for straight-to-ROB.
    pub target: Option<DispatchTarget>,
    /// The instruction.
    pub inst: InstPtr,
}

/// The dispatch unit.
#[derive(Debug)]
pub struct DispatchUnit {
    queue: VecDeque<InstPtr>,
    capacity: usize,
    num_to_dispatch: usize,

    credits_rob: u32,
    iq_credits: Vec<u32>,
    lsu_credits: u32,
    vlsu_credits: u32,

    /// Consumers per pipe, in declared (tie-break) order.
    pipe_targets: Vec<Vec<DispatchTarget>>,
    current_stall: StallReason,
}

impl DispatchUnit {
    /// Creates the unit.
    ///
    /// `pipe_targets` is indexed by [`TargetPipe::index`]; ROB-targeted pipes
    /// carry an empty list.
    pub fn new(
        capacity: usize,
        num_to_dispatch: usize,
        num_issue_queues: usize,
        pipe_targets: Vec<Vec<DispatchTarget>>,
    ) -> Self {
        assert_eq!(pipe_targets.len(), N_PIPES, "one target list per pipe");
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            num_to_dispatch,
            credits_rob: 0,
            iq_credits: vec![0; num_issue_queues],
            lsu_credits: 0,
            vlsu_credits: 0,
            pipe_targets,
            current_stall: StallReason::NotStalled,
        }
    }

    /// Free dispatch-queue slots (credits advertised to rename).
    pub fn credits(&self) -> usize {
        self.capacity - self.queue.len()
    }

    /// True when no instructions are buffered.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// Stall reason at the end of the last tick.
    pub fn current_stall(&self) -> StallReason {
        self.current_stall
    }

    /// Accepts a renamed instruction.
    ///
    /// # Panics
    ///
    /// Panics on overflow — rename must respect dispatch credits.
    pub fn push(&mut self, inst: InstPtr) {
        assert!(
            self.queue.len() < self.capacity,
            "dispatch queue overflow: {}",
            inst.borrow()
        );
        self.queue.push_back(inst);
    }

    /// Returns issue-queue credits (initial grant or post-issue refund).
    pub fn add_iq_credits(&mut self, issue_queue: usize, n: u32) {
        self.iq_credits[issue_queue] += n;
    }

    /// Returns LSU credits.
    pub fn add_lsu_credits(&mut self, n: u32) {
        self.lsu_credits += n;
    }

    /// Returns VLSU credits.
    pub fn add_vlsu_credits(&mut self, n: u32) {
        self.vlsu_credits += n;
    }

    /// Returns ROB credits (initial grant or per retire).
    pub fn add_rob_credits(&mut self, n: u32) {
        self.credits_rob += n;
    }

    /// Dispatches up to the per-cycle budget. Returns the routed
    /// instructions; the caller inserts each into the ROB.
    pub fn tick(&mut self, now: u64, stats: &mut SimStats) -> Vec<Dispatched> {
        let mut dispatched = Vec::new();
        self.current_stall = StallReason::NotStalled;

        for _ in 0..self.num_to_dispatch {
            let Some(inst) = self.queue.front().cloned() else {
                break;
            };
            if self.credits_rob == 0 {
                self.current_stall = StallReason::NoRobCredits;
                break;
            }

            let pipe = inst.borrow().pipe();
            if matches!(pipe, TargetPipe::Rob | TargetPipe::Sys) {
                // Straight to retire: no execution resources consumed.
                inst.borrow_mut().set_status(Status::Dispatched);
                inst.borrow_mut().timestamps.dispatched = now;
                inst.borrow_mut().set_status(Status::Completed);
                stats.unit_distribution[pipe.index()] += 1;
                dispatched.push(Dispatched {
                    target: None,
                    inst: self.queue.pop_front().expect("checked non-empty"),
                });
                self.credits_rob -= 1;
                continue;
            }

            let targets = &self.pipe_targets[pipe.index()];
            assert!(
                !targets.is_empty(),
                "no consumer serves pipe {pipe} for {}",
                inst.borrow()
            );
            let accepted = targets.iter().copied().find(|t| self.target_credits(*t) > 0);

            let Some(target) = accepted else {
                self.current_stall = StallReason::PipeBusy(pipe);
                trace!(inst = %inst.borrow(), pipe = %pipe, "dispatch stalled");
                break;
            };

            self.consume_target_credit(target);
            self.credits_rob -= 1;
            inst.borrow_mut().set_status(Status::Dispatched);
            inst.borrow_mut().timestamps.dispatched = now;
            stats.unit_distribution[pipe.index()] += 1;
            debug!(inst = %inst.borrow(), ?target, "dispatched");
            dispatched.push(Dispatched {
                target: Some(target),
                inst: self.queue.pop_front().expect("checked non-empty"),
            });
        }

        if let Some(bin) = self.current_stall.bin() {
            stats.dispatch_stalls[bin] += 1;
        }
        dispatched
    }

    fn target_credits(&self, target: DispatchTarget) -> u32 {
        match target {
            DispatchTarget::IssueQueue(i) => self.iq_credits[i],
            DispatchTarget::Lsu => self.lsu_credits,
            DispatchTarget::Vlsu => self.vlsu_credits,
        }
    }

    fn consume_target_credit(&mut self, target: DispatchTarget) {
        match target {
            DispatchTarget::IssueQueue(i) => self.iq_credits[i] -= 1,
            DispatchTarget::Lsu => self.lsu_credits -= 1,
            DispatchTarget::Vlsu => self.vlsu_credits -= 1,
        }
    }

    /// Flush: clears the dispatch queue (everything here is younger than any
    /// possible offender still in the ROB).
    pub fn handle_flush(&mut self, stats: &mut SimStats) {
        for inst in self.queue.drain(..) {
            inst.borrow_mut().set_status(Status::Flushed);
            stats.instructions_flushed += 1;
        }
        self.current_stall = StallReason::NotStalled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{ALL_PIPES, Inst, UopGenType, into_ptr};

    fn routing() -> Vec<Vec<DispatchTarget>> {
        ALL_PIPES
            .iter()
            .map(|pipe| match pipe {
                TargetPipe::Rob | TargetPipe::Sys => vec![],
                TargetPipe::Lsu => vec![DispatchTarget::Lsu],
                TargetPipe::Vload | TargetPipe::Vstore => vec![DispatchTarget::Vlsu],
                TargetPipe::Int => vec![
                    DispatchTarget::IssueQueue(0),
                    DispatchTarget::IssueQueue(1),
                ],
                _ => vec![DispatchTarget::IssueQueue(0)],
            })
            .collect()
    }

    fn unit() -> DispatchUnit {
        let mut d = DispatchUnit::new(8, 2, 2, routing());
        d.add_rob_credits(16);
        d.add_iq_credits(0, 4);
        d.add_iq_credits(1, 4);
        d.add_lsu_credits(2);
        d.add_vlsu_credits(2);
        d
    }

    fn inst(uid: u64, pipe: TargetPipe) -> InstPtr {
        let mut i = Inst::new(
            "test",
            0,
            pipe,
            1,
            UopGenType::None,
            vec![],
            vec![],
            None,
        );
        i.set_unique_id(uid);
        i.set_status(Status::Renamed);
        into_ptr(i)
    }

    #[test]
    fn test_routes_to_first_queue_with_credits() {
        let mut d = unit();
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        let out = d.tick(0, &mut stats);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, Some(DispatchTarget::IssueQueue(0)));
        assert_eq!(out[0].inst.borrow().status(), Status::Dispatched);
        assert_eq!(stats.unit_distribution[TargetPipe::Int.index()], 1);
    }

    #[test]
    fn test_tie_break_falls_to_second_queue() {
        let mut d = DispatchUnit::new(8, 2, 2, routing());
        d.add_rob_credits(16);
        d.add_iq_credits(1, 4); // queue 0 has no credits
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        let out = d.tick(0, &mut stats);
        assert_eq!(out[0].target, Some(DispatchTarget::IssueQueue(1)));
    }

    #[test]
    fn test_pipe_busy_stall_does_not_consume() {
        let mut d = DispatchUnit::new(8, 2, 2, routing());
        d.add_rob_credits(16);
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        let out = d.tick(0, &mut stats);
        assert!(out.is_empty());
        assert_eq!(d.current_stall(), StallReason::PipeBusy(TargetPipe::Int));
        assert_eq!(stats.dispatch_stalls[TargetPipe::Int.index()], 1);
        assert!(!d.is_drained());
    }

    #[test]
    fn test_rob_credit_stall() {
        let mut d = DispatchUnit::new(8, 2, 2, routing());
        d.add_iq_credits(0, 4);
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        let out = d.tick(0, &mut stats);
        assert!(out.is_empty());
        assert_eq!(d.current_stall(), StallReason::NoRobCredits);
        assert_eq!(stats.dispatch_stalls[N_STALL_BINS - 1], 1);
    }

    #[test]
    fn test_rob_target_completes_at_dispatch() {
        let mut d = unit();
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Sys));
        let out = d.tick(0, &mut stats);
        assert_eq!(out.len(), 1);
        assert!(out[0].target.is_none());
        assert_eq!(out[0].inst.borrow().status(), Status::Completed);
    }

    #[test]
    fn test_width_limit() {
        let mut d = unit();
        let mut stats = SimStats::default();
        for uid in 0..4 {
            d.push(inst(uid, TargetPipe::Int));
        }
        let out = d.tick(0, &mut stats);
        assert_eq!(out.len(), 2); // num_to_dispatch = 2
    }

    #[test]
    fn test_in_order_blocking_head() {
        // A blocked head stalls everything behind it, even dispatchable work.
        let mut d = DispatchUnit::new(8, 2, 2, routing());
        d.add_rob_credits(16);
        d.add_lsu_credits(2); // only the LSU can accept
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        d.push(inst(2, TargetPipe::Lsu));
        let out = d.tick(0, &mut stats);
        assert!(out.is_empty());
        assert_eq!(d.current_stall(), StallReason::PipeBusy(TargetPipe::Int));
    }

    #[test]
    fn test_flush_drops_queue() {
        let mut d = unit();
        let mut stats = SimStats::default();
        d.push(inst(1, TargetPipe::Int));
        d.push(inst(2, TargetPipe::Int));
        d.handle_flush(&mut stats);
        assert!(d.is_drained());
        assert_eq!(stats.instructions_flushed, 2);
    }
}
