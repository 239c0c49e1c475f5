//! Issue queue: operand wait and execute-pipe selection.
//!
//! On arrival an instruction's source bitmasks are checked against the
//! scoreboard. If every bit is ready it joins the ready list; otherwise a
//! wakeup watcher is registered per register file with missing bits, and the
//! instruction waits. Watchers fire as execute pipes mark results ready; when
//! the last one fires the instruction moves to the ready list.
//!
//! Per cycle the ready list is drained first-fit: each instruction takes the
//! first accepting execute pipe among those mapped to its target pipe, in
//! declared order, and one credit returns to dispatch.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::common::UniqueId;
use crate::core::execute_pipe::ExecutePipe;
use crate::core::flush::FlushCriteria;
use crate::core::scoreboard::Scoreboard;
use crate::inst::{InstPtr, REG_FILES, TargetPipe};

/// One issue queue.
#[derive(Debug)]
pub struct IssueQueue {
    name: String,
    index: usize,
    capacity: usize,
    /// Instructions waiting on operands (watchers registered).
    pending: Vec<InstPtr>,
    /// Operand-ready instructions awaiting a free pipe, oldest first.
    ready: Vec<InstPtr>,
    /// Execute pipes (global indices) serving each target pipe, declared order.
    pipe_map: HashMap<TargetPipe, Vec<usize>>,
}

impl IssueQueue {
    /// Creates the queue.
    pub fn new(
        name: impl Into<String>,
        index: usize,
        capacity: usize,
        pipe_map: HashMap<TargetPipe, Vec<usize>>,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            capacity,
            pending: Vec::new(),
            ready: Vec::new(),
            pipe_map,
        }
    }

    /// Queue name (reporting).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This queue's index (watcher key).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity (initial credit grant to dispatch).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy across pending and ready lists.
    pub fn occupancy(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    /// True when the queue holds nothing.
    pub fn is_drained(&self) -> bool {
        self.occupancy() == 0
    }

    /// Pipe targets this queue serves (topology reporting).
    pub fn serves(&self) -> Vec<TargetPipe> {
        let mut pipes: Vec<TargetPipe> = self.pipe_map.keys().copied().collect();
        pipes.sort_by_key(|p| p.index());
        pipes
    }

    /// Accepts a dispatched instruction.
    ///
    /// # Panics
    ///
    /// Panics on overflow — dispatch must respect this queue's credits.
    pub fn accept(&mut self, inst: InstPtr, scoreboard: &mut Scoreboard) {
        assert!(
            self.occupancy() < self.capacity,
            "{} overflow accepting {}",
            self.name,
            inst.borrow()
        );
        if self.try_make_ready(&inst, scoreboard, true) {
            trace!(iq = %self.name, inst = %inst.borrow(), "ready on arrival");
            self.ready.push(inst);
        } else {
            debug!(iq = %self.name, inst = %inst.borrow(), "waiting on operands");
            self.pending.push(inst);
        }
    }

    /// Checks readiness; optionally registers watchers for missing bits.
    fn try_make_ready(
        &self,
        inst: &InstPtr,
        scoreboard: &mut Scoreboard,
        register: bool,
    ) -> bool {
        let b = inst.borrow();
        let mut all_ready = true;
        for rf in REG_FILES {
            let mask = b.src_masks[rf.index()];
            if mask == 0 || scoreboard.is_set(rf, mask) {
                continue;
            }
            all_ready = false;
            if register {
                scoreboard.register_watcher(rf, mask, b.unique_id(), self.index);
            }
        }
        all_ready
    }

    /// Wakeup for `uid`: re-checks every pending record with that uid and
    /// promotes the ones whose operands are now complete.
    ///
    /// Uops of one vector instruction share a uid, so a single wakeup may
    /// promote several records. A record with another register file's watcher
    /// still outstanding stays pending; that watcher fires later.
    pub fn on_wakeup(&mut self, uid: UniqueId, scoreboard: &Scoreboard) {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].borrow().unique_id() != uid {
                i += 1;
                continue;
            }
            let ready = {
                let b = self.pending[i].borrow();
                REG_FILES.iter().all(|rf| {
                    let mask = b.src_masks[rf.index()];
                    mask == 0 || scoreboard.is_set(*rf, mask)
                })
            };
            if ready {
                let inst = self.pending.remove(i);
                trace!(iq = %self.name, inst = %inst.borrow(), "woken ready");
                self.ready.push(inst);
            } else {
                i += 1;
            }
        }
    }

    /// Drains the ready list into accepting execute pipes.
    ///
    /// Returns the number of credits to refund to dispatch.
    pub fn tick(&mut self, now: u64, pipes: &mut [ExecutePipe]) -> u32 {
        let mut credits = 0;
        let mut i = 0;
        while i < self.ready.len() {
            let pipe_target = self.ready[i].borrow().pipe();
            let Some(candidates) = self.pipe_map.get(&pipe_target) else {
                panic!(
                    "{} holds {} but serves no {} pipe",
                    self.name,
                    self.ready[i].borrow(),
                    pipe_target
                );
            };
            let slot = candidates
                .iter()
                .copied()
                .find(|&idx| pipes[idx].can_accept());
            if let Some(idx) = slot {
                let inst = self.ready.remove(i);
                pipes[idx].insert_inst(inst, now);
                credits += 1;
            } else {
                i += 1;
            }
        }
        credits
    }

    /// Flush: erases covered instructions, clears their watchers, and
    /// refunds their credits in one batch.
    ///
    /// Covered instructions are also ROB entries; the ROB drain owns their
    /// flushed status and counting.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria, scoreboard: &mut Scoreboard) -> u32 {
        let mut credits = 0;
        let mut erase = |list: &mut Vec<InstPtr>, clear_watchers: bool| {
            list.retain(|inst| {
                let covered = criteria.includes(&inst.borrow());
                if covered {
                    if clear_watchers {
                        scoreboard.clear_watchers(inst.borrow().unique_id());
                    }
                    credits += 1;
                }
                !covered
            });
        };
        erase(&mut self.pending, true);
        erase(&mut self.ready, false);
        if credits > 0 {
            debug!(iq = %self.name, credits, "flushed");
        }
        credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flush::FlushKind;
    use crate::core::scoreboard::reg_bit;
    use crate::inst::{Inst, RegFile, Status, UopGenType, into_ptr};

    fn scoreboard() -> Scoreboard {
        Scoreboard::new([64, 64, 64])
    }

    fn queue() -> IssueQueue {
        let mut map = HashMap::new();
        map.insert(TargetPipe::Int, vec![0, 1]);
        IssueQueue::new("iq0", 0, 4, map)
    }

    fn pipes() -> Vec<ExecutePipe> {
        vec![
            ExecutePipe::new("alu0", vec![TargetPipe::Int], false, 1, 8, false, 1),
            ExecutePipe::new("alu1", vec![TargetPipe::Int], false, 1, 8, false, 2),
        ]
    }

    fn inst(uid: u64, src_mask: u128) -> InstPtr {
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
        i.set_status(Status::Dispatched);
        i.src_masks[RegFile::Int.index()] = src_mask;
        into_ptr(i)
    }

    #[test]
    fn test_ready_on_arrival_issues() {
        let mut iq = queue();
        let mut sb = scoreboard();
        let mut exe = pipes();
        iq.accept(inst(1, reg_bit(1)), &mut sb);

        let credits = iq.tick(0, &mut exe);
        assert_eq!(credits, 1);
        assert!(iq.is_drained());
        assert!(!exe[0].can_accept());
    }

    #[test]
    fn test_first_fit_spills_to_second_pipe() {
        let mut iq = queue();
        let mut sb = scoreboard();
        let mut exe = pipes();
        iq.accept(inst(1, 0), &mut sb);
        iq.accept(inst(2, 0), &mut sb);

        let credits = iq.tick(0, &mut exe);
        assert_eq!(credits, 2);
        assert!(!exe[0].can_accept());
        assert!(!exe[1].can_accept());
    }

    #[test]
    fn test_not_ready_waits_for_wakeup() {
        let mut iq = queue();
        let mut sb = scoreboard();
        let mut exe = pipes();

        // Source p40 is produced by an in-flight instruction.
        sb.clear_ready(RegFile::Int, reg_bit(40));
        iq.accept(inst(7, reg_bit(40)), &mut sb);
        assert_eq!(iq.tick(0, &mut exe), 0);
        assert_eq!(iq.occupancy(), 1);
        assert_eq!(sb.watcher_count(), 1);

        // Producer finishes: watcher fires, instruction issues.
        let woken = sb.set_ready(RegFile::Int, reg_bit(40));
        assert_eq!(woken.len(), 1);
        iq.on_wakeup(woken[0].uid, &sb);
        assert_eq!(iq.tick(1, &mut exe), 1);
        assert!(iq.is_drained());
    }

    #[test]
    fn test_wakeup_waits_for_all_regfiles() {
        let mut iq = queue();
        let mut sb = scoreboard();

        sb.clear_ready(RegFile::Int, reg_bit(40));
        sb.clear_ready(RegFile::Float, reg_bit(41));
        let i = inst(7, reg_bit(40));
        i.borrow_mut().src_masks[RegFile::Float.index()] = reg_bit(41);
        iq.accept(i, &mut sb);
        assert_eq!(sb.watcher_count(), 2);

        let woken = sb.set_ready(RegFile::Int, reg_bit(40));
        iq.on_wakeup(woken[0].uid, &sb);
        // Float still outstanding: stays pending.
        assert_eq!(iq.pending.len(), 1);
        assert_eq!(sb.watcher_count(), 1);

        let woken = sb.set_ready(RegFile::Float, reg_bit(41));
        iq.on_wakeup(woken[0].uid, &sb);
        assert_eq!(iq.ready.len(), 1);
        assert_eq!(sb.watcher_count(), 0);
    }

    #[test]
    fn test_ready_blocked_when_pipes_busy() {
        let mut iq = queue();
        let mut sb = scoreboard();
        let mut exe = pipes();
        for uid in 1..=3 {
            iq.accept(inst(uid, 0), &mut sb);
        }
        // Two pipes accept, the third instruction waits its turn.
        assert_eq!(iq.tick(0, &mut exe), 2);
        assert_eq!(iq.occupancy(), 1);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_overflow_panics() {
        let mut iq = queue();
        let mut sb = scoreboard();
        for uid in 0..5 {
            iq.accept(inst(uid, 0), &mut sb);
        }
    }

    #[test]
    fn test_flush_clears_watchers_and_refunds() {
        let mut iq = queue();
        let mut sb = scoreboard();

        sb.clear_ready(RegFile::Int, reg_bit(40));
        iq.accept(inst(5, reg_bit(40)), &mut sb);
        iq.accept(inst(6, 0), &mut sb);
        assert_eq!(sb.watcher_count(), 1);

        let criteria = FlushCriteria::new(FlushKind::Misprediction, 4, 1, false);
        let credits = iq.handle_flush(&criteria, &mut sb);
        assert_eq!(credits, 2);
        assert!(iq.is_drained());
        assert_eq!(sb.watcher_count(), 0);
    }

    #[test]
    fn test_flush_spares_older() {
        let mut iq = queue();
        let mut sb = scoreboard();
        iq.accept(inst(3, 0), &mut sb);
        iq.accept(inst(9, 0), &mut sb);

        let criteria = FlushCriteria::new(FlushKind::Misprediction, 5, 1, false);
        let credits = iq.handle_flush(&criteria, &mut sb);
        assert_eq!(credits, 1);
        assert_eq!(iq.occupancy(), 1);
    }
}
