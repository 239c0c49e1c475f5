//! Execute pipe: one instruction at a time through a fixed latency.
//!
//! An accepted instruction is held for its execute latency, then:
//! 1. Its destination physical registers are marked ready (waking dependents).
//! 2. A blocking vset forwards its resolved configuration back to decode.
//! 3. On the branch pipe with randomized misprediction enabled, the
//!    instruction flips mispredicted with probability ~1/20.
//! 4. One cycle later the instruction completes and becomes retirable.
//!
//! Vector-integer uops whose element count exceeds the VALU adder count hold
//! the pipe across multiple latency windows (passes) before completing.

use tracing::{debug, trace};

use crate::core::flush::FlushCriteria;
use crate::inst::{InstPtr, N_REG_FILES, REG_FILES, RegFile, RegMask, Status, TargetPipe};
use crate::vector::VLEN;

/// xorshift64 generator for misprediction injection.
///
/// Deterministic per seed so runs are reproducible.
#[derive(Debug, Clone)]
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// Side effects of one execute-pipe tick, applied by the core.
#[derive(Debug, Default)]
pub struct PipeOutput {
    /// Destination bits to mark ready, per register file.
    pub ready: Vec<(RegFile, RegMask)>,
    /// Resolved blocking vset to forward to decode.
    pub vset_forward: Option<InstPtr>,
    /// A branch that just resolved mispredicted.
    pub mispredicted: bool,
}

/// A single execution pipe.
#[derive(Debug)]
pub struct ExecutePipe {
    name: String,
    pipes_served: Vec<TargetPipe>,

    ignore_inst_execute_time: bool,
    fixed_execute_time: u64,
    valu_adder_num: u32,
    enable_random_misprediction: bool,
    rng: XorShift64,

    busy: bool,
    execute_due: Option<(u64, InstPtr)>,
    complete_due: Option<(u64, InstPtr)>,
    num_passes_needed: u32,
    curr_pass: u32,

    total_insts_executed: u64,
}

impl ExecutePipe {
    /// Creates a pipe serving the given pipe targets.
    pub fn new(
        name: impl Into<String>,
        pipes_served: Vec<TargetPipe>,
        ignore_inst_execute_time: bool,
        fixed_execute_time: u64,
        valu_adder_num: u32,
        enable_random_misprediction: bool,
        seed: u64,
    ) -> Self {
        let contains_branch = pipes_served.contains(&TargetPipe::Br);
        Self {
            name: name.into(),
            pipes_served,
            ignore_inst_execute_time,
            fixed_execute_time,
            valu_adder_num,
            // Misprediction only makes sense on a branch pipe.
            enable_random_misprediction: enable_random_misprediction && contains_branch,
            rng: XorShift64::new(seed),
            busy: false,
            execute_due: None,
            complete_due: None,
            num_passes_needed: 0,
            curr_pass: 0,
            total_insts_executed: 0,
        }
    }

    /// Pipe name (reporting).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipe targets this pipe serves.
    pub fn pipes_served(&self) -> &[TargetPipe] {
        &self.pipes_served
    }

    /// Lifetime executed-instruction count.
    pub fn total_insts_executed(&self) -> u64 {
        self.total_insts_executed
    }

    /// Can the pipe take a new instruction this cycle?
    #[inline]
    pub fn can_accept(&self) -> bool {
        !self.busy
    }

    /// True when nothing is in flight.
    pub fn is_idle(&self) -> bool {
        !self.busy && self.execute_due.is_none() && self.complete_due.is_none()
    }

    /// Accepts an instruction from an issue queue.
    ///
    /// # Panics
    ///
    /// Panics if the pipe is already busy.
    pub fn insert_inst(&mut self, inst: InstPtr, now: u64) {
        assert!(
            self.can_accept(),
            "{} is receiving a new instruction when it's already busy: {}",
            self.name,
            inst.borrow()
        );
        inst.borrow_mut().timestamps.execute_start = now;
        inst.borrow_mut().set_status(Status::Scheduled);

        let exe_time = self.exe_time_for(&inst);
        self.plan_vint_passes(&inst);

        trace!(pipe = %self.name, inst = %inst.borrow(), exe_time, "executing");
        assert!(exe_time != 0, "zero execute time for {}", inst.borrow());
        self.busy = true;
        self.execute_due = Some((now + exe_time, inst));
    }

    fn exe_time_for(&self, inst: &InstPtr) -> u64 {
        if self.ignore_inst_execute_time {
            self.fixed_execute_time
        } else {
            inst.borrow().execute_latency()
        }
    }

    /// Determines the pass count for wide vector-integer uops.
    ///
    /// The uop's non-tail element count is compared against the VALU adder
    /// count; each pass covers `valu_adder_num` elements.
    fn plan_vint_passes(&mut self, inst: &InstPtr) {
        let b = inst.borrow();
        if b.is_vset() || b.pipe() != TargetPipe::Vint {
            return;
        }
        let Some(config) = b.vector_config() else {
            return;
        };
        let elems_per_uop = VLEN / config.sew();
        let uop_step = b.uop_id().saturating_sub(1);
        let elems_remaining = config.vl().saturating_sub(elems_per_uop * uop_step);
        let vl_this_uop = elems_per_uop.min(elems_remaining);
        let num_passes = vl_this_uop.div_ceil(self.valu_adder_num);
        if num_passes > 1 {
            self.num_passes_needed = num_passes;
            self.curr_pass = 1;
            debug!(
                pipe = %self.name,
                inst = %b,
                num_passes,
                "multi-pass vector execution"
            );
        }
    }

    /// Advances the pipe one cycle.
    pub fn tick(&mut self, now: u64) -> PipeOutput {
        let mut output = PipeOutput::default();

        // Completion first so downstream state is visible before new work.
        if let Some((due, _)) = &self.complete_due {
            if *due <= now {
                let (_, inst) = self.complete_due.take().expect("checked above");
                inst.borrow_mut().set_status(Status::Completed);
                inst.borrow_mut().timestamps.execute_complete = now;
                trace!(pipe = %self.name, inst = %inst.borrow(), "completed");
            }
        }

        if let Some((due, _)) = &self.execute_due {
            if *due <= now {
                let (_, inst) = self.execute_due.take().expect("checked above");
                self.execute_inst(inst, now, &mut output);
            }
        }

        output
    }

    fn execute_inst(&mut self, inst: InstPtr, now: u64, output: &mut PipeOutput) {
        if self.num_passes_needed != 0 && self.curr_pass < self.num_passes_needed {
            self.curr_pass += 1;
            let exe_time = self.exe_time_for(&inst);
            trace!(
                pipe = %self.name,
                inst = %inst.borrow(),
                pass = self.curr_pass,
                of = self.num_passes_needed,
                "next execution pass"
            );
            self.execute_due = Some((now + exe_time, inst));
            return;
        }
        self.num_passes_needed = 0;
        self.curr_pass = 0;

        {
            let b = inst.borrow();
            if b.is_vset() && b.blocking_vset {
                debug!(pipe = %self.name, inst = %b, "forwarding resolved vset to decode");
                output.vset_forward = Some(inst.clone());
            }
            for rf in REG_FILES {
                let mask = b.dest_masks[rf.index()];
                if mask != 0 {
                    output.ready.push((rf, mask));
                }
            }
            debug_assert!(b.dest_masks.len() == N_REG_FILES);
        }

        if self.enable_random_misprediction
            && inst.borrow().is_branch()
            && self.rng.next() % 20 == 0
        {
            debug!(pipe = %self.name, inst = %inst.borrow(), "randomly injecting a mispredicted branch");
            inst.borrow_mut().mispredicted = true;
            output.mispredicted = true;
        }

        self.busy = false;
        self.total_insts_executed += 1;
        self.complete_due = Some((now + 1, inst));
    }

    /// Flush: cancels pending execute/complete events covering flushed
    /// instructions and frees the pipe if nothing remains.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria) {
        if let Some((_, inst)) = &self.execute_due {
            if criteria.includes(&inst.borrow()) {
                debug!(pipe = %self.name, inst = %inst.borrow(), "cancelled in execute");
                inst.borrow_mut().set_status(Status::Flushed);
                self.execute_due = None;
            }
        }
        if let Some((_, inst)) = &self.complete_due {
            if criteria.includes(&inst.borrow()) {
                inst.borrow_mut().set_status(Status::Flushed);
                self.complete_due = None;
            }
        }
        if self.execute_due.is_none() {
            self.busy = false;
            self.num_passes_needed = 0;
            self.curr_pass = 0;
        }
    }
}
