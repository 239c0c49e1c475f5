//! The out-of-order core: unit wiring and the per-cycle phase order.
//!
//! [`Core`] owns every unit and advances them in a fixed, deterministic order
//! each cycle:
//! 1. **Flush phase:** pending flush criteria broadcast to every unit;
//!    rename rolls back, queues drain, credits refund.
//! 2. **Retire:** the ROB retires and acks rename and the LSU; a mispredicted
//!    head arms the next cycle's flush.
//! 3. **Execute:** pipes and the memory units finish work, marking results
//!    ready and waking issue-queue instructions.
//! 4. **Issue:** ready instructions take free pipes, refunding dispatch
//!    credits.
//! 5. **Dispatch, rename, decode:** instructions move down the front end as
//!    credits allow.
//!
//! Consumers tick before producers, so every stage boundary costs one cycle
//! while credits freed this cycle are visible to producers immediately.

/// Decode unit.
pub mod decode;
/// Dispatch unit.
pub mod dispatch;
/// Execute pipes.
pub mod execute_pipe;
/// Flush criteria and broadcast.
pub mod flush;
/// Instruction fusion overlay.
pub mod fusion;
/// Issue queues.
pub mod issue_queue;
/// Scalar load/store unit.
pub mod lsu;
/// Register rename.
pub mod rename;
/// Reorder buffer.
pub mod rob;
/// Physical-register scoreboard.
pub mod scoreboard;
/// Vector load/store unit.
pub mod vlsu;

use std::collections::VecDeque;

use tracing::debug;

use crate::config::Config;
use crate::core::decode::DecodeUnit;
use crate::core::dispatch::{DispatchTarget, DispatchUnit};
use crate::core::execute_pipe::ExecutePipe;
use crate::core::flush::{FlushCriteria, FlushManager};
use crate::core::fusion::{FusionGroup, Fuser};
use crate::core::issue_queue::IssueQueue;
use crate::core::lsu::{DCacheModel, LoadStoreUnit};
use crate::core::rename::RenameUnit;
use crate::core::rob::ReorderBuffer;
use crate::core::scoreboard::Scoreboard;
use crate::core::vlsu::VectorLsu;
use crate::inst::{InstPtr, Status};
use crate::stats::SimStats;
use crate::topology::CoreTopology;
use crate::vector::VectorConfig;

/// Result of one core cycle.
#[derive(Debug, Default)]
pub struct TickResult {
    /// A flush was broadcast this cycle; the instruction source must redirect
    /// to [`FlushCriteria::refetch_program_id`].
    pub flush: Option<FlushCriteria>,
    /// The retire limit was reached this cycle.
    pub stopped: bool,
}

/// The core: every unit plus the wiring between them.
pub struct Core {
    cycle: u64,

    /// Decode (owns the fetch queue and the vector uop generator).
    pub decode: DecodeUnit,
    rename_queue: VecDeque<InstPtr>,
    rename_queue_capacity: usize,
    num_to_rename: usize,
    /// Register rename.
    pub rename: RenameUnit,
    /// Dispatch.
    pub dispatch: DispatchUnit,
    /// Issue queues, topology order.
    pub issue_queues: Vec<IssueQueue>,
    /// Execute pipes, topology order.
    pub exe_pipes: Vec<ExecutePipe>,
    /// Scalar load/store unit.
    pub lsu: LoadStoreUnit,
    /// Vector load/store unit.
    pub vlsu: VectorLsu,
    dcache: DCacheModel,
    /// Reorder buffer.
    pub rob: ReorderBuffer,
    /// Physical-register scoreboard.
    pub scoreboard: Scoreboard,
    /// Flush broadcast latch.
    pub flush_manager: FlushManager,
    /// Run counters.
    pub stats: SimStats,
    /// Per-instruction pipeline event lines, collected at retire when enabled.
    pipeline_trace: Option<Vec<String>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Core {{ cycle: {}, rob: {}/{} }}",
            self.cycle,
            self.rob.len(),
            self.rob.capacity()
        )
    }
}

impl Core {
    /// Builds the core from configuration, topology, and a retire limit
    /// (zero = unlimited).
    pub fn new(config: &Config, topology: &CoreTopology, inst_limit: u64) -> Self {
        let mut stats = SimStats::default();

        let fuser = if config.fusion.enable {
            let groups = config
                .fusion
                .groups
                .iter()
                .map(|g| FusionGroup {
                    name: g.name.clone(),
                    mnemonics: g.mnemonics.clone(),
                })
                .collect();
            let fuser = Fuser::new(groups, config.fusion.match_max_tries());
            stats.fusion_num_groups_defined = fuser.num_groups() as u64;
            Some(fuser)
        } else {
            None
        };

        let initial_config = VectorConfig::new(
            config.vector.init_vl,
            config.vector.init_sew,
            config.vector.init_lmul,
            config.vector.init_vta,
        );
        let decode = DecodeUnit::new(
            config.core.fetch_queue_size,
            config.core.num_to_decode,
            initial_config,
            fuser,
        );

        let exe_pipes: Vec<ExecutePipe> = topology
            .exe_pipes
            .iter()
            .enumerate()
            .map(|(idx, desc)| {
                ExecutePipe::new(
                    desc.name.clone(),
                    desc.pipes.clone(),
                    config.core.ignore_inst_execute_time,
                    config.core.fixed_execute_time,
                    config.vector.valu_adder_num,
                    config.core.enable_random_misprediction,
                    config.core.misprediction_seed.wrapping_add(idx as u64),
                )
            })
            .collect();

        let issue_queues: Vec<IssueQueue> = topology
            .issue_queues
            .iter()
            .enumerate()
            .map(|(idx, desc)| {
                IssueQueue::new(
                    desc.name.clone(),
                    idx,
                    config.core.issue_queue_size,
                    topology.issue_queue_pipe_map(idx),
                )
            })
            .collect();

        let lsu = LoadStoreUnit::new(
            config.lsu.queue_size,
            config.lsu.store_buffer_size,
            config.lsu.replay_delay,
            config.lsu.max_replays,
        );
        let vlsu = VectorLsu::new(
            config.lsu.vlsu_queue_size,
            config.lsu.vlsu_hit_latency,
            config.lsu.vlsu_miss_penalty,
        );
        let dcache = DCacheModel::new(config.lsu.dcache_lines, config.lsu.dcache_line_bytes);
        let rob = ReorderBuffer::new(config.core.rob_size, config.core.num_to_retire, inst_limit);

        // Initial credit grants: every consumer advertises its capacity.
        let mut dispatch = DispatchUnit::new(
            config.core.dispatch_queue_size,
            config.core.num_to_dispatch,
            issue_queues.len(),
            topology.dispatch_routing(),
        );
        dispatch.add_rob_credits(rob.capacity() as u32);
        for (idx, queue) in issue_queues.iter().enumerate() {
            dispatch.add_iq_credits(idx, queue.capacity() as u32);
        }
        dispatch.add_lsu_credits(lsu.capacity() as u32);
        dispatch.add_vlsu_credits(vlsu.capacity() as u32);

        Self {
            cycle: 0,
            decode,
            rename_queue: VecDeque::with_capacity(config.core.rename_queue_size),
            rename_queue_capacity: config.core.rename_queue_size,
            num_to_rename: config.core.num_to_rename,
            rename: RenameUnit::new(config.num_phys_regs()),
            dispatch,
            issue_queues,
            exe_pipes,
            lsu,
            vlsu,
            dcache,
            rob,
            scoreboard: Scoreboard::new(config.num_phys_regs()),
            flush_manager: FlushManager::new(),
            stats,
            pipeline_trace: None,
        }
    }

    /// Enables per-instruction pipeline event collection.
    pub fn enable_pipeline_trace(&mut self) {
        self.pipeline_trace = Some(Vec::new());
    }

    /// Takes the collected pipeline event lines.
    pub fn take_pipeline_trace(&mut self) -> Vec<String> {
        self.pipeline_trace.take().unwrap_or_default()
    }

    /// Current cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Free fetch-queue slots for the instruction source.
    pub fn fetch_credits(&self) -> usize {
        self.decode.fetch_credits()
    }

    /// Delivers one fetched instruction.
    pub fn push_fetched(&mut self, inst: InstPtr) {
        self.stats.instructions_fetched += 1;
        self.decode.push_fetched(inst, self.cycle);
    }

    /// True when no speculative work remains anywhere in the core.
    pub fn is_drained(&self) -> bool {
        self.decode.is_drained()
            && self.rename_queue.is_empty()
            && self.dispatch.is_drained()
            && self.issue_queues.iter().all(IssueQueue::is_drained)
            && self.exe_pipes.iter().all(ExecutePipe::is_idle)
            && self.lsu.is_drained()
            && self.vlsu.is_drained()
            && self.rob.is_empty()
    }

    /// Advances the core one cycle.
    ///
    /// Workload errors surfacing at decode (bad uop generation) abort the
    /// run.
    pub fn tick(&mut self) -> Result<TickResult, crate::common::error::SimError> {
        let now = self.cycle;
        let mut result = TickResult::default();

        // ------------------------------------------------------------------
        // Flush phase: broadcast last cycle's criteria to every unit.
        if let Some(criteria) = self.flush_manager.take() {
            debug!(%criteria, cycle = now, "broadcasting flush");
            self.stats.flushes += 1;

            self.decode.handle_flush(&criteria, &mut self.stats);
            self.rename_queue.retain(|inst| {
                let covered = criteria.includes(&inst.borrow());
                if covered {
                    inst.borrow_mut().set_status(Status::Flushed);
                    self.stats.instructions_flushed += 1;
                }
                !covered
            });
            self.dispatch.handle_flush(&mut self.stats);
            for queue in &mut self.issue_queues {
                let credits = queue.handle_flush(&criteria, &mut self.scoreboard);
                let idx = queue.index();
                self.dispatch.add_iq_credits(idx, credits);
            }
            for pipe in &mut self.exe_pipes {
                pipe.handle_flush(&criteria);
            }
            let lsu_credits = self.lsu.handle_flush(&criteria);
            self.dispatch.add_lsu_credits(lsu_credits);
            let vlsu_credits = self.vlsu.handle_flush(&criteria);
            self.dispatch.add_vlsu_credits(vlsu_credits);

            // Inclusive flushes (replay exhaustion) drain the ROB tail here;
            // the mispredict path already drained it at emission.
            let rob_before = self.rob.len();
            self.rob.handle_flush(&criteria, &mut self.stats);
            self.dispatch
                .add_rob_credits((rob_before - self.rob.len()) as u32);

            // Watchers of anything squashed outside the issue queues.
            self.scoreboard
                .clear_watchers_if(|uid| criteria.includes_uid(uid));
            self.rename.handle_flush(&criteria, &mut self.scoreboard);

            result.flush = Some(criteria);
        }

        // ------------------------------------------------------------------
        // Retire.
        let retire = self.rob.tick(now, &mut self.stats);
        for inst in &retire.retired {
            self.rename.retire_ack(inst);
            let (uid, pipe) = {
                let b = inst.borrow();
                (b.unique_id(), b.pipe())
            };
            if pipe == crate::inst::TargetPipe::Lsu {
                self.lsu.commit_store(uid);
            }
            self.dispatch.add_rob_credits(1);

            if let Some(log) = &mut self.pipeline_trace {
                let b = inst.borrow();
                let t = b.timestamps;
                log.push(format!(
                    "uid={} pid={} {} fetch={} decode={} rename={} dispatch={} execute={} complete={} retire={}",
                    b.unique_id(),
                    b.program_id(),
                    b.mnemonic(),
                    t.fetched,
                    t.decoded,
                    t.renamed,
                    t.dispatched,
                    t.execute_start,
                    t.execute_complete,
                    t.retired,
                ));
            }
        }
        self.dispatch.add_rob_credits(retire.drained);
        if let Some(criteria) = retire.flush {
            self.flush_manager.raise(criteria);
        }
        result.stopped = retire.stopped;

        // ------------------------------------------------------------------
        // Execute: pipes, then the memory units.
        for idx in 0..self.exe_pipes.len() {
            let output = self.exe_pipes[idx].tick(now);
            for (rf, mask) in output.ready {
                let wakeups = self.scoreboard.set_ready(rf, mask);
                for w in wakeups {
                    self.issue_queues[w.issue_queue].on_wakeup(w.uid, &self.scoreboard);
                }
            }
            if let Some(vset) = output.vset_forward {
                self.decode.process_vset(&vset, now, &mut self.stats);
            }
        }

        let lsu_output = self.lsu.tick(now, &mut self.dcache, &mut self.stats);
        for (rf, mask) in lsu_output.ready {
            let wakeups = self.scoreboard.set_ready(rf, mask);
            for w in wakeups {
                self.issue_queues[w.issue_queue].on_wakeup(w.uid, &self.scoreboard);
            }
        }
        self.dispatch.add_lsu_credits(lsu_output.credits);
        if let Some(criteria) = lsu_output.flush_request {
            self.flush_manager.raise(criteria);
        }

        let vlsu_output = self.vlsu.tick(now, &mut self.dcache, &mut self.stats);
        for (rf, mask) in vlsu_output.ready {
            let wakeups = self.scoreboard.set_ready(rf, mask);
            for w in wakeups {
                self.issue_queues[w.issue_queue].on_wakeup(w.uid, &self.scoreboard);
            }
        }
        self.dispatch.add_vlsu_credits(vlsu_output.credits);

        // ------------------------------------------------------------------
        // Issue.
        for queue in &mut self.issue_queues {
            let credits = queue.tick(now, &mut self.exe_pipes);
            let idx = queue.index();
            self.dispatch.add_iq_credits(idx, credits);
        }

        // ------------------------------------------------------------------
        // Dispatch.
        for routed in self.dispatch.tick(now, &mut self.stats) {
            match routed.target {
                Some(DispatchTarget::IssueQueue(i)) => {
                    self.issue_queues[i].accept(routed.inst.clone(), &mut self.scoreboard);
                }
                Some(DispatchTarget::Lsu) => {
                    self.lsu.accept(routed.inst.clone(), &mut self.stats);
                }
                Some(DispatchTarget::Vlsu) => self.vlsu.accept(routed.inst.clone()),
                None => {
                    // Straight to retire: results (identities) are available
                    // immediately, so dependents wake here.
                    let masks: Vec<_> = {
                        let b = routed.inst.borrow();
                        crate::inst::REG_FILES
                            .iter()
                            .filter_map(|rf| {
                                let mask = b.dest_masks[rf.index()];
                                (mask != 0).then_some((*rf, mask))
                            })
                            .collect()
                    };
                    for (rf, mask) in masks {
                        let wakeups = self.scoreboard.set_ready(rf, mask);
                        for w in wakeups {
                            self.issue_queues[w.issue_queue].on_wakeup(w.uid, &self.scoreboard);
                        }
                    }
                }
            }
            self.rob.insert(routed.inst);
        }

        // ------------------------------------------------------------------
        // Rename.
        for _ in 0..self.num_to_rename {
            if self.dispatch.credits() == 0 {
                break;
            }
            let Some(inst) = self.rename_queue.front().cloned() else {
                break;
            };
            if !self.rename.can_rename(&inst) {
                self.stats.rename_stall_cycles += 1;
                break;
            }
            self.rename.rename(&inst, &mut self.scoreboard);
            inst.borrow_mut().timestamps.renamed = now;
            let _ = self.rename_queue.pop_front();
            self.dispatch.push(inst);
        }

        // ------------------------------------------------------------------
        // Decode.
        let credits = self.rename_queue_capacity - self.rename_queue.len();
        let mut decoded = Vec::new();
        self.decode
            .tick(now, credits, &mut decoded, &mut self.stats)?;
        self.rename_queue.extend(decoded);

        self.cycle += 1;
        Ok(result)
    }
}
