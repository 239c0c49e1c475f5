//! The top-level simulator.
//!
//! Owns the core and the instruction generator and drives the run loop:
//! 1. Deliver up to the fetch width into decode as fetch credits allow.
//! 2. Tick the core.
//! 3. On a flush, redirect the generator to the refetch program position.
//! 4. Stop at the retire limit, or when the workload is exhausted and the
//!    core has drained.

use tracing::info;

use crate::common::error::SimError;
use crate::config::Config;
use crate::core::Core;
use crate::inst::generator::InstGenerator;
use crate::stats::SimStats;
use crate::topology::CoreTopology;

/// Why the run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The configured retire limit was reached.
    RetireLimit,
    /// The workload drained and the core emptied.
    WorkloadComplete,
}

/// Final run summary.
#[derive(Clone, Copy, Debug)]
pub struct SimSummary {
    /// Total simulated cycles.
    pub cycles: u64,
    /// Instructions retired.
    pub retired: u64,
    /// Why the run ended.
    pub exit: ExitReason,
}

/// The simulator: core + instruction source.
#[derive(Debug)]
pub struct Simulator {
    core: Core,
    generator: InstGenerator,
    num_to_fetch: usize,
    /// Give-up bound for runs that stop making progress.
    max_cycles: u64,
}

/// Default give-up bound.
const DEFAULT_MAX_CYCLES: u64 = 50_000_000;

impl Simulator {
    /// Builds a simulator from configuration, topology, and a workload.
    pub fn new(
        config: &Config,
        topology: &CoreTopology,
        generator: InstGenerator,
        inst_limit: u64,
    ) -> Self {
        Self {
            core: Core::new(config, topology, inst_limit),
            generator,
            num_to_fetch: config.core.num_to_fetch,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }

    /// Overrides the give-up bound (tests).
    pub fn set_max_cycles(&mut self, max_cycles: u64) {
        self.max_cycles = max_cycles;
    }

    /// Enables per-instruction pipeline event collection.
    pub fn enable_pipeline_trace(&mut self) {
        self.core.enable_pipeline_trace();
    }

    /// Takes the collected pipeline event lines.
    pub fn take_pipeline_trace(&mut self) -> Vec<String> {
        self.core.take_pipeline_trace()
    }

    /// Borrow the run counters.
    pub fn stats(&self) -> &SimStats {
        &self.core.stats
    }

    /// Borrow the core (tests/diagnostics).
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Runs to completion.
    pub fn run(&mut self) -> Result<SimSummary, SimError> {
        loop {
            // Fetch: deliver up to the fetch width as credits allow.
            let budget = self.num_to_fetch.min(self.core.fetch_credits());
            for _ in 0..budget {
                match self.generator.next_inst()? {
                    Some(inst) => self.core.push_fetched(inst),
                    None => break,
                }
            }

            let result = self.core.tick()?;
            self.core.stats.cycles = self.core.cycle();

            if let Some(criteria) = result.flush {
                self.generator.rewind_to(criteria.refetch_program_id());
            }

            if result.stopped {
                info!(
                    cycles = self.core.cycle(),
                    retired = self.core.rob.num_retired(),
                    "retire limit reached"
                );
                return Ok(self.summary(ExitReason::RetireLimit));
            }
            if self.generator.remaining() == 0
                && self.core.is_drained()
                && !self.core.flush_manager.is_pending()
            {
                info!(
                    cycles = self.core.cycle(),
                    retired = self.core.rob.num_retired(),
                    "workload complete"
                );
                return Ok(self.summary(ExitReason::WorkloadComplete));
            }
            if self.core.cycle() >= self.max_cycles {
                return Err(SimError::Watchdog {
                    cycle: self.core.cycle(),
                });
            }
        }
    }

    fn summary(&self, exit: ExitReason) -> SimSummary {
        SimSummary {
            cycles: self.core.cycle(),
            retired: self.core.rob.num_retired(),
            exit,
        }
    }
}
