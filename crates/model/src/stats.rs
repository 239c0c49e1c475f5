//! Simulation statistics collection and reporting.
//!
//! This module tracks the counters the model accumulates per run. It provides:
//! 1. **Cycle and IPC:** Total cycles, retired instructions, derived IPC/CPI.
//! 2. **Pipeline flow:** Fetched/decoded/flushed counts, vector uops generated.
//! 3. **Dispatch:** Per-pipe issue distribution and the stall-reason histogram.
//! 4. **Recovery:** Branch mispredicts, flushes, vset blocking latency.
//! 5. **Memory:** LSU loads/stores, replays, store-buffer forwards, VLSU requests.
//!
//! The text report follows the aligned key/value section format; a serde JSON
//! dump is available for machine consumption.

use std::time::Instant;

use serde::Serialize;

use crate::inst::{ALL_PIPES, N_PIPES};

/// Number of dispatch stall-reason bins (21 pipe-busy reasons + no-ROB-credits).
pub const N_STALL_BINS: usize = 22;

/// All counters accumulated during a run.
#[derive(Clone, Serialize)]
pub struct SimStats {
    #[serde(skip)]
    start_time: Instant,

    /// Total simulated cycles.
    pub cycles: u64,
    /// Instructions delivered into the fetch queue.
    pub instructions_fetched: u64,
    /// Instructions (and uops) emitted by decode.
    pub instructions_decoded: u64,
    /// Instructions retired in program order.
    pub instructions_retired: u64,
    /// Instructions squashed by flushes.
    pub instructions_flushed: u64,

    /// Vector uops produced by the uop generator.
    pub vector_uops_generated: u64,
    /// Vector instructions dropped because vl was zero.
    pub vector_vl_zero_dropped: u64,
    /// Times decode blocked on a register-dependent vset.
    pub vset_blocking_count: u64,
    /// Cycles accumulated while blocked on vsets.
    pub vset_stall_cycles: u64,

    /// Fusion groups registered at construction.
    pub fusion_num_groups_defined: u64,
    /// Fusion group hits.
    pub fusion_groups_utilized: u64,
    /// Instructions marked as fused heads.
    pub fusion_num_fused: u64,
    /// Instructions eliminated as ghosts.
    pub fusion_num_ghosts: u64,
    /// Optimistic prediction of cycles saved by fusion.
    pub fusion_cycles_saved: u64,

    /// Instructions dispatched per target pipe.
    pub unit_distribution: [u64; N_PIPES],
    /// Dispatch stall cycles per reason bin.
    pub dispatch_stalls: [u64; N_STALL_BINS],
    /// Cycles rename stalled on an empty free list.
    pub rename_stall_cycles: u64,

    /// Branches that resolved mispredicted.
    pub branch_mispredicts: u64,
    /// Flushes broadcast (any kind).
    pub flushes: u64,

    /// Scalar loads accepted by the LSU.
    pub lsu_loads: u64,
    /// Scalar stores accepted by the LSU.
    pub lsu_stores: u64,
    /// Cache-miss replays issued.
    pub lsu_replays: u64,
    /// Requests whose replay budget ran out.
    pub lsu_replays_exhausted: u64,
    /// Loads satisfied from the store buffer.
    pub store_buffer_forwards: u64,
    /// Child memory requests issued by the VLSU.
    pub vlsu_mem_requests: u64,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            instructions_fetched: 0,
            instructions_decoded: 0,
            instructions_retired: 0,
            instructions_flushed: 0,
            vector_uops_generated: 0,
            vector_vl_zero_dropped: 0,
            vset_blocking_count: 0,
            vset_stall_cycles: 0,
            fusion_num_groups_defined: 0,
            fusion_groups_utilized: 0,
            fusion_num_fused: 0,
            fusion_num_ghosts: 0,
            fusion_cycles_saved: 0,
            unit_distribution: [0; N_PIPES],
            dispatch_stalls: [0; N_STALL_BINS],
            rename_stall_cycles: 0,
            branch_mispredicts: 0,
            flushes: 0,
            lsu_loads: 0,
            lsu_stores: 0,
            lsu_replays: 0,
            lsu_replays_exhausted: 0,
            store_buffer_forwards: 0,
            vlsu_mem_requests: 0,
        }
    }
}

/// Section names for selective stats output.
///
/// Valid identifiers: `"summary"`, `"pipeline"`, `"dispatch"`, `"vector"`,
/// `"memory"`. Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "pipeline", "dispatch", "vector", "memory"];

impl SimStats {
    /// Labels for the dispatch stall bins, index-aligned with
    /// [`SimStats::dispatch_stalls`].
    pub fn stall_bin_name(bin: usize) -> String {
        if bin < N_STALL_BINS - 1 {
            format!("{}_BUSY", ALL_PIPES[bin].name())
        } else {
            "NO_ROB_CREDITS".to_string()
        }
    }

    /// Prints only the requested statistics sections to stdout.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64();
        let cyc = self.cycles.max(1);
        let instr = self.instructions_retired.max(1);

        if want("summary") {
            let ipc = self.instructions_retired as f64 / cyc as f64;
            let cpi = cyc as f64 / instr as f64;
            println!("\n==========================================================");
            println!("CORE TIMING MODEL STATISTICS");
            println!("==========================================================");
            println!("host_seconds             {:.4} s", seconds);
            println!("sim_cycles               {}", self.cycles);
            println!("sim_insts_retired        {}", self.instructions_retired);
            println!("sim_ipc                  {:.4}", ipc);
            println!("sim_cpi                  {:.4}", cpi);
            println!("----------------------------------------------------------");
        }
        if want("pipeline") {
            println!("PIPELINE FLOW");
            println!("  fetched                {}", self.instructions_fetched);
            println!("  decoded                {}", self.instructions_decoded);
            println!("  flushed                {}", self.instructions_flushed);
            println!("  flushes                {}", self.flushes);
            println!("  branch_mispredicts     {}", self.branch_mispredicts);
            println!("  rename_stall_cycles    {}", self.rename_stall_cycles);
            println!("----------------------------------------------------------");
        }
        if want("dispatch") {
            println!("DISPATCH DISTRIBUTION");
            for (i, pipe) in ALL_PIPES.iter().enumerate() {
                if self.unit_distribution[i] > 0 {
                    println!(
                        "  issued.{:<14} {}",
                        pipe.name().to_lowercase(),
                        self.unit_distribution[i]
                    );
                }
            }
            println!("DISPATCH STALLS");
            for bin in 0..N_STALL_BINS {
                if self.dispatch_stalls[bin] > 0 {
                    println!(
                        "  stall.{:<15} {}",
                        Self::stall_bin_name(bin).to_lowercase(),
                        self.dispatch_stalls[bin]
                    );
                }
            }
            println!("----------------------------------------------------------");
        }
        if want("vector") {
            println!("VECTOR");
            println!("  uops_generated         {}", self.vector_uops_generated);
            println!("  vl_zero_dropped        {}", self.vector_vl_zero_dropped);
            println!("  vset_blocking          {}", self.vset_blocking_count);
            println!("  vset_stall_cycles      {}", self.vset_stall_cycles);
            if self.fusion_num_groups_defined > 0 {
                println!("FUSION");
                println!("  groups_defined         {}", self.fusion_num_groups_defined);
                println!("  groups_utilized        {}", self.fusion_groups_utilized);
                println!("  fused                  {}", self.fusion_num_fused);
                println!("  ghosts                 {}", self.fusion_num_ghosts);
                println!("  pred_cycles_saved      {}", self.fusion_cycles_saved);
            }
            println!("----------------------------------------------------------");
        }
        if want("memory") {
            println!("LOAD/STORE");
            println!("  loads                  {}", self.lsu_loads);
            println!("  stores                 {}", self.lsu_stores);
            println!("  replays                {}", self.lsu_replays);
            println!("  replays_exhausted      {}", self.lsu_replays_exhausted);
            println!("  store_fwd              {}", self.store_buffer_forwards);
            println!("  vlsu_mem_requests      {}", self.vlsu_mem_requests);
        }
        println!("==========================================================");
    }

    /// Prints all statistics sections to stdout.
    pub fn print(&self) {
        self.print_sections(&[]);
    }

    /// Serializes every counter to pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stall_bin_names() {
        assert_eq!(SimStats::stall_bin_name(0), "BR_BUSY");
        assert_eq!(SimStats::stall_bin_name(1), "INT_BUSY");
        assert_eq!(SimStats::stall_bin_name(N_STALL_BINS - 1), "NO_ROB_CREDITS");
    }

    #[test]
    fn test_json_dump_round_trips() {
        let mut stats = SimStats::default();
        stats.cycles = 100;
        stats.instructions_retired = 42;
        let json = stats.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cycles"], 100);
        assert_eq!(value["instructions_retired"], 42);
    }
}
