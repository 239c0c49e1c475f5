//! End-to-end pipeline scenarios.
//!
//! Each test feeds a small JSON workload through the full simulator and
//! checks retirement counts, recovery behavior, and the conservation
//! invariants of the rename state.

use std::io::Write;

use uopsim_core::config::Config;
use uopsim_core::inst::RegFile;
use uopsim_core::inst::generator::InstGenerator;
use uopsim_core::sim::simulator::{ExitReason, Simulator};
use uopsim_core::topology::CoreTopology;

/// Writes a JSON workload to a temp file.
fn workload(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

/// Runs a workload to completion with pipeline tracing enabled.
fn run(body: &str, config: &Config) -> Simulator {
    let f = workload(body);
    let generator = InstGenerator::from_file(f.path()).unwrap();
    let topology = CoreTopology::default_topology();
    let mut simulator = Simulator::new(config, &topology, generator, 0);
    simulator.set_max_cycles(100_000);
    simulator.enable_pipeline_trace();
    let summary = simulator.run().unwrap();
    assert_eq!(summary.exit, ExitReason::WorkloadComplete);
    simulator
}

/// Retire cycle per trace line, in retirement order.
fn retire_cycles(lines: &[String]) -> Vec<u64> {
    lines
        .iter()
        .map(|line| {
            line.rsplit("retire=")
                .next()
                .unwrap()
                .trim()
                .parse()
                .unwrap()
        })
        .collect()
}

/// After a drained run, rename state must be back to its quiescent shape:
/// exactly the 32 live mappings per file are allocated.
fn assert_quiescent(simulator: &Simulator) {
    let core = simulator.core();
    core.rename.check_conservation();
    for rf in [RegFile::Int, RegFile::Float, RegFile::Vector] {
        assert_eq!(core.rename.freelist_len(rf), 32, "{} freelist", rf.name());
    }
}

#[test]
fn scalar_raw_dependency_retires_back_to_back() {
    let mut simulator = run(
        r#"[
            {"mnemonic": "add", "rs1": 1, "rs2": 2, "rd": 3},
            {"mnemonic": "add", "rs1": 3, "rs2": 4, "rd": 5}
        ]"#,
        &Config::default(),
    );
    assert_eq!(simulator.stats().instructions_retired, 2);

    let trace = simulator.take_pipeline_trace();
    let cycles = retire_cycles(&trace);
    // The consumer wakes the cycle its producer's result is ready and
    // retires exactly one cycle behind it.
    assert_eq!(cycles[1], cycles[0] + 1, "trace: {trace:?}");
    assert_quiescent(&simulator);
}

#[test]
fn independent_adds_retire_together() {
    let mut simulator = run(
        r#"[
            {"mnemonic": "add", "rs1": 1, "rs2": 2, "rd": 3},
            {"mnemonic": "add", "rs1": 4, "rs2": 5, "rd": 6}
        ]"#,
        &Config::default(),
    );
    let trace = simulator.take_pipeline_trace();
    let cycles = retire_cycles(&trace);
    // Two free integer pipes: both execute in parallel and co-retire.
    assert_eq!(cycles[0], cycles[1], "trace: {trace:?}");
}

#[test]
fn vector_elementwise_lmul4_fractures_into_four_uops() {
    // vsetivli e32/m4 avl=128, then vadd.vv v12, v4, v8.
    let simulator = run(
        r#"[
            {"mnemonic": "vsetivli", "rs1": 128, "rd": 1, "imm": 18},
            {"mnemonic": "vadd.vv", "vs2": 4, "vs1": 8, "vd": 12}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.vector_uops_generated, 4);
    // vset + 4 uops retire.
    assert_eq!(stats.instructions_retired, 5);
    assert_quiescent(&simulator);
}

#[test]
fn vector_widening_fractures_into_eight_uops() {
    let simulator = run(
        r#"[
            {"mnemonic": "vsetivli", "rs1": 128, "rd": 1, "imm": 18},
            {"mnemonic": "vwmul.vv", "vs2": 4, "vs1": 8, "vd": 12}
        ]"#,
        &Config::default(),
    );
    assert_eq!(simulator.stats().vector_uops_generated, 8);
    assert_eq!(simulator.stats().instructions_retired, 9);
    assert_quiescent(&simulator);
}

#[test]
fn vl_zero_vector_inst_is_dropped() {
    let simulator = run(
        r#"[
            {"mnemonic": "vsetivli", "rs1": 0, "rd": 1, "imm": 18},
            {"mnemonic": "vadd.vv", "vs2": 4, "vs1": 8, "vd": 12},
            {"mnemonic": "add", "rs1": 1, "rs2": 2, "rd": 3}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.vector_vl_zero_dropped, 1);
    assert_eq!(stats.vector_uops_generated, 0);
    // The vset and the trailing add still retire.
    assert_eq!(stats.instructions_retired, 2);
}

#[test]
fn load_miss_replays_then_completes() {
    let mut simulator = run(
        r#"[
            {"mnemonic": "lw", "rs1": 1, "rd": 3, "vaddr": "0xdeeebeef"},
            {"mnemonic": "add", "rs1": 3, "rs2": 4, "rd": 5}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.lsu_loads, 1);
    assert_eq!(stats.lsu_replays, 1, "cold load misses once then hits");
    assert_eq!(stats.instructions_retired, 2);

    // The dependent add retires after the replayed load.
    let trace = simulator.take_pipeline_trace();
    let cycles = retire_cycles(&trace);
    assert!(cycles[1] > cycles[0]);
    assert_quiescent(&simulator);
}

#[test]
fn warm_load_skips_replay() {
    let simulator = run(
        r#"[
            {"mnemonic": "lw", "rs1": 1, "rd": 3, "vaddr": "0x1000"},
            {"mnemonic": "lw", "rs1": 1, "rd": 4, "vaddr": "0x1000"}
        ]"#,
        &Config::default(),
    );
    // First load misses and refills; the second hits the same line.
    assert_eq!(simulator.stats().lsu_replays, 1);
}

#[test]
fn store_forwards_to_overlapping_load() {
    let simulator = run(
        r#"[
            {"mnemonic": "sw", "rs1": 1, "rs2": 2, "vaddr": "0xdeeebee8"},
            {"mnemonic": "lw", "rs1": 1, "rd": 3, "vaddr": "0xdeeebee8"}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.lsu_stores, 1);
    assert_eq!(stats.store_buffer_forwards, 1);
    // The forwarded load never touches the cache, so no replay.
    assert_eq!(stats.lsu_replays, 0);
    assert_eq!(stats.instructions_retired, 2);
}

#[test]
fn vector_unit_stride_load_issues_line_requests() {
    // vle32.v with vl=128/sew=32/lmul=4: 4 uops of 32 elements; each uop
    // moves 1024 bits = 2 cache lines -> 8 child requests.
    let simulator = run(
        r#"[
            {"mnemonic": "vsetivli", "rs1": 128, "rd": 1, "imm": 18},
            {"mnemonic": "vle32.v", "rs1": 1, "vd": 8, "vaddr": "0x40000"}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.vector_uops_generated, 4);
    assert_eq!(stats.vlsu_mem_requests, 8);
    assert_eq!(stats.instructions_retired, 5);
    assert_quiescent(&simulator);
}

#[test]
fn vset_blocking_resolves_through_execute() {
    // vsetvl depends on a register: decode stalls until the execute pipe
    // forwards the resolved configuration.
    let simulator = run(
        r#"[
            {"mnemonic": "vsetvl", "rs1": 5, "rd": 1, "imm": 18},
            {"mnemonic": "vadd.vv", "vs2": 4, "vs1": 8, "vd": 12}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    assert_eq!(stats.vset_blocking_count, 1);
    assert!(stats.vset_stall_cycles > 0);
    // Resolved vl = vlmax = 128 at e32/m4: four uops follow.
    assert_eq!(stats.vector_uops_generated, 4);
    assert_eq!(stats.instructions_retired, 5);
    assert_quiescent(&simulator);
}

#[test]
fn random_mispredicts_flush_and_recover() {
    let mut config = Config::default();
    config.core.enable_random_misprediction = true;

    // A long branch-heavy stream: with ~1/20 injection some branches
    // mispredict, flush, and refetch.
    let mut records = Vec::new();
    for i in 0..200 {
        records.push(format!(
            r#"{{"mnemonic": "beq", "rs1": {}, "rs2": {}}}"#,
            (i % 30) + 1,
            ((i + 7) % 30) + 1
        ));
        records.push(format!(
            r#"{{"mnemonic": "add", "rs1": {}, "rs2": {}, "rd": {}}}"#,
            (i % 30) + 1,
            ((i + 3) % 30) + 1,
            ((i + 11) % 30) + 1
        ));
    }
    let body = format!("[{}]", records.join(","));
    let simulator = run(&body, &config);

    let stats = simulator.stats();
    assert!(stats.branch_mispredicts > 0, "injection never fired");
    assert_eq!(stats.flushes, stats.branch_mispredicts);
    assert!(stats.instructions_flushed > 0);
    // Every program record retires exactly once despite the refetches.
    assert_eq!(stats.instructions_retired, 400);
    assert_quiescent(&simulator);
}

#[test]
fn retire_limit_stops_the_run() {
    let records: Vec<String> = (0..50)
        .map(|i| {
            format!(
                r#"{{"mnemonic": "add", "rs1": {}, "rs2": {}, "rd": {}}}"#,
                (i % 30) + 1,
                ((i + 1) % 30) + 1,
                ((i + 2) % 30) + 1
            )
        })
        .collect();
    let body = format!("[{}]", records.join(","));

    let f = workload(&body);
    let generator = InstGenerator::from_file(f.path()).unwrap();
    let topology = CoreTopology::default_topology();
    let mut simulator = Simulator::new(&Config::default(), &topology, generator, 10);
    simulator.set_max_cycles(100_000);
    let summary = simulator.run().unwrap();
    assert_eq!(summary.exit, ExitReason::RetireLimit);
    assert_eq!(summary.retired, 10);
}

#[test]
fn dispatch_stalls_when_issue_queue_fills() {
    // 23-cycle divides serialize on the single div-capable pipe; enough of
    // them back up iq0 and dispatch records INT-family stalls.
    let records: Vec<String> = (0..24)
        .map(|i| {
            format!(
                r#"{{"mnemonic": "div", "rs1": {}, "rs2": {}, "rd": {}}}"#,
                (i % 30) + 1,
                ((i + 1) % 30) + 1,
                ((i + 2) % 30) + 1
            )
        })
        .collect();
    let body = format!("[{}]", records.join(","));
    let simulator = run(&body, &Config::default());

    let stats = simulator.stats();
    assert_eq!(stats.instructions_retired, 24);
    let total_stalls: u64 = stats.dispatch_stalls.iter().sum();
    assert!(total_stalls > 0, "expected dispatch backpressure");
    assert_quiescent(&simulator);
}

#[test]
fn fusion_eliminates_ghosts() {
    let mut config = Config::default();
    config.fusion.enable = true;
    config.fusion.groups = vec![uopsim_core::config::FusionGroupDef {
        name: "lui-addi".to_string(),
        mnemonics: vec!["lui".to_string(), "addi".to_string()],
    }];

    let simulator = run(
        r#"[
            {"mnemonic": "lui", "rd": 5, "imm": 4096},
            {"mnemonic": "addi", "rs1": 5, "rd": 5, "imm": 16},
            {"mnemonic": "add", "rs1": 5, "rs2": 2, "rd": 6}
        ]"#,
        &config,
    );
    let stats = simulator.stats();
    assert_eq!(stats.fusion_num_fused, 1);
    assert_eq!(stats.fusion_num_ghosts, 1);
    assert_eq!(stats.fusion_cycles_saved, 1);
    // The ghost never reaches the ROB: lui (fused head) + add retire.
    assert_eq!(stats.instructions_retired, 2);
    assert_quiescent(&simulator);
}

#[test]
fn mixed_scalar_vector_memory_stream_drains_clean() {
    let simulator = run(
        r#"[
            {"mnemonic": "vsetivli", "rs1": 64, "rd": 1, "imm": 18},
            {"mnemonic": "lw", "rs1": 1, "rd": 3, "vaddr": "0x2000"},
            {"mnemonic": "vadd.vv", "vs2": 4, "vs1": 8, "vd": 16},
            {"mnemonic": "sw", "rs1": 1, "rs2": 3, "vaddr": "0x2000"},
            {"mnemonic": "vle32.v", "rs1": 1, "vd": 24, "vaddr": "0x3000"},
            {"mnemonic": "mul", "rs1": 3, "rs2": 4, "rd": 7},
            {"mnemonic": "fadd.d", "fs1": 1, "fs2": 2, "fd": 3},
            {"mnemonic": "ecall"}
        ]"#,
        &Config::default(),
    );
    let stats = simulator.stats();
    // vset + lw + 2 vadd uops + sw + 2 vle uops + mul + fadd + ecall.
    assert_eq!(stats.vector_uops_generated, 4);
    assert_eq!(stats.instructions_retired, 9);
    assert!(simulator.core().rob.is_program_ordered());
    assert_quiescent(&simulator);
}
