//! Core timing model CLI.
//!
//! Runs a workload (JSON or binary trace) through the out-of-order core
//! model and reports statistics. It performs:
//! 1. **Workload selection:** positional file, format by extension.
//! 2. **Configuration:** optional JSON config and YAML/JSON topology files.
//! 3. **Reporting:** sectioned text statistics, optional JSON stats file and
//!    per-instruction pipeline event trace.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use uopsim_core::config::Config;
use uopsim_core::inst::generator::InstGenerator;
use uopsim_core::sim::simulator::Simulator;
use uopsim_core::topology::CoreTopology;

#[derive(Parser, Debug)]
#[command(
    name = "uopsim",
    author,
    version,
    about = "Cycle-level out-of-order RISC-V core timing model",
    long_about = "Run a pre-decoded instruction stream through the out-of-order core model.\n\n\
Examples:\n  \
uopsim traces/dhrystone.json\n  \
uopsim -i 1000000 traces/long_run.stf\n  \
uopsim --topology topologies/big_core.yaml traces/vector_mix.json"
)]
struct Cli {
    /// Workload file (.json or .stf).
    workload: Option<PathBuf>,

    /// Retire instruction limit (0 = no limit).
    #[arg(short = 'i', long = "inst-limit", default_value_t = 0)]
    inst_limit: u64,

    /// Number of cores to model (this build supports exactly 1).
    #[arg(long = "num-cores", default_value_t = 1)]
    num_cores: u32,

    /// Print the registered components and exit.
    #[arg(long = "show-factories")]
    show_factories: bool,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Topology file (.yaml/.yml/.json).
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Write statistics as JSON to this file.
    #[arg(long = "stats-file")]
    stats_file: Option<PathBuf>,

    /// Write a per-instruction pipeline event trace to this file.
    #[arg(long = "trace-file")]
    trace_file: Option<PathBuf>,

    /// Enable debug logging (repeat for trace level).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), String> {
    if cli.num_cores != 1 {
        return Err(format!(
            "this build models exactly one core (requested {})",
            cli.num_cores
        ));
    }

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    let topology = match &cli.topology {
        Some(path) => CoreTopology::from_file(path).map_err(|e| e.to_string())?,
        None => CoreTopology::default_topology(),
    };

    if cli.show_factories {
        print_factories(&topology);
        return Ok(());
    }

    let workload = cli
        .workload
        .ok_or_else(|| "no workload file given (see --help)".to_string())?;
    let generator = InstGenerator::from_file(&workload).map_err(|e| e.to_string())?;
    println!(
        "[*] Workload: {} ({} records)",
        workload.display(),
        generator.len()
    );
    if cli.inst_limit > 0 {
        println!("    retire limit: {}", cli.inst_limit);
    }

    let mut simulator = Simulator::new(&config, &topology, generator, cli.inst_limit);
    if cli.trace_file.is_some() {
        simulator.enable_pipeline_trace();
    }

    let summary = simulator.run().map_err(|e| e.to_string())?;
    println!(
        "\n[*] {:?}: {} instructions in {} cycles",
        summary.exit, summary.retired, summary.cycles
    );
    simulator.stats().print();

    if let Some(path) = &cli.stats_file {
        fs::write(path, simulator.stats().to_json())
            .map_err(|e| format!("writing {}: {e}", path.display()))?;
        println!("[*] Stats written to {}", path.display());
    }
    if let Some(path) = &cli.trace_file {
        let lines = simulator.take_pipeline_trace();
        fs::write(path, lines.join("\n") + "\n")
            .map_err(|e| format!("writing {}: {e}", path.display()))?;
        println!("[*] Pipeline trace written to {}", path.display());
    }

    Ok(())
}

/// Prints the registered components for `--show-factories`.
fn print_factories(topology: &CoreTopology) {
    println!("Registered components:");
    println!("  decode");
    println!("  vec_uop_gen");
    println!("  rename");
    println!("  dispatch");
    for queue in &topology.issue_queues {
        let pipes: Vec<String> = queue
            .exe_pipes
            .iter()
            .map(|&i| topology.exe_pipes[i].name.clone())
            .collect();
        println!("  {} -> [{}]", queue.name, pipes.join(", "));
    }
    for pipe in &topology.exe_pipes {
        let tags: Vec<&str> = pipe.pipes.iter().map(|p| p.name()).collect();
        println!("  {} ({})", pipe.name, tags.join(", "));
    }
    println!("  lsu");
    println!("  vlsu");
    println!("  rob");
    println!("  flush_manager");
}
