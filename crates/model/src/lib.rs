//! Cycle-level superscalar out-of-order RISC-V core timing model.
//!
//! This crate models the execution engine of an out-of-order core from
//! decode through retire, at cycle granularity:
//! 1. **Front end:** fetch buffering, decode with vset triage and vector uop
//!    fracture, optional instruction fusion.
//! 2. **Rename:** per-regfile register alias tables, free lists, and
//!    physical-register reference counts with flush rollback.
//! 3. **Backend:** credit-flow dispatch, issue queues with scoreboard wakeup,
//!    latency-modeled execute pipes with branch-mispredict injection.
//! 4. **Memory:** scalar LSU with cache-miss replay and a forwarding store
//!    buffer; vector LSU fracturing memops into child requests.
//! 5. **Retire:** in-order reorder buffer driving mispredict and
//!    replay-exhaustion flushes.
//!
//! No architectural values are computed — only register identities and
//! latencies are modeled.

/// Common types and the library error enum.
pub mod common;
/// Simulator configuration (defaults and hierarchical serde structures).
pub mod config;
/// The core: all pipeline units and the per-cycle wiring.
pub mod core;
/// Instruction records, static mnemonic data, and workload generators.
pub mod inst;
/// Simulation driver.
pub mod sim;
/// Statistics collection and reporting.
pub mod stats;
/// Execution topology (units, pipe tags, issue-queue mappings).
pub mod topology;
/// Vector configuration state and uop generation.
pub mod vector;

/// Library error type.
pub use crate::common::error::SimError;
/// Root configuration; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The core model; owns every pipeline unit.
pub use crate::core::Core;
/// Top-level simulator; owns the core and the instruction source.
pub use crate::sim::simulator::Simulator;
/// Execution topology; use `CoreTopology::default_topology()` or load a file.
pub use crate::topology::CoreTopology;
