//! Common types shared across the timing model.
//!
//! This module collects the small pieces every unit depends on:
//! 1. **Identifiers:** Unique and program instruction ids.
//! 2. **Errors:** The library-level [`error::SimError`] enum.

/// Library error types (workload, uop generation, topology, configuration).
pub mod error;

/// Monotonic, process-wide instruction identifier.
///
/// Assigned by the instruction generator in fetch order; all uops fractured
/// from a vector instruction share the parent's unique id.
pub type UniqueId = u64;

/// Position of an instruction in the input program/trace (1-based).
///
/// Unlike [`UniqueId`], a program id is stable across flush-and-refetch: the
/// same trace record always produces the same program id.
pub type ProgramId = u64;
