//! Configuration for the core timing model.
//!
//! This module defines the parameter structures the simulator is built from.
//! It provides:
//! 1. **Defaults:** Baseline machine constants (widths, queue depths, physical
//!    register counts, memory latencies).
//! 2. **Structures:** Hierarchical config for the core, the load/store units,
//!    the vector machinery, and the fusion overlay.
//!
//! Configuration deserializes from JSON; `Config::default()` is the shipped
//! medium core.

use std::path::Path;

use serde::Deserialize;

use crate::common::error::SimError;

/// Default configuration constants.
mod defaults {
    /// Instructions fetched into decode per cycle.
    pub const NUM_TO_FETCH: usize = 4;

    /// Fetch queue depth in decode.
    pub const FETCH_QUEUE_SIZE: usize = 10;

    /// Decode width (records per cycle into rename).
    pub const NUM_TO_DECODE: usize = 4;

    /// Rename input queue depth.
    pub const RENAME_QUEUE_SIZE: usize = 10;

    /// Rename width (records per cycle into dispatch).
    pub const NUM_TO_RENAME: usize = 4;

    /// Dispatch queue depth.
    pub const DISPATCH_QUEUE_SIZE: usize = 10;

    /// Dispatch width (records per cycle into the issue queues).
    pub const NUM_TO_DISPATCH: usize = 4;

    /// Entries per issue queue.
    pub const ISSUE_QUEUE_SIZE: usize = 8;

    /// Reorder buffer entries.
    pub const ROB_SIZE: usize = 64;

    /// Retire width (records per cycle out of the ROB).
    pub const NUM_TO_RETIRE: usize = 4;

    /// Physical integer registers.
    pub const NUM_PHYS_INT: u32 = 64;

    /// Physical float registers.
    pub const NUM_PHYS_FLOAT: u32 = 64;

    /// Physical vector registers.
    pub const NUM_PHYS_VECTOR: u32 = 64;

    /// LSU input queue depth.
    pub const LSU_QUEUE_SIZE: usize = 8;

    /// Store buffer entries.
    pub const STORE_BUFFER_SIZE: usize = 8;

    /// Cycles between a cache miss and its replay.
    pub const REPLAY_DELAY: u64 = 3;

    /// Replay attempts before the inclusive restart flush.
    pub const MAX_REPLAYS: u32 = 4;

    /// Data cache lines in the hit/miss model.
    pub const DCACHE_LINES: usize = 64;

    /// Data cache line size in bytes.
    pub const DCACHE_LINE_BYTES: u64 = 64;

    /// VLSU input queue depth.
    pub const VLSU_QUEUE_SIZE: usize = 4;

    /// VLSU child-request hit latency.
    pub const VLSU_HIT_LATENCY: u64 = 2;

    /// VLSU child-request miss penalty.
    pub const VLSU_MISS_PENALTY: u64 = 12;

    /// 64-bit adders in the vector ALU.
    pub const VALU_ADDER_NUM: u32 = 8;

    /// Initial vector length in elements.
    pub const INIT_VL: u32 = 16;

    /// Initial selected element width in bits.
    pub const INIT_SEW: u32 = 8;

    /// Initial register group multiplier.
    pub const INIT_LMUL: u32 = 1;

    /// Fusion match-loop watchdog bound.
    pub const FUSION_MATCH_MAX_TRIES: u32 = 16;

    /// Misprediction injection RNG seed.
    pub const MISPREDICTION_SEED: u64 = 0x5eed_1234_abcd_0001;
}

/// Core pipeline parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Instructions fetched into decode per cycle.
    pub num_to_fetch: usize,
    /// Fetch queue depth.
    pub fetch_queue_size: usize,
    /// Decode width.
    pub num_to_decode: usize,
    /// Rename input queue depth.
    pub rename_queue_size: usize,
    /// Rename width.
    pub num_to_rename: usize,
    /// Dispatch queue depth.
    pub dispatch_queue_size: usize,
    /// Dispatch width.
    pub num_to_dispatch: usize,
    /// Entries per issue queue.
    pub issue_queue_size: usize,
    /// Reorder buffer entries.
    pub rob_size: usize,
    /// Retire width.
    pub num_to_retire: usize,
    /// Physical integer registers.
    pub num_phys_int: u32,
    /// Physical float registers.
    pub num_phys_float: u32,
    /// Physical vector registers.
    pub num_phys_vector: u32,
    /// Inject a mispredict on ~1/20 branches on the branch pipe.
    pub enable_random_misprediction: bool,
    /// Seed for the injection RNG.
    pub misprediction_seed: u64,
    /// Use the per-pipe fixed execute time instead of per-inst latency.
    pub ignore_inst_execute_time: bool,
    /// Fixed execute time when `ignore_inst_execute_time` is set.
    pub fixed_execute_time: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            num_to_fetch: defaults::NUM_TO_FETCH,
            fetch_queue_size: defaults::FETCH_QUEUE_SIZE,
            num_to_decode: defaults::NUM_TO_DECODE,
            rename_queue_size: defaults::RENAME_QUEUE_SIZE,
            num_to_rename: defaults::NUM_TO_RENAME,
            dispatch_queue_size: defaults::DISPATCH_QUEUE_SIZE,
            num_to_dispatch: defaults::NUM_TO_DISPATCH,
            issue_queue_size: defaults::ISSUE_QUEUE_SIZE,
            rob_size: defaults::ROB_SIZE,
            num_to_retire: defaults::NUM_TO_RETIRE,
            num_phys_int: defaults::NUM_PHYS_INT,
            num_phys_float: defaults::NUM_PHYS_FLOAT,
            num_phys_vector: defaults::NUM_PHYS_VECTOR,
            enable_random_misprediction: false,
            misprediction_seed: defaults::MISPREDICTION_SEED,
            ignore_inst_execute_time: false,
            fixed_execute_time: 1,
        }
    }
}

/// Load/store unit parameters (scalar and vector).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LsuConfig {
    /// LSU input queue depth.
    pub queue_size: usize,
    /// Store buffer entries.
    pub store_buffer_size: usize,
    /// Cycles between a cache miss and its replay.
    pub replay_delay: u64,
    /// Replay attempts before the inclusive restart flush.
    pub max_replays: u32,
    /// Data cache lines.
    pub dcache_lines: usize,
    /// Data cache line size in bytes.
    pub dcache_line_bytes: u64,
    /// VLSU input queue depth.
    pub vlsu_queue_size: usize,
    /// VLSU child-request hit latency.
    pub vlsu_hit_latency: u64,
    /// VLSU child-request miss penalty.
    pub vlsu_miss_penalty: u64,
}

impl Default for LsuConfig {
    fn default() -> Self {
        Self {
            queue_size: defaults::LSU_QUEUE_SIZE,
            store_buffer_size: defaults::STORE_BUFFER_SIZE,
            replay_delay: defaults::REPLAY_DELAY,
            max_replays: defaults::MAX_REPLAYS,
            dcache_lines: defaults::DCACHE_LINES,
            dcache_line_bytes: defaults::DCACHE_LINE_BYTES,
            vlsu_queue_size: defaults::VLSU_QUEUE_SIZE,
            vlsu_hit_latency: defaults::VLSU_HIT_LATENCY,
            vlsu_miss_penalty: defaults::VLSU_MISS_PENALTY,
        }
    }
}

/// Vector machinery parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorParams {
    /// Initial vector length in elements.
    pub init_vl: u32,
    /// Initial selected element width in bits.
    pub init_sew: u32,
    /// Initial register group multiplier.
    pub init_lmul: u32,
    /// Initial tail-agnostic flag.
    pub init_vta: bool,
    /// 64-bit adders in the vector ALU (multi-pass threshold).
    pub valu_adder_num: u32,
}

impl Default for VectorParams {
    fn default() -> Self {
        Self {
            init_vl: defaults::INIT_VL,
            init_sew: defaults::INIT_SEW,
            init_lmul: defaults::INIT_LMUL,
            init_vta: false,
            valu_adder_num: defaults::VALU_ADDER_NUM,
        }
    }
}

/// One fusion group definition: a named mnemonic sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct FusionGroupDef {
    /// Group name.
    pub name: String,
    /// Mnemonic sequence that fuses.
    pub mnemonics: Vec<String>,
}

/// Fusion overlay parameters.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FusionConfig {
    /// Enables the decode fusion pass.
    pub enable: bool,
    /// Match-loop watchdog bound.
    pub match_max_tries: Option<u32>,
    /// Registered groups.
    pub groups: Vec<FusionGroupDef>,
}

impl FusionConfig {
    /// Watchdog bound with the default applied.
    pub fn match_max_tries(&self) -> u32 {
        self.match_max_tries
            .unwrap_or(defaults::FUSION_MATCH_MAX_TRIES)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Core pipeline parameters.
    pub core: CoreConfig,
    /// Load/store parameters.
    pub lsu: LsuConfig,
    /// Vector parameters.
    pub vector: VectorParams,
    /// Fusion overlay parameters.
    pub fusion: FusionConfig,
}

impl Config {
    /// Loads a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SimError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Physical register counts as a per-regfile array.
    pub fn num_phys_regs(&self) -> [u32; 3] {
        [
            self.core.num_phys_int,
            self.core.num_phys_float,
            self.core.num_phys_vector,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = Config::default();
        assert!(config.core.num_to_decode >= 1);
        assert!(config.core.rob_size >= config.core.num_to_retire);
        assert_eq!(config.num_phys_regs(), [64, 64, 64]);
        assert!(!config.fusion.enable);
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{"core": {"rob_size": 16, "num_to_retire": 2}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.core.rob_size, 16);
        assert_eq!(config.core.num_to_retire, 2);
        // Untouched fields keep their defaults.
        assert_eq!(config.core.num_to_decode, 4);
        assert_eq!(config.lsu.replay_delay, 3);
    }

    #[test]
    fn test_fusion_group_json() {
        let json = r#"{
            "fusion": {
                "enable": true,
                "groups": [{"name": "lui-addi", "mnemonics": ["lui", "addi"]}]
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.fusion.enable);
        assert_eq!(config.fusion.groups.len(), 1);
        assert_eq!(config.fusion.match_max_tries(), 16);
    }
}
