//! Library error definitions.
//!
//! This module defines the surfaced (recoverable-by-the-caller) error kinds of
//! the model. It provides:
//! 1. **Workload errors:** Bad input records (unknown mnemonic, malformed operand).
//! 2. **Uop-generation errors:** Invalid or oversized vector fracture requests.
//! 3. **Configuration/topology errors:** Rejected config or topology files.
//!
//! Structural model bugs (queue overflow, double rename, credit underflow) are
//! *not* represented here — those are programming errors and panic with the
//! offending instruction in the message.

use thiserror::Error;

/// Errors surfaced by the simulator library.
#[derive(Debug, Error)]
pub enum SimError {
    /// A workload record could not be turned into an instruction.
    ///
    /// Carries the record index in the input file and a description of what
    /// was wrong (unknown mnemonic, missing field, unsupported opcode).
    #[error("workload error at record {index}: {reason}")]
    Workload {
        /// Zero-based index of the offending record in the input file.
        index: usize,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// The workload file extension is not recognized.
    #[error("unknown workload file extension for '{0}': expected .json or .stf")]
    UnknownWorkloadFormat(String),

    /// A vector instruction carries an unknown uop generation type.
    #[error("invalid uop generation type for '{mnemonic}' (uid {uid})")]
    InvalidUopGen {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// Unique id of the offending instruction.
        uid: u64,
    },

    /// The computed uop count exceeds the configured ceiling.
    #[error("'{mnemonic}' (uid {uid}) fractures into {requested} uops, limit is {limit}")]
    TooManyUops {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// Unique id of the offending instruction.
        uid: u64,
        /// Number of uops the fracture would produce.
        requested: u32,
        /// Configured maximum.
        limit: u32,
    },

    /// The topology file was rejected.
    #[error("topology error: {0}")]
    Topology(String),

    /// The simulation stopped making forward progress.
    #[error("no forward progress by cycle {cycle}: likely a credit or wakeup deadlock")]
    Watchdog {
        /// Cycle the watchdog tripped.
        cycle: u64,
    },

    /// The configuration was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure while reading an input file.
    #[error("i/o error reading '{path}': {source}")]
    Io {
        /// File that failed to open or read.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON parse failure in a workload or topology file.
    #[error("json error in '{path}': {source}")]
    Json {
        /// File that failed to parse.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// YAML parse failure in a topology file.
    #[error("yaml error in '{path}': {source}")]
    Yaml {
        /// File that failed to parse.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_yaml::Error,
    },
}
