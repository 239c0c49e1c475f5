//! Declarative execution topology.
//!
//! The topology names the execution pipes, the pipe tags each serves, and
//! which pipes each issue queue may target:
//! 1. **`execution_topology`:** `[kind, count]` pairs expanded into numbered
//!    units (`alu0`, `alu1`, ...).
//! 2. **`pipelines`:** one pipe-tag list per execution pipe, in expansion
//!    order.
//! 3. **`issue_queue_to_pipe_map`:** execution-pipe indices per issue queue.
//! 4. Optional `exe_pipe_rename` / `issue_queue_rename` overrides.
//!
//! Files load as YAML or JSON, selected by extension. Routing tables for
//! dispatch are derived here: an issue queue serves a pipe tag if any of its
//! execution pipes lists it; the LSU/VLSU pipes route to the memory units and
//! ROB/SYS go straight to retire.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::common::error::SimError;
use crate::core::dispatch::DispatchTarget;
use crate::inst::{ALL_PIPES, N_PIPES, TargetPipe};

/// Raw topology file contents.
#[derive(Debug, Deserialize)]
struct TopologyFile {
    execution_topology: Vec<(String, u32)>,
    pipelines: Vec<Vec<String>>,
    issue_queue_to_pipe_map: Vec<Vec<usize>>,
    #[serde(default)]
    exe_pipe_rename: Option<Vec<String>>,
    #[serde(default)]
    issue_queue_rename: Option<Vec<String>>,
}

/// One execution pipe descriptor.
#[derive(Debug, Clone)]
pub struct ExePipeDesc {
    /// Unit name (`alu0`, `br0`, ...).
    pub name: String,
    /// Pipe tags this unit serves.
    pub pipes: Vec<TargetPipe>,
}

/// One issue queue descriptor.
#[derive(Debug, Clone)]
pub struct IssueQueueDesc {
    /// Queue name (`iq0`, ...).
    pub name: String,
    /// Execution pipe indices this queue feeds, declared order.
    pub exe_pipes: Vec<usize>,
}

/// Validated core topology.
#[derive(Debug, Clone)]
pub struct CoreTopology {
    /// Execution pipes in index order.
    pub exe_pipes: Vec<ExePipeDesc>,
    /// Issue queues in index order.
    pub issue_queues: Vec<IssueQueueDesc>,
}

impl CoreTopology {
    /// The shipped medium-core topology.
    pub fn default_topology() -> Self {
        let exe = |name: &str, tags: &[TargetPipe]| ExePipeDesc {
            name: name.to_string(),
            pipes: tags.to_vec(),
        };
        let iq = |name: &str, pipes: &[usize]| IssueQueueDesc {
            name: name.to_string(),
            exe_pipes: pipes.to_vec(),
        };
        Self {
            exe_pipes: vec![
                exe(
                    "alu0",
                    &[
                        TargetPipe::Int,
                        TargetPipe::Mul,
                        TargetPipe::Div,
                        TargetPipe::I2f,
                        TargetPipe::F2i,
                    ],
                ),
                exe("alu1", &[TargetPipe::Int]),
                exe("br0", &[TargetPipe::Br, TargetPipe::Int]),
                exe(
                    "fpu0",
                    &[TargetPipe::FaddSub, TargetPipe::Fmac, TargetPipe::Float],
                ),
                exe("fpu1", &[TargetPipe::FaddSub, TargetPipe::Float]),
                exe(
                    "vex0",
                    &[
                        TargetPipe::Vint,
                        TargetPipe::Vmul,
                        TargetPipe::Vdiv,
                        TargetPipe::Vfixed,
                        TargetPipe::Vfloat,
                        TargetPipe::Vfmul,
                        TargetPipe::Vfdiv,
                        TargetPipe::Vmask,
                        TargetPipe::Vset,
                    ],
                ),
            ],
            issue_queues: vec![
                iq("iq0", &[0, 1]),
                iq("iq1", &[2]),
                iq("iq2", &[3, 4]),
                iq("iq3", &[5]),
            ],
        }
    }

    /// Loads a topology file (`.yaml`/`.yml` or `.json`).
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let raw: TopologyFile = match ext {
            "yaml" | "yml" => {
                serde_yaml::from_str(&text).map_err(|source| SimError::Yaml {
                    path: path.display().to_string(),
                    source,
                })?
            }
            "json" => serde_json::from_str(&text).map_err(|source| SimError::Json {
                path: path.display().to_string(),
                source,
            })?,
            other => {
                return Err(SimError::Topology(format!(
                    "unknown topology extension '{other}'"
                )));
            }
        };
        Self::build(raw)
    }

    fn build(raw: TopologyFile) -> Result<Self, SimError> {
        let total_units: u32 = raw.execution_topology.iter().map(|(_, n)| n).sum();
        if raw.pipelines.len() != total_units as usize {
            return Err(SimError::Topology(format!(
                "execution_topology declares {total_units} units but pipelines has {}",
                raw.pipelines.len()
            )));
        }

        let mut names = Vec::with_capacity(total_units as usize);
        for (kind, count) in &raw.execution_topology {
            if *count == 0 {
                return Err(SimError::Topology(format!("'{kind}' declares zero units")));
            }
            for idx in 0..*count {
                names.push(format!("{kind}{idx}"));
            }
        }
        if let Some(renames) = raw.exe_pipe_rename {
            if renames.len() != names.len() {
                return Err(SimError::Topology(
                    "exe_pipe_rename length mismatch".to_string(),
                ));
            }
            names = renames;
        }

        let mut exe_pipes = Vec::with_capacity(names.len());
        for (name, tags) in names.into_iter().zip(raw.pipelines) {
            let mut pipes = Vec::with_capacity(tags.len());
            for tag in tags {
                let pipe = TargetPipe::from_name(&tag).ok_or_else(|| {
                    SimError::Topology(format!("unknown pipe tag '{tag}' on unit '{name}'"))
                })?;
                pipes.push(pipe);
            }
            if pipes.is_empty() {
                return Err(SimError::Topology(format!("unit '{name}' serves no pipes")));
            }
            exe_pipes.push(ExePipeDesc { name, pipes });
        }

        let mut issue_queues = Vec::with_capacity(raw.issue_queue_to_pipe_map.len());
        for (idx, exe_indices) in raw.issue_queue_to_pipe_map.into_iter().enumerate() {
            for &exe_idx in &exe_indices {
                if exe_idx >= exe_pipes.len() {
                    return Err(SimError::Topology(format!(
                        "issue queue {idx} maps to unknown execution pipe {exe_idx}"
                    )));
                }
            }
            issue_queues.push(IssueQueueDesc {
                name: format!("iq{idx}"),
                exe_pipes: exe_indices,
            });
        }
        if let Some(renames) = raw.issue_queue_rename {
            if renames.len() != issue_queues.len() {
                return Err(SimError::Topology(
                    "issue_queue_rename length mismatch".to_string(),
                ));
            }
            for (queue, name) in issue_queues.iter_mut().zip(renames) {
                queue.name = name;
            }
        }

        let topology = Self {
            exe_pipes,
            issue_queues,
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Confirms every executable pipe tag is reachable from some issue queue.
    fn validate(&self) -> Result<(), SimError> {
        let routing = self.dispatch_routing();
        for pipe in ALL_PIPES {
            if matches!(
                pipe,
                TargetPipe::Rob | TargetPipe::Sys | TargetPipe::Lsu | TargetPipe::Vload | TargetPipe::Vstore
            ) {
                continue;
            }
            if routing[pipe.index()].is_empty() {
                return Err(SimError::Topology(format!(
                    "pipe {pipe} is served by no issue queue"
                )));
            }
        }
        Ok(())
    }

    /// Dispatch routing table: consumers per pipe tag, declared order.
    pub fn dispatch_routing(&self) -> Vec<Vec<DispatchTarget>> {
        let mut routing: Vec<Vec<DispatchTarget>> = vec![Vec::new(); N_PIPES];
        routing[TargetPipe::Lsu.index()].push(DispatchTarget::Lsu);
        routing[TargetPipe::Vload.index()].push(DispatchTarget::Vlsu);
        routing[TargetPipe::Vstore.index()].push(DispatchTarget::Vlsu);

        for (iq_idx, queue) in self.issue_queues.iter().enumerate() {
            let mut served: Vec<TargetPipe> = Vec::new();
            for &exe_idx in &queue.exe_pipes {
                for &pipe in &self.exe_pipes[exe_idx].pipes {
                    if !served.contains(&pipe) {
                        served.push(pipe);
                    }
                }
            }
            for pipe in served {
                routing[pipe.index()].push(DispatchTarget::IssueQueue(iq_idx));
            }
        }
        routing
    }

    /// Per-issue-queue map from pipe tag to the execution pipes serving it.
    pub fn issue_queue_pipe_map(&self, iq_idx: usize) -> HashMap<TargetPipe, Vec<usize>> {
        let mut map: HashMap<TargetPipe, Vec<usize>> = HashMap::new();
        for &exe_idx in &self.issue_queues[iq_idx].exe_pipes {
            for &pipe in &self.exe_pipes[exe_idx].pipes {
                map.entry(pipe).or_default().push(exe_idx);
            }
        }
        map
    }
}
