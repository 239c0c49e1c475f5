//! Workload input: turning trace files into instruction records.
//!
//! Two input formats are supported, selected by file extension:
//! 1. **JSON** (`.json`): an array of pre-decoded records with explicit
//!    operand fields (`rs1`, `fs2`, `vd`, ...), immediate, and virtual address.
//! 2. **Binary trace** (`.stf`): a flat framing of raw opcodes with pc and
//!    memory-access lists, run through a minimal built-in decoder for the
//!    modeled subset.
//!
//! Both generators stamp monotonically increasing unique ids and stable
//! program ids, and support rewinding to a program position after a flush.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::common::error::SimError;
use crate::common::{ProgramId, UniqueId};
use crate::inst::arch_info;
use crate::inst::{Inst, InstPtr, Operand, OperandField, RegFile, into_ptr};

/// Magic bytes opening a binary trace file.
const TRACE_MAGIC: &[u8; 4] = b"STF1";

/// A JSON workload record.
///
/// Field names follow the trace-generation convention: `r`/`f`/`v` prefixes
/// select the register file, `vaddr` is accepted as a number or a `0x` string.
#[derive(Debug, Deserialize)]
struct JsonRecord {
    mnemonic: String,
    rs1: Option<u32>,
    rs2: Option<u32>,
    rd: Option<u32>,
    fs1: Option<u32>,
    fs2: Option<u32>,
    fd: Option<u32>,
    vs1: Option<u32>,
    vs2: Option<u32>,
    vd: Option<u32>,
    imm: Option<u64>,
    vaddr: Option<VAddr>,
}

/// Virtual address field: JSON traces write these either way.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VAddr {
    Num(u64),
    Str(String),
}

impl VAddr {
    fn value(&self, index: usize) -> Result<u64, SimError> {
        match self {
            Self::Num(n) => Ok(*n),
            Self::Str(s) => {
                let trimmed = s.trim_start_matches("0x");
                u64::from_str_radix(trimmed, 16).map_err(|_| SimError::Workload {
                    index,
                    reason: format!("bad vaddr '{s}'"),
                })
            }
        }
    }
}

/// One decoded record from a binary trace.
struct TraceRecord {
    opcode: u32,
    pc: u64,
    vaddr: Option<u64>,
}

/// Instruction source selected by workload file extension.
pub enum InstGenerator {
    /// JSON array of pre-decoded records.
    Json(JsonGenerator),
    /// Flat binary opcode trace.
    Trace(TraceGenerator),
}

impl std::fmt::Debug for InstGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(g) => write!(f, "JsonGenerator({} records)", g.records.len()),
            Self::Trace(g) => write!(f, "TraceGenerator({} records)", g.records.len()),
        }
    }
}

impl InstGenerator {
    /// Opens a workload file, choosing the generator by extension.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ext {
            "json" => Ok(Self::Json(JsonGenerator::open(path)?)),
            "stf" => Ok(Self::Trace(TraceGenerator::open(path)?)),
            _ => Err(SimError::UnknownWorkloadFormat(path.display().to_string())),
        }
    }

    /// Produces the next instruction, or `None` at end of input.
    pub fn next_inst(&mut self) -> Result<Option<InstPtr>, SimError> {
        match self {
            Self::Json(g) => g.next_inst(),
            Self::Trace(g) => g.next_inst(),
        }
    }

    /// Rewinds so the next produced instruction has program id `pid`.
    ///
    /// Unique ids keep counting up — a refetched record is a fresh speculative
    /// instance, not the flushed one.
    pub fn rewind_to(&mut self, pid: ProgramId) {
        match self {
            Self::Json(g) => g.index = (pid.saturating_sub(1)) as usize,
            Self::Trace(g) => g.index = (pid.saturating_sub(1)) as usize,
        }
    }

    /// Total records in the workload.
    pub fn len(&self) -> usize {
        match self {
            Self::Json(g) => g.records.len(),
            Self::Trace(g) => g.records.len(),
        }
    }

    /// Records left to deliver from the current position.
    pub fn remaining(&self) -> usize {
        match self {
            Self::Json(g) => g.records.len().saturating_sub(g.index),
            Self::Trace(g) => g.records.len().saturating_sub(g.index),
        }
    }

    /// True if the workload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generator over a JSON record array.
pub struct JsonGenerator {
    records: Vec<JsonRecord>,
    index: usize,
    next_uid: UniqueId,
}

impl JsonGenerator {
    fn open(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let records: Vec<JsonRecord> =
            serde_json::from_str(&text).map_err(|source| SimError::Json {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            records,
            index: 0,
            next_uid: 0,
        })
    }

    fn next_inst(&mut self) -> Result<Option<InstPtr>, SimError> {
        let Some(record) = self.records.get(self.index) else {
            return Ok(None);
        };
        let index = self.index;

        let info = arch_info::lookup(&record.mnemonic).ok_or_else(|| SimError::Workload {
            index,
            reason: format!("unknown mnemonic '{}'", record.mnemonic),
        })?;

        // vsetivli carries its AVL in the rs1 slot as an immediate, not a
        // register read; fold it into the upper immediate bits.
        let is_vsetivli = record.mnemonic == "vsetivli";
        let imm = if is_vsetivli {
            let avl = u64::from(record.rs1.unwrap_or(0));
            Some(record.imm.unwrap_or(0) | (avl << 7))
        } else {
            record.imm
        };

        let mut sources = Vec::new();
        let mut push_src = |field, reg_file, num: Option<u32>| {
            if let Some(n) = num {
                sources.push(Operand::new(field, reg_file, n));
            }
        };
        if !is_vsetivli {
            push_src(OperandField::Rs1, RegFile::Int, record.rs1);
        }
        push_src(OperandField::Rs1, RegFile::Float, record.fs1);
        push_src(OperandField::Rs1, RegFile::Vector, record.vs1);
        push_src(OperandField::Rs2, RegFile::Int, record.rs2);
        push_src(OperandField::Rs2, RegFile::Float, record.fs2);
        push_src(OperandField::Rs2, RegFile::Vector, record.vs2);

        let mut dests = Vec::new();
        let mut push_dest = |reg_file, num: Option<u32>| {
            if let Some(n) = num {
                dests.push(Operand::new(OperandField::Rd, reg_file, n));
            }
        };
        push_dest(RegFile::Int, record.rd);
        push_dest(RegFile::Float, record.fd);
        push_dest(RegFile::Vector, record.vd);

        for op in sources.iter().chain(dests.iter()) {
            if op.reg_num >= 32 {
                return Err(SimError::Workload {
                    index,
                    reason: format!("register number {} out of range", op.reg_num),
                });
            }
        }

        let mut inst = Inst::new(
            record.mnemonic.clone(),
            0,
            info.pipe,
            info.latency,
            info.uop_gen,
            sources,
            dests,
            imm,
        );
        if let Some(vaddr) = &record.vaddr {
            inst.set_target_vaddr(vaddr.value(index)?);
        }

        self.next_uid += 1;
        inst.set_unique_id(self.next_uid);
        inst.set_program_id((index + 1) as ProgramId);

        self.index += 1;
        Ok(Some(into_ptr(inst)))
    }
}

/// Generator over a flat binary trace.
///
/// Framing: 4-byte magic `STF1`, then records of `opcode: u32 LE`,
/// `pc: u64 LE`, `n_mem: u8`, and `n_mem` little-endian `u64` addresses.
pub struct TraceGenerator {
    records: Vec<TraceRecord>,
    index: usize,
    next_uid: UniqueId,
}

impl TraceGenerator {
    fn open(path: &Path) -> Result<Self, SimError> {
        let bytes = fs::read(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if bytes.len() < 4 || &bytes[..4] != TRACE_MAGIC {
            return Err(SimError::Workload {
                index: 0,
                reason: "missing STF1 trace magic".to_string(),
            });
        }

        let mut records = Vec::new();
        let mut pos = 4;
        while pos < bytes.len() {
            if pos + 13 > bytes.len() {
                return Err(SimError::Workload {
                    index: records.len(),
                    reason: "truncated trace record".to_string(),
                });
            }
            let opcode = u32::from_le_bytes([
                bytes[pos],
                bytes[pos + 1],
                bytes[pos + 2],
                bytes[pos + 3],
            ]);
            let pc = u64::from_le_bytes([
                bytes[pos + 4],
                bytes[pos + 5],
                bytes[pos + 6],
                bytes[pos + 7],
                bytes[pos + 8],
                bytes[pos + 9],
                bytes[pos + 10],
                bytes[pos + 11],
            ]);
            let n_mem = bytes[pos + 12] as usize;
            pos += 13;
            if pos + n_mem * 8 > bytes.len() {
                return Err(SimError::Workload {
                    index: records.len(),
                    reason: "truncated memory-access list".to_string(),
                });
            }
            let vaddr = (n_mem > 0).then(|| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[pos..pos + 8]);
                u64::from_le_bytes(buf)
            });
            pos += n_mem * 8;
            records.push(TraceRecord { opcode, pc, vaddr });
        }

        Ok(Self {
            records,
            index: 0,
            next_uid: 0,
        })
    }

    fn next_inst(&mut self) -> Result<Option<InstPtr>, SimError> {
        let Some(record) = self.records.get(self.index) else {
            return Ok(None);
        };
        let index = self.index;

        let mut inst = decode_opcode(record.opcode).ok_or_else(|| SimError::Workload {
            index,
            reason: format!("unsupported opcode {:#010x}", record.opcode),
        })?;
        inst.set_pc(record.pc);
        if let Some(vaddr) = record.vaddr {
            inst.set_target_vaddr(vaddr);
        }

        self.next_uid += 1;
        inst.set_unique_id(self.next_uid);
        inst.set_program_id((index + 1) as ProgramId);

        self.index += 1;
        Ok(Some(into_ptr(inst)))
    }
}

/// Minimal RV64I/M decoder for binary traces.
///
/// Covers the integer subset the timing model exercises; anything else is an
/// unsupported-opcode workload error.
fn decode_opcode(opcode: u32) -> Option<Inst> {
    let major = opcode & 0x7f;
    let rd = (opcode >> 7) & 0x1f;
    let funct3 = (opcode >> 12) & 0x7;
    let rs1 = (opcode >> 15) & 0x1f;
    let rs2 = (opcode >> 20) & 0x1f;
    let funct7 = (opcode >> 25) & 0x7f;

    let mnemonic = match major {
        0x33 => match (funct3, funct7) {
            (0x0, 0x00) => "add",
            (0x0, 0x20) => "sub",
            (0x0, 0x01) => "mul",
            (0x4, 0x00) => "xor",
            (0x4, 0x01) => "div",
            (0x6, 0x00) => "or",
            (0x6, 0x01) => "rem",
            (0x7, 0x00) => "and",
            (0x1, 0x00) => "sll",
            (0x5, 0x00) => "srl",
            _ => return None,
        },
        0x13 => match funct3 {
            0x0 => "addi",
            0x4 => "xori",
            0x6 => "ori",
            0x7 => "andi",
            _ => return None,
        },
        0x03 => match funct3 {
            0x0 => "lb",
            0x1 => "lh",
            0x2 => "lw",
            0x3 => "ld",
            _ => return None,
        },
        0x23 => match funct3 {
            0x0 => "sb",
            0x1 => "sh",
            0x2 => "sw",
            0x3 => "sd",
            _ => return None,
        },
        0x63 => match funct3 {
            0x0 => "beq",
            0x1 => "bne",
            0x4 => "blt",
            0x5 => "bge",
            _ => return None,
        },
        0x6f => "jal",
        0x67 => "jalr",
        0x37 => "lui",
        0x17 => "auipc",
        0x73 => "ecall",
        _ => return None,
    };

    let info = arch_info::lookup(mnemonic)?;

    let mut sources = Vec::new();
    let mut dests = Vec::new();
    match major {
        0x33 | 0x23 | 0x63 => {
            sources.push(Operand::new(OperandField::Rs1, RegFile::Int, rs1));
            sources.push(Operand::new(OperandField::Rs2, RegFile::Int, rs2));
        }
        0x13 | 0x03 | 0x67 => {
            sources.push(Operand::new(OperandField::Rs1, RegFile::Int, rs1));
        }
        _ => {}
    }
    if matches!(major, 0x33 | 0x13 | 0x03 | 0x67 | 0x6f | 0x37 | 0x17) && rd != 0 {
        dests.push(Operand::new(OperandField::Rd, RegFile::Int, rd));
    }

    Some(Inst::new(
        mnemonic,
        opcode,
        info.pipe,
        info.latency,
        info.uop_gen,
        sources,
        dests,
        None,
    ))
}
