//! The instruction record and its supporting types.
//!
//! Every unit in the core works on shared [`Inst`] records. This module defines:
//! 1. **Identity:** Unique/program ids, pc, mnemonic, immediate.
//! 2. **Operands:** Source/destination operand lists split by register file,
//!    plus the post-rename physical-register bitmasks.
//! 3. **Routing:** The [`TargetPipe`] the instruction executes on and its latency.
//! 4. **Lifecycle:** The [`Status`] state machine (forward-only except flush).
//! 5. **Vector state:** The stamped [`VectorConfig`], uop parentage, and tail flag.

/// Static per-mnemonic data (pipe target, latency, uop generation type).
pub mod arch_info;
/// Workload input: JSON and binary trace instruction generators.
pub mod generator;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::common::{ProgramId, UniqueId};
use crate::vector::{VectorConfig, VectorMemConfig};

/// Shared handle to an instruction record.
///
/// Records are created once by the instruction generator and referenced by
/// whichever queues currently hold them; the last holder to drop the handle
/// (ROB retire or flush) frees the record.
pub type InstPtr = Rc<RefCell<Inst>>;

/// Non-owning handle from a uop to its parent vector instruction.
pub type InstWeakPtr = Weak<RefCell<Inst>>;

/// Architectural register files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegFile {
    /// Integer registers x0..x31.
    Int = 0,
    /// Floating-point registers f0..f31.
    Float = 1,
    /// Vector registers v0..v31.
    Vector = 2,
}

/// Number of register files.
pub const N_REG_FILES: usize = 3;

/// All register files, in index order.
pub const REG_FILES: [RegFile; N_REG_FILES] = [RegFile::Int, RegFile::Float, RegFile::Vector];

impl RegFile {
    /// Index into per-regfile arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Float => "float",
            Self::Vector => "vector",
        }
    }
}

/// Operand slot within the instruction encoding.
///
/// Extra sources added during uop generation (accumulator chaining, slide
/// companions, narrowing pairs) land in RS3/RS4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperandField {
    /// First source.
    Rs1,
    /// Second source.
    Rs2,
    /// Third source (implicit; added by uop generation).
    Rs3,
    /// Fourth source (implicit; added by uop generation).
    Rs4,
    /// Destination.
    Rd,
}

/// One source or destination operand: slot, register file, register number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operand {
    /// Which encoding slot this operand occupies.
    pub field: OperandField,
    /// Register file the register number indexes.
    pub reg_file: RegFile,
    /// Architectural register number.
    pub reg_num: u32,
}

impl Operand {
    /// Convenience constructor.
    pub fn new(field: OperandField, reg_file: RegFile, reg_num: u32) -> Self {
        Self {
            field,
            reg_file,
            reg_num,
        }
    }
}

/// Bitmask over physical registers of one register file.
///
/// 128 bits covers every supported physical register file size.
pub type RegMask = u128;

/// Lifecycle state of an instruction.
///
/// Transitions are forward-only; a flush drops the record (status
/// [`Status::Flushed`]) rather than rewinding it. Fused heads and ghosts
/// leave the normal chain at decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Status {
    /// Created but not yet delivered by the generator.
    #[default]
    BeforeFetch,
    /// Delivered into the fetch queue.
    Fetched,
    /// Passed decode (vector insts: fractured into uops).
    Decoded,
    /// Physical destinations allocated.
    Renamed,
    /// Routed to an issue queue / LSU and inserted into the ROB.
    Dispatched,
    /// Accepted by an execute pipe; latency countdown running.
    Scheduled,
    /// Result (identity) available; eligible to retire at ROB head.
    Completed,
    /// Retired in program order.
    Retired,
    /// Dropped by a flush.
    Flushed,
    /// Head of a matched fusion group.
    Fused,
    /// Non-head member of a matched fusion group; eliminated at decode.
    FusionGhost,
}

/// Execution pipe targets.
///
/// `Rob` and `Sys` instructions skip execution and complete at dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TargetPipe {
    Br,
    Int,
    Mul,
    Div,
    FaddSub,
    Fmac,
    Float,
    I2f,
    F2i,
    Lsu,
    Vint,
    Vmul,
    Vdiv,
    Vfixed,
    Vfloat,
    Vfmul,
    Vfdiv,
    Vmask,
    Vset,
    Vload,
    Vstore,
    Rob,
    Sys,
}

/// Number of pipe targets.
pub const N_PIPES: usize = 23;

/// All pipe targets, in index order.
pub const ALL_PIPES: [TargetPipe; N_PIPES] = [
    TargetPipe::Br,
    TargetPipe::Int,
    TargetPipe::Mul,
    TargetPipe::Div,
    TargetPipe::FaddSub,
    TargetPipe::Fmac,
    TargetPipe::Float,
    TargetPipe::I2f,
    TargetPipe::F2i,
    TargetPipe::Lsu,
    TargetPipe::Vint,
    TargetPipe::Vmul,
    TargetPipe::Vdiv,
    TargetPipe::Vfixed,
    TargetPipe::Vfloat,
    TargetPipe::Vfmul,
    TargetPipe::Vfdiv,
    TargetPipe::Vmask,
    TargetPipe::Vset,
    TargetPipe::Vload,
    TargetPipe::Vstore,
    TargetPipe::Rob,
    TargetPipe::Sys,
];

impl TargetPipe {
    /// Index into per-pipe arrays.
    #[inline]
    pub fn index(self) -> usize {
        ALL_PIPES
            .iter()
            .position(|p| *p == self)
            .unwrap_or(N_PIPES - 1)
    }

    /// Uppercase tag as it appears in topology files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Br => "BR",
            Self::Int => "INT",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::FaddSub => "FADDSUB",
            Self::Fmac => "FMAC",
            Self::Float => "FLOAT",
            Self::I2f => "I2F",
            Self::F2i => "F2I",
            Self::Lsu => "LSU",
            Self::Vint => "VINT",
            Self::Vmul => "VMUL",
            Self::Vdiv => "VDIV",
            Self::Vfixed => "VFIXED",
            Self::Vfloat => "VFLOAT",
            Self::Vfmul => "VFMUL",
            Self::Vfdiv => "VFDIV",
            Self::Vmask => "VMASK",
            Self::Vset => "VSET",
            Self::Vload => "VLOAD",
            Self::Vstore => "VSTORE",
            Self::Rob => "ROB",
            Self::Sys => "SYS",
        }
    }

    /// Parses a topology-file tag.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_PIPES.iter().copied().find(|p| p.name() == name)
    }

    /// True for the vector execution pipes (not vector memory).
    pub fn is_vector_arith(self) -> bool {
        matches!(
            self,
            Self::Vint
                | Self::Vmul
                | Self::Vdiv
                | Self::Vfixed
                | Self::Vfloat
                | Self::Vfmul
                | Self::Vfdiv
                | Self::Vmask
                | Self::Vset
        )
    }
}

impl fmt::Display for TargetPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a vector instruction fractures into uops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UopGenType {
    /// Scalar or single-uop instruction: no fracture.
    #[default]
    None,
    /// All vector sources and destinations advance together.
    Elementwise,
    /// Only sources advance (mask-producing compares).
    SingleDest,
    /// Only destinations advance (iota and friends).
    SingleSrc,
    /// Sources advance at half rate, destinations at full rate.
    Widening,
    /// RS2 advances at full rate, RS1 at half rate, destinations at full rate.
    WideningMixed,
    /// Elementwise with the destination appended as an implicit source.
    Mac,
    /// Widening with the destination appended as an implicit source.
    MacWide,
    /// RS2 consumed in pairs, RS1 at full rate (narrowing clips).
    Narrowing,
    /// Accumulator chained through consecutive uops.
    Reduction,
    /// Wide accumulator chained through consecutive uops.
    ReductionWide,
    /// Sources advance at 1/ext-factor rate (vzext/vsext).
    IntExt,
    /// First uop carries the scalar; later uops add the previous vector slice.
    Slide1Up,
    /// Last uop carries the scalar; earlier uops add the next vector slice.
    Slide1Down,
    /// Fixed uop count independent of vl (whole-register moves).
    WholeReg,
    /// Unrecognized — rejected by the uop generator.
    Unknown,
}

/// Cycle timestamps collected as an instruction moves down the pipe.
///
/// Used for the optional per-instruction pipeline event trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstTimestamps {
    /// Cycle the record entered the fetch queue.
    pub fetched: u64,
    /// Cycle decode emitted it (or its uops).
    pub decoded: u64,
    /// Cycle rename allocated its destinations.
    pub renamed: u64,
    /// Cycle dispatch routed it.
    pub dispatched: u64,
    /// Cycle an execute pipe accepted it.
    pub execute_start: u64,
    /// Cycle execution finished.
    pub execute_complete: u64,
    /// Cycle the ROB retired it.
    pub retired: u64,
}

/// One renamed destination: arch register, allocated phys, previous mapping.
#[derive(Clone, Copy, Debug)]
pub struct RenamedDest {
    /// Register file.
    pub reg_file: RegFile,
    /// Architectural register number.
    pub arch: u32,
    /// Physical register allocated for this instruction.
    pub phys: u32,
    /// Physical register previously mapped to `arch` (freed at retire).
    pub prev_phys: u32,
}

/// One renamed source: register file and the physical register read.
#[derive(Clone, Copy, Debug)]
pub struct RenamedSrc {
    /// Register file.
    pub reg_file: RegFile,
    /// Physical register holding the source value.
    pub phys: u32,
}

/// Rename bookkeeping attached to the instruction.
///
/// Written by rename; read back by the ROB retire ack and the flush rollback.
#[derive(Clone, Debug, Default)]
pub struct RenameData {
    /// Renamed sources in operand order.
    pub sources: Vec<RenamedSrc>,
    /// Renamed destinations in operand order.
    pub dests: Vec<RenamedDest>,
}

/// The unit of work flowing through the core.
///
/// Identity is immutable after creation; status, rename data, and flags
/// mutate as the record moves through the pipeline.
#[derive(Debug)]
pub struct Inst {
    unique_id: UniqueId,
    program_id: ProgramId,
    pc: u64,
    mnemonic: String,
    opcode: u32,
    immediate: Option<u64>,
    target_vaddr: u64,

    source_ops: Vec<Operand>,
    dest_ops: Vec<Operand>,
    /// Physical source registers per register file, set at rename.
    pub src_masks: [RegMask; N_REG_FILES],
    /// Physical destination registers per register file, set at rename.
    pub dest_masks: [RegMask; N_REG_FILES],
    /// Rename undo/ack bookkeeping.
    pub rename_data: RenameData,

    pipe: TargetPipe,
    execute_latency: u64,
    uop_gen: UopGenType,

    vector_config: Option<VectorConfig>,
    /// VLSU fracture state, filled when the VLSU accepts the uop.
    pub vector_mem_config: Option<VectorMemConfig>,
    uop_parent: Option<InstWeakPtr>,
    uop_id: u32,
    tail: bool,

    status: Status,
    /// Set by the branch execute pipe; triggers a ROB flush at retire.
    pub mispredicted: bool,
    /// vsetvl{i} with a register dependency; decode stalls until execute forwards.
    pub blocking_vset: bool,
    /// Head of a matched fusion group.
    pub fused: bool,

    /// Pipeline event trace timestamps.
    pub timestamps: InstTimestamps,
}

impl Inst {
    /// Creates a record from decoded fields. Ids are stamped by the generator.
    pub fn new(
        mnemonic: impl Into<String>,
        opcode: u32,
        pipe: TargetPipe,
        execute_latency: u64,
        uop_gen: UopGenType,
        source_ops: Vec<Operand>,
        dest_ops: Vec<Operand>,
        immediate: Option<u64>,
    ) -> Self {
        Self {
            unique_id: 0,
            program_id: 0,
            pc: 0,
            mnemonic: mnemonic.into(),
            opcode,
            immediate,
            target_vaddr: 0,
            source_ops,
            dest_ops,
            src_masks: [0; N_REG_FILES],
            dest_masks: [0; N_REG_FILES],
            rename_data: RenameData::default(),
            pipe,
            execute_latency,
            uop_gen,
            vector_config: None,
            vector_mem_config: None,
            uop_parent: None,
            uop_id: 0,
            tail: false,
            status: Status::BeforeFetch,
            mispredicted: false,
            blocking_vset: false,
            fused: false,
            timestamps: InstTimestamps::default(),
        }
    }

    /// Unique id (monotonic in fetch order; shared with uops).
    #[inline]
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    /// Stamps the unique id. Called once by the generator or uop generator.
    pub fn set_unique_id(&mut self, uid: UniqueId) {
        self.unique_id = uid;
    }

    /// Program (trace position) id.
    #[inline]
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    /// Stamps the program id.
    pub fn set_program_id(&mut self, pid: ProgramId) {
        self.program_id = pid;
    }

    /// Program counter.
    #[inline]
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Sets the program counter.
    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    /// Instruction mnemonic.
    #[inline]
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Raw opcode (zero for JSON workloads).
    #[inline]
    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    /// Immediate operand, if present.
    #[inline]
    pub fn immediate(&self) -> Option<u64> {
        self.immediate
    }

    /// Memory target virtual address (loads/stores).
    #[inline]
    pub fn target_vaddr(&self) -> u64 {
        self.target_vaddr
    }

    /// Sets the memory target virtual address.
    pub fn set_target_vaddr(&mut self, vaddr: u64) {
        self.target_vaddr = vaddr;
    }

    /// Source operands.
    #[inline]
    pub fn source_ops(&self) -> &[Operand] {
        &self.source_ops
    }

    /// Destination operands.
    #[inline]
    pub fn dest_ops(&self) -> &[Operand] {
        &self.dest_ops
    }

    /// Execution pipe target.
    #[inline]
    pub fn pipe(&self) -> TargetPipe {
        self.pipe
    }

    /// Execute latency in cycles (>= 1).
    #[inline]
    pub fn execute_latency(&self) -> u64 {
        self.execute_latency
    }

    /// Uop generation type.
    #[inline]
    pub fn uop_gen(&self) -> UopGenType {
        self.uop_gen
    }

    /// Current lifecycle status.
    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Advances the lifecycle status.
    ///
    /// # Panics
    ///
    /// Panics on a backward transition that is not a flush/fusion exit —
    /// that is a model bug, not a workload condition.
    pub fn set_status(&mut self, status: Status) {
        if !matches!(
            status,
            Status::Flushed | Status::Fused | Status::FusionGhost
        ) {
            assert!(
                status > self.status,
                "backward status transition {:?} -> {status:?} on {self}",
                self.status
            );
        }
        self.status = status;
    }

    /// Vector configuration stamped at decode (vector insts and uops only).
    #[inline]
    pub fn vector_config(&self) -> Option<&VectorConfig> {
        self.vector_config.as_ref()
    }

    /// Stamps the vector configuration.
    pub fn set_vector_config(&mut self, config: VectorConfig) {
        self.vector_config = Some(config);
    }

    /// True if this instruction reads or writes vector registers or is a
    /// vector memory/config operation.
    pub fn is_vector(&self) -> bool {
        self.pipe.is_vector_arith()
            || matches!(self.pipe, TargetPipe::Vload | TargetPipe::Vstore)
            || self
                .source_ops
                .iter()
                .chain(self.dest_ops.iter())
                .any(|op| op.reg_file == RegFile::Vector)
    }

    /// True for the vset family.
    #[inline]
    pub fn is_vset(&self) -> bool {
        self.pipe == TargetPipe::Vset
    }

    /// True for conditional branches and jumps.
    #[inline]
    pub fn is_branch(&self) -> bool {
        self.pipe == TargetPipe::Br
    }

    /// True if any integer source is x0.
    pub fn has_zero_reg_source(&self) -> bool {
        self.source_ops
            .iter()
            .any(|op| op.reg_file == RegFile::Int && op.reg_num == 0)
    }

    /// True if any integer destination is x0.
    pub fn has_zero_reg_dest(&self) -> bool {
        self.dest_ops
            .iter()
            .any(|op| op.reg_file == RegFile::Int && op.reg_num == 0)
    }

    /// Uop id: 0 for top-level instructions, 1-based for generated uops.
    #[inline]
    pub fn uop_id(&self) -> u32 {
        self.uop_id
    }

    /// True if this record is a generated uop.
    #[inline]
    pub fn is_uop(&self) -> bool {
        self.uop_id > 0
    }

    /// Marks this record as uop `uop_id` of `parent`.
    pub fn set_uop_parent(&mut self, uop_id: u32, parent: InstWeakPtr) {
        debug_assert!(uop_id > 0, "uop ids are 1-based");
        self.uop_id = uop_id;
        self.uop_parent = Some(parent);
    }

    /// Parent handle (valid iff `uop_id > 0`).
    pub fn uop_parent(&self) -> Option<InstPtr> {
        self.uop_parent.as_ref().and_then(Weak::upgrade)
    }

    /// True if this uop covers tail elements beyond vl.
    #[inline]
    pub fn tail(&self) -> bool {
        self.tail
    }

    /// Sets the tail flag.
    pub fn set_tail(&mut self, tail: bool) {
        self.tail = tail;
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid: {} pid: {} '{}'",
            self.unique_id, self.program_id, self.mnemonic
        )?;
        if self.uop_id > 0 {
            write!(f, " uop{}", self.uop_id)?;
        }
        write!(f, " pipe: {} {:?}", self.pipe, self.status)
    }
}

/// Wraps an instruction into the shared-handle form used by the pipeline.
pub fn into_ptr(inst: Inst) -> InstPtr {
    Rc::new(RefCell::new(inst))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_add() -> Inst {
        Inst::new(
            "add",
            0,
            TargetPipe::Int,
            1,
            UopGenType::None,
            vec![
                Operand::new(OperandField::Rs1, RegFile::Int, 1),
                Operand::new(OperandField::Rs2, RegFile::Int, 2),
            ],
            vec![Operand::new(OperandField::Rd, RegFile::Int, 3)],
            None,
        )
    }

    #[test]
    fn test_status_forward_progression() {
        let mut inst = make_add();
        inst.set_status(Status::Fetched);
        inst.set_status(Status::Decoded);
        inst.set_status(Status::Renamed);
        inst.set_status(Status::Dispatched);
        inst.set_status(Status::Scheduled);
        inst.set_status(Status::Completed);
        inst.set_status(Status::Retired);
        assert_eq!(inst.status(), Status::Retired);
    }

    #[test]
    #[should_panic(expected = "backward status transition")]
    fn test_status_backward_rejected() {
        let mut inst = make_add();
        inst.set_status(Status::Renamed);
        inst.set_status(Status::Decoded);
    }

    #[test]
    fn test_flush_allowed_from_any_status() {
        let mut inst = make_add();
        inst.set_status(Status::Scheduled);
        inst.set_status(Status::Flushed);
        assert_eq!(inst.status(), Status::Flushed);
    }

    #[test]
    fn test_zero_reg_detection() {
        let inst = Inst::new(
            "vsetvli",
            0,
            TargetPipe::Vset,
            1,
            UopGenType::None,
            vec![Operand::new(OperandField::Rs1, RegFile::Int, 0)],
            vec![Operand::new(OperandField::Rd, RegFile::Int, 5)],
            Some(0),
        );
        assert!(inst.has_zero_reg_source());
        assert!(!inst.has_zero_reg_dest());
    }

    #[test]
    fn test_uop_parent_linkage() {
        let parent = into_ptr(make_add());
        let mut uop = make_add();
        uop.set_uop_parent(1, Rc::downgrade(&parent));
        assert!(uop.is_uop());
        let resolved = uop.uop_parent().unwrap();
        assert!(Rc::ptr_eq(&resolved, &parent));
    }

    #[test]
    fn test_pipe_round_trip_names() {
        for pipe in ALL_PIPES {
            assert_eq!(TargetPipe::from_name(pipe.name()), Some(pipe));
        }
        assert_eq!(TargetPipe::from_name("NOPE"), None);
    }
}
