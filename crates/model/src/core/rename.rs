//! Register rename: RAT, free list, and physical-register reference counts.
//!
//! Per register file this unit keeps:
//! 1. **RAT:** architectural → physical mapping.
//! 2. **Free list:** unallocated physical registers (FIFO).
//! 3. **Reference counts:** one claim for the live mapping (released when the
//!    superseding instruction retires) plus one per in-flight source read.
//!    A register returns to the free list exactly when its count reaches zero.
//! 4. **Previous-mapping tracking:** the physical register an allocation
//!    displaced, restored on flush rollback and released on retire.
//!
//! Source physical registers are captured *before* destinations are
//! remapped, so an instruction reading its own destination architectural
//! register sees the previous producer.
//!
//! Integer x0 is never renamed: it consumes no physical register, carries no
//! reference count, and is always ready.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::core::flush::FlushCriteria;
use crate::core::scoreboard::{Scoreboard, reg_bit};
use crate::inst::{
    InstPtr, N_REG_FILES, REG_FILES, RegFile, RenamedDest, RenamedSrc, Status,
};

/// Number of architectural registers per file.
const NUM_ARCH_REGS: u32 = 32;

/// Rename state for one register file.
#[derive(Debug)]
struct RegfileRename {
    reg_file: RegFile,
    rat: Vec<u32>,
    freelist: VecDeque<u32>,
    refcount: Vec<u32>,
    num_phys: u32,
}

impl RegfileRename {
    fn new(reg_file: RegFile, num_phys: u32) -> Self {
        assert!(
            num_phys >= NUM_ARCH_REGS && num_phys <= 128,
            "{} physical register count {num_phys} out of range",
            reg_file.name()
        );
        let rat: Vec<u32> = (0..NUM_ARCH_REGS).collect();
        let freelist: VecDeque<u32> = (NUM_ARCH_REGS..num_phys).collect();
        let mut refcount = vec![0; num_phys as usize];
        for &phys in &rat {
            refcount[phys as usize] = 1;
        }
        Self {
            reg_file,
            rat,
            freelist,
            refcount,
            num_phys,
        }
    }

    fn release(&mut self, phys: u32) {
        let count = &mut self.refcount[phys as usize];
        assert!(
            *count > 0,
            "free-list corruption: releasing {} p{phys} with zero references",
            self.reg_file.name()
        );
        *count -= 1;
        if *count == 0 {
            debug_assert!(
                !self.rat.contains(&phys),
                "releasing live RAT mapping {} p{phys}",
                self.reg_file.name()
            );
            self.freelist.push_back(phys);
        }
    }
}

/// The rename unit across all register files.
#[derive(Debug)]
pub struct RenameUnit {
    tables: [RegfileRename; N_REG_FILES],
    /// Renamed-but-not-retired instructions, in program order.
    history: VecDeque<InstPtr>,
}

impl RenameUnit {
    /// Creates the unit with identity initial mappings.
    pub fn new(num_phys_regs: [u32; N_REG_FILES]) -> Self {
        let tables = [
            RegfileRename::new(RegFile::Int, num_phys_regs[0]),
            RegfileRename::new(RegFile::Float, num_phys_regs[1]),
            RegfileRename::new(RegFile::Vector, num_phys_regs[2]),
        ];
        Self {
            tables,
            history: VecDeque::new(),
        }
    }

    /// Current free-list length for a register file.
    pub fn freelist_len(&self, reg_file: RegFile) -> usize {
        self.tables[reg_file.index()].freelist.len()
    }

    /// Reference count of one physical register (tests/diagnostics).
    pub fn refcount(&self, reg_file: RegFile, phys: u32) -> u32 {
        self.tables[reg_file.index()].refcount[phys as usize]
    }

    /// Current RAT mapping of one architectural register.
    pub fn mapping(&self, reg_file: RegFile, arch: u32) -> u32 {
        self.tables[reg_file.index()].rat[arch as usize]
    }

    /// True if the free lists can cover every destination of `inst`.
    pub fn can_rename(&self, inst: &InstPtr) -> bool {
        let b = inst.borrow();
        for rf in REG_FILES {
            let needed = b
                .dest_ops()
                .iter()
                .filter(|op| op.reg_file == rf && !(rf == RegFile::Int && op.reg_num == 0))
                .count();
            if needed > self.tables[rf.index()].freelist.len() {
                return false;
            }
        }
        true
    }

    /// Renames `inst`: captures source physical registers, allocates
    /// destinations, and clears the new destinations' ready bits.
    ///
    /// The caller must have checked [`Self::can_rename`]; an empty free list
    /// here is a model bug.
    pub fn rename(&mut self, inst: &InstPtr, scoreboard: &mut Scoreboard) {
        debug_assert!(self.can_rename(inst), "rename without free-list check");
        let mut b = inst.borrow_mut();

        // Sources first: reading your own destination must observe the
        // previous producer.
        let source_ops: Vec<_> = b.source_ops().to_vec();
        for op in source_ops {
            if op.reg_file == RegFile::Int && op.reg_num == 0 {
                continue; // x0 is always ready and never renamed
            }
            let table = &mut self.tables[op.reg_file.index()];
            let phys = table.rat[op.reg_num as usize];
            table.refcount[phys as usize] += 1;
            b.src_masks[op.reg_file.index()] |= reg_bit(phys);
            b.rename_data.sources.push(RenamedSrc {
                reg_file: op.reg_file,
                phys,
            });
            trace!(inst = %b, reg_file = op.reg_file.name(), arch = op.reg_num, phys, "source renamed");
        }

        let dest_ops: Vec<_> = b.dest_ops().to_vec();
        for op in dest_ops {
            if op.reg_file == RegFile::Int && op.reg_num == 0 {
                continue;
            }
            let table = &mut self.tables[op.reg_file.index()];
            let phys = table
                .freelist
                .pop_front()
                .unwrap_or_else(|| panic!("free-list underflow renaming {b}"));
            assert!(
                table.refcount[phys as usize] == 0,
                "double rename: {} p{phys} allocated with live references for {b}",
                op.reg_file.name()
            );
            let prev = table.rat[op.reg_num as usize];
            table.rat[op.reg_num as usize] = phys;
            table.refcount[phys as usize] = 1;
            scoreboard.clear_ready(op.reg_file, reg_bit(phys));
            b.dest_masks[op.reg_file.index()] |= reg_bit(phys);
            b.rename_data.dests.push(RenamedDest {
                reg_file: op.reg_file,
                arch: op.reg_num,
                phys,
                prev_phys: prev,
            });
            debug!(inst = %b, reg_file = op.reg_file.name(), arch = op.reg_num, phys, prev, "destination renamed");
        }

        b.set_status(Status::Renamed);
        drop(b);
        self.history.push_back(Rc::clone(inst));
    }

    /// Retirement acknowledgement from the ROB.
    ///
    /// Releases the retiring instruction's source reads and the previous
    /// mapping of each destination.
    pub fn retire_ack(&mut self, inst: &InstPtr) {
        let front = self
            .history
            .pop_front()
            .unwrap_or_else(|| panic!("retire ack with empty rename history"));
        assert!(
            Rc::ptr_eq(&front, inst),
            "out-of-order retire ack: expected {}, got {}",
            front.borrow(),
            inst.borrow()
        );

        let b = inst.borrow();
        for src in &b.rename_data.sources {
            self.tables[src.reg_file.index()].release(src.phys);
        }
        for dest in &b.rename_data.dests {
            self.tables[dest.reg_file.index()].release(dest.prev_phys);
        }
    }

    /// Flush rollback: walks the rename history youngest-first, undoing every
    /// instruction the criteria covers.
    ///
    /// Restores RAT mappings to the displaced registers, returns orphaned
    /// allocations to the *front* of the free list (exact composition
    /// restore), and releases the flushed source reads.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria, scoreboard: &mut Scoreboard) {
        while let Some(back) = self.history.back() {
            if !criteria.includes(&back.borrow()) {
                break;
            }
            let inst = self.history.pop_back().expect("checked non-empty");
            let b = inst.borrow();
            debug!(inst = %b, "rename rollback");

            for dest in b.rename_data.dests.iter().rev() {
                let table = &mut self.tables[dest.reg_file.index()];
                assert!(
                    table.rat[dest.arch as usize] == dest.phys,
                    "RAT rollback mismatch for {b}: {} a{} maps p{}, expected p{}",
                    dest.reg_file.name(),
                    dest.arch,
                    table.rat[dest.arch as usize],
                    dest.phys
                );
                table.rat[dest.arch as usize] = dest.prev_phys;
                let count = &mut table.refcount[dest.phys as usize];
                assert!(
                    *count == 1,
                    "rollback of {} p{} with {} outstanding references for {b}",
                    dest.reg_file.name(),
                    dest.phys,
                    *count
                );
                *count = 0;
                table.freelist.push_front(dest.phys);
                // The allocation cleared this bit; free registers are ready.
                let _ = scoreboard.set_ready(dest.reg_file, reg_bit(dest.phys));
            }

            for src in b.rename_data.sources.iter().rev() {
                self.tables[src.reg_file.index()].release(src.phys);
            }
        }
    }

    /// Checks the free-list/reference-count conservation law.
    ///
    /// For every register file: a physical register is on the free list
    /// exactly when its reference count is zero, and allocated registers plus
    /// free-list entries account for the whole file.
    ///
    /// # Panics
    ///
    /// Panics on violation; called from debug paths and tests.
    pub fn check_conservation(&self) {
        for table in &self.tables {
            let allocated = table.refcount.iter().filter(|&&c| c > 0).count();
            assert_eq!(
                allocated + table.freelist.len(),
                table.num_phys as usize,
                "{} conservation violated: {} allocated + {} free != {}",
                table.reg_file.name(),
                allocated,
                table.freelist.len(),
                table.num_phys
            );
            for &phys in &table.freelist {
                assert_eq!(
                    table.refcount[phys as usize], 0,
                    "{} p{phys} on free list with live references",
                    table.reg_file.name()
                );
            }
        }
    }
}
