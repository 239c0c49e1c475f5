//! Property tests for rename-state conservation.
//!
//! Drives the rename unit with random instruction streams interleaved with
//! retires and flushes, checking after every step that a physical register
//! is on the free list exactly when its reference count is zero and that
//! allocated + free always accounts for the whole file.

use std::collections::VecDeque;

use proptest::prelude::*;

use uopsim_core::core::flush::{FlushCriteria, FlushKind};
use uopsim_core::core::rename::RenameUnit;
use uopsim_core::core::scoreboard::Scoreboard;
use uopsim_core::inst::{
    Inst, InstPtr, Operand, OperandField, RegFile, Status, TargetPipe, UopGenType, into_ptr,
};

fn make_inst(uid: u64, rd: u32, rs1: u32, rs2: u32) -> InstPtr {
    let mut inst = Inst::new(
        "add",
        0,
        TargetPipe::Int,
        1,
        UopGenType::None,
        vec![
            Operand::new(OperandField::Rs1, RegFile::Int, rs1),
            Operand::new(OperandField::Rs2, RegFile::Int, rs2),
        ],
        vec![Operand::new(OperandField::Rd, RegFile::Int, rd)],
        None,
    );
    inst.set_unique_id(uid);
    inst.set_status(Status::Decoded);
    into_ptr(inst)
}

/// One step of the random schedule.
#[derive(Clone, Debug)]
enum Step {
    /// Rename a new instruction writing `rd` and reading `rs1`/`rs2`.
    Rename { rd: u32, rs1: u32, rs2: u32 },
    /// Retire the oldest in-flight instruction.
    RetireOldest,
    /// Flush the youngest `n` in-flight instructions.
    FlushYoungest(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1u32..32, 0u32..32, 0u32..32)
            .prop_map(|(rd, rs1, rs2)| Step::Rename { rd, rs1, rs2 }),
        2 => Just(Step::RetireOldest),
        1 => (1usize..6).prop_map(Step::FlushYoungest),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn conservation_holds_under_random_schedules(
        steps in proptest::collection::vec(step_strategy(), 1..120)
    ) {
        let mut rename = RenameUnit::new([64, 64, 64]);
        let mut scoreboard = Scoreboard::new([64, 64, 64]);
        let mut in_flight: VecDeque<InstPtr> = VecDeque::new();
        let mut next_uid = 1u64;

        for step in steps {
            match step {
                Step::Rename { rd, rs1, rs2 } => {
                    let inst = make_inst(next_uid, rd, rs1, rs2);
                    if rename.can_rename(&inst) {
                        rename.rename(&inst, &mut scoreboard);
                        in_flight.push_back(inst);
                        next_uid += 1;
                    }
                }
                Step::RetireOldest => {
                    if let Some(inst) = in_flight.pop_front() {
                        rename.retire_ack(&inst);
                    }
                }
                Step::FlushYoungest(n) => {
                    let keep = in_flight.len().saturating_sub(n);
                    if let Some(victim) = in_flight.get(keep) {
                        let uid = victim.borrow().unique_id();
                        let criteria =
                            FlushCriteria::new(FlushKind::Misprediction, uid, uid, true);
                        rename.handle_flush(&criteria, &mut scoreboard);
                        in_flight.truncate(keep);
                    }
                }
            }
            rename.check_conservation();
        }

        // Draining everything returns the free lists to quiescence.
        while let Some(inst) = in_flight.pop_front() {
            rename.retire_ack(&inst);
        }
        rename.check_conservation();
        prop_assert_eq!(rename.freelist_len(RegFile::Int), 32);
    }
}
