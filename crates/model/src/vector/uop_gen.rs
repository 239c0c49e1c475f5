//! Vector micro-op generation.
//!
//! Splits one vector instruction into N uops according to its generation
//! type. The generator runs a session protocol:
//! 1. **[`VectorUopGenerator::set_inst`]:** begins a session and computes the
//!    uop count from vl/sew (doubled for widening forms, fixed for
//!    whole-register moves and segmented loads).
//! 2. **[`VectorUopGenerator::generate_uop`]:** yields one child uop per call,
//!    applying the per-kind register-number progression.
//! 3. The session resets after the last uop, or on a flush that covers the
//!    parent instruction.
//!
//! Uops inherit the parent's unique id, program id, and vector configuration,
//! and carry a 1-based uop id plus a weak handle back to the parent.

use std::rc::Rc;

use tracing::debug;

use crate::common::error::SimError;
use crate::core::flush::FlushCriteria;
use crate::inst::{
    Inst, InstPtr, Operand, OperandField, RegFile, UopGenType, arch_info, into_ptr,
};
use crate::vector::VLEN;

/// Ceiling on uops per instruction; exceeding it is a workload error.
pub const MAX_UOPS_PER_INST: u32 = 64;

/// Splits vector instructions into micro-ops.
pub struct VectorUopGenerator {
    current: Option<InstPtr>,
    num_generated: u32,
    num_to_generate: u32,
    /// Extension factor for INT_EXT sessions (2, 4, or 8).
    ext_factor: u32,
    /// Lifetime count of uops produced (reported in stats).
    total_uops_generated: u64,
}

impl std::fmt::Debug for VectorUopGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VectorUopGenerator {{ generated: {}/{} }}",
            self.num_generated, self.num_to_generate
        )
    }
}

impl Default for VectorUopGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorUopGenerator {
    /// Creates an idle generator.
    pub fn new() -> Self {
        Self {
            current: None,
            num_generated: 0,
            num_to_generate: 0,
            ext_factor: 1,
            total_uops_generated: 0,
        }
    }

    /// Number of uops the active session has yet to produce.
    #[inline]
    pub fn num_uops_remaining(&self) -> u32 {
        self.num_to_generate - self.num_generated
    }

    /// True while the active session has uops left.
    #[inline]
    pub fn keep_going(&self) -> bool {
        self.current.is_some() && self.num_uops_remaining() > 0
    }

    /// Lifetime count of uops produced.
    #[inline]
    pub fn total_uops_generated(&self) -> u64 {
        self.total_uops_generated
    }

    /// Begins a generation session for `inst`.
    ///
    /// Computes the uop count: `ceil(vl / (VLEN / sew))`, doubled for the
    /// widening family (which additionally requires `lmul <= 4`), or a fixed
    /// count for whole-register forms.
    ///
    /// # Panics
    ///
    /// Panics if a session is already active — decode must drain the previous
    /// session first.
    pub fn set_inst(&mut self, inst: &InstPtr) -> Result<(), SimError> {
        assert!(
            self.current.is_none(),
            "cannot start generating uops for a new vector instruction, \
             current instruction has not finished: {}",
            self.current.as_ref().map_or_else(String::new, |c| c
                .borrow()
                .to_string())
        );

        let (mnemonic, uid, uop_gen, vector_config) = {
            let b = inst.borrow();
            (
                b.mnemonic().to_string(),
                b.unique_id(),
                b.uop_gen(),
                b.vector_config().copied().unwrap_or_default(),
            )
        };

        if matches!(uop_gen, UopGenType::Unknown | UopGenType::None) {
            return Err(SimError::InvalidUopGen { mnemonic, uid });
        }

        self.ext_factor = arch_info::int_ext_factor(&mnemonic).unwrap_or(1);

        // Number of vector elements each uop covers.
        let elems_per_uop = VLEN / vector_config.sew();
        let mut num_uops = vector_config.vl().div_ceil(elems_per_uop);

        match uop_gen {
            UopGenType::Widening
            | UopGenType::WideningMixed
            | UopGenType::MacWide
            | UopGenType::ReductionWide => {
                if vector_config.lmul() > 4 {
                    // These modes set EMUL = 2 * LMUL <= 8.
                    return Err(SimError::InvalidUopGen { mnemonic, uid });
                }
                num_uops *= 2;
            }
            UopGenType::WholeReg => {
                num_uops = arch_info::whole_reg_uop_count(&mnemonic).ok_or_else(|| {
                    SimError::Workload {
                        index: 0,
                        reason: format!("'{mnemonic}' has no whole-register uop count"),
                    }
                })?;
            }
            _ => {}
        }

        if num_uops > MAX_UOPS_PER_INST {
            return Err(SimError::TooManyUops {
                mnemonic,
                uid,
                requested: num_uops,
                limit: MAX_UOPS_PER_INST,
            });
        }

        debug!(
            inst = %inst.borrow(),
            config = %vector_config,
            num_uops,
            "splitting vector instruction"
        );

        self.num_to_generate = num_uops;
        self.num_generated = 0;
        if num_uops > 0 {
            self.current = Some(Rc::clone(inst));
        }
        Ok(())
    }

    /// Produces the next uop of the active session.
    ///
    /// # Panics
    ///
    /// Panics if no session is active.
    pub fn generate_uop(&mut self) -> InstPtr {
        let parent = self
            .current
            .clone()
            .unwrap_or_else(|| panic!("cannot generate uops, current instruction is not set"));

        // Step index for register progressions: uop k covers elements
        // [k * elems_per_uop, (k+1) * elems_per_uop).
        let k = self.num_generated;
        let uop_gen = parent.borrow().uop_gen();

        let (sources, dests) = match uop_gen {
            UopGenType::Slide1Up | UopGenType::Slide1Down => {
                self.progress_slide(&parent, k, uop_gen)
            }
            _ => self.progress_regular(&parent, k, uop_gen),
        };

        let uop = {
            let p = parent.borrow();
            let mut inst = Inst::new(
                p.mnemonic().to_string(),
                p.opcode(),
                p.pipe(),
                p.execute_latency(),
                p.uop_gen(),
                sources,
                dests,
                p.immediate(),
            );
            inst.set_unique_id(p.unique_id());
            inst.set_program_id(p.program_id());
            inst.set_pc(p.pc());
            inst.set_target_vaddr(p.target_vaddr());
            if let Some(config) = p.vector_config() {
                inst.set_vector_config(*config);
            }
            inst
        };

        let uop = into_ptr(uop);
        self.num_generated += 1;
        self.total_uops_generated += 1;
        uop.borrow_mut()
            .set_uop_parent(self.num_generated, Rc::downgrade(&parent));

        // Does this uop contain tail elements?
        if let Some(config) = parent.borrow().vector_config() {
            let elems_per_uop = VLEN / config.sew();
            uop.borrow_mut()
                .set_tail((elems_per_uop * self.num_generated) > config.vl());
        }

        debug!(uop = %uop.borrow(), "generated uop");

        if self.num_generated == self.num_to_generate {
            self.reset();
        }
        uop
    }

    /// Register progression for everything except the slide forms.
    fn progress_regular(
        &self,
        parent: &InstPtr,
        k: u32,
        uop_gen: UopGenType,
    ) -> (Vec<Operand>, Vec<Operand>) {
        let p = parent.borrow();
        let mut sources: Vec<Operand> = Vec::with_capacity(p.source_ops().len() + 2);
        let mut narrowing_pair: Option<Operand> = None;

        for src in p.source_ops() {
            let mut src = *src;
            if src.reg_file != RegFile::Vector || uop_gen == UopGenType::SingleSrc {
                sources.push(src);
                continue;
            }
            match uop_gen {
                UopGenType::Elementwise
                | UopGenType::Mac
                | UopGenType::Reduction
                | UopGenType::WholeReg => {
                    src.reg_num += k;
                }
                UopGenType::Widening | UopGenType::MacWide => {
                    src.reg_num += k / 2;
                }
                UopGenType::WideningMixed | UopGenType::ReductionWide => {
                    if src.field == OperandField::Rs2 {
                        src.reg_num += k;
                    } else if src.field == OperandField::Rs1 {
                        src.reg_num += k / 2;
                    }
                }
                UopGenType::Narrowing => {
                    if src.field == OperandField::Rs2 {
                        // RS2 is consumed in pairs; the odd half rides as RS3.
                        src.reg_num += k * 2;
                        narrowing_pair = Some(Operand::new(
                            OperandField::Rs3,
                            src.reg_file,
                            src.reg_num + 1,
                        ));
                    } else if src.field == OperandField::Rs1 {
                        src.reg_num += k;
                    }
                }
                UopGenType::IntExt => {
                    src.reg_num += k / self.ext_factor;
                }
                UopGenType::SingleDest => {
                    src.reg_num += k;
                }
                _ => {}
            }
            sources.push(src);
        }

        if uop_gen == UopGenType::Narrowing {
            let pair = narrowing_pair
                .unwrap_or_else(|| panic!("narrowing instruction without an RS2 operand: {p}"));
            sources.push(pair);
        }

        let next_src_field = |sources: &[Operand]| match sources.len() {
            0 => OperandField::Rs1,
            1 => OperandField::Rs2,
            2 => OperandField::Rs3,
            _ => OperandField::Rs4,
        };

        let mut dests: Vec<Operand> = Vec::with_capacity(p.dest_ops().len());
        for dest in p.dest_ops() {
            let mut dest = *dest;
            if uop_gen != UopGenType::SingleDest && dest.reg_file == RegFile::Vector {
                dest.reg_num += k;

                if matches!(uop_gen, UopGenType::Mac | UopGenType::MacWide) {
                    // Multiply-add reads its own destination.
                    sources.push(Operand::new(
                        next_src_field(&sources),
                        dest.reg_file,
                        dest.reg_num,
                    ));
                }
                if matches!(uop_gen, UopGenType::Reduction | UopGenType::ReductionWide) && k > 0 {
                    // Chain the previous uop's accumulator in as a source.
                    sources.push(Operand::new(
                        next_src_field(&sources),
                        dest.reg_file,
                        dest.reg_num - 1,
                    ));
                }
            }
            dests.push(dest);
        }

        (sources, dests)
    }

    /// Register progression for vslide1up / vslide1down.
    ///
    /// The scalar operand only appears on one end of the uop chain; interior
    /// uops source the neighbouring vector slice as RS3 instead.
    fn progress_slide(
        &self,
        parent: &InstPtr,
        k: u32,
        uop_gen: UopGenType,
    ) -> (Vec<Operand>, Vec<Operand>) {
        let p = parent.borrow();
        let last = k + 1 == self.num_to_generate;
        let mut sources: Vec<Operand> = Vec::with_capacity(p.source_ops().len() + 1);

        for src in p.source_ops() {
            if src.reg_file != RegFile::Vector {
                // Scalar rides the first uop for slide1up, the last for slide1down.
                let carries_scalar = match uop_gen {
                    UopGenType::Slide1Up => k == 0,
                    _ => last,
                };
                if carries_scalar {
                    sources.push(*src);
                }
                continue;
            }

            let mut vec_src = *src;
            vec_src.reg_num += k;
            sources.push(vec_src);

            let companion = match uop_gen {
                UopGenType::Slide1Up if k != 0 => Some(src.reg_num + k - 1),
                UopGenType::Slide1Down if !last => Some(src.reg_num + k + 1),
                _ => None,
            };
            if let Some(reg) = companion {
                sources.push(Operand::new(OperandField::Rs3, src.reg_file, reg));
            }
        }

        let dests = p
            .dest_ops()
            .iter()
            .map(|dest| {
                let mut dest = *dest;
                if dest.reg_file == RegFile::Vector {
                    dest.reg_num += k;
                }
                dest
            })
            .collect();

        (sources, dests)
    }

    /// Drops the active session if the flush covers the parent instruction.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria) {
        if let Some(current) = &self.current {
            if criteria.includes(&current.borrow()) {
                debug!(inst = %current.borrow(), "uop generation session flushed");
                self.reset();
            }
        }
    }

    fn reset(&mut self) {
        self.current = None;
        self.num_generated = 0;
        self.num_to_generate = 0;
        self.ext_factor = 1;
    }
}
