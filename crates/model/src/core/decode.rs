//! Decode: fetch buffering, vset triage, vector uop draining, fusion.
//!
//! Per cycle decode produces up to `min(downstream credits, decode width)`
//! records. The triage rules for the vset family:
//! 1. `vsetivli`, and `vsetvli` with an x0 source, resolve immediately —
//!    the local vector configuration updates and the vset passes through.
//! 2. `vsetvl`, and `vsetvli` with a register source, *block*: the vset is
//!    emitted with the blocking flag and nothing else decodes until the
//!    execute pipe forwards the resolved configuration back.
//!
//! Any other vector instruction is stamped with the current configuration;
//! if its uop generation type is not NONE, decode opens a generation session
//! and drains uops ahead of reading more of the fetch queue. A fusion pass
//! (when enabled) runs over each assembled batch before it is sent on.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::common::error::SimError;
use crate::core::flush::FlushCriteria;
use crate::core::fusion::Fuser;
use crate::inst::{InstPtr, Status};
use crate::stats::SimStats;
use crate::vector::VectorConfig;
use crate::vector::uop_gen::VectorUopGenerator;

/// The decode unit.
#[derive(Debug)]
pub struct DecodeUnit {
    fetch_queue: VecDeque<InstPtr>,
    fetch_queue_capacity: usize,
    num_to_decode: usize,

    vector_config: VectorConfig,
    waiting_on_vset: bool,
    vset_block_start: u64,

    uop_gen: VectorUopGenerator,
    fuser: Option<Fuser>,
}

impl DecodeUnit {
    /// Creates the unit.
    pub fn new(
        fetch_queue_capacity: usize,
        num_to_decode: usize,
        initial_config: VectorConfig,
        fuser: Option<Fuser>,
    ) -> Self {
        Self {
            fetch_queue: VecDeque::with_capacity(fetch_queue_capacity),
            fetch_queue_capacity,
            num_to_decode,
            vector_config: initial_config,
            waiting_on_vset: false,
            vset_block_start: 0,
            uop_gen: VectorUopGenerator::new(),
            fuser,
        }
    }

    /// Free fetch-queue slots (credits advertised to the instruction source).
    pub fn fetch_credits(&self) -> usize {
        self.fetch_queue_capacity - self.fetch_queue.len()
    }

    /// True when decode holds no buffered work.
    pub fn is_drained(&self) -> bool {
        self.fetch_queue.is_empty() && !self.uop_gen.keep_going() && !self.waiting_on_vset
    }

    /// True while stalled on a register-dependent vset.
    pub fn waiting_on_vset(&self) -> bool {
        self.waiting_on_vset
    }

    /// Current local vector configuration (tests/diagnostics).
    pub fn vector_config(&self) -> &VectorConfig {
        &self.vector_config
    }

    /// Lifetime vector uop count.
    pub fn total_uops_generated(&self) -> u64 {
        self.uop_gen.total_uops_generated()
    }

    /// Accepts one fetched instruction into the fetch queue.
    ///
    /// # Panics
    ///
    /// Panics on overflow — the source must respect fetch credits.
    pub fn push_fetched(&mut self, inst: InstPtr, now: u64) {
        assert!(
            self.fetch_queue.len() < self.fetch_queue_capacity,
            "fetch queue overflow at cycle {now}: {}",
            inst.borrow()
        );
        inst.borrow_mut().set_status(Status::Fetched);
        inst.borrow_mut().timestamps.fetched = now;
        trace!(inst = %inst.borrow(), "fetched");
        self.fetch_queue.push_back(inst);
    }

    /// Decodes up to `credits` records into `out`.
    pub fn tick(
        &mut self,
        now: u64,
        credits: usize,
        out: &mut Vec<InstPtr>,
        stats: &mut SimStats,
    ) -> Result<(), SimError> {
        let budget = credits.min(self.num_to_decode);
        let mut batch: Vec<InstPtr> = Vec::with_capacity(budget);

        while batch.len() < budget && !self.waiting_on_vset {
            if self.uop_gen.keep_going() {
                let uop = self.uop_gen.generate_uop();
                uop.borrow_mut().set_status(Status::Decoded);
                uop.borrow_mut().timestamps.decoded = now;
                stats.vector_uops_generated += 1;
                batch.push(uop);
                continue;
            }

            let Some(inst) = self.fetch_queue.front().cloned() else {
                break;
            };

            let (is_vset, mnemonic_is_vsetivli, has_x0_src) = {
                let b = inst.borrow();
                (
                    b.is_vset(),
                    b.mnemonic() == "vsetivli",
                    b.has_zero_reg_source(),
                )
            };

            if is_vset {
                if mnemonic_is_vsetivli || has_x0_src {
                    self.update_vector_config(&inst);
                } else {
                    // vsetvl always blocks; vsetvli blocks when rs1 is not x0.
                    stats.vset_blocking_count += 1;
                    self.vset_block_start = now;
                    self.waiting_on_vset = true;
                    inst.borrow_mut().blocking_vset = true;
                    debug!(inst = %inst.borrow(), "decode stalled on register-dependent vset");
                }
                self.emit(&inst, now, &mut batch, stats);
                let _ = self.fetch_queue.pop_front();
                continue;
            }

            let (is_vector, has_uop_gen) = {
                let b = inst.borrow();
                (
                    b.is_vector(),
                    b.uop_gen() != crate::inst::UopGenType::None,
                )
            };

            if is_vector {
                inst.borrow_mut().set_vector_config(self.vector_config);
            }

            // Even with LMUL == 1 the generator runs: several kinds add
            // implicit sources (multiply-add, reductions, slides).
            if is_vector && has_uop_gen {
                let _ = self.fetch_queue.pop_front();
                self.uop_gen.set_inst(&inst)?;
                if self.uop_gen.keep_going() {
                    let uop = self.uop_gen.generate_uop();
                    uop.borrow_mut().set_status(Status::Decoded);
                    uop.borrow_mut().timestamps.decoded = now;
                    stats.vector_uops_generated += 1;
                    batch.push(uop);
                } else {
                    // vl == 0: the instruction covers no elements.
                    stats.vector_vl_zero_dropped += 1;
                    debug!(inst = %inst.borrow(), "dropped, vl is zero");
                }
                continue;
            }

            self.emit(&inst, now, &mut batch, stats);
            let _ = self.fetch_queue.pop_front();
        }

        if let Some(fuser) = &mut self.fuser {
            let outcome = fuser.process(&mut batch);
            stats.fusion_num_fused += outcome.fused;
            stats.fusion_num_ghosts += outcome.ghosts;
            stats.fusion_cycles_saved += outcome.cycles_saved;
            stats.fusion_groups_utilized = fuser.groups_utilized();
        }

        out.extend(batch);
        Ok(())
    }

    fn emit(&self, inst: &InstPtr, now: u64, batch: &mut Vec<InstPtr>, stats: &mut SimStats) {
        inst.borrow_mut().set_status(Status::Decoded);
        inst.borrow_mut().timestamps.decoded = now;
        stats.instructions_decoded += 1;
        trace!(inst = %inst.borrow(), "decoded");
        batch.push(inst.clone());
    }

    /// Applies a resolving vset to the local configuration.
    ///
    /// vtype rides the low immediate bits (`lmul = 1 << imm[2:0]`,
    /// `sew = 8 << imm[5:3]`, `vta = imm[6]`); `vsetivli` packs its AVL in
    /// the bits above. A `vsetvli` with x0 source keeps the current vl
    /// (clamped) when rd is also x0, and takes vlmax otherwise.
    fn update_vector_config(&mut self, inst: &InstPtr) {
        let b = inst.borrow();
        let imm = b.immediate().unwrap_or_default();
        let lmul = 1u32 << (imm & 0x7);
        let sew = 8u32 << ((imm >> 3) & 0x7);
        let vta = (imm >> 6) & 1 == 1;

        let mut config = VectorConfig::new(0, sew, lmul, vta);
        if b.mnemonic() == "vsetivli" {
            config.set_vl((imm >> 7) as u32);
        } else if b.has_zero_reg_dest() {
            // rs1 == x0 and rd == x0: vl is unchanged (clamped to new vlmax).
            config.set_vl(self.vector_config.vl());
        } else {
            config.set_vl(config.vlmax());
        }

        debug!(inst = %b, config = %config, "vector configuration updated");
        self.vector_config = config;
    }

    /// Resolved configuration forwarded from the execute pipe for a blocking
    /// vset. Register AVL is not modeled as a value, so the resolved vl is
    /// vlmax for the forwarded vtype.
    pub fn process_vset(&mut self, inst: &InstPtr, now: u64, stats: &mut SimStats) {
        let imm = inst.borrow().immediate().unwrap_or_default();
        let lmul = 1u32 << (imm & 0x7);
        let sew = 8u32 << ((imm >> 3) & 0x7);
        let vta = (imm >> 6) & 1 == 1;
        let mut config = VectorConfig::new(0, sew, lmul, vta);
        config.set_vl(config.vlmax());
        self.vector_config = config;

        if self.waiting_on_vset {
            stats.vset_stall_cycles += now.saturating_sub(self.vset_block_start);
            self.waiting_on_vset = false;
            debug!(inst = %inst.borrow(), config = %self.vector_config, "vset resolved, decode resumed");
        }
    }

    /// Flush: clears the fetch queue and resets any uop session covering the
    /// flushed range. A pending vset block is released if its vset was
    /// squashed.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria, stats: &mut SimStats) {
        for inst in self.fetch_queue.drain(..) {
            inst.borrow_mut().set_status(Status::Flushed);
            stats.instructions_flushed += 1;
        }
        self.uop_gen.handle_flush(criteria);
        if self.waiting_on_vset {
            // The blocking vset (still in flight) may itself have been
            // squashed; a refetched copy will re-block if needed.
            self.waiting_on_vset = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{Inst, Operand, OperandField, RegFile, TargetPipe, UopGenType, into_ptr};

    fn scalar(uid: u64) -> InstPtr {
        let mut inst = Inst::new(
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
        );
        inst.set_unique_id(uid);
        into_ptr(inst)
    }

    fn vadd(uid: u64) -> InstPtr {
        let mut inst = Inst::new(
            "vadd.vv",
            0,
            TargetPipe::Vint,
            1,
            UopGenType::Elementwise,
            vec![
                Operand::new(OperandField::Rs2, RegFile::Vector, 4),
                Operand::new(OperandField::Rs1, RegFile::Vector, 8),
            ],
            vec![Operand::new(OperandField::Rd, RegFile::Vector, 12)],
            None,
        );
        inst.set_unique_id(uid);
        into_ptr(inst)
    }

    /// imm encoding: lmul=4 -> 2, sew=32 -> 2 in bits [5:3]; vsetivli packs
    /// its AVL above bit 7, the register forms carry rs1 as an operand.
    fn vset(uid: u64, mnemonic: &str, rs1: u32, rd: u32) -> InstPtr {
        let vtype = 0b010_010u64; // sew=32, lmul=4
        let (imm, sources) = if mnemonic == "vsetivli" {
            (vtype | (u64::from(rs1) << 7), vec![])
        } else {
            (
                vtype,
                vec![Operand::new(OperandField::Rs1, RegFile::Int, rs1)],
            )
        };
        let mut inst = Inst::new(
            mnemonic,
            0,
            TargetPipe::Vset,
            1,
            UopGenType::None,
            sources,
            vec![Operand::new(OperandField::Rd, RegFile::Int, rd)],
            Some(imm),
        );
        inst.set_unique_id(uid);
        into_ptr(inst)
    }

    fn decode_unit() -> DecodeUnit {
        DecodeUnit::new(16, 4, VectorConfig::default(), None)
    }

    #[test]
    fn test_scalar_passthrough() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        decode.push_fetched(scalar(1), 0);
        decode.push_fetched(scalar(2), 0);

        let mut out = Vec::new();
        decode.tick(1, 8, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].borrow().status(), Status::Decoded);
        assert_eq!(stats.instructions_decoded, 2);
    }

    #[test]
    fn test_credit_bound() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        for uid in 0..6 {
            decode.push_fetched(scalar(uid), 0);
        }
        let mut out = Vec::new();
        decode.tick(1, 2, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 2);

        // Width bound applies even with plentiful credits.
        out.clear();
        decode.tick(2, 100, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_vsetivli_updates_config_inline() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        // vsetivli with uimm 128 in the rs1 slot.
        decode.push_fetched(vset(1, "vsetivli", 128, 1), 0);
        decode.push_fetched(vadd(2), 0);

        let mut out = Vec::new();
        decode.tick(1, 8, &mut out, &mut stats).unwrap();

        assert!(!decode.waiting_on_vset());
        assert_eq!(decode.vector_config().sew(), 32);
        assert_eq!(decode.vector_config().lmul(), 4);
        assert_eq!(decode.vector_config().vl(), 128);
        // vset + 4 uops of the vadd.
        assert_eq!(out.len(), 5);
        assert_eq!(stats.vector_uops_generated, 4);
    }

    #[test]
    fn test_vsetvl_blocks_decode() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        decode.push_fetched(vset(1, "vsetvl", 5, 1), 0);
        decode.push_fetched(scalar(2), 0);

        let mut out = Vec::new();
        decode.tick(1, 8, &mut out, &mut stats).unwrap();

        // Only the vset came out; the scalar is stuck behind the block.
        assert_eq!(out.len(), 1);
        assert!(out[0].borrow().blocking_vset);
        assert!(decode.waiting_on_vset());
        assert_eq!(stats.vset_blocking_count, 1);

        out.clear();
        decode.tick(2, 8, &mut out, &mut stats).unwrap();
        assert!(out.is_empty());

        // Execute forwards the resolved config at cycle 5.
        let vset_inst = vset(1, "vsetvl", 5, 1);
        decode.process_vset(&vset_inst, 5, &mut stats);
        assert!(!decode.waiting_on_vset());
        assert_eq!(stats.vset_stall_cycles, 4);

        decode.tick(5, 8, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_vsetvli_x0_src_x0_dest_keeps_vl() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        // Default config vl=16; switching to sew=32/lmul=4 with x0/x0
        // keeps vl at 16.
        decode.push_fetched(vset(1, "vsetvli", 0, 0), 0);
        let mut out = Vec::new();
        decode.tick(1, 8, &mut out, &mut stats).unwrap();
        assert_eq!(decode.vector_config().vl(), 16);
        assert!(!decode.waiting_on_vset());
    }

    #[test]
    fn test_uop_drain_across_cycles() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        decode.push_fetched(vset(1, "vsetivli", 128, 1), 0);
        decode.push_fetched(vadd(2), 0);

        // Width 4: cycle 1 gets vset + 3 uops, cycle 2 the last uop.
        let mut out = Vec::new();
        decode.tick(1, 4, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 4);
        out.clear();
        decode.tick(2, 4, &mut out, &mut stats).unwrap();
        assert_eq!(out.len(), 1);
        assert!(decode.is_drained());
    }

    #[test]
    fn test_flush_clears_fetch_queue() {
        let mut decode = decode_unit();
        let mut stats = SimStats::default();
        decode.push_fetched(scalar(5), 0);
        decode.push_fetched(scalar(6), 0);

        let criteria = FlushCriteria::new(
            crate::core::flush::FlushKind::Misprediction,
            1,
            1,
            false,
        );
        decode.handle_flush(&criteria, &mut stats);
        assert!(decode.is_drained());
        assert_eq!(stats.instructions_flushed, 2);
    }
}
