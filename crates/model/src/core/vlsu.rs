//! Vector load/store unit.
//!
//! Fractures one vector memory uop into child memory requests according to
//! its addressing mode:
//! 1. **Unit-stride:** elements pack densely; one request per cache line,
//!    `total_mem_reqs = ceil((vl * eew) / line_bits)`.
//! 2. **Strided / indexed:** one request per element.
//!
//! Child requests issue one per cycle; each resolves through the cache with
//! the hit latency or the miss penalty. When the completed count reaches the
//! total, the uop finishes and its destination bits go ready.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::core::flush::FlushCriteria;
use crate::core::lsu::DCacheModel;
use crate::inst::{InstPtr, REG_FILES, RegFile, RegMask, Status};
use crate::stats::SimStats;
use crate::vector::{MemAccessOrder, VectorMemConfig};

/// Side effects of one VLSU tick.
#[derive(Debug, Default)]
pub struct VlsuOutput {
    /// Destination bits to mark ready.
    pub ready: Vec<(RegFile, RegMask)>,
    /// Credits to refund to dispatch.
    pub credits: u32,
}

/// The active fracture.
#[derive(Debug)]
struct VlsuOp {
    inst: InstPtr,
    issued: u32,
    /// Completion cycles of outstanding child requests.
    in_flight: Vec<u64>,
}

/// The vector load/store unit.
#[derive(Debug)]
pub struct VectorLsu {
    queue: VecDeque<InstPtr>,
    capacity: usize,
    current: Option<VlsuOp>,
    hit_latency: u64,
    miss_penalty: u64,
}

impl VectorLsu {
    /// Creates the unit.
    pub fn new(capacity: usize, hit_latency: u64, miss_penalty: u64) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            current: None,
            hit_latency,
            miss_penalty,
        }
    }

    /// Capacity (initial credit grant to dispatch).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when no uop is buffered or in flight.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }

    /// Accepts a dispatched vector memory uop.
    ///
    /// # Panics
    ///
    /// Panics on overflow — dispatch must respect VLSU credits.
    pub fn accept(&mut self, inst: InstPtr) {
        assert!(
            self.queue.len() < self.capacity,
            "VLSU queue overflow: {}",
            inst.borrow()
        );
        self.queue.push_back(inst);
    }

    /// Advances the unit one cycle.
    pub fn tick(&mut self, now: u64, dcache: &mut DCacheModel, stats: &mut SimStats) -> VlsuOutput {
        let mut output = VlsuOutput::default();

        if self.current.is_none() {
            if let Some(inst) = self.queue.pop_front() {
                self.start(inst, now, dcache);
            }
        }

        let Some(op) = &mut self.current else {
            return output;
        };

        // Issue one child request per cycle.
        let (total, eew, stride, mop, base) = {
            let b = op.inst.borrow();
            let config = b.vector_mem_config.expect("set at start");
            (
                config.total_mem_reqs,
                config.eew,
                config.stride,
                config.mop,
                b.target_vaddr(),
            )
        };
        if op.issued < total {
            let addr = match mop {
                MemAccessOrder::UnitStride => {
                    base + u64::from(op.issued) * u64::from(dcache.line_bits() / 8)
                }
                MemAccessOrder::Strided => base + u64::from(op.issued) * stride,
                // Index values are not modeled; element requests pace the
                // timing, striding by the element width.
                MemAccessOrder::Indexed => base + u64::from(op.issued) * u64::from(eew / 8),
            };
            let latency = if dcache.lookup_and_fill(addr) {
                self.hit_latency
            } else {
                self.miss_penalty
            };
            op.issued += 1;
            stats.vlsu_mem_requests += 1;
            op.in_flight.push(now + latency);
            trace!(
                inst = %op.inst.borrow(),
                addr,
                request = op.issued,
                of = total,
                "child memory request"
            );
        }

        // Collect finished child requests.
        let before = op.in_flight.len();
        op.in_flight.retain(|&done| done > now);
        let finished = (before - op.in_flight.len()) as u32;
        if finished > 0 {
            let mut b = op.inst.borrow_mut();
            let config = b.vector_mem_config.as_mut().expect("set at start");
            config.completed += finished;

            if config.completed == config.total_mem_reqs {
                for rf in REG_FILES {
                    let mask = b.dest_masks[rf.index()];
                    if mask != 0 {
                        output.ready.push((rf, mask));
                    }
                }
                b.set_status(Status::Completed);
                b.timestamps.execute_complete = now;
                debug!(inst = %b, "vector memory uop complete");
                drop(b);
                self.current = None;
                output.credits += 1;
            }
        }

        output
    }

    /// Begins fracturing a new uop.
    fn start(&mut self, inst: InstPtr, now: u64, dcache: &DCacheModel) {
        {
            let mut b = inst.borrow_mut();
            let mnemonic = b.mnemonic().to_string();
            let eew = crate::inst::arch_info::mem_eew(&mnemonic).unwrap_or(8);
            let mop = access_order(&mnemonic);
            let vl = uop_element_count(&b);
            let total = VectorMemConfig::required_requests(mop, vl, eew, dcache.line_bits());
            b.vector_mem_config = Some(VectorMemConfig {
                eew,
                // Stride values are not carried by the workload; element
                // requests use the element width as the pacing stride.
                stride: u64::from(eew / 8),
                mop,
                total_mem_reqs: total.max(1),
                completed: 0,
            });
            b.set_status(Status::Scheduled);
            b.timestamps.execute_start = now;
            debug!(inst = %b, total_mem_reqs = total.max(1), "vector memory uop accepted");
        }
        self.current = Some(VlsuOp {
            inst,
            issued: 0,
            in_flight: Vec::new(),
        });
    }
}

impl VectorLsu {
    /// Flush: drops covered uops and refunds their credits.
    ///
    /// Covered uops are also ROB entries; the ROB drain owns their flushed
    /// status and counting.
    pub fn handle_flush(&mut self, criteria: &FlushCriteria) -> u32 {
        let mut credits = 0;
        self.queue.retain(|inst| {
            let covered = criteria.includes(&inst.borrow());
            if covered {
                credits += 1;
            }
            !covered
        });
        let drop_current = self
            .current
            .as_ref()
            .is_some_and(|op| criteria.includes(&op.inst.borrow()));
        if drop_current {
            let _ = self.current.take();
            credits += 1;
        }
        credits
    }
}

/// Addressing mode from the mnemonic family.
fn access_order(mnemonic: &str) -> MemAccessOrder {
    if mnemonic.starts_with("vls") || mnemonic.starts_with("vss") {
        MemAccessOrder::Strided
    } else if mnemonic.contains("xei") {
        MemAccessOrder::Indexed
    } else {
        MemAccessOrder::UnitStride
    }
}

/// Elements this uop covers: a full register's worth, except the last uop
/// of the group which covers the remainder of vl.
fn uop_element_count(inst: &crate::inst::Inst) -> u32 {
    let Some(config) = inst.vector_config() else {
        return 1;
    };
    let elems_per_uop = crate::vector::VLEN / config.sew();
    let step = inst.uop_id().saturating_sub(1);
    let remaining = config.vl().saturating_sub(elems_per_uop * step);
    elems_per_uop.min(remaining)
}
