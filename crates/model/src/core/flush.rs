//! Flush criteria and broadcast.
//!
//! A flush names one offending instruction; every unit holding speculative
//! state evaluates the same predicate against it:
//! younger-than (`unique_id > offender`) for non-inclusive flushes, or
//! younger-or-equal (`>=`) for inclusive restarts.

use std::fmt;

use crate::common::{ProgramId, UniqueId};
use crate::inst::Inst;

/// Why a flush was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushKind {
    /// Branch resolved against the predicted direction at the ROB head.
    Misprediction,
    /// An LSU request exhausted its replay budget; the offender re-executes.
    ReplayExhausted,
}

/// The flush predicate broadcast to every unit.
#[derive(Clone, Copy, Debug)]
pub struct FlushCriteria {
    kind: FlushKind,
    unique_id: UniqueId,
    program_id: ProgramId,
    inclusive: bool,
}

impl FlushCriteria {
    /// Creates criteria for the instruction with the given ids.
    pub fn new(
        kind: FlushKind,
        unique_id: UniqueId,
        program_id: ProgramId,
        inclusive: bool,
    ) -> Self {
        Self {
            kind,
            unique_id,
            program_id,
            inclusive,
        }
    }

    /// Why the flush was raised.
    #[inline]
    pub fn kind(&self) -> FlushKind {
        self.kind
    }

    /// Unique id of the offending instruction.
    #[inline]
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    /// Program id of the offending instruction (refetch target).
    #[inline]
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    /// True if the offender itself is also squashed.
    #[inline]
    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    /// The flush predicate: does `inst` get squashed?
    pub fn includes(&self, inst: &Inst) -> bool {
        if self.inclusive {
            inst.unique_id() >= self.unique_id
        } else {
            inst.unique_id() > self.unique_id
        }
    }

    /// Same predicate on a bare unique id (for records not in hand).
    pub fn includes_uid(&self, uid: UniqueId) -> bool {
        if self.inclusive {
            uid >= self.unique_id
        } else {
            uid > self.unique_id
        }
    }

    /// Program position the instruction source should refetch from.
    pub fn refetch_program_id(&self) -> ProgramId {
        if self.inclusive {
            self.program_id
        } else {
            self.program_id + 1
        }
    }
}

impl fmt::Display for FlushCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} flush at uid {}{}",
            self.kind,
            self.unique_id,
            if self.inclusive {
                " (inclusive)"
            } else {
                ""
            }
        )
    }
}

/// Single-cycle flush broadcast latch.
///
/// The ROB (or LSU) arms the manager during its tick; every unit consumes the
/// criteria during the next cycle's flush phase. Only one flush is in flight
/// at a time — an older offender wins if two arrive in the same cycle.
#[derive(Debug, Default)]
pub struct FlushManager {
    pending: Option<FlushCriteria>,
}

impl FlushManager {
    /// Creates an idle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a flush. If one is already pending, the older offender wins.
    pub fn raise(&mut self, criteria: FlushCriteria) {
        match &self.pending {
            Some(existing) if existing.unique_id() <= criteria.unique_id() => {}
            _ => self.pending = Some(criteria),
        }
    }

    /// Takes the pending criteria for broadcast, leaving the manager idle.
    pub fn take(&mut self) -> Option<FlushCriteria> {
        self.pending.take()
    }

    /// True if a flush is armed.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
