//! The four inter-stage latches and the state they carry.

use common::util::ByteMask8;

use crate::fault::Fault;
use crate::instructions::Opcode;
use crate::regfile::REG_ZERO;
use crate::segment::{default_segment, Segment};

/// Set in `cause_data` when the instruction sits in a branch delay slot;
/// folded into the Cause register at delivery.
pub const CAUSE_DATA_BD: u32 = 0x8000_0000;

/// Header every latch carries forward: where the instruction came from,
/// whether its slot is dead, and what delivery will need for Cause.
#[derive(Clone, Copy)]
pub struct CommonLatch {
    pub pc: u64,
    pub fault: Option<Fault>,
    pub cause_data: u32,
}

impl CommonLatch {
    pub const EMPTY: CommonLatch = CommonLatch {
        pc: 0,
        fault: None,
        cause_data: 0,
    };
}

pub struct IcRfLatch {
    pub common: CommonLatch,
    /// PC of the next fetch, one slot ahead of `common.pc`.
    pub pc: u64,
    /// Segment the fetch stream currently runs in; re-resolved only when
    /// `pc` leaves its window.
    pub segment: &'static Segment,
}

impl IcRfLatch {
    pub fn reset() -> IcRfLatch {
        IcRfLatch {
            common: CommonLatch::EMPTY,
            pc: 0,
            segment: default_segment(),
        }
    }
}

pub struct RfExLatch {
    pub common: CommonLatch,
    /// Raw instruction word fetched by RF.
    pub iw: u32,
    /// Applied to `iw` before decode; zeroed to bury a killed slot.
    pub iw_mask: u32,
    /// PA recorded for the fill when the fetch missed.
    pub paddr: u32,
    pub opcode: Opcode,
}

impl RfExLatch {
    pub fn reset() -> RfExLatch {
        RfExLatch {
            common: CommonLatch::EMPTY,
            iw: 0,
            // The first decode out of reset must come up as a no-op.
            iw_mask: 0,
            paddr: 0,
            opcode: Opcode::NOP,
        }
    }

    /// Buries the slot: whatever word is latched will decode as a no-op.
    pub fn bury(&mut self) {
        self.iw_mask = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAccess {
    Read,
    Write,
}

/// Memory request assembled by an opcode handler in EX and serviced in DC.
#[derive(Debug, Clone, Copy)]
pub struct BusRequest {
    pub access: BusAccess,
    pub vaddr: u64,
    /// Filled in by DC once translation has run.
    pub paddr: u32,
    /// Access width in bytes.
    pub size: u32,
    /// An 8-byte access spans both words of a line half.
    pub two_words: bool,
    /// Byte lanes the access cares about.
    pub dqm: ByteMask8,
    /// Left shift applied to a loaded datum before it is merged in.
    pub postshift: u32,
    /// Store payload.
    pub data: u64,
}

pub struct ExDcLatch {
    pub common: CommonLatch,
    pub dest: usize,
    /// Result so far; loads merge on top of it in DC.
    pub result: u64,
    /// Segment the data stream last resolved.
    pub segment: &'static Segment,
    pub request: Option<BusRequest>,
}

impl ExDcLatch {
    pub fn reset() -> ExDcLatch {
        ExDcLatch {
            common: CommonLatch::EMPTY,
            dest: REG_ZERO,
            result: 0,
            segment: default_segment(),
            request: None,
        }
    }

    /// Turns whatever the latch holds into a harmless bubble.
    pub fn bury(&mut self) {
        self.dest = REG_ZERO;
        self.request = None;
    }
}

pub struct DcWbLatch {
    pub common: CommonLatch,
    pub dest: usize,
    pub result: u64,
}

impl DcWbLatch {
    pub fn reset() -> DcWbLatch {
        DcWbLatch {
            common: CommonLatch::EMPTY,
            dest: REG_ZERO,
            result: 0,
        }
    }
}
