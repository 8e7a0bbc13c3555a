//! Pipeline faults: the taxonomy, the per-stage raisers, and delivery.
//!
//! Faults never unwind. A raiser either tags the stage's output latch (true
//! faults, which kill the instruction and travel down to WB for delivery) or
//! programs a stall-and-resume (interlocks, which re-run the same instruction
//! once the blocking condition clears). Delivery at WB is the only place
//! user-visible CP0 state changes.

use log::debug;

use crate::cp0::{
    CP0_BAD_VADDR, CP0_CAUSE, CP0_EPC, CP0_ERROR_EPC, CP0_STATUS, STATUS_ERL, STATUS_EXL,
};
use crate::pipeline::latch::{BusAccess, CAUSE_DATA_BD};
use crate::pipeline::PipelineCycleType;
use crate::{SysAd, Vr4300, SIGNAL_COLD_RESET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    InstructionAddressError,
    InstructionCacheBusy,
    LoadDelayInterlock,
    DataAddressError,
    DataCacheMiss,
    DataCacheBusy,
    Interrupt,
    ColdReset,
}

// Stall penalties charged by the memory-side interlocks. Calibrating them
// against real bus timing belongs to the device; the pipeline only promises
// where in the tick the counts are charged.
pub const ICACHE_FILL_PENALTY: u32 = 8;
pub const DCACHE_FILL_PENALTY: u32 = 6;
pub const DCACHE_WRITEBACK_PENALTY: u32 = 6;
pub const UNCACHED_ACCESS_PENALTY: u32 = 38;

// Exception codes, pre-shifted into their Cause register position.
const EXC_CODE_INTERRUPT: u32 = 0 << 2;
const EXC_CODE_ADDRESS_LOAD: u32 = 4 << 2;
const EXC_CODE_ADDRESS_STORE: u32 = 5 << 2;
const EXC_CODE_FIELD: u32 = 0x7c;
const CAUSE_CODE_MASK: u32 = 0x8000_007c;

const GENERAL_VECTOR: u64 = 0xffff_ffff_8000_0180;
const RESET_VECTOR: u64 = 0xffff_ffff_bfc0_0000;

/// Staged data-cache line waiting for the data-cache-block resume point.
pub struct PendingFill {
    pub vaddr: u64,
    pub paddr: u32,
    pub data: [u32; 4],
}

impl Vr4300 {
    /// Common bookkeeping for an interlock: stall, pick the resume entry
    /// point, and restart the fault-free tick count. Interlocks never tag a
    /// latch (a tag means the slot is dead); the kind is for the log.
    fn interlock(&mut self, fault: Fault, cycles_to_stall: u32, resume: PipelineCycleType) {
        debug!("{:?}: stalling {} cycles, resuming at {:?}", fault, cycles_to_stall, resume);
        self.pipeline.cycles_to_stall = cycles_to_stall;
        self.pipeline.cycle_type = resume;
        self.pipeline.fault_present = true;
        self.pipeline.exception_history = 0;
    }

    /// Common bookkeeping for a true fault: the tagged latch travels; the
    /// full slow chain runs so WB can deliver it.
    fn mark_fault(&mut self) {
        self.pipeline.cycle_type = PipelineCycleType::Wb;
        self.pipeline.fault_present = true;
        self.pipeline.exception_history = 0;
    }

    /// IADE: no segment covers the fetch PC.
    pub(crate) fn iade(&mut self) {
        let icrf = &mut self.pipeline.icrf;
        debug!("IADE: no segment for pc {:#018x}", icrf.pc);
        icrf.common.fault = Some(Fault::InstructionAddressError);
        icrf.common.cause_data =
            (icrf.common.cause_data & !EXC_CODE_FIELD) | EXC_CODE_ADDRESS_LOAD;
        self.cp0.regs[CP0_BAD_VADDR] = self.pipeline.icrf.pc;
        self.mark_fault();
    }

    /// ICB: the fetch needs the bus. Cached segments fill the whole line and
    /// re-run RF against it; uncached segments read the word straight into
    /// the RF/EX latch and resume at IC, which completes the decode.
    pub(crate) fn icb(&mut self, bus: &mut dyn SysAd) {
        let paddr = self.pipeline.rfex.paddr;
        let vaddr = self.pipeline.icrf.common.pc;

        if self.pipeline.icrf.segment.cached {
            debug!("ICB: icache fill for {:#010x}", paddr);
            let base = paddr & !0x1f;
            let mut data = [0u32; 8];
            for (i, word) in data.iter_mut().enumerate() {
                *word = bus.read_word(base + (i as u32) * 4);
            }
            self.icache.fill(vaddr, paddr, data);
            self.interlock(
                Fault::InstructionCacheBusy,
                ICACHE_FILL_PENALTY,
                PipelineCycleType::Rf,
            );
        } else {
            debug!("ICB: uncached fetch from {:#010x}", paddr);
            self.pipeline.rfex.iw = bus.read_word(paddr & !0x3);
            self.interlock(
                Fault::InstructionCacheBusy,
                UNCACHED_ACCESS_PENALTY,
                PipelineCycleType::Ic,
            );
        }
    }

    /// LDI: the previous instruction's load lands this very cycle; EX must
    /// re-run once it has. Clearing the serviced request is what lets the
    /// retry through.
    pub(crate) fn ldi(&mut self) {
        debug!("LDI at pc {:#018x}", self.pipeline.rfex.common.pc);
        self.pipeline.exdc.request = None;
        self.interlock(Fault::LoadDelayInterlock, 0, PipelineCycleType::Ex);
    }

    /// DADE: no segment covers the effective address.
    pub(crate) fn dade(&mut self) {
        let exdc = &self.pipeline.exdc;
        let request = exdc.request.expect("DADE without a bus request");
        debug!("DADE: no segment for address {:#018x}", request.vaddr);

        let code = match request.access {
            BusAccess::Read => EXC_CODE_ADDRESS_LOAD,
            BusAccess::Write => EXC_CODE_ADDRESS_STORE,
        };
        let dcwb = &mut self.pipeline.dcwb;
        dcwb.common.fault = Some(Fault::DataAddressError);
        dcwb.common.cause_data = (dcwb.common.cause_data & !EXC_CODE_FIELD) | code;
        self.cp0.regs[CP0_BAD_VADDR] = request.vaddr;
        self.mark_fault();
    }

    /// DCM: cached data access missed. Writes back a dirty victim, reads the
    /// replacement line, and parks it for the data-cache-block entry point.
    pub(crate) fn dcm(&mut self, bus: &mut dyn SysAd) {
        let request = self.pipeline.exdc.request.expect("DCM without a bus request");
        debug!("DCM: dcache fill for {:#010x}", request.paddr);

        let mut penalty = DCACHE_FILL_PENALTY;
        if let Some((victim_paddr, line)) = self.dcache.victim(request.vaddr) {
            if line.is_dirty() {
                debug!("DCM: dirty writeback of {:#010x}", victim_paddr);
                for (i, word) in line.data().iter().enumerate() {
                    bus.write_word(victim_paddr + (i as u32) * 4, *word, !0);
                }
                penalty += DCACHE_WRITEBACK_PENALTY;
            }
        }

        let base = request.paddr & !0xf;
        let mut data = [0u32; 4];
        for (i, word) in data.iter_mut().enumerate() {
            *word = bus.read_word(base + (i as u32) * 4);
        }
        self.pipeline.pending_fill = Some(PendingFill {
            vaddr: request.vaddr,
            paddr: request.paddr,
            data,
        });
        self.interlock(Fault::DataCacheMiss, penalty, PipelineCycleType::DCacheBlock);
    }

    /// DCB: uncached data access. Serviced word-by-word on the bus right
    /// here; the request is consumed so the instruction completes through
    /// WB without re-entering DC.
    pub(crate) fn dcb(&mut self, bus: &mut dyn SysAd) {
        let request = self.pipeline.exdc.request.take().expect("DCB without a bus request");
        let paddr = request.paddr;
        debug!("DCB: uncached {:?} at {:#010x}", request.access, paddr);

        match request.access {
            BusAccess::Read => {
                let sdata = if request.two_words {
                    let hi = bus.read_word(paddr & !0x7) as u64;
                    let lo = bus.read_word((paddr & !0x7) + 4) as u64;
                    let lshift = (paddr & 0x7) << 3;
                    let rshift = (8 - request.size) << 3;
                    (((hi << 32 | lo) << lshift) as i64) >> rshift
                } else {
                    let word = bus.read_word(paddr & !0x3);
                    let lshift = (paddr & 0x3) << 3;
                    let rshift = (4 - request.size) << 3;
                    (((word.wrapping_shl(lshift)) as i32) >> rshift) as i64
                };
                let dcwb = &mut self.pipeline.dcwb;
                dcwb.result |= request.dqm.apply(sdata as u64) << request.postshift;
            }
            BusAccess::Write => {
                if request.two_words {
                    let mask = request.dqm.value();
                    bus.write_word(paddr & !0x7, (request.data >> 32) as u32, (mask >> 32) as u32);
                    bus.write_word((paddr & !0x7) + 4, request.data as u32, mask as u32);
                } else {
                    bus.write_word(paddr & !0x3, request.data as u32, request.dqm.word_value());
                }
            }
        }
        self.interlock(Fault::DataCacheBusy, UNCACHED_ACCESS_PENALTY, PipelineCycleType::Wb);
    }

    /// INTR: a masked, enabled interrupt is pending; the instruction in DC
    /// takes the hit and everything younger dies at delivery.
    pub(crate) fn intr(&mut self) {
        debug!("INTR at pc {:#018x}", self.pipeline.dcwb.common.pc);
        let common = &mut self.pipeline.dcwb.common;
        common.fault = Some(Fault::Interrupt);
        common.cause_data = (common.cause_data & !EXC_CODE_FIELD) | EXC_CODE_INTERRUPT;
        self.mark_fault();
    }

    /// RST: the cold reset signal outprioritizes everything in DC.
    pub(crate) fn rst(&mut self) {
        debug!("RST observed in DC");
        self.signals &= !SIGNAL_COLD_RESET;
        self.pipeline.dcwb.common.fault = Some(Fault::ColdReset);
        self.mark_fault();
    }

    /// Delivery, run by the WB slow entry when the DC/WB latch carries a
    /// tag: compose Cause, latch EPC, raise EXL, bury every in-flight slot,
    /// and point the fetch stream at the vector.
    pub(crate) fn deliver_fault(&mut self, fault: Fault) {
        let common = self.pipeline.dcwb.common;
        let in_delay_slot = common.cause_data & CAUSE_DATA_BD != 0;
        debug!("delivering {:?} raised at pc {:#018x}", fault, common.pc);

        let vector = if fault == Fault::ColdReset {
            self.cp0.regs[CP0_ERROR_EPC] = common.pc;
            self.cp0.regs[CP0_STATUS] |= STATUS_ERL as u64;
            RESET_VECTOR
        } else {
            let status = self.cp0.status();
            if status & STATUS_EXL == 0 {
                self.cp0.regs[CP0_EPC] = if in_delay_slot {
                    common.pc.wrapping_sub(4)
                } else {
                    common.pc
                };
            }
            // The code and BD fields ride in on cause_data; pending IP bits
            // are preserved.
            let cause = self.cp0.cause() & !CAUSE_CODE_MASK;
            self.cp0.regs[CP0_CAUSE] = (cause | (common.cause_data & CAUSE_CODE_MASK)) as u64;
            self.cp0.regs[CP0_STATUS] = (status | STATUS_EXL) as u64;
            GENERAL_VECTOR
        };

        // Bury everything in flight and refetch from the vector.
        let p = &mut self.pipeline;
        p.dcwb.dest = 0;
        p.dcwb.common.fault = None;
        p.exdc.bury();
        p.exdc.common.fault = None;
        p.rfex.bury();
        p.rfex.common.fault = None;
        p.icrf.common.fault = None;
        p.icrf.pc = vector;
        p.exception_history = 0;
        p.fault_present = true;
        p.cycle_type = PipelineCycleType::Wb;
    }
}
