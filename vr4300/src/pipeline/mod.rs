//! The pipeline proper: the latch set, the per-tick drivers, and the state
//! machine that moves between them.
//!
//! The fast path runs the five stages back to front, so every stage reads
//! its upstream latch before the stage behind it overwrites anything — the
//! one-cycle delay between stages falls out without double-buffering. When
//! a stage aborts, a table of resumable entry points takes over: each entry
//! runs from its stage down to IC, copying forward any latch already tagged
//! with a fault so the dead slot drains one stage per tick until WB
//! delivers it.

pub mod latch;

mod data_cache;
mod execute;
mod instruction_cache;
mod register_fetch;
mod writeback;

use crate::fault::PendingFill;
use crate::{SysAd, Vr4300};
use latch::{DcWbLatch, ExDcLatch, IcRfLatch, RfExLatch};

/// Where the next tick re-enters the pipeline. `Wb` doubles as the fast
/// path when no fault is in flight and as the full slow chain when one is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCycleType {
    Wb,
    Dc,
    Ex,
    Rf,
    Ic,
    BusyWait,
    DCacheBlock,
}

/// Marker for "this stage stalled or aborted; do not advance past it".
pub(crate) struct Aborted;

pub(crate) const PIPELINE_DEPTH: u32 = 5;

pub(crate) struct Pipeline {
    pub(crate) icrf: IcRfLatch,
    pub(crate) rfex: RfExLatch,
    pub(crate) exdc: ExDcLatch,
    pub(crate) dcwb: DcWbLatch,

    pub(crate) cycles_to_stall: u32,
    pub(crate) fault_present: bool,
    /// Fault-free WB ticks since the last fault; past one pipeline depth
    /// plus one, the fast path is safe again.
    pub(crate) exception_history: u32,
    pub(crate) cycle_type: PipelineCycleType,
    /// Data cache line staged by a DCM, waiting for the block entry point.
    pub(crate) pending_fill: Option<PendingFill>,
}

impl Pipeline {
    pub(crate) fn new() -> Pipeline {
        Pipeline {
            icrf: IcRfLatch::reset(),
            rfex: RfExLatch::reset(),
            exdc: ExDcLatch::reset(),
            dcwb: DcWbLatch::reset(),
            cycles_to_stall: 0,
            fault_present: false,
            exception_history: 0,
            cycle_type: PipelineCycleType::Wb,
            pending_fill: None,
        }
    }
}

impl Vr4300 {
    fn cycle_fast(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        self.wb_stage()?;
        self.dc_stage(bus)?;
        self.ex_stage()?;
        self.rf_stage(bus)?;
        self.ic_stage()
    }

    /// Full slow chain. WB either retires a clean slot or delivers a fault;
    /// delivery ends the tick with an IC-only restamp from the vector.
    fn cycle_slow_wb(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        self.pipeline.exception_history += 1;
        if self.pipeline.exception_history > PIPELINE_DEPTH {
            self.pipeline.fault_present = false;
        }

        match self.pipeline.dcwb.common.fault {
            None => self.wb_stage()?,
            Some(fault) => {
                self.deliver_fault(fault);
                return self.ic_stage();
            }
        }
        self.cycle_slow_dc(bus)
    }

    fn cycle_slow_dc(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        match self.pipeline.exdc.common.fault {
            None => self.dc_stage(bus)?,
            Some(_) => {
                // Dead slot: push the tag forward as a bubble.
                let p = &mut self.pipeline;
                p.dcwb.common = p.exdc.common;
                p.dcwb.result = 0;
                p.dcwb.dest = 0;
            }
        }
        self.cycle_slow_ex(bus)
    }

    fn cycle_slow_ex(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        match self.pipeline.rfex.common.fault {
            None => self.ex_stage()?,
            Some(_) => {
                let p = &mut self.pipeline;
                p.exdc.common = p.rfex.common;
                p.exdc.bury();
            }
        }
        self.cycle_slow_rf(bus)
    }

    fn cycle_slow_rf(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        match self.pipeline.icrf.common.fault {
            None => self.rf_stage(bus)?,
            Some(_) => {
                let p = &mut self.pipeline;
                p.rfex.common = p.icrf.common;
                // Mask the word so the retry decodes the slot as a no-op.
                p.rfex.bury();
            }
        }
        self.cycle_slow_ic(bus)
    }

    fn cycle_slow_ic(&mut self, _bus: &mut dyn SysAd) -> Result<(), Aborted> {
        self.ic_stage()?;
        self.pipeline.cycle_type = PipelineCycleType::Wb;
        Ok(())
    }

    /// Busy-wait: no pipeline work, just the DC interrupt predicate.
    fn cycle_busywait(&mut self) {
        if self.cp0.interrupt_pending() {
            self.intr();
        }
    }

    /// Data-cache-block: the long-running fill has completed; install the
    /// staged line and re-enter at DC, which will now hit.
    fn cycle_dcache_block(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        if let Some(fill) = self.pipeline.pending_fill.take() {
            self.dcache.fill(fill.vaddr, fill.paddr, fill.data);
        }
        self.cycle_slow_dc(bus)
    }

    /// Advances the processor by one master pclock.
    pub fn cycle(&mut self, bus: &mut impl SysAd) {
        let bus: &mut dyn SysAd = bus;

        // Count advances at half the pclock; equality with Compare raises
        // the timer interrupt the same tick.
        self.cycles += 1;
        let count = self.cp0.regs[crate::cp0::CP0_COUNT].wrapping_add(self.cycles & 0x1);
        self.cp0.regs[crate::cp0::CP0_COUNT] = count;
        if count as u32 == self.cp0.regs[crate::cp0::CP0_COMPARE] as u32 {
            self.cp0.regs[crate::cp0::CP0_CAUSE] |= crate::cp0::CAUSE_IP7 as u64;
        }

        if self.pipeline.cycles_to_stall > 0 {
            self.pipeline.cycles_to_stall -= 1;
            return;
        }

        // Faults are rare; only walk the abort checks when one can exist.
        if !self.pipeline.fault_present && self.pipeline.cycle_type == PipelineCycleType::Wb {
            let _ = self.cycle_fast(bus);
            return;
        }

        let _ = match self.pipeline.cycle_type {
            PipelineCycleType::Wb => self.cycle_slow_wb(bus),
            PipelineCycleType::Dc => self.cycle_slow_dc(bus),
            PipelineCycleType::Ex => self.cycle_slow_ex(bus),
            PipelineCycleType::Rf => self.cycle_slow_rf(bus),
            PipelineCycleType::Ic => self.cycle_slow_ic(bus),
            PipelineCycleType::BusyWait => {
                self.cycle_busywait();
                Ok(())
            }
            PipelineCycleType::DCacheBlock => self.cycle_dcache_block(bus),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::latch::CAUSE_DATA_BD;

    /// Flat RAM bus for driving the pipeline from inside the crate.
    struct RamBus {
        ram: Vec<u32>,
    }

    impl RamBus {
        fn new() -> RamBus {
            RamBus { ram: vec![0; 0x10000 / 4] }
        }
    }

    impl SysAd for RamBus {
        fn read_word(&mut self, paddr: u32) -> u32 {
            self.ram[(paddr as usize & 0xffff) >> 2]
        }

        fn write_word(&mut self, paddr: u32, word: u32, mask: u32) {
            let slot = &mut self.ram[(paddr as usize & 0xffff) >> 2];
            *slot = (*slot & !mask) | (word & mask);
        }
    }

    const BASE: u64 = 0xffff_ffff_8000_1000;

    fn addiu(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    fn beq(rs: u32, rt: u32, imm: i16) -> u32 {
        (0x04 << 26) | (rs << 21) | (rt << 16) | (imm as u16 as u32)
    }

    fn cpu_with(program: &[u32]) -> Vr4300 {
        let mut cpu = Vr4300::new();
        cpu.prime_icache(BASE, program);
        cpu.set_pc(BASE);
        cpu
    }

    #[test]
    fn delay_slot_is_stamped_with_the_bd_bit() {
        let program = [beq(0, 0, 2), addiu(4, 0, 1), 0, 0];
        let mut cpu = cpu_with(&program);
        let mut bus = RamBus::new();

        // Tick 1 stamps the branch itself; tick 2 decodes it and stamps the
        // slot behind it as a delay slot.
        cpu.cycle(&mut bus);
        cpu.cycle(&mut bus);
        assert_eq!(cpu.pipeline.icrf.common.pc, BASE + 4);
        assert!(cpu.pipeline.icrf.common.cause_data & CAUSE_DATA_BD != 0);

        // The slot after the delay slot is an ordinary one.
        cpu.cycle(&mut bus);
        assert!(cpu.pipeline.icrf.common.cause_data & CAUSE_DATA_BD == 0);
    }

    #[test]
    fn an_instruction_spends_at_least_five_ticks_in_flight() {
        let program = [addiu(1, 0, 7), 0, 0, 0, 0, 0];
        let mut cpu = cpu_with(&program);
        let mut bus = RamBus::new();

        // IC at tick 1; the result must not be architectural before WB at
        // tick 5.
        for _ in 0..4 {
            cpu.cycle(&mut bus);
            assert_eq!(cpu.gpr(1), 0);
        }
        cpu.cycle(&mut bus);
        assert_eq!(cpu.gpr(1), 7);
    }

    #[test]
    fn fast_path_reengages_after_depth_plus_one_clean_wb_ticks() {
        // A load-use pair forces one interlock, then plain no-ops drain.
        let lui = (0x0fu32 << 26) | (1 << 16) | 0x8000; // lui r1, 0x8000
        let lw = (0x23u32 << 26) | (1 << 21) | (2 << 16) | 0x2000; // lw r2, 0x2000(r1)
        let add = (3u32 << 11) | (2 << 21) | (2 << 16) | 0x20; // add r3, r2, r2
        let program = [lui, lw, add, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cpu = cpu_with(&program);
        cpu.prime_dcache(0xffff_ffff_8000_2000, &[0; 4]);
        let mut bus = RamBus::new();

        // Run until the interlock trips.
        while !cpu.pipeline.fault_present {
            cpu.cycle(&mut bus);
        }

        // One tick resumes at EX; after that, exactly depth + 1 fault-free
        // WB ticks must elapse before the flag drops.
        cpu.cycle(&mut bus);
        let mut clean_wb_ticks = 0;
        while cpu.pipeline.fault_present {
            cpu.cycle(&mut bus);
            clean_wb_ticks += 1;
        }
        assert_eq!(clean_wb_ticks, PIPELINE_DEPTH + 1);
    }

    #[test]
    fn sequential_fetches_reuse_the_latched_segment() {
        let program = [addiu(1, 0, 1), addiu(2, 0, 2), addiu(3, 0, 3), 0, 0, 0];
        let mut cpu = cpu_with(&program);
        let mut bus = RamBus::new();

        // The first stamp leaves the zero-length default segment and
        // resolves kseg0; every fetch after that stays inside its window
        // and must keep the very same descriptor.
        cpu.cycle(&mut bus);
        let resolved = cpu.pipeline.icrf.segment as *const _;
        assert_eq!(cpu.pipeline.icrf.segment.name, "kseg0");

        for _ in 0..6 {
            cpu.cycle(&mut bus);
            assert!(std::ptr::eq(cpu.pipeline.icrf.segment as *const _, resolved));
        }
    }

    #[test]
    fn stalls_tick_down_without_running_stages() {
        let program = [addiu(1, 0, 1), 0, 0, 0];
        let mut cpu = cpu_with(&program);
        let mut bus = RamBus::new();

        cpu.pipeline.cycles_to_stall = 3;
        let pc_before = cpu.pipeline.icrf.pc;
        let cycles_before = cpu.cycles();
        for expected in (0..3).rev() {
            cpu.cycle(&mut bus);
            assert_eq!(cpu.pipeline.cycles_to_stall, expected);
            assert_eq!(cpu.pipeline.icrf.pc, pc_before);
        }
        assert_eq!(cpu.cycles(), cycles_before + 3);
    }
}
