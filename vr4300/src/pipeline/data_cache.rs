//! DC: data cache stage — exception precedence, data-side translation, and
//! the cache read/write paths.

use crate::pipeline::latch::BusAccess;
use crate::pipeline::Aborted;
use crate::segment::get_segment;
use crate::{SysAd, Vr4300, SIGNAL_COLD_RESET};

impl Vr4300 {
    pub(crate) fn dc_stage(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        {
            let p = &mut self.pipeline;
            p.dcwb.common = p.exdc.common;
            p.dcwb.result = p.exdc.result;
            p.dcwb.dest = p.exdc.dest;
        }

        // Reset outprioritizes everything, interlocks included.
        if self.signals & SIGNAL_COLD_RESET != 0 {
            self.rst();
            return Err(Aborted);
        }

        // A pending, unmasked interrupt kills this instruction.
        if self.cp0.interrupt_pending() {
            self.intr();
            return Err(Aborted);
        }

        let Some(mut request) = self.pipeline.exdc.request else {
            return Ok(());
        };

        let vaddr = request.vaddr;
        let mut segment = self.pipeline.exdc.segment;
        if !segment.contains(vaddr) {
            match get_segment(vaddr, self.cp0.status()) {
                Some(found) => {
                    segment = found;
                    self.pipeline.exdc.segment = found;
                }
                None => {
                    self.dade();
                    return Err(Aborted);
                }
            }
        }

        let paddr = if segment.mapped {
            self.translate(vaddr)
        } else {
            vaddr.wrapping_sub(segment.offset) as u32
        };
        request.paddr = paddr;
        self.pipeline.exdc.request = Some(request);

        if !segment.cached {
            self.dcb(bus);
            return Err(Aborted);
        }
        let Some(line) = self.dcache.probe_mut(vaddr, paddr) else {
            self.dcm(bus);
            return Err(Aborted);
        };

        match request.access {
            BusAccess::Read => {
                let sdata = if request.two_words {
                    // The two halves compose high word first; see the store
                    // path below for the matching half-swap.
                    let hi = line.word(paddr & 0x8) as u64;
                    let lo = line.word((paddr & 0x8) + 4) as u64;
                    let lshift = (paddr & 0x7) << 3;
                    let rshift = (8 - request.size) << 3;
                    (((hi << 32 | lo) << lshift) as i64) >> rshift
                } else {
                    let word = line.word(paddr);
                    let lshift = (paddr & 0x3) << 3;
                    let rshift = (4 - request.size) << 3;
                    ((word.wrapping_shl(lshift) as i32) >> rshift) as i64
                };
                let dcwb = &mut self.pipeline.dcwb;
                dcwb.result |= request.dqm.apply(sdata as u64) << request.postshift;
            }
            BusAccess::Write => {
                if request.size > 4 {
                    // Doubleword stores swap halves into the line's bus word
                    // order before the masked merge.
                    let mut dword = line.dword(paddr);
                    request.dqm.masked_insert(&mut dword, request.data.rotate_left(32));
                    line.set_dword(paddr, dword);
                } else {
                    let mut word = line.word(paddr) as u64;
                    request.dqm.masked_insert(&mut word, request.data);
                    line.set_word(paddr, word as u32);
                }
                line.set_dirty();
            }
        }

        Ok(())
    }
}
