//! RF: register fetch stage — translate the fetch PC and probe the
//! instruction cache.

use crate::pipeline::Aborted;
use crate::{SysAd, Vr4300};

impl Vr4300 {
    pub(crate) fn rf_stage(&mut self, bus: &mut dyn SysAd) -> Result<(), Aborted> {
        let common = self.pipeline.icrf.common;
        self.pipeline.rfex.common = common;

        let segment = self.pipeline.icrf.segment;
        let vaddr = common.pc;

        let paddr = if segment.mapped {
            self.translate(vaddr)
        } else {
            vaddr.wrapping_sub(segment.offset) as u32
        };

        if segment.cached {
            if let Some(line) = self.icache.probe(vaddr, paddr) {
                self.pipeline.rfex.iw = line.word(paddr);
                return Ok(());
            }
        }

        // Uncached segment or miss: the fetch needs the bus.
        self.pipeline.rfex.paddr = paddr;
        self.icb(bus);
        Err(Aborted)
    }
}
