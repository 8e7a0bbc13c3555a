//! IC: instruction cache stage.

use crate::instructions::decode;
use crate::pipeline::latch::CAUSE_DATA_BD;
use crate::pipeline::Aborted;
use crate::segment::get_segment;
use crate::Vr4300;

impl Vr4300 {
    /// Finishes decoding the word RF fetched this cycle, stamps the fresh
    /// IC/RF latch for the next slot, and advances the fetch PC. A buried
    /// slot arrives with a zero decode mask and comes out as a no-op.
    pub(crate) fn ic_stage(&mut self) -> Result<(), Aborted> {
        let rfex = &mut self.pipeline.rfex;
        rfex.iw &= rfex.iw_mask;
        rfex.opcode = decode(rfex.iw);
        rfex.iw_mask = !0;
        let prior_is_branch = rfex.opcode.is_branch();

        let icrf = &mut self.pipeline.icrf;
        let pc = icrf.pc;
        icrf.common.fault = None;
        icrf.common.pc = pc;
        // The slot being stamped sits right behind the instruction just
        // decoded; a branch there makes this its delay slot.
        icrf.common.cause_data = if prior_is_branch { CAUSE_DATA_BD } else { 0 };

        if !icrf.segment.contains(pc) {
            match get_segment(pc, self.cp0.status()) {
                Some(segment) => self.pipeline.icrf.segment = segment,
                None => {
                    self.iade();
                    return Err(Aborted);
                }
            }
        }

        self.pipeline.icrf.pc = pc.wrapping_add(4);
        Ok(())
    }
}
