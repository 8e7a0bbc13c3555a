//! WB: writeback stage.

use crate::pipeline::Aborted;
use crate::Vr4300;

impl Vr4300 {
    pub(crate) fn wb_stage(&mut self) -> Result<(), Aborted> {
        let dcwb = &self.pipeline.dcwb;
        self.regs.write(dcwb.dest, dcwb.result);
        Ok(())
    }
}
