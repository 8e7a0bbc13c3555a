//! EX: execute stage — operand selection, the load-use interlock, and
//! dispatch into the opcode table.

use log::trace;

use crate::instructions::{OP_CP1_RS, OP_CP1_RT, OP_NEEDS_RS, OP_NEEDS_RT};
use crate::opcodes::{ExecContext, FUNCTION_TABLE};
use crate::pipeline::latch::{BusAccess, BusRequest};
use crate::pipeline::Aborted;
use crate::regfile::{REG_CP1_0, REG_ZERO};
use crate::Vr4300;

// Operand source selection: (register file base, field shift) for the GPR
// and CP1 cases. The CP1 flag bits index these directly.
const RS_SELECT: [(usize, u32); 2] = [(0, 21), (REG_CP1_0, 11)];
const RT_SELECT: [(usize, u32); 2] = [(0, 16), (REG_CP1_0, 16)];

impl Vr4300 {
    pub(crate) fn ex_stage(&mut self) -> Result<(), Aborted> {
        let common = self.pipeline.rfex.common;
        self.pipeline.exdc.common = common;

        let opcode = self.pipeline.rfex.opcode;
        let iw = self.pipeline.rfex.iw;

        // Only a load landing in DC this very cycle can interlock; any other
        // result forwards from the DC/WB latch below.
        let mut flags = opcode.flags;
        let prior_is_load = matches!(
            self.pipeline.exdc.request,
            Some(BusRequest { access: BusAccess::Read, .. })
        );
        if !prior_is_load {
            flags &= !(OP_NEEDS_RS | OP_NEEDS_RT);
        }

        let (rs_base, rs_shift) = RS_SELECT[(flags & OP_CP1_RS) as usize];
        let (rt_base, rt_shift) = RT_SELECT[((flags & OP_CP1_RT) >> 1) as usize];
        let mut rs = ((iw >> rs_shift) & 0x1f) as usize + rs_base;
        let mut rt = ((iw >> rt_shift) & 0x1f) as usize + rt_base;

        // With FR clear, CP1 registers pair up and only even indexes exist.
        if self.cp0.fr() == 0 {
            if flags & OP_CP1_RS != 0 {
                rs &= !1;
            }
            if flags & OP_CP1_RT != 0 {
                rt &= !1;
            }
        }

        let fwd_dest = self.pipeline.dcwb.dest;
        if fwd_dest != REG_ZERO
            && ((fwd_dest == rs && flags & OP_NEEDS_RS != 0)
                || (fwd_dest == rt && flags & OP_NEEDS_RT != 0))
        {
            self.ldi();
            return Err(Aborted);
        }

        let fwd_result = self.pipeline.dcwb.result;
        let rs_val = self.regs.read_forwarded(rs, fwd_dest, fwd_result);
        let rt_val = self.regs.read_forwarded(rt, fwd_dest, fwd_result);

        trace!("{:#018x}: {:?}", common.pc, opcode.id);

        let exdc = &mut self.pipeline.exdc;
        exdc.dest = REG_ZERO;
        exdc.request = None;

        let mut ctx = ExecContext {
            iw,
            opcode,
            pc: common.pc,
            rs: rs_val,
            rt: rt_val,
            exdc,
            fetch_pc: &mut self.pipeline.icrf.pc,
            next_iw_mask: &mut self.pipeline.rfex.iw_mask,
            cycle_type: &mut self.pipeline.cycle_type,
            cp0: &mut self.cp0,
        };
        if FUNCTION_TABLE[opcode.id as usize](&mut ctx) {
            return Err(Aborted);
        }
        Ok(())
    }
}
