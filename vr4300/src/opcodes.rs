//! Per-opcode handlers and the dispatch table the EX stage indexes.
//!
//! Handlers see a deliberately narrow view of the machine: the instruction
//! word, its operand values, and write handles for the EX/DC latch, the
//! fetch PC, the next decode mask, CP0, and the pipeline cycle type. They
//! cannot touch caches, the TLB, or other latches; memory side effects go
//! through the bus request they leave in the latch.

use common::util::ByteMask8;
use log::warn;
use strum::EnumCount;

use crate::cp0::{Cp0, CAUSE_IP7, CP0_CAUSE, CP0_COMPARE, CP0_EPC, CP0_ERROR_EPC, CP0_STATUS,
    STATUS_ERL, STATUS_EXL};
use crate::instructions::{IType, JType, Opcode, OpId, RType, OP_WRITES_RD};
use crate::pipeline::latch::{BusAccess, BusRequest, ExDcLatch};
use crate::pipeline::PipelineCycleType;

/// The canonical idle loop: `beq r0, r0, -1`.
const BUSY_WAIT_IW: u32 = 0x1000_ffff;

pub struct ExecContext<'a> {
    pub iw: u32,
    pub opcode: Opcode,
    pub pc: u64,
    pub rs: u64,
    pub rt: u64,
    pub exdc: &'a mut ExDcLatch,
    /// The IC latch fetch PC; branches redirect the stream through it.
    pub fetch_pc: &'a mut u64,
    /// Decode mask of the slot behind us; zeroing it buries that slot.
    pub next_iw_mask: &'a mut u32,
    pub cycle_type: &'a mut PipelineCycleType,
    pub cp0: &'a mut Cp0,
}

impl ExecContext<'_> {
    /// Destination register per the opcode's writes-via-rd/rt routing flag.
    #[inline(always)]
    fn dest(&self) -> usize {
        if self.opcode.flags & OP_WRITES_RD != 0 {
            RType::from(self.iw).rd() as usize
        } else {
            IType::from(self.iw).rt() as usize
        }
    }

    #[inline(always)]
    fn write(&mut self, value: u64) {
        self.exdc.dest = self.dest();
        self.exdc.result = value;
    }

    #[inline(always)]
    fn imm_se(&self) -> u64 {
        IType::from(self.iw).imm() as i16 as u64
    }

    #[inline(always)]
    fn branch_target(&self) -> u64 {
        let offset = (IType::from(self.iw).imm() as i16 as i64) << 2;
        self.pc.wrapping_add(4).wrapping_add(offset as u64)
    }

    #[inline(always)]
    fn take_branch(&mut self) {
        *self.fetch_pc = self.branch_target();
    }
}

pub type OpFn = fn(&mut ExecContext) -> bool;

fn op_invalid(ctx: &mut ExecContext) -> bool {
    warn!("unhandled instruction word {:#010x} at pc {:#018x}", ctx.iw, ctx.pc);
    false
}

// Shifts operate on the low word and sign-extend, per MIPS III 32-bit ops.

fn op_sll(ctx: &mut ExecContext) -> bool {
    let sa = RType::from(ctx.iw).sa() as u32;
    ctx.write(((ctx.rt as u32) << sa) as i32 as u64);
    false
}

fn op_srl(ctx: &mut ExecContext) -> bool {
    let sa = RType::from(ctx.iw).sa() as u32;
    ctx.write(((ctx.rt as u32) >> sa) as i32 as u64);
    false
}

fn op_sra(ctx: &mut ExecContext) -> bool {
    let sa = RType::from(ctx.iw).sa() as u32;
    ctx.write(((ctx.rt as u32 as i32) >> sa) as u64);
    false
}

fn op_sllv(ctx: &mut ExecContext) -> bool {
    let sa = (ctx.rs & 0x1f) as u32;
    ctx.write(((ctx.rt as u32) << sa) as i32 as u64);
    false
}

fn op_srlv(ctx: &mut ExecContext) -> bool {
    let sa = (ctx.rs & 0x1f) as u32;
    ctx.write(((ctx.rt as u32) >> sa) as i32 as u64);
    false
}

fn op_srav(ctx: &mut ExecContext) -> bool {
    let sa = (ctx.rs & 0x1f) as u32;
    ctx.write(((ctx.rt as u32 as i32) >> sa) as u64);
    false
}

fn op_jr(ctx: &mut ExecContext) -> bool {
    *ctx.fetch_pc = ctx.rs;
    false
}

fn op_jalr(ctx: &mut ExecContext) -> bool {
    let link = ctx.pc.wrapping_add(8);
    ctx.write(link);
    *ctx.fetch_pc = ctx.rs;
    false
}

fn op_add(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_add(ctx.rt as i32) as u64);
    false
}

fn op_addu(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_add(ctx.rt as i32) as u64);
    false
}

fn op_sub(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_sub(ctx.rt as i32) as u64);
    false
}

fn op_subu(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_sub(ctx.rt as i32) as u64);
    false
}

fn op_and(ctx: &mut ExecContext) -> bool {
    ctx.write(ctx.rs & ctx.rt);
    false
}

fn op_or(ctx: &mut ExecContext) -> bool {
    ctx.write(ctx.rs | ctx.rt);
    false
}

fn op_xor(ctx: &mut ExecContext) -> bool {
    ctx.write(ctx.rs ^ ctx.rt);
    false
}

fn op_nor(ctx: &mut ExecContext) -> bool {
    ctx.write(!(ctx.rs | ctx.rt));
    false
}

fn op_slt(ctx: &mut ExecContext) -> bool {
    ctx.write(((ctx.rs as i64) < (ctx.rt as i64)) as u64);
    false
}

fn op_sltu(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs < ctx.rt) as u64);
    false
}

fn op_bltz(ctx: &mut ExecContext) -> bool {
    if (ctx.rs as i64) < 0 {
        ctx.take_branch();
    }
    false
}

fn op_bgez(ctx: &mut ExecContext) -> bool {
    if (ctx.rs as i64) >= 0 {
        ctx.take_branch();
    }
    false
}

fn op_j(ctx: &mut ExecContext) -> bool {
    let target = (JType::from(ctx.iw).target() as u64) << 2;
    *ctx.fetch_pc = target | (ctx.pc.wrapping_add(4) & 0xffff_ffff_f000_0000);
    false
}

fn op_jal(ctx: &mut ExecContext) -> bool {
    let target = (JType::from(ctx.iw).target() as u64) << 2;
    ctx.exdc.dest = 31;
    ctx.exdc.result = ctx.pc.wrapping_add(8);
    *ctx.fetch_pc = target | (ctx.pc.wrapping_add(4) & 0xffff_ffff_f000_0000);
    false
}

fn op_beq(ctx: &mut ExecContext) -> bool {
    if ctx.rs == ctx.rt {
        ctx.take_branch();
        if ctx.iw == BUSY_WAIT_IW {
            // Tight idle loop: stop turning the pipeline over and just poll
            // for interrupts until one ends the wait.
            *ctx.cycle_type = PipelineCycleType::BusyWait;
        }
    }
    false
}

fn op_bne(ctx: &mut ExecContext) -> bool {
    if ctx.rs != ctx.rt {
        ctx.take_branch();
    }
    false
}

fn op_blez(ctx: &mut ExecContext) -> bool {
    if (ctx.rs as i64) <= 0 {
        ctx.take_branch();
    }
    false
}

fn op_bgtz(ctx: &mut ExecContext) -> bool {
    if (ctx.rs as i64) > 0 {
        ctx.take_branch();
    }
    false
}

fn op_addi(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_add(ctx.imm_se() as i32) as u64);
    false
}

fn op_addiu(ctx: &mut ExecContext) -> bool {
    ctx.write((ctx.rs as i32).wrapping_add(ctx.imm_se() as i32) as u64);
    false
}

fn op_slti(ctx: &mut ExecContext) -> bool {
    let imm = ctx.imm_se() as i64;
    ctx.write(((ctx.rs as i64) < imm) as u64);
    false
}

fn op_sltiu(ctx: &mut ExecContext) -> bool {
    let imm = ctx.imm_se();
    ctx.write((ctx.rs < imm) as u64);
    false
}

fn op_andi(ctx: &mut ExecContext) -> bool {
    let imm = IType::from(ctx.iw).imm() as u64;
    ctx.write(ctx.rs & imm);
    false
}

fn op_ori(ctx: &mut ExecContext) -> bool {
    let imm = IType::from(ctx.iw).imm() as u64;
    ctx.write(ctx.rs | imm);
    false
}

fn op_xori(ctx: &mut ExecContext) -> bool {
    let imm = IType::from(ctx.iw).imm() as u64;
    ctx.write(ctx.rs ^ imm);
    false
}

fn op_lui(ctx: &mut ExecContext) -> bool {
    let imm = IType::from(ctx.iw).imm() as u32;
    ctx.write(((imm << 16) as i32) as u64);
    false
}

fn op_mfc0(ctx: &mut ExecContext) -> bool {
    let rd = RType::from(ctx.iw).rd() as usize;
    ctx.write(ctx.cp0.regs[rd] as u32 as i32 as u64);
    false
}

fn op_mtc0(ctx: &mut ExecContext) -> bool {
    let rd = RType::from(ctx.iw).rd() as usize;
    ctx.cp0.regs[rd] = ctx.rt as u32 as u64;
    if rd == CP0_COMPARE {
        // Writing Compare acknowledges the timer interrupt.
        ctx.cp0.regs[CP0_CAUSE] &= !(CAUSE_IP7 as u64);
    }
    false
}

fn op_eret(ctx: &mut ExecContext) -> bool {
    let status = ctx.cp0.status();
    if status & STATUS_ERL != 0 {
        *ctx.fetch_pc = ctx.cp0.regs[CP0_ERROR_EPC];
        ctx.cp0.regs[CP0_STATUS] = (status & !STATUS_ERL) as u64;
    } else {
        *ctx.fetch_pc = ctx.cp0.regs[CP0_EPC];
        ctx.cp0.regs[CP0_STATUS] = (status & !STATUS_EXL) as u64;
    }
    // ERET has no delay slot; bury the instruction behind us.
    *ctx.next_iw_mask = 0;
    false
}

fn load(ctx: &mut ExecContext, size: u32, dqm: u64, two_words: bool) {
    let i = IType::from(ctx.iw);
    let vaddr = ctx.rs.wrapping_add(ctx.imm_se());
    debug_assert!(vaddr & (size as u64 - 1) == 0, "misaligned load at {vaddr:#x}");
    ctx.exdc.dest = i.rt() as usize;
    ctx.exdc.result = 0;
    ctx.exdc.request = Some(BusRequest {
        access: BusAccess::Read,
        vaddr,
        paddr: 0,
        size,
        two_words,
        dqm: ByteMask8::from_raw(dqm),
        postshift: 0,
        data: 0,
    });
}

fn op_lb(ctx: &mut ExecContext) -> bool {
    load(ctx, 1, !0, false);
    false
}

fn op_lh(ctx: &mut ExecContext) -> bool {
    load(ctx, 2, !0, false);
    false
}

fn op_lw(ctx: &mut ExecContext) -> bool {
    load(ctx, 4, !0, false);
    false
}

fn op_lbu(ctx: &mut ExecContext) -> bool {
    load(ctx, 1, 0xff, false);
    false
}

fn op_lhu(ctx: &mut ExecContext) -> bool {
    load(ctx, 2, 0xffff, false);
    false
}

fn op_lwu(ctx: &mut ExecContext) -> bool {
    load(ctx, 4, 0xffff_ffff, false);
    false
}

fn op_ld(ctx: &mut ExecContext) -> bool {
    load(ctx, 8, !0, true);
    false
}

fn store(ctx: &mut ExecContext, size: u32) {
    let vaddr = ctx.rs.wrapping_add(ctx.imm_se());
    debug_assert!(vaddr & (size as u64 - 1) == 0, "misaligned store at {vaddr:#x}");

    let (data, dqm, two_words) = if size == 8 {
        (ctx.rt, ByteMask8::dword(), true)
    } else {
        // Position the payload in its big-endian byte lanes of the word.
        let offset = (vaddr & 0x3) as u32;
        let shift = 8 * (4 - size - offset);
        let lanes = (1u64 << (size * 8)) - 1;
        ((ctx.rt & lanes) << shift, ByteMask8::word(size, offset), false)
    };

    ctx.exdc.request = Some(BusRequest {
        access: BusAccess::Write,
        vaddr,
        paddr: 0,
        size,
        two_words,
        dqm,
        postshift: 0,
        data,
    });
}

fn op_sb(ctx: &mut ExecContext) -> bool {
    store(ctx, 1);
    false
}

fn op_sh(ctx: &mut ExecContext) -> bool {
    store(ctx, 2);
    false
}

fn op_sw(ctx: &mut ExecContext) -> bool {
    store(ctx, 4);
    false
}

fn op_sd(ctx: &mut ExecContext) -> bool {
    store(ctx, 8);
    false
}

/// Dispatch table, indexed by `OpId`. Order must match the enum.
pub static FUNCTION_TABLE: [OpFn; OpId::COUNT] = [
    op_invalid,
    op_sll,
    op_srl,
    op_sra,
    op_sllv,
    op_srlv,
    op_srav,
    op_jr,
    op_jalr,
    op_add,
    op_addu,
    op_sub,
    op_subu,
    op_and,
    op_or,
    op_xor,
    op_nor,
    op_slt,
    op_sltu,
    op_bltz,
    op_bgez,
    op_j,
    op_jal,
    op_beq,
    op_bne,
    op_blez,
    op_bgtz,
    op_addi,
    op_addiu,
    op_slti,
    op_sltiu,
    op_andi,
    op_ori,
    op_xori,
    op_lui,
    op_mfc0,
    op_mtc0,
    op_eret,
    op_lb,
    op_lh,
    op_lw,
    op_lbu,
    op_lhu,
    op_lwu,
    op_ld,
    op_sb,
    op_sh,
    op_sw,
    op_sd,
];
