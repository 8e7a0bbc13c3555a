use modular_bitfield::{bitfield, specifiers::*};
use strum::EnumCount;

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct IType {
    pub imm: B16,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct JType {
    pub target: B26,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct RType {
    pub funct: B6,
    pub sa: B5,
    pub rd: B5,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

impl From<u32> for IType {
    fn from(iw: u32) -> Self {
        IType::from_bytes(iw.to_le_bytes())
    }
}
impl From<u32> for JType {
    fn from(iw: u32) -> Self {
        JType::from_bytes(iw.to_le_bytes())
    }
}
impl From<u32> for RType {
    fn from(iw: u32) -> Self {
        RType::from_bytes(iw.to_le_bytes())
    }
}

// Opcode record flag bits. The low two bits double as indexes into the EX
// stage's operand-select tables, so their positions are load-bearing.
pub const OP_CP1_RS: u32 = 0x01;
pub const OP_CP1_RT: u32 = 0x02;
pub const OP_NEEDS_RS: u32 = 0x04;
pub const OP_NEEDS_RT: u32 = 0x08;
pub const OP_BRANCH: u32 = 0x10;
pub const OP_WRITES_RD: u32 = 0x20;
pub const OP_WRITES_RT: u32 = 0x40;

/// Operation identifier; indexes the dispatch table in `opcodes`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumCount)]
pub enum OpId {
    Invalid,
    Sll,
    Srl,
    Sra,
    Sllv,
    Srlv,
    Srav,
    Jr,
    Jalr,
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Bltz,
    Bgez,
    J,
    Jal,
    Beq,
    Bne,
    Blez,
    Bgtz,
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Mfc0,
    Mtc0,
    Eret,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Lwu,
    Ld,
    Sb,
    Sh,
    Sw,
    Sd,
}

/// The decoded opcode record carried in the RF/EX latch: the operation id
/// plus the flag bits the pipeline itself consults (operand needs, branch,
/// CP1 register selection, writeback routing).
#[derive(Debug, Copy, Clone)]
pub struct Opcode {
    pub id: OpId,
    pub flags: u32,
}

impl Opcode {
    pub const NOP: Opcode = Opcode {
        id: OpId::Sll,
        flags: OP_NEEDS_RT | OP_WRITES_RD,
    };

    #[inline(always)]
    pub fn is_branch(&self) -> bool {
        self.flags & OP_BRANCH != 0
    }
}

const fn op(id: OpId, flags: u32) -> Opcode {
    Opcode { id, flags }
}

fn decode_special(iw: u32) -> Opcode {
    use OpId::*;
    match iw & 0x3f {
        0x00 => op(Sll, OP_NEEDS_RT | OP_WRITES_RD),
        0x02 => op(Srl, OP_NEEDS_RT | OP_WRITES_RD),
        0x03 => op(Sra, OP_NEEDS_RT | OP_WRITES_RD),
        0x04 => op(Sllv, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x06 => op(Srlv, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x07 => op(Srav, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x08 => op(Jr, OP_NEEDS_RS | OP_BRANCH),
        0x09 => op(Jalr, OP_NEEDS_RS | OP_BRANCH | OP_WRITES_RD),
        0x20 => op(Add, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x21 => op(Addu, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x22 => op(Sub, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x23 => op(Subu, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x24 => op(And, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x25 => op(Or, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x26 => op(Xor, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x27 => op(Nor, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x2a => op(Slt, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        0x2b => op(Sltu, OP_NEEDS_RS | OP_NEEDS_RT | OP_WRITES_RD),
        _ => op(Invalid, 0),
    }
}

fn decode_regimm(iw: u32) -> Opcode {
    use OpId::*;
    match (iw >> 16) & 0x1f {
        0x00 => op(Bltz, OP_NEEDS_RS | OP_BRANCH),
        0x01 => op(Bgez, OP_NEEDS_RS | OP_BRANCH),
        _ => op(Invalid, 0),
    }
}

fn decode_cop0(iw: u32) -> Opcode {
    use OpId::*;
    if iw & 0x0200_0000 != 0 {
        // CO space: only ERET is modeled.
        return match iw & 0x3f {
            0x18 => op(Eret, OP_BRANCH),
            _ => op(Invalid, 0),
        };
    }
    match (iw >> 21) & 0x1f {
        0x00 => op(Mfc0, OP_WRITES_RT),
        0x04 => op(Mtc0, OP_NEEDS_RT),
        _ => op(Invalid, 0),
    }
}

/// Decodes an instruction word into its opcode record. Unknown words map to
/// `Invalid`, whose handler logs and retires as a no-op; the decoder itself
/// never rejects.
pub fn decode(iw: u32) -> Opcode {
    use OpId::*;
    match iw >> 26 {
        0x00 => decode_special(iw),
        0x01 => decode_regimm(iw),
        0x02 => op(J, OP_BRANCH),
        0x03 => op(Jal, OP_BRANCH),
        0x04 => op(Beq, OP_NEEDS_RS | OP_NEEDS_RT | OP_BRANCH),
        0x05 => op(Bne, OP_NEEDS_RS | OP_NEEDS_RT | OP_BRANCH),
        0x06 => op(Blez, OP_NEEDS_RS | OP_BRANCH),
        0x07 => op(Bgtz, OP_NEEDS_RS | OP_BRANCH),
        0x08 => op(Addi, OP_NEEDS_RS | OP_WRITES_RT),
        0x09 => op(Addiu, OP_NEEDS_RS | OP_WRITES_RT),
        0x0a => op(Slti, OP_NEEDS_RS | OP_WRITES_RT),
        0x0b => op(Sltiu, OP_NEEDS_RS | OP_WRITES_RT),
        0x0c => op(Andi, OP_NEEDS_RS | OP_WRITES_RT),
        0x0d => op(Ori, OP_NEEDS_RS | OP_WRITES_RT),
        0x0e => op(Xori, OP_NEEDS_RS | OP_WRITES_RT),
        0x0f => op(Lui, OP_WRITES_RT),
        0x10 => decode_cop0(iw),
        0x20 => op(Lb, OP_NEEDS_RS | OP_WRITES_RT),
        0x21 => op(Lh, OP_NEEDS_RS | OP_WRITES_RT),
        0x23 => op(Lw, OP_NEEDS_RS | OP_WRITES_RT),
        0x24 => op(Lbu, OP_NEEDS_RS | OP_WRITES_RT),
        0x25 => op(Lhu, OP_NEEDS_RS | OP_WRITES_RT),
        0x27 => op(Lwu, OP_NEEDS_RS | OP_WRITES_RT),
        0x28 => op(Sb, OP_NEEDS_RS | OP_NEEDS_RT),
        0x29 => op(Sh, OP_NEEDS_RS | OP_NEEDS_RT),
        0x2b => op(Sw, OP_NEEDS_RS | OP_NEEDS_RT),
        0x37 => op(Ld, OP_NEEDS_RS | OP_WRITES_RT),
        0x3f => op(Sd, OP_NEEDS_RS | OP_NEEDS_RT),
        _ => op(Invalid, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_zero_word_decodes_as_nop() {
        let opcode = decode(0);
        assert_eq!(opcode.id, OpId::Sll);
        assert!(!opcode.is_branch());
    }

    #[test]
    fn bitfields_split_the_word() {
        // addiu r5, r3, 0x1234
        let iw = (0x09 << 26) | (3 << 21) | (5 << 16) | 0x1234;
        let i = IType::from(iw);
        assert_eq!(i.rs(), 3);
        assert_eq!(i.rt(), 5);
        assert_eq!(i.imm(), 0x1234);
        assert_eq!(decode(iw).id, OpId::Addiu);
    }

    #[test]
    fn branches_carry_the_branch_flag() {
        let beq = decode(0x04u32 << 26);
        assert!(beq.is_branch());
        let jr = decode(8); // SPECIAL, funct 8
        assert_eq!(jr.id, OpId::Jr);
        assert!(jr.is_branch());
    }

    #[test]
    fn loads_need_only_the_base_register() {
        let lw = decode(0x23u32 << 26);
        assert_eq!(lw.id, OpId::Lw);
        assert!(lw.flags & OP_NEEDS_RS != 0);
        assert!(lw.flags & OP_NEEDS_RT == 0);
    }
}
