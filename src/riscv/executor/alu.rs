//! Integer ALU handlers: OP-IMM, OP, LUI, AUIPC, the RV64 word forms, and
//! the M extension.
//!
//! Division follows the architectural special cases: division by zero
//! yields an all-ones quotient and the original dividend as remainder;
//! signed overflow (MIN / -1) yields MIN and a zero remainder. There is no
//! trap in either case.

use crate::error::Result;
use crate::riscv::cpu::{Cpu, Xlen};
use crate::riscv::inst::Inst;

use super::hint;

/// OP-IMM: register-immediate ALU operations.
pub fn exec_op_imm(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let rd = inst.rd();
    let a = cpu.sreg(inst.rs1());
    let imm = inst.imm_i();
    let shift_mask = cpu.xlen.bits() - 1;

    let result = match inst.funct3() {
        0b000 => a.wrapping_add(imm) as u64,                    // ADDI
        0b010 => (a < imm) as u64,                              // SLTI
        0b011 => (cpu.reg(inst.rs1()) < (imm as u64 & cpu.xlen.mask())) as u64, // SLTIU
        0b100 => (a ^ imm) as u64,                              // XORI
        0b110 => (a | imm) as u64,                              // ORI
        0b111 => (a & imm) as u64,                              // ANDI
        0b001 => {
            // SLLI
            let shamt = inst.shamt() & shift_mask;
            cpu.reg(inst.rs1()) << shamt
        }
        0b101 => {
            let shamt = inst.shamt() & shift_mask;
            if inst.funct7() & 0b010_0000 != 0 {
                (a >> shamt) as u64 // SRAI
            } else {
                cpu.reg(inst.rs1()) >> shamt // SRLI
            }
        }
        _ => unreachable!(),
    };

    cpu.write_reg(rd, result);
    Ok(())
}

/// OP: register-register ALU operations, including the M extension when
/// funct7 = 0000001.
pub fn exec_op(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    if inst.funct7() == 0b000_0001 {
        return exec_muldiv(cpu, inst);
    }

    let rd = inst.rd();
    let a = cpu.reg(inst.rs1());
    let b = cpu.reg(inst.rs2());
    let sa = cpu.sreg(inst.rs1());
    let sb = cpu.sreg(inst.rs2());
    let shamt = (b as u32) & (cpu.xlen.bits() - 1);
    let alt = inst.funct7() & 0b010_0000 != 0; // SUB / SRA selector

    let result = match inst.funct3() {
        0b000 => {
            if alt {
                a.wrapping_sub(b) // SUB
            } else {
                a.wrapping_add(b) // ADD
            }
        }
        0b001 => a << shamt,            // SLL
        0b010 => (sa < sb) as u64,      // SLT
        0b011 => (a < b) as u64,        // SLTU
        0b100 => a ^ b,                 // XOR
        0b101 => {
            if alt {
                (sa >> shamt) as u64 // SRA
            } else {
                a >> shamt // SRL
            }
        }
        0b110 => a | b, // OR
        0b111 => a & b, // AND
        _ => unreachable!(),
    };

    cpu.write_reg(rd, result);
    Ok(())
}

/// M extension: MUL/MULH/MULHSU/MULHU/DIV/DIVU/REM/REMU.
fn exec_muldiv(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let rd = inst.rd();
    let bits = cpu.xlen.bits();
    let a = cpu.reg(inst.rs1());
    let b = cpu.reg(inst.rs2());
    let sa = cpu.sreg(inst.rs1());
    let sb = cpu.sreg(inst.rs2());
    let min = match cpu.xlen {
        Xlen::Rv32 => i32::MIN as i64,
        Xlen::Rv64 => i64::MIN,
    };

    let result = match inst.funct3() {
        // MUL: low half of the product.
        0b000 => sa.wrapping_mul(sb) as u64,
        // MULH: upper half of signed x signed.
        0b001 => ((sa as i128 * sb as i128) >> bits) as u64,
        // MULHSU: upper half of signed x unsigned.
        0b010 => ((sa as i128 * b as i128) >> bits) as u64,
        // MULHU: upper half of unsigned x unsigned.
        0b011 => ((a as u128 * b as u128) >> bits) as u64,
        // DIV
        0b100 => {
            if sb == 0 {
                u64::MAX // quotient -1
            } else if sa == min && sb == -1 {
                sa as u64 // overflow: quotient MIN
            } else {
                (sa / sb) as u64
            }
        }
        // DIVU
        0b101 => {
            if b == 0 {
                u64::MAX
            } else {
                a / b
            }
        }
        // REM
        0b110 => {
            if sb == 0 {
                sa as u64 // remainder = dividend
            } else if sa == min && sb == -1 {
                0 // overflow: remainder 0
            } else {
                (sa % sb) as u64
            }
        }
        // REMU
        0b111 => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
        _ => unreachable!(),
    };

    cpu.write_reg(rd, result);
    Ok(())
}

/// LUI: load the U immediate.
pub fn exec_lui(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    cpu.write_reg(inst.rd(), inst.imm_u() as u64);
    Ok(())
}

/// AUIPC: PC plus the U immediate.
pub fn exec_auipc(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    cpu.write_reg(inst.rd(), cpu.pc.wrapping_add(inst.imm_u() as u64));
    Ok(())
}

/// OP-IMM-32 (RV64 only): word-width immediate operations whose results
/// sign-extend to 64 bits.
pub fn exec_op_imm_32(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    if cpu.xlen != Xlen::Rv64 {
        return hint(cpu, inst);
    }

    let rd = inst.rd();
    let a = cpu.reg(inst.rs1()) as u32;

    let result = match inst.funct3() {
        0b000 => (a as i32).wrapping_add(inst.imm_i() as i32), // ADDIW
        0b001 => (a << (inst.shamt() & 0x1F)) as i32,          // SLLIW
        0b101 => {
            let shamt = inst.shamt() & 0x1F;
            if inst.funct7() & 0b010_0000 != 0 {
                (a as i32) >> shamt // SRAIW
            } else {
                (a >> shamt) as i32 // SRLIW
            }
        }
        _ => return hint(cpu, inst),
    };

    cpu.write_reg(rd, result as i64 as u64);
    Ok(())
}

/// OP-32 (RV64 only): word-width register operations, including the M
/// extension word forms.
pub fn exec_op_32(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    if cpu.xlen != Xlen::Rv64 {
        return hint(cpu, inst);
    }

    let rd = inst.rd();
    let a = cpu.reg(inst.rs1()) as u32;
    let b = cpu.reg(inst.rs2()) as u32;
    let shamt = b & 0x1F;
    let alt = inst.funct7() & 0b010_0000 != 0;

    let result = if inst.funct7() == 0b000_0001 {
        match inst.funct3() {
            0b000 => (a as i32).wrapping_mul(b as i32), // MULW
            0b100 => {
                // DIVW
                let (sa, sb) = (a as i32, b as i32);
                if sb == 0 {
                    -1
                } else if sa == i32::MIN && sb == -1 {
                    sa
                } else {
                    sa / sb
                }
            }
            0b101 => {
                // DIVUW
                if b == 0 {
                    -1
                } else {
                    (a / b) as i32
                }
            }
            0b110 => {
                // REMW
                let (sa, sb) = (a as i32, b as i32);
                if sb == 0 {
                    sa
                } else if sa == i32::MIN && sb == -1 {
                    0
                } else {
                    sa % sb
                }
            }
            0b111 => {
                // REMUW
                if b == 0 {
                    a as i32
                } else {
                    (a % b) as i32
                }
            }
            _ => return hint(cpu, inst),
        }
    } else {
        match inst.funct3() {
            0b000 => {
                if alt {
                    (a as i32).wrapping_sub(b as i32) // SUBW
                } else {
                    (a as i32).wrapping_add(b as i32) // ADDW
                }
            }
            0b001 => (a << shamt) as i32, // SLLW
            0b101 => {
                if alt {
                    (a as i32) >> shamt // SRAW
                } else {
                    (a >> shamt) as i32 // SRLW
                }
            }
            _ => return hint(cpu, inst),
        }
    };

    cpu.write_reg(rd, result as i64 as u64);
    Ok(())
}
