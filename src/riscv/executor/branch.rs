//! Control-transfer handlers: conditional branches, JAL, and JALR.
//!
//! A taken transfer overwrites `next_pc`; otherwise the default advance
//! installed by the issue step stands. Branch targets are `pc + immB`,
//! never `pc + 4`.

use crate::error::Result;
use crate::riscv::cpu::Cpu;
use crate::riscv::inst::Inst;

use super::hint;

/// BEQ/BNE/BLT/BGE/BLTU/BGEU.
pub fn exec_branch(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let a = cpu.reg(inst.rs1());
    let b = cpu.reg(inst.rs2());
    let sa = cpu.sreg(inst.rs1());
    let sb = cpu.sreg(inst.rs2());

    let taken = match inst.funct3() {
        0b000 => a == b,  // BEQ
        0b001 => a != b,  // BNE
        0b100 => sa < sb, // BLT
        0b101 => sa >= sb, // BGE
        0b110 => a < b,   // BLTU
        0b111 => a >= b,  // BGEU
        _ => return hint(cpu, inst),
    };

    if taken {
        cpu.next_pc = cpu.pc.wrapping_add(inst.imm_b() as u64) & cpu.xlen.mask();
    }
    Ok(())
}

/// JAL: link `pc + 4`, jump to `pc + immJ`.
pub fn exec_jal(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    cpu.write_reg(inst.rd(), cpu.pc.wrapping_add(4));
    cpu.next_pc = cpu.pc.wrapping_add(inst.imm_j() as u64) & cpu.xlen.mask();
    Ok(())
}

/// JALR: link `pc + 4`, jump to `(rs1 + immI) & !1`.
pub fn exec_jalr(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let target = (cpu.reg(inst.rs1()).wrapping_add(inst.imm_i() as u64)) & !1;
    let link = cpu.pc.wrapping_add(4);
    cpu.next_pc = target & cpu.xlen.mask();
    cpu.write_reg(inst.rd(), link);
    Ok(())
}
