//! Control-transfer instruction handlers.
//!
//! Jcc, JMP, CALL/RET, LOOP/LOOPE/LOOPNE, and JECXZ. A handler that takes
//! a branch writes EIP itself; otherwise EIP advances past the instruction.

use crate::error::Result;
use crate::x86::cpu::Cpu;
use crate::x86::flags::{self, OperandSize};
use crate::x86::instruction::{DecodedInst, Operand};

use super::{pop_val, push_val, read_operand};

/// Target of a relative branch: the instruction end plus the offset.
fn rel_target(cpu: &Cpu, inst: &DecodedInst) -> u32 {
    let rel = match inst.operands[0] {
        Operand::RelativeOffset(off) => off,
        _ => 0,
    };
    cpu.regs
        .eip
        .wrapping_add(inst.length as u32)
        .wrapping_add(rel as u32)
}

/// Jcc: branch when the condition from the opcode's low nibble holds.
pub fn exec_jcc(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let cc = (inst.opcode & 0x0F) as u8;
    if flags::eval_cc(cc, cpu.regs.eflags) {
        cpu.regs.eip = rel_target(cpu, inst);
    } else {
        cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    }
    Ok(())
}

/// JMP rel8/rel16/rel32: unconditional relative jump.
pub fn exec_jmp_rel(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    cpu.regs.eip = rel_target(cpu, inst);
    Ok(())
}

/// CALL rel: push the return address, then jump.
pub fn exec_call_rel(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let ret = cpu.regs.eip.wrapping_add(inst.length as u32);
    push_val(cpu, ret, OperandSize::Dword)?;
    cpu.regs.eip = rel_target(cpu, inst);
    Ok(())
}

/// CALL r/m: indirect call through a register or memory operand.
pub fn exec_call_rm(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let target = read_operand(cpu, &inst.operands[0])?;
    let ret = cpu.regs.eip.wrapping_add(inst.length as u32);
    push_val(cpu, ret, OperandSize::Dword)?;
    cpu.regs.eip = target;
    Ok(())
}

/// JMP r/m: indirect jump.
pub fn exec_jmp_rm(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    cpu.regs.eip = read_operand(cpu, &inst.operands[0])?;
    Ok(())
}

/// RET near: pop EIP, then release `imm16` extra bytes of stack when the
/// immediate form was decoded.
pub fn exec_ret_near(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let target = pop_val(cpu, OperandSize::Dword)?;
    if inst.operand_count > 0 {
        let cleanup = inst.immediate;
        cpu.regs.set_sp(cpu.regs.sp().wrapping_add(cleanup));
    }
    cpu.regs.eip = target;
    Ok(())
}

/// LOOP/LOOPE/LOOPNE: decrement ECX and branch while it is non-zero,
/// with an additional ZF test for the E/NE forms.
pub fn exec_loop(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let count = cpu.regs.read_gpr32(1).wrapping_sub(1);
    cpu.regs.write_gpr32(1, count);

    let zf = (cpu.regs.eflags & flags::ZF) != 0;
    let taken = count != 0
        && match inst.opcode as u8 {
            0xE0 => !zf, // LOOPNE
            0xE1 => zf,  // LOOPE
            _ => true,   // LOOP
        };

    if taken {
        cpu.regs.eip = rel_target(cpu, inst);
    } else {
        cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    }
    Ok(())
}

/// JECXZ: branch when ECX is zero (ECX is not modified).
pub fn exec_jecxz(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    if cpu.regs.read_gpr32(1) == 0 {
        cpu.regs.eip = rel_target(cpu, inst);
    } else {
        cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    }
    Ok(())
}
