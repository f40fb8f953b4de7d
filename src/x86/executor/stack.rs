//! Stack instruction handlers.
//!
//! PUSH/POP in their register, immediate, and r/m forms, PUSHA/POPA,
//! PUSHF/POPF, and the ENTER/LEAVE frame pair. ESP is the architectural
//! stack pointer; every form goes through `push_val`/`pop_val`.

use crate::error::Result;
use crate::x86::cpu::Cpu;
use crate::x86::flags::EFLAGS_FIXED;
use crate::x86::instruction::DecodedInst;

use super::{mem_read, pop_val, push_val, read_operand, write_operand};

/// PUSH r/imm/r/m: decrement ESP, then store the operand value.
pub fn exec_push(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let val = read_operand(cpu, &inst.operands[0])?;
    push_val(cpu, val, inst.operand_size)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// POP r/r/m: load the operand from the stack, then increment ESP.
pub fn exec_pop(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let val = pop_val(cpu, inst.operand_size)?;
    write_operand(cpu, &inst.operands[0], val)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// PUSHA: push all eight GPRs; the stored ESP is the value before the first
/// push.
pub fn exec_pusha(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let size = inst.operand_size;
    let original_sp = cpu.regs.sp();
    for reg in 0..8u8 {
        let val = if reg == 4 { original_sp } else { cpu.regs.read_gpr(reg, size) };
        push_val(cpu, val, size)?;
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// POPA: pop all GPRs in reverse order; the stored ESP value is discarded.
pub fn exec_popa(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let size = inst.operand_size;
    for reg in (0..8u8).rev() {
        let val = pop_val(cpu, size)?;
        if reg != 4 {
            cpu.regs.write_gpr(reg, size, val);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// PUSHF: push EFLAGS.
pub fn exec_pushf(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    push_val(cpu, cpu.regs.eflags, inst.operand_size)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// POPF: pop EFLAGS, keeping the fixed bit set.
pub fn exec_popf(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let val = pop_val(cpu, inst.operand_size)?;
    cpu.regs.eflags = val | EFLAGS_FIXED;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// ENTER imm16, imm8: build a (possibly nested) stack frame.
///
/// Pushes EBP, copies up to 31 saved frame pointers for nested levels, sets
/// EBP to the new frame base, and reserves `imm16` bytes of locals.
pub fn exec_enter(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let size = inst.operand_size;
    let locals = inst.immediate;
    let nesting = inst.immediate2 % 32;

    push_val(cpu, cpu.regs.read_gpr32(5), size)?; // EBP
    let frame_base = cpu.regs.sp();

    if nesting > 0 {
        let mut bp = cpu.regs.read_gpr32(5);
        for _ in 1..nesting {
            bp = bp.wrapping_sub(size.bytes());
            let saved = mem_read(cpu, bp, size)?;
            push_val(cpu, saved, size)?;
        }
        push_val(cpu, frame_base, size)?;
    }

    cpu.regs.write_gpr32(5, frame_base);
    cpu.regs.set_sp(cpu.regs.sp().wrapping_sub(locals));

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// LEAVE: collapse the current frame (ESP = EBP, then pop EBP).
pub fn exec_leave(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    cpu.regs.set_sp(cpu.regs.read_gpr32(5));
    let bp = pop_val(cpu, inst.operand_size)?;
    cpu.regs.write_gpr32(5, bp);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}
