//! String operation instruction handlers.
//!
//! Implements MOVS, CMPS, STOS, LODS, and SCAS at byte/word/dword widths.
//! ESI and EDI advance by the element size when DF=0 and retreat when DF=1.
//!
//! REP/REPE/REPNE handling is built into each function:
//! - REP (MOVS/STOS/LODS): repeat while ECX != 0
//! - REPE (CMPS/SCAS): repeat while ECX != 0 AND ZF=1
//! - REPNE (CMPS/SCAS): repeat while ECX != 0 AND ZF=0
//! - Without a prefix: execute once

use crate::error::Result;
use crate::x86::cpu::Cpu;
use crate::x86::flags::{self, OperandSize};
use crate::x86::instruction::{DecodedInst, RepPrefix};

use super::{mem_read, mem_write};

/// Element size for a string operation: byte variants have the low opcode
/// bit clear, the others use the instruction's operand size.
fn element_size(inst: &DecodedInst) -> OperandSize {
    if (inst.opcode & 1) == 0 {
        OperandSize::Byte
    } else {
        inst.operand_size
    }
}

/// Index register step: +size when DF=0, -size when DF=1.
fn step(cpu: &Cpu, elem: OperandSize) -> u32 {
    if (cpu.regs.eflags & flags::DF) != 0 {
        (elem.bytes() as i32).wrapping_neg() as u32
    } else {
        elem.bytes()
    }
}

fn esi(cpu: &Cpu) -> u32 {
    cpu.regs.read_gpr32(6)
}

fn edi(cpu: &Cpu) -> u32 {
    cpu.regs.read_gpr32(7)
}

fn advance_esi(cpu: &mut Cpu, delta: u32) {
    let v = esi(cpu).wrapping_add(delta);
    cpu.regs.write_gpr32(6, v);
}

fn advance_edi(cpu: &mut Cpu, delta: u32) {
    let v = edi(cpu).wrapping_add(delta);
    cpu.regs.write_gpr32(7, v);
}

fn ecx(cpu: &Cpu) -> u32 {
    cpu.regs.read_gpr32(1)
}

fn set_ecx(cpu: &mut Cpu, val: u32) {
    cpu.regs.write_gpr32(1, val);
}

/// MOVS: copy `[ESI]` to `[EDI]`. REP repeats ECX times.
pub fn exec_movs(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let elem = element_size(inst);
    let delta = step(cpu, elem);

    if inst.rep != RepPrefix::None {
        while ecx(cpu) != 0 {
            let val = mem_read(cpu, esi(cpu), elem)?;
            mem_write(cpu, edi(cpu), elem, val)?;
            advance_esi(cpu, delta);
            advance_edi(cpu, delta);
            let count = ecx(cpu) - 1;
            set_ecx(cpu, count);
        }
    } else {
        let val = mem_read(cpu, esi(cpu), elem)?;
        mem_write(cpu, edi(cpu), elem, val)?;
        advance_esi(cpu, delta);
        advance_edi(cpu, delta);
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// CMPS: compare `[ESI]` with `[EDI]`, update flags.
///
/// REPE repeats while equal, REPNE while not equal, both bounded by ECX.
pub fn exec_cmps(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let elem = element_size(inst);
    let delta = step(cpu, elem);

    let mut one = |cpu: &mut Cpu| -> Result<()> {
        let src = mem_read(cpu, esi(cpu), elem)?;
        let dst = mem_read(cpu, edi(cpu), elem)?;
        let result = src.wrapping_sub(dst) & elem.mask();
        let f = flags::flags_sub(src, dst, result, elem);
        flags::update_flags(&mut cpu.regs.eflags, f);
        advance_esi(cpu, delta);
        advance_edi(cpu, delta);
        Ok(())
    };

    match inst.rep {
        RepPrefix::None => one(cpu)?,
        rep => {
            while ecx(cpu) != 0 {
                one(cpu)?;
                let count = ecx(cpu) - 1;
                set_ecx(cpu, count);
                let zf = (cpu.regs.eflags & flags::ZF) != 0;
                // REPE exits on mismatch, REPNE on match.
                if (rep == RepPrefix::Rep && !zf) || (rep == RepPrefix::Repne && zf) {
                    break;
                }
            }
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// STOS: store the accumulator at `[EDI]`. REP repeats ECX times.
pub fn exec_stos(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let elem = element_size(inst);
    let delta = step(cpu, elem);
    let val = cpu.regs.read_gpr(0, elem);

    if inst.rep != RepPrefix::None {
        while ecx(cpu) != 0 {
            mem_write(cpu, edi(cpu), elem, val)?;
            advance_edi(cpu, delta);
            let count = ecx(cpu) - 1;
            set_ecx(cpu, count);
        }
    } else {
        mem_write(cpu, edi(cpu), elem, val)?;
        advance_edi(cpu, delta);
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// LODS: load the accumulator from `[ESI]`.
///
/// REP LODS is architecturally valid but useless; the last element wins.
pub fn exec_lods(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let elem = element_size(inst);
    let delta = step(cpu, elem);

    if inst.rep != RepPrefix::None {
        while ecx(cpu) != 0 {
            let val = mem_read(cpu, esi(cpu), elem)?;
            cpu.regs.write_gpr(0, elem, val);
            advance_esi(cpu, delta);
            let count = ecx(cpu) - 1;
            set_ecx(cpu, count);
        }
    } else {
        let val = mem_read(cpu, esi(cpu), elem)?;
        cpu.regs.write_gpr(0, elem, val);
        advance_esi(cpu, delta);
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// SCAS: compare the accumulator with `[EDI]`, update flags.
pub fn exec_scas(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let elem = element_size(inst);
    let delta = step(cpu, elem);
    let acc = cpu.regs.read_gpr(0, elem);

    let mut one = |cpu: &mut Cpu| -> Result<()> {
        let dst = mem_read(cpu, edi(cpu), elem)?;
        let result = acc.wrapping_sub(dst) & elem.mask();
        let f = flags::flags_sub(acc, dst, result, elem);
        flags::update_flags(&mut cpu.regs.eflags, f);
        advance_edi(cpu, delta);
        Ok(())
    };

    match inst.rep {
        RepPrefix::None => one(cpu)?,
        rep => {
            while ecx(cpu) != 0 {
                one(cpu)?;
                let count = ecx(cpu) - 1;
                set_ecx(cpu, count);
                let zf = (cpu.regs.eflags & flags::ZF) != 0;
                if (rep == RepPrefix::Rep && !zf) || (rep == RepPrefix::Repne && zf) {
                    break;
                }
            }
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}
