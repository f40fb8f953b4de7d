//! Data movement instruction handlers.
//!
//! MOV in all decoded forms, MOVSX/MOVZX, LEA, XCHG, XLAT, LAHF/SAHF,
//! CBW/CWDE, CWD/CDQ, BSWAP, and SETcc. None of these modify the
//! arithmetic flags except SAHF (which loads them from AH).

use crate::error::Result;
use crate::memory::MemoryBus;
use crate::x86::cpu::Cpu;
use crate::x86::flags::{self, OperandSize};
use crate::x86::instruction::{DecodedInst, Operand};

use super::{effective_address, read_operand, write_operand};

/// MOV: `dst = src` with no flag effects.
pub fn exec_mov(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let val = read_operand(cpu, &inst.operands[1])?;
    write_operand(cpu, &inst.operands[0], val)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// MOVZX: zero-extend an 8- or 16-bit source into the destination register.
pub fn exec_movzx(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    // The source operand carries its own (narrower) width; reading it
    // already yields a zero-extended u32.
    let val = read_operand(cpu, &inst.operands[1])?;
    write_operand(cpu, &inst.operands[0], val)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// MOVSX: sign-extend an 8- or 16-bit source into the destination register.
pub fn exec_movsx(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let src_size = inst.operands[1].size().unwrap_or(OperandSize::Byte);
    let val = read_operand(cpu, &inst.operands[1])?;
    let extended = super::arith::sign_extend(val, src_size) as u32;
    write_operand(cpu, &inst.operands[0], extended)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// LEA: write the computed effective address; no memory access occurs.
pub fn exec_lea(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let addr = match inst.operands[1] {
        Operand::Memory(ref m) => effective_address(cpu, m),
        // LEA with a register source is not a valid encoding; retire quietly.
        _ => {
            cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
            return Ok(());
        }
    };
    write_operand(cpu, &inst.operands[0], addr)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// XCHG: swap the two operands. With a memory operand the exchange is
/// implicitly locked; single-hart execution already guarantees that.
pub fn exec_xchg(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let a = read_operand(cpu, &inst.operands[0])?;
    let b = read_operand(cpu, &inst.operands[1])?;
    write_operand(cpu, &inst.operands[0], b)?;
    write_operand(cpu, &inst.operands[1], a)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// XLAT: `AL = [EBX + AL]`.
pub fn exec_xlat(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let addr = cpu.regs.read_gpr32(3).wrapping_add(cpu.regs.read_gpr8(0) as u32);
    let val = cpu.memory.read_u8(addr as u64)?;
    cpu.regs.write_gpr8(0, val);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// LAHF: load AH from the low byte of EFLAGS.
pub fn exec_lahf(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    cpu.regs.write_gpr8(4, (cpu.regs.eflags & 0xFF) as u8);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// SAHF: store AH into the low byte of EFLAGS (SF/ZF/AF/PF/CF).
pub fn exec_sahf(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    const SAHF_MASK: u32 = flags::SF | flags::ZF | flags::AF | flags::PF | flags::CF;
    let ah = cpu.regs.read_gpr8(4) as u32;
    cpu.regs.eflags =
        (cpu.regs.eflags & !SAHF_MASK) | (ah & SAHF_MASK) | flags::EFLAGS_FIXED;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// CBW/CWDE: sign-extend AL into AX, or AX into EAX.
pub fn exec_cbw_cwde(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    match inst.operand_size {
        OperandSize::Word => {
            let al = cpu.regs.read_gpr8(0) as i8 as i16;
            cpu.regs.write_gpr16(0, al as u16);
        }
        _ => {
            let ax = cpu.regs.read_gpr16(0) as i16 as i32;
            cpu.regs.write_gpr32(0, ax as u32);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// CWD/CDQ: sign-fill DX (or EDX) from AX (or EAX).
pub fn exec_cwd_cdq(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    match inst.operand_size {
        OperandSize::Word => {
            let fill = if (cpu.regs.read_gpr16(0) & 0x8000) != 0 { 0xFFFF } else { 0 };
            cpu.regs.write_gpr16(2, fill);
        }
        _ => {
            let fill = if (cpu.regs.read_gpr32(0) & 0x8000_0000) != 0 {
                0xFFFF_FFFF
            } else {
                0
            };
            cpu.regs.write_gpr32(2, fill);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// BSWAP: reverse the byte order of a 32-bit register.
pub fn exec_bswap(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let val = read_operand(cpu, &inst.operands[0])?;
    write_operand(cpu, &inst.operands[0], val.swap_bytes())?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// SETcc: write 1 or 0 to an 8-bit operand depending on the condition.
pub fn exec_setcc(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let cc = (inst.opcode & 0x0F) as u8;
    let val = if flags::eval_cc(cc, cpu.regs.eflags) { 1 } else { 0 };
    write_operand(cpu, &inst.operands[0], val)?;

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}
