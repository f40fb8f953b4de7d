//! Arithmetic instruction handlers.
//!
//! Implements ADD, ADC, SUB, SBB, CMP, INC, DEC, NEG, MUL, IMUL (1/2/3-op),
//! DIV, and IDIV. Each function reads operands, computes the result at the
//! decoded operand width, writes back (except CMP), updates EFLAGS, and
//! advances EIP.

use crate::error::{Result, VmError};
use crate::x86::cpu::Cpu;
use crate::x86::flags::{self, OperandSize};
use crate::x86::instruction::DecodedInst;

use super::{read_operand, write_operand};

/// ADD: `dst = dst + src`, updating all arithmetic flags.
pub fn exec_add(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let src_val = read_operand(cpu, &inst.operands[1])?;
    let size = inst.operand_size;
    let result = dst_val.wrapping_add(src_val) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_add(dst_val, src_val, result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// ADC: `dst = dst + src + CF`, updating all arithmetic flags.
pub fn exec_adc(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let src_val = read_operand(cpu, &inst.operands[1])?;
    let carry = if (cpu.regs.eflags & flags::CF) != 0 { 1u32 } else { 0u32 };
    let size = inst.operand_size;
    let result = dst_val.wrapping_add(src_val).wrapping_add(carry) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_add(dst_val, src_val.wrapping_add(carry), result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// SUB: `dst = dst - src`, updating all arithmetic flags.
pub fn exec_sub(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let src_val = read_operand(cpu, &inst.operands[1])?;
    let size = inst.operand_size;
    let result = dst_val.wrapping_sub(src_val) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_sub(dst_val, src_val, result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// SBB: `dst = dst - src - CF`, updating all arithmetic flags.
pub fn exec_sbb(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let src_val = read_operand(cpu, &inst.operands[1])?;
    let borrow = if (cpu.regs.eflags & flags::CF) != 0 { 1u32 } else { 0u32 };
    let size = inst.operand_size;
    let result = dst_val.wrapping_sub(src_val).wrapping_sub(borrow) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_sub(dst_val, src_val.wrapping_add(borrow), result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// CMP: compute `dst - src`, update flags, but do NOT write the result.
pub fn exec_cmp(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let src_val = read_operand(cpu, &inst.operands[1])?;
    let size = inst.operand_size;
    let result = dst_val.wrapping_sub(src_val) & size.mask();

    let f = flags::flags_sub(dst_val, src_val, result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// INC: `dst += 1`, preserving CF.
pub fn exec_inc(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let size = inst.operand_size;
    let result = dst_val.wrapping_add(1) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_inc(dst_val, result, size);
    flags::update_flags_preserve_cf(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// DEC: `dst -= 1`, preserving CF.
pub fn exec_dec(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let size = inst.operand_size;
    let result = dst_val.wrapping_sub(1) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_dec(dst_val, result, size);
    flags::update_flags_preserve_cf(&mut cpu.regs.eflags, f);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// NEG: `dst = 0 - dst` (two's complement negation).
///
/// CF is set if the original value was non-zero. Other flags are set as for
/// `SUB 0, dst`.
pub fn exec_neg(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let dst_val = read_operand(cpu, &inst.operands[0])?;
    let size = inst.operand_size;
    let result = 0u32.wrapping_sub(dst_val) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;

    let f = flags::flags_sub(0, dst_val, result, size);
    flags::update_flags(&mut cpu.regs.eflags, f);

    if dst_val & size.mask() != 0 {
        cpu.regs.eflags |= flags::CF;
    } else {
        cpu.regs.eflags &= !flags::CF;
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

fn set_mul_overflow(cpu: &mut Cpu, overflow: bool) {
    if overflow {
        cpu.regs.eflags |= flags::CF | flags::OF;
    } else {
        cpu.regs.eflags &= !(flags::CF | flags::OF);
    }
}

/// MUL: unsigned multiply with the double-width product in the A/D pair.
///
/// - 8-bit:  AX = AL * src8
/// - 16-bit: DX:AX = AX * src16
/// - 32-bit: EDX:EAX = EAX * src32
///
/// OF=CF=(high half != 0). SF, ZF, AF, PF are undefined.
pub fn exec_mul(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let src = read_operand(cpu, &inst.operands[0])?;

    match inst.operand_size {
        OperandSize::Byte => {
            let product = (cpu.regs.read_gpr8(0) as u16) * (src as u8 as u16);
            cpu.regs.write_gpr16(0, product); // AX
            set_mul_overflow(cpu, (product >> 8) != 0);
        }
        OperandSize::Word => {
            let product = (cpu.regs.read_gpr16(0) as u32) * (src as u16 as u32);
            cpu.regs.write_gpr16(0, product as u16); // AX
            cpu.regs.write_gpr16(2, (product >> 16) as u16); // DX
            set_mul_overflow(cpu, (product >> 16) != 0);
        }
        OperandSize::Dword => {
            let product = (cpu.regs.read_gpr32(0) as u64) * (src as u64);
            cpu.regs.write_gpr32(0, product as u32); // EAX
            cpu.regs.write_gpr32(2, (product >> 32) as u32); // EDX
            set_mul_overflow(cpu, (product >> 32) != 0);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// IMUL (one-operand form): signed multiply into the A/D pair.
///
/// OF=CF set when the product does not fit the low half.
pub fn exec_imul_1op(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let src = read_operand(cpu, &inst.operands[0])?;

    match inst.operand_size {
        OperandSize::Byte => {
            let product = (cpu.regs.read_gpr8(0) as i8 as i16) * (src as u8 as i8 as i16);
            cpu.regs.write_gpr16(0, product as u16);
            set_mul_overflow(cpu, product != product as i8 as i16);
        }
        OperandSize::Word => {
            let product = (cpu.regs.read_gpr16(0) as i16 as i32) * (src as u16 as i16 as i32);
            cpu.regs.write_gpr16(0, product as u16);
            cpu.regs.write_gpr16(2, (product >> 16) as u16);
            set_mul_overflow(cpu, product != product as i16 as i32);
        }
        OperandSize::Dword => {
            let product = (cpu.regs.read_gpr32(0) as i32 as i64) * (src as i32 as i64);
            cpu.regs.write_gpr32(0, product as u32);
            cpu.regs.write_gpr32(2, (product >> 32) as u32);
            set_mul_overflow(cpu, product != product as i32 as i64);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// Truncating signed multiply shared by the 2- and 3-operand IMUL forms.
fn imul_truncating(cpu: &mut Cpu, inst: &DecodedInst, a: u32, b: u32) -> Result<()> {
    let size = inst.operand_size;
    let product = sign_extend(a, size) as i64 * sign_extend(b, size) as i64;
    let result = (product as u32) & size.mask();

    write_operand(cpu, &inst.operands[0], result)?;
    set_mul_overflow(cpu, product != sign_extend(result, size) as i64);

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// IMUL r, r/m: `dst = dst * src` truncated at the operand width.
pub fn exec_imul_2op(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let a = read_operand(cpu, &inst.operands[0])?;
    let b = read_operand(cpu, &inst.operands[1])?;
    imul_truncating(cpu, inst, a, b)
}

/// IMUL r, r/m, imm: `dst = src * imm` truncated at the operand width.
pub fn exec_imul_3op(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let a = read_operand(cpu, &inst.operands[1])?;
    let b = read_operand(cpu, &inst.operands[2])?;
    imul_truncating(cpu, inst, a, b)
}

/// DIV: unsigned divide of the A/D pair by the operand.
///
/// Division by zero and quotient overflow stop execution with
/// [`VmError::DivideError`]; they never propagate as host faults.
pub fn exec_div(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let src = read_operand(cpu, &inst.operands[0])?;

    match inst.operand_size {
        OperandSize::Byte => {
            let divisor = src as u8 as u16;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend = cpu.regs.read_gpr16(0); // AX
            let quotient = dividend / divisor;
            if quotient > 0xFF {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr8(0, quotient as u8); // AL
            cpu.regs.write_gpr8(4, (dividend % divisor) as u8); // AH
        }
        OperandSize::Word => {
            let divisor = src as u16 as u32;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend =
                ((cpu.regs.read_gpr16(2) as u32) << 16) | cpu.regs.read_gpr16(0) as u32;
            let quotient = dividend / divisor;
            if quotient > 0xFFFF {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr16(0, quotient as u16);
            cpu.regs.write_gpr16(2, (dividend % divisor) as u16);
        }
        OperandSize::Dword => {
            let divisor = src as u64;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend =
                ((cpu.regs.read_gpr32(2) as u64) << 32) | cpu.regs.read_gpr32(0) as u64;
            let quotient = dividend / divisor;
            if quotient > u32::MAX as u64 {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr32(0, quotient as u32);
            cpu.regs.write_gpr32(2, (dividend % divisor) as u32);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// IDIV: signed divide of the A/D pair by the operand.
pub fn exec_idiv(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let src = read_operand(cpu, &inst.operands[0])?;

    match inst.operand_size {
        OperandSize::Byte => {
            let divisor = src as u8 as i8 as i16;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend = cpu.regs.read_gpr16(0) as i16;
            let quotient = dividend / divisor;
            if quotient != quotient as i8 as i16 {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr8(0, quotient as u8);
            cpu.regs.write_gpr8(4, (dividend % divisor) as u8);
        }
        OperandSize::Word => {
            let divisor = src as u16 as i16 as i32;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend = (((cpu.regs.read_gpr16(2) as u32) << 16)
                | cpu.regs.read_gpr16(0) as u32) as i32;
            let quotient = dividend / divisor;
            if quotient != quotient as i16 as i32 {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr16(0, quotient as u16);
            cpu.regs.write_gpr16(2, (dividend % divisor) as u16);
        }
        OperandSize::Dword => {
            let divisor = src as i32 as i64;
            if divisor == 0 {
                return Err(VmError::DivideError);
            }
            let dividend = (((cpu.regs.read_gpr32(2) as u64) << 32)
                | cpu.regs.read_gpr32(0) as u64) as i64;
            let quotient = dividend / divisor;
            if quotient != quotient as i32 as i64 {
                return Err(VmError::DivideError);
            }
            cpu.regs.write_gpr32(0, quotient as u32);
            cpu.regs.write_gpr32(2, (dividend % divisor) as u32);
        }
    }

    cpu.regs.eip = cpu.regs.eip.wrapping_add(inst.length as u32);
    Ok(())
}

/// Sign-extend a value from the given operand width to i32.
pub fn sign_extend(val: u32, size: OperandSize) -> i32 {
    match size {
        OperandSize::Byte => val as u8 as i8 as i32,
        OperandSize::Word => val as u16 as i16 as i32,
        OperandSize::Dword => val as i32,
    }
}
