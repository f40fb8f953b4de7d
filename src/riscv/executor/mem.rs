//! Load and store handlers.
//!
//! Loads sign- or zero-extend into the full register width; stores go
//! through the CPU's reservation-aware store wrappers so an LR/SC pair
//! bracketing a store to the reserved address fails as required.

use crate::error::Result;
use crate::memory::MemoryBus;
use crate::riscv::cpu::{Cpu, Xlen};
use crate::riscv::inst::Inst;

use super::hint;

fn effective_address(cpu: &Cpu, inst: Inst, imm: i64) -> u64 {
    cpu.reg(inst.rs1()).wrapping_add(imm as u64) & cpu.xlen.mask()
}

/// LB/LH/LW/LBU/LHU and the RV64 LWU/LD.
pub fn exec_load(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let addr = effective_address(cpu, inst, inst.imm_i());

    let value = match inst.funct3() {
        0b000 => cpu.memory.read_u8(addr)? as i8 as i64 as u64,   // LB
        0b001 => cpu.memory.read_u16(addr)? as i16 as i64 as u64, // LH
        0b010 => cpu.memory.read_u32(addr)? as i32 as i64 as u64, // LW
        0b100 => cpu.memory.read_u8(addr)? as u64,                // LBU
        0b101 => cpu.memory.read_u16(addr)? as u64,               // LHU
        0b110 if cpu.xlen == Xlen::Rv64 => cpu.memory.read_u32(addr)? as u64, // LWU
        0b011 if cpu.xlen == Xlen::Rv64 => cpu.memory.read_u64(addr)?,        // LD
        _ => return hint(cpu, inst),
    };

    cpu.write_reg(inst.rd(), value);
    Ok(())
}

/// SB/SH/SW and the RV64 SD.
pub fn exec_store(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let addr = effective_address(cpu, inst, inst.imm_s());
    let value = cpu.reg(inst.rs2());

    match inst.funct3() {
        0b000 => cpu.store_u8(addr, value as u8)?,   // SB
        0b001 => cpu.store_u16(addr, value as u16)?, // SH
        0b010 => cpu.store_u32(addr, value as u32)?, // SW
        0b011 if cpu.xlen == Xlen::Rv64 => cpu.store_u64(addr, value)?, // SD
        _ => return hint(cpu, inst),
    }
    Ok(())
}
