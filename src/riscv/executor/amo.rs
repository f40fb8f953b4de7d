//! A-extension handlers: LR/SC and the read-modify-write AMOs.
//!
//! The reservation models an idealized single hart: LR records the
//! address, any store to that address kills it, and SC consults it. SC
//! writes 0 to rd on success and 1 on failure without storing.

use crate::error::Result;
use crate::memory::MemoryBus;
use crate::riscv::cpu::{Cpu, Xlen};
use crate::riscv::inst::Inst;

use super::hint;

/// AMO width from funct3: 2 = word, 3 = doubleword (RV64 only).
#[derive(Clone, Copy, PartialEq, Eq)]
enum AmoWidth {
    Word,
    Double,
}

fn load(cpu: &Cpu, addr: u64, width: AmoWidth) -> Result<u64> {
    match width {
        AmoWidth::Word => Ok(cpu.memory.read_u32(addr)? as i32 as i64 as u64),
        AmoWidth::Double => cpu.memory.read_u64(addr),
    }
}

fn store(cpu: &mut Cpu, addr: u64, width: AmoWidth, val: u64) -> Result<()> {
    match width {
        AmoWidth::Word => cpu.store_u32(addr, val as u32),
        AmoWidth::Double => cpu.store_u64(addr, val),
    }
}

/// LR/SC and AMOADD/SWAP/XOR/OR/AND/MIN/MAX/MINU/MAXU.
pub fn exec_amo(cpu: &mut Cpu, inst: Inst) -> Result<()> {
    let width = match inst.funct3() {
        0b010 => AmoWidth::Word,
        0b011 if cpu.xlen == Xlen::Rv64 => AmoWidth::Double,
        _ => return hint(cpu, inst),
    };

    let addr = cpu.reg(inst.rs1());
    let rd = inst.rd();

    match inst.funct5() {
        // LR: load and record the reservation.
        0b00010 => {
            let value = load(cpu, addr, width)?;
            cpu.reservation = Some(addr);
            cpu.write_reg(rd, value);
        }

        // SC: store iff the reservation is alive and matches.
        0b00011 => {
            if cpu.reservation == Some(addr) {
                store(cpu, addr, width, cpu.reg(inst.rs2()))?;
                cpu.write_reg(rd, 0);
            } else {
                cpu.write_reg(rd, 1);
            }
            cpu.reservation = None;
        }

        // Read-modify-write forms.
        funct5 => {
            let old = load(cpu, addr, width)?;
            let src = cpu.reg(inst.rs2());

            let new = match funct5 {
                0b00000 => old.wrapping_add(src), // AMOADD
                0b00001 => src,                   // AMOSWAP
                0b00100 => old ^ src,             // AMOXOR
                0b01000 => old | src,             // AMOOR
                0b01100 => old & src,             // AMOAND
                // MIN/MAX compare at the access width.
                0b10000 | 0b10100 | 0b11000 | 0b11100 => {
                    let keep_old = match (funct5, width) {
                        (0b10000, AmoWidth::Word) => (old as i32) <= (src as i32),
                        (0b10000, AmoWidth::Double) => (old as i64) <= (src as i64),
                        (0b10100, AmoWidth::Word) => (old as i32) >= (src as i32),
                        (0b10100, AmoWidth::Double) => (old as i64) >= (src as i64),
                        (0b11000, AmoWidth::Word) => (old as u32) <= (src as u32),
                        (0b11000, AmoWidth::Double) => old <= src,
                        (0b11100, AmoWidth::Word) => (old as u32) >= (src as u32),
                        _ => old >= src,
                    };
                    if keep_old { old } else { src }
                }
                _ => return hint(cpu, inst),
            };

            store(cpu, addr, width, new)?;
            cpu.write_reg(rd, old);
        }
    }
    Ok(())
}
