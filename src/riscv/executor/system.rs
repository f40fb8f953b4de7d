//! SYSTEM handlers: ECALL/EBREAK forwarding and the Zicsr operations.
//!
//! ECALL and EBREAK invoke the host-supplied environment hooks and retire
//! with the default PC advance. The CSR forms read the old value into rd
//! and then write, set, or clear; only the floating-point CSRs are backed
//! by state, everything else reads as zero.

use crate::error::Result;
use crate::riscv::cpu::{Cpu, EnvHandler};
use crate::riscv::inst::Inst;

pub fn exec_system(cpu: &mut Cpu, inst: Inst, env: &mut dyn EnvHandler) -> Result<()> {
    let funct3 = inst.funct3();

    if funct3 == 0 {
        match inst.imm_i() {
            0 => env.environment_call(cpu),       // ECALL
            1 => env.environment_breakpoint(cpu), // EBREAK
            // WFI, MRET and other privileged forms are out of scope.
            _ => {}
        }
        return Ok(());
    }

    // Zicsr: funct3 1-3 use rs1, 5-7 use the rs1 field as a zero-extended
    // immediate.
    let addr = inst.csr();
    let src = if funct3 & 0b100 != 0 {
        inst.rs1() as u64
    } else {
        cpu.reg(inst.rs1())
    };

    let old = cpu.read_csr(addr);
    match funct3 & 0b011 {
        0b01 => cpu.write_csr(addr, src),        // CSRRW/CSRRWI
        0b10 => cpu.write_csr(addr, old | src),  // CSRRS/CSRRSI
        0b11 => cpu.write_csr(addr, old & !src), // CSRRC/CSRRCI
        _ => {}
    }
    cpu.write_reg(inst.rd(), old);
    Ok(())
}
