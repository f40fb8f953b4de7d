//! First-level RISC-V dispatch.
//!
//! The major opcode field (bits [6:2] with [1:0] = 11) selects a category
//! handler; each handler sub-dispatches on funct3/funct7/funct5/fmt/rs2
//! per the ISA manual. Unknown encodings fall through to HINT, which is an
//! architectural no-op.

pub mod alu;
pub mod amo;
pub mod branch;
pub mod float;
pub mod mem;
pub mod system;

use crate::error::Result;
use crate::riscv::cpu::{Cpu, EnvHandler};
use crate::riscv::inst::{self, Inst};

/// Dispatch one 32-bit instruction to its category handler.
pub(crate) fn dispatch(cpu: &mut Cpu, inst: Inst, env: &mut dyn EnvHandler) -> Result<()> {
    match inst.opcode() {
        inst::LOAD => mem::exec_load(cpu, inst),
        inst::LOAD_FP => float::exec_load_fp(cpu, inst),
        // FENCE and friends order nothing on a single synchronous hart.
        inst::MISC_MEM => Ok(()),
        inst::OP_IMM => alu::exec_op_imm(cpu, inst),
        inst::AUIPC => alu::exec_auipc(cpu, inst),
        inst::OP_IMM_32 => alu::exec_op_imm_32(cpu, inst),
        inst::STORE => mem::exec_store(cpu, inst),
        inst::STORE_FP => float::exec_store_fp(cpu, inst),
        inst::AMO => amo::exec_amo(cpu, inst),
        inst::OP => alu::exec_op(cpu, inst),
        inst::LUI => alu::exec_lui(cpu, inst),
        inst::OP_32 => alu::exec_op_32(cpu, inst),
        inst::MADD | inst::MSUB | inst::NMSUB | inst::NMADD => float::exec_fused(cpu, inst),
        inst::OP_FP => float::exec_op_fp(cpu, inst),
        inst::BRANCH => branch::exec_branch(cpu, inst),
        inst::JALR => branch::exec_jalr(cpu, inst),
        inst::JAL => branch::exec_jal(cpu, inst),
        inst::SYSTEM => system::exec_system(cpu, inst, env),
        _ => hint(cpu, inst),
    }
}

/// HINT: the architectural no-op used as the catch-all for unknown
/// encodings.
pub(crate) fn hint(cpu: &Cpu, inst: Inst) -> Result<()> {
    log::trace!("hint encoding 0x{:08X} at PC=0x{:08X}", inst.0, cpu.pc);
    Ok(())
}
