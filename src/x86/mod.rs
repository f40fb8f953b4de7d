//! 32-bit IA-32 guest CPU: decoder, executor, disassembler, and state.

pub mod cpu;
pub mod decoder;
pub mod disasm;
pub mod executor;
pub mod flags;
pub mod instruction;
pub mod registers;

pub use cpu::Cpu;
pub use flags::OperandSize;
pub use instruction::DecodedInst;
pub use registers::{Gpr, RegisterFile};
