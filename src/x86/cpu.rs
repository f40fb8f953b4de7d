//! x86 CPU state and execution loop.
//!
//! `Cpu` owns the register file and the guest memory buffer and implements
//! the step loop: decode at EIP, dispatch to the executor, and either the
//! handler transfers control or EIP advances past the instruction.

use crate::error::{Result, VmError};
use crate::memory::FlatMemory;
use crate::sentry::RunGuard;
use crate::x86::decoder;
use crate::x86::executor;
use crate::x86::registers::RegisterFile;
use crate::ExitReason;

/// Guest memory allocation granule; the requested space must be a multiple.
pub const GUEST_ALIGN: usize = 1024;

/// Offsets 0..1024 are reserved for system use; code loads at this offset.
pub const CODE_BASE: u32 = 1024;

/// Room reserved for the guest stack at the top of the space.
pub const STACK_RESERVE: usize = 65536;

/// Virtual x86 CPU.
pub struct Cpu {
    /// CPU registers (GPR, EIP, EFLAGS).
    pub regs: RegisterFile,
    /// Guest memory, exclusively owned by this CPU instance.
    pub memory: FlatMemory,
    /// Start of the code window.
    pub begin: u32,
    /// End of the code window (exclusive); `run` stops when EIP leaves it.
    pub end: u32,
}

impl Cpu {
    /// Create a CPU with no guest program loaded.
    pub fn new() -> Self {
        Cpu {
            regs: RegisterFile::new(),
            memory: FlatMemory::new(0),
            begin: 0,
            end: 0,
        }
    }

    /// Reset all registers and load a guest program.
    ///
    /// `space` bytes of zeroed guest memory are allocated; the image is
    /// copied to offset 1024, EIP points at it, and ESP starts 16 bytes
    /// below the top of the space.
    ///
    /// # Errors
    ///
    /// Fails when `space` is not a multiple of 1024 or cannot hold the
    /// system area, the image, and the reserved stack.
    pub fn program(&mut self, space: usize, code: &[u8]) -> Result<()> {
        if space % GUEST_ALIGN != 0 {
            return Err(VmError::MisalignedSpace { space, granule: GUEST_ALIGN });
        }
        if space < GUEST_ALIGN + code.len() + STACK_RESERVE {
            return Err(VmError::ImageTooLarge { space, code: code.len() });
        }

        self.regs = RegisterFile::new();
        self.memory = FlatMemory::new(space);
        self.memory.load_at(CODE_BASE as usize, code)?;
        self.regs.eip = CODE_BASE;
        self.regs.set_sp(space as u32 - 16);
        self.begin = CODE_BASE;
        self.end = CODE_BASE + code.len() as u32;

        log::debug!(
            "loaded {} byte x86 image at offset {} ({} byte space)",
            code.len(),
            CODE_BASE,
            space
        );
        Ok(())
    }

    /// Execute one architectural instruction (prefixes included).
    ///
    /// # Errors
    ///
    /// `VmError::Halted` and `VmError::Breakpoint` report stop events;
    /// other errors are faults.
    pub fn step(&mut self) -> Result<()> {
        let inst = decoder::decode(&self.memory, self.regs.eip)?;
        executor::execute(self, &inst)
    }

    /// Execute until EIP leaves the code window or a stop event occurs.
    ///
    /// Runs under the process-global sentry; a fault leaves register state
    /// as of the last retired instruction.
    pub fn run(&mut self) -> ExitReason {
        let _guard = match RunGuard::acquire() {
            Ok(guard) => guard,
            Err(e) => return ExitReason::Fault(e),
        };

        while self.regs.eip >= self.begin && self.regs.eip < self.end {
            match self.step() {
                Ok(()) => {}
                Err(VmError::Halted) => return ExitReason::Halted,
                Err(VmError::Breakpoint) => return ExitReason::Breakpoint,
                Err(e) => {
                    log::debug!("x86 run stopped at EIP=0x{:08X}: {}", self.regs.eip, e);
                    return ExitReason::Fault(e);
                }
            }
        }
        ExitReason::Completed
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
