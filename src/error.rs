//! Error types for guestcpu.
//!
//! `VmError` serves dual purpose: it is the Rust error type returned from
//! fallible operations and the representation of guest execution events.
//! The run loops in `x86::cpu` and `riscv::cpu` catch these errors and
//! convert them into an [`ExitReason`](crate::ExitReason).

use thiserror::Error;

/// Errors generated while loading or executing a guest program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    /// Guest load/store touched an address outside the mapped buffer.
    #[error("guest memory fault at 0x{0:08X}")]
    MemoryFault(u64),

    /// Instruction fetch ran off the mapped buffer.
    #[error("instruction fetch fault at 0x{0:08X}")]
    FetchFault(u64),

    /// x86 integer division by zero or quotient overflow.
    #[error("divide error")]
    DivideError,

    /// Guest executed a breakpoint instruction (x86 INT3/INT).
    #[error("breakpoint")]
    Breakpoint,

    /// Guest executed HLT — normal exit condition.
    #[error("CPU halted")]
    Halted,

    /// The requested guest space cannot hold the system area, the program
    /// image, and the reserved stack.
    #[error("guest image of {code} bytes does not fit a space of {space} bytes")]
    ImageTooLarge { space: usize, code: usize },

    /// The requested guest space is not a multiple of the allocation granule.
    #[error("guest space of {space} bytes is not a multiple of {granule}")]
    MisalignedSpace { space: usize, granule: usize },

    /// Another CPU instance is already running under the fault sentry.
    #[error("another CPU is already running under the fault sentry")]
    EngineBusy,
}

/// Convenience result alias for interpreter operations.
pub type Result<T> = core::result::Result<T, VmError>;
