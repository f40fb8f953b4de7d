//! Decoded x86 instruction representation.
//!
//! The decoder produces a `DecodedInst` struct that fully describes the
//! instruction: opcode, operands, prefix state, and sizes. The executor and
//! the disassembler both consume this struct.

use crate::x86::flags::OperandSize;

/// An x86 instruction fully decoded from its byte encoding.
#[derive(Debug, Clone)]
pub struct DecodedInst {
    /// Length of the encoded instruction in bytes (1-15).
    pub length: u8,

    /// Primary opcode byte. For two-byte opcodes (0F xx), stored as
    /// 0x0F00 | byte2.
    pub opcode: u16,

    /// Which opcode map this instruction belongs to.
    pub opcode_map: OpcodeMap,

    /// Operand size (determined by opcode form + the 0x66 prefix).
    pub operand_size: OperandSize,

    /// Decoded operands (up to 3).
    pub operands: [Operand; 3],

    /// Number of valid operands.
    pub operand_count: u8,

    /// Prefix state.
    pub prefix: PrefixState,

    /// ModR/M byte if present.
    pub modrm: Option<u8>,

    /// SIB byte if present.
    pub sib: Option<u8>,

    /// Displacement value (sign-extended).
    pub displacement: i32,

    /// Immediate value.
    pub immediate: u32,

    /// Second immediate (ENTER).
    pub immediate2: u32,

    /// REP/REPNE prefix for string operations.
    pub rep: RepPrefix,
}

impl DecodedInst {
    /// Create a zeroed instruction (used by the decoder as starting point).
    pub fn empty() -> Self {
        DecodedInst {
            length: 0,
            opcode: 0,
            opcode_map: OpcodeMap::Primary,
            operand_size: OperandSize::Dword,
            operands: [Operand::None, Operand::None, Operand::None],
            operand_count: 0,
            prefix: PrefixState::default(),
            modrm: None,
            sib: None,
            displacement: 0,
            immediate: 0,
            immediate2: 0,
            rep: RepPrefix::None,
        }
    }

    /// Get the ModR/M reg field (bits [5:3]).
    #[inline]
    pub fn modrm_reg(&self) -> u8 {
        self.modrm.map(|m| (m >> 3) & 7).unwrap_or(0)
    }

    /// Get the ModR/M r/m field (bits [2:0]).
    #[inline]
    pub fn modrm_rm(&self) -> u8 {
        self.modrm.map(|m| m & 7).unwrap_or(0)
    }

    /// Get the ModR/M mod field (bits [7:6]).
    #[inline]
    pub fn modrm_mod(&self) -> u8 {
        self.modrm.map(|m| (m >> 6) & 3).unwrap_or(0)
    }
}

/// Opcode map identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeMap {
    /// One-byte opcodes (no escape prefix).
    Primary,
    /// Two-byte opcodes (0F xx).
    Secondary,
}

/// Decoded prefix state.
///
/// Under the flat memory model segment overrides carry no semantics; the
/// decoder still consumes them so the byte stream stays in sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixState {
    /// A segment-override prefix was present (consumed, ignored).
    pub segment_override: bool,
    /// Operand-size override (0x66 prefix).
    pub operand_size_override: bool,
    /// Address-size override (0x67 prefix; consumed, 32-bit addressing only).
    pub address_size_override: bool,
    /// LOCK prefix (0xF0). Single-hart execution is implicitly locked.
    pub lock: bool,
}

/// REP prefix type for string operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepPrefix {
    /// No REP prefix.
    #[default]
    None,
    /// REP/REPE prefix (0xF3).
    Rep,
    /// REPNE prefix (0xF2).
    Repne,
}

/// An instruction operand.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    /// Unused operand slot.
    None,
    /// Register operand at a specific width.
    Register { index: u8, size: OperandSize },
    /// Memory operand (address from ModR/M + SIB + displacement).
    Memory(MemOperand),
    /// Immediate value.
    Immediate(u32),
    /// Relative offset (JMP/CALL/Jcc — sign-extended displacement).
    RelativeOffset(i32),
}

impl Operand {
    /// Width of the operand where one is recorded.
    pub fn size(&self) -> Option<OperandSize> {
        match self {
            Operand::Register { size, .. } => Some(*size),
            Operand::Memory(m) => Some(m.size),
            _ => None,
        }
    }
}

/// Memory operand (effective address components).
///
/// The address resolves at execute time: `index*scale + base + displacement`.
#[derive(Debug, Clone, Copy)]
pub struct MemOperand {
    /// Base register index (None = no base register).
    pub base: Option<u8>,
    /// Index register index (None = no index register).
    pub index: Option<u8>,
    /// Scale factor (1, 2, 4, or 8).
    pub scale: u8,
    /// Displacement (sign-extended).
    pub displacement: i32,
    /// Width of the memory access.
    pub size: OperandSize,
}
