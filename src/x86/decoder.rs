//! x86 instruction decoder for the 32-bit integer subset.
//!
//! Decodes raw instruction bytes from guest memory into [`DecodedInst`]
//! structs that the executor and the disassembler consume. Covers the
//! one-byte opcode map, the common 0F-prefixed two-byte opcodes, and the
//! group opcodes dispatched on ModR/M bits [5:3].
//!
//! The decoder operates in four phases:
//!
//! 1. **Prefix parsing** — legacy, segment-override, and size-override
//!    prefixes, plus LOCK/REP/REPNE.
//! 2. **Opcode fetch** — single-byte or two-byte (0F xx) opcodes.
//! 3. **Size resolution** — 16-bit when the 0x66 override is sticky,
//!    32-bit otherwise; byte-form opcodes force 8-bit in phase 4.
//! 4. **Operand decoding** — ModR/M, SIB, displacement, and immediates.
//!
//! Encodings outside the implemented subset decode to an operand-less
//! instruction that executes (and disassembles) as the `___` no-op; a
//! best-effort interpreter prefers to keep running over aborting.

use crate::error::{Result, VmError};
use crate::memory::MemoryBus;
use crate::x86::flags::OperandSize;
use crate::x86::instruction::{DecodedInst, MemOperand, OpcodeMap, Operand, RepPrefix};

/// Maximum x86 instruction length in bytes (hardware-enforced).
const MAX_INST_LEN: u32 = 15;

/// Decode one instruction starting at `eip`.
///
/// Returns a [`DecodedInst`] describing the opcode, operands, prefixes, and
/// byte length. The caller advances EIP by `inst.length` after execution
/// unless the instruction transfers control itself.
///
/// # Errors
///
/// Returns [`VmError::FetchFault`] if reading instruction bytes from guest
/// memory fails or the encoding exceeds the 15-byte limit.
pub fn decode(mem: &dyn MemoryBus, eip: u32) -> Result<DecodedInst> {
    let mut cur = DecodeCursor::new(mem, eip);
    cur.decode_instruction()
}

/// Internal cursor that tracks position within the instruction byte stream
/// and accumulates decoded fields.
struct DecodeCursor<'m> {
    mem: &'m dyn MemoryBus,
    /// EIP at instruction start.
    start: u32,
    /// Current read position.
    pos: u32,
    /// Accumulated instruction being built.
    inst: DecodedInst,
}

impl<'m> DecodeCursor<'m> {
    fn new(mem: &'m dyn MemoryBus, eip: u32) -> Self {
        DecodeCursor {
            mem,
            start: eip,
            pos: eip,
            inst: DecodedInst::empty(),
        }
    }

    // ── byte fetching helpers ──

    /// Read the next byte and advance the cursor, enforcing the 15-byte limit.
    fn fetch_u8(&mut self) -> Result<u8> {
        if self.pos.wrapping_sub(self.start) >= MAX_INST_LEN {
            return Err(VmError::FetchFault(self.pos as u64));
        }
        let b = self
            .mem
            .read_u8(self.pos as u64)
            .map_err(|_| VmError::FetchFault(self.pos as u64))?;
        self.pos = self.pos.wrapping_add(1);
        Ok(b)
    }

    /// Read a little-endian u16.
    fn fetch_u16(&mut self) -> Result<u16> {
        let lo = self.fetch_u8()? as u16;
        let hi = self.fetch_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    /// Read a little-endian u32.
    fn fetch_u32(&mut self) -> Result<u32> {
        let lo = self.fetch_u16()? as u32;
        let hi = self.fetch_u16()? as u32;
        Ok(lo | (hi << 16))
    }

    /// Read an immediate of the given size, sign-extended to 32 bits.
    fn fetch_imm(&mut self, size: OperandSize) -> Result<u32> {
        match size {
            OperandSize::Byte => Ok(self.fetch_u8()? as i8 as i32 as u32),
            OperandSize::Word => Ok(self.fetch_u16()? as i16 as i32 as u32),
            OperandSize::Dword => self.fetch_u32(),
        }
    }

    /// Bytes consumed so far.
    fn bytes_consumed(&self) -> u8 {
        self.pos.wrapping_sub(self.start) as u8
    }

    // ── main decode entry point ──

    fn decode_instruction(&mut self) -> Result<DecodedInst> {
        self.phase1_prefixes()?;
        self.phase2_opcode()?;
        self.phase3_sizes();
        self.phase4_operands()?;

        self.inst.length = self.bytes_consumed();
        Ok(self.inst.clone())
    }

    // ── Phase 1: prefix parsing ──

    fn phase1_prefixes(&mut self) -> Result<()> {
        loop {
            let b = self.fetch_u8()?;
            match b {
                // LOCK / REPNE / REP
                0xF0 => self.inst.prefix.lock = true,
                0xF2 => self.inst.rep = RepPrefix::Repne,
                0xF3 => self.inst.rep = RepPrefix::Rep,

                // Segment overrides (flat model: consumed, no semantics)
                0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 => {
                    self.inst.prefix.segment_override = true
                }

                // Operand-size override
                0x66 => self.inst.prefix.operand_size_override = true,

                // Address-size override
                0x67 => self.inst.prefix.address_size_override = true,

                // Not a prefix — rewind one byte and exit the loop.
                _ => {
                    self.pos = self.pos.wrapping_sub(1);
                    break;
                }
            }
        }
        Ok(())
    }

    // ── Phase 2: opcode fetch ──

    fn phase2_opcode(&mut self) -> Result<()> {
        let b1 = self.fetch_u8()?;
        if b1 == 0x0F {
            let b2 = self.fetch_u8()?;
            self.inst.opcode_map = OpcodeMap::Secondary;
            self.inst.opcode = 0x0F00 | (b2 as u16);
        } else {
            self.inst.opcode_map = OpcodeMap::Primary;
            self.inst.opcode = b1 as u16;
        }
        Ok(())
    }

    // ── Phase 3: resolve operand size ──

    fn phase3_sizes(&mut self) {
        self.inst.operand_size = if self.inst.prefix.operand_size_override {
            OperandSize::Word
        } else {
            OperandSize::Dword
        };
    }

    // ── Phase 4: decode operands ──

    fn phase4_operands(&mut self) -> Result<()> {
        match self.inst.opcode_map {
            OpcodeMap::Primary => self.decode_primary(),
            OpcodeMap::Secondary => self.decode_secondary(),
        }
    }

    // ── Primary opcode map ──

    fn decode_primary(&mut self) -> Result<()> {
        let op = self.inst.opcode as u8;
        match op {
            // ALU ops: ADD (00-05), OR (08-0D), ADC (10-15), SBB (18-1D),
            //          AND (20-25), SUB (28-2D), XOR (30-35), CMP (38-3D)
            0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => {
                // r/m8, r8
                self.decode_modrm_rm_r(OperandSize::Byte)
            }
            0x01 | 0x09 | 0x11 | 0x19 | 0x21 | 0x29 | 0x31 | 0x39 => {
                // r/m, r
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }
            0x02 | 0x0A | 0x12 | 0x1A | 0x22 | 0x2A | 0x32 | 0x3A => {
                // r8, r/m8
                self.decode_modrm_r_rm(OperandSize::Byte)
            }
            0x03 | 0x0B | 0x13 | 0x1B | 0x23 | 0x2B | 0x33 | 0x3B => {
                // r, r/m
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                // AL, imm8
                self.decode_al_imm8()
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                // eAX, imm
                self.decode_eax_imm()
            }

            // INC/DEC r16/r32
            0x40..=0x4F => {
                let reg = op & 0x07;
                let sz = self.inst.operand_size;
                self.set_operand(0, Operand::Register { index: reg, size: sz });
                self.inst.operand_count = 1;
                Ok(())
            }

            // PUSH r / POP r
            0x50..=0x5F => {
                let reg = op & 0x07;
                let sz = self.inst.operand_size;
                self.set_operand(0, Operand::Register { index: reg, size: sz });
                self.inst.operand_count = 1;
                Ok(())
            }

            // PUSHA / POPA
            0x60 | 0x61 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // PUSH imm16/imm32
            0x68 => {
                let sz = self.inst.operand_size;
                let imm = self.fetch_imm(sz)?;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Immediate(imm));
                self.inst.operand_count = 1;
                Ok(())
            }

            // IMUL r, r/m, imm
            0x69 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)?;
                let imm = self.fetch_imm(sz)?;
                self.inst.immediate = imm;
                self.set_operand(2, Operand::Immediate(imm));
                self.inst.operand_count = 3;
                Ok(())
            }

            // PUSH imm8 (sign-extended)
            0x6A => {
                let imm = self.fetch_imm(OperandSize::Byte)?;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Immediate(imm));
                self.inst.operand_count = 1;
                Ok(())
            }

            // IMUL r, r/m, imm8
            0x6B => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)?;
                let imm = self.fetch_imm(OperandSize::Byte)?;
                self.inst.immediate = imm;
                self.set_operand(2, Operand::Immediate(imm));
                self.inst.operand_count = 3;
                Ok(())
            }

            // Jcc short (rel8)
            0x70..=0x7F => self.decode_rel8(),

            // Group 1: ADD/OR/ADC/SBB/AND/SUB/XOR/CMP r/m, imm
            0x80 | 0x82 => self.decode_group_rm_imm(OperandSize::Byte, OperandSize::Byte),
            0x81 => {
                let sz = self.inst.operand_size;
                self.decode_group_rm_imm(sz, sz)
            }
            0x83 => {
                let sz = self.inst.operand_size;
                self.decode_group_rm_imm(sz, OperandSize::Byte)
            }

            // TEST r/m, r
            0x84 => self.decode_modrm_rm_r(OperandSize::Byte),
            0x85 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }

            // XCHG r/m, r
            0x86 => self.decode_modrm_rm_r(OperandSize::Byte),
            0x87 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }

            // MOV r/m8,r8 | r/m,r | r8,r/m8 | r,r/m
            0x88 => self.decode_modrm_rm_r(OperandSize::Byte),
            0x89 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }
            0x8A => self.decode_modrm_r_rm(OperandSize::Byte),
            0x8B => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)
            }

            // LEA r, m
            0x8D => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)
            }

            // POP r/m
            0x8F => {
                let sz = self.inst.operand_size;
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, sz)?;
                self.set_operand(0, rm_op);
                self.inst.operand_count = 1;
                Ok(())
            }

            // NOP / XCHG eAX, r
            0x90..=0x97 => {
                if op == 0x90 {
                    self.inst.operand_count = 0;
                    return Ok(());
                }
                let sz = self.inst.operand_size;
                self.set_operand(0, Operand::Register { index: 0, size: sz });
                self.set_operand(1, Operand::Register { index: op & 0x07, size: sz });
                self.inst.operand_count = 2;
                Ok(())
            }

            // CBW/CWDE, CWD/CDQ
            0x98 | 0x99 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // PUSHF / POPF / SAHF / LAHF
            0x9C | 0x9D | 0x9E | 0x9F => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // MOV AL/eAX, moffs | MOV moffs, AL/eAX
            0xA0 => {
                let addr = self.fetch_u32()?;
                self.set_operand(0, Operand::Register { index: 0, size: OperandSize::Byte });
                self.set_operand(1, self.moffs_operand(addr, OperandSize::Byte));
                self.inst.operand_size = OperandSize::Byte;
                self.inst.operand_count = 2;
                Ok(())
            }
            0xA1 => {
                let sz = self.inst.operand_size;
                let addr = self.fetch_u32()?;
                self.set_operand(0, Operand::Register { index: 0, size: sz });
                self.set_operand(1, self.moffs_operand(addr, sz));
                self.inst.operand_count = 2;
                Ok(())
            }
            0xA2 => {
                let addr = self.fetch_u32()?;
                self.set_operand(0, self.moffs_operand(addr, OperandSize::Byte));
                self.set_operand(1, Operand::Register { index: 0, size: OperandSize::Byte });
                self.inst.operand_size = OperandSize::Byte;
                self.inst.operand_count = 2;
                Ok(())
            }
            0xA3 => {
                let sz = self.inst.operand_size;
                let addr = self.fetch_u32()?;
                self.set_operand(0, self.moffs_operand(addr, sz));
                self.set_operand(1, Operand::Register { index: 0, size: sz });
                self.inst.operand_count = 2;
                Ok(())
            }

            // String ops — implicit operands only.
            0xA4 | 0xA5 | 0xA6 | 0xA7 | 0xAA | 0xAB | 0xAC | 0xAD | 0xAE | 0xAF => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // TEST AL, imm8 / TEST eAX, imm
            0xA8 => self.decode_al_imm8(),
            0xA9 => self.decode_eax_imm(),

            // MOV r8, imm8
            0xB0..=0xB7 => {
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Register { index: op & 0x07, size: OperandSize::Byte });
                self.set_operand(1, Operand::Immediate(imm));
                self.inst.operand_size = OperandSize::Byte;
                self.inst.operand_count = 2;
                Ok(())
            }

            // MOV r, imm
            0xB8..=0xBF => {
                let sz = self.inst.operand_size;
                let imm = self.fetch_imm(sz)?;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Register { index: op & 0x07, size: sz });
                self.set_operand(1, Operand::Immediate(imm));
                self.inst.operand_count = 2;
                Ok(())
            }

            // Group 2 (shifts): r/m, imm8
            0xC0 => self.decode_shift(OperandSize::Byte, ShiftCount::Imm8),
            0xC1 => {
                let sz = self.inst.operand_size;
                self.decode_shift(sz, ShiftCount::Imm8)
            }

            // RET near imm16
            0xC2 => {
                let imm = self.fetch_u16()? as u32;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Immediate(imm));
                self.inst.operand_count = 1;
                Ok(())
            }

            // RET near
            0xC3 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // MOV r/m8, imm8
            0xC6 => {
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, OperandSize::Byte)?;
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(0, rm_op);
                self.set_operand(1, Operand::Immediate(imm));
                self.inst.operand_size = OperandSize::Byte;
                self.inst.operand_count = 2;
                Ok(())
            }

            // MOV r/m, imm
            0xC7 => {
                let sz = self.inst.operand_size;
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, sz)?;
                let imm = self.fetch_imm(sz)?;
                self.inst.immediate = imm;
                self.set_operand(0, rm_op);
                self.set_operand(1, Operand::Immediate(imm));
                self.inst.operand_count = 2;
                Ok(())
            }

            // ENTER imm16, imm8
            0xC8 => {
                let imm16 = self.fetch_u16()? as u32;
                let imm8 = self.fetch_u8()? as u32;
                self.inst.immediate = imm16;
                self.inst.immediate2 = imm8;
                self.set_operand(0, Operand::Immediate(imm16));
                self.set_operand(1, Operand::Immediate(imm8));
                self.inst.operand_count = 2;
                Ok(())
            }

            // LEAVE
            0xC9 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // INT 3
            0xCC => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // INT imm8
            0xCD => {
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(0, Operand::Immediate(imm));
                self.inst.operand_count = 1;
                Ok(())
            }

            // Group 2 (shifts): r/m, 1
            0xD0 => self.decode_shift(OperandSize::Byte, ShiftCount::One),
            0xD1 => {
                let sz = self.inst.operand_size;
                self.decode_shift(sz, ShiftCount::One)
            }

            // Group 2 (shifts): r/m, CL
            0xD2 => self.decode_shift(OperandSize::Byte, ShiftCount::Cl),
            0xD3 => {
                let sz = self.inst.operand_size;
                self.decode_shift(sz, ShiftCount::Cl)
            }

            // XLAT
            0xD7 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // LOOPNE/LOOPE/LOOP/JECXZ (rel8)
            0xE0..=0xE3 => self.decode_rel8(),

            // CALL near rel16/rel32
            0xE8 => self.decode_rel_near(),

            // JMP near rel16/rel32
            0xE9 => self.decode_rel_near(),

            // JMP short rel8
            0xEB => self.decode_rel8(),

            // HLT / CMC
            0xF4 | 0xF5 => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // Group 3: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV r/m8
            0xF6 => self.decode_group3(OperandSize::Byte),
            // Group 3: r/m
            0xF7 => {
                let sz = self.inst.operand_size;
                self.decode_group3(sz)
            }

            // CLC / STC / CLI / STI / CLD / STD
            0xF8..=0xFD => {
                self.inst.operand_count = 0;
                Ok(())
            }

            // Group 4: INC/DEC r/m8
            0xFE => {
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, OperandSize::Byte)?;
                self.set_operand(0, rm_op);
                self.inst.operand_size = OperandSize::Byte;
                self.inst.operand_count = 1;
                Ok(())
            }

            // Group 5: INC/DEC/CALL/JMP/PUSH r/m
            0xFF => {
                let sz = self.inst.operand_size;
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, sz)?;
                self.set_operand(0, rm_op);
                self.inst.operand_count = 1;
                Ok(())
            }

            // Everything else is outside the implemented subset and retires
            // as the ___ no-op.
            _ => {
                self.inst.operand_count = 0;
                Ok(())
            }
        }
    }

    // ── Secondary opcode map (0F xx) ──

    fn decode_secondary(&mut self) -> Result<()> {
        let op_lo = (self.inst.opcode & 0xFF) as u8;
        match op_lo {
            // Jcc near (rel16/rel32)
            0x80..=0x8F => self.decode_rel_near(),

            // SETcc r/m8
            0x90..=0x9F => {
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, OperandSize::Byte)?;
                self.set_operand(0, rm_op);
                self.inst.operand_count = 1;
                Ok(())
            }

            // BT r/m, r
            0xA3 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }

            // SHLD r/m, r, imm8
            0xA4 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)?;
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(2, Operand::Immediate(imm));
                self.inst.operand_count = 3;
                Ok(())
            }

            // SHLD r/m, r, CL
            0xA5 => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)?;
                self.set_operand(2, Operand::Register { index: 1, size: OperandSize::Byte });
                self.inst.operand_count = 3;
                Ok(())
            }

            // BTS r/m, r
            0xAB => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }

            // SHRD r/m, r, imm8
            0xAC => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)?;
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(2, Operand::Immediate(imm));
                self.inst.operand_count = 3;
                Ok(())
            }

            // SHRD r/m, r, CL
            0xAD => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)?;
                self.set_operand(2, Operand::Register { index: 1, size: OperandSize::Byte });
                self.inst.operand_count = 3;
                Ok(())
            }

            // IMUL r, r/m
            0xAF => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)
            }

            // MOVZX r, r/m8 | r, r/m16
            0xB6 | 0xB7 => self.decode_extend(op_lo == 0xB7),

            // Group 8: BT/BTS/BTR/BTC r/m, imm8
            0xBA => {
                let sz = self.inst.operand_size;
                let modrm = self.fetch_modrm()?;
                let (md, _reg, rm) = Self::split_modrm(modrm);
                let rm_op = self.decode_rm(md, rm, sz)?;
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(0, rm_op);
                self.set_operand(1, Operand::Immediate(imm));
                self.inst.operand_count = 2;
                Ok(())
            }

            // BTR / BTC / BSF / BSR
            0xB3 | 0xBB => {
                let sz = self.inst.operand_size;
                self.decode_modrm_rm_r(sz)
            }
            0xBC | 0xBD => {
                let sz = self.inst.operand_size;
                self.decode_modrm_r_rm(sz)
            }

            // MOVSX r, r/m8 | r, r/m16
            0xBE | 0xBF => self.decode_extend(op_lo == 0xBF),

            // BSWAP r32
            0xC8..=0xCF => {
                self.set_operand(
                    0,
                    Operand::Register { index: op_lo & 0x07, size: OperandSize::Dword },
                );
                self.inst.operand_count = 1;
                Ok(())
            }

            // Outside the implemented subset: ___ no-op.
            _ => {
                self.inst.operand_count = 0;
                Ok(())
            }
        }
    }

    // ── ModR/M + SIB decoding ──

    /// Fetch the ModR/M byte and record it in the instruction.
    fn fetch_modrm(&mut self) -> Result<u8> {
        let b = self.fetch_u8()?;
        self.inst.modrm = Some(b);
        Ok(b)
    }

    /// Split ModR/M into (mod, reg, rm) fields.
    #[inline]
    fn split_modrm(modrm: u8) -> (u8, u8, u8) {
        ((modrm >> 6) & 3, (modrm >> 3) & 7, modrm & 7)
    }

    /// Decode the r/m operand from a ModR/M byte, handling register-direct,
    /// base+displacement, SIB, and absolute addressing modes.
    fn decode_rm(&mut self, md: u8, rm: u8, size: OperandSize) -> Result<Operand> {
        if md == 3 {
            // Register direct.
            return Ok(Operand::Register { index: rm, size });
        }

        // mod=00, rm=101: 32-bit absolute displacement, no base.
        if md == 0 && rm == 5 {
            let disp = self.fetch_u32()? as i32;
            self.inst.displacement = disp;
            return Ok(Operand::Memory(MemOperand {
                base: None,
                index: None,
                scale: 1,
                displacement: disp,
                size,
            }));
        }

        // rm=100 signals a SIB byte in every memory mode.
        if rm == 4 {
            return self.decode_sib(md, size);
        }

        // Regular base register + optional displacement.
        let disp = match md {
            0 => 0i32,
            1 => self.fetch_u8()? as i8 as i32,
            2 => self.fetch_u32()? as i32,
            _ => unreachable!(),
        };
        self.inst.displacement = disp;
        Ok(Operand::Memory(MemOperand {
            base: Some(rm),
            index: None,
            scale: 1,
            displacement: disp,
            size,
        }))
    }

    /// Decode a SIB byte and produce a memory operand.
    fn decode_sib(&mut self, md: u8, size: OperandSize) -> Result<Operand> {
        let sib = self.fetch_u8()?;
        self.inst.sib = Some(sib);

        let scale = 1u8 << ((sib >> 6) & 3);
        let index3 = (sib >> 3) & 7;
        let base3 = sib & 7;

        // Index = 100 means "no index".
        let index = if index3 == 4 { None } else { Some(index3) };

        // base=101 with mod=00 means "no base + disp32".
        let (base, disp) = if base3 == 5 && md == 0 {
            (None, self.fetch_u32()? as i32)
        } else {
            let d = match md {
                0 => 0i32,
                1 => self.fetch_u8()? as i8 as i32,
                2 => self.fetch_u32()? as i32,
                _ => unreachable!(),
            };
            (Some(base3), d)
        };

        self.inst.displacement = disp;
        Ok(Operand::Memory(MemOperand {
            base,
            index,
            scale,
            displacement: disp,
            size,
        }))
    }

    // ── Operand decoding helpers ──

    /// Decode `operand[0] = r/m, operand[1] = reg` from ModR/M.
    fn decode_modrm_rm_r(&mut self, size: OperandSize) -> Result<()> {
        let modrm = self.fetch_modrm()?;
        let (md, reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, size)?;
        self.set_operand(0, rm_op);
        self.set_operand(1, Operand::Register { index: reg, size });
        self.inst.operand_size = size;
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode `operand[0] = reg, operand[1] = r/m` from ModR/M.
    fn decode_modrm_r_rm(&mut self, size: OperandSize) -> Result<()> {
        let modrm = self.fetch_modrm()?;
        let (md, reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, size)?;
        self.set_operand(0, Operand::Register { index: reg, size });
        self.set_operand(1, rm_op);
        self.inst.operand_size = size;
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode `operand[0] = AL, operand[1] = imm8`.
    fn decode_al_imm8(&mut self) -> Result<()> {
        let imm = self.fetch_u8()? as u32;
        self.inst.immediate = imm;
        self.set_operand(0, Operand::Register { index: 0, size: OperandSize::Byte });
        self.set_operand(1, Operand::Immediate(imm));
        self.inst.operand_size = OperandSize::Byte;
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode `operand[0] = eAX, operand[1] = imm` at the current operand size.
    fn decode_eax_imm(&mut self) -> Result<()> {
        let sz = self.inst.operand_size;
        let imm = self.fetch_imm(sz)?;
        self.inst.immediate = imm;
        self.set_operand(0, Operand::Register { index: 0, size: sz });
        self.set_operand(1, Operand::Immediate(imm));
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode a Group 1 instruction: `operand[0] = r/m, operand[1] = imm`.
    ///
    /// The reg field of ModR/M selects the sub-opcode; the immediate is
    /// sign-extended to the operand width when encoded narrower.
    fn decode_group_rm_imm(&mut self, rm_size: OperandSize, imm_size: OperandSize) -> Result<()> {
        let modrm = self.fetch_modrm()?;
        let (md, _reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, rm_size)?;
        let imm = self.fetch_imm(imm_size)?;
        self.inst.immediate = imm;
        self.set_operand(0, rm_op);
        self.set_operand(1, Operand::Immediate(imm));
        self.inst.operand_size = rm_size;
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode a Group 2 shift/rotate with the given count source.
    fn decode_shift(&mut self, size: OperandSize, count: ShiftCount) -> Result<()> {
        let modrm = self.fetch_modrm()?;
        let (md, _reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, size)?;
        self.set_operand(0, rm_op);
        match count {
            ShiftCount::Imm8 => {
                let imm = self.fetch_u8()? as u32;
                self.inst.immediate = imm;
                self.set_operand(1, Operand::Immediate(imm));
            }
            ShiftCount::One => {
                self.inst.immediate = 1;
                self.set_operand(1, Operand::Immediate(1));
            }
            ShiftCount::Cl => {
                self.set_operand(1, Operand::Register { index: 1, size: OperandSize::Byte });
            }
        }
        self.inst.operand_size = size;
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode Group 3 (TEST/NOT/NEG/MUL/IMUL/DIV/IDIV r/m).
    ///
    /// TEST (reg=0,1) carries an immediate; the others do not.
    fn decode_group3(&mut self, size: OperandSize) -> Result<()> {
        let modrm = self.fetch_modrm()?;
        let (md, reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, size)?;
        self.set_operand(0, rm_op);
        self.inst.operand_size = size;

        if reg == 0 || reg == 1 {
            let imm = self.fetch_imm(size)?;
            self.inst.immediate = imm;
            self.set_operand(1, Operand::Immediate(imm));
            self.inst.operand_count = 2;
        } else {
            self.inst.operand_count = 1;
        }
        Ok(())
    }

    /// Decode MOVZX/MOVSX: `operand[0] = reg` at the operand size,
    /// `operand[1] = r/m` at the narrower source width.
    fn decode_extend(&mut self, from_word: bool) -> Result<()> {
        let dst_sz = self.inst.operand_size;
        let src_sz = if from_word { OperandSize::Word } else { OperandSize::Byte };
        let modrm = self.fetch_modrm()?;
        let (md, reg, rm) = Self::split_modrm(modrm);
        let rm_op = self.decode_rm(md, rm, src_sz)?;
        self.set_operand(0, Operand::Register { index: reg, size: dst_sz });
        self.set_operand(1, rm_op);
        self.inst.operand_count = 2;
        Ok(())
    }

    /// Decode a short (rel8) relative branch operand.
    fn decode_rel8(&mut self) -> Result<()> {
        let rel = self.fetch_u8()? as i8 as i32;
        self.set_operand(0, Operand::RelativeOffset(rel));
        self.inst.operand_count = 1;
        Ok(())
    }

    /// Decode a near relative branch operand at the operand size.
    fn decode_rel_near(&mut self) -> Result<()> {
        let sz = self.inst.operand_size;
        let rel = self.fetch_imm(sz)? as i32;
        self.set_operand(0, Operand::RelativeOffset(rel));
        self.inst.operand_count = 1;
        Ok(())
    }

    /// Build a memory operand for moffs addressing (direct absolute address).
    fn moffs_operand(&self, addr: u32, size: OperandSize) -> Operand {
        Operand::Memory(MemOperand {
            base: None,
            index: None,
            scale: 1,
            displacement: addr as i32,
            size,
        })
    }

    /// Store an operand at the given index.
    #[inline]
    fn set_operand(&mut self, idx: usize, op: Operand) {
        self.inst.operands[idx] = op;
    }
}

/// Count source for Group 2 shift/rotate forms.
#[derive(Clone, Copy)]
enum ShiftCount {
    Imm8,
    One,
    Cl,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlatMemory;

    fn mem_with(bytes: &[u8]) -> FlatMemory {
        let mut mem = FlatMemory::new(64);
        mem.load_at(0, bytes).unwrap();
        mem
    }

    #[test]
    fn nop() {
        let mem = mem_with(&[0x90]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 1);
        assert_eq!(inst.opcode, 0x90);
        assert_eq!(inst.operand_count, 0);
    }

    #[test]
    fn add_eax_imm32() {
        // ADD EAX, 0x12345678
        let mem = mem_with(&[0x05, 0x78, 0x56, 0x34, 0x12]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 5);
        assert_eq!(inst.operand_count, 2);
        assert_eq!(inst.immediate, 0x1234_5678);
    }

    #[test]
    fn operand_size_override() {
        // 66 05 34 12: ADD AX, 0x1234
        let mem = mem_with(&[0x66, 0x05, 0x34, 0x12]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 4);
        assert_eq!(inst.operand_size, OperandSize::Word);
        assert_eq!(inst.immediate, 0x1234);
    }

    #[test]
    fn modrm_register_direct() {
        // 01 D8: ADD EAX, EBX (r/m=EAX, reg=EBX)
        let mem = mem_with(&[0x01, 0xD8]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 2);
        match (inst.operands[0], inst.operands[1]) {
            (
                Operand::Register { index: 0, .. },
                Operand::Register { index: 3, .. },
            ) => {}
            other => panic!("unexpected operands: {:?}", other),
        }
    }

    #[test]
    fn modrm_sib_with_disp8() {
        // MOV EAX, [ECX + EDX*4 + 0x10]: 8B 44 91 10
        let mem = mem_with(&[0x8B, 0x44, 0x91, 0x10]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 4);
        match inst.operands[1] {
            Operand::Memory(ref m) => {
                assert_eq!(m.base, Some(1));
                assert_eq!(m.index, Some(2));
                assert_eq!(m.scale, 4);
                assert_eq!(m.displacement, 0x10);
            }
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn sib_no_base_disp32() {
        // MOV EAX, [EBX*2 + 0x1000]: 8B 04 5D 00 10 00 00
        let mem = mem_with(&[0x8B, 0x04, 0x5D, 0x00, 0x10, 0x00, 0x00]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 7);
        match inst.operands[1] {
            Operand::Memory(ref m) => {
                assert_eq!(m.base, None);
                assert_eq!(m.index, Some(3));
                assert_eq!(m.scale, 2);
                assert_eq!(m.displacement, 0x1000);
            }
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn absolute_disp32() {
        // MOV EAX, [0x2000]: 8B 05 00 20 00 00
        let mem = mem_with(&[0x8B, 0x05, 0x00, 0x20, 0x00, 0x00]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 6);
        match inst.operands[1] {
            Operand::Memory(ref m) => {
                assert_eq!(m.base, None);
                assert_eq!(m.index, None);
                assert_eq!(m.displacement, 0x2000);
            }
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn group1_imm8_sign_extends() {
        // 83 C0 FF: ADD EAX, -1
        let mem = mem_with(&[0x83, 0xC0, 0xFF]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 3);
        assert_eq!(inst.immediate, 0xFFFF_FFFF);
        assert_eq!(inst.modrm_reg(), 0);
    }

    #[test]
    fn two_byte_jcc_near() {
        // JZ near +0x100: 0F 84 00 01 00 00
        let mem = mem_with(&[0x0F, 0x84, 0x00, 0x01, 0x00, 0x00]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 6);
        assert_eq!(inst.opcode_map, OpcodeMap::Secondary);
        assert_eq!(inst.opcode, 0x0F84);
        match inst.operands[0] {
            Operand::RelativeOffset(off) => assert_eq!(off, 0x100),
            _ => panic!("expected relative offset"),
        }
    }

    #[test]
    fn movzx_records_source_width() {
        // MOVZX EAX, BYTE [ECX]: 0F B6 01
        let mem = mem_with(&[0x0F, 0xB6, 0x01]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 3);
        assert_eq!(inst.operands[1].size(), Some(OperandSize::Byte));
        assert_eq!(inst.operands[0].size(), Some(OperandSize::Dword));
    }

    #[test]
    fn rep_prefix_sticks_to_string_op() {
        // F3 A4: REP MOVSB
        let mem = mem_with(&[0xF3, 0xA4]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 2);
        assert_eq!(inst.rep, RepPrefix::Rep);
        assert_eq!(inst.opcode, 0xA4);
    }

    #[test]
    fn unknown_opcode_is_quiet_no_op() {
        // 0x0F 0xFF is outside the subset.
        let mem = mem_with(&[0x0F, 0xFF]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 2);
        assert_eq!(inst.operand_count, 0);
    }

    #[test]
    fn enter_has_two_immediates() {
        // ENTER 0x10, 0x00: C8 10 00 00
        let mem = mem_with(&[0xC8, 0x10, 0x00, 0x00]);
        let inst = decode(&mem, 0).unwrap();
        assert_eq!(inst.length, 4);
        assert_eq!(inst.immediate, 0x10);
        assert_eq!(inst.immediate2, 0);
    }
}
