//! x86 text disassembler.
//!
//! Shares the decode pass with the execute path but never mutates CPU
//! state: the decoder is pure and the formatter only reads the instruction
//! bytes, so register and flag state are untouched by construction.
//!
//! Output format, one line per instruction:
//!
//! ```text
//! 00000400 : B8 07 00 00 00   MOV EAX, 07
//! ```
//!
//! The hex byte block is padded to 16 columns. Immediates render in hex,
//! zero-padded to the smallest of 2/4/8 digits; registers use the width
//! name tables; memory operands render as `DWORD PTR [index*scale+base+disp]`
//! with `[0]` when no component remains. Encodings outside the implemented
//! subset render as `___`.

use std::fmt::Write as _;

use crate::error::Result;
use crate::x86::cpu::Cpu;
use crate::x86::decoder;
use crate::x86::flags::OperandSize;
use crate::x86::instruction::{DecodedInst, OpcodeMap, Operand};

const REG8: [&str; 8] = ["AL", "CL", "DL", "BL", "AH", "CH", "DH", "BH"];
const REG16: [&str; 8] = ["AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI"];
const REG32: [&str; 8] = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI"];

const GROUP1: [&str; 8] = ["ADD", "OR", "ADC", "SBB", "AND", "SUB", "XOR", "CMP"];
const GROUP2: [&str; 8] = ["ROL", "ROR", "RCL", "RCR", "SHL", "SHR", "SAL", "SAR"];
const GROUP3: [&str; 8] = ["TEST", "TEST", "NOT", "NEG", "MUL", "IMUL", "DIV", "IDIV"];
const GROUP5: [&str; 8] = ["INC", "DEC", "CALL", "___", "JMP", "___", "PUSH", "___"];
const GROUP8: [&str; 8] = ["___", "___", "___", "___", "BT", "BTS", "BTR", "BTC"];

impl Cpu {
    /// Produce a textual transcript of the next `count` instructions
    /// starting at the current EIP, without advancing any state.
    pub fn disassemble(&self, count: usize) -> Result<String> {
        let mut out = String::new();
        let mut eip = self.regs.eip;
        for _ in 0..count {
            let inst = decoder::decode(&self.memory, eip)?;
            format_line(&mut out, &self.memory, eip, &inst)?;
            eip = eip.wrapping_add(inst.length as u32);
        }
        Ok(out)
    }
}

fn format_line(
    out: &mut String,
    memory: &crate::memory::FlatMemory,
    eip: u32,
    inst: &DecodedInst,
) -> Result<()> {
    use crate::memory::MemoryBus;

    let mut bytes = String::new();
    for i in 0..inst.length {
        let b = memory.read_u8(eip as u64 + i as u64)?;
        if i > 0 {
            bytes.push(' ');
        }
        let _ = write!(bytes, "{:02X}", b);
    }

    let _ = write!(out, "{:08X} : {:<16} {}", eip, bytes, mnemonic(inst));
    for (i, op) in inst.operands.iter().take(inst.operand_count as usize).enumerate() {
        if i == 0 {
            out.push(' ');
        } else {
            out.push_str(", ");
        }
        out.push_str(&format_operand(eip, inst, op));
    }
    out.push('\n');
    Ok(())
}

/// Suffix a string-op mnemonic with its element width.
fn string_mnemonic(base: &str, inst: &DecodedInst) -> &'static str {
    let wide = (inst.opcode & 1) != 0;
    let size = if !wide {
        OperandSize::Byte
    } else {
        inst.operand_size
    };
    match (base, size) {
        ("MOVS", OperandSize::Byte) => "MOVSB",
        ("MOVS", OperandSize::Word) => "MOVSW",
        ("MOVS", OperandSize::Dword) => "MOVSD",
        ("CMPS", OperandSize::Byte) => "CMPSB",
        ("CMPS", OperandSize::Word) => "CMPSW",
        ("CMPS", OperandSize::Dword) => "CMPSD",
        ("STOS", OperandSize::Byte) => "STOSB",
        ("STOS", OperandSize::Word) => "STOSW",
        ("STOS", OperandSize::Dword) => "STOSD",
        ("LODS", OperandSize::Byte) => "LODSB",
        ("LODS", OperandSize::Word) => "LODSW",
        ("LODS", OperandSize::Dword) => "LODSD",
        ("SCAS", OperandSize::Byte) => "SCASB",
        ("SCAS", OperandSize::Word) => "SCASW",
        _ => "SCASD",
    }
}

/// Mnemonic for a decoded instruction, including group sub-opcodes.
fn mnemonic(inst: &DecodedInst) -> &'static str {
    let reg = inst.modrm_reg() as usize;
    match inst.opcode_map {
        OpcodeMap::Primary => {
            let op = inst.opcode as u8;
            match op {
                0x00..=0x05 => "ADD",
                0x08..=0x0D => "OR",
                0x10..=0x15 => "ADC",
                0x18..=0x1D => "SBB",
                0x20..=0x25 => "AND",
                0x28..=0x2D => "SUB",
                0x30..=0x35 => "XOR",
                0x38..=0x3D => "CMP",
                0x40..=0x47 => "INC",
                0x48..=0x4F => "DEC",
                0x50..=0x57 | 0x68 | 0x6A => "PUSH",
                0x58..=0x5F | 0x8F => "POP",
                0x60 => "PUSHA",
                0x61 => "POPA",
                0x69 | 0x6B => "IMUL",
                0x70..=0x7F => jcc_name(op & 0x0F),
                0x80..=0x83 => GROUP1[reg],
                0x84 | 0x85 | 0xA8 | 0xA9 => "TEST",
                0x86 | 0x87 | 0x91..=0x97 => "XCHG",
                0x88..=0x8B | 0xA0..=0xA3 | 0xB0..=0xBF | 0xC6 | 0xC7 => "MOV",
                0x8D => "LEA",
                0x90 => "NOP",
                0x98 => {
                    if inst.operand_size == OperandSize::Word {
                        "CBW"
                    } else {
                        "CWDE"
                    }
                }
                0x99 => {
                    if inst.operand_size == OperandSize::Word {
                        "CWD"
                    } else {
                        "CDQ"
                    }
                }
                0x9C => "PUSHF",
                0x9D => "POPF",
                0x9E => "SAHF",
                0x9F => "LAHF",
                0xA4 | 0xA5 => string_mnemonic("MOVS", inst),
                0xA6 | 0xA7 => string_mnemonic("CMPS", inst),
                0xAA | 0xAB => string_mnemonic("STOS", inst),
                0xAC | 0xAD => string_mnemonic("LODS", inst),
                0xAE | 0xAF => string_mnemonic("SCAS", inst),
                0xC0 | 0xC1 | 0xD0..=0xD3 => GROUP2[reg],
                0xC2 | 0xC3 => "RET",
                0xC8 => "ENTER",
                0xC9 => "LEAVE",
                0xCC => "INT3",
                0xCD => "INT",
                0xD7 => "XLAT",
                0xE0 => "LOOPNE",
                0xE1 => "LOOPE",
                0xE2 => "LOOP",
                0xE3 => "JECXZ",
                0xE8 => "CALL",
                0xE9 | 0xEB => "JMP",
                0xF4 => "HLT",
                0xF5 => "CMC",
                0xF6 | 0xF7 => GROUP3[reg],
                0xF8 => "CLC",
                0xF9 => "STC",
                0xFA => "CLI",
                0xFB => "STI",
                0xFC => "CLD",
                0xFD => "STD",
                0xFE => ["INC", "DEC", "___", "___", "___", "___", "___", "___"][reg],
                0xFF => GROUP5[reg],
                _ => "___",
            }
        }
        OpcodeMap::Secondary => {
            let op = inst.opcode as u8;
            match op {
                0x80..=0x8F => jcc_name(op & 0x0F),
                0x90..=0x9F => setcc_name(op & 0x0F),
                0xA3 => "BT",
                0xA4 | 0xA5 => "SHLD",
                0xAB => "BTS",
                0xAC | 0xAD => "SHRD",
                0xAF => "IMUL",
                0xB3 => "BTR",
                0xB6 | 0xB7 => "MOVZX",
                0xBA => GROUP8[reg],
                0xBB => "BTC",
                0xBC => "BSF",
                0xBD => "BSR",
                0xBE | 0xBF => "MOVSX",
                0xC8..=0xCF => "BSWAP",
                _ => "___",
            }
        }
    }
}

fn jcc_name(cc: u8) -> &'static str {
    const NAMES: [&str; 16] = [
        "JO", "JNO", "JB", "JAE", "JE", "JNE", "JBE", "JA", "JS", "JNS", "JP", "JNP", "JL",
        "JGE", "JLE", "JG",
    ];
    NAMES[cc as usize]
}

fn setcc_name(cc: u8) -> &'static str {
    const NAMES: [&str; 16] = [
        "SETO", "SETNO", "SETB", "SETAE", "SETE", "SETNE", "SETBE", "SETA", "SETS", "SETNS",
        "SETP", "SETNP", "SETL", "SETGE", "SETLE", "SETG",
    ];
    NAMES[cc as usize]
}

/// Render an immediate in hex, zero-padded to the smallest of 2/4/8 digits.
fn hex_imm(val: u32) -> String {
    if val <= 0xFF {
        format!("{:02X}", val)
    } else if val <= 0xFFFF {
        format!("{:04X}", val)
    } else {
        format!("{:08X}", val)
    }
}

fn reg_name(index: u8, size: OperandSize) -> &'static str {
    match size {
        OperandSize::Byte => REG8[index as usize & 7],
        OperandSize::Word => REG16[index as usize & 7],
        OperandSize::Dword => REG32[index as usize & 7],
    }
}

fn format_operand(eip: u32, inst: &DecodedInst, op: &Operand) -> String {
    match op {
        Operand::None => String::new(),
        Operand::Immediate(v) => hex_imm(*v),
        Operand::Register { index, size } => reg_name(*index, *size).to_string(),
        Operand::RelativeOffset(rel) => {
            let target = eip
                .wrapping_add(inst.length as u32)
                .wrapping_add(*rel as u32);
            format!("{:08X}", target)
        }
        Operand::Memory(m) => {
            let ptr = match m.size {
                OperandSize::Byte => "BYTE PTR",
                OperandSize::Word => "WORD PTR",
                OperandSize::Dword => "DWORD PTR",
            };
            let mut parts: Vec<String> = Vec::new();
            if let Some(index) = m.index {
                if m.scale > 1 {
                    parts.push(format!("{}*{}", REG32[index as usize & 7], m.scale));
                } else {
                    parts.push(REG32[index as usize & 7].to_string());
                }
            }
            if let Some(base) = m.base {
                parts.push(REG32[base as usize & 7].to_string());
            }
            if m.displacement != 0 {
                parts.push(hex_imm(m.displacement as u32));
            }
            if parts.is_empty() {
                format!("{} [0]", ptr)
            } else {
                format!("{} [{}]", ptr, parts.join("+"))
            }
        }
    }
}
