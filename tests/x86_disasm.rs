//! Disassembler tests: the transcript format and the guarantee that
//! disassembly leaves machine state untouched.

use guestcpu::x86::Cpu;
use pretty_assertions::assert_eq;

const SPACE: usize = 1 << 20;

fn boot(code: &[u8]) -> Cpu {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut cpu = Cpu::new();
    cpu.program(SPACE, code).unwrap();
    cpu
}

#[test]
fn transcript_of_mov_add_sequence() {
    let cpu = boot(&[
        0xB8, 0x07, 0x00, 0x00, 0x00, // MOV EAX, 7
        0xBB, 0x05, 0x00, 0x00, 0x00, // MOV EBX, 5
        0x01, 0xD8, // ADD EAX, EBX
    ]);
    let text = cpu.disassemble(3).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("MOV EAX, 07"), "line: {}", lines[0]);
    assert!(lines[1].ends_with("MOV EBX, 05"), "line: {}", lines[1]);
    assert!(lines[2].ends_with("ADD EAX, EBX"), "line: {}", lines[2]);

    // Disassembly leaves the machine unperturbed.
    assert_eq!(cpu.regs.read_gpr32(0), 0);
    assert_eq!(cpu.regs.read_gpr32(3), 0);
    assert_eq!(cpu.regs.eip, 1024);
}

#[test]
fn line_carries_address_and_byte_block() {
    let cpu = boot(&[0xB8, 0x07, 0x00, 0x00, 0x00]);
    let text = cpu.disassemble(1).unwrap();
    // Address of the first instruction is the load offset (0x400).
    assert!(text.starts_with("00000400 : B8 07 00 00 00"), "text: {}", text);
    // The byte block is padded to 16 columns before the mnemonic.
    let after_colon = &text["00000400 : ".len()..];
    assert_eq!(&after_colon[16..17], " ");
}

#[test]
fn memory_operand_rendering() {
    // MOV EAX, [ECX + EDX*4 + 0x10]
    let cpu = boot(&[0x8B, 0x44, 0x91, 0x10]);
    let text = cpu.disassemble(1).unwrap();
    assert!(
        text.contains("MOV EAX, DWORD PTR [EDX*4+ECX+10]"),
        "text: {}",
        text
    );
}

#[test]
fn absolute_memory_operand_without_components() {
    // MOV EAX, moffs32 at 0
    let cpu = boot(&[0xA1, 0x00, 0x00, 0x00, 0x00]);
    let text = cpu.disassemble(1).unwrap();
    assert!(text.contains("MOV EAX, DWORD PTR [0]"), "text: {}", text);
}

#[test]
fn byte_width_operand_uses_byte_names() {
    // MOV AL, 0x42; MOV AH, 0x43
    let cpu = boot(&[0xB0, 0x42, 0xB4, 0x43]);
    let text = cpu.disassemble(2).unwrap();
    assert!(text.contains("MOV AL, 42"), "text: {}", text);
    assert!(text.contains("MOV AH, 43"), "text: {}", text);
}

#[test]
fn branch_renders_resolved_target() {
    // JE +2 at 0x400 (2 bytes) -> target 0x404
    let cpu = boot(&[0x74, 0x02]);
    let text = cpu.disassemble(1).unwrap();
    assert!(text.contains("JE 00000404"), "text: {}", text);
}

#[test]
fn unknown_encoding_renders_as_placeholder() {
    let cpu = boot(&[0x0F, 0xFF]);
    let text = cpu.disassemble(1).unwrap();
    assert!(text.contains("___"), "text: {}", text);
}

#[test]
fn group_opcodes_pick_sub_mnemonic() {
    // SHL EAX, 4 (C1 /4); DIV EBX (F7 /6); PUSH dword [EAX] (FF /6)
    let cpu = boot(&[0xC1, 0xE0, 0x04, 0xF7, 0xF3, 0xFF, 0x30]);
    let text = cpu.disassemble(3).unwrap();
    assert!(text.contains("SHL EAX, 04"), "text: {}", text);
    assert!(text.contains("DIV EBX"), "text: {}", text);
    assert!(text.contains("PUSH DWORD PTR [EAX]"), "text: {}", text);
}

#[test]
fn string_mnemonics_carry_width_suffix() {
    // MOVSB; MOVSD; STOSW (with 0x66)
    let cpu = boot(&[0xA4, 0xA5, 0x66, 0xAB]);
    let text = cpu.disassemble(3).unwrap();
    assert!(text.contains("MOVSB"), "text: {}", text);
    assert!(text.contains("MOVSD"), "text: {}", text);
    assert!(text.contains("STOSW"), "text: {}", text);
}
