//! End-to-end RISC-V execution tests.
//!
//! Guest programs are assembled by the small encoder helpers below and
//! run to completion (or stepped with `issue`) on RV32 and RV64 harts.

use std::sync::Mutex;

use guestcpu::riscv::cpu::{FFLAG_DZ, FFLAG_NV};
use guestcpu::riscv::{Cpu, EnvHandler, NopEnv, Xlen};
use guestcpu::{ExitReason, MemoryBus};
use pretty_assertions::assert_eq;

/// `run` is serialized process-wide by the sentry; tests that use it take
/// this lock so parallel test threads do not observe `EngineBusy`.
static RUN_LOCK: Mutex<()> = Mutex::new(());

// ── Instruction encoders ──

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm as u32) & 0xFFF) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 5 & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1F) << 7 | 0b010_0011
}

fn b_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 12 & 1) << 31
        | (imm >> 5 & 0x3F) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | (imm >> 1 & 0xF) << 8
        | (imm >> 11 & 1) << 7
        | 0b110_0011
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, 0b001_0011)
}

fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b000, rd, 0b011_0011)
}

fn lui(rd: u32, imm20: u32) -> u32 {
    imm20 << 12 | rd << 7 | 0b011_0111
}

fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b000)
}

fn jal(rd: u32, offset: i32) -> u32 {
    let imm = offset as u32;
    (imm >> 20 & 1) << 31
        | (imm >> 1 & 0x3FF) << 21
        | (imm >> 11 & 1) << 20
        | (imm >> 12 & 0xFF) << 12
        | rd << 7
        | 0b110_1111
}

fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0b010)
}

fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b010, rd, 0b000_0011)
}

fn muldiv(funct3: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0b000_0001, rs2, rs1, funct3, rd, 0b011_0011)
}

fn lr_w(rd: u32, rs1: u32) -> u32 {
    r_type(0b00010 << 2, 0, rs1, 0b010, rd, 0b010_1111)
}

fn sc_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    r_type(0b00011 << 2, rs2, rs1, 0b010, rd, 0b010_1111)
}

fn amo_w(funct5: u32, rd: u32, rs2: u32, rs1: u32) -> u32 {
    r_type(funct5 << 2, rs2, rs1, 0b010, rd, 0b010_1111)
}

fn op_fp(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32) -> u32 {
    r_type(funct7, rs2, rs1, funct3, rd, 0b101_0011)
}

fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b010, rd, 0b111_0011)
}

fn ecall() -> u32 {
    0b111_0011
}

fn ebreak() -> u32 {
    1 << 20 | 0b111_0011
}

fn image(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn run_program(xlen: Xlen, words: &[u32]) -> Cpu {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut cpu = Cpu::new(xlen);
    cpu.program(&image(words)).unwrap();
    let _lock = RUN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(cpu.run(&mut NopEnv), ExitReason::Completed);
    cpu
}

// ── Base integer ──

#[test]
fn addi_add_accumulates() {
    let cpu = run_program(
        Xlen::Rv32,
        &[addi(1, 0, 7), addi(2, 0, 5), add(3, 1, 2)],
    );
    assert_eq!(cpu.reg(1), 7);
    assert_eq!(cpu.reg(2), 5);
    assert_eq!(cpu.reg(3), 12);
    assert_eq!(cpu.pc, 12);
}

#[test]
fn taken_branch_skips_instruction() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            addi(1, 0, 3),
            beq(1, 1, 8),
            addi(1, 0, 99), // skipped
            addi(2, 0, 4),
        ],
    );
    assert_eq!(cpu.reg(1), 3);
    assert_eq!(cpu.reg(2), 4);
}

#[test]
fn x0_stays_zero() {
    let cpu = run_program(Xlen::Rv32, &[addi(0, 0, 5), add(0, 0, 0)]);
    assert_eq!(cpu.reg(0), 0);
}

#[test]
fn beq_to_self_does_not_advance() {
    let mut cpu = Cpu::new(Xlen::Rv32);
    cpu.program(&image(&[beq(0, 0, 0)])).unwrap();
    for _ in 0..4 {
        cpu.issue(&mut NopEnv).unwrap();
        assert_eq!(cpu.pc, 0);
    }
}

#[test]
fn jal_links_and_jumps() {
    // jal x1, +8 over a skipped addi.
    let cpu = run_program(
        Xlen::Rv32,
        &[jal(1, 8), addi(2, 0, 99), addi(3, 0, 1)],
    );
    assert_eq!(cpu.reg(1), 4); // link = pc + 4
    assert_eq!(cpu.reg(2), 0);
    assert_eq!(cpu.reg(3), 1);
}

#[test]
fn jalr_masks_target_low_bit() {
    // x1 = 9 (odd); jalr x2, 0(x1) -> target 8.
    let mut cpu = Cpu::new(Xlen::Rv32);
    cpu.program(&image(&[
        addi(1, 0, 9),
        i_type(0, 1, 0b000, 2, 0b110_0111), // jalr x2, 0(x1)
        addi(3, 0, 7),                      // at 8: executed after the jump
    ]))
    .unwrap();
    let _lock = RUN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(cpu.run(&mut NopEnv), ExitReason::Completed);
    assert_eq!(cpu.reg(2), 8);
    assert_eq!(cpu.reg(3), 7);
}

#[test]
fn load_store_round_trip() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1), // x10 = 0x1000
            addi(1, 0, -2),
            sw(1, 10, 0),
            lw(3, 10, 0),
        ],
    );
    assert_eq!(cpu.reg(3), 0xFFFF_FFFE);
    assert_eq!(cpu.memory.read_u32(0x1000).unwrap(), 0xFFFF_FFFE);
}

// ── M extension ──

#[test]
fn division_by_zero_is_defined() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            addi(5, 0, 7),
            muldiv(0b100, 6, 5, 0), // div x6, x5, x0
            muldiv(0b110, 7, 5, 0), // rem x7, x5, x0
        ],
    );
    assert_eq!(cpu.reg(6), 0xFFFF_FFFF); // quotient -1
    assert_eq!(cpu.reg(7), 7); // remainder = dividend
}

#[test]
fn signed_division_overflow_is_defined() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(1, 0x80000), // x1 = INT_MIN
            addi(2, 0, -1),
            muldiv(0b100, 3, 1, 2), // div
            muldiv(0b110, 4, 1, 2), // rem
        ],
    );
    assert_eq!(cpu.reg(3), 0x8000_0000); // quotient INT_MIN
    assert_eq!(cpu.reg(4), 0); // remainder 0
}

#[test]
fn mulh_returns_upper_half() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(1, 0x80000),        // INT_MIN
            muldiv(0b001, 3, 1, 1), // mulh x3, x1, x1
            muldiv(0b011, 4, 1, 1), // mulhu x4, x1, x1
        ],
    );
    assert_eq!(cpu.reg(3), 0x4000_0000); // (-2^31)^2 >> 32
    assert_eq!(cpu.reg(4), 0x4000_0000);
}

// ── A extension ──

#[test]
fn lr_sc_succeeds_without_intervening_store() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1),     // x10 = 0x1000 (word reads as 0)
            lr_w(1, 10),    // x1 = 0
            addi(2, 1, 1),  // x2 = 1
            sc_w(3, 2, 10), // success: store, x3 = 0
        ],
    );
    assert_eq!(cpu.reg(3), 0);
    assert_eq!(cpu.memory.read_u32(0x1000).unwrap(), 1);
}

#[test]
fn sc_without_reservation_fails() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1),
            addi(2, 0, 5),
            sc_w(3, 2, 10), // no prior LR
        ],
    );
    assert_eq!(cpu.reg(3), 1);
    assert_eq!(cpu.memory.read_u32(0x1000).unwrap(), 0);
}

#[test]
fn intervening_store_kills_reservation() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1),
            lr_w(1, 10),
            sw(0, 10, 0),   // store to the reserved address
            sc_w(3, 1, 10), // must fail
        ],
    );
    assert_eq!(cpu.reg(3), 1);
}

#[test]
fn amoadd_returns_old_value() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1),
            addi(1, 0, 5),
            sw(1, 10, 0),
            addi(2, 0, 3),
            amo_w(0b00000, 3, 2, 10), // amoadd.w x3, x2, (x10)
        ],
    );
    assert_eq!(cpu.reg(3), 5);
    assert_eq!(cpu.memory.read_u32(0x1000).unwrap(), 8);
}

#[test]
fn amomax_picks_signed_maximum() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(10, 1),
            addi(1, 0, -5),
            sw(1, 10, 0),
            addi(2, 0, 3),
            amo_w(0b10100, 3, 2, 10), // amomax.w
        ],
    );
    assert_eq!(cpu.memory.read_u32(0x1000).unwrap(), 3);
}

// ── Environment hooks ──

struct CountingEnv {
    calls: u32,
    breaks: u32,
}

impl EnvHandler for CountingEnv {
    fn environment_call(&mut self, cpu: &mut Cpu) {
        self.calls += 1;
        // Syscall-style result in a0.
        cpu.write_reg(10, 0x55);
    }

    fn environment_breakpoint(&mut self, _cpu: &mut Cpu) {
        self.breaks += 1;
    }
}

#[test]
fn ecall_and_ebreak_reach_the_host() {
    let mut cpu = Cpu::new(Xlen::Rv32);
    cpu.program(&image(&[ecall(), ebreak(), addi(1, 0, 1)])).unwrap();
    let mut env = CountingEnv { calls: 0, breaks: 0 };
    let _lock = RUN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(cpu.run(&mut env), ExitReason::Completed);
    assert_eq!(env.calls, 1);
    assert_eq!(env.breaks, 1);
    assert_eq!(cpu.reg(10), 0x55);
    assert_eq!(cpu.reg(1), 1); // execution continued past both
}

// ── F extension and CSRs ──

#[test]
fn fp_add_round_trips_through_conversions() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            addi(1, 0, 3),
            op_fp(0b110_1000, 0, 1, 0, 1), // fcvt.s.w f1, x1
            addi(2, 0, 4),
            op_fp(0b110_1000, 0, 2, 0, 2), // fcvt.s.w f2, x2
            op_fp(0b000_0000, 2, 1, 0, 3), // fadd.s f3, f1, f2
            op_fp(0b110_0000, 0, 3, 0, 3), // fcvt.w.s x3, f3
        ],
    );
    assert_eq!(cpu.reg(3), 7);
    // 3.0 + 4.0 is exact: no sticky flags.
    assert_eq!(cpu.fcsr & 0x1F, 0);
}

#[test]
fn fp_divide_by_zero_sets_sticky_flag() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            addi(1, 0, 1),
            op_fp(0b110_1000, 0, 1, 0, 1), // fcvt.s.w f1, x1
            op_fp(0b110_1000, 0, 0, 0, 2), // fcvt.s.w f2, x0 (0.0)
            op_fp(0b000_1100, 2, 1, 0, 3), // fdiv.s f3, f1, f2
            csrrs(5, 0x001, 0),            // read fflags
        ],
    );
    assert_ne!(cpu.fcsr & FFLAG_DZ, 0);
    assert_ne!(cpu.reg(5) as u32 & FFLAG_DZ, 0);
}

#[test]
fn fmin_orders_negative_zero_below_positive_zero() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            lui(1, 0x80000),               // 0x80000000 = -0.0 bits
            op_fp(0b111_1000, 0, 1, 0, 1), // fmv.w.x f1, x1
            op_fp(0b110_1000, 0, 0, 0, 2), // fcvt.s.w f2, x0 (+0.0)
            op_fp(0b001_0100, 2, 1, 0, 3), // fmin.s f3, f1, f2
            op_fp(0b111_0000, 0, 3, 0, 5), // fmv.x.w x5, f3
        ],
    );
    assert_eq!(cpu.reg(5), 0x8000_0000); // -0.0 selected
    assert_eq!(cpu.fcsr & FFLAG_NV, 0);
}

#[test]
fn fclass_reports_positive_zero() {
    let cpu = run_program(
        Xlen::Rv32,
        &[
            op_fp(0b110_1000, 0, 0, 0, 1), // fcvt.s.w f1, x0
            op_fp(0b111_0000, 0, 1, 1, 5), // fclass.s x5, f1
        ],
    );
    assert_eq!(cpu.reg(5), 1 << 4);
}

#[test]
fn fcvt_truncates_toward_zero_when_asked() {
    // 7 / 2 = 3.5; fcvt.w.s with RTZ (rm=001) -> 3, inexact.
    let cpu = run_program(
        Xlen::Rv32,
        &[
            addi(1, 0, 7),
            op_fp(0b110_1000, 0, 1, 0, 1), // fcvt.s.w f1, x1
            addi(2, 0, 2),
            op_fp(0b110_1000, 0, 2, 0, 2), // fcvt.s.w f2, x2
            op_fp(0b000_1100, 2, 1, 0, 3), // fdiv.s f3, f1, f2
            op_fp(0b110_0000, 0, 3, 1, 3), // fcvt.w.s x3, f3, rtz
        ],
    );
    assert_eq!(cpu.reg(3), 3);
    assert_ne!(cpu.fcsr & 1, 0); // NX accrued by the conversion
}

#[test]
fn csr_write_and_read_back() {
    // csrrwi fcsr rounding mode: set frm = 1 (RTZ) via csrrwi frm, 1.
    let cpu = run_program(
        Xlen::Rv32,
        &[
            i_type(0x002, 1, 0b101, 5, 0b111_0011), // csrrwi x5, frm, 1
            csrrs(6, 0x002, 0),                     // csrrs x6, frm, x0
        ],
    );
    assert_eq!(cpu.reg(5), 0); // old value
    assert_eq!(cpu.reg(6), 1); // written value
    assert_eq!(cpu.frm(), 1);
}

// ── RV64 ──

#[test]
fn rv64_word_ops_sign_extend() {
    let cpu = run_program(
        Xlen::Rv64,
        &[
            lui(1, 0x7FFFF),                        // x1 = 0x7FFFF000
            i_type(0xFFF, 1, 0b000, 1, 0b001_0011), // addi x1, x1, -1 -> 0x7FFFEFFF
            i_type(1, 1, 0b000, 2, 0b001_1011),     // addiw x2, x1, 1
            r_type(0, 1, 1, 0b000, 3, 0b011_1011),  // addw x3, x1, x1
        ],
    );
    assert_eq!(cpu.reg(2), 0x7FFF_F000);
    // 0x7FFFEFFF + 0x7FFFEFFF overflows the word and sign-extends.
    assert_eq!(cpu.reg(3), 0xFFFF_FFFF_FFFF_DFFE);
}

#[test]
fn rv64_ld_sd_round_trip() {
    let cpu = run_program(
        Xlen::Rv64,
        &[
            lui(10, 1),
            addi(1, 0, -1),                     // x1 = all ones
            s_type(0, 1, 10, 0b011),            // sd x1, 0(x10)
            i_type(0, 10, 0b011, 3, 0b000_0011), // ld x3, 0(x10)
        ],
    );
    assert_eq!(cpu.reg(3), u64::MAX);
}

#[test]
fn compressed_length_class_advances_by_two() {
    let mut cpu = Cpu::new(Xlen::Rv32);
    // A halfword with low bits != 11 is a compressed encoding: recognized
    // for length only.
    cpu.program(&[0x01, 0x00, 0x01, 0x00]).unwrap();
    cpu.issue(&mut NopEnv).unwrap();
    assert_eq!(cpu.pc, 2);
    cpu.issue(&mut NopEnv).unwrap();
    assert_eq!(cpu.pc, 4);
}

#[test]
fn unknown_encoding_is_a_hint_no_op() {
    // Major opcode 1010111 (vector territory) is not implemented: HINT.
    let mut cpu = Cpu::new(Xlen::Rv32);
    cpu.program(&image(&[0b101_0111, addi(1, 0, 2)])).unwrap();
    cpu.issue(&mut NopEnv).unwrap();
    assert_eq!(cpu.pc, 4);
    cpu.issue(&mut NopEnv).unwrap();
    assert_eq!(cpu.reg(1), 2);
}
