#![allow(dead_code)]

use sve_emulator::decode::Opcode;
use sve_emulator::execute::Emulator;
use sve_emulator::platform::exception::EmulationError;
use sve_emulator::platform::{FaultContext, HostMemory, Nzcv};
use sve_emulator::registers::RegisterFile;
use sve_emulator::stats::Statistics;

pub const CODE_BASE: u64 = 0x40_0000;

/// A trapped thread whose next instruction is whatever was last handed to `step`.
#[derive(Debug, Default)]
pub struct TestContext {
    pub pc: u64,
    pub inst: u32,
    pub regs: [u64; 31],
    pub sp: u64,
    pub flags: Nzcv,
}

impl TestContext {
    pub fn new() -> Self {
        TestContext {
            pc: CODE_BASE,
            ..Default::default()
        }
    }
}

impl FaultContext for TestContext {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn read_instruction(&self) -> u32 {
        self.inst
    }

    fn xreg(&self, idx: u8) -> u64 {
        self.regs[idx as usize]
    }

    fn set_xreg(&mut self, idx: u8, val: u64) {
        self.regs[idx as usize] = val;
    }

    fn sp(&self) -> u64 {
        self.sp
    }

    fn flags(&self) -> Nzcv {
        self.flags
    }

    fn set_flags(&mut self, flags: Nzcv) {
        self.flags = flags;
    }
}

/// Guest thread with its own register file, running against real host memory.
pub struct Guest<'s> {
    pub context: TestContext,
    pub registers: RegisterFile,
    pub stats: &'s Statistics,
}

impl<'s> Guest<'s> {
    pub fn new(vector_bits: usize, stats: &'s Statistics) -> Self {
        Guest {
            context: TestContext::new(),
            registers: RegisterFile::new(vector_bits / 8),
            stats,
        }
    }

    pub fn step(&mut self, inst: u32) -> Result<Opcode, EmulationError> {
        self.context.inst = inst;
        Emulator {
            context: &mut self.context,
            memory: &mut HostMemory,
            registers: &mut self.registers,
            stats: self.stats,
        }
        .execute_instruction()
    }
}

// Encoders for the supported subset. `size` is the raw two bit field
// (0 = b, 1 = h, 2 = s, 3 = d).

pub fn cnt(size: u32, rd: u32) -> u32 {
    0x0420_e3e0 | size << 22 | rd
}

pub fn ptrue(size: u32, pd: u32) -> u32 {
    0x2518_e3e0 | size << 22 | pd
}

pub fn whilelo(size: u32, pd: u32, rn: u32, rm: u32) -> u32 {
    0x2520_1c00 | size << 22 | rm << 16 | rn << 5 | pd
}

pub fn whilelt(size: u32, pd: u32, rn: u32, rm: u32) -> u32 {
    0x2520_1400 | size << 22 | rm << 16 | rn << 5 | pd
}

/// `ld1w {zt.s}, pg/z, [xn, xm, lsl #2]`
pub fn ld1w_reg(zt: u32, pg: u32, rn: u32, rm: u32) -> u32 {
    0xa540_4000 | rm << 16 | pg << 10 | rn << 5 | zt
}

/// `st1w {zt.s}, pg, [xn, xm, lsl #2]`
pub fn st1w_reg(zt: u32, pg: u32, rn: u32, rm: u32) -> u32 {
    0xe540_4000 | rm << 16 | pg << 10 | rn << 5 | zt
}

/// `fadd zd.s, zn.s, zm.s`
pub fn fadd_s(zd: u32, zn: u32, zm: u32) -> u32 {
    0x6580_0000 | zm << 16 | zn << 5 | zd
}

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}
