use crate::decode::{
    self, CountType, ElementSize, MemImmType, MemRegType, Opcode, PredicatePattern, PtrueType,
    VecType, WhileType,
};
use crate::platform::exception::EmulationError;
use crate::platform::{AddressSpace, FaultContext, Nzcv};
use crate::registers::RegisterFile;
use crate::stats::Statistics;

/// Width of every A64 instruction.
pub const INSTRUCTION_BYTES: u64 = 4;

/// Everything one trapped instruction may touch: the faulting thread's
/// context, memory, its SVE registers and the shared counters.
pub struct Emulator<'a, C: FaultContext, M: AddressSpace> {
    pub context: &'a mut C,
    pub memory: &'a mut M,
    pub registers: &'a mut RegisterFile,
    pub stats: &'a Statistics,
}

impl<'a, C: FaultContext, M: AddressSpace> Emulator<'a, C, M> {
    /// Decodes and executes the instruction at the context's PC, then steps
    /// the PC past it.
    ///
    /// Backed by `execute_xxx` functions that take the decoded operands. On
    /// error nothing is counted and the PC is left on the faulting instruction.
    pub fn execute_instruction(&mut self) -> Result<Opcode, EmulationError> {
        let pc = self.context.pc();
        let instruction = self.context.read_instruction();

        let opcode = decode::decode(instruction).ok_or(EmulationError::Unsupported {
            inst: instruction,
            pc,
        })?;
        log::trace!("{pc:#x}: {instruction:#010x} {}", opcode.mnemonic());

        self.dispatch(opcode, instruction).map_err(|err| match err {
            EmulationError::AccessFault { addr } => EmulationError::GuestAccess {
                inst: instruction,
                pc,
                addr,
            },
            err => err,
        })?;

        self.stats.record_instruction();
        self.context.set_pc(pc.wrapping_add(INSTRUCTION_BYTES));
        Ok(opcode)
    }

    fn dispatch(&mut self, opcode: Opcode, instruction: u32) -> Result<(), EmulationError> {
        match opcode {
            Opcode::Cnt => self.execute_cnt(instruction.into()),
            Opcode::Ptrue => self.execute_ptrue(instruction, instruction.into())?,
            Opcode::While => self.execute_while(instruction.into()),
            Opcode::Ld1wImm => self.execute_ld1w_imm(instruction.into())?,
            Opcode::Ld1wReg => self.execute_ld1w_reg(instruction, instruction.into())?,
            Opcode::St1wImm => self.execute_st1w_imm(instruction, instruction.into())?,
            Opcode::St1wReg => self.execute_st1w_reg(instruction, instruction.into())?,
            Opcode::FaddUnpred => self.execute_fadd_unpred(instruction, instruction.into())?,
        }
        Ok(())
    }

    fn unimplemented(&self, inst: u32, detail: &'static str) -> EmulationError {
        EmulationError::UnimplementedVariant {
            inst,
            pc: self.context.pc(),
            detail,
        }
    }

    /// Register 31 reads as zero (XZR/WZR).
    fn xreg_or_zero(&self, idx: u8) -> u64 {
        if idx == 31 {
            0
        } else {
            self.context.xreg(idx)
        }
    }

    /// Register 31 is the stack pointer (base registers).
    fn xreg_or_sp(&self, idx: u8) -> u64 {
        if idx == 31 {
            self.context.sp()
        } else {
            self.context.xreg(idx)
        }
    }

    /// Writes to register 31 (XZR) are discarded.
    fn set_xreg(&mut self, idx: u8, val: u64) {
        if idx != 31 {
            self.context.set_xreg(idx, val);
        }
    }

    /// Only `pattern = ALL, mul #1`, guaranteed by the encoding mask.
    fn execute_cnt(&mut self, instr: CountType) {
        debug_assert_eq!(instr.pattern, PredicatePattern::All as u8);
        debug_assert_eq!(instr.multiplier, 1);
        let count = self.registers.elements(instr.size) as u64 * instr.multiplier as u64;
        self.set_xreg(instr.rd, count);
    }

    fn execute_ptrue(&mut self, inst: u32, instr: PtrueType) -> Result<(), EmulationError> {
        match PredicatePattern::try_from(instr.pattern) {
            Ok(PredicatePattern::All) => {}
            Ok(_) => return Err(self.unimplemented(inst, "ptrue with a pattern other than ALL")),
            Err(_) => return Err(self.unimplemented(inst, "ptrue with an unallocated pattern")),
        }

        let size = instr.size.bytes();
        let vector_bytes = self.registers.vector_bytes();
        let pred = self.registers.predicate_mut(instr.pd);
        pred.clear();
        for lane in (0..vector_bytes).step_by(size) {
            pred.set(lane, true);
        }

        if instr.set_flags {
            // First active, some active, last active.
            self.context.set_flags(Nzcv { n: true, z: false, c: false, v: false });
        }
        Ok(())
    }

    /// `WHILELT` / `WHILELO`: element `e` is active while `op1 + e < op2` held
    /// for every element before it.
    fn execute_while(&mut self, instr: WhileType) {
        let widen = |raw: u64| -> i128 {
            match (instr.wide, instr.unsigned) {
                (true, false) => raw as i64 as i128,
                (true, true) => raw as i128,
                (false, false) => raw as u32 as i32 as i128,
                (false, true) => raw as u32 as i128,
            }
        };
        let counter = widen(self.xreg_or_zero(instr.rn));
        let bound = widen(self.xreg_or_zero(instr.rm));

        let size = instr.size.bytes();
        let elements = self.registers.elements(instr.size);
        let pred = self.registers.predicate_mut(instr.pd);
        pred.clear();

        let mut active = true;
        for e in 0..elements {
            active = active && counter + (e as i128) < bound;
            pred.set(e * size, active);
        }

        let first = pred.get(0);
        let last = pred.get((elements - 1) * size);
        let any = pred.active_elements(instr.size, elements * size) > 0;
        self.context.set_flags(Nzcv {
            n: first,
            z: !any,
            c: !last,
            v: false,
        });
    }

    fn load_words(&mut self, zt: u8, pg: u8, start: u64) -> Result<(), EmulationError> {
        for lane in 0..self.registers.elements(ElementSize::Word) {
            if !self.registers.predicate_get(pg, lane * 4) {
                continue;
            }
            let addr = start.wrapping_add(lane as u64 * 4);
            let val = self.memory.read_word(addr)?;
            self.registers.write_word(zt, lane, val);
        }
        Ok(())
    }

    fn store_words(&mut self, zt: u8, pg: u8, start: u64) -> Result<(), EmulationError> {
        for lane in 0..self.registers.elements(ElementSize::Word) {
            if !self.registers.predicate_get(pg, lane * 4) {
                continue;
            }
            let addr = start.wrapping_add(lane as u64 * 4);
            self.memory.write_word(addr, self.registers.read_word(zt, lane))?;
        }
        Ok(())
    }

    /// Start address of `[Xn|SP, #imm, MUL VL]`.
    fn imm_address(&self, rn: u8, imm: i64) -> u64 {
        let offset = imm * self.registers.vector_bytes() as i64;
        self.xreg_or_sp(rn).wrapping_add(offset as u64)
    }

    /// Start address of `[Xn|SP, Xm, LSL #2]`.
    fn reg_address(&self, inst: u32, rn: u8, rm: u8) -> Result<u64, EmulationError> {
        if rm == 31 {
            return Err(self.unimplemented(inst, "scalar plus scalar with Xm = XZR"));
        }
        let index = self.context.xreg(rm);
        Ok(self.xreg_or_sp(rn).wrapping_add(index << 2))
    }

    // Loads merge: inactive lanes keep their value.
    fn execute_ld1w_imm(&mut self, instr: MemImmType) -> Result<(), EmulationError> {
        let start = self.imm_address(instr.rn, instr.imm);
        self.load_words(instr.zt, instr.pg, start)
    }

    fn execute_ld1w_reg(&mut self, inst: u32, instr: MemRegType) -> Result<(), EmulationError> {
        let start = self.reg_address(inst, instr.rn, instr.rm)?;
        self.load_words(instr.zt, instr.pg, start)
    }

    fn execute_st1w_imm(&mut self, inst: u32, instr: MemImmType) -> Result<(), EmulationError> {
        if instr.size != ElementSize::Word as u8 {
            return Err(self.unimplemented(inst, "st1w only with 32 bit elements"));
        }
        let start = self.imm_address(instr.rn, instr.imm);
        self.store_words(instr.zt, instr.pg, start)
    }

    fn execute_st1w_reg(&mut self, inst: u32, instr: MemRegType) -> Result<(), EmulationError> {
        if instr.size != ElementSize::Word as u8 {
            return Err(self.unimplemented(inst, "st1w only with 32 bit elements"));
        }
        let start = self.reg_address(inst, instr.rn, instr.rm)?;
        self.store_words(instr.zt, instr.pg, start)
    }

    fn execute_fadd_unpred(&mut self, inst: u32, instr: VecType) -> Result<(), EmulationError> {
        if instr.size != ElementSize::Word {
            return Err(self.unimplemented(inst, "fadd only for single precision"));
        }
        let lanes = self.registers.elements(ElementSize::Word);
        for lane in 0..lanes {
            let sum =
                self.registers.read_single(instr.zn, lane) + self.registers.read_single(instr.zm, lane);
            self.registers.write_single(instr.zd, lane, sum);
        }
        self.stats.record_lanes_added(lanes as u64);
        Ok(())
    }
}
