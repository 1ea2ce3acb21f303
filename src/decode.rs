//! Field extraction and the encoding table for the emulated SVE subset.
//!
//! Arm ARM, chapter C8 (SVE instruction encodings).

use num_enum::TryFromPrimitive;

/// Extracts bits `hi..=lo` of `raw`, right aligned.
pub fn bits(raw: u32, hi: u32, lo: u32) -> u32 {
    (raw >> lo) & ((1 << (hi - lo + 1)) - 1)
}

/// Two's complement sign extension of the low `width` bits of `value`.
pub fn sign_extend(value: u32, width: u32) -> i64 {
    let m = 1i64 << (width - 1);
    let value = (value as i64) & ((1i64 << width) - 1);
    (value ^ m) - m
}

/// Maps the two bit `size` field to the element width in bytes.
pub fn size_from_encoding(raw_size: u32) -> usize {
    ElementSize::from_encoding(raw_size).bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ElementSize {
    Byte = 0b00,
    Halfword = 0b01,
    Word = 0b10,
    Doubleword = 0b11,
}

impl ElementSize {
    pub fn from_encoding(raw_size: u32) -> Self {
        match Self::try_from((raw_size & 0b11) as u8) {
            Ok(size) => size,
            Err(_) => unreachable!("size should only be 2 bits"),
        }
    }

    pub fn bytes(self) -> usize {
        1 << self as usize
    }
}

/// Predicate constraint patterns (`pattern` field of PTRUE, CNTx, ...).
/// Values missing here are unallocated `#uimm5` encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PredicatePattern {
    Pow2 = 0x00,
    Vl1 = 0x01,
    Vl2 = 0x02,
    Vl3 = 0x03,
    Vl4 = 0x04,
    Vl5 = 0x05,
    Vl6 = 0x06,
    Vl7 = 0x07,
    Vl8 = 0x08,
    Vl16 = 0x09,
    Vl32 = 0x0a,
    Vl64 = 0x0b,
    Vl128 = 0x0c,
    Vl256 = 0x0d,
    Mul4 = 0x1d,
    Mul3 = 0x1e,
    All = 0x1f,
}

/// `CNTB`, `CNTH`, `CNTW`, `CNTD`
pub(crate) struct CountType {
    pub rd: u8,
    pub pattern: u8,
    /// Multiplier, already incremented (encoded as `imm4 - 1`).
    pub multiplier: u32,
    pub size: ElementSize,
}

impl From<u32> for CountType {
    fn from(instr: u32) -> CountType {
        CountType {
            rd: bits(instr, 4, 0) as u8,
            pattern: bits(instr, 9, 5) as u8,
            multiplier: bits(instr, 19, 16) + 1,
            size: ElementSize::from_encoding(bits(instr, 23, 22)),
        }
    }
}

/// `PTRUE`, `PTRUES`
pub(crate) struct PtrueType {
    pub pd: u8,
    pub pattern: u8,
    pub set_flags: bool,
    pub size: ElementSize,
}

impl From<u32> for PtrueType {
    fn from(instr: u32) -> PtrueType {
        PtrueType {
            pd: bits(instr, 3, 0) as u8,
            pattern: bits(instr, 9, 5) as u8,
            set_flags: bits(instr, 16, 16) == 1,
            size: ElementSize::from_encoding(bits(instr, 23, 22)),
        }
    }
}

/// `WHILELT`, `WHILELO`
pub(crate) struct WhileType {
    pub pd: u8,
    pub rn: u8,
    pub rm: u8,
    /// Operands are `Xn` rather than `Wn`.
    pub wide: bool,
    pub unsigned: bool,
    pub size: ElementSize,
}

impl From<u32> for WhileType {
    fn from(instr: u32) -> WhileType {
        WhileType {
            pd: bits(instr, 3, 0) as u8,
            rn: bits(instr, 9, 5) as u8,
            rm: bits(instr, 20, 16) as u8,
            wide: bits(instr, 12, 12) == 1,
            unsigned: bits(instr, 11, 11) == 1,
            size: ElementSize::from_encoding(bits(instr, 23, 22)),
        }
    }
}

/// Contiguous load/store, scalar plus immediate.
pub(crate) struct MemImmType {
    pub zt: u8,
    pub rn: u8,
    pub pg: u8,
    /// Signed, in multiples of the vector length.
    pub imm: i64,
    /// Bits 22:21, only meaningful for stores.
    pub size: u8,
}

impl From<u32> for MemImmType {
    fn from(instr: u32) -> MemImmType {
        MemImmType {
            zt: bits(instr, 4, 0) as u8,
            rn: bits(instr, 9, 5) as u8,
            pg: bits(instr, 12, 10) as u8,
            imm: sign_extend(bits(instr, 19, 16), 4),
            size: bits(instr, 22, 21) as u8,
        }
    }
}

/// Contiguous load/store, scalar plus scalar.
pub(crate) struct MemRegType {
    pub zt: u8,
    pub rn: u8,
    pub rm: u8,
    pub pg: u8,
    /// Bits 22:21, only meaningful for stores.
    pub size: u8,
}

impl From<u32> for MemRegType {
    fn from(instr: u32) -> MemRegType {
        MemRegType {
            zt: bits(instr, 4, 0) as u8,
            rn: bits(instr, 9, 5) as u8,
            rm: bits(instr, 20, 16) as u8,
            pg: bits(instr, 12, 10) as u8,
            size: bits(instr, 22, 21) as u8,
        }
    }
}

/// Three register vector operation (`FADD` unpredicated).
pub(crate) struct VecType {
    pub zd: u8,
    pub zn: u8,
    pub zm: u8,
    pub size: ElementSize,
}

impl From<u32> for VecType {
    fn from(instr: u32) -> VecType {
        VecType {
            zd: bits(instr, 4, 0) as u8,
            zn: bits(instr, 9, 5) as u8,
            zm: bits(instr, 20, 16) as u8,
            size: ElementSize::from_encoding(bits(instr, 23, 22)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Cnt,
    Ptrue,
    While,
    Ld1wImm,
    Ld1wReg,
    St1wImm,
    St1wReg,
    FaddUnpred,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Cnt => "cnt",
            Opcode::Ptrue => "ptrue",
            Opcode::While => "while",
            Opcode::Ld1wImm => "ld1w (scalar plus immediate)",
            Opcode::Ld1wReg => "ld1w (scalar plus scalar)",
            Opcode::St1wImm => "st1w (scalar plus immediate)",
            Opcode::St1wReg => "st1w (scalar plus scalar)",
            Opcode::FaddUnpred => "fadd (vectors, unpredicated)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Encoding {
    pub mask: u32,
    pub bits: u32,
    pub opcode: Opcode,
}

impl Encoding {
    pub fn matches(&self, instr: u32) -> bool {
        instr & self.mask == self.bits
    }
}

/// Recognised encodings, in matching priority order.
pub const ENCODINGS: [Encoding; 8] = [
    // CNT{B,H,W,D} Xd, ALL, MUL #1
    Encoding { mask: 0xff3f_ffe0, bits: 0x0420_e3e0, opcode: Opcode::Cnt },
    // PTRUE{S} Pd.T, pattern
    Encoding { mask: 0xff3e_fc10, bits: 0x2518_e000, opcode: Opcode::Ptrue },
    // WHILE{LT,LO} Pd.T, Rn, Rm
    Encoding { mask: 0xff20_e410, bits: 0x2520_0400, opcode: Opcode::While },
    // LD1W {Zt.S}, Pg/Z, [Xn|SP, #imm, MUL VL]
    Encoding { mask: 0xfff0_e000, bits: 0xa540_a000, opcode: Opcode::Ld1wImm },
    // LD1W {Zt.S}, Pg/Z, [Xn|SP, Xm, LSL #2]
    Encoding { mask: 0xffe0_e000, bits: 0xa540_4000, opcode: Opcode::Ld1wReg },
    // FADD Zd.T, Zn.T, Zm.T
    Encoding { mask: 0xff20_fc00, bits: 0x6500_0000, opcode: Opcode::FaddUnpred },
    // ST1W {Zt.T}, Pg, [Xn|SP, #imm, MUL VL]
    Encoding { mask: 0xff90_e000, bits: 0xe500_e000, opcode: Opcode::St1wImm },
    // ST1W {Zt.T}, Pg, [Xn|SP, Xm, LSL #2]
    Encoding { mask: 0xff80_e000, bits: 0xe500_4000, opcode: Opcode::St1wReg },
];

/// First table entry matching `instr`, if any.
pub fn decode(instr: u32) -> Option<Opcode> {
    ENCODINGS
        .iter()
        .find(|encoding| encoding.matches(instr))
        .map(|encoding| encoding.opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_helpers() {
        assert_eq!(bits(0xa543_4020, 20, 16), 3);
        assert_eq!(bits(0xa543_4020, 9, 5), 1);
        assert_eq!(sign_extend(0b0111, 4), 7);
        assert_eq!(sign_extend(0b1000, 4), -8);
        assert_eq!(sign_extend(0b1111, 4), -1);
        assert_eq!(sign_extend(0xffff_fff0, 4), 0);
        assert_eq!(
            [0, 1, 2, 3].map(size_from_encoding),
            [1, 2, 4, 8]
        );
    }

    #[test]
    fn table_entries_are_well_formed() {
        for encoding in ENCODINGS {
            assert_eq!(
                encoding.bits & !encoding.mask,
                0,
                "{:?} has bits outside its mask",
                encoding.opcode
            );
        }
    }

    #[test]
    fn table_entries_never_overlap() {
        for (i, a) in ENCODINGS.iter().enumerate() {
            for b in &ENCODINGS[i + 1..] {
                assert_ne!(
                    (a.bits ^ b.bits) & (a.mask & b.mask),
                    0,
                    "{:?} and {:?} can match the same word",
                    a.opcode,
                    b.opcode
                );
            }
        }
    }

    #[test]
    fn decodes_compiler_output() {
        // Words as emitted by GCC for a `whilelo`-driven float add loop.
        assert_eq!(decode(0x04a0_e3e4), Some(Opcode::Cnt)); // cntw x4
        assert_eq!(decode(0x2598_e3e0), Some(Opcode::Ptrue)); // ptrue p0.s
        assert_eq!(decode(0x25a0_1fe0), Some(Opcode::While)); // whilelo p0.s, xzr, x0
        assert_eq!(decode(0xa543_4020), Some(Opcode::Ld1wReg)); // ld1w z0.s, p0/z, [x1, x3, lsl #2]
        assert_eq!(decode(0xa540_a020), Some(Opcode::Ld1wImm)); // ld1w z0.s, p0/z, [x1]
        assert_eq!(decode(0x6581_0000), Some(Opcode::FaddUnpred)); // fadd z0.s, z0.s, z1.s
        assert_eq!(decode(0xe543_4020), Some(Opcode::St1wReg)); // st1w z0.s, p0, [x1, x3, lsl #2]
        assert_eq!(decode(0xe540_e020), Some(Opcode::St1wImm)); // st1w z0.s, p0, [x1]
    }

    #[test]
    fn rejects_other_words() {
        // cntw x4, vl4 and cntw x4, all, mul #2 are deliberately not matched
        assert_eq!(decode(0x04a0_e084), None);
        assert_eq!(decode(0x04a1_e3e4), None);
        // whilele p0.s, x3, x0
        assert_eq!(decode(0x25a0_1470), None);
        // nop, ret
        assert_eq!(decode(0xd503_201f), None);
        assert_eq!(decode(0xd65f_03c0), None);
        assert_eq!(decode(0), None);
    }

    #[test]
    fn operand_fields() {
        let instr: WhileType = 0x25a0_1c60.into(); // whilelo p0.s, x3, x0
        assert_eq!((instr.pd, instr.rn, instr.rm), (0, 3, 0));
        assert!(instr.wide && instr.unsigned);
        assert_eq!(instr.size, ElementSize::Word);

        let instr: MemImmType = 0xa54f_a462.into(); // ld1w z2.s, p1/z, [x3, #-1, mul vl]
        assert_eq!((instr.zt, instr.rn, instr.pg, instr.imm), (2, 3, 1, -1));

        let instr: CountType = 0x04e0_e3e5.into(); // cntd x5
        assert_eq!((instr.rd, instr.multiplier), (5, 1));
        assert_eq!(instr.size, ElementSize::Doubleword);
        assert!(matches!(
            PredicatePattern::try_from(instr.pattern),
            Ok(PredicatePattern::All)
        ));
    }
}
