//! Emulated SVE architectural state, one copy per host thread.

use std::cell::RefCell;

use crate::decode::ElementSize;

pub const VECTOR_REGISTERS: usize = 32;
pub const PREDICATE_REGISTERS: usize = 16;

/// Largest architecturally allowed vector length, in bytes (2048 bits).
pub const MAX_VECTOR_BYTES: usize = 256;

/// One predicate bit per byte lane of a vector register.
///
/// An element of size `n` is active if the bit at its first byte is set,
/// the remaining `n - 1` bits of the element are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    bits: [u64; MAX_VECTOR_BYTES / 64],
}

impl Predicate {
    pub fn get(&self, lane_byte: usize) -> bool {
        self.bits[lane_byte / 64] & (1 << (lane_byte % 64)) != 0
    }

    pub fn set(&mut self, lane_byte: usize, val: bool) {
        let word = &mut self.bits[lane_byte / 64];
        if val {
            *word |= 1 << (lane_byte % 64);
        } else {
            *word &= !(1 << (lane_byte % 64));
        }
    }

    pub fn clear(&mut self) {
        self.bits = [0; MAX_VECTOR_BYTES / 64];
    }

    /// Number of active elements of `size` among the first `vector_bytes` lanes.
    pub fn active_elements(&self, size: ElementSize, vector_bytes: usize) -> usize {
        (0..vector_bytes)
            .step_by(size.bytes())
            .filter(|&lane| self.get(lane))
            .count()
    }
}

/// Z0-Z31 and P0-P15 of one thread.
///
/// # INVARIANT
/// Every vector register is exactly `vector_bytes` long.
pub struct RegisterFile {
    vector_bytes: usize,
    z: [Box<[u8]>; VECTOR_REGISTERS],
    p: [Predicate; PREDICATE_REGISTERS],
}

impl RegisterFile {
    /// Zero initialised registers of `vector_bytes` bytes each.
    pub fn new(vector_bytes: usize) -> Self {
        assert!(
            vector_bytes > 0 && vector_bytes <= MAX_VECTOR_BYTES,
            "vector length out of range"
        );
        RegisterFile {
            vector_bytes,
            z: std::array::from_fn(|_| vec![0u8; vector_bytes].into_boxed_slice()),
            p: Default::default(),
        }
    }

    pub fn vector_bytes(&self) -> usize {
        self.vector_bytes
    }

    /// Elements of `size` per vector register.
    pub fn elements(&self, size: ElementSize) -> usize {
        self.vector_bytes / size.bytes()
    }

    pub fn z(&self, reg: u8) -> &[u8] {
        &self.z[reg as usize]
    }

    pub fn read_word(&self, reg: u8, lane: usize) -> u32 {
        let off = lane * 4;
        let b = &self.z[reg as usize][off..off + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn write_word(&mut self, reg: u8, lane: usize, val: u32) {
        let off = lane * 4;
        self.z[reg as usize][off..off + 4].copy_from_slice(&val.to_le_bytes());
    }

    pub fn read_single(&self, reg: u8, lane: usize) -> f32 {
        f32::from_bits(self.read_word(reg, lane))
    }

    pub fn write_single(&mut self, reg: u8, lane: usize, val: f32) {
        self.write_word(reg, lane, val.to_bits());
    }

    pub fn predicate(&self, reg: u8) -> &Predicate {
        &self.p[reg as usize]
    }

    pub fn predicate_mut(&mut self, reg: u8) -> &mut Predicate {
        &mut self.p[reg as usize]
    }

    pub fn predicate_get(&self, reg: u8, lane_byte: usize) -> bool {
        self.p[reg as usize].get(lane_byte)
    }

    pub fn predicate_set(&mut self, reg: u8, lane_byte: usize, val: bool) {
        self.p[reg as usize].set(lane_byte, val);
    }
}

thread_local! {
    static REGISTER_FILE: RefCell<Option<RegisterFile>> = const { RefCell::new(None) };
}

/// Allocates the calling thread's registers unless that already happened.
///
/// Returns `false` if the thread is tearing down its thread locals.
pub fn ensure_initialized_for_current_thread(vector_bytes: usize) -> bool {
    REGISTER_FILE
        .try_with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| {
                    log::debug!("allocating SVE registers ({vector_bytes} bytes each)");
                    RegisterFile::new(vector_bytes)
                });
        })
        .is_ok()
}

/// Runs `f` on the calling thread's registers, allocating them first if needed.
///
/// `None` if the thread locals are already destroyed.
pub fn with_current_thread<R>(
    vector_bytes: usize,
    f: impl FnOnce(&mut RegisterFile) -> R,
) -> Option<R> {
    REGISTER_FILE
        .try_with(|slot| {
            let mut slot = slot.borrow_mut();
            let registers = slot.get_or_insert_with(|| RegisterFile::new(vector_bytes));
            f(registers)
        })
        .ok()
}

/// Frees the calling thread's registers. Other threads keep theirs until they exit.
pub fn release_for_current_thread() {
    let _ = REGISTER_FILE.try_with(|slot| slot.borrow_mut().take());
}

pub fn is_initialized_for_current_thread() -> bool {
    REGISTER_FILE
        .try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

#[test]
fn predicate_test() {
    let mut p = Predicate::default();
    p.set(0, true);
    p.set(4, true);
    p.set(255, true);
    assert!(p.get(0) && p.get(4) && p.get(255));
    assert!(!p.get(1) && !p.get(64));
    assert_eq!(p.active_elements(ElementSize::Word, 256), 3);
    // bit 255 is not an element start for doublewords
    assert_eq!(p.active_elements(ElementSize::Doubleword, 256), 1);
    p.set(4, false);
    assert!(!p.get(4));
    p.clear();
    assert_eq!(p, Predicate::default());
}

#[test]
fn register_file_test() {
    let mut regs = RegisterFile::new(128);
    assert_eq!(regs.elements(ElementSize::Word), 32);
    assert!(regs.z(31).iter().all(|&b| b == 0));

    regs.write_word(3, 31, 0x12_34_56_78);
    assert_eq!(regs.z(3)[124..128], [0x78, 0x56, 0x34, 0x12]);
    regs.write_single(4, 0, 1.5);
    assert_eq!(regs.read_single(4, 0), 1.5);

    regs.predicate_set(15, 8, true);
    assert!(regs.predicate_get(15, 8));
    assert!(!regs.predicate(14).get(8));
}

#[test]
fn thread_local_lifecycle() {
    std::thread::spawn(|| {
        assert!(!is_initialized_for_current_thread());
        assert!(ensure_initialized_for_current_thread(64));
        with_current_thread(64, |regs| regs.write_word(0, 0, 7));
        // Idempotent: the second call keeps the existing contents.
        assert!(ensure_initialized_for_current_thread(64));
        assert_eq!(with_current_thread(64, |regs| regs.read_word(0, 0)), Some(7));

        // Other threads get their own zeroed copy.
        std::thread::spawn(|| {
            assert_eq!(with_current_thread(64, |regs| regs.read_word(0, 0)), Some(0));
        })
        .join()
        .unwrap();

        release_for_current_thread();
        assert!(!is_initialized_for_current_thread());
    })
    .join()
    .unwrap();
}
