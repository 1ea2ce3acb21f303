//! The narrow view of the host the executors get to see: the trapped thread's
//! registers and flags ([`FaultContext`]) and its address space ([`AddressSpace`]).

use self::exception::EmulationError;

pub mod exception {
    /// Anything that keeps a trapped instruction from being emulated.
    /// None of these are recoverable: resuming would corrupt the guest.
    #[derive(Debug, thiserror::Error)]
    pub enum EmulationError {
        #[error("unknown instruction {inst:#010x} at pc {pc:#x}, cannot emulate")]
        Unsupported { inst: u32, pc: u64 },
        #[error("unimplemented variant of {inst:#010x} at pc {pc:#x}: {detail}")]
        UnimplementedVariant {
            inst: u32,
            pc: u64,
            detail: &'static str,
        },
        /// Raised by an [`AddressSpace`](super::AddressSpace), which knows only the address.
        #[error("access fault at {addr:#x}")]
        AccessFault { addr: u64 },
        #[error("access fault at {addr:#x} by {inst:#010x} at pc {pc:#x}")]
        GuestAccess { inst: u32, pc: u64, addr: u64 },
        #[error("register file of the current thread is no longer available")]
        RegisterFileUnavailable,
    }
}

/// NZCV condition flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nzcv {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Nzcv {
    const N: u64 = 1 << 31;
    const Z: u64 = 1 << 30;
    const C: u64 = 1 << 29;
    const V: u64 = 1 << 28;

    pub fn from_pstate(pstate: u64) -> Self {
        Nzcv {
            n: pstate & Self::N != 0,
            z: pstate & Self::Z != 0,
            c: pstate & Self::C != 0,
            v: pstate & Self::V != 0,
        }
    }

    /// `pstate` with its NZCV bits replaced.
    pub fn apply(self, pstate: u64) -> u64 {
        let mut pstate = pstate & !(Self::N | Self::Z | Self::C | Self::V);
        for (flag, bit) in [(self.n, Self::N), (self.z, Self::Z), (self.c, Self::C), (self.v, Self::V)] {
            if flag {
                pstate |= bit;
            }
        }
        pstate
    }
}

/// Register state of the thread that raised the trap.
///
/// General purpose registers are X0-X30, the stack pointer is separate.
/// Whether register number 31 means XZR or SP is decided by the executors.
pub trait FaultContext {
    fn pc(&self) -> u64;
    fn set_pc(&mut self, pc: u64);

    /// The 32 bit instruction word at [`FaultContext::pc`].
    fn read_instruction(&self) -> u32;

    /// `idx` is in `0..=30`.
    fn xreg(&self, idx: u8) -> u64;
    fn set_xreg(&mut self, idx: u8, val: u64);

    fn sp(&self) -> u64;

    fn flags(&self) -> Nzcv;
    fn set_flags(&mut self, flags: Nzcv);
}

/// Memory as seen by the emulated loads and stores.
pub trait AddressSpace {
    fn read_word(&self, addr: u64) -> Result<u32, EmulationError>;
    fn write_word(&mut self, addr: u64, val: u32) -> Result<(), EmulationError>;
}

/// The faulting process' own memory, accessed through raw pointers.
///
/// Used from the signal handler, where the emulated accesses target the
/// same address space the handler runs in. A bad guest pointer faults just
/// like the native instruction would have.
#[derive(Debug, Default)]
pub struct HostMemory;

impl AddressSpace for HostMemory {
    fn read_word(&self, addr: u64) -> Result<u32, EmulationError> {
        if addr == 0 {
            return Err(EmulationError::AccessFault { addr });
        }
        // SAFETY: the guest asked for exactly this access.
        Ok(unsafe { std::ptr::read_unaligned(addr as usize as *const u32) })
    }

    fn write_word(&mut self, addr: u64, val: u32) -> Result<(), EmulationError> {
        if addr == 0 {
            return Err(EmulationError::AccessFault { addr });
        }
        // SAFETY: see `read_word`.
        unsafe { std::ptr::write_unaligned(addr as usize as *mut u32, val) };
        Ok(())
    }
}

#[test]
fn host_memory_test() {
    let mut buf = [0u32; 4];
    let base = buf.as_mut_ptr() as u64;
    let mut mem = HostMemory;

    mem.write_word(base + 4, 0x12_34_56_78)
        .expect("Write to live buffer failed");
    assert_eq!(mem.read_word(base + 4).expect("Read failed"), 0x12_34_56_78);
    assert!(matches!(
        mem.read_word(0),
        Err(EmulationError::AccessFault { addr: 0 })
    ));
    assert_eq!(buf[1], 0x12_34_56_78);
}

#[test]
fn nzcv_test() {
    let flags = Nzcv { n: true, z: false, c: true, v: false };
    let pstate = flags.apply(0x3000_03c5);
    assert_eq!(pstate, 0xa000_03c5);
    assert_eq!(Nzcv::from_pstate(pstate), flags);
    assert_eq!(Nzcv::default().apply(0xf000_0000), 0);
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("no illegal instruction handler for this host (needs linux on aarch64)")]
    UnsupportedHost,
    #[error("sigaction failed: {0}")]
    Sigaction(#[from] std::io::Error),
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
pub use self::linux::{install_handler, UContext};

#[cfg(not(all(target_os = "linux", target_arch = "aarch64")))]
pub fn install_handler() -> Result<(), InstallError> {
    Err(InstallError::UnsupportedHost)
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod linux {
    use super::{FaultContext, InstallError, Nzcv};

    /// [`FaultContext`] over the `mcontext_t` the kernel hands to a `SA_SIGINFO` handler.
    pub struct UContext<'a> {
        mcontext: &'a mut libc::mcontext_t,
    }

    impl<'a> UContext<'a> {
        /// # Safety
        /// `ucontext` must be the third argument of a running `SA_SIGINFO` handler.
        pub unsafe fn from_raw(ucontext: *mut libc::c_void) -> Self {
            let ucontext = &mut *(ucontext as *mut libc::ucontext_t);
            UContext {
                mcontext: &mut ucontext.uc_mcontext,
            }
        }
    }

    impl FaultContext for UContext<'_> {
        fn pc(&self) -> u64 {
            self.mcontext.pc
        }

        fn set_pc(&mut self, pc: u64) {
            self.mcontext.pc = pc;
        }

        fn read_instruction(&self) -> u32 {
            // SAFETY: the kernel just fetched this word to raise SIGILL.
            unsafe { std::ptr::read(self.mcontext.pc as usize as *const u32) }
        }

        fn xreg(&self, idx: u8) -> u64 {
            self.mcontext.regs[idx as usize]
        }

        fn set_xreg(&mut self, idx: u8, val: u64) {
            self.mcontext.regs[idx as usize] = val;
        }

        fn sp(&self) -> u64 {
            self.mcontext.sp
        }

        fn flags(&self) -> Nzcv {
            Nzcv::from_pstate(self.mcontext.pstate)
        }

        fn set_flags(&mut self, flags: Nzcv) {
            self.mcontext.pstate = flags.apply(self.mcontext.pstate);
        }
    }

    extern "C" fn on_sigill(
        signal: libc::c_int,
        _info: *mut libc::siginfo_t,
        ucontext: *mut libc::c_void,
    ) {
        debug_assert_eq!(signal, libc::SIGILL);
        // SAFETY: installed with SA_SIGINFO below.
        let mut context = unsafe { UContext::from_raw(ucontext) };
        crate::handle_fault(&mut context, &mut super::HostMemory);
    }

    /// Routes SIGILL of every thread to the emulator.
    pub fn install_handler() -> Result<(), InstallError> {
        // SAFETY: plain sigaction(2) with a zeroed, then filled in, struct.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_sigill as usize;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(libc::SIGILL, &action, std::ptr::null_mut()) == -1 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}
