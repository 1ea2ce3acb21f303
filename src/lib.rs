//! User space emulation of a small SVE subset for cores without SVE.
//!
//! Loaded into a process (usually through `LD_PRELOAD`), the library catches
//! the SIGILL raised by an SVE instruction, executes it against a per thread
//! software register file and resumes the thread after it.
//!
//! https://developer.arm.com/documentation/ddi0487/latest
//!

pub mod config;
pub mod decode;
pub mod execute;
pub mod platform;
pub mod registers;
pub mod stats;

use config::Config;
use execute::Emulator;
use platform::exception::EmulationError;
use platform::{AddressSpace, FaultContext};

/// Emulates the instruction `context` trapped on, using the calling thread's
/// registers and the process wide configuration and counters.
pub fn emulate<C: FaultContext, M: AddressSpace>(
    context: &mut C,
    memory: &mut M,
) -> Result<decode::Opcode, EmulationError> {
    let vector_bytes = Config::global().vector_bytes();
    registers::with_current_thread(vector_bytes, |registers| {
        Emulator {
            context,
            memory,
            registers,
            stats: &stats::GLOBAL,
        }
        .execute_instruction()
    })
    .ok_or(EmulationError::RegisterFileUnavailable)?
}

/// Entry point of the illegal instruction handler. Never returns on failure.
pub fn handle_fault<C: FaultContext, M: AddressSpace>(context: &mut C, memory: &mut M) {
    if let Err(err) = emulate(context, memory) {
        fatal(&err);
    }
}

/// Reports an emulation failure and aborts the process.
pub fn fatal(err: &EmulationError) -> ! {
    eprintln!("sve-emulator: {err}");
    std::process::abort();
}

/// Process start: validate the configuration, set up the calling thread's
/// registers and route SIGILL to the emulator.
///
/// Exits the process with status 1 on an invalid configuration.
pub fn startup() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::new().filter_or(config::LOG_ENV, "warn"),
    )
    .format_timestamp(None)
    .try_init();

    let config = match Config::from_env() {
        Ok(config) => config.install(),
        Err(err) => {
            eprintln!("sve-emulator: {err}");
            std::process::exit(1);
        }
    };
    log::debug!("vector length {} bits", config.vector_bits);

    registers::ensure_initialized_for_current_thread(config.vector_bytes());

    match platform::install_handler() {
        Ok(()) => log::debug!("SIGILL handler installed"),
        Err(err @ platform::InstallError::UnsupportedHost) => log::warn!("{err}"),
        Err(err) => {
            eprintln!("sve-emulator: {err}");
            std::process::exit(1);
        }
    }
}

/// Process exit: optionally report the counters, then free the calling
/// thread's registers. Registers of threads still running are not reclaimed.
pub fn shutdown() {
    let config = Config::global();
    if config.report_stats {
        let snapshot = stats::GLOBAL.snapshot();
        eprintln!(
            "sve-emulator: vector length {} bits, {} instructions emulated, {} lanes added",
            config.vector_bits, snapshot.instructions, snapshot.lanes_added
        );
    }
    registers::release_for_current_thread();
}

#[cfg(feature = "preload")]
mod preload {
    #[ctor::ctor]
    fn init() {
        super::startup();
    }

    #[ctor::dtor]
    fn fini() {
        super::shutdown();
    }
}
