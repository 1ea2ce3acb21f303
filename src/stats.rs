use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every thread that traps into the emulator.
#[derive(Debug, Default)]
pub struct Statistics {
    instructions: AtomicU64,
    lanes_added: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub instructions: u64,
    pub lanes_added: u64,
}

impl Statistics {
    pub const fn new() -> Self {
        Statistics {
            instructions: AtomicU64::new(0),
            lanes_added: AtomicU64::new(0),
        }
    }

    pub fn record_instruction(&self) {
        self.instructions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lanes_added(&self, lanes: u64) {
        self.lanes_added.fetch_add(lanes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            instructions: self.instructions.load(Ordering::Relaxed),
            lanes_added: self.lanes_added.load(Ordering::Relaxed),
        }
    }
}

/// The counters the signal handler updates.
pub static GLOBAL: Statistics = Statistics::new();

#[test]
fn concurrent_increments() {
    let stats = Statistics::new();
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    stats.record_instruction();
                    stats.record_lanes_added(4);
                }
            });
        }
    });
    assert_eq!(
        stats.snapshot(),
        Snapshot {
            instructions: 8000,
            lanes_added: 32000
        }
    );
}
