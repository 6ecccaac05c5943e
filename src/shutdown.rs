use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// A process-wide "keep running" flag, shared by the collector loop, the
/// particulate acquisition thread, and the MQTT event loop thread.
#[derive(Clone, Debug)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
}

impl Shutdown {
    /// How often interruptible sleeps wake up to check the flag.
    const POLL: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, waking early if shutdown is triggered.
    ///
    /// Returns `true` if the process should keep running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO && self.is_running() {
            let sleep_time = remaining.min(Self::POLL);
            thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
        self.is_running()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
