use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One-shot gate, typically handed to an observer's close callback so the
/// caller can wait for teardown to finish.
#[derive(Default)]
pub struct Latch {
    opened: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let mut opened = self.opened.lock().expect("latch lock poisoned");
        *opened = true;
        self.signal.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.opened.lock().expect("latch lock poisoned")
    }

    /// Block until the latch opens.
    pub fn wait(&self) {
        let mut opened = self.opened.lock().expect("latch lock poisoned");
        while !*opened {
            opened = self.signal.wait(opened).expect("latch lock poisoned");
        }
    }

    /// Block until the latch opens or `timeout` elapses. Returns whether
    /// the latch is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut opened = self.opened.lock().expect("latch lock poisoned");
        while !*opened {
            let (guard, result) = self
                .signal
                .wait_timeout(opened, timeout)
                .expect("latch lock poisoned");
            opened = guard;
            if result.timed_out() {
                return *opened;
            }
        }
        true
    }
}
