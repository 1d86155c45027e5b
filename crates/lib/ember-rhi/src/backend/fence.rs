use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::RhiError;

/// A monotonically increasing completion counter.
///
/// All CPU/GPU lifetime synchronization goes through fence values; there is
/// deliberately no other cross-device synchronization primitive.
pub struct Fence {
    completed: Mutex<u64>,
    condvar: Condvar,
}

impl Fence {
    pub(crate) fn new(initial_value: u64) -> Self {
        Self {
            completed: Mutex::new(initial_value),
            condvar: Condvar::new(),
        }
    }

    pub fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    /// Advance the completed value. Values never move backwards.
    pub fn signal(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.condvar.notify_all();
        }
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.condvar.wait(&mut completed);
        }
    }

    /// Block until the fence reaches `value`, or fail with `DeviceLost` after
    /// `timeout`. A device removal or driver crash manifests as a fence that
    /// never advances, so an unbounded wait would hang forever.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> Result<(), RhiError> {
        let started = Instant::now();
        let deadline = started + timeout;

        let mut completed = self.completed.lock();
        while *completed < value {
            if self.condvar.wait_until(&mut completed, deadline).timed_out() {
                return Err(RhiError::DeviceLost {
                    value,
                    waited: started.elapsed(),
                });
            }
        }
        Ok(())
    }
}
