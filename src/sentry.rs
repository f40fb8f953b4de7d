//! Process-global fault sentry.
//!
//! Guest memory faults are already converted into [`VmError`] values at the
//! memory layer, so the unwind path is ordinary error propagation. What
//! remains of the sentry is its process-global nature: only one CPU instance
//! may be inside a guarded run at a time. `RunGuard` acquires the slot and
//! releases it on drop along every exit path.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, VmError};

static RUNNING: AtomicBool = AtomicBool::new(false);

/// Exclusive token for the process-wide run slot.
pub struct RunGuard {
    _priv: (),
}

impl RunGuard {
    /// Acquire the run slot, or report [`VmError::EngineBusy`] if another
    /// CPU instance currently holds it.
    pub fn acquire() -> Result<RunGuard> {
        if RUNNING
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(RunGuard { _priv: () })
        } else {
            Err(VmError::EngineBusy)
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUNNING.store(false, Ordering::Release);
    }
}
