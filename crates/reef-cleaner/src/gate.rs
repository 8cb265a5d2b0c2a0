//! Admission control for foreground writers.
//!
//! A writer reserves its projected usage before persisting and releases the
//! reservation as the bytes become accounted (or the write aborts). When the
//! journal or the reclaimable space falls behind its hard limit, the
//! reservation suspends until GC catches up. Wakeups coalesce through the
//! condvar: any number of signals between waits collapse into one
//! re-evaluation.

use asupersync::Cx;
use reef_error::{CleanerError, Result};
use tracing::debug;

use crate::policy::ScorePolicy;
use crate::{cx_checkpoint, Cleaner};

impl<P: ScorePolicy> Cleaner<P> {
    /// Reserve `bytes` of projected usage, suspending while GC is behind its
    /// hard limits. Resolves once the reservation is recorded; shutdown
    /// releases suspended callers with [`CleanerError::ShuttingDown`].
    ///
    /// The write pipeline admits at most one in-flight reservation;
    /// violating that would lose wakeups and is asserted.
    pub fn reserve_projected_usage(&self, cx: &Cx, bytes: u64) -> Result<()> {
        cx_checkpoint(cx)?;
        let mut state = self.state.lock();
        assert!(state.init_complete, "reservation before init completed");
        assert!(
            !state.reservation_pending,
            "pipeline admitted a second in-flight reservation"
        );
        state.stats.io_count += 1;

        let blocked_on_trim = state.should_block_on_trim(&self.config);
        let blocked_on_reclaim = state.should_block_on_reclaim(&self.config);
        let is_blocked = blocked_on_trim || blocked_on_reclaim;
        if blocked_on_trim {
            state.stats.io_blocked_count_trim += 1;
        }
        if blocked_on_reclaim {
            state.stats.io_blocked_count_reclaim += 1;
        }
        if is_blocked {
            state.stats.io_blocking_num += 1;
            state.stats.io_blocked_count += 1;
            state.stats.io_blocked_sum += state.stats.io_blocking_num;
            debug!(bytes, blocked_on_trim, blocked_on_reclaim, "write blocked on gc");
        }

        state.reservation_pending = true;
        while state.should_block_on_gc(&self.config) {
            if self.is_stopping() {
                state.reservation_pending = false;
                if is_blocked {
                    state.stats.io_blocking_num -= 1;
                }
                return Err(CleanerError::ShuttingDown);
            }
            self.io_wake.wait(&mut state);
        }
        state.reservation_pending = false;

        state.stats.projected_used_bytes += bytes;
        state.stats.projected_count += 1;
        state.stats.projected_used_bytes_sum += state.stats.projected_used_bytes;
        if is_blocked {
            state.stats.io_blocking_num -= 1;
        }
        Ok(())
    }

    /// Return a reservation as its bytes become accounted (or the write
    /// aborts), and wake the gate.
    pub fn release_projected_usage(&self, bytes: u64) {
        let mut state = self.state.lock();
        assert!(state.init_complete, "release before init completed");
        assert!(
            state.stats.projected_used_bytes >= bytes,
            "projected usage underflow: releasing {bytes}"
        );
        state.stats.projected_used_bytes -= bytes;
        drop(state);
        self.io_wake.notify_all();
    }

    /// Whether a reservation would currently suspend.
    #[must_use]
    pub fn should_block_on_gc(&self) -> bool {
        self.state.lock().should_block_on_gc(&self.config)
    }
}
