//! The GC driver: a single background thread that trims journal tails and
//! reclaims closed segments, one bounded unit of work per cycle.
//!
//! Each tick picks the highest-priority applicable action (trim-alloc, then
//! trim-dirty, then reclaim), performs exactly one cycle of it, and loops.
//! With nothing to do it waits on a condition signalled by writers and by
//! journal-tail movement. Collaborator errors reaching the loop are fatal:
//! the driver cannot continue with accounting it no longer trusts.

use asupersync::Cx;
use reef_error::Result;
use reef_types::{ModifyTime, PhysicalAddr, ReclaimCursor, ReclaimGeneration, SegmentId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::CleanerConfig;
use crate::policy::ScorePolicy;
use crate::traits::{repeat_on_conflict, BackrefEntry, TransactionKind};
use crate::{Cleaner, CleanerState};

/// Observable driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Stopped = 0,
    WaitingForWork = 1,
    Running = 2,
}

impl DriverPhase {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Stopped,
            1 => Self::WaitingForWork,
            2 => Self::Running,
            _ => unreachable!("invalid driver phase {raw}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcAction {
    TrimAlloc,
    TrimDirty,
    Reclaim,
}

/// Handle for the running GC thread. `Cleaner::stop` sets the stop flag,
/// wakes the loop, and joins through this handle.
pub(crate) struct GcDriver {
    join: Option<JoinHandle<()>>,
}

impl GcDriver {
    pub(crate) fn spawn<P: ScorePolicy>(cleaner: Arc<Cleaner<P>>) -> Self {
        let join = thread::Builder::new()
            .name("reef-gc".to_owned())
            .spawn(move || {
                // Long-lived context for background cycles.
                let cx = Cx::for_testing();
                cleaner.gc_loop(&cx);
            })
            .expect("spawning the gc thread");
        Self { join: Some(join) }
    }

    pub(crate) fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl CleanerState {
    pub(crate) fn next_gc_action(&self, config: &CleanerConfig) -> Option<GcAction> {
        if !self.init_complete {
            return None;
        }
        if self.should_trim_alloc(config) {
            Some(GcAction::TrimAlloc)
        } else if self.should_trim_dirty(config) {
            Some(GcAction::TrimDirty)
        } else if self.should_reclaim_space(config) {
            Some(GcAction::Reclaim)
        } else {
            None
        }
    }
}

impl<P: ScorePolicy> Cleaner<P> {
    pub(crate) fn gc_loop(&self, cx: &Cx) {
        loop {
            if self.is_stopping() {
                break;
            }
            self.log_gc_state("gc_loop");
            let action = { self.state.lock().next_gc_action(&self.config) };
            match action {
                Some(action) => {
                    self.set_phase(DriverPhase::Running);
                    if let Err(err) = self.run_gc_action(cx, action) {
                        panic!("gc {action:?} hit an unrecoverable error: {err}");
                    }
                    self.publish_metrics();
                }
                None => {
                    let mut state = self.state.lock();
                    if !self.is_stopping() && state.next_gc_action(&self.config).is_none() {
                        self.set_phase(DriverPhase::WaitingForWork);
                        self.gc_wake.wait(&mut state);
                    }
                }
            }
        }
        self.set_phase(DriverPhase::Stopped);
        info!("gc driver exiting");
    }

    /// Run one bounded unit of the highest-priority applicable action.
    /// Returns whether anything was done.
    pub fn run_gc_cycle(&self, cx: &Cx) -> Result<bool> {
        let action = { self.state.lock().next_gc_action(&self.config) };
        match action {
            Some(action) => {
                self.run_gc_action(cx, action)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn run_gc_action(&self, cx: &Cx, action: GcAction) -> Result<()> {
        match action {
            GcAction::TrimAlloc => self.gc_trim_alloc(cx),
            GcAction::TrimDirty => self.gc_trim_dirty(cx),
            GcAction::Reclaim => self.gc_reclaim_space(cx),
        }
    }

    /// One trim-alloc cycle: merge cached back-refs towards the alloc-tail
    /// target and submit the advanced tail.
    pub fn gc_trim_alloc(&self, cx: &Cx) -> Result<()> {
        let ecb = self.ecb().clone();
        repeat_on_conflict(cx, |cx| {
            let target = { self.state.lock().alloc_tail_target(&self.config) };
            debug!(%target, "trim alloc");
            let mut txn = ecb.open_transaction(cx, TransactionKind::TrimAlloc, "trim_alloc")?;
            let new_tail = self.backrefs.merge_cached_backrefs(
                cx,
                &mut txn,
                target,
                self.config.rewrite_backref_bytes_per_cycle,
            )?;
            ecb.submit_transaction(cx, txn, new_tail)
        })
    }

    /// One trim-dirty cycle: rewrite the oldest dirty extents below the
    /// dirty-tail target into the dirty generation.
    pub fn gc_trim_dirty(&self, cx: &Cx) -> Result<()> {
        let ecb = self.ecb().clone();
        repeat_on_conflict(cx, |cx| {
            let target = { self.state.lock().dirty_tail_target(&self.config) };
            debug!(%target, "trim dirty");
            let mut txn = ecb.open_transaction(cx, TransactionKind::TrimDirty, "trim_dirty")?;
            let dirty = ecb.get_next_dirty_extents(
                cx,
                &mut txn,
                target,
                self.config.rewrite_dirty_bytes_per_cycle,
            )?;
            debug!(count = dirty.len(), "rewriting dirty extents");
            for extent in &dirty {
                ecb.rewrite_extent(cx, &mut txn, extent, ReclaimGeneration::DIRTY, None)?;
            }
            ecb.submit_transaction(cx, txn, None)
        })
    }

    /// One reclaim cycle: advance the cursor over the victim segment,
    /// relocate the live extents in the window, and on the final window mark
    /// the segment for release and return it to EMPTY.
    pub fn gc_reclaim_space(&self, cx: &Cx) -> Result<()> {
        let ecb = self.ecb().clone();
        let (start, end, segment, target_generation, modify_time, completes) = {
            let mut state = self.state.lock();
            if state.reclaim_cursor.is_none() {
                let segment = Self::select_victim(&state);
                let info = state.directory.get(segment);
                assert!(info.is_closed(), "victim {segment} is not closed");
                let generation = info.generation.expect("closed segment without generation");
                info!(
                    %segment,
                    utilization = state.utilization(segment),
                    time_bound = ?state.directory.time_bound(),
                    "reclaim start"
                );
                state.reclaim_cursor = Some(ReclaimCursor::new(
                    segment,
                    generation,
                    state.directory.segment_size(),
                ));
            }
            let segment = state
                .reclaim_cursor
                .as_ref()
                .expect("cursor just installed")
                .segment();
            let modify_time = state.directory.get(segment).modify_time;
            let cursor = state.reclaim_cursor.as_mut().expect("cursor just installed");
            cursor.advance(self.config.reclaim_bytes_per_cycle);
            (
                cursor.start_addr(),
                cursor.end_addr(),
                segment,
                cursor.target_generation(),
                modify_time,
                cursor.is_complete(),
            )
        };
        debug!(
            %segment, %target_generation,
            start = start.offset, end = end.offset,
            "reclaiming window"
        );

        // Persistent mappings for the window, in a retried read transaction.
        let mappings = repeat_on_conflict(cx, |cx| {
            let mut txn = ecb.open_transaction(cx, TransactionKind::Read, "get_backref_mappings")?;
            self.backrefs.get_mappings(cx, &mut txn, start, end)
        })?;

        let mut runs = 0_u64;
        let reclaimed = repeat_on_conflict(cx, |cx| {
            runs += 1;
            let mut reclaimed = 0_u64;
            let mut txn = ecb.open_transaction(cx, TransactionKind::Reclaim, "reclaim_space")?;
            self.backrefs
                .retrieve_cached_extents(cx, &mut txn, start, end)?;

            // Merge persistent mappings with the cached entries; cached
            // tombstones record deaths newer than the persistent index.
            let mut live: BTreeMap<PhysicalAddr, BackrefEntry> = mappings
                .iter()
                .map(|mapping| (mapping.paddr, BackrefEntry::from(*mapping)))
                .collect();
            for cached in self.backrefs.cached_entries_in_range(start, end) {
                if cached.laddr.is_none() {
                    let removed = live.remove(&cached.paddr).unwrap_or_else(|| {
                        panic!("tombstone for unknown extent at {}", cached.paddr)
                    });
                    assert!(
                        removed.len == cached.len,
                        "tombstone length mismatch at {}",
                        cached.paddr
                    );
                } else {
                    live.insert(cached.paddr, cached);
                }
            }

            let mut extents = Vec::new();
            for entry in live.values() {
                let found = ecb.get_extents_if_live(cx, &mut txn, entry)?;
                if found.is_empty() {
                    debug!(paddr = %entry.paddr, "dead, skipping");
                } else {
                    extents.extend(found);
                }
            }
            for extent in &extents {
                reclaimed += extent.len;
                ecb.rewrite_extent(cx, &mut txn, extent, target_generation, modify_time)?;
            }
            if completes {
                txn.mark_segment_to_release(segment);
            }
            ecb.submit_transaction(cx, txn, None)?;
            Ok(reclaimed)
        })?;

        {
            let mut state = self.state.lock();
            state.stats.reclaiming_bytes += reclaimed;
            debug!(reclaimed, runs, "reclaim window done");
            if completes {
                info!(
                    %segment,
                    reclaimed_alive = state.stats.reclaiming_bytes,
                    usage = state.tracker.get_usage(segment),
                    "reclaim finish"
                );
                state.stats.reclaimed_bytes += state.stats.reclaiming_bytes;
                state.stats.reclaimed_segment_bytes += state.directory.segment_size();
                state.stats.reclaiming_bytes = 0;
                state.reclaim_cursor = None;
            }
        }

        if completes {
            self.devices.release_segment(cx, segment)?;
            self.finish_segment_release(segment);
        }
        Ok(())
    }

    /// After the device confirmed physical release: CLOSED -> EMPTY and wake
    /// writers blocked on space.
    fn finish_segment_release(&self, segment: SegmentId) {
        let mut state = self.state.lock();
        let usage = state.tracker.get_usage(segment);
        if usage != 0 {
            state.tracker.dump_usage(segment);
            panic!("released segment {segment} still has {usage} live bytes");
        }
        let old = state.utilization(segment);
        state.directory.mark_empty(segment);
        let new = state.utilization(segment);
        state.adjust_segment_util(old, new);
        info!(
            %segment,
            available_ratio = state.directory.available_ratio(),
            "segment released"
        );
        drop(state);
        self.io_wake.notify_all();
    }

    /// The next victim, by score. May only be called when reclaim should
    /// run; an empty candidate pool here is a logic error.
    #[must_use]
    pub fn next_reclaim_segment(&self) -> SegmentId {
        Self::select_victim(&self.state.lock())
    }

    fn select_victim(state: &CleanerState) -> SegmentId {
        let now = P::NEEDS_NOW.then(ModifyTime::now);
        let bound = if P::NEEDS_BOUND {
            let bound = state.directory.time_bound();
            if bound.is_none() {
                warn!("scoring wants an age bound but no segment has one");
            }
            bound
        } else {
            None
        };
        let tail = state.journal_tail();
        let mut best: Option<(SegmentId, f64)> = None;
        for (segment, info) in state.directory.iter() {
            if !info.is_closed() || info.is_in_journal(tail) {
                continue;
            }
            let util = state.utilization(segment);
            assert!(
                (0.0..1.0).contains(&util),
                "candidate {segment} utilization {util} out of range"
            );
            let score = P::score(util, now, info.modify_time, bound);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((segment, score));
            }
        }
        match best {
            Some((segment, score)) => {
                debug!(%segment, score, "victim selected");
                segment
            }
            None => panic!("reclaim requested with no reclaimable segment"),
        }
    }
}
