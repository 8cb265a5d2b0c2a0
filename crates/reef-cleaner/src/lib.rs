#![forbid(unsafe_code)]
//! Background space reclamation for a log-structured, segment-based object
//! store.
//!
//! The store writes extents sequentially into fixed-size segments; a segment
//! becomes reusable only after every live extent in it has been relocated.
//! The cleaner owns the accounting needed to decide that:
//!
//! - a [`reef_directory::SegmentDirectory`] tracking every segment's
//!   lifecycle (`EMPTY -> OPEN -> CLOSED -> EMPTY`) and the aggregates
//!   derived from it;
//! - a [`reef_space::SpaceTracker`] counting live bytes per segment;
//! - a background GC driver that trims the journal tails and reclaims closed
//!   segments, one bounded unit of work per cycle;
//! - a backpressure gate that suspends foreground writers when reclaim
//!   cannot keep up with allocation.
//!
//! The cleaner exclusively owns its directory and tracker. The device group,
//! back-reference index, and extent callback are shared collaborators
//! reached only through the contracts in [`traits`]. State lives behind one
//! mutex; the lock is never held across a collaborator call, so everything
//! between suspension points observes exclusive state.

pub mod config;
pub mod metrics;
pub mod policy;
pub mod traits;

mod driver;
mod gate;
mod recovery;

pub use config::{CleanerConfig, TrackerKind};
pub use driver::DriverPhase;

use asupersync::Cx;
use parking_lot::{Condvar, Mutex};
use reef_directory::SegmentDirectory;
use reef_error::{CleanerError, Result};
use reef_space::{CoarseTracker, SpaceTracker};
use reef_types::{
    DataCategory, JournalPosition, PhysicalAddr, ReclaimCursor, ReclaimGeneration, SegmentId,
    SegmentSeq, SegmentType,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::driver::GcDriver;
use crate::metrics::GcSnapshot;
use crate::policy::{CostBenefit, ScorePolicy};
use crate::traits::{BackrefIndex, DeviceGroup, ExtentCallback};

const UTIL_BUCKETS: usize = 10;

pub(crate) fn cx_checkpoint(cx: &Cx) -> Result<()> {
    cx.checkpoint().map_err(|_| CleanerError::Cancelled)
}

#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn util_bucket(util: f64) -> usize {
    debug_assert!((0.0..=1.0).contains(&util), "utilization {util} out of range");
    ((util * 10.0) as usize).min(UTIL_BUCKETS - 1)
}

// ── Stats ───────────────────────────────────────────────────────────────────

/// The cleaner's operational counters. Process-wide per mount; reset by
/// `mount` and torn down with the cleaner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanerStats {
    /// Bytes occupied by live extents across all segments.
    pub used_bytes: u64,

    pub projected_used_bytes: u64,
    pub projected_count: u64,
    pub projected_used_bytes_sum: u64,

    pub io_count: u64,
    pub io_blocking_num: u64,
    pub io_blocked_count: u64,
    pub io_blocked_count_trim: u64,
    pub io_blocked_count_reclaim: u64,
    pub io_blocked_sum: u64,

    /// Live bytes rewritten so far for the victim currently under reclaim.
    pub reclaiming_bytes: u64,
    pub reclaimed_bytes: u64,
    pub reclaimed_segment_bytes: u64,

    pub closed_journal_used_bytes: u64,
    pub closed_journal_total_bytes: u64,
    pub closed_ool_used_bytes: u64,
    pub closed_ool_total_bytes: u64,

    /// Segment count per utilization decile; empty segments sit in bucket 0.
    pub segment_util_buckets: [u64; UTIL_BUCKETS],
}

// ── State ───────────────────────────────────────────────────────────────────

struct CleanerState {
    init_complete: bool,
    directory: SegmentDirectory,
    tracker: Box<dyn SpaceTracker>,
    journal_head: Option<JournalPosition>,
    journal_dirty_tail: Option<JournalPosition>,
    journal_alloc_tail: Option<JournalPosition>,
    reclaim_cursor: Option<ReclaimCursor>,
    /// The pipeline admits one reservation at a time; tracking it catches
    /// callers that would otherwise lose wakeups.
    reservation_pending: bool,
    stats: CleanerStats,
}

impl CleanerState {
    fn fresh() -> Self {
        Self {
            init_complete: false,
            directory: SegmentDirectory::new(),
            tracker: Box::new(CoarseTracker::new()),
            journal_head: None,
            journal_dirty_tail: None,
            journal_alloc_tail: None,
            reclaim_cursor: None,
            reservation_pending: false,
            stats: CleanerStats::default(),
        }
    }

    /// Overall journal tail: nothing below it is needed for replay.
    fn journal_tail(&self) -> Option<JournalPosition> {
        match (self.journal_dirty_tail, self.journal_alloc_tail) {
            (Some(dirty), Some(alloc)) => Some(dirty.min(alloc)),
            _ => None,
        }
    }

    fn segments_in_journal(&self) -> usize {
        match (self.journal_head, self.journal_tail()) {
            (Some(head), Some(tail)) => {
                assert!(head.seq >= tail.seq, "journal head behind its tail");
                usize::try_from(head.seq.0 - tail.seq.0 + 1).expect("journal span fits usize")
            }
            _ => 0,
        }
    }

    fn segments_in_journal_closed(&self) -> usize {
        self.segments_in_journal()
            .saturating_sub(self.directory.num_in_journal_open())
    }

    fn segments_reclaimable(&self) -> usize {
        self.directory
            .num_closed()
            .saturating_sub(self.segments_in_journal_closed())
    }

    fn unavailable_reclaimable_bytes(&self) -> u64 {
        let bytes = self.segments_reclaimable() as u64 * self.directory.segment_size();
        assert!(
            bytes <= self.directory.unavailable_bytes(),
            "reclaimable bytes exceed unavailable bytes"
        );
        bytes
    }

    fn unavailable_unreclaimable_bytes(&self) -> u64 {
        self.directory.unavailable_bytes() - self.unavailable_reclaimable_bytes()
    }

    #[expect(clippy::cast_precision_loss)]
    fn reclaim_ratio(&self) -> f64 {
        let unavailable = self.directory.unavailable_bytes();
        if unavailable == 0 {
            return 0.0;
        }
        self.unavailable_reclaimable_bytes() as f64 / unavailable as f64
    }

    #[expect(clippy::cast_precision_loss)]
    fn projected_available_ratio(&self) -> f64 {
        let total = self.directory.total_bytes();
        if total == 0 {
            return 0.0;
        }
        let projected_avail = self
            .directory
            .available_bytes()
            .saturating_sub(self.stats.projected_used_bytes);
        projected_avail as f64 / total as f64
    }

    #[expect(clippy::cast_precision_loss)]
    fn utilization(&self, segment: SegmentId) -> f64 {
        if self.directory.get(segment).is_empty() {
            return 0.0;
        }
        self.tracker.get_usage(segment) as f64 / self.directory.segment_size() as f64
    }

    fn adjust_segment_util(&mut self, old: f64, new: f64) {
        let old_bucket = util_bucket(old);
        let new_bucket = util_bucket(new);
        if old_bucket == new_bucket {
            return;
        }
        assert!(
            self.stats.segment_util_buckets[old_bucket] > 0,
            "utilization bucket underflow"
        );
        self.stats.segment_util_buckets[old_bucket] -= 1;
        self.stats.segment_util_buckets[new_bucket] += 1;
    }

    // journal targets; only meaningful once the replayer installed the head

    fn journal_head_or_panic(&self) -> JournalPosition {
        self.journal_head.expect("journal head not set")
    }

    fn dirty_tail_target(&self, config: &CleanerConfig) -> JournalPosition {
        self.journal_head_or_panic().step_back(
            config.target_journal_dirty_bytes,
            self.directory.segment_size(),
        )
    }

    fn alloc_tail_target(&self, config: &CleanerConfig) -> JournalPosition {
        self.journal_head_or_panic().step_back(
            config.target_journal_alloc_bytes,
            self.directory.segment_size(),
        )
    }

    fn tail_limit(&self, config: &CleanerConfig) -> JournalPosition {
        self.journal_head_or_panic()
            .step_back(config.max_journal_bytes, self.directory.segment_size())
    }

    fn should_trim_dirty(&self, config: &CleanerConfig) -> bool {
        let tail = self.journal_dirty_tail.expect("dirty tail not set");
        self.dirty_tail_target(config) > tail
    }

    fn should_trim_alloc(&self, config: &CleanerConfig) -> bool {
        let tail = self.journal_alloc_tail.expect("alloc tail not set");
        self.alloc_tail_target(config) > tail
    }

    fn should_reclaim_space(&self, config: &CleanerConfig) -> bool {
        if self.segments_reclaimable() == 0 {
            return false;
        }
        let projected_avail = self.projected_available_ratio();
        projected_avail < config.available_ratio_hard_limit
            || (projected_avail < config.available_ratio_gc_max
                && self.reclaim_ratio() > config.reclaim_ratio_gc_threshold)
    }

    fn should_block_on_trim(&self, config: &CleanerConfig) -> bool {
        let tail = self.journal_tail().expect("journal tails not set");
        self.tail_limit(config) > tail
    }

    fn should_block_on_reclaim(&self, config: &CleanerConfig) -> bool {
        self.segments_reclaimable() > 0
            && self.projected_available_ratio() < config.available_ratio_hard_limit
    }

    fn should_block_on_gc(&self, config: &CleanerConfig) -> bool {
        self.should_block_on_trim(config) || self.should_block_on_reclaim(config)
    }
}

// ── Cleaner ─────────────────────────────────────────────────────────────────

/// The async cleaner. Generic over the victim-scoring formula so the unused
/// formulas compile out; the default is cost-benefit.
pub struct Cleaner<P: ScorePolicy = CostBenefit> {
    config: CleanerConfig,
    devices: Arc<dyn DeviceGroup>,
    backrefs: Arc<dyn BackrefIndex>,
    ecb: OnceLock<Arc<dyn ExtentCallback>>,
    state: Mutex<CleanerState>,
    /// Signalled when space is consumed or journal positions move; the GC
    /// driver's idle wait.
    gc_wake: Condvar,
    /// Signalled when space is released; the backpressure gate's wait.
    io_wake: Condvar,
    stopping: AtomicBool,
    driver_phase: AtomicU8,
    driver: Mutex<Option<GcDriver>>,
    _policy: PhantomData<P>,
}

impl<P: ScorePolicy> Cleaner<P> {
    /// Validate the configuration and construct an idle cleaner. `mount`
    /// performs recovery; `complete_init` starts the GC driver.
    pub fn new(
        config: CleanerConfig,
        devices: Arc<dyn DeviceGroup>,
        backrefs: Arc<dyn BackrefIndex>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            devices,
            backrefs,
            ecb: OnceLock::new(),
            state: Mutex::new(CleanerState::fresh()),
            gc_wake: Condvar::new(),
            io_wake: Condvar::new(),
            stopping: AtomicBool::new(false),
            driver_phase: AtomicU8::new(DriverPhase::Stopped as u8),
            driver: Mutex::new(None),
            _policy: PhantomData,
        }))
    }

    /// Register the extent callback. The callback typically holds a
    /// non-owning handle back to this cleaner for `mark_space_used`/`free`.
    pub fn set_extent_callback(&self, ecb: Arc<dyn ExtentCallback>) {
        assert!(
            self.ecb.set(ecb).is_ok(),
            "extent callback registered twice"
        );
    }

    pub(crate) fn ecb(&self) -> &Arc<dyn ExtentCallback> {
        self.ecb.get().expect("extent callback not registered")
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    // ── Writer-facing surface ───────────────────────────────────────────

    /// Open the first empty segment for writing. Running out of empty
    /// segments here means backpressure failed; there is no way to continue.
    pub fn allocate_segment(
        &self,
        seq: SegmentSeq,
        segment_type: SegmentType,
        category: DataCategory,
        generation: ReclaimGeneration,
    ) -> SegmentId {
        let mut state = self.state.lock();
        let candidate = state
            .directory
            .iter()
            .find(|(_, info)| info.is_empty())
            .map(|(id, _)| id);
        let Some(segment) = candidate else {
            panic!("out of segments allocating {segment_type} {seq} {category} {generation}");
        };
        let old = state.utilization(segment);
        state
            .directory
            .mark_open(segment, seq, segment_type, category, generation);
        let new = state.utilization(segment);
        state.adjust_segment_util(old, new);
        info!(
            %segment, %seq, %segment_type,
            available_ratio = state.directory.available_ratio(),
            "segment allocated"
        );
        drop(state);
        self.gc_wake.notify_all();
        segment
    }

    /// The writer finished a segment.
    pub fn close_segment(&self, segment: SegmentId) {
        let mut state = self.state.lock();
        let old = state.utilization(segment);
        state.directory.mark_closed(segment);
        let usage = state.tracker.get_usage(segment);
        let segment_size = state.directory.segment_size();
        match state.directory.get(segment).segment_type {
            Some(SegmentType::Journal) => {
                state.stats.closed_journal_used_bytes += usage;
                state.stats.closed_journal_total_bytes += segment_size;
            }
            Some(SegmentType::Ool) => {
                state.stats.closed_ool_used_bytes += usage;
                state.stats.closed_ool_total_bytes += segment_size;
            }
            None => unreachable!("closed segment without a type"),
        }
        let new = state.utilization(segment);
        state.adjust_segment_util(old, new);
        info!(%segment, usage, "segment closed");
    }

    /// Advance an open segment's write frontier.
    pub fn update_written_to(&self, segment: SegmentId, new_offset: u64) {
        let mut state = self.state.lock();
        state.directory.update_written_to(segment, new_offset);
    }

    /// Fold a record's modify time into its (open) segment.
    pub fn update_modify_time(
        &self,
        segment: SegmentId,
        time: Option<reef_types::ModifyTime>,
        num_extents: u64,
    ) {
        let mut state = self.state.lock();
        state.directory.update_modify_time(segment, time, num_extents);
    }

    /// An extent was persisted at `addr`. `init_scan` marks calls replayed
    /// during recovery, before `complete_init`.
    pub fn mark_space_used(&self, addr: PhysicalAddr, len: u64, init_scan: bool) {
        assert!(len > 0, "marking zero bytes used at {addr}");
        let mut state = self.state.lock();
        if !init_scan && !state.init_complete {
            return;
        }
        state.stats.used_bytes += len;
        let segment = addr.segment;
        let old = state.utilization(segment);
        let live_bytes = state.tracker.allocate(segment, addr.offset, len);
        let new = state.utilization(segment);
        state.adjust_segment_util(old, new);
        debug!(%segment, offset = addr.offset, len, live_bytes, "space used");
        drop(state);
        self.gc_wake.notify_all();
    }

    /// The extent at `addr` died. Always follows the corresponding
    /// `mark_space_used` for the same region.
    pub fn mark_space_free(&self, addr: PhysicalAddr, len: u64, init_scan: bool) {
        assert!(len > 0, "marking zero bytes free at {addr}");
        let mut state = self.state.lock();
        if !init_scan && !state.init_complete {
            return;
        }
        assert!(state.stats.used_bytes >= len, "used byte underflow");
        state.stats.used_bytes -= len;
        let segment = addr.segment;
        let old = state.utilization(segment);
        let live_bytes = state.tracker.release(segment, addr.offset, len);
        let new = state.utilization(segment);
        state.adjust_segment_util(old, new);
        debug!(%segment, offset = addr.offset, len, live_bytes, "space freed");
        drop(state);
        self.io_wake.notify_all();
    }

    // ── Journal positions ───────────────────────────────────────────────

    /// The journal submitted records up to `head`.
    pub fn set_journal_head(&self, head: JournalPosition) {
        let mut state = self.state.lock();
        if let Some(current) = state.journal_head {
            assert!(head >= current, "journal head regressed {current} -> {head}");
        }
        if let Some(tail) = state.journal_dirty_tail {
            assert!(head >= tail, "journal head {head} behind dirty tail {tail}");
        }
        if let Some(tail) = state.journal_alloc_tail {
            assert!(head >= tail, "journal head {head} behind alloc tail {tail}");
        }
        debug!(%head, "journal head");
        state.journal_head = Some(head);
        drop(state);
        self.gc_wake.notify_all();
    }

    /// The journal durably advanced one or both tails.
    pub fn update_journal_tails(
        &self,
        dirty_tail: Option<JournalPosition>,
        alloc_tail: Option<JournalPosition>,
    ) {
        let mut state = self.state.lock();
        if let Some(tail) = dirty_tail {
            if let Some(head) = state.journal_head {
                assert!(head >= tail, "dirty tail {tail} ahead of head {head}");
            }
            if let Some(current) = state.journal_dirty_tail {
                assert!(tail >= current, "dirty tail regressed {current} -> {tail}");
                if tail.seq == current.seq {
                    debug!(%current, %tail, "dirty tail advanced");
                } else {
                    info!(%current, %tail, "dirty tail advanced");
                }
            }
            state.journal_dirty_tail = Some(tail);
        }
        if let Some(tail) = alloc_tail {
            if let Some(head) = state.journal_head {
                assert!(head >= tail, "alloc tail {tail} ahead of head {head}");
            }
            if let Some(current) = state.journal_alloc_tail {
                assert!(tail >= current, "alloc tail regressed {current} -> {tail}");
                if tail.seq == current.seq {
                    debug!(%current, %tail, "alloc tail advanced");
                } else {
                    info!(%current, %tail, "alloc tail advanced");
                }
            }
            state.journal_alloc_tail = Some(tail);
        }
        drop(state);
        self.gc_wake.notify_all();
        self.io_wake.notify_all();
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Finish initialization and start the GC driver. The journal replayer
    /// must have installed the head and both tails.
    pub fn complete_init(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            assert!(!state.init_complete, "complete_init called twice");
            assert!(state.journal_head.is_some(), "journal head not replayed");
            assert!(state.journal_dirty_tail.is_some(), "dirty tail not replayed");
            assert!(state.journal_alloc_tail.is_some(), "alloc tail not replayed");
            state.init_complete = true;
            info!(
                available_ratio = state.directory.available_ratio(),
                reclaim_ratio = state.reclaim_ratio(),
                "init complete, starting gc"
            );
        }
        *self.driver.lock() = Some(GcDriver::spawn(Arc::clone(self)));
    }

    /// Graceful stop: the in-flight GC cycle finishes, the driver exits, and
    /// blocked writers are released with [`CleanerError::ShuttingDown`].
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.gc_wake.notify_all();
        self.io_wake.notify_all();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.join();
        }
        info!("cleaner stopped");
    }

    // ── Queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> CleanerStats {
        self.state.lock().stats.clone()
    }

    #[must_use]
    pub fn segment_info(&self, segment: SegmentId) -> reef_directory::SegmentInfo {
        *self.state.lock().directory.get(segment)
    }

    #[must_use]
    pub fn get_usage(&self, segment: SegmentId) -> u64 {
        self.state.lock().tracker.get_usage(segment)
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.state.lock().directory.available_bytes()
    }

    #[must_use]
    pub fn available_ratio(&self) -> f64 {
        self.state.lock().directory.available_ratio()
    }

    #[must_use]
    pub fn projected_available_ratio(&self) -> f64 {
        self.state.lock().projected_available_ratio()
    }

    #[must_use]
    pub fn reclaim_ratio(&self) -> f64 {
        self.state.lock().reclaim_ratio()
    }

    #[must_use]
    pub fn segments_reclaimable(&self) -> usize {
        self.state.lock().segments_reclaimable()
    }

    #[must_use]
    pub fn journal_positions(
        &self,
    ) -> (
        Option<JournalPosition>,
        Option<JournalPosition>,
        Option<JournalPosition>,
    ) {
        let state = self.state.lock();
        (
            state.journal_head,
            state.journal_dirty_tail,
            state.journal_alloc_tail,
        )
    }

    /// Point-in-time accounting snapshot for metrics publication and tests.
    #[must_use]
    pub fn metrics_snapshot(&self) -> GcSnapshot {
        let state = self.state.lock();
        let dir = &state.directory;
        GcSnapshot {
            num_segments: dir.num_segments(),
            segment_size: dir.segment_size(),
            segments_in_journal: state.segments_in_journal(),
            num_empty: dir.num_empty(),
            num_open: dir.num_open(),
            num_closed: dir.num_closed(),
            num_type_journal: dir.num_type_journal(),
            num_type_ool: dir.num_type_ool(),
            count_open_journal: dir.count_open(SegmentType::Journal),
            count_open_ool: dir.count_open(SegmentType::Ool),
            count_close_journal: dir.count_close(SegmentType::Journal),
            count_close_ool: dir.count_close(SegmentType::Ool),
            count_release_journal: dir.count_release(SegmentType::Journal),
            count_release_ool: dir.count_release(SegmentType::Ool),
            total_bytes: dir.total_bytes(),
            available_bytes: dir.available_bytes(),
            used_bytes: state.stats.used_bytes,
            unavailable_reclaimable_bytes: state.unavailable_reclaimable_bytes(),
            unavailable_unreclaimable_bytes: state.unavailable_unreclaimable_bytes(),
            projected_used_bytes: state.stats.projected_used_bytes,
            projected_used_bytes_sum: state.stats.projected_used_bytes_sum,
            projected_count: state.stats.projected_count,
            io_count: state.stats.io_count,
            io_blocked_count: state.stats.io_blocked_count,
            io_blocked_count_trim: state.stats.io_blocked_count_trim,
            io_blocked_count_reclaim: state.stats.io_blocked_count_reclaim,
            io_blocked_sum: state.stats.io_blocked_sum,
            reclaimed_bytes: state.stats.reclaimed_bytes,
            reclaimed_segment_bytes: state.stats.reclaimed_segment_bytes,
            closed_journal_used_bytes: state.stats.closed_journal_used_bytes,
            closed_journal_total_bytes: state.stats.closed_journal_total_bytes,
            closed_ool_used_bytes: state.stats.closed_ool_used_bytes,
            closed_ool_total_bytes: state.stats.closed_ool_total_bytes,
            available_ratio: dir.available_ratio(),
            reclaim_ratio: state.reclaim_ratio(),
            segment_util_buckets: state.stats.segment_util_buckets,
        }
    }

    /// Push a snapshot into the metrics facade.
    pub fn publish_metrics(&self) {
        crate::metrics::publish(&self.metrics_snapshot());
    }

    /// Validate the steady-state accounting equations. Test and debug hook;
    /// any mismatch is fatal.
    pub fn check_accounting(&self) {
        let state = self.state.lock();
        let dir = &state.directory;
        assert_eq!(
            dir.num_empty() + dir.num_open() + dir.num_closed(),
            dir.num_segments(),
            "segment state counts disagree with population"
        );
        let segment_size = dir.segment_size();
        let mut open_avail = 0_u64;
        let mut with_mtime = 0_usize;
        for (segment, seg_info) in dir.iter() {
            let usage = state.tracker.get_usage(segment);
            assert!(
                usage <= seg_info.written_to,
                "{segment} live bytes {usage} beyond write frontier {}",
                seg_info.written_to
            );
            if seg_info.is_open() {
                open_avail += segment_size - seg_info.written_to;
            }
            if !seg_info.is_empty() && seg_info.modify_time.is_some() {
                with_mtime += 1;
            }
        }
        assert_eq!(dir.avail_bytes_in_open(), open_avail);
        assert_eq!(
            dir.available_bytes(),
            dir.num_empty() as u64 * segment_size + open_avail
        );
        assert_eq!(dir.modify_times_len(), with_mtime);
        let bucket_total: u64 = state.stats.segment_util_buckets.iter().sum();
        assert_eq!(bucket_total, dir.num_segments() as u64);
    }

    pub(crate) fn set_phase(&self, phase: DriverPhase) {
        self.driver_phase.store(phase as u8, Ordering::Release);
    }

    /// Current GC driver state.
    #[must_use]
    pub fn gc_phase(&self) -> DriverPhase {
        DriverPhase::from_u8(self.driver_phase.load(Ordering::Acquire))
    }

    pub(crate) fn log_gc_state(&self, caller: &'static str) {
        let state = self.state.lock();
        if !state.init_complete {
            return;
        }
        debug!(
            caller,
            should_block_on_trim = state.should_block_on_trim(&self.config),
            should_block_on_reclaim = state.should_block_on_reclaim(&self.config),
            should_trim_alloc = state.should_trim_alloc(&self.config),
            should_trim_dirty = state.should_trim_dirty(&self.config),
            should_reclaim = state.should_reclaim_space(&self.config),
            projected_avail_ratio = state.projected_available_ratio(),
            reclaim_ratio = state.reclaim_ratio(),
            used_bytes = state.stats.used_bytes,
            "gc state"
        );
    }
}
