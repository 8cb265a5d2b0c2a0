//! Mount-time recovery: rebuild the directory and tracker from on-disk
//! segment headers and tails.
//!
//! For each segment: a missing header means the segment was never written
//! and stays EMPTY. Otherwise the tail, when its nonce matches the header's,
//! supplies the segment's modify time and extent count directly; a missing
//! or stale tail forces a scan of every valid record. Either way the segment
//! is installed CLOSED with the header's identity.
//!
//! Live-byte counters are populated afterwards by the journal replayer
//! through `mark_space_used`/`mark_space_free` with `init_scan` set.

use asupersync::Cx;
use reef_error::{CleanerError, Result};
use reef_space::{CoarseTracker, DetailedTracker, SpaceTracker};
use reef_types::{SegmentHeader, SegmentId};
use tracing::{debug, info};

use crate::config::TrackerKind;
use crate::policy::ScorePolicy;
use crate::{Cleaner, CleanerStats};

impl<P: ScorePolicy> Cleaner<P> {
    /// Reset all cleaner state and rebuild it from the devices' headers and
    /// tails. After `mount`, the journal replayer installs the journal
    /// positions and live counters, then `complete_init` starts GC.
    pub fn mount(&self, cx: &Cx) -> Result<()> {
        let specs = self.devices.devices();
        assert!(!specs.is_empty(), "mount without segment devices");
        let segment_size = specs[0].segment_size;
        let block_size = specs[0].block_size;
        {
            let mut state = self.state.lock();
            info!(devices = specs.len(), "mounting");
            state.init_complete = false;
            state.stats = CleanerStats::default();
            state.journal_head = None;
            state.journal_dirty_tail = None;
            state.journal_alloc_tail = None;
            state.reclaim_cursor = None;
            state.reservation_pending = false;
            state.directory.reset();

            let mut tracker: Box<dyn SpaceTracker> = match self.config.tracker {
                TrackerKind::Coarse => Box::new(CoarseTracker::new()),
                TrackerKind::Detailed => Box::new(DetailedTracker::new(segment_size, block_size)),
            };
            for spec in &specs {
                assert!(
                    spec.segment_size == segment_size && spec.block_size == block_size,
                    "devices disagree on geometry"
                );
                state
                    .directory
                    .add_device(spec.device, spec.num_segments, spec.segment_size);
                tracker.add_device(spec.device, spec.num_segments);
            }
            state.tracker = tracker;
            // every segment starts in the empty utilization bucket
            state.stats.segment_util_buckets[0] = state.directory.num_segments() as u64;
        }
        self.stopping
            .store(false, std::sync::atomic::Ordering::Release);

        for spec in &specs {
            for index in 0..spec.num_segments {
                let segment = SegmentId::new(spec.device, index);
                match self.devices.read_segment_header(cx, segment) {
                    Ok(header) => self.recover_segment(cx, segment, &header)?,
                    Err(CleanerError::NotFound(_) | CleanerError::NoData(_)) => {
                        debug!(%segment, "never written, staying empty");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let state = self.state.lock();
        info!(
            segments = state.directory.num_segments(),
            closed = state.directory.num_closed(),
            available_bytes = state.directory.available_bytes(),
            "mount recovery done"
        );
        Ok(())
    }

    fn recover_segment(&self, cx: &Cx, segment: SegmentId, header: &SegmentHeader) -> Result<()> {
        debug!(%segment, seq = %header.segment_seq, ?header.segment_type, "recovering");
        match self.devices.read_segment_tail(cx, segment) {
            Ok(tail) if tail.segment_nonce == header.segment_nonce => {
                // Tail fast path; modify time and extent count must agree.
                match (tail.modify_time, tail.num_extents) {
                    (Some(_), extents) if extents > 0 => {
                        let mut state = self.state.lock();
                        state
                            .directory
                            .update_modify_time(segment, tail.modify_time, extents);
                    }
                    (None, 0) => {}
                    (time, extents) => {
                        return Err(CleanerError::Corruption {
                            segment: segment.to_string(),
                            detail: format!(
                                "tail modify time {time:?} disagrees with {extents} extents"
                            ),
                        });
                    }
                }
            }
            // stale tail from a previous incarnation, or no tail at all
            Ok(_) | Err(CleanerError::NoData(_)) => self.scan_no_tail_segment(cx, segment, header)?,
            Err(err) => return Err(err),
        }

        let mut state = self.state.lock();
        state.directory.init_closed(
            segment,
            header.segment_seq,
            header.segment_type,
            header.category,
            header.generation,
        );
        Ok(())
    }

    /// Accumulate `modify_time`/`num_extents` from every valid record of a
    /// segment whose tail never made it to disk.
    fn scan_no_tail_segment(
        &self,
        cx: &Cx,
        segment: SegmentId,
        header: &SegmentHeader,
    ) -> Result<()> {
        info!(%segment, "tail missing or stale, scanning records");
        self.devices
            .scan_valid_records(cx, segment, header.segment_nonce, &mut |record| {
                if record.num_extents == 0 || record.modify_time.is_some() {
                    let mut state = self.state.lock();
                    state.directory.update_modify_time(
                        segment,
                        record.modify_time,
                        u64::from(record.num_extents),
                    );
                    Ok(())
                } else {
                    Err(CleanerError::Corruption {
                        segment: segment.to_string(),
                        detail: format!(
                            "record has {} extents but no modify time",
                            record.num_extents
                        ),
                    })
                }
            })
    }
}
