#![forbid(unsafe_code)]
//! Segment lifecycle state machine and aggregate accounting.
//!
//! Every segment moves through `EMPTY -> OPEN -> CLOSED -> EMPTY` (recovery
//! installs `EMPTY -> CLOSED` directly). The directory owns the per-segment
//! records and the aggregate counters derived from them; transitions update
//! both together, so the aggregates are never observable in a torn state.
//!
//! All transition preconditions are fatal-asserted. A wrong prior state,
//! counter underflow, or `written_to` regression cannot arise from valid
//! input; continuing would corrupt space accounting.

use reef_types::{
    DataCategory, DeviceId, JournalPosition, ModifyTime, ReclaimGeneration, SegmentId, SegmentSeq,
    SegmentTable, SegmentType,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ── Per-segment record ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Empty,
    Open,
    Closed,
}

/// One segment's lifecycle record.
///
/// `seq`, `segment_type`, `category`, and `generation` are `Some` exactly
/// when the segment is not EMPTY; `modify_time` is `Some` exactly when
/// `num_extents > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub state: SegmentState,
    pub seq: Option<SegmentSeq>,
    pub segment_type: Option<SegmentType>,
    pub category: Option<DataCategory>,
    pub generation: Option<ReclaimGeneration>,
    pub modify_time: Option<ModifyTime>,
    pub num_extents: u64,
    pub written_to: u64,
}

impl SegmentInfo {
    fn empty() -> Self {
        Self {
            state: SegmentState::Empty,
            seq: None,
            segment_type: None,
            category: None,
            generation: None,
            modify_time: None,
            num_extents: 0,
            written_to: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state == SegmentState::Empty
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SegmentState::Open
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SegmentState::Closed
    }

    /// Whether this closed journal segment is still covered by the journal
    /// and therefore unreclaimable. `tail` is the overall journal tail
    /// (minimum of the dirty and alloc tails); the boundary is inclusive at
    /// the tail's segment.
    #[must_use]
    pub fn is_in_journal(&self, tail: Option<JournalPosition>) -> bool {
        match (self.segment_type, self.seq, tail) {
            (Some(SegmentType::Journal), Some(seq), Some(tail)) => tail.seq <= seq,
            _ => false,
        }
    }

    fn set_open(
        &mut self,
        seq: SegmentSeq,
        segment_type: SegmentType,
        category: DataCategory,
        generation: ReclaimGeneration,
    ) {
        assert!(generation.is_valid(), "invalid generation {generation}");
        self.state = SegmentState::Open;
        self.seq = Some(seq);
        self.segment_type = Some(segment_type);
        self.category = Some(category);
        self.generation = Some(generation);
        self.written_to = 0;
    }

    fn set_closed(&mut self) {
        self.state = SegmentState::Closed;
        // the rest of the record is unchanged
    }

    fn init_closed(
        &mut self,
        seq: SegmentSeq,
        segment_type: SegmentType,
        category: DataCategory,
        generation: ReclaimGeneration,
        segment_size: u64,
    ) {
        assert!(generation.is_valid(), "invalid generation {generation}");
        self.state = SegmentState::Closed;
        self.seq = Some(seq);
        self.segment_type = Some(segment_type);
        self.category = Some(category);
        self.generation = Some(generation);
        self.written_to = segment_size;
    }

    fn set_empty(&mut self) {
        *self = Self::empty();
    }

    /// Fold another modify-time observation into the extent-weighted mean.
    fn update_modify_time(&mut self, time: ModifyTime, num_extents: u64) {
        assert!(num_extents > 0, "modify time update without extents");
        match self.modify_time {
            None => {
                self.modify_time = Some(time);
                self.num_extents = num_extents;
            }
            Some(current) => {
                self.modify_time = Some(ModifyTime::average(
                    current,
                    self.num_extents,
                    time,
                    num_extents,
                ));
                self.num_extents += num_extents;
            }
        }
    }
}

// ── Directory ───────────────────────────────────────────────────────────────

/// Per-segment records plus the aggregates the cleaner steers by.
#[derive(Debug)]
pub struct SegmentDirectory {
    segments: SegmentTable<SegmentInfo>,

    segment_size: u64,
    total_bytes: u64,

    /// The currently (or most recently) open journal segment.
    journal_segment_id: Option<SegmentId>,
    num_in_journal_open: usize,
    num_type_journal: usize,
    num_type_ool: usize,

    num_open: usize,
    num_empty: usize,
    num_closed: usize,

    count_open_journal: u64,
    count_open_ool: u64,
    count_close_journal: u64,
    count_close_ool: u64,
    count_release_journal: u64,
    count_release_ool: u64,

    avail_bytes_in_open: u64,

    /// Multiset of modify times of OPEN and CLOSED segments with extents;
    /// its minimum is the age bound for benefit scoring.
    modify_times: BTreeMap<ModifyTime, usize>,
}

impl SegmentDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: SegmentTable::new(),
            segment_size: 0,
            total_bytes: 0,
            journal_segment_id: None,
            num_in_journal_open: 0,
            num_type_journal: 0,
            num_type_ool: 0,
            num_open: 0,
            num_empty: 0,
            num_closed: 0,
            count_open_journal: 0,
            count_open_ool: 0,
            count_close_journal: 0,
            count_close_ool: 0,
            count_release_journal: 0,
            count_release_ool: 0,
            avail_bytes_in_open: 0,
            modify_times: BTreeMap::new(),
        }
    }

    /// Register a device at mount. All devices must share one segment size.
    pub fn add_device(&mut self, device: DeviceId, num_segments: u32, segment_size: u64) {
        assert!(segment_size > 0, "segment size must be non-zero");
        if self.segment_size == 0 {
            self.segment_size = segment_size;
        } else {
            assert!(
                self.segment_size == segment_size,
                "device {device:?} segment size {segment_size} differs from {}",
                self.segment_size
            );
        }
        info!(
            device = device.get(),
            num_segments, segment_size, "adding device"
        );
        self.segments
            .add_device(device, num_segments, SegmentInfo::empty());
        // segments start out empty
        self.num_empty += num_segments as usize;
        self.total_bytes += u64::from(num_segments) * segment_size;
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// EMPTY -> CLOSED at mount recovery.
    pub fn init_closed(
        &mut self,
        segment: SegmentId,
        seq: SegmentSeq,
        segment_type: SegmentType,
        category: DataCategory,
        generation: ReclaimGeneration,
    ) {
        let segment_size = self.segment_size;
        let info = self.segments.get_mut(segment);
        debug!(
            %segment, %seq, %segment_type, %category, %generation,
            "installing closed segment from recovery"
        );
        assert!(info.is_empty(), "init_closed on non-empty {segment}");
        assert!(self.num_empty > 0, "empty count underflow");
        self.num_empty -= 1;
        self.num_closed += 1;
        match segment_type {
            SegmentType::Journal => self.num_type_journal += 1,
            SegmentType::Ool => self.num_type_ool += 1,
        }
        // recovery installs do not count as close events

        if let Some(time) = info.modify_time {
            *self.modify_times.entry(time).or_insert(0) += 1;
        } else {
            assert!(
                info.num_extents == 0,
                "{segment} has extents but no modify time"
            );
        }

        self.segments
            .get_mut(segment)
            .init_closed(seq, segment_type, category, generation, segment_size);
    }

    /// EMPTY -> OPEN when allocation chooses this segment.
    pub fn mark_open(
        &mut self,
        segment: SegmentId,
        seq: SegmentSeq,
        segment_type: SegmentType,
        category: DataCategory,
        generation: ReclaimGeneration,
    ) {
        assert!(
            self.segments.get(segment).is_empty(),
            "mark_open on non-empty {segment}"
        );
        info!(
            %segment, %seq, %segment_type, %category, %generation,
            num_empty = self.num_empty, num_open = self.num_open, num_closed = self.num_closed,
            "opening"
        );
        assert!(self.num_empty > 0, "empty count underflow");
        self.num_empty -= 1;
        self.num_open += 1;
        match segment_type {
            SegmentType::Journal => {
                if let Some(last) = self.journal_segment_id {
                    let last_info = self.segments.get(last);
                    assert!(
                        last_info.is_closed(),
                        "opening journal {segment} while {last} is still open"
                    );
                    assert!(
                        last_info.segment_type == Some(SegmentType::Journal),
                        "journal segment id points at non-journal {last}"
                    );
                    assert!(
                        last_info.seq.map(SegmentSeq::successor) == Some(seq),
                        "journal seq {seq} not contiguous after {last}"
                    );
                }
                self.journal_segment_id = Some(segment);
                self.num_in_journal_open += 1;
                self.num_type_journal += 1;
                self.count_open_journal += 1;
            }
            SegmentType::Ool => {
                self.num_type_ool += 1;
                self.count_open_ool += 1;
            }
        }
        self.avail_bytes_in_open += self.segment_size;

        self.segments
            .get_mut(segment)
            .set_open(seq, segment_type, category, generation);
    }

    /// OPEN -> CLOSED when the writer finishes the segment.
    pub fn mark_closed(&mut self, segment: SegmentId) {
        let segment_size = self.segment_size;
        let info = self.segments.get(segment);
        info!(
            %segment,
            written_to = info.written_to,
            num_empty = self.num_empty, num_open = self.num_open, num_closed = self.num_closed,
            "closing"
        );
        assert!(info.is_open(), "mark_closed on non-open {segment}");
        assert!(self.num_open > 0, "open count underflow");
        self.num_open -= 1;
        self.num_closed += 1;
        match info.segment_type {
            Some(SegmentType::Journal) => {
                assert!(self.num_in_journal_open > 0, "journal open count underflow");
                self.num_in_journal_open -= 1;
                self.count_close_journal += 1;
            }
            Some(SegmentType::Ool) => {
                self.count_close_ool += 1;
            }
            None => unreachable!("open segment without a type"),
        }
        assert!(
            segment_size >= info.written_to,
            "{segment} written_to {} beyond segment size",
            info.written_to
        );
        let seg_avail = segment_size - info.written_to;
        assert!(
            self.avail_bytes_in_open >= seg_avail,
            "avail_bytes_in_open underflow closing {segment}"
        );
        self.avail_bytes_in_open -= seg_avail;

        // the segment's modify time entered the multiset while it was open
        if info.modify_time.is_none() {
            assert!(
                info.num_extents == 0,
                "{segment} has extents but no modify time"
            );
        }

        self.segments.get_mut(segment).set_closed();
    }

    /// CLOSED -> EMPTY after physical release. The caller must have verified
    /// that the segment's live usage dropped to zero.
    pub fn mark_empty(&mut self, segment: SegmentId) {
        let info = self.segments.get(segment);
        info!(
            %segment,
            num_empty = self.num_empty, num_open = self.num_open, num_closed = self.num_closed,
            "releasing"
        );
        assert!(info.is_closed(), "mark_empty on non-closed {segment}");
        assert!(self.num_closed > 0, "closed count underflow");
        self.num_closed -= 1;
        self.num_empty += 1;
        match info.segment_type {
            Some(SegmentType::Journal) => {
                assert!(self.num_type_journal > 0, "journal type count underflow");
                self.num_type_journal -= 1;
                self.count_release_journal += 1;
            }
            Some(SegmentType::Ool) => {
                assert!(self.num_type_ool > 0, "ool type count underflow");
                self.num_type_ool -= 1;
                self.count_release_ool += 1;
            }
            None => unreachable!("closed segment without a type"),
        }

        if let Some(time) = info.modify_time {
            let count = self
                .modify_times
                .get_mut(&time)
                .unwrap_or_else(|| panic!("modify time {time} missing from multiset"));
            *count -= 1;
            if *count == 0 {
                self.modify_times.remove(&time);
            }
        } else {
            assert!(
                info.num_extents == 0,
                "{segment} has extents but no modify time"
            );
        }

        self.segments.get_mut(segment).set_empty();
    }

    /// Advance an open segment's write frontier.
    pub fn update_written_to(&mut self, segment: SegmentId, new_offset: u64) {
        let segment_size = self.segment_size;
        let info = self.segments.get_mut(segment);
        assert!(info.is_open(), "update_written_to on non-open {segment}");
        assert!(
            new_offset <= segment_size,
            "{segment} write frontier {new_offset} beyond segment size {segment_size}"
        );
        assert!(
            new_offset >= info.written_to,
            "{segment} write frontier regressed: {} -> {new_offset}",
            info.written_to
        );
        let delta = new_offset - info.written_to;
        assert!(
            self.avail_bytes_in_open >= delta,
            "avail_bytes_in_open underflow on {segment}"
        );
        self.avail_bytes_in_open -= delta;
        info.written_to = new_offset;
    }

    /// Fold a modify-time observation into a not-yet-closed segment.
    ///
    /// Used by the recovery scan (segment still EMPTY; the multiset entry is
    /// created by `init_closed`) and by writers as records land in an OPEN
    /// segment (the multiset entry tracks the running mean). `(None, 0)`
    /// observations are no-ops.
    pub fn update_modify_time(
        &mut self,
        segment: SegmentId,
        time: Option<ModifyTime>,
        num_extents: u64,
    ) {
        if num_extents == 0 {
            return;
        }
        let time = time.unwrap_or_else(|| panic!("{segment}: {num_extents} extents without mtime"));
        let info = self.segments.get_mut(segment);
        assert!(!info.is_closed(), "update_modify_time on closed {segment}");
        let previous = info.modify_time;
        info.update_modify_time(time, num_extents);
        let updated = info.modify_time;
        if info.is_open() && previous != updated {
            if let Some(previous) = previous {
                self.multiset_remove(segment, previous);
            }
            *self
                .modify_times
                .entry(updated.unwrap_or_else(|| unreachable!("mtime just set")))
                .or_insert(0) += 1;
        }
    }

    fn multiset_remove(&mut self, segment: SegmentId, time: ModifyTime) {
        let count = self
            .modify_times
            .get_mut(&time)
            .unwrap_or_else(|| panic!("{segment}: modify time {time} missing from multiset"));
        *count -= 1;
        if *count == 0 {
            self.modify_times.remove(&time);
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, segment: SegmentId) -> &SegmentInfo {
        self.segments.get(segment)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &SegmentInfo)> {
        self.segments.iter()
    }

    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.num_segments()
    }

    #[must_use]
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    #[must_use]
    pub fn num_empty(&self) -> usize {
        self.num_empty
    }

    #[must_use]
    pub fn num_open(&self) -> usize {
        self.num_open
    }

    #[must_use]
    pub fn num_closed(&self) -> usize {
        self.num_closed
    }

    #[must_use]
    pub fn num_type_journal(&self) -> usize {
        self.num_type_journal
    }

    #[must_use]
    pub fn num_type_ool(&self) -> usize {
        self.num_type_ool
    }

    #[must_use]
    pub fn num_in_journal_open(&self) -> usize {
        self.num_in_journal_open
    }

    #[must_use]
    pub fn journal_segment_id(&self) -> Option<SegmentId> {
        self.journal_segment_id
    }

    #[must_use]
    pub fn count_open(&self, segment_type: SegmentType) -> u64 {
        match segment_type {
            SegmentType::Journal => self.count_open_journal,
            SegmentType::Ool => self.count_open_ool,
        }
    }

    #[must_use]
    pub fn count_close(&self, segment_type: SegmentType) -> u64 {
        match segment_type {
            SegmentType::Journal => self.count_close_journal,
            SegmentType::Ool => self.count_close_ool,
        }
    }

    #[must_use]
    pub fn count_release(&self, segment_type: SegmentType) -> u64 {
        match segment_type {
            SegmentType::Journal => self.count_release_journal,
            SegmentType::Ool => self.count_release_ool,
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[must_use]
    pub fn avail_bytes_in_open(&self) -> u64 {
        self.avail_bytes_in_open
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.num_empty as u64 * self.segment_size + self.avail_bytes_in_open
    }

    #[must_use]
    pub fn unavailable_bytes(&self) -> u64 {
        assert!(self.total_bytes >= self.available_bytes());
        self.total_bytes - self.available_bytes()
    }

    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn available_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.available_bytes() as f64 / self.total_bytes as f64
    }

    /// Oldest modify time among open/closed segments with extents; the age
    /// bound for benefit scoring.
    #[must_use]
    pub fn time_bound(&self) -> Option<ModifyTime> {
        self.modify_times.keys().next().copied()
    }

    /// Cardinality of the modify-time multiset (test hook).
    #[must_use]
    pub fn modify_times_len(&self) -> usize {
        self.modify_times.values().sum()
    }

    /// Drop all state, keeping nothing registered. Used when a mount restarts
    /// recovery from scratch.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SegmentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEGMENT_SIZE: u64 = 1 << 20;

    fn seg(index: u32) -> SegmentId {
        SegmentId::new(DeviceId::new(0), index)
    }

    fn directory(num_segments: u32) -> SegmentDirectory {
        let mut dir = SegmentDirectory::new();
        dir.add_device(DeviceId::new(0), num_segments, SEGMENT_SIZE);
        dir
    }

    fn open_ool(dir: &mut SegmentDirectory, index: u32, seq: u64) {
        dir.mark_open(
            seg(index),
            SegmentSeq(seq),
            SegmentType::Ool,
            DataCategory::Data,
            ReclaimGeneration(0),
        );
    }

    fn check_aggregates(dir: &SegmentDirectory) {
        assert_eq!(
            dir.num_empty() + dir.num_open() + dir.num_closed(),
            dir.num_segments()
        );
        assert_eq!(
            dir.num_type_journal() + dir.num_type_ool(),
            dir.num_open() + dir.num_closed()
        );
        let open_avail: u64 = dir
            .iter()
            .filter(|(_, info)| info.is_open())
            .map(|(_, info)| SEGMENT_SIZE - info.written_to)
            .sum();
        assert_eq!(dir.avail_bytes_in_open(), open_avail);
        assert_eq!(
            dir.available_bytes(),
            dir.num_empty() as u64 * SEGMENT_SIZE + open_avail
        );
        let with_mtime = dir
            .iter()
            .filter(|(_, info)| !info.is_empty() && info.modify_time.is_some())
            .count();
        assert_eq!(dir.modify_times_len(), with_mtime);
    }

    #[test]
    fn full_lifecycle_restores_aggregates() {
        let mut dir = directory(4);
        let initial_available = dir.available_bytes();
        check_aggregates(&dir);

        open_ool(&mut dir, 0, 1);
        check_aggregates(&dir);
        assert_eq!(dir.available_bytes(), initial_available);

        dir.update_written_to(seg(0), 512 << 10);
        check_aggregates(&dir);
        assert_eq!(dir.available_bytes(), initial_available - (512 << 10));

        dir.update_modify_time(seg(0), Some(ModifyTime(1000)), 4);
        dir.mark_closed(seg(0));
        check_aggregates(&dir);
        assert_eq!(dir.num_closed(), 1);
        assert_eq!(dir.time_bound(), Some(ModifyTime(1000)));

        dir.mark_empty(seg(0));
        check_aggregates(&dir);
        assert_eq!(dir.available_bytes(), initial_available);
        assert_eq!(dir.time_bound(), None);
        assert_eq!(dir.count_open(SegmentType::Ool), 1);
        assert_eq!(dir.count_close(SegmentType::Ool), 1);
        assert_eq!(dir.count_release(SegmentType::Ool), 1);
    }

    #[test]
    fn close_of_full_segment_leaves_avail_unchanged() {
        let mut dir = directory(2);
        open_ool(&mut dir, 0, 1);
        dir.update_written_to(seg(0), SEGMENT_SIZE);
        let avail = dir.available_bytes();
        dir.mark_closed(seg(0));
        assert_eq!(dir.available_bytes(), avail);
        check_aggregates(&dir);
    }

    #[test]
    fn empty_record_is_fully_reset() {
        let mut dir = directory(1);
        open_ool(&mut dir, 0, 7);
        dir.update_written_to(seg(0), 4096);
        dir.mark_closed(seg(0));
        dir.mark_empty(seg(0));
        let info = dir.get(seg(0));
        assert!(info.is_empty());
        assert_eq!(info.seq, None);
        assert_eq!(info.segment_type, None);
        assert_eq!(info.written_to, 0);
        assert_eq!(info.num_extents, 0);
        assert_eq!(info.modify_time, None);
    }

    #[test]
    fn journal_open_tracks_contiguous_seqs() {
        let mut dir = directory(3);
        dir.mark_open(
            seg(0),
            SegmentSeq(5),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
        assert_eq!(dir.journal_segment_id(), Some(seg(0)));
        assert_eq!(dir.num_in_journal_open(), 1);
        dir.mark_closed(seg(0));
        assert_eq!(dir.num_in_journal_open(), 0);
        dir.mark_open(
            seg(1),
            SegmentSeq(6),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
        assert_eq!(dir.journal_segment_id(), Some(seg(1)));
        check_aggregates(&dir);
    }

    #[test]
    #[should_panic(expected = "still open")]
    fn second_open_journal_is_fatal() {
        let mut dir = directory(3);
        dir.mark_open(
            seg(0),
            SegmentSeq(5),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
        dir.mark_open(
            seg(1),
            SegmentSeq(6),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
    }

    #[test]
    #[should_panic(expected = "not contiguous")]
    fn journal_seq_gap_is_fatal() {
        let mut dir = directory(3);
        dir.mark_open(
            seg(0),
            SegmentSeq(5),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
        dir.mark_closed(seg(0));
        dir.mark_open(
            seg(1),
            SegmentSeq(7),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
    }

    #[test]
    #[should_panic(expected = "regressed")]
    fn written_to_regression_is_fatal() {
        let mut dir = directory(1);
        open_ool(&mut dir, 0, 1);
        dir.update_written_to(seg(0), 8192);
        dir.update_written_to(seg(0), 4096);
    }

    #[test]
    #[should_panic(expected = "non-open")]
    fn written_to_on_closed_segment_is_fatal() {
        let mut dir = directory(1);
        open_ool(&mut dir, 0, 1);
        dir.mark_closed(seg(0));
        dir.update_written_to(seg(0), 4096);
    }

    #[test]
    #[should_panic(expected = "mark_open on non-empty")]
    fn reopening_open_segment_is_fatal() {
        let mut dir = directory(2);
        open_ool(&mut dir, 0, 1);
        open_ool(&mut dir, 0, 2);
    }

    #[test]
    fn init_closed_installs_recovered_segment() {
        let mut dir = directory(2);
        dir.update_modify_time(seg(1), Some(ModifyTime(5000)), 12);
        dir.init_closed(
            seg(1),
            SegmentSeq(3),
            SegmentType::Ool,
            DataCategory::Data,
            ReclaimGeneration(1),
        );
        let info = dir.get(seg(1));
        assert!(info.is_closed());
        assert_eq!(info.written_to, SEGMENT_SIZE);
        assert_eq!(info.num_extents, 12);
        assert_eq!(dir.time_bound(), Some(ModifyTime(5000)));
        // recovery installs do not bump close counters
        assert_eq!(dir.count_close(SegmentType::Ool), 0);
        check_aggregates(&dir);
    }

    #[test]
    fn modify_time_accumulates_weighted_mean() {
        let mut dir = directory(1);
        open_ool(&mut dir, 0, 1);
        dir.update_modify_time(seg(0), Some(ModifyTime(1000)), 3);
        dir.update_modify_time(seg(0), Some(ModifyTime(5000)), 1);
        let info = dir.get(seg(0));
        assert_eq!(info.modify_time, Some(ModifyTime(2000)));
        assert_eq!(info.num_extents, 4);
        // no-op observation
        dir.update_modify_time(seg(0), None, 0);
        assert_eq!(dir.get(seg(0)).num_extents, 4);
    }

    #[test]
    fn duplicate_modify_times_multiset_counts() {
        let mut dir = directory(3);
        for i in 0..3 {
            open_ool(&mut dir, i, u64::from(i) + 1);
            dir.update_modify_time(seg(i), Some(ModifyTime(9000)), 1);
            dir.mark_closed(seg(i));
        }
        assert_eq!(dir.modify_times_len(), 3);
        dir.mark_empty(seg(1));
        assert_eq!(dir.modify_times_len(), 2);
        assert_eq!(dir.time_bound(), Some(ModifyTime(9000)));
    }

    #[test]
    fn is_in_journal_boundary() {
        let mut dir = directory(3);
        dir.init_closed(
            seg(0),
            SegmentSeq(4),
            SegmentType::Journal,
            DataCategory::Metadata,
            ReclaimGeneration(0),
        );
        let info = *dir.get(seg(0));
        let tail_at = |s| Some(JournalPosition::new(SegmentSeq(s), 0));
        assert!(info.is_in_journal(tail_at(4)), "inclusive at tail segment");
        assert!(info.is_in_journal(tail_at(3)));
        assert!(!info.is_in_journal(tail_at(5)), "behind the tail");
        assert!(!info.is_in_journal(None));
    }
}
