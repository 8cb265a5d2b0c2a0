#![forbid(unsafe_code)]
//! Core types for the reefstore segment cleaner.
//!
//! Identifiers, physical addresses, journal positions, reclaim generations,
//! extent modify-time arithmetic, and the on-disk-facing header/tail types
//! that mount recovery consumes. Binary encoding of the on-disk types is the
//! device and journal collaborators' concern; the cleaner only sees them
//! decoded.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Device and segment identifiers ──────────────────────────────────────────

/// Identifier of a segment-typed backing device.
///
/// Valid ids occupy the low 7 bits; the store supports at most 128
/// segment-typed devices per mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u8);

impl DeviceId {
    pub const MAX_VALID: u8 = 0x7f;

    /// Create a device id. Ids come from the device group at mount; a value
    /// outside the valid range is a wiring bug, not an input error.
    #[must_use]
    pub fn new(raw: u8) -> Self {
        assert!(
            raw <= Self::MAX_VALID,
            "device id {raw} exceeds maximum {}",
            Self::MAX_VALID
        );
        Self(raw)
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Identifier of one segment: (device, per-device segment index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId {
    pub device: DeviceId,
    pub index: u32,
}

impl SegmentId {
    #[must_use]
    pub fn new(device: DeviceId, index: u32) -> Self {
        Self { device, index }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg({}:{})", self.device.get(), self.index)
    }
}

/// Monotonic segment incarnation counter; distinguishes reuses of the same
/// physical segment. Journal segment seqs are additionally contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentSeq(pub u64);

impl SegmentSeq {
    #[must_use]
    pub fn successor(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq({})", self.0)
    }
}

/// Random per-incarnation nonce written into both the segment header and
/// tail; a mismatch means the tail was never written for this incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentNonce(pub u32);

// ── Physical addresses and journal positions ────────────────────────────────

/// Byte address within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalAddr {
    pub segment: SegmentId,
    pub offset: u64,
}

impl PhysicalAddr {
    #[must_use]
    pub fn new(segment: SegmentId, offset: u64) -> Self {
        Self { segment, offset }
    }

    /// End address of an extent starting here, `None` on overflow.
    #[must_use]
    pub fn checked_end(self, len: u64) -> Option<Self> {
        self.offset.checked_add(len).map(|offset| Self {
            segment: self.segment,
            offset,
        })
    }
}

impl fmt::Display for PhysicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.segment, self.offset)
    }
}

/// A point in the journal: a byte offset within the journal segment bearing
/// `seq`. Totally ordered by `(seq, offset)`.
///
/// The physical segment that holds a given seq is the journal collaborator's
/// knowledge; the cleaner only compares positions and steps them backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JournalPosition {
    pub seq: SegmentSeq,
    pub offset: u64,
}

impl JournalPosition {
    #[must_use]
    pub fn new(seq: SegmentSeq, offset: u64) -> Self {
        Self { seq, offset }
    }

    /// This position minus `bytes` of journal space, saturating at the
    /// journal origin.
    ///
    /// Journal segment seqs are contiguous, so the journal is the linear byte
    /// space `seq * segment_size + offset`.
    #[must_use]
    pub fn step_back(self, bytes: u64, segment_size: u64) -> Self {
        assert!(segment_size > 0, "segment size must be non-zero");
        assert!(
            self.offset <= segment_size,
            "journal offset {} beyond segment size {segment_size}",
            self.offset
        );
        let linear = self
            .seq
            .0
            .saturating_mul(segment_size)
            .saturating_add(self.offset);
        let back = linear.saturating_sub(bytes);
        Self {
            seq: SegmentSeq(back / segment_size),
            offset: back % segment_size,
        }
    }
}

impl fmt::Display for JournalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jpos({}:{})", self.seq.0, self.offset)
    }
}

// ── Segment classification ──────────────────────────────────────────────────

/// What a non-empty segment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentType {
    /// Holds the recovery log.
    Journal,
    /// Holds relocated ("out of line") extent data.
    Ool,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Journal => write!(f, "journal"),
            Self::Ool => write!(f, "ool"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataCategory {
    Metadata,
    Data,
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "md"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// Reclaim generation: rewrite-count class controlling placement.
///
/// Extents promoted by reclaim move one generation towards the terminal cold
/// generation and then stay there. Dirty-journal rewrites always land in
/// [`ReclaimGeneration::DIRTY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReclaimGeneration(pub u8);

impl ReclaimGeneration {
    /// Number of generations; valid generations are `0..COUNT`.
    pub const COUNT: u8 = 3;
    /// Placement generation for dirty-journal rewrites.
    pub const DIRTY: Self = Self(1);
    /// Terminal cold generation; promotion stops here.
    pub const TERMINAL: Self = Self(Self::COUNT - 1);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 < Self::COUNT
    }

    /// The generation a reclaim rewrite targets.
    #[must_use]
    pub fn promoted(self) -> Self {
        assert!(self.is_valid(), "invalid generation {}", self.0);
        if self == Self::TERMINAL {
            self
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for ReclaimGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen({})", self.0)
    }
}

// ── Extent modify time ──────────────────────────────────────────────────────

/// Extent modification time, milliseconds since the Unix epoch.
///
/// Absence ("no extents written yet") is `Option<ModifyTime>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModifyTime(pub i64);

impl ModifyTime {
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// The current wall-clock time. A clock before the epoch yields the
    /// epoch itself; scoring treats anomalous clocks defensively anyway.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self(ms as i64)
    }

    /// Extent-count-weighted mean of two observations.
    ///
    /// Division before multiplication keeps the weighted sum in range for
    /// epoch-scale millisecond counts.
    #[must_use]
    #[expect(clippy::cast_possible_wrap)]
    pub fn average(t1: Self, n1: u64, t2: Self, n2: u64) -> Self {
        let total = n1.checked_add(n2).expect("extent counts overflow");
        assert!(total > 0, "cannot average over zero extents");
        let total = total as i64;
        Self(t1.0 / total * (n1 as i64) + t2.0 / total * (n2 as i64))
    }
}

impl fmt::Display for ModifyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ── On-disk-facing types ────────────────────────────────────────────────────

/// Fixed-size header at the start of every written segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub segment_seq: SegmentSeq,
    pub physical_segment_id: SegmentId,
    /// Persisted dirty-journal tail at the time this segment was opened.
    pub dirty_tail: Option<JournalPosition>,
    /// Persisted alloc-journal tail at the time this segment was opened.
    pub alloc_tail: Option<JournalPosition>,
    pub segment_nonce: SegmentNonce,
    pub segment_type: SegmentType,
    pub category: DataCategory,
    pub generation: ReclaimGeneration,
}

/// Aligned tail written at the end of a cleanly closed segment.
///
/// `segment_nonce` must match the header's; otherwise the tail belongs to a
/// previous incarnation and the segment has to be rescanned record by record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTail {
    pub segment_seq: SegmentSeq,
    pub physical_segment_id: SegmentId,
    pub segment_nonce: SegmentNonce,
    pub segment_type: SegmentType,
    /// Average mtime of the extents in the segment; `None` iff
    /// `num_extents == 0`.
    pub modify_time: Option<ModifyTime>,
    pub num_extents: u64,
}

/// Per-record header surfaced by the device group's valid-record scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub num_extents: u32,
    pub modify_time: Option<ModifyTime>,
}

// ── Dense per-segment table ─────────────────────────────────────────────────

/// Compact mapping from [`SegmentId`] to a value, dense per device.
///
/// Devices register once with their segment count; lookups outside a
/// registered device or segment range are wiring bugs and assert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTable<T> {
    devices: Vec<Vec<T>>,
    total_segments: usize,
}

impl<T> SegmentTable<T> {
    #[must_use]
    pub fn new() -> Self {
        let mut devices = Vec::new();
        devices.resize_with(usize::from(DeviceId::MAX_VALID) + 1, Vec::new);
        Self {
            devices,
            total_segments: 0,
        }
    }

    /// Register a device with `num_segments` slots initialized to `init`.
    pub fn add_device(&mut self, device: DeviceId, num_segments: u32, init: T)
    where
        T: Clone,
    {
        assert!(num_segments > 0, "device {device:?} has no segments");
        let slot = &mut self.devices[device.index()];
        assert!(slot.is_empty(), "device {device:?} registered twice");
        slot.resize(num_segments as usize, init);
        self.total_segments += num_segments as usize;
    }

    #[must_use]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.devices[id.device.index()].len() > id.index as usize
    }

    #[must_use]
    pub fn get(&self, id: SegmentId) -> &T {
        assert!(self.contains(id), "unknown segment {id}");
        &self.devices[id.device.index()][id.index as usize]
    }

    pub fn get_mut(&mut self, id: SegmentId) -> &mut T {
        assert!(self.contains(id), "unknown segment {id}");
        &mut self.devices[id.device.index()][id.index as usize]
    }

    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.total_segments
    }

    /// Iterate `(SegmentId, &T)` in device-then-index order.
    #[expect(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &T)> {
        self.devices.iter().enumerate().flat_map(|(d, segs)| {
            segs.iter()
                .enumerate()
                .map(move |(i, value)| (SegmentId::new(DeviceId::new(d as u8), i as u32), value))
        })
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.devices
            .resize_with(usize::from(DeviceId::MAX_VALID) + 1, Vec::new);
        self.total_segments = 0;
    }
}

impl<T> Default for SegmentTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Reclaim cursor ──────────────────────────────────────────────────────────

/// Progress of an in-flight reclaim job over one victim segment.
///
/// The cursor advances by a fixed byte quantum per GC cycle so that a single
/// cycle stays bounded regardless of segment size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimCursor {
    segment: SegmentId,
    generation: ReclaimGeneration,
    target_generation: ReclaimGeneration,
    segment_size: u64,
    start: u64,
    end: u64,
}

impl ReclaimCursor {
    #[must_use]
    pub fn new(segment: SegmentId, generation: ReclaimGeneration, segment_size: u64) -> Self {
        assert!(generation.is_valid(), "invalid generation {generation}");
        assert!(segment_size > 0, "segment size must be non-zero");
        Self {
            segment,
            generation,
            target_generation: generation.promoted(),
            segment_size,
            start: 0,
            end: 0,
        }
    }

    /// Slide the window forward by up to `quantum` bytes.
    pub fn advance(&mut self, quantum: u64) {
        assert!(!self.is_complete(), "advancing a complete cursor");
        assert!(quantum > 0, "reclaim quantum must be non-zero");
        self.start = self.end;
        self.end = (self.end + quantum).min(self.segment_size);
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.end == self.segment_size
    }

    #[must_use]
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    #[must_use]
    pub fn target_generation(&self) -> ReclaimGeneration {
        self.target_generation
    }

    #[must_use]
    pub fn start_addr(&self) -> PhysicalAddr {
        PhysicalAddr::new(self.segment, self.start)
    }

    #[must_use]
    pub fn end_addr(&self) -> PhysicalAddr {
        PhysicalAddr::new(self.segment, self.end)
    }
}
