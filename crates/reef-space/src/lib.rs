#![forbid(unsafe_code)]
//! Per-segment live-byte accounting.
//!
//! Two tracker variants share one interface:
//!
//! 1. **Coarse**: a single live-byte counter per segment; allocation and
//!    release are commutative increments/decrements.
//! 2. **Detailed**: a bitmap of `segment_size / block_size` bits per segment
//!    plus the counter. Every allocation and release is idempotence-checked:
//!    setting an already-set block or clearing an already-clear block is a
//!    logged consistency violation.
//!
//! Counter underflow is fatal in both variants; it cannot arise from valid
//! input.

use reef_types::{SegmentId, SegmentTable};
use tracing::{error, info};

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u64) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u64) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u64) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count set (live) bits in a bitmap byte slice.
#[must_use]
pub fn bitmap_count_set(bitmap: &[u8]) -> u64 {
    bitmap.iter().map(|byte| u64::from(byte.count_ones())).sum()
}

// ── Tracker interface ───────────────────────────────────────────────────────

/// Live-byte accounting over all segments of a mount.
///
/// `allocate`/`release` return the segment's new usage so callers can log
/// and sanity-check without a second lookup.
pub trait SpaceTracker: Send + std::fmt::Debug {
    /// Register a device's segments. Must be called once per device before
    /// any accounting touches it.
    fn add_device(&mut self, device: reef_types::DeviceId, num_segments: u32);

    fn allocate(&mut self, segment: SegmentId, offset: u64, len: u64) -> u64;

    fn release(&mut self, segment: SegmentId, offset: u64, len: u64) -> u64;

    fn get_usage(&self, segment: SegmentId) -> u64;

    fn num_segments(&self) -> usize;

    /// Visit every segment's usage in device-then-index order.
    fn for_each_usage(&self, visit: &mut dyn FnMut(SegmentId, u64));

    /// Log the live regions of one segment at INFO.
    fn dump_usage(&self, segment: SegmentId);

    /// Zero all usage, keeping registered devices.
    fn reset(&mut self);

    /// Usage-wise structural equality; used by debug builds and tests to
    /// cross-check tracker variants.
    fn equals(&self, other: &dyn SpaceTracker) -> bool {
        if self.num_segments() != other.num_segments() {
            error!(
                ours = self.num_segments(),
                theirs = other.num_segments(),
                "tracker segment counts differ"
            );
            return false;
        }
        let mut all_match = true;
        self.for_each_usage(&mut |segment, usage| {
            let theirs = other.get_usage(segment);
            if usage != theirs {
                error!(%segment, ours = usage, theirs, "live byte mismatch");
                all_match = false;
            }
        });
        all_match
    }
}

// ── Coarse tracker ──────────────────────────────────────────────────────────

/// One live-byte counter per segment.
#[derive(Debug, Clone)]
pub struct CoarseTracker {
    live_bytes: SegmentTable<u64>,
}

impl CoarseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            live_bytes: SegmentTable::new(),
        }
    }
}

impl Default for CoarseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceTracker for CoarseTracker {
    fn add_device(&mut self, device: reef_types::DeviceId, num_segments: u32) {
        self.live_bytes.add_device(device, num_segments, 0);
    }

    fn allocate(&mut self, segment: SegmentId, _offset: u64, len: u64) -> u64 {
        let usage = self.live_bytes.get_mut(segment);
        *usage = usage
            .checked_add(len)
            .unwrap_or_else(|| panic!("live byte overflow on {segment}"));
        *usage
    }

    fn release(&mut self, segment: SegmentId, _offset: u64, len: u64) -> u64 {
        let usage = self.live_bytes.get_mut(segment);
        *usage = usage
            .checked_sub(len)
            .unwrap_or_else(|| panic!("live byte underflow on {segment}: releasing {len}"));
        *usage
    }

    fn get_usage(&self, segment: SegmentId) -> u64 {
        *self.live_bytes.get(segment)
    }

    fn num_segments(&self) -> usize {
        self.live_bytes.num_segments()
    }

    fn for_each_usage(&self, visit: &mut dyn FnMut(SegmentId, u64)) {
        for (segment, usage) in self.live_bytes.iter() {
            visit(segment, *usage);
        }
    }

    fn dump_usage(&self, segment: SegmentId) {
        info!(%segment, live_bytes = self.get_usage(segment), "usage dump");
    }

    fn reset(&mut self) {
        let ids: Vec<_> = self.live_bytes.iter().map(|(id, _)| id).collect();
        for id in ids {
            *self.live_bytes.get_mut(id) = 0;
        }
    }
}

// ── Detailed tracker ────────────────────────────────────────────────────────

/// Per-segment block bitmap plus the live-byte counter.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentBitmap {
    bitmap: Vec<u8>,
    live_bytes: u64,
}

impl SegmentBitmap {
    fn with_blocks(num_blocks: u64) -> Self {
        Self {
            bitmap: vec![0; num_blocks.div_ceil(8) as usize],
            live_bytes: 0,
        }
    }
}

/// Bitmap-per-block tracker. Offsets and lengths must be block-aligned.
#[derive(Debug, Clone)]
pub struct DetailedTracker {
    segments: SegmentTable<SegmentBitmap>,
    segment_size: u64,
    block_size: u64,
    blocks_per_segment: u64,
}

impl DetailedTracker {
    #[must_use]
    pub fn new(segment_size: u64, block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        assert!(
            segment_size % block_size == 0,
            "segment size {segment_size} not a multiple of block size {block_size}"
        );
        Self {
            segments: SegmentTable::new(),
            segment_size,
            block_size,
            blocks_per_segment: segment_size / block_size,
        }
    }

    fn block_range(&self, segment: SegmentId, offset: u64, len: u64) -> std::ops::Range<u64> {
        assert!(
            offset % self.block_size == 0 && len % self.block_size == 0,
            "unaligned accounting on {segment}: {offset}~{len} (block size {})",
            self.block_size
        );
        let first = offset / self.block_size;
        let last = (offset + len) / self.block_size;
        assert!(
            last <= self.blocks_per_segment,
            "accounting past segment end on {segment}: {offset}~{len}"
        );
        first..last
    }

    /// Live block count of one segment; test hook for the
    /// popcount-matches-counter invariant.
    #[must_use]
    pub fn count_live_blocks(&self, segment: SegmentId) -> u64 {
        bitmap_count_set(&self.segments.get(segment).bitmap)
    }
}

impl SpaceTracker for DetailedTracker {
    fn add_device(&mut self, device: reef_types::DeviceId, num_segments: u32) {
        self.segments.add_device(
            device,
            num_segments,
            SegmentBitmap::with_blocks(self.blocks_per_segment),
        );
    }

    fn allocate(&mut self, segment: SegmentId, offset: u64, len: u64) -> u64 {
        let blocks = self.block_range(segment, offset, len);
        let entry = self.segments.get_mut(segment);
        let mut seen_violation = false;
        for block in blocks {
            if bitmap_get(&entry.bitmap, block) {
                if !seen_violation {
                    error!(%segment, offset, len, "allocating already-live blocks");
                    seen_violation = true;
                }
                error!(%segment, block_offset = block * self.block_size, "block already live");
            }
            bitmap_set(&mut entry.bitmap, block);
        }
        entry.live_bytes = entry
            .live_bytes
            .checked_add(len)
            .unwrap_or_else(|| panic!("live byte overflow on {segment}"));
        entry.live_bytes
    }

    fn release(&mut self, segment: SegmentId, offset: u64, len: u64) -> u64 {
        let blocks = self.block_range(segment, offset, len);
        let entry = self.segments.get_mut(segment);
        let mut seen_violation = false;
        for block in blocks {
            if !bitmap_get(&entry.bitmap, block) {
                if !seen_violation {
                    error!(%segment, offset, len, "releasing already-dead blocks");
                    seen_violation = true;
                }
                error!(%segment, block_offset = block * self.block_size, "block already dead");
            }
            bitmap_clear(&mut entry.bitmap, block);
        }
        entry.live_bytes = entry
            .live_bytes
            .checked_sub(len)
            .unwrap_or_else(|| panic!("live byte underflow on {segment}: releasing {len}"));
        entry.live_bytes
    }

    fn get_usage(&self, segment: SegmentId) -> u64 {
        self.segments.get(segment).live_bytes
    }

    fn num_segments(&self) -> usize {
        self.segments.num_segments()
    }

    fn for_each_usage(&self, visit: &mut dyn FnMut(SegmentId, u64)) {
        for (segment, entry) in self.segments.iter() {
            visit(segment, entry.live_bytes);
        }
    }

    fn dump_usage(&self, segment: SegmentId) {
        let entry = self.segments.get(segment);
        info!(%segment, live_bytes = entry.live_bytes, "usage dump");
        for block in 0..self.blocks_per_segment {
            if bitmap_get(&entry.bitmap, block) {
                info!(offset = block * self.block_size, "still live");
            }
        }
    }

    fn reset(&mut self) {
        let ids: Vec<_> = self.segments.iter().map(|(id, _)| id).collect();
        for id in ids {
            let entry = self.segments.get_mut(id);
            entry.bitmap.fill(0);
            entry.live_bytes = 0;
        }
    }
}
