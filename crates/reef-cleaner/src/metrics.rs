//! Cleaner metrics.
//!
//! Published through the `metrics` facade so any recorder the embedding
//! store installs (Prometheus exporter, logging recorder, ...) picks them
//! up. The cleaner keeps its own [`GcSnapshot`] as the source of truth;
//! [`publish`] pushes a snapshot into the facade. Monotone counters use
//! absolute updates so re-publishing is idempotent.

use metrics::{counter, describe_counter, describe_gauge, gauge};

// ── Segment population ──────────────────────────────────────────────────────

pub const SEGMENTS_TOTAL: &str = "reef_cleaner_segments_total";
pub const SEGMENT_SIZE_BYTES: &str = "reef_cleaner_segment_size_bytes";
pub const SEGMENTS_EMPTY: &str = "reef_cleaner_segments_empty";
pub const SEGMENTS_OPEN: &str = "reef_cleaner_segments_open";
pub const SEGMENTS_CLOSED: &str = "reef_cleaner_segments_closed";
pub const SEGMENTS_TYPE_JOURNAL: &str = "reef_cleaner_segments_type_journal";
pub const SEGMENTS_TYPE_OOL: &str = "reef_cleaner_segments_type_ool";
pub const SEGMENTS_IN_JOURNAL: &str = "reef_cleaner_segments_in_journal";

// ── Lifecycle event counts ──────────────────────────────────────────────────

pub const SEGMENT_OPENS: &str = "reef_cleaner_segment_opens_total";
pub const SEGMENT_CLOSES: &str = "reef_cleaner_segment_closes_total";
pub const SEGMENT_RELEASES: &str = "reef_cleaner_segment_releases_total";

// ── Space ───────────────────────────────────────────────────────────────────

pub const TOTAL_BYTES: &str = "reef_cleaner_total_bytes";
pub const AVAILABLE_BYTES: &str = "reef_cleaner_available_bytes";
pub const USED_BYTES: &str = "reef_cleaner_used_bytes";
pub const UNAVAILABLE_RECLAIMABLE_BYTES: &str = "reef_cleaner_unavailable_reclaimable_bytes";
pub const UNAVAILABLE_UNRECLAIMABLE_BYTES: &str = "reef_cleaner_unavailable_unreclaimable_bytes";
pub const PROJECTED_USED_BYTES: &str = "reef_cleaner_projected_used_bytes";
pub const PROJECTED_USED_BYTES_SUM: &str = "reef_cleaner_projected_used_bytes_sum";
pub const PROJECTED_COUNT: &str = "reef_cleaner_projected_count_total";

// ── Backpressure ────────────────────────────────────────────────────────────

pub const IO_COUNT: &str = "reef_cleaner_io_total";
pub const IO_BLOCKED: &str = "reef_cleaner_io_blocked_total";
pub const IO_BLOCKED_TRIM: &str = "reef_cleaner_io_blocked_trim_total";
pub const IO_BLOCKED_RECLAIM: &str = "reef_cleaner_io_blocked_reclaim_total";
pub const IO_BLOCKED_SUM: &str = "reef_cleaner_io_blocked_sum";

// ── Reclaim ─────────────────────────────────────────────────────────────────

pub const RECLAIMED_BYTES: &str = "reef_cleaner_reclaimed_bytes_total";
pub const RECLAIMED_SEGMENT_BYTES: &str = "reef_cleaner_reclaimed_segment_bytes_total";
pub const CLOSED_JOURNAL_USED_BYTES: &str = "reef_cleaner_closed_journal_used_bytes_total";
pub const CLOSED_JOURNAL_TOTAL_BYTES: &str = "reef_cleaner_closed_journal_total_bytes_total";
pub const CLOSED_OOL_USED_BYTES: &str = "reef_cleaner_closed_ool_used_bytes_total";
pub const CLOSED_OOL_TOTAL_BYTES: &str = "reef_cleaner_closed_ool_total_bytes_total";

// ── Ratios and distribution ─────────────────────────────────────────────────

pub const AVAILABLE_RATIO: &str = "reef_cleaner_available_ratio";
pub const RECLAIM_RATIO: &str = "reef_cleaner_reclaim_ratio";
pub const SEGMENT_UTILIZATION: &str = "reef_cleaner_segment_utilization";

/// Labels for the ten utilization buckets `[0.0, 0.1) .. [0.9, 1.0]`.
pub const UTIL_BUCKET_LABELS: [&str; 10] = [
    "0.0-0.1", "0.1-0.2", "0.2-0.3", "0.3-0.4", "0.4-0.5", "0.5-0.6", "0.6-0.7", "0.7-0.8",
    "0.8-0.9", "0.9-1.0",
];

/// Registers all cleaner metric descriptions.
///
/// Call once at store startup after installing the metrics recorder.
pub fn register_metrics() {
    describe_gauge!(SEGMENTS_TOTAL, "Number of segments");
    describe_gauge!(SEGMENT_SIZE_BYTES, "Bytes per segment");
    describe_gauge!(SEGMENTS_EMPTY, "Segments in the EMPTY state");
    describe_gauge!(SEGMENTS_OPEN, "Segments in the OPEN state");
    describe_gauge!(SEGMENTS_CLOSED, "Segments in the CLOSED state");
    describe_gauge!(SEGMENTS_TYPE_JOURNAL, "Segments typed journal");
    describe_gauge!(SEGMENTS_TYPE_OOL, "Segments typed out-of-line");
    describe_gauge!(SEGMENTS_IN_JOURNAL, "Segments covered by the journal");
    describe_counter!(SEGMENT_OPENS, "Segment open operations by type");
    describe_counter!(SEGMENT_CLOSES, "Segment close operations by type");
    describe_counter!(SEGMENT_RELEASES, "Segment release operations by type");
    describe_gauge!(TOTAL_BYTES, "Total space");
    describe_gauge!(AVAILABLE_BYTES, "Writable space");
    describe_gauge!(USED_BYTES, "Space occupied by live extents");
    describe_gauge!(
        UNAVAILABLE_RECLAIMABLE_BYTES,
        "Unavailable space that reclaim can win back"
    );
    describe_gauge!(
        UNAVAILABLE_UNRECLAIMABLE_BYTES,
        "Unavailable space reclaim cannot touch"
    );
    describe_gauge!(PROJECTED_USED_BYTES, "Bytes reserved by in-flight writers");
    describe_counter!(PROJECTED_USED_BYTES_SUM, "Running sum of projected usage");
    describe_counter!(PROJECTED_COUNT, "Projected-usage reservations");
    describe_counter!(IO_COUNT, "Foreground IOs admitted through the gate");
    describe_counter!(IO_BLOCKED, "Foreground IOs blocked by GC");
    describe_counter!(IO_BLOCKED_TRIM, "Foreground IOs blocked by journal trim");
    describe_counter!(IO_BLOCKED_RECLAIM, "Foreground IOs blocked by reclaim");
    describe_counter!(IO_BLOCKED_SUM, "Running sum of concurrently blocked IOs");
    describe_counter!(RECLAIMED_BYTES, "Live bytes rewritten by reclaim");
    describe_counter!(
        RECLAIMED_SEGMENT_BYTES,
        "Segment bytes returned to EMPTY by reclaim"
    );
    describe_counter!(
        CLOSED_JOURNAL_USED_BYTES,
        "Live bytes at close time, journal segments"
    );
    describe_counter!(
        CLOSED_JOURNAL_TOTAL_BYTES,
        "Total bytes of closed journal segments"
    );
    describe_counter!(
        CLOSED_OOL_USED_BYTES,
        "Live bytes at close time, ool segments"
    );
    describe_counter!(CLOSED_OOL_TOTAL_BYTES, "Total bytes of closed ool segments");
    describe_gauge!(AVAILABLE_RATIO, "Available space over total space");
    describe_gauge!(RECLAIM_RATIO, "Reclaimable space over unavailable space");
    describe_gauge!(
        SEGMENT_UTILIZATION,
        "Segment count per utilization bucket"
    );
}

/// Point-in-time view of the cleaner's accounting, for metric publication
/// and for tests.
#[derive(Debug, Clone, PartialEq)]
pub struct GcSnapshot {
    pub num_segments: usize,
    pub segment_size: u64,
    pub segments_in_journal: usize,
    pub num_empty: usize,
    pub num_open: usize,
    pub num_closed: usize,
    pub num_type_journal: usize,
    pub num_type_ool: usize,

    pub count_open_journal: u64,
    pub count_open_ool: u64,
    pub count_close_journal: u64,
    pub count_close_ool: u64,
    pub count_release_journal: u64,
    pub count_release_ool: u64,

    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub unavailable_reclaimable_bytes: u64,
    pub unavailable_unreclaimable_bytes: u64,

    pub projected_used_bytes: u64,
    pub projected_used_bytes_sum: u64,
    pub projected_count: u64,

    pub io_count: u64,
    pub io_blocked_count: u64,
    pub io_blocked_count_trim: u64,
    pub io_blocked_count_reclaim: u64,
    pub io_blocked_sum: u64,

    pub reclaimed_bytes: u64,
    pub reclaimed_segment_bytes: u64,
    pub closed_journal_used_bytes: u64,
    pub closed_journal_total_bytes: u64,
    pub closed_ool_used_bytes: u64,
    pub closed_ool_total_bytes: u64,

    pub available_ratio: f64,
    pub reclaim_ratio: f64,
    pub segment_util_buckets: [u64; 10],
}

/// Push a snapshot into the metrics facade.
#[expect(clippy::cast_precision_loss)]
pub fn publish(snap: &GcSnapshot) {
    gauge!(SEGMENTS_TOTAL).set(snap.num_segments as f64);
    gauge!(SEGMENT_SIZE_BYTES).set(snap.segment_size as f64);
    gauge!(SEGMENTS_IN_JOURNAL).set(snap.segments_in_journal as f64);
    gauge!(SEGMENTS_EMPTY).set(snap.num_empty as f64);
    gauge!(SEGMENTS_OPEN).set(snap.num_open as f64);
    gauge!(SEGMENTS_CLOSED).set(snap.num_closed as f64);
    gauge!(SEGMENTS_TYPE_JOURNAL).set(snap.num_type_journal as f64);
    gauge!(SEGMENTS_TYPE_OOL).set(snap.num_type_ool as f64);

    counter!(SEGMENT_OPENS, "type" => "journal").absolute(snap.count_open_journal);
    counter!(SEGMENT_OPENS, "type" => "ool").absolute(snap.count_open_ool);
    counter!(SEGMENT_CLOSES, "type" => "journal").absolute(snap.count_close_journal);
    counter!(SEGMENT_CLOSES, "type" => "ool").absolute(snap.count_close_ool);
    counter!(SEGMENT_RELEASES, "type" => "journal").absolute(snap.count_release_journal);
    counter!(SEGMENT_RELEASES, "type" => "ool").absolute(snap.count_release_ool);

    gauge!(TOTAL_BYTES).set(snap.total_bytes as f64);
    gauge!(AVAILABLE_BYTES).set(snap.available_bytes as f64);
    gauge!(USED_BYTES).set(snap.used_bytes as f64);
    gauge!(UNAVAILABLE_RECLAIMABLE_BYTES).set(snap.unavailable_reclaimable_bytes as f64);
    gauge!(UNAVAILABLE_UNRECLAIMABLE_BYTES).set(snap.unavailable_unreclaimable_bytes as f64);
    gauge!(PROJECTED_USED_BYTES).set(snap.projected_used_bytes as f64);
    counter!(PROJECTED_USED_BYTES_SUM).absolute(snap.projected_used_bytes_sum);
    counter!(PROJECTED_COUNT).absolute(snap.projected_count);

    counter!(IO_COUNT).absolute(snap.io_count);
    counter!(IO_BLOCKED).absolute(snap.io_blocked_count);
    counter!(IO_BLOCKED_TRIM).absolute(snap.io_blocked_count_trim);
    counter!(IO_BLOCKED_RECLAIM).absolute(snap.io_blocked_count_reclaim);
    counter!(IO_BLOCKED_SUM).absolute(snap.io_blocked_sum);

    counter!(RECLAIMED_BYTES).absolute(snap.reclaimed_bytes);
    counter!(RECLAIMED_SEGMENT_BYTES).absolute(snap.reclaimed_segment_bytes);
    counter!(CLOSED_JOURNAL_USED_BYTES).absolute(snap.closed_journal_used_bytes);
    counter!(CLOSED_JOURNAL_TOTAL_BYTES).absolute(snap.closed_journal_total_bytes);
    counter!(CLOSED_OOL_USED_BYTES).absolute(snap.closed_ool_used_bytes);
    counter!(CLOSED_OOL_TOTAL_BYTES).absolute(snap.closed_ool_total_bytes);

    gauge!(AVAILABLE_RATIO).set(snap.available_ratio);
    gauge!(RECLAIM_RATIO).set(snap.reclaim_ratio);
    for (label, count) in UTIL_BUCKET_LABELS.iter().zip(snap.segment_util_buckets) {
        gauge!(SEGMENT_UTILIZATION, "bucket" => *label).set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_publish_without_recorder_are_noops() {
        register_metrics();
        let snap = GcSnapshot {
            num_segments: 4,
            segment_size: 1 << 20,
            segments_in_journal: 1,
            num_empty: 2,
            num_open: 1,
            num_closed: 1,
            num_type_journal: 1,
            num_type_ool: 1,
            count_open_journal: 1,
            count_open_ool: 1,
            count_close_journal: 0,
            count_close_ool: 1,
            count_release_journal: 0,
            count_release_ool: 0,
            total_bytes: 4 << 20,
            available_bytes: 2 << 20,
            used_bytes: 1 << 20,
            unavailable_reclaimable_bytes: 1 << 20,
            unavailable_unreclaimable_bytes: 1 << 20,
            projected_used_bytes: 0,
            projected_used_bytes_sum: 0,
            projected_count: 0,
            io_count: 0,
            io_blocked_count: 0,
            io_blocked_count_trim: 0,
            io_blocked_count_reclaim: 0,
            io_blocked_sum: 0,
            reclaimed_bytes: 0,
            reclaimed_segment_bytes: 0,
            closed_journal_used_bytes: 0,
            closed_journal_total_bytes: 0,
            closed_ool_used_bytes: 0,
            closed_ool_total_bytes: 1 << 20,
            available_ratio: 0.5,
            reclaim_ratio: 0.5,
            segment_util_buckets: [2, 0, 0, 0, 0, 1, 0, 0, 0, 1],
        };
        publish(&snap);
    }
}
