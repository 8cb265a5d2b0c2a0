//! Collaborator contracts.
//!
//! The cleaner drives three external collaborators: the device group (segment
//! I/O and physical release), the back-reference index (physical-to-logical
//! mappings), and the extent callback (the transaction manager's surface for
//! finding live extents and rewriting them). All operations that may suspend
//! take a `cx` capability context and are checkpointed by their
//! implementations.
//!
//! The cleaner and the extent callback reference each other (the callback
//! reports extent births and deaths back through `mark_space_used`/
//! `mark_space_free`). The callback is registered after construction and
//! should address the cleaner through a non-owning handle.

use asupersync::Cx;
use reef_error::{CleanerError, Result};
use reef_types::{
    DeviceId, JournalPosition, ModifyTime, PhysicalAddr, ReclaimGeneration, RecordHeader,
    SegmentHeader, SegmentId, SegmentNonce, SegmentTail,
};
use tracing::debug;

// ── Transactions ────────────────────────────────────────────────────────────

/// What a cleaner transaction is for; collaborators may use this to pick
/// journal record types and conflict-resolution priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Read,
    TrimDirty,
    TrimAlloc,
    Reclaim,
}

/// A transaction opened through the extent callback.
///
/// The cleaner only carries it between collaborator calls and, on the final
/// reclaim cycle of a victim, marks the segment for release before
/// submitting.
#[derive(Debug)]
pub struct Transaction {
    kind: TransactionKind,
    name: &'static str,
    id: u64,
    segment_to_release: Option<SegmentId>,
}

impl Transaction {
    /// Construct a transaction handle. Called by `ExtentCallback`
    /// implementations from `open_transaction`; `id` is the implementation's
    /// own correlation token.
    #[must_use]
    pub fn new(kind: TransactionKind, name: &'static str, id: u64) -> Self {
        Self {
            kind,
            name,
            id,
            segment_to_release: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record that committing this transaction ends the reclaim of `segment`.
    pub fn mark_segment_to_release(&mut self, segment: SegmentId) {
        assert!(
            self.segment_to_release.is_none(),
            "transaction already releases {}",
            self.segment_to_release.unwrap()
        );
        self.segment_to_release = Some(segment);
    }

    #[must_use]
    pub fn segment_to_release(&self) -> Option<SegmentId> {
        self.segment_to_release
    }
}

// ── Extent vocabulary ───────────────────────────────────────────────────────

/// Logical address of an extent in the store's address space. Opaque to the
/// cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalAddr(pub u64);

/// Extent type token, passed through to the extent callback untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtentKind(pub u16);

/// A live extent as the extent callback reports it; the unit of rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub kind: ExtentKind,
    pub paddr: PhysicalAddr,
    pub laddr: Option<LogicalAddr>,
    pub len: u64,
}

/// A persistent back-reference: physical extent -> logical owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackrefMapping {
    pub paddr: PhysicalAddr,
    pub laddr: LogicalAddr,
    pub len: u64,
    pub kind: ExtentKind,
}

/// A cached (not yet merged) back-reference entry. `laddr == None` is a
/// tombstone: the extent at `paddr` died after the persistent mapping was
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackrefEntry {
    pub paddr: PhysicalAddr,
    pub laddr: Option<LogicalAddr>,
    pub len: u64,
    pub kind: ExtentKind,
}

impl From<BackrefMapping> for BackrefEntry {
    fn from(mapping: BackrefMapping) -> Self {
        Self {
            paddr: mapping.paddr,
            laddr: Some(mapping.laddr),
            len: mapping.len,
            kind: mapping.kind,
        }
    }
}

// ── Device group ────────────────────────────────────────────────────────────

/// Geometry of one segment-typed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub device: DeviceId,
    pub num_segments: u32,
    pub segment_size: u64,
    pub block_size: u64,
}

/// The block-device drivers, as the cleaner sees them.
pub trait DeviceGroup: Send + Sync {
    /// Registered devices; stable for the lifetime of the mount.
    fn devices(&self) -> Vec<DeviceSpec>;

    /// Read a segment's header. `NotFound`/`NoData` mean the segment was
    /// never written and is EMPTY.
    fn read_segment_header(&self, cx: &Cx, segment: SegmentId) -> Result<SegmentHeader>;

    /// Read a segment's tail. `NoData` means the tail was never written.
    fn read_segment_tail(&self, cx: &Cx, segment: SegmentId) -> Result<SegmentTail>;

    /// Scan every valid record in `segment`, invoking `handler` with each
    /// decoded record header. The handler may return an error to abort the
    /// scan.
    fn scan_valid_records(
        &self,
        cx: &Cx,
        segment: SegmentId,
        nonce: SegmentNonce,
        handler: &mut dyn FnMut(&RecordHeader) -> Result<()>,
    ) -> Result<()>;

    /// Physically release a segment for reuse. Completion is the reuse
    /// barrier: once this returns, the old incarnation is unreadable.
    fn release_segment(&self, cx: &Cx, segment: SegmentId) -> Result<()>;
}

// ── Back-reference index ────────────────────────────────────────────────────

/// Reverse physical-to-logical index over persisted extents.
pub trait BackrefIndex: Send + Sync {
    /// Persistent mappings intersecting `[start, end)`.
    fn get_mappings(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        start: PhysicalAddr,
        end: PhysicalAddr,
    ) -> Result<Vec<BackrefMapping>>;

    /// Merge cached back-refs into the persistent index, up to `limit` and
    /// `byte_budget` bytes' worth. Returns the new alloc tail when merging
    /// advanced it.
    fn merge_cached_backrefs(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        limit: JournalPosition,
        byte_budget: u64,
    ) -> Result<Option<JournalPosition>>;

    /// Cached entries intersecting `[start, end)`. Purely in-memory.
    fn cached_entries_in_range(&self, start: PhysicalAddr, end: PhysicalAddr) -> Vec<BackrefEntry>;

    /// Load the cached back-ref extents intersecting `[start, end)` into the
    /// transaction so a subsequent submit can relocate them.
    fn retrieve_cached_extents(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        start: PhysicalAddr,
        end: PhysicalAddr,
    ) -> Result<()>;
}

// ── Extent callback ─────────────────────────────────────────────────────────

/// The transaction manager's surface: opening and submitting cleaner
/// transactions, finding live/dirty extents, and rewriting them.
pub trait ExtentCallback: Send + Sync {
    fn open_transaction(
        &self,
        cx: &Cx,
        kind: TransactionKind,
        name: &'static str,
    ) -> Result<Transaction>;

    /// Up to `byte_budget` bytes of dirty extents whose journal positions
    /// lie strictly below `limit`, oldest first.
    fn get_next_dirty_extents(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        limit: JournalPosition,
        byte_budget: u64,
    ) -> Result<Vec<Extent>>;

    /// The live extents currently stored at `entry.paddr`, or empty if the
    /// address is dead. A single back-ref may expand to several live extents
    /// after splits.
    fn get_extents_if_live(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        entry: &BackrefEntry,
    ) -> Result<Vec<Extent>>;

    /// Stage a rewrite of `extent` into `generation`, carrying `modify_time`
    /// forward (reclaim) or resetting it (dirty rewrites pass `None`).
    fn rewrite_extent(
        &self,
        cx: &Cx,
        txn: &mut Transaction,
        extent: &Extent,
        generation: ReclaimGeneration,
        modify_time: Option<ModifyTime>,
    ) -> Result<()>;

    /// Commit the transaction. `new_alloc_tail` carries an advanced alloc
    /// tail from a trim-alloc cycle into the journal.
    fn submit_transaction(
        &self,
        cx: &Cx,
        txn: Transaction,
        new_alloc_tail: Option<JournalPosition>,
    ) -> Result<()>;
}

// ── Conflict retry ──────────────────────────────────────────────────────────

/// Replay `body` with fresh reads until it either succeeds or fails with a
/// terminal error. Collaborator transactions signal retryable aborts with
/// [`CleanerError::TransientConflict`]; everything else propagates.
pub fn repeat_on_conflict<T>(cx: &Cx, mut body: impl FnMut(&Cx) -> Result<T>) -> Result<T> {
    loop {
        match body(cx) {
            Err(CleanerError::TransientConflict(name)) => {
                debug!(transaction = name, "conflict, retrying");
            }
            other => return other,
        }
    }
}
