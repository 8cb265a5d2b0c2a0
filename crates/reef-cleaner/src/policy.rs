//! Victim-selection scoring formulas.
//!
//! The formula is a compile-time policy: the cleaner is generic over a
//! [`ScorePolicy`], so the two formulas a build does not use are dead code.
//! All three score a closed segment from its utilization `u = live_bytes /
//! segment_size` (higher score = better victim):
//!
//! - **Greedy**: `1 - u`; ignores age entirely.
//! - **Cost-benefit** (default): `(1 - u) * age / (2u)`: free space gained,
//!   weighted by how long the data has sat still, against the cost of
//!   rewriting `u` and re-reclaiming it later.
//! - **Benefit**: quadratic in `u` with the segment's age normalized
//!   against the oldest live segment.

use reef_types::ModifyTime;

/// A victim-scoring formula. `now` and `bound` are only sampled when the
/// policy declares it needs them.
pub trait ScorePolicy: Send + Sync + 'static {
    /// Whether scoring reads the current wall-clock time.
    const NEEDS_NOW: bool;
    /// Whether scoring reads the directory's oldest-modify-time bound.
    const NEEDS_BOUND: bool;

    /// Score one candidate. `util` is in `[0, 1)`; a fully-live segment is
    /// never a meaningful candidate and is rejected before scoring.
    fn score(
        util: f64,
        now: Option<ModifyTime>,
        modify_time: Option<ModifyTime>,
        bound: Option<ModifyTime>,
    ) -> f64;
}

/// `score = 1 - u`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl ScorePolicy for Greedy {
    const NEEDS_NOW: bool = false;
    const NEEDS_BOUND: bool = false;

    fn score(
        util: f64,
        _now: Option<ModifyTime>,
        _modify_time: Option<ModifyTime>,
        _bound: Option<ModifyTime>,
    ) -> f64 {
        1.0 - util
    }
}

/// `score = (1 - u)(now - mtime) / (2u)`; empty segments score infinity, a
/// non-monotone clock drops the age factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostBenefit;

impl ScorePolicy for CostBenefit {
    const NEEDS_NOW: bool = true;
    const NEEDS_BOUND: bool = false;

    #[expect(clippy::cast_precision_loss)]
    fn score(
        util: f64,
        now: Option<ModifyTime>,
        modify_time: Option<ModifyTime>,
        _bound: Option<ModifyTime>,
    ) -> f64 {
        if util == 0.0 {
            return f64::INFINITY;
        }
        let now = now.expect("cost-benefit scoring requires a clock sample");
        if let Some(mtime) = modify_time {
            if now > mtime {
                let age = (now.as_millis() - mtime.as_millis()) as f64;
                return (1.0 - util) * age / (2.0 * util);
            }
        }
        // clock is wrong (or the mtime is missing); score without the age
        (1.0 - util) / (2.0 * util)
    }
}

/// Quadratic benefit formula with age factor `a = (now - mtime) /
/// (now - bound)`: `score = (1 - 2a)u^2 + (2a - 2)u + 1`. An unusable age
/// (missing bound or mtime, or a non-monotone clock) defaults `a` to 0.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct Benefit;

impl ScorePolicy for Benefit {
    const NEEDS_NOW: bool = true;
    const NEEDS_BOUND: bool = true;

    #[expect(clippy::cast_precision_loss)]
    fn score(
        util: f64,
        now: Option<ModifyTime>,
        modify_time: Option<ModifyTime>,
        bound: Option<ModifyTime>,
    ) -> f64 {
        let now = now.expect("benefit scoring requires a clock sample");
        let mut age_factor = 0.5;
        if let (Some(bound), Some(mtime)) = (bound, modify_time) {
            if now > mtime {
                assert!(
                    mtime >= bound,
                    "segment mtime {mtime} older than the directory bound {bound}"
                );
                let age_span = (now.as_millis() - bound.as_millis()) as f64;
                let age_segment = (now.as_millis() - mtime.as_millis()) as f64;
                age_factor = age_segment / age_span;
            }
        }
        (1.0 - 2.0 * age_factor) * util * util + (2.0 * age_factor - 2.0) * util + 1.0
    }
}
