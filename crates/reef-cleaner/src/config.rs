//! Cleaner configuration and validation.

use reef_error::{CleanerError, Result};

/// Which space-tracker variant to account with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    /// One live-byte counter per segment.
    Coarse,
    /// Per-block bitmap plus the counter; catches double-alloc/double-free.
    Detailed,
}

/// Cleaner tuning. Validated once at construction; an invalid configuration
/// prevents startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanerConfig {
    /// How far the dirty-journal tail may lag the head before trim-dirty
    /// cycles run.
    pub target_journal_dirty_bytes: u64,
    /// How far the alloc-journal tail may lag the head before trim-alloc
    /// cycles run.
    pub target_journal_alloc_bytes: u64,
    /// Absolute journal ceiling; foreground IO blocks when the overall tail
    /// lags the head by more than this.
    pub max_journal_bytes: u64,

    /// Reclaim window advanced per GC cycle.
    pub reclaim_bytes_per_cycle: u64,
    /// Dirty-extent bytes rewritten per trim-dirty cycle.
    pub rewrite_dirty_bytes_per_cycle: u64,
    /// Cached back-ref bytes merged per trim-alloc cycle.
    pub rewrite_backref_bytes_per_cycle: u64,

    /// Below this projected available ratio, foreground IO blocks.
    pub available_ratio_hard_limit: f64,
    /// Below this projected available ratio, reclaim may run. Must exceed
    /// the hard limit so reclaim starts well before writers throttle.
    pub available_ratio_gc_max: f64,
    /// Reclaim additionally requires this much of the unavailable space to
    /// be reclaimable (unless the hard limit is already breached).
    pub reclaim_ratio_gc_threshold: f64,

    pub tracker: TrackerKind,
}

impl CleanerConfig {
    /// Validate threshold arithmetic. Called by the cleaner's constructor.
    pub fn validate(&self) -> Result<()> {
        fn positive(value: u64, field: &'static str) -> Result<()> {
            if value == 0 {
                return Err(CleanerError::InvalidConfig {
                    field,
                    reason: "must be non-zero",
                });
            }
            Ok(())
        }
        fn ratio(value: f64, field: &'static str) -> Result<()> {
            if !(value > 0.0 && value < 1.0) {
                return Err(CleanerError::InvalidConfig {
                    field,
                    reason: "must lie in (0, 1)",
                });
            }
            Ok(())
        }

        positive(self.target_journal_dirty_bytes, "target_journal_dirty_bytes")?;
        positive(self.target_journal_alloc_bytes, "target_journal_alloc_bytes")?;
        positive(self.max_journal_bytes, "max_journal_bytes")?;
        positive(self.reclaim_bytes_per_cycle, "reclaim_bytes_per_cycle")?;
        positive(
            self.rewrite_dirty_bytes_per_cycle,
            "rewrite_dirty_bytes_per_cycle",
        )?;
        positive(
            self.rewrite_backref_bytes_per_cycle,
            "rewrite_backref_bytes_per_cycle",
        )?;
        ratio(self.available_ratio_hard_limit, "available_ratio_hard_limit")?;
        ratio(self.available_ratio_gc_max, "available_ratio_gc_max")?;
        ratio(
            self.reclaim_ratio_gc_threshold,
            "reclaim_ratio_gc_threshold",
        )?;

        if self.max_journal_bytes <= self.target_journal_dirty_bytes {
            return Err(CleanerError::InvalidConfig {
                field: "max_journal_bytes",
                reason: "must exceed target_journal_dirty_bytes",
            });
        }
        if self.max_journal_bytes <= self.target_journal_alloc_bytes {
            return Err(CleanerError::InvalidConfig {
                field: "max_journal_bytes",
                reason: "must exceed target_journal_alloc_bytes",
            });
        }
        if self.available_ratio_gc_max <= self.available_ratio_hard_limit {
            return Err(CleanerError::InvalidConfig {
                field: "available_ratio_gc_max",
                reason: "must exceed available_ratio_hard_limit",
            });
        }
        Ok(())
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            target_journal_dirty_bytes: 12 << 20,
            target_journal_alloc_bytes: 2 << 20,
            max_journal_bytes: 16 << 20,
            reclaim_bytes_per_cycle: 1 << 20,
            rewrite_dirty_bytes_per_cycle: 1 << 17,
            rewrite_backref_bytes_per_cycle: 1 << 24,
            available_ratio_hard_limit: 0.1,
            available_ratio_gc_max: 0.2,
            reclaim_ratio_gc_threshold: 0.1,
            tracker: TrackerKind::Detailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CleanerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_cycle_budget_is_rejected() {
        let config = CleanerConfig {
            reclaim_bytes_per_cycle: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CleanerError::InvalidConfig {
                field: "reclaim_bytes_per_cycle",
                ..
            })
        ));
    }

    #[test]
    fn ratios_outside_unit_interval_are_rejected() {
        for bad in [0.0, 1.0, -0.5, 1.5] {
            let config = CleanerConfig {
                available_ratio_hard_limit: bad,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn gc_max_must_exceed_hard_limit() {
        let config = CleanerConfig {
            available_ratio_hard_limit: 0.3,
            available_ratio_gc_max: 0.2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CleanerError::InvalidConfig {
                field: "available_ratio_gc_max",
                ..
            })
        ));
    }

    #[test]
    fn journal_ceiling_must_exceed_targets() {
        let config = CleanerConfig {
            target_journal_dirty_bytes: 32 << 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
