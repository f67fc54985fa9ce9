//! Confirmation depth tracking.
//!
//! Depth is `latest_height - inclusion_height + 1`: a transaction in the
//! latest block has one confirmation. The required depth is frozen onto
//! each record at detection, so this module only compares observed against
//! stored values.

/// Outcome of one confirmation probe against a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Observed depth meets the record's frozen requirement.
    Satisfied { observed: u32 },
    /// Still short of the requirement.
    Waiting { observed: u32, required: u32 },
    /// Observed depth went backwards relative to the stored value. The
    /// chain reorganized under the transaction; the record holds.
    Regressed { observed: u32, stored: u32 },
}

/// Confirmation depth of a transaction included at `inclusion_height` as
/// seen from `latest_height`. Zero when the chain tip is behind the
/// inclusion block (the probing node is lagging).
pub fn depth(latest_height: u64, inclusion_height: u64) -> u32 {
    if latest_height < inclusion_height {
        return 0;
    }
    let depth = latest_height - inclusion_height + 1;
    depth.min(u32::MAX as u64) as u32
}

/// Compare a freshly observed depth against the record's stored depth and
/// frozen requirement.
pub fn assess(observed: u32, stored: u32, required: u32) -> Assessment {
    if observed < stored {
        return Assessment::Regressed { observed, stored };
    }
    if observed >= required {
        Assessment::Satisfied { observed }
    } else {
        Assessment::Waiting { observed, required }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_inclusion_block() {
        assert_eq!(depth(100, 100), 1);
        assert_eq!(depth(105, 100), 6);
    }

    #[test]
    fn depth_handles_lagging_tip() {
        assert_eq!(depth(99, 100), 0);
    }

    #[test]
    fn assess_satisfied_at_exact_requirement() {
        assert_eq!(assess(3, 2, 3), Assessment::Satisfied { observed: 3 });
    }

    #[test]
    fn assess_waiting_below_requirement() {
        assert_eq!(
            assess(2, 1, 3),
            Assessment::Waiting {
                observed: 2,
                required: 3
            }
        );
    }

    #[test]
    fn assess_flags_regression() {
        assert_eq!(
            assess(4, 7, 3),
            Assessment::Regressed {
                observed: 4,
                stored: 7
            }
        );
    }

    #[test]
    fn equal_observed_and_stored_is_not_regression() {
        assert_eq!(
            assess(2, 2, 3),
            Assessment::Waiting {
                observed: 2,
                required: 3
            }
        );
    }
}
