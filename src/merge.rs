//! How a decoded data-frame entry replaces a live histogram.
//!
//! All replacement decisions go through [`apply`], so changing how
//! interpolated updates interact with real data only touches this file.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::histogram::HistogramSeries;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The latest frame always wins.
    #[default]
    Overwrite,
    /// Interpolated frames never replace a series that already holds real data.
    KeepAuthoritative,
}

/// Holds real (non-interpolated) data from at least one event.
fn is_authoritative(series: &HistogramSeries) -> bool {
    !series.is_interpolated && series.event_count > 0
}

/// Replace `current` with `incoming` according to `policy`.
///
/// `real_count` is the event count of the last non-interpolated update applied
/// to this series. Real updates are clamped to it and then advance it;
/// interpolated updates never touch it.
///
/// Returns `false` if the update was refused and `current` is untouched.
pub fn apply(
    policy: MergePolicy,
    current: &mut HistogramSeries,
    real_count: &mut u64,
    incoming: HistogramSeries,
) -> bool {
    if policy == MergePolicy::KeepAuthoritative
        && incoming.is_interpolated
        && is_authoritative(current)
    {
        return false;
    }

    let mut event_count = incoming.event_count;
    if !incoming.is_interpolated {
        if event_count < *real_count {
            warn!(
                "event count for {} went backwards ({} -> {}), keeping {}",
                current.id, real_count, event_count, real_count
            );
            event_count = *real_count;
        }
        *real_count = event_count;
    }

    current.bins = incoming.bins;
    current.event_count = event_count;
    current.is_interpolated = incoming.is_interpolated;
    true
}
