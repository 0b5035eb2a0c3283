//! Per-step buffer-release scheduling.
//!
//! Converts last-use positions into one shared release sequence partitioned
//! into disjoint per-step ranges. A single flat list with (from, to) ranges
//! per step avoids a container per node; the ranges are consumed in
//! increasing step order by the executor.
//!
//! Every value whose lifetime ends inside the graph appears in exactly one
//! slice. Releasing a non-terminal member of an alias chain is a no-op at
//! execution time: the allocation table still shows the chain's owner live,
//! so the underlying buffer is only returned when its terminal alias is
//! released. There is no double release by construction.

use std::ops::Range;

use tracing::debug;

use crate::error::PlanResult;
use crate::graph::ValueId;
use crate::plan::types::{LiveInterval, Position};

/// The shared release sequence plus one half-open range per step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSchedule {
    /// Value ids to release, partitioned by step
    pub free_list: Vec<ValueId>,
    /// `ranges[step]` indexes into `free_list`
    pub ranges: Vec<Range<usize>>,
}

/// Compute the release schedule for `num_steps` execution steps.
///
/// Within one step, values are released in ascending id order, which keeps
/// the schedule deterministic.
pub fn schedule_frees(liveness: &[LiveInterval], num_steps: usize) -> PlanResult<FreeSchedule> {
    // Bucket by death step in one pass; ascending value id within a bucket
    // falls out of the scan order.
    let mut buckets: Vec<Vec<ValueId>> = vec![Vec::new(); num_steps];
    let mut finite = 0usize;
    for (index, interval) in liveness.iter().enumerate() {
        if let Position::At(step) = interval.last_use {
            buckets[step].push(ValueId(index));
            finite += 1;
        }
    }

    let mut free_list = Vec::new();
    free_list.try_reserve_exact(finite)?;
    let mut ranges = Vec::new();
    ranges.try_reserve_exact(num_steps)?;

    for bucket in buckets {
        let from = free_list.len();
        free_list.extend(bucket);
        ranges.push(from..free_list.len());
    }

    debug!(
        steps = num_steps,
        released = free_list.len(),
        "computed free schedule"
    );
    Ok(FreeSchedule { free_list, ranges })
}
