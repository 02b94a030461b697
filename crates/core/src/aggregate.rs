//! Sample aggregation: regroup per-lane results by sample identity.
//!
//! A sample may be spread over several physical lanes. Grouping is stable:
//! groups appear in order of each sample's first occurrence in the input,
//! and lane results keep their input order within a group.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::config::EmptySamplePolicy;
use crate::error::PipelineError;

/// All lane results accumulated for one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleGroup<R> {
    pub sample: String,
    pub lanes: Vec<R>,
}

/// Result of [`aggregate_expected`]: the non-empty groups plus every
/// expected sample that received no lane result at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation<R> {
    pub groups: Vec<SampleGroup<R>>,
    pub empty: Vec<String>,
}

impl<R> Aggregation<R> {
    /// Apply the configured policy to samples without lane results.
    ///
    /// Under [`EmptySamplePolicy::Warn`] each empty sample is logged and the
    /// run continues; under [`EmptySamplePolicy::Fail`] the run aborts.
    pub fn enforce(&self, policy: EmptySamplePolicy) -> Result<(), PipelineError> {
        if self.empty.is_empty() {
            return Ok(());
        }
        match policy {
            EmptySamplePolicy::Warn => {
                for sample in &self.empty {
                    tracing::warn!(sample = %sample, "Sample produced no lane results");
                }
                Ok(())
            }
            EmptySamplePolicy::Fail => Err(PipelineError::EmptySampleResult {
                samples: self.empty.clone(),
            }),
        }
    }
}

/// Group `(sample, lane_result)` pairs by sample.
pub fn aggregate<R>(results: impl IntoIterator<Item = (String, R)>) -> Vec<SampleGroup<R>> {
    let mut grouped: IndexMap<String, Vec<R>> = IndexMap::new();
    for (sample, result) in results {
        grouped.entry(sample).or_default().push(result);
    }
    grouped
        .into_iter()
        .map(|(sample, lanes)| SampleGroup { sample, lanes })
        .collect()
}

/// Group results and report expected samples that received none.
///
/// `expected` is the sample list produced by lane fanout; duplicates (a
/// sample on several lanes) are collapsed.
pub fn aggregate_expected<R, S>(
    expected: impl IntoIterator<Item = S>,
    results: impl IntoIterator<Item = (String, R)>,
) -> Aggregation<R>
where
    S: Into<String>,
{
    let groups = aggregate(results);
    let expected: IndexSet<String> = expected.into_iter().map(Into::into).collect();
    let empty = expected
        .into_iter()
        .filter(|sample| !groups.iter().any(|g| &g.sample == sample))
        .collect();
    Aggregation { groups, empty }
}
