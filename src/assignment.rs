use serde::Serialize;

use crate::table::FeatureTable;
use crate::taxa::ControlColumns;

/// Read totals for a single positive control.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentRecord {
    pub sample_id: String,
    /// Reads across all features
    pub total_reads: u64,
    /// Reads assigned to the control organisms
    pub control_reads: u64,
    /// `control_reads / total_reads`
    pub correct_assign: f64,
    /// Base-10 logarithm of `total_reads`
    pub log_reads: f64,
}

/// Compute an [`AssignmentRecord`] for each control sample present in `table`.
///
/// Samples without reads are kept with a NaN ratio, callers reject them before fitting.
#[allow(clippy::cast_precision_loss)]
pub fn build(
    table: &FeatureTable,
    samples: &[String],
    columns: &ControlColumns,
) -> Vec<AssignmentRecord> {
    samples
        .iter()
        .filter_map(|sample| {
            let total_reads = table.total_reads(sample)?;
            let control_reads = columns
                .present()
                .iter()
                .filter_map(|feature| table.count(sample, feature))
                .sum::<u64>();

            Some(AssignmentRecord {
                sample_id: sample.clone(),
                total_reads,
                control_reads,
                correct_assign: control_reads as f64 / total_reads as f64,
                log_reads: (total_reads as f64).log10(),
            })
        })
        .collect()
}
