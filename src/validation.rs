//! Pre-flight checks shared by the threshold and biomass paths
//!
//! Each check fails with the first violation it finds. The paths call them in a fixed order:
//! control mode, threshold range, controls in the metadata, controls in the table, dilution
//! series, zero-read controls, control taxa, and finally variation of the assignment ratio.

use std::fmt;

use itertools::Itertools;

use crate::assignment::AssignmentRecord;
use crate::controls::{self, ControlSet};
use crate::error::Error;
use crate::metadata::{CategoricalColumn, NumericColumn};
use crate::table::FeatureTable;
use crate::taxa::{ControlColumns, ControlMode};
use crate::Result;

const MAX_LISTED_IDS: usize = 10;
const MAX_LISTED_ZERO_READ: usize = 5;
const MIN_DILUTION_LEVELS: usize = 3;

/// A non-fatal condition found while validating a run.
#[derive(Clone, Debug, PartialEq)]
pub enum Warning {
    /// Only some of the metadata's positive controls were found in the table
    PartialControlOverlap {
        found: usize,
        requested: usize,
        /// Controls missing from the table, with their known input quantity
        dropped: Vec<(String, Option<f64>)>,
    },
    /// Only some catalogued taxa of the control reagent were found in the table
    PartialControlTaxa { found: usize, missing: Vec<String> },
    /// Controls with too few reads to enter the biomass calibration
    ControlsBelowMinReads {
        min_total_reads: u64,
        removed: Vec<String>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialControlOverlap {
                found,
                requested,
                dropped,
            } => {
                write!(
                    f,
                    "{found} of {requested} positive controls were found in the table; missing: "
                )?;
                let listed = dropped.iter().format_with(", ", |(id, value), g| match value {
                    Some(value) => g(&format_args!("{id} (input {value})")),
                    None => g(&format_args!("{id} (input unknown)")),
                });
                write!(f, "{listed}")
            }
            Self::PartialControlTaxa { found, missing } => write!(
                f,
                "{found} of {} control taxa were found in the table; missing: {}",
                found + missing.len(),
                missing.join(", ")
            ),
            Self::ControlsBelowMinReads {
                min_total_reads,
                removed,
            } => write!(
                f,
                "{} positive controls have at most {min_total_reads} reads and were excluded \
                 from the calibration: {}",
                removed.len(),
                removed.join(", ")
            ),
        }
    }
}

/// Record `warning` and report it through the logger
pub(crate) fn emit(warnings: &mut Vec<Warning>, warning: Warning) {
    log::warn!("{warning}");
    warnings.push(warning);
}

/// Positive controls that passed checks on the metadata and table.
#[derive(Clone, Debug)]
pub struct ValidatedControls {
    pub controls: ControlSet,
    /// Distinct known input quantities, ascending
    pub dilution_levels: Vec<f64>,
    pub warnings: Vec<Warning>,
}

/// A single designated feature must be a column of the table
///
/// # Errors
/// Returns a configuration error for an empty or unknown feature identifier.
pub fn check_control_mode(table: &FeatureTable, mode: &ControlMode) -> Result<()> {
    match mode {
        ControlMode::Feature(id) if id.trim().is_empty() => Err(Error::Configuration(
            "a control feature identifier is required in asv mode".to_owned(),
        )),
        ControlMode::Feature(id) if !table.contains_feature(id) => Err(Error::Configuration(
            format!("control feature {id:?} is not a column of the feature table"),
        )),
        ControlMode::Feature(_) | ControlMode::Reagent(_) => Ok(()),
    }
}

/// # Errors
/// Returns an error if `threshold` is not a finite percentage.
pub fn check_threshold(threshold: f64) -> Result<()> {
    if threshold.is_finite() && (0.0..=100.0).contains(&threshold) {
        Ok(())
    } else {
        Err(Error::ThresholdOutOfRange(threshold))
    }
}

/// # Errors
/// Returns an error if no row of `column` equals `control_value`.
pub fn check_metadata_controls(column: &CategoricalColumn, control_value: &str) -> Result<()> {
    if column.values().iter().any(|(_, value)| value == control_value) {
        return Ok(());
    }
    Err(Error::NoControlsInMetadata {
        column: column.name().to_owned(),
        value: control_value.to_owned(),
        observed: column
            .values()
            .iter()
            .map(|(_, value)| value.clone())
            .unique()
            .take(MAX_LISTED_IDS)
            .collect(),
    })
}

/// Controls must overlap the table, a partial overlap only warns
///
/// # Errors
/// Returns an error if none of the controls are rows of `table`.
pub fn check_table_overlap(
    table: &FeatureTable,
    controls: &ControlSet,
    known_input: &NumericColumn,
    warnings: &mut Vec<Warning>,
) -> Result<()> {
    if controls.is_empty() {
        return Err(Error::NoControlsInTable {
            controls: controls
                .requested()
                .iter()
                .take(MAX_LISTED_IDS)
                .cloned()
                .collect(),
            table: table.samples().iter().take(MAX_LISTED_IDS).cloned().collect(),
        });
    }
    if controls.is_partial() {
        emit(
            warnings,
            Warning::PartialControlOverlap {
                found: controls.len(),
                requested: controls.requested().len(),
                dropped: controls
                    .dropped()
                    .iter()
                    .map(|id| (id.clone(), known_input.get(id)))
                    .collect(),
            },
        );
    }
    Ok(())
}

/// Distinct known input quantities of `samples`, ascending
///
/// # Errors
/// Returns an error if there are fewer than three distinct values.
pub fn check_dilution_series(samples: &[String], known_input: &NumericColumn) -> Result<Vec<f64>> {
    let levels = samples
        .iter()
        .filter_map(|sample| known_input.get(sample))
        .sorted_by(f64::total_cmp)
        .dedup()
        .collect::<Vec<_>>();
    if levels.len() < MIN_DILUTION_LEVELS {
        return Err(Error::InsufficientDilutionSeries {
            column: known_input.name().to_owned(),
            levels,
        });
    }
    Ok(levels)
}

/// # Errors
/// Returns an error naming the first few controls without any reads.
pub fn check_nonzero_reads(table: &FeatureTable, samples: &[String]) -> Result<()> {
    let empty = samples
        .iter()
        .filter(|sample| table.total_reads(sample) == Some(0))
        .take(MAX_LISTED_ZERO_READ)
        .cloned()
        .collect::<Vec<_>>();
    if empty.is_empty() {
        Ok(())
    } else {
        Err(Error::ZeroReadControls { samples: empty })
    }
}

/// Run the metadata and table checks common to both paths
///
/// # Errors
/// Returns the error of the first failing check.
pub fn validate_controls(
    table: &FeatureTable,
    positive_control: &CategoricalColumn,
    control_value: &str,
    known_input: &NumericColumn,
) -> Result<ValidatedControls> {
    let mut warnings = vec![];
    check_metadata_controls(positive_control, control_value)?;
    let controls = controls::extract(table, positive_control, control_value);
    check_table_overlap(table, &controls, known_input, &mut warnings)?;
    let dilution_levels = check_dilution_series(controls.samples(), known_input)?;
    check_nonzero_reads(table, controls.samples())?;

    log::debug!(
        "validated {} positive controls over {} dilution levels",
        controls.len(),
        dilution_levels.len()
    );
    Ok(ValidatedControls {
        controls,
        dilution_levels,
        warnings,
    })
}

/// Table columns whose reads are correctly assigned under `mode`
///
/// # Errors
/// Returns an error if none of the reagent's catalogued taxa are columns of `table`.
pub fn resolve_control_columns(
    table: &FeatureTable,
    mode: &ControlMode,
    warnings: &mut Vec<Warning>,
) -> Result<ControlColumns> {
    let reagent = match mode {
        ControlMode::Feature(id) => {
            return Ok(ControlColumns {
                present: vec![id.clone()],
                absent: vec![],
            })
        }
        ControlMode::Reagent(reagent) => *reagent,
    };

    let (present, absent): (Vec<String>, Vec<String>) = reagent
        .taxa()
        .iter()
        .map(|&label| label.to_owned())
        .partition(|label| table.contains_feature(label));
    if present.is_empty() {
        return Err(Error::ControlTaxaNotFound { reagent });
    }
    if !absent.is_empty() {
        emit(
            warnings,
            Warning::PartialControlTaxa {
                found: present.len(),
                missing: absent.clone(),
            },
        );
    }
    Ok(ControlColumns { present, absent })
}

/// # Errors
/// Returns an error if every record has the same correct assignment ratio.
pub fn check_assignment_variation(records: &[AssignmentRecord]) -> Result<()> {
    let distinct = records
        .iter()
        .map(|record| record.correct_assign)
        .sorted_by(f64::total_cmp)
        .dedup()
        .count();
    if distinct >= 2 {
        return Ok(());
    }
    Err(Error::NoAssignmentVariation {
        ratio: records.first().map_or(f64::NAN, |r| r.correct_assign),
    })
}

#[cfg(test)]
mod tests {
    use crate::assignment::AssignmentRecord;
    use crate::error::{Error, ErrorKind};
    use crate::metadata::{CategoricalColumn, NumericColumn};
    use crate::table::FeatureTable;
    use crate::taxa::{ControlMode, ControlReagent};

    use super::{
        check_assignment_variation, check_control_mode, check_metadata_controls,
        check_threshold, resolve_control_columns, validate_controls, Warning,
    };

    fn known(values: &[(&str, f64)]) -> NumericColumn {
        NumericColumn::new("cells", values.iter().map(|&(id, v)| (id, Some(v))))
    }

    #[test]
    fn partial_overlap_warns_and_keeps_the_rest() {
        let table = FeatureTable::from_rows(
            ["f1"],
            vec![("s1", vec![10]), ("s2", vec![20]), ("s3", vec![30]), ("b1", vec![5])],
        )
        .unwrap();
        let column = CategoricalColumn::new(
            "pc",
            [("s1", "true"), ("s2", "true"), ("s3", "true"), ("s4", "true"), ("b1", "false")],
        );
        let cells = known(&[("s1", 1.0), ("s2", 10.0), ("s3", 100.0), ("s4", 1000.0)]);

        let validated = validate_controls(&table, &column, "true", &cells).unwrap();

        assert_eq!(validated.controls.samples(), ["s1", "s2", "s3"]);
        assert_eq!(validated.dilution_levels, vec![1.0, 10.0, 100.0]);
        assert_eq!(validated.warnings.len(), 1);
        let message = validated.warnings[0].to_string();
        assert!(message.starts_with("3 of 4"));
        assert!(message.contains("s4 (input 1000)"));
    }

    #[test]
    fn disjoint_identifiers_report_both_sides() {
        let table = FeatureTable::from_rows(
            ["f1"],
            vec![("x1", vec![1]), ("x2", vec![1]), ("x3", vec![1]), ("x4", vec![1])],
        )
        .unwrap();
        let column =
            CategoricalColumn::new("pc", [("s1", "y"), ("s2", "y"), ("s3", "y"), ("s4", "y")]);
        let cells = known(&[("s1", 1.0), ("s2", 2.0), ("s3", 3.0), ("s4", 4.0)]);

        let error = validate_controls(&table, &column, "y", &cells).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::MissingControls);
        let message = error.to_string();
        assert!(message.contains("s1, s2, s3, s4"));
        assert!(message.contains("x1, x2, x3, x4"));
    }

    #[test]
    fn two_dilution_levels_are_reported_exactly() {
        let table = FeatureTable::from_rows(
            ["f1"],
            vec![("s1", vec![10]), ("s2", vec![20]), ("s3", vec![30])],
        )
        .unwrap();
        let column = CategoricalColumn::new("pc", [("s1", "y"), ("s2", "y"), ("s3", "y")]);
        let cells = known(&[("s1", 5.0), ("s2", 50.0), ("s3", 50.0)]);

        let error = validate_controls(&table, &column, "y", &cells).unwrap_err();

        match error {
            Error::InsufficientDilutionSeries { column, levels } => {
                assert_eq!(column, "cells");
                assert_eq!(levels, vec![5.0, 50.0]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn zero_read_controls_are_named() {
        let table = FeatureTable::from_rows(
            ["f1", "f2"],
            vec![("s1", vec![10, 1]), ("s2", vec![0, 0]), ("s3", vec![30, 3])],
        )
        .unwrap();
        let column = CategoricalColumn::new("pc", [("s1", "y"), ("s2", "y"), ("s3", "y")]);
        let cells = known(&[("s1", 1.0), ("s2", 2.0), ("s3", 3.0)]);

        let error = validate_controls(&table, &column, "y", &cells).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InsufficientData);
        assert!(error.to_string().ends_with("s2"));
    }

    #[test]
    fn absent_control_value_lists_observed_values() {
        let column = CategoricalColumn::new("pc", [("s1", "no"), ("s2", "maybe"), ("s3", "no")]);

        let error = check_metadata_controls(&column, "yes").unwrap_err();

        assert!(error
            .to_string()
            .starts_with("No positive controls found in positive control column."));
        assert!(error.to_string().contains("no, maybe"));
    }

    #[test]
    fn control_mode_and_threshold_are_checked() {
        let table = FeatureTable::from_rows(["asv1"], vec![("s1", vec![1])]).unwrap();

        assert!(check_control_mode(&table, &ControlMode::Feature("asv1".into())).is_ok());
        assert!(check_control_mode(&table, &ControlMode::Feature(String::new())).is_err());
        assert!(check_control_mode(&table, &ControlMode::Feature("asv9".into())).is_err());
        assert!(check_control_mode(&table, &ControlMode::Reagent(ControlReagent::Atcc)).is_ok());

        assert!(check_threshold(0.0).is_ok());
        assert!(check_threshold(100.0).is_ok());
        assert!(check_threshold(f64::NAN).is_err());
        assert_eq!(
            check_threshold(100.5).unwrap_err().to_string(),
            "Threshold must be between 0 and 100. Got 100.5."
        );
    }

    #[test]
    fn partially_catalogued_taxa_warn() {
        let labels = ControlReagent::Classic.taxa();
        let table = FeatureTable::from_rows([labels[0], "other"], vec![("s1", vec![1, 2])]).unwrap();
        let mut warnings = vec![];

        let columns = resolve_control_columns(
            &table,
            &ControlMode::Reagent(ControlReagent::Classic),
            &mut warnings,
        )
        .unwrap();

        assert_eq!(columns.present(), [labels[0]]);
        assert_eq!(columns.absent(), [labels[1]]);
        assert!(matches!(
            warnings[0],
            Warning::PartialControlTaxa { found: 1, .. }
        ));

        let table = FeatureTable::from_rows(["other"], vec![("s1", vec![1])]).unwrap();
        let error = resolve_control_columns(
            &table,
            &ControlMode::Reagent(ControlReagent::Classic),
            &mut warnings,
        )
        .unwrap_err();
        assert!(error.to_string().contains("classic"));
    }

    #[test]
    fn constant_ratios_have_no_variation() {
        let record = |id: &str, ratio| AssignmentRecord {
            sample_id: id.to_owned(),
            total_reads: 10,
            control_reads: 5,
            correct_assign: ratio,
            log_reads: 1.0,
        };

        let error = check_assignment_variation(&[record("s1", 0.5), record("s2", 0.5)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InsufficientData);
        assert!(check_assignment_variation(&[record("s1", 0.5), record("s2", 0.6)]).is_ok());
    }
}
