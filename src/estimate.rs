use serde::Serialize;

use crate::assignment::{self, AssignmentRecord};
use crate::biomass::{self, BiomassEstimate, CalibrationPoint, LinearModel, Volumes};
use crate::error::Error;
use crate::metadata::{CategoricalColumn, NumericColumn};
use crate::sigmoid::{self, FitSettings, SigmoidFit};
use crate::table::FeatureTable;
use crate::taxa::ControlMode;
use crate::validation::{self, Warning};
use crate::Result;

/// Data a read-count threshold is derived from.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdInputs<'a> {
    pub table: &'a FeatureTable,
    /// Marks which samples are positive controls
    pub positive_control: &'a CategoricalColumn,
    /// Known input quantity of each control
    pub cell_count: &'a NumericColumn,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdParams {
    pub positive_control_value: String,
    pub control: ControlMode,
    /// Percentage of reads that must be correctly assigned
    pub threshold: f64,
    pub fit: FitSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdReport {
    /// Fewest total reads a sample needs to be trusted
    pub min_reads: u64,
    pub fit: SigmoidFit,
    pub records: Vec<AssignmentRecord>,
    pub threshold: f64,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
}

/// Fit the allosteric sigmoid to the positive controls and invert it at `params.threshold`
///
/// # Errors
/// Returns the first failing validation check, or an error if the fit does not converge or
/// never reaches the threshold.
pub fn read_count_threshold(
    inputs: &ThresholdInputs<'_>,
    params: &ThresholdParams,
) -> Result<ThresholdReport> {
    validation::check_control_mode(inputs.table, &params.control)?;
    validation::check_threshold(params.threshold)?;
    let validated = validation::validate_controls(
        inputs.table,
        inputs.positive_control,
        &params.positive_control_value,
        inputs.cell_count,
    )?;
    let mut warnings = validated.warnings;
    let columns = validation::resolve_control_columns(inputs.table, &params.control, &mut warnings)?;

    let records = assignment::build(inputs.table, validated.controls.samples(), &columns);
    validation::check_assignment_variation(&records)?;

    let fit = sigmoid::fit(&records, &params.fit)?;
    let min_reads = fit.min_reads(params.threshold)?;
    log::info!(
        "{min_reads} reads are needed for {}% correct assignment across {} controls",
        params.threshold,
        records.len()
    );

    Ok(ThresholdReport {
        min_reads,
        fit,
        records,
        threshold: params.threshold,
        warnings,
    })
}

/// Data a biomass calibration is derived from.
#[derive(Clone, Copy, Debug)]
pub struct BiomassInputs<'a> {
    pub table: &'a FeatureTable,
    pub positive_control: &'a CategoricalColumn,
    pub cell_count: &'a NumericColumn,
    /// Grams of material extracted per sample, when recorded
    pub extraction_mass: Option<&'a NumericColumn>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BiomassParams {
    pub positive_control_value: String,
    /// Samples with this many reads or fewer are not estimated
    pub min_total_reads: u64,
    pub volumes: Volumes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BiomassReport {
    pub model: LinearModel,
    pub estimates: Vec<BiomassEstimate>,
    pub calibration: Vec<CalibrationPoint>,
    pub warnings: Vec<Warning>,
}

/// Calibrate log input quantity against log read depth on the controls and estimate every
/// sample above `params.min_total_reads`
///
/// # Errors
/// Returns the first failing validation check, or an error if the filtered controls cannot
/// support a regression.
pub fn estimating_biomass(
    inputs: &BiomassInputs<'_>,
    params: &BiomassParams,
) -> Result<BiomassReport> {
    let validated = validation::validate_controls(
        inputs.table,
        inputs.positive_control,
        &params.positive_control_value,
        inputs.cell_count,
    )?;
    let mut warnings = validated.warnings;
    let mut controls = validated.controls;

    let removed = controls
        .samples()
        .iter()
        .filter(|sample| {
            inputs
                .table
                .total_reads(sample)
                .map_or(true, |total| total <= params.min_total_reads)
        })
        .cloned()
        .collect::<Vec<_>>();
    if !removed.is_empty() {
        controls.retain(|sample| !removed.iter().any(|r| r == sample));
        validation::emit(
            &mut warnings,
            Warning::ControlsBelowMinReads {
                min_total_reads: params.min_total_reads,
                removed,
            },
        );
    }
    validation::check_dilution_series(controls.samples(), inputs.cell_count)?;

    let calibration = controls
        .samples()
        .iter()
        .map(|sample| calibration_point(inputs, sample))
        .collect::<Result<Vec<_>>>()?;
    let model = LinearModel::fit(&calibration)?;

    let samples = biomass::qualifying_samples(inputs.table, params.min_total_reads);
    let estimates = biomass::apply(&model, &samples, &params.volumes, inputs.extraction_mass);

    Ok(BiomassReport {
        model,
        estimates,
        calibration,
        warnings,
    })
}

fn calibration_point(inputs: &BiomassInputs<'_>, sample: &str) -> Result<CalibrationPoint> {
    let invalid = |value| Error::InvalidInputQuantity {
        sample: sample.to_owned(),
        column: inputs.cell_count.name().to_owned(),
        value,
    };
    let known_input = match inputs.cell_count.get(sample) {
        Some(value) if value.is_finite() && value > 0.0 => value,
        value => return Err(invalid(value)),
    };
    let total_reads = inputs
        .table
        .total_reads(sample)
        .ok_or_else(|| invalid(Some(known_input)))?;

    Ok(CalibrationPoint {
        sample_id: sample.to_owned(),
        total_reads,
        known_input,
    })
}
