use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::math::least_squares_line;
use crate::metadata::NumericColumn;
use crate::table::FeatureTable;
use crate::Result;

/// A positive control used to calibrate the biomass regression.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub sample_id: String,
    pub total_reads: u64,
    /// Known input quantity, such as cells per reaction
    pub known_input: f64,
}

impl CalibrationPoint {
    #[allow(clippy::cast_precision_loss)]
    pub fn log_total_reads(&self) -> f64 {
        (self.total_reads as f64).log10()
    }

    pub fn log_known_input(&self) -> f64 {
        self.known_input.log10()
    }
}

/// `log10(known input) = slope * log10(total reads) + intercept`
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination of the fit
    pub r_squared: f64,
}

impl LinearModel {
    /// Ordinary least squares over the calibration points
    ///
    /// # Errors
    /// Returns an error if the points do not span at least two distinct read depths.
    pub fn fit(points: &[CalibrationPoint]) -> Result<Self> {
        let x = points
            .iter()
            .map(CalibrationPoint::log_total_reads)
            .collect::<Vec<_>>();
        let y = points
            .iter()
            .map(CalibrationPoint::log_known_input)
            .collect::<Vec<_>>();

        let coeffs = least_squares_line(&x, &y)?;
        let (intercept, slope) = (coeffs[0], coeffs[1]);

        #[allow(clippy::cast_precision_loss)]
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let ss_tot = y.iter().map(|yi| (yi - mean).powi(2)).sum::<f64>();
        let ss_res = x
            .iter()
            .zip(&y)
            .map(|(xi, yi)| (yi - slope.mul_add(*xi, intercept)).powi(2))
            .sum::<f64>();
        let r_squared = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else {
            1.0
        };

        log::info!(
            "biomass calibration: slope {slope:.4}, intercept {intercept:.4}, r^2 {r_squared:.4} over {} controls",
            points.len()
        );
        Ok(Self {
            slope,
            intercept,
            r_squared,
        })
    }

    /// Predicted base-10 log of the input quantity
    pub fn predict(&self, log_total_reads: f64) -> f64 {
        self.slope.mul_add(log_total_reads, self.intercept)
    }
}

/// Reaction volumes used to scale a per-PCR estimate to the whole extraction.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Volumes {
    pub pcr_template_volume: f64,
    pub dna_extract_volume: f64,
}

impl Volumes {
    fn dilution(&self) -> f64 {
        self.dna_extract_volume / self.pcr_template_volume
    }
}

/// One row of `est_biomass.csv`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BiomassEstimate {
    #[serde(rename = "sample-id")]
    pub sample_id: String,
    pub total_reads: u64,
    pub log_total_reads: f64,
    pub estimated_biomass_per_pcrrxn: f64,
    pub estimated_biomass_per_dnarxn: f64,
    pub extraction_mass_g: Option<f64>,
    pub estimated_cells_per_g: Option<f64>,
    pub log_estimated_cells_per_g: Option<f64>,
}

/// Samples of `table` with strictly more than `min_total_reads` reads, in table order
pub fn qualifying_samples(table: &FeatureTable, min_total_reads: u64) -> Vec<(String, u64)> {
    table
        .samples()
        .iter()
        .filter_map(|sample| {
            let total = table.total_reads(sample)?;
            (total > min_total_reads).then(|| (sample.clone(), total))
        })
        .collect()
}

/// Estimate the biomass of each `(sample, total_reads)` pair from the calibration `model`
///
/// Per-gram fields are left empty for samples without an extraction mass.
#[allow(clippy::cast_precision_loss)]
pub fn apply(
    model: &LinearModel,
    samples: &[(String, u64)],
    volumes: &Volumes,
    extraction_mass: Option<&NumericColumn>,
) -> Vec<BiomassEstimate> {
    samples
        .iter()
        .map(|(sample, total_reads)| {
            let log_total_reads = (*total_reads as f64).log10();
            let per_pcrrxn = 10f64.powf(model.predict(log_total_reads));
            let per_dnarxn = per_pcrrxn * volumes.dilution();

            let mass = extraction_mass.and_then(|column| column.get(sample));
            let cells_per_g = mass.map(|mass| per_dnarxn / mass);

            BiomassEstimate {
                sample_id: sample.clone(),
                total_reads: *total_reads,
                log_total_reads,
                estimated_biomass_per_pcrrxn: per_pcrrxn,
                estimated_biomass_per_dnarxn: per_dnarxn,
                extraction_mass_g: mass,
                estimated_cells_per_g: cells_per_g,
                log_estimated_cells_per_g: cells_per_g.map(f64::log10),
            }
        })
        .collect()
}

/// Write `estimates` as comma separated values with a header row
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_csv(estimates: &[BiomassEstimate], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    if estimates.is_empty() {
        wtr.write_record(HEADER)?;
    }
    for estimate in estimates {
        wtr.serialize(estimate)?;
    }
    wtr.flush()?;
    log::info!("wrote {} biomass estimates to {}", estimates.len(), path.display());
    Ok(())
}

const HEADER: [&str; 8] = [
    "sample-id",
    "total_reads",
    "log_total_reads",
    "estimated_biomass_per_pcrrxn",
    "estimated_biomass_per_dnarxn",
    "extraction_mass_g",
    "estimated_cells_per_g",
    "log_estimated_cells_per_g",
];
