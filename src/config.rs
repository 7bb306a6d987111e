use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::biomass::{self, Volumes};
use crate::error::Error;
use crate::estimate::{
    estimating_biomass, read_count_threshold, BiomassInputs, BiomassParams, BiomassReport,
    ThresholdInputs, ThresholdParams, ThresholdReport,
};
use crate::metadata::SampleMetadata;
use crate::sigmoid::FitSettings;
use crate::table::FeatureTable;
use crate::taxa::ControlMode;
use crate::Result;

/// Contents of `katharoseq.toml`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Metadata column marking the positive controls
    pub positive_control_column: String,
    /// Value of `positive_control_column` on positive controls
    pub positive_control_value: String,
    /// Metadata column holding the known input quantity of each control
    pub cell_count_column: String,
    pub threshold: Option<ThresholdConfig>,
    pub biomass: Option<BiomassConfig>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ThresholdConfig {
    pub control: ControlMode,
    pub threshold: f64,
    #[serde(default)]
    pub fit: FitSettings,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BiomassConfig {
    pub min_total_reads: u64,
    pub pcr_template_volume: f64,
    pub dna_extract_volume: f64,
    pub extraction_mass_column: Option<String>,
}

impl Config {
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&config)?;
        if config.threshold.is_none() && config.biomass.is_none() {
            return Err(Error::Configuration(format!(
                "{} configures neither a [threshold] nor a [biomass] estimate",
                path.display()
            )));
        }
        Ok(config)
    }
}

/// Results of every estimate configured for a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub threshold: Option<ThresholdReport>,
    pub biomass: Option<BiomassReport>,
}

/// Run the configured estimates on the inputs in `working_directory`
///
/// The directory must hold a feature table (`table.csv` or `table.tsv`) and sample metadata
/// (`metadata.tsv` or `metadata.csv`). Biomass estimates are written to `est_biomass.csv`.
///
/// # Errors
/// Returns an error if the inputs cannot be read or either estimate fails.
pub fn run(working_directory: &Path, config: &Config) -> Result<RunReport> {
    let table_path = locate(working_directory, &["table.csv", "table.tsv"])?;
    let metadata_path = locate(working_directory, &["metadata.tsv", "metadata.csv"])?;
    log::info!(
        "reading {} and {}",
        table_path.display(),
        metadata_path.display()
    );
    let table = FeatureTable::from_file(&table_path)?;
    let metadata = SampleMetadata::from_file(&metadata_path)?;

    let positive_control = metadata.categorical(&config.positive_control_column)?;
    let cell_count = metadata.numeric(&config.cell_count_column)?;

    let threshold = config
        .threshold
        .as_ref()
        .map(|threshold| {
            let inputs = ThresholdInputs {
                table: &table,
                positive_control: &positive_control,
                cell_count: &cell_count,
            };
            let params = ThresholdParams {
                positive_control_value: config.positive_control_value.clone(),
                control: threshold.control.clone(),
                threshold: threshold.threshold,
                fit: threshold.fit,
            };
            read_count_threshold(&inputs, &params)
        })
        .transpose()?;

    let biomass = match &config.biomass {
        Some(settings) => {
            let extraction_mass = settings
                .extraction_mass_column
                .as_deref()
                .map(|column| metadata.numeric(column))
                .transpose()?;
            let inputs = BiomassInputs {
                table: &table,
                positive_control: &positive_control,
                cell_count: &cell_count,
                extraction_mass: extraction_mass.as_ref(),
            };
            let params = BiomassParams {
                positive_control_value: config.positive_control_value.clone(),
                min_total_reads: settings.min_total_reads,
                volumes: Volumes {
                    pcr_template_volume: settings.pcr_template_volume,
                    dna_extract_volume: settings.dna_extract_volume,
                },
            };
            let report = estimating_biomass(&inputs, &params)?;
            biomass::write_csv(&report.estimates, &working_directory.join("est_biomass.csv"))?;
            Some(report)
        }
        None => None,
    };

    Ok(RunReport { threshold, biomass })
}

fn locate(working_directory: &Path, candidates: &[&str]) -> Result<PathBuf> {
    candidates
        .iter()
        .map(|name| working_directory.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "none of {} found in {}",
                    candidates.join(", "),
                    working_directory.display()
                ),
            ))
        })
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use crate::error::ErrorKind;
    use crate::taxa::{ControlMode, ControlReagent};

    use super::Config;

    const CONFIG: &str = r#"
positive_control_column = "control"
positive_control_value = "true"
cell_count_column = "cells"

[threshold]
control = { reagent = "zymobiomics" }
threshold = 90.0

[threshold.fit]
max_iters = 200

[biomass]
min_total_reads = 50
pcr_template_volume = 5.0
dna_extract_volume = 70.0
"#;

    #[test]
    fn configuration_is_read_from_toml() {
        let tmp_dir = TempDir::new("config").unwrap();
        let path = tmp_dir.path().join("katharoseq.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = Config::from_file(&path).unwrap();

        let threshold = config.threshold.unwrap();
        assert_eq!(threshold.control, ControlMode::Reagent(ControlReagent::Zymobiomics));
        approx::assert_relative_eq!(threshold.threshold, 90.0);
        assert_eq!(threshold.fit.max_iters, 200);
        approx::assert_relative_eq!(threshold.fit.sd_tolerance, 1e-14);

        let biomass = config.biomass.unwrap();
        assert_eq!(biomass.min_total_reads, 50);
        assert_eq!(biomass.extraction_mass_column, None);
    }

    #[test]
    fn configuration_without_estimates_is_rejected() {
        let tmp_dir = TempDir::new("config").unwrap();
        let path = tmp_dir.path().join("katharoseq.toml");
        std::fs::write(
            &path,
            "positive_control_column = \"a\"\npositive_control_value = \"b\"\ncell_count_column = \"c\"\n",
        )
        .unwrap();

        let error = Config::from_file(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }
}
