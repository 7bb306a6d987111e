use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use tempdir::TempDir;

use katharoseq::config::{run, BiomassConfig, Config, ThresholdConfig};
use katharoseq::sigmoid::{allosteric_sigmoid, FitSettings};
use katharoseq::taxa::ControlMode;
use katharoseq::ErrorKind;

const H: f64 = 3.5;
const K_PRIME: f64 = 40.0;
const SLOPE: f64 = 0.9;
const INTERCEPT: f64 = 0.3;

struct Sample {
    id: String,
    control: bool,
    control_reads: u64,
    other_reads: u64,
    cells: Option<f64>,
    mass: Option<f64>,
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn generate_samples<R: Rng>(rng: &mut R) -> Vec<Sample> {
    let mut samples = [50_u64, 200, 800, 3_000, 12_000, 50_000]
        .iter()
        .enumerate()
        .map(|(ii, &total)| {
            let log_reads = (total as f64).log10();
            let control_reads =
                (allosteric_sigmoid(log_reads, H, K_PRIME) * total as f64).round() as u64;
            Sample {
                id: format!("pc.{ii}"),
                control: true,
                control_reads,
                other_reads: total - control_reads,
                cells: Some(10f64.powf(SLOPE.mul_add(log_reads, INTERCEPT))),
                mass: None,
            }
        })
        .collect::<Vec<_>>();

    for ii in 0..5 {
        samples.push(Sample {
            id: format!("soil.{ii}"),
            control: false,
            control_reads: rng.gen_range(0..20),
            other_reads: rng.gen_range(100..20_000),
            cells: None,
            mass: (ii % 2 == 0).then(|| rng.gen_range(0.1..1.0)),
        });
    }
    samples
}

fn write_inputs(samples: &[Sample], working_dir: &TempDir) {
    let mut wtr = csv::Writer::from_path(working_dir.path().join("table.csv")).unwrap();
    wtr.write_record(["sample-id", "asv.control", "asv.other"])
        .unwrap();
    for sample in samples {
        wtr.write_record([
            sample.id.clone(),
            sample.control_reads.to_string(),
            sample.other_reads.to_string(),
        ])
        .unwrap();
    }
    wtr.flush().unwrap();

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(working_dir.path().join("metadata.tsv"))
        .unwrap();
    wtr.write_record(["sample-id", "positive_control", "cell_count", "mass_g"])
        .unwrap();
    wtr.write_record(["#q2:types", "categorical", "numeric", "numeric"])
        .unwrap();
    let optional = |value: Option<f64>| value.map_or_else(String::new, |v| v.to_string());
    for sample in samples {
        wtr.write_record([
            sample.id.clone(),
            sample.control.to_string(),
            optional(sample.cells),
            optional(sample.mass),
        ])
        .unwrap();
    }
    wtr.flush().unwrap();
}

fn config() -> Config {
    Config {
        positive_control_column: "positive_control".to_owned(),
        positive_control_value: "true".to_owned(),
        cell_count_column: "cell_count".to_owned(),
        threshold: Some(ThresholdConfig {
            control: ControlMode::Feature("asv.control".to_owned()),
            threshold: 50.0,
            fit: FitSettings::default(),
        }),
        biomass: Some(BiomassConfig {
            min_total_reads: 20,
            pcr_template_volume: 5.0,
            dna_extract_volume: 70.0,
            extraction_mass_column: Some("mass_g".to_owned()),
        }),
    }
}

#[test]
fn run_produces_threshold_and_biomass_table() {
    let _ = env_logger::builder().is_test(true).try_init();
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);
    let working_dir = TempDir::new("run_produces_threshold_and_biomass_table").unwrap();
    let samples = generate_samples(&mut rng);
    write_inputs(&samples, &working_dir);

    // Round trip the configuration through its file form
    let config_path = working_dir.path().join("katharoseq.toml");
    std::fs::write(&config_path, toml::to_string(&config()).unwrap()).unwrap();
    let config = Config::from_file(&config_path).unwrap();

    let report = run(working_dir.path(), &config).unwrap();

    let threshold = report.threshold.unwrap();
    assert_eq!(threshold.records.len(), 6);
    approx::assert_relative_eq!(threshold.fit.h, H, max_relative = 0.1);
    let expected = 10f64.powf(K_PRIME.powf(1.0 / H));
    approx::assert_relative_eq!(threshold.min_reads as f64, expected, max_relative = 0.1);

    let biomass = report.biomass.unwrap();
    approx::assert_relative_eq!(biomass.model.slope, SLOPE, epsilon = 1e-6);
    approx::assert_relative_eq!(biomass.model.intercept, INTERCEPT, epsilon = 1e-6);

    let written = std::fs::read_to_string(working_dir.path().join("est_biomass.csv")).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next().unwrap(),
        "sample-id,total_reads,log_total_reads,estimated_biomass_per_pcrrxn,\
         estimated_biomass_per_dnarxn,extraction_mass_g,estimated_cells_per_g,\
         log_estimated_cells_per_g"
    );
    assert_eq!(lines.count(), biomass.estimates.len());

    let soil = biomass
        .estimates
        .iter()
        .find(|estimate| estimate.sample_id == "soil.1")
        .unwrap();
    assert!(soil.extraction_mass_g.is_none());
    assert!(soil.estimated_cells_per_g.is_none());
    let soil = biomass
        .estimates
        .iter()
        .find(|estimate| estimate.sample_id == "soil.0")
        .unwrap();
    assert!(soil.estimated_cells_per_g.is_some());
}

#[test]
fn run_without_table_is_an_input_error() {
    let working_dir = TempDir::new("run_without_table_is_an_input_error").unwrap();

    let error = run(working_dir.path(), &config()).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Input);
}

#[test]
fn run_reports_missing_controls() {
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);
    let working_dir = TempDir::new("run_reports_missing_controls").unwrap();
    let samples = generate_samples(&mut rng);
    write_inputs(&samples, &working_dir);

    let config = Config {
        positive_control_value: "yes".to_owned(),
        ..config()
    };
    let error = run(working_dir.path(), &config).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MissingControls);
    assert!(error.to_string().contains("true, false"));
}
