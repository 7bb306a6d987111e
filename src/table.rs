use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::Path;

use ndarray::{Array2, ArrayView1};

use crate::error::Error;
use crate::Result;

/// A sample-by-feature matrix of read counts.
///
/// Rows are samples and columns are features (taxon labels or sequence variants). Both sets of
/// identifiers are unique. A feature that was not observed in a sample has a count of zero.
#[derive(Clone, Debug)]
pub struct FeatureTable {
    samples: Vec<String>,
    features: Vec<String>,
    counts: Array2<u64>,
    sample_index: HashMap<String, usize>,
    feature_index: HashMap<String, usize>,
}

impl FeatureTable {
    /// Build a table from identifiers and a `(samples x features)` count matrix
    ///
    /// # Errors
    /// Returns an error if the matrix shape disagrees with the identifiers, if either set of
    /// identifiers contains duplicates, or if a sample's total does not fit in a `u64`.
    pub fn new(samples: Vec<String>, features: Vec<String>, counts: Array2<u64>) -> Result<Self> {
        if counts.dim() != (samples.len(), features.len()) {
            return Err(Error::MalformedTable(format!(
                "{} samples and {} features do not match a count matrix of shape {:?}",
                samples.len(),
                features.len(),
                counts.dim()
            )));
        }
        let sample_index = index(&samples).map_err(|id| {
            Error::MalformedTable(format!("sample {id:?} appears more than once"))
        })?;
        let feature_index = index(&features).map_err(|id| {
            Error::MalformedTable(format!("feature {id:?} appears more than once"))
        })?;
        for (sample, row) in samples.iter().zip(counts.rows()) {
            if row.iter().try_fold(0_u64, |acc, &n| acc.checked_add(n)).is_none() {
                return Err(Error::MalformedTable(format!(
                    "sample {sample:?} has more reads than a 64-bit count can hold"
                )));
            }
        }

        Ok(Self {
            samples,
            features,
            counts,
            sample_index,
            feature_index,
        })
    }

    /// Build a table from per-sample rows of counts, one count per feature
    ///
    /// # Errors
    /// Returns an error if a row has the wrong length or identifiers repeat.
    pub fn from_rows<S, F>(features: F, rows: Vec<(S, Vec<u64>)>) -> Result<Self>
    where
        S: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let features: Vec<String> = features.into_iter().map(Into::into).collect();
        let mut samples = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * features.len());
        for (sample, counts) in rows {
            let sample = sample.into();
            if counts.len() != features.len() {
                return Err(Error::MalformedTable(format!(
                    "sample {sample:?} has {} counts for {} features",
                    counts.len(),
                    features.len()
                )));
            }
            flat.extend(counts);
            samples.push(sample);
        }
        let counts = Array2::from_shape_vec((samples.len(), features.len()), flat)
            .map_err(|e| Error::MalformedTable(e.to_string()))?;
        Self::new(samples, features, counts)
    }

    /// Create a `FeatureTable` from an on-disk delimited representation
    ///
    /// The first header cell names the sample identifier column and is otherwise ignored, the
    /// remaining header cells are feature identifiers. Counts written as integral floats, as
    /// exported frequency tables often are, are accepted. Comment lines such as
    /// `# Constructed from biom file` may precede the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a cell is not a non-negative whole number.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut rdr = delimited_reader(path)?;
        let features = rdr
            .headers()?
            .iter()
            .skip(1)
            .map(str::to_owned)
            .collect::<Vec<_>>();

        let mut rows = vec![];
        for result in rdr.records() {
            let record = result?;
            let Some(sample) = record.get(0) else {
                continue;
            };
            if sample.starts_with('#') {
                continue;
            }
            let counts = record
                .iter()
                .skip(1)
                .map(|cell| parse_count(sample, cell))
                .collect::<Result<Vec<_>>>()?;
            rows.push((sample.to_owned(), counts));
        }

        log::debug!(
            "read {} samples x {} features from {}",
            rows.len(),
            features.len(),
            path.display()
        );
        Self::from_rows(features, rows)
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn contains_sample(&self, sample: &str) -> bool {
        self.sample_index.contains_key(sample)
    }

    pub fn contains_feature(&self, feature: &str) -> bool {
        self.feature_index.contains_key(feature)
    }

    /// The counts of `sample` across every feature
    pub fn row(&self, sample: &str) -> Option<ArrayView1<'_, u64>> {
        self.sample_index
            .get(sample)
            .map(|&ii| self.counts.row(ii))
    }

    pub fn count(&self, sample: &str, feature: &str) -> Option<u64> {
        let ii = *self.sample_index.get(sample)?;
        let jj = *self.feature_index.get(feature)?;
        Some(self.counts[[ii, jj]])
    }

    /// Total reads in `sample`, summed over all features
    ///
    /// Row totals are checked for overflow on construction.
    pub fn total_reads(&self, sample: &str) -> Option<u64> {
        self.row(sample).map(|row| row.sum())
    }
}

/// Map each identifier to its position, returning the first duplicate on failure
fn index(ids: &[String]) -> ::std::result::Result<HashMap<String, usize>, String> {
    let mut map = HashMap::with_capacity(ids.len());
    for (ii, id) in ids.iter().enumerate() {
        if map.insert(id.clone(), ii).is_some() {
            return Err(id.clone());
        }
    }
    Ok(map)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn parse_count(sample: &str, cell: &str) -> Result<u64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(0);
    }
    if let Ok(count) = cell.parse::<u64>() {
        return Ok(count);
    }
    match cell.parse::<f64>() {
        // `u64::MAX as f64` rounds up to 2^64, which is already out of range
        Ok(value) if value.is_finite() && value >= 0.0 && value.fract() == 0.0 => {
            if value >= u64::MAX as f64 {
                return Err(Error::MalformedTable(format!(
                    "sample {sample:?} has a count {cell:?} which does not fit in a 64-bit count"
                )));
            }
            Ok(value as u64)
        }
        _ => Err(Error::MalformedTable(format!(
            "sample {sample:?} has a count {cell:?} which is not a non-negative whole number"
        ))),
    }
}

pub(crate) type DelimitedReader = csv::Reader<Chain<Cursor<String>, BufReader<File>>>;

/// Open a delimited text file, using tabs for `.tsv` and `.txt` files and commas otherwise
///
/// Leading `#` lines without a delimiter are comments and are skipped, so the first line left is
/// the header. A `#` line that does contain the delimiter, like `#OTU ID`, is a header.
pub(crate) fn delimited_reader(path: &Path) -> Result<DelimitedReader> {
    let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv" | "txt") => b'\t',
        _ => b',',
    };

    let mut rest = BufReader::new(File::open(path)?);
    let mut header = String::new();
    loop {
        header.clear();
        if rest.read_line(&mut header)? == 0 {
            break;
        }
        let comment = header.starts_with('#') && !header.as_bytes().contains(&delimiter);
        if !comment {
            break;
        }
        log::debug!("skipping comment {:?} in {}", header.trim_end(), path.display());
    }

    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(false)
        .from_reader(Cursor::new(header).chain(rest)))
}
