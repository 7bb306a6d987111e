use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::Error;
use crate::table::delimited_reader;
use crate::Result;

/// Per-sample metadata, stored as raw text until a typed column is requested.
#[derive(Clone, Debug, Default)]
pub struct SampleMetadata {
    ids: Vec<String>,
    columns: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// # Errors
    /// Returns an error if `ids` contains duplicates.
    pub fn new<I>(ids: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(Error::MalformedMetadata(format!(
                "sample {duplicate:?} appears more than once"
            )));
        }
        Ok(Self {
            ids,
            columns: HashMap::new(),
        })
    }

    /// Attach a column, one value per sample in identifier order
    ///
    /// # Errors
    /// Returns an error if the number of values differs from the number of samples.
    pub fn with_column<I>(mut self, name: &str, values: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.len() != self.ids.len() {
            return Err(Error::MalformedMetadata(format!(
                "column {name:?} has {} values for {} samples",
                values.len(),
                self.ids.len()
            )));
        }
        self.columns.insert(name.to_owned(), values);
        Ok(self)
    }

    /// Read metadata from a delimited file
    ///
    /// The first column holds sample identifiers. Rows whose identifier starts with `#`, such as
    /// a `#q2:types` directive, are skipped.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, rows are ragged, or identifiers repeat.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut rdr = delimited_reader(path)?;
        let names = rdr
            .headers()?
            .iter()
            .skip(1)
            .map(str::to_owned)
            .collect::<Vec<_>>();

        let mut ids = vec![];
        let mut values: Vec<Vec<String>> = vec![vec![]; names.len()];
        for result in rdr.records() {
            let record = result?;
            let Some(id) = record.get(0) else {
                continue;
            };
            if id.starts_with('#') {
                continue;
            }
            ids.push(id.to_owned());
            for (column, cell) in values.iter_mut().zip(record.iter().skip(1)) {
                column.push(cell.trim().to_owned());
            }
        }

        let mut metadata = Self::new(ids)?;
        for (name, column) in names.iter().zip(values) {
            metadata = metadata.with_column(name, column)?;
        }
        log::debug!(
            "read metadata for {} samples with {} columns from {}",
            metadata.ids.len(),
            names.len(),
            path.display()
        );
        Ok(metadata)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    fn raw(&self, name: &str) -> Result<&[String]> {
        self.columns.get(name).map(Vec::as_slice).ok_or_else(|| {
            Error::MalformedMetadata(format!("no column named {name:?} in sample metadata"))
        })
    }

    /// # Errors
    /// Returns an error if there is no column called `name`.
    pub fn categorical(&self, name: &str) -> Result<CategoricalColumn> {
        let values = self.raw(name)?;
        Ok(CategoricalColumn {
            name: name.to_owned(),
            values: self.ids.iter().cloned().zip(values.iter().cloned()).collect(),
        })
    }

    /// Empty cells become missing values.
    ///
    /// # Errors
    /// Returns an error if there is no column called `name` or a non-empty cell is not a number.
    pub fn numeric(&self, name: &str) -> Result<NumericColumn> {
        let values = self
            .ids
            .iter()
            .zip(self.raw(name)?)
            .map(|(id, cell)| {
                if cell.is_empty() {
                    return Ok((id.clone(), None));
                }
                cell.parse::<f64>()
                    .map(|value| (id.clone(), Some(value)))
                    .map_err(|_| {
                        Error::MalformedMetadata(format!(
                            "column {name:?} has non-numeric value {cell:?} for sample {id:?}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(NumericColumn::new(name, values))
    }
}

/// A metadata column of labels, such as the positive control indicator.
#[derive(Clone, Debug)]
pub struct CategoricalColumn {
    name: String,
    values: Vec<(String, String)>,
}

impl CategoricalColumn {
    pub fn new<I, S, V>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_owned(),
            values: values
                .into_iter()
                .map(|(id, value)| (id.into(), value.into()))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    /// Sample identifiers whose value equals `value`, in column order
    pub fn ids_matching(&self, value: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(_, v)| v == value)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A metadata column of numbers, such as the known cell count of each control.
#[derive(Clone, Debug)]
pub struct NumericColumn {
    name: String,
    values: Vec<(String, Option<f64>)>,
    index: HashMap<String, usize>,
}

impl NumericColumn {
    pub fn new<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<f64>)>,
        S: Into<String>,
    {
        let values: Vec<(String, Option<f64>)> = values
            .into_iter()
            .map(|(id, value)| (id.into(), value))
            .collect();
        let index = values
            .iter()
            .enumerate()
            .map(|(ii, (id, _))| (id.clone(), ii))
            .collect();
        Self {
            name: name.to_owned(),
            values,
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value for `sample`, `None` when the sample is absent or its value is missing
    pub fn get(&self, sample: &str) -> Option<f64> {
        self.index
            .get(sample)
            .and_then(|&ii| self.values[ii].1)
            .filter(|value| !value.is_nan())
    }
}
