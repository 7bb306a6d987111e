use crate::metadata::CategoricalColumn;
use crate::table::FeatureTable;

/// The positive controls of a run, as found in both the metadata and the feature table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSet {
    requested: Vec<String>,
    samples: Vec<String>,
    dropped: Vec<String>,
}

impl ControlSet {
    /// Every control named by the metadata, in metadata order
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Controls present in the feature table
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Controls named by the metadata but absent from the feature table
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Some, but not all, requested controls were sequenced
    pub fn is_partial(&self) -> bool {
        !self.samples.is_empty() && !self.dropped.is_empty()
    }

    pub(crate) fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.samples.retain(|sample| keep(sample));
    }
}

/// Select the samples labelled `control_value` in `column` which are also rows of `table`
pub fn extract(table: &FeatureTable, column: &CategoricalColumn, control_value: &str) -> ControlSet {
    let requested = column.ids_matching(control_value);
    let (samples, dropped) = requested
        .iter()
        .cloned()
        .partition(|sample| table.contains_sample(sample));

    ControlSet {
        requested,
        samples,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use crate::metadata::CategoricalColumn;
    use crate::table::FeatureTable;

    use super::extract;

    #[test]
    fn controls_missing_from_the_table_are_dropped() {
        let table = FeatureTable::from_rows(
            ["f1"],
            vec![("s1", vec![1]), ("s2", vec![2]), ("s3", vec![3])],
        )
        .unwrap();
        let column = CategoricalColumn::new(
            "control",
            [("s1", "pc"), ("s2", "sample"), ("s3", "pc"), ("s4", "pc")],
        );

        let controls = extract(&table, &column, "pc");

        assert_eq!(controls.requested(), ["s1", "s3", "s4"]);
        assert_eq!(controls.samples(), ["s1", "s3"]);
        assert_eq!(controls.dropped(), ["s4"]);
        assert!(controls.is_partial());
    }

    #[test]
    fn unmatched_value_gives_empty_set() {
        let table = FeatureTable::from_rows(["f1"], vec![("s1", vec![1])]).unwrap();
        let column = CategoricalColumn::new("control", [("s1", "sample")]);

        let controls = extract(&table, &column, "pc");

        assert!(controls.is_empty());
        assert!(controls.requested().is_empty());
        assert!(!controls.is_partial());
    }
}
