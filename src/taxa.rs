use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Commercial positive-control reagents with a known taxonomic composition.
///
/// Each reagent resolves to the genus-level (level 6) labels its organisms are assigned to, in
/// the form they appear as columns of a collapsed feature table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlReagent {
    /// ZymoBIOMICS microbial community standard
    Zymobiomics,
    /// The two-organism control of the original KatharoSeq protocol
    Classic,
    /// ATCC 20-strain even mix
    Atcc,
}

const ZYMOBIOMICS: &[&str] = &[
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Lactobacillales;f__Lactobacillaceae;g__Lactobacillus",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Lactobacillales;f__Enterococcaceae;g__Enterococcus",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Staphylococcales;f__Staphylococcaceae;g__Staphylococcus",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Bacillales;f__Listeriaceae;g__Listeria",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Bacillales;f__Bacillaceae;g__Bacillus",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Pseudomonadales;f__Pseudomonadaceae;g__Pseudomonas",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Enterobacterales;f__Enterobacteriaceae;g__Escherichia-Shigella",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Enterobacterales;f__Enterobacteriaceae;g__Salmonella",
];

const CLASSIC: &[&str] = &[
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Bacillales;f__Bacillaceae;g__Bacillus",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Enterobacterales;f__Vibrionaceae;g__Photobacterium",
];

const ATCC: &[&str] = &[
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Pseudomonadales;f__Moraxellaceae;g__Acinetobacter",
    "d__Bacteria;p__Actinobacteriota;c__Actinobacteria;o__Actinomycetales;f__Actinomycetaceae;g__Actinomyces",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Bacillales;f__Bacillaceae;g__Bacillus",
    "d__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__Bacteroidaceae;g__Bacteroides",
    "d__Bacteria;p__Firmicutes;c__Clostridia;o__Clostridiales;f__Clostridiaceae;g__Clostridium_sensu_stricto_1",
    "d__Bacteria;p__Deinococcota;c__Deinococci;o__Deinococcales;f__Deinococcaceae;g__Deinococcus",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Lactobacillales;f__Enterococcaceae;g__Enterococcus",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Enterobacterales;f__Enterobacteriaceae;g__Escherichia-Shigella",
    "d__Bacteria;p__Campilobacterota;c__Campylobacteria;o__Campylobacterales;f__Helicobacteraceae;g__Helicobacter",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Lactobacillales;f__Lactobacillaceae;g__Lactobacillus",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Burkholderiales;f__Neisseriaceae;g__Neisseria",
    "d__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__Porphyromonadaceae;g__Porphyromonas",
    "d__Bacteria;p__Actinobacteriota;c__Actinobacteria;o__Propionibacteriales;f__Propionibacteriaceae;g__Cutibacterium",
    "d__Bacteria;p__Proteobacteria;c__Gammaproteobacteria;o__Pseudomonadales;f__Pseudomonadaceae;g__Pseudomonas",
    "d__Bacteria;p__Proteobacteria;c__Alphaproteobacteria;o__Rhodobacterales;f__Rhodobacteraceae;g__Rhodobacter",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Staphylococcales;f__Staphylococcaceae;g__Staphylococcus",
    "d__Bacteria;p__Firmicutes;c__Bacilli;o__Lactobacillales;f__Streptococcaceae;g__Streptococcus",
];

impl ControlReagent {
    pub const ALL: [Self; 3] = [Self::Zymobiomics, Self::Classic, Self::Atcc];

    /// The taxon labels expected in a control prepared from this reagent
    pub const fn taxa(self) -> &'static [&'static str] {
        match self {
            Self::Zymobiomics => ZYMOBIOMICS,
            Self::Classic => CLASSIC,
            Self::Atcc => ATCC,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Zymobiomics => "zymobiomics",
            Self::Classic => "classic",
            Self::Atcc => "atcc",
        }
    }
}

impl fmt::Display for ControlReagent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControlReagent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reagent| reagent.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown control reagent {s:?}, expected one of zymobiomics, classic, atcc"
                ))
            })
    }
}

/// How the true control organisms are identified in the feature table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// A single feature (usually an ASV) stands in for the control organisms
    #[serde(rename = "asv")]
    Feature(String),
    /// Every catalogued taxon of the reagent present in the table
    Reagent(ControlReagent),
}

/// The feature-table columns whose reads count as correctly assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlColumns {
    pub(crate) present: Vec<String>,
    pub(crate) absent: Vec<String>,
}

impl ControlColumns {
    pub fn present(&self) -> &[String] {
        &self.present
    }

    /// Catalogued labels with no matching column, empty in single-feature mode
    pub fn absent(&self) -> &[String] {
        &self.absent
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{ControlMode, ControlReagent};

    #[test]
    fn reagent_names_round_trip_through_from_str() {
        for reagent in ControlReagent::ALL {
            assert_eq!(reagent.name().parse::<ControlReagent>().unwrap(), reagent);
        }
        assert_eq!(
            "ZymoBIOMICS".parse::<ControlReagent>().unwrap(),
            ControlReagent::Zymobiomics
        );
        assert!("mock".parse::<ControlReagent>().is_err());
    }

    #[test]
    fn catalogue_labels_are_unique_within_each_reagent() {
        for reagent in ControlReagent::ALL {
            let taxa = reagent.taxa();
            assert!(!taxa.is_empty());
            assert_eq!(taxa.iter().unique().count(), taxa.len(), "{reagent}");
        }
    }

    #[derive(serde::Deserialize)]
    struct Wrapper {
        control: ControlMode,
    }

    #[test]
    fn control_mode_is_read_from_toml() {
        let reagent: Wrapper = toml::from_str(r#"control = { reagent = "atcc" }"#).unwrap();
        assert_eq!(reagent.control, ControlMode::Reagent(ControlReagent::Atcc));

        let feature: Wrapper = toml::from_str(r#"control = { asv = "abc123" }"#).unwrap();
        assert_eq!(feature.control, ControlMode::Feature("abc123".to_owned()));
    }
}
