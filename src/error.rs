use std::fmt;

use crate::taxa::ControlReagent;

/// Broad family an [`Error`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller asked for something inconsistent or out of range
    Configuration,
    /// Positive controls could not be located in the metadata or the table
    MissingControls,
    /// The controls exist but cannot support the estimate
    InsufficientData,
    /// The nonlinear fit failed
    FitConvergence,
    /// Reading or parsing the inputs failed
    Input,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid control configuration: {0}")]
    Configuration(String),

    #[error("Threshold must be between 0 and 100. Got {0}.")]
    ThresholdOutOfRange(f64),

    #[error("threshold of {0}% is never reached by the fitted curve")]
    UnreachableThreshold(f64),

    #[error(
        "No positive controls found in positive control column. \
         Searched {column:?} for {value:?}; observed values include {}",
        Listing(.observed)
    )]
    NoControlsInMetadata {
        column: String,
        value: String,
        observed: Vec<String>,
    },

    #[error(
        "No positive controls found in table. \
         Control samples include {}; table samples include {}",
        Listing(.controls),
        Listing(.table)
    )]
    NoControlsInTable {
        controls: Vec<String>,
        table: Vec<String>,
    },

    #[error(
        "insufficient dilution series: positive controls need at least 3 distinct values \
         in {column:?}, found {levels:?}"
    )]
    InsufficientDilutionSeries { column: String, levels: Vec<f64> },

    #[error("positive controls have zero total reads: {}", Listing(.samples))]
    ZeroReadControls { samples: Vec<String> },

    #[error("none of the {reagent} control taxa were found in the table")]
    ControlTaxaNotFound { reagent: ControlReagent },

    #[error(
        "no variation in the correct assignment ratio: every positive control has ratio {ratio}"
    )]
    NoAssignmentVariation { ratio: f64 },

    #[error("positive control {sample:?} has no usable value in {column:?} (found {value:?})")]
    InvalidInputQuantity {
        sample: String,
        column: String,
        value: Option<f64>,
    },

    #[error("cannot fit the biomass regression: {0}")]
    DegenerateRegression(String),

    #[error(
        "curve fit did not converge ({reason}); log10 total reads span [{}, {}], \
         correct assignment spans [{}, {}]",
        .log_reads.0, .log_reads.1, .correct_assign.0, .correct_assign.1
    )]
    FitDidNotConverge {
        reason: String,
        log_reads: (f64, f64),
        correct_assign: (f64, f64),
        #[source]
        source: argmin::core::Error,
    },

    #[error("malformed feature table: {0}")]
    MalformedTable(String),

    #[error("malformed sample metadata: {0}")]
    MalformedMetadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::ThresholdOutOfRange(_)
            | Self::UnreachableThreshold(_) => ErrorKind::Configuration,
            Self::NoControlsInMetadata { .. } | Self::NoControlsInTable { .. } => {
                ErrorKind::MissingControls
            }
            Self::InsufficientDilutionSeries { .. }
            | Self::ZeroReadControls { .. }
            | Self::ControlTaxaNotFound { .. }
            | Self::NoAssignmentVariation { .. }
            | Self::InvalidInputQuantity { .. }
            | Self::DegenerateRegression(_) => ErrorKind::InsufficientData,
            Self::FitDidNotConverge { .. } => ErrorKind::FitConvergence,
            Self::MalformedTable(_)
            | Self::MalformedMetadata(_)
            | Self::Io(_)
            | Self::Csv(_)
            | Self::Toml(_) => ErrorKind::Input,
        }
    }
}

/// Renders identifier lists as `a, b, c`.
struct Listing<'a>(&'a [String]);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }
        f.write_str(&self.0.join(", "))
    }
}
