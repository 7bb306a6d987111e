#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

//! Read-count thresholds and biomass estimates for low-biomass sequencing runs, calibrated on
//! a dilution series of positive controls.

pub mod assignment;
pub mod biomass;
pub mod config;
pub mod controls;
mod error;
pub mod estimate;
pub(crate) mod math;
pub mod metadata;
pub mod sigmoid;
pub mod table;
pub mod taxa;
pub mod validation;

pub use error::{Error, ErrorKind};
pub use estimate::{
    estimating_biomass, read_count_threshold, BiomassInputs, BiomassParams, BiomassReport,
    ThresholdInputs, ThresholdParams, ThresholdReport,
};
pub use sigmoid::{allosteric_sigmoid, get_threshold};

pub type Result<T> = ::std::result::Result<T, Error>;
