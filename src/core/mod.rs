//! Core optical retrieval modules

pub mod numerics;
pub mod resolution;
pub mod rayleigh;
pub mod calibration;
pub mod backscatter;
pub mod extinction;
pub mod derived;

// Re-export main types
pub use numerics::{
    calc_rolling_means_sems, closest_bin, find_minimum_window, integral_profile,
    rolling_mean_sem,
};
pub use resolution::{
    autosmooth_bin_resolution, fixed_bin_resolution, AutosmoothParams, SmoothMethod,
};
pub use rayleigh::{RayleighFitCandidate, RayleighFitRoutine, RayleighFitTable};
pub use calibration::{
    CalibrationProduct, ConsensusChannel, RayleighConsensusFinder, SlidingMinimumFinder,
};
pub use backscatter::{BackscatterParams, KlettFernaldInverter, RamanBscInverter};
pub use extinction::{signal_slope, ExtinctionInverter, ExtinctionParams, SlopeFit};
pub use derived::{angstroem_exponent, lidar_ratio};
