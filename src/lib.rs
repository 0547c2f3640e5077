//! Lidarine: A Fast, Modular Multi-Wavelength Lidar Optical Retrieval Engine
//!
//! This library turns calibrated atmospheric-lidar signal profiles into
//! geophysical optical products: particle backscatter and extinction
//! coefficients and the products derived from them. It covers the numerical
//! core of the retrieval — calibration-window search, backscatter and
//! extinction inversions and the resolution-adaptive vertical windowing —
//! while signal preparation, database lookup and file output live with
//! external collaborators.

pub mod types;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    BackscatterAlgorithm, CalibrationParams, CalibrationSearchAlgorithm, CalibrationValue,
    CalibrationWindow, ErrorThresholds, HeightInterval, LidarError, LidarResult,
    OutputResolution, Profile, RangeResolution, ResolutionSpec, SlopeAlgorithm,
};

pub use crate::core::{
    ExtinctionInverter, ExtinctionParams, KlettFernaldInverter, RamanBscInverter,
    RayleighConsensusFinder, RayleighFitRoutine, SlidingMinimumFinder,
};
