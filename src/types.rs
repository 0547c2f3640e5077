use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Rayleigh (purely molecular) lidar ratio, 8*pi/3 sr
pub const RAYLEIGH_LIDAR_RATIO: f64 = 8.0 * std::f64::consts::PI / 3.0;

/// Number of standard deviations used when testing a value against its own
/// statistical error (negative-value screening, calibration-bin acceptance)
pub const NEG_TEST_STD_FACTOR: f64 = 2.0;

/// Altitude boundary [m] separating the low-range and high-range regimes of
/// error thresholds and smoothing limits
pub const RANGE_BOUNDARY: f64 = 2000.0;

/// Factor applied to the lowest measured value when extrapolating a profile
/// into the instrument's near-field blind zone
pub const OVL_FACTOR: f64 = 1.0;

/// Quality flags of single data points (bitmask)
pub mod flags {
    pub const ALL_OK: u16 = 0;
    pub const NEG_DATA: u16 = 1;
    pub const BELOW_OVL: u16 = 2;
    pub const ABOVE_MAX_ALT: u16 = 4;
    pub const ABOVE_KLETT_REF: u16 = 16;
    pub const VALUE_OUTSIDE_VALID_RANGE: u16 = 32;
    pub const BELOW_MIN_BSCR: u16 = 64;
    pub const CALC_WINDOW_OUTSIDE_PROFILE: u16 = 128;
    pub const UNCERTAINTY_TOO_LARGE: u16 = 256;
    pub const SINGLE_POINT: u16 = 1024;
}

/// Error types for the optical retrieval engine
#[derive(Debug, thiserror::Error)]
pub enum LidarError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("calibration params of jointly searched products '{0}' and '{1}' are not equal")]
    CalibrationParamsNotEqual(String, String),

    #[error("relative error of the calibration window exceeds the threshold in time slice {time_slice}")]
    NoValidDataPointsForCalibration { time_slice: usize },

    #[error("no bin within error bounds of the calibration value in time slice {time_slice}")]
    CalibrationBinNotFound { time_slice: usize },

    #[error("integration window contains no valid data points")]
    EmptyIntegrationWindow,

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("profile is missing the auxiliary channel '{0}'")]
    MissingChannel(&'static str),

    #[error("Rayleigh fit failed: {0}")]
    RayleighFit(String),
}

/// Result type for retrieval operations
pub type LidarResult<T> = Result<T, LidarError>;

/// A height interval [m above ground], bottom < top
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightInterval {
    pub bottom: f64,
    pub top: f64,
}

impl HeightInterval {
    pub fn new(bottom: f64, top: f64) -> LidarResult<Self> {
        if !(bottom < top) {
            return Err(LidarError::Config(format!(
                "height interval bottom ({} m) must be below top ({} m)",
                bottom, top
            )));
        }
        Ok(Self { bottom, top })
    }

    pub fn width(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn contains(&self, height: f64) -> bool {
        height >= self.bottom && height <= self.top
    }
}

/// Calibration window per time slice: the height interval used to anchor an
/// inversion to a known reference value. `None` marks a time slice for which
/// no valid window was found — an explicit failure state, not a default.
#[derive(Debug, Clone)]
pub struct CalibrationWindow {
    pub intervals: Vec<Option<HeightInterval>>,
}

impl CalibrationWindow {
    /// Create an all-failed window for `num_times` time slices
    pub fn empty(num_times: usize) -> Self {
        Self {
            intervals: vec![None; num_times],
        }
    }

    pub fn num_times(&self) -> usize {
        self.intervals.len()
    }

    /// Convert the window of time slice `t` to (first, last) bin indexes on
    /// the height axis of `profile` (both inclusive). Returns `None` for a
    /// failed time slice.
    pub fn bins(&self, profile: &Profile, t: usize) -> Option<(usize, usize)> {
        let interval = self.intervals[t]?;
        let first = profile.height_to_bin(t, interval.bottom);
        let last = profile.height_to_bin(t, interval.top);
        Some((first, last))
    }
}

/// Assumed calibration value (e.g. backscatter ratio in a molecular-dominated
/// layer) with its relative uncertainty
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationValue {
    pub value: f64,
    pub rel_error: f64,
}

/// Which algorithm locates the calibration height window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationSearchAlgorithm {
    /// Sliding-minimum search on the signal (or signal ratio) per time slice
    SlidingMinimum,
    /// Multi-channel consensus via an external Rayleigh fit
    RayleighConsensus,
}

/// Which algorithm turns a calibrated signal into a backscatter profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterAlgorithm {
    /// Elastic-only inversion with one boundary condition
    KlettFernald,
    /// Raman inversion via the calibrated backscatter ratio
    RamanViaBscRatio,
}

/// Which linear-fit variant estimates the signal slope for extinction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlopeAlgorithm {
    /// Fit weighted with the inverse statistical error
    Weighted,
    /// Plain unweighted fit
    Unweighted,
}

/// Parameters of the calibration-window search.
///
/// Products searched jointly for a common window must carry pairwise equal
/// params (interval, width, value, algorithm); a mismatch is a hard
/// configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Height interval [m] within which the window is searched
    pub search_interval: HeightInterval,
    /// Width of the calibration window [m]
    pub window_width: f64,
    /// Assumed value at the calibration window
    pub cal_value: CalibrationValue,
    /// Selected search algorithm
    pub search_algorithm: CalibrationSearchAlgorithm,
}

impl CalibrationParams {
    pub fn new(
        search_interval: HeightInterval,
        window_width: f64,
        cal_value: CalibrationValue,
        search_algorithm: CalibrationSearchAlgorithm,
    ) -> LidarResult<Self> {
        if !(window_width > 0.0) {
            return Err(LidarError::Config(format!(
                "calibration window width must be positive, got {} m",
                window_width
            )));
        }
        if !(cal_value.value > 0.0) || !(cal_value.rel_error >= 0.0) {
            return Err(LidarError::Config(
                "calibration value must be positive with non-negative relative error".to_string(),
            ));
        }
        Ok(Self {
            search_interval,
            window_width,
            cal_value,
            search_algorithm,
        })
    }
}

/// Maximum allowed relative statistical errors, distinct below and above the
/// fixed altitude boundary. The `highrange` threshold governs
/// calibration-window acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorThresholds {
    pub lowrange: f64,
    pub highrange: f64,
}

impl ErrorThresholds {
    pub fn new(lowrange: f64, highrange: f64) -> LidarResult<Self> {
        if !(lowrange > 0.0) || !(highrange > 0.0) {
            return Err(LidarError::Config(
                "error thresholds must be positive".to_string(),
            ));
        }
        Ok(Self {
            lowrange,
            highrange,
        })
    }
}

/// Target effective vertical resolutions [m] below and above the transition
/// zone, for one output resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeResolution {
    pub lowrange: f64,
    pub highrange: f64,
}

/// Which of the two configured output resolutions a product is retrieved at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputResolution {
    Low,
    High,
}

/// Effective-resolution targets for both output resolutions, with the
/// transition-zone height interval over which the target interpolates
/// linearly between the low-range and high-range values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSpec {
    pub lowres: RangeResolution,
    pub highres: RangeResolution,
    pub transition: HeightInterval,
}

impl ResolutionSpec {
    pub fn new(
        lowres: RangeResolution,
        highres: RangeResolution,
        transition: HeightInterval,
    ) -> LidarResult<Self> {
        for res in [&lowres, &highres] {
            if !(res.lowrange > 0.0) || !(res.highrange > 0.0) {
                return Err(LidarError::Config(
                    "resolution targets must be positive".to_string(),
                ));
            }
        }
        Ok(Self {
            lowres,
            highres,
            transition,
        })
    }

    pub fn for_output(&self, resolution: OutputResolution) -> RangeResolution {
        match resolution {
            OutputResolution::Low => self.lowres,
            OutputResolution::High => self.highres,
        }
    }
}

/// A prepared signal or optical-product profile.
///
/// All arrays are indexed by (time slice, height level). The height axis is
/// time-dependent because the pointing angle may vary between time slices.
/// Auxiliary channels are present only where the preparation step attached
/// them (molecular profiles for backscatter inversions, assumed lidar ratio
/// for Klett-Fernald).
#[derive(Debug, Clone)]
pub struct Profile {
    pub data: Array2<f64>,
    pub error: Array2<f64>,
    pub flags: Array2<u16>,
    /// Number of raw bins represented by each output sample
    pub bin_resolution: Array2<usize>,
    /// Height above ground [m] per (time, level)
    pub height: Array2<f64>,
    pub time: Vec<DateTime<Utc>>,
    /// Vertical size of one raw bin [m]
    pub raw_height_res: f64,
    pub mol_extinction: Option<Array2<f64>>,
    pub mol_backscatter: Option<Array2<f64>>,
    pub assumed_lidar_ratio: Option<Array2<f64>>,
}

impl Profile {
    /// Create a profile with clean flags and unit bin resolution.
    /// All arrays must share the same (time, level) shape.
    pub fn new(
        data: Array2<f64>,
        error: Array2<f64>,
        height: Array2<f64>,
        time: Vec<DateTime<Utc>>,
        raw_height_res: f64,
    ) -> LidarResult<Self> {
        let dim = data.dim();
        if error.dim() != dim || height.dim() != dim {
            return Err(LidarError::DimensionMismatch(format!(
                "data {:?}, error {:?} and height {:?} must agree",
                dim,
                error.dim(),
                height.dim()
            )));
        }
        if time.len() != dim.0 {
            return Err(LidarError::DimensionMismatch(format!(
                "time axis has {} entries for {} time slices",
                time.len(),
                dim.0
            )));
        }
        if !(raw_height_res > 0.0) {
            return Err(LidarError::Config(format!(
                "raw height resolution must be positive, got {} m",
                raw_height_res
            )));
        }
        Ok(Self {
            flags: Array2::zeros(dim),
            bin_resolution: Array2::from_elem(dim, 1),
            data,
            error,
            height,
            time,
            raw_height_res,
            mol_extinction: None,
            mol_backscatter: None,
            assumed_lidar_ratio: None,
        })
    }

    pub fn num_times(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_levels(&self) -> usize {
        self.data.ncols()
    }

    /// First level of time slice `t` with finite data and error
    pub fn first_valid_bin(&self, t: usize) -> Option<usize> {
        (0..self.num_levels())
            .find(|&lev| self.data[[t, lev]].is_finite() && self.error[[t, lev]].is_finite())
    }

    /// One past the last level of time slice `t` with finite data and error
    pub fn last_valid_bin(&self, t: usize) -> Option<usize> {
        (0..self.num_levels())
            .rev()
            .find(|&lev| self.data[[t, lev]].is_finite() && self.error[[t, lev]].is_finite())
            .map(|lev| lev + 1)
    }

    /// Level whose height is closest to `height_m` in time slice `t`
    pub fn height_to_bin(&self, t: usize, height_m: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for lev in 0..self.num_levels() {
            let dist = (self.height[[t, lev]] - height_m).abs();
            if dist < best_dist {
                best_dist = dist;
                best = lev;
            }
        }
        best
    }

    /// Mark one data point invalid and record why
    pub fn set_invalid_point(&mut self, t: usize, lev: usize, flag: u16) {
        self.data[[t, lev]] = f64::NAN;
        self.error[[t, lev]] = f64::NAN;
        self.flags[[t, lev]] |= flag;
    }

    /// Flag points whose value is negative beyond its own statistical error,
    /// i.e. `data + NEG_TEST_STD_FACTOR * error < 0`
    pub fn flag_negative_data(&mut self) {
        for t in 0..self.num_times() {
            for lev in 0..self.num_levels() {
                let max_value = self.data[[t, lev]] + NEG_TEST_STD_FACTOR * self.error[[t, lev]];
                if max_value < 0.0 {
                    self.flags[[t, lev]] |= flags::NEG_DATA;
                }
            }
        }
    }

    /// Derive the elementwise ratio of two signals (e.g. elastic / Raman).
    ///
    /// Errors are propagated in quadrature, quality flags are OR-ed. The
    /// metadata and auxiliary channels are taken from the numerator.
    pub fn ratio(num: &Profile, den: &Profile) -> LidarResult<Profile> {
        if num.data.dim() != den.data.dim() {
            return Err(LidarError::DimensionMismatch(format!(
                "ratio of {:?} and {:?} profiles",
                num.data.dim(),
                den.data.dim()
            )));
        }
        let mut result = num.clone();
        result.data = &num.data / &den.data;
        let num_rel = &num.error / &num.data;
        let den_rel = &den.error / &den.data;
        let sum_sq = num_rel.mapv(|x| x * x) + den_rel.mapv(|x| x * x);
        result.error = result.data.mapv(f64::abs) * sum_sq.mapv(f64::sqrt);
        result.flags = &num.flags | &den.flags;
        Ok(result)
    }
}
