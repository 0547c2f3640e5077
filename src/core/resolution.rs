//! Mapping between effective vertical resolution (physical meaning) and the
//! number of bins actually used in a fit or smoothing window, plus the
//! fixed-resolution and automatic-smoothing bin-width computations.

use crate::types::{OutputResolution, Profile, ResolutionSpec, RANGE_BOUNDARY};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Smoothing/fit method behind a retrieval, selecting which empirical
/// resolution mapping applies (Mattis et al. 2016)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothMethod {
    /// Savitzky-Golay (box) smoothing, as used by the backscatter retrievals
    SavitzkyGolay,
    /// Linear slope fit, as used by the extinction retrieval
    LinearFit,
}

impl SmoothMethod {
    /// Effective vertical resolution [bins] achieved by a window of
    /// `used_bins` samples (the window diameter)
    pub fn eff_bins(&self, used_bins: usize) -> usize {
        let eff = match self {
            SmoothMethod::SavitzkyGolay => used_bins as f64 * 0.62 - 0.86,
            SmoothMethod::LinearFit => used_bins as f64 * 0.85934 - 0.17802,
        };
        eff.round().max(0.0) as usize
    }

    /// Number of bins (window diameter) needed to achieve an effective
    /// resolution of `eff_bins`. The Savitzky-Golay window is forced odd.
    pub fn used_bins(&self, eff_bins: usize) -> usize {
        match self {
            SmoothMethod::SavitzkyGolay => {
                let used = (eff_bins as f64 + 0.86) / 0.62;
                (((used - 1.0) / 2.0).round() * 2.0 + 1.0).max(1.0) as usize
            }
            SmoothMethod::LinearFit => {
                (((eff_bins as f64 + 0.17802) / 0.85934).round()).max(1.0) as usize
            }
        }
    }
}

/// Window widths [bins] per level for a fixed target resolution.
///
/// Below the transition zone the target is the low-range resolution, above it
/// the high-range resolution; inside the zone the target interpolates
/// linearly with height, level by level. The target is converted to
/// effective bins with the profile's raw bin size and then to used bins with
/// the method's mapping.
pub fn fixed_bin_resolution(
    profile: &Profile,
    spec: &ResolutionSpec,
    output: OutputResolution,
    method: SmoothMethod,
) -> Array2<usize> {
    let res = spec.for_output(output);
    let zone = spec.transition;
    let (times, levels) = profile.data.dim();
    let mut result = Array2::from_elem((times, levels), 1usize);

    log::debug!(
        "fixed bin resolution: {} m below {} m, {} m above {} m",
        res.lowrange,
        zone.bottom,
        res.highrange,
        zone.top
    );

    for t in 0..times {
        for lev in 0..levels {
            let height = profile.height[[t, lev]];
            let target_m = if height <= zone.bottom {
                res.lowrange
            } else if height >= zone.top {
                res.highrange
            } else {
                let frac = (height - zone.bottom) / zone.width();
                res.lowrange + (res.highrange - res.lowrange) * frac
            };
            let eff = (target_m / profile.raw_height_res).round().max(1.0) as usize;
            result[[t, lev]] = method.used_bins(eff);
        }
    }

    result
}

/// Parameters of the automatic smoothing: window width starts at a
/// low-altitude minimum, grows by a fixed increment per bin through the
/// transition zone, and saturates at a high-altitude maximum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutosmoothParams {
    /// Window width [bins] below the range boundary
    pub min_bins: usize,
    /// Window width [bins] at high altitudes
    pub max_bins: usize,
    /// Growth per bin inside the transition zone
    pub bin_delta: usize,
    /// Bottom of the transition zone [m]
    pub boundary: f64,
}

impl Default for AutosmoothParams {
    fn default() -> Self {
        Self {
            min_bins: 3,
            max_bins: 31,
            bin_delta: 3,
            boundary: RANGE_BOUNDARY,
        }
    }
}

/// Derive the optimum window width per level for automatic smoothing,
/// independently per time slice (each time slice's valid range may start at a
/// different altitude).
pub fn autosmooth_bin_resolution(profile: &Profile, params: &AutosmoothParams) -> Array2<usize> {
    let (times, levels) = profile.data.dim();
    let mut result = Array2::from_elem((times, levels), params.min_bins);

    for t in 0..times {
        // keep the minimum width below the range boundary
        let mut lev = 0;
        while lev < levels && profile.height[[t, lev]] < params.boundary {
            lev += 1;
        }

        // continuously increase the width through the transition zone
        let mut width = params.min_bins;
        while lev + 1 < levels && width < params.max_bins {
            width += params.bin_delta;
            result[[t, lev]] = width;
            lev += 1;
        }

        // saturate above the transition zone
        while lev < levels {
            result[[t, lev]] = params.max_bins;
            lev += 1;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeightInterval, RangeResolution};
    use chrono::Utc;
    use ndarray::Array2;

    fn profile_with_heights(heights: Vec<f64>, raw_res: f64) -> Profile {
        let levels = heights.len();
        let height = Array2::from_shape_vec((1, levels), heights).unwrap();
        let data = Array2::from_elem((1, levels), 1.0);
        let error = Array2::from_elem((1, levels), 0.1);
        Profile::new(data, error, height, vec![Utc::now()], raw_res).unwrap()
    }

    #[test]
    fn test_mappings_are_mutual_inverses() {
        for method in [SmoothMethod::SavitzkyGolay, SmoothMethod::LinearFit] {
            for eff in 1..=200usize {
                let used = method.used_bins(eff);
                let back = method.eff_bins(used) as i64;
                assert!(
                    (back - eff as i64).abs() <= 1,
                    "{:?}: eff {} -> used {} -> eff {}",
                    method,
                    eff,
                    used,
                    back
                );
            }
        }
    }

    #[test]
    fn test_sav_golay_window_is_odd() {
        for eff in 1..=200usize {
            let used = SmoothMethod::SavitzkyGolay.used_bins(eff);
            assert_eq!(used % 2, 1, "eff {} gave even window {}", eff, used);
        }
    }

    #[test]
    fn test_fixed_resolution_interpolates_with_height() {
        let heights: Vec<f64> = (0..50).map(|i| i as f64 * 100.0).collect();
        let profile = profile_with_heights(heights, 100.0);
        let spec = ResolutionSpec::new(
            RangeResolution {
                lowrange: 100.0,
                highrange: 500.0,
            },
            RangeResolution {
                lowrange: 100.0,
                highrange: 500.0,
            },
            HeightInterval::new(1000.0, 3000.0).unwrap(),
        )
        .unwrap();

        let binres =
            fixed_bin_resolution(&profile, &spec, OutputResolution::Low, SmoothMethod::LinearFit);

        // below the zone: 100 m / 100 m = 1 effective bin
        assert_eq!(binres[[0, 5]], SmoothMethod::LinearFit.used_bins(1));
        // above the zone: 500 m target
        assert_eq!(binres[[0, 45]], SmoothMethod::LinearFit.used_bins(5));
        // in the middle of the zone: 300 m target
        assert_eq!(binres[[0, 20]], SmoothMethod::LinearFit.used_bins(3));
        // widths never shrink with height
        for lev in 1..50 {
            assert!(binres[[0, lev]] >= binres[[0, lev - 1]]);
        }
    }

    #[test]
    fn test_autosmooth_growth_and_saturation() {
        let heights: Vec<f64> = (0..12).map(|i| i as f64 * 500.0).collect();
        let profile = profile_with_heights(heights, 500.0);
        let params = AutosmoothParams {
            min_bins: 3,
            max_bins: 11,
            bin_delta: 4,
            boundary: 2000.0,
        };

        let binres = autosmooth_bin_resolution(&profile, &params);

        // below 2000 m: minimum width
        for lev in 0..4 {
            assert_eq!(binres[[0, lev]], 3);
        }
        // transition: 3 -> 7 -> 11, then saturation
        assert_eq!(binres[[0, 4]], 7);
        assert_eq!(binres[[0, 5]], 11);
        for lev in 6..12 {
            assert_eq!(binres[[0, lev]], 11);
        }
    }

    #[test]
    fn test_autosmooth_independent_per_time_slice() {
        let heights_low: Vec<f64> = (0..8).map(|i| i as f64 * 500.0).collect();
        let heights_high: Vec<f64> = (0..8).map(|i| 2000.0 + i as f64 * 500.0).collect();
        let height = Array2::from_shape_vec(
            (2, 8),
            heights_low.into_iter().chain(heights_high).collect(),
        )
        .unwrap();
        let data = Array2::from_elem((2, 8), 1.0);
        let error = Array2::from_elem((2, 8), 0.1);
        let profile =
            Profile::new(data, error, height, vec![Utc::now(), Utc::now()], 500.0).unwrap();

        let params = AutosmoothParams {
            min_bins: 3,
            max_bins: 11,
            bin_delta: 4,
            boundary: 2000.0,
        };
        let binres = autosmooth_bin_resolution(&profile, &params);

        // the second time slice starts at the boundary: growth begins at once
        assert_eq!(binres[[0, 0]], 3);
        assert_eq!(binres[[1, 0]], 7);
    }
}
