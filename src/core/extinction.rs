//! Particle extinction retrieval: sliding-window linear regression of the
//! log-transformed Raman signal against range, converted to extinction with
//! the wavelength-dependence factor.

use crate::types::{flags, LidarResult, Profile, SlopeAlgorithm};
use ndarray::s;
use serde::{Deserialize, Serialize};

/// Result of one sliding-window slope fit
#[derive(Debug, Clone, Copy)]
pub struct SlopeFit {
    pub slope: f64,
    pub slope_err: f64,
}

/// Degree-1 polynomial fit of `y` against `x`, optionally weighted with the
/// inverse statistical error.
///
/// The slope variance is the "unscaled" covariance of the fit, i.e. it
/// follows from the supplied uncertainties alone (Numerical Recipes
/// convention), not from the residuals.
pub fn signal_slope(algorithm: SlopeAlgorithm, x: &[f64], y: &[f64], yerr: &[f64]) -> SlopeFit {
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;
    let mut sum_wxx = 0.0;
    let mut sum_wxy = 0.0;

    for i in 0..x.len() {
        let weight = match algorithm {
            SlopeAlgorithm::Weighted => 1.0 / yerr[i],
            SlopeAlgorithm::Unweighted => 1.0,
        };
        let w2 = weight * weight;
        sum_w += w2;
        sum_wx += w2 * x[i];
        sum_wy += w2 * y[i];
        sum_wxx += w2 * x[i] * x[i];
        sum_wxy += w2 * x[i] * y[i];
    }

    let delta = sum_w * sum_wxx - sum_wx * sum_wx;
    SlopeFit {
        slope: (sum_w * sum_wxy - sum_wx * sum_wy) / delta,
        slope_err: (sum_w / delta).sqrt(),
    }
}

/// Parameters of the extinction retrieval
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExtinctionParams {
    /// Laser emission wavelength [nm]
    pub emission_wavelength: f64,
    /// Raman detection wavelength [nm]
    pub detection_wavelength: f64,
    /// Assumed Angstroem exponent of the particle extinction
    pub angstroem_exponent: f64,
    pub slope_algorithm: SlopeAlgorithm,
}

impl ExtinctionParams {
    /// Wavelength-dependence factor converting the signal slope into
    /// extinction at the emission wavelength
    pub fn wavelength_factor(&self) -> f64 {
        1.0 / (1.0
            + (self.emission_wavelength / self.detection_wavelength)
                .powf(self.angstroem_exponent))
    }
}

/// Extinction retrieval from a log-transformed, prepared Raman signal.
///
/// The per-level fit window comes from the signal's `bin_resolution` channel
/// (set beforehand by the fixed-resolution or autosmooth computation).
pub struct ExtinctionInverter {
    params: ExtinctionParams,
}

impl ExtinctionInverter {
    pub fn new(params: ExtinctionParams) -> Self {
        Self { params }
    }

    /// Derive the extinction profile for every time slice.
    pub fn invert(&self, signal: &Profile) -> LidarResult<Profile> {
        log::debug!(
            "extinction retrieval, {:?} slope fit",
            self.params.slope_algorithm
        );

        let (times, _) = signal.data.dim();
        let mut result = signal.clone();
        for t in 0..times {
            let row = self.calc_single_profile(t, signal);
            self.store_row(&mut result, t, row);
        }
        self.slope_to_extinction(&mut result);
        Ok(result)
    }

    /// Same as `invert`, with the independent time slices computed in
    /// parallel.
    #[cfg(feature = "parallel")]
    pub fn invert_parallel(&self, signal: &Profile) -> LidarResult<Profile> {
        use rayon::prelude::*;

        log::debug!(
            "parallel extinction retrieval, {:?} slope fit",
            self.params.slope_algorithm
        );

        let (times, _) = signal.data.dim();
        let rows: Vec<SliceRow> = (0..times)
            .into_par_iter()
            .map(|t| self.calc_single_profile(t, signal))
            .collect();

        let mut result = signal.clone();
        for (t, row) in rows.into_iter().enumerate() {
            self.store_row(&mut result, t, row);
        }
        self.slope_to_extinction(&mut result);
        Ok(result)
    }

    fn calc_single_profile(&self, t: usize, signal: &Profile) -> SliceRow {
        let levels = signal.num_levels();
        let mut row = SliceRow {
            data: vec![f64::NAN; levels],
            error: vec![f64::NAN; levels],
            flags: signal.flags.slice(s![t, ..]).to_vec(),
            bin_resolution: signal.bin_resolution.slice(s![t, ..]).to_vec(),
        };

        let (first_valid, last_valid) =
            match (signal.first_valid_bin(t), signal.last_valid_bin(t)) {
                (Some(f), Some(l)) => (f, l),
                _ => return row,
            };

        for lev in first_valid..last_valid {
            let window = signal.bin_resolution[[t, lev]];
            let half = window / 2;

            if lev < first_valid + half {
                row.flags[lev] |= flags::BELOW_OVL;
            } else if lev + half >= last_valid {
                row.flags[lev] |= flags::ABOVE_MAX_ALT;
            } else {
                let first = lev - half;
                let last = lev + half;
                let x = signal.height.slice(s![t, first..=last]).to_vec();
                let y = signal.data.slice(s![t, first..=last]).to_vec();
                let yerr = signal.error.slice(s![t, first..=last]).to_vec();

                let fit = signal_slope(self.params.slope_algorithm, &x, &y, &yerr);
                let mut qf = 0u16;
                for bin in first..=last {
                    qf |= signal.flags[[t, bin]];
                }

                row.data[lev] = fit.slope;
                row.error[lev] = fit.slope_err;
                row.flags[lev] = qf;
                row.bin_resolution[lev] = window;
            }
        }

        row
    }

    fn store_row(&self, result: &mut Profile, t: usize, row: SliceRow) {
        for (lev, value) in row.data.iter().enumerate() {
            result.data[[t, lev]] = *value;
            result.error[[t, lev]] = row.error[lev];
            result.flags[[t, lev]] = row.flags[lev];
            result.bin_resolution[[t, lev]] = row.bin_resolution[lev];
        }
    }

    /// Convert the fitted signal slopes into extinction coefficients
    fn slope_to_extinction(&self, profile: &mut Profile) {
        let wl_factor = self.params.wavelength_factor();
        profile.data.mapv_inplace(|slope| -slope * wl_factor);
        profile.error.mapv_inplace(|err| err * wl_factor);
    }
}

/// Per-time-slice output rows, kept separate so the parallel path can build
/// them without sharing the result profile
struct SliceRow {
    data: Vec<f64>,
    error: Vec<f64>,
    flags: Vec<u16>,
    bin_resolution: Vec<usize>,
}
