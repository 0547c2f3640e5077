//! Inversion of calibrated signals into particle backscatter coefficient
//! profiles: Klett-Fernald for elastic-only signals and the
//! backscatter-ratio method for Raman signal ratios.

use crate::core::numerics::{closest_bin, integral_profile};
use crate::types::{
    flags, CalibrationValue, CalibrationWindow, ErrorThresholds, LidarError, LidarResult,
    Profile, OVL_FACTOR, RAYLEIGH_LIDAR_RATIO,
};
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

/// Parameters shared by the backscatter inversions: the assumed calibration
/// value with its uncertainty and the error thresholds governing
/// calibration acceptance
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackscatterParams {
    pub cal_value: CalibrationValue,
    pub thresholds: ErrorThresholds,
}

/// Mean and standard error of the mean over the finite values of one
/// calibration window
fn window_mean_sem(row: ndarray::ArrayView1<f64>, first: usize, last: usize) -> Option<(f64, f64)> {
    let values: Vec<f64> = (first..=last.min(row.len() - 1))
        .map(|i| row[i])
        .filter(|v| v.is_finite())
        .collect();
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt() / n.sqrt()))
}

/// Klett-Fernald inversion of an elastic signal.
///
/// The input profile must be range corrected, shot normalized and corrected
/// for molecular transmission, and must carry the `mol_backscatter` and
/// `assumed_lidar_ratio` auxiliary channels.
pub struct KlettFernaldInverter {
    params: BackscatterParams,
}

impl KlettFernaldInverter {
    pub fn new(params: BackscatterParams) -> Self {
        Self { params }
    }

    /// Invert one prepared elastic signal with its calibration window into a
    /// particle backscatter profile.
    pub fn invert(
        &self,
        signal: &Profile,
        calibr_window: &CalibrationWindow,
    ) -> LidarResult<Profile> {
        log::debug!("Klett-Fernald backscatter inversion");

        let mol_bsc = signal
            .mol_backscatter
            .as_ref()
            .ok_or(LidarError::MissingChannel("mol_backscatter"))?;
        let lidar_ratio = signal
            .assumed_lidar_ratio
            .as_ref()
            .ok_or(LidarError::MissingChannel("assumed_lidar_ratio"))?;

        let (times, levels) = signal.data.dim();
        let mut result = signal.clone();
        result.data.fill(f64::NAN);
        result.error.fill(f64::NAN);

        for t in 0..times {
            let (win_first, win_last) = match calibr_window.bins(signal, t) {
                Some(bins) => bins,
                None => {
                    for lev in 0..levels {
                        result.set_invalid_point(t, lev, flags::CALC_WINDOW_OUTSIDE_PROFILE);
                    }
                    continue;
                }
            };

            let sig_row = signal.data.slice(s![t, ..]);
            let err_row = signal.error.slice(s![t, ..]);
            let height_row = signal.height.slice(s![t, ..]);
            let mol_row = mol_bsc.slice(s![t, ..]);
            let lr_row = lidar_ratio.slice(s![t, ..]);

            let (win_mean, win_sem) = window_mean_sem(sig_row, win_first, win_last)
                .ok_or(LidarError::NoValidDataPointsForCalibration { time_slice: t })?;
            let rel_sem = win_sem / win_mean;
            if rel_sem > self.params.thresholds.highrange {
                return Err(LidarError::NoValidDataPointsForCalibration { time_slice: t });
            }

            // bin whose signal is closest to the window mean, within its own
            // statistical error
            let cal_bin = closest_bin(
                sig_row,
                Some(err_row),
                win_first,
                win_last + 1,
                Some(win_mean),
            )
            .ok_or(LidarError::CalibrationBinNotFound { time_slice: t })?;

            let sig_cal = sig_row[cal_bin];
            let mol_cal = mol_row[cal_bin];
            if !sig_cal.is_finite() || !mol_cal.is_finite() || mol_cal == 0.0 {
                return Err(LidarError::NoValidDataPointsForCalibration { time_slice: t });
            }

            // integrated molecular backscatter, outward from the calibration
            // bin in both directions
            let mol_up =
                integral_profile(mol_row, height_row, Some(cal_bin), None, None)?;
            let mol_down =
                integral_profile(mol_row, height_row, Some(cal_bin), Some(0), None)?;

            let mut attenuated = Array1::from_elem(levels, f64::NAN);
            for lev in 0..levels {
                let m = if lev < cal_bin {
                    mol_down[lev]
                } else {
                    mol_up[lev]
                };
                attenuated[lev] = sig_row[lev]
                    * (-2.0 * (lr_row[lev] - RAYLEIGH_LIDAR_RATIO) * m).exp();
            }

            // the denominator integral carries the level-dependent lidar
            // ratio; the downward branch extrapolates into the blind zone
            let weighted = &attenuated * &lr_row.to_owned();
            let int_up =
                integral_profile(weighted.view(), height_row, Some(cal_bin), None, None)?;
            let int_down = integral_profile(
                weighted.view(),
                height_row,
                Some(cal_bin),
                Some(0),
                Some(OVL_FACTOR),
            )?;

            // boundary constant from the signal and molecular backscatter at
            // the calibration bin
            let boundary = sig_cal / (self.params.cal_value.value * mol_cal);

            let sqr_rel_cal =
                rel_sem * rel_sem + self.params.cal_value.rel_error * self.params.cal_value.rel_error;

            for lev in 0..levels {
                let a = attenuated[lev];
                let a_int = if lev < cal_bin {
                    int_down[lev]
                } else {
                    int_up[lev]
                };
                if !a.is_finite() || !a_int.is_finite() || !mol_row[lev].is_finite() {
                    continue;
                }
                let total_bsc = a / (boundary - 2.0 * a_int);
                result.data[[t, lev]] = total_bsc - mol_row[lev];

                let rel_sig = err_row[lev] / sig_row[lev];
                result.error[[t, lev]] =
                    total_bsc.abs() * (rel_sig * rel_sig + sqr_rel_cal).sqrt();

                if lev > cal_bin {
                    result.flags[[t, lev]] |= flags::ABOVE_KLETT_REF;
                }
            }
        }

        Ok(result)
    }
}

/// Raman backscatter inversion via the calibrated backscatter ratio.
///
/// The input profile is the prepared elastic/Raman signal ratio and must
/// carry the `mol_extinction` auxiliary channel.
pub struct RamanBscInverter {
    params: BackscatterParams,
}

impl RamanBscInverter {
    pub fn new(params: BackscatterParams) -> Self {
        Self { params }
    }

    /// Invert one prepared signal ratio with its calibration window into a
    /// particle backscatter profile.
    pub fn invert(
        &self,
        sigratio: &Profile,
        calibr_window: &CalibrationWindow,
    ) -> LidarResult<Profile> {
        log::debug!("Raman backscatter inversion via backscatter ratio");

        let mol_ext = sigratio
            .mol_extinction
            .as_ref()
            .ok_or(LidarError::MissingChannel("mol_extinction"))?;
        let rayl_bsc = mol_ext.mapv(|alpha| alpha / RAYLEIGH_LIDAR_RATIO);

        let (times, levels) = sigratio.data.dim();
        let mut result = sigratio.clone();
        result.data.fill(f64::NAN);
        result.error.fill(f64::NAN);

        for t in 0..times {
            let (win_first, win_last) = match calibr_window.bins(sigratio, t) {
                Some(bins) => bins,
                None => {
                    for lev in 0..levels {
                        result.set_invalid_point(t, lev, flags::CALC_WINDOW_OUTSIDE_PROFILE);
                    }
                    continue;
                }
            };

            let ratio_row = sigratio.data.slice(s![t, ..]);
            let (win_mean, win_sem) = window_mean_sem(ratio_row, win_first, win_last)
                .ok_or(LidarError::NoValidDataPointsForCalibration { time_slice: t })?;
            let rel_sem = win_sem / win_mean;
            if rel_sem > self.params.thresholds.highrange {
                return Err(LidarError::NoValidDataPointsForCalibration { time_slice: t });
            }

            // calibration factor and its relative error (root sum square of
            // the window SEM and the assumed value's own uncertainty)
            let cal_factor = self.params.cal_value.value / win_mean;
            let sqr_rel_cal = rel_sem * rel_sem
                + self.params.cal_value.rel_error * self.params.cal_value.rel_error;

            for lev in 0..levels {
                let ratio = sigratio.data[[t, lev]];
                let ratio_err = sigratio.error[[t, lev]];
                if !ratio.is_finite() {
                    continue;
                }
                let bsc_ratio = ratio * cal_factor;
                let rel_ratio = ratio_err / ratio;
                let bsc_ratio_err =
                    bsc_ratio.abs() * (rel_ratio * rel_ratio + sqr_rel_cal).sqrt();

                result.data[[t, lev]] = (bsc_ratio - 1.0) * rayl_bsc[[t, lev]];
                result.error[[t, lev]] = (bsc_ratio_err * rayl_bsc[[t, lev]]).abs();
            }
        }

        Ok(result)
    }
}
