//! Interface to the external Rayleigh-fit routine used by the consensus
//! calibration-window search. The routine itself (fitting the measured signal
//! against the attenuated molecular backscatter and flagging consistent
//! height bins) lives outside this crate and is treated as a black box.

use crate::types::LidarResult;
use ndarray::ArrayView1;

/// One candidate height bin of a Rayleigh fit: whether the bin passed all
/// internal consistency checks of the routine, and the goodness-of-fit value
/// used to rank passing bins
#[derive(Debug, Clone, Copy)]
pub struct RayleighFitCandidate {
    pub bin: usize,
    pub passed: bool,
    pub goodness: f64,
}

/// Fit results for one candidate window width of one time slice
#[derive(Debug, Clone)]
pub struct RayleighFitTable {
    /// Window width [m] these candidates were fitted with
    pub window_width_m: f64,
    pub candidates: Vec<RayleighFitCandidate>,
}

impl RayleighFitTable {
    /// Height bins passing all consistency checks, in ascending order
    pub fn passing_bins(&self) -> Vec<usize> {
        let mut bins: Vec<usize> = self
            .candidates
            .iter()
            .filter(|c| c.passed)
            .map(|c| c.bin)
            .collect();
        bins.sort_unstable();
        bins
    }

    /// Goodness-of-fit value of a passing bin
    pub fn goodness_at(&self, bin: usize) -> Option<f64> {
        self.candidates
            .iter()
            .find(|c| c.passed && c.bin == bin)
            .map(|c| c.goodness)
    }
}

/// External Rayleigh-fit routine.
///
/// For one time slice of one channel it receives the range axis in km, the
/// background-corrected signal, the attenuated-Rayleigh-backscatter profile
/// and the range-bin size, and returns one candidate table per requested
/// window width.
pub trait RayleighFitRoutine {
    fn fit(
        &self,
        range_km: ArrayView1<f64>,
        signal: ArrayView1<f64>,
        attenuated_rayleigh: ArrayView1<f64>,
        bin_size_m: f64,
        window_widths_m: &[f64],
    ) -> LidarResult<Vec<RayleighFitTable>>;
}
