//! Locating the calibration height window that anchors a backscatter
//! inversion to its assumed reference value.
//!
//! Two interchangeable algorithms are provided: a per-product sliding-minimum
//! search on the signal (or signal ratio), and a multi-channel consensus
//! search built on an external Rayleigh-fit routine. The caller selects one
//! through `CalibrationSearchAlgorithm`.

use crate::core::numerics::{calc_rolling_means_sems, find_minimum_window};
use crate::core::rayleigh::{RayleighFitRoutine, RayleighFitTable};
use crate::types::{
    CalibrationParams, CalibrationWindow, ErrorThresholds, HeightInterval, LidarError,
    LidarResult, Profile,
};
use ndarray::{s, Array2};
use std::collections::BTreeSet;

/// One backscatter product taking part in a calibration-window search
pub struct CalibrationProduct<'a> {
    pub product_id: &'a str,
    /// Prepared elastic signal, or elastic/Raman signal ratio for Raman
    /// products
    pub profile: &'a Profile,
    pub params: &'a CalibrationParams,
    pub thresholds: &'a ErrorThresholds,
}

/// Calibration params of jointly searched products must be pairwise equal
fn validate_params_equal(products: &[CalibrationProduct]) -> LidarResult<()> {
    if let Some(first) = products.first() {
        for other in &products[1..] {
            if first.params != other.params {
                return Err(LidarError::CalibrationParamsNotEqual(
                    first.product_id.to_string(),
                    other.product_id.to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Sliding-minimum calibration-window search.
///
/// Per time slice, the calibration window is the rolling window with the
/// smallest mean inside the configured search interval whose relative
/// standard error of the mean stays below the high-range error threshold.
#[derive(Debug, Default)]
pub struct SlidingMinimumFinder;

impl SlidingMinimumFinder {
    pub fn new() -> Self {
        Self
    }

    /// Find a common calibration window for a group of products searched
    /// jointly. The products' calibration params must be pairwise equal;
    /// each product is then searched individually.
    pub fn find_common(
        &self,
        products: &[CalibrationProduct],
    ) -> LidarResult<Vec<CalibrationWindow>> {
        validate_params_equal(products)?;
        products.iter().map(|p| self.find(p)).collect()
    }

    /// Find the calibration window of one product, per time slice.
    /// Time slices without an acceptable window are `None`.
    pub fn find(&self, product: &CalibrationProduct) -> LidarResult<CalibrationWindow> {
        log::debug!(
            "sliding-minimum calibration window search for product {}",
            product.product_id
        );

        let profile = product.profile;
        let interval = product.params.search_interval;
        let (times, levels) = profile.data.dim();

        // the search interval must stay inside the profile's altitude range
        for t in 0..times {
            let top_height = profile.height[[t, levels - 1]];
            if interval.top > top_height {
                return Err(LidarError::Config(format!(
                    "calibration search interval reaches {} m but time slice {} ends at {} m",
                    interval.top, t, top_height
                )));
            }
        }

        // restrict the signal to the search interval
        let mut masked = profile.data.clone();
        for t in 0..times {
            for lev in 0..levels {
                if !interval.contains(profile.height[[t, lev]]) {
                    masked[[t, lev]] = f64::NAN;
                }
            }
        }

        // width of the rolling window [bins]; +1 because the sliding
        // operations cover slices [n : n + window_width]
        let width =
            (product.params.window_width / profile.raw_height_res).round() as usize + 1;
        let widths = vec![width; times];

        let (means, sems) = calc_rolling_means_sems(&masked, &widths)?;
        let windows =
            find_minimum_window(&means, &sems, &widths, product.thresholds.highrange);

        let mut intervals = Vec::with_capacity(times);
        for (t, window) in windows.iter().enumerate() {
            match window {
                Some((first, last)) => {
                    let bottom = profile.height[[t, *first]];
                    let top = profile.height[[t, *last]];
                    if bottom < top {
                        intervals.push(Some(HeightInterval { bottom, top }));
                    } else {
                        log::warn!(
                            "degenerate calibration window in time slice {} of product {}",
                            t,
                            product.product_id
                        );
                        intervals.push(None);
                    }
                }
                None => {
                    log::debug!(
                        "no calibration window found in time slice {} of product {}",
                        t,
                        product.product_id
                    );
                    intervals.push(None);
                }
            }
        }

        Ok(CalibrationWindow { intervals })
    }
}

/// One elastic channel taking part in the consensus search
pub struct ConsensusChannel<'a> {
    pub channel_id: &'a str,
    /// Background-corrected elastic signal
    pub profile: &'a Profile,
    /// Attenuated Rayleigh backscatter per (time, level)
    pub attenuated_rayleigh: &'a Array2<f64>,
}

/// Multi-channel consensus calibration-window search via a Rayleigh fit.
///
/// Every elastic channel is fitted per time slice for every candidate window
/// width (the products' configured default first, then the alternates in
/// order). A channel with no passing bin anywhere is excluded. Per time
/// slice the passing-height sets of the remaining channels are intersected,
/// widening the window until the intersection is non-empty; among the
/// intersection the height with the smallest mean goodness-of-fit across
/// channels wins (first occurrence in ascending height order on ties). The
/// single resulting window is shared by every product in the group.
pub struct RayleighConsensusFinder<'a, R: RayleighFitRoutine> {
    routine: &'a R,
    alternate_widths_m: Vec<f64>,
}

impl<'a, R: RayleighFitRoutine> RayleighConsensusFinder<'a, R> {
    pub fn new(routine: &'a R, alternate_widths_m: Vec<f64>) -> Self {
        Self {
            routine,
            alternate_widths_m,
        }
    }

    pub fn find_common(
        &self,
        channels: &[ConsensusChannel],
        products: &[CalibrationProduct],
    ) -> LidarResult<CalibrationWindow> {
        validate_params_equal(products)?;
        let params = products
            .first()
            .ok_or_else(|| LidarError::Config("no products for consensus search".to_string()))?
            .params;
        let first_channel = channels
            .first()
            .ok_or_else(|| LidarError::Config("no channels for consensus search".to_string()))?;

        let times = first_channel.profile.num_times();
        for channel in channels {
            if channel.profile.num_times() != times
                || channel.attenuated_rayleigh.dim() != channel.profile.data.dim()
            {
                return Err(LidarError::DimensionMismatch(format!(
                    "channel {} does not match the common time/level grid",
                    channel.channel_id
                )));
            }
        }

        // candidate widths, the configured default first
        let mut widths = vec![params.window_width];
        for &w in &self.alternate_widths_m {
            if w != params.window_width {
                widths.push(w);
            }
        }

        log::debug!(
            "Rayleigh-fit consensus search over {} channels, {} candidate widths",
            channels.len(),
            widths.len()
        );

        // fit every channel per time slice; tables[c][t][w]
        let mut tables: Vec<Vec<Vec<RayleighFitTable>>> = Vec::with_capacity(channels.len());
        for channel in channels {
            let profile = channel.profile;
            let mut per_time = Vec::with_capacity(times);
            for t in 0..times {
                let range_km = profile.height.slice(s![t, ..]).mapv(|h| h / 1000.0);
                let fit = self.routine.fit(
                    range_km.view(),
                    profile.data.slice(s![t, ..]),
                    channel.attenuated_rayleigh.slice(s![t, ..]),
                    profile.raw_height_res,
                    &widths,
                )?;
                if fit.len() != widths.len() {
                    return Err(LidarError::RayleighFit(format!(
                        "routine returned {} tables for {} widths",
                        fit.len(),
                        widths.len()
                    )));
                }
                per_time.push(fit);
            }
            tables.push(per_time);
        }

        // channels with no passing bin at any (time, width) are excluded
        let good: Vec<usize> = (0..channels.len())
            .filter(|&c| {
                tables[c]
                    .iter()
                    .any(|per_width| per_width.iter().any(|t| !t.passing_bins().is_empty()))
            })
            .collect();
        for (c, channel) in channels.iter().enumerate() {
            if !good.contains(&c) {
                log::warn!(
                    "channel {} has no valid Rayleigh fit anywhere, excluded from consensus",
                    channel.channel_id
                );
            }
        }
        if good.is_empty() {
            log::warn!("no channel with a valid Rayleigh fit, calibration failed everywhere");
            return Ok(CalibrationWindow::empty(times));
        }

        let height_axis = &channels[good[0]].profile.height;
        let mut intervals = Vec::with_capacity(times);

        for t in 0..times {
            let mut chosen: Option<(usize, f64)> = None;

            for (w, &width_m) in widths.iter().enumerate() {
                // intersect the passing-height sets of all good channels
                let mut common: Option<BTreeSet<usize>> = None;
                for &c in &good {
                    let bins: BTreeSet<usize> =
                        tables[c][t][w].passing_bins().into_iter().collect();
                    common = Some(match common {
                        None => bins,
                        Some(set) => set.intersection(&bins).copied().collect(),
                    });
                }
                let common = common.unwrap_or_default();
                if common.is_empty() {
                    continue;
                }

                // smallest mean goodness-of-fit across channels; ascending
                // height order with strict comparison keeps the first
                // occurrence on ties
                let mut best: Option<(usize, f64)> = None;
                for &bin in &common {
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for &c in &good {
                        if let Some(g) = tables[c][t][w].goodness_at(bin) {
                            sum += g;
                            count += 1;
                        }
                    }
                    if count == 0 {
                        continue;
                    }
                    let mean = sum / count as f64;
                    if best.map_or(true, |(_, m)| mean < m) {
                        best = Some((bin, mean));
                    }
                }

                if let Some((bin, _)) = best {
                    chosen = Some((bin, width_m));
                    break;
                }
            }

            match chosen {
                Some((bin, width_m)) => {
                    let center = height_axis[[t, bin]];
                    let half = width_m / 2.0;
                    intervals.push(Some(HeightInterval {
                        bottom: center - half,
                        top: center + half,
                    }));
                }
                None => {
                    log::debug!(
                        "consensus search exhausted all window widths in time slice {}",
                        t
                    );
                    intervals.push(None);
                }
            }
        }

        Ok(CalibrationWindow { intervals })
    }
}
