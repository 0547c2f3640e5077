//! Numeric primitives shared by the retrieval operations: rolling statistics,
//! minimum-error window search, nearest-value bin search and cumulative
//! vertical integration.

use crate::types::{LidarError, LidarResult, NEG_TEST_STD_FACTOR};
use ndarray::{s, Array1, Array2, ArrayView1};

/// Rolling mean and standard error of the mean over a trailing window.
///
/// For every level the statistics cover the `window` samples ending at that
/// level; the first `window - 1` levels are NaN, as is any window containing
/// a non-finite sample. The standard error is the sample standard deviation
/// (ddof = 1) divided by the square root of the window size.
pub fn rolling_mean_sem(data: &Array2<f64>, window: usize) -> (Array2<f64>, Array2<f64>) {
    let (times, levels) = data.dim();
    let mut means = Array2::from_elem((times, levels), f64::NAN);
    let mut sems = Array2::from_elem((times, levels), f64::NAN);

    if window == 0 {
        return (means, sems);
    }

    for t in 0..times {
        for lev in (window - 1)..levels {
            let win = data.slice(s![t, lev + 1 - window..=lev]);
            let mean = win.sum() / window as f64;
            means[[t, lev]] = mean;
            if window > 1 {
                let var = win.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                    / (window - 1) as f64;
                sems[[t, lev]] = var.sqrt() / (window as f64).sqrt();
            }
        }
    }

    (means, sems)
}

/// Rolling means and SEMs with a window width per time slice.
pub fn calc_rolling_means_sems(
    data: &Array2<f64>,
    window_widths: &[usize],
) -> LidarResult<(Array2<f64>, Array2<f64>)> {
    let (times, levels) = data.dim();
    if window_widths.len() != times {
        return Err(LidarError::DimensionMismatch(format!(
            "{} window widths for {} time slices",
            window_widths.len(),
            times
        )));
    }

    let mut means = Array2::from_elem((times, levels), f64::NAN);
    let mut sems = Array2::from_elem((times, levels), f64::NAN);
    for (t, &width) in window_widths.iter().enumerate() {
        let row = data.slice(s![t..t + 1, ..]).to_owned();
        let (m, s) = rolling_mean_sem(&row, width);
        means.slice_mut(s![t, ..]).assign(&m.slice(s![0, ..]));
        sems.slice_mut(s![t, ..]).assign(&s.slice(s![0, ..]));
    }
    Ok((means, sems))
}

/// Find, per time slice, the rolling window with the smallest mean among all
/// windows whose relative SEM stays below `error_threshold` and whose mean is
/// positive.
///
/// The window is identified by its last level; the returned pair is
/// `(last - width, last)`. A time slice without any acceptable window — or
/// whose best window would start below the profile — yields `None`.
pub fn find_minimum_window(
    means: &Array2<f64>,
    sems: &Array2<f64>,
    window_widths: &[usize],
    error_threshold: f64,
) -> Vec<Option<(usize, usize)>> {
    let (times, levels) = means.dim();
    let mut result = Vec::with_capacity(times);

    for t in 0..times {
        let mut best: Option<(usize, f64)> = None;
        for lev in 0..levels {
            let mean = means[[t, lev]];
            let sem = sems[[t, lev]];
            if !mean.is_finite() || !sem.is_finite() || mean <= 0.0 {
                continue;
            }
            if sem / mean >= error_threshold {
                continue;
            }
            // strict comparison keeps the first occurrence on ties
            if best.map_or(true, |(_, m)| mean < m) {
                best = Some((lev, mean));
            }
        }

        let width = window_widths[t];
        result.push(best.and_then(|(last, _)| last.checked_sub(width).map(|first| (first, last))));
    }

    result
}

/// Index within `[first_bin, last_bin)` whose value is closest to
/// `search_value` (default: the mean of the finite values in the range).
///
/// If `error` is given, candidates are scanned in increasing distance order
/// and one is accepted only when its distance stays below its own statistical
/// error times the negative-test factor; `None` if no candidate qualifies.
pub fn closest_bin(
    data: ArrayView1<f64>,
    error: Option<ArrayView1<f64>>,
    first_bin: usize,
    last_bin: usize,
    search_value: Option<f64>,
) -> Option<usize> {
    let last_bin = last_bin.min(data.len());
    if first_bin >= last_bin {
        return None;
    }

    let search_value = search_value.or_else(|| {
        let valid: Vec<f64> = (first_bin..last_bin)
            .map(|i| data[i])
            .filter(|v| v.is_finite())
            .collect();
        if valid.is_empty() {
            None
        } else {
            Some(valid.iter().sum::<f64>() / valid.len() as f64)
        }
    })?;

    let mut candidates: Vec<(usize, f64)> = (first_bin..last_bin)
        .filter(|&i| data[i].is_finite())
        .map(|i| (i, (data[i] - search_value).abs()))
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    match error {
        None => candidates.first().map(|&(i, _)| i),
        Some(err) => candidates
            .iter()
            .find(|&&(i, dist)| err[i].is_finite() && dist < err[i] * NEG_TEST_STD_FACTOR)
            .map(|&(i, _)| i),
    }
}

/// Cumulative trapezoidal integral of `data` over `range_axis` between
/// `first_bin` and `last_bin` (both inclusive; `None` means the profile
/// edge).
///
/// When `last_bin < first_bin` the integration direction is reversed: axes
/// and data are flipped, integrated, and the result is flipped back, so
/// downward integration carries the sign of the flipped axis. NaN samples
/// inside the window are dropped and the cumulative result is linearly
/// re-interpolated onto the original axis within the valid span; levels
/// outside the window or the valid span are NaN.
///
/// With `extrapolate_ovl_factor` a synthetic sample at range 0 with value
/// `edge * factor` joins the ground end of the window before integration,
/// emulating the signal inside the instrument's blind zone; its row is
/// dropped from the result so the output length matches the input. Half of
/// the first trapezoid's area is always added to every output value.
pub fn integral_profile(
    data: ArrayView1<f64>,
    range_axis: ArrayView1<f64>,
    first_bin: Option<usize>,
    last_bin: Option<usize>,
    extrapolate_ovl_factor: Option<f64>,
) -> LidarResult<Array1<f64>> {
    let n = data.len();
    if range_axis.len() != n {
        return Err(LidarError::DimensionMismatch(format!(
            "data has {} levels, range axis {}",
            n,
            range_axis.len()
        )));
    }
    if n == 0 {
        return Err(LidarError::EmptyIntegrationWindow);
    }

    let first = first_bin.unwrap_or(0).min(n - 1);
    let last = last_bin.unwrap_or(n - 1).min(n - 1);
    let reversed = last < first;
    let (lo, hi) = if reversed { (last, first) } else { (first, last) };

    let mut x: Vec<f64> = range_axis.slice(s![lo..=hi]).to_vec();
    let mut y: Vec<f64> = data.slice(s![lo..=hi]).to_vec();
    if reversed {
        x.reverse();
        y.reverse();
    }

    let segment = cumtrapz_gap_filled(&x, &y, extrapolate_ovl_factor)?;

    let mut result = Array1::from_elem(n, f64::NAN);
    for (k, &value) in segment.iter().enumerate() {
        let idx = if reversed { hi - k } else { lo + k };
        result[idx] = value;
    }
    Ok(result)
}

/// Cumulative trapezoid over one window in integration order, with NaN gap
/// filling and the optional synthetic ground sample.
fn cumtrapz_gap_filled(x: &[f64], y: &[f64], ovl_factor: Option<f64>) -> LidarResult<Vec<f64>> {
    let n = x.len();
    let valid: Vec<usize> = (0..n)
        .filter(|&i| x[i].is_finite() && y[i].is_finite())
        .collect();
    if valid.len() < 2 {
        return Err(LidarError::EmptyIntegrationWindow);
    }

    // working samples, with the synthetic point attached to whichever end of
    // the window is nearer the ground (range 0)
    let mut xs: Vec<f64> = Vec::with_capacity(valid.len() + 1);
    let mut ys: Vec<f64> = Vec::with_capacity(valid.len() + 1);
    let first = valid[0];
    let last = *valid.last().unwrap();
    let ground_at_start = x[first].abs() <= x[last].abs();

    if let Some(factor) = ovl_factor {
        if ground_at_start {
            xs.push(0.0);
            ys.push(y[first] * factor);
        }
    }
    for &i in &valid {
        xs.push(x[i]);
        ys.push(y[i]);
    }
    if let Some(factor) = ovl_factor {
        if !ground_at_start {
            xs.push(0.0);
            ys.push(y[last] * factor);
        }
    }

    let mut cum = vec![0.0; xs.len()];
    for j in 1..xs.len() {
        cum[j] = cum[j - 1] + 0.5 * (xs[j] - xs[j - 1]) * (ys[j] + ys[j - 1]);
    }

    // half of the first trapezoid's area
    let offset = 0.25 * (xs[1] - xs[0]) * (ys[0] + ys[1]);
    for value in cum.iter_mut() {
        *value += offset;
    }

    // cumulative values at the real samples (synthetic row dropped)
    let skip = usize::from(ovl_factor.is_some() && ground_at_start);
    let cum_valid = &cum[skip..skip + valid.len()];

    let mut out = vec![f64::NAN; n];
    for (k, &i) in valid.iter().enumerate() {
        out[i] = cum_valid[k];
    }
    // fill gaps between valid samples by linear interpolation
    for k in 0..valid.len() - 1 {
        let (a, b) = (valid[k], valid[k + 1]);
        for i in a + 1..b {
            if x[i].is_finite() {
                let w = (x[i] - x[a]) / (x[b] - x[a]);
                out[i] = cum_valid[k] + (cum_valid[k + 1] - cum_valid[k]) * w;
            }
        }
    }

    Ok(out)
}
