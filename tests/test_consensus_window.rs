//! End-to-end consensus calibration-window search across channels with a
//! mock Rayleigh-fit routine: disjoint valid heights at the default window
//! width, agreement at an alternate width, and a dead channel that must be
//! excluded rather than fail the search.

use chrono::Utc;
use lidarine::core::{
    CalibrationProduct, ConsensusChannel, RayleighConsensusFinder, RayleighFitCandidate,
    RayleighFitRoutine, RayleighFitTable,
};
use lidarine::{
    CalibrationParams, CalibrationSearchAlgorithm, CalibrationValue, ErrorThresholds,
    HeightInterval, LidarError, LidarResult, Profile,
};
use ndarray::{Array2, ArrayView1};

const LEVELS: usize = 60;
const DZ: f64 = 100.0;
const DEFAULT_WIDTH: f64 = 500.0;
const ALTERNATE_WIDTH: f64 = 1000.0;

/// Channels are told apart by a marker in their first signal bin; a negative
/// marker in the second bin simulates a time slice without any valid fit.
struct MockRayleighFit;

impl MockRayleighFit {
    fn table(width: f64, bins: &[(usize, f64)]) -> RayleighFitTable {
        RayleighFitTable {
            window_width_m: width,
            candidates: bins
                .iter()
                .map(|&(bin, goodness)| RayleighFitCandidate {
                    bin,
                    passed: true,
                    goodness,
                })
                .collect(),
        }
    }
}

impl RayleighFitRoutine for MockRayleighFit {
    fn fit(
        &self,
        _range_km: ArrayView1<f64>,
        signal: ArrayView1<f64>,
        _attenuated_rayleigh: ArrayView1<f64>,
        _bin_size_m: f64,
        window_widths_m: &[f64],
    ) -> LidarResult<Vec<RayleighFitTable>> {
        let channel_marker = signal[0] as usize;
        let slice_is_dead = signal[1] < 0.0;

        Ok(window_widths_m
            .iter()
            .map(|&width| {
                if slice_is_dead {
                    return Self::table(width, &[]);
                }
                match (channel_marker, width == DEFAULT_WIDTH) {
                    // channel 1: low heights at the default width, higher
                    // ones at the alternate width
                    (1, true) => Self::table(width, &[(10, 1.0), (11, 1.5), (12, 2.0)]),
                    (1, false) => Self::table(width, &[(20, 5.0), (21, 2.0), (22, 3.0)]),
                    // channel 2: disjoint from channel 1 at the default
                    // width, overlapping at the alternate width
                    (2, true) => Self::table(width, &[(30, 1.0), (31, 1.0)]),
                    (2, false) => Self::table(width, &[(21, 2.0), (22, 1.0), (23, 0.5)]),
                    // channel 3 never passes anywhere
                    _ => Self::table(width, &[]),
                }
            })
            .collect())
    }
}

fn channel_profile(marker: f64, dead_second_slice: bool) -> Profile {
    let mut data = Array2::from_elem((2, LEVELS), 100.0);
    data[[0, 0]] = marker;
    data[[1, 0]] = marker;
    data[[1, 1]] = if dead_second_slice { -1.0 } else { 100.0 };
    let error = Array2::from_elem((2, LEVELS), 1.0);
    let height = Array2::from_shape_fn((2, LEVELS), |(_, lev)| lev as f64 * DZ);
    Profile::new(data, error, height, vec![Utc::now(), Utc::now()], DZ).unwrap()
}

fn consensus_params() -> CalibrationParams {
    CalibrationParams::new(
        HeightInterval::new(1000.0, 5000.0).unwrap(),
        DEFAULT_WIDTH,
        CalibrationValue {
            value: 1.0,
            rel_error: 0.05,
        },
        CalibrationSearchAlgorithm::RayleighConsensus,
    )
    .unwrap()
}

#[test]
fn test_consensus_falls_back_to_alternate_width() {
    let _ = env_logger::builder().is_test(true).try_init();

    let profile1 = channel_profile(1.0, true);
    let profile2 = channel_profile(2.0, true);
    let profile3 = channel_profile(3.0, true);
    let rayleigh = Array2::from_elem((2, LEVELS), 1.0);

    let channels = [
        ConsensusChannel {
            channel_id: "el355",
            profile: &profile1,
            attenuated_rayleigh: &rayleigh,
        },
        ConsensusChannel {
            channel_id: "el532",
            profile: &profile2,
            attenuated_rayleigh: &rayleigh,
        },
        ConsensusChannel {
            channel_id: "el1064",
            profile: &profile3,
            attenuated_rayleigh: &rayleigh,
        },
    ];

    let params = consensus_params();
    let thresholds = ErrorThresholds::new(0.1, 0.1).unwrap();
    let products: Vec<CalibrationProduct> = ["bsc355", "bsc532"]
        .iter()
        .map(|&id| CalibrationProduct {
            product_id: id,
            profile: &profile1,
            params: &params,
            thresholds: &thresholds,
        })
        .collect();

    let routine = MockRayleighFit;
    let finder = RayleighConsensusFinder::new(&routine, vec![ALTERNATE_WIDTH]);
    let window = finder.find_common(&channels, &products).unwrap();

    // the default width gives disjoint passing sets ({10,11,12} vs {30,31});
    // the alternate width intersects at {21, 22} where the mean goodness
    // ties at 2.0, so the lower height 21 wins
    let interval = window.intervals[0].expect("consensus window found");
    assert_eq!(interval.bottom, 21.0 * DZ - ALTERNATE_WIDTH / 2.0);
    assert_eq!(interval.top, 21.0 * DZ + ALTERNATE_WIDTH / 2.0);

    // the second time slice has no passing bins at any width
    assert!(window.intervals[1].is_none());
}

#[test]
fn test_consensus_without_dead_channel_uses_default_width() {
    // with only channel 1 alive the default width already succeeds
    let profile1 = channel_profile(1.0, false);
    let profile3 = channel_profile(3.0, false);
    let rayleigh = Array2::from_elem((2, LEVELS), 1.0);

    let channels = [
        ConsensusChannel {
            channel_id: "el355",
            profile: &profile1,
            attenuated_rayleigh: &rayleigh,
        },
        ConsensusChannel {
            channel_id: "el1064",
            profile: &profile3,
            attenuated_rayleigh: &rayleigh,
        },
    ];

    let params = consensus_params();
    let thresholds = ErrorThresholds::new(0.1, 0.1).unwrap();
    let products = [CalibrationProduct {
        product_id: "bsc355",
        profile: &profile1,
        params: &params,
        thresholds: &thresholds,
    }];

    let routine = MockRayleighFit;
    let finder = RayleighConsensusFinder::new(&routine, vec![ALTERNATE_WIDTH]);
    let window = finder.find_common(&channels, &products).unwrap();

    // bin 10 has the smallest goodness of channel 1's default-width set
    let interval = window.intervals[0].expect("consensus window found");
    assert_eq!(interval.bottom, 10.0 * DZ - DEFAULT_WIDTH / 2.0);
    assert_eq!(interval.top, 10.0 * DZ + DEFAULT_WIDTH / 2.0);
}

#[test]
fn test_consensus_rejects_unequal_params() {
    let profile1 = channel_profile(1.0, false);
    let rayleigh = Array2::from_elem((2, LEVELS), 1.0);
    let channels = [ConsensusChannel {
        channel_id: "el355",
        profile: &profile1,
        attenuated_rayleigh: &rayleigh,
    }];

    let params_a = consensus_params();
    let mut params_b = params_a.clone();
    params_b.cal_value.value = 1.2;
    let thresholds = ErrorThresholds::new(0.1, 0.1).unwrap();

    let products = [
        CalibrationProduct {
            product_id: "bsc355",
            profile: &profile1,
            params: &params_a,
            thresholds: &thresholds,
        },
        CalibrationProduct {
            product_id: "bsc532",
            profile: &profile1,
            params: &params_b,
            thresholds: &thresholds,
        },
    ];

    let routine = MockRayleighFit;
    let finder = RayleighConsensusFinder::new(&routine, vec![ALTERNATE_WIDTH]);
    let result = finder.find_common(&channels, &products);
    assert!(matches!(
        result,
        Err(LidarError::CalibrationParamsNotEqual(_, _))
    ));
}
