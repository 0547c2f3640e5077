//! End-to-end Raman backscatter retrieval via the calibrated backscatter
//! ratio, from window search to the final coefficient profile.

use chrono::Utc;
use lidarine::core::{BackscatterParams, CalibrationProduct};
use lidarine::types::RAYLEIGH_LIDAR_RATIO;
use lidarine::{
    CalibrationParams, CalibrationSearchAlgorithm, CalibrationValue, ErrorThresholds,
    HeightInterval, Profile, RamanBscInverter, SlidingMinimumFinder,
};
use ndarray::Array2;

const LEVELS: usize = 120;
const DZ: f64 = 50.0;

/// Prepared elastic/Raman signal ratio, constant over the whole profile
fn constant_ratio_profile(value: f64) -> Profile {
    let data = Array2::from_elem((2, LEVELS), value);
    let error = data.mapv(|v| v * 0.01);
    let height = Array2::from_shape_fn((2, LEVELS), |(_, lev)| lev as f64 * DZ);
    let mut profile =
        Profile::new(data, error, height, vec![Utc::now(), Utc::now()], DZ).unwrap();
    // molecular extinction chosen so that the molecular backscatter is 1e-6
    profile.mol_extinction =
        Some(Array2::from_elem((2, LEVELS), 1.0e-6 * RAYLEIGH_LIDAR_RATIO));
    profile
}

#[test]
fn test_raman_retrieval_on_constant_ratio() {
    let _ = env_logger::builder().is_test(true).try_init();

    // signal ratio 2.0 everywhere, assumed calibration value 1.0: the
    // calibration factor is 0.5, the backscatter ratio becomes 1.0 and the
    // particle backscatter vanishes
    let profile = constant_ratio_profile(2.0);

    let cal_value = CalibrationValue {
        value: 1.0,
        rel_error: 0.0,
    };
    let params = CalibrationParams::new(
        HeightInterval::new(3000.0, 5000.0).unwrap(),
        500.0,
        cal_value,
        CalibrationSearchAlgorithm::SlidingMinimum,
    )
    .unwrap();
    let thresholds = ErrorThresholds::new(0.1, 0.1).unwrap();

    let window = SlidingMinimumFinder::new()
        .find(&CalibrationProduct {
            product_id: "rbsc532",
            profile: &profile,
            params: &params,
            thresholds: &thresholds,
        })
        .unwrap();
    for t in 0..2 {
        let interval = window.intervals[t].expect("calibration window found");
        assert!(interval.top <= 5000.0);
    }

    let inverter = RamanBscInverter::new(BackscatterParams {
        cal_value,
        thresholds,
    });
    let bsc = inverter.invert(&profile, &window).unwrap();

    for t in 0..2 {
        for lev in 0..LEVELS {
            assert!(
                bsc.data[[t, lev]].abs() < 1e-18,
                "time {} level {}: expected zero backscatter, got {}",
                t,
                lev,
                bsc.data[[t, lev]]
            );
            assert!(bsc.error[[t, lev]].is_finite());
        }
    }
}

#[test]
fn test_raman_retrieval_recovers_enhanced_layer() {
    // backscatter ratio 1 at calibration height, enhanced below: the
    // retrieval maps the enhancement onto a positive particle backscatter
    let mut profile = constant_ratio_profile(1.0);
    for lev in 0..40 {
        profile.data[[0, lev]] = 3.0;
        profile.error[[0, lev]] = 0.03;
    }

    let cal_value = CalibrationValue {
        value: 1.0,
        rel_error: 0.0,
    };
    let thresholds = ErrorThresholds::new(0.1, 0.1).unwrap();
    let window = lidarine::CalibrationWindow {
        intervals: vec![
            Some(HeightInterval::new(4000.0, 4500.0).unwrap()),
            Some(HeightInterval::new(4000.0, 4500.0).unwrap()),
        ],
    };

    let inverter = RamanBscInverter::new(BackscatterParams {
        cal_value,
        thresholds,
    });
    let bsc = inverter.invert(&profile, &window).unwrap();

    // BR = 3 in the layer: beta_par = (3 - 1) * 1e-6
    for lev in 0..40 {
        assert!((bsc.data[[0, lev]] - 2.0e-6).abs() < 1e-12);
    }
    // clean air above the layer
    for lev in 40..LEVELS {
        assert!(bsc.data[[0, lev]].abs() < 1e-12);
    }
}
