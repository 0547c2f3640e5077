//! Derived optical products: elementwise arithmetic on already retrieved
//! profiles.

use crate::types::{LidarError, LidarResult, Profile};

/// Particle lidar ratio = extinction / backscatter, with quadrature error
/// propagation and OR-ed quality flags.
pub fn lidar_ratio(ext: &Profile, bsc: &Profile) -> LidarResult<Profile> {
    if ext.data.dim() != bsc.data.dim() {
        return Err(LidarError::DimensionMismatch(format!(
            "extinction {:?} vs backscatter {:?}",
            ext.data.dim(),
            bsc.data.dim()
        )));
    }

    let mut result = ext.clone();
    result.data = &ext.data / &bsc.data;

    let ext_rel = &ext.error / &ext.data;
    let bsc_rel = &bsc.error / &bsc.data;
    let sum_sq = ext_rel.mapv(|x| x * x) + bsc_rel.mapv(|x| x * x);
    result.error = result.data.mapv(f64::abs) * sum_sq.mapv(f64::sqrt);
    result.flags = &ext.flags | &bsc.flags;

    Ok(result)
}

/// Angstroem exponent from the same product at two wavelengths [nm]:
/// `ln(p1/p2) / ln(wl2/wl1)`, with quadrature error propagation and OR-ed
/// quality flags.
pub fn angstroem_exponent(
    profile1: &Profile,
    wavelength1: f64,
    profile2: &Profile,
    wavelength2: f64,
) -> LidarResult<Profile> {
    if profile1.data.dim() != profile2.data.dim() {
        return Err(LidarError::DimensionMismatch(format!(
            "{:?} vs {:?} profiles",
            profile1.data.dim(),
            profile2.data.dim()
        )));
    }
    if !(wavelength1 > 0.0) || !(wavelength2 > 0.0) || wavelength1 == wavelength2 {
        return Err(LidarError::Config(format!(
            "Angstroem exponent needs two distinct positive wavelengths, got {} and {} nm",
            wavelength1, wavelength2
        )));
    }

    let wl_log = (wavelength2 / wavelength1).ln();
    let mut result = profile1.clone();
    result.data = (&profile1.data / &profile2.data).mapv(f64::ln) / wl_log;

    let rel1 = &profile1.error / &profile1.data;
    let rel2 = &profile2.error / &profile2.data;
    let sum_sq = rel1.mapv(|x| x * x) + rel2.mapv(|x| x * x);
    result.error = sum_sq.mapv(f64::sqrt) / wl_log.abs();
    result.flags = &profile1.flags | &profile2.flags;

    Ok(result)
}
