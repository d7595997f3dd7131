//! χ² comparison between a simulated ("theory") histogram and a reference
//! ("data") histogram.
//!
//! All functions are pure. Each comes in a `try_*` form that says why a
//! comparison was impossible, and an `Option` form for callers that only need
//! to know whether it was.

use log::warn;

use crate::error::CompareError;
use crate::histogram::{BinSample, HistogramSeries};

/// Relative theory uncertainty applied when none is given.
pub const DEFAULT_UNCERTAINTY: f64 = 0.05;

/// Scale of the χ² error estimate.
const SIG_CHI2: f64 = 1.0;

fn check_bin_counts(theory: &HistogramSeries, data: &HistogramSeries) -> Result<(), CompareError> {
    if theory.bin_count() != data.bin_count() {
        return Err(CompareError::BinCountMismatch {
            theory: theory.bin_count(),
            data: data.bin_count(),
        });
    }
    Ok(())
}

/// `a / b`, or zero when `b` is zero.
fn ratio_or_zero(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

fn bin_chi2(t: &BinSample, d: &BinSample, uncertainty: f64) -> f64 {
    // Use the error bars that face each other.
    let (sigma_theory, sigma_data) = if t.y > d.y {
        (t.y_err_minus, d.y_err_plus)
    } else {
        (t.y_err_plus, d.y_err_minus)
    };
    let denom = sigma_data.powi(2) + sigma_theory.powi(2) + (uncertainty * t.y).powi(2);
    ratio_or_zero((t.y - d.y).powi(2), denom)
}

/// Per-bin χ².
///
/// A bin where both sides are zero makes the whole histogram unusable. A bin
/// where only one side is zero contributes zero.
pub fn try_chi2_per_bin(
    theory: &HistogramSeries,
    data: &HistogramSeries,
    uncertainty: f64,
) -> Result<Vec<f64>, CompareError> {
    check_bin_counts(theory, data)?;
    theory
        .bins
        .iter()
        .zip(&data.bins)
        .enumerate()
        .map(|(index, (t, d))| match (t.y == 0.0, d.y == 0.0) {
            (true, true) => Err(CompareError::BlankBin { index }),
            (true, false) | (false, true) => Ok(0.0),
            (false, false) => Ok(bin_chi2(t, d, uncertainty)),
        })
        .collect()
}

pub fn chi2_per_bin(
    theory: &HistogramSeries,
    data: &HistogramSeries,
    uncertainty: f64,
) -> Option<Vec<f64>> {
    try_chi2_per_bin(theory, data, uncertainty).ok()
}

/// Mean of [`try_chi2_per_bin`].
pub fn try_chi2(
    theory: &HistogramSeries,
    data: &HistogramSeries,
    uncertainty: f64,
) -> Result<f64, CompareError> {
    let per_bin = try_chi2_per_bin(theory, data, uncertainty)?;
    if per_bin.is_empty() {
        return Err(CompareError::NoPoints);
    }
    Ok(per_bin.iter().sum::<f64>() / per_bin.len() as f64)
}

pub fn chi2(theory: &HistogramSeries, data: &HistogramSeries, uncertainty: f64) -> Option<f64> {
    try_chi2(theory, data, uncertainty).ok()
}

/// χ² on theory normalised to data, with its propagated uncertainty.
///
/// Bins where the data is zero, or where the theory/data ratio is zero, are
/// left out. Returns `(chi2, error)` averaged over the bins that were used.
pub fn try_chi2_with_error(
    theory: &HistogramSeries,
    data: &HistogramSeries,
    uncertainty: f64,
) -> Result<(f64, f64), CompareError> {
    check_bin_counts(theory, data)?;

    let mut chi2_sum = 0.0;
    let mut sigma2_sum = 0.0;
    let mut n_points = 0usize;

    for (index, (t, d)) in theory.bins.iter().zip(&data.bins).enumerate() {
        if d.y == 0.0 {
            warn!("bin {} of {} has zero data value, skipping", index, data.id);
            continue;
        }
        let y_n = t.y / d.y;
        if y_n == 0.0 {
            continue;
        }

        let (ey_denom, ey_stat) = if y_n > 1.0 {
            (d.y_err_plus / d.y, t.y_err_minus / d.y)
        } else {
            (d.y_err_minus / d.y, t.y_err_plus / d.y)
        };

        let chi2_bin = ratio_or_zero(
            (y_n - 1.0).powi(2),
            ey_denom.powi(2) + (uncertainty * y_n).powi(2),
        );
        let sigma2_bin = ratio_or_zero(
            chi2_bin * 4.0 * (SIG_CHI2 * ey_stat).powi(2),
            ey_denom.powi(2) + uncertainty.powi(2),
        );

        chi2_sum += chi2_bin;
        sigma2_sum += sigma2_bin;
        n_points += 1;
    }

    if n_points == 0 {
        return Err(CompareError::NoPoints);
    }
    let n = n_points as f64;
    Ok((chi2_sum / n, sigma2_sum.sqrt() / n))
}

pub fn chi2_with_error(
    theory: &HistogramSeries,
    data: &HistogramSeries,
    uncertainty: f64,
) -> Option<(f64, f64)> {
    try_chi2_with_error(theory, data, uncertainty).ok()
}

/// Theory divided by data, bin by bin.
///
/// Bins where either side is zero are dropped from the output rather than
/// zero-filled. A blank input gives an empty series.
pub fn try_ratio_histogram(
    theory: &HistogramSeries,
    data: &HistogramSeries,
) -> Result<HistogramSeries, CompareError> {
    check_bin_counts(theory, data)?;

    let mut ratio = HistogramSeries {
        id: theory.id.clone(),
        bins: Vec::new(),
        event_count: theory.event_count,
        is_interpolated: theory.is_interpolated,
    };
    if theory.is_blank() || data.is_blank() {
        return Ok(ratio);
    }

    ratio.bins = theory
        .bins
        .iter()
        .zip(&data.bins)
        .filter(|(t, d)| t.y != 0.0 && d.y != 0.0)
        .map(|(t, d)| BinSample {
            y: t.y / d.y,
            y_err_plus: (t.y_err_plus / d.y).abs(),
            y_err_minus: (t.y_err_minus / d.y).abs(),
            x: t.x,
            x_err_plus: 0.0,
            x_err_minus: 0.0,
        })
        .collect();
    Ok(ratio)
}

pub fn ratio_histogram(theory: &HistogramSeries, data: &HistogramSeries) -> Option<HistogramSeries> {
    try_ratio_histogram(theory, data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(y: f64, err: f64) -> BinSample {
        BinSample {
            y,
            y_err_plus: err,
            y_err_minus: err,
            ..Default::default()
        }
    }

    fn series(bins: Vec<BinSample>) -> HistogramSeries {
        HistogramSeries::new("/h", bins, 1000)
    }

    #[test]
    fn test_chi2_per_bin_double_zero_aborts() {
        let theory = series(vec![bin(1.0, 0.1), bin(0.0, 0.1)]);
        let data = series(vec![bin(2.0, 0.1), bin(0.0, 0.1)]);
        assert_eq!(chi2_per_bin(&theory, &data, DEFAULT_UNCERTAINTY), None);
        assert_eq!(
            try_chi2_per_bin(&theory, &data, DEFAULT_UNCERTAINTY),
            Err(CompareError::BlankBin { index: 1 })
        );
    }

    #[test]
    fn test_chi2_per_bin_single_zero_contributes_nothing() {
        let theory = series(vec![bin(0.0, 1.0), bin(12.0, 1.0), bin(5.0, 1.0)]);
        let data = series(vec![bin(5.0, 1.0), bin(10.0, 1.0), bin(0.0, 1.0)]);
        let per_bin = chi2_per_bin(&theory, &data, DEFAULT_UNCERTAINTY).unwrap();

        assert_eq!(per_bin.len(), 3);
        assert_eq!(per_bin[0], 0.0);
        assert_eq!(per_bin[2], 0.0);
        let expected = 4.0 / (1.0 + 1.0 + (0.05f64 * 12.0).powi(2));
        assert!((per_bin[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_chi2_per_bin_picks_facing_errors() {
        let t = BinSample {
            y: 10.0,
            y_err_plus: 100.0,
            y_err_minus: 1.0,
            ..Default::default()
        };
        let d = BinSample {
            y: 8.0,
            y_err_plus: 2.0,
            y_err_minus: 100.0,
            ..Default::default()
        };
        let per_bin = chi2_per_bin(&series(vec![t]), &series(vec![d]), 0.0).unwrap();
        assert!((per_bin[0] - 4.0 / 5.0).abs() < 1e-12);

        // Mirrored: theory below data uses theory's upper and data's lower errors.
        let per_bin = chi2_per_bin(&series(vec![d]), &series(vec![t]), 0.0).unwrap();
        assert!((per_bin[0] - 4.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_chi2_per_bin_zero_denominator() {
        let theory = series(vec![bin(3.0, 0.0)]);
        let data = series(vec![bin(1.0, 0.0)]);
        assert_eq!(chi2_per_bin(&theory, &data, 0.0), Some(vec![0.0]));
    }

    #[test]
    fn test_chi2_is_mean() {
        let theory = series(vec![bin(0.0, 1.0), bin(12.0, 1.0)]);
        let data = series(vec![bin(5.0, 1.0), bin(10.0, 1.0)]);
        let per_bin = chi2_per_bin(&theory, &data, DEFAULT_UNCERTAINTY).unwrap();
        let mean = chi2(&theory, &data, DEFAULT_UNCERTAINTY).unwrap();
        assert!((mean - per_bin[1] / 2.0).abs() < 1e-12);

        assert_eq!(chi2(&series(vec![]), &series(vec![]), 0.05), None);
    }

    #[test]
    fn test_bin_count_mismatch() {
        let theory = series(vec![bin(1.0, 0.1)]);
        let data = series(vec![bin(1.0, 0.1), bin(2.0, 0.1)]);
        assert_eq!(
            try_chi2_with_error(&theory, &data, 0.05),
            Err(CompareError::BinCountMismatch { theory: 1, data: 2 })
        );
        assert_eq!(chi2_per_bin(&theory, &data, 0.05), None);
        assert_eq!(ratio_histogram(&theory, &data), None);
    }

    #[test]
    fn test_chi2_with_error_single_bin() {
        let theory = series(vec![bin(110.0, 5.0)]);
        let data = series(vec![bin(100.0, 5.0)]);
        let (chi2, err) = chi2_with_error(&theory, &data, 0.05).unwrap();

        let expected = 0.1f64.powi(2) / (0.05f64.powi(2) + (0.05f64 * 1.1).powi(2));
        assert!((chi2 - expected).abs() < 1e-9);
        assert!((chi2 - 1.809_954_751).abs() < 1e-6);

        // ey_stat = 5/100 = 0.05, so sigma² = chi2 * 4 * 0.0025 / 0.005.
        assert!((err - (2.0 * expected).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_chi2_with_error_skips_zero_bins() {
        let theory = series(vec![bin(110.0, 5.0), bin(7.0, 1.0), bin(0.0, 1.0)]);
        let data = series(vec![bin(100.0, 5.0), bin(0.0, 1.0), bin(4.0, 1.0)]);
        let (with_skips, _) = chi2_with_error(&theory, &data, 0.05).unwrap();

        let (single, _) = chi2_with_error(
            &series(vec![bin(110.0, 5.0)]),
            &series(vec![bin(100.0, 5.0)]),
            0.05,
        )
        .unwrap();
        assert!((with_skips - single).abs() < 1e-12);
    }

    #[test]
    fn test_chi2_with_error_no_points() {
        let theory = series(vec![bin(0.0, 1.0), bin(3.0, 1.0)]);
        let data = series(vec![bin(2.0, 1.0), bin(0.0, 1.0)]);
        assert_eq!(
            try_chi2_with_error(&theory, &data, 0.05),
            Err(CompareError::NoPoints)
        );
    }

    #[test]
    fn test_chi2_with_error_below_one_branch() {
        let t = BinSample {
            y: 90.0,
            y_err_plus: 3.0,
            y_err_minus: 30.0,
            ..Default::default()
        };
        let d = BinSample {
            y: 100.0,
            y_err_plus: 40.0,
            y_err_minus: 4.0,
            ..Default::default()
        };
        let (chi2, err) = chi2_with_error(&series(vec![t]), &series(vec![d]), 0.05).unwrap();

        let y_n = 0.9f64;
        let expected = (y_n - 1.0).powi(2) / (0.04f64.powi(2) + (0.05 * y_n).powi(2));
        let sigma2 = expected * 4.0 * 0.03f64.powi(2) / (0.04f64.powi(2) + 0.05f64.powi(2));
        assert!((chi2 - expected).abs() < 1e-9);
        assert!((err - sigma2.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_histogram_drops_zero_bins() {
        let mut theory = series(vec![bin(2.0, 0.2), bin(3.0, 0.3), bin(8.0, 0.8)]);
        theory.bins[2].x = 2.5;
        theory.bins[2].x_err_plus = 0.5;
        let data = series(vec![bin(4.0, 1.0), bin(0.0, 1.0), bin(-2.0, 1.0)]);

        let ratio = ratio_histogram(&theory, &data).unwrap();
        assert_eq!(ratio.bin_count(), 2);
        assert_eq!(ratio.bins[0].y, 0.5);
        assert!((ratio.bins[0].y_err_plus - 0.05).abs() < 1e-12);
        assert_eq!(ratio.bins[1].y, -4.0);
        assert!((ratio.bins[1].y_err_minus - 0.4).abs() < 1e-12);
        assert_eq!(ratio.bins[1].x, 2.5);
        assert_eq!(ratio.bins[1].x_err_plus, 0.0);
    }

    #[test]
    fn test_ratio_histogram_blank_input() {
        let theory = HistogramSeries::zeroed("/h", 3);
        let data = series(vec![bin(1.0, 0.1); 3]);
        let ratio = ratio_histogram(&theory, &data).unwrap();
        assert_eq!(ratio.bin_count(), 0);
    }
}
