//! Feature extraction
//!
//! ## Responsibilities
//!
//! - Turn one raw integer sample window into a fixed 12-element feature vector
//! - Stay pure and deterministic: identical window, identical output
//!
//! Windows of length 1-2 produce degenerate but defined values. No
//! normalization by sampling rate is applied; frequency features are in bin
//! units, not Hz.

use realfft::RealFftPlanner;

/// Number of features in an extracted vector.
pub const FEATURE_COUNT: usize = 12;

/// Mean absolute value.
pub fn mav(x: &[i64]) -> f64 {
    x.iter().map(|&v| (v as f64).abs()).sum::<f64>() / x.len() as f64
}

/// Root mean square.
pub fn rms(x: &[i64]) -> f64 {
    let sum_sq: f64 = x.iter().map(|&v| (v as f64) * (v as f64)).sum();
    (sum_sq / x.len() as f64).sqrt()
}

/// Waveform length: total vertical travel between consecutive samples.
pub fn waveform_length(x: &[i64]) -> f64 {
    x.windows(2).map(|w| ((w[1] - w[0]) as f64).abs()).sum()
}

/// Population variance.
pub fn variance(x: &[i64]) -> f64 {
    let n = x.len() as f64;
    let mean = x.iter().map(|&v| v as f64).sum::<f64>() / n;
    x.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Zero crossings: strict product-negative test, no dead-zone threshold.
pub fn zero_crossings(x: &[i64]) -> f64 {
    x.windows(2)
        .filter(|w| (w[0] as f64) * (w[1] as f64) < 0.0)
        .count() as f64
}

/// Slope sign changes: local extrema via sign of (x[i]-x[i-1])*(x[i]-x[i+1]).
pub fn slope_sign_changes(x: &[i64]) -> f64 {
    x.windows(3)
        .filter(|w| {
            let (a, b, c) = (w[0] as f64, w[1] as f64, w[2] as f64);
            (b - a) * (b - c) > 0.0
        })
        .count() as f64
}

pub fn max(x: &[i64]) -> f64 {
    x.iter().copied().max().unwrap_or(0) as f64
}

pub fn min(x: &[i64]) -> f64 {
    x.iter().copied().min().unwrap_or(0) as f64
}

/// Integrated EMG: sum of absolute values.
pub fn iemg(x: &[i64]) -> f64 {
    x.iter().map(|&v| (v as f64).abs()).sum()
}

/// Normalized energy: sqrt of summed squares divided by window length.
pub fn normalized_energy(x: &[i64]) -> f64 {
    let sum_sq: f64 = x.iter().map(|&v| (v as f64) * (v as f64)).sum();
    sum_sq.sqrt() / x.len() as f64
}

/// Average magnitude over the non-negative-frequency bins (0..=N/2).
pub fn mean_frequency(x: &[i64]) -> f64 {
    let mags = spectrum_magnitudes(x);
    if mags.is_empty() {
        return 0.0;
    }
    mags.iter().sum::<f64>() / mags.len() as f64
}

/// Index of the maximum-magnitude bin among bins 0..=N/2. First max wins.
pub fn peak_frequency(x: &[i64]) -> f64 {
    let mags = spectrum_magnitudes(x);
    let mut max_idx = 0usize;
    let mut max_val = 0.0f64;
    for (i, &m) in mags.iter().enumerate() {
        if m > max_val {
            max_val = m;
            max_idx = i;
        }
    }
    max_idx as f64
}

/// Magnitudes of the real FFT's non-negative-frequency bins.
fn spectrum_magnitudes(x: &[i64]) -> Vec<f64> {
    let n = x.len();
    let mut input: Vec<f64> = x.iter().map(|&v| v as f64).collect();

    // Degenerate windows: bins computed directly
    match n {
        0 => return vec![],
        1 => return vec![input[0].abs()],
        2 => return vec![(input[0] + input[1]).abs(), (input[0] - input[1]).abs()],
        _ => {}
    }

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut spectrum = fft.make_output_vec();
    // Only fails on length mismatch, which cannot happen here
    let _ = fft.process(&mut input, &mut spectrum);
    spectrum.iter().map(|c| c.norm()).collect()
}

/// Extract the full ordered feature vector from one raw window.
///
/// Order: MAV, RMS, WL, VAR, ZC, SSC, MAX, MIN, IEMG, KF, mean frequency,
/// peak frequency.
pub fn extract_features(raw: &[i64]) -> [f64; FEATURE_COUNT] {
    if raw.is_empty() {
        return [0.0; FEATURE_COUNT];
    }
    [
        mav(raw),
        rms(raw),
        waveform_length(raw),
        variance(raw),
        zero_crossings(raw),
        slope_sign_changes(raw),
        max(raw),
        min(raw),
        iemg(raw),
        normalized_energy(raw),
        mean_frequency(raw),
        peak_frequency(raw),
    ]
}
