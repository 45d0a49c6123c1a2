//! Sample-rate conversion
//!
//! Converts mono PCM between arbitrary rates with a 4-tap Catmull-Rom spline.
//! Linear interpolation or sample dropping produces zipper noise and aliasing
//! on speech; the cubic kernel keeps the output smooth at negligible cost.

/// Resample `samples` from `from_rate` to `to_rate`.
///
/// Returns the input unchanged when the rates match. The output length is
/// `round(len * to_rate / from_rate)`. Neighbouring taps past either end of
/// the input are clamped to the first/last sample.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let out_len = output_len(samples.len(), from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() as isize - 1;
    let tap = |i: isize| samples[i.clamp(0, last) as usize] as f64;

    let mut out = Vec::with_capacity(out_len);
    for n in 0..out_len {
        let pos = n as f64 * step;
        let idx = pos.floor() as isize;
        let t = pos - idx as f64;

        let p0 = tap(idx - 1);
        let p1 = tap(idx);
        let p2 = tap(idx + 1);
        let p3 = tap(idx + 2);

        out.push(catmull_rom(p0, p1, p2, p3, t) as f32);
    }
    out
}

/// Number of samples `resample` produces for an input of `len` samples.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    (len as f64 * to_rate as f64 / from_rate as f64).round() as usize
}

#[inline]
fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * (2.0 * p1
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len(), "length mismatch: {:?}", actual);
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < 1e-6, "sample {}: got {}, expected {}", i, a, e);
        }
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![0.1, -0.4, 0.9, 0.0, -1.0];
        for rate in [8_000, 16_000, 24_000, 44_100, 48_000] {
            assert_eq!(resample(&input, rate, rate), input);
        }
    }

    #[test]
    fn test_output_length() {
        let input = vec![0.0f32; 4096];
        assert_eq!(resample(&input, 48_000, 16_000).len(), 1365);
        assert_eq!(resample(&input, 44_100, 16_000).len(), 1486);
        assert_eq!(resample(&input, 24_000, 48_000).len(), 8192);
        assert_eq!(resample(&input, 24_000, 44_100).len(), 7526);

        for (len, from, to) in [(1000, 22_050, 48_000), (333, 16_000, 44_100), (7, 48_000, 8_000)] {
            let expected = (len as f64 * to as f64 / from as f64).round() as isize;
            let got = resample(&vec![0.5; len], from, to).len() as isize;
            assert!((got - expected).abs() <= 1);
        }
    }

    #[test]
    fn test_upsample_reference_sequence() {
        // Interior points of a ramp are reproduced exactly; the edges show the clamped taps.
        let out = resample(&[0.0, 1.0, 2.0, 3.0], 1, 2);
        assert_close(&out, &[0.0, 0.4375, 1.0, 1.5, 2.0, 2.5625, 3.0, 3.0625]);
    }

    #[test]
    fn test_downsample_picks_source_points() {
        let input: Vec<f32> = (0..12).map(|i| i as f32 * 0.05).collect();
        let out = resample(&input, 48_000, 16_000);
        assert_close(&out, &[0.0, 0.15, 0.3, 0.45]);
    }

    #[test]
    fn test_constant_signal_stays_constant() {
        let out = resample(&[0.25; 300], 16_000, 44_100);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_single_sample_and_empty_input() {
        assert!(resample(&[], 16_000, 48_000).is_empty());
        assert_close(&resample(&[0.7], 16_000, 48_000), &[0.7, 0.7, 0.7]);
    }

    #[test]
    fn test_upsampled_sine_stays_close_to_reference() {
        let tone = |rate: f64, n: usize| -> Vec<f32> {
            (0..n)
                .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate).sin() as f32)
                .collect()
        };
        let out = resample(&tone(24_000.0, 2400), 24_000, 48_000);
        let reference = tone(48_000.0, 4800);
        // Both ends use clamped taps; compare the interior only
        let worst = out[4..4790]
            .iter()
            .zip(&reference[4..4790])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(worst < 1e-3, "max deviation {}", worst);
    }
}
