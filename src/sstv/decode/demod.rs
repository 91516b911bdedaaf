use rustfft::{num_complex::Complex, FftPlanner};

const BLOCK: usize = 1 << 16;
const OVERLAP: usize = 4096;

/// Instantaneous frequency of an audio tone sequence, in Hz, one value
/// per input sample.
///
/// The analytic signal is built block-wise with an FFT Hilbert
/// transform (negative frequencies zeroed, positive doubled); the
/// block interiors are stitched together and the frequency falls out of
/// the phase difference between consecutive analytic samples.
pub fn instantaneous_frequency(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let analytic = analytic_signal(samples);
    let mut freq = Vec::with_capacity(analytic.len());
    let scale = sample_rate as f32 / (2.0 * std::f32::consts::PI);

    let mut prev = Complex::new(1.0f32, 0.0);
    for &z in &analytic {
        // Phase difference via the argument of z * conj(prev); immune
        // to 2π wrapping.
        let d = z * prev.conj();
        let dphi = d.im.atan2(d.re);
        freq.push(dphi * scale);
        prev = z;
    }
    if freq.len() > 1 {
        freq[0] = freq[1];
    }
    freq
}

fn analytic_signal(samples: &[f32]) -> Vec<Complex<f32>> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(BLOCK);
    let inverse = planner.plan_fft_inverse(BLOCK);

    let mut out = Vec::with_capacity(samples.len());
    let hop = BLOCK - 2 * OVERLAP;
    let mut block_start = 0usize;

    loop {
        let mut buf: Vec<Complex<f32>> = (0..BLOCK)
            .map(|i| {
                let v = samples.get(block_start + i).copied().unwrap_or(0.0);
                Complex::new(v, 0.0)
            })
            .collect();

        forward.process(&mut buf);

        // Hilbert weights: keep DC and Nyquist, double positives, zero
        // negatives.
        for (k, v) in buf.iter_mut().enumerate() {
            if k == 0 || k == BLOCK / 2 {
                // unchanged
            } else if k < BLOCK / 2 {
                *v *= 2.0;
            } else {
                *v = Complex::new(0.0, 0.0);
            }
        }

        inverse.process(&mut buf);
        let norm = 1.0 / BLOCK as f32;

        // Keep only the interior of each block; the edges ring from the
        // implicit rectangular window.
        let keep_from = if block_start == 0 { 0 } else { OVERLAP };
        let keep_to = BLOCK - OVERLAP;
        for value in buf[keep_from..keep_to].iter() {
            if out.len() >= samples.len() {
                break;
            }
            out.push(*value * norm);
        }

        block_start += hop;
        if out.len() >= samples.len() {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * secs) as usize;
        (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.8
            })
            .collect()
    }

    #[test]
    fn pure_tone_frequency_is_recovered() {
        let sr = 12_000;
        let samples = tone(1900.0, sr, 1.0);
        let freq = instantaneous_frequency(&samples, sr);

        let mid = &freq[1000..freq.len() - 1000];
        let mean: f32 = mid.iter().sum::<f32>() / mid.len() as f32;
        assert!((mean - 1900.0).abs() < 2.0, "mean {}", mean);
    }

    #[test]
    fn tone_step_is_tracked_across_block_boundaries() {
        let sr = 12_000;
        let mut samples = tone(1200.0, sr, 6.0);
        // Continue with a second tone to cross the 64k block edge.
        samples.extend(tone(2300.0, sr, 6.0));
        let freq = instantaneous_frequency(&samples, sr);

        let early: f32 = freq[5000..6000].iter().sum::<f32>() / 1000.0;
        let late_start = (6.5 * sr as f32) as usize;
        let late: f32 = freq[late_start..late_start + 1000].iter().sum::<f32>() / 1000.0;
        assert!((early - 1200.0).abs() < 5.0, "early {}", early);
        assert!((late - 2300.0).abs() < 5.0, "late {}", late);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(instantaneous_frequency(&[], 48_000).is_empty());
    }
}
