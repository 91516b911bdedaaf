use super::SstvDecodeError;

/// Longest prefix searched for the calibration leader.
const SEARCH_SECS: f64 = 10.0;
/// Tone halves: anything under this is treated as the 1200 Hz family.
const SPLIT_HZ: f32 = 1550.0;
const LEADER_HZ: f32 = 1900.0;
const LEADER_TOLERANCE_HZ: f32 = 150.0;
const BIT_MS: f64 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct VisDetection {
    /// First sample after the stop bit; image data begins here.
    pub data_start: usize,
    /// 7-bit mode code.
    pub vis_code: u8,
    /// Estimated linear offset of the sender's tones (observed leader
    /// minus nominal 1900 Hz). Subtract from subsequent samples.
    pub freq_offset_hz: f32,
    pub parity_ok: bool,
}

/// Locate the VIS preamble in an instantaneous-frequency sequence.
///
/// The leader is 1900 Hz for 300 ms, a 10 ms 1200 Hz break, 1900 Hz for
/// another 300 ms, then a 1200 Hz start bit followed by eight 30 ms bits
/// (seven data bits LSB-first plus even parity) and a 1200 Hz stop bit.
/// The detector finds the start-bit edge: the first drop below 1550 Hz
/// that lasts at least 20 ms and is preceded by ~200 ms of leader tone.
/// The 10 ms break cannot satisfy the duration test, so it never false
/// triggers.
pub fn detect_vis(freq: &[f32], sample_rate: u32) -> Result<VisDetection, SstvDecodeError> {
    let sr = sample_rate as f64;
    // The leader lives in the first seconds; smoothing the whole of a
    // 150 s recording would dominate the decode time.
    let prefix = (((SEARCH_SECS + 2.0) * sr) as usize).min(freq.len());
    let smoothed = smooth(&freq[..prefix], (sr * 0.002) as usize);

    let search_end = ((SEARCH_SECS * sr) as usize).min(smoothed.len());
    let hold = (0.020 * sr) as usize; // low must persist 20 ms
    let leader_window = (0.200 * sr) as usize;
    let bit = BIT_MS / 1000.0 * sr;

    let mut i = leader_window;
    while i < search_end {
        if smoothed[i] >= SPLIT_HZ {
            i += 1;
            continue;
        }

        // Candidate falling edge. Check the low tone holds.
        let hold_end = i + hold;
        if hold_end > smoothed.len() {
            break;
        }
        if !smoothed[i..hold_end].iter().all(|&f| f < SPLIT_HZ) {
            i += 1;
            continue;
        }

        // Check the preceding 200 ms was leader tone.
        let leader = mean(&smoothed[i - leader_window..i]);
        if (leader - LEADER_HZ).abs() > LEADER_TOLERANCE_HZ {
            // Skip past this low run; it is not preceded by a leader.
            while i < search_end && smoothed[i] < SPLIT_HZ {
                i += 1;
            }
            continue;
        }

        let offset = leader - LEADER_HZ;
        let start_edge = i as f64;

        // Bits follow the 30 ms start bit. Sample the middle half of
        // each bit cell to stay clear of the edges.
        let mut code = 0u8;
        let mut ones = 0u32;
        let mut incomplete = false;
        for k in 0..8 {
            let cell = start_edge + bit * (k as f64 + 1.0);
            let lo = (cell + bit * 0.25) as usize;
            let hi = ((cell + bit * 0.75) as usize).min(smoothed.len());
            if lo >= hi {
                incomplete = true;
                break;
            }
            let tone = mean(&smoothed[lo..hi]) - offset;
            // 1300 Hz encodes a one, 1100 Hz a zero.
            let bit_value = tone > 1200.0;
            if bit_value {
                ones += 1;
                if k < 7 {
                    code |= 1 << k;
                }
            }
        }
        if incomplete {
            return Err(SstvDecodeError::Truncated);
        }

        let parity_ok = ones % 2 == 0;
        if !parity_ok {
            log::warn!("VIS parity mismatch for code 0x{:02X}", code);
        }

        // start bit + 8 bit cells + stop bit.
        let data_start = (start_edge + bit * 10.0) as usize;
        if data_start >= freq.len() {
            return Err(SstvDecodeError::Truncated);
        }

        return Ok(VisDetection {
            data_start,
            vis_code: code,
            freq_offset_hz: offset,
            parity_ok,
        });
    }

    Err(SstvDecodeError::NoVisFound)
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Box smoothing with a small radius; keeps edges sharp enough for the
/// 10 ms break while taming demodulator noise.
fn smooth(values: &[f32], radius: usize) -> Vec<f32> {
    if radius == 0 || values.is_empty() {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius + 1).min(values.len());
        out.push(mean(&values[lo..hi]));
    }
    out
}
