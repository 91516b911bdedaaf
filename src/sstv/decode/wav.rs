use std::path::Path;

use super::SstvDecodeError;

/// Mono PCM audio normalized to [-1, 1].
#[derive(Debug)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Minimal RIFF/WAVE reader for the recordings this station produces:
/// 16-bit signed PCM, mono, at least 11 kHz.
pub fn read_wav(path: &Path) -> Result<WavAudio, SstvDecodeError> {
    let bytes = std::fs::read(path)?;
    parse_wav(&bytes)
}

pub fn parse_wav(bytes: &[u8]) -> Result<WavAudio, SstvDecodeError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(SstvDecodeError::UnsupportedWav("not a RIFF/WAVE file".into()));
    }

    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut bits = 0u16;
    let mut format = 0u16;
    let mut data: Option<&[u8]> = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        // A recording cut off mid-write can declare more than it holds.
        let body_end = (body_start + size).min(bytes.len());

        match id {
            b"fmt " => {
                let fmt = &bytes[body_start..body_end];
                if fmt.len() < 16 {
                    return Err(SstvDecodeError::UnsupportedWav("short fmt chunk".into()));
                }
                format = u16::from_le_bytes([fmt[0], fmt[1]]);
                channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                bits = u16::from_le_bytes([fmt[14], fmt[15]]);
            }
            b"data" => {
                data = Some(&bytes[body_start..body_end]);
            }
            _ => {}
        }

        // Chunks are word-aligned.
        offset = body_start + size + (size & 1);
    }

    if format != 1 || bits != 16 {
        return Err(SstvDecodeError::UnsupportedWav(format!(
            "need 16-bit PCM, got format {} / {} bits",
            format, bits
        )));
    }
    if channels != 1 {
        return Err(SstvDecodeError::UnsupportedWav(format!(
            "need mono audio, got {} channels",
            channels
        )));
    }
    if sample_rate < 11_000 {
        return Err(SstvDecodeError::UnsupportedWav(format!(
            "sample rate {} below 11 kHz",
            sample_rate
        )));
    }

    let data = data.ok_or(SstvDecodeError::Truncated)?;
    if data.len() < 2 {
        return Err(SstvDecodeError::Truncated);
    }

    let samples = data
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();

    Ok(WavAudio {
        sample_rate,
        samples,
    })
}

/// Serialize mono f32 samples back to 16-bit PCM WAV. Used by the CLI
/// and by tests generating reference signals.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> std::io::Result<()> {
    let data_len = samples.len() * 2;
    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, bits: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = samples.len() * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data_len as u32).to_le_bytes());
        for &s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn mono_16bit_parses() {
        let audio = parse_wav(&wav_bytes(48_000, 1, 16, &[0, 16384, -16384])).unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.samples.len(), 3);
        assert!((audio.samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn stereo_is_rejected() {
        let err = parse_wav(&wav_bytes(48_000, 2, 16, &[0, 0])).unwrap_err();
        assert!(matches!(err, SstvDecodeError::UnsupportedWav(_)));
    }

    #[test]
    fn low_sample_rate_is_rejected() {
        let err = parse_wav(&wav_bytes(8_000, 1, 16, &[0])).unwrap_err();
        assert!(matches!(err, SstvDecodeError::UnsupportedWav(_)));
    }

    #[test]
    fn non_riff_is_rejected() {
        let err = parse_wav(b"not audio at all").unwrap_err();
        assert!(matches!(err, SstvDecodeError::UnsupportedWav(_)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 / 100.0).sin()).collect();
        write_wav(&path, 12_000, &samples).unwrap();
        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 12_000);
        assert_eq!(audio.samples.len(), 100);
        assert!((audio.samples[50] - samples[50]).abs() < 1e-3);
    }
}
