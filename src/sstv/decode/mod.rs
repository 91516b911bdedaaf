pub mod demod;
pub mod modes;
pub mod png;
pub mod scan;
pub mod vis;
pub mod wav;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SstvDecodeError {
    #[error("unsupported_wav: {0}")]
    UnsupportedWav(String),
    #[error("no_vis_found: no calibration header in the first 10 s")]
    NoVisFound,
    #[error("unknown_mode: VIS code 0x{0:02X}")]
    UnknownMode(u8),
    #[error("truncated: recording ends before any scanline")]
    Truncated,
    #[error("io_error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Acceptable,
    Weak,
    Junk,
}

/// What the decoder learned about a recording, alongside the image.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SstvDiagnostics {
    pub mode: String,
    pub vis_code: u8,
    pub frequency_offset_hz: f32,
    pub channel_averages: [f32; 3],
    pub brightness: f32,
    pub lines_decoded: usize,
    pub lines_expected: usize,
    pub verdict: Verdict,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct SstvOutcome {
    pub image_path: PathBuf,
    pub diagnostics: SstvDiagnostics,
}

/// Full pipeline: WAV → instantaneous frequency → VIS → line scan →
/// PNG, plus a quality verdict for the gallery.
pub fn decode_recording(wav_path: &Path, output_dir: &Path) -> Result<SstvOutcome, SstvDecodeError> {
    let audio = wav::read_wav(wav_path)?;
    let freq = demod::instantaneous_frequency(&audio.samples, audio.sample_rate);

    let detection = vis::detect_vis(&freq, audio.sample_rate)?;
    let mode = modes::lookup(detection.vis_code)
        .ok_or(SstvDecodeError::UnknownMode(detection.vis_code))?;
    log::info!(
        "VIS 0x{:02X} ({}), offset {:+.1} Hz",
        detection.vis_code,
        mode.name,
        detection.freq_offset_hz
    );

    let image = scan::scan_image(
        &freq,
        audio.sample_rate,
        detection.data_start,
        mode,
        detection.freq_offset_hz,
    )?;

    let diagnostics = assess(mode.name, &detection, &image, mode.lines);

    std::fs::create_dir_all(output_dir)?;
    let stem = wav_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "capture".to_string());
    let image_path = output_dir.join(format!("{}.png", stem));
    png::write_png(
        &image_path,
        image.width as u32,
        image.height as u32,
        &image.rgb,
    )?;

    log::info!(
        "decoded {} lines/{} as {} -> {} ({:?})",
        image.lines_decoded,
        mode.lines,
        mode.name,
        image_path.display(),
        diagnostics.verdict
    );

    Ok(SstvOutcome {
        image_path,
        diagnostics,
    })
}

fn assess(
    mode_name: &str,
    detection: &vis::VisDetection,
    image: &scan::DecodedImage,
    lines_expected: usize,
) -> SstvDiagnostics {
    // Statistics over the decoded rows only; undecoded rows are black
    // filler and would drag every average down.
    let rows = image.lines_decoded.min(image.height);
    let pixels = rows * image.width;
    let mut sums = [0.0f64; 3];
    let mut clipped = [0usize; 3];
    for px in image.rgb[..pixels * 3].chunks_exact(3) {
        for c in 0..3 {
            sums[c] += px[c] as f64;
            if px[c] == 255 {
                clipped[c] += 1;
            }
        }
    }
    let channel_averages = if pixels > 0 {
        [
            (sums[0] / pixels as f64) as f32,
            (sums[1] / pixels as f64) as f32,
            (sums[2] / pixels as f64) as f32,
        ]
    } else {
        [0.0; 3]
    };
    let brightness =
        (channel_averages[0] + channel_averages[1] + channel_averages[2]) / 3.0;

    let mut warnings = Vec::new();
    if pixels > 0 && clipped.iter().any(|&c| c as f64 / pixels as f64 > 0.05) {
        warnings.push("clipped".to_string());
    }
    if brightness < 40.0 {
        warnings.push("dark".to_string());
    }
    if brightness > 220.0 {
        warnings.push("washed".to_string());
    }
    if detection.freq_offset_hz.abs() > 100.0 {
        warnings.push("frequency_offset_large".to_string());
    }
    let line_fraction = image.lines_decoded as f64 / lines_expected.max(1) as f64;
    if line_fraction < 0.8 {
        warnings.push("short_signal".to_string());
    }

    let verdict = if line_fraction < 0.4 {
        Verdict::Junk
    } else if warnings.is_empty() && (60.0..=180.0).contains(&brightness) {
        Verdict::Good
    } else if warnings.len() <= 1 && !warnings.iter().any(|w| w == "short_signal") {
        Verdict::Acceptable
    } else {
        Verdict::Weak
    };

    SstvDiagnostics {
        mode: mode_name.to_string(),
        vis_code: detection.vis_code,
        frequency_offset_hz: detection.freq_offset_hz,
        channel_averages,
        brightness,
        lines_decoded: image.lines_decoded,
        lines_expected,
        verdict,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::scan::DecodedImage;
    use super::vis::VisDetection;
    use super::*;

    fn detection(offset: f32) -> VisDetection {
        VisDetection {
            data_start: 0,
            vis_code: 0x2C,
            freq_offset_hz: offset,
            parity_ok: true,
        }
    }

    fn image(level: u8, width: usize, height: usize, decoded: usize) -> DecodedImage {
        DecodedImage {
            width,
            height,
            rgb: vec![level; width * height * 3],
            lines_decoded: decoded,
        }
    }

    #[test]
    fn clean_midtone_image_is_good() {
        let diag = assess("Martin M1", &detection(5.0), &image(120, 32, 16, 16), 16);
        assert_eq!(diag.verdict, Verdict::Good);
        assert!(diag.warnings.is_empty());
        assert!((diag.brightness - 120.0).abs() < 0.5);
    }

    #[test]
    fn large_offset_downgrades_to_acceptable() {
        let diag = assess("Martin M1", &detection(150.0), &image(120, 32, 16, 16), 16);
        assert_eq!(diag.warnings, vec!["frequency_offset_large"]);
        assert_eq!(diag.verdict, Verdict::Acceptable);
    }

    #[test]
    fn dark_image_warns() {
        let diag = assess("Martin M1", &detection(0.0), &image(20, 32, 16, 16), 16);
        assert!(diag.warnings.iter().any(|w| w == "dark"));
    }

    #[test]
    fn saturated_channel_warns_clipped() {
        let diag = assess("Martin M1", &detection(0.0), &image(255, 32, 16, 16), 16);
        assert!(diag.warnings.iter().any(|w| w == "clipped"));
        assert!(diag.warnings.iter().any(|w| w == "washed"));
        assert_eq!(diag.verdict, Verdict::Weak);
    }

    #[test]
    fn half_decoded_image_is_short_but_not_junk() {
        let diag = assess("Martin M1", &detection(0.0), &image(120, 32, 16, 8), 16);
        assert!(diag.warnings.iter().any(|w| w == "short_signal"));
        assert_eq!(diag.verdict, Verdict::Weak);
    }

    #[test]
    fn barely_decoded_image_is_junk() {
        let diag = assess("Martin M1", &detection(0.0), &image(120, 32, 16, 4), 16);
        assert_eq!(diag.verdict, Verdict::Junk);
    }
}
