use super::modes::{LineLayout, ModeSpec};
use super::SstvDecodeError;

/// Sync pulses sit at the bottom of the band; anything below this is
/// sync tone.
const SYNC_SPLIT_HZ: f32 = 1350.0;
/// Fraction of the nominal sync length that must be seen to accept a
/// pulse.
const SYNC_MIN_FRACTION: f64 = 0.6;
/// Sync search radius as a fraction of the line period.
const SEARCH_FRACTION: f64 = 0.2;

pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<u8>,
    pub lines_decoded: usize,
}

/// Walk the scanlines of a calibrated instantaneous-frequency sequence
/// and rebuild the RGB image for `mode`.
pub fn scan_image(
    freq: &[f32],
    sample_rate: u32,
    data_start: usize,
    mode: &ModeSpec,
    offset_hz: f32,
) -> Result<DecodedImage, SstvDecodeError> {
    let scanner = LineScanner {
        freq,
        offset: offset_hz,
        sr: sample_rate as f64,
    };

    let (rgb, lines_decoded) = match mode.layout {
        LineLayout::Martin { scan_ms, sep_ms } => {
            scanner.scan_gbr(mode, data_start, scan_ms, sep_ms, false)
        }
        LineLayout::Scottie { scan_ms, sep_ms } => {
            scanner.scan_gbr(mode, data_start, scan_ms, sep_ms, true)
        }
        LineLayout::Robot420 {
            y_ms,
            chroma_ms,
            sep_ms,
            sep_porch_ms,
        } => scanner.scan_robot420(mode, data_start, y_ms, chroma_ms, sep_ms, sep_porch_ms),
        LineLayout::Robot422 {
            y_ms,
            chroma_ms,
            sep_ms,
            sep_porch_ms,
        } => scanner.scan_robot422(mode, data_start, y_ms, chroma_ms, sep_ms, sep_porch_ms),
        LineLayout::Pd { comp_ms } => scanner.scan_pd(mode, data_start, comp_ms),
    };

    if lines_decoded == 0 {
        return Err(SstvDecodeError::Truncated);
    }

    Ok(DecodedImage {
        width: mode.width,
        height: mode.lines,
        rgb,
        lines_decoded,
    })
}

/// 1500 Hz maps to black, 2300 Hz to full scale.
fn tone_to_level(tone: f32) -> f32 {
    ((tone - 1500.0) / 800.0 * 255.0).clamp(0.0, 255.0)
}

/// BT.601 studio-range YCbCr (black level 16, white level 235) to RGB.
fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> [u8; 3] {
    let y = 1.164 * (y - 16.0);
    let cr = cr - 128.0;
    let cb = cb - 128.0;
    let r = y + 1.596 * cr;
    let g = y - 0.813 * cr - 0.391 * cb;
    let b = y + 2.018 * cb;
    [
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    ]
}

struct LineScanner<'a> {
    freq: &'a [f32],
    offset: f32,
    sr: f64,
}

impl LineScanner<'_> {
    fn spx(&self, ms: f64) -> f64 {
        ms / 1000.0 * self.sr
    }

    /// Calibrated tone at a sample index.
    fn tone(&self, i: usize) -> f32 {
        self.freq[i] - self.offset
    }

    /// Whether a whole region lies inside the recording.
    fn fits(&self, start: f64, len: f64) -> bool {
        start >= 0.0 && ((start + len) as usize) <= self.freq.len()
    }

    /// Average calibrated tone over [start, start+len).
    fn region_mean(&self, start: f64, len: f64) -> f32 {
        let lo = start.max(0.0) as usize;
        let hi = ((start + len) as usize).min(self.freq.len());
        if lo >= hi {
            return 1500.0;
        }
        let sum: f32 = self.freq[lo..hi].iter().sum();
        sum / (hi - lo) as f32 - self.offset
    }

    /// One row of pixel levels from a channel scan region.
    fn pixel_row(&self, start: f64, scan_len: f64, width: usize) -> Vec<f32> {
        let step = scan_len / width as f64;
        (0..width)
            .map(|p| tone_to_level(self.region_mean(start + p as f64 * step, step)))
            .collect()
    }

    /// Find a sync pulse around `expected_start` and return the index
    /// just past it. `None` means free-run on nominal timing.
    fn find_sync_end(&self, expected_start: f64, line_len: f64, sync_len: f64) -> Option<usize> {
        let radius = line_len * SEARCH_FRACTION;
        let from = (expected_start - radius).max(0.0) as usize;
        let to = ((expected_start + radius + sync_len) as usize).min(self.freq.len());
        let need = (sync_len * SYNC_MIN_FRACTION) as usize;

        let mut run = 0usize;
        for i in from..to {
            if self.tone(i) < SYNC_SPLIT_HZ {
                run += 1;
            } else {
                if run >= need {
                    return Some(i);
                }
                run = 0;
            }
        }
        None
    }

    /// Martin and Scottie: three 8-bit channels in G, B, R order. For
    /// Scottie the sync precedes the red channel mid-line, and the
    /// stream opens with one extra starting sync.
    fn scan_gbr(
        &self,
        mode: &ModeSpec,
        data_start: usize,
        scan_ms: f64,
        sep_ms: f64,
        scottie: bool,
    ) -> (Vec<u8>, usize) {
        let width = mode.width;
        let line_len = self.spx(mode.line_ms());
        let sync_len = self.spx(mode.sync_ms);
        let porch_len = self.spx(mode.porch_ms);
        let scan_len = self.spx(scan_ms);
        let sep_len = self.spx(sep_ms);

        let mut rgb = vec![0u8; width * mode.lines * 3];
        let mut decoded = 0usize;

        // Expected start of the first sync pulse.
        let mut expected_sync = if scottie {
            // starting sync, then sep G sep B before the mid-line sync.
            data_start as f64 + sync_len + 2.0 * (sep_len + scan_len)
        } else {
            data_start as f64
        };

        for line in 0..mode.lines {
            let sync_end = match self.find_sync_end(expected_sync, line_len, sync_len) {
                Some(e) => e as f64,
                None => expected_sync + sync_len,
            };

            let (g_start, b_start, r_start) = if scottie {
                let sync_start = sync_end - sync_len;
                (
                    sync_start - 2.0 * scan_len - sep_len,
                    sync_start - scan_len,
                    sync_end + porch_len,
                )
            } else {
                let base = sync_end + porch_len;
                (base, base + scan_len + sep_len, base + 2.0 * (scan_len + sep_len))
            };

            let last_start = r_start.max(g_start);
            if !self.fits(last_start, scan_len) {
                break;
            }

            let g = self.pixel_row(g_start, scan_len, width);
            let b = self.pixel_row(b_start, scan_len, width);
            let r = self.pixel_row(r_start, scan_len, width);
            for p in 0..width {
                let o = (line * width + p) * 3;
                rgb[o] = r[p] as u8;
                rgb[o + 1] = g[p] as u8;
                rgb[o + 2] = b[p] as u8;
            }

            decoded += 1;
            expected_sync = sync_end - sync_len + line_len;
        }

        (rgb, decoded)
    }

    /// Robot 36: full luminance every line, R-Y on even lines, B-Y on
    /// odd lines. Chroma rows are shared between neighbours.
    fn scan_robot420(
        &self,
        mode: &ModeSpec,
        data_start: usize,
        y_ms: f64,
        chroma_ms: f64,
        sep_ms: f64,
        sep_porch_ms: f64,
    ) -> (Vec<u8>, usize) {
        let width = mode.width;
        let line_len = self.spx(mode.line_ms());
        let sync_len = self.spx(mode.sync_ms);
        let porch_len = self.spx(mode.porch_ms);
        let y_len = self.spx(y_ms);
        let chroma_len = self.spx(chroma_ms);
        let gap_len = self.spx(sep_ms + sep_porch_ms);

        let mut y_rows: Vec<Vec<f32>> = Vec::new();
        let mut cr_rows: Vec<Option<Vec<f32>>> = Vec::new();
        let mut cb_rows: Vec<Option<Vec<f32>>> = Vec::new();

        let mut expected_sync = data_start as f64;
        for line in 0..mode.lines {
            let sync_end = match self.find_sync_end(expected_sync, line_len, sync_len) {
                Some(e) => e as f64,
                None => expected_sync + sync_len,
            };
            let y_start = sync_end + porch_len;
            let chroma_start = y_start + y_len + gap_len;
            if !self.fits(chroma_start, chroma_len) {
                break;
            }

            y_rows.push(self.pixel_row(y_start, y_len, width));
            let chroma = self.pixel_row(chroma_start, chroma_len, width);
            if line % 2 == 0 {
                cr_rows.push(Some(chroma));
                cb_rows.push(None);
            } else {
                cr_rows.push(None);
                cb_rows.push(Some(chroma));
            }

            expected_sync = sync_end - sync_len + line_len;
        }

        let decoded = y_rows.len();
        let rgb = assemble_ycbcr(mode, &y_rows, &cr_rows, &cb_rows);
        (rgb, decoded)
    }

    /// Robot 72: luminance plus both chroma channels on every line.
    fn scan_robot422(
        &self,
        mode: &ModeSpec,
        data_start: usize,
        y_ms: f64,
        chroma_ms: f64,
        sep_ms: f64,
        sep_porch_ms: f64,
    ) -> (Vec<u8>, usize) {
        let width = mode.width;
        let line_len = self.spx(mode.line_ms());
        let sync_len = self.spx(mode.sync_ms);
        let porch_len = self.spx(mode.porch_ms);
        let y_len = self.spx(y_ms);
        let chroma_len = self.spx(chroma_ms);
        let gap_len = self.spx(sep_ms + sep_porch_ms);

        let mut y_rows: Vec<Vec<f32>> = Vec::new();
        let mut cr_rows: Vec<Option<Vec<f32>>> = Vec::new();
        let mut cb_rows: Vec<Option<Vec<f32>>> = Vec::new();

        let mut expected_sync = data_start as f64;
        for _line in 0..mode.lines {
            let sync_end = match self.find_sync_end(expected_sync, line_len, sync_len) {
                Some(e) => e as f64,
                None => expected_sync + sync_len,
            };
            let y_start = sync_end + porch_len;
            let cr_start = y_start + y_len + gap_len;
            let cb_start = cr_start + chroma_len + gap_len;
            if !self.fits(cb_start, chroma_len) {
                break;
            }

            y_rows.push(self.pixel_row(y_start, y_len, width));
            cr_rows.push(Some(self.pixel_row(cr_start, chroma_len, width)));
            cb_rows.push(Some(self.pixel_row(cb_start, chroma_len, width)));

            expected_sync = sync_end - sync_len + line_len;
        }

        let decoded = y_rows.len();
        let rgb = assemble_ycbcr(mode, &y_rows, &cr_rows, &cb_rows);
        (rgb, decoded)
    }

    /// PD: one transmitted line carries Y for two image lines with a
    /// shared Cr/Cb pair.
    fn scan_pd(&self, mode: &ModeSpec, data_start: usize, comp_ms: f64) -> (Vec<u8>, usize) {
        let width = mode.width;
        let line_len = self.spx(mode.line_ms());
        let sync_len = self.spx(mode.sync_ms);
        let porch_len = self.spx(mode.porch_ms);
        let comp_len = self.spx(comp_ms);

        let mut y_rows: Vec<Vec<f32>> = Vec::new();
        let mut cr_rows: Vec<Option<Vec<f32>>> = Vec::new();
        let mut cb_rows: Vec<Option<Vec<f32>>> = Vec::new();

        let mut expected_sync = data_start as f64;
        for _pair in 0..mode.transmitted_lines() {
            let sync_end = match self.find_sync_end(expected_sync, line_len, sync_len) {
                Some(e) => e as f64,
                None => expected_sync + sync_len,
            };
            let y_even = sync_end + porch_len;
            let cr_start = y_even + comp_len;
            let cb_start = cr_start + comp_len;
            let y_odd = cb_start + comp_len;
            if !self.fits(y_odd, comp_len) {
                break;
            }

            let cr = self.pixel_row(cr_start, comp_len, width);
            let cb = self.pixel_row(cb_start, comp_len, width);
            y_rows.push(self.pixel_row(y_even, comp_len, width));
            cr_rows.push(Some(cr.clone()));
            cb_rows.push(Some(cb.clone()));
            y_rows.push(self.pixel_row(y_odd, comp_len, width));
            cr_rows.push(Some(cr));
            cb_rows.push(Some(cb));

            expected_sync = sync_end - sync_len + line_len;
        }

        let decoded = y_rows.len();
        let rgb = assemble_ycbcr(mode, &y_rows, &cr_rows, &cb_rows);
        (rgb, decoded)
    }
}

/// Fill the RGB buffer from luma plus possibly-sparse chroma rows,
/// duplicating the nearest decoded chroma row where a line has none.
fn assemble_ycbcr(
    mode: &ModeSpec,
    y_rows: &[Vec<f32>],
    cr_rows: &[Option<Vec<f32>>],
    cb_rows: &[Option<Vec<f32>>],
) -> Vec<u8> {
    let width = mode.width;
    let mut rgb = vec![0u8; width * mode.lines * 3];

    let mut last_cr: Option<&Vec<f32>> = None;
    let mut last_cb: Option<&Vec<f32>> = None;
    for (line, y) in y_rows.iter().enumerate() {
        if let Some(Some(cr)) = cr_rows.get(line) {
            last_cr = Some(cr);
        }
        let cr = last_cr
            .or_else(|| cr_rows.iter().flatten().next())
            .cloned()
            .unwrap_or_else(|| vec![128.0; width]);
        if let Some(Some(cb)) = cb_rows.get(line) {
            last_cb = Some(cb);
        }
        let cb = last_cb
            .or_else(|| cb_rows.iter().flatten().next())
            .cloned()
            .unwrap_or_else(|| vec![128.0; width]);

        for p in 0..width {
            let o = (line * width + p) * 3;
            let px = ycbcr_to_rgb(y[p], cb[p], cr[p]);
            rgb[o..o + 3].copy_from_slice(&px);
        }
    }

    rgb
}
