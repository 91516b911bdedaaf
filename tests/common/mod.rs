//! Reference SSTV encoder used to exercise the decoder end to end.

use nightwatch::sstv::decode::modes::{LineLayout, ModeSpec};

pub const BLACK_TONE: f64 = 1500.0;
pub const SYNC_TONE: f64 = 1200.0;
pub const LEADER_TONE: f64 = 1900.0;

/// Phase-continuous tone generator with a fractional sample cursor so
/// scanline timing does not drift over a full frame.
pub struct ToneGen {
    sample_rate: f64,
    phase: f64,
    cursor: f64,
    pub samples: Vec<f32>,
}

impl ToneGen {
    pub fn new(sample_rate: u32) -> Self {
        ToneGen {
            sample_rate: sample_rate as f64,
            phase: 0.0,
            cursor: 0.0,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, freq: f64, ms: f64) {
        let end = self.cursor + ms / 1000.0 * self.sample_rate;
        let step = 2.0 * std::f64::consts::PI * freq / self.sample_rate;
        while (self.samples.len() as f64) < end {
            self.phase += step;
            self.samples.push((self.phase.sin() * 0.8) as f32);
        }
        self.cursor = end;
    }
}

fn level_to_tone(level: f32) -> f64 {
    1500.0 + (level.clamp(0.0, 255.0) as f64) / 255.0 * 800.0
}

/// 75% colour bars (no channel saturates, so the quality pass stays
/// clean).
pub fn color_bars(width: usize, height: usize) -> Vec<u8> {
    const BARS: [[u8; 3]; 8] = [
        [192, 192, 192],
        [192, 192, 0],
        [0, 192, 192],
        [0, 192, 0],
        [192, 0, 192],
        [192, 0, 0],
        [0, 0, 192],
        [0, 0, 0],
    ];
    let mut rgb = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            let bar = BARS[(x * 8 / width).min(7)];
            let o = (y * width + x) * 3;
            rgb[o..o + 3].copy_from_slice(&bar);
        }
    }
    rgb
}

/// Mean R/G/B of a pattern, for comparing against decoder output.
pub fn channel_averages(rgb: &[u8]) -> [f32; 3] {
    let pixels = rgb.len() / 3;
    let mut sums = [0.0f64; 3];
    for px in rgb.chunks_exact(3) {
        for c in 0..3 {
            sums[c] += px[c] as f64;
        }
    }
    [
        (sums[0] / pixels as f64) as f32,
        (sums[1] / pixels as f64) as f32,
        (sums[2] / pixels as f64) as f32,
    ]
}

fn rgb_to_ycbcr(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let y = 16.0 + 0.257 * r + 0.504 * g + 0.098 * b;
    let cb = 128.0 - 0.148 * r - 0.291 * g + 0.439 * b;
    let cr = 128.0 + 0.439 * r - 0.368 * g - 0.071 * b;
    (y, cb, cr)
}

fn pixel(rgb: &[u8], width: usize, x: usize, y: usize) -> (f32, f32, f32) {
    let o = (y * width + x) * 3;
    (rgb[o] as f32, rgb[o + 1] as f32, rgb[o + 2] as f32)
}

fn push_row(gen: &mut ToneGen, scan_ms: f64, width: usize, mut level: impl FnMut(usize) -> f32) {
    let px_ms = scan_ms / width as f64;
    for x in 0..width {
        gen.push(level_to_tone(level(x)), px_ms);
    }
}

/// Emit the calibration leader and VIS header for `code`.
pub fn push_vis(gen: &mut ToneGen, code: u8) {
    gen.push(LEADER_TONE, 300.0);
    gen.push(SYNC_TONE, 10.0);
    gen.push(LEADER_TONE, 300.0);
    gen.push(SYNC_TONE, 30.0); // start bit
    let mut ones = 0;
    for k in 0..7 {
        let bit = (code >> k) & 1;
        ones += bit;
        gen.push(if bit == 1 { 1300.0 } else { 1100.0 }, 30.0);
    }
    gen.push(if ones % 2 == 1 { 1300.0 } else { 1100.0 }, 30.0);
    gen.push(SYNC_TONE, 30.0); // stop bit
}

/// Encode a full SSTV transmission (leader, VIS, image) as audio.
pub fn encode_sstv(mode: &ModeSpec, rgb: &[u8], sample_rate: u32) -> Vec<f32> {
    let mut gen = ToneGen::new(sample_rate);
    let width = mode.width;

    gen.push(BLACK_TONE, 200.0); // settle the demodulator
    push_vis(&mut gen, mode.vis);

    match mode.layout {
        LineLayout::Martin { scan_ms, sep_ms } => {
            for y in 0..mode.lines {
                gen.push(SYNC_TONE, mode.sync_ms);
                gen.push(BLACK_TONE, mode.porch_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).1);
                gen.push(BLACK_TONE, sep_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).2);
                gen.push(BLACK_TONE, sep_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).0);
                gen.push(BLACK_TONE, sep_ms);
            }
        }
        LineLayout::Scottie { scan_ms, sep_ms } => {
            gen.push(SYNC_TONE, mode.sync_ms); // starting sync
            for y in 0..mode.lines {
                gen.push(BLACK_TONE, sep_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).1);
                gen.push(BLACK_TONE, sep_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).2);
                gen.push(SYNC_TONE, mode.sync_ms);
                gen.push(BLACK_TONE, mode.porch_ms);
                push_row(&mut gen, scan_ms, width, |x| pixel(rgb, width, x, y).0);
            }
        }
        LineLayout::Robot420 {
            y_ms,
            chroma_ms,
            sep_ms,
            sep_porch_ms,
        } => {
            for y in 0..mode.lines {
                gen.push(SYNC_TONE, mode.sync_ms);
                gen.push(BLACK_TONE, mode.porch_ms);
                push_row(&mut gen, y_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, y);
                    rgb_to_ycbcr(r, g, b).0
                });
                gen.push(BLACK_TONE, sep_ms);
                gen.push(LEADER_TONE, sep_porch_ms);
                push_row(&mut gen, chroma_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, y);
                    let (_, cb, cr) = rgb_to_ycbcr(r, g, b);
                    if y % 2 == 0 {
                        cr
                    } else {
                        cb
                    }
                });
            }
        }
        LineLayout::Robot422 {
            y_ms,
            chroma_ms,
            sep_ms,
            sep_porch_ms,
        } => {
            for y in 0..mode.lines {
                gen.push(SYNC_TONE, mode.sync_ms);
                gen.push(BLACK_TONE, mode.porch_ms);
                push_row(&mut gen, y_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, y);
                    rgb_to_ycbcr(r, g, b).0
                });
                gen.push(BLACK_TONE, sep_ms);
                gen.push(LEADER_TONE, sep_porch_ms);
                push_row(&mut gen, chroma_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, y);
                    rgb_to_ycbcr(r, g, b).2
                });
                gen.push(BLACK_TONE, sep_ms);
                gen.push(LEADER_TONE, sep_porch_ms);
                push_row(&mut gen, chroma_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, y);
                    rgb_to_ycbcr(r, g, b).1
                });
            }
        }
        LineLayout::Pd { comp_ms } => {
            for pair in 0..mode.transmitted_lines() {
                let even = pair * 2;
                let odd = even + 1;
                gen.push(SYNC_TONE, mode.sync_ms);
                gen.push(BLACK_TONE, mode.porch_ms);
                push_row(&mut gen, comp_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, even);
                    rgb_to_ycbcr(r, g, b).0
                });
                push_row(&mut gen, comp_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, even);
                    rgb_to_ycbcr(r, g, b).2
                });
                push_row(&mut gen, comp_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, even);
                    rgb_to_ycbcr(r, g, b).1
                });
                push_row(&mut gen, comp_ms, width, |x| {
                    let (r, g, b) = pixel(rgb, width, x, odd);
                    rgb_to_ycbcr(r, g, b).0
                });
            }
        }
    }

    // Trailer so the last scanline is never clipped by block edges.
    gen.push(BLACK_TONE, 300.0);
    gen.samples
}
