use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::ReceiverConfig;
use crate::satellite::{Satellite, SignalKind};
use crate::sstv;

/// Turns a finished recording into images. The scheduler only sees this
/// seam, so tests can substitute canned decoders.
#[async_trait]
pub trait PassDecoder: Send + Sync {
    /// Decode `recording`; an empty vector means no image was produced.
    async fn decode(&self, satellite: &Satellite, recording: &Path) -> Vec<PathBuf>;
}

/// Dispatch on the signal kind: SSTV decodes in-process on the blocking
/// pool, LRPT hands off to the external demodulator, and plain FM
/// recordings keep their audio only.
pub struct Decoders {
    config: ReceiverConfig,
}

impl Decoders {
    pub fn new(config: ReceiverConfig) -> Self {
        Decoders { config }
    }

    async fn decode_sstv(&self, recording: &Path) -> Vec<PathBuf> {
        let wav = recording.to_path_buf();
        let out_dir = self.config.paths.images_dir.clone();
        let result =
            tokio::task::spawn_blocking(move || sstv::decode_recording(&wav, &out_dir)).await;

        match result {
            Ok(Ok(outcome)) => {
                log::info!(
                    "SSTV decode: {} ({:?}, {:?})",
                    outcome.image_path.display(),
                    outcome.diagnostics.verdict,
                    outcome.diagnostics.warnings
                );
                vec![outcome.image_path]
            }
            Ok(Err(e)) => {
                log::warn!("SSTV decode produced no image: {}", e);
                Vec::new()
            }
            Err(e) => {
                log::error!("SSTV decode task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Run the external LRPT demodulator against the baseband recording
    /// and collect whatever images it wrote next to the requested stem.
    async fn decode_lrpt(&self, recording: &Path) -> Vec<PathBuf> {
        let images_dir = &self.config.paths.images_dir;
        if let Err(e) = std::fs::create_dir_all(images_dir) {
            log::error!("cannot create image dir: {}", e);
            return Vec::new();
        }
        let stem = recording
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "lrpt".to_string());
        let output = images_dir.join(format!("{}.png", stem));

        let status = tokio::process::Command::new(&self.config.programs.lrpt_decoder)
            .arg("-o")
            .arg(&output)
            .arg(recording)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                log::warn!("LRPT decoder exited with {}", status);
            }
            Err(e) => {
                log::error!("LRPT decoder failed to start: {}", e);
                return Vec::new();
            }
        }

        // Some demodulators emit channel variants next to the requested
        // output; pick up everything that matches the stem.
        let mut images: Vec<PathBuf> = std::fs::read_dir(images_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension().and_then(|e| e.to_str()) == Some("png")
                            && p.file_stem()
                                .and_then(|s| s.to_str())
                                .map(|s| s.starts_with(&stem))
                                .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        images.sort();
        images
    }
}

#[async_trait]
impl PassDecoder for Decoders {
    async fn decode(&self, satellite: &Satellite, recording: &Path) -> Vec<PathBuf> {
        match satellite.signal {
            SignalKind::Sstv => self.decode_sstv(recording).await,
            SignalKind::Lrpt => self.decode_lrpt(recording).await,
            SignalKind::NarrowbandFm => {
                log::info!("{}: audio-only signal, keeping the WAV", satellite.name);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satellite::SignalParams;

    fn config(dir: &Path, lrpt_decoder: &str) -> ReceiverConfig {
        let yaml = format!(
            r#"
station: {{ latitude_deg: 52.0, longitude_deg: 0.0 }}
sdr: {{ gain: 29.7 }}
paths:
  recordings_dir: {dir}/rec
  images_dir: {dir}/img
  captures_dir: {dir}/cap
  tle_dir: {dir}/tle
programs: {{ lrpt_decoder: "{lrpt_decoder}" }}
"#,
            dir = dir.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[tokio::test]
    async fn unreadable_sstv_recording_yields_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let decoders = Decoders::new(config(dir.path(), "true"));
        let sat = Satellite::ground_sstv(145_500_000, "SSTV");

        let bad = dir.path().join("not_audio.wav");
        std::fs::write(&bad, b"definitely not audio").unwrap();
        assert!(decoders.decode(&sat, &bad).await.is_empty());
    }

    #[tokio::test]
    async fn missing_lrpt_decoder_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let decoders = Decoders::new(config(dir.path(), "/nonexistent/meteor_demod"));
        let sat = Satellite {
            name: "METEOR-M N2-3".into(),
            catalog_id: 57166,
            frequency_hz: 137_900_000,
            signal: SignalKind::Lrpt,
            params: SignalParams::lrpt(),
            enabled: true,
        };
        let rec = dir.path().join("m.wav");
        std::fs::write(&rec, b"").unwrap();
        assert!(decoders.decode(&sat, &rec).await.is_empty());
    }

    #[tokio::test]
    async fn narrowband_fm_keeps_audio_only() {
        let dir = tempfile::tempdir().unwrap();
        let decoders = Decoders::new(config(dir.path(), "true"));
        let sat = Satellite {
            name: "NOAA APT test".into(),
            catalog_id: 1,
            frequency_hz: 137_100_000,
            signal: SignalKind::NarrowbandFm,
            params: SignalParams::sstv(),
            enabled: true,
        };
        let rec = dir.path().join("n.wav");
        std::fs::write(&rec, b"").unwrap();
        assert!(decoders.decode(&sat, &rec).await.is_empty());
    }
}
