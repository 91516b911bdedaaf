use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ReceiverConfig;
use crate::satellite::{Demodulation, Satellite, SignalKind};
use crate::sdr::{Arbiter, ArbiterError, Intent, SdrLease, SdrProcess, SharedGain};

/// How long the WAV sink gets to flush its header after the source dies.
const SINK_FLUSH: Duration = Duration::from_secs(5);
/// SIGTERM grace for the RTL source.
const SOURCE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Arbiter(#[from] ArbiterError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("producer_died: RTL source exited mid-recording")]
    ProducerDied,
}

/// Writes a WAV file of a pass by piping an RTL source process into a
/// WAV encoder process.
pub struct Recorder {
    arbiter: Arbiter,
    config: ReceiverConfig,
    gain: SharedGain,
}

pub struct RecordingSession {
    pub output_path: PathBuf,
    pub start_time: DateTime<Utc>,
    lease: Option<SdrLease>,
    sink: Option<SdrProcess>,
}

impl Recorder {
    pub fn new(arbiter: Arbiter, config: ReceiverConfig, gain: SharedGain) -> Self {
        Recorder {
            arbiter,
            config,
            gain,
        }
    }

    /// Claim the SDR and spawn the source→sink pipeline.
    pub async fn start(&self, satellite: &Satellite) -> Result<RecordingSession, RecorderError> {
        let start_time = Utc::now();
        let output_path = self.output_path(satellite, start_time);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut lease = self
            .arbiter
            .acquire(Intent::Record, Duration::from_secs(5))
            .await?;

        let (source_prog, source_args) = self.source_command(satellite);
        let mut source = match SdrProcess::spawn(&source_prog, &source_args) {
            Ok(p) => p,
            Err(e) => {
                lease.release().await;
                return Err(e.into());
            }
        };

        let stdout = match source.take_stdout() {
            Some(s) => s,
            None => {
                lease.attach(source);
                lease.release().await;
                return Err(io::Error::other("source stdout missing").into());
            }
        };
        let fd: OwnedFd = stdout.into_owned_fd()?;

        let (sink_prog, sink_args) = self.sink_command(satellite, &output_path);
        let sink = match SdrProcess::spawn_sink(&sink_prog, &sink_args, Stdio::from(fd)) {
            Ok(p) => p,
            Err(e) => {
                lease.attach(source);
                lease.release().await;
                return Err(e.into());
            }
        };

        lease.attach(source);
        log::info!(
            "recording {} to {}",
            satellite.name,
            output_path.display()
        );

        Ok(RecordingSession {
            output_path,
            start_time,
            lease: Some(lease),
            sink: Some(sink),
        })
    }

    /// Record for `duration`, reporting progress once per second, then
    /// stop and return the recording path.
    pub async fn record_pass(
        &self,
        satellite: &Satellite,
        duration: Duration,
        mut on_progress: impl FnMut(u64, u64) + Send,
    ) -> Result<PathBuf, RecorderError> {
        let mut session = self.start(satellite).await?;
        let total_secs = duration.as_secs();

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // first tick fires immediately

        let mut producer_died = false;
        for elapsed in 0..=total_secs {
            on_progress(elapsed, total_secs);
            if elapsed == total_secs {
                break;
            }
            ticker.tick().await;

            if let Some(lease) = session.lease.as_mut() {
                if lease.check_producer().is_err() {
                    producer_died = true;
                    break;
                }
            }
        }

        let path = session.stop().await?;
        if producer_died {
            return Err(RecorderError::ProducerDied);
        }
        Ok(path)
    }

    fn output_path(&self, satellite: &Satellite, start: DateTime<Utc>) -> PathBuf {
        let stamp = start.format("%Y%m%dT%H%M%SZ");
        self.config
            .paths
            .recordings_dir
            .join(format!("{}_{}.wav", satellite.slug(), stamp))
    }

    /// RTL source command per signal kind: SSTV gets FM with a DC
    /// blocker and FIR order 9, LRPT gets a raw IQ dump, other FM kinds
    /// get de-emphasis.
    fn source_command(&self, satellite: &Satellite) -> (String, Vec<String>) {
        let sdr = &self.config.sdr;
        let programs = &self.config.programs;
        match satellite.params.demodulation {
            Demodulation::BasebandIq => (
                programs.rtl_sdr.clone(),
                vec![
                    "-f".into(),
                    satellite.frequency_hz.to_string(),
                    "-s".into(),
                    satellite.params.sample_rate.to_string(),
                    "-g".into(),
                    format!("{}", self.gain.get()),
                    "-p".into(),
                    sdr.ppm.to_string(),
                    "-".into(),
                ],
            ),
            Demodulation::Fm => {
                let filter = match satellite.signal {
                    SignalKind::Sstv => "dc",
                    _ => "deemp",
                };
                (
                    programs.rtl_fm.clone(),
                    vec![
                        "-f".into(),
                        satellite.frequency_hz.to_string(),
                        "-M".into(),
                        "fm".into(),
                        "-s".into(),
                        satellite.params.sample_rate.to_string(),
                        "-g".into(),
                        format!("{}", self.gain.get()),
                        "-p".into(),
                        sdr.ppm.to_string(),
                        "-E".into(),
                        filter.into(),
                        "-F".into(),
                        "9".into(),
                        "-".into(),
                    ],
                )
            }
        }
    }

    /// WAV sink command. Raw s16 mono for FM audio; u8 interleaved IQ
    /// converted to s16 stereo for baseband recordings.
    fn sink_command(&self, satellite: &Satellite, output: &std::path::Path) -> (String, Vec<String>) {
        let encoder = self.config.programs.wav_encoder.clone();
        let rate = satellite.params.sample_rate.to_string();
        let args = match satellite.params.demodulation {
            Demodulation::Fm => vec![
                "-t".into(),
                "raw".into(),
                "-r".into(),
                rate,
                "-e".into(),
                "signed".into(),
                "-b".into(),
                "16".into(),
                "-c".into(),
                "1".into(),
                "-".into(),
                output.display().to_string(),
            ],
            Demodulation::BasebandIq => vec![
                "-t".into(),
                "raw".into(),
                "-r".into(),
                rate,
                "-e".into(),
                "unsigned".into(),
                "-b".into(),
                "8".into(),
                "-c".into(),
                "2".into(),
                "-".into(),
                "-e".into(),
                "signed".into(),
                "-b".into(),
                "16".into(),
                output.display().to_string(),
            ],
        };
        (encoder, args)
    }
}

impl RecordingSession {
    /// Teardown order matters: kill the source first so USB is released
    /// promptly, give the sink time to flush the WAV header, and only
    /// then release the arbiter lease (which starts the cooldown).
    pub async fn stop(mut self) -> Result<PathBuf, RecorderError> {
        if let Some(lease) = self.lease.as_mut() {
            if let Some(source) = lease.producer_mut() {
                if let Err(e) = source.terminate(SOURCE_GRACE).await {
                    log::warn!("source teardown failed: {}", e);
                }
            }
        }

        if let Some(mut sink) = self.sink.take() {
            match tokio::time::timeout(SINK_FLUSH, sink.wait()).await {
                Ok(Ok(status)) => log::debug!("sink exited: {:?}", status),
                Ok(Err(e)) => log::warn!("sink wait failed: {}", e),
                Err(_) => {
                    log::warn!("sink did not flush within {:?}, killing", SINK_FLUSH);
                    sink.kill_now();
                }
            }
        }

        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }

        Ok(self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satellite::SignalParams;

    fn test_config(dir: &std::path::Path) -> ReceiverConfig {
        let yaml = format!(
            r#"
station: {{ latitude_deg: 52.0, longitude_deg: 0.0 }}
sdr: {{ gain: 29.7, ppm: 1 }}
paths:
  recordings_dir: {dir}/rec
  images_dir: {dir}/img
  captures_dir: {dir}/cap
  tle_dir: {dir}/tle
programs: {{ rtl_fm: "yes", rtl_sdr: "yes", wav_encoder: "cat" }}
"#,
            dir = dir.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn sstv_satellite() -> Satellite {
        Satellite::ground_sstv(145_800_000, "Manual")
    }

    fn lrpt_satellite() -> Satellite {
        Satellite {
            name: "METEOR-M N2-3".into(),
            catalog_id: 57166,
            frequency_hz: 137_900_000,
            signal: SignalKind::Lrpt,
            params: SignalParams::lrpt(),
            enabled: true,
        }
    }

    #[test]
    fn sstv_source_uses_fm_with_dc_blocker() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(Arbiter::new(), test_config(dir.path()), SharedGain::new(29.7));
        let (prog, args) = recorder.source_command(&sstv_satellite());
        assert_eq!(prog, "yes");
        assert!(args.windows(2).any(|w| w == ["-E", "dc"]));
        assert!(args.windows(2).any(|w| w == ["-s", "48000"]));
        assert!(args.windows(2).any(|w| w == ["-F", "9"]));
    }

    #[test]
    fn lrpt_source_dumps_raw_iq() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(Arbiter::new(), test_config(dir.path()), SharedGain::new(29.7));
        let (_, args) = recorder.source_command(&lrpt_satellite());
        assert!(args.windows(2).any(|w| w == ["-s", "1024000"]));
        assert!(!args.contains(&"-M".to_string()));

        let (_, sink_args) =
            recorder.sink_command(&lrpt_satellite(), &PathBuf::from("/tmp/x.wav"));
        assert!(sink_args.windows(2).any(|w| w == ["-c", "2"]));
        assert!(sink_args.windows(2).any(|w| w == ["-b", "8"]));
    }

    #[test]
    fn filenames_are_slug_plus_utc_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(Arbiter::new(), test_config(dir.path()), SharedGain::new(29.7));
        let start = DateTime::parse_from_rfc3339("2026-08-02T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = recorder.output_path(&sstv_satellite(), start);
        assert!(path
            .to_string_lossy()
            .ends_with("manual-145-800-mhz_20260802T123456Z.wav"));
    }

    #[tokio::test]
    async fn record_pass_reports_progress_and_frees_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let arbiter = Arbiter::new();
        let recorder = Recorder::new(arbiter.clone(), test_config(dir.path()), SharedGain::new(29.7));

        let mut ticks = Vec::new();
        let path = recorder
            .record_pass(&sstv_satellite(), Duration::from_secs(1), |e, t| {
                ticks.push((e, t))
            })
            .await
            .unwrap();

        assert!(ticks.contains(&(0, 1)));
        assert!(ticks.contains(&(1, 1)));
        assert!(path.to_string_lossy().ends_with(".wav"));

        // Device grantable again after the cooldown.
        let lease = arbiter
            .acquire(Intent::Fft, Duration::from_secs(3))
            .await
            .unwrap();
        lease.release().await;
    }
}
