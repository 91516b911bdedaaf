use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::satellite::Satellite;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide receiver configuration, immutable after boot.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    pub station: StationConfig,
    pub sdr: SdrConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub sstv: SstvConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub programs: ProgramsConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Keep predicting and capturing in a loop instead of exiting after
    /// the current pass list is exhausted.
    #[serde(default)]
    pub service_mode: bool,
    #[serde(default)]
    pub satellites: Vec<Satellite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdrConfig {
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub ppm: i32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_gain() -> f64 {
    29.7
}

fn default_sample_rate() -> u32 {
    48_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub recordings_dir: PathBuf,
    pub images_dir: PathBuf,
    pub captures_dir: PathBuf,
    pub tle_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_min_elevation")]
    pub min_elevation_deg: f64,
    /// Peak power a carrier must exceed for a capture to proceed, in dB.
    #[serde(default = "default_min_signal")]
    pub min_signal_strength_db: f64,
    #[serde(default)]
    pub skip_signal_check: bool,
    /// Seconds before AOS at which waiting ends and capture setup begins.
    #[serde(default = "default_pre_pass_lead")]
    pub pre_pass_lead_secs: u64,
    /// Gap that must remain before AOS after an opportunistic scan ends.
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            min_elevation_deg: default_min_elevation(),
            min_signal_strength_db: default_min_signal(),
            skip_signal_check: false,
            pre_pass_lead_secs: default_pre_pass_lead(),
            safety_margin_secs: default_safety_margin(),
        }
    }
}

fn default_min_elevation() -> f64 {
    20.0
}

fn default_min_signal() -> f64 {
    -35.0
}

fn default_pre_pass_lead() -> u64 {
    10
}

fn default_safety_margin() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SstvConfig {
    #[serde(default = "default_true")]
    pub manual_enabled: bool,
    #[serde(default)]
    pub ground_scan_enabled: bool,
    /// 2 m SSTV frequencies visited by the idle-time scanner, in Hz.
    #[serde(default = "default_scan_frequencies")]
    pub scan_frequencies_hz: Vec<u64>,
    /// Minimum idle gap before a pass for the scanner to start at all.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
    #[serde(default = "default_sstv_duration")]
    pub capture_duration_secs: u64,
    #[serde(default = "default_dwell")]
    pub dwell_secs: u64,
}

impl Default for SstvConfig {
    fn default() -> Self {
        SstvConfig {
            manual_enabled: true,
            ground_scan_enabled: false,
            scan_frequencies_hz: default_scan_frequencies(),
            idle_threshold_secs: default_idle_threshold(),
            capture_duration_secs: default_sstv_duration(),
            dwell_secs: default_dwell(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scan_frequencies() -> Vec<u64> {
    vec![145_500_000, 145_800_000]
}

fn default_idle_threshold() -> u64 {
    120
}

fn default_sstv_duration() -> u64 {
    150
}

fn default_dwell() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        WebConfig {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// External programs the orchestrator spawns. Overridable so tests can
/// substitute stubs and deployments can point at absolute paths.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramsConfig {
    #[serde(default = "default_rtl_fm")]
    pub rtl_fm: String,
    #[serde(default = "default_rtl_sdr")]
    pub rtl_sdr: String,
    #[serde(default = "default_rtl_power")]
    pub rtl_power: String,
    #[serde(default = "default_wav_encoder")]
    pub wav_encoder: String,
    #[serde(default = "default_lrpt_decoder")]
    pub lrpt_decoder: String,
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        ProgramsConfig {
            rtl_fm: default_rtl_fm(),
            rtl_sdr: default_rtl_sdr(),
            rtl_power: default_rtl_power(),
            wav_encoder: default_wav_encoder(),
            lrpt_decoder: default_lrpt_decoder(),
        }
    }
}

fn default_rtl_fm() -> String {
    "rtl_fm".to_string()
}

fn default_rtl_sdr() -> String {
    "rtl_sdr".to_string()
}

fn default_rtl_power() -> String {
    "rtl_power".to_string()
}

fn default_wav_encoder() -> String {
    "sox".to_string()
}

fn default_lrpt_decoder() -> String {
    "meteor_demod".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ReceiverConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ReceiverConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=49.0).contains(&self.sdr.gain) {
            return Err(ConfigError::Invalid(format!(
                "gain {} outside [0, 49]",
                self.sdr.gain
            )));
        }
        if !(-90.0..=90.0).contains(&self.station.latitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "latitude {} outside [-90, 90]",
                self.station.latitude_deg
            )));
        }
        if !(-180.0..=180.0).contains(&self.station.longitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "longitude {} outside [-180, 180]",
                self.station.longitude_deg
            )));
        }
        if self.sdr.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be nonzero".into()));
        }
        if self.sstv.scan_frequencies_hz.is_empty() && self.sstv.ground_scan_enabled {
            return Err(ConfigError::Invalid(
                "ground scan enabled with empty scan_frequencies_hz".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
station:
  latitude_deg: 52.2
  longitude_deg: 0.1
sdr:
  gain: 29.7
paths:
  recordings_dir: /tmp/rec
  images_dir: /tmp/img
  captures_dir: /tmp/cap
  tle_dir: /tmp/tle
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: ReceiverConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.web.bind, "0.0.0.0:8080");
        assert_eq!(config.sstv.capture_duration_secs, 150);
        assert_eq!(config.sstv.dwell_secs, 20);
        assert!(!config.sstv.ground_scan_enabled);
        assert_eq!(config.capture.min_signal_strength_db, -35.0);
    }

    #[test]
    fn gain_out_of_range_is_rejected() {
        let mut config: ReceiverConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.sdr.gain = 50.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.sdr.gain = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        let mut config: ReceiverConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.station.latitude_deg = 91.0;
        assert!(config.validate().is_err());
    }
}
