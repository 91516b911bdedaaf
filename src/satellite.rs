use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How the downlink is taken off the air before it reaches the WAV sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Demodulation {
    Fm,
    BasebandIq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Lrpt,
    Sstv,
    NarrowbandFm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignalParams {
    pub bandwidth_hz: u32,
    pub sample_rate: u32,
    pub demodulation: Demodulation,
}

impl SignalParams {
    /// SSTV rides on a 2 m FM voice channel; 48 kHz mono audio is the
    /// native rate for the decoder.
    pub fn sstv() -> Self {
        SignalParams {
            bandwidth_hz: 12_500,
            sample_rate: 48_000,
            demodulation: Demodulation::Fm,
        }
    }

    pub fn lrpt() -> Self {
        SignalParams {
            bandwidth_hz: 140_000,
            sample_rate: 1_024_000,
            demodulation: Demodulation::BasebandIq,
        }
    }
}

/// A satellite the station knows how to receive. Loaded from the config
/// file at startup; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Satellite {
    pub name: String,
    /// NORAD catalog number; zero for virtual (ground SSTV) satellites.
    pub catalog_id: u32,
    pub frequency_hz: u64,
    pub signal: SignalKind,
    pub params: SignalParams,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Satellite {
    /// Virtual satellite backing an SSTV capture on a fixed ground
    /// frequency (manual command or scanner detection).
    pub fn ground_sstv(frequency_hz: u64, label: &str) -> Self {
        Satellite {
            name: format!("{} {:.3} MHz", label, frequency_hz as f64 / 1e6),
            catalog_id: 0,
            frequency_hz,
            signal: SignalKind::Sstv,
            params: SignalParams::sstv(),
            enabled: true,
        }
    }

    /// Filesystem-safe slug of the satellite name.
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_satellite_name_matches_frequency() {
        let sat = Satellite::ground_sstv(145_800_000, "Manual");
        assert_eq!(sat.name, "Manual 145.800 MHz");
        assert_eq!(sat.signal, SignalKind::Sstv);
        assert_eq!(sat.params.sample_rate, 48_000);
    }

    #[test]
    fn slug_strips_awkward_characters() {
        let sat = Satellite::ground_sstv(145_500_000, "SSTV");
        assert_eq!(sat.slug(), "sstv-145-500-mhz");

        let noaa = Satellite {
            name: "METEOR-M N2-3".into(),
            catalog_id: 57166,
            frequency_hz: 137_900_000,
            signal: SignalKind::Lrpt,
            params: SignalParams::lrpt(),
            enabled: true,
        };
        assert_eq!(noaa.slug(), "meteor-m-n2-3");
    }
}
