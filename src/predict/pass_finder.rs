use chrono::{DateTime, Duration, Utc};

use super::error::PredictError;
use super::propagation::{propagate_sample, GroundStation};
use super::tle_loader::TleEntry;
use super::types::Pass;
use crate::satellite::Satellite;

const COARSE_STEP_SECONDS: i64 = 60; // 1 minute for initial scan
const FINE_STEP_SECONDS: i64 = 1; // 1 second for refinement
const HORIZON_ELEVATION: f64 = 0.0;

/// Find all passes of a satellite within a time range. Horizon
/// crossings found by the coarse scan are refined by binary search;
/// passes peaking below `min_elevation` are discarded.
pub fn predict_passes(
    station: &GroundStation,
    entry: &TleEntry,
    satellite: &Satellite,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    min_elevation: f64,
) -> Result<Vec<Pass>, PredictError> {
    let mut passes = Vec::new();
    let mut cursor = start;
    let coarse_step = Duration::seconds(COARSE_STEP_SECONDS);

    let mut prev_visible = false;
    let mut pass_start: Option<DateTime<Utc>> = None;
    let mut max_el = 0.0;
    let mut max_el_time = cursor;

    while cursor <= end {
        let sample = propagate_sample(station, &entry.elements, &entry.constants, cursor, None)?;
        let visible = sample.elevation_deg >= HORIZON_ELEVATION;

        if visible && !prev_visible {
            // AOS detected - refine to find exact crossing
            let refined_aos = refine_crossing(station, entry, cursor - coarse_step, cursor, true)?;
            pass_start = Some(refined_aos);
            max_el = sample.elevation_deg;
            max_el_time = cursor;
        } else if visible && pass_start.is_some() {
            // Track maximum elevation during pass
            if sample.elevation_deg > max_el {
                max_el = sample.elevation_deg;
                max_el_time = cursor;
            }
        } else if !visible && prev_visible {
            if let Some(aos) = pass_start {
                // LOS detected - refine and create pass
                let los = refine_crossing(station, entry, cursor - coarse_step, cursor, false)?;
                if max_el >= min_elevation {
                    passes.push(make_pass(station, entry, satellite, aos, los, max_el_time, max_el));
                }
                pass_start = None;
                max_el = 0.0;
            }
        }

        prev_visible = visible;
        cursor += coarse_step;
    }

    // Handle pass in progress at end of window
    if let Some(aos) = pass_start {
        if max_el >= min_elevation {
            passes.push(make_pass(station, entry, satellite, aos, end, max_el_time, max_el));
        }
    }

    Ok(passes)
}

fn make_pass(
    station: &GroundStation,
    entry: &TleEntry,
    satellite: &Satellite,
    aos: DateTime<Utc>,
    los: DateTime<Utc>,
    tca: DateTime<Utc>,
    max_el: f64,
) -> Pass {
    let downlink = Some(satellite.frequency_hz as f64);
    // Doppler extremes sit at the horizon crossings.
    let doppler_at = |t: DateTime<Utc>| {
        propagate_sample(station, &entry.elements, &entry.constants, t, downlink)
            .ok()
            .and_then(|s| s.doppler_hz)
    };

    Pass {
        satellite: satellite.clone(),
        aos,
        los,
        tca,
        max_elevation_deg: round2(max_el),
        duration_seconds: (los - aos).num_seconds(),
        doppler_max_hz: doppler_at(aos),
        doppler_min_hz: doppler_at(los),
    }
}

/// Binary search for the exact horizon crossing time.
fn refine_crossing(
    station: &GroundStation,
    entry: &TleEntry,
    before: DateTime<Utc>,
    after: DateTime<Utc>,
    is_aos: bool, // true = rising, false = setting
) -> Result<DateTime<Utc>, PredictError> {
    let mut low = before;
    let mut high = after;

    while (high - low).num_seconds() > FINE_STEP_SECONDS {
        let mid = low + (high - low) / 2;
        let sample = propagate_sample(station, &entry.elements, &entry.constants, mid, None)?;
        let above = sample.elevation_deg >= HORIZON_ELEVATION;

        if above == is_aos {
            high = mid;
        } else {
            low = mid;
        }
    }

    Ok(high)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satellite::{SignalKind, SignalParams};
    use sgp4::{Constants, Elements};

    fn iss_entry() -> TleEntry {
        let elements = Elements::from_tle(
            Some("ISS (ZARYA)".to_string()),
            b"1 25544U 98067A   26012.17690827  .00009276  00000-0  17471-3 0  9998",
            b"2 25544  51.6333 351.7881 0007723   8.9804 351.1321 15.49250518547578",
        )
        .unwrap();
        let constants = Constants::from_elements(&elements).unwrap();
        TleEntry {
            name: Some("ISS (ZARYA)".to_string()),
            norad_id: 25544,
            source_file: "iss.tle".to_string(),
            elements,
            constants,
        }
    }

    fn iss_satellite() -> Satellite {
        Satellite {
            name: "ISS".into(),
            catalog_id: 25544,
            frequency_hz: 145_800_000,
            signal: SignalKind::Sstv,
            params: SignalParams::sstv(),
            enabled: true,
        }
    }

    #[test]
    fn a_day_of_iss_yields_sorted_consistent_passes() {
        let station = GroundStation::new(52.0, 0.0, 0.0);
        let start = DateTime::parse_from_rfc3339("2026-01-12T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = start + Duration::hours(24);

        let passes =
            predict_passes(&station, &iss_entry(), &iss_satellite(), start, end, 5.0).unwrap();

        assert!(!passes.is_empty(), "expected at least one ISS pass a day");
        for pass in &passes {
            assert!(pass.aos < pass.los);
            assert!(pass.aos <= pass.tca && pass.tca <= pass.los);
            assert!(pass.max_elevation_deg >= 5.0);
            assert!(pass.duration_seconds > 0 && pass.duration_seconds < 1_300);
            // Approaching at AOS, receding at LOS.
            assert!(pass.doppler_max_hz.unwrap() > 0.0);
            assert!(pass.doppler_min_hz.unwrap() < 0.0);
        }
        for pair in passes.windows(2) {
            assert!(pair[0].aos < pair[1].aos);
        }
    }

    #[test]
    fn high_elevation_floor_filters_passes() {
        let station = GroundStation::new(52.0, 0.0, 0.0);
        let start = DateTime::parse_from_rfc3339("2026-01-12T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = start + Duration::hours(24);

        let all =
            predict_passes(&station, &iss_entry(), &iss_satellite(), start, end, 0.0).unwrap();
        let high =
            predict_passes(&station, &iss_entry(), &iss_satellite(), start, end, 60.0).unwrap();
        assert!(high.len() <= all.len());
        for pass in &high {
            assert!(pass.max_elevation_deg >= 60.0);
        }
    }
}
