mod error;
mod pass_finder;
mod propagation;
mod tle_loader;
mod types;

pub use error::PredictError;
pub use pass_finder::predict_passes;
pub use propagation::{propagate_sample, GroundStation, ObservationSample};
pub use tle_loader::{TleCatalog, TleEntry};
pub use types::Pass;

use chrono::{DateTime, Duration, Utc};

use crate::config::ReceiverConfig;

/// Predict the upcoming passes of every enabled satellite over the
/// configured station, sorted by AOS.
pub fn upcoming_passes(
    config: &ReceiverConfig,
    start: DateTime<Utc>,
    hours_ahead: i64,
) -> Result<Vec<Pass>, PredictError> {
    let station = GroundStation::from_station_config(&config.station);
    let catalog = TleCatalog::load(&config.paths.tle_dir)?;

    let end = start + Duration::hours(hours_ahead);
    let mut passes = Vec::new();
    for satellite in config.satellites.iter().filter(|s| s.enabled) {
        let entry = match catalog.lookup(satellite.catalog_id) {
            Some(e) => e,
            None => {
                log::warn!(
                    "no TLE for {} (catalog {}), skipping",
                    satellite.name,
                    satellite.catalog_id
                );
                continue;
            }
        };
        let found = predict_passes(
            &station,
            entry,
            satellite,
            start,
            end,
            config.capture.min_elevation_deg,
        )?;
        passes.extend(found);
    }

    passes.sort_by_key(|p| p.aos);
    Ok(passes)
}
