use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::satellite::Satellite;

/// A predicted satellite pass over the station.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pass {
    pub satellite: Satellite,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    /// Time of closest approach (maximum elevation).
    pub tca: DateTime<Utc>,
    pub max_elevation_deg: f64,
    pub duration_seconds: i64,
    /// Downlink Doppler swing across the pass, positive at AOS.
    pub doppler_max_hz: Option<f64>,
    pub doppler_min_hz: Option<f64>,
}
