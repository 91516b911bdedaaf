use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};

use super::error::PredictError;
use crate::config::StationConfig;

const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
/// Earth rotation rate, rad/s.
const EARTH_ROTATION_RAD_S: f64 = 7.292_115e-5;

/// Receiving station geometry. The geodetic trig and the Earth-fixed
/// antenna position are computed once and feed every look-angle
/// conversion afterwards.
#[derive(Debug, Clone, Copy)]
pub struct GroundStation {
    sin_lat: f64,
    cos_lat: f64,
    sin_lon: f64,
    cos_lon: f64,
    ecef_km: [f64; 3],
}

impl GroundStation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        // WGS-84 ellipsoid
        const EQUATORIAL_RADIUS_KM: f64 = 6_378.137;
        const FLATTENING: f64 = 1.0 / 298.257_223_563;

        let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = longitude_deg.to_radians().sin_cos();

        let e2 = FLATTENING * (2.0 - FLATTENING);
        let prime_vertical = EQUATORIAL_RADIUS_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let alt_km = altitude_m * 1e-3;

        GroundStation {
            sin_lat,
            cos_lat,
            sin_lon,
            cos_lon,
            ecef_km: [
                (prime_vertical + alt_km) * cos_lat * cos_lon,
                (prime_vertical + alt_km) * cos_lat * sin_lon,
                (prime_vertical * (1.0 - e2) + alt_km) * sin_lat,
            ],
        }
    }

    pub fn from_station_config(config: &StationConfig) -> Self {
        Self::new(
            config.latitude_deg,
            config.longitude_deg,
            config.altitude_m,
        )
    }

    /// Earth-fixed offset from the antenna to a target.
    fn offset_to(&self, target_ecef_km: [f64; 3]) -> [f64; 3] {
        [
            target_ecef_km[0] - self.ecef_km[0],
            target_ecef_km[1] - self.ecef_km[1],
            target_ecef_km[2] - self.ecef_km[2],
        ]
    }

    /// Rotate an Earth-fixed offset into local east/north/up.
    fn enu(&self, rel: [f64; 3]) -> [f64; 3] {
        let east = -self.sin_lon * rel[0] + self.cos_lon * rel[1];
        let north = -self.sin_lat * self.cos_lon * rel[0] - self.sin_lat * self.sin_lon * rel[1]
            + self.cos_lat * rel[2];
        let up = self.cos_lat * self.cos_lon * rel[0]
            + self.cos_lat * self.sin_lon * rel[1]
            + self.sin_lat * rel[2];
        [east, north, up]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ObservationSample {
    pub timestamp: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_km: f64,
    pub range_rate_km_s: f64,
    /// Downlink Doppler shift, when a downlink frequency is known.
    pub doppler_hz: Option<f64>,
}

/// Propagate a satellite to `time` and express it as seen from the
/// station: azimuth, elevation, range, range rate and Doppler.
pub fn propagate_sample(
    station: &GroundStation,
    elements: &Elements,
    constants: &Constants,
    time: DateTime<Utc>,
    downlink_hz: Option<f64>,
) -> Result<ObservationSample, PredictError> {
    let minutes = elements
        .datetime_to_minutes_since_epoch(&time.naive_utc())
        .map_err(|e| PredictError::Propagation(e.to_string()))?;
    let prediction = constants
        .propagate(minutes)
        .map_err(|e| PredictError::Propagation(e.to_string()))?;

    // SGP4 predicts in the inertial TEME frame; spin it down to
    // Earth-fixed axes at the current sidereal angle.
    let theta =
        sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&time.naive_utc()));
    let sat_pos = rotate_z(prediction.position, theta);

    // Velocity in the rotating frame picks up the -ω × r term. The
    // station is stationary in this frame, so the relative velocity is
    // the satellite's alone.
    let spun = rotate_z(prediction.velocity, theta);
    let sat_vel = [
        spun[0] + EARTH_ROTATION_RAD_S * sat_pos[1],
        spun[1] - EARTH_ROTATION_RAD_S * sat_pos[0],
        spun[2],
    ];

    let rel = station.offset_to(sat_pos);
    let range = (rel[0] * rel[0] + rel[1] * rel[1] + rel[2] * rel[2]).sqrt();

    let [east, north, up] = station.enu(rel);
    let elevation = (up / range).asin().to_degrees();
    let mut azimuth = east.atan2(north).to_degrees();
    if azimuth < 0.0 {
        azimuth += 360.0;
    }

    let range_rate = (sat_vel[0] * rel[0] + sat_vel[1] * rel[1] + sat_vel[2] * rel[2]) / range;
    let doppler_hz = downlink_hz.map(|f| -range_rate / SPEED_OF_LIGHT_KM_S * f);

    Ok(ObservationSample {
        timestamp: time,
        azimuth_deg: azimuth,
        elevation_deg: elevation,
        range_km: range,
        range_rate_km_s: range_rate,
        doppler_hz,
    })
}

fn rotate_z(v: [f64; 3], theta: f64) -> [f64; 3] {
    let (sin_t, cos_t) = theta.sin_cos();
    [
        cos_t * v[0] + sin_t * v[1],
        -sin_t * v[0] + cos_t * v[1],
        v[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const ISS_TLE: (&str, &str) = (
        "1 25544U 98067A   26012.17690827  .00009276  00000-0  17471-3 0  9998",
        "2 25544  51.6333 351.7881 0007723   8.9804 351.1321 15.49250518547578",
    );

    fn iss() -> (Elements, Constants) {
        let elements = Elements::from_tle(
            Some("ISS (ZARYA)".to_string()),
            ISS_TLE.0.as_bytes(),
            ISS_TLE.1.as_bytes(),
        )
        .unwrap();
        let constants = Constants::from_elements(&elements).unwrap();
        (elements, constants)
    }

    #[test]
    fn samples_are_geometrically_sane() {
        let station = GroundStation::new(52.0, 0.0, 50.0);
        let (elements, constants) = iss();
        let epoch = DateTime::parse_from_rfc3339("2026-01-12T04:14:44Z")
            .unwrap()
            .with_timezone(&Utc);

        let sample =
            propagate_sample(&station, &elements, &constants, epoch, Some(145.8e6)).unwrap();
        assert!(sample.range_km > 300.0 && sample.range_km < 20_000.0);
        assert!((-90.0..=90.0).contains(&sample.elevation_deg));
        assert!((0.0..360.0).contains(&sample.azimuth_deg));
        // LEO range rate stays under orbital velocity.
        assert!(sample.range_rate_km_s.abs() < 8.0);
        // Doppler at 2 m is at most a few kHz.
        assert!(sample.doppler_hz.unwrap().abs() < 4_000.0);
    }

    #[test]
    fn station_sits_on_the_ellipsoid() {
        // At the equator the ECEF radius is the equatorial radius; at
        // the pole it is the (smaller) polar radius.
        let equator = GroundStation::new(0.0, 0.0, 0.0);
        let [x, y, z] = equator.ecef_km;
        assert!((x - 6_378.137).abs() < 1e-6);
        assert!(y.abs() < 1e-6 && z.abs() < 1e-6);

        let pole = GroundStation::new(90.0, 0.0, 0.0);
        let polar_radius = pole.ecef_km[2];
        assert!((polar_radius - 6_356.752).abs() < 1e-2);
    }

    #[test]
    fn zenith_target_reads_ninety_degrees_elevation() {
        let station = GroundStation::new(52.0, 0.1, 0.0);
        // A point 400 km straight above the antenna.
        let scale = 1.0
            + 400.0
                / (station.ecef_km[0].powi(2)
                    + station.ecef_km[1].powi(2)
                    + station.ecef_km[2].powi(2))
                .sqrt();
        let overhead = [
            station.ecef_km[0] * scale,
            station.ecef_km[1] * scale,
            station.ecef_km[2] * scale,
        ];
        let [_, _, up] = station.enu(station.offset_to(overhead));
        let range = 400.0;
        let elevation = (up / range).asin().to_degrees();
        // Geocentric and geodetic verticals differ by a fraction of a
        // degree at mid latitudes.
        assert!(elevation > 89.0, "elevation {}", elevation);
    }

    #[test]
    fn iss_rises_above_a_mid_latitude_horizon_within_a_day() {
        let station = GroundStation::new(52.0, 0.0, 0.0);
        let (elements, constants) = iss();
        let start = DateTime::parse_from_rfc3339("2026-01-12T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut best = -90.0f64;
        for minute in 0..(24 * 60) {
            let t = start + chrono::Duration::minutes(minute);
            let sample = propagate_sample(&station, &elements, &constants, t, None).unwrap();
            best = best.max(sample.elevation_deg);
        }
        assert!(best > 0.0, "max elevation over a day: {}", best);
    }
}
