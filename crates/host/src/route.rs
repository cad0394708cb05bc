//! Route playback
//!
//! A [`Route`] is an ordered list of waypoints. [`RoutePlayer`] walks it at
//! a fixed speed and yields one location sample per tick, starting on the
//! first waypoint and ending exactly on the last.
//!
//! Routes are stored as TOML:
//!
//! ```toml
//! name = "Embarcadero"
//! movement = "walking"
//!
//! [[waypoints]]
//! latitude = 37.7955
//! longitude = -122.3937
//!
//! [[waypoints]]
//! latitude = 37.8080
//! longitude = -122.4177
//! altitude = 5.0
//! ```

use protocol::{LocationError, LocationSample};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Route has no waypoints")]
    Empty,

    #[error("Invalid playback speed {0} m/s")]
    InvalidSpeed(f64),

    #[error("Invalid playback tick {0:?}")]
    InvalidTick(Duration),

    #[error("Waypoint {index}: {source}")]
    InvalidWaypoint {
        index: usize,
        #[source]
        source: LocationError,
    },

    #[error("Failed to read route file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse route: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    #[default]
    Walking,
    Running,
    Cycling,
    Driving,
}

impl MovementType {
    pub fn default_speed_mps(self) -> f64 {
        match self {
            MovementType::Walking => 1.4,
            MovementType::Running => 3.0,
            MovementType::Cycling => 6.0,
            MovementType::Driving => 14.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    fn altitude_or_ground(&self) -> f64 {
        self.altitude.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementType>,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn new(name: impl Into<String>, waypoints: Vec<Waypoint>) -> Self {
        Self {
            name: name.into(),
            movement: None,
            waypoints,
        }
    }

    pub fn with_movement(mut self, movement: MovementType) -> Self {
        self.movement = Some(movement);
        self
    }

    /// Speed implied by the movement type, or `fallback` when none is set
    pub fn speed_mps(&self, fallback: f64) -> f64 {
        self.movement.map_or(fallback, MovementType::default_speed_mps)
    }

    /// Read and validate a TOML route file
    pub fn load(path: &Path) -> Result<Self, RouteError> {
        let content = fs::read_to_string(path)?;
        let route: Route = toml::from_str(&content)?;
        route.validate()?;
        Ok(route)
    }

    /// At least one waypoint, every waypoint within coordinate ranges
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.waypoints.is_empty() {
            return Err(RouteError::Empty);
        }
        for (index, waypoint) in self.waypoints.iter().enumerate() {
            LocationSample::now(
                waypoint.latitude,
                waypoint.longitude,
                waypoint.altitude_or_ground(),
            )
            .validate()
            .map_err(|source| RouteError::InvalidWaypoint { index, source })?;
        }
        Ok(())
    }

    pub fn total_distance_m(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| haversine_m(&pair[0], &pair[1]))
            .sum()
    }
}

/// Great-circle distance in metres
pub fn haversine_m(a: &Waypoint, b: &Waypoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Iterator over the samples of one route playback
#[derive(Debug, Clone)]
pub struct RoutePlayer {
    waypoints: Vec<Waypoint>,
    segment_lengths: Vec<f64>,
    step_m: f64,
    segment: usize,
    offset_m: f64,
    started: bool,
    finished: bool,
}

impl RoutePlayer {
    pub fn new(route: &Route, speed_mps: f64, tick: Duration) -> Result<Self, RouteError> {
        route.validate()?;
        if !speed_mps.is_finite() || speed_mps <= 0.0 {
            return Err(RouteError::InvalidSpeed(speed_mps));
        }
        if tick.is_zero() {
            return Err(RouteError::InvalidTick(tick));
        }

        let segment_lengths = route
            .waypoints
            .windows(2)
            .map(|pair| haversine_m(&pair[0], &pair[1]))
            .collect();

        Ok(Self {
            waypoints: route.waypoints.clone(),
            segment_lengths,
            step_m: speed_mps * tick.as_secs_f64(),
            segment: 0,
            offset_m: 0.0,
            started: false,
            finished: false,
        })
    }

    fn sample_at(&self, waypoint: &Waypoint) -> LocationSample {
        LocationSample::now(
            waypoint.latitude,
            waypoint.longitude,
            waypoint.altitude_or_ground(),
        )
    }

    fn interpolate(&self) -> LocationSample {
        let from = &self.waypoints[self.segment];
        let to = &self.waypoints[self.segment + 1];
        let f = self.offset_m / self.segment_lengths[self.segment];

        LocationSample::now(
            from.latitude + (to.latitude - from.latitude) * f,
            from.longitude + (to.longitude - from.longitude) * f,
            from.altitude_or_ground() + (to.altitude_or_ground() - from.altitude_or_ground()) * f,
        )
    }
}

impl Iterator for RoutePlayer {
    type Item = LocationSample;

    fn next(&mut self) -> Option<LocationSample> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            self.finished = self.segment_lengths.is_empty();
            return self.waypoints.first().map(|w| self.sample_at(w));
        }

        let mut remaining = self.step_m;
        while self.segment < self.segment_lengths.len() {
            let left = self.segment_lengths[self.segment] - self.offset_m;
            if remaining < left {
                self.offset_m += remaining;
                return Some(self.interpolate());
            }
            remaining -= left;
            self.segment += 1;
            self.offset_m = 0.0;
        }

        self.finished = true;
        self.waypoints.last().map(|w| self.sample_at(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_route() -> Route {
        Route::new(
            "test",
            vec![
                Waypoint::new(0.0, 0.0),
                Waypoint::new(0.0, 0.001),
                Waypoint::new(0.001, 0.001).with_altitude(10.0),
            ],
        )
    }

    #[test]
    fn test_haversine_one_millidegree_at_equator() {
        let d = haversine_m(&Waypoint::new(0.0, 0.0), &Waypoint::new(0.0, 0.001));
        assert!((d - 111.19).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_player_starts_and_ends_on_waypoints() {
        let route = square_route();
        let samples: Vec<_> = RoutePlayer::new(&route, 10.0, Duration::from_secs(1))
            .unwrap()
            .collect();

        let first = samples.first().unwrap();
        assert_eq!((first.latitude, first.longitude), (0.0, 0.0));

        let last = samples.last().unwrap();
        assert_eq!((last.latitude, last.longitude, last.altitude), (0.001, 0.001, 10.0));

        // ~222 m at 10 m per tick: the start, 22 steps, then the end
        assert_eq!(samples.len(), 24);
        assert!(samples.iter().all(|s| s.is_valid()));
    }

    #[test]
    fn test_player_steps_are_even() {
        let route = Route::new("line", vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 0.01)]);
        let samples: Vec<_> = RoutePlayer::new(&route, 100.0, Duration::from_secs(1))
            .unwrap()
            .collect();

        for pair in samples.windows(2).take(samples.len() - 2) {
            let a = Waypoint::new(pair[0].latitude, pair[0].longitude);
            let b = Waypoint::new(pair[1].latitude, pair[1].longitude);
            assert!((haversine_m(&a, &b) - 100.0).abs() < 0.5);
        }
    }

    #[test]
    fn test_single_waypoint_route() {
        let route = Route::new("here", vec![Waypoint::new(10.0, 20.0)]);
        let samples: Vec<_> = RoutePlayer::new(&route, 1.4, Duration::from_secs(1))
            .unwrap()
            .collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].altitude, 0.0);
    }

    #[test]
    fn test_speed_falls_back_without_movement() {
        let route = Route::new("r", vec![Waypoint::new(0.0, 0.0)]);
        assert_eq!(route.speed_mps(2.5), 2.5);
        assert_eq!(route.with_movement(MovementType::Driving).speed_mps(2.5), 14.0);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let route = square_route();
        assert!(matches!(
            RoutePlayer::new(&route, 0.0, Duration::from_secs(1)),
            Err(RouteError::InvalidSpeed(_))
        ));
        assert!(matches!(
            RoutePlayer::new(&route, f64::NAN, Duration::from_secs(1)),
            Err(RouteError::InvalidSpeed(_))
        ));
        assert!(matches!(
            RoutePlayer::new(&route, 1.0, Duration::ZERO),
            Err(RouteError::InvalidTick(_))
        ));
        assert!(matches!(
            RoutePlayer::new(&Route::new("none", vec![]), 1.0, Duration::from_secs(1)),
            Err(RouteError::Empty)
        ));

        let bad = Route::new("bad", vec![Waypoint::new(0.0, 0.0), Waypoint::new(91.0, 0.0)]);
        assert!(matches!(
            bad.validate(),
            Err(RouteError::InvalidWaypoint { index: 1, .. })
        ));
    }

    #[test]
    fn test_route_from_toml() {
        let route: Route = toml::from_str(
            r#"
            name = "walk"
            movement = "cycling"

            [[waypoints]]
            latitude = 1.0
            longitude = 2.0

            [[waypoints]]
            latitude = 1.5
            longitude = 2.5
            altitude = 30.0
            "#,
        )
        .unwrap();

        assert_eq!(route.movement, Some(MovementType::Cycling));
        assert_eq!(route.speed_mps(1.4), 6.0);
        assert_eq!(route.waypoints[0].altitude, None);
        assert_eq!(route.waypoints[1].altitude, Some(30.0));
    }
}
