//! Local position sources
//!
//! A source watches the device position and pushes readings into a channel,
//! either a fix or a [`LocationError`]. Errors do not end the stream; the
//! source keeps polling on its own schedule.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Coordinates, MAX_LATITUDE, MAX_LONGITUDE};
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::interval;

const METERS_PER_DEGREE: f64 = 111_320.0;
const HIGH_ACCURACY_NOISE_METERS: f64 = 5.0;
const LOW_ACCURACY_NOISE_METERS: f64 = 50.0;

/// Shortest polling period a source will run at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to read track: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `latitude,longitude`, got {content:?}")]
    InvalidLine { line: usize, content: String },
}

pub type LocationReading = Result<Coordinates, LocationError>;

#[derive(Debug, Clone, Copy)]
pub struct GeolocationOptions {
    pub enable_high_accuracy: bool,
    /// Longest a single fix may take before the reading becomes a timeout
    pub timeout: Duration,
    /// How old a cached fix may be and still be reported again
    pub maximum_age: Duration,
}

impl Default for GeolocationOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(1000),
            maximum_age: Duration::ZERO,
        }
    }
}

pub trait GeolocationSource: Send + 'static {
    /// Starts watching; readings arrive until the source ends or the receiver is dropped
    fn watch_position(self, options: GeolocationOptions) -> mpsc::UnboundedReceiver<LocationReading>;
}

/// Simulated device wandering from a start point
pub struct RandomWalk {
    position: Coordinates,
    step_meters: f64,
    interval: Duration,
    max_fix_latency: Duration,
    cached: Option<(Coordinates, Duration)>,
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(start: Coordinates, step_meters: f64, interval: Duration) -> Self {
        Self {
            position: start,
            step_meters,
            interval: interval.max(MIN_INTERVAL),
            max_fix_latency: Duration::from_millis(200),
            cached: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Upper bound of the simulated time to acquire a fix
    pub fn with_fix_latency(mut self, max_fix_latency: Duration) -> Self {
        self.max_fix_latency = max_fix_latency;
        self
    }

    pub fn position(&self) -> Coordinates {
        self.position
    }

    /// Produces the reading for one polling tick
    pub fn next_reading(&mut self, options: &GeolocationOptions) -> LocationReading {
        if let Some((coords, age)) = self.cached {
            let age = age + self.interval;
            if age <= options.maximum_age {
                self.cached = Some((coords, age));
                return Ok(coords);
            }
        }

        let latency_ms = self.rng.gen_range(0..=self.max_fix_latency.as_millis() as u64);
        if Duration::from_millis(latency_ms) > options.timeout {
            return Err(LocationError::Timeout);
        }

        let bearing = self.rng.gen_range(0.0..2.0 * PI);
        self.position = offset(
            self.position,
            self.step_meters * bearing.cos(),
            self.step_meters * bearing.sin(),
        );

        let noise = if options.enable_high_accuracy {
            HIGH_ACCURACY_NOISE_METERS
        } else {
            LOW_ACCURACY_NOISE_METERS
        };
        let north = self.rng.gen_range(-noise..=noise);
        let east = self.rng.gen_range(-noise..=noise);
        let reading = offset(self.position, north, east);

        self.cached = Some((reading, Duration::ZERO));
        Ok(reading)
    }
}

impl GeolocationSource for RandomWalk {
    fn watch_position(mut self, options: GeolocationOptions) -> mpsc::UnboundedReceiver<LocationReading> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            loop {
                ticker.tick().await;
                let reading = self.next_reading(&options);
                if tx.send(reading).is_err() {
                    debug!("Location watcher stopped");
                    break;
                }
            }
        });

        rx
    }
}

/// Replays a fixed list of readings, one per interval, then ends
pub struct ScriptedTrack {
    readings: Vec<LocationReading>,
    interval: Duration,
}

impl ScriptedTrack {
    pub fn new(readings: Vec<LocationReading>, interval: Duration) -> Self {
        Self {
            readings,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Loads a track with one `latitude,longitude` pair per line
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_file(path: impl AsRef<Path>, interval: Duration) -> Result<Self, TrackError> {
        let text = std::fs::read_to_string(path)?;
        let points = parse_track(&text)?;
        Ok(Self::new(points.into_iter().map(Ok).collect(), interval))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl GeolocationSource for ScriptedTrack {
    fn watch_position(self, _options: GeolocationOptions) -> mpsc::UnboundedReceiver<LocationReading> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            for reading in self.readings {
                ticker.tick().await;
                if tx.send(reading).is_err() {
                    break;
                }
            }
            debug!("Scripted track finished");
        });

        rx
    }
}

pub fn parse_track(text: &str) -> Result<Vec<Coordinates>, TrackError> {
    let mut points = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = || TrackError::InvalidLine {
            line: index + 1,
            content: line.to_string(),
        };

        let (lat, lon) = line.split_once(',').ok_or_else(invalid)?;
        let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;

        let coords = Coordinates::new(latitude, longitude);
        coords.validate().map_err(|_| invalid())?;
        points.push(coords);
    }

    Ok(points)
}

/// Moves `coords` by the given distances in meters
pub fn offset(coords: Coordinates, north_m: f64, east_m: f64) -> Coordinates {
    let latitude = (coords.latitude + north_m / METERS_PER_DEGREE).clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let meters_per_lon_degree = METERS_PER_DEGREE * latitude.to_radians().cos().max(1e-6);
    let mut longitude = coords.longitude + east_m / meters_per_lon_degree;
    if longitude > MAX_LONGITUDE {
        longitude -= 2.0 * MAX_LONGITUDE;
    } else if longitude < -MAX_LONGITUDE {
        longitude += 2.0 * MAX_LONGITUDE;
    }

    Coordinates::new(latitude, longitude)
}
