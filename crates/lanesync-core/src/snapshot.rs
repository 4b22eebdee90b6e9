//! Decoded controller status at one poll instant.
//!
//! The backend is loose about numeric types: countdown timers are floats and
//! fallback counts are copied from float timers. Decoding therefore accepts any
//! non-negative JSON number for integer fields and rounds it.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LANE_COUNT;

/// Upper bound of a lane density percentage.
const MAX_DENSITY: f64 = 100.0;

/// One of the four fixed traffic approaches (index 0..=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize")]
pub struct Lane(u8);

impl Lane {
    pub const ALL: [Lane; LANE_COUNT] = [Lane(0), Lane(1), Lane(2), Lane(3)];

    /// Returns the lane for a zero-based index, or `None` if out of range.
    pub fn new(index: usize) -> Option<Self> {
        (index < LANE_COUNT).then(|| Lane(index as u8))
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lane {}", self.0 + 1)
    }
}

impl TryFrom<usize> for Lane {
    type Error = anyhow::Error;

    fn try_from(index: usize) -> Result<Self> {
        Lane::new(index).with_context(|| format!("lane index {index} is out of range 0..=3"))
    }
}

/// Controller operating mode as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Counts come from the synthetic generator.
    Mock,
    /// Counts come from camera detection.
    Camera,
    /// An official (or an emergency) holds the signal.
    Manual,
    /// Detection failed; the controller rotates lanes on its last timers.
    Fallback,
    #[default]
    Unknown,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Mock => "mock",
            Mode::Camera => "camera",
            Mode::Manual => "manual",
            Mode::Fallback => "fallback",
            Mode::Unknown => "unknown",
        }
    }
}

impl FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "mock" => Mode::Mock,
            "camera" => Mode::Camera,
            "manual" => Mode::Manual,
            "fallback" => Mode::Fallback,
            _ => Mode::Unknown,
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status body as sent by the backend. Every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusBody {
    counts: Option<Vec<f64>>,
    densities: Option<Vec<f64>>,
    timers: Option<Vec<f64>>,
    next_lane: Option<f64>,
    signal_timer: Option<f64>,
    mode: Option<String>,
    emergency: Option<bool>,
    emergency_lane: Option<f64>,
    timestamp: Option<f64>,
    error: Option<String>,
}

/// One poll's decoded backend status. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    counts: [u32; LANE_COUNT],
    densities: [f64; LANE_COUNT],
    timers: [u32; LANE_COUNT],
    active_lane: Lane,
    active_lane_timer: u32,
    mode: Mode,
    emergency: bool,
    emergency_lane: Option<Lane>,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_error: Option<String>,
}

impl Snapshot {
    /// Decodes a status body. Absent fields take zero values; malformed ones fail.
    ///
    /// # Errors
    /// Returns an error if the body is not a JSON object or a present field is
    /// negative, non-numeric or names a lane outside 0..=3.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let body: StatusBody =
            serde_json::from_slice(body).context("status body is not a valid JSON object")?;
        Self::from_body(body)
    }

    fn from_body(body: StatusBody) -> Result<Self> {
        let counts = lane_array(body.counts, "counts", |v| whole(v, "counts"))?;
        let densities = lane_array(body.densities, "densities", |v| {
            if v.is_finite() {
                Ok(v.clamp(0.0, MAX_DENSITY))
            } else {
                bail!("densities must be finite numbers")
            }
        })?;
        let timers = lane_array(body.timers, "timers", |v| whole(v, "timers"))?;

        let active_lane = match body.next_lane {
            Some(v) => lane_index(v, "next_lane")?,
            None => Lane(0),
        };
        let emergency_lane = body
            .emergency_lane
            .map(|v| lane_index(v, "emergency_lane"))
            .transpose()?;
        let active_lane_timer = body
            .signal_timer
            .map_or(Ok(0), |v| whole(v, "signal_timer"))?;
        let mode = body
            .mode
            .as_deref()
            .map_or(Mode::Unknown, |m| m.parse().unwrap_or_default());

        Ok(Self {
            counts,
            densities,
            timers,
            active_lane,
            active_lane_timer,
            mode,
            emergency: body.emergency.unwrap_or(false),
            emergency_lane,
            timestamp: body.timestamp.unwrap_or(0.0),
            backend_error: body.error.filter(|e| !e.is_empty()),
        })
    }

    /// Builds a snapshot carrying only lane counts, for synthetic sources.
    pub fn with_counts(counts: [u32; LANE_COUNT]) -> Self {
        Self {
            counts,
            densities: [0.0; LANE_COUNT],
            timers: [0; LANE_COUNT],
            active_lane: Lane(0),
            active_lane_timer: 0,
            mode: Mode::Unknown,
            emergency: false,
            emergency_lane: None,
            timestamp: 0.0,
            backend_error: None,
        }
    }

    pub fn counts(&self) -> &[u32; LANE_COUNT] {
        &self.counts
    }

    pub fn count(&self, lane: Lane) -> u32 {
        self.counts[lane.index()]
    }

    pub fn densities(&self) -> &[f64; LANE_COUNT] {
        &self.densities
    }

    pub fn timers(&self) -> &[u32; LANE_COUNT] {
        &self.timers
    }

    /// Lane currently holding (or about to hold) the green signal.
    pub fn active_lane(&self) -> Lane {
        self.active_lane
    }

    /// Seconds remaining on the active lane's green.
    pub fn active_lane_timer(&self) -> u32 {
        self.active_lane_timer
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn emergency(&self) -> bool {
        self.emergency
    }

    pub fn emergency_lane(&self) -> Option<Lane> {
        self.emergency_lane
    }

    /// Backend timestamp in seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Backend timestamp as a UTC date, if it is representable.
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    /// Marker the backend attaches when its own detection step failed.
    pub fn backend_error(&self) -> Option<&str> {
        self.backend_error.as_deref()
    }
}

fn whole(value: f64, field: &str) -> Result<u32> {
    if !value.is_finite() || value < 0.0 {
        bail!("{field} must be non-negative numbers, got {value}");
    }
    let rounded = value.round();
    if rounded > f64::from(u32::MAX) {
        bail!("{field} value {value} is too large");
    }
    Ok(rounded as u32)
}

fn lane_index(value: f64, field: &str) -> Result<Lane> {
    let index = whole(value, field)? as usize;
    Lane::new(index).with_context(|| format!("{field} {index} is out of range 0..=3"))
}

/// Maps a per-lane array onto exactly four entries: short arrays are padded
/// with the zero value, entries past the fourth are ignored.
fn lane_array<T, F>(values: Option<Vec<f64>>, field: &str, convert: F) -> Result<[T; LANE_COUNT]>
where
    T: Copy + Default,
    F: Fn(f64) -> Result<T>,
{
    let mut out = [T::default(); LANE_COUNT];
    for (slot, value) in out.iter_mut().zip(values.unwrap_or_default()) {
        *slot = convert(value).with_context(|| format!("invalid {field} entry"))?;
    }
    Ok(out)
}
