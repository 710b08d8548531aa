//! Vessel tracking
//!
//! Keeps the latest report of every recently heard MMSI.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::demodulator::DecodedMessage;
use crate::message::{LATITUDE_NOT_AVAILABLE, LONGITUDE_NOT_AVAILABLE, PositionReport};

/// Tracked vessel
#[derive(Debug, Clone)]
pub struct Vessel {
    pub mmsi: u32,
    /// Most recent report
    pub report: PositionReport,
    /// Last seen timestamp
    pub seen: Instant,
    /// Message count
    pub messages: u64,
    /// Running average of the training correlation score
    pub score: f32,
    /// Most recent carrier offset estimate
    pub freq_offset_hz: f32,
}

impl Vessel {
    fn new(report: PositionReport) -> Self {
        Self {
            mmsi: report.vessel.mmsi,
            report,
            seen: Instant::now(),
            messages: 0,
            score: 0.0,
            freq_offset_hz: 0.0,
        }
    }

    /// Position in degrees, if the last report carried one.
    pub fn position(&self) -> Option<(f64, f64)> {
        let v = &self.report.vessel;
        if v.latitude == LATITUDE_NOT_AVAILABLE || v.longitude == LONGITUDE_NOT_AVAILABLE {
            None
        } else {
            Some((v.latitude, v.longitude))
        }
    }
}

/// One row of the JSON vessel snapshot.
#[derive(Debug, Serialize)]
struct VesselJson {
    mmsi: u32,
    lat: f64,
    lon: f64,
    speed: f64,
    course: f64,
    heading: u16,
    status: u8,
    messages: u64,
    seen: u64,
}

/// Store for tracking multiple vessels
pub struct VesselStore {
    vessels: HashMap<u32, Vessel>,
    ttl: Duration,
    /// Minimum messages required before a vessel is listed
    min_messages: u64,
}

impl VesselStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_min_messages(ttl_secs, 1)
    }

    pub fn with_min_messages(ttl_secs: u64, min_messages: u64) -> Self {
        Self {
            vessels: HashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
            min_messages,
        }
    }

    pub fn update_from_message(&mut self, msg: &DecodedMessage) -> &Vessel {
        let mmsi = msg.report.vessel.mmsi;
        let vessel = self
            .vessels
            .entry(mmsi)
            .or_insert_with(|| Vessel::new(msg.report));

        vessel.report = msg.report;
        vessel.seen = Instant::now();
        vessel.messages += 1;
        vessel.freq_offset_hz = msg.freq_offset_hz;
        vessel.score = if vessel.messages == 1 {
            msg.score
        } else {
            (vessel.score * 7.0 + msg.score) / 8.0
        };
        vessel
    }

    pub fn get(&self, mmsi: u32) -> Option<&Vessel> {
        self.vessels.get(&mmsi)
    }

    /// Vessels that meet the minimum message threshold
    pub fn all(&self) -> impl Iterator<Item = &Vessel> {
        let min_msg = self.min_messages;
        self.vessels.values().filter(move |v| v.messages >= min_msg)
    }

    pub fn remove_stale(&mut self) {
        let now = Instant::now();
        self.vessels
            .retain(|_, v| now.duration_since(v.seen) <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.all().count()
    }

    /// Number of all tracked vessels including those below threshold
    pub fn len_total(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON array of listed vessels that have a position.
    pub fn to_json(&self) -> String {
        let now = Instant::now();
        let mut rows: Vec<VesselJson> = self
            .all()
            .filter_map(|v| {
                let (lat, lon) = v.position()?;
                let state = &v.report.vessel;
                Some(VesselJson {
                    mmsi: v.mmsi,
                    lat,
                    lon,
                    speed: state.speed_over_ground,
                    course: state.course_over_ground,
                    heading: state.true_heading,
                    status: state.nav_status,
                    messages: v.messages,
                    seen: now.duration_since(v.seen).as_secs(),
                })
            })
            .collect();
        rows.sort_by_key(|r| r.mmsi);
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Distance (km) and initial bearing (degrees) between two points, by haversine.
pub fn distance_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let distance = EARTH_RADIUS_KM * 2.0 * a.sqrt().asin();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();
    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    (distance, bearing)
}
