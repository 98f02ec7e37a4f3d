//! Core type model: stations, measurements, blacklist rows, archival blocks.
//!
//! All stored latitude/longitude values are centimicrodegrees (degrees * 10^7); see
//! [`to_degrees`]/[`from_degrees`] for the boundary conversion into the plain degrees that
//! [`crate::geocalc`] operates on.

use chrono::{DateTime, Utc};
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// `cid` sentinel marking a station row as the virtual LAC aggregate rather than a real cell.
pub const CELLID_LAC: i64 = -2;

/// Centimicrodegrees to plain degrees.
pub fn to_degrees(v: i64) -> f64 {
    v as f64 / 1e7
}

/// Plain degrees to centimicrodegrees.
pub fn from_degrees(v: f64) -> i64 {
    (v * 1e7).round() as i64
}

/// Cell radio access technology, stored as the `smallint` discriminant used throughout the
/// `cell`/`cell_measure`/`cell_blacklist` tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum CellRadio {
    Gsm = 2,
    Wcdma = 3,
    Lte = 4,
    Nr = 5,
}

/// Which measurement table (`MeasureBlock.measure_type`) a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, EnumString, Display, sqlx::Type)]
#[strum(serialize_all = "lowercase")]
#[repr(i16)]
pub enum MeasureKind {
    Cell = 0,
    Wifi = 1,
}

impl MeasureKind {
    /// The `<prefix>` used in zip/s3-key naming (`CellMeasure`/`WifiMeasure`), matching the
    /// measurement table names.
    pub fn archive_prefix(self) -> &'static str {
        match self {
            MeasureKind::Cell => "CellMeasure",
            MeasureKind::Wifi => "WifiMeasure",
        }
    }

    pub fn csv_name(self) -> &'static str {
        match self {
            MeasureKind::Cell => "cell_measure.csv",
            MeasureKind::Wifi => "wifi_measure.csv",
        }
    }
}

/// Unique key of a cell tower: `(radio, mcc, mnc, lac, cid)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub radio: CellRadio,
    pub mcc: i16,
    pub mnc: i16,
    pub lac: i32,
    pub cid: i64,
}

impl CellKey {
    pub fn is_malformed(&self) -> bool {
        self.lac == -1 || self.cid == -1 || self.cid == CELLID_LAC
    }

    /// The key of this cell's enclosing virtual LAC station.
    pub fn lac_key(&self) -> CellKey {
        CellKey {
            radio: self.radio,
            mcc: self.mcc,
            mnc: self.mnc,
            lac: self.lac,
            cid: CELLID_LAC,
        }
    }
}

/// Wi-Fi station key: a bare BSSID.
pub type WifiKey = MacAddress;

/// A station's running position estimate plus the counters the aggregator needs.
///
/// `lat`/`lon` are `None` exactly when the station has never been given a position; `(0, 0)`
/// is a legitimate position (off the coast of West Africa) and is never conflated with
/// absence (see spec invariant 6 / REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationEstimate {
    pub lat: Option<i64>,
    pub lon: Option<i64>,
    pub min_lat: i64,
    pub min_lon: i64,
    pub max_lat: i64,
    pub max_lon: i64,
    pub range: i64,
    pub new_measures: i32,
    pub total_measures: i32,
}

/// A single `cell_measure`/`wifi_measure` row, trimmed to the fields the aggregator and
/// archival jobs need.
#[derive(Debug, Clone, Copy)]
pub struct MeasureRow {
    pub id: i64,
    pub lat: i64,
    pub lon: i64,
    pub time: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// A `measure_block` row in any of its three lifecycle states (planned / uploaded / reaped).
#[derive(Debug, Clone)]
pub struct MeasureBlockRow {
    pub id: i64,
    pub measure_type: MeasureKind,
    pub start_id: i64,
    pub end_id: i64,
    pub s3_key: Option<String>,
    pub archive_sha: Option<String>,
    pub archive_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_roundtrip_is_stable_to_seven_places() {
        let original = 50.0010000_f64;
        let stored = from_degrees(original);
        assert_eq!(stored, 500_010_000);
        assert!((to_degrees(stored) - original).abs() < 1e-9);
    }

    #[test]
    fn malformed_cell_keys() {
        let base = CellKey {
            radio: CellRadio::Lte,
            mcc: 1,
            mnc: 1,
            lac: 10,
            cid: 20,
        };
        assert!(!base.is_malformed());
        assert!(CellKey { lac: -1, ..base }.is_malformed());
        assert!(CellKey { cid: -1, ..base }.is_malformed());
        assert!(
            CellKey {
                cid: CELLID_LAC,
                ..base
            }
            .is_malformed()
        );
    }

    #[test]
    fn lac_key_shares_radio_mcc_mnc_lac() {
        let cell = CellKey {
            radio: CellRadio::Gsm,
            mcc: 262,
            mnc: 1,
            lac: 42,
            cid: 99,
        };
        let lac = cell.lac_key();
        assert_eq!(lac.radio, cell.radio);
        assert_eq!(lac.mcc, cell.mcc);
        assert_eq!(lac.mnc, cell.mnc);
        assert_eq!(lac.lac, cell.lac);
        assert_eq!(lac.cid, CELLID_LAC);
    }
}
