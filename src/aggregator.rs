//! Folds a batch of measurements into a station's running position estimate.
//!
//! All coordinate arithmetic here stays in centimicrodegree integers, matching the storage
//! representation; only the movement-distance check crosses into degrees via [`crate::geocalc`].

use crate::geocalc::{enclosing_radius_km, haversine_km};
use crate::model::{to_degrees, StationEstimate};

/// Per-measurement-kind movement cap, in kilometers (§4.B).
pub const CELL_MAX_DIST_KM: f64 = 150.0;
pub const WIFI_MAX_DIST_KM: f64 = 5.0;

pub enum AggregateOutcome {
    /// The station absorbed the batch; here is its new estimate.
    Updated(StationEstimate),
    /// The batch pushed the station's bounding box past the movement cap; caller must
    /// blacklist and delete it instead of storing this estimate.
    Moving,
}

fn floor_div(total: i64, n: i64) -> i64 {
    total.div_euclid(n)
}

fn batch_mean(batch: &[(i64, i64)]) -> (i64, i64) {
    let n = batch.len() as i64;
    let sum_lat: i64 = batch.iter().map(|(lat, _)| *lat).sum();
    let sum_lon: i64 = batch.iter().map(|(_, lon)| *lon).sum();
    (floor_div(sum_lat, n), floor_div(sum_lon, n))
}

/// Fold `batch` (non-empty) into `station`, per §4.B. `backfill` selects whether the batch was
/// already counted into `total_measures` at ingestion time.
pub fn aggregate(
    station: StationEstimate,
    batch: &[(i64, i64)],
    backfill: bool,
    max_dist_km: f64,
) -> AggregateOutcome {
    debug_assert!(!batch.is_empty(), "caller must reject empty batches");
    let n = batch.len() as i64;
    let (batch_lat, batch_lon) = batch_mean(batch);

    let had_estimate = station.lat.is_some() && station.lon.is_some();

    let mut lats: Vec<i64> = batch.iter().map(|(lat, _)| *lat).collect();
    let mut lons: Vec<i64> = batch.iter().map(|(_, lon)| *lon).collect();

    let mut station = station;
    if had_estimate {
        lats.push(station.lat.unwrap());
        lons.push(station.lon.unwrap());
    } else {
        station.lat = Some(batch_lat);
        station.lon = Some(batch_lon);
    }

    let extreme = |vals: &[i64], existing: Option<i64>, pick: fn(i64, i64) -> i64| -> i64 {
        let new = vals.iter().copied().reduce(pick).expect("non-empty extent");
        match existing {
            Some(old) if had_estimate => pick(new, old),
            _ => new,
        }
    };

    let min_lat = extreme(&lats, Some(station.min_lat), i64::min);
    let min_lon = extreme(&lons, Some(station.min_lon), i64::min);
    let max_lat = extreme(&lats, Some(station.max_lat), i64::max);
    let max_lon = extreme(&lons, Some(station.max_lon), i64::max);

    let box_dist_km = haversine_km(
        (to_degrees(min_lat), to_degrees(min_lon)),
        (to_degrees(max_lat), to_degrees(max_lon)),
    );

    if had_estimate {
        if box_dist_km > max_dist_km {
            return AggregateOutcome::Moving;
        }

        let (new_total, old_len) = if backfill {
            (station.total_measures as i64 + n, station.total_measures as i64)
        } else {
            let new_total = station.total_measures as i64;
            (new_total, new_total - n)
        };

        station.lat = Some(floor_div(
            station.lat.unwrap() * old_len + batch_lat * n,
            new_total,
        ));
        station.lon = Some(floor_div(
            station.lon.unwrap() * old_len + batch_lon * n,
            new_total,
        ));
        if backfill {
            station.total_measures = new_total as i32;
        }
    }

    if !backfill {
        station.new_measures -= n as i32;
    }

    station.min_lat = min_lat;
    station.min_lon = min_lon;
    station.max_lat = max_lat;
    station.max_lon = max_lon;

    let center = (to_degrees(station.lat.unwrap()), to_degrees(station.lon.unwrap()));
    let corners = [
        (to_degrees(min_lat), to_degrees(min_lon)),
        (to_degrees(min_lat), to_degrees(max_lon)),
        (to_degrees(max_lat), to_degrees(min_lon)),
        (to_degrees(max_lat), to_degrees(max_lon)),
    ];
    station.range = (enclosing_radius_km(center, &corners) * 1000.0).floor() as i64;

    AggregateOutcome::Updated(station)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::from_degrees;

    fn fresh() -> StationEstimate {
        StationEstimate::default()
    }

    #[test]
    fn fresh_station_adopts_batch_mean() {
        let batch = vec![(from_degrees(50.0), from_degrees(10.0)); 1];
        match aggregate(fresh(), &batch, false, CELL_MAX_DIST_KM) {
            AggregateOutcome::Updated(s) => {
                assert_eq!(s.lat, Some(from_degrees(50.0)));
                assert_eq!(s.lon, Some(from_degrees(10.0)));
            }
            AggregateOutcome::Moving => panic!("fresh station cannot be moving"),
        }
    }

    #[test]
    fn weighted_refinement_matches_scenario_2() {
        let station = StationEstimate {
            lat: Some(from_degrees(50.0000000)),
            lon: Some(from_degrees(10.0)),
            min_lat: from_degrees(50.0),
            min_lon: from_degrees(10.0),
            max_lat: from_degrees(50.0),
            max_lon: from_degrees(10.0),
            range: 0,
            new_measures: 10,
            total_measures: 90,
        };
        let batch = vec![(from_degrees(50.0010000), from_degrees(10.0)); 10];
        match aggregate(station, &batch, false, CELL_MAX_DIST_KM) {
            AggregateOutcome::Updated(s) => {
                assert_eq!(s.new_measures, 0);
                assert_eq!(s.total_measures, 90);
                // old_len = total_measures - n = 80, new_total = 90:
                // floor((50.0*80 + 50.001*10) / 90) in centimicrodegrees.
                let expected = 500_001_111;
                assert_eq!(s.lat.unwrap(), expected);
            }
            AggregateOutcome::Moving => panic!("should not be flagged moving"),
        }
    }

    #[test]
    fn movement_beyond_cap_is_detected() {
        let station = StationEstimate {
            lat: Some(from_degrees(50.0)),
            lon: Some(from_degrees(10.0)),
            min_lat: from_degrees(50.0),
            min_lon: from_degrees(10.0),
            max_lat: from_degrees(50.0),
            max_lon: from_degrees(10.0),
            range: 0,
            new_measures: 10,
            total_measures: 10,
        };
        let batch = vec![(from_degrees(60.0), from_degrees(20.0)); 10];
        assert!(matches!(
            aggregate(station, &batch, false, CELL_MAX_DIST_KM),
            AggregateOutcome::Moving
        ));
    }

    #[test]
    fn backfill_increments_total_measures() {
        let station = StationEstimate {
            lat: Some(from_degrees(50.0)),
            lon: Some(from_degrees(10.0)),
            min_lat: from_degrees(50.0),
            min_lon: from_degrees(10.0),
            max_lat: from_degrees(50.0),
            max_lon: from_degrees(10.0),
            range: 0,
            new_measures: 0,
            total_measures: 10,
        };
        let batch = vec![(from_degrees(50.0), from_degrees(10.0)); 5];
        match aggregate(station, &batch, true, CELL_MAX_DIST_KM) {
            AggregateOutcome::Updated(s) => {
                assert_eq!(s.total_measures, 15);
                assert_eq!(s.new_measures, 0);
            }
            AggregateOutcome::Moving => panic!("should not move"),
        }
    }
}
