//! Deriving a virtual LAC station from its sibling cells (§4.D): pure computation plus the
//! database glue for the two tasks, `scan_lacs` and `update_lac`.

use sqlx::PgPool;

use crate::error::TaskResult;
use crate::geocalc::{centroid, enclosing_radius_km};
use crate::metrics::Metrics;
use crate::model::{from_degrees, to_degrees, CellRadio, CELLID_LAC};
use crate::task::run_task;

/// A non-virtual sibling cell contributing to a LAC's footprint.
#[derive(Debug, Clone, Copy)]
pub struct SiblingCell {
    pub lat: i64,
    pub lon: i64,
    pub min_lat: i64,
    pub min_lon: i64,
    pub max_lat: i64,
    pub max_lon: i64,
}

/// The recomputed virtual-LAC estimate: §4.D step 2-4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LacEstimate {
    pub lat: i64,
    pub lon: i64,
    pub range: i64,
}

/// Derive a LAC's position from its siblings. Returns `None` if there are no siblings left
/// (the caller should delete the virtual row in that case, per §4.C.1).
pub fn recompute(siblings: &[SiblingCell]) -> Option<LacEstimate> {
    if siblings.is_empty() {
        return None;
    }

    let points: Vec<(f64, f64)> = siblings
        .iter()
        .map(|c| (to_degrees(c.lat), to_degrees(c.lon)))
        .collect();
    let center = centroid(&points);

    let min_lat = siblings.iter().map(|c| c.min_lat).min().unwrap();
    let min_lon = siblings.iter().map(|c| c.min_lon).min().unwrap();
    let max_lat = siblings.iter().map(|c| c.max_lat).max().unwrap();
    let max_lon = siblings.iter().map(|c| c.max_lon).max().unwrap();

    let corners = [
        (to_degrees(min_lat), to_degrees(min_lon)),
        (to_degrees(min_lat), to_degrees(max_lon)),
        (to_degrees(max_lat), to_degrees(min_lon)),
        (to_degrees(max_lat), to_degrees(max_lon)),
    ];
    let range = (enclosing_radius_km(center, &corners) * 1000.0).round() as i64;

    Some(LacEstimate {
        lat: from_degrees(center.0),
        lon: from_degrees(center.1),
        range,
    })
}

/// Identifies a (radio, mcc, mnc, lac) group, the granularity a virtual LAC station covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LacId {
    pub radio: CellRadio,
    pub mcc: i16,
    pub mnc: i16,
    pub lac: i32,
}

/// Enqueue a recompute for every dirty virtual LAC row (`new_measures > 0`), up to `batch`.
/// Returns the number enqueued.
pub async fn scan_lacs(pool: &PgPool, metrics: &dyn Metrics, batch: i64) -> TaskResult<i64> {
    run_task("scan_lacs", metrics, 0_i64, || async {
        let mut tx = pool.begin().await?;
        let rows = sqlx::query!(
            "select radio as \"radio: CellRadio\", mcc, mnc, lac from cell \
             where cid = $1 and new_measures > 0 limit $2",
            CELLID_LAC,
            batch,
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        for row in &rows {
            update_lac(
                pool,
                metrics,
                LacId {
                    radio: row.radio,
                    mcc: row.mcc,
                    mnc: row.mnc,
                    lac: row.lac,
                },
            )
            .await?;
        }

        Ok(rows.len() as i64)
    })
    .await
}

/// Recompute one virtual LAC row from its current sibling cells (§4.D Recompute).
pub async fn update_lac(pool: &PgPool, metrics: &dyn Metrics, id: LacId) -> TaskResult<()> {
    run_task("update_lac", metrics, (), || async {
        let mut tx = pool.begin().await?;
        let siblings = sqlx::query!(
            "select lat, lon, min_lat, min_lon, max_lat, max_lon from cell \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid != $5 \
             and lat is not null and lon is not null",
            id.radio,
            id.mcc,
            id.mnc,
            id.lac,
            CELLID_LAC,
        )
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| SiblingCell {
            lat: r.lat.expect("filtered by is not null"),
            lon: r.lon.expect("filtered by is not null"),
            min_lat: r.min_lat,
            min_lon: r.min_lon,
            max_lat: r.max_lat,
            max_lon: r.max_lon,
        })
        .collect::<Vec<_>>();

        match recompute(&siblings) {
            None => {
                sqlx::query!(
                    "delete from cell where radio = $1 and mcc = $2 and mnc = $3 \
                     and lac = $4 and cid = $5",
                    id.radio,
                    id.mcc,
                    id.mnc,
                    id.lac,
                    CELLID_LAC,
                )
                .execute(&mut *tx)
                .await?;
            }
            Some(estimate) => {
                sqlx::query!(
                    "insert into cell (radio, mcc, mnc, lac, cid, lat, lon, \
                     min_lat, min_lon, max_lat, max_lon, range, new_measures, total_measures) \
                     values ($1, $2, $3, $4, $5, $6, $7, 0, 0, 0, 0, $8, 0, 0) \
                     on conflict (radio, mcc, mnc, lac, cid) \
                     do update set lat = excluded.lat, lon = excluded.lon, \
                     range = excluded.range, new_measures = 0",
                    id.radio,
                    id.mcc,
                    id.mnc,
                    id.lac,
                    CELLID_LAC,
                    estimate.lat,
                    estimate.lon,
                    estimate.range,
                )
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_siblings_yields_none() {
        assert!(recompute(&[]).is_none());
    }

    #[test]
    fn three_cell_centroid_matches_scenario_3() {
        let siblings = [
            sibling(50.0, 10.0),
            sibling(50.0, 10.2),
            sibling(50.2, 10.0),
        ];
        let estimate = recompute(&siblings).unwrap();
        let lat = to_degrees(estimate.lat);
        let lon = to_degrees(estimate.lon);
        assert!((lat - 50.0666666).abs() < 1e-3);
        assert!((lon - 10.0666666).abs() < 1e-3);
        assert!(estimate.range > 0);
    }

    fn sibling(lat: f64, lon: f64) -> SiblingCell {
        let v_lat = from_degrees(lat);
        let v_lon = from_degrees(lon);
        SiblingCell {
            lat: v_lat,
            lon: v_lon,
            min_lat: v_lat,
            min_lon: v_lon,
            max_lat: v_lat,
            max_lon: v_lon,
        }
    }
}
