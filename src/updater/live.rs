//! Live station updates (§4.C): drains a batch of stations whose `new_measures` falls in
//! `[min_new, max_new)`, folding each one's most recent measurements into its estimate.

use std::collections::HashSet;

use sqlx::{PgConnection, PgPool};
use tracing::info;

use crate::aggregator::{aggregate, AggregateOutcome, CELL_MAX_DIST_KM, WIFI_MAX_DIST_KM};
use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::{CellKey, CellRadio, StationEstimate, WifiKey, CELLID_LAC};
use crate::task::run_task;
use crate::updater::remove;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOutcome {
    pub processed: i64,
    pub moving: i64,
}

pub struct LiveParams {
    pub min_new: i32,
    pub max_new: i32,
    pub batch: i64,
}

/// Runs the whole task as one transaction, committed once at the end (§5): a retried
/// transient failure never re-applies a `new_measures` decrement, a LAC touch, or a
/// blacklist/removal already made this attempt.
pub async fn cell_location_update(
    pool: &PgPool,
    metrics: &dyn Metrics,
    params: &LiveParams,
) -> TaskResult<UpdateOutcome> {
    run_task("cell_location_update", metrics, UpdateOutcome::default(), || async {
        let mut tx = pool.begin().await?;

        let candidates = sqlx::query!(
            "select radio as \"radio: CellRadio\", mcc, mnc, lac, cid, \
             lat, lon, min_lat, min_lon, max_lat, max_lon, new_measures, total_measures \
             from cell where new_measures >= $1 and new_measures < $2 and cid != $3 \
             and lac != -1 and cid != -1 limit $4",
            params.min_new,
            params.max_new,
            CELLID_LAC,
            params.batch,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut processed = 0_i64;
        let mut moving_keys = Vec::new();

        for row in candidates {
            let key = CellKey {
                radio: row.radio,
                mcc: row.mcc,
                mnc: row.mnc,
                lac: row.lac,
                cid: row.cid,
            };
            if key.is_malformed() {
                continue;
            }

            let estimate = StationEstimate {
                lat: row.lat,
                lon: row.lon,
                min_lat: row.min_lat,
                min_lon: row.min_lon,
                max_lat: row.max_lat,
                max_lon: row.max_lon,
                range: 0,
                new_measures: row.new_measures,
                total_measures: row.total_measures,
            };

            let batch = sqlx::query!(
                "select lat, lon from cell_measure \
                 where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5 \
                 order by created desc limit $6",
                key.radio,
                key.mcc,
                key.mnc,
                key.lac,
                key.cid,
                estimate.new_measures as i64,
            )
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|r| (r.lat, r.lon))
            .collect::<Vec<_>>();

            if batch.is_empty() {
                continue;
            }

            match aggregate(estimate, &batch, false, CELL_MAX_DIST_KM) {
                AggregateOutcome::Moving => {
                    moving_keys.push(key);
                }
                AggregateOutcome::Updated(new) => {
                    sqlx::query!(
                        "update cell set lat = $1, lon = $2, min_lat = $3, min_lon = $4, \
                         max_lat = $5, max_lon = $6, range = $7, new_measures = $8 \
                         where radio = $9 and mcc = $10 and mnc = $11 and lac = $12 and cid = $13",
                        new.lat,
                        new.lon,
                        new.min_lat,
                        new.min_lon,
                        new.max_lat,
                        new.max_lon,
                        new.range,
                        new.new_measures,
                        key.radio,
                        key.mcc,
                        key.mnc,
                        key.lac,
                        key.cid,
                    )
                    .execute(&mut *tx)
                    .await?;

                    touch_enclosing_lac(&mut tx, &key).await?;
                    processed += 1;
                }
            }
        }

        let moving = moving_keys.len() as i64;
        if !moving_keys.is_empty() {
            for key in &moving_keys {
                sqlx::query!(
                    "insert into cell_blacklist (radio, mcc, mnc, lac, cid, created) \
                     values ($1, $2, $3, $4, $5, now()) on conflict do nothing",
                    key.radio,
                    key.mcc,
                    key.mnc,
                    key.lac,
                    key.cid,
                )
                .execute(&mut *tx)
                .await?;
            }
            metrics.incr("items.blacklisted.cell");
            remove::remove_cell_in(&mut tx, &moving_keys).await?;
            info!(moving, "blacklisted moving cells");
        }

        tx.commit().await?;
        Ok(UpdateOutcome { processed, moving })
    })
    .await
}

pub async fn wifi_location_update(
    pool: &PgPool,
    metrics: &dyn Metrics,
    params: &LiveParams,
) -> TaskResult<UpdateOutcome> {
    run_task("wifi_location_update", metrics, UpdateOutcome::default(), || async {
        let mut tx = pool.begin().await?;

        let candidates = sqlx::query!(
            "select key as \"key: WifiKey\", lat, lon, min_lat, min_lon, max_lat, max_lon, \
             new_measures, total_measures from wifi \
             where new_measures >= $1 and new_measures < $2 limit $3",
            params.min_new,
            params.max_new,
            params.batch,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut processed = 0_i64;
        let mut moving_keys: HashSet<WifiKey> = HashSet::new();

        for row in candidates {
            let key = row.key;
            let estimate = StationEstimate {
                lat: row.lat,
                lon: row.lon,
                min_lat: row.min_lat,
                min_lon: row.min_lon,
                max_lat: row.max_lat,
                max_lon: row.max_lon,
                range: 0,
                new_measures: row.new_measures,
                total_measures: row.total_measures,
            };

            let batch = sqlx::query!(
                "select lat, lon from wifi_measure where key = $1 order by created desc limit $2",
                key,
                estimate.new_measures as i64,
            )
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|r| (r.lat, r.lon))
            .collect::<Vec<_>>();

            if batch.is_empty() {
                continue;
            }

            match aggregate(estimate, &batch, false, WIFI_MAX_DIST_KM) {
                AggregateOutcome::Moving => {
                    moving_keys.insert(key);
                }
                AggregateOutcome::Updated(new) => {
                    sqlx::query!(
                        "update wifi set lat = $1, lon = $2, min_lat = $3, min_lon = $4, \
                         max_lat = $5, max_lon = $6, range = $7, new_measures = $8 where key = $9",
                        new.lat,
                        new.lon,
                        new.min_lat,
                        new.min_lon,
                        new.max_lat,
                        new.max_lon,
                        new.range,
                        new.new_measures,
                        key,
                    )
                    .execute(&mut *tx)
                    .await?;
                    processed += 1;
                }
            }
        }

        let moving = moving_keys.len() as i64;
        if !moving_keys.is_empty() {
            for key in &moving_keys {
                sqlx::query!(
                    "insert into wifi_blacklist (key, created) values ($1, now()) on conflict do nothing",
                    *key,
                )
                .execute(&mut *tx)
                .await?;
            }
            metrics.incr("items.blacklisted.wifi");
            remove::remove_wifi_in(&mut tx, &moving_keys).await?;
            info!(moving, "blacklisted moving wifis");
        }

        tx.commit().await?;
        Ok(UpdateOutcome { processed, moving })
    })
    .await
}

/// Bump the enclosing virtual LAC's `new_measures` counter, inserting it if absent (§4.C step 5).
pub async fn touch_enclosing_lac(conn: &mut PgConnection, cell: &CellKey) -> sqlx::Result<()> {
    let lac = cell.lac_key();
    sqlx::query!(
        "insert into cell (radio, mcc, mnc, lac, cid, new_measures, total_measures, \
         min_lat, min_lon, max_lat, max_lon, range) \
         values ($1, $2, $3, $4, $5, 1, 0, 0, 0, 0, 0, 0) \
         on conflict (radio, mcc, mnc, lac, cid) do update set new_measures = cell.new_measures + 1",
        lac.radio,
        lac.mcc,
        lac.mnc,
        lac.lac,
        lac.cid,
    )
    .execute(conn)
    .await?;
    Ok(())
}
