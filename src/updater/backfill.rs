//! Backfill cell updates (§4.C): reprocesses an explicit `{key -> [measurement id]}` map
//! instead of live-selecting stations by `new_measures`, for measurements that were never
//! counted into a station's pending total at ingestion time.

use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;

use crate::aggregator::{aggregate, AggregateOutcome, CELL_MAX_DIST_KM};
use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::{CellKey, StationEstimate};
use crate::task::run_task;
use crate::updater::live::{touch_enclosing_lac, UpdateOutcome};
use crate::updater::remove;

pub async fn backfill_cell_location_update(
    pool: &PgPool,
    metrics: &dyn Metrics,
    batches: &HashMap<CellKey, Vec<i64>>,
) -> TaskResult<UpdateOutcome> {
    run_task(
        "backfill_cell_location_update",
        metrics,
        UpdateOutcome::default(),
        || async {
            let mut tx = pool.begin().await?;
            let mut processed = 0_i64;
            let mut moving_keys = Vec::new();

            for (key, ids) in batches {
                if key.is_malformed() || ids.is_empty() {
                    continue;
                }

                let row = sqlx::query!(
                    "select lat, lon, min_lat, min_lon, max_lat, max_lon, \
                     new_measures, total_measures from cell \
                     where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5",
                    key.radio,
                    key.mcc,
                    key.mnc,
                    key.lac,
                    key.cid,
                )
                .fetch_optional(&mut *tx)
                .await?;
                let Some(row) = row else { continue };

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

                let batch: Vec<(i64, i64)> = sqlx::query!(
                    "select lat, lon from cell_measure where id = any($1)",
                    ids as &[i64],
                )
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|r| (r.lat, r.lon))
                .collect();

                if batch.is_empty() {
                    continue;
                }

                match aggregate(estimate, &batch, true, CELL_MAX_DIST_KM) {
                    AggregateOutcome::Moving => {
                        moving_keys.push(*key);
                    }
                    AggregateOutcome::Updated(new) => {
                        sqlx::query!(
                            "update cell set lat = $1, lon = $2, min_lat = $3, min_lon = $4, \
                             max_lat = $5, max_lon = $6, range = $7, total_measures = $8 \
                             where radio = $9 and mcc = $10 and mnc = $11 and lac = $12 and cid = $13",
                            new.lat,
                            new.lon,
                            new.min_lat,
                            new.min_lon,
                            new.max_lat,
                            new.max_lon,
                            new.range,
                            new.total_measures,
                            key.radio,
                            key.mcc,
                            key.mnc,
                            key.lac,
                            key.cid,
                        )
                        .execute(&mut *tx)
                        .await?;

                        touch_enclosing_lac(&mut tx, key).await?;
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
                info!(moving, "blacklisted moving cells during backfill");
            }

            tx.commit().await?;
            Ok(UpdateOutcome { processed, moving })
        },
    )
    .await
}
