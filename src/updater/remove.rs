//! Station removal (§4.C.1): delete blacklisted stations, and for cells, re-count and repair
//! the enclosing virtual LAC afterwards.
//!
//! Each function comes in two shapes: an `_in` variant that runs against a caller-supplied
//! connection (so a live/backfill update can fold the removal into its own single-session
//! transaction, §5), and a standalone task wrapper that opens and commits its own transaction
//! when invoked on its own (the external "station remover").

use std::collections::HashSet;

use sqlx::{PgConnection, PgPool};
use tracing::info;

use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::{CellKey, CellRadio, WifiKey, CELLID_LAC};
use crate::task::run_task;

/// Delete the given Wi-Fi stations against `conn`. Returns the number deleted.
pub async fn remove_wifi_in(conn: &mut PgConnection, keys: &HashSet<WifiKey>) -> sqlx::Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let keys: Vec<WifiKey> = keys.iter().copied().collect();
    let result = sqlx::query!("delete from wifi where key = any($1)", &keys as &[WifiKey])
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Delete the given Wi-Fi stations as a standalone task. Swallows integrity conflicts as `0`
/// (§4.C.1).
pub async fn remove_wifi(pool: &PgPool, metrics: &dyn Metrics, keys: &HashSet<WifiKey>) -> TaskResult<u64> {
    run_task("remove_wifi", metrics, 0, || async {
        let mut tx = pool.begin().await?;
        let removed = remove_wifi_in(&mut tx, keys).await?;
        tx.commit().await?;
        Ok(removed)
    })
    .await
}

/// Delete the given cell stations against `conn`, then repair each affected LAC's sibling
/// count. Returns the number of cell rows deleted.
pub async fn remove_cell_in(conn: &mut PgConnection, keys: &[CellKey]) -> sqlx::Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }

    let mut removed = 0_u64;
    let mut touched_lacs = HashSet::new();
    for key in keys {
        let result = sqlx::query!(
            "delete from cell where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5",
            key.radio,
            key.mcc,
            key.mnc,
            key.lac,
            key.cid,
        )
        .execute(&mut *conn)
        .await?;
        removed += result.rows_affected();
        if result.rows_affected() > 0 {
            touched_lacs.insert(key.lac_key());
        }
    }

    for lac in touched_lacs {
        let remaining = sqlx::query!(
            "select count(*) as \"count!\" from cell \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid != $5",
            lac.radio,
            lac.mcc,
            lac.mnc,
            lac.lac,
            CELLID_LAC,
        )
        .fetch_one(&mut *conn)
        .await?
        .count;

        if remaining == 0 {
            sqlx::query!(
                "delete from cell where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5",
                lac.radio,
                lac.mcc,
                lac.mnc,
                lac.lac,
                CELLID_LAC,
            )
            .execute(&mut *conn)
            .await?;
            info!(lac = ?lac, "deleted virtual LAC with no remaining siblings");
        } else {
            sqlx::query!(
                "update cell set new_measures = new_measures + 1 \
                 where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5",
                lac.radio,
                lac.mcc,
                lac.mnc,
                lac.lac,
                CELLID_LAC,
            )
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(removed)
}

/// Delete the given cell stations as a standalone task, then repair each affected LAC's
/// sibling count.
pub async fn remove_cell(pool: &PgPool, metrics: &dyn Metrics, keys: &[CellKey]) -> TaskResult<u64> {
    run_task("remove_cell", metrics, 0, || async {
        let mut tx = pool.begin().await?;
        let removed = remove_cell_in(&mut tx, keys).await?;
        tx.commit().await?;
        Ok(removed)
    })
    .await
}
