//! Per-station measurement retention trimming (§4.E).
//!
//! The join predicate that ties a station to its measurement rows varies by key shape (a
//! single Wi-Fi BSSID vs. a composite cell key); [`JoinStrategy`] captures that difference so
//! [`trim_excessive_data`] stays generic over both.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;

use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::{CellKey, WifiKey};
use crate::task::run_task;

pub struct TrimParams {
    pub max_measures: i32,
    pub min_age_days: i64,
    pub batch: i64,
}

impl Default for TrimParams {
    fn default() -> Self {
        Self {
            max_measures: 11_000,
            min_age_days: 7,
            batch: 10,
        }
    }
}

/// A station key whose rows can be counted/deleted in the measurement table. All methods take
/// the transaction connection of the caller's single session (§5) rather than a pool.
#[async_trait::async_trait]
pub trait JoinStrategy: Send + Sync {
    type Key: Send + Sync + Clone + std::fmt::Debug;

    /// Stations currently over `max_measures`, most over-quota first.
    async fn candidates(&self, conn: &mut PgConnection, max_measures: i32, batch: i64) -> sqlx::Result<Vec<Self::Key>>;

    /// Count of this station's measurements older than `cutoff`.
    async fn count_old(&self, conn: &mut PgConnection, key: &Self::Key, cutoff: DateTime<Utc>) -> sqlx::Result<i64>;

    /// `(time, id)` of the row at `offset` within the old window, ordered `(time, id)` ascending.
    async fn nth_oldest(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        offset: i64,
    ) -> sqlx::Result<Option<(DateTime<Utc>, i64)>>;

    /// Delete rows for `key` with `time <= keep_time and id < keep_id`, within the old window.
    /// Returns count deleted.
    async fn delete_before(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        keep_time: DateTime<Utc>,
        keep_id: i64,
    ) -> sqlx::Result<u64>;

    /// Subtract `deleted` from the station's counters, clamping `new_measures` to `total_measures`.
    async fn adjust_counters(&self, conn: &mut PgConnection, key: &Self::Key, deleted: i64) -> sqlx::Result<()>;
}

pub struct WifiJoin;

#[async_trait::async_trait]
impl JoinStrategy for WifiJoin {
    type Key = WifiKey;

    async fn candidates(&self, conn: &mut PgConnection, max_measures: i32, batch: i64) -> sqlx::Result<Vec<Self::Key>> {
        let rows = sqlx::query!(
            "select key as \"key: WifiKey\" from wifi where total_measures > $1 limit $2",
            max_measures,
            batch
        )
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|r| r.key).collect())
    }

    async fn count_old(&self, conn: &mut PgConnection, key: &Self::Key, cutoff: DateTime<Utc>) -> sqlx::Result<i64> {
        let row = sqlx::query!(
            "select count(*) as \"count!\" from wifi_measure where key = $1 and created < $2",
            *key,
            cutoff
        )
        .fetch_one(conn)
        .await?;
        Ok(row.count)
    }

    async fn nth_oldest(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        offset: i64,
    ) -> sqlx::Result<Option<(DateTime<Utc>, i64)>> {
        let row = sqlx::query!(
            "select time, id from wifi_measure where key = $1 and created < $2 \
             order by time asc, id asc offset $3 limit 1",
            *key,
            cutoff,
            offset
        )
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|r| (r.time, r.id)))
    }

    async fn delete_before(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        keep_time: DateTime<Utc>,
        keep_id: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query!(
            "delete from wifi_measure where key = $1 and created < $2 \
             and time <= $3 and id < $4",
            *key,
            cutoff,
            keep_time,
            keep_id
        )
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_counters(&self, conn: &mut PgConnection, key: &Self::Key, deleted: i64) -> sqlx::Result<()> {
        sqlx::query!(
            "update wifi set total_measures = total_measures - $2, \
             new_measures = least(new_measures, total_measures - $2) where key = $1",
            *key,
            deleted as i32
        )
        .execute(conn)
        .await?;
        Ok(())
    }
}

pub struct CellJoin;

#[async_trait::async_trait]
impl JoinStrategy for CellJoin {
    type Key = CellKey;

    async fn candidates(&self, conn: &mut PgConnection, max_measures: i32, batch: i64) -> sqlx::Result<Vec<Self::Key>> {
        let rows = sqlx::query!(
            "select radio as \"radio: crate::model::CellRadio\", mcc, mnc, lac, cid \
             from cell where total_measures > $1 limit $2",
            max_measures,
            batch
        )
        .fetch_all(conn)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CellKey {
                radio: r.radio,
                mcc: r.mcc,
                mnc: r.mnc,
                lac: r.lac,
                cid: r.cid,
            })
            .collect())
    }

    async fn count_old(&self, conn: &mut PgConnection, key: &Self::Key, cutoff: DateTime<Utc>) -> sqlx::Result<i64> {
        let row = sqlx::query!(
            "select count(*) as \"count!\" from cell_measure \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5 and created < $6",
            key.radio,
            key.mcc,
            key.mnc,
            key.lac,
            key.cid,
            cutoff
        )
        .fetch_one(conn)
        .await?;
        Ok(row.count)
    }

    async fn nth_oldest(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        offset: i64,
    ) -> sqlx::Result<Option<(DateTime<Utc>, i64)>> {
        let row = sqlx::query!(
            "select time, id from cell_measure \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5 and created < $6 \
             order by time asc, id asc offset $7 limit 1",
            key.radio,
            key.mcc,
            key.mnc,
            key.lac,
            key.cid,
            cutoff,
            offset
        )
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|r| (r.time, r.id)))
    }

    async fn delete_before(
        &self,
        conn: &mut PgConnection,
        key: &Self::Key,
        cutoff: DateTime<Utc>,
        keep_time: DateTime<Utc>,
        keep_id: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query!(
            "delete from cell_measure \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5 and created < $6 \
             and time <= $7 and id < $8",
            key.radio,
            key.mcc,
            key.mnc,
            key.lac,
            key.cid,
            cutoff,
            keep_time,
            keep_id
        )
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_counters(&self, conn: &mut PgConnection, key: &Self::Key, deleted: i64) -> sqlx::Result<()> {
        sqlx::query!(
            "update cell set total_measures = total_measures - $6, \
             new_measures = least(new_measures, total_measures - $6) \
             where radio = $1 and mcc = $2 and mnc = $3 and lac = $4 and cid = $5",
            key.radio,
            key.mcc,
            key.mnc,
            key.lac,
            key.cid,
            deleted as i32
        )
        .execute(conn)
        .await?;
        Ok(())
    }
}

/// Trim over-quota stations for one measurement kind, per §4.E. Returns the number of
/// measurement rows deleted across every candidate in this run. The whole run is one
/// transaction, committed once at the end (§5), so a retried transient failure never
/// re-applies a deletion or counter adjustment already made this attempt.
pub async fn trim_excessive_data<J: JoinStrategy>(
    join: &J,
    pool: &PgPool,
    metrics: &dyn Metrics,
    task_name: &str,
    params: &TrimParams,
) -> TaskResult<i64> {
    run_task(task_name, metrics, 0_i64, || async {
        let mut tx = pool.begin().await?;
        let cutoff = Utc::now() - Duration::days(params.min_age_days);
        let candidates = join.candidates(&mut tx, params.max_measures, params.batch).await?;

        let mut total_deleted = 0_i64;
        for key in candidates {
            let old_count = join.count_old(&mut tx, &key, cutoff).await?;
            if old_count <= params.max_measures as i64 {
                continue;
            }

            let offset = old_count - params.max_measures as i64;
            let Some((keep_time, keep_id)) = join.nth_oldest(&mut tx, &key, cutoff, offset).await? else {
                continue;
            };

            let deleted = join.delete_before(&mut tx, &key, cutoff, keep_time, keep_id).await?;
            if deleted > 0 {
                join.adjust_counters(&mut tx, &key, deleted as i64).await?;
                metrics.incr(&format!("items.dropped.{task_name}"));
                total_deleted += deleted as i64;
                info!(task = task_name, key = ?key, deleted, "trimmed station measurements");
            }
        }

        tx.commit().await?;
        Ok(total_deleted)
    })
    .await
}
