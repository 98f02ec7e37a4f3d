//! Archival reaper (§4.H): verifies an uploaded block's content hash, then deletes its source
//! measurement rows.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::MeasureKind;
use crate::objectstore::ObjectStore;
use crate::task::run_task;

struct UnreapedBlock {
    id: i64,
    start_id: i64,
    end_id: i64,
    s3_key: String,
    archive_sha: String,
}

fn measure_table(kind: MeasureKind) -> &'static str {
    match kind {
        MeasureKind::Cell => "cell_measure",
        MeasureKind::Wifi => "wifi_measure",
    }
}

/// Verify and reap every fully-uploaded, not-yet-reaped block of `kind`.
pub async fn delete_measure_records(
    pool: &PgPool,
    metrics: &dyn Metrics,
    object_store: &Arc<dyn ObjectStore>,
    kind: MeasureKind,
) -> TaskResult<()> {
    let task_name = match kind {
        MeasureKind::Cell => "delete_cellmeasure_records",
        MeasureKind::Wifi => "delete_wifimeasure_records",
    };

    run_task(task_name, metrics, (), || async {
        let blocks = sqlx::query!(
            "select id, start_id, end_id, s3_key as \"s3_key!\", archive_sha as \"archive_sha!\" \
             from measure_block \
             where measure_type = $1 and s3_key is not null and archive_date is null \
             order by end_id asc",
            kind,
        )
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|r| UnreapedBlock {
            id: r.id,
            start_id: r.start_id,
            end_id: r.end_id,
            s3_key: r.s3_key,
            archive_sha: r.archive_sha,
        })
        .collect::<Vec<_>>();

        for block in blocks {
            let verified = object_store
                .verify_hash(&block.s3_key, &block.archive_sha)
                .await
                .map_err(crate::error::TaskError::Transient)?;

            if !verified {
                warn!(task = task_name, block_id = block.id, s3_key = %block.s3_key, "hash mismatch, deferring reap");
                continue;
            }

            // One transaction per block (§5): the delete and the archive_date stamp commit
            // together, so a retried transient failure never leaves a block half-reaped.
            let mut tx = pool.begin().await?;

            let table = measure_table(kind);
            let delete_sql = format!("delete from {table} where id between $1 and $2");
            sqlx::query(&delete_sql)
                .bind(block.start_id)
                .bind(block.end_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query!(
                "update measure_block set archive_date = now() where id = $1",
                block.id,
            )
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            metrics.incr(&format!("s3.reaped.{task_name}"));
            info!(task = task_name, block_id = block.id, "reaped archived measurements");
        }

        Ok(())
    })
    .await
}
