//! Archival writer (§4.G): zips each un-uploaded block's measurements into a CSV archive,
//! hashes it, and uploads it to the object store.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{Datelike, Utc};
use serde::Serialize;
use sha1::{Digest, Sha1};
use sqlx::PgPool;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::archive::tempdir::ArchiveTempDir;
use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::{CellRadio, MeasureKind};
use crate::objectstore::ObjectStore;
use crate::task::run_task;

#[derive(Debug, Clone, Copy)]
struct PendingBlock {
    id: i64,
    start_id: i64,
    end_id: i64,
}

#[derive(Serialize)]
struct CellMeasureCsvRow {
    id: i64,
    radio: i16,
    mcc: i16,
    mnc: i16,
    lac: i32,
    cid: i64,
    lat: i64,
    lon: i64,
    time: chrono::DateTime<Utc>,
    created: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct WifiMeasureCsvRow {
    id: i64,
    key: String,
    lat: i64,
    lon: i64,
    time: chrono::DateTime<Utc>,
    created: chrono::DateTime<Utc>,
}

async fn schema_version(pool: &PgPool) -> sqlx::Result<String> {
    let row = sqlx::query!("select version from _sqlx_migrations order by version desc limit 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.version.to_string()).unwrap_or_else(|| "0".to_string()))
}

async fn write_cell_csv(pool: &PgPool, start_id: i64, end_id: i64, path: &std::path::Path) -> Result<()> {
    let rows = sqlx::query!(
        "select id, radio as \"radio: CellRadio\", mcc, mnc, lac, cid, lat, lon, time, created \
         from cell_measure where id between $1 and $2 order by id asc",
        start_id,
        end_id,
    )
    .fetch_all(pool)
    .await?;

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(CellMeasureCsvRow {
            id: row.id,
            radio: row.radio as i16,
            mcc: row.mcc,
            mnc: row.mnc,
            lac: row.lac,
            cid: row.cid,
            lat: row.lat,
            lon: row.lon,
            time: row.time,
            created: row.created,
        })?;
    }
    writer.flush()?;
    Ok(())
}

async fn write_wifi_csv(pool: &PgPool, start_id: i64, end_id: i64, path: &std::path::Path) -> Result<()> {
    let rows = sqlx::query!(
        "select id, key as \"key: crate::model::WifiKey\", lat, lon, time, created \
         from wifi_measure where id between $1 and $2 order by id asc",
        start_id,
        end_id,
    )
    .fetch_all(pool)
    .await?;

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(WifiMeasureCsvRow {
            id: row.id,
            key: row.key.to_string(),
            lat: row.lat,
            lon: row.lon,
            time: row.time,
            created: row.created,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn zip_directory(scratch: &ArchiveTempDir, entry_names: &[&str], zip_path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for name in entry_names {
        let contents = std::fs::read(scratch.path().join(name))
            .with_context(|| format!("reading {name} from scratch directory"))?;
        zip.start_file(*name, options)?;
        zip.write_all(&contents)?;
    }
    zip.finish()?;
    Ok(())
}

/// Archive every block of `kind` with no `s3_key` yet, in ascending `end_id` order. Returns
/// the local zip paths that were kept (only when `cleanup_zip` is false).
pub async fn write_measure_s3_backups(
    pool: &PgPool,
    metrics: &dyn Metrics,
    object_store: &Arc<dyn ObjectStore>,
    kind: MeasureKind,
    cleanup_zip: bool,
) -> TaskResult<Vec<PathBuf>> {
    let task_name = match kind {
        MeasureKind::Cell => "write_cellmeasure_s3_backups",
        MeasureKind::Wifi => "write_wifimeasure_s3_backups",
    };

    run_task(task_name, metrics, Vec::new(), || async {
        let blocks = sqlx::query!(
            "select id, start_id, end_id from measure_block \
             where measure_type = $1 and s3_key is null order by end_id asc",
            kind,
        )
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|r| PendingBlock {
            id: r.id,
            start_id: r.start_id,
            end_id: r.end_id,
        })
        .collect::<Vec<_>>();

        let schema_version = schema_version(pool).await?;
        let mut retained = Vec::new();

        for block in blocks {
            let now = Utc::now();
            let prefix = kind.archive_prefix();
            let s3_key = format!(
                "{:04}{:02}/{}_{}_{}.zip",
                now.year(),
                now.month(),
                prefix,
                block.start_id,
                block.end_id
            );

            let scratch = ArchiveTempDir::new().map_err(|e| crate::error::TaskError::Transient(e))?;
            let write_result: Result<()> = async {
                scratch.write_file("alembic_revision.txt", schema_version.as_bytes())?;
                let csv_name = kind.csv_name();
                let csv_path = scratch.path().join(csv_name);
                match kind {
                    MeasureKind::Cell => write_cell_csv(pool, block.start_id, block.end_id, &csv_path).await?,
                    MeasureKind::Wifi => write_wifi_csv(pool, block.start_id, block.end_id, &csv_path).await?,
                }

                let zip_name = format!("{prefix}_{}_{}.zip", block.start_id, block.end_id);
                let zip_path = scratch.path().join(&zip_name);
                zip_directory(&scratch, &["alembic_revision.txt", csv_name], &zip_path)?;
                Ok(())
            }
            .await;

            if let Err(err) = write_result {
                warn!(task = task_name, block_id = block.id, error = %err, "failed building archive");
                continue;
            }

            let zip_name = format!("{prefix}_{}_{}.zip", block.start_id, block.end_id);
            let zip_path = scratch.path().join(&zip_name);
            let zip_bytes = std::fs::read(&zip_path).map_err(|e| crate::error::TaskError::Transient(e.into()))?;
            let archive_sha = format!("{:x}", Sha1::digest(&zip_bytes));

            match object_store.upload(&s3_key, &zip_path).await {
                Ok(_) => {
                    // One transaction per block (§5): the block row is only stamped with its
                    // key/hash once the upload it describes has actually succeeded.
                    let mut tx = pool.begin().await?;
                    sqlx::query!(
                        "update measure_block set s3_key = $1, archive_sha = $2 where id = $3",
                        s3_key,
                        archive_sha,
                        block.id,
                    )
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;

                    metrics.incr(&format!("s3.backup.{task_name}"));
                    info!(task = task_name, block_id = block.id, s3_key = %s3_key, "uploaded archive block");

                    if cleanup_zip {
                        let _ = std::fs::remove_file(&zip_path);
                    } else {
                        retained.push(zip_path);
                    }
                }
                Err(err) => {
                    warn!(task = task_name, block_id = block.id, error = %err, "archive upload failed, will retry later");
                }
            }
        }

        Ok(retained)
    })
    .await
}
