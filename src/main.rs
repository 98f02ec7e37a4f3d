mod aggregator;
mod config;
mod context;
mod error;
mod geocalc;
mod lac;
mod metrics;
mod model;
mod objectstore;
mod retention;
mod task;
mod updater;

mod archive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::context::Context;
use crate::metrics::NullMetrics;
use crate::model::{CellRadio, MeasureKind};
use crate::objectstore::FilesystemObjectStore;
use crate::retention::{CellJoin, TrimParams, WifiJoin};
use crate::updater::LiveParams;

/// Background aggregation and archival worker for the station database. Each subcommand
/// stands in for one periodically-scheduled task; the scheduler itself is out of scope.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fold pending measurements into cell station estimates.
    CellLocationUpdate,
    /// Fold pending measurements into Wi-Fi station estimates.
    WifiLocationUpdate,
    /// Enqueue a recompute for every dirty virtual LAC row.
    ScanLacs,
    /// Recompute one virtual LAC row from its sibling cells.
    UpdateLac {
        #[arg(value_enum)]
        radio: CliCellRadio,
        mcc: i16,
        mnc: i16,
        lac: i32,
    },
    /// Trim over-quota cell stations' old measurements.
    CellTrimExcessiveData,
    /// Trim over-quota Wi-Fi stations' old measurements.
    WifiTrimExcessiveData,
    /// Carve new archival blocks out of un-archived cell measurements.
    ScheduleCellMeasureArchival,
    /// Carve new archival blocks out of un-archived Wi-Fi measurements.
    ScheduleWifiMeasureArchival,
    /// Zip, hash and upload pending cell measurement archive blocks.
    WriteCellMeasureS3Backups {
        #[arg(long)]
        keep_zip: bool,
    },
    /// Zip, hash and upload pending Wi-Fi measurement archive blocks.
    WriteWifiMeasureS3Backups {
        #[arg(long)]
        keep_zip: bool,
    },
    /// Verify and delete source rows for uploaded cell measurement archive blocks.
    DeleteCellMeasureRecords,
    /// Verify and delete source rows for uploaded Wi-Fi measurement archive blocks.
    DeleteWifiMeasureRecords,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliCellRadio {
    Gsm,
    Wcdma,
    Lte,
    Nr,
}

impl From<CliCellRadio> for CellRadio {
    fn from(value: CliCellRadio) -> Self {
        match value {
            CliCellRadio::Gsm => CellRadio::Gsm,
            CliCellRadio::Wcdma => CellRadio::Wcdma,
            CliCellRadio::Lte => CellRadio::Lte,
            CliCellRadio::Nr => CellRadio::Nr,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = config::load(&cli.config).context("loading config")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!().run(&pool).await.context("running migrations")?;

    let object_store: Arc<dyn objectstore::ObjectStore> =
        Arc::new(FilesystemObjectStore::new(config.archive_bucket.clone()));
    let metrics = Arc::new(NullMetrics);
    let ctx = Context::new(pool, config, metrics, object_store);

    match cli.command {
        Command::CellLocationUpdate => {
            let params = LiveParams {
                min_new: ctx.config.min_new,
                max_new: ctx.config.max_new,
                batch: ctx.config.batch,
            };
            let outcome = updater::cell_location_update(&ctx.pool, &*ctx.metrics, &params).await?;
            info!(?outcome, "cell_location_update done");
        }
        Command::WifiLocationUpdate => {
            let params = LiveParams {
                min_new: ctx.config.min_new,
                max_new: ctx.config.max_new,
                batch: ctx.config.batch,
            };
            let outcome = updater::wifi_location_update(&ctx.pool, &*ctx.metrics, &params).await?;
            info!(?outcome, "wifi_location_update done");
        }
        Command::ScanLacs => {
            let enqueued = lac::scan_lacs(&ctx.pool, &*ctx.metrics, ctx.config.lac_scan_batch).await?;
            info!(enqueued, "scan_lacs done");
        }
        Command::UpdateLac { radio, mcc, mnc, lac } => {
            lac::update_lac(
                &ctx.pool,
                &*ctx.metrics,
                lac::LacId {
                    radio: radio.into(),
                    mcc,
                    mnc,
                    lac,
                },
            )
            .await?;
            info!("update_lac done");
        }
        Command::CellTrimExcessiveData => {
            let params = TrimParams {
                max_measures: ctx.config.max_measures,
                min_age_days: ctx.config.min_age_days,
                batch: ctx.config.batch,
            };
            let deleted =
                retention::trim_excessive_data(&CellJoin, &ctx.pool, &*ctx.metrics, "cell_trim_excessive_data", &params)
                    .await?;
            info!(deleted, "cell_trim_excessive_data done");
        }
        Command::WifiTrimExcessiveData => {
            let params = TrimParams {
                max_measures: ctx.config.max_measures,
                min_age_days: ctx.config.min_age_days,
                batch: ctx.config.batch,
            };
            let deleted =
                retention::trim_excessive_data(&WifiJoin, &ctx.pool, &*ctx.metrics, "wifi_trim_excessive_data", &params)
                    .await?;
            info!(deleted, "wifi_trim_excessive_data done");
        }
        Command::ScheduleCellMeasureArchival => {
            let blocks = archive::schedule_measure_archival(
                &ctx.pool,
                &*ctx.metrics,
                MeasureKind::Cell,
                ctx.config.archive_batch_size,
            )
            .await?;
            info!(count = blocks.len(), "schedule_cellmeasure_archival done");
        }
        Command::ScheduleWifiMeasureArchival => {
            let blocks = archive::schedule_measure_archival(
                &ctx.pool,
                &*ctx.metrics,
                MeasureKind::Wifi,
                ctx.config.archive_batch_size,
            )
            .await?;
            info!(count = blocks.len(), "schedule_wifimeasure_archival done");
        }
        Command::WriteCellMeasureS3Backups { keep_zip } => {
            let retained = archive::write_measure_s3_backups(
                &ctx.pool,
                &*ctx.metrics,
                &ctx.object_store,
                MeasureKind::Cell,
                !keep_zip,
            )
            .await?;
            info!(count = retained.len(), "write_cellmeasure_s3_backups done");
        }
        Command::WriteWifiMeasureS3Backups { keep_zip } => {
            let retained = archive::write_measure_s3_backups(
                &ctx.pool,
                &*ctx.metrics,
                &ctx.object_store,
                MeasureKind::Wifi,
                !keep_zip,
            )
            .await?;
            info!(count = retained.len(), "write_wifimeasure_s3_backups done");
        }
        Command::DeleteCellMeasureRecords => {
            archive::delete_measure_records(&ctx.pool, &*ctx.metrics, &ctx.object_store, MeasureKind::Cell).await?;
            info!("delete_cellmeasure_records done");
        }
        Command::DeleteWifiMeasureRecords => {
            archive::delete_measure_records(&ctx.pool, &*ctx.metrics, &ctx.object_store, MeasureKind::Wifi).await?;
            info!("delete_wifimeasure_records done");
        }
    }

    Ok(())
}
