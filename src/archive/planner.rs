//! Archival planner (§4.F): carves a contiguous prefix of un-archived measurement ids into
//! fixed-size blocks.

use sqlx::PgPool;
use tracing::info;

use crate::error::TaskResult;
use crate::metrics::Metrics;
use crate::model::MeasureKind;
use crate::task::run_task;

/// A planned `[start_id, end_id]` block, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBlock {
    pub start_id: i64,
    pub end_id: i64,
}

/// Compute the blocks a planner run would emit, given the current state. Pure so the boundary
/// math (§8 Law: planner is monotone) can be tested without a database.
pub fn plan_blocks(last_end: Option<i64>, min_table_id: i64, max_table_id: i64, batch_size: i64) -> Vec<PlannedBlock> {
    let min_id = last_end.map(|e| e + 1).unwrap_or(min_table_id);
    if max_table_id < min_id || max_table_id - min_id + 1 < batch_size {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    let mut start = min_id;
    while start + batch_size - 1 <= max_table_id {
        let end = start + batch_size - 1;
        blocks.push(PlannedBlock { start_id: start, end_id: end });
        start = end + 1;
    }
    blocks
}

fn table_name(kind: MeasureKind) -> &'static str {
    match kind {
        MeasureKind::Cell => "cell_measure",
        MeasureKind::Wifi => "wifi_measure",
    }
}

/// Plan and persist new `measure_block` rows for `kind`. Returns the `(start_id, end_id)`
/// pairs created in this run (§6 `schedule_*measure_archival`).
pub async fn schedule_measure_archival(
    pool: &PgPool,
    metrics: &dyn Metrics,
    kind: MeasureKind,
    batch_size: i64,
) -> TaskResult<Vec<(i64, i64)>> {
    let task_name = match kind {
        MeasureKind::Cell => "schedule_cellmeasure_archival",
        MeasureKind::Wifi => "schedule_wifimeasure_archival",
    };

    run_task(task_name, metrics, Vec::new(), || async {
        let mut tx = pool.begin().await?;

        let last_end = sqlx::query!(
            "select max(end_id) as last_end from measure_block where measure_type = $1",
            kind,
        )
        .fetch_one(&mut *tx)
        .await?
        .last_end;

        let table = table_name(kind);
        let bounds_sql = format!("select min(id) as min_id, max(id) as max_id from {table}");
        let bounds = sqlx::query(&bounds_sql).fetch_one(&mut *tx).await?;
        let min_table_id: Option<i64> = sqlx::Row::try_get(&bounds, "min_id").ok();
        let max_table_id: Option<i64> = sqlx::Row::try_get(&bounds, "max_id").ok();

        let (Some(min_table_id), Some(max_table_id)) = (min_table_id, max_table_id) else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let blocks = plan_blocks(last_end, min_table_id, max_table_id, batch_size);
        for block in &blocks {
            sqlx::query!(
                "insert into measure_block (measure_type, start_id, end_id) values ($1, $2, $3)",
                kind,
                block.start_id,
                block.end_id,
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !blocks.is_empty() {
            info!(task = task_name, count = blocks.len(), "planned archival blocks");
        }

        Ok(blocks.into_iter().map(|b| (b.start_id, b.end_id)).collect())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_blocks_below_batch_size() {
        assert_eq!(plan_blocks(None, 1, 500, 1000), Vec::new());
    }

    #[test]
    fn planner_boundary_matches_scenario_4() {
        let blocks = plan_blocks(None, 1, 2500, 1000);
        assert_eq!(
            blocks,
            vec![
                PlannedBlock { start_id: 1, end_id: 1000 },
                PlannedBlock { start_id: 1001, end_id: 2000 },
            ]
        );
    }

    #[test]
    fn planner_resumes_after_last_block() {
        let blocks = plan_blocks(Some(2000), 1, 3500, 1000);
        assert_eq!(blocks, vec![PlannedBlock { start_id: 2001, end_id: 3000 }]);
    }
}
