//! Archival pipeline (§4.F-H): plan blocks, write them off to the object store, then reap
//! their source rows once the upload is verified.

pub mod planner;
pub mod reaper;
pub mod tempdir;
pub mod writer;

pub use planner::{plan_blocks, schedule_measure_archival, PlannedBlock};
pub use reaper::delete_measure_records;
pub use writer::write_measure_s3_backups;
