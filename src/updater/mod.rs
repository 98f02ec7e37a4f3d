//! Station updater (§4.C): drives the aggregator for live and backfilled measurement batches,
//! touches the enclosing LAC for cells, and hands moving stations off to [`remove`].

pub mod backfill;
pub mod live;
pub mod remove;

pub use live::{cell_location_update, wifi_location_update, LiveParams, UpdateOutcome};
