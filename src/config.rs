//! Models and functionality to work with the config file.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_min_new() -> i32 {
    10
}
fn default_max_new() -> i32 {
    100
}
fn default_batch() -> i64 {
    10
}
fn default_max_measures() -> i32 {
    11_000
}
fn default_min_age_days() -> i64 {
    7
}
fn default_lac_scan_batch() -> i64 {
    100
}
fn default_archive_batch_size() -> i64 {
    100_000
}

/// Rust representation of the configuration.
#[derive(Deserialize)]
pub struct Config {
    /// URL of the database.
    pub database_url: String,

    /// Bucket/container name the object store writes archives into.
    pub archive_bucket: String,

    /// Number of measurement ids carved into one archival block.
    #[serde(default = "default_archive_batch_size")]
    pub archive_batch_size: i64,

    /// Lower bound of `new_measures` a station must reach before a live update considers it.
    #[serde(default = "default_min_new")]
    pub min_new: i32,

    /// Upper bound of `new_measures` a single live update run will drain per station.
    #[serde(default = "default_max_new")]
    pub max_new: i32,

    /// Number of stations a single updater/trimmer/scan run picks up.
    #[serde(default = "default_batch")]
    pub batch: i64,

    /// Measurement count above which a station becomes a trimming candidate.
    #[serde(default = "default_max_measures")]
    pub max_measures: i32,

    /// Trimming never touches measurements younger than this, in days.
    #[serde(default = "default_min_age_days")]
    pub min_age_days: i64,

    /// Number of dirty LAC rows a single `scan_lacs` run enqueues.
    #[serde(default = "default_lac_scan_batch")]
    pub lac_scan_batch: i64,
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    let config = toml::from_str(&data).context("Failed to parse config")?;
    Ok(config)
}
