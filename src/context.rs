//! Process-wide state every task needs, built once in `main` and threaded through by reference.
//! Replaces the ambient singletons (metrics sink, app config, scheduler handle) a Celery-style
//! worker leans on with a plain struct passed by reference (REDESIGN FLAGS §10).

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::objectstore::ObjectStore;

pub struct Context {
    pub pool: PgPool,
    pub config: Config,
    pub metrics: Arc<dyn Metrics>,
    pub object_store: Arc<dyn ObjectStore>,
}

impl Context {
    pub fn new(
        pool: PgPool,
        config: Config,
        metrics: Arc<dyn Metrics>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            pool,
            config,
            metrics,
            object_store,
        }
    }
}
