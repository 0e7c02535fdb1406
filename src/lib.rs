pub mod api;
pub mod backfill;
pub mod gap;
pub mod health;
pub mod logging;
pub mod series;
pub mod status;
pub mod store;
