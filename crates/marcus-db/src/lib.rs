//! Persistence layer: connection pool management, runtime migrations, and
//! hand-written SQL query modules for every Marcus table. No business logic
//! lives here — that's `marcus-core`'s job.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
