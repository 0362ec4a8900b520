//! chart-sync library - shared modules for the sync binary.

pub mod assemble;
pub mod cache;
pub mod classify;
pub mod config;
pub mod drive;
pub mod events;
pub mod materialize;
pub mod models;
pub mod names;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod schema;
pub mod storage;
