//! Catalog classification sync
//!
//! Keeps the customs (HS) classification of every catalog item synchronized
//! with a remote classification service. Work is scheduled on a Redis-backed
//! job queue and processed by the `worker` binary; the admin server exposes
//! the on/off toggle, sync status and the catalog-edit hook.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
