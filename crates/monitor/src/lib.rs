//! Campaign generation monitor.
//!
//! Watches a directory of campaign briefs, drives generation through a
//! bounded worker pool, tracks variant output against each brief, and raises
//! deduplicated, escalating alerts with a full context object for the
//! notification channel. A small HTTP surface exposes status and lets
//! operators cancel campaigns and resolve alerts.

pub mod alerts;
pub mod background;
pub mod breaker;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod watcher;
