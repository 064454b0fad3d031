//! Core service library for statboard, a player-activity dashboard for game servers.
//!
//! The heart of this crate is the [`caching`] module: an asynchronous, disk-persisted,
//! staleness-aware cache for the JSON snapshots that back the web dashboard. Computing a
//! snapshot means running expensive database aggregation, so snapshots are persisted to
//! disk, served slightly stale while a refresh runs in the background, and regenerated at
//! most once concurrently per identifier.
//!
//! The HTTP layer, the database aggregation itself, and the gameplay event listeners live
//! outside of this crate; they only interact with the caching engine through the
//! [`caching::Resolver`] and [`caching::ResponseCache`] entry points.

pub mod caching;
pub mod config;
pub mod logging;
pub mod metrics;
mod utils;
