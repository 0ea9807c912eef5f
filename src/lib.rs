//! memcached_exporter - Prometheus exporter for memcached statistics.
//!
//! This library provides the pieces the `memcached_exporter` binary is
//! assembled from:
//! - `collector` - memcached protocol client and stat-to-metric mapping
//! - `model` - the per-scrape snapshot
//! - `registry` - Prometheus registry bridge

pub mod collector;
pub mod config;
pub mod model;
pub mod registry;
pub mod util;

/// Exporter version, reported by `memcached_exporter_build_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
