//! memcached statistics collector.
//!
//! This module talks the memcached text protocol, turns `STAT` lines into
//! typed samples and produces one [`ScrapeSnapshot`](crate::model::ScrapeSnapshot)
//! per scrape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MemcachedCollector                       │
//! │  ┌─────────────────────┐   ┌─────────────────────────────┐  │
//! │  │   ProtocolClient    │   │       MetricMapper          │  │
//! │  │  - stats <command>  │   │  - DESCRIPTORS / MAPPINGS   │  │
//! │  │  - STAT ... END     │   │  - number / flag / info     │  │
//! │  └──────────┬──────────┘   └──────────────▲──────────────┘  │
//! │             │                             │                 │
//! │      ┌──────▼──────┐              ┌───────┴───────┐         │
//! │      │ Connection  │              │ parse_line /  │         │
//! │      │ (TCP / TLS) │              │ split_key     │         │
//! │      └──────┬──────┘              └───────────────┘         │
//! └─────────────┼───────────────────────────────────────────────┘
//!               │
//!       ┌───────┴────────┐
//!       │                │
//! ┌─────▼──────┐  ┌──────▼──────┐
//! │ memcached  │  │ MockServer  │
//! │            │  │ (Testing)   │
//! └────────────┘  └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use memcached_exporter::collector::{MemcachedCollector, MetricMapper, MockServer};
//! use memcached_exporter::config::TargetConfig;
//!
//! let server = MockServer::typical().unwrap();
//! let target = TargetConfig::new(server.address(), Duration::from_secs(2)).unwrap();
//! let collector = MemcachedCollector::new(target, Arc::new(MetricMapper::memcached().unwrap()));
//!
//! let snapshot = collector.collect();
//! assert!(snapshot.up);
//! assert_eq!(snapshot.value("memcached_current_connections", &[]), Some(10.0));
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod descriptors;
mod mapper;
pub mod mock;
mod parser;
mod protocol;
mod transport;

pub use collector::{MemcachedCollector, ScrapeOutcome, ScrapeState};
pub use mapper::{
    Conversion, DescriptorSpec, MappedSample, MetricDescriptor, MetricKind, MetricMapper,
    NAMESPACE, StatMapping, TableError,
};
pub use mock::MockServer;
pub use parser::{KeyFamily, ParseError, ParsedStat, StatEntry, parse_line, split_key};
pub use protocol::{ProtocolClient, ProtocolError, ProtocolErrorKind, StatsCommand};
pub use transport::{Connection, ConnectionError, TlsParams};
