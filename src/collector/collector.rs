//! One scrape of one memcached server.
//!
//! `collect()` runs the whole state machine synchronously:
//!
//! ```text
//! Idle -> Connecting -> Querying(cmd) -> Parsing(cmd) -> ... -> Done(outcome)
//!              |               |
//!              +---------------+--> Done(Failure) on connect error or timeout
//! ```
//!
//! Target-side problems never escape as errors; they end up as `up = 0`
//! in the snapshot. A command the server rejects only loses its own
//! samples.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::mapper::{MetricDescriptor, MetricMapper};
use super::parser::{parse_line, split_key};
use super::protocol::{ProtocolClient, StatsCommand};
use super::transport::Connection;
use crate::config::TargetConfig;
use crate::model::ScrapeSnapshot;

/// How a scrape ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Success,
    Failure,
}

/// Where a scrape is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    Connecting,
    Querying(StatsCommand),
    Parsing(StatsCommand),
    Done(ScrapeOutcome),
}

/// Per-scrape working state. Never outlives one `collect()` call.
struct Scrape {
    state: ScrapeState,
    snapshot: ScrapeSnapshot,
    skipped_lines: usize,
    unknown_stats: usize,
    failed_commands: usize,
}

impl Scrape {
    fn new() -> Self {
        Self {
            state: ScrapeState::Idle,
            snapshot: ScrapeSnapshot::new(),
            skipped_lines: 0,
            unknown_stats: 0,
            failed_commands: 0,
        }
    }

    fn transition(&mut self, next: ScrapeState) {
        trace!(from = ?self.state, to = ?next, "scrape state");
        self.state = next;
    }

    fn done(&mut self, outcome: ScrapeOutcome) -> ScrapeOutcome {
        self.transition(ScrapeState::Done(outcome));
        outcome
    }
}

/// Scrapes one memcached target into a [`ScrapeSnapshot`].
///
/// Holds only read-only state, so one instance can serve any number of
/// concurrent `collect()` calls; each opens its own connection.
#[derive(Debug, Clone)]
pub struct MemcachedCollector {
    target: TargetConfig,
    mapper: Arc<MetricMapper>,
}

impl MemcachedCollector {
    pub fn new(target: TargetConfig, mapper: Arc<MetricMapper>) -> Self {
        Self { target, mapper }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub fn mapper(&self) -> &MetricMapper {
        &self.mapper
    }

    /// The metrics a scrape can produce.
    pub fn describe(&self) -> &[MetricDescriptor] {
        self.mapper.describe()
    }

    /// Runs one full scrape.
    pub fn collect(&self) -> ScrapeSnapshot {
        let started = Instant::now();
        let mut scrape = Scrape::new();

        let outcome = self.run(&mut scrape, started + self.target.timeout);
        let elapsed = started.elapsed();

        debug!(
            address = %self.target.address,
            ?outcome,
            samples = scrape.snapshot.len(),
            skipped_lines = scrape.skipped_lines,
            unknown_stats = scrape.unknown_stats,
            failed_commands = scrape.failed_commands,
            elapsed_ms = elapsed.as_millis() as u64,
            "scrape finished"
        );

        scrape.snapshot.finish(
            outcome == ScrapeOutcome::Success,
            elapsed,
            &self.mapper.up_descriptor().name,
            &self.mapper.scrape_duration_descriptor().name,
        )
    }

    /// The connection lives in this frame only, so it is closed on every
    /// return path.
    fn run(&self, scrape: &mut Scrape, deadline: Instant) -> ScrapeOutcome {
        scrape.transition(ScrapeState::Connecting);

        let connection =
            match Connection::open(&self.target.address, deadline, self.target.tls.as_ref()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(address = %self.target.address, error = %e, "failed to connect to memcached");
                    return scrape.done(ScrapeOutcome::Failure);
                }
            };
        let mut client = ProtocolClient::new(connection);

        for &command in &self.target.commands {
            scrape.transition(ScrapeState::Querying(command));

            match client.query(command) {
                Ok(lines) => {
                    scrape.transition(ScrapeState::Parsing(command));
                    self.ingest(command, &lines, scrape);
                }
                Err(e) if e.is_fatal() => {
                    warn!(
                        address = %self.target.address,
                        error = %e,
                        "memcached stopped responding, abandoning scrape"
                    );
                    return scrape.done(ScrapeOutcome::Failure);
                }
                Err(e) => {
                    scrape.failed_commands += 1;
                    warn!(address = %self.target.address, error = %e, "memcached rejected stats command");
                }
            }
        }

        scrape.done(ScrapeOutcome::Success)
    }

    fn ingest(&self, command: StatsCommand, lines: &[String], scrape: &mut Scrape) {
        for line in lines {
            let entry = match parse_line(line) {
                Ok(entry) => entry,
                Err(e) => {
                    scrape.skipped_lines += 1;
                    debug!(%command, error = %e, "skipping malformed stats line");
                    continue;
                }
            };

            let stat = split_key(command, entry);
            match self.mapper.map(command, &stat) {
                Ok(Some(mapped)) => {
                    scrape
                        .snapshot
                        .insert(&mapped.descriptor.name, mapped.sample);
                }
                Ok(None) => scrape.unknown_stats += 1,
                Err(e) => {
                    scrape.skipped_lines += 1;
                    debug!(%command, error = %e, "skipping stat");
                }
            }
        }
    }
}
