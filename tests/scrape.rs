//! End-to-end scrapes against the in-process mock server.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use memcached_exporter::collector::mock::{MockServer, Reply, typical_reply};
use memcached_exporter::collector::{MemcachedCollector, MetricMapper, StatsCommand};
use memcached_exporter::config::{TargetConfig, TlsFiles};
use memcached_exporter::model::ScrapeSnapshot;
use memcached_exporter::registry::{Exporter, build_registry};
use prometheus::core::Collector;
use prometheus::{Encoder, TextEncoder};

const DURATION: &str = "memcached_scrape_duration_seconds";

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/tls")
        .join(name)
}

fn acceptor() -> native_tls::TlsAcceptor {
    let identity = native_tls::Identity::from_pkcs8(
        &std::fs::read(fixture("server.crt")).unwrap(),
        &std::fs::read(fixture("server.key")).unwrap(),
    )
    .unwrap();
    native_tls::TlsAcceptor::new(identity).unwrap()
}

fn tls_collector(address: &str, files: TlsFiles) -> MemcachedCollector {
    let tls = files.load(address).unwrap();
    let target = TargetConfig::new(address, Duration::from_secs(2))
        .unwrap()
        .with_tls(tls);
    MemcachedCollector::new(target, Arc::new(MetricMapper::memcached().unwrap()))
}

fn collector(address: &str, timeout: Duration) -> MemcachedCollector {
    let target = TargetConfig::new(address, timeout).unwrap();
    MemcachedCollector::new(target, Arc::new(MetricMapper::memcached().unwrap()))
}

/// Flattens a snapshot into `(name, labels, value)` tuples, timing excluded.
fn tuples(snapshot: &ScrapeSnapshot) -> Vec<(String, Vec<String>, f64)> {
    snapshot
        .without_timing(DURATION)
        .families()
        .flat_map(|(name, samples)| {
            samples
                .iter()
                .map(move |s| (name.to_string(), s.label_values.clone(), s.value))
        })
        .collect()
}

fn expected(rows: &[(&str, &[&str], f64)]) -> Vec<(String, Vec<String>, f64)> {
    rows.iter()
        .map(|(name, labels, value)| {
            (
                name.to_string(),
                labels.iter().map(|l| l.to_string()).collect(),
                *value,
            )
        })
        .collect()
}

fn mixed_fixture(_: usize, command: &str) -> Reply {
    match command {
        "stats" => Reply::stats(
            "STAT uptime 3600\n\
             STAT curr_connections 10\n\
             STAT get_hits 450\n\
             STAT version 1.6.21",
        ),
        "stats items" => Reply::stats(
            "STAT items:1:number 30\n\
             STAT items:5:number 12\n\
             STAT items:1:evicted 0",
        ),
        "stats slabs" => Reply::stats(
            "STAT 1:chunk_size 96\n\
             STAT 1:get_hits 400\n\
             STAT total_malloced 2097152",
        ),
        _ => Reply::stats(""),
    }
}

#[test]
fn test_fixture_decodes_to_exact_samples() {
    let server = MockServer::start(mixed_fixture).unwrap();
    let snapshot = collector(&server.address(), Duration::from_secs(2)).collect();

    assert!(snapshot.up);
    assert_eq!(
        tuples(&snapshot),
        expected(&[
            ("memcached_commands_total", &["get", "hit"], 450.0),
            ("memcached_current_connections", &[], 10.0),
            ("memcached_malloced_bytes", &[], 2097152.0),
            ("memcached_slab_chunk_size_bytes", &["1"], 96.0),
            ("memcached_slab_commands_total", &["1", "get", "hit"], 400.0),
            ("memcached_slab_current_items", &["1"], 30.0),
            ("memcached_slab_current_items", &["5"], 12.0),
            ("memcached_slab_items_evicted_total", &["1"], 0.0),
            ("memcached_up", &[], 1.0),
            ("memcached_uptime_seconds", &[], 3600.0),
            ("memcached_version", &["1.6.21"], 1.0),
        ])
    );
}

#[test]
fn test_unknown_keys_do_not_change_known_samples() {
    let clean = MockServer::start(mixed_fixture).unwrap();
    let noisy = MockServer::start(|index, command| match command {
        "stats" => Reply::stats(
            "STAT some_future_counter 77\n\
             STAT uptime 3600\n\
             STAT curr_connections 10\n\
             STAT weird:key:shape:here 1\n\
             STAT get_hits 450\n\
             STAT version 1.6.21\n\
             STAT extstore_unknown_thing 5",
        ),
        "stats items" => Reply::stats(
            "STAT items:1:number 30\n\
             STAT items:1:some_new_field 9\n\
             STAT items:5:number 12\n\
             STAT items:1:evicted 0",
        ),
        other => mixed_fixture(index, other),
    })
    .unwrap();

    let a = collector(&clean.address(), Duration::from_secs(2)).collect();
    let b = collector(&noisy.address(), Duration::from_secs(2)).collect();
    assert!(b.up);
    assert_eq!(tuples(&a), tuples(&b));
}

#[test]
fn test_error_line_yields_no_samples_for_that_command() {
    for error in ["ERROR", "CLIENT_ERROR bad command line format", "SERVER_ERROR out of memory"] {
        let server = MockServer::start(move |_, command| match command {
            "stats slabs" => Reply::error(error),
            other => typical_reply(other),
        })
        .unwrap();

        let snapshot = collector(&server.address(), Duration::from_secs(2)).collect();
        assert!(snapshot.up, "{error}");
        assert!(snapshot.samples("memcached_slab_chunk_size_bytes").is_empty());
        assert!(snapshot.samples("memcached_malloced_bytes").is_empty());
        // Commands after the rejected one still ran on the same connection.
        assert_eq!(snapshot.value("memcached_current_connections", &[]), Some(10.0));
        assert_eq!(snapshot.value("memcached_slab_current_items", &["1"]), Some(30.0));
    }
}

#[test]
fn test_unsupported_conns_keeps_scrape_up() {
    let server = MockServer::unsupported_conns().unwrap();
    let target = TargetConfig::new(server.address(), Duration::from_secs(2))
        .unwrap()
        .with_conns(true);
    let c = MemcachedCollector::new(target, Arc::new(MetricMapper::memcached().unwrap()));

    let snapshot = c.collect();
    assert!(snapshot.up);
    assert!(snapshot.samples("memcached_connection_state").is_empty());
    assert_eq!(snapshot.value("memcached_current_connections", &[]), Some(10.0));
}

#[test]
fn test_stalled_server_is_bounded_by_timeout() {
    let server = MockServer::stalled().unwrap();
    let timeout = Duration::from_millis(250);

    let started = Instant::now();
    let snapshot = collector(&server.address(), timeout).collect();
    let elapsed = started.elapsed();

    assert!(!snapshot.up);
    assert_eq!(snapshot.len(), 2);
    assert!(elapsed < timeout + Duration::from_millis(750), "took {elapsed:?}");
    assert!(snapshot.scrape_duration_seconds <= elapsed.as_secs_f64());
}

#[test]
fn test_tls_scrape_verifies_server() {
    let server = MockServer::typical_tls(acceptor()).unwrap();
    let address = format!("localhost:{}", server.address().rsplit_once(':').unwrap().1);
    let files = TlsFiles {
        ca_file: Some(fixture("ca.crt")),
        ..TlsFiles::default()
    };

    let snapshot = tls_collector(&address, files).collect();
    assert!(snapshot.up);
    assert_eq!(snapshot.value("memcached_current_connections", &[]), Some(10.0));
    assert_eq!(snapshot.value("memcached_slab_chunk_size_bytes", &["1"]), Some(96.0));
}

#[test]
fn test_tls_scrape_with_client_identity() {
    let server = MockServer::typical_tls(acceptor()).unwrap();
    let files = TlsFiles {
        cert_file: Some(fixture("server.crt")),
        key_file: Some(fixture("server-pkcs1.key")),
        ca_file: Some(fixture("ca.crt")),
        server_name: Some("localhost".to_string()),
        ..TlsFiles::default()
    };

    let snapshot = tls_collector(&server.address(), files).collect();
    assert!(snapshot.up);
    assert_eq!(snapshot.value("memcached_version", &["1.6.21"]), Some(1.0));
}

#[test]
fn test_tls_scrape_of_plain_server_fails_fast() {
    let server = MockServer::typical().unwrap();
    let files = TlsFiles {
        skip_verify: true,
        ..TlsFiles::default()
    };

    let started = Instant::now();
    let snapshot = tls_collector(&server.address(), files).collect();
    let elapsed = started.elapsed();

    assert!(!snapshot.up);
    assert_eq!(snapshot.len(), 2);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

#[test]
fn test_tls_scrape_rejects_unknown_ca() {
    let server = MockServer::typical_tls(acceptor()).unwrap();
    let files = TlsFiles {
        server_name: Some("localhost".to_string()),
        ..TlsFiles::default()
    };

    let snapshot = tls_collector(&server.address(), files).collect();
    assert!(!snapshot.up);
    assert_eq!(snapshot.len(), 2);
}

#[test]
fn test_concurrent_collects_are_independent() {
    let server = MockServer::per_connection().unwrap();
    let c = Arc::new(collector(&server.address(), Duration::from_secs(2)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let c = Arc::clone(&c);
            thread::spawn(move || c.collect())
        })
        .collect();
    let snapshots: Vec<ScrapeSnapshot> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut seen = Vec::new();
    for snapshot in &snapshots {
        assert!(snapshot.up);
        let n = snapshot.value("memcached_uptime_seconds", &[]).unwrap();
        // Every value in one snapshot comes from the same connection.
        assert_eq!(snapshot.value("memcached_current_connections", &[]), Some(n));
        assert_eq!(snapshot.value("memcached_slab_current_items", &["1"]), Some(n));
        seen.push(n as usize);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert_eq!(server.connections(), 4);
}

#[test]
fn test_every_sample_matches_its_descriptor() {
    let server = MockServer::typical().unwrap();
    let target = TargetConfig::new(server.address(), Duration::from_secs(2))
        .unwrap()
        .with_commands(StatsCommand::ALL.to_vec());
    let c = MemcachedCollector::new(target, Arc::new(MetricMapper::memcached().unwrap()));

    let mut names: Vec<&str> = c.describe().iter().map(|d| d.name.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total, "duplicate metric names");

    let snapshot = c.collect();
    assert!(snapshot.up);
    for (name, samples) in snapshot.families() {
        let descriptor = c
            .mapper()
            .descriptor(name)
            .unwrap_or_else(|| panic!("{name} not described"));
        for sample in samples {
            assert_eq!(
                sample.label_values.len(),
                descriptor.label_names.len(),
                "{name} {:?}",
                sample.label_values
            );
        }
    }
}

#[test]
fn test_repeated_scrapes_are_identical() {
    let server = MockServer::typical().unwrap();
    let c = collector(&server.address(), Duration::from_secs(2));

    let first = c.collect();
    let second = c.collect();
    assert_eq!(first.without_timing(DURATION), second.without_timing(DURATION));
    assert_eq!(
        serde_json::to_string(&first.without_timing(DURATION)).unwrap(),
        serde_json::to_string(&second.without_timing(DURATION)).unwrap()
    );
}

#[test]
fn test_exporter_end_to_end() {
    let server = MockServer::typical().unwrap();
    let exporter = Exporter::new(collector(&server.address(), Duration::from_secs(2))).unwrap();
    assert_eq!(exporter.desc().len(), exporter.collector().describe().len());

    let registry = build_registry(collector(&server.address(), Duration::from_secs(2)), None).unwrap();
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buf)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("memcached_up 1\n"));
    assert!(text.contains(r#"memcached_slab_commands_total{command="get",slab="1",status="hit"} 400"#));
    assert!(text.contains("memcached_lru_crawler_enabled 1\n"));
    assert!(text.contains("memcached_exporter_build_info{version="));
}

#[test]
fn test_unreachable_target_does_not_break_endpoint() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let registry = build_registry(
        collector(&format!("127.0.0.1:{port}"), Duration::from_millis(300)),
        None,
    )
    .unwrap();

    let families = registry.gather();
    let up = families
        .iter()
        .find(|f| f.get_name() == "memcached_up")
        .unwrap();
    assert_eq!(up.get_metric()[0].get_gauge().get_value(), 0.0);
    assert!(families.iter().any(|f| f.get_name() == "memcached_exporter_build_info"));
}
