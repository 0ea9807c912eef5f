//! Pre-built memcached scenarios for testing.
//!
//! The canned replies are trimmed captures of a memcached 1.6 server with
//! two slab classes in use.

use std::io;

use super::server::{MockServer, Reply};

const GENERAL: &str = "\
STAT pid 1234
STAT uptime 3600
STAT time 1700000000
STAT version 1.6.21
STAT libevent 2.1.12-stable
STAT pointer_size 64
STAT rusage_user 1.500000
STAT rusage_system 0.250000
STAT max_connections 1024
STAT curr_connections 10
STAT total_connections 120
STAT rejected_connections 0
STAT connection_structures 11
STAT cmd_get 500
STAT cmd_set 200
STAT cmd_flush 1
STAT cmd_touch 3
STAT get_hits 450
STAT get_misses 50
STAT get_expired 5
STAT get_flushed 0
STAT delete_misses 2
STAT delete_hits 8
STAT incr_misses 0
STAT incr_hits 4
STAT decr_misses 1
STAT decr_hits 2
STAT cas_misses 0
STAT cas_hits 6
STAT cas_badval 1
STAT touch_hits 3
STAT touch_misses 0
STAT accepting_conns 1
STAT listen_disabled_num 0
STAT threads 4
STAT conn_yields 0
STAT bytes_read 102400
STAT bytes_written 204800
STAT limit_maxbytes 67108864
STAT bytes 8192
STAT curr_items 42
STAT total_items 210
STAT expired_unfetched 3
STAT evicted_unfetched 0
STAT evictions 0
STAT reclaimed 7
STAT crawler_reclaimed 2
STAT crawler_items_checked 99
STAT lru_crawler_starts 12
STAT moves_to_cold 30
STAT moves_to_warm 4
STAT moves_within_lru 1
STAT direct_reclaims 0
STAT lru_bumps_dropped 0
STAT malloc_fails 0
";

const SETTINGS: &str = "\
STAT maxbytes 67108864
STAT maxconns 1024
STAT tcpport 11211
STAT item_size_max 1048576
STAT lru_crawler yes
STAT lru_crawler_sleep 100
STAT lru_crawler_tocrawl 0
STAT lru_maintainer_thread yes
STAT hot_lru_pct 20
STAT warm_lru_pct 40
STAT hot_max_factor 0.20
STAT warm_max_factor 2.00
STAT domain_socket NULL
";

const ITEMS: &str = "\
STAT items:1:number 30
STAT items:1:number_hot 5
STAT items:1:number_warm 10
STAT items:1:number_cold 15
STAT items:1:age_hot 2
STAT items:1:age_warm 20
STAT items:1:age 300
STAT items:1:evicted 0
STAT items:1:evicted_nonzero 0
STAT items:1:evicted_time 0
STAT items:1:outofmemory 0
STAT items:1:tailrepairs 0
STAT items:1:reclaimed 4
STAT items:1:expired_unfetched 2
STAT items:1:evicted_unfetched 0
STAT items:1:crawler_reclaimed 1
STAT items:1:moves_to_cold 20
STAT items:1:moves_to_warm 3
STAT items:1:moves_within_lru 1
STAT items:1:hits_to_hot 100
STAT items:1:hits_to_warm 50
STAT items:1:hits_to_cold 25
STAT items:1:hits_to_temp 0
STAT items:5:number 12
STAT items:5:age 120
STAT items:5:evicted 1
";

const SLABS: &str = "\
STAT 1:chunk_size 96
STAT 1:chunks_per_page 10922
STAT 1:total_pages 1
STAT 1:total_chunks 10922
STAT 1:used_chunks 30
STAT 1:free_chunks 10892
STAT 1:free_chunks_end 0
STAT 1:get_hits 400
STAT 1:cmd_set 150
STAT 1:delete_hits 6
STAT 1:incr_hits 4
STAT 1:decr_hits 2
STAT 1:cas_hits 6
STAT 1:cas_badval 1
STAT 1:touch_hits 3
STAT 5:chunk_size 240
STAT 5:used_chunks 12
STAT active_slabs 2
STAT total_malloced 2097152
";

const CONNS: &str = "\
STAT 23:addr tcp:127.0.0.1:50312
STAT 23:listen_addr tcp:127.0.0.1:11211
STAT 23:state conn_parse_cmd
STAT 23:secs_since_last_cmd 0
STAT 24:addr tcp:127.0.0.1:50318
STAT 24:listen_addr tcp:127.0.0.1:11211
STAT 24:state conn_waiting
STAT 24:secs_since_last_cmd 12
";

/// Canned reply of a healthy server to `command`.
pub fn typical_reply(command: &str) -> Reply {
    match command {
        "stats" => Reply::stats(GENERAL),
        "stats settings" => Reply::stats(SETTINGS),
        "stats items" => Reply::stats(ITEMS),
        "stats slabs" => Reply::stats(SLABS),
        "stats conns" => Reply::stats(CONNS),
        _ => Reply::error("ERROR"),
    }
}

impl MockServer {
    /// A healthy memcached 1.6 server that supports every stats command.
    pub fn typical() -> io::Result<Self> {
        Self::start(|_, command| typical_reply(command))
    }

    /// The typical server behind TLS.
    pub fn typical_tls(acceptor: native_tls::TlsAcceptor) -> io::Result<Self> {
        Self::start_tls(acceptor, |_, command| typical_reply(command))
    }

    /// Accepts connections but never answers.
    pub fn stalled() -> io::Result<Self> {
        Self::start(|_, _| Reply::Stall)
    }

    /// An older server without `stats conns`.
    pub fn unsupported_conns() -> io::Result<Self> {
        Self::start(|_, command| match command {
            "stats conns" => Reply::error("ERROR"),
            other => typical_reply(other),
        })
    }

    /// Values change with every connection: the n-th connection (from 0)
    /// reports `n + 1` for uptime, connections and slab 1 items.
    pub fn per_connection() -> io::Result<Self> {
        Self::start(|index, command| {
            let n = index + 1;
            match command {
                "stats" => Reply::stats(&format!(
                    "STAT uptime {n}\nSTAT curr_connections {n}\nSTAT version 1.6.21"
                )),
                "stats items" => Reply::stats(&format!("STAT items:1:number {n}")),
                _ => Reply::stats(""),
            }
        })
    }
}
