//! The memcached metric table.
//!
//! Two lists: the metrics this exporter declares, and the routes from a
//! stat (command, key family, base name) to one of them. Names here are
//! unprefixed; the mapper adds the namespace.
//!
//! Stats that appear only in some server versions or build options
//! (extstore, LRU segmentation) are listed anyway: a server that does not
//! emit them simply produces no sample.

use super::mapper::{Conversion, DescriptorSpec, MetricKind, StatMapping};
use super::parser::KeyFamily;
use super::protocol::StatsCommand;

use Conversion::{Flag, Info, Number};
use KeyFamily::{Connection, Plain, SlabClass, SlabItems};
use MetricKind::{Counter, Gauge};
use StatsCommand::{Conns, General, Items, Settings, Slabs};

pub const UP: &str = "up";
pub const SCRAPE_DURATION: &str = "scrape_duration_seconds";

const fn gauge(name: &'static str, help: &'static str) -> DescriptorSpec {
    DescriptorSpec {
        name,
        help,
        kind: Gauge,
        labels: &[],
    }
}

const fn counter(name: &'static str, help: &'static str) -> DescriptorSpec {
    DescriptorSpec {
        name,
        help,
        kind: Counter,
        labels: &[],
    }
}

const fn labeled(spec: DescriptorSpec, labels: &'static [&'static str]) -> DescriptorSpec {
    DescriptorSpec { labels, ..spec }
}

const SLAB: &[&str] = &["slab"];

pub static DESCRIPTORS: &[DescriptorSpec] = &[
    // Scrape meta-metrics.
    gauge(UP, "Could the memcached server be reached."),
    gauge(SCRAPE_DURATION, "Time the last scrape of the memcached server took."),
    // stats
    gauge("uptime_seconds", "Number of seconds since the server started."),
    gauge("time_seconds", "Current UNIX time according to the server."),
    labeled(gauge("version", "The version of this memcached server."), &["version"]),
    counter("process_user_cpu_seconds_total", "Accumulated user time for this process."),
    counter("process_system_cpu_seconds_total", "Accumulated system time for this process."),
    gauge("current_bytes", "Current number of bytes used to store items."),
    gauge("limit_bytes", "Number of bytes this server is allowed to use for storage."),
    gauge("current_items", "Current number of items stored by this instance."),
    counter("items_total", "Total number of items stored during the life of this instance."),
    counter("items_evicted_total", "Total number of valid items removed from cache to free memory for new items."),
    counter("items_reclaimed_total", "Total number of times an entry was stored using memory from an expired entry."),
    counter("items_expired_unfetched_total", "Total number of items expired from LRU that were never touched by get/incr/append/etc."),
    counter("items_evicted_unfetched_total", "Total number of valid items evicted from LRU that were never touched by get/incr/append/etc."),
    counter("read_bytes_total", "Total number of bytes read by this server from network."),
    counter("written_bytes_total", "Total number of bytes sent by this server to network."),
    gauge("current_connections", "Current number of open connections."),
    counter("connections_total", "Total number of connections opened since the server started running."),
    counter("connections_rejected_total", "Total number of connections rejected due to hitting the max_connections limit."),
    counter("connections_yielded_total", "Total number of connections yielded running due to hitting the memcached's -R limit."),
    counter("connections_listener_disabled_total", "Number of times that memcached has hit its connections limit and disabled its listener."),
    gauge("accepting_connections", "The server is currently accepting new connections."),
    labeled(
        counter("commands_total", "Total number of all requests broken down by command (get, set, etc.) and status."),
        &["command", "status"],
    ),
    counter("lru_crawler_starts_total", "Times an LRU crawler was started."),
    counter("lru_crawler_reclaimed_total", "Total items freed by LRU Crawler."),
    counter("lru_crawler_items_checked_total", "Total items examined by LRU Crawler."),
    counter("lru_crawler_moves_to_cold_total", "Total number of items moved from HOT/WARM to COLD LRU."),
    counter("lru_crawler_moves_to_warm_total", "Total number of items moved from COLD to WARM LRU."),
    counter("lru_crawler_moves_within_lru_total", "Total number of items reshuffled within HOT or WARM LRU."),
    counter("direct_reclaims_total", "Times worker threads had to directly pull LRU tails to find memory for a new item."),
    counter("lru_bumps_dropped_total", "Total number of LRU bumps dropped because the bump buffer was full."),
    counter("malloc_failures_total", "Total number of failed memory allocations."),
    // extstore
    counter("extstore_compact_lost_total", "Total number of items lost because they were locked during extstore compaction."),
    counter("extstore_compact_rescued_total", "Total number of items moved to a new page during extstore compaction."),
    counter("extstore_compact_skipped_total", "Total number of items dropped due to expiration or invalidation during extstore compaction."),
    counter("extstore_page_allocs_total", "Total number of times a page was allocated in extstore."),
    counter("extstore_page_evictions_total", "Total number of times a page was evicted from extstore."),
    counter("extstore_page_reclaims_total", "Total number of times an empty extstore page was freed."),
    gauge("extstore_pages_free", "Number of extstore pages not yet containing any items."),
    gauge("extstore_pages_used", "Number of extstore pages containing at least one item."),
    counter("extstore_objects_evicted_total", "Total number of items evicted from extstore to free up space."),
    counter("extstore_objects_read_total", "Total number of items read from extstore."),
    counter("extstore_objects_written_total", "Total number of items written to extstore."),
    gauge("extstore_objects_used", "Number of items stored in extstore."),
    counter("extstore_bytes_evicted_total", "Total number of bytes evicted from extstore to free up space."),
    counter("extstore_bytes_read_total", "Total number of bytes read from extstore."),
    counter("extstore_bytes_written_total", "Total number of bytes written to extstore."),
    gauge("extstore_bytes_used", "Current number of bytes used to store items in extstore."),
    gauge("extstore_bytes_fragmented", "Current number of bytes in extstore pages allocated but not used to store an object."),
    gauge("extstore_bytes_limit", "Number of bytes of external storage allocated for this server."),
    gauge("extstore_io_queue_depth", "Current number of I/O requests queued to extstore."),
    // stats settings
    gauge("max_connections", "Maximum number of clients allowed."),
    gauge("item_max_bytes", "Maximum size of an item."),
    gauge("lru_crawler_enabled", "Whether the LRU crawler is enabled."),
    gauge("lru_crawler_sleep", "Microseconds to sleep between LRU crawls."),
    gauge("lru_crawler_to_crawl", "Max items to crawl per slab per run."),
    gauge("lru_crawler_maintainer_thread", "Split LRU mode and background threads."),
    gauge("lru_crawler_hot_percent", "Percent of slab memory reserved for HOT LRU."),
    gauge("lru_crawler_warm_percent", "Percent of slab memory reserved for WARM LRU."),
    gauge("lru_crawler_hot_max_factor", "Set idle age of HOT LRU to COLD age * this."),
    gauge("lru_crawler_warm_max_factor", "Set idle age of WARM LRU to COLD age * this."),
    // stats items
    labeled(gauge("slab_current_items", "Number of items currently stored in this slab class."), SLAB),
    labeled(gauge("slab_hot_items", "Number of items presently stored in the HOT LRU."), SLAB),
    labeled(gauge("slab_warm_items", "Number of items presently stored in the WARM LRU."), SLAB),
    labeled(gauge("slab_cold_items", "Number of items presently stored in the COLD LRU."), SLAB),
    labeled(gauge("slab_hot_age_seconds", "Age of the oldest item in HOT LRU."), SLAB),
    labeled(gauge("slab_warm_age_seconds", "Age of the oldest item in WARM LRU."), SLAB),
    labeled(gauge("slab_items_age_seconds", "Number of seconds the oldest item has been in the slab class."), SLAB),
    labeled(counter("slab_items_evicted_total", "Total number of times an item had to be evicted from the LRU before it expired."), SLAB),
    labeled(counter("slab_items_evicted_nonzero_total", "Total number of times an item which had an explicit expire time set had to be evicted from the LRU before it expired."), SLAB),
    labeled(gauge("slab_items_evicted_time_seconds", "Seconds since the last access for the most recent item evicted from this class."), SLAB),
    labeled(counter("slab_items_evicted_unfetched_total", "Total number of valid items evicted from LRU which were never touched after being set."), SLAB),
    labeled(counter("slab_items_expired_unfetched_total", "Total number of valid items expired from LRU which were never touched after being set."), SLAB),
    labeled(counter("slab_items_outofmemory_total", "Total number of items for this slab class that have triggered an out of memory error."), SLAB),
    labeled(counter("slab_items_tailrepairs_total", "Total number of times the entries for a particular ID need repairing."), SLAB),
    labeled(counter("slab_items_reclaimed_total", "Total number of items reclaimed."), SLAB),
    labeled(counter("slab_items_crawler_reclaimed_total", "Total number of items freed by the LRU Crawler."), SLAB),
    labeled(counter("slab_items_moves_to_cold_total", "Number of items moved from HOT or WARM into COLD."), SLAB),
    labeled(counter("slab_items_moves_to_warm_total", "Number of items moved from COLD to WARM."), SLAB),
    labeled(counter("slab_items_moves_within_lru_total", "Number of times active items were bumped within HOT or WARM."), SLAB),
    labeled(counter("slab_lru_hits_total", "Number of get_hits to the LRU."), &["slab", "lru"]),
    // stats slabs
    labeled(gauge("slab_chunk_size_bytes", "The amount of space each chunk uses."), SLAB),
    labeled(gauge("slab_chunks_per_page", "How many chunks exist within one page."), SLAB),
    labeled(gauge("slab_current_pages", "Total number of pages allocated to the slab class."), SLAB),
    labeled(gauge("slab_current_chunks", "Total number of chunks allocated to the slab class."), SLAB),
    labeled(gauge("slab_chunks_used", "How many chunks have been allocated to items."), SLAB),
    labeled(gauge("slab_chunks_free", "Chunks not yet allocated to items, or freed via delete."), SLAB),
    labeled(gauge("slab_chunks_free_end", "Number of free chunks at the end of the last allocated page."), SLAB),
    labeled(gauge("slab_mem_requested_bytes", "Number of bytes requested to be stored in this slab."), SLAB),
    labeled(
        counter("slab_commands_total", "Total number of all requests broken down by command (get, set, etc.) and status per slab."),
        &["slab", "command", "status"],
    ),
    gauge("malloced_bytes", "Number of bytes of memory allocated to slab pages."),
    gauge("slabs_active", "Number of slab classes allocated."),
    // stats conns
    labeled(gauge("connection_seconds_since_last_command", "Seconds since the connection last issued a command."), &["fd"]),
    labeled(gauge("connection_state", "Current state of the connection."), &["fd", "state"]),
];

const fn stat(command: StatsCommand, stat: &'static str, metric: &'static str) -> StatMapping {
    StatMapping {
        command,
        family: Plain,
        stat,
        metric,
        fixed_labels: &[],
        conversion: Number,
    }
}

const fn flag(command: StatsCommand, stat: &'static str, metric: &'static str) -> StatMapping {
    StatMapping {
        conversion: Flag,
        ..self::stat(command, stat, metric)
    }
}

/// A general stat feeding `commands_total{command,status}`.
const fn command(stat: &'static str, labels: &'static [&'static str]) -> StatMapping {
    StatMapping {
        fixed_labels: labels,
        ..self::stat(General, stat, "commands_total")
    }
}

const fn item(stat: &'static str, metric: &'static str) -> StatMapping {
    StatMapping {
        family: SlabItems,
        ..self::stat(Items, stat, metric)
    }
}

const fn lru_hits(stat: &'static str, labels: &'static [&'static str]) -> StatMapping {
    StatMapping {
        fixed_labels: labels,
        ..item(stat, "slab_lru_hits_total")
    }
}

const fn slab(stat: &'static str, metric: &'static str) -> StatMapping {
    StatMapping {
        family: SlabClass,
        ..self::stat(Slabs, stat, metric)
    }
}

const fn slab_command(stat: &'static str, labels: &'static [&'static str]) -> StatMapping {
    StatMapping {
        fixed_labels: labels,
        ..slab(stat, "slab_commands_total")
    }
}

const fn conn(stat: &'static str, metric: &'static str, conversion: Conversion) -> StatMapping {
    StatMapping {
        family: Connection,
        conversion,
        ..self::stat(Conns, stat, metric)
    }
}

pub static MAPPINGS: &[StatMapping] = &[
    // stats
    stat(General, "uptime", "uptime_seconds"),
    stat(General, "time", "time_seconds"),
    StatMapping {
        conversion: Info,
        ..stat(General, "version", "version")
    },
    stat(General, "rusage_user", "process_user_cpu_seconds_total"),
    stat(General, "rusage_system", "process_system_cpu_seconds_total"),
    stat(General, "bytes", "current_bytes"),
    stat(General, "limit_maxbytes", "limit_bytes"),
    stat(General, "curr_items", "current_items"),
    stat(General, "total_items", "items_total"),
    stat(General, "evictions", "items_evicted_total"),
    stat(General, "reclaimed", "items_reclaimed_total"),
    stat(General, "expired_unfetched", "items_expired_unfetched_total"),
    stat(General, "evicted_unfetched", "items_evicted_unfetched_total"),
    stat(General, "bytes_read", "read_bytes_total"),
    stat(General, "bytes_written", "written_bytes_total"),
    stat(General, "curr_connections", "current_connections"),
    stat(General, "total_connections", "connections_total"),
    stat(General, "rejected_connections", "connections_rejected_total"),
    stat(General, "conn_yields", "connections_yielded_total"),
    stat(General, "listen_disabled_num", "connections_listener_disabled_total"),
    stat(General, "accepting_conns", "accepting_connections"),
    command("get_hits", &["get", "hit"]),
    command("get_misses", &["get", "miss"]),
    command("get_expired", &["get", "expired"]),
    command("get_flushed", &["get", "flushed"]),
    command("cmd_set", &["set", "hit"]),
    command("cas_hits", &["cas", "hit"]),
    command("cas_misses", &["cas", "miss"]),
    command("cas_badval", &["cas", "badval"]),
    command("incr_hits", &["incr", "hit"]),
    command("incr_misses", &["incr", "miss"]),
    command("decr_hits", &["decr", "hit"]),
    command("decr_misses", &["decr", "miss"]),
    command("delete_hits", &["delete", "hit"]),
    command("delete_misses", &["delete", "miss"]),
    command("touch_hits", &["touch", "hit"]),
    command("touch_misses", &["touch", "miss"]),
    command("cmd_flush", &["flush", "hit"]),
    stat(General, "lru_crawler_starts", "lru_crawler_starts_total"),
    stat(General, "crawler_reclaimed", "lru_crawler_reclaimed_total"),
    stat(General, "crawler_items_checked", "lru_crawler_items_checked_total"),
    stat(General, "moves_to_cold", "lru_crawler_moves_to_cold_total"),
    stat(General, "moves_to_warm", "lru_crawler_moves_to_warm_total"),
    stat(General, "moves_within_lru", "lru_crawler_moves_within_lru_total"),
    stat(General, "direct_reclaims", "direct_reclaims_total"),
    stat(General, "lru_bumps_dropped", "lru_bumps_dropped_total"),
    stat(General, "malloc_fails", "malloc_failures_total"),
    stat(General, "extstore_compact_lost", "extstore_compact_lost_total"),
    stat(General, "extstore_compact_rescues", "extstore_compact_rescued_total"),
    stat(General, "extstore_compact_skipped", "extstore_compact_skipped_total"),
    stat(General, "extstore_page_allocs", "extstore_page_allocs_total"),
    stat(General, "extstore_page_evictions", "extstore_page_evictions_total"),
    stat(General, "extstore_page_reclaims", "extstore_page_reclaims_total"),
    stat(General, "extstore_pages_free", "extstore_pages_free"),
    stat(General, "extstore_pages_used", "extstore_pages_used"),
    stat(General, "extstore_objects_evicted", "extstore_objects_evicted_total"),
    stat(General, "extstore_objects_read", "extstore_objects_read_total"),
    stat(General, "extstore_objects_written", "extstore_objects_written_total"),
    stat(General, "extstore_objects_used", "extstore_objects_used"),
    stat(General, "extstore_bytes_evicted", "extstore_bytes_evicted_total"),
    stat(General, "extstore_bytes_read", "extstore_bytes_read_total"),
    stat(General, "extstore_bytes_written", "extstore_bytes_written_total"),
    stat(General, "extstore_bytes_used", "extstore_bytes_used"),
    stat(General, "extstore_bytes_fragmented", "extstore_bytes_fragmented"),
    stat(General, "extstore_limit_maxbytes", "extstore_bytes_limit"),
    stat(General, "extstore_io_queue", "extstore_io_queue_depth"),
    // stats settings
    stat(Settings, "maxconns", "max_connections"),
    stat(Settings, "item_size_max", "item_max_bytes"),
    flag(Settings, "lru_crawler", "lru_crawler_enabled"),
    stat(Settings, "lru_crawler_sleep", "lru_crawler_sleep"),
    stat(Settings, "lru_crawler_tocrawl", "lru_crawler_to_crawl"),
    flag(Settings, "lru_maintainer_thread", "lru_crawler_maintainer_thread"),
    stat(Settings, "hot_lru_pct", "lru_crawler_hot_percent"),
    stat(Settings, "warm_lru_pct", "lru_crawler_warm_percent"),
    stat(Settings, "hot_max_factor", "lru_crawler_hot_max_factor"),
    stat(Settings, "warm_max_factor", "lru_crawler_warm_max_factor"),
    // stats items
    item("number", "slab_current_items"),
    item("number_hot", "slab_hot_items"),
    item("number_warm", "slab_warm_items"),
    item("number_cold", "slab_cold_items"),
    item("age_hot", "slab_hot_age_seconds"),
    item("age_warm", "slab_warm_age_seconds"),
    item("age", "slab_items_age_seconds"),
    item("evicted", "slab_items_evicted_total"),
    item("evicted_nonzero", "slab_items_evicted_nonzero_total"),
    item("evicted_time", "slab_items_evicted_time_seconds"),
    item("evicted_unfetched", "slab_items_evicted_unfetched_total"),
    item("expired_unfetched", "slab_items_expired_unfetched_total"),
    item("outofmemory", "slab_items_outofmemory_total"),
    item("tailrepairs", "slab_items_tailrepairs_total"),
    item("reclaimed", "slab_items_reclaimed_total"),
    item("crawler_reclaimed", "slab_items_crawler_reclaimed_total"),
    item("moves_to_cold", "slab_items_moves_to_cold_total"),
    item("moves_to_warm", "slab_items_moves_to_warm_total"),
    item("moves_within_lru", "slab_items_moves_within_lru_total"),
    lru_hits("hits_to_hot", &["hot"]),
    lru_hits("hits_to_warm", &["warm"]),
    lru_hits("hits_to_cold", &["cold"]),
    lru_hits("hits_to_temp", &["temporary"]),
    // stats slabs
    slab("chunk_size", "slab_chunk_size_bytes"),
    slab("chunks_per_page", "slab_chunks_per_page"),
    slab("total_pages", "slab_current_pages"),
    slab("total_chunks", "slab_current_chunks"),
    slab("used_chunks", "slab_chunks_used"),
    slab("free_chunks", "slab_chunks_free"),
    slab("free_chunks_end", "slab_chunks_free_end"),
    slab("mem_requested", "slab_mem_requested_bytes"),
    slab_command("get_hits", &["get", "hit"]),
    slab_command("cmd_set", &["set", "hit"]),
    slab_command("delete_hits", &["delete", "hit"]),
    slab_command("incr_hits", &["incr", "hit"]),
    slab_command("decr_hits", &["decr", "hit"]),
    slab_command("cas_hits", &["cas", "hit"]),
    slab_command("cas_badval", &["cas", "badval"]),
    slab_command("touch_hits", &["touch", "hit"]),
    stat(Slabs, "total_malloced", "malloced_bytes"),
    stat(Slabs, "active_slabs", "slabs_active"),
    // stats conns
    conn("secs_since_last_cmd", "connection_seconds_since_last_command", Number),
    conn("state", "connection_state", Info),
];
