//! `memcached_exporter_build_info`: constant 1, labeled with the version.

use prometheus::{IntGauge, Opts};

pub const BUILD_INFO: &str = "memcached_exporter_build_info";

pub fn build_info() -> prometheus::Result<IntGauge> {
    let opts = Opts::new(
        BUILD_INFO,
        "A metric with a constant '1' value labeled by the exporter version.",
    )
    .const_label("version", crate::VERSION);
    let gauge = IntGauge::with_opts(opts)?;
    gauge.set(1);
    Ok(gauge)
}
