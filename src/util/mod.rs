//! Utility modules for memcached_exporter.

mod duration_parser;
mod private_key;

pub use duration_parser::{DurationParseError, parse_duration};
pub use private_key::{KeyError, pkcs8_pem};
