//! Parsers for memcached `stats` replies.
//!
//! These are pure functions over reply lines. A reply line has the shape
//! `STAT <key> <value>`; keys of the sub-reports embed a slab class or a
//! connection descriptor, which [`split_key`] factors out as a label value.

use thiserror::Error;

use super::protocol::StatsCommand;

/// Error type for parsing failures.
///
/// Always local to one line or one sample: the caller logs and skips it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error: {message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// One raw line of a stats reply, before key splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatEntry {
    pub key: String,
    pub raw_value: String,
}

/// A stat with the embedded identifiers split out of its key.
///
/// `label_values` is empty for plain keys. The value is still text; numeric
/// coercion is left to the mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStat {
    pub family: KeyFamily,
    pub base_name: String,
    pub label_values: Vec<String>,
    pub value: String,
}

/// Shape of a stat key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyFamily {
    /// `uptime`, `total_malloced`, ...
    Plain,
    /// `items:<slab>:<field>` from `stats items`.
    SlabItems,
    /// `<slab>:<field>` from `stats slabs`.
    SlabClass,
    /// `<fd>:<field>` from `stats conns`.
    Connection,
}

impl KeyFamily {
    /// Label names carried by keys of this family, in key order.
    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            KeyFamily::Plain => &[],
            KeyFamily::SlabItems | KeyFamily::SlabClass => &["slab"],
            KeyFamily::Connection => &["fd"],
        }
    }
}

/// Parses one `STAT <key> <value>` line.
///
/// The value is everything after the key, so values containing spaces are
/// kept whole.
pub fn parse_line(line: &str) -> Result<StatEntry, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line
        .strip_prefix("STAT ")
        .ok_or_else(|| ParseError::new(format!("expected 'STAT <key> <value>', got {line:?}")))?;

    let (key, value) = rest
        .split_once(' ')
        .ok_or_else(|| ParseError::new(format!("missing value in {line:?}")))?;

    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return Err(ParseError::new(format!("empty key or value in {line:?}")));
    }

    Ok(StatEntry {
        key: key.to_string(),
        raw_value: value.to_string(),
    })
}

/// Splits the embedded identifier out of a key according to the families
/// `command` is known to emit.
///
/// Keys that match none of them fall back to [`KeyFamily::Plain`] with the
/// whole key as base name, so unknown shapes end up excluded by the mapper
/// instead of failing here.
pub fn split_key(command: StatsCommand, entry: StatEntry) -> ParsedStat {
    let StatEntry { key, raw_value } = entry;

    let composite = match command {
        StatsCommand::Items => split_items_key(&key).map(|(id, field)| (KeyFamily::SlabItems, id, field)),
        StatsCommand::Slabs => split_indexed_key(&key).map(|(id, field)| (KeyFamily::SlabClass, id, field)),
        StatsCommand::Conns => split_indexed_key(&key).map(|(id, field)| (KeyFamily::Connection, id, field)),
        StatsCommand::General | StatsCommand::Settings => None,
    };

    match composite {
        Some((family, id, field)) => ParsedStat {
            family,
            base_name: field.to_string(),
            label_values: vec![id.to_string()],
            value: raw_value,
        },
        None => ParsedStat {
            family: KeyFamily::Plain,
            base_name: key,
            label_values: Vec::new(),
            value: raw_value,
        },
    }
}

/// `items:<digits>:<field>`
fn split_items_key(key: &str) -> Option<(&str, &str)> {
    split_indexed_key(key.strip_prefix("items:")?)
}

/// `<digits>:<field>`
fn split_indexed_key(key: &str) -> Option<(&str, &str)> {
    let (id, field) = key.split_once(':')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) || field.is_empty() {
        return None;
    }
    Some((id, field))
}
