//! Request/response client for memcached statistics commands.
//!
//! One command per round trip, strictly sequential on one stream. A reply
//! is a run of `STAT` lines closed by `END`; an unsupported command gets a
//! single error line instead.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Reply terminator for stats commands.
const END: &str = "END";

/// Longest reply line accepted, terminator included.
const MAX_LINE: usize = 8 * 1024;

/// Statistics commands the collector knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsCommand {
    /// `stats`
    General,
    /// `stats settings`
    Settings,
    /// `stats items`
    Items,
    /// `stats slabs`
    Slabs,
    /// `stats conns`
    Conns,
}

impl StatsCommand {
    /// All commands, in the order a scrape issues them.
    pub const ALL: [StatsCommand; 5] = [
        StatsCommand::General,
        StatsCommand::Settings,
        StatsCommand::Items,
        StatsCommand::Slabs,
        StatsCommand::Conns,
    ];

    /// The request line, without terminator.
    pub fn as_str(self) -> &'static str {
        match self {
            StatsCommand::General => "stats",
            StatsCommand::Settings => "stats settings",
            StatsCommand::Items => "stats items",
            StatsCommand::Slabs => "stats slabs",
            StatsCommand::Conns => "stats conns",
        }
    }
}

impl fmt::Display for StatsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a command produced no usable reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The server answered with `ERROR`, `CLIENT_ERROR` or `SERVER_ERROR`.
    ServerError,
    /// No terminator before the deadline.
    Timeout,
    /// The stream was closed or broke before the terminator.
    Disconnected,
}

#[derive(Debug, Error)]
#[error("{command}: {kind:?}: {detail}")]
pub struct ProtocolError {
    pub command: StatsCommand,
    pub kind: ProtocolErrorKind,
    pub detail: String,
}

impl ProtocolError {
    /// Whether the stream can no longer be trusted for further commands.
    ///
    /// A server error leaves the stream in sync; a timeout or a broken
    /// stream does not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, ProtocolErrorKind::ServerError)
    }

    fn io(command: StatsCommand, err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ProtocolErrorKind::Timeout,
            _ => ProtocolErrorKind::Disconnected,
        };
        Self {
            command,
            kind,
            detail: err.to_string(),
        }
    }
}

/// Issues stats commands over a stream and collects the reply lines.
pub struct ProtocolClient<S: Read + Write> {
    reader: BufReader<S>,
}

impl<S: Read + Write> ProtocolClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Sends `command` and reads lines until `END` or an error line.
    ///
    /// The returned lines exclude the terminator and are stripped of line
    /// endings. Invalid UTF-8 is replaced rather than rejected; such a line
    /// simply fails to parse later.
    pub fn query(&mut self, command: StatsCommand) -> Result<Vec<String>, ProtocolError> {
        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{}\r\n", command.as_str()).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| ProtocolError::io(command, e))?;

        let mut lines = Vec::new();
        let mut buf = Vec::with_capacity(128);

        loop {
            buf.clear();
            let n = (&mut self.reader)
                .take(MAX_LINE as u64)
                .read_until(b'\n', &mut buf)
                .map_err(|e| ProtocolError::io(command, e))?;

            if n == MAX_LINE && buf.last() != Some(&b'\n') {
                return Err(ProtocolError {
                    command,
                    kind: ProtocolErrorKind::Disconnected,
                    detail: format!("reply line longer than {MAX_LINE} bytes"),
                });
            }

            // EOF, or a partial line with the peer gone.
            if n == 0 || buf.last() != Some(&b'\n') {
                return Err(ProtocolError {
                    command,
                    kind: ProtocolErrorKind::Disconnected,
                    detail: format!("connection closed after {} lines", lines.len()),
                });
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\r', '\n']);

            if line == END {
                trace!(%command, lines = lines.len(), "reply complete");
                return Ok(lines);
            }

            if is_error_line(line) {
                return Err(ProtocolError {
                    command,
                    kind: ProtocolErrorKind::ServerError,
                    detail: line.to_string(),
                });
            }

            lines.push(line.to_string());
        }
    }

    /// Gives the stream back, e.g. to close it explicitly.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn is_error_line(line: &str) -> bool {
    line == "ERROR"
        || line.starts_with("ERROR ")
        || line.starts_with("CLIENT_ERROR")
        || line.starts_with("SERVER_ERROR")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory stream: reads come from a canned reply, writes are captured.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                input: Cursor::new(reply.as_bytes().to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Stream whose reads always time out.
    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"))
        }
    }

    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_query_reads_until_end() {
        let mut client =
            ProtocolClient::new(Scripted::new("STAT pid 1\r\nSTAT uptime 10\r\nEND\r\n"));
        let lines = client.query(StatsCommand::General).unwrap();
        assert_eq!(lines, vec!["STAT pid 1", "STAT uptime 10"]);

        let stream = client.into_inner();
        assert_eq!(stream.written, b"stats\r\n");
    }

    #[test]
    fn test_query_accepts_bare_newlines() {
        let mut client = ProtocolClient::new(Scripted::new("STAT maxconns 1024\nEND\n"));
        let lines = client.query(StatsCommand::Settings).unwrap();
        assert_eq!(lines, vec!["STAT maxconns 1024"]);
    }

    #[test]
    fn test_query_empty_reply() {
        let mut client = ProtocolClient::new(Scripted::new("END\r\n"));
        assert!(client.query(StatsCommand::Items).unwrap().is_empty());
    }

    #[test]
    fn test_sequential_queries_share_stream() {
        let mut client = ProtocolClient::new(Scripted::new(
            "STAT uptime 1\r\nEND\r\nERROR\r\nSTAT 1:chunk_size 96\r\nEND\r\n",
        ));
        assert_eq!(client.query(StatsCommand::General).unwrap().len(), 1);

        let err = client.query(StatsCommand::Conns).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::ServerError);
        assert!(!err.is_fatal());

        assert_eq!(
            client.query(StatsCommand::Slabs).unwrap(),
            vec!["STAT 1:chunk_size 96"]
        );
        assert_eq!(
            client.into_inner().written,
            b"stats\r\nstats conns\r\nstats slabs\r\n"
        );
    }

    #[test]
    fn test_query_server_error_variants() {
        for reply in [
            "ERROR\r\n",
            "CLIENT_ERROR bad command line format\r\n",
            "SERVER_ERROR out of memory\r\n",
        ] {
            let mut client = ProtocolClient::new(Scripted::new(reply));
            let err = client.query(StatsCommand::Conns).unwrap_err();
            assert_eq!(err.kind, ProtocolErrorKind::ServerError, "{reply:?}");
            assert_eq!(err.detail, reply.trim_end());
        }
    }

    #[test]
    fn test_query_error_after_partial_reply() {
        let mut client =
            ProtocolClient::new(Scripted::new("STAT 1:chunk_size 96\r\nSERVER_ERROR busy\r\n"));
        let err = client.query(StatsCommand::Slabs).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::ServerError);
    }

    #[test]
    fn test_query_eof_is_disconnected() {
        let mut client = ProtocolClient::new(Scripted::new("STAT pid 1\r\nSTAT upt"));
        let err = client.query(StatsCommand::General).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Disconnected);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_query_rejects_overlong_line() {
        let reply = format!("STAT pid 1\r\nSTAT junk {}\r\nEND\r\n", "x".repeat(MAX_LINE * 4));
        let mut client = ProtocolClient::new(Scripted::new(&reply));
        let err = client.query(StatsCommand::General).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Disconnected);
        assert!(err.detail.contains("longer than"), "{}", err.detail);

        // A line just under the cap is still accepted.
        let value = "y".repeat(MAX_LINE - "STAT k \r\n".len());
        let reply = format!("STAT k {value}\r\nEND\r\n");
        let mut client = ProtocolClient::new(Scripted::new(&reply));
        assert_eq!(client.query(StatsCommand::General).unwrap().len(), 1);
    }

    #[test]
    fn test_query_timeout() {
        let mut client = ProtocolClient::new(Stalled);
        let err = client.query(StatsCommand::General).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Timeout);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_command_wire_text() {
        let wire: Vec<&str> = StatsCommand::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            wire,
            vec!["stats", "stats settings", "stats items", "stats slabs", "stats conns"]
        );
    }
}
