//! Plain or TLS stream to the memcached server, bounded by one deadline.
//!
//! The deadline is fixed when the connection is opened and covers the
//! connect, the TLS handshake and every later read and write. Before each
//! I/O call the socket timeouts are re-armed with the time that remains, so
//! a server that accepts and then stalls cannot hold the scrape past it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use native_tls::{HandshakeError, TlsConnector, TlsStream};
use thiserror::Error;
use tracing::{debug, trace};

/// Dial or handshake failure. Fatal for the scrape.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{address} did not resolve to any socket address")]
    NoAddress { address: String },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connect deadline elapsed for {address}")]
    Timeout { address: String },

    #[error("TLS handshake with {address} failed: {message}")]
    Tls { address: String, message: String },
}

/// TLS parameters for the target: a prepared connector plus the name the
/// server certificate is verified against.
#[derive(Clone)]
pub struct TlsParams {
    pub connector: TlsConnector,
    pub server_name: String,
}

impl std::fmt::Debug for TlsParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsParams")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// An open connection to one target. Owned by a single scrape and closed
/// when dropped.
pub struct Connection {
    stream: Stream,
    deadline: Instant,
    address: String,
}

impl Connection {
    /// Opens a connection to `address`, wrapping it in TLS when `tls` is set.
    ///
    /// Name resolution counts against the deadline too. Every resolved
    /// socket address is tried in turn until one accepts or the deadline
    /// runs out.
    pub fn open(
        address: &str,
        deadline: Instant,
        tls: Option<&TlsParams>,
    ) -> Result<Self, ConnectionError> {
        let addrs = match address.parse::<SocketAddr>() {
            Ok(addr) => vec![addr],
            Err(_) => resolve(address, deadline, |name| {
                name.to_socket_addrs().map(Iterator::collect)
            })?,
        };

        if addrs.is_empty() {
            return Err(ConnectionError::NoAddress {
                address: address.to_string(),
            });
        }

        let tcp = connect_any(address, &addrs, deadline)?;

        let stream = match tls {
            None => Stream::Plain(tcp),
            Some(params) => {
                arm(&tcp, deadline).map_err(|_| ConnectionError::Timeout {
                    address: address.to_string(),
                })?;
                let tls_stream = handshake(address, params, tcp)?;
                Stream::Tls(Box::new(tls_stream))
            }
        };

        debug!(address, tls = tls.is_some(), "connected");

        Ok(Self {
            stream,
            deadline,
            address: address.to_string(),
        })
    }

    /// The address this connection was opened for.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn tcp(&self) -> &TcpStream {
        match &self.stream {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref(),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        arm(self.tcp(), self.deadline)?;
        match &mut self.stream {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        arm(self.tcp(), self.deadline)?;
        match &mut self.stream {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        arm(self.tcp(), self.deadline)?;
        match &mut self.stream {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Best effort: the peer may already be gone.
        if let Stream::Tls(s) = &mut self.stream {
            let _ = s.shutdown();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
        trace!(address = %self.address, "connection closed");
    }
}

/// Time left until `deadline`, or `None` once it has passed.
fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
}

/// Sets both socket timeouts to the time left before `deadline`.
fn arm(stream: &TcpStream, deadline: Instant) -> io::Result<()> {
    let left = remaining(deadline)
        .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "scrape deadline elapsed"))?;
    stream.set_read_timeout(Some(left))?;
    stream.set_write_timeout(Some(left))
}

/// Runs `lookup` on a helper thread and waits for it at most until
/// `deadline`. A lookup that outlives the deadline finishes in the
/// background and its result is dropped.
fn resolve<F>(
    address: &str,
    deadline: Instant,
    lookup: F,
) -> Result<Vec<SocketAddr>, ConnectionError>
where
    F: FnOnce(String) -> io::Result<Vec<SocketAddr>> + Send + 'static,
{
    let timeout = || ConnectionError::Timeout {
        address: address.to_string(),
    };
    let left = remaining(deadline).ok_or_else(timeout)?;

    let (tx, rx) = mpsc::channel();
    let name = address.to_string();
    thread::Builder::new()
        .name("memcached-resolve".to_string())
        .spawn(move || {
            let _ = tx.send(lookup(name));
        })
        .map_err(|source| ConnectionError::Resolve {
            address: address.to_string(),
            source,
        })?;

    match rx.recv_timeout(left) {
        Ok(result) => result.map_err(|source| ConnectionError::Resolve {
            address: address.to_string(),
            source,
        }),
        Err(RecvTimeoutError::Timeout) => {
            debug!(address, "name resolution outlived the scrape deadline");
            Err(timeout())
        }
        Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Resolve {
            address: address.to_string(),
            source: io::Error::other("resolver thread exited without a result"),
        }),
    }
}

fn connect_any(
    address: &str,
    addrs: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, ConnectionError> {
    let mut last_error = None;

    for addr in addrs {
        let Some(left) = remaining(deadline) else {
            break;
        };
        match TcpStream::connect_timeout(addr, left) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                trace!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Err(ConnectionError::Connect {
                address: address.to_string(),
                source: e,
            })
        }
        _ => Err(ConnectionError::Timeout {
            address: address.to_string(),
        }),
    }
}

fn handshake(
    address: &str,
    params: &TlsParams,
    tcp: TcpStream,
) -> Result<TlsStream<TcpStream>, ConnectionError> {
    params
        .connector
        .connect(&params.server_name, tcp)
        .map_err(|e| ConnectionError::Tls {
            address: address.to_string(),
            message: match e {
                HandshakeError::Failure(err) => err.to_string(),
                // Socket timeouts surface as an interrupted handshake.
                HandshakeError::WouldBlock(_) => "handshake timed out".to_string(),
            },
        })
}
