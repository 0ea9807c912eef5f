//! In-process memcached stand-in for testing collectors without a real
//! server.
//!
//! `MockServer` listens on an ephemeral loopback port and answers each
//! request line through a responder closure, so tests can script normal
//! replies, error lines, stalls and abrupt closes. `start_tls` serves the
//! same script behind a TLS handshake.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use native_tls::TlsAcceptor;
use tracing::trace;

/// Upper bound on how long a mock connection waits for its peer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the server does with one request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write these bytes verbatim.
    Lines(String),
    /// Never answer; hold the connection until the client gives up.
    Stall,
    /// Close the connection without answering.
    Close,
}

impl Reply {
    /// A stats reply: each line of `body` as a `\r\n`-terminated line,
    /// followed by `END`.
    pub fn stats(body: &str) -> Self {
        let mut out = String::with_capacity(body.len() + 8);
        for line in body.lines().filter(|l| !l.is_empty()) {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("END\r\n");
        Reply::Lines(out)
    }

    /// A single error line such as `ERROR` or `SERVER_ERROR out of memory`.
    pub fn error(line: &str) -> Self {
        Reply::Lines(format!("{line}\r\n"))
    }
}

type Responder = dyn Fn(usize, &str) -> Reply + Send + Sync;

/// Scripted memcached server on `127.0.0.1`.
///
/// The responder gets the zero-based index of the connection and the
/// request line without its terminator. Shuts down when dropped.
pub struct MockServer {
    address: SocketAddr,
    stop: Arc<AtomicBool>,
    accepted: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start<F>(responder: F) -> io::Result<Self>
    where
        F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(responder), None)
    }

    /// Like [`MockServer::start`], but every connection is accepted through
    /// `acceptor` first.
    pub fn start_tls<F>(acceptor: TlsAcceptor, responder: F) -> io::Result<Self>
    where
        F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(responder), Some(acceptor))
    }

    fn spawn(responder: Arc<Responder>, tls: Option<TlsAcceptor>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let accepted = Arc::new(AtomicUsize::new(0));

        let handle = {
            let stop = Arc::clone(&stop);
            let accepted = Arc::clone(&accepted);
            thread::Builder::new()
                .name("mock-memcached".to_string())
                .spawn(move || {
                    for stream in listener.incoming() {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let Ok(stream) = stream else { continue };
                        let index = accepted.fetch_add(1, Ordering::SeqCst);
                        let responder = Arc::clone(&responder);
                        let tls = tls.clone();
                        thread::spawn(move || {
                            if let Err(e) = accept(stream, tls, index, responder.as_ref()) {
                                trace!(index, error = %e, "mock connection ended");
                            }
                        });
                    }
                })?
        };

        Ok(Self {
            address,
            stop,
            accepted,
            handle: Some(handle),
        })
    }

    /// `host:port` to point a collector at.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.address);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    index: usize,
    responder: &Responder,
) -> io::Result<()> {
    stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
    match tls {
        None => serve(stream, index, responder),
        Some(acceptor) => {
            let stream = acceptor
                .accept(stream)
                .map_err(|e| io::Error::other(format!("TLS accept failed: {e}")))?;
            serve(stream, index, responder)
        }
    }
}

fn serve<S: Read + Write>(stream: S, index: usize, responder: &Responder) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }

        match responder(index, line.trim_end()) {
            Reply::Lines(text) => reader.get_mut().write_all(text.as_bytes())?,
            Reply::Stall => {
                let mut sink = [0u8; 256];
                while reader.read(&mut sink)? > 0 {}
                return Ok(());
            }
            Reply::Close => return Ok(()),
        }
    }
}
