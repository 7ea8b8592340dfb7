//! A single upstream DNS endpoint.
//!
//! `Proxy` exchanges raw DNS messages with one upstream over UDP, TCP or
//! TLS. Stream connections are kept in a small idle cache and reused until
//! they expire; a reused connection that the peer has meanwhile closed
//! surfaces as [`UpstreamError::CachedClosed`] so callers can retry
//! immediately on a fresh connection.
//!
//! Health state is a consecutive-failure counter: `down(max_fails)` reports
//! the proxy unhealthy once the counter reaches the threshold, and
//! `healthcheck` spawns a background probe that resets the counter on
//! success.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::error::UpstreamError;
use crate::tls::{TlsClient, TlsOptions};

/// Read timeout for a single exchange attempt.
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Dial timeout for stream connections.
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// Receive buffer for UDP replies (EDNS-sized).
const MAX_UDP_PAYLOAD: usize = 4096;

/// Upstream wire transport, from the configured scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain DNS: UDP, upgraded to TCP by options or truncation handling.
    Dns,
    /// DNS over TLS.
    Tls,
}

/// Per-request connection options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOpts {
    /// Always use TCP (or TLS) even for plain-DNS upstreams.
    pub force_tcp: bool,
    /// Use UDP first; the forward loop flips `force_tcp` on truncation.
    pub prefer_udp: bool,
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type DnsStream = Box<dyn Stream>;

struct Cached {
    stream: DnsStream,
    created_at: Instant,
}

/// One upstream resolver endpoint.
pub struct Proxy {
    addr: String,
    transport: Transport,
    tls: Option<TlsClient>,
    expire: Duration,
    fails: AtomicU32,
    cache: Mutex<Vec<Cached>>,
}

impl Proxy {
    /// Create a proxy for `addr` (`host:port`). TLS transports build their
    /// connector eagerly so certificate problems fail at configuration
    /// time.
    pub fn new(
        addr: impl Into<String>,
        transport: Transport,
        tls_options: Option<&TlsOptions>,
        expire: Duration,
    ) -> Result<Self, UpstreamError> {
        let addr = addr.into();
        if addr.is_empty() {
            return Err(UpstreamError::InvalidAddress(addr));
        }
        let tls = match transport {
            Transport::Tls => {
                let default = TlsOptions::default();
                let options = tls_options.unwrap_or(&default);
                Some(TlsClient::new(options, host_of(&addr))?)
            }
            Transport::Dns => None,
        };
        Ok(Proxy {
            addr,
            transport,
            tls,
            expire,
            fails: AtomicU32::new(0),
            cache: Mutex::new(Vec::new()),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Unhealthy once `max_fails` consecutive probe failures have been
    /// observed. A threshold of zero disables the check.
    pub fn down(&self, max_fails: u32) -> bool {
        max_fails != 0 && self.fails.load(Ordering::Relaxed) >= max_fails
    }

    pub fn fails(&self) -> u32 {
        self.fails.load(Ordering::Relaxed)
    }

    /// Exchange one request with this upstream. The reply is returned
    /// verbatim, including truncation bits; the caller owns retry policy.
    pub async fn connect(
        &self,
        req: &Message,
        opts: ConnectOpts,
    ) -> Result<Message, UpstreamError> {
        match self.transport {
            Transport::Tls => self.exchange_stream(req).await,
            Transport::Dns if opts.force_tcp => self.exchange_stream(req).await,
            Transport::Dns => self.exchange_udp(req).await,
        }
    }

    /// Spawn a background health probe; success resets the failure
    /// counter, failure increments it.
    pub fn healthcheck(self: &Arc<Self>) {
        let proxy = Arc::clone(self);
        tokio::spawn(async move {
            match proxy.probe().await {
                Ok(()) => proxy.fails.store(0, Ordering::Relaxed),
                Err(err) => {
                    proxy.fails.fetch_add(1, Ordering::Relaxed);
                    debug!(addr = %proxy.addr, error = %err, "health probe failed");
                }
            }
        });
    }

    /// Probe with a recursion-desired `. NS` query, bypassing the
    /// connection cache so a dead cached stream cannot mask recovery.
    async fn probe(&self) -> Result<(), UpstreamError> {
        let mut msg = Message::new();
        msg.set_id(rand::random());
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::root(), RecordType::NS));
        match self.transport {
            Transport::Dns => self.exchange_udp(&msg).await.map(drop),
            Transport::Tls => {
                let mut stream = self.dial().await?;
                exchange_on(&mut stream, &msg).await.map(drop)
            }
        }
    }

    async fn exchange_udp(&self, req: &Message) -> Result<Message, UpstreamError> {
        let bind = match self.addr.parse::<std::net::SocketAddr>() {
            Ok(addr) if addr.is_ipv6() => "[::]:0",
            _ => "0.0.0.0:0",
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.addr.as_str()).await?;
        socket.send(&req.to_vec()?).await?;

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let len = timeout(READ_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| UpstreamError::Timeout)??;
        Ok(Message::from_vec(&buf[..len])?)
    }

    async fn exchange_stream(&self, req: &Message) -> Result<Message, UpstreamError> {
        if let Some(mut cached) = self.pop_cached() {
            return match exchange_on(&mut cached.stream, req).await {
                Ok(reply) => {
                    self.push_cached(cached);
                    Ok(reply)
                }
                Err(err) => {
                    debug!(addr = %self.addr, error = %err, "cached connection failed");
                    Err(UpstreamError::CachedClosed)
                }
            };
        }

        let mut stream = self.dial().await?;
        let reply = exchange_on(&mut stream, req).await?;
        self.push_cached(Cached {
            stream,
            created_at: Instant::now(),
        });
        Ok(reply)
    }

    async fn dial(&self) -> Result<DnsStream, UpstreamError> {
        let tcp = timeout(DIAL_TIMEOUT, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| UpstreamError::Timeout)??;
        tcp.set_nodelay(true).ok();
        match &self.tls {
            Some(tls) => {
                let stream = tls
                    .connector
                    .connect(tls.server_name.clone(), tcp)
                    .await
                    .map_err(|e| UpstreamError::Tls(e.to_string()))?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }

    fn pop_cached(&self) -> Option<Cached> {
        let mut cache = self.cache.lock();
        while let Some(cached) = cache.pop() {
            if cached.created_at.elapsed() < self.expire {
                return Some(cached);
            }
            // Expired; drop and keep looking.
        }
        None
    }

    fn push_cached(&self, cached: Cached) {
        if self.expire.is_zero() {
            return;
        }
        self.cache.lock().push(cached);
    }

    /// Idle cached connections (for introspection and tests).
    pub fn cached_connections(&self) -> usize {
        self.cache.lock().len()
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("addr", &self.addr)
            .field("transport", &self.transport)
            .field("fails", &self.fails())
            .finish_non_exhaustive()
    }
}

/// One length-prefixed exchange on an established stream.
async fn exchange_on(stream: &mut DnsStream, req: &Message) -> Result<Message, UpstreamError> {
    let body = req.to_vec()?;
    timeout(READ_TIMEOUT, async {
        stream.write_all(&(body.len() as u16).to_be_bytes()).await?;
        stream.write_all(&body).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let mut reply = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut reply).await?;
        Ok(Message::from_vec(&reply)?)
    })
    .await
    .map_err(|_| UpstreamError::Timeout)?
}

/// Host part of a `host:port` address, brackets stripped.
fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}
