//! Transport layer
//!
//! Binds the serving surfaces: clearnet TCP (optionally TLS) and the
//! anonymity-overlay endpoints supplied by collaborators. Every listener
//! feeds the same request pipeline; the blacklist is enforced at accept
//! time, before any request handling.
//!
//! Each transport runs in its own task under a shared shutdown channel.
//! The first fatal listener error cancels the siblings and is surfaced
//! from [`serve_all`].

pub mod tls;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use axum::Router;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::server::Blacklist;

/// Remote address attached to every served connection.
#[derive(Debug, Clone)]
pub struct RemoteAddr(pub SocketAddr);

impl<'a> Connected<IncomingStream<'a, ServeListener>> for RemoteAddr {
    fn connect_info(stream: IncomingStream<'a, ServeListener>) -> Self {
        RemoteAddr(*stream.remote_addr())
    }
}

/// Unified stream type all listeners produce.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

pub type BoxIo = Box<dyn IoStream>;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP listener that drops blacklisted peers at accept time.
pub struct BlacklistListener {
    inner: TcpListener,
    blacklist: Arc<Blacklist>,
}

impl BlacklistListener {
    pub fn new(inner: TcpListener, blacklist: Arc<Blacklist>) -> Self {
        BlacklistListener { inner, blacklist }
    }

    async fn accept_unblocked(&mut self) -> (TcpStream, SocketAddr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    if self.blacklist.is_blocked(&addr.ip().to_string()) {
                        debug!(peer = %addr, "rejected blacklisted connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    return (stream, addr);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Blacklist listener with a TLS handshake on top.
pub struct TlsListener {
    inner: BlacklistListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(inner: BlacklistListener, config: Arc<ServerConfig>) -> Self {
        TlsListener {
            inner,
            acceptor: TlsAcceptor::from(config),
        }
    }

    async fn accept_tls(&mut self) -> (tokio_rustls::server::TlsStream<TcpStream>, SocketAddr) {
        loop {
            let (stream, addr) = self.inner.accept_unblocked().await;
            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, self.acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => return (tls_stream, addr),
                Ok(Err(e)) => debug!(peer = %addr, error = %e, "TLS handshake failed"),
                Err(_) => debug!(peer = %addr, "TLS handshake timed out"),
            }
        }
    }
}

/// Byte stream handed over by an overlay collaborator.
pub type OverlayStream = BoxIo;

/// Accept half of an established overlay endpoint.
///
/// Implementations report a stable pseudo socket address per remote peer
/// so the peer-to-bundle mapping works the same as on clearnet.
#[async_trait]
pub trait OverlayAccept: Send {
    async fn accept(&mut self) -> io::Result<(OverlayStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Collaborator establishing anonymity-overlay endpoints (garlic
/// destinations, hidden services) with their persisted identity keys.
#[async_trait]
pub trait OverlayTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn listen(&self) -> Result<Box<dyn OverlayAccept>>;
}

/// A bound serving surface.
pub enum ServeListener {
    Tcp(BlacklistListener),
    Tls(TlsListener),
    Overlay(Box<dyn OverlayAccept>),
}

impl Listener for ServeListener {
    type Io = BoxIo;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self {
            ServeListener::Tcp(l) => {
                let (stream, addr) = l.accept_unblocked().await;
                (Box::new(stream), addr)
            }
            ServeListener::Tls(l) => {
                let (stream, addr) = l.accept_tls().await;
                (Box::new(stream), addr)
            }
            ServeListener::Overlay(l) => loop {
                match l.accept().await {
                    Ok(pair) => return pair,
                    Err(e) => {
                        warn!(error = %e, "overlay accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            },
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            ServeListener::Tcp(l) => l.local_addr(),
            ServeListener::Tls(l) => l.inner.local_addr(),
            ServeListener::Overlay(l) => l.local_addr(),
        }
    }
}

/// Bind the clearnet listener.
pub async fn bind_clearnet(addr: &str, blacklist: Arc<Blacklist>) -> Result<ServeListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))?;
    Ok(ServeListener::Tcp(BlacklistListener::new(
        listener, blacklist,
    )))
}

/// Bind the clearnet listener with TLS.
pub async fn bind_clearnet_tls(
    addr: &str,
    blacklist: Arc<Blacklist>,
    config: Arc<ServerConfig>,
) -> Result<ServeListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))?;
    Ok(ServeListener::Tls(TlsListener::new(
        BlacklistListener::new(listener, blacklist),
        config,
    )))
}

/// Establish an overlay endpoint through its collaborator.
pub async fn bind_overlay(transport: &dyn OverlayTransport) -> Result<ServeListener> {
    info!(transport = transport.name(), "registering overlay service, this can take a while");
    let listener = transport.listen().await?;
    Ok(ServeListener::Overlay(listener))
}

/// Serve the router over every bound transport until shutdown.
///
/// The first listener error triggers the shared shutdown and is returned
/// once all transports have stopped.
pub async fn serve_all(
    app: Router,
    listeners: Vec<(&'static str, ServeListener)>,
    shutdown: broadcast::Sender<()>,
) -> Result<()> {
    if listeners.is_empty() {
        return Err(Error::Config("no transports configured".into()));
    }

    let (err_tx, mut err_rx) = mpsc::channel::<Error>(listeners.len());
    let mut handles = Vec::new();

    for (name, listener) in listeners {
        let app = app.clone();
        let shutdown_tx = shutdown.clone();
        let err_tx = err_tx.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_listener(name, listener, app, &shutdown_tx).await {
                error!(transport = name, error = %e, "listener failed");
                let _ = err_tx.try_send(e);
                let _ = shutdown_tx.send(());
            }
        }));
    }
    drop(err_tx);

    for handle in handles {
        let _ = handle.await;
    }

    match err_rx.try_recv() {
        Ok(e) => Err(e),
        Err(_) => Ok(()),
    }
}

async fn run_listener(
    name: &'static str,
    listener: ServeListener,
    app: Router,
    shutdown: &broadcast::Sender<()>,
) -> Result<()> {
    match listener.local_addr() {
        Ok(addr) => info!(transport = name, %addr, "listening"),
        Err(_) => info!(transport = name, "listening"),
    }

    let mut shutdown_rx = shutdown.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<RemoteAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await
    .map_err(|e| Error::Transport(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdb::{AcceptAll, LocalNetDb};
    use crate::reseed::Reseeder;
    use crate::server::{AppState, DefaultUi, RateLimiter, TokenStore};
    use bytes::Bytes;
    use rand::rngs::OsRng;
    use rsa::RsaPrivateKey;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_app(bundles: Vec<Bytes>) -> Router {
        let dir = tempfile::tempdir().unwrap();
        let netdb = LocalNetDb::new(dir.path(), Duration::from_secs(3600), Arc::new(AcceptAll));
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let reseeder = Arc::new(Reseeder::new(netdb, b"test@example.org".to_vec(), key));
        reseeder.install(bundles);

        crate::server::build_router(
            AppState {
                reseeder,
                tokens: Arc::new(TokenStore::new()),
                bundle_limiter: Arc::new(RateLimiter::per_hour(100)),
                web_limiter: Arc::new(RateLimiter::per_hour(100)),
                ui: Arc::new(DefaultUi),
                trust_proxy: false,
            },
            "",
        )
    }

    async fn http_get(stream: &mut (impl AsyncRead + AsyncWrite + Unpin)) -> String {
        stream
            .write_all(
                b"GET /i2pseeds.su3 HTTP/1.1\r\nHost: reseed\r\nUser-Agent: Wget/1.11.4\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_blacklisted_peer_is_dropped_at_accept() {
        let blacklist = Arc::new(Blacklist::new());
        blacklist.block("127.0.0.1");

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let mut listener = ServeListener::Tcp(BlacklistListener::new(tcp, blacklist));

        let accepted = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(500), listener.accept()).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        // the connection is closed before any handler runs
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        // and the accept loop never yielded it
        assert!(accepted.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_clearnet_serves_bundle_end_to_end() {
        let app = test_app(vec![Bytes::from_static(b"clearnet bundle")]);
        let blacklist = Arc::new(Blacklist::new());

        let listener = bind_clearnet("127.0.0.1:0", blacklist).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let server = tokio::spawn(serve_all(
            app,
            vec![("clearnet", listener)],
            shutdown_tx.clone(),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let response = http_get(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("attachment; filename=i2pseeds.su3"));
        assert!(response.ends_with("clearnet bundle"));

        let _ = shutdown_tx.send(());
        server.await.unwrap().unwrap();
    }

    struct DuplexOverlay {
        conns: tokio::sync::mpsc::Receiver<(OverlayStream, SocketAddr)>,
    }

    #[async_trait]
    impl OverlayAccept for DuplexOverlay {
        async fn accept(&mut self) -> io::Result<(OverlayStream, SocketAddr)> {
            self.conns
                .recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "overlay closed"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
    }

    #[tokio::test]
    async fn test_overlay_listener_serves_the_same_pipeline() {
        let app = test_app(vec![Bytes::from_static(b"overlay bundle")]);

        let (conn_tx, conn_rx) = tokio::sync::mpsc::channel(1);
        let (client_half, server_half): (DuplexStream, DuplexStream) = tokio::io::duplex(16 * 1024);
        conn_tx
            .send((
                Box::new(server_half) as OverlayStream,
                "10.11.12.13:4567".parse().unwrap(),
            ))
            .await
            .unwrap();

        let listener = ServeListener::Overlay(Box::new(DuplexOverlay { conns: conn_rx }));

        let (shutdown_tx, _) = broadcast::channel(1);
        let server = tokio::spawn(serve_all(
            app,
            vec![("garlic", listener)],
            shutdown_tx.clone(),
        ));

        let mut client = client_half;
        client
            .write_all(
                b"GET /i2pseeds.su3 HTTP/1.1\r\nHost: reseed\r\nUser-Agent: Wget/1.11.4\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.ends_with(b"overlay bundle") {
                break;
            }
        }
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("overlay bundle"));

        let _ = shutdown_tx.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_all_requires_a_transport() {
        let app = test_app(vec![]);
        let (shutdown_tx, _) = broadcast::channel(1);
        assert!(serve_all(app, Vec::new(), shutdown_tx).await.is_err());
    }
}
