//! Byte-stream boundary of the client.
//!
//! The connection runs over any [`Transport`]. The built-in factory opens a TCP
//! socket, wrapped in TLS for `wss` URLs, and callers can hand in their own stream
//! future instead.
use std::{
    io,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};
use url::{Host, Url};

use crate::{Result, WebSocketError};

/// A bidirectional byte stream a WebSocket connection can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can move between tasks,
/// such as [`TcpStream`], a TLS stream or [`tokio::io::DuplexStream`].
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxedTransport = Box<dyn Transport>;

/// How the executor obtains its transport.
pub(crate) enum Connect {
    /// Open a TCP socket to the URL's host, or to `tcp_address` when set.
    Tcp {
        tcp_address: Option<SocketAddr>,
        connector: Option<TlsConnector>,
        no_delay: bool,
    },
    /// Await a caller-supplied stream.
    Stream(BoxFuture<'static, io::Result<BoxedTransport>>),
}

impl Connect {
    pub(crate) async fn open(self, url: &Url) -> Result<BoxedTransport> {
        match self {
            Connect::Stream(future) => Ok(future.await?),
            Connect::Tcp {
                tcp_address,
                connector,
                no_delay,
            } => {
                let host = url.host().ok_or(WebSocketError::MissingHost)?;
                let secure = is_secure(url)?;

                let tcp_stream = if let Some(tcp_address) = tcp_address {
                    TcpStream::connect(tcp_address).await?
                } else {
                    let port = url
                        .port_or_known_default()
                        .ok_or(WebSocketError::InvalidHttpScheme)?;
                    TcpStream::connect(format!("{host}:{port}")).await?
                };

                if let Err(err) = tcp_stream.set_nodelay(no_delay) {
                    log::debug!("setting TCP_NODELAY: {err}");
                }

                if !secure {
                    return Ok(Box::new(tcp_stream));
                }

                let domain = match host {
                    Host::Domain(domain) => ServerName::try_from(domain.to_owned()).map_err(
                        |_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"),
                    )?,
                    Host::Ipv4(ip) => ServerName::from(IpAddr::V4(ip)),
                    Host::Ipv6(ip) => ServerName::from(IpAddr::V6(ip)),
                };

                let connector = match connector {
                    Some(connector) => connector,
                    None => tls_connector()?,
                };

                Ok(Box::new(connector.connect(domain, tcp_stream).await?))
            }
        }
    }
}

/// Returns `true` for `wss` URLs and rejects any scheme other than `ws` and `wss`.
pub(crate) fn is_secure(url: &Url) -> Result<bool> {
    match url.scheme() {
        "ws" => Ok(false),
        "wss" => Ok(true),
        _ => Err(WebSocketError::InvalidHttpScheme),
    }
}

/// Creates a TLS connector trusting the webpki root certificates.
///
/// Uses the process-wide rustls crypto provider when one is installed, and ring
/// otherwise.
pub(crate) fn tls_connector() -> io::Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Returns `true` if the I/O error was raised by the TLS layer.
pub(crate) fn is_tls_error(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
}

/// Read adapter calling `on_read` every time bytes arrive from the inner stream.
#[pin_project]
pub(crate) struct IoTracked<S, F> {
    #[pin]
    inner: S,
    on_read: F,
}

impl<S, F> IoTracked<S, F>
where
    F: FnMut(),
{
    pub(crate) fn new(inner: S, on_read: F) -> Self {
        Self { inner, on_read }
    }
}

impl<S, F> AsyncRead for IoTracked<S, F>
where
    S: AsyncRead,
    F: FnMut(),
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();

        let poll = this.inner.poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            (this.on_read)();
        }

        poll
    }
}
