use crate::config::UpstreamConfig;
use crate::session::{run_session, LogSink};
use crate::script::ScriptSink;
use crate::tls::{default_tls_client_config_with_ca, tls_client_config_insecure};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, debug};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use rustls_pki_types::ServerName;

/// Client-side stream: plain TCP or TLS-wrapped, so the listener supports
/// both ldap:// and ldaps://.
pub enum ClientStream {
    Tcp(TcpStream),
    Tls(ServerTlsStream<TcpStream>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Upstream stream: plain TCP or TLS depending on the server configuration.
pub enum ServerStream {
    Tcp(TcpStream),
    Tls(ClientTlsStream<TcpStream>),
}

impl AsyncRead for ServerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ServerStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ServerStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ServerStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ServerStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

pub struct ProxyServer {
    listen_url: String,
    upstream: UpstreamConfig,
    /// When Some, the listener speaks ldaps://.
    tls_acceptor: Option<TlsAcceptor>,
    log: Arc<LogSink>,
    script: Option<Arc<ScriptSink>>,
}

impl ProxyServer {
    pub fn new(
        listen_url: String,
        upstream: UpstreamConfig,
        tls_acceptor: Option<TlsAcceptor>,
        log: Arc<LogSink>,
        script: Option<Arc<ScriptSink>>,
    ) -> Self {
        Self {
            listen_url,
            upstream,
            tls_acceptor,
            log,
            script,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let addr = parse_listen_url(&self.listen_url)?;

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!("Listening on {}", addr);
        info!(
            "Forwarding to {}:{}{}",
            self.upstream.host,
            self.upstream.port,
            if self.upstream.use_tls.unwrap_or(false) {
                " (TLS)"
            } else {
                ""
            }
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    let acceptor = self.tls_acceptor.clone();
                    let upstream = self.upstream.clone();
                    let log = Arc::clone(&self.log);
                    let script = self.script.clone();

                    tokio::spawn(async move {
                        let client_stream = if let Some(acceptor) = acceptor {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => ClientStream::Tls(tls_stream),
                                Err(e) => {
                                    error!("TLS handshake failed for {}: {}", peer_addr, e);
                                    return;
                                }
                            }
                        } else {
                            ClientStream::Tcp(stream)
                        };
                        let server_stream = match connect_upstream(&upstream).await {
                            Ok(s) => s,
                            Err(e) => {
                                error!("Upstream connect failed for {}: {:#}", peer_addr, e);
                                return;
                            }
                        };
                        if let Err(e) =
                            run_session(client_stream, server_stream, log, script).await
                        {
                            error!("Session error for {}: {:#}", peer_addr, e);
                        }
                        debug!("Session for {} finished", peer_addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Open the upstream connection for one session, with TLS when configured.
pub async fn connect_upstream(upstream: &UpstreamConfig) -> Result<ServerStream> {
    let addr = format!("{}:{}", upstream.host, upstream.port);
    let tcp = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    if !upstream.use_tls.unwrap_or(false) {
        return Ok(ServerStream::Tcp(tcp));
    }
    let config = if upstream.skip_verify.unwrap_or(false) {
        tls_client_config_insecure()?
    } else {
        let ca_pem = match &upstream.ca_file {
            Some(path) => Some(
                std::fs::read(path).with_context(|| format!("Read CA file: {}", path))?,
            ),
            None => None,
        };
        default_tls_client_config_with_ca(ca_pem.as_deref())?
    };
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(upstream.host.clone())
        .map_err(|_| anyhow::anyhow!("Invalid hostname for TLS SNI: {}", addr))?;
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .with_context(|| format!("TLS handshake to {} failed", addr))?;
    Ok(ServerStream::Tls(tls_stream))
}

pub fn parse_listen_url(url: &str) -> Result<SocketAddr> {
    // Parse ldap://host:port or ldaps://host:port
    let url = url.strip_prefix("ldap://")
        .or_else(|| url.strip_prefix("ldaps://"))
        .ok_or_else(|| anyhow::anyhow!("Invalid URL scheme, expected ldap:// or ldaps://"))?;

    // Remove leading slashes if present
    let url = url.trim_start_matches('/');

    // Parse host:port
    if url.starts_with(':') {
        // Just port specified, bind to all interfaces
        let port: u16 = url.trim_start_matches(':')
            .parse()
            .context("Invalid port number")?;
        Ok(SocketAddr::from(([0, 0, 0, 0], port)))
    } else {
        url.parse()
            .with_context(|| format!("Failed to parse address: {}", url))
    }
}

/// Whether the listen URL asks for a TLS listener.
pub fn listen_url_is_tls(url: &str) -> bool {
    url.starts_with("ldaps://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_url_ldap() {
        let addr = parse_listen_url("ldap://127.0.0.1:1389").unwrap();
        assert_eq!(addr.port(), 1389);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_parse_listen_url_ldaps() {
        let addr = parse_listen_url("ldaps://0.0.0.0:1636").unwrap();
        assert_eq!(addr.port(), 1636);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
        assert!(listen_url_is_tls("ldaps://0.0.0.0:1636"));
        assert!(!listen_url_is_tls("ldap://0.0.0.0:1389"));
    }

    #[test]
    fn test_parse_listen_url_port_only() {
        let addr = parse_listen_url("ldap://:1389").unwrap();
        assert_eq!(addr.port(), 1389);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_parse_listen_url_with_slashes() {
        let addr = parse_listen_url("ldap:///127.0.0.1:1389").unwrap();
        assert_eq!(addr.port(), 1389);
    }

    #[test]
    fn test_parse_listen_url_invalid_scheme() {
        assert!(parse_listen_url("http://127.0.0.1:1389").is_err());
        assert!(parse_listen_url("invalid://127.0.0.1:1389").is_err());
    }

    #[test]
    fn test_parse_listen_url_invalid_port() {
        assert!(parse_listen_url("ldap://:99999").is_err());
        assert!(parse_listen_url("ldap://:abc").is_err());
    }

    #[test]
    fn test_parse_listen_url_invalid_address() {
        assert!(parse_listen_url("ldap://invalid:address").is_err());
    }
}
