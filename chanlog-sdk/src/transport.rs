//! Line transport over plaintext TCP or TLS.
//!
//! The bot runs a polling loop, so reads are bounded by a short timeout:
//! [`LineTransport::read_line`] returns [`ReadOutcome::Idle`] when no full
//! line arrived in time. Partially received bytes stay buffered across
//! polls. Writes are flushed per line.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::format;
use crate::irc::Message;

/// Port conventionally used for IRC over TLS.
pub const TLS_PORT: u16 = 6697;

/// Longest line accepted: 512 bytes of message plus 8191 of tags.
pub const MAX_LINE_LEN: usize = 512 + 8191;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS server name {0:?}")]
    ServerName(String),
    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// Where to connect and whether to wrap the socket in TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Resolve the transport mode from the configured host and port.
    ///
    /// `tls://` and `ircs://` prefixes force TLS, `irc://` is stripped
    /// without effect; otherwise port 6697 selects TLS.
    pub fn resolve(host: &str, port: u16) -> Self {
        let (host, forced_tls) = if let Some(rest) = host
            .strip_prefix("tls://")
            .or_else(|| host.strip_prefix("ircs://"))
        {
            (rest, true)
        } else if let Some(rest) = host.strip_prefix("irc://") {
            (rest, false)
        } else {
            (host, false)
        };
        Self {
            host: host.trim_end_matches('/').to_string(),
            port,
            tls: forced_tls || port == TLS_PORT,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of one bounded read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// No complete line within the poll window.
    Idle,
    Line(Message),
    /// EOF or read error; the transport is unusable.
    Disconnected,
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// A framed IRC connection.
pub struct LineTransport {
    reader: BufReader<ReadHalf<Box<dyn Stream>>>,
    writer: WriteHalf<Box<dyn Stream>>,
    pending: Vec<u8>,
    tls: bool,
}

impl LineTransport {
    /// Open a TCP connection to `endpoint`, with a TLS handshake when the
    /// endpoint asks for it.
    pub async fn connect(endpoint: &Endpoint, tls_insecure: bool) -> Result<Self, TransportError> {
        let addr = endpoint.addr();
        let mode = if endpoint.tls { "TLS" } else { "plain" };
        tracing::debug!("Resolving {addr}...");
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect { addr: addr.clone(), source })?;
        tracing::debug!("TCP connected to {addr} ({mode})");

        if !endpoint.tls {
            return Ok(Self::from_stream(tcp, false));
        }

        let tls_config = if tls_insecure {
            tracing::debug!("TLS: insecure mode (skipping cert verification)");
            rustls_insecure_config()
        } else {
            rustls_default_config()
        };
        let connector = TlsConnector::from(Arc::new(tls_config));
        let dns_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
            .map_err(|_| TransportError::ServerName(endpoint.host.clone()))?;
        let tls = connector
            .connect(dns_name, tcp)
            .await
            .map_err(|source| TransportError::Handshake { addr: addr.clone(), source })?;
        tracing::debug!("TLS handshake complete");
        Ok(Self::from_stream(tls, true))
    }

    /// Wrap an already-open stream (used by tests with in-memory pipes).
    pub fn from_stream<S>(stream: S, tls: bool) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: Box<dyn Stream> = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
            tls,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Read at most one line, waiting no longer than `poll`.
    ///
    /// A peer that sends more than [`MAX_LINE_LEN`] bytes without a newline
    /// is treated as disconnected.
    pub async fn read_line(&mut self, poll: Duration) -> ReadOutcome {
        loop {
            let limit = (MAX_LINE_LEN + 1).saturating_sub(self.pending.len()) as u64;
            let mut capped = (&mut self.reader).take(limit);
            let read = tokio::time::timeout(poll, capped.read_until(b'\n', &mut self.pending));
            match read.await {
                Err(_) => return ReadOutcome::Idle,
                Ok(Ok(0)) => return ReadOutcome::Disconnected,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Read failed");
                    return ReadOutcome::Disconnected;
                }
                Ok(Ok(_))
                    if self.pending.len() > MAX_LINE_LEN && !self.pending.ends_with(b"\n") =>
                {
                    tracing::warn!(
                        buffered = self.pending.len(),
                        "Line too long, dropping connection"
                    );
                    self.pending.clear();
                    return ReadOutcome::Disconnected;
                }
                Ok(Ok(_)) => {
                    let raw = std::mem::take(&mut self.pending);
                    let text = format::decode(&raw);
                    match Message::parse(&text) {
                        Some(msg) => {
                            tracing::trace!(line = %text.trim_end(), "<<");
                            return ReadOutcome::Line(msg);
                        }
                        // Blank or unparseable line: keep reading within this poll.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Write one line followed by `\r\n` and flush.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

fn install_crypto_provider() {
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

/// Accepts any certificate; only for networks with self-signed certs.
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
