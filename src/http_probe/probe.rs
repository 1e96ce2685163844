use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Empty;
use http::Request;
use http::header::{CONNECTION, HOST, USER_AGENT};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use url::{Host, Position, Url};

use super::capture::{CapturingVerifier, CertificateCapture};
use super::error::{Phase, ProbeError};
use super::report;
use super::result::{ProbeOutcome, ProbeResult};
use crate::cancel::CancellationToken;
use crate::diagnosis::classify;
use crate::endpoint::Endpoint;
use crate::sink::LogSink;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Trust anchors added on top of the platform trust store.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            extra_roots: Vec::new(),
        }
    }
}

struct Exchange {
    status: u16,
    version: String,
}

/// Attempts a single HTTP(S) request against an endpoint and classifies the
/// outcome. Never retries.
pub struct ConnectionProbe {
    settings: ProbeSettings,
    provider: Arc<CryptoProvider>,
    attempts: AtomicUsize,
}

impl ConnectionProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            settings,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of probes that went on to touch the network.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Writes the connection section of the report: a blank separator, the
    /// section heading and exactly one outcome line.
    pub async fn run(
        &self,
        endpoint: &Endpoint,
        sink: &mut dyn LogSink,
        cancel: &CancellationToken,
    ) -> io::Result<ProbeResult> {
        sink.blank_line()?;
        sink.write_line(&format!("Testing HTTPS connection to {}...", endpoint.raw()))?;
        let result = self.probe(endpoint.probe_url(), cancel).await;
        log::debug!("probe of {} finished in {:?}", result.url, result.elapsed);
        sink.write_line(result.message().as_str())?;
        Ok(result)
    }

    pub async fn probe(&self, url: &Url, cancel: &CancellationToken) -> ProbeResult {
        let started = Instant::now();

        if cancel.is_cancelled() {
            log::info!("connection probe to {url} skipped, run was cancelled");
            return ProbeResult {
                url: url.to_string(),
                outcome: ProbeOutcome::Cancelled,
                certificate: None,
                elapsed: started.elapsed(),
            };
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let capture = CertificateCapture::default();

        let outcome = match self.exchange(url, &capture).await {
            Ok(exchange) => {
                log::info!(
                    "probe of {url} answered {} over {}",
                    exchange.status,
                    exchange.version
                );
                ProbeOutcome::Connected {
                    status: exchange.status,
                    version: exchange.version,
                }
            }
            Err(err) => {
                log::warn!("probe of {url} failed: {}", report(&err));
                ProbeOutcome::Failed(classify(&err, capture.get().as_ref()))
            }
        };

        let certificate = capture.get();
        if let Some(summary) = certificate.as_ref().and_then(|c| c.summary()) {
            log::debug!(
                "server certificate subject={} issuer={} valid {:?} .. {:?}",
                summary.subject,
                summary.issuer,
                summary.not_before,
                summary.not_after
            );
        }

        ProbeResult {
            url: url.to_string(),
            outcome,
            certificate,
            elapsed: started.elapsed(),
        }
    }

    async fn exchange(&self, url: &Url, capture: &CertificateCapture) -> Result<Exchange, ProbeError> {
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(ProbeError::Unsupported(format!("{url}: no host"))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProbeError::Unsupported(format!("{url}: no port")))?;

        let addrs = self.resolve(&host, port).await?;
        let stream = self.connect(&host, &addrs).await?;

        match url.scheme() {
            "https" => {
                let tls = self.handshake(&host, stream, capture).await?;
                self.send_request(tls, url).await
            }
            "http" => self.send_request(stream, url).await,
            other => Err(ProbeError::Unsupported(format!("scheme {other}"))),
        }
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ProbeError> {
        let lookup = timeout(self.settings.connect_timeout, lookup_host((host, port))).await;
        let addrs: Vec<SocketAddr> = match lookup {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(source)) => {
                return Err(ProbeError::Resolve {
                    host: host.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(ProbeError::Resolve {
                    host: host.to_string(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "name resolution timed out"),
                });
            }
        };

        if addrs.is_empty() {
            return Err(ProbeError::NoAddresses {
                host: host.to_string(),
            });
        }
        log::debug!("{host} resolved to {addrs:?}");
        Ok(addrs)
    }

    async fn connect(&self, host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, ProbeError> {
        let attempt = async {
            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(source) => {
                        log::debug!("connect to {addr} failed: {source}");
                        last_error = Some(ProbeError::Connect {
                            addr: *addr,
                            source,
                        });
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| ProbeError::NoAddresses {
                host: host.to_string(),
            }))
        };

        timeout(self.settings.connect_timeout, attempt)
            .await
            .map_err(|_| ProbeError::Timeout {
                phase: Phase::Connect,
                after: self.settings.connect_timeout,
            })?
    }

    async fn handshake(
        &self,
        host: &str,
        stream: TcpStream,
        capture: &CertificateCapture,
    ) -> Result<TlsStream<TcpStream>, ProbeError> {
        let config = self.tls_config(capture)?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ProbeError::ServerName(host.to_string()))?;
        let connector = TlsConnector::from(Arc::new(config));

        timeout(self.settings.read_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| ProbeError::Timeout {
                phase: Phase::Handshake,
                after: self.settings.read_timeout,
            })?
            .map_err(ProbeError::Handshake)
    }

    /// Client configuration whose verifier is the platform verifier wrapped in
    /// a capturing verifier bound to `capture`.
    fn tls_config(&self, capture: &CertificateCapture) -> Result<ClientConfig, ProbeError> {
        let delegate = self.platform_verifier()?;
        let verifier = CapturingVerifier::new(delegate, capture.clone());

        let mut config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(ProbeError::TlsConfig)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }

    fn platform_verifier(&self) -> Result<Arc<WebPkiServerVerifier>, ProbeError> {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            log::warn!("trust store: {error}");
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        log::debug!("loaded {added} platform trust anchors ({ignored} ignored)");
        roots.add_parsable_certificates(self.settings.extra_roots.iter().cloned());

        if roots.is_empty() {
            let reason = native
                .errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no trusted root certificates found".to_string());
            return Err(ProbeError::TrustStore(reason));
        }

        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), self.provider.clone())
            .build()
            .map_err(ProbeError::Verifier)
    }

    async fn send_request<S>(&self, stream: S, url: &Url) -> Result<Exchange, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream)).await?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::debug!("probe connection closed: {e}");
            }
        });

        let exchange = self.request_status(&mut sender, url).await;
        // Only the status line is needed; drop the socket instead of waiting on the peer.
        connection.abort();
        exchange
    }

    async fn request_status(
        &self,
        sender: &mut SendRequest<Empty<Bytes>>,
        url: &Url,
    ) -> Result<Exchange, ProbeError> {
        let request = Request::get(&url[Position::BeforePath..])
            .header(HOST, &url[Position::BeforeHost..Position::AfterPort])
            .header(USER_AGENT, self.settings.user_agent.as_str())
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())?;

        let response = timeout(self.settings.read_timeout, sender.send_request(request))
            .await
            .map_err(|_| ProbeError::Timeout {
                phase: Phase::Response,
                after: self.settings.read_timeout,
            })??;

        Ok(Exchange {
            status: response.status().as_u16(),
            version: format!("{:?}", response.version()),
        })
    }
}
