use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rustls::client::VerifierBuilderError;
use thiserror::Error;

/// Stage of the probe that was cut short by a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Handshake,
    Response,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connect => "TCP connect",
            Phase::Handshake => "TLS handshake",
            Phase::Response => "waiting for the response",
        })
    }
}

/// Raw failure of one probe stage, before classification.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{host} did not resolve to any address")]
    NoAddresses { host: String },

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: Phase, after: Duration },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("unable to load the system trust store: {0}")]
    TrustStore(String),

    #[error("failed to build the certificate verifier: {0}")]
    Verifier(#[source] VerifierBuilderError),

    #[error("failed to build the TLS client configuration: {0}")]
    TlsConfig(#[source] rustls::Error),

    #[error("'{0}' is not a valid TLS server name")]
    ServerName(String),

    #[error("cannot probe {0}")]
    Unsupported(String),

    #[error("failed to assemble the request: {0}")]
    Request(#[from] http::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),
}

impl ProbeError {
    /// Short label naming the kind of failure, used by catch-all messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "Resolve",
            Self::NoAddresses { .. } => "NoAddresses",
            Self::Timeout { .. } => "Timeout",
            Self::Connect { .. } => "Connect",
            Self::Handshake(_) => "Handshake",
            Self::TrustStore(_) => "TrustStore",
            Self::Verifier(_) => "Verifier",
            Self::TlsConfig(_) => "TlsConfig",
            Self::ServerName(_) => "InvalidServerName",
            Self::Unsupported(_) => "Unsupported",
            Self::Request(_) => "Request",
            Self::Http(_) => "Http",
        }
    }
}
